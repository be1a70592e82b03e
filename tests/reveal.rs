use entitlement_engine::entitlements::{
    ActionKind, ConsumptionSource, CreditOwner, CreditType, LedgerError, RevealService,
};
use sqlx::PgPool;
use uuid::Uuid;

// key: reveal-tests -> idempotence, policy overlay, delegation

async fn seed_account(pool: &PgPool, email: &str, verified: bool) -> i32 {
    let account_id: i32 = sqlx::query_scalar(
        "INSERT INTO accounts (email, password_hash) VALUES ($1, $2) RETURNING id",
    )
    .bind(email)
    .bind("hashed")
    .fetch_one(pool)
    .await
    .unwrap();
    if verified {
        sqlx::query("UPDATE accounts SET verified_at = NOW() WHERE id = $1")
            .bind(account_id)
            .execute(pool)
            .await
            .unwrap();
    }
    account_id
}

async fn seed_seat(pool: &PgPool, email: &str, parent_account_id: i32) -> i32 {
    sqlx::query_scalar(
        r#"
        INSERT INTO accounts (email, password_hash, role, parent_account_id)
        VALUES ($1, $2, 'sub_user', $3)
        RETURNING id
        "#,
    )
    .bind(email)
    .bind("hashed")
    .bind(parent_account_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn set_purchased(pool: &PgPool, account_id: i32, credit_type: CreditType, amount: i64) {
    sqlx::query(
        r#"
        INSERT INTO credit_balances (id, account_id, credit_type, purchased)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (account_id, credit_type) DO UPDATE SET purchased = EXCLUDED.purchased
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(credit_type.as_str())
    .bind(amount)
    .execute(pool)
    .await
    .unwrap();
}

async fn purchased_of(pool: &PgPool, account_id: i32, credit_type: CreditType) -> i64 {
    sqlx::query_scalar(
        "SELECT purchased FROM credit_balances WHERE account_id = $1 AND credit_type = $2",
    )
    .bind(account_id)
    .bind(credit_type.as_str())
    .fetch_one(pool)
    .await
    .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn repeated_reveal_charges_exactly_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "idempotent@example.com", true).await;
    set_purchased(&pool, account_id, CreditType::ResumeContact, 2).await;

    let service = RevealService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };

    let first = service
        .reveal_or_charge(account_id, &owner, ActionKind::ContactRevealDatabase, "cand-1")
        .await
        .unwrap();
    assert!(!first.already_paid);
    assert_eq!(first.record.source, ConsumptionSource::Credit.as_str());
    assert_eq!(purchased_of(&pool, account_id, CreditType::ResumeContact).await, 1);

    let second = service
        .reveal_or_charge(account_id, &owner, ActionKind::ContactRevealDatabase, "cand-1")
        .await
        .unwrap();
    assert!(second.already_paid);
    assert_eq!(second.record.id, first.record.id);
    assert_eq!(purchased_of(&pool, account_id, CreditType::ResumeContact).await, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unverified_account_capped_at_one_database_reveal(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    // unverified, purchased resume_contact = 2, no subscription
    let account_id = seed_account(&pool, "unverified@example.com", false).await;
    set_purchased(&pool, account_id, CreditType::ResumeContact, 2).await;

    let service = RevealService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };

    let first = service
        .reveal_or_charge(account_id, &owner, ActionKind::ContactRevealDatabase, "t1")
        .await
        .unwrap();
    assert!(!first.already_paid);
    assert_eq!(first.record.source, ConsumptionSource::Credit.as_str());
    assert_eq!(purchased_of(&pool, account_id, CreditType::ResumeContact).await, 1);

    let replay = service
        .reveal_or_charge(account_id, &owner, ActionKind::ContactRevealDatabase, "t1")
        .await
        .unwrap();
    assert!(replay.already_paid);
    assert_eq!(purchased_of(&pool, account_id, CreditType::ResumeContact).await, 1);

    let denied = service
        .reveal_or_charge(account_id, &owner, ActionKind::ContactRevealDatabase, "t2")
        .await
        .unwrap_err();
    assert!(matches!(denied, LedgerError::PolicyDenied(_)));
    assert_eq!(purchased_of(&pool, account_id, CreditType::ResumeContact).await, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn application_reveals_exempt_from_unverified_cap(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "applicant-flow@example.com", false).await;
    set_purchased(&pool, account_id, CreditType::ResumeContact, 3).await;

    let service = RevealService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };

    service
        .reveal_or_charge(account_id, &owner, ActionKind::ContactRevealDatabase, "db-1")
        .await
        .unwrap();

    // reveals tied to applications the account's own posting received stay open
    let application = service
        .reveal_or_charge(
            account_id,
            &owner,
            ActionKind::ContactRevealApplication,
            "app-77",
        )
        .await
        .unwrap();
    assert!(!application.already_paid);

    let another = service
        .reveal_or_charge(
            account_id,
            &owner,
            ActionKind::ContactRevealApplication,
            "app-78",
        )
        .await
        .unwrap();
    assert!(!another.already_paid);
    assert_eq!(purchased_of(&pool, account_id, CreditType::ResumeContact).await, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn verified_account_not_capped(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "verified@example.com", true).await;
    set_purchased(&pool, account_id, CreditType::ResumeContact, 3).await;

    let service = RevealService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };
    for target in ["v-1", "v-2", "v-3"] {
        let outcome = service
            .reveal_or_charge(account_id, &owner, ActionKind::ContactRevealDatabase, target)
            .await
            .unwrap();
        assert!(!outcome.already_paid);
    }
    assert_eq!(purchased_of(&pool, account_id, CreditType::ResumeContact).await, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn seat_reveals_charge_the_parent_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let parent_id = seed_account(&pool, "parent@example.com", true).await;
    let seat_id = seed_seat(&pool, "seat@example.com", parent_id).await;
    set_purchased(&pool, parent_id, CreditType::ResumeContact, 1).await;

    let service = RevealService::new(pool.clone());
    let owner = CreditOwner::Delegated {
        parent_account_id: parent_id,
    };

    let first = service
        .reveal_or_charge(seat_id, &owner, ActionKind::ContactRevealDatabase, "cand-9")
        .await
        .unwrap();
    assert!(!first.already_paid);
    assert_eq!(first.record.actor_account_id, seat_id);
    assert_eq!(first.record.owner_account_id, parent_id);
    assert_eq!(purchased_of(&pool, parent_id, CreditType::ResumeContact).await, 0);

    // the parent retries the same target through its own session
    let parent_owner = CreditOwner::Direct {
        account_id: parent_id,
    };
    let replay = service
        .reveal_or_charge(
            parent_id,
            &parent_owner,
            ActionKind::ContactRevealDatabase,
            "cand-9",
        )
        .await
        .unwrap();
    assert!(replay.already_paid);
    assert_eq!(replay.record.id, first.record.id);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn reveal_without_any_balance_reports_shortfall(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "broke@example.com", true).await;
    let service = RevealService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };

    let err = service
        .reveal_or_charge(account_id, &owner, ActionKind::ContactRevealDatabase, "cand-2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance {
            subscription_remaining: 0,
            purchased: 0,
        }
    ));

    let records: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM consumption_records WHERE owner_account_id = $1",
    )
    .bind(account_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(records, 0, "a failed gate must not leave an audit row");
}
