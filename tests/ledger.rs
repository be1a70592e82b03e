use entitlement_engine::entitlements::{
    ConsumptionSource, CreditOwner, CreditType, LedgerError, LedgerService,
};
use futures_util::future::join_all;
use sqlx::PgPool;
use uuid::Uuid;

// key: ledger-tests -> gate ordering, ceilings, concurrency

async fn seed_account(pool: &PgPool, email: &str) -> i32 {
    sqlx::query_scalar("INSERT INTO accounts (email, password_hash) VALUES ($1, $2) RETURNING id")
        .bind(email)
        .bind("hashed")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn seed_plan(pool: &PgPool, code: &str, allowances: &[(CreditType, i64)]) -> Uuid {
    let plan_id = Uuid::new_v4();
    sqlx::query("INSERT INTO subscription_plans (id, code, name, price_cents) VALUES ($1, $2, $3, $4)")
        .bind(plan_id)
        .bind(code)
        .bind(code)
        .bind(4900_i32)
        .execute(pool)
        .await
        .unwrap();
    for (credit_type, limit) in allowances {
        sqlx::query(
            "INSERT INTO plan_allowances (id, plan_id, credit_type, limit_quantity) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(plan_id)
        .bind(credit_type.as_str())
        .bind(*limit)
        .execute(pool)
        .await
        .unwrap();
    }
    plan_id
}

async fn seed_subscription(pool: &PgPool, account_id: i32, plan_id: Uuid) -> Uuid {
    let subscription_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO subscriptions (id, account_id, plan_id, status) VALUES ($1, $2, $3, 'active')",
    )
    .bind(subscription_id)
    .bind(account_id)
    .bind(plan_id)
    .execute(pool)
    .await
    .unwrap();
    subscription_id
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

async fn balance_columns(pool: &PgPool, account_id: i32, credit_type: CreditType) -> (i64, i64, i64) {
    sqlx::query_as(
        "SELECT allocated, used, purchased FROM credit_balances WHERE account_id = $1 AND credit_type = $2",
    )
    .bind(account_id)
    .bind(credit_type.as_str())
    .fetch_one(pool)
    .await
    .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn subscription_quota_drawn_before_purchased(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "ordering@example.com").await;
    let plan_id = seed_plan(&pool, "ordering", &[(CreditType::ResumeContact, 3)]).await;
    seed_subscription(&pool, account_id, plan_id).await;
    set_purchased(&pool, account_id, CreditType::ResumeContact, 10).await;

    let service = LedgerService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };
    let outcome = service
        .consume(&owner, CreditType::ResumeContact, 5)
        .await
        .unwrap();

    assert_eq!(outcome.source, ConsumptionSource::Credit);
    assert_eq!(outcome.subscription_debited, 3);
    assert_eq!(outcome.credit_debited, 2);
    assert_eq!(outcome.subscription_remaining, 0);
    assert_eq!(outcome.purchased_remaining, 8);

    let (allocated, used, purchased) =
        balance_columns(&pool, account_id, CreditType::ResumeContact).await;
    assert_eq!(allocated, 3);
    assert_eq!(used, 3);
    assert_eq!(purchased, 8);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn draw_within_quota_never_touches_purchased(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "quota-only@example.com").await;
    let plan_id = seed_plan(&pool, "quota-only", &[(CreditType::AiAnalysis, 10)]).await;
    seed_subscription(&pool, account_id, plan_id).await;
    set_purchased(&pool, account_id, CreditType::AiAnalysis, 4).await;

    let service = LedgerService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };
    let outcome = service
        .consume(&owner, CreditType::AiAnalysis, 10)
        .await
        .unwrap();

    assert_eq!(outcome.source, ConsumptionSource::Subscription);
    assert_eq!(outcome.subscription_debited, 10);
    assert_eq!(outcome.credit_debited, 0);

    let (_, used, purchased) = balance_columns(&pool, account_id, CreditType::AiAnalysis).await;
    assert_eq!(used, 10);
    assert_eq!(purchased, 4);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn shortfall_reports_both_remainders_and_debits_nothing(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "shortfall@example.com").await;
    let plan_id = seed_plan(&pool, "shortfall", &[(CreditType::ResumeContact, 3)]).await;
    seed_subscription(&pool, account_id, plan_id).await;
    set_purchased(&pool, account_id, CreditType::ResumeContact, 1).await;

    let service = LedgerService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };
    let err = service
        .consume(&owner, CreditType::ResumeContact, 5)
        .await
        .unwrap_err();

    match err {
        LedgerError::InsufficientBalance {
            subscription_remaining,
            purchased,
        } => {
            assert_eq!(subscription_remaining, 3);
            assert_eq!(purchased, 1);
        }
        other => panic!("expected InsufficientBalance, got {other:?}"),
    }

    let (_, used, purchased) =
        balance_columns(&pool, account_id, CreditType::ResumeContact).await;
    assert_eq!(used, 0, "failed draw must not debit the quota");
    assert_eq!(purchased, 1, "failed draw must not debit the pot");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn concurrent_consumes_never_exceed_allocation(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "concurrent@example.com").await;
    let plan_id = seed_plan(&pool, "concurrent", &[(CreditType::AiAnalysis, 10)]).await;
    seed_subscription(&pool, account_id, plan_id).await;

    let tasks = (0..50).map(|_| {
        let service = LedgerService::new(pool.clone());
        tokio::spawn(async move {
            let owner = CreditOwner::Direct { account_id };
            service.consume(&owner, CreditType::AiAnalysis, 1).await
        })
    });
    let results = join_all(tasks).await;

    let mut successes = 0;
    let mut shortfalls = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => successes += 1,
            Err(LedgerError::InsufficientBalance { .. }) => shortfalls += 1,
            Err(other) => panic!("unexpected error under contention: {other:?}"),
        }
    }
    assert_eq!(successes, 10);
    assert_eq!(shortfalls, 40);

    let (allocated, used, purchased) =
        balance_columns(&pool, account_id, CreditType::AiAnalysis).await;
    assert_eq!(used, allocated);
    assert_eq!(purchased, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn period_rollover_resets_subscription_usage(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "rollover@example.com").await;
    let plan_id = seed_plan(&pool, "rollover", &[(CreditType::JobPosting, 2)]).await;
    let subscription_id = seed_subscription(&pool, account_id, plan_id).await;

    let service = LedgerService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };
    service
        .consume(&owner, CreditType::JobPosting, 2)
        .await
        .unwrap();
    assert!(service
        .consume(&owner, CreditType::JobPosting, 1)
        .await
        .is_err());

    // simulate the next billing period opening
    sqlx::query(
        "UPDATE subscriptions SET current_period_start = NOW(), current_period_end = NULL, updated_at = NOW() WHERE id = $1",
    )
    .bind(subscription_id)
    .execute(&pool)
    .await
    .unwrap();

    let outcome = service
        .consume(&owner, CreditType::JobPosting, 2)
        .await
        .unwrap();
    assert_eq!(outcome.source, ConsumptionSource::Subscription);

    let (_, used, _) = balance_columns(&pool, account_id, CreditType::JobPosting).await;
    assert_eq!(used, 2);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn lapsed_subscription_quota_is_not_consumable(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "lapsed@example.com").await;
    let plan_id = seed_plan(&pool, "lapsed", &[(CreditType::ResumeContact, 5)]).await;
    let subscription_id = seed_subscription(&pool, account_id, plan_id).await;
    set_purchased(&pool, account_id, CreditType::ResumeContact, 1).await;

    let service = LedgerService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };
    // materialize the quota, then let the subscription lapse
    service
        .consume(&owner, CreditType::ResumeContact, 1)
        .await
        .unwrap();
    sqlx::query("UPDATE subscriptions SET status = 'expired', updated_at = NOW() WHERE id = $1")
        .bind(subscription_id)
        .execute(&pool)
        .await
        .unwrap();

    let outcome = service
        .consume(&owner, CreditType::ResumeContact, 1)
        .await
        .unwrap();
    assert_eq!(outcome.source, ConsumptionSource::Credit);
    assert_eq!(outcome.purchased_remaining, 0);

    let err = service
        .consume(&owner, CreditType::ResumeContact, 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance {
            subscription_remaining: 0,
            purchased: 0,
        }
    ));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn expired_purchased_credits_are_unavailable(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "expired-pot@example.com").await;
    sqlx::query(
        r#"
        INSERT INTO credit_balances (id, account_id, credit_type, purchased, purchased_expires_at)
        VALUES ($1, $2, $3, 5, NOW() - INTERVAL '1 day')
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(CreditType::AiAnalysis.as_str())
    .execute(&pool)
    .await
    .unwrap();

    let service = LedgerService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };
    let err = service
        .consume(&owner, CreditType::AiAnalysis, 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance {
            subscription_remaining: 0,
            purchased: 0,
        }
    ));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn balance_snapshot_covers_every_credit_type(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let account_id = seed_account(&pool, "snapshot@example.com").await;
    let plan_id = seed_plan(
        &pool,
        "snapshot",
        &[(CreditType::ResumeContact, 30), (CreditType::AiAnalysis, 100)],
    )
    .await;
    seed_subscription(&pool, account_id, plan_id).await;
    set_purchased(&pool, account_id, CreditType::JobPosting, 3).await;

    let service = LedgerService::new(pool.clone());
    let owner = CreditOwner::Direct { account_id };
    service
        .consume(&owner, CreditType::ResumeContact, 4)
        .await
        .unwrap();

    let snapshot = service.balance_snapshot(&owner).await.unwrap();
    assert_eq!(snapshot.len(), CreditType::ALL.len());

    let by_type = |t: CreditType| snapshot.iter().find(|e| e.credit_type == t).unwrap();
    assert_eq!(by_type(CreditType::ResumeContact).subscription_remaining, 26);
    assert_eq!(by_type(CreditType::AiAnalysis).subscription_remaining, 100);
    assert_eq!(by_type(CreditType::JobPosting).subscription_remaining, 0);
    assert_eq!(by_type(CreditType::JobPosting).purchased, 3);
}
