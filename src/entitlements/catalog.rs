use anyhow::Result;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{CreditPackage, CreditType, PlanAllowance, SubscriptionPlan};

/// key: plan-catalog -> read-mostly reference data with seeded defaults
///
/// Seeding is guarded by the unique plan/package codes, so concurrent first
/// requests cannot create duplicate rows.

struct PlanSeed {
    code: &'static str,
    name: &'static str,
    description: &'static str,
    price_cents: i32,
    trial_days: i32,
    allowances: &'static [(CreditType, i64)],
}

struct PackageSeed {
    code: &'static str,
    name: &'static str,
    credit_type: CreditType,
    base_amount: i64,
    bonus_amount: i64,
    price_cents: i32,
    validity_days: Option<i32>,
}

const PLAN_SEEDS: &[PlanSeed] = &[
    PlanSeed {
        code: "free",
        name: "Free",
        description: "Post a job and try AI screening",
        price_cents: 0,
        trial_days: 0,
        allowances: &[
            (CreditType::ResumeContact, 0),
            (CreditType::AiAnalysis, 3),
            (CreditType::JobPosting, 1),
        ],
    },
    PlanSeed {
        code: "starter",
        name: "Starter",
        description: "For teams hiring a few roles a month",
        price_cents: 4900,
        trial_days: 14,
        allowances: &[
            (CreditType::ResumeContact, 30),
            (CreditType::AiAnalysis, 100),
            (CreditType::JobPosting, 5),
        ],
    },
    PlanSeed {
        code: "growth",
        name: "Growth",
        description: "High-volume sourcing and screening",
        price_cents: 14900,
        trial_days: 14,
        allowances: &[
            (CreditType::ResumeContact, 150),
            (CreditType::AiAnalysis, 500),
            (CreditType::JobPosting, 20),
        ],
    },
];

const PACKAGE_SEEDS: &[PackageSeed] = &[
    PackageSeed {
        code: "contacts-10",
        name: "10 contact reveals",
        credit_type: CreditType::ResumeContact,
        base_amount: 10,
        bonus_amount: 0,
        price_cents: 1900,
        validity_days: None,
    },
    PackageSeed {
        code: "contacts-50",
        name: "50 contact reveals",
        credit_type: CreditType::ResumeContact,
        base_amount: 50,
        bonus_amount: 5,
        price_cents: 7900,
        validity_days: None,
    },
    PackageSeed {
        code: "analysis-100",
        name: "100 AI analyses",
        credit_type: CreditType::AiAnalysis,
        base_amount: 100,
        bonus_amount: 10,
        price_cents: 2900,
        validity_days: Some(365),
    },
    PackageSeed {
        code: "postings-3",
        name: "3 job postings",
        credit_type: CreditType::JobPosting,
        base_amount: 3,
        bonus_amount: 0,
        price_cents: 9900,
        validity_days: Some(90),
    },
];

pub async fn ensure_seeded(pool: &PgPool) -> Result<()> {
    let plans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscription_plans")
        .fetch_one(pool)
        .await?;
    if plans == 0 {
        seed_plans(pool).await?;
    }

    let packages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credit_packages")
        .fetch_one(pool)
        .await?;
    if packages == 0 {
        seed_packages(pool).await?;
    }

    Ok(())
}

async fn seed_plans(pool: &PgPool) -> Result<()> {
    for seed in PLAN_SEEDS {
        sqlx::query(
            r#"
            INSERT INTO subscription_plans (id, code, name, description, price_cents, trial_days)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(seed.code)
        .bind(seed.name)
        .bind(seed.description)
        .bind(seed.price_cents)
        .bind(seed.trial_days)
        .execute(pool)
        .await?;

        // the row may have been inserted by a concurrent seeder; resolve by code
        let plan_id: Uuid =
            sqlx::query_scalar("SELECT id FROM subscription_plans WHERE code = $1")
                .bind(seed.code)
                .fetch_one(pool)
                .await?;

        for (credit_type, limit_quantity) in seed.allowances {
            sqlx::query(
                r#"
                INSERT INTO plan_allowances (id, plan_id, credit_type, limit_quantity)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (plan_id, credit_type) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(plan_id)
            .bind(credit_type.as_str())
            .bind(*limit_quantity)
            .execute(pool)
            .await?;
        }
    }

    tracing::info!(plans = PLAN_SEEDS.len(), "seeded default subscription plans");
    Ok(())
}

async fn seed_packages(pool: &PgPool) -> Result<()> {
    for seed in PACKAGE_SEEDS {
        sqlx::query(
            r#"
            INSERT INTO credit_packages (
                id, code, name, credit_type, base_amount, bonus_amount, price_cents, validity_days
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(seed.code)
        .bind(seed.name)
        .bind(seed.credit_type.as_str())
        .bind(seed.base_amount)
        .bind(seed.bonus_amount)
        .bind(seed.price_cents)
        .bind(seed.validity_days)
        .execute(pool)
        .await?;
    }

    tracing::info!(packages = PACKAGE_SEEDS.len(), "seeded default credit packages");
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct PlanCatalogEntry {
    pub plan: SubscriptionPlan,
    pub allowances: Vec<PlanAllowance>,
}

pub async fn plan_catalog(pool: &PgPool) -> Result<Vec<PlanCatalogEntry>> {
    let plans = sqlx::query_as::<_, SubscriptionPlan>(
        "SELECT * FROM subscription_plans WHERE active = TRUE ORDER BY price_cents ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut catalog = Vec::with_capacity(plans.len());
    for plan in plans {
        let allowances = sqlx::query_as::<_, PlanAllowance>(
            "SELECT * FROM plan_allowances WHERE plan_id = $1 ORDER BY credit_type ASC",
        )
        .bind(plan.id)
        .fetch_all(pool)
        .await?;
        catalog.push(PlanCatalogEntry { plan, allowances });
    }
    Ok(catalog)
}

pub async fn package_catalog(pool: &PgPool) -> Result<Vec<CreditPackage>> {
    let packages = sqlx::query_as::<_, CreditPackage>(
        "SELECT * FROM credit_packages WHERE active = TRUE ORDER BY price_cents ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(packages)
}
