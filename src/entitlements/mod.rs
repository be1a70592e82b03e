pub mod api;
pub mod catalog;
pub mod error;
pub mod models;
pub mod policy;
pub mod reveal;
pub mod scheduler;
pub mod service;
pub mod settlement;

pub use catalog::{ensure_seeded, package_catalog, plan_catalog, PlanCatalogEntry};
pub use error::{LedgerError, LedgerResult};
pub use models::{
    ActionKind, BalanceEntry, ConsumeOutcome, ConsumptionRecord, ConsumptionSource, CreditBalance,
    CreditOwner, CreditPackage, CreditType, PaymentSettlement, PlanAllowance, RevealOutcome,
    SettlementOutcome, Subscription, SubscriptionPlan,
};
pub use policy::RevealPolicy;
pub use reveal::RevealService;
pub use scheduler::{process_tick as run_expiry_tick, spawn as spawn_expiry_scheduler};
pub use service::LedgerService;
pub use settlement::{
    start_settlement_worker, CheckoutLikeAdapter, PaymentEventAdapter, SettlementHandle,
    SettlementItemType, SettlementJob, SettlementRequest, SettlementService,
};
