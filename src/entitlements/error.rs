use thiserror::Error;

/// key: ledger-errors -> gate/settlement failure taxonomy
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance: {subscription_remaining} subscription remaining, {purchased} purchased")]
    InsufficientBalance {
        subscription_remaining: i64,
        purchased: i64,
    },
    #[error("policy denied: {0}")]
    PolicyDenied(String),
    #[error("not found")]
    NotFound,
    #[error("settlement conflict for payment `{payment_ref}`: {detail}")]
    SettlementConflict {
        payment_ref: String,
        detail: String,
    },
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
