use once_cell::sync::Lazy;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// key: reveal-policy-config -> rolling window for unverified accounts
pub static UNVERIFIED_REVEAL_WINDOW_DAYS: Lazy<i64> = Lazy::new(|| {
    std::env::var("UNVERIFIED_REVEAL_WINDOW_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(30)
});

/// key: reveal-policy-config -> database reveals allowed per window
pub static UNVERIFIED_REVEAL_LIMIT: Lazy<i64> = Lazy::new(|| {
    std::env::var("UNVERIFIED_REVEAL_LIMIT")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value >= 1)
        .unwrap_or(1)
});

/// key: settlement-config -> queue depth for the webhook-fed worker
pub static SETTLEMENT_QUEUE_DEPTH: Lazy<usize> = Lazy::new(|| {
    std::env::var("SETTLEMENT_QUEUE_DEPTH")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(64)
});

/// key: subscription-config -> expiry scan cadence
pub static SUBSCRIPTION_EXPIRY_SCAN_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("SUBSCRIPTION_EXPIRY_SCAN_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(300)
});

/// Failed login attempts tolerated inside one lockout window. Defaults to `5`.
pub static LOGIN_FAILURE_LIMIT: Lazy<i64> = Lazy::new(|| {
    std::env::var("LOGIN_FAILURE_LIMIT")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(5)
});

/// Length of the login lockout window in seconds. Defaults to `900`.
pub static LOGIN_LOCKOUT_WINDOW_SECS: Lazy<i64> = Lazy::new(|| {
    std::env::var("LOGIN_LOCKOUT_WINDOW_SECS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(900)
});
