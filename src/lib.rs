pub mod accounts;
pub mod auth;
pub mod config;
pub mod entitlements;
pub mod error;
pub mod extractor;
pub mod rate_limit;
pub mod routes;
pub mod webhooks;
