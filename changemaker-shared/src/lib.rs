//! # Changemaker Shared Library
//!
//! This crate contains the domain types, persistence and integrations used by
//! the Changemaker API server.
//!
//! ## Module Organization
//!
//! - `db`: Connection pool and migrations
//! - `models`: Database models and their queries
//! - `auth`: Supabase session verification and workspace authorization
//! - `rewards`: RewardSTACK client, webhook mapping and the issuance workflow
//! - `email`: Template rendering and outbound mail delivery
//! - `ai`: Hosted model streaming client, rate limiter and cost tracker

pub mod ai;
pub mod auth;
pub mod db;
pub mod email;
pub mod models;
pub mod rewards;

/// Current version of the Changemaker shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
