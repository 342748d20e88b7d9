//! Instalaz - scheduled Instagram publishing
//!
//! This library provides the core of the Instalaz dashboard: Facebook OAuth
//! onboarding, long-lived token storage, content resolution from static file
//! hosts, the Graph API publish protocol and the daily slot scheduler.

pub mod activity;
pub mod clock;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod graph;
pub mod logging;
pub mod notify;
pub mod oauth;
pub mod publisher;
pub mod schedule_settings;
pub mod scheduler;
pub mod service;
pub mod token_store;
pub mod token_watch;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{InstalazError, Result};
pub use types::{Account, AccountKind, AccountStatus, Slot};
