pub mod accounts;
pub mod auth;
pub mod dashboard;
pub mod notifications;
pub mod publish;
pub mod schedule;
