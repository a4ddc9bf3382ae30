pub mod auth;
pub mod clock;
pub mod config;
pub mod console;
pub mod engine;
pub mod limits;
pub mod mailer;
pub mod model;
pub mod notify;
pub mod observability;
pub mod otp;
pub mod rate_limit;
pub mod reaper;
pub mod store;
pub mod workflow;
