pub mod config;
pub mod daemon;
pub mod error;
pub mod humanize;
pub mod ledger;
pub mod mirror;
pub mod night;
pub mod nightlog;
pub mod observability;
pub mod pipeline;
pub mod schedule;
pub mod server;
pub mod tools;
