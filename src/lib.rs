// actions-status library.
// Polls GitHub Actions runs per configured target and publishes an aggregated snapshot.

pub mod actions;
pub mod aggregator;
pub mod auth;
pub mod config;
pub mod error;
pub mod github;
pub mod indicator;
pub mod menu;
pub mod model;
pub mod paths;
pub mod poller;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod target;

pub use error::{Result, StatusError};
