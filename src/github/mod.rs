// GitHub API module.
// Client, rate-limit gate and types for the GitHub REST API.

pub mod api;
pub mod client;
pub mod endpoints;
pub mod rate_limit;
pub mod types;

pub use api::ActionsApi;
pub use client::{ClientOptions, GitHubClient};
pub use rate_limit::{RateLimit, RateLimitGate};
