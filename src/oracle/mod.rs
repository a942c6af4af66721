pub mod client;
pub mod error;
pub mod gateway;
pub mod pacing;
pub mod types;

#[cfg(test)]
pub(crate) mod scripted;

pub use client::{ChatClient, Oracle};
pub use error::OracleError;
pub use gateway::OracleClient;
pub use pacing::{RateLimiter, RetryPolicy};
pub use types::{OracleRequest, ResponseFormat};
