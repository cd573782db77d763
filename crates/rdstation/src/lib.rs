//! RD Station Marketing API client: OAuth refresh-token credentials, a retrying
//! request loop and the contact operations the event router needs.

pub mod client;
pub mod error;
pub mod retry;
pub mod token;

pub use client::{RdStationClient, RdStationSettings};
pub use error::RdError;
pub use retry::RetryPolicy;
pub use token::TokenManager;
