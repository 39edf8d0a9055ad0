//! REST client for the Univida portal API.
//!
//! `ApiClient` attaches the session's bearer token to every request and
//! recovers from expired access tokens by exchanging the refresh token at
//! the auth server, once, no matter how many requests were rejected.

pub mod client;
pub mod error;

pub use client::{ApiClient, Endpoints};
pub use error::ApiError;
