//! Core library for the Univida portal client.
//!
//! Owns the client side of the authentication lifecycle:
//! - `auth`: session state, identity decoding, route guard, inactivity
//!   watchdog and the single-flight token refresh
//! - `api`: the HTTP client that attaches bearer tokens and recovers from
//!   expired access tokens

pub mod api;
pub mod auth;

pub use api::{ApiClient, ApiError, Endpoints};
pub use auth::{
    ActivityEvent, ActivityListener, EndReason, GuardDecision, Identity, InactivityWatchdog,
    RouteGuard, Role, SessionHooks, SessionManager, WatchdogHandle,
};
