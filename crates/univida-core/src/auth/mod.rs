//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionManager`: token pair, last-activity tracking and the 30 minute
//!   inactivity rule
//! - `SessionStore`: key-value persistence for the session (memory or file)
//! - `Identity`: claims decoded from the access token
//! - `RouteGuard`: role-scoped access checks before rendering a page
//! - `InactivityWatchdog`: periodic expiry check plus activity listener
//! - `RefreshCoordinator`: single-flight exchange of the refresh token
//!
//! Every session-ending path goes through `SessionManager::end_session`, so
//! the user sees one notice per ending no matter which path detected it.

pub mod clock;
pub mod guard;
pub mod hooks;
pub mod identity;
pub mod refresh;
pub mod session;
pub mod store;
pub mod watchdog;

pub use clock::{Clock, ManualClock, SystemClock};
pub use guard::{GuardDecision, GuardState, Navigation, RouteGuard};
pub use hooks::{EndReason, LoggingHooks, SessionHooks};
pub use identity::{decode_claims, Identity, Role};
pub use refresh::{RefreshCoordinator, RefreshError};
pub use session::{SessionManager, ENTRY_ROUTE, SESSION_TIMEOUT_MINUTES};
pub use store::{FileStore, MemoryStore, SessionStore, StoreError};
pub use watchdog::{ActivityEvent, ActivityListener, InactivityWatchdog, WatchdogHandle};
