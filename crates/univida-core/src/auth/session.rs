use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::hooks::{EndReason, LoggingHooks, SessionHooks};
use super::identity::{Identity, Role, FALLBACK_DISPLAY_NAME};
use super::store::SessionStore;

/// Inactivity timeout in minutes.
/// The portal ends a session after 30 minutes without user activity.
pub const SESSION_TIMEOUT_MINUTES: i64 = 30;

/// Public route users are sent to when a session ends or is refused.
pub const ENTRY_ROUTE: &str = "/";

const ACCESS_TOKEN_KEY: &str = "accessToken";
const REFRESH_TOKEN_KEY: &str = "refreshToken";
const LAST_ACTIVITY_KEY: &str = "lastActivity";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionData {
    /// Expired when no activity was ever recorded, or the last one is a full
    /// timeout in the past.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.last_activity {
            Some(last) => now - last >= Duration::minutes(SESSION_TIMEOUT_MINUTES),
            None => true,
        }
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_activity
            .map(|last| last + Duration::minutes(SESSION_TIMEOUT_MINUTES) - now)
    }
}

#[derive(Debug, Default)]
struct SessionState {
    data: SessionData,
    /// Bumped whenever the token pair is replaced or cleared.
    epoch: u64,
}

/// Single owner of the authentication state.
///
/// Share it as `Arc<SessionManager>`; every method takes `&self`. All
/// operations are local and infallible. Persistence failures are logged and
/// the in-memory state stays authoritative.
pub struct SessionManager {
    store: Box<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    hooks: Mutex<Arc<dyn SessionHooks>>,
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Create a manager over `store`, restoring whatever session it holds.
    pub fn new(store: impl SessionStore + 'static) -> Self {
        let data = Self::restore(&store);
        debug!(
            has_access = data.access_token.is_some(),
            has_refresh = data.refresh_token.is_some(),
            "Session restored"
        );

        Self {
            store: Box::new(store),
            clock: Arc::new(SystemClock),
            hooks: Mutex::new(Arc::new(LoggingHooks)),
            state: Mutex::new(SessionState { data, epoch: 0 }),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_hooks(self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.set_hooks(hooks);
        self
    }

    /// Replace the notice/redirect hooks fired by `end_session`.
    pub fn set_hooks(&self, hooks: Arc<dyn SessionHooks>) {
        *self.hooks.lock().unwrap_or_else(PoisonError::into_inner) = hooks;
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Store a fresh access token, and the refresh token when one is given.
    /// Either way the activity timestamp restarts now.
    pub fn set_session(&self, access_token: &str, refresh_token: Option<&str>) {
        let now = self.clock.now();
        let mut state = self.lock_state();

        state.data.access_token = non_empty(access_token);
        if let Some(refresh) = refresh_token {
            state.data.refresh_token = non_empty(refresh);
            state.epoch += 1;
        }
        state.data.last_activity = Some(now);

        self.persist(&state.data);
    }

    /// Store an access token minted by a refresh that began at `epoch`.
    ///
    /// Returns false, leaving the state untouched, when the session was
    /// cleared or replaced while the refresh was in flight.
    pub fn store_refreshed_token(&self, epoch: u64, access_token: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.lock_state();

        if state.epoch != epoch || state.data.refresh_token.is_none() {
            debug!(
                started = epoch,
                current = state.epoch,
                "Discarding refresh result for a session that no longer exists"
            );
            return false;
        }

        state.data.access_token = non_empty(access_token);
        state.data.last_activity = Some(now);
        self.persist(&state.data);
        true
    }

    pub fn epoch(&self) -> u64 {
        self.lock_state().epoch
    }

    /// The refresh token together with the epoch it belongs to, read under
    /// one lock so a refresh can later prove the session is unchanged.
    pub fn refresh_credentials(&self) -> (u64, Option<String>) {
        let state = self.lock_state();
        (state.epoch, state.data.refresh_token.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock_state().data.access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock_state().data.refresh_token.clone()
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.lock_state().data.last_activity
    }

    /// Mark the user as active now.
    pub fn record_activity(&self) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state.data.last_activity = Some(now);
        self.persist_activity(&state.data);
    }

    pub fn is_session_expired(&self) -> bool {
        let now = self.clock.now();
        self.lock_state().data.is_expired_at(now)
    }

    pub fn is_authenticated(&self) -> bool {
        let now = self.clock.now();
        let state = self.lock_state();
        state.data.access_token.is_some() && !state.data.is_expired_at(now)
    }

    /// Remaining time before the inactivity timeout, floored at zero.
    pub fn time_until_expiry(&self) -> Duration {
        let now = self.clock.now();
        self.lock_state()
            .data
            .time_until_expiry(now)
            .map(|d| d.max(Duration::zero()))
            .unwrap_or_else(Duration::zero)
    }

    /// Minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes()
    }

    /// Forget the token pair and the activity timestamp. Idempotent and silent.
    pub fn clear_session(&self) {
        self.take_session();
    }

    /// End the session for `reason`.
    ///
    /// Only the call that actually removes a live session fires the hooks and
    /// returns true. Later or concurrent calls for the same ending find
    /// nothing to end, so the user sees exactly one notice.
    pub fn end_session(&self, reason: EndReason) -> bool {
        let previous = self.take_session();
        self.announce_end(previous, reason)
    }

    /// End the session for `reason` only if it is still the one current at
    /// `epoch`. A session replaced or cleared since then is left alone and
    /// no hooks fire.
    pub fn end_session_at(&self, epoch: u64, reason: EndReason) -> bool {
        let previous = {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                debug!(
                    %reason,
                    started = epoch,
                    current = state.epoch,
                    "Session replaced, not ending it"
                );
                return false;
            }
            self.take_locked(&mut state)
        };
        self.announce_end(previous, reason)
    }

    /// Send a visitor without an access token back to the entry route,
    /// dropping any leftover refresh token. No notice is shown.
    pub fn turn_away(&self) {
        let previous = self.take_session();
        if previous.refresh_token.is_some() {
            debug!("Dropping refresh token left without an access token");
        }
        self.hooks().redirect(ENTRY_ROUTE);
    }

    fn announce_end(&self, previous: SessionData, reason: EndReason) -> bool {
        if previous.access_token.is_none() {
            debug!(%reason, "Session already ended");
            return false;
        }

        info!(%reason, "Session ended");
        let hooks = self.hooks();
        if let Some(message) = reason.notice() {
            hooks.notify(reason, message);
        }
        hooks.redirect(ENTRY_ROUTE);
        true
    }

    fn hooks(&self) -> Arc<dyn SessionHooks> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Identity claims of the current access token, if it decodes.
    pub fn decode_identity(&self) -> Option<Identity> {
        let Some(token) = self.access_token() else {
            debug!("No access token to decode");
            return None;
        };

        match Identity::from_token(&token) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "Failed to decode access token");
                None
            }
        }
    }

    pub fn display_name(&self) -> String {
        self.decode_identity()
            .map(|identity| identity.display_name())
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string())
    }

    pub fn username(&self) -> String {
        self.decode_identity()
            .map(|identity| identity.username)
            .filter(|username| !username.is_empty())
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string())
    }

    pub fn role(&self) -> Option<Role> {
        self.decode_identity().map(|identity| identity.role)
    }

    fn take_session(&self) -> SessionData {
        let mut state = self.lock_state();
        self.take_locked(&mut state)
    }

    fn take_locked(&self, state: &mut SessionState) -> SessionData {
        let previous = std::mem::take(&mut state.data);
        state.epoch += 1;
        self.persist(&state.data);
        previous
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn restore(store: &dyn SessionStore) -> SessionData {
        let read = |key: &str| match store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read session value");
                None
            }
        };

        let last_activity = read(LAST_ACTIVITY_KEY).and_then(|millis| {
            let parsed = millis
                .parse::<i64>()
                .ok()
                .and_then(DateTime::<Utc>::from_timestamp_millis);
            if parsed.is_none() {
                warn!(value = %millis, "Ignoring unparseable last activity timestamp");
            }
            parsed
        });

        SessionData {
            access_token: read(ACCESS_TOKEN_KEY),
            refresh_token: read(REFRESH_TOKEN_KEY),
            last_activity,
        }
    }

    fn persist(&self, data: &SessionData) {
        let last_activity = data.last_activity.map(|t| t.timestamp_millis().to_string());
        let entries = [
            (ACCESS_TOKEN_KEY, data.access_token.as_deref()),
            (REFRESH_TOKEN_KEY, data.refresh_token.as_deref()),
            (LAST_ACTIVITY_KEY, last_activity.as_deref()),
        ];

        for (key, value) in entries {
            let result = match value {
                Some(value) => self.store.set(key, value),
                None => self.store.remove(key),
            };
            if let Err(e) = result {
                warn!(key, error = %e, "Failed to persist session value");
            }
        }
    }

    fn persist_activity(&self, data: &SessionData) {
        let result = match data.last_activity {
            Some(last) => self
                .store
                .set(LAST_ACTIVITY_KEY, &last.timestamp_millis().to_string()),
            None => self.store.remove(LAST_ACTIVITY_KEY),
        };
        if let Err(e) = result {
            warn!(key = LAST_ACTIVITY_KEY, error = %e, "Failed to persist session value");
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("SessionManager")
            .field("has_access_token", &state.data.access_token.is_some())
            .field("has_refresh_token", &state.data.refresh_token.is_some())
            .field("last_activity", &state.data.last_activity)
            .field("epoch", &state.epoch)
            .finish()
    }
}

fn non_empty(token: &str) -> Option<String> {
    (!token.is_empty()).then(|| token.to_string())
}
