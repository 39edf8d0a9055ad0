use tracing::info;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The user asked to log out.
    Logout,
    /// No qualifying activity within the inactivity timeout.
    Inactivity,
    /// The access token was rejected and no refresh token was stored.
    RefreshMissing,
    /// The refresh endpoint rejected the refresh token or was unreachable.
    RefreshFailed,
}

impl EndReason {
    /// Notice shown to the user, if this ending warrants one.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            EndReason::Logout => None,
            EndReason::Inactivity => Some("Tu sesión ha expirado por inactividad."),
            EndReason::RefreshMissing | EndReason::RefreshFailed => {
                Some("Tu sesión ha expirado. Por favor, inicia sesión nuevamente.")
            }
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndReason::Logout => "logout",
            EndReason::Inactivity => "inactivity",
            EndReason::RefreshMissing => "refresh token missing",
            EndReason::RefreshFailed => "refresh failed",
        };
        f.write_str(s)
    }
}

/// Side effects of a session ending: the user-visible notice and the
/// navigation back to the entry route.
///
/// Called at most once per ended session.
pub trait SessionHooks: Send + Sync {
    fn notify(&self, reason: EndReason, message: &str);
    fn redirect(&self, route: &str);
}

/// Hooks that only log. Used when nothing is listening.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl SessionHooks for LoggingHooks {
    fn notify(&self, reason: EndReason, message: &str) {
        info!(%reason, message, "Session ended");
    }

    fn redirect(&self, route: &str) {
        info!(route, "Redirecting to entry route");
    }
}
