use tracing::debug;

use super::identity::{Identity, Role};
use super::session::{SessionManager, ENTRY_ROUTE};

/// Outcome of guarding a protected page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Render the page for this user.
    Render(Identity),
    /// Do not render; navigate here instead.
    Redirect(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Unchecked,
    Authorized,
    Denied,
}

/// Gate in front of a role-scoped page subtree.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    /// `None` admits any authenticated user.
    allowed_roles: Option<Vec<Role>>,
}

impl RouteGuard {
    pub fn new(allowed_roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            allowed_roles: Some(allowed_roles.into_iter().collect()),
        }
    }

    pub fn any_role() -> Self {
        Self {
            allowed_roles: None,
        }
    }

    pub fn permits(&self, role: Role) -> bool {
        self.allowed_roles
            .as_ref()
            .map_or(true, |roles| roles.contains(&role))
    }

    /// Decide whether the protected page may render.
    ///
    /// A refusal clears whatever partial session is left before redirecting.
    pub fn check(&self, session: &SessionManager) -> GuardDecision {
        let mut navigation = Navigation::new(self);
        navigation.resolve(session)
    }
}

/// One navigation attempt through a guard.
///
/// Starts `Unchecked` and settles on `Authorized` or `Denied` exactly once;
/// further `resolve` calls replay the settled decision.
#[derive(Debug)]
pub struct Navigation<'a> {
    guard: &'a RouteGuard,
    state: GuardState,
    decision: Option<GuardDecision>,
}

impl<'a> Navigation<'a> {
    pub fn new(guard: &'a RouteGuard) -> Self {
        Self {
            guard,
            state: GuardState::Unchecked,
            decision: None,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn resolve(&mut self, session: &SessionManager) -> GuardDecision {
        if let Some(decision) = &self.decision {
            return decision.clone();
        }

        let decision = match self.authorize(session) {
            Some(identity) => {
                self.state = GuardState::Authorized;
                GuardDecision::Render(identity)
            }
            None => {
                session.clear_session();
                self.state = GuardState::Denied;
                GuardDecision::Redirect(ENTRY_ROUTE)
            }
        };
        self.decision = Some(decision.clone());
        decision
    }

    fn authorize(&self, session: &SessionManager) -> Option<Identity> {
        if !session.is_authenticated() {
            debug!("Guard refused: not authenticated");
            return None;
        }

        let identity = session.decode_identity()?;
        if !self.guard.permits(identity.role) {
            debug!(role = %identity.role, "Guard refused: role not permitted");
            return None;
        }
        Some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::token_with_claims;
    use crate::auth::session::tests::manager_with_clock;
    use chrono::Duration;
    use serde_json::json;

    fn token_for(role: &str) -> String {
        token_with_claims(&json!({"username": "ana", "rol": role}))
    }

    #[test]
    fn test_admin_page_refuses_client() {
        let (session, _) = manager_with_clock();
        session.set_session(&token_for("CLIENTE"), Some("refresh"));
        let guard = RouteGuard::new([Role::Admin]);

        assert_eq!(guard.check(&session), GuardDecision::Redirect(ENTRY_ROUTE));
        assert!(session.access_token().is_none());
    }

    #[test]
    fn test_matching_role_renders() {
        let (session, _) = manager_with_clock();
        session.set_session(&token_for("ADMIN"), Some("refresh"));
        let guard = RouteGuard::new([Role::Admin]);

        let mut navigation = Navigation::new(&guard);
        assert_eq!(navigation.state(), GuardState::Unchecked);

        match navigation.resolve(&session) {
            GuardDecision::Render(identity) => assert_eq!(identity.role, Role::Admin),
            other => panic!("expected render, got {other:?}"),
        }
        assert_eq!(navigation.state(), GuardState::Authorized);
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_expired_session_is_denied_and_cleared() {
        let (session, clock) = manager_with_clock();
        session.set_session(&token_for("AGENTE"), Some("refresh"));
        clock.advance(Duration::minutes(31));

        let guard = RouteGuard::any_role();
        let mut navigation = Navigation::new(&guard);
        assert_eq!(navigation.resolve(&session), GuardDecision::Redirect(ENTRY_ROUTE));
        assert_eq!(navigation.state(), GuardState::Denied);
        assert!(session.refresh_token().is_none());
    }

    #[test]
    fn test_undecodable_token_is_denied() {
        let (session, _) = manager_with_clock();
        session.set_session("garbage", None);

        assert_eq!(
            RouteGuard::any_role().check(&session),
            GuardDecision::Redirect(ENTRY_ROUTE)
        );
    }

    #[test]
    fn test_denied_is_terminal_for_the_navigation() {
        let (session, _) = manager_with_clock();
        let guard = RouteGuard::new([Role::Cliente]);
        let mut navigation = Navigation::new(&guard);

        assert_eq!(navigation.resolve(&session), GuardDecision::Redirect(ENTRY_ROUTE));

        // Logging in afterwards does not flip this attempt
        session.set_session(&token_for("CLIENTE"), Some("refresh"));
        assert_eq!(navigation.resolve(&session), GuardDecision::Redirect(ENTRY_ROUTE));
        assert_eq!(navigation.state(), GuardState::Denied);

        // A new navigation sees the new session
        assert!(matches!(guard.check(&session), GuardDecision::Render(_)));
    }

    #[test]
    fn test_multi_role_guard() {
        let guard = RouteGuard::new([Role::Admin, Role::Agente]);
        assert!(guard.permits(Role::Admin));
        assert!(guard.permits(Role::Agente));
        assert!(!guard.permits(Role::Cliente));
        assert!(RouteGuard::any_role().permits(Role::Cliente));
    }
}
