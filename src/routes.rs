use std::fmt;

use crate::session::SessionStore;
use crate::types::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Register,
    Dashboard,
    Projects,
    Tickets,
    Board,
    Reports,
    Client,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Register => "/register",
            Route::Dashboard => "/dashboard",
            Route::Projects => "/projects",
            Route::Tickets => "/tickets",
            Route::Board => "/board",
            Route::Reports => "/reports",
            Route::Client => "/client",
        }
    }

    pub fn is_public(self) -> bool {
        matches!(self, Route::Login | Route::Register)
    }

    /// Roles allowed in; an empty list admits any signed-in user.
    pub fn allowed_roles(self) -> &'static [Role] {
        match self {
            Route::Reports => &[Role::Admin, Role::Manager],
            Route::Board => &[Role::Admin, Role::Manager, Role::Agent],
            _ => &[],
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Redirect(Route),
}

/// Decide whether the current session may open `route`.
///
/// Signed-out users go to the login page. Signed-in users lacking a role
/// the route requires go to the dashboard.
pub fn guard(session: &SessionStore, route: Route) -> Access {
    if route.is_public() {
        return Access::Granted;
    }
    if !session.is_authenticated() {
        return Access::Redirect(Route::Login);
    }

    let allowed = route.allowed_roles();
    if allowed.is_empty() {
        return Access::Granted;
    }
    match session.user() {
        Some(user) if allowed.contains(&user.role) => Access::Granted,
        _ => Access::Redirect(Route::Dashboard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TokenPair;
    use crate::types::User;

    fn signed_in(role: Role) -> SessionStore {
        let mut session = SessionStore::default();
        session.set_credentials(
            User {
                id: "u-1".into(),
                name: "Ann Lee".into(),
                email: "ann@example.com".into(),
                role,
            },
            TokenPair {
                access_token: "access".into(),
                refresh_token: None,
            },
        );
        session
    }

    #[test]
    fn test_signed_out_goes_to_login() {
        let session = SessionStore::default();
        assert_eq!(guard(&session, Route::Tickets), Access::Redirect(Route::Login));
        assert_eq!(guard(&session, Route::Register), Access::Granted);
    }

    #[test]
    fn test_customer_is_sent_to_dashboard_from_manager_routes() {
        let session = signed_in(Role::Customer);
        assert_eq!(guard(&session, Route::Reports), Access::Redirect(Route::Dashboard));
        assert_eq!(guard(&session, Route::Board), Access::Redirect(Route::Dashboard));
        assert_eq!(guard(&session, Route::Client), Access::Granted);
    }

    #[test]
    fn test_role_matrix() {
        assert_eq!(guard(&signed_in(Role::Manager), Route::Reports), Access::Granted);
        assert_eq!(guard(&signed_in(Role::Admin), Route::Reports), Access::Granted);
        assert_eq!(
            guard(&signed_in(Role::Agent), Route::Reports),
            Access::Redirect(Route::Dashboard)
        );
        assert_eq!(guard(&signed_in(Role::Agent), Route::Board), Access::Granted);
        assert_eq!(guard(&signed_in(Role::Manager), Route::Tickets), Access::Granted);
    }

    #[test]
    fn test_tokens_without_user_cannot_open_gated_routes() {
        let mut session = SessionStore::default();
        session.set_tokens(TokenPair {
            access_token: "access".into(),
            refresh_token: None,
        });
        assert_eq!(guard(&session, Route::Reports), Access::Redirect(Route::Dashboard));
    }
}
