//! Application context: everything a command needs, built once in `main`.

use reqwest::Method;
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::client::TmsClient;
use crate::config::Config;
use crate::error::{Result, TmsError};
use crate::realtime::{ConnectOutcome, RealtimeClient};
use crate::responses::{AuthPayload, MeResponse};
use crate::routes::{self, Access, Route};
use crate::session::{SessionStore, Theme, TokenPair};
use crate::sync::LiveSync;
use crate::types::User;
use crate::validation::{LoginForm, RegisterForm};

pub struct AppContext {
    pub config: Config,
    pub client: TmsClient,
    pub cache: QueryCache,
    pub realtime: RealtimeClient,
    session: SessionStore,
}

impl AppContext {
    pub fn new(config: Config, session: SessionStore) -> Self {
        let client = TmsClient::new(config.api_url());
        client.set_tokens(session.tokens().cloned());
        let realtime = RealtimeClient::new(&config.socket_url(), config.realtime.clone());

        Self {
            config,
            client,
            cache: QueryCache::new(),
            realtime,
            session,
        }
    }

    pub fn load() -> Result<Self> {
        Ok(Self::new(Config::load()?, SessionStore::load()))
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn user(&self) -> Option<&User> {
        self.session.user()
    }

    /// Rebuild the signed-in user from the persisted tokens.
    ///
    /// Any failure of `/auth/me` signs the session out.
    pub async fn restore(&mut self) -> Result<User> {
        if !self.session.is_authenticated() {
            return Err(TmsError::Unauthorized);
        }

        match self.client.request::<MeResponse>(Method::GET, "/auth/me", None).await {
            Ok(me) => {
                self.session.set_user(me.user.clone());
                self.persist_refreshed_tokens()?;
                debug!(user = %me.user.email, "session restored");
                Ok(me.user)
            }
            Err(e) => {
                warn!(error = %e, "session restore failed, signing out");
                self.force_logout();
                Err(e)
            }
        }
    }

    /// Restore the session and check `route` against the user's role.
    pub async fn enter(&mut self, route: Route) -> Result<User> {
        let user = self.restore().await?;
        match routes::guard(&self.session, route) {
            Access::Granted => Ok(user),
            Access::Redirect(_) => Err(TmsError::Forbidden(format!(
                "{} is not available to {} users",
                route, user.role
            ))),
        }
    }

    pub async fn login(&mut self, form: &LoginForm) -> Result<User> {
        form.validate()?;
        let payload: AuthPayload = self
            .client
            .request_public(Method::POST, "/auth/login", serde_json::to_value(form)?)
            .await?;
        self.accept_auth(payload).await
    }

    pub async fn register(&mut self, form: &RegisterForm) -> Result<User> {
        form.validate()?;
        let payload: AuthPayload = self
            .client
            .request_public(Method::POST, "/auth/register", serde_json::to_value(form)?)
            .await?;
        self.accept_auth(payload).await
    }

    async fn accept_auth(&mut self, payload: AuthPayload) -> Result<User> {
        let tokens = TokenPair {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
        };
        self.client.set_tokens(Some(tokens.clone()));

        let user = match payload.user {
            Some(user) => user,
            None => {
                self.client
                    .request::<MeResponse>(Method::GET, "/auth/me", None)
                    .await?
                    .user
            }
        };

        self.session.set_credentials(user.clone(), tokens);
        self.session.save()?;
        info!(user = %user.email, role = %user.role, "signed in");
        Ok(user)
    }

    /// Write tokens from a transparent refresh back to the session file.
    pub fn persist_refreshed_tokens(&mut self) -> Result<()> {
        if let Some(tokens) = self.client.take_refreshed_tokens() {
            debug!("persisting refreshed tokens");
            self.session.set_tokens(tokens);
            self.session.save()?;
        }
        Ok(())
    }

    /// Open the live-update channel with the current access token.
    pub fn connect_realtime(&self) -> Option<ConnectOutcome> {
        let token = self.client.access_token()?;
        Some(self.realtime.connect(&token))
    }

    /// Open the live-update channel and wire it to the cache.
    pub fn start_live_sync(&self) -> Option<LiveSync> {
        self.connect_realtime()?;
        Some(LiveSync::attach(&self.realtime, &self.cache))
    }

    /// Sign out: close the realtime channel, drop cached data, clear the
    /// session, then tell the server.
    pub async fn logout(&mut self) -> Result<()> {
        let had_token = self.client.access_token().is_some();
        self.teardown();
        self.session.save()?;

        if had_token {
            if let Err(e) = self.client.execute(Method::POST, "/auth/logout", None).await {
                warn!(error = %e, "server logout failed");
            }
        }
        // Also drops tokens a refresh during the call above produced.
        self.client.set_tokens(None);
        info!("signed out");
        Ok(())
    }

    /// Local sign-out after the server rejected our credentials.
    pub fn force_logout(&mut self) {
        self.teardown();
        self.client.set_tokens(None);
        if let Err(e) = self.session.save() {
            warn!(error = %e, "failed to persist signed-out session");
        }
    }

    fn teardown(&mut self) {
        self.realtime.disconnect();
        self.cache.clear();
        self.session.logout();
    }

    pub fn toggle_theme(&mut self) -> Result<Theme> {
        let theme = self.session.toggle_theme();
        self.session.save()?;
        Ok(theme)
    }

    /// Close the live channel and persist anything the transport refreshed.
    pub fn shutdown(&mut self) -> Result<()> {
        self.realtime.disconnect();
        self.persist_refreshed_tokens()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys;
    use crate::realtime::TICKET_CREATED;
    use crate::types::Role;
    use serde_json::json;

    fn context(server_url: &str, dir: &tempfile::TempDir) -> AppContext {
        let config = Config {
            api_url: Some(server_url.to_string()),
            socket_url: Some("ws://127.0.0.1:1".to_string()),
            ..Config::default()
        };
        AppContext::new(config, SessionStore::load_from(dir.path().join("session.json")))
    }

    fn me_body() -> String {
        json!({
            "success": true,
            "data": { "user": { "id": "u-1", "name": "Ann Lee", "email": "ann@example.com", "role": "AGENT" } }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_login_persists_session_and_restore_rebuilds_user() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/auth/login")
            .with_body(
                json!({
                    "success": true,
                    "data": {
                        "user": { "id": "u-1", "name": "Ann Lee", "email": "ann@example.com", "role": "AGENT" },
                        "accessToken": "access-1",
                        "refreshToken": "refresh-1"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _me = server
            .mock("GET", "/auth/me")
            .match_header("authorization", "Bearer access-1")
            .with_body(me_body())
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&server.url(), &dir);
        let user = ctx
            .login(&LoginForm {
                email: "ann@example.com".into(),
                password: "secret1".into(),
            })
            .await
            .unwrap();
        assert_eq!(user.role, Role::Agent);

        let mut fresh = context(&server.url(), &dir);
        assert!(fresh.user().is_none());
        let restored = fresh.restore().await.unwrap();
        assert_eq!(restored, user);
    }

    #[tokio::test]
    async fn test_failed_restore_forces_logout() {
        let mut server = mockito::Server::new_async().await;
        let _me = server
            .mock("GET", "/auth/me")
            .with_status(401)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionStore::load_from(dir.path().join("session.json"));
        session.set_tokens(TokenPair {
            access_token: "expired".into(),
            refresh_token: None,
        });
        session.save().unwrap();

        let mut ctx = context(&server.url(), &dir);
        assert!(matches!(ctx.restore().await, Err(TmsError::Unauthorized)));
        assert!(!ctx.session().is_authenticated());
        assert!(ctx.client.access_token().is_none());
    }

    #[tokio::test]
    async fn test_logout_tears_down_live_updates_before_clearing() {
        let mut server = mockito::Server::new_async().await;
        let logout = server
            .mock("POST", "/auth/logout")
            .match_header("authorization", "Bearer access-1")
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&server.url(), &dir);
        ctx.client.set_tokens(Some(TokenPair {
            access_token: "access-1".into(),
            refresh_token: None,
        }));
        ctx.session.set_tokens(TokenPair {
            access_token: "access-1".into(),
            refresh_token: None,
        });

        let _sync = ctx.start_live_sync();
        ctx.cache.set_data(keys::my_tickets(), &json!([])).unwrap();

        ctx.logout().await.unwrap();
        logout.assert_async().await;

        ctx.realtime.dispatch(TICKET_CREATED, &json!({}));
        assert_eq!(ctx.cache.len(), 0);
        assert_eq!(ctx.realtime.listener_count(TICKET_CREATED), 0);
        assert!(!ctx.session().is_authenticated());
        assert!(ctx.client.access_token().is_none());
    }

    #[tokio::test]
    async fn test_logout_with_expired_token_stays_signed_out() {
        let mut server = mockito::Server::new_async().await;
        let _rejected = server
            .mock("POST", "/auth/logout")
            .match_header("authorization", "Bearer expired")
            .with_status(401)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .with_body(r#"{"success":true,"data":{"accessToken":"fresh","refreshToken":"r-2"}}"#)
            .expect(1)
            .create_async()
            .await;
        let _accepted = server
            .mock("POST", "/auth/logout")
            .match_header("authorization", "Bearer fresh")
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut session = SessionStore::load_from(path.clone());
        session.set_tokens(TokenPair {
            access_token: "expired".into(),
            refresh_token: Some("r-1".into()),
        });
        session.save().unwrap();

        let mut ctx = context(&server.url(), &dir);
        ctx.logout().await.unwrap();
        refresh.assert_async().await;
        ctx.shutdown().unwrap();

        let reloaded = SessionStore::load_from(path);
        assert!(!reloaded.is_authenticated());
        assert!(reloaded.tokens().is_none());
        assert!(ctx.client.access_token().is_none());
    }

    #[tokio::test]
    async fn test_customer_cannot_enter_reports() {
        let mut server = mockito::Server::new_async().await;
        let _me = server
            .mock("GET", "/auth/me")
            .with_body(
                json!({
                    "success": true,
                    "data": { "user": { "id": "u-2", "name": "Cy", "email": "cy@example.com", "role": "CUSTOMER" } }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&server.url(), &dir);
        ctx.session.set_tokens(TokenPair {
            access_token: "access".into(),
            refresh_token: None,
        });
        ctx.client.set_tokens(ctx.session.tokens().cloned());

        assert!(matches!(
            ctx.enter(Route::Reports).await,
            Err(TmsError::Forbidden(_))
        ));
        assert!(ctx.enter(Route::Client).await.is_ok());
    }
}
