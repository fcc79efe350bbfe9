//! Client session store: signed-in user, tokens and UI theme.
//!
//! Only the tokens and the theme survive a restart (`session.json` next to the
//! config file). The user is rebuilt from `/auth/me` when the session is
//! restored.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Result, TmsError};
use crate::types::User;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => f.write_str("light"),
            Theme::Dark => f.write_str("dark"),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedSession {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    theme: Theme,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    user: Option<User>,
    tokens: Option<TokenPair>,
    theme: Theme,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// Load the persisted session from the default location. A missing or
    /// unreadable file yields an empty, signed-out session.
    pub fn load() -> Self {
        match Self::session_path() {
            Ok(path) => Self::load_from(path),
            Err(_) => Self::default(),
        }
    }

    pub fn load_from(path: PathBuf) -> Self {
        let persisted: PersistedSession = std::fs::read_to_string(&path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();

        let tokens = persisted.access_token.map(|access_token| TokenPair {
            access_token,
            refresh_token: persisted.refresh_token,
        });

        Self {
            user: None,
            tokens,
            theme: persisted.theme,
            path: Some(path),
        }
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let persisted = PersistedSession {
            access_token: self.tokens.as_ref().map(|t| t.access_token.clone()),
            refresh_token: self.tokens.as_ref().and_then(|t| t.refresh_token.clone()),
            theme: self.theme,
        };
        let contents = serde_json::to_string_pretty(&persisted)?;

        write_file(path, &contents).map_err(|e| TmsError::SessionWrite {
            path: path.clone(),
            source: e,
        })
    }

    fn session_path() -> Result<PathBuf> {
        Config::config_path().map(|p| p.with_file_name("session.json"))
    }

    pub fn set_credentials(&mut self, user: User, tokens: TokenPair) {
        self.user = Some(user);
        self.tokens = Some(tokens);
    }

    pub fn set_user(&mut self, user: User) {
        self.user = Some(user);
    }

    pub fn set_tokens(&mut self, tokens: TokenPair) {
        self.tokens = Some(tokens);
    }

    /// Drop the user and every token. The theme is a device preference and stays.
    pub fn logout(&mut self) {
        self.user = None;
        self.tokens = None;
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.theme
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        self.tokens.as_ref()
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }
}

fn write_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn user() -> User {
        User {
            id: "u-1".into(),
            name: "Ann Lee".into(),
            email: "ann@example.com".into(),
            role: Role::Agent,
        }
    }

    fn tokens() -> TokenPair {
        TokenPair {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
        }
    }

    #[test]
    fn test_persists_tokens_and_theme_but_not_user() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut store = SessionStore::load_from(path.clone());
        store.set_credentials(user(), tokens());
        store.toggle_theme();
        store.save().unwrap();

        let restored = SessionStore::load_from(path);
        assert!(restored.is_authenticated());
        assert_eq!(restored.tokens(), Some(&tokens()));
        assert_eq!(restored.theme(), Theme::Dark);
        assert!(restored.user().is_none());
    }

    #[test]
    fn test_logout_clears_tokens_and_keeps_theme() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut store = SessionStore::load_from(path.clone());
        store.set_credentials(user(), tokens());
        store.toggle_theme();
        store.logout();
        store.save().unwrap();

        assert!(!store.is_authenticated());
        assert!(store.user().is_none());

        let restored = SessionStore::load_from(path);
        assert!(!restored.is_authenticated());
        assert_eq!(restored.theme(), Theme::Dark);
    }

    #[test]
    fn test_corrupt_file_yields_signed_out_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = SessionStore::load_from(path);
        assert!(!store.is_authenticated());
        assert_eq!(store.theme(), Theme::Light);
    }
}
