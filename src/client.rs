use std::sync::{Mutex, RwLock};

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Result, TmsError};
use crate::responses::{ApiEnvelope, AuthPayload};
use crate::session::TokenPair;

/// A file staged for a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// REST transport for the ticketing API.
///
/// Holds its own copy of the credentials. A 401 triggers one refresh and one
/// retry; tokens obtained that way are kept until the caller collects them
/// with [`TmsClient::take_refreshed_tokens`].
pub struct TmsClient {
    http: Client,
    base_url: String,
    tokens: RwLock<Option<TokenPair>>,
    refreshed: Mutex<Option<TokenPair>>,
}

impl TmsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens: RwLock::new(None),
            refreshed: Mutex::new(None),
        }
    }

    /// Replace the credentials. Any pair a refresh left for
    /// [`TmsClient::take_refreshed_tokens`] is dropped with the old ones.
    pub fn set_tokens(&self, tokens: Option<TokenPair>) {
        *self.tokens.write().unwrap_or_else(|e| e.into_inner()) = tokens;
        self.refreshed.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    /// Tokens issued by a transparent refresh since the last call, if any.
    pub fn take_refreshed_tokens(&self) -> Option<TokenPair> {
        self.refreshed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authenticated request returning the envelope's `data`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T> {
        self.request_with_query(method, path, &[], body).await
    }

    pub async fn request_with_query<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T> {
        let response = self
            .send_authenticated(|| {
                let mut builder = self.http.request(method.clone(), self.url(path)).query(query);
                if let Some(body) = &body {
                    builder = builder.json(body);
                }
                builder
            })
            .await?;

        decode(path, response).await
    }

    /// Authenticated request whose response carries no payload worth reading.
    pub async fn execute(&self, method: Method, path: &str, body: Option<Value>) -> Result<()> {
        let response = self
            .send_authenticated(|| {
                let mut builder = self.http.request(method.clone(), self.url(path));
                if let Some(body) = &body {
                    builder = builder.json(body);
                }
                builder
            })
            .await?;

        ensure_success(path, response).await.map(|_| ())
    }

    /// Request for the login/register/refresh endpoints. Never carries a token.
    pub async fn request_public<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Value,
    ) -> Result<T> {
        let response = self
            .http
            .request(method, self.url(path))
            .json(&body)
            .send()
            .await?;

        decode(path, response).await
    }

    /// Fetch a binary body (exports).
    pub async fn download(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        let response = self
            .send_authenticated(|| self.http.get(self.url(path)).query(query))
            .await?;

        let response = ensure_success(path, response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Upload files in a single multipart request under the `files` field.
    pub async fn upload_files<T: DeserializeOwned>(
        &self,
        path: &str,
        files: &[UploadFile],
    ) -> Result<T> {
        let response = self
            .send_authenticated(|| {
                let mut form = Form::new();
                for file in files {
                    let part = Part::bytes(file.data.clone()).file_name(file.file_name.clone());
                    let part = match part.mime_str(&file.content_type) {
                        Ok(part) => part,
                        Err(_) => Part::bytes(file.data.clone()).file_name(file.file_name.clone()),
                    };
                    form = form.part("files", part);
                }
                self.http.post(self.url(path)).multipart(form)
            })
            .await?;

        decode(path, response).await
    }

    async fn send_authenticated<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let response = self.with_auth(build()).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("access token rejected, attempting refresh");
        self.refresh().await?;

        Ok(self.with_auth(build()).send().await?)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.access_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn refresh(&self) -> Result<()> {
        let refresh_token = self
            .tokens
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .ok_or(TmsError::Unauthorized)?;

        let payload: AuthPayload = match self
            .request_public(
                Method::POST,
                "/auth/refresh",
                json!({ "refresh_token": refresh_token }),
            )
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                return Err(TmsError::Unauthorized);
            }
        };

        let tokens = TokenPair {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token.or(Some(refresh_token)),
        };
        *self.tokens.write().unwrap_or_else(|e| e.into_inner()) = Some(tokens.clone());
        *self.refreshed.lock().unwrap_or_else(|e| e.into_inner()) = Some(tokens);
        Ok(())
    }
}

async fn ensure_success(path: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read response body>".to_string());
    Err(classify(path, status, &body))
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T> {
    let response = ensure_success(path, response).await?;
    let envelope: ApiEnvelope<T> = response.json().await?;
    envelope.data.ok_or(TmsError::EmptyResponse)
}

/// Map a failed HTTP status to the client error taxonomy.
pub fn classify(path: &str, status: StatusCode, body: &str) -> TmsError {
    let envelope: Option<ApiEnvelope<Value>> = serde_json::from_str(body).ok();
    let message = envelope
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body.trim().to_string());
    let code = status.as_u16();

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => TmsError::Validation {
            message,
            fields: envelope.map(|e| e.errors).unwrap_or_default(),
        },
        StatusCode::UNAUTHORIZED => TmsError::Unauthorized,
        StatusCode::NOT_FOUND => TmsError::NotFound(if message.is_empty() {
            path.to_string()
        } else {
            message
        }),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => TmsError::Conflict(message),
        s if s.is_server_error() => TmsError::Server {
            status: code,
            message,
        },
        _ => TmsError::Api {
            status: code,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldError;
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    struct Pong {
        ok: bool,
    }

    fn client_for(server: &mockito::ServerGuard, access: &str, refresh: Option<&str>) -> TmsClient {
        let client = TmsClient::new(server.url());
        client.set_tokens(Some(TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.map(String::from),
        }));
        client
    }

    #[tokio::test]
    async fn test_attaches_bearer_token_and_unwraps_data() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .match_header("authorization", "Bearer access-1")
            .with_status(200)
            .with_body(r#"{"success":true,"data":{"ok":true}}"#)
            .create_async()
            .await;

        let client = client_for(&server, "access-1", None);
        let pong: Pong = client.request(Method::GET, "/ping", None).await.unwrap();

        assert!(pong.ok);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refreshes_once_and_retries_on_401() {
        let mut server = mockito::Server::new_async().await;
        let stale = server
            .mock("GET", "/ping")
            .match_header("authorization", "Bearer old")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .match_body(mockito::Matcher::Json(json!({ "refresh_token": "r-1" })))
            .with_status(200)
            .with_body(r#"{"success":true,"data":{"accessToken":"new","refreshToken":"r-2"}}"#)
            .expect(1)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/ping")
            .match_header("authorization", "Bearer new")
            .with_status(200)
            .with_body(r#"{"data":{"ok":true}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server, "old", Some("r-1"));
        let pong: Pong = client.request(Method::GET, "/ping", None).await.unwrap();

        assert!(pong.ok);
        stale.assert_async().await;
        refresh.assert_async().await;
        fresh.assert_async().await;
        assert_eq!(
            client.take_refreshed_tokens(),
            Some(TokenPair {
                access_token: "new".into(),
                refresh_token: Some("r-2".into()),
            })
        );
        assert!(client.take_refreshed_tokens().is_none());
    }

    #[tokio::test]
    async fn test_clearing_tokens_discards_pending_refresh() {
        let mut server = mockito::Server::new_async().await;
        let _stale = server
            .mock("GET", "/ping")
            .match_header("authorization", "Bearer old")
            .with_status(401)
            .create_async()
            .await;
        let _refresh = server
            .mock("POST", "/auth/refresh")
            .with_body(r#"{"success":true,"data":{"accessToken":"new","refreshToken":"r-2"}}"#)
            .create_async()
            .await;
        let _fresh = server
            .mock("GET", "/ping")
            .match_header("authorization", "Bearer new")
            .with_body(r#"{"data":{"ok":true}}"#)
            .create_async()
            .await;

        let client = client_for(&server, "old", Some("r-1"));
        let _: Pong = client.request(Method::GET, "/ping", None).await.unwrap();

        client.set_tokens(None);
        assert!(client.take_refreshed_tokens().is_none());
        assert!(client.access_token().is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .create_async()
            .await;

        let client = client_for(&server, "old", Some("r-1"));
        let err = client
            .request::<Pong>(Method::GET, "/ping", None)
            .await
            .unwrap_err();

        assert!(matches!(err, TmsError::Unauthorized));
        assert!(client.take_refreshed_tokens().is_none());
    }

    #[tokio::test]
    async fn test_public_request_sends_no_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/login")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"data":{"accessToken":"a","refreshToken":"r"}}"#)
            .create_async()
            .await;

        let client = client_for(&server, "should-not-leak", None);
        let payload: AuthPayload = client
            .request_public(Method::POST, "/auth/login", json!({ "email": "a@b.c" }))
            .await
            .unwrap();

        assert_eq!(payload.access_token, "a");
        mock.assert_async().await;
    }

    #[test]
    fn test_classify_validation_with_fields() {
        let body = r#"{"success":false,"message":"Invalid input","errors":[{"field":"title","message":"Too short"}]}"#;
        match classify("/tickets", StatusCode::UNPROCESSABLE_ENTITY, body) {
            TmsError::Validation { message, fields } => {
                assert_eq!(message, "Invalid input");
                assert_eq!(fields, vec![FieldError::new("title", "Too short")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(
            classify("/tickets/9", StatusCode::NOT_FOUND, ""),
            TmsError::NotFound(ref p) if p == "/tickets/9"
        ));
        assert!(matches!(
            classify("/x", StatusCode::BAD_GATEWAY, "oops"),
            TmsError::Server { status: 502, .. }
        ));
        assert!(matches!(
            classify("/x", StatusCode::CONFLICT, "{}"),
            TmsError::Conflict(_)
        ));
        assert!(matches!(
            classify("/x", StatusCode::FORBIDDEN, r#"{"message":"Forbidden"}"#),
            TmsError::Api { status: 403, ref message } if message == "Forbidden"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let client = TmsClient::new("http://127.0.0.1:1");
        let err = client
            .request::<Pong>(Method::GET, "/ping", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TmsError::Network(_)));
    }
}
