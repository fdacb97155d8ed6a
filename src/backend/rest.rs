use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::query::{FetchOptions, Filter};

use super::{
    AuthResponse, AuthStateChange, Backend, Credentials, Session, User, AUTH_EVENT_CAPACITY,
};

/// Ask the service to echo affected rows on writes.
const RETURN_REPRESENTATION: &str = "return=representation";

/// Client for the hosted database-and-auth service.
///
/// Table access goes through `/rest/v1/<table>` and authentication through
/// `/auth/v1/*`. The session is kept in memory only, so every process starts
/// signed out.
pub struct RestBackend {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl RestBackend {
    pub fn new(url: &str, anon_key: &str) -> Result<Self> {
        let base_url = url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Unavailable("backend url is not configured".into()));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("music-board/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport)?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            http,
            base_url,
            anon_key: anon_key.trim().to_string(),
            session: RwLock::new(None),
            events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn store_session(&self, session: Option<Session>) {
        match self.session.write() {
            Ok(mut guard) => *guard = session,
            Err(_) => warn!("session lock poisoned, dropping session update"),
        }
    }

    /// Attach the API key and the session token (or the anon key when
    /// signed out).
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .current_session()
            .map(|session| session.access_token)
            .unwrap_or_else(|| self.anon_key.clone());
        builder.header("apikey", &self.anon_key).bearer_auth(bearer)
    }

    async fn send_rows(&self, table: &str, builder: RequestBuilder) -> Result<Vec<Value>> {
        let response = self.authorized(builder).send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        debug!(table, status = status.as_u16(), "rest response");

        if !status.is_success() {
            return Err(Error::query(table, error_message(status, &body)));
        }
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str(&body).map_err(|err| Error::decode(table, err))? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            row => Ok(vec![row]),
        }
    }

    async fn send_auth(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(Error::auth(error_message(status, &body)));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| Error::decode("auth", err))
    }

    fn announce(&self, change: AuthStateChange) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(change);
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, table: &str, options: &FetchOptions) -> Result<Vec<Value>> {
        let request = self.http.get(self.rest_url(table)).query(&query_pairs(options));
        self.send_rows(table, request).await
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        let request = self
            .http
            .post(self.rest_url(table))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&rows);
        self.send_rows(table, request).await
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        let request = self
            .http
            .patch(self.rest_url(table))
            .query(&filter_pairs(filters))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&patch);
        self.send_rows(table, request).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        let request = self
            .http
            .delete(self.rest_url(table))
            .query(&filter_pairs(filters))
            .header("Prefer", RETURN_REPRESENTATION);
        self.send_rows(table, request).await
    }

    async fn get_user(&self) -> Result<Option<User>> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };

        let request = self
            .http
            .get(self.auth_url("user"))
            .bearer_auth(&session.access_token);
        let body = self.send_auth(request).await?;
        let user = serde_json::from_value(body).map_err(|err| Error::decode("auth", err))?;
        Ok(Some(user))
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<AuthResponse> {
        let request = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(credentials);
        let response = parse_auth_response(self.send_auth(request).await?)?;

        let session = response
            .session
            .clone()
            .ok_or_else(|| Error::auth("sign-in did not return a session"))?;
        self.store_session(Some(session.clone()));
        self.announce(AuthStateChange::signed_in(session));
        Ok(response)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthResponse> {
        let request = self.http.post(self.auth_url("signup")).json(credentials);
        let response = parse_auth_response(self.send_auth(request).await?)?;

        if let Some(session) = response.session.clone() {
            self.store_session(Some(session.clone()));
            self.announce(AuthStateChange::signed_in(session));
        }
        Ok(response)
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(session) = self.current_session() {
            let request = self
                .http
                .post(self.auth_url("logout"))
                .bearer_auth(&session.access_token);
            self.send_auth(request).await?;
        }

        self.store_session(None);
        self.announce(AuthStateChange::signed_out());
        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

fn transport(err: reqwest::Error) -> Error {
    Error::Unavailable(err.to_string())
}

/// Query-string pairs for a read: projection, filters, ordering and limit.
pub(crate) fn query_pairs(options: &FetchOptions) -> Vec<(String, String)> {
    let mut pairs = vec![("select".to_string(), options.projection().replace(' ', ""))];
    pairs.extend(filter_pairs(&options.filters));

    if let Some(order) = &options.order_by {
        let direction = if order.ascending { "asc" } else { "desc" };
        pairs.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = options.limit {
        pairs.push(("limit".to_string(), limit.to_string()));
    }
    pairs
}

/// `column=op.value` pairs, one per filter, in order.
pub(crate) fn filter_pairs(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|filter| {
            (
                filter.column.clone(),
                format!("{}.{}", filter.operator, render_value(&filter.value)),
            )
        })
        .collect()
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render_value).collect();
            format!("({})", rendered.join(","))
        }
        other => other.to_string(),
    }
}

/// Pull the human-readable message out of an error body.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(Value::String(message)) = fields.get(key) {
                if !message.trim().is_empty() {
                    return message.clone();
                }
            }
        }
    }

    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

/// Auth endpoints answer either with a session (token plus user) or, for
/// sign-ups awaiting confirmation, with the bare user.
pub(crate) fn parse_auth_response(body: Value) -> Result<AuthResponse> {
    if body.get("access_token").is_some() {
        let session: Session =
            serde_json::from_value(body).map_err(|err| Error::decode("auth", err))?;
        return Ok(AuthResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        });
    }

    if body.get("id").is_some() {
        let user: User = serde_json::from_value(body).map_err(|err| Error::decode("auth", err))?;
        return Ok(AuthResponse {
            user: Some(user),
            session: None,
        });
    }

    Ok(AuthResponse::default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::query::FilterOp;

    fn pair(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    #[test]
    fn read_query_carries_projection_order_and_limit() {
        let options = FetchOptions::new()
            .select("*, setlist_songs(song_id, position, songs(*))")
            .order_by("created_at", false)
            .limit(20);

        assert_eq!(
            query_pairs(&options),
            vec![
                pair("select", "*,setlist_songs(song_id,position,songs(*))"),
                pair("order", "created_at.desc"),
                pair("limit", "20"),
            ]
        );
    }

    #[test]
    fn filters_render_operator_and_value() {
        let filters = [
            Filter::eq("setlist_id", 4),
            Filter::new("title", FilterOp::Ilike, json!("%love%")),
            Filter::new("id", FilterOp::In, json!([1, 2, 3])),
            Filter::new("genre", FilterOp::Is, Value::Null),
        ];

        assert_eq!(
            filter_pairs(&filters),
            vec![
                pair("setlist_id", "eq.4"),
                pair("title", "ilike.%love%"),
                pair("id", "in.(1,2,3)"),
                pair("genre", "is.null"),
            ]
        );
    }

    #[test]
    fn error_message_prefers_structured_fields() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(
            error_message(status, r#"{"code":"42P01","message":"relation \"x\" does not exist"}"#),
            "relation \"x\" does not exist"
        );
        assert_eq!(
            error_message(status, r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message(status, "gateway exploded"), "gateway exploded");
        assert_eq!(error_message(status, ""), "Bad Request");
    }

    #[test]
    fn auth_response_accepts_session_or_bare_user() {
        let with_session = parse_auth_response(json!({
            "access_token": "abc",
            "refresh_token": "def",
            "user": {"id": "u1", "email": "drummer@band.test"}
        }))
        .unwrap();
        assert_eq!(with_session.session.unwrap().access_token, "abc");
        assert_eq!(with_session.user.unwrap().id, "u1");

        let pending = parse_auth_response(json!({"id": "u2", "email": "bass@band.test"})).unwrap();
        assert!(pending.session.is_none());
        assert_eq!(pending.user.unwrap().email.as_deref(), Some("bass@band.test"));
    }

    #[test]
    fn base_url_is_normalized() {
        let backend = RestBackend::new(" https://project.example.co/ ", "anon").unwrap();
        assert_eq!(backend.base_url(), "https://project.example.co");
        assert_eq!(
            backend.rest_url("songs"),
            "https://project.example.co/rest/v1/songs"
        );
        assert!(RestBackend::new("   ", "anon").is_err());
    }
}
