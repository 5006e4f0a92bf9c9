//! Subscription topics and the credentials that gate them.
//!
//! A topic is `owner-<id>:<kind>`. Streaming clients never name a topic
//! directly: the owner comes from a signed credential and the kind from the
//! `stream` query parameter.

use axum::extract::Query;
use axum::http::{HeaderMap, Uri, header};
use axum_extra::extract::CookieJar;
use healthcheck::OwnerId;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Topic resolution errors.
///
/// Every variant maps to a 401 at the HTTP boundary; the detail is only
/// logged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("missing credential")]
    MissingCredential,

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("invalid owner identity {0}")]
    InvalidOwner(i64),

    #[error("invalid stream kind '{0}'")]
    InvalidStreamKind(String),
}

/// Kind of snapshot carried by a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Host health statuses
    Servers,
    /// Windows service run states
    Services,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Servers => "servers",
            StreamKind::Services => "services",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "servers" => Ok(StreamKind::Servers),
            "services" => Ok(StreamKind::Services),
            other => Err(TopicError::InvalidStreamKind(other.to_string())),
        }
    }
}

/// Topic of `owner`'s `kind` stream
pub fn topic_for(owner: OwnerId, kind: StreamKind) -> String {
    format!("owner-{}:{}", owner, kind)
}

/// Claims carried by a stream credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    /// Expiry, seconds since the Unix epoch
    pub exp: u64,
}

/// Decode an HS256 token and check its signature and expiry
pub fn validate_and_extract_claims(token: &str, secret: &str) -> Result<Claims, TopicError> {
    let validation = Validation::new(Algorithm::HS256);
    let key = DecodingKey::from_secret(secret.as_bytes());

    jsonwebtoken::decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| TopicError::InvalidCredential(e.to_string()))
}

/// Sign a token for `user_id` valid for `ttl_secs`
pub fn issue_token(
    user_id: i64,
    username: &str,
    ttl_secs: u64,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        user_id,
        username: username.to_string(),
        exp: jsonwebtoken::get_current_timestamp() + ttl_secs,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Derives the topic of an inbound streaming request
pub trait TopicResolver: Send + Sync + 'static {
    /// Resolve a topic. On error the request must not be subscribed.
    fn resolve(&self, headers: &HeaderMap, uri: &Uri) -> Result<String, TopicError>;
}

impl<F> TopicResolver for F
where
    F: Fn(&HeaderMap, &Uri) -> Result<String, TopicError> + Send + Sync + 'static,
{
    fn resolve(&self, headers: &HeaderMap, uri: &Uri) -> Result<String, TopicError> {
        self(headers, uri)
    }
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    stream: Option<String>,
}

/// Resolves topics from a JWT read from a cookie or a bearer header
#[derive(Clone)]
pub struct JwtTopicResolver {
    secret: String,
    cookie_name: String,
}

impl JwtTopicResolver {
    pub fn new(secret: impl Into<String>, cookie_name: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            cookie_name: cookie_name.into(),
        }
    }

    /// Extract and validate the caller's claims.
    ///
    /// The cookie wins over the `Authorization` header. The owner identity
    /// must be positive.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, TopicError> {
        let token = self
            .credential(headers)
            .ok_or(TopicError::MissingCredential)?;

        let claims = validate_and_extract_claims(&token, &self.secret)?;
        if claims.user_id <= 0 {
            return Err(TopicError::InvalidOwner(claims.user_id));
        }

        Ok(claims)
    }

    fn credential(&self, headers: &HeaderMap) -> Option<String> {
        let jar = CookieJar::from_headers(headers);
        if let Some(cookie) = jar.get(&self.cookie_name) {
            if !cookie.value().is_empty() {
                return Some(cookie.value().to_string());
            }
        }

        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

impl TopicResolver for JwtTopicResolver {
    fn resolve(&self, headers: &HeaderMap, uri: &Uri) -> Result<String, TopicError> {
        let claims = self.authenticate(headers)?;

        let requested = Query::<StreamQuery>::try_from_uri(uri)
            .ok()
            .and_then(|Query(q)| q.stream)
            .unwrap_or_default();
        let kind: StreamKind = requested.parse()?;

        let topic = topic_for(claims.user_id, kind);
        debug!(user_id = claims.user_id, username = %claims.username, %topic, "Topic resolved");
        Ok(topic)
    }
}
