//! Shared-secret access guard
//!
//! Signers arrive with the same four parameters on every request: email,
//! display name, the shared secret and the document type. They are parsed once
//! into [`AccessParams`] and checked against the server's [`AccessPolicy`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Query},
    http::{header, request::Parts, HeaderMap},
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::models::DocType;
use crate::state::AppState;

pub const HEADER_EMAIL: &str = "x-esign-email";
pub const HEADER_NAME: &str = "x-esign-name";
pub const HEADER_SECRET: &str = "x-esign-secret";
pub const HEADER_DOCTYPE: &str = "x-esign-doctype";

const MIN_SECRET_LEN: usize = 8;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

/// Access parameters as they arrive, before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawAccessParams {
    pub email: String,
    pub name: String,
    pub secret: String,
    pub doc_type: String,
}

impl RawAccessParams {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            email: get(HEADER_EMAIL),
            name: get(HEADER_NAME),
            secret: get(HEADER_SECRET),
            doc_type: get(HEADER_DOCTYPE),
        }
    }
}

/// Validated access parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessParams {
    pub email: String,
    pub name: String,
    pub secret: String,
    pub doc_type: DocType,
}

impl AccessParams {
    pub fn parse(raw: RawAccessParams) -> Result<Self, String> {
        let email = raw.email.trim().to_string();
        if !EMAIL_RE.is_match(&email) {
            return Err("email must be a valid address".to_string());
        }
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        if raw.secret.chars().count() < MIN_SECRET_LEN {
            return Err(format!(
                "secret must be at least {} characters",
                MIN_SECRET_LEN
            ));
        }
        let doc_type = raw.doc_type.parse()?;

        Ok(Self {
            email,
            name,
            secret: raw.secret,
            doc_type,
        })
    }

    pub fn domain(&self) -> Option<String> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_lowercase())
    }
}

/// Why a well-formed request was still refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    BadSecret,
    DomainNotAllowed,
}

/// Server-side access rules
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    secret: String,
    allowed_domains: Vec<String>,
}

impl AccessPolicy {
    pub fn new(secret: impl Into<String>, allowed_domains: Vec<String>) -> Self {
        Self {
            secret: secret.into(),
            allowed_domains: allowed_domains
                .into_iter()
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    pub fn secret_matches(&self, candidate: &str) -> bool {
        !self.secret.is_empty() && bool::from(self.secret.as_bytes().ct_eq(candidate.as_bytes()))
    }

    pub fn domain_allowed(&self, params: &AccessParams) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        params
            .domain()
            .is_some_and(|domain| self.allowed_domains.contains(&domain))
    }

    pub fn check(&self, params: &AccessParams) -> Result<(), AccessDenied> {
        if !self.secret_matches(&params.secret) {
            return Err(AccessDenied::BadSecret);
        }
        if !self.domain_allowed(params) {
            return Err(AccessDenied::DomainNotAllowed);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocTypeQuery {
    doc_type: Option<String>,
}

/// Extractor for requests that passed the access guard
#[derive(Debug, Clone)]
pub struct Authorized(pub AccessParams);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Authorized {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let mut raw = RawAccessParams::from_headers(&parts.headers);
        if raw.doc_type.trim().is_empty() {
            if let Ok(Query(query)) = Query::<DocTypeQuery>::try_from_uri(&parts.uri) {
                raw.doc_type = query.doc_type.unwrap_or_default();
            }
        }

        let params = AccessParams::parse(raw).map_err(ApiError::InvalidRequest)?;
        match state.access.check(&params) {
            Ok(()) => Ok(Authorized(params)),
            Err(AccessDenied::BadSecret) => {
                tracing::warn!(email = %params.email, "Rejected request with invalid secret");
                Err(ApiError::Unauthorized("Invalid secret".to_string()))
            }
            Err(AccessDenied::DomainNotAllowed) => {
                tracing::warn!(email = %params.email, "Rejected request from disallowed domain");
                Err(ApiError::Forbidden("Email domain not allowed".to_string()))
            }
        }
    }
}

/// Request metadata forwarded with workflow events
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty());
        let client_ip = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Ok(Self {
            user_agent,
            client_ip,
        })
    }
}
