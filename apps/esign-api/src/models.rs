//! Data models for the eSign API

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Where a signing session is in the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initialized,
    Opened,
    DocumentUploaded,
    SignatureUploaded,
    Signed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 5] = [
        SessionStatus::Initialized,
        SessionStatus::Opened,
        SessionStatus::DocumentUploaded,
        SessionStatus::SignatureUploaded,
        SessionStatus::Signed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initialized => "initialized",
            SessionStatus::Opened => "opened",
            SessionStatus::DocumentUploaded => "document_uploaded",
            SessionStatus::SignatureUploaded => "signature_uploaded",
            SessionStatus::Signed => "signed",
        }
    }

    /// The next state along the forward chain
    pub fn next(&self) -> Option<SessionStatus> {
        match self {
            SessionStatus::Initialized => Some(SessionStatus::Opened),
            SessionStatus::Opened => Some(SessionStatus::DocumentUploaded),
            SessionStatus::DocumentUploaded => Some(SessionStatus::SignatureUploaded),
            SessionStatus::SignatureUploaded => Some(SessionStatus::Signed),
            SessionStatus::Signed => None,
        }
    }

    /// Transition table: the forward chain, plus re-uploading a signature
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        self.next() == Some(to)
            || (*self == SessionStatus::SignatureUploaded && to == SessionStatus::SignatureUploaded)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown session status '{}'", s))
    }
}

/// Document family that selects a template folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocType {
    #[serde(rename = "ICA")]
    Ica,
    #[serde(rename = "NDA")]
    Nda,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Ica => "ICA",
            DocType::Nda => "NDA",
        }
    }

    /// Lowercase token looked for in template file names
    pub fn token(&self) -> &'static str {
        match self {
            DocType::Ica => "ica",
            DocType::Nda => "nda",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ICA" => Ok(DocType::Ica),
            "NDA" => Ok(DocType::Nda),
            other => Err(format!("docType must be ICA or NDA, got '{}'", other)),
        }
    }
}

/// The signer a session belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub email: String,
    pub display_name: String,
}

/// One signing session as the handlers see it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningSession {
    pub id: String,
    pub session_id: String,
    pub user: SessionUser,
    pub doc_type: DocType,
    pub status: SessionStatus,
    pub template_ref: Option<String>,
    pub template_name: Option<String>,
    pub signed_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
}

/// Signing session row as stored in the database
#[derive(Debug, Clone, FromRow)]
pub struct DbSession {
    pub id: String,
    pub session_id: String,
    pub user_email: String,
    pub user_name: String,
    pub doc_type: String,
    pub status: String,
    pub template_ref: Option<String>,
    pub template_name: Option<String>,
    pub signed_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbSession> for SigningSession {
    type Error = String;

    fn try_from(row: DbSession) -> Result<Self, Self::Error> {
        Ok(SigningSession {
            status: row.status.parse()?,
            doc_type: row.doc_type.parse()?,
            id: row.id,
            session_id: row.session_id,
            user: SessionUser {
                email: row.user_email,
                display_name: row.user_name,
            },
            template_ref: row.template_ref,
            template_name: row.template_name,
            signed_ref: row.signed_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
            signed_at: row.signed_at,
        })
    }
}

/// Response to `POST /authorize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Response to `POST /session/init`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSessionResponse {
    pub session_id: String,
    pub record_id: String,
}

/// Body carrying only a record id
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRequest {
    pub record_id: String,
}

/// Response to `POST /session/open`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionResponse {
    pub ok: bool,
    pub template_name: String,
}

/// Generic acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Body of `POST /compose`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeRequest {
    pub record_id: String,
    pub page: i64,
    pub x_pct: f64,
    pub y_pct: f64,
    pub width_pct: f64,
}

/// Response to `POST /compose`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeResponse {
    pub signed_drive_id: String,
}
