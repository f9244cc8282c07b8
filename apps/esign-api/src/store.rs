//! Session and staged-template persistence on SQLite

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{DbSession, DocType, SessionStatus, SessionUser, SigningSession};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Conflicting update: {0}")]
    Conflict(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SESSION_COLUMNS: &str = "id, session_id, user_email, user_name, doc_type, status, \
     template_ref, template_name, signed_ref, created_at, updated_at, signed_at";

#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        tracing::info!("Connecting to database: {}", url);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS esign_records (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL UNIQUE,
                user_email TEXT NOT NULL,
                user_name TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'initialized',
                template_ref TEXT,
                template_name TEXT,
                signed_ref TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                signed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS staged_templates (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                data BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_esign_records_status ON esign_records(status)")
            .execute(&self.pool)
            .await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Start a new session in `initialized`
    pub async fn create(&self, user: SessionUser, doc_type: DocType) -> Result<SigningSession> {
        let now = Utc::now();
        let session = SigningSession {
            id: Uuid::new_v4().to_string(),
            session_id: Uuid::new_v4().simple().to_string(),
            user,
            doc_type,
            status: SessionStatus::Initialized,
            template_ref: None,
            template_name: None,
            signed_ref: None,
            created_at: now,
            updated_at: now,
            signed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO esign_records (id, session_id, user_email, user_name, doc_type, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.session_id)
        .bind(&session.user.email)
        .bind(&session.user.display_name)
        .bind(session.doc_type.as_str())
        .bind(session.status.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!(record_id = %session.id, doc_type = %doc_type, "Created session");
        Ok(session)
    }

    pub async fn get(&self, record_id: &str) -> Result<Option<SigningSession>> {
        let row: Option<DbSession> = sqlx::query_as(&format!(
            "SELECT {} FROM esign_records WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SigningSession::try_from)
            .transpose()
            .map_err(StoreError::Corrupt)
    }

    pub async fn require(&self, record_id: &str) -> Result<SigningSession> {
        self.get(record_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))
    }

    /// Move a session to `to` if the transition table allows it.
    ///
    /// The update is conditioned on the status that was read, so two racing
    /// requests cannot both advance from the same state.
    pub async fn advance(&self, record_id: &str, to: SessionStatus) -> Result<SigningSession> {
        let mut session = self.require(record_id).await?;
        let from = session.status;
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE esign_records SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(record_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "session {} changed while moving to {}",
                record_id, to
            )));
        }

        tracing::debug!(record_id, %from, %to, "Advanced session");
        session.status = to;
        session.updated_at = now;
        Ok(session)
    }

    /// Store template bytes for a session and move it to `document_uploaded`
    pub async fn stage_template(
        &self,
        record_id: &str,
        filename: &str,
        template_name: &str,
        data: &[u8],
    ) -> Result<SigningSession> {
        let mut session = self.require(record_id).await?;
        let from = session.status;
        let to = SessionStatus::DocumentUploaded;
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }

        let template_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO staged_templates (id, filename, content_type, data, created_at)
            VALUES (?, ?, 'application/pdf', ?, ?)
            "#,
        )
        .bind(&template_id)
        .bind(filename)
        .bind(data)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE esign_records
            SET template_ref = ?, template_name = ?, status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(&template_id)
        .bind(template_name)
        .bind(to.as_str())
        .bind(now)
        .bind(record_id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "session {} changed while staging its template",
                record_id
            )));
        }
        tx.commit().await?;

        tracing::info!(record_id, template_ref = %template_id, bytes = data.len(), "Staged template");
        session.status = to;
        session.template_ref = Some(template_id);
        session.template_name = Some(template_name.to_string());
        session.updated_at = now;
        Ok(session)
    }

    pub async fn load_template(&self, template_ref: &str) -> Result<Option<Vec<u8>>> {
        let data: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM staged_templates WHERE id = ?")
                .bind(template_ref)
                .fetch_optional(&self.pool)
                .await?;
        Ok(data.map(|(bytes,)| bytes))
    }

    /// Record the signed output and clear the staged template in one update
    pub async fn mark_signed(&self, record_id: &str, signed_ref: &str) -> Result<SigningSession> {
        let mut session = self.require(record_id).await?;
        let from = session.status;
        let to = SessionStatus::Signed;
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE esign_records
            SET signed_ref = ?, signed_at = ?, template_ref = NULL, status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(signed_ref)
        .bind(now)
        .bind(to.as_str())
        .bind(now)
        .bind(record_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "session {} changed before it could be signed",
                record_id
            )));
        }

        tracing::info!(record_id, signed_ref, "Session signed");
        session.status = to;
        session.signed_ref = Some(signed_ref.to_string());
        session.template_ref = None;
        session.signed_at = Some(now);
        session.updated_at = now;
        Ok(session)
    }

    pub async fn delete_template(&self, template_ref: &str) -> Result<()> {
        sqlx::query("DELETE FROM staged_templates WHERE id = ?")
            .bind(template_ref)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
