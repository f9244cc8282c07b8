//! Template source and signed-output destination
//!
//! [`DocumentStore`] is the seam between the workflow and the cloud drive.
//! [`GoogleDrive`] talks to the Drive v3 REST API with a service account;
//! tests substitute an in-memory implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::DocType;

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Refresh the access token this long before Google says it expires
const TOKEN_SLACK: Duration = Duration::from_secs(60);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("Drive is not configured: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Drive API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("No PDF found in template folder {0}")]
    NoTemplate(String),

    #[error("Folder {folder_id} cannot receive uploads: {reason}")]
    FolderUnusable { folder_id: String, reason: String },

    #[error("File not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, DriveError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

/// Template folder ids from configuration; empty strings mean unset
#[derive(Debug, Clone, Default)]
pub struct TemplateFolders {
    pub shared: String,
    pub ica: String,
    pub nda: String,
}

impl TemplateFolders {
    /// Per-type folder if set, else the shared folder
    pub fn folder_for(&self, doc_type: DocType) -> Option<&str> {
        let per_type = match doc_type {
            DocType::Ica => self.ica.trim(),
            DocType::Nda => self.nda.trim(),
        };
        [per_type, self.shared.trim()]
            .into_iter()
            .find(|id| !id.is_empty())
    }
}

/// Prefer a file whose name mentions the doc type, else the first (newest)
pub fn pick_by_doc_type(files: Vec<DriveFile>, doc_type: DocType) -> Option<DriveFile> {
    let token = doc_type.token();
    let preferred = files
        .iter()
        .position(|f| f.name.to_lowercase().contains(token))
        .unwrap_or(0);
    files.into_iter().nth(preferred)
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// PDFs directly inside `folder_id`, most recently modified first
    async fn list_pdfs(&self, folder_id: &str) -> Result<Vec<DriveFile>>;

    async fn download(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Id of the folder named `name` under `parent_id`, created if missing
    async fn ensure_child_folder(&self, parent_id: &str, name: &str) -> Result<String>;

    async fn upload(
        &self,
        bytes: Vec<u8>,
        name: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> Result<DriveFile>;

    /// Select the template for `doc_type` from the configured folders
    async fn pick_template(&self, doc_type: DocType, folders: &TemplateFolders) -> Result<DriveFile> {
        let folder_id = folders.folder_for(doc_type).ok_or_else(|| {
            DriveError::Config(format!("template folder id missing for {}", doc_type))
        })?;
        let files = self.list_pdfs(folder_id).await?;
        pick_by_doc_type(files, doc_type).ok_or_else(|| DriveError::NoTemplate(folder_id.to_string()))
    }
}

/// Service account credentials
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key_pem: String,
    pub scopes: Vec<String>,
}

struct Credentials {
    client_email: String,
    key: EncodingKey,
    scope: String,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderMetadata {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    capabilities: Option<Capabilities>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Capabilities {
    can_add_children: Option<bool>,
}

/// Google Drive v3 client authenticated as a service account
pub struct GoogleDrive {
    client: Client,
    credentials: Option<Credentials>,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleDrive {
    /// Build a client. Without an account every call fails with
    /// [`DriveError::Config`], so the server can still start.
    pub fn new(account: Option<ServiceAccount>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let credentials = match account {
            Some(account) => {
                let key = EncodingKey::from_rsa_pem(account.private_key_pem.as_bytes())
                    .map_err(|e| DriveError::Auth(format!("invalid private key: {}", e)))?;
                Some(Credentials {
                    client_email: account.client_email,
                    key,
                    scope: account.scopes.join(" "),
                })
            }
            None => {
                tracing::warn!("Google Drive credentials not configured; drive calls will fail");
                None
            }
        };

        Ok(Self {
            client,
            credentials,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| DriveError::Config("service account credentials missing".to_string()))?;

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let iat = Utc::now().timestamp();
        let claims = Claims {
            iss: &credentials.client_email,
            scope: &credentials.scope,
            aud: TOKEN_URL,
            iat,
            exp: iat + 3600,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &credentials.key)
            .map_err(|e| DriveError::Auth(e.to_string()))?;

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let response = check(response).await.map_err(|e| match e {
            DriveError::Api { status, message } => {
                DriveError::Auth(format!("token endpoint returned {}: {}", status, message))
            }
            other => other,
        })?;
        let token: TokenResponse = response.json().await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SLACK);
        tracing::debug!(expires_in = token.expires_in, "Fetched Drive access token");
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn list(&self, query: &str, fields: &str) -> Result<Vec<DriveFile>> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(FILES_URL)
            .bearer_auth(token)
            .query(&[
                ("q", query),
                ("fields", fields),
                ("orderBy", "modifiedTime desc"),
                ("pageSize", "100"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await?;
        let list: FileList = check(response).await?.json().await?;
        Ok(list.files)
    }

    /// Uploads only go into folders the account may add children to
    async fn assert_folder_usable(&self, folder_id: &str) -> Result<()> {
        let folder_id = folder_id.trim();
        if folder_id.is_empty() {
            return Err(DriveError::Config("destination folder id is empty".to_string()));
        }

        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/{}", FILES_URL, folder_id))
            .bearer_auth(token)
            .query(&[
                ("fields", "id,name,mimeType,capabilities(canAddChildren)"),
                ("supportsAllDrives", "true"),
            ])
            .send()
            .await?;
        let meta: FolderMetadata = check(response).await?.json().await?;

        if meta.mime_type != FOLDER_MIME {
            return Err(DriveError::FolderUnusable {
                folder_id: folder_id.to_string(),
                reason: format!("not a folder (mimeType={})", meta.mime_type),
            });
        }
        if meta.capabilities.and_then(|c| c.can_add_children) == Some(false) {
            return Err(DriveError::FolderUnusable {
                folder_id: folder_id.to_string(),
                reason: "service account cannot add children".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for GoogleDrive {
    async fn list_pdfs(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let query = format!(
            "'{}' in parents and mimeType='application/pdf' and trashed=false",
            escape_query(folder_id.trim())
        );
        self.list(&query, "files(id,name,mimeType,modifiedTime)").await
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let file_id = file_id.trim();
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/{}", FILES_URL, file_id))
            .bearer_auth(token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DriveError::NotFound(file_id.to_string()));
        }
        let bytes = check(response).await?.bytes().await?;
        tracing::debug!(file_id, bytes = bytes.len(), "Downloaded Drive file");
        Ok(bytes.to_vec())
    }

    async fn ensure_child_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let name = name.trim();
        let query = format!(
            "'{}' in parents and mimeType = '{}' and name = '{}' and trashed = false",
            escape_query(parent_id.trim()),
            FOLDER_MIME,
            escape_query(name)
        );
        if let Some(existing) = self.list(&query, "files(id,name)").await?.into_iter().next() {
            return Ok(existing.id);
        }

        let token = self.access_token().await?;
        let response = self
            .client
            .post(FILES_URL)
            .bearer_auth(token)
            .query(&[("fields", "id"), ("supportsAllDrives", "true")])
            .json(&serde_json::json!({
                "name": name,
                "parents": [parent_id.trim()],
                "mimeType": FOLDER_MIME,
            }))
            .send()
            .await?;
        let created: DriveFile = check(response).await?.json().await?;
        tracing::info!(folder_id = %created.id, name, "Created Drive folder");
        Ok(created.id)
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        name: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> Result<DriveFile> {
        self.assert_folder_usable(parent_id).await?;

        let metadata = serde_json::json!({
            "name": name.trim(),
            "parents": [parent_id.trim()],
            "mimeType": mime_type,
        });
        let boundary = format!("esign-{}", Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, mime_type, &bytes);

        let token = self.access_token().await?;
        let response = self
            .client
            .post(UPLOAD_URL)
            .bearer_auth(token)
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id,name,mimeType,webViewLink"),
                ("supportsAllDrives", "true"),
            ])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;
        let file: DriveFile = check(response).await?.json().await?;
        tracing::info!(file_id = %file.id, name = %file.name, bytes = bytes.len(), "Uploaded to Drive");
        Ok(file)
    }
}

/// Turn non-2xx responses into [`DriveError::Api`]
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(DriveError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Escape a value for a single-quoted Drive query literal
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Metadata plus media in one `multipart/related` body
fn multipart_related(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {t}\r\n\r\n",
            b = boundary,
            m = metadata,
            t = mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
