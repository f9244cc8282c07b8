//! Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::Parser;
use esign_core::PlacementPolicy;

/// Configuration for the eSign API server
///
/// Every option can also be set through the environment (a `.env` file is
/// loaded first).
#[derive(Parser, Debug, Clone)]
#[command(name = "esign-api")]
#[command(about = "eSign API server: template signing backed by Google Drive")]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// SQLite connection string; defaults to a file in the platform data dir
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Shared secret every signer must present
    #[arg(long, env = "SECRET_TOKEN", hide_env_values = true)]
    pub secret_token: String,

    /// Comma-separated list of accepted email domains (empty allows all)
    #[arg(long, env = "ALLOWED_EMAIL_DOMAINS", default_value = "")]
    pub allowed_email_domains: String,

    /// Service account email for Google Drive
    #[arg(long, env = "GOOGLE_CLIENT_EMAIL", default_value = "")]
    pub google_client_email: String,

    /// Service account PEM key, `\n` escapes allowed
    #[arg(long, env = "GOOGLE_PRIVATE_KEY", hide_env_values = true, allow_hyphen_values = true)]
    pub google_private_key: Option<String>,

    /// Service account PEM key, base64 encoded (wins over the plain form)
    #[arg(long, env = "GOOGLE_PRIVATE_KEY_BASE64", hide_env_values = true, allow_hyphen_values = true)]
    pub google_private_key_base64: Option<String>,

    /// Comma-separated OAuth scopes
    #[arg(
        long,
        env = "GOOGLE_DRIVE_SCOPE",
        default_value = "https://www.googleapis.com/auth/drive.file"
    )]
    pub google_drive_scope: String,

    /// Drive folder receiving per-user folders with signed output
    #[arg(long, env = "GOOGLE_DRIVE_FOLDER_ID", default_value = "")]
    pub drive_folder_id: String,

    /// Shared template folder
    #[arg(long, env = "GOOGLE_DRIVE_TEMPLATE_FOLDER_ID", default_value = "")]
    pub template_folder_id: String,

    /// Template folder for ICA documents
    #[arg(long, env = "GOOGLE_DRIVE_TEMPLATE_ICA_FOLDER_ID", default_value = "")]
    pub template_ica_folder_id: String,

    /// Template folder for NDA documents
    #[arg(long, env = "GOOGLE_DRIVE_TEMPLATE_NDA_FOLDER_ID", default_value = "")]
    pub template_nda_folder_id: String,

    /// Optional webhook receiving workflow events
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Directory with the browser UI
    #[arg(long, env = "STATIC_DIR", default_value = "public")]
    pub static_dir: PathBuf,

    /// Lifetime of an uploaded signature in seconds
    #[arg(long, env = "SIGNATURE_TTL_SECS", default_value = "900")]
    pub signature_ttl_secs: u64,

    /// Maximum stored signature width in pixels
    #[arg(long, env = "SIGNATURE_MAX_WIDTH", default_value = "1600")]
    pub signature_max_width: u32,

    /// What to do with out-of-range pages: clamp or reject
    #[arg(long, env = "PLACEMENT_POLICY", default_value = "clamp")]
    pub placement_policy: PlacementPolicy,

    /// IANA time zone used to date output file names
    #[arg(long, env = "NAMING_TIMEZONE", default_value = "Asia/Kolkata")]
    pub naming_timezone: chrono_tz::Tz,

    /// Rate limit: burst size per client IP
    #[arg(long, env = "RATE_LIMIT_BURST", default_value = "300")]
    pub rate_limit_burst: u32,

    /// Rate limit: seconds to replenish one request
    #[arg(long, env = "RATE_LIMIT_REPLENISH_SECS", default_value = "3")]
    pub rate_limit_replenish_secs: u64,

    /// Maximum request body size in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn signature_ttl(&self) -> Duration {
        Duration::from_secs(self.signature_ttl_secs)
    }

    pub fn allowed_domains(&self) -> Vec<String> {
        split_list(&self.allowed_email_domains)
            .into_iter()
            .map(|d| d.to_lowercase())
            .collect()
    }

    pub fn drive_scopes(&self) -> Vec<String> {
        split_list(&self.google_drive_scope)
    }

    /// The service account key as PEM text, if one is configured
    pub fn private_key_pem(&self) -> anyhow::Result<Option<String>> {
        if let Some(encoded) = self.google_private_key_base64.as_deref().map(str::trim) {
            if !encoded.is_empty() {
                let decoded = BASE64.decode(encoded)?;
                return Ok(Some(String::from_utf8(decoded)?));
            }
        }
        Ok(self
            .google_private_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(unescape_newlines))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keys pasted into `.env` files usually carry literal `\n` sequences
fn unescape_newlines(key: &str) -> String {
    if key.contains("\\n") {
        key.replace("\\n", "\n")
    } else {
        key.to_string()
    }
}
