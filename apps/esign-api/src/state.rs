//! Application state for the eSign API

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono_tz::Tz;
use esign_core::{PlacementPolicy, SignatureCache};
use tokio::task::JoinHandle;

use crate::auth::AccessPolicy;
use crate::config::Config;
use crate::drive::{DocumentStore, GoogleDrive, ServiceAccount, TemplateFolders};
use crate::store::SessionStore;
use crate::webhook::EventNotifier;

/// How often expired signatures are swept from memory
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Knobs the handlers read on every request
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Root folder for per-user output folders
    pub drive_folder_id: String,
    pub template_folders: TemplateFolders,
    pub signature_max_width: u32,
    pub placement_policy: PlacementPolicy,
    pub naming_timezone: Tz,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            drive_folder_id: String::new(),
            template_folders: TemplateFolders::default(),
            signature_max_width: esign_core::filter::DEFAULT_MAX_WIDTH,
            placement_policy: PlacementPolicy::Clamp,
            naming_timezone: chrono_tz::Asia::Kolkata,
        }
    }
}

pub struct AppState {
    pub store: SessionStore,
    pub cache: Arc<SignatureCache>,
    pub drive: Arc<dyn DocumentStore>,
    pub notifier: EventNotifier,
    pub access: AccessPolicy,
    pub settings: WorkflowSettings,
}

impl AppState {
    pub fn new(
        store: SessionStore,
        cache: Arc<SignatureCache>,
        drive: Arc<dyn DocumentStore>,
        notifier: EventNotifier,
        access: AccessPolicy,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            cache,
            drive,
            notifier,
            access,
            settings,
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let db_url = config.database_url.clone().unwrap_or_else(default_database_url);
        let store = SessionStore::connect(&db_url, 5).await?;
        store.migrate().await?;

        let account = match config.private_key_pem()? {
            Some(private_key_pem) if !config.google_client_email.trim().is_empty() => {
                Some(ServiceAccount {
                    client_email: config.google_client_email.trim().to_string(),
                    private_key_pem,
                    scopes: config.drive_scopes(),
                })
            }
            _ => None,
        };
        let drive: Arc<dyn DocumentStore> = Arc::new(GoogleDrive::new(account)?);

        let notifier = EventNotifier::new(config.webhook_url.clone());
        if notifier.is_enabled() {
            tracing::info!("Webhook notifications enabled");
        }

        if config.secret_token.trim().is_empty() {
            tracing::warn!("SECRET_TOKEN is empty; every request will be refused");
        }

        let settings = WorkflowSettings {
            drive_folder_id: config.drive_folder_id.trim().to_string(),
            template_folders: TemplateFolders {
                shared: config.template_folder_id.clone(),
                ica: config.template_ica_folder_id.clone(),
                nda: config.template_nda_folder_id.clone(),
            },
            signature_max_width: config.signature_max_width,
            placement_policy: config.placement_policy,
            naming_timezone: config.naming_timezone,
        };

        Ok(Self::new(
            store,
            Arc::new(SignatureCache::with_ttl(config.signature_ttl())),
            drive,
            notifier,
            AccessPolicy::new(config.secret_token.clone(), config.allowed_domains()),
            settings,
        ))
    }

    /// Periodically drop expired signatures from the cache
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        spawn_cache_sweeper(Arc::clone(&self.cache), SWEEP_INTERVAL)
    }
}

pub fn spawn_cache_sweeper(cache: Arc<SignatureCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = cache.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, "Purged expired signatures");
            }
        }
    })
}

fn default_database_url() -> String {
    let data_dir = data_dir(|key| std::env::var(key).ok())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("esign-api");
    std::fs::create_dir_all(&data_dir).ok();
    format!("sqlite:{}/esign.db?mode=rwc", data_dir.display())
}

/// Per-user data directory on the hosts the service runs on (Linux, macOS)
fn data_dir(env: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());
    if cfg!(target_os = "macos") {
        return non_empty("HOME").map(|h| PathBuf::from(h).join("Library/Application Support"));
    }
    non_empty("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| non_empty("HOME").map(|h| PathBuf::from(h).join(".local/share")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_sweeper_purges_expired() {
        let cache = Arc::new(SignatureCache::with_ttl(Duration::ZERO));
        cache.put("rec", Bytes::from_static(b"png"));
        assert_eq!(cache.len(), 1);

        let handle = spawn_cache_sweeper(Arc::clone(&cache), Duration::from_secs(1));
        // The first tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());
        handle.abort();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_data_dir_prefers_xdg() {
        let env = |key: &str| match key {
            "XDG_DATA_HOME" => Some("/data".to_string()),
            "HOME" => Some("/home/ann".to_string()),
            _ => None,
        };
        assert_eq!(data_dir(env), Some(PathBuf::from("/data")));

        let home_only = |key: &str| match key {
            "XDG_DATA_HOME" => Some(String::new()),
            "HOME" => Some("/home/ann".to_string()),
            _ => None,
        };
        assert_eq!(data_dir(home_only), Some(PathBuf::from("/home/ann/.local/share")));
        assert_eq!(data_dir(|_| None), None);
    }
}
