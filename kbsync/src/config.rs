use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::sync::SqliteStateStore;
use crate::sync::backoff::{Backoff, RetryPolicy};
use crate::sync::engine::{DEFAULT_EMBEDDING_MODEL, IndexTimeoutPolicy, SyncConfig};
use crate::sync::state::{AnyStateStore, JsonStateStore, StateError, default_state_dir};

const DEFAULT_CORPUS_DIR: &str = "quarters";
const DEFAULT_INDEX_TIMEOUT_SECS: u64 = 120;
const DEFAULT_INDEX_POLL_SECS: u64 = 5;
const DEFAULT_RETRY_ATTEMPTS: u64 = 4;
const DEFAULT_DELETE_PAUSE_MS: u64 = 500;
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    Json,
    Sqlite,
}

impl StateBackend {
    fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(StateBackend::Json),
            "sqlite" => Ok(StateBackend::Sqlite),
            other => anyhow::bail!("unknown state backend: {other}"),
        }
    }

    fn default_file_name(&self) -> &'static str {
        match self {
            StateBackend::Json => "state.json",
            StateBackend::Sqlite => "state.db",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_key: String,
    pub agent_id: String,
    pub base_url: Option<String>,
    pub corpus_dir: PathBuf,
    pub state_backend: StateBackend,
    pub state_path: PathBuf,
    pub permanent_docs: HashSet<String>,
    pub embedding_model: String,
    pub strict_hash: bool,
    pub index_timeout: Duration,
    pub index_poll_interval: Duration,
    pub retry_attempts: u32,
    pub delete_pause: Duration,
    pub swap_on_index_timeout: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = required(&lookup, "KBSYNC_API_KEY")?;
        let agent_id = required(&lookup, "KBSYNC_AGENT_ID")?;
        let state_backend = match lookup("KBSYNC_STATE_BACKEND") {
            Some(value) => StateBackend::parse(&value)?,
            None => StateBackend::Json,
        };
        let state_path = match lookup("KBSYNC_STATE_FILE").filter(|v| !v.trim().is_empty()) {
            Some(value) => PathBuf::from(value),
            None => default_state_dir()
                .context("no KBSYNC_STATE_FILE and no data directory")?
                .join(state_backend.default_file_name()),
        };

        Ok(Self {
            api_key,
            agent_id,
            base_url: lookup("KBSYNC_BASE_URL").filter(|v| !v.trim().is_empty()),
            corpus_dir: lookup("KBSYNC_CORPUS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CORPUS_DIR)),
            state_backend,
            state_path,
            permanent_docs: lookup("KBSYNC_PERMANENT_DOCS")
                .map(|value| parse_name_list(&value))
                .unwrap_or_default(),
            embedding_model: lookup("KBSYNC_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            strict_hash: read_bool_env(&lookup, "KBSYNC_STRICT_HASH", false),
            index_timeout: Duration::from_secs(read_u64_env(
                &lookup,
                "KBSYNC_INDEX_TIMEOUT_SECS",
                DEFAULT_INDEX_TIMEOUT_SECS,
            )),
            index_poll_interval: Duration::from_secs(read_u64_env(
                &lookup,
                "KBSYNC_INDEX_POLL_SECS",
                DEFAULT_INDEX_POLL_SECS,
            )),
            retry_attempts: read_u64_env(&lookup, "KBSYNC_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS)
                .min(u64::from(u32::MAX)) as u32,
            delete_pause: Duration::from_millis(read_u64_env(
                &lookup,
                "KBSYNC_DELETE_PAUSE_MS",
                DEFAULT_DELETE_PAUSE_MS,
            )),
            swap_on_index_timeout: read_bool_env(&lookup, "KBSYNC_SWAP_ON_INDEX_TIMEOUT", true),
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            permanent: self.permanent_docs.clone(),
            embedding_model: self.embedding_model.clone(),
            strict_hash: self.strict_hash,
            retry: RetryPolicy::new(
                self.retry_attempts,
                Backoff::new(RETRY_BASE, RETRY_CAP, true),
            ),
            poll_interval: self.index_poll_interval,
            index_timeout: self.index_timeout,
            timeout_policy: if self.swap_on_index_timeout {
                IndexTimeoutPolicy::Proceed
            } else {
                IndexTimeoutPolicy::RetainOld
            },
            delete_pause: self.delete_pause,
        }
    }

    pub async fn open_state_store(&self) -> Result<AnyStateStore, StateError> {
        match self.state_backend {
            StateBackend::Json => Ok(AnyStateStore::Json(
                JsonStateStore::open(self.state_path.clone()).await?,
            )),
            StateBackend::Sqlite => Ok(AnyStateStore::Sqlite(
                SqliteStateStore::open(&self.state_path).await?,
            )),
        }
    }
}

fn required<F>(lookup: &F, name: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{name} is not set"))
}

fn parse_name_list(value: &str) -> HashSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_u64_env<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
