use std::path::{Path, PathBuf};

use engine_gateway::EngineOptions;
use result_store::{StoreLimits, DEFAULT_MAX_RECENT_PER_SITE, DEFAULT_MAX_RESULTS};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CoordinatorResult;

pub const DATA_DIR_ENV: &str = "CONTEXTAWARE_DATA_DIR";
pub const ALLOW_DOWNLOAD_ENV: &str = "CONTEXTAWARE_ALLOW_DOWNLOAD";

const DEFAULT_MAX_INPUT_CHARS: usize = 12_000;
const DEFAULT_DEEP_INSTRUCTION: &str =
    "Analyze the following text in depth and summarize its key points:";

/// Runtime knobs for the coordinator. Every field has a default so a config
/// file only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub data_dir: PathBuf,
    pub store_file: String,
    pub max_results: usize,
    pub max_recent_per_site: usize,
    /// Longer inputs are cut to this many characters before dispatch.
    pub max_input_chars: usize,
    pub mailbox_capacity: usize,
    /// Let the host fetch a missing model instead of failing the request.
    pub allow_model_download: bool,
    pub fast_options: EngineOptions,
    /// Fields a file names replace the deep defaults; the others keep them.
    #[serde(deserialize_with = "deep_options_over_defaults")]
    pub deep_options: EngineOptions,
    /// Prefix for deep requests that carry no prompt of their own.
    pub deep_instruction: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("target/contextaware"),
            store_file: "store.json".to_string(),
            max_results: DEFAULT_MAX_RESULTS,
            max_recent_per_site: DEFAULT_MAX_RECENT_PER_SITE,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            mailbox_capacity: contextaware_protocol::bus::DEFAULT_MAILBOX_CAPACITY,
            allow_model_download: false,
            fast_options: EngineOptions::default(),
            deep_options: default_deep_options(),
            deep_instruction: DEFAULT_DEEP_INSTRUCTION.to_string(),
        }
    }
}

fn default_deep_options() -> EngineOptions {
    EngineOptions {
        max_tokens: Some(1024),
        ..EngineOptions::default()
    }
}

fn deep_options_over_defaults<'de, D>(deserializer: D) -> Result<EngineOptions, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = Map::<String, Value>::deserialize(deserializer)?;
    let mut merged = match serde_json::to_value(default_deep_options()).map_err(de::Error::custom)? {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    merged.extend(overrides);
    serde_json::from_value(Value::Object(merged)).map_err(de::Error::custom)
}

impl CoordinatorConfig {
    /// Reads a JSON config file; missing fields keep their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> CoordinatorResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&raw)?;
        debug!(target: "coordinator", path = %path.as_ref().display(), "loaded configuration");
        Ok(config)
    }

    /// Applies `CONTEXTAWARE_*` overrides from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|dir| !dir.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup(ALLOW_DOWNLOAD_ENV) {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.allow_model_download = true,
                "0" | "false" | "no" | "off" => self.allow_model_download = false,
                other => {
                    debug!(target: "coordinator", value = other, "ignoring unrecognised {ALLOW_DOWNLOAD_ENV}");
                }
            }
        }
        self
    }

    pub fn ensure_dirs(&self) -> CoordinatorResult<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Where the file-backed result store keeps its document.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.store_file)
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_results: self.max_results,
            max_recent_per_site: self.max_recent_per_site,
        }
    }

    pub(crate) fn engine_options(&self, kind: contextaware_protocol::EngineKind) -> EngineOptions {
        let options = match kind {
            contextaware_protocol::EngineKind::Fast => &self.fast_options,
            contextaware_protocol::EngineKind::Deep => &self.deep_options,
        };
        options
            .clone()
            .allowing_download(options.allow_download || self.allow_model_download)
    }
}
