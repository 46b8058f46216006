use anyhow::Result;
use async_trait::async_trait;
use contextaware_protocol::{Availability, EngineKind};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Incremental output of a streaming prompt.
pub type FragmentStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    /// Create a session even when the model still has to be downloaded.
    pub allow_download: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            max_tokens: Some(512),
            system_prompt: None,
            allow_download: false,
        }
    }
}

impl EngineOptions {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn allowing_download(mut self, allow: bool) -> Self {
        self.allow_download = allow;
        self
    }
}

/// A host-provided inference capability.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    async fn availability(&self) -> Result<Availability>;

    async fn create_session(&self, options: &EngineOptions) -> Result<Box<dyn EngineSession>>;
}

/// One live handle to an engine. Used for a single logical request and then
/// destroyed.
#[async_trait]
pub trait EngineSession: Send {
    async fn prompt(&mut self, input: &str) -> Result<String>;

    fn prompt_streaming(&mut self, input: &str) -> Result<FragmentStream>;

    /// Releases the handle. Called exactly once by the gateway.
    fn destroy(&mut self);
}
