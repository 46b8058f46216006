use std::collections::HashMap;
use std::sync::Arc;

use contextaware_protocol::{Availability, EngineKind};
use tracing::{debug, info, warn};

use crate::engine::{EngineOptions, InferenceEngine};
use crate::error::GatewayError;
use crate::stream::{SessionGuard, SessionStream};

/// Routes requests to the engine registered for each [`EngineKind`] and owns
/// the session lifecycle. Sessions are never pooled or shared.
#[derive(Clone, Default)]
pub struct EngineGateway {
    engines: HashMap<EngineKind, Arc<dyn InferenceEngine>>,
}

impl EngineGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(mut self, engine: Arc<dyn InferenceEngine>) -> Self {
        self.register(engine);
        self
    }

    /// Registers `engine` for its kind, replacing any previous one.
    pub fn register(&mut self, engine: Arc<dyn InferenceEngine>) {
        let kind = engine.kind();
        if self.engines.insert(kind, engine).is_some() {
            info!(target: "engine_gateway", %kind, "replaced registered engine");
        }
    }

    /// Asks the engine whether it can serve requests. A missing engine or a
    /// failing probe counts as unsupported.
    pub async fn probe(&self, kind: EngineKind) -> Availability {
        let Some(engine) = self.engines.get(&kind) else {
            debug!(target: "engine_gateway", %kind, "no engine registered");
            return Availability::Unsupported;
        };
        match engine.availability().await {
            Ok(availability) => availability,
            Err(err) => {
                warn!(target: "engine_gateway", %kind, error = %err, "availability probe failed");
                Availability::Unsupported
            }
        }
    }

    /// One synchronous request on a fresh session. The session is released
    /// before this returns, whatever the outcome.
    pub async fn run_once(
        &self,
        kind: EngineKind,
        input: &str,
        options: &EngineOptions,
    ) -> Result<String, GatewayError> {
        let mut guard = self.acquire(kind, options).await?;
        let outcome = guard.session().prompt(input).await;
        guard.release();

        outcome.map_err(|err| {
            warn!(target: "engine_gateway", %kind, error = %err, "prompt failed");
            GatewayError::request_failed(err)
        })
    }

    /// Streaming request on a fresh session. The returned stream owns the
    /// session; see [`SessionStream`] for when it is released.
    pub async fn run_streaming(
        &self,
        kind: EngineKind,
        input: &str,
        options: &EngineOptions,
    ) -> Result<SessionStream, GatewayError> {
        let mut guard = self.acquire(kind, options).await?;
        match guard.session().prompt_streaming(input) {
            Ok(fragments) => Ok(SessionStream::new(kind, fragments, guard)),
            Err(err) => {
                guard.release();
                warn!(target: "engine_gateway", %kind, error = %err, "streaming prompt failed to start");
                Err(GatewayError::request_failed(err))
            }
        }
    }

    async fn acquire(
        &self,
        kind: EngineKind,
        options: &EngineOptions,
    ) -> Result<SessionGuard, GatewayError> {
        let engine = self
            .engines
            .get(&kind)
            .ok_or(GatewayError::EngineUnavailable(kind))?;

        match self.probe(kind).await {
            Availability::Unsupported => return Err(GatewayError::EngineUnavailable(kind)),
            Availability::NeedsDownload if !options.allow_download => {
                return Err(GatewayError::EngineDownloadRequired(kind));
            }
            Availability::NeedsDownload => {
                info!(target: "engine_gateway", %kind, "creating session; host will download the model");
            }
            Availability::Ready => {}
        }

        let session = engine.create_session(options).await.map_err(|err| {
            warn!(target: "engine_gateway", %kind, error = %err, "session creation failed");
            GatewayError::request_failed(err)
        })?;
        debug!(target: "engine_gateway", %kind, "session acquired");
        Ok(SessionGuard::new(kind, session))
    }
}
