use std::sync::Arc;

use contextaware_protocol::{
    now_millis, page_key, site_key, ChunkData, ContextQuery, ContextReply, EngineKind,
    EnginesReply, Envelope, MessageType, PreferencesPatch, PreferencesReply, ReplyError,
    RequestId, SaveSummaryData, SuccessReply, SummarizeData, SummarizeReply, SummaryMode,
    SummaryQuery, SummaryReply, SurfaceBus, SurfaceName,
};
use engine_gateway::{EngineGateway, EngineOptions, GatewayError};
use futures::StreamExt;
use result_store::ResultStore;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::phase::{RequestOutcome, RequestPhase};

/// Owns the engine gateway and the result store for the whole process and
/// answers every request envelope a surface sends.
///
/// Holds no per-request state outside of a call, so concurrent calls for
/// unrelated requests are independent.
pub struct Coordinator {
    gateway: EngineGateway,
    store: Arc<ResultStore>,
    config: CoordinatorConfig,
    bus: Option<Arc<SurfaceBus>>,
    name: SurfaceName,
}

/// Phase bookkeeping for one request.
struct Tracker<'a> {
    kind: &'a str,
    request_id: Option<&'a RequestId>,
    phase: RequestPhase,
}

impl<'a> Tracker<'a> {
    fn new(envelope: &'a Envelope) -> Self {
        Self {
            kind: &envelope.kind,
            request_id: envelope.request_id.as_ref(),
            phase: RequestPhase::Received,
        }
    }

    fn advance(&mut self, next: RequestPhase) {
        if let Err(err) = self.phase.advance(next) {
            warn!(
                target: "coordinator",
                kind = self.kind,
                request_id = ?self.request_id.map(RequestId::as_str),
                error = %err,
                "request phase out of order"
            );
        }
    }

    fn complete(&mut self, data: impl Serialize) -> (Value, RequestOutcome) {
        self.advance(RequestPhase::Completed);
        (to_value(data), RequestOutcome::Completed)
    }

    fn reject(&mut self, error: ReplyError) -> (Value, RequestOutcome) {
        self.reject_with(SuccessReply::failed, error)
    }

    fn reject_with<T: Serialize>(
        &mut self,
        reply: impl FnOnce(ReplyError) -> T,
        error: ReplyError,
    ) -> (Value, RequestOutcome) {
        debug!(
            target: "coordinator",
            kind = self.kind,
            request_id = ?self.request_id.map(RequestId::as_str),
            reason = %error.message,
            "request rejected"
        );
        self.advance(RequestPhase::Rejected);
        self.advance(RequestPhase::Failed);
        (to_value(reply(error)), RequestOutcome::Rejected)
    }
}

fn to_value(data: impl Serialize) -> Value {
    serde_json::to_value(data).unwrap_or_default()
}

impl Coordinator {
    pub fn new(gateway: EngineGateway, store: Arc<ResultStore>, config: CoordinatorConfig) -> Self {
        Self {
            gateway,
            store,
            config,
            bus: None,
            name: SurfaceName::background(),
        }
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn gateway(&self) -> &EngineGateway {
        &self.gateway
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Bus used to push `SUMMARY_CHUNK`s back to a streaming requester.
    pub fn attach_bus(&mut self, bus: Arc<SurfaceBus>) {
        self.bus = Some(bus);
    }

    /// Runs on every start of the coordinator context. Only the very first
    /// activation writes anything: the default preferences.
    pub async fn activate(&self) -> bool {
        let created = self.store.ensure_preferences().await;
        if created {
            info!(target: "coordinator", "first activation; default preferences written");
        } else {
            debug!(target: "coordinator", "activated");
        }
        created
    }

    /// Answers `envelope`. Never fails: every problem becomes a structured
    /// `{success: false, error}` reply echoing the request's type and id.
    pub async fn handle(&self, from: &SurfaceName, envelope: Envelope) -> Envelope {
        let (data, _) = self.dispatch(from, &envelope).await;
        envelope.reply(data)
    }

    /// Reply payload for `envelope` plus how the request ended.
    pub async fn dispatch(
        &self,
        from: &SurfaceName,
        envelope: &Envelope,
    ) -> (Value, RequestOutcome) {
        let mut tracker = Tracker::new(envelope);
        tracker.advance(RequestPhase::Dispatching);
        debug!(
            target: "coordinator",
            kind = %envelope.kind,
            from = %from,
            request_id = ?envelope.request_id.as_ref().map(RequestId::as_str),
            "dispatching request"
        );

        match envelope.message_type() {
            Some(MessageType::SummarizeLocal) => {
                self.summarize(from, envelope, SummaryMode::Local, &mut tracker)
                    .await
            }
            Some(MessageType::SummarizeCloud) => {
                self.summarize(from, envelope, SummaryMode::Cloud, &mut tracker)
                    .await
            }
            Some(MessageType::GetContext) => self.get_context(envelope, &mut tracker).await,
            Some(MessageType::SaveSummary) => self.save_summary(envelope, &mut tracker).await,
            Some(MessageType::GetSummary) => self.get_summary(envelope, &mut tracker).await,
            Some(MessageType::GetPreferences) => {
                let preferences = self.store.get_preferences().await;
                tracker.complete(PreferencesReply {
                    success: true,
                    preferences: Some(preferences),
                    error: None,
                })
            }
            Some(MessageType::UpdatePreferences) => {
                self.update_preferences(envelope, &mut tracker).await
            }
            Some(MessageType::CheckEngines) => {
                let (fast, deep) = tokio::join!(
                    self.gateway.probe(EngineKind::Fast),
                    self.gateway.probe(EngineKind::Deep)
                );
                tracker.complete(EnginesReply {
                    success: true,
                    fast,
                    deep,
                })
            }
            Some(MessageType::ClearAllData) => {
                self.store.clear_all().await;
                self.store.ensure_preferences().await;
                info!(target: "coordinator", from = %from, "all stored data cleared");
                tracker.complete(SuccessReply::ok())
            }
            _ => tracker.reject(ReplyError::invalid(format!(
                "unsupported message type {}",
                envelope.kind
            ))),
        }
    }

    async fn summarize(
        &self,
        from: &SurfaceName,
        envelope: &Envelope,
        mode: SummaryMode,
        tracker: &mut Tracker<'_>,
    ) -> (Value, RequestOutcome) {
        let failed = |error: ReplyError| SummarizeReply::failed(mode, error);
        let request: SummarizeData = match envelope.decode() {
            Ok(request) => request,
            Err(err) => {
                return tracker.reject_with(
                    failed,
                    ReplyError::invalid(format!("malformed summarize request: {err}")),
                );
            }
        };
        if request.text.trim().is_empty() {
            return tracker.reject_with(failed, ReplyError::invalid("text must not be empty"));
        }

        let kind = mode.engine_kind();
        let input = self.engine_input(kind, &request);
        let options = self.config.engine_options(kind);

        tracker.advance(RequestPhase::AwaitingEngine);
        let outcome = if request.stream {
            self.run_streaming_to(from, envelope.request_id.as_ref(), kind, &input, &options)
                .await
        } else {
            self.gateway.run_once(kind, &input, &options).await
        };
        let outcome = outcome.and_then(|content| {
            if content.trim().is_empty() {
                Err(GatewayError::EngineRequestFailed(
                    "engine returned no content".to_string(),
                ))
            } else {
                Ok(content)
            }
        });

        let content = match outcome {
            Ok(content) => content,
            Err(err) => {
                warn!(
                    target: "coordinator",
                    %kind,
                    request_id = ?tracker.request_id.map(RequestId::as_str),
                    error = %err,
                    "summarize failed"
                );
                tracker.advance(RequestPhase::Failed);
                let reply = failed(ReplyError::new(err.kind(), err.to_string()));
                return (to_value(reply), RequestOutcome::Failed);
            }
        };

        let timestamp = match request.url.as_deref().filter(|url| !url.trim().is_empty()) {
            Some(url) => {
                let result = self.store.put_result(&page_key(url), content.clone(), kind).await;
                if let Some(site) = site_key(url) {
                    self.store.record_visit(&site, Some(result.clone())).await;
                }
                result.produced_at
            }
            None => now_millis(),
        };

        info!(
            target: "coordinator",
            %kind,
            request_id = ?tracker.request_id.map(RequestId::as_str),
            chars = content.chars().count(),
            "summary completed"
        );
        tracker.complete(SummarizeReply::completed(mode, content, timestamp))
    }

    /// Text handed to the engine: truncated, and for the deep engine led by
    /// the caller's instruction or the configured one.
    fn engine_input(&self, kind: EngineKind, request: &SummarizeData) -> String {
        let text = request.text.trim();
        let text = match text.char_indices().nth(self.config.max_input_chars) {
            Some((cut, _)) => {
                debug!(
                    target: "coordinator",
                    limit = self.config.max_input_chars,
                    "truncating summarize input"
                );
                &text[..cut]
            }
            None => text,
        };

        match kind {
            EngineKind::Fast => text.to_string(),
            EngineKind::Deep => {
                let instruction = request
                    .prompt
                    .as_deref()
                    .map(str::trim)
                    .filter(|prompt| !prompt.is_empty())
                    .unwrap_or(self.config.deep_instruction.trim());
                if instruction.is_empty() {
                    text.to_string()
                } else {
                    format!("{instruction}\n\n{text}")
                }
            }
        }
    }

    /// Drains a streaming run, pushing each fragment to `to` as it arrives.
    /// Chunks are best effort; the reply carries the full content.
    async fn run_streaming_to(
        &self,
        to: &SurfaceName,
        request_id: Option<&RequestId>,
        kind: EngineKind,
        input: &str,
        options: &EngineOptions,
    ) -> Result<String, GatewayError> {
        let mut stream = self.gateway.run_streaming(kind, input, options).await?;
        let mut content = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            content.push_str(&fragment);
            self.forward_chunk(to, request_id, fragment);
        }
        Ok(content)
    }

    fn forward_chunk(&self, to: &SurfaceName, request_id: Option<&RequestId>, chunk: String) {
        let Some(bus) = &self.bus else {
            return;
        };
        let mut envelope = Envelope::new(MessageType::SummaryChunk, ChunkData { chunk });
        envelope.request_id = request_id.cloned();
        if let Err(err) = bus.notify(&self.name, to, envelope) {
            debug!(target: "coordinator", to = %to, error = %err, "summary chunk dropped");
        }
    }

    async fn get_context(
        &self,
        envelope: &Envelope,
        tracker: &mut Tracker<'_>,
    ) -> (Value, RequestOutcome) {
        let query: ContextQuery = match envelope.decode() {
            Ok(query) => query,
            Err(err) => {
                return tracker.reject(ReplyError::invalid(format!(
                    "malformed context query: {err}"
                )));
            }
        };
        let domain = query
            .domain
            .map(|domain| domain.trim().to_ascii_lowercase())
            .filter(|domain| !domain.is_empty());
        let context = self.store.get_site_context(domain.as_deref()).await;
        tracker.complete(ContextReply {
            success: true,
            context: Some(context),
            error: None,
        })
    }

    async fn save_summary(
        &self,
        envelope: &Envelope,
        tracker: &mut Tracker<'_>,
    ) -> (Value, RequestOutcome) {
        let data: SaveSummaryData = match envelope.decode() {
            Ok(data) => data,
            Err(err) => {
                return tracker.reject(ReplyError::invalid(format!(
                    "malformed save request: {err}"
                )));
            }
        };
        if data.url.trim().is_empty() {
            return tracker.reject(ReplyError::invalid("url must not be empty"));
        }
        if data.summary.trim().is_empty() {
            return tracker.reject(ReplyError::invalid("summary must not be empty"));
        }

        self.store
            .put_result(&page_key(&data.url), data.summary, data.mode.engine_kind())
            .await;
        tracker.complete(SuccessReply::ok())
    }

    async fn get_summary(
        &self,
        envelope: &Envelope,
        tracker: &mut Tracker<'_>,
    ) -> (Value, RequestOutcome) {
        let query: SummaryQuery = match envelope.decode() {
            Ok(query) => query,
            Err(err) => {
                return tracker.reject(ReplyError::invalid(format!(
                    "malformed summary query: {err}"
                )));
            }
        };
        if query.url.trim().is_empty() {
            return tracker.reject(ReplyError::invalid("url must not be empty"));
        }
        let result = self.store.get_result(&page_key(&query.url)).await;
        tracker.complete(SummaryReply {
            success: true,
            result,
            error: None,
        })
    }

    async fn update_preferences(
        &self,
        envelope: &Envelope,
        tracker: &mut Tracker<'_>,
    ) -> (Value, RequestOutcome) {
        let patch: PreferencesPatch = match envelope.decode() {
            Ok(patch) => patch,
            Err(err) => {
                return tracker.reject(ReplyError::invalid(format!(
                    "malformed preferences update: {err}"
                )));
            }
        };
        let preferences = if patch.is_empty() {
            self.store.get_preferences().await
        } else {
            self.store.update_preferences(&patch).await
        };
        tracker.complete(PreferencesReply {
            success: true,
            preferences: Some(preferences),
            error: None,
        })
    }
}
