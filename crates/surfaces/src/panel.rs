use std::sync::Arc;

use contextaware_protocol::{
    page_key, BusError, ChunkData, Delivery, Envelope, ErrorKind, Mailbox, MessageType,
    PageContextData, PageResult, PanelSummarizeData, Preferences, PreferencesPatch,
    PreferencesReply, ReplyError, RequestId, SummarizeData, SummarizeReply, SummaryMode,
    SummaryQuery, SummaryReply, SurfaceBus, SurfaceName,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PanelError {
    #[error("a summarize request is already awaiting the engine")]
    Busy,
    #[error("panel was closed while waiting")]
    Closed,
    #[error("unexpected reply shape: {0}")]
    MalformedReply(String),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

/// Who the panel talks to for summarize requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelRoute {
    /// Popup-style surface: straight to the coordinator.
    Direct,
    /// Embedded panel: through the page agent of this tab.
    ViaPageAgent(u64),
}

/// What the panel currently renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelView {
    Idle,
    Awaiting { mode: SummaryMode, partial: String },
    Ready(PageResult),
    Error { kind: ErrorKind, message: String },
}

/// A transient result surface. Everything it shows is loaded on open; none
/// of it outlives [`Panel::close`].
pub struct Panel {
    bus: Arc<SurfaceBus>,
    name: SurfaceName,
    route: PanelRoute,
    page_url: String,
    page: Option<PageContextData>,
    preferences: Preferences,
    view: PanelView,
    pending: Option<RequestId>,
    mailbox: Mailbox,
    replies_tx: mpsc::Sender<Envelope>,
    replies_rx: mpsc::Receiver<Envelope>,
}

impl Panel {
    /// Registers the panel and renders whatever the store already has for
    /// `page_url`. An unreachable coordinator leaves the panel idle with
    /// default preferences.
    pub async fn open(
        bus: Arc<SurfaceBus>,
        name: SurfaceName,
        route: PanelRoute,
        page_url: impl Into<String>,
    ) -> Self {
        let mailbox = bus.register(name.clone());
        let (replies_tx, replies_rx) = mpsc::channel(4);
        let mut panel = Self {
            bus,
            name,
            route,
            page_url: page_url.into(),
            page: None,
            preferences: Preferences::default(),
            view: PanelView::Idle,
            pending: None,
            mailbox,
            replies_tx,
            replies_rx,
        };
        panel.load().await;
        info!(target: "panel", panel = %panel.name, url = %panel.page_url, "panel opened");
        panel
    }

    async fn load(&mut self) {
        let query = SummaryQuery {
            url: self.page_url.clone(),
        };
        match self.ask::<SummaryReply>(MessageType::GetSummary, query).await {
            Ok(SummaryReply {
                result: Some(result),
                ..
            }) => self.view = PanelView::Ready(result),
            Ok(_) => {}
            Err(err) => warn!(target: "panel", panel = %self.name, error = %err, "could not load cached summary"),
        }

        match self
            .ask::<PreferencesReply>(MessageType::GetPreferences, serde_json::json!({}))
            .await
        {
            Ok(PreferencesReply {
                preferences: Some(preferences),
                ..
            }) => self.preferences = preferences,
            Ok(_) => {}
            Err(err) => warn!(target: "panel", panel = %self.name, error = %err, "could not load preferences"),
        }
    }

    async fn ask<T: serde::de::DeserializeOwned>(
        &self,
        kind: MessageType,
        data: impl Serialize,
    ) -> Result<T, PanelError> {
        let reply = self
            .bus
            .request(&self.name, &SurfaceName::background(), Envelope::request(kind, data))
            .await?;
        reply
            .decode()
            .map_err(|err| PanelError::MalformedReply(format!("{kind}: {err}")))
    }

    pub fn name(&self) -> &SurfaceName {
        &self.name
    }

    pub fn route(&self) -> PanelRoute {
        self.route
    }

    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    pub fn page_context(&self) -> Option<&PageContextData> {
        self.page.as_ref()
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn view(&self) -> &PanelView {
        &self.view
    }

    /// The triggering control should be disabled while this is true.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Writes a preference change through the coordinator and adopts the
    /// merged result.
    pub async fn update_preferences(
        &mut self,
        patch: &PreferencesPatch,
    ) -> Result<&Preferences, PanelError> {
        let reply: PreferencesReply = self.ask(MessageType::UpdatePreferences, patch).await?;
        if let Some(preferences) = reply.preferences {
            self.preferences = preferences;
        }
        Ok(&self.preferences)
    }

    /// Issues a summarize request for the current page. Refused while an
    /// earlier one is still in flight.
    pub async fn begin_summarize(
        &mut self,
        text: impl Into<String>,
        mode: SummaryMode,
    ) -> Result<RequestId, PanelError> {
        if self.pending.is_some() {
            return Err(PanelError::Busy);
        }
        let text = text.into();
        let request_id = RequestId::new();

        match self.route {
            PanelRoute::ViaPageAgent(tab) => {
                let intent = Envelope::new(MessageType::Summarize, PanelSummarizeData { text, mode })
                    .with_request_id(request_id.clone());
                if let Err(err) = self.bus.send(&self.name, &SurfaceName::page(tab), intent).await {
                    self.view = PanelView::Error {
                        kind: ErrorKind::EngineRequestFailed,
                        message: err.to_string(),
                    };
                    return Err(err.into());
                }
            }
            PanelRoute::Direct => self.request_directly(text, mode, request_id.clone()),
        }

        debug!(target: "panel", panel = %self.name, %request_id, mode = %mode.as_str(), "summarize requested");
        self.pending = Some(request_id.clone());
        self.view = PanelView::Awaiting {
            mode,
            partial: String::new(),
        };
        Ok(request_id)
    }

    /// The coordinator's reply is turned into a `SUMMARIZE_RESPONSE` on the
    /// panel's private reply channel, the same shape an agent relays.
    fn request_directly(&self, text: String, mode: SummaryMode, request_id: RequestId) {
        let request = Envelope::new(
            MessageType::summarize_for(mode),
            SummarizeData::new(text)
                .with_url(self.page_url.clone())
                .streaming(),
        )
        .with_request_id(request_id.clone());

        let bus = self.bus.clone();
        let name = self.name.clone();
        let replies = self.replies_tx.clone();
        tokio::spawn(async move {
            let data = match bus.request(&name, &SurfaceName::background(), request).await {
                Ok(reply) => reply.data,
                Err(err) => {
                    let reply = SummarizeReply::failed(
                        mode,
                        ReplyError::new(ErrorKind::EngineRequestFailed, err.to_string()),
                    );
                    serde_json::to_value(reply).unwrap_or_default()
                }
            };
            let response =
                Envelope::new(MessageType::SummarizeResponse, data).with_request_id(request_id);
            if replies.send(response).await.is_err() {
                debug!(target: "panel", panel = %name, "panel closed; reply dropped");
            }
        });
    }

    /// Next message for this panel, from the bus or a direct reply.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        tokio::select! {
            Some(delivery) = self.mailbox.recv() => Some(delivery.envelope),
            Some(envelope) = self.replies_rx.recv() => Some(envelope),
            else => None,
        }
    }

    pub fn handle(&mut self, delivery: Delivery) {
        self.handle_envelope(delivery.envelope);
    }

    pub fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope.message_type() {
            Some(MessageType::PageContext) => match envelope.decode::<PageContextData>() {
                Ok(context) => {
                    self.page_url = context.url.clone();
                    self.page = Some(context);
                }
                Err(err) => debug!(target: "panel", error = %err, "malformed page context"),
            },
            Some(MessageType::SummaryChunk) => {
                if !self.is_pending(&envelope) {
                    return;
                }
                if let (Ok(chunk), PanelView::Awaiting { partial, .. }) =
                    (envelope.decode::<ChunkData>(), &mut self.view)
                {
                    partial.push_str(&chunk.chunk);
                }
            }
            Some(MessageType::SummarizeResponse) => {
                if !self.is_pending(&envelope) {
                    debug!(target: "panel", panel = %self.name, "dropping response to a request this panel no longer awaits");
                    return;
                }
                self.pending = None;
                self.view = match envelope.decode::<SummarizeReply>() {
                    Ok(reply) => self.render(reply),
                    Err(err) => PanelView::Error {
                        kind: ErrorKind::EngineRequestFailed,
                        message: format!("unreadable response: {err}"),
                    },
                };
            }
            _ => debug!(target: "panel", kind = %envelope.kind, "ignoring message"),
        }
    }

    fn is_pending(&self, envelope: &Envelope) -> bool {
        self.pending.is_some() && envelope.request_id == self.pending
    }

    fn render(&self, reply: SummarizeReply) -> PanelView {
        match (reply.success, reply.summary) {
            (true, Some(content)) => PanelView::Ready(PageResult {
                key: page_key(&self.page_url),
                content,
                engine_kind: reply.mode.engine_kind(),
                produced_at: reply.timestamp.unwrap_or_default(),
            }),
            _ => {
                let error = reply.error.unwrap_or_else(|| {
                    ReplyError::new(ErrorKind::EngineRequestFailed, "request failed")
                });
                PanelView::Error {
                    kind: error.kind,
                    message: error.message,
                }
            }
        }
    }

    /// Requests a summary and waits for the outcome, applying page context
    /// and chunks that arrive meanwhile. Failures are rendered, not retried.
    pub async fn summarize(
        &mut self,
        text: impl Into<String>,
        mode: SummaryMode,
    ) -> Result<PanelView, PanelError> {
        self.begin_summarize(text, mode).await?;
        while self.pending.is_some() {
            let envelope = self.next_envelope().await.ok_or(PanelError::Closed)?;
            self.handle_envelope(envelope);
        }
        Ok(self.view.clone())
    }

    /// Tears the panel down. An embedded panel tells its agent to hide it.
    /// Replies still in flight are dropped.
    pub async fn close(self) {
        if let PanelRoute::ViaPageAgent(tab) = self.route {
            let close = Envelope::new(MessageType::CloseSidebar, serde_json::json!({}));
            if let Err(err) = self.bus.send(&self.name, &SurfaceName::page(tab), close).await {
                debug!(target: "panel", panel = %self.name, error = %err, "page agent already gone");
            }
        }
        self.bus.unregister(&self.name);
        debug!(target: "panel", panel = %self.name, "panel closed");
    }
}
