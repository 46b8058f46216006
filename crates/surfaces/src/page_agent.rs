use std::sync::Arc;

use contextaware_protocol::{
    Delivery, Envelope, ErrorKind, Mailbox, MessageType, PageContextData, ReplyError, RequestId,
    SuccessReply, SummarizeData, SummarizeReply, SummaryMode, SurfaceBus, SurfaceName,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::page::PageHost;

/// Trimmed selections longer than this light up the control.
pub const SELECTION_READY_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("a page agent is already installed in tab {0}")]
    AlreadyInstalled(u64),
}

/// Local page events the host feeds to a running agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    SelectionChanged,
    ControlClicked,
}

/// Per-page relay between the embedded panel and the coordinator.
///
/// Keeps only presentation state: whether the panel is open. Results pass
/// straight through.
pub struct PageAgent {
    tab: u64,
    bus: Arc<SurfaceBus>,
    host: Arc<dyn PageHost>,
    name: SurfaceName,
    panel: SurfaceName,
    panel_open: bool,
}

impl PageAgent {
    /// Installs the agent's control into `host` and registers `page:<tab>`.
    /// A host that already carries the control keeps its first agent.
    pub fn install(
        bus: Arc<SurfaceBus>,
        tab: u64,
        host: Arc<dyn PageHost>,
    ) -> Result<(Self, Mailbox), AgentError> {
        if host.has_control() {
            debug!(target: "page_agent", tab, "control already present; skipping install");
            return Err(AgentError::AlreadyInstalled(tab));
        }
        host.install_control();
        let name = SurfaceName::page(tab);
        let mailbox = bus.register(name.clone());
        info!(target: "page_agent", tab, url = %host.url(), "page agent installed");

        let agent = Self {
            tab,
            bus,
            host,
            name,
            panel: SurfaceName::panel(tab),
            panel_open: false,
        };
        Ok((agent, mailbox))
    }

    pub fn tab(&self) -> u64 {
        self.tab
    }

    pub fn is_panel_open(&self) -> bool {
        self.panel_open
    }

    /// Shows or hides the panel. Opening hands the panel the page identity
    /// and any live selection. Returns the new open state.
    pub async fn toggle(&mut self) -> bool {
        self.panel_open = !self.panel_open;
        self.host.set_panel_visible(self.panel_open);
        debug!(target: "page_agent", tab = self.tab, open = self.panel_open, "panel toggled");

        if self.panel_open {
            let context = PageContextData {
                url: self.host.url(),
                title: self.host.title(),
                selected_text: self.host.selected_text(),
                sent_at: contextaware_protocol::now_millis(),
            };
            let envelope = Envelope::new(MessageType::PageContext, context);
            if let Err(err) = self.bus.send(&self.name, &self.panel, envelope).await {
                debug!(target: "page_agent", tab = self.tab, error = %err, "panel not listening for page context");
            }
        }
        self.panel_open
    }

    pub fn close(&mut self) {
        if self.panel_open {
            self.panel_open = false;
            self.host.set_panel_visible(false);
            debug!(target: "page_agent", tab = self.tab, "panel closed");
        }
    }

    /// Recomputes the selection-ready hint. Returns the hint.
    pub fn on_selection_change(&self) -> bool {
        let ready = self.host.selected_text().trim().chars().count() > SELECTION_READY_CHARS;
        self.host.set_selection_ready(ready);
        ready
    }

    pub async fn handle(&mut self, delivery: Delivery) {
        match delivery.envelope.message_type() {
            Some(MessageType::ToggleSidebar) => {
                self.toggle().await;
                delivery.reply(SuccessReply::ok());
            }
            Some(MessageType::CloseSidebar) => self.close(),
            Some(MessageType::Summarize) => self.relay_summarize(delivery).await,
            Some(MessageType::SummaryChunk) => {
                let Delivery { envelope, .. } = delivery;
                if let Err(err) = self.bus.notify(&self.name, &self.panel, envelope) {
                    debug!(target: "page_agent", tab = self.tab, error = %err, "summary chunk not forwarded");
                }
            }
            _ => {
                debug!(
                    target: "page_agent",
                    tab = self.tab,
                    kind = %delivery.envelope.kind,
                    "ignoring message"
                );
                if delivery.expects_reply() {
                    let kind = delivery.envelope.kind.clone();
                    delivery.reply(SuccessReply::failed(ReplyError::invalid(format!(
                        "page agent does not handle {kind}"
                    ))));
                }
            }
        }
    }

    /// Forwards a panel's summarize intent to the coordinator and sends the
    /// answer back as `SUMMARIZE_RESPONSE` under the panel's request id. The
    /// relay runs detached so the agent keeps serving its page meanwhile. An
    /// intent that cannot be relayed is answered with `InvalidRequest`.
    async fn relay_summarize(&self, delivery: Delivery) {
        let data = &delivery.envelope.data;
        let mode = data
            .get("mode")
            .and_then(Value::as_str)
            .and_then(SummaryMode::parse);
        let text = data.get("text").and_then(Value::as_str).map(str::to_string);

        let (request_id, mode, text) = match (delivery.envelope.request_id.clone(), mode, text) {
            (Some(request_id), Some(mode), Some(text)) => (request_id, mode, text),
            (request_id, mode, _) => {
                let reason = if request_id.is_none() {
                    "summarize intent carries no request id"
                } else if mode.is_none() {
                    "summarize intent has no recognised mode"
                } else {
                    "summarize intent has no text"
                };
                warn!(target: "page_agent", tab = self.tab, reason, "rejecting summarize intent");
                let reply = SummarizeReply::failed(
                    mode.unwrap_or(SummaryMode::Local),
                    ReplyError::invalid(reason),
                );
                self.answer_panel(delivery, request_id, reply).await;
                return;
            }
        };

        let request = Envelope::new(
            MessageType::summarize_for(mode),
            SummarizeData::new(text).with_url(self.host.url()).streaming(),
        )
        .with_request_id(request_id.clone());

        let bus = self.bus.clone();
        let name = self.name.clone();
        let panel = self.panel.clone();
        tokio::spawn(async move {
            let data = match bus.request(&name, &SurfaceName::background(), request).await {
                Ok(reply) => reply.data,
                Err(err) => {
                    warn!(target: "page_agent", %request_id, error = %err, "coordinator unreachable");
                    let reply = SummarizeReply::failed(
                        mode,
                        ReplyError::new(ErrorKind::EngineRequestFailed, err.to_string()),
                    );
                    serde_json::to_value(reply).unwrap_or_default()
                }
            };
            let response = Envelope::new(MessageType::SummarizeResponse, data)
                .with_request_id(request_id.clone());
            if let Err(err) = bus.send(&name, &panel, response).await {
                debug!(target: "page_agent", %request_id, error = %err, "panel gone; summarize response dropped");
            }
        });
    }

    /// Sends `reply` to the panel as a `SUMMARIZE_RESPONSE`, and to the
    /// sender's responder when it asked for one.
    async fn answer_panel(
        &self,
        delivery: Delivery,
        request_id: Option<RequestId>,
        reply: SummarizeReply,
    ) {
        if delivery.expects_reply() {
            delivery.reply(&reply);
        }
        let mut response = Envelope::new(MessageType::SummarizeResponse, reply);
        response.request_id = request_id;
        if let Err(err) = self.bus.send(&self.name, &self.panel, response).await {
            debug!(target: "page_agent", tab = self.tab, error = %err, "panel gone; rejection dropped");
        }
    }

    /// Serves bus deliveries and page events until the mailbox closes.
    pub async fn run(mut self, mut mailbox: Mailbox, mut events: mpsc::Receiver<PageEvent>) {
        let mut events_open = true;
        loop {
            tokio::select! {
                maybe_delivery = mailbox.recv() => {
                    match maybe_delivery {
                        Some(delivery) => self.handle(delivery).await,
                        None => break,
                    }
                }
                maybe_event = events.recv(), if events_open => {
                    match maybe_event {
                        Some(PageEvent::SelectionChanged) => {
                            self.on_selection_change();
                        }
                        Some(PageEvent::ControlClicked) => {
                            self.toggle().await;
                        }
                        None => events_open = false,
                    }
                }
            }
        }
        debug!(target: "page_agent", tab = self.tab, "page agent stopped");
    }
}
