//! In-process stand-in for the host's cross-context messaging.
//!
//! Contexts register a mailbox under a logical [`SurfaceName`] and talk to
//! each other only through owned [`Envelope`]s. Delivery is best effort: a
//! message for a surface that was never registered, or that has been torn
//! down, is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::envelope::Envelope;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Logical address of an execution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceName(String);

impl SurfaceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The long-lived coordinator context.
    pub fn background() -> Self {
        Self::new("background")
    }

    pub fn popup() -> Self {
        Self::new("popup")
    }

    /// Page agent living inside tab `tab`.
    pub fn page(tab: u64) -> Self {
        Self(format!("page:{tab}"))
    }

    /// Embedded panel owned by the page agent of tab `tab`.
    pub fn panel(tab: u64) -> Self {
        Self(format!("panel:{tab}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("no surface is listening on {0}")]
    Unroutable(SurfaceName),
    #[error("{0} dropped the request without replying")]
    NoReply(SurfaceName),
    #[error("mailbox of {0} is full")]
    MailboxFull(SurfaceName),
}

/// A message handed to a surface, with the means to answer it when the
/// sender asked for a reply.
#[derive(Debug)]
pub struct Delivery {
    pub from: SurfaceName,
    pub envelope: Envelope,
    responder: Option<oneshot::Sender<Envelope>>,
}

impl Delivery {
    pub fn expects_reply(&self) -> bool {
        self.responder.is_some()
    }

    /// Answers the request with `data`, echoing the request's type and id.
    /// Returns `false` when no reply was expected or the requester is gone.
    pub fn reply(self, data: impl Serialize) -> bool {
        let Some(responder) = self.responder else {
            return false;
        };
        let reply = self.envelope.reply(data);
        if responder.send(reply).is_err() {
            debug!(
                target: "surface_bus",
                to = %self.from,
                kind = %self.envelope.kind,
                "requester went away before the reply arrived"
            );
            return false;
        }
        true
    }
}

/// Receiving end of a registered surface.
#[derive(Debug)]
pub struct Mailbox {
    name: SurfaceName,
    rx: mpsc::Receiver<Delivery>,
}

impl Mailbox {
    pub fn name(&self) -> &SurfaceName {
        &self.name
    }

    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceBusConfig {
    pub mailbox_capacity: usize,
}

impl Default for SurfaceBusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

#[derive(Debug, Default)]
pub struct SurfaceBus {
    config: SurfaceBusConfig,
    routes: RwLock<HashMap<SurfaceName, mpsc::Sender<Delivery>>>,
}

impl SurfaceBus {
    /// A zero `mailbox_capacity` is raised to one.
    pub fn new(config: SurfaceBusConfig) -> Self {
        Self {
            config: SurfaceBusConfig {
                mailbox_capacity: config.mailbox_capacity.max(1),
            },
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `name`, replacing any previous context under the same name
    /// (a recreated popup or a reloaded page takes over its address).
    pub fn register(&self, name: SurfaceName) -> Mailbox {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        let previous = self
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), tx);
        if previous.is_some() {
            debug!(target: "surface_bus", surface = %name, "replaced existing registration");
        }
        Mailbox { name, rx }
    }

    pub fn unregister(&self, name: &SurfaceName) -> bool {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn is_registered(&self, name: &SurfaceName) -> bool {
        self.sender(name).is_some()
    }

    /// Fire-and-forget delivery.
    pub async fn send(
        &self,
        from: &SurfaceName,
        to: &SurfaceName,
        envelope: Envelope,
    ) -> Result<(), BusError> {
        self.deliver(
            to,
            Delivery {
                from: from.clone(),
                envelope,
                responder: None,
            },
        )
        .await
    }

    /// Non-blocking fire-and-forget delivery. A full mailbox drops the
    /// message instead of waiting for the recipient to drain it.
    pub fn notify(
        &self,
        from: &SurfaceName,
        to: &SurfaceName,
        envelope: Envelope,
    ) -> Result<(), BusError> {
        let Some(sender) = self.sender(to) else {
            return Err(BusError::Unroutable(to.clone()));
        };
        let delivery = Delivery {
            from: from.clone(),
            envelope,
            responder: None,
        };
        match sender.try_send(delivery) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(target: "surface_bus", to = %to, "mailbox full; notification dropped");
                Err(BusError::MailboxFull(to.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.forget_closed(to, &sender);
                Err(BusError::Unroutable(to.clone()))
            }
        }
    }

    /// Delivers `envelope` and waits for the recipient's reply. There is no
    /// timeout: a recipient that never answers keeps the caller waiting.
    pub async fn request(
        &self,
        from: &SurfaceName,
        to: &SurfaceName,
        envelope: Envelope,
    ) -> Result<Envelope, BusError> {
        let (tx, rx) = oneshot::channel();
        self.deliver(
            to,
            Delivery {
                from: from.clone(),
                envelope,
                responder: Some(tx),
            },
        )
        .await?;
        rx.await.map_err(|_| BusError::NoReply(to.clone()))
    }

    async fn deliver(&self, to: &SurfaceName, delivery: Delivery) -> Result<(), BusError> {
        let Some(sender) = self.sender(to) else {
            debug!(
                target: "surface_bus",
                to = %to,
                kind = %delivery.envelope.kind,
                "dropping message for unregistered surface"
            );
            return Err(BusError::Unroutable(to.clone()));
        };

        if sender.send(delivery).await.is_err() {
            self.forget_closed(to, &sender);
            debug!(target: "surface_bus", to = %to, "surface mailbox closed; message dropped");
            return Err(BusError::Unroutable(to.clone()));
        }
        Ok(())
    }

    fn sender(&self, name: &SurfaceName) -> Option<mpsc::Sender<Delivery>> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn forget_closed(&self, name: &SurfaceName, closed: &mpsc::Sender<Delivery>) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes
            .get(name)
            .is_some_and(|current| current.same_channel(closed))
        {
            routes.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageType;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn request_round_trips_through_mailbox() {
        let bus = Arc::new(SurfaceBus::default());
        let mut background = bus.register(SurfaceName::background());

        let server = tokio::spawn(async move {
            let delivery = background.recv().await.expect("delivery");
            assert_eq!(delivery.from, SurfaceName::popup());
            assert!(delivery.expects_reply());
            delivery.reply(json!({ "success": true }))
        });

        let request = Envelope::request(MessageType::GetContext, json!({}));
        let reply = bus
            .request(&SurfaceName::popup(), &SurfaceName::background(), request.clone())
            .await
            .expect("reply");

        assert!(server.await.unwrap());
        assert_eq!(reply.request_id, request.request_id);
        assert_eq!(reply.data, json!({ "success": true }));
    }

    #[tokio::test]
    async fn unregistered_surface_is_unroutable() {
        let bus = SurfaceBus::default();
        let err = bus
            .send(
                &SurfaceName::background(),
                &SurfaceName::panel(7),
                Envelope::new(MessageType::CloseSidebar, json!({})),
            )
            .await
            .unwrap_err();
        assert_eq!(err, BusError::Unroutable(SurfaceName::panel(7)));
    }

    #[tokio::test]
    async fn torn_down_surface_drops_messages() {
        let bus = SurfaceBus::default();
        let mailbox = bus.register(SurfaceName::panel(1));
        drop(mailbox);

        let result = bus
            .send(
                &SurfaceName::page(1),
                &SurfaceName::panel(1),
                Envelope::new(MessageType::PageContext, json!({})),
            )
            .await;
        assert!(result.is_err());
        assert!(!bus.is_registered(&SurfaceName::panel(1)));
    }

    #[tokio::test]
    async fn dropped_delivery_reports_no_reply() {
        let bus = Arc::new(SurfaceBus::default());
        let mut page = bus.register(SurfaceName::page(3));
        tokio::spawn(async move {
            let delivery = page.recv().await.expect("delivery");
            drop(delivery);
        });

        let err = bus
            .request(
                &SurfaceName::background(),
                &SurfaceName::page(3),
                Envelope::request(MessageType::ToggleSidebar, json!({})),
            )
            .await
            .unwrap_err();
        assert_eq!(err, BusError::NoReply(SurfaceName::page(3)));
    }

    #[tokio::test]
    async fn notify_drops_when_mailbox_is_full() {
        let bus = SurfaceBus::new(SurfaceBusConfig {
            mailbox_capacity: 1,
        });
        let mut panel = bus.register(SurfaceName::panel(2));
        let chunk = |text: &str| Envelope::new(MessageType::SummaryChunk, json!({ "chunk": text }));

        bus.notify(&SurfaceName::background(), &SurfaceName::panel(2), chunk("a"))
            .unwrap();
        let err = bus
            .notify(&SurfaceName::background(), &SurfaceName::panel(2), chunk("b"))
            .unwrap_err();
        assert_eq!(err, BusError::MailboxFull(SurfaceName::panel(2)));

        let first = panel.try_recv().expect("first chunk kept");
        assert_eq!(first.envelope.data, json!({ "chunk": "a" }));
        assert!(panel.try_recv().is_none());
    }

    #[tokio::test]
    async fn zero_capacity_is_raised_to_one() {
        let bus = SurfaceBus::new(SurfaceBusConfig {
            mailbox_capacity: 0,
        });
        let mut popup = bus.register(SurfaceName::popup());
        let chunk = Envelope::new(MessageType::SummaryChunk, json!({ "chunk": "a" }));

        bus.notify(&SurfaceName::background(), &SurfaceName::popup(), chunk.clone())
            .unwrap();
        assert_eq!(
            bus.notify(&SurfaceName::background(), &SurfaceName::popup(), chunk),
            Err(BusError::MailboxFull(SurfaceName::popup()))
        );
        assert!(popup.try_recv().is_some());
    }

    #[tokio::test]
    async fn re_registration_takes_over_address() {
        let bus = SurfaceBus::default();
        let mut first = bus.register(SurfaceName::popup());
        let mut second = bus.register(SurfaceName::popup());

        bus.send(
            &SurfaceName::background(),
            &SurfaceName::popup(),
            Envelope::new(MessageType::SummaryChunk, json!({ "chunk": "a" })),
        )
        .await
        .unwrap();

        assert!(second.try_recv().is_some());
        assert!(first.try_recv().is_none());
    }
}
