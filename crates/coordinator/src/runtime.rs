use std::sync::Arc;

use contextaware_protocol::{
    Delivery, Envelope, Mailbox, MessageType, SuccessReply, SurfaceBus, SurfaceName,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::phase::RequestOutcome;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CoordinatorPhase {
    Starting,
    Idle,
    Busy,
    Stopping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub phase: CoordinatorPhase,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        Self {
            phase: CoordinatorPhase::Starting,
            in_flight: 0,
            completed: 0,
            failed: 0,
            rejected: 0,
        }
    }
}

#[derive(Debug)]
enum CoordinatorCommand {
    ToggleSidebar {
        tab: u64,
        reply: oneshot::Sender<CoordinatorResult<bool>>,
    },
    Finished(RequestOutcome),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct CoordinatorHandle {
    cmd_tx: mpsc::Sender<CoordinatorCommand>,
    status_rx: watch::Receiver<CoordinatorStatus>,
}

impl CoordinatorHandle {
    /// Asks the page agent of `tab` to show or hide its panel, as the host
    /// does when the toolbar action is clicked. Returns the agent's
    /// `success` flag.
    pub async fn toggle_sidebar(&self, tab: u64) -> CoordinatorResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CoordinatorCommand::ToggleSidebar { tab, reply: tx })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        rx.await.map_err(|_| CoordinatorError::Offline)?
    }

    pub async fn shutdown(&self) -> CoordinatorResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CoordinatorCommand::Shutdown(tx))
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        rx.await.map_err(|_| CoordinatorError::Offline)
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status_rx.clone()
    }
}

/// Runs a [`Coordinator`] as the `background` surface of a bus.
pub struct CoordinatorController {
    handle: CoordinatorHandle,
    coordinator: Arc<Coordinator>,
    task: JoinHandle<()>,
}

impl CoordinatorController {
    /// Registers the coordinator on `bus`, performs activation and starts
    /// serving deliveries.
    pub async fn launch(
        mut coordinator: Coordinator,
        bus: Arc<SurfaceBus>,
    ) -> CoordinatorResult<Self> {
        coordinator.attach_bus(bus.clone());
        let mailbox = bus.register(SurfaceName::background());
        coordinator.activate().await;

        let coordinator = Arc::new(coordinator);
        let (cmd_tx, cmd_rx) = mpsc::channel(coordinator.config().mailbox_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(CoordinatorStatus {
            phase: CoordinatorPhase::Idle,
            ..CoordinatorStatus::default()
        });

        let runtime = CoordinatorRuntime {
            coordinator: coordinator.clone(),
            bus,
            status_tx,
            cmd_tx: cmd_tx.clone(),
            in_flight: 0,
        };
        let task = tokio::spawn(runtime.run(cmd_rx, mailbox));
        info!(target: "coordinator", "coordinator launched");

        Ok(Self {
            handle: CoordinatorHandle { cmd_tx, status_rx },
            coordinator,
            task,
        })
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub async fn shutdown(self) -> CoordinatorResult<()> {
        self.handle.shutdown().await?;
        self.task.await?;
        Ok(())
    }
}

struct CoordinatorRuntime {
    coordinator: Arc<Coordinator>,
    bus: Arc<SurfaceBus>,
    status_tx: watch::Sender<CoordinatorStatus>,
    cmd_tx: mpsc::Sender<CoordinatorCommand>,
    in_flight: usize,
}

impl CoordinatorRuntime {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<CoordinatorCommand>, mut mailbox: Mailbox) {
        loop {
            tokio::select! {
                biased;
                maybe_cmd = cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(CoordinatorCommand::Shutdown(reply)) => {
                            info!(target: "coordinator", in_flight = self.in_flight, "shutdown requested");
                            self.bus.unregister(&SurfaceName::background());
                            let _ = reply.send(());
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            warn!(target: "coordinator", "command channel closed; shutting down runtime");
                            break;
                        }
                    }
                }
                maybe_delivery = mailbox.recv() => {
                    match maybe_delivery {
                        Some(delivery) => {
                            self.in_flight += 1;
                            self.publish(|_| {});
                            self.spawn_request(delivery);
                        }
                        None => {
                            warn!(target: "coordinator", "mailbox closed; shutting down runtime");
                            break;
                        }
                    }
                }
            }
        }

        self.publish(|status| status.phase = CoordinatorPhase::Stopping);
        info!(target: "coordinator", "runtime loop exited");
    }

    fn handle_command(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::Finished(outcome) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.publish(|status| match outcome {
                    RequestOutcome::Completed => status.completed += 1,
                    RequestOutcome::Failed => status.failed += 1,
                    RequestOutcome::Rejected => status.rejected += 1,
                });
            }
            CoordinatorCommand::ToggleSidebar { tab, reply } => {
                let bus = self.bus.clone();
                tokio::spawn(async move {
                    let _ = reply.send(toggle_sidebar(&bus, tab).await);
                });
            }
            CoordinatorCommand::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    /// One task per delivery, so a slow engine call never holds up
    /// unrelated requests.
    fn spawn_request(&self, delivery: Delivery) {
        let coordinator = self.coordinator.clone();
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let (data, outcome) = coordinator
                .dispatch(&delivery.from, &delivery.envelope)
                .await;
            if delivery.expects_reply() {
                delivery.reply(data);
            } else {
                debug!(
                    target: "coordinator",
                    kind = %delivery.envelope.kind,
                    "handled notification; nothing to reply to"
                );
            }
            if let Err(err) = cmd_tx.send(CoordinatorCommand::Finished(outcome)).await {
                error!(
                    target: "coordinator",
                    error = %err,
                    "failed to report request completion"
                );
            }
        });
    }

    fn publish(&self, update: impl FnOnce(&mut CoordinatorStatus)) {
        let mut next = self.status_tx.borrow().clone();
        update(&mut next);
        next.in_flight = self.in_flight;
        if next.phase != CoordinatorPhase::Stopping {
            next.phase = if self.in_flight == 0 {
                CoordinatorPhase::Idle
            } else {
                CoordinatorPhase::Busy
            };
        }

        if self.status_tx.send(next).is_err() {
            warn!(target: "coordinator", "failed to publish status update (no listeners)");
        }
    }
}

async fn toggle_sidebar(bus: &SurfaceBus, tab: u64) -> CoordinatorResult<bool> {
    let page = SurfaceName::page(tab);
    let reply = bus
        .request(
            &SurfaceName::background(),
            &page,
            Envelope::request(MessageType::ToggleSidebar, serde_json::json!({})),
        )
        .await?;
    let reply: SuccessReply = reply
        .decode()
        .map_err(|err| CoordinatorError::MalformedReply(err.to_string()))?;
    debug!(target: "coordinator", %page, success = reply.success, "sidebar toggled");
    Ok(reply.success)
}
