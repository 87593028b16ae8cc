//! Client sync agent
//!
//! Keeps one ticket's view of its queue current. The agent runs as a task
//! cycling through `Disconnected -> Connecting -> Connected` and, after a lost
//! channel or a failed attempt, `BackingOff` before trying again.
//!
//! Every (re)connect subscribes first and only then fetches the full ticket
//! view, so no update published after the fetch can be missed. Updates that
//! were already queued before the fetch carry an older queue version and are
//! ignored.

use crate::broadcast::{Observer, ObserverHandle};
use crate::error::{QueueError, Result};
use crate::sync::backoff::{BackoffPolicy, ReconnectBackoff};
use crate::sync::transport::SyncTransport;
use crate::types::{QueueId, QueueUpdate, TicketId, TicketView};
use crate::utils::people_ahead;
use crate::wait_time::{EstimatorConfig, EtaEstimator};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection state of a sync agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    BackingOff,
}

/// Everything an agent currently knows
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub connection: ConnectionState,
    /// Last known view; `None` until the first successful fetch
    pub view: Option<TicketView>,
    /// Successful reconnects after the initial connect
    pub reconnects: u64,
    /// Pushed updates applied since the last fetch
    pub updates_applied: u64,
    /// Delay currently being waited out while backing off
    pub backoff_delay: Option<Duration>,
    #[serde(skip)]
    pub observer: Option<ObserverHandle>,
    pub last_error: Option<String>,
}

impl SyncSnapshot {
    fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            view: None,
            reconnects: 0,
            updates_applied: 0,
            backoff_delay: None,
            observer: None,
            last_error: None,
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub backoff: BackoffPolicy,
    pub estimator: EstimatorConfig,
}

/// Handle to a running sync task
pub struct SyncAgent {
    queue_id: QueueId,
    ticket_id: TicketId,
    state: watch::Receiver<SyncSnapshot>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SyncAgent {
    /// Start syncing `ticket_id` of `queue_id` through `transport`
    pub fn spawn(
        transport: Arc<dyn SyncTransport>,
        queue_id: QueueId,
        ticket_id: TicketId,
        config: SyncConfig,
    ) -> Result<Self> {
        let estimator = EtaEstimator::new(config.estimator)?;
        let (state_tx, state_rx) = watch::channel(SyncSnapshot::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            transport,
            queue_id,
            ticket_id,
            estimator,
            backoff: ReconnectBackoff::new(config.backoff),
            state: state_tx,
        };
        let task = tokio::spawn(worker.run(shutdown_rx));

        info!("Sync agent started for ticket {} in queue {}", ticket_id, queue_id);
        Ok(Self {
            queue_id,
            ticket_id,
            state: state_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    pub fn ticket_id(&self) -> TicketId {
        self.ticket_id
    }

    /// Current snapshot
    pub fn snapshot(&self) -> SyncSnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.state.clone()
    }

    /// Wait until the snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SyncSnapshot) -> bool,
    ) -> Result<SyncSnapshot> {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(predicate)
            .await
            .map_err(|_| QueueError::TransportFailure {
                message: "sync agent stopped".to_string(),
            })?;
        Ok(snapshot.clone())
    }

    /// Stop the agent, cancelling any pending reconnect and releasing its channel
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Sync agent task for ticket {} ended abnormally: {}", self.ticket_id, e);
            }
        }
        info!("Sync agent stopped for ticket {}", self.ticket_id);
    }
}

impl Drop for SyncAgent {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Worker {
    transport: Arc<dyn SyncTransport>,
    queue_id: QueueId,
    ticket_id: TicketId,
    estimator: EtaEstimator,
    backoff: ReconnectBackoff,
    state: watch::Sender<SyncSnapshot>,
}

enum Exit {
    Shutdown,
    Lost,
}

impl Worker {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut connected_before = false;

        loop {
            self.set(|s| {
                s.connection = ConnectionState::Connecting;
                s.backoff_delay = None;
            });

            let attempt = tokio::select! {
                _ = &mut shutdown => break,
                attempt = self.connect() => attempt,
            };

            match attempt {
                Ok((observer, view)) => {
                    self.backoff.reset();
                    let reconnected = connected_before;
                    connected_before = true;
                    debug!(
                        "Ticket {} synced at position {} (current {})",
                        self.ticket_id, view.ticket.position, view.current_position
                    );
                    self.set(|s| {
                        s.connection = ConnectionState::Connected;
                        s.observer = Some(observer.handle());
                        s.view = Some(view);
                        s.updates_applied = 0;
                        s.last_error = None;
                        if reconnected {
                            s.reconnects += 1;
                        }
                    });

                    match self.follow(observer, &mut shutdown).await {
                        Exit::Shutdown => break,
                        Exit::Lost => {
                            info!("Update channel for ticket {} closed", self.ticket_id);
                            self.set(|s| {
                                s.connection = ConnectionState::Disconnected;
                                s.observer = None;
                            });
                        }
                    }
                }
                Err(e) => {
                    warn!("Sync attempt for ticket {} failed: {}", self.ticket_id, e);
                    self.set(|s| {
                        s.connection = ConnectionState::Disconnected;
                        s.last_error = Some(e.to_string());
                    });
                }
            }

            let delay = self.backoff.next_delay();
            debug!(
                "Reconnecting ticket {} in {:?} (attempt {})",
                self.ticket_id,
                delay,
                self.backoff.attempt()
            );
            self.set(|s| {
                s.connection = ConnectionState::BackingOff;
                s.backoff_delay = Some(delay);
            });

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set(|s| {
            s.connection = ConnectionState::Disconnected;
            s.observer = None;
            s.backoff_delay = None;
        });
    }

    async fn connect(&self) -> Result<(Observer, TicketView)> {
        let observer = self.transport.subscribe(self.queue_id).await?;
        let view = self.transport.fetch(self.ticket_id).await?;
        Ok((observer, view))
    }

    async fn follow(&self, mut observer: Observer, shutdown: &mut oneshot::Receiver<()>) -> Exit {
        loop {
            tokio::select! {
                _ = &mut *shutdown => return Exit::Shutdown,
                event = observer.recv() => match event {
                    Some(update) => {
                        if self.apply(&update) {
                            if let Err(e) = self.refresh().await {
                                warn!("Refreshing ticket {} failed: {}", self.ticket_id, e);
                                self.set(|s| s.last_error = Some(e.to_string()));
                                return Exit::Lost;
                            }
                        }
                    }
                    None => return Exit::Lost,
                },
            }
        }
    }

    /// Apply a pushed update; returns whether the ticket itself needs refetching
    fn apply(&self, update: &QueueUpdate) -> bool {
        let estimator = &self.estimator;
        let mut stale_status = false;
        self.state.send_if_modified(|s| {
            let Some(view) = s.view.as_mut() else {
                return false;
            };
            if update.version <= view.queue_version {
                return false;
            }

            view.queue_version = update.version;
            view.current_position = update.current_position;
            view.people_ahead = people_ahead(view.ticket.position, update.current_position);
            view.eta = estimator.estimate_update(update, view.ticket.position);
            s.updates_applied += 1;

            // Updates carry no ticket status; once the pointer reaches this
            // ticket the cached status may be out of date
            stale_status = view.ticket.status.is_active()
                && update.current_position >= view.ticket.position;
            true
        });
        stale_status
    }

    async fn refresh(&self) -> Result<()> {
        let fresh = self.transport.fetch(self.ticket_id).await?;
        debug!(
            "Ticket {} refetched with status {} at version {}",
            self.ticket_id, fresh.ticket.status, fresh.queue_version
        );
        self.state.send_if_modified(|s| {
            if s
                .view
                .as_ref()
                .is_some_and(|view| fresh.queue_version < view.queue_version)
            {
                return false;
            }
            s.view = Some(fresh);
            true
        });
        Ok(())
    }

    fn set(&self, f: impl FnOnce(&mut SyncSnapshot)) {
        self.state.send_modify(f);
    }
}
