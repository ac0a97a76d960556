//! Outbox Relay
//!
//! Background poller that hands unprocessed outbox rows to their handlers.
//!
//! ```text
//! STOPPED --start()--> RUNNING --stop()--> STOPPED
//! ```
//!
//! Each tick fetches a bounded batch (oldest first) and processes it in
//! order. A row is marked processed only after its handler succeeded; any
//! failure is logged and the row is picked up again on a later tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::error::RelayError;
use super::handler::EventHandler;
use crate::transfer::store::LedgerStore;
use crate::transfer::types::OutboxEvent;

/// Configuration for the outbox relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Time between poll cycles
    pub poll_interval: Duration,
    /// Maximum rows fetched per cycle
    pub batch_size: usize,
    /// Deadline for one whole cycle
    pub cycle_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            cycle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Stopped,
    Running,
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub delivered: usize,
    pub failed: usize,
}

struct RunningLoop {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct OutboxRelay<L: LedgerStore> {
    ledger: Arc<L>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    config: RelayConfig,
    running: Mutex<Option<RunningLoop>>,
}

impl<L: LedgerStore> OutboxRelay<L> {
    pub fn new(ledger: Arc<L>, config: RelayConfig) -> Self {
        Self {
            ledger,
            handlers: HashMap::new(),
            config,
            running: Mutex::new(None),
        }
    }

    /// Register `handler` under its event type, replacing any previous one
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers
            .insert(handler.event_type().to_string(), handler);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> RelayState {
        match self.running.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(running) if !running.handle.is_finished() => RelayState::Running,
                _ => RelayState::Stopped,
            },
            Err(_) => RelayState::Stopped,
        }
    }

    /// Spawn the polling loop. No-op when already running.
    ///
    /// The first cycle runs immediately, then every `poll_interval`.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut running) = self.running.lock() else {
            error!("Outbox relay state lock poisoned, not starting");
            return;
        };
        if running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
        {
            debug!("Outbox relay already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let relay = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(relay.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }
                // Unmarked rows of an interrupted cycle are redelivered later
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        info!("Outbox relay interrupted an in-progress cycle");
                        break;
                    }
                    _ = relay.poll_once() => {}
                }
            }
            debug!("Outbox relay loop exited");
        });

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            handlers = self.handlers.len(),
            "Outbox relay started"
        );
        *running = Some(RunningLoop { shutdown, handle });
    }

    /// Stop the polling loop and wait for it to exit. No-op when stopped.
    ///
    /// A cycle in progress is abandoned at its next await point. Rows it
    /// delivered but had not yet marked stay unprocessed.
    pub async fn stop(&self) {
        let taken = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(running) = taken else {
            return;
        };

        // Receiver is gone if the loop already exited
        let _ = running.shutdown.send(());
        if let Err(e) = running.handle.await {
            error!(error = %e, "Outbox relay loop terminated abnormally");
        }
        info!("Outbox relay stopped");
    }

    /// Run one poll cycle under the cycle deadline.
    ///
    /// Never fails: store and delivery errors are logged and counted.
    pub async fn poll_once(&self) -> PollReport {
        let mut report = PollReport::default();
        let outcome =
            tokio::time::timeout(self.config.cycle_timeout, self.run_cycle(&mut report)).await;

        match outcome {
            Ok(Ok(())) => {
                if report.fetched > 0 {
                    info!(
                        fetched = report.fetched,
                        delivered = report.delivered,
                        failed = report.failed,
                        "Outbox poll cycle finished"
                    );
                }
            }
            Ok(Err(e)) => error!(error = %e, "Outbox poll cycle failed"),
            Err(_) => warn!(
                timeout_ms = self.config.cycle_timeout.as_millis() as u64,
                delivered = report.delivered,
                "Outbox poll cycle timed out"
            ),
        }
        report
    }

    async fn run_cycle(&self, report: &mut PollReport) -> Result<(), RelayError> {
        let events = self
            .ledger
            .fetch_unprocessed_outbox(self.config.batch_size)
            .await?;
        report.fetched = events.len();

        for event in &events {
            if let Err(e) = self.dispatch(event).await {
                report.failed += 1;
                warn!(
                    event_id = event.id,
                    event_type = %event.event_type,
                    aggregate_id = %event.aggregate_id,
                    code = e.code(),
                    error = %e,
                    "Outbox event delivery failed, will retry"
                );
                continue;
            }

            match self.ledger.mark_outbox_processed(event.id).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        event_id = event.id,
                        error = %e,
                        "Outbox event delivered but not marked processed, will be redelivered"
                    );
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&self, event: &OutboxEvent) -> Result<(), RelayError> {
        let handler = self
            .handlers
            .get(&event.event_type)
            .ok_or_else(|| RelayError::UnknownEventType(event.event_type.clone()))?;
        handler.handle(event).await
    }
}
