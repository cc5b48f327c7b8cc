// Refresh coordination
//
// Five triggers compete to start a reconciliation pass (ledger snapshot plus
// history timeline). A single actor task owns the refresh state and the local
// model; passes run as spawned tasks and report back tagged with the
// generation they were started under.

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::escrow::EscrowLedger;
use crate::history::HistoryAggregator;
use crate::intent::{IntentState, IntentTracker};
use crate::ledger::LedgerReader;
use crate::models::{HistoryEvent, Session, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Chain head advanced (periodic poll)
    BlockTick,
    /// Rendering layer regained focus
    Focus,
    /// Rendering layer became visible
    Visible,
    /// Fixed interval while authenticated
    Interval,
    /// A submitted transaction was confirmed
    TxConfirmed,
}

/// What to do with a pass that completes after a newer one was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Drop completions older than the last applied generation
    DiscardStale,
    /// Apply whatever resolves last, regardless of issue order
    LastResolvedWins,
}

impl FromStr for StalePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discard-stale" => Ok(StalePolicy::DiscardStale),
            "last-resolved-wins" => Ok(StalePolicy::LastResolvedWins),
            other => Err(anyhow::anyhow!("unknown stale policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub poll_period: Duration,
    pub min_spacing: Duration,
    pub auth_interval: Duration,
    pub history_window: u64,
    pub stale_policy: StalePolicy,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(6),
            min_spacing: Duration::from_secs(4),
            auth_interval: Duration::from_secs(20),
            history_window: crate::history::DEFAULT_WINDOW_BLOCKS,
            stale_policy: StalePolicy::DiscardStale,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshState {
    pub in_flight: bool,
    pub last_admitted_at: Option<Instant>,
}

/// Local view of the ledger consumed by the API layer
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub identity: Option<Address>,
    pub session_expires_at: Option<DateTime<Utc>>,
    pub snapshot: Snapshot,
    pub history: Vec<HistoryEvent>,
    pub intent: IntentTracker,
    pub tx_status: Option<String>,
    /// Generation of the last applied pass
    pub generation: u64,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub in_flight: bool,
}

impl Model {
    /// Signed-in identity, unless its session expired before `now`
    pub fn active_identity(&self, now: DateTime<Utc>) -> Option<Address> {
        match self.session_expires_at {
            Some(expires_at) if now > expires_at => None,
            _ => self.identity,
        }
    }
}

pub struct PassOutcome {
    pub generation: u64,
    pub identity: Option<Address>,
    pub snapshot: Result<Snapshot, LedgerError>,
    pub history: Vec<HistoryEvent>,
}

/// Admission and application rules, free of I/O
pub struct Reconciler {
    state: RefreshState,
    policy: StalePolicy,
    min_spacing: Duration,
    started: u64,
    model: Model,
}

impl Reconciler {
    pub fn new(policy: StalePolicy, min_spacing: Duration) -> Self {
        Self {
            state: RefreshState::default(),
            policy,
            min_spacing,
            started: 0,
            model: Model::default(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn state(&self) -> &RefreshState {
        &self.state
    }

    /// Decide whether `trigger` may start a pass; returns its generation
    pub fn admit(&mut self, trigger: Trigger, now: Instant) -> Option<u64> {
        let idle = !self.state.in_flight;
        let admitted = match trigger {
            Trigger::BlockTick => {
                idle && self
                    .state
                    .last_admitted_at
                    .map_or(true, |last| now.duration_since(last) >= self.min_spacing)
            }
            Trigger::Focus | Trigger::Visible => idle,
            Trigger::Interval => idle && self.model.active_identity(Utc::now()).is_some(),
            Trigger::TxConfirmed => true,
        };
        if !admitted {
            debug!("Refresh trigger {:?} not admitted", trigger);
            return None;
        }

        self.started += 1;
        self.state.in_flight = true;
        self.state.last_admitted_at = Some(now);
        self.model.in_flight = true;
        debug!("Refresh pass {} admitted via {:?}", self.started, trigger);
        Some(self.started)
    }

    /// Fold a finished pass into the model. Returns false if it was discarded.
    pub fn complete(&mut self, outcome: PassOutcome) -> bool {
        match self.policy {
            StalePolicy::DiscardStale => {
                if outcome.generation == self.started {
                    self.state.in_flight = false;
                }
                if outcome.generation < self.model.generation {
                    self.model.in_flight = self.state.in_flight;
                    info!(
                        "Discarding stale refresh pass {} (applied {})",
                        outcome.generation, self.model.generation
                    );
                    return false;
                }
            }
            StalePolicy::LastResolvedWins => self.state.in_flight = false,
        }
        self.model.in_flight = self.state.in_flight;

        match outcome.snapshot {
            Ok(mut snapshot) => {
                if outcome.identity == self.model.identity {
                    self.model
                        .intent
                        .reconcile(IntentState::derive(snapshot.intent.as_ref()));
                } else {
                    debug!("Snapshot read for a previous identity, intent ignored");
                    snapshot.intent = None;
                }
                self.model.snapshot = snapshot;
            }
            Err(e) => warn!(
                "Snapshot failed in pass {}, keeping previous: {}",
                outcome.generation, e
            ),
        }
        self.model.history = outcome.history;
        self.model.generation = outcome.generation;
        self.model.last_refreshed = Some(Utc::now());
        true
    }

    pub fn set_identity(&mut self, identity: Option<Address>, expires_at: Option<DateTime<Utc>>) {
        if self.model.identity != identity {
            self.model.identity = identity;
            self.model.intent.reset();
            self.model.snapshot.intent = None;
        }
        self.model.session_expires_at = identity.and(expires_at);
    }

    /// Sign out once the session expired. Returns true if it did.
    pub fn expire_session(&mut self, now: DateTime<Utc>) -> bool {
        if self.model.identity.is_none() || self.model.active_identity(now).is_some() {
            return false;
        }
        info!("Session for {:?} expired, signing out", self.model.identity);
        self.set_identity(None, None);
        true
    }

    pub fn mark_claimed(&mut self) -> bool {
        self.model.intent.mark_claimed()
    }

    pub fn rollback_claim(&mut self) -> bool {
        self.model.intent.rollback_claim()
    }

    pub fn set_tx_status(&mut self, status: String) {
        self.model.tx_status = Some(status);
    }
}

enum Command {
    Trigger(Trigger),
    SetIdentity(Option<Address>, Option<DateTime<Utc>>),
    MarkClaimed(oneshot::Sender<bool>),
    RollbackClaim,
    TxStatus(String),
}

/// Cloneable handle to the coordinator actor
#[derive(Clone)]
pub struct RefreshHandle {
    commands: mpsc::UnboundedSender<Command>,
    model: watch::Receiver<Model>,
}

impl RefreshHandle {
    /// Returns false once the coordinator has stopped
    pub fn trigger(&self, trigger: Trigger) -> bool {
        self.commands.send(Command::Trigger(trigger)).is_ok()
    }

    pub fn set_identity(&self, identity: Option<Address>) {
        let _ = self.commands.send(Command::SetIdentity(identity, None));
    }

    /// Sign in for the lifetime of `session`
    pub fn set_session(&self, session: &Session) {
        let _ = self.commands.send(Command::SetIdentity(
            Some(session.identity),
            Some(session.expires_at),
        ));
    }

    /// Optimistically mark the active intent claimed
    pub async fn mark_claimed(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::MarkClaimed(tx)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Return an optimistically claimed intent to Active
    pub fn rollback_claim(&self) {
        let _ = self.commands.send(Command::RollbackClaim);
    }

    pub fn set_tx_status(&self, status: impl Into<String>) {
        let _ = self.commands.send(Command::TxStatus(status.into()));
    }

    pub fn model(&self) -> Model {
        self.model.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Model> {
        self.model.clone()
    }
}

pub struct RefreshCoordinator {
    reconciler: Reconciler,
    reader: Arc<LedgerReader>,
    history: Arc<HistoryAggregator>,
    auth_interval: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    outcomes_tx: mpsc::UnboundedSender<PassOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<PassOutcome>,
    model_tx: watch::Sender<Model>,
}

impl RefreshCoordinator {
    pub fn new(
        reader: Arc<LedgerReader>,
        history: Arc<HistoryAggregator>,
        settings: &RefreshSettings,
    ) -> (Self, RefreshHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (model_tx, model_rx) = watch::channel(Model::default());
        let coordinator = Self {
            reconciler: Reconciler::new(settings.stale_policy, settings.min_spacing),
            reader,
            history,
            auth_interval: settings.auth_interval,
            commands,
            outcomes_tx,
            outcomes_rx,
            model_tx,
        };
        let handle = RefreshHandle {
            commands: commands_tx,
            model: model_rx,
        };
        (coordinator, handle)
    }

    /// Run until every handle is dropped
    pub async fn run(mut self) {
        info!("Refresh coordinator started");
        let mut auth_tick = tokio::time::interval_at(
            Instant::now() + self.auth_interval,
            self.auth_interval,
        );
        auth_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let expiry = self.reconciler.model().session_expires_at;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(outcome) = self.outcomes_rx.recv() => {
                    self.reconciler.complete(outcome);
                    self.publish();
                }
                _ = auth_tick.tick() => self.start_if_admitted(Trigger::Interval),
                _ = sleep_past(expiry) => {
                    if self.reconciler.expire_session(Utc::now()) {
                        self.publish();
                    }
                }
            }
        }
        info!("Refresh coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Trigger(trigger) => self.start_if_admitted(trigger),
            Command::SetIdentity(identity, expires_at) => {
                self.reconciler.set_identity(identity, expires_at);
                self.publish();
                // a fresh sign-in reads its intent right away
                if identity.is_some() {
                    self.start_if_admitted(Trigger::TxConfirmed);
                }
            }
            Command::MarkClaimed(reply) => {
                let marked = self.reconciler.mark_claimed();
                self.publish();
                let _ = reply.send(marked);
            }
            Command::RollbackClaim => {
                if self.reconciler.rollback_claim() {
                    self.publish();
                }
            }
            Command::TxStatus(status) => {
                self.reconciler.set_tx_status(status);
                self.publish();
            }
        }
    }

    fn start_if_admitted(&mut self, trigger: Trigger) {
        let Some(generation) = self.reconciler.admit(trigger, Instant::now()) else {
            return;
        };
        self.publish();

        let identity = self.reconciler.model().identity;
        let reader = self.reader.clone();
        let history = self.history.clone();
        let outcomes = self.outcomes_tx.clone();
        tokio::spawn(async move {
            let (snapshot, history) =
                tokio::join!(reader.read_snapshot(identity), history.fetch_history());
            let _ = outcomes.send(PassOutcome {
                generation,
                identity,
                snapshot,
                history,
            });
        });
    }

    fn publish(&self) {
        self.model_tx.send_replace(self.reconciler.model().clone());
    }
}

/// Resolve just after `deadline`; never when there is none
async fn sleep_past(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(deadline) => {
            let wait = (deadline - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait + Duration::from_millis(1)).await;
        }
        None => std::future::pending().await,
    }
}

/// Poll the chain head and emit a block tick whenever it advances
pub async fn watch_chain_head(
    ledger: Arc<dyn EscrowLedger>,
    handle: RefreshHandle,
    poll_period: Duration,
) {
    let mut ticker = tokio::time::interval(poll_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_head: Option<u64> = None;

    loop {
        ticker.tick().await;
        match ledger.block_number().await {
            Ok(head) if last_head != Some(head) => {
                last_head = Some(head);
                if !handle.trigger(Trigger::BlockTick) {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Chain head poll failed: {}", e),
        }
    }
}
