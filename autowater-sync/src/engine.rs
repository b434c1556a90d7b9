//! Sync engine: delivers proposals to the controller and reconciles the
//! confirmed result.
//!
//! Every submitted proposal becomes a command with its own state machine:
//!
//! ```text
//! Pending ──send ok──▶ Sent ──ack──▶ Acknowledged
//!    ▲                  │
//!    └──ack timeout─────┘ (attempts < max_attempts, identical bytes resent)
//!
//! Pending/Sent ──retries exhausted | link down | cancel──▶ Failed
//! ```
//!
//! Commands are grouped into [`Lane`]s. One worker task per lane drains that
//! lane's queue in submission order, so two edits for the same plant are never
//! in flight together; different lanes share the link concurrently.

use crate::codec;
use crate::error::{DecodeError, FailureReason, LinkError, SyncError, SyncResult};
use crate::link::{ConnectionState, DeviceLink};
use crate::protocol::{InboundFrame, OutboundFrame};
use crate::store::{Lane, Proposal, ScheduleStore};
use autowater_types::CommandId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sends per command before giving up.
    pub max_attempts: u32,
    /// Time to wait for an acknowledgement after each send (ms).
    pub ack_timeout_ms: u64,
    /// Terminal statuses remembered for `get_status`.
    pub history_limit: usize,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            ack_timeout_ms: 5_000,
            history_limit: 256,
            event_capacity: 64,
        }
    }
}

impl SyncConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Lifecycle status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Pending,
    Sent,
    Acknowledged,
    Failed(FailureReason),
}

impl CommandStatus {
    /// Whether the command is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acknowledged | Self::Failed(_))
    }
}

/// A command that has not reached a terminal status yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCommand {
    pub command_id: CommandId,
    pub lane: Lane,
    pub proposal: Proposal,
    pub attempts: u32,
    pub status: CommandStatus,
}

/// Notification emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    StatusChanged {
        command_id: CommandId,
        lane: Lane,
        status: CommandStatus,
    },
    /// An inbound frame could not be decoded and was ignored.
    DecodeFailed(DecodeError),
    TelemetryApplied {
        schedules: usize,
    },
    ConnectionChanged(ConnectionState),
}

struct LiveCommand {
    info: PendingCommand,
    seq: u64,
    /// Encoded once at submit so every resend is byte-identical.
    frame: Vec<u8>,
    status_tx: watch::Sender<CommandStatus>,
    /// Set once an ack is being applied; from then on only
    /// `Acknowledged` may finish the command.
    acked: bool,
}

#[derive(Default)]
struct CommandTable {
    next_seq: u64,
    live: HashMap<CommandId, LiveCommand>,
    lanes: HashMap<Lane, VecDeque<CommandId>>,
    active_lanes: HashSet<Lane>,
    history: VecDeque<CommandId>,
    outcomes: HashMap<CommandId, CommandStatus>,
}

struct EngineInner {
    config: SyncConfig,
    link: Arc<DeviceLink>,
    store: Arc<ScheduleStore>,
    table: Mutex<CommandTable>,
    events: broadcast::Sender<SyncEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("link", &self.inner.link)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates a new engine. Call [`SyncEngine::start`] before submitting.
    pub fn new(link: Arc<DeviceLink>, store: Arc<ScheduleStore>, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(EngineInner {
                config,
                link,
                store,
                table: Mutex::new(CommandTable::default()),
                events,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.inner.link
    }

    pub fn store(&self) -> &Arc<ScheduleStore> {
        &self.inner.store
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Starts the inbound frame loop and the link watcher.
    pub async fn start(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        let inner = self.inner.clone();
        tasks.push(tokio::spawn(async move { inner.receive_loop().await }));

        let inner = self.inner.clone();
        let state_rx = self.inner.link.watch_state();
        tasks.push(tokio::spawn(async move { inner.watch_link(state_rx).await }));
        debug!("Sync engine started");
    }

    /// Stops background tasks. Live commands are failed as disconnected.
    pub async fn shutdown(&self) {
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.inner.fail_all(FailureReason::Disconnected, true).await;
        debug!("Sync engine stopped");
    }

    /// Queues a proposal for delivery and returns its command id.
    ///
    /// Only encoding can fail here; delivery failures show up in the
    /// command's status.
    pub async fn submit(&self, proposal: Proposal) -> SyncResult<CommandId> {
        let command_id = CommandId::new();
        let command = proposal.command();
        let frame = codec::encode_command(&OutboundFrame::new(command_id, command))?;
        let lane = proposal.lane();

        self.inner.store.attach(&proposal, command_id).await;

        let spawn_worker = {
            let mut table = self.inner.table.lock().await;
            let seq = table.next_seq;
            table.next_seq += 1;

            let info = PendingCommand {
                command_id,
                lane,
                proposal,
                attempts: 0,
                status: CommandStatus::Pending,
            };
            let (status_tx, _) = watch::channel(CommandStatus::Pending);
            table.live.insert(
                command_id,
                LiveCommand {
                    info,
                    seq,
                    frame,
                    status_tx,
                    acked: false,
                },
            );
            table.lanes.entry(lane).or_default().push_back(command_id);
            self.inner.emit(SyncEvent::StatusChanged {
                command_id,
                lane,
                status: CommandStatus::Pending,
            });
            table.active_lanes.insert(lane)
        };

        info!("Submitted {} as {}", command.mnemonic(), command_id);

        if spawn_worker {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.run_lane(lane).await });
        }
        Ok(command_id)
    }

    /// Fails a live command immediately. Returns `false` when the command is
    /// unknown or already finished.
    pub async fn cancel(&self, command_id: CommandId) -> bool {
        let cancelled = self
            .inner
            .finish(command_id, CommandStatus::Failed(FailureReason::Cancelled))
            .await;
        if cancelled {
            info!("Cancelled command {}", command_id);
        }
        cancelled
    }

    /// Current status of a live or recently finished command.
    pub async fn get_status(&self, command_id: CommandId) -> Option<CommandStatus> {
        let table = self.inner.table.lock().await;
        table
            .live
            .get(&command_id)
            .map(|c| c.info.status)
            .or_else(|| table.outcomes.get(&command_id).copied())
    }

    /// Live commands in submission order.
    pub async fn pending_commands(&self) -> Vec<PendingCommand> {
        let table = self.inner.table.lock().await;
        let mut live: Vec<&LiveCommand> = table.live.values().collect();
        live.sort_by_key(|c| c.seq);
        live.into_iter().map(|c| c.info.clone()).collect()
    }

    /// Waits until the command finishes.
    ///
    /// Returns [`SyncError::CommandFailed`] when it ends in `Failed`.
    pub async fn wait(&self, command_id: CommandId) -> SyncResult<()> {
        let mut status_rx = {
            let table = self.inner.table.lock().await;
            match table.live.get(&command_id) {
                Some(live) => live.status_tx.subscribe(),
                None => {
                    let status = table
                        .outcomes
                        .get(&command_id)
                        .copied()
                        .ok_or(SyncError::UnknownCommand(command_id))?;
                    return outcome(command_id, status);
                }
            }
        };

        let waited = status_rx
            .wait_for(CommandStatus::is_terminal)
            .await
            .map(|status| *status);
        let status = match waited {
            Ok(status) => status,
            Err(_) => self
                .get_status(command_id)
                .await
                .ok_or(SyncError::ChannelClosed)?,
        };
        outcome(command_id, status)
    }
}

fn outcome(command_id: CommandId, status: CommandStatus) -> SyncResult<()> {
    match status {
        CommandStatus::Failed(reason) => Err(SyncError::CommandFailed { command_id, reason }),
        _ => Ok(()),
    }
}

impl EngineInner {
    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Drains one lane in submission order.
    async fn run_lane(self: Arc<Self>, lane: Lane) {
        loop {
            let next = {
                let mut table = self.table.lock().await;
                let next = table.lanes.get_mut(&lane).and_then(VecDeque::pop_front);
                if next.is_none() {
                    table.lanes.remove(&lane);
                    table.active_lanes.remove(&lane);
                }
                next
            };

            match next {
                Some(command_id) => self.drive(command_id).await,
                None => return,
            }
        }
    }

    /// Runs one command to a terminal status.
    async fn drive(&self, command_id: CommandId) {
        let (frame, mut status_rx) = {
            let table = self.table.lock().await;
            match table.live.get(&command_id) {
                Some(live) => (live.frame.clone(), live.status_tx.subscribe()),
                // Cancelled or failed while queued.
                None => return,
            }
        };

        self.deliver(command_id, &frame, &mut status_rx).await;

        // A claimed ack may still be reconciling; the lane waits for it so
        // commands finish in submission order.
        let _ = status_rx.wait_for(CommandStatus::is_terminal).await;
    }

    async fn deliver(
        &self,
        command_id: CommandId,
        frame: &[u8],
        status_rx: &mut watch::Receiver<CommandStatus>,
    ) {
        // Resends must reach the session that saw the first send.
        let session = self.link.session_id();

        loop {
            if self.link.session_id() != session {
                warn!("Command {} not resent: link session changed", command_id);
                self.finish(
                    command_id,
                    CommandStatus::Failed(FailureReason::Disconnected),
                )
                .await;
                return;
            }

            match self.link.send(frame).await {
                Ok(()) => {}
                Err(LinkError::Disconnected) => {
                    warn!("Command {} not sent: link disconnected", command_id);
                    self.finish(
                        command_id,
                        CommandStatus::Failed(FailureReason::Disconnected),
                    )
                    .await;
                    return;
                }
                Err(e) => {
                    warn!("Command {} not sent: {}", command_id, e);
                    self.finish(command_id, CommandStatus::Failed(FailureReason::SendFailed))
                        .await;
                    return;
                }
            }

            let Some(attempts) = self.mark_sent(command_id).await else {
                return;
            };

            let settled = tokio::time::timeout(
                self.config.ack_timeout(),
                status_rx.wait_for(CommandStatus::is_terminal),
            )
            .await
            .is_ok();
            if settled {
                return;
            }

            if attempts >= self.config.max_attempts {
                warn!(
                    "Command {} unacknowledged after {} attempts",
                    command_id, attempts
                );
                self.finish(
                    command_id,
                    CommandStatus::Failed(FailureReason::RetriesExhausted { attempts }),
                )
                .await;
                return;
            }

            if !self.mark_retry(command_id).await {
                return;
            }
            debug!(
                "Ack timeout for {} (attempt {}/{}), resending",
                command_id, attempts, self.config.max_attempts
            );
        }
    }

    /// `Pending -> Sent`. Returns the attempt count, or `None` if the command
    /// finished or was acknowledged meanwhile.
    async fn mark_sent(&self, command_id: CommandId) -> Option<u32> {
        let mut table = self.table.lock().await;
        let live = table.live.get_mut(&command_id).filter(|live| !live.acked)?;
        live.info.attempts += 1;
        live.info.status = CommandStatus::Sent;
        live.status_tx.send_replace(CommandStatus::Sent);
        let (lane, attempts) = (live.info.lane, live.info.attempts);
        self.emit(SyncEvent::StatusChanged {
            command_id,
            lane,
            status: CommandStatus::Sent,
        });
        Some(attempts)
    }

    /// `Sent -> Pending` ahead of a resend.
    async fn mark_retry(&self, command_id: CommandId) -> bool {
        let mut table = self.table.lock().await;
        let Some(live) = table.live.get_mut(&command_id).filter(|live| !live.acked) else {
            return false;
        };
        live.info.status = CommandStatus::Pending;
        live.status_tx.send_replace(CommandStatus::Pending);
        let lane = live.info.lane;
        self.emit(SyncEvent::StatusChanged {
            command_id,
            lane,
            status: CommandStatus::Pending,
        });
        true
    }

    /// Moves a live command to a terminal status. Returns `false` if it was
    /// not live, or if its ack is already being applied.
    async fn finish(&self, command_id: CommandId, status: CommandStatus) -> bool {
        self.settle(command_id, status, false).await
    }

    /// Like [`EngineInner::finish`]; `force` also overrides a claimed ack.
    async fn settle(&self, command_id: CommandId, status: CommandStatus, force: bool) -> bool {
        let mut table = self.table.lock().await;
        let claimed = match table.live.get(&command_id) {
            Some(live) => live.acked,
            None => return false,
        };
        if claimed && !force && status != CommandStatus::Acknowledged {
            debug!("Command {} already acknowledged, keeping ack", command_id);
            return false;
        }
        let Some(live) = table.live.remove(&command_id) else {
            return false;
        };

        table.outcomes.insert(command_id, status);
        table.history.push_back(command_id);
        while table.history.len() > self.config.history_limit {
            if let Some(evicted) = table.history.pop_front() {
                table.outcomes.remove(&evicted);
            }
        }

        live.status_tx.send_replace(status);
        self.emit(SyncEvent::StatusChanged {
            command_id,
            lane: live.info.lane,
            status,
        });
        true
    }

    /// Fails every live command, oldest first. Commands whose ack is being
    /// applied are left alone unless `force` is set.
    async fn fail_all(&self, reason: FailureReason, force: bool) {
        let ids: Vec<CommandId> = {
            let table = self.table.lock().await;
            let mut live: Vec<(u64, CommandId)> =
                table.live.values().map(|c| (c.seq, c.info.command_id)).collect();
            live.sort_unstable_by_key(|(seq, _)| *seq);
            live.into_iter().map(|(_, id)| id).collect()
        };

        for command_id in ids {
            self.settle(command_id, CommandStatus::Failed(reason), force)
                .await;
        }
    }

    async fn receive_loop(&self) {
        while let Some(bytes) = self.link.recv().await {
            match codec::decode_frame(&bytes) {
                Ok(InboundFrame::Ack { command_id }) => self.handle_ack(command_id).await,
                Ok(InboundFrame::Telemetry { snapshot }) => {
                    let schedules = self.store.apply_snapshot(&snapshot).await;
                    self.emit(SyncEvent::TelemetryApplied { schedules });
                }
                Err(e) => {
                    warn!("Ignoring inbound frame: {}", e);
                    self.emit(SyncEvent::DecodeFailed(e));
                }
            }
        }
    }

    /// Claims the command for `Acknowledged` before touching the store, so a
    /// racing cancel or link failure can no longer report it as failed.
    async fn handle_ack(&self, command_id: CommandId) {
        let proposal = {
            let mut table = self.table.lock().await;
            match table.live.get_mut(&command_id) {
                Some(live) if !live.acked => {
                    live.acked = true;
                    live.info.proposal
                }
                Some(_) => {
                    debug!("Duplicate ack for {}", command_id);
                    return;
                }
                None => {
                    debug!("Ack for unknown or finished command {}", command_id);
                    return;
                }
            }
        };

        match proposal {
            Proposal::SetSchedule(schedule) => {
                self.store
                    .reconcile(schedule.plant_id(), schedule, Some(command_id))
                    .await;
            }
            Proposal::SetMode(auto) => self.store.reconcile_mode(auto, Some(command_id)).await,
            Proposal::TriggerWater(_) => {}
        }

        if self.finish(command_id, CommandStatus::Acknowledged).await {
            info!("Command {} acknowledged", command_id);
        }
    }

    async fn watch_link(&self, mut state_rx: watch::Receiver<ConnectionState>) {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            debug!("Link state changed: {}", state);
            self.store.notify_connection(state);
            self.emit(SyncEvent::ConnectionChanged(state));

            if matches!(state, ConnectionState::Disconnected | ConnectionState::Failed) {
                self.fail_all(FailureReason::Disconnected, false).await;
            }
        }
    }
}
