// ── Fleet session ──
//
// Full lifecycle for one consumer's view of the fleet: snapshot fetch,
// broker subscription, command routing, and reactive state through the
// DataStore. A session is built for one open/close cycle and discarded.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use chairlink_api::{AlarmQuery, BrokerEvent, FleetClient, StreamHandle, StreamState};

use crate::classify::{self, NoopNotifier, Notifier};
use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::FleetConfig;
use crate::convert;
use crate::error::CoreError;
use crate::model::{Alarm, AlarmId, Device, DeviceId};
use crate::store::{AlarmOutcome, DataStore, FleetEvent, FleetState, Outcome, ResolveOutcome};
use crate::stream::{AlarmFilter, DeviceFilter, FleetStream};
use crate::summary::FleetSummary;

const COMMAND_CHANNEL_SIZE: usize = 64;
const ALARM_CHANNEL_SIZE: usize = 256;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The broker stream dropped and is backing off.
    Reconnecting { attempt: u32 },
    Failed,
}

// ── FleetSession ─────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Owns the store, the REST
/// client, the broker stream, and every background task; `close()` tears
/// all of them down and guarantees no further state change.
///
/// Background tasks hold only a weak reference, so dropping the last
/// clone without `close()` also cancels them.
#[derive(Clone)]
pub struct FleetSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: FleetConfig,
    store: Arc<DataStore>,
    connection_state: watch::Sender<ConnectionState>,
    alarm_tx: broadcast::Sender<Arc<Alarm>>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    client: Mutex<Option<FleetClient>>,
    stream: Mutex<Option<StreamHandle>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    notifier: Arc<dyn Notifier>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.store.close();
        self.cancel.cancel();
    }
}

impl FleetSession {
    /// Create a session that discards notifications. Does NOT connect --
    /// call [`open()`](Self::open).
    pub fn new(config: FleetConfig) -> Self {
        Self::with_notifier(config, Arc::new(NoopNotifier))
    }

    /// Create a session that reports each newly arrived critical alarm to
    /// `notifier`.
    pub fn with_notifier(config: FleetConfig, notifier: Arc<dyn Notifier>) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (alarm_tx, _) = broadcast::channel(ALARM_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Self {
            inner: Arc::new(SessionInner {
                config,
                store: Arc::new(DataStore::new()),
                connection_state,
                alarm_tx,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                cancel: CancellationToken::new(),
                client: Mutex::new(None),
                stream: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
                notifier,
            }),
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open the session.
    ///
    /// Builds the REST client, subscribes to the broker (deltas that
    /// arrive before the snapshot are buffered), spawns the background
    /// tasks, then fetches the initial snapshot.
    ///
    /// A failed initial fetch is returned as an error but leaves the
    /// session open: the stream keeps buffering and [`refresh()`](Self::refresh)
    /// may be retried. Opening a closed session fails with
    /// [`CoreError::SessionClosed`].
    pub async fn open(&self) -> Result<(), CoreError> {
        if self.inner.store.is_closed() {
            return Err(CoreError::SessionClosed);
        }
        if self.inner.client.lock().await.is_some() {
            debug!("session already open");
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        let config = &self.inner.config;

        let client = match FleetClient::new(config.api_url.clone(), &config.transport()) {
            Ok(client) => client,
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                return Err(e.into());
            }
        };
        *self.inner.client.lock().await = Some(client);

        let mut handles = self.inner.task_handles.lock().await;

        if config.websocket_enabled {
            self.spawn_stream(&mut handles).await;
        }

        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            handles.push(tokio::spawn(command_processor_task(
                Arc::downgrade(&self.inner),
                rx,
                self.inner.cancel.clone(),
            )));
        }

        let interval_secs = config.refresh_interval_secs;
        if interval_secs > 0 {
            let cancel = self.inner.cancel.child_token();
            handles.push(tokio::spawn(refresh_task(
                Arc::downgrade(&self.inner),
                interval_secs,
                cancel,
            )));
        }
        drop(handles);

        self.set_state(ConnectionState::Connected);
        info!(api = %config.api_url, "fleet session open");

        self.refresh().await
    }

    /// Subscribe to the broker and spawn the bridge that feeds its events
    /// through normalization into the store.
    async fn spawn_stream(&self, handles: &mut Vec<JoinHandle<()>>) {
        let config = &self.inner.config;
        let cancel = self.inner.cancel.child_token();
        let handle = StreamHandle::connect(
            config.broker_url.clone(),
            config.reconnect.clone(),
            cancel.clone(),
            config.token.clone(),
        );

        let mut event_rx = handle.subscribe();
        let mut state_rx = handle.state();
        let weak = Arc::downgrade(&self.inner);

        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let Some(inner) = weak.upgrade() else { break };
                        let stream_state = *state_rx.borrow_and_update();
                        if let Some(state) = session_state_for(stream_state) {
                            inner.connection_state.send_replace(state);
                        }
                    }
                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => {
                                let Some(inner) = weak.upgrade() else { break };
                                if !handle_broker_event(
                                    &inner.store,
                                    inner.notifier.as_ref(),
                                    &inner.alarm_tx,
                                    &event,
                                ) {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "broker bridge lagged; deltas lost until next refresh");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            debug!("broker bridge stopped");
        }));

        *self.inner.stream.lock().await = Some(handle);
        info!(broker = %config.broker_url, "broker stream spawned (handshake in progress)");
    }

    /// Close the session.
    ///
    /// The store stops accepting events first, so nothing that arrives
    /// during teardown reaches state. Then the broker stream and every
    /// background task are stopped and joined.
    pub async fn close(&self) {
        self.inner.store.close();
        self.inner.cancel.cancel();

        if let Some(stream) = self.inner.stream.lock().await.take() {
            stream.close().await;
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }
        drop(handles);

        *self.inner.client.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
        info!("fleet session closed");
    }

    // ── Snapshot ─────────────────────────────────────────────────

    /// Fetch the device and alarm snapshots and replace the store's maps.
    ///
    /// On failure the previous state is kept and the error is recorded
    /// as the store's `last_error`.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let client = self.client().await?;
        let query = AlarmQuery {
            limit: self.inner.config.alarm_limit,
            ..AlarmQuery::default()
        };

        let (devices_res, alarms_res) =
            tokio::join!(client.list_devices(), client.list_alarms(&query));

        let fetched = devices_res
            .and_then(|devices| alarms_res.map(|alarms| (devices, alarms)))
            .map_err(CoreError::from);
        let (raw_devices, raw_alarms) = match fetched {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "snapshot fetch failed; keeping previous state");
                self.inner.store.record_error(e.to_string());
                return Err(e);
            }
        };

        let devices = convert::devices_from_json(&raw_devices);
        let alarms = convert::alarms_from_json(&raw_alarms);
        let store = &self.inner.store;

        let Some(Outcome::DevicesReplaced { count, replayed }) =
            store.dispatch(FleetEvent::DeviceSnapshot {
                devices,
                at: Utc::now(),
            })
        else {
            return Err(CoreError::SessionClosed);
        };
        debug!(devices = count, replayed, "device snapshot applied");
        let Some(Outcome::AlarmsReplaced { count, retained }) =
            store.dispatch(FleetEvent::AlarmSnapshot(alarms))
        else {
            return Err(CoreError::SessionClosed);
        };
        debug!(alarms = count, retained, "alarm snapshot applied");

        store.clear_error();
        Ok(())
    }

    // ── Alarm acknowledgment ─────────────────────────────────────

    /// Acknowledge one alarm on the backend, then locally.
    pub async fn resolve_alarm(&self, id: &AlarmId) -> Result<CommandResult, CoreError> {
        if self.inner.store.snapshot().alarm(id).is_none() {
            return Err(CoreError::AlarmNotFound {
                identifier: id.to_string(),
            });
        }

        let client = self.client().await?;
        client.resolve_alarm(&id.to_string()).await?;

        let outcome = self
            .inner
            .store
            .dispatch(FleetEvent::AlarmResolved {
                id: id.clone(),
                at: Utc::now(),
            })
            .ok_or(CoreError::SessionClosed)?;

        let count = usize::from(outcome == Outcome::Resolve(ResolveOutcome::Resolved));
        Ok(CommandResult::Resolved { count })
    }

    /// Acknowledge every unresolved alarm, optionally for one device.
    /// Repeating the call is harmless.
    pub async fn resolve_all(
        &self,
        device_id: Option<&DeviceId>,
    ) -> Result<CommandResult, CoreError> {
        if let Some(id) = device_id {
            if self.inner.store.snapshot().device(id).is_none() {
                return Err(CoreError::DeviceNotFound {
                    identifier: id.to_string(),
                });
            }
        }

        let client = self.client().await?;
        let raw_id = device_id.map(ToString::to_string);
        client.resolve_all_alarms(raw_id.as_deref()).await?;

        let outcome = self
            .inner
            .store
            .dispatch(FleetEvent::AllAlarmsResolved {
                device_id: device_id.cloned(),
                at: Utc::now(),
            })
            .ok_or(CoreError::SessionClosed)?;

        let count = match outcome {
            Outcome::ResolvedAll { count } => count,
            _ => 0,
        };
        Ok(CommandResult::Resolved { count })
    }

    // ── Command execution ────────────────────────────────────────

    /// Execute a command through the session's command processor.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if self.inner.store.is_closed() {
            return Err(CoreError::SessionClosed);
        }
        if matches!(
            *self.inner.connection_state.borrow(),
            ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            return Err(CoreError::NotOpen);
        }

        let (tx, rx) = tokio::sync::oneshot::channel();

        self.inner
            .command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::SessionClosed)?;

        rx.await.map_err(|_| CoreError::SessionClosed)?
    }

    // ── One-shot convenience ─────────────────────────────────────

    /// One-shot: open, run closure, close.
    ///
    /// Disables the broker stream and periodic refresh since only a
    /// single request-response cycle is needed.
    pub async fn oneshot<F, Fut, T>(config: FleetConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(FleetSession) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.websocket_enabled = false;
        cfg.refresh_interval_secs = 0;

        let session = FleetSession::new(cfg);
        if let Err(e) = session.open().await {
            session.close().await;
            return Err(e);
        }
        let result = f(session.clone()).await;
        session.close().await;
        result
    }

    // ── State observation ────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Alarms newly arrived over the broker stream (deduplicated).
    pub fn alarm_arrivals(&self) -> broadcast::Receiver<Arc<Alarm>> {
        self.inner.alarm_tx.subscribe()
    }

    /// Broker stream state, when a stream is running.
    pub async fn stream_state(&self) -> Option<watch::Receiver<StreamState>> {
        self.inner.stream.lock().await.as_ref().map(StreamHandle::state)
    }

    pub fn subscribe(&self) -> FleetStream {
        self.inner.store.subscribe()
    }

    pub fn snapshot(&self) -> Arc<FleetState> {
        self.inner.store.snapshot()
    }

    pub fn devices(&self, filter: &DeviceFilter) -> Vec<Device> {
        self.inner.store.devices(filter)
    }

    pub fn alarms(&self, filter: &AlarmFilter) -> Vec<Alarm> {
        self.inner.store.alarms(filter)
    }

    pub fn summary(&self) -> FleetSummary {
        FleetSummary::compute(
            &self.inner.store.snapshot(),
            &self.inner.config.thresholds(),
            Utc::now(),
        )
    }

    // ── Internals ────────────────────────────────────────────────

    fn set_state(&self, state: ConnectionState) {
        self.inner.connection_state.send_replace(state);
    }

    async fn client(&self) -> Result<FleetClient, CoreError> {
        if self.inner.store.is_closed() {
            return Err(CoreError::SessionClosed);
        }
        self.inner
            .client
            .lock()
            .await
            .clone()
            .ok_or(CoreError::NotOpen)
    }
}

// ── Broker bridge ────────────────────────────────────────────────

/// Normalize one broker event and dispatch it.
///
/// Returns `false` once the store is closed. A newly inserted alarm is
/// broadcast to arrival subscribers, and reported to `notifier` when it
/// is an active critical alarm.
fn handle_broker_event(
    store: &DataStore,
    notifier: &dyn Notifier,
    alarm_tx: &broadcast::Sender<Arc<Alarm>>,
    event: &BrokerEvent,
) -> bool {
    let Some(fleet_event) = convert::event_from_broker(event) else {
        return !store.is_closed();
    };
    let arrived = match &fleet_event {
        FleetEvent::AlarmCreated(alarm) => Some(alarm.clone()),
        _ => None,
    };

    match store.dispatch(fleet_event) {
        None => false,
        Some(Outcome::Alarm(AlarmOutcome::Inserted)) => {
            if let Some(alarm) = arrived {
                if classify::should_notify(&alarm) {
                    notifier.notify(&alarm, alarm.severity());
                }
                let _ = alarm_tx.send(Arc::new(alarm));
            }
            true
        }
        Some(outcome) => {
            trace!(event = %event.name, ?outcome, "broker event applied");
            true
        }
    }
}

fn session_state_for(stream: StreamState) -> Option<ConnectionState> {
    match stream {
        StreamState::Connected => Some(ConnectionState::Connected),
        StreamState::Reconnecting { attempt } => Some(ConnectionState::Reconnecting { attempt }),
        StreamState::Connecting | StreamState::Disconnected => None,
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Periodically re-fetch the snapshot.
async fn refresh_task(
    session: Weak<SessionInner>,
    interval_secs: u64,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let Some(inner) = session.upgrade() else { break };
                if let Err(e) = (FleetSession { inner }).refresh().await {
                    warn!(error = %e, "periodic refresh failed");
                }
            }
        }
    }
}

/// Process commands from the mpsc channel one at a time.
async fn command_processor_task(
    session: Weak<SessionInner>,
    mut rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let Some(inner) = session.upgrade() else { break };
                let result = route_command(&FleetSession { inner }, envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

async fn route_command(session: &FleetSession, cmd: Command) -> Result<CommandResult, CoreError> {
    match cmd {
        Command::Refresh => {
            session.refresh().await?;
            let snap = session.snapshot();
            Ok(CommandResult::Refreshed {
                devices: snap.device_count(),
                alarms: snap.alarm_count(),
            })
        }
        Command::ResolveAlarm { id } => session.resolve_alarm(&id).await,
        Command::ResolveAllAlarms { device_id } => session.resolve_all(device_id.as_ref()).await,
    }
}
