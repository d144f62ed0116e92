//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Client subscriptions, keep-alive timers and periodic stream pushes."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use cad_common::config::BrokerConfig;
use cad_common::schedule::{spawn_periodic, PeriodicTask};
use cad_common::time::epoch_millis;
use cad_device::SharedDevice;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::error::BrokerError;
use crate::payload::{resolve_stream, StreamPayload};
use crate::query::{parse_query, Query};
use crate::session::{ClientHandle, ClientId, ClientSession, ConnectionState, Termination};

/// Counters from one [`StreamBroker::broadcast_tick`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Payloads queued for delivery.
    pub pushed: usize,
    /// Payloads discarded because a client queue was full.
    pub dropped: usize,
    /// Clients removed because their transport had gone away.
    pub closed: usize,
}

/// Registry of connected clients and the pushes they subscribed to.
///
/// Cloning yields another handle to the same registry. Keep-alive timers run
/// as tokio tasks, so clients must be connected from within a runtime.
#[derive(Clone)]
pub struct StreamBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    device: SharedDevice,
    settings: BrokerConfig,
    clients: Mutex<HashMap<ClientId, ClientSession>>,
}

impl StreamBroker {
    pub fn new(device: SharedDevice, settings: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                device,
                settings,
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &BrokerConfig {
        &self.inner.settings
    }

    /// Register a new client in the `Connected` state with its keep-alive armed.
    pub fn connect(&self) -> ClientHandle {
        let id = ClientId::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.inner.settings.outbound_capacity);
        let (termination_tx, termination_rx) = oneshot::channel();
        let mut session = ClientSession::new(outbound_tx, termination_tx);
        self.arm_keep_alive(id, &mut session);
        self.inner.clients.lock().insert(id, session);
        info!(client_id = %id, "client connected");
        ClientHandle {
            id,
            outbound: outbound_rx,
            termination: termination_rx,
        }
    }

    /// Discard all state for `id`, cancelling its keep-alive.
    ///
    /// Returns `false` when the client was already gone.
    pub fn disconnect(&self, id: ClientId) -> bool {
        let removed = self.inner.clients.lock().remove(&id);
        match removed {
            Some(session) => {
                info!(
                    client_id = %id,
                    state = ?session.state,
                    subscriptions = session.subscriptions.len(),
                    "client disconnected"
                );
                true
            }
            None => false,
        }
    }

    /// Handle one inbound text frame.
    ///
    /// Malformed input is logged and contributes nothing: no subscriptions and
    /// no keep-alive reset. It never closes the connection.
    pub fn handle_message(&self, id: ClientId, raw: &str) {
        if self.inner.settings.echo_messages {
            self.push(id, format!("Message received {raw}"));
        }
        let query = match parse_query(raw) {
            Ok(query) => query,
            Err(err) => {
                warn!(client_id = %id, error = %err, "malformed query treated as empty");
                return;
            }
        };
        if let Err(err) = self.handle_query(id, query) {
            debug!(client_id = %id, error = %err, "query ignored");
        }
    }

    /// Apply a well-formed query: reset the keep-alive, then subscribe each stream.
    pub fn handle_query(&self, id: ClientId, query: Query) -> Result<(), BrokerError> {
        let mut clients = self.inner.clients.lock();
        let session = clients.get_mut(&id).ok_or(BrokerError::UnknownClient(id))?;
        self.rearm(id, session)?;
        session.state = ConnectionState::Active;
        debug!(client_id = %id, action = %query.action, streams = query.streams.len(), "query received");
        for name in query.streams {
            add_subscription(id, session, name);
        }
        Ok(())
    }

    /// Add `name` to the client's subscriptions; returns `true` if it was new.
    pub fn subscribe(&self, id: ClientId, name: &str) -> Result<bool, BrokerError> {
        let mut clients = self.inner.clients.lock();
        let session = clients.get_mut(&id).ok_or(BrokerError::UnknownClient(id))?;
        Ok(add_subscription(id, session, name.to_owned()))
    }

    /// Cancel the client's keep-alive and arm a fresh one.
    ///
    /// Fails once the timer has fired: an expired client is never revived.
    pub fn reset_keep_alive(&self, id: ClientId) -> Result<(), BrokerError> {
        let mut clients = self.inner.clients.lock();
        let session = clients.get_mut(&id).ok_or(BrokerError::UnknownClient(id))?;
        self.rearm(id, session)
    }

    /// Push one fresh payload per subscription to every live client.
    pub fn broadcast_tick(&self) -> BroadcastReport {
        let targets: Vec<(ClientId, mpsc::Sender<String>, Vec<String>)> = {
            let clients = self.inner.clients.lock();
            clients
                .iter()
                .filter(|(_, session)| session.state.is_live() && !session.subscriptions.is_empty())
                .map(|(id, session)| {
                    (
                        *id,
                        session.outbound.clone(),
                        session.subscriptions.iter().cloned().collect(),
                    )
                })
                .collect()
        };

        let mut report = BroadcastReport::default();
        let mut gone = Vec::new();
        for (id, sender, streams) in targets {
            for name in streams {
                let payload = self.resolve_stream(&name);
                let text = match serde_json::to_string(&payload) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(client_id = %id, stream = %name, error = %err, "failed to serialise stream payload");
                        continue;
                    }
                };
                match sender.try_send(text) {
                    Ok(()) => report.pushed += 1,
                    Err(TrySendError::Full(_)) => {
                        report.dropped += 1;
                        warn!(client_id = %id, stream = %name, "client queue full; dropping update");
                    }
                    Err(TrySendError::Closed(_)) => {
                        gone.push(id);
                        break;
                    }
                }
            }
        }
        for id in gone {
            if self.disconnect(id) {
                report.closed += 1;
            }
        }
        report
    }

    /// Snapshot the device view selected by `name`.
    pub fn resolve_stream(&self, name: &str) -> StreamPayload {
        let device = self.inner.device.read();
        resolve_stream(name, &device, epoch_millis())
    }

    /// Close every client without a notice, cancelling all keep-alives.
    pub fn shutdown_clients(&self) {
        let drained: Vec<(ClientId, ClientSession)> = self.inner.clients.lock().drain().collect();
        let count = drained.len();
        for (_, mut session) in drained {
            session.state = ConnectionState::Closed;
            session.terminate(Termination::ServerShutdown);
        }
        info!(clients = count, "all clients closed");
    }

    /// Current lifecycle state; `Closed` once the client has been discarded.
    pub fn state(&self, id: ClientId) -> ConnectionState {
        self.inner
            .clients
            .lock()
            .get(&id)
            .map(|session| session.state)
            .unwrap_or(ConnectionState::Closed)
    }

    /// Subscribed stream names in subscription order.
    pub fn subscriptions(&self, id: ClientId) -> Option<Vec<String>> {
        self.inner
            .clients
            .lock()
            .get(&id)
            .map(|session| session.subscriptions.iter().cloned().collect())
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().len()
    }

    fn push(&self, id: ClientId, text: String) {
        let sender = self
            .inner
            .clients
            .lock()
            .get(&id)
            .map(|session| session.outbound.clone());
        if let Some(sender) = sender {
            if let Err(err) = sender.try_send(text) {
                debug!(client_id = %id, error = %err, "direct push dropped");
            }
        }
    }

    fn rearm(&self, id: ClientId, session: &mut ClientSession) -> Result<(), BrokerError> {
        if !session.state.is_live() {
            return Err(BrokerError::KeepAliveExpired(id));
        }
        self.arm_keep_alive(id, session);
        Ok(())
    }

    fn arm_keep_alive(&self, id: ClientId, session: &mut ClientSession) {
        session.generation += 1;
        let generation = session.generation;
        let timeout = self.inner.settings.keep_alive_timeout;
        let broker: Weak<BrokerInner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = broker.upgrade() {
                StreamBroker { inner }.expire(id, generation);
            }
        });
        session.replace_keep_alive(timer);
        trace!(client_id = %id, generation, "keep-alive armed");
    }

    /// Timer callback; ignored if the timer was rearmed or the client left.
    fn expire(&self, id: ClientId, generation: u64) {
        let mut clients = self.inner.clients.lock();
        let Some(session) = clients.get_mut(&id) else {
            return;
        };
        if session.generation != generation || !session.state.is_live() {
            return;
        }
        session.state = ConnectionState::TimedOut;
        session.terminate(Termination::KeepAliveExpired {
            notice: self.inner.settings.timeout_notice.clone(),
        });
        info!(
            client_id = %id,
            timeout_ms = self.inner.settings.keep_alive_timeout.as_millis() as u64,
            "keep-alive expired; closing client"
        );
    }
}

fn add_subscription(id: ClientId, session: &mut ClientSession, name: String) -> bool {
    if session.subscriptions.contains(&name) {
        return false;
    }
    info!(client_id = %id, stream = %name, "stream subscribed");
    session.subscriptions.insert(name)
}

/// Run [`StreamBroker::broadcast_tick`] every `period`.
pub fn spawn_broadcaster(broker: StreamBroker, period: Duration) -> PeriodicTask {
    spawn_periodic("broadcast-tick", period, move || {
        let report = broker.broadcast_tick();
        if report.pushed + report.dropped + report.closed > 0 {
            trace!(
                pushed = report.pushed,
                dropped = report.dropped,
                closed = report.closed,
                "broadcast tick"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cad_device::{DeviceParameters, SequenceSource, TelemetryDevice};
    use tokio::sync::oneshot::error::TryRecvError;

    const LIVE: &str = r#"{"action":"subscribe","streams":["activePower.live"]}"#;

    fn settings() -> BrokerConfig {
        BrokerConfig {
            outbound_capacity: 4,
            ..BrokerConfig::default()
        }
    }

    fn broker_with(settings: BrokerConfig) -> StreamBroker {
        let device = TelemetryDevice::new(
            DeviceParameters::default(),
            400,
            Box::new(SequenceSource::new(vec![0.61, 0.08, 0.35, 0.77])),
        )
        .into_shared();
        StreamBroker::new(device, settings)
    }

    fn broker() -> StreamBroker {
        broker_with(settings())
    }

    fn expired_notice() -> Termination {
        Termination::KeepAliveExpired {
            notice: "Connection Timing Out".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_subscriptions_push_once_per_tick() {
        let broker = broker();
        let mut client = broker.connect();
        broker.handle_message(
            client.id,
            r#"{"action":"subscribe","streams":["activePower.live","activePower.live"]}"#,
        );
        broker.handle_message(client.id, LIVE);
        assert_eq!(
            broker.subscriptions(client.id).unwrap(),
            vec!["activePower.live".to_owned()]
        );

        let report = broker.broadcast_tick();
        assert_eq!(report.pushed, 1);
        let text = client.outbound.try_recv().unwrap();
        assert!(client.outbound.try_recv().is_err());

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["stream"], "activePower.live");
        assert_eq!(value["payload"]["readings"].as_array().unwrap().len(), 30);
        assert!(value["payload"]["lastUpdated"].is_i64());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_is_idempotent() {
        let broker = broker();
        let client = broker.connect();
        assert_eq!(broker.subscribe(client.id, "currentCostsSmets2"), Ok(true));
        assert_eq!(broker.subscribe(client.id, "currentCostsSmets2"), Ok(false));
        assert_eq!(broker.subscriptions(client.id).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_text_neither_closes_nor_subscribes() {
        let broker = broker();
        let mut client = broker.connect();
        broker.handle_message(client.id, "not json");
        broker.handle_message(client.id, r#"{"streams":"activePower"}"#);

        assert_eq!(broker.state(client.id), ConnectionState::Connected);
        assert!(broker.subscriptions(client.id).unwrap().is_empty());
        assert_eq!(broker.broadcast_tick(), BroadcastReport::default());
        assert!(client.outbound.try_recv().is_err());
        assert_eq!(client.termination.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn well_formed_query_activates_client() {
        let broker = broker();
        let client = broker.connect();
        broker.handle_message(client.id, r#"{"action":"ping","streams":[]}"#);
        assert_eq!(broker.state(client.id), ConnectionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_client_times_out_once() {
        let broker = broker();
        let mut client = broker.connect();

        tokio::time::sleep(Duration::from_millis(14_999)).await;
        assert_eq!(client.termination.try_recv(), Err(TryRecvError::Empty));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(client.termination.try_recv(), Ok(expired_notice()));
        assert_eq!(broker.state(client.id), ConnectionState::TimedOut);

        // an expired timer is never rearmed
        assert_eq!(
            broker.reset_keep_alive(client.id),
            Err(BrokerError::KeepAliveExpired(client.id))
        );
        broker.handle_message(client.id, LIVE);
        assert!(broker.subscriptions(client.id).unwrap().is_empty());

        assert!(broker.disconnect(client.id));
        assert_eq!(broker.state(client.id), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn query_before_expiry_resets_timer() {
        let broker = broker();
        let mut client = broker.connect();

        tokio::time::sleep(Duration::from_secs(14)).await;
        broker.handle_message(client.id, LIVE);

        tokio::time::sleep(Duration::from_millis(1_001)).await;
        assert_eq!(client.termination.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(broker.state(client.id), ConnectionState::Active);

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(client.termination.try_recv(), Ok(expired_notice()));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_text_does_not_reset_timer() {
        let broker = broker();
        let mut client = broker.connect();

        tokio::time::sleep(Duration::from_secs(10)).await;
        broker.handle_message(client.id, "not json");

        tokio::time::sleep(Duration::from_millis(5_001)).await;
        assert_eq!(client.termination.try_recv(), Ok(expired_notice()));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_clients_receive_no_pushes() {
        let broker = broker();
        let mut client = broker.connect();
        broker.handle_message(client.id, LIVE);
        tokio::time::sleep(Duration::from_millis(15_001)).await;

        assert_eq!(broker.state(client.id), ConnectionState::TimedOut);
        assert_eq!(broker.broadcast_tick().pushed, 0);
        assert!(client.outbound.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_keep_alive() {
        let broker = broker();
        let mut client = broker.connect();
        assert!(broker.disconnect(client.id));
        assert!(!broker.disconnect(client.id));

        tokio::time::sleep(Duration::from_secs(30)).await;
        // sender dropped with the session; no notice was ever sent
        assert_eq!(client.termination.try_recv(), Err(TryRecvError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn clients_are_isolated() {
        let broker = broker();
        let mut live = broker.connect();
        let mut costs = broker.connect();
        broker.handle_message(live.id, LIVE);
        broker.handle_message(
            costs.id,
            r#"{"action":"subscribe","streams":["currentCostsSmets2","unknownStream"]}"#,
        );

        assert_eq!(broker.broadcast_tick().pushed, 3);
        assert!(live.outbound.try_recv().is_ok());
        assert!(live.outbound.try_recv().is_err());

        let first: serde_json::Value =
            serde_json::from_str(&costs.outbound.try_recv().unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&costs.outbound.try_recv().unwrap()).unwrap();
        assert_eq!(first["stream"], "currentCostsSmets2");
        assert_eq!(first["payload"]["readings"].as_array().unwrap().len(), 3);
        assert_eq!(second["stream"], "unknownStream");
        assert!(second["payload"]["readings"].as_array().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_transport_is_pruned_without_affecting_others() {
        let broker = broker();
        let dead = broker.connect();
        let mut alive = broker.connect();
        broker.handle_message(dead.id, LIVE);
        broker.handle_message(alive.id, LIVE);
        let dead_id = dead.id;
        drop(dead);

        let report = broker.broadcast_tick();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.closed, 1);
        assert_eq!(broker.state(dead_id), ConnectionState::Closed);
        assert_eq!(broker.client_count(), 1);
        assert!(alive.outbound.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_drops_instead_of_blocking() {
        let broker = broker();
        let client = broker.connect();
        broker.handle_message(client.id, LIVE);
        for _ in 0..4 {
            assert_eq!(broker.broadcast_tick().pushed, 1);
        }
        let report = broker.broadcast_tick();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.dropped, 1);
        assert_eq!(broker.state(client.id), ConnectionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn echo_acknowledges_raw_text_when_enabled() {
        let broker = broker_with(BrokerConfig {
            echo_messages: true,
            ..settings()
        });
        let mut client = broker.connect();
        broker.handle_message(client.id, "not json");
        assert_eq!(
            client.outbound.try_recv().unwrap(),
            "Message received not json"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_every_client() {
        let broker = broker();
        let mut a = broker.connect();
        let mut b = broker.connect();
        broker.shutdown_clients();
        assert_eq!(broker.client_count(), 0);
        assert_eq!(a.termination.try_recv(), Ok(Termination::ServerShutdown));
        assert_eq!(b.termination.try_recv(), Ok(Termination::ServerShutdown));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(broker.state(a.id), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn broadcaster_pushes_every_period() {
        let broker = broker();
        let mut client = broker.connect();
        broker.handle_message(client.id, LIVE);
        let task = spawn_broadcaster(broker.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let mut received = 0;
        while client.outbound.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
        task.shutdown().await.unwrap();
    }
}
