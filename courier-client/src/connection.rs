use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    time::Duration,
};

use bytes::BytesMut;
use courier_packets::ControlPacket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::MqttConnection,
    config::MqttConfig,
    error::{MqttError, Result},
    event::{DisconnectCallbackParam, DisconnectReason, OperationType},
    info::CallbackInfo,
    network::{NetworkInterface, SerializerOverrides},
    operation::{self, Operation},
    subscription::SubscriptionRegistry,
};

/// Locks `mutex`, recovering the data if a panicking callback poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifies a connection within its [`Mqtt`](crate::Mqtt) runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounded lookup table from connection handle to connection state.
pub(crate) struct ConnectionTable {
    capacity: usize,
    inner: Mutex<TableInner>,
}

struct TableInner {
    next_id: u64,
    /// `None` marks a slot reserved by a connect still in progress.
    entries: HashMap<ConnectionId, Option<Weak<Shared>>>,
}

impl ConnectionTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(TableInner {
                next_id: 1,
                entries: HashMap::new(),
            }),
        }
    }

    pub(crate) fn reserve(&self) -> Result<ConnectionId> {
        let mut inner = lock(&self.inner);

        inner
            .entries
            .retain(|_, entry| entry.as_ref().map_or(true, |weak| weak.strong_count() > 0));

        if inner.entries.len() >= self.capacity {
            error!(capacity = self.capacity, "No free connection slot.");
            return Err(MqttError::NoFreeSlot);
        }

        let id = ConnectionId(inner.next_id);
        inner.next_id += 1;
        inner.entries.insert(id, None);

        Ok(id)
    }

    pub(crate) fn register(&self, id: ConnectionId, shared: &Arc<Shared>) {
        lock(&self.inner)
            .entries
            .insert(id, Some(Arc::downgrade(shared)));
    }

    pub(crate) fn release(&self, id: ConnectionId) {
        lock(&self.inner).entries.remove(&id);
    }

    pub(crate) fn get(&self, id: ConnectionId) -> Option<Arc<Shared>> {
        lock(&self.inner)
            .entries
            .get(&id)
            .and_then(|entry| entry.as_ref())
            .and_then(Weak::upgrade)
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }
}

/// Which queue an operation waits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Queue {
    /// Being written to the network, completes once sent.
    PendingProcessing,
    /// Sent, waiting for the server's acknowledgment.
    PendingResponse,
}

struct State {
    disconnected: bool,
    handle_released: bool,
    /// Outstanding operations, scheduled callbacks, keep-alive and the
    /// caller's handle. Storage is released when this drops to zero.
    references: usize,
    pending_processing: VecDeque<Arc<Operation>>,
    pending_response: VecDeque<Arc<Operation>>,
    keep_alive_failure: bool,
}

pub(crate) struct Shared {
    pub(crate) id: ConnectionId,
    pub(crate) aws_iot_mqtt_mode: bool,
    pub(crate) keep_alive: Duration,
    pub(crate) config: MqttConfig,
    network: Arc<dyn NetworkInterface>,
    pub(crate) serializer: SerializerOverrides,
    disconnect_callback: Option<CallbackInfo<DisconnectCallbackParam>>,
    state: Mutex<State>,
    pub(crate) subscriptions: Mutex<SubscriptionRegistry>,
    next_packet_id: AtomicU16,
    pub(crate) shutdown: CancellationToken,
    table: Weak<ConnectionTable>,
}

pub(crate) struct SharedParams {
    pub(crate) id: ConnectionId,
    pub(crate) aws_iot_mqtt_mode: bool,
    pub(crate) keep_alive: Duration,
    pub(crate) config: MqttConfig,
    pub(crate) network: Arc<dyn NetworkInterface>,
    pub(crate) serializer: SerializerOverrides,
    pub(crate) disconnect_callback: Option<CallbackInfo<DisconnectCallbackParam>>,
    pub(crate) table: Weak<ConnectionTable>,
}

impl Shared {
    pub(crate) fn new(params: SharedParams) -> Self {
        let max_subscriptions = params.config.max_subscriptions;

        Self {
            id: params.id,
            aws_iot_mqtt_mode: params.aws_iot_mqtt_mode,
            keep_alive: params.keep_alive,
            config: params.config,
            network: params.network,
            serializer: params.serializer,
            disconnect_callback: params.disconnect_callback,
            state: Mutex::new(State {
                disconnected: false,
                handle_released: false,
                references: 1,
                pending_processing: VecDeque::new(),
                pending_response: VecDeque::new(),
                keep_alive_failure: false,
            }),
            subscriptions: Mutex::new(SubscriptionRegistry::new(max_subscriptions)),
            next_packet_id: AtomicU16::new(1),
            shutdown: CancellationToken::new(),
            table: params.table,
        }
    }

    pub(crate) fn network(&self) -> &dyn NetworkInterface {
        self.network.as_ref()
    }

    /// Odd identifiers only, so zero is never produced even after wrapping.
    pub(crate) fn next_packet_id(&self) -> u16 {
        self.next_packet_id.fetch_add(2, Ordering::Relaxed)
    }

    pub(crate) fn is_disconnected(&self) -> bool {
        lock(&self.state).disconnected
    }

    pub(crate) fn references(&self) -> usize {
        lock(&self.state).references
    }

    /// Takes a reference unless the connection is closing.
    pub(crate) fn increment_references(&self) -> bool {
        let mut state = lock(&self.state);

        if state.disconnected {
            return false;
        }

        state.references += 1;
        true
    }

    pub(crate) fn decrement_references(&self) {
        let remaining = {
            let mut state = lock(&self.state);
            state.references = state.references.saturating_sub(1);
            state.references
        };

        if remaining == 0 {
            self.destroy();
        }
    }

    /// Drops the reference owned by the caller's handle. Only the first call counts.
    pub(crate) fn release_handle(&self) {
        let release = {
            let mut state = lock(&self.state);
            !std::mem::replace(&mut state.handle_released, true)
        };

        if release {
            self.decrement_references();
        }
    }

    fn destroy(&self) {
        debug!(connection = %self.id, "Releasing connection.");

        self.shutdown.cancel();
        lock(&self.subscriptions).clear();

        if let Some(table) = self.table.upgrade() {
            table.release(self.id);
        }
    }

    pub(crate) fn set_keep_alive_failure(&self, failed: bool) {
        lock(&self.state).keep_alive_failure = failed;
    }

    pub(crate) fn keep_alive_failure(&self) -> bool {
        lock(&self.state).keep_alive_failure
    }

    pub(crate) fn enqueue(&self, queue: Queue, operation: Arc<Operation>) -> Result<()> {
        let mut state = lock(&self.state);

        if state.disconnected {
            return Err(MqttError::NetworkError("connection is closed".into()));
        }

        match queue {
            Queue::PendingProcessing => state.pending_processing.push_back(operation),
            Queue::PendingResponse => state.pending_response.push_back(operation),
        }

        Ok(())
    }

    /// Removes `operation` from whichever queue holds it.
    pub(crate) fn remove_operation(&self, operation: &Arc<Operation>) -> bool {
        let removed = {
            let mut state = lock(&self.state);

            match state.pending_processing.iter().position(|op| Arc::ptr_eq(op, operation)) {
                Some(index) => state.pending_processing.remove(index),
                None => state
                    .pending_response
                    .iter()
                    .position(|op| Arc::ptr_eq(op, operation))
                    .and_then(|index| state.pending_response.remove(index)),
            }
        };

        removed.is_some()
    }

    /// Removes the oldest queued operation of `kind` awaiting a response,
    /// matched on packet identifier when one is given.
    pub(crate) fn take_pending_response(
        &self,
        kind: OperationType,
        packet_id: Option<u16>,
    ) -> Option<Arc<Operation>> {
        let mut state = lock(&self.state);

        let index = state.pending_response.iter().position(|op| {
            op.kind == kind && packet_id.map_or(true, |id| op.packet_id() == Some(id))
        })?;

        state.pending_response.remove(index)
    }

    pub(crate) fn serialize(&self, packet: &ControlPacket) -> Result<BytesMut> {
        let serialized = match &self.serializer.serialize {
            Some(serialize) => serialize(packet),
            None => packet.serialize(),
        };

        serialized.map_err(|err| {
            error!(packet_type = %packet.packet_type(), "Failed to serialize packet: {}", err);
            MqttError::from(err)
        })
    }

    pub(crate) async fn send(&self, bytes: &[u8]) -> Result<()> {
        let sent = self.network.send(bytes).await?;

        if sent != bytes.len() {
            return Err(MqttError::NetworkError(format!(
                "sent {} of {} bytes",
                sent,
                bytes.len()
            )));
        }

        Ok(())
    }

    /// Queues `operation` and writes its packet.
    ///
    /// Operations that expect an acknowledgment are queued before the write
    /// so that a fast response always finds them. The rest complete as soon
    /// as the write succeeds. On error the operation is dequeued and not
    /// notified.
    pub(crate) async fn send_operation(self: &Arc<Self>, operation: Arc<Operation>) -> Result<()> {
        let awaits_response = operation.awaits_response();
        let queue = if awaits_response {
            Queue::PendingResponse
        } else {
            Queue::PendingProcessing
        };

        self.enqueue(queue, Arc::clone(&operation))?;

        let Some(bytes) = operation.packet() else {
            self.remove_operation(&operation);
            return Err(MqttError::Mqtt("operation has no packet".into()));
        };

        debug!(
            operation = %operation.kind,
            packet_id = ?operation.packet_id(),
            "Sending operation."
        );

        if let Err(err) = self.send(&bytes).await {
            error!(operation = %operation.kind, "Failed to send operation: {}", err);
            self.remove_operation(&operation);
            return Err(err);
        }

        if !awaits_response {
            self.remove_operation(&operation);
            operation.complete(Ok(()));
        } else if operation.has_retry() {
            operation::schedule_retry(Arc::clone(self), operation);
        }

        Ok(())
    }

    /// Closes the network link and reports `reason` to the disconnect callback.
    pub(crate) async fn close_network(self: &Arc<Self>, reason: DisconnectReason) {
        self.close(Some(reason)).await
    }

    /// Closes the network link without notifying the application.
    pub(crate) async fn abort(self: &Arc<Self>) {
        self.close(None).await
    }

    async fn close(self: &Arc<Self>, reason: Option<DisconnectReason>) {
        let drained: Vec<Arc<Operation>> = {
            let mut state = lock(&self.state);

            if std::mem::replace(&mut state.disconnected, true) {
                return;
            }

            let processing = std::mem::take(&mut state.pending_processing);
            let response = std::mem::take(&mut state.pending_response);
            processing.into_iter().chain(response).collect()
        };

        info!(connection = %self.id, reason = ?reason, "Closing network connection.");
        self.shutdown.cancel();

        if self.network.supports_close() {
            if let Err(err) = self.network.close().await {
                warn!(connection = %self.id, "Failed to close network connection: {}", err);
            }
        }

        for operation in drained {
            operation.complete(Err(MqttError::NetworkError("connection closed".into())));
        }

        if let (Some(reason), Some(callback)) = (reason, &self.disconnect_callback) {
            callback.invoke(DisconnectCallbackParam {
                connection: MqttConnection::from_shared(Arc::clone(self)),
                reason,
            });
        }
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("id", &self.id)
            .field("aws_iot_mqtt_mode", &self.aws_iot_mqtt_mode)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_connection, MockNetwork};

    fn shared() -> (Arc<ConnectionTable>, Arc<Shared>) {
        test_connection(Arc::new(MockNetwork::new()), MqttConfig::default(), SerializerOverrides::default())
    }

    #[test]
    fn test_table_capacity() {
        let table = Arc::new(ConnectionTable::new(2));

        let first = table.reserve().unwrap();
        let second = table.reserve().unwrap();
        assert_ne!(first, second);
        assert_eq!(table.reserve(), Err(MqttError::NoFreeSlot));

        table.release(first);
        assert!(table.reserve().is_ok());
    }

    #[test]
    fn test_packet_ids_skip_zero() {
        let (_table, shared) = shared();

        assert_eq!(shared.next_packet_id(), 1);
        assert_eq!(shared.next_packet_id(), 3);

        shared.next_packet_id.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(shared.next_packet_id(), u16::MAX);
        assert_eq!(shared.next_packet_id(), 1);
    }

    #[test]
    fn test_last_reference_releases_slot() {
        let (table, shared) = shared();

        assert!(table.get(shared.id).is_some());
        assert!(shared.increment_references());
        assert_eq!(shared.references(), 2);

        shared.release_handle();
        shared.release_handle();
        assert_eq!(shared.references(), 1);
        assert_eq!(table.len(), 1);

        shared.decrement_references();
        assert_eq!(table.len(), 0);
        assert!(shared.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_references() {
        let (_table, shared) = shared();

        shared.abort().await;

        assert!(shared.is_disconnected());
        assert!(!shared.increment_references());
        assert_eq!(shared.references(), 1);
    }

    #[test]
    fn test_remove_operation_from_either_queue() {
        let (_table, shared) = shared();
        let operation = |kind| {
            Arc::new(Operation::new(&shared, kind, crate::info::OperationFlags::empty(), None).unwrap())
        };

        let processing = operation(OperationType::PingReq);
        let response = operation(OperationType::Subscribe);
        shared.enqueue(Queue::PendingProcessing, Arc::clone(&processing)).unwrap();
        shared.enqueue(Queue::PendingResponse, Arc::clone(&response)).unwrap();

        assert!(shared.remove_operation(&response));
        assert!(!shared.remove_operation(&response));
        assert!(shared.take_pending_response(OperationType::Subscribe, None).is_none());

        assert!(shared.remove_operation(&processing));
        assert!(!shared.remove_operation(&processing));

        drop((processing, response));
        assert_eq!(shared.references(), 1);
    }
}
