use std::{
    fmt,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use courier_packets::publish;
use tokio::{sync::Semaphore, time};
use tracing::{debug, info, warn};

use crate::{
    client::MqttConnection,
    connection::{lock, Shared},
    error::{MqttError, Result},
    event::{CallbackParam, OperationType},
    info::{CallbackInfo, OperationFlags},
    network::FreePacketFn,
    subscription::PacketMatch,
    validate,
};

/// Progress of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Success,
    Failed(MqttError),
}

impl OperationStatus {
    fn result(&self) -> Option<Result<()>> {
        match self {
            OperationStatus::Pending => None,
            OperationStatus::Success => Some(Ok(())),
            OperationStatus::Failed(err) => Some(Err(err.clone())),
        }
    }
}

enum Notification {
    Waitable(Semaphore),
    Callback(CallbackInfo<CallbackParam>),
    None,
}

#[derive(Debug, Default)]
struct Retry {
    limit: u32,
    interval: Duration,
    attempts: u32,
}

struct OperationState {
    status: OperationStatus,
    packet: Option<BytesMut>,
    retry: Retry,
    holds_reference: bool,
}

/// One outstanding request to the server.
pub(crate) struct Operation {
    pub(crate) kind: OperationType,
    flags: OperationFlags,
    qos1: bool,
    notification: Notification,
    connection: Weak<Shared>,
    /// Zero when the packet carries no identifier.
    packet_id: AtomicU16,
    /// Topic filters of an UNSUBSCRIBE.
    filters: Vec<String>,
    state: Mutex<OperationState>,
    free_packet: Option<FreePacketFn>,
}

impl Operation {
    /// Creates an operation holding one reference on `shared`.
    pub(crate) fn new(
        shared: &Arc<Shared>,
        kind: OperationType,
        flags: OperationFlags,
        callback: Option<CallbackInfo<CallbackParam>>,
    ) -> Result<Operation> {
        if !shared.increment_references() {
            return Err(MqttError::NetworkError("connection is closed".into()));
        }

        let notification = match callback {
            _ if flags.contains(OperationFlags::WAITABLE) => Notification::Waitable(Semaphore::new(0)),
            Some(callback) => Notification::Callback(callback),
            None => Notification::None,
        };

        let free_packet = shared
            .serializer
            .serialize
            .as_ref()
            .and(shared.serializer.free_packet.clone());

        debug!(operation = %kind, "Created operation.");

        Ok(Operation {
            kind,
            flags,
            qos1: false,
            notification,
            connection: Arc::downgrade(shared),
            packet_id: AtomicU16::new(0),
            filters: Vec::new(),
            state: Mutex::new(OperationState {
                status: OperationStatus::Pending,
                packet: None,
                retry: Retry::default(),
                holds_reference: true,
            }),
            free_packet,
        })
    }

    pub(crate) fn set_packet(&mut self, packet: BytesMut, packet_id: Option<u16>) {
        self.packet_id.store(packet_id.unwrap_or(0), Ordering::Relaxed);
        self.qos1 = packet_id.is_some();
        lock(&self.state).packet = Some(packet);
    }

    pub(crate) fn set_retry(&mut self, limit: u32, interval: Duration) {
        lock(&self.state).retry = Retry {
            limit,
            interval,
            attempts: 0,
        };
    }

    pub(crate) fn set_filters(&mut self, filters: Vec<String>) {
        self.filters = filters;
    }

    pub(crate) fn packet_id(&self) -> Option<u16> {
        match self.packet_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }

    pub(crate) fn packet(&self) -> Option<Bytes> {
        lock(&self.state)
            .packet
            .as_ref()
            .map(|packet| Bytes::copy_from_slice(packet))
    }

    pub(crate) fn awaits_response(&self) -> bool {
        self.kind.awaits_response(self.qos1)
    }

    pub(crate) fn has_retry(&self) -> bool {
        lock(&self.state).retry.limit > 0
    }

    pub(crate) fn status(&self) -> OperationStatus {
        lock(&self.state).status.clone()
    }

    /// Records the outcome and notifies the caller. Only the first call has
    /// any effect; it returns false for the others.
    pub(crate) fn complete(self: &Arc<Self>, result: Result<()>) -> bool {
        {
            let mut state = lock(&self.state);

            if state.status != OperationStatus::Pending {
                return false;
            }

            state.status = match &result {
                Ok(()) => OperationStatus::Success,
                Err(err) => OperationStatus::Failed(err.clone()),
            };
        }

        match &result {
            Ok(()) => debug!(operation = %self.kind, packet_id = ?self.packet_id(), "Operation complete."),
            Err(err) => info!(
                operation = %self.kind,
                packet_id = ?self.packet_id(),
                "Operation failed: {}", err
            ),
        }

        let Some(shared) = self.connection.upgrade() else {
            return true;
        };

        self.apply_registry_changes(&shared, &result);

        match &self.notification {
            Notification::Waitable(semaphore) => {
                semaphore.add_permits(1);
                self.release_reference(&shared);
            }
            Notification::Callback(callback) => {
                let callback = callback.clone();
                let operation = Arc::clone(self);
                let param = CallbackParam {
                    connection: MqttConnection::from_shared(Arc::clone(&shared)),
                    operation: self.kind,
                    result,
                };

                shared.config.callback_dispatch.run(move || {
                    callback.invoke(param);

                    if let Some(shared) = operation.connection.upgrade() {
                        operation.release_reference(&shared);
                    }
                });
            }
            Notification::None => self.release_reference(&shared),
        }

        true
    }

    fn apply_registry_changes(&self, shared: &Shared, result: &Result<()>) {
        match (self.kind, result) {
            // A refused SUBACK has already removed the rejected filters.
            (OperationType::Subscribe, Err(err)) if *err != MqttError::ServerRefused => {
                if let Some(packet_id) = self.packet_id() {
                    lock(&shared.subscriptions).remove_all_matches(PacketMatch {
                        packet_id,
                        order: None,
                    });
                }
            }
            (OperationType::Unsubscribe, Ok(())) => {
                lock(&shared.subscriptions).remove_by_topic_filter(&self.filters);
            }
            _ => {}
        }
    }

    fn release_reference(&self, shared: &Shared) {
        let held = std::mem::replace(&mut lock(&self.state).holds_reference, false);

        if held {
            shared.decrement_references();
        }
    }

    /// Prepares the next retransmission, or returns `None` once the retry
    /// limit is used up.
    fn next_retry(&self, new_packet_id: Option<u16>) -> Option<Bytes> {
        let mut state = lock(&self.state);

        if state.retry.attempts >= state.retry.limit {
            return None;
        }
        state.retry.attempts += 1;

        let packet = state.packet.as_mut()?;
        match new_packet_id {
            Some(packet_id) => {
                if let Err(err) = publish::replace_packet_id(packet, packet_id) {
                    warn!("Cannot assign a new packet identifier for retry: {}", err);
                    return None;
                }
                self.packet_id.store(packet_id, Ordering::Relaxed);
            }
            None => publish::set_dup(packet),
        }

        Some(Bytes::copy_from_slice(packet))
    }

    fn retry_interval(&self) -> Duration {
        lock(&self.state).retry.interval
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let (Some(free_packet), Some(packet)) = (&self.free_packet, state.packet.take()) {
            free_packet(packet.freeze());
        }

        if state.holds_reference {
            state.holds_reference = false;

            if let Some(shared) = self.connection.upgrade() {
                shared.decrement_references();
            }
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("packet_id", &self.packet_id())
            .finish_non_exhaustive()
    }
}

/// Resends an unacknowledged PUBLISH every retry interval. When the limit is
/// reached and one more interval passes without a PUBACK, the operation
/// times out.
pub(crate) fn schedule_retry(shared: Arc<Shared>, operation: Arc<Operation>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shared.shutdown.cancelled() => return,
                _ = time::sleep(operation.retry_interval()) => {}
            }

            if operation.status() != OperationStatus::Pending {
                return;
            }

            let new_packet_id = shared.aws_iot_mqtt_mode.then(|| shared.next_packet_id());

            let Some(packet) = operation.next_retry(new_packet_id) else {
                info!(operation = %operation.kind, packet_id = ?operation.packet_id(), "Retry limit reached.");
                shared.remove_operation(&operation);
                operation.complete(Err(MqttError::Timeout));
                return;
            };

            debug!(packet_id = ?operation.packet_id(), "Retrying PUBLISH.");

            if let Err(err) = shared.send(&packet).await {
                warn!(packet_id = ?operation.packet_id(), "Failed to resend PUBLISH: {}", err);
            }
        }
    });
}

/// Returned by the operation APIs. Waitable operations can be waited on.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    operation: Arc<Operation>,
}

impl OperationHandle {
    pub(crate) fn new(operation: Arc<Operation>) -> Self {
        Self { operation }
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation.kind
    }

    pub fn status(&self) -> OperationStatus {
        self.operation.status()
    }

    /// Blocks until the operation completes or `timeout` elapses. A timeout
    /// removes the operation from its queue and marks it as timed out; a
    /// packet already written is not recalled.
    pub async fn wait(self, timeout: Duration) -> Result<()> {
        validate::operation_reference(self.operation.flags)?;

        let operation = &self.operation;

        if let Some(result) = operation.status().result() {
            return result;
        }

        if let Notification::Waitable(semaphore) = &operation.notification {
            match time::timeout(timeout, semaphore.acquire()).await {
                Ok(Ok(permit)) => permit.forget(),
                Ok(Err(_)) => {}
                Err(_) => {
                    if let Some(shared) = operation.connection.upgrade() {
                        shared.remove_operation(operation);
                    }
                    operation.complete(Err(MqttError::Timeout));
                }
            }
        }

        operation.status().result().unwrap_or(Err(MqttError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MqttConfig,
        connection::ConnectionTable,
        network::SerializerOverrides,
        test_support::{test_connection, MockNetwork},
    };

    fn shared() -> (Arc<ConnectionTable>, Arc<Shared>) {
        test_connection(Arc::new(MockNetwork::new()), MqttConfig::default(), SerializerOverrides::default())
    }

    #[tokio::test]
    async fn test_first_completion_wins() {
        let (_table, shared) = shared();
        let operation = Arc::new(
            Operation::new(&shared, OperationType::PingReq, OperationFlags::WAITABLE, None).unwrap(),
        );
        assert_eq!(shared.references(), 2);

        assert!(operation.complete(Ok(())));
        assert!(!operation.complete(Err(MqttError::Timeout)));
        assert_eq!(operation.status(), OperationStatus::Success);
        assert_eq!(shared.references(), 1);

        let handle = OperationHandle::new(operation);
        assert_eq!(handle.wait(Duration::from_millis(10)).await, Ok(()));
    }

    #[tokio::test]
    async fn test_dropped_operation_releases_reference() {
        let (_table, shared) = shared();

        let operation = Operation::new(&shared, OperationType::PingReq, OperationFlags::empty(), None);
        assert_eq!(shared.references(), 2);

        drop(operation);
        assert_eq!(shared.references(), 1);
    }

    #[tokio::test]
    async fn test_wait_requires_waitable() {
        let (_table, shared) = shared();
        let operation =
            Operation::new(&shared, OperationType::PingReq, OperationFlags::empty(), None).unwrap();

        let handle = OperationHandle::new(Arc::new(operation));
        assert!(matches!(
            handle.wait(Duration::from_millis(10)).await,
            Err(MqttError::BadParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_timeout_dequeues() {
        let (_table, shared) = shared();
        let mut operation =
            Operation::new(&shared, OperationType::Subscribe, OperationFlags::WAITABLE, None).unwrap();
        operation.set_packet(BytesMut::from(&[0x82, 0x00][..]), Some(7));

        let operation = Arc::new(operation);
        shared
            .enqueue(crate::connection::Queue::PendingResponse, Arc::clone(&operation))
            .unwrap();

        let handle = OperationHandle::new(Arc::clone(&operation));
        assert_eq!(handle.clone().wait(Duration::from_millis(20)).await, Err(MqttError::Timeout));
        assert_eq!(handle.status(), OperationStatus::Failed(MqttError::Timeout));
        assert!(shared.take_pending_response(OperationType::Subscribe, Some(7)).is_none());

        // Waiting again just reads the result.
        assert_eq!(handle.wait(Duration::from_millis(20)).await, Err(MqttError::Timeout));
    }

    #[tokio::test]
    async fn test_retry_marks_duplicate() {
        let (_table, shared) = shared();
        let packet = courier_packets::ControlPacket::Publish(courier_packets::publish::PublishPacket {
            qos: courier_core::qos::QoS::AtLeastOnce,
            topic_name: "a".into(),
            packet_id: Some(1),
            ..Default::default()
        });

        let mut operation =
            Operation::new(&shared, OperationType::PublishToServer, OperationFlags::empty(), None).unwrap();
        operation.set_packet(packet.serialize().unwrap(), Some(1));
        operation.set_retry(1, Duration::from_millis(5));

        let retry = operation.next_retry(None).unwrap();
        assert_eq!(retry[0], 0x3a);
        assert!(operation.next_retry(None).is_none());
    }

    #[tokio::test]
    async fn test_retry_with_new_packet_id() {
        let (_table, shared) = shared();
        let packet = courier_packets::ControlPacket::Publish(courier_packets::publish::PublishPacket {
            qos: courier_core::qos::QoS::AtLeastOnce,
            topic_name: "a".into(),
            packet_id: Some(1),
            ..Default::default()
        });

        let mut operation =
            Operation::new(&shared, OperationType::PublishToServer, OperationFlags::empty(), None).unwrap();
        operation.set_packet(packet.serialize().unwrap(), Some(1));
        operation.set_retry(2, Duration::from_millis(5));

        let retry = operation.next_retry(Some(9)).unwrap();
        assert_eq!(retry[0], 0x32);
        assert_eq!(&retry[5..7], &[0x00, 0x09]);
        assert_eq!(operation.packet_id(), Some(9));
    }
}
