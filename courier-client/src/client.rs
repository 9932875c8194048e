use std::{fmt, sync::Arc, time::Duration};

use courier_core::qos::QoS;
use courier_packets::{
    connect::{ConnectFlags, ConnectPacket, ConnectPayload},
    disconnect::DisconnectPacket,
    publish::PublishPacket,
    subscribe::{SubscribePacket, SubscribePayload},
    unsubscribe::UnsubscribePacket,
    ControlPacket,
};
use tracing::{error, info, warn};

use crate::{
    config::MqttConfig,
    connection::{lock, ConnectionId, ConnectionTable, Shared, SharedParams},
    error::{MqttError, Result},
    event::{CallbackParam, DisconnectReason, OperationType},
    info::{CallbackInfo, ConnectInfo, OperationFlags, PublishInfo, Subscription},
    keep_alive,
    network::NetworkInfo,
    operation::{Operation, OperationHandle},
    receive,
    subscription::PacketMatch,
    validate,
};

/// Owns the connection table. Every connection is opened through an `Mqtt`.
pub struct Mqtt {
    table: Arc<ConnectionTable>,
    config: MqttConfig,
}

impl Default for Mqtt {
    fn default() -> Self {
        Self::new(MqttConfig::default())
    }
}

impl Mqtt {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            table: Arc::new(ConnectionTable::new(config.max_connections)),
            config,
        }
    }

    /// Sends CONNECT over `network` and waits up to `timeout` for the CONNACK.
    pub async fn connect(
        &self,
        network: NetworkInfo,
        connect_info: &ConnectInfo,
        timeout: Duration,
    ) -> Result<MqttConnection> {
        validate::network_info(&network)?;
        validate::connect_info(connect_info)?;

        let aws_iot_mqtt_mode = connect_info.aws_iot_mqtt_mode;

        if let Some(will) = &connect_info.will {
            validate::publish_info(aws_iot_mqtt_mode, will)?;

            if will.payload.len() > usize::from(u16::MAX) {
                error!(length = will.payload.len(), "Will payload cannot exceed 65535 bytes.");
                return Err(MqttError::BadParameter("will payload too large".into()));
            }
        }

        let previous_subscriptions = match &connect_info.previous_subscriptions {
            Some(list) if !connect_info.clean_session => {
                validate::subscription_list(OperationType::Subscribe, aws_iot_mqtt_mode, list)?;
                Some(list.as_slice())
            }
            _ => None,
        };

        let Some(interface) = network.interface else {
            return Err(MqttError::BadParameter("network interface must be set".into()));
        };

        let id = self.table.reserve()?;
        let keep_alive = validate::clamp_keep_alive(aws_iot_mqtt_mode, connect_info.keep_alive);

        let shared = Arc::new(Shared::new(SharedParams {
            id,
            aws_iot_mqtt_mode,
            keep_alive: Duration::from_secs(keep_alive.into()),
            config: self.config.clone(),
            network: interface,
            serializer: network.serializer,
            disconnect_callback: network.disconnect_callback,
            table: Arc::downgrade(&self.table),
        }));
        self.table.register(id, &shared);

        let connection = MqttConnection { shared };

        match connection.establish(connect_info, keep_alive, previous_subscriptions, timeout).await {
            Ok(()) => {
                info!(connection = %id, keep_alive, "Connection established.");
                Ok(connection)
            }
            Err(err) => {
                error!(connection = %id, "Failed to establish connection: {}", err);
                connection.shared.abort().await;
                connection.shared.release_handle();
                Err(err)
            }
        }
    }

    /// Looks up an open connection by its identifier.
    pub fn connection(&self, id: ConnectionId) -> Option<MqttConnection> {
        self.table.get(id).map(MqttConnection::from_shared)
    }

    /// Number of connection slots in use.
    pub fn connection_count(&self) -> usize {
        self.table.len()
    }
}

/// Handle to an open MQTT connection. Clones refer to the same connection.
#[derive(Clone)]
pub struct MqttConnection {
    shared: Arc<Shared>,
}

impl MqttConnection {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    async fn establish(
        &self,
        connect_info: &ConnectInfo,
        keep_alive: u16,
        previous_subscriptions: Option<&[Subscription]>,
        timeout: Duration,
    ) -> Result<()> {
        let shared = &self.shared;

        if let Some(list) = previous_subscriptions {
            lock(&shared.subscriptions).add(0, list)?;
        }

        let packet = connect_packet(connect_info, keep_alive);
        let mut operation = Operation::new(shared, OperationType::Connect, OperationFlags::WAITABLE, None)?;
        operation.set_packet(shared.serialize(&packet)?, None);
        let operation = Arc::new(operation);

        receive::spawn(Arc::clone(shared));
        shared.send_operation(Arc::clone(&operation)).await?;

        OperationHandle::new(operation).wait(timeout).await?;

        if keep_alive > 0 && !keep_alive::spawn(Arc::clone(shared)) {
            return Err(MqttError::NetworkError("connection closed".into()));
        }

        Ok(())
    }

    /// Closes the connection. A DISCONNECT packet is sent first unless
    /// `CLEANUP_ONLY` is set or the network is already closed.
    ///
    /// Pending operations fail with a network error. This call does not block
    /// until in-flight callbacks return: it releases the caller's reference,
    /// and connection storage is reclaimed by whichever callback or task
    /// drops the last one.
    pub async fn disconnect(&self, flags: OperationFlags) {
        let shared = &self.shared;

        if !flags.contains(OperationFlags::CLEANUP_ONLY) && !shared.is_disconnected() {
            if let Err(err) = self.send_disconnect().await {
                warn!(connection = %shared.id, "Failed to send DISCONNECT: {}", err);
            }
        }

        shared.close_network(DisconnectReason::DisconnectCalled).await;
        shared.release_handle();
    }

    async fn send_disconnect(&self) -> Result<()> {
        let shared = &self.shared;

        let mut operation = Operation::new(shared, OperationType::Disconnect, OperationFlags::empty(), None)?;
        operation.set_packet(shared.serialize(&ControlPacket::Disconnect(DisconnectPacket {}))?, None);

        shared.send_operation(Arc::new(operation)).await
    }

    /// Publishes a message. QoS 0 messages complete once written and accept
    /// neither a callback nor `WAITABLE`.
    pub async fn publish(
        &self,
        publish_info: &PublishInfo,
        flags: OperationFlags,
        callback: Option<CallbackInfo<CallbackParam>>,
    ) -> Result<OperationHandle> {
        let shared = &self.shared;

        validate::publish_info(shared.aws_iot_mqtt_mode, publish_info)?;
        validate::notification(flags, callback.is_some())?;

        let qos1 = publish_info.qos == QoS::AtLeastOnce;
        if !qos1 && (callback.is_some() || flags.contains(OperationFlags::WAITABLE)) {
            error!("QoS 0 PUBLISH cannot have a callback or be waitable.");
            return Err(MqttError::BadParameter(
                "QoS 0 PUBLISH cannot have a callback or be waitable".into(),
            ));
        }

        let packet_id = qos1.then(|| shared.next_packet_id());
        let packet = ControlPacket::Publish(PublishPacket {
            dup: false,
            qos: publish_info.qos,
            retain: publish_info.retain,
            topic_name: publish_info.topic_name.clone(),
            packet_id,
            payload: publish_info.payload.clone(),
        });

        let mut operation = Operation::new(shared, OperationType::PublishToServer, flags, callback)?;
        operation.set_packet(shared.serialize(&packet)?, packet_id);
        if qos1 {
            operation.set_retry(publish_info.retry_limit, publish_info.retry_interval);
        }
        let operation = Arc::new(operation);

        shared.send_operation(Arc::clone(&operation)).await?;

        Ok(OperationHandle::new(operation))
    }

    /// Publishes and, for QoS 1, waits up to `timeout` for the PUBACK.
    pub async fn timed_publish(&self, publish_info: &PublishInfo, timeout: Duration) -> Result<()> {
        if publish_info.qos != QoS::AtLeastOnce {
            self.publish(publish_info, OperationFlags::empty(), None).await?;
            return Ok(());
        }

        self.publish(publish_info, OperationFlags::WAITABLE, None)
            .await?
            .wait(timeout)
            .await
    }

    /// Subscribes to every filter of `list`.
    ///
    /// Filters are registered before the SUBSCRIBE is sent, so messages
    /// arriving right after the SUBACK are delivered. Filters refused by the
    /// server are removed again.
    pub async fn subscribe(
        &self,
        list: &[Subscription],
        flags: OperationFlags,
        callback: Option<CallbackInfo<CallbackParam>>,
    ) -> Result<OperationHandle> {
        let shared = &self.shared;

        validate::subscription_list(OperationType::Subscribe, shared.aws_iot_mqtt_mode, list)?;
        validate::notification(flags, callback.is_some())?;

        let packet_id = shared.next_packet_id();
        let packet = ControlPacket::Subscribe(SubscribePacket {
            packet_id,
            payload: list
                .iter()
                .map(|subscription| SubscribePayload {
                    topic_filter: subscription.topic_filter.clone(),
                    qos: subscription.qos,
                })
                .collect(),
        });

        let mut operation = Operation::new(shared, OperationType::Subscribe, flags, callback)?;
        operation.set_packet(shared.serialize(&packet)?, Some(packet_id));
        let operation = Arc::new(operation);

        lock(&shared.subscriptions).add(packet_id, list)?;

        if let Err(err) = shared.send_operation(Arc::clone(&operation)).await {
            lock(&shared.subscriptions).remove_all_matches(PacketMatch {
                packet_id,
                order: None,
            });
            return Err(err);
        }

        Ok(OperationHandle::new(operation))
    }

    pub async fn timed_subscribe(&self, list: &[Subscription], timeout: Duration) -> Result<()> {
        self.subscribe(list, OperationFlags::WAITABLE, None)
            .await?
            .wait(timeout)
            .await
    }

    /// Unsubscribes from every filter of `list`. The filters stop matching
    /// once the server acknowledges.
    pub async fn unsubscribe(
        &self,
        list: &[Subscription],
        flags: OperationFlags,
        callback: Option<CallbackInfo<CallbackParam>>,
    ) -> Result<OperationHandle> {
        let shared = &self.shared;

        validate::subscription_list(OperationType::Unsubscribe, shared.aws_iot_mqtt_mode, list)?;
        validate::notification(flags, callback.is_some())?;

        let packet_id = shared.next_packet_id();
        let topic_filters: Vec<String> = list
            .iter()
            .map(|subscription| subscription.topic_filter.clone())
            .collect();
        let packet = ControlPacket::Unsubscribe(UnsubscribePacket {
            packet_id,
            topic_filters: topic_filters.clone(),
        });

        let mut operation = Operation::new(shared, OperationType::Unsubscribe, flags, callback)?;
        operation.set_packet(shared.serialize(&packet)?, Some(packet_id));
        operation.set_filters(topic_filters);
        let operation = Arc::new(operation);

        shared.send_operation(Arc::clone(&operation)).await?;

        Ok(OperationHandle::new(operation))
    }

    pub async fn timed_unsubscribe(&self, list: &[Subscription], timeout: Duration) -> Result<()> {
        self.unsubscribe(list, OperationFlags::WAITABLE, None)
            .await?
            .wait(timeout)
            .await
    }

    /// Whether `topic_filter` is registered, compared byte for byte.
    pub fn is_subscribed(&self, topic_filter: &str) -> bool {
        self.subscription(topic_filter).is_some()
    }

    /// The registered subscription for exactly `topic_filter`.
    pub fn subscription(&self, topic_filter: &str) -> Option<Subscription> {
        let registry = lock(&self.shared.subscriptions);

        let index = registry.find_first_match(0, topic_filter, true)?;
        let entry = registry.get(index)?;

        Some(Subscription {
            topic_filter: entry.topic_filter.to_string(),
            qos: entry.qos,
            callback: entry.callback.clone(),
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.is_disconnected()
    }

    /// Current connection reference count.
    pub fn references(&self) -> usize {
        self.shared.references()
    }
}

impl fmt::Debug for MqttConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConnection")
            .field("id", &self.shared.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn connect_packet(connect_info: &ConnectInfo, keep_alive: u16) -> ControlPacket {
    let will = connect_info.will.as_ref();

    ControlPacket::Connect(ConnectPacket {
        flags: ConnectFlags {
            user_name: connect_info.user_name.is_some(),
            password: connect_info.password.is_some(),
            will_retain: will.map_or(false, |will| will.retain),
            will_qos: will.map_or(QoS::AtMostOnce, |will| will.qos),
            will_flag: will.is_some(),
            clean_session: connect_info.clean_session,
        },
        keepalive: keep_alive,
        payload: ConnectPayload {
            client_id: connect_info.client_identifier.clone().unwrap_or_default(),
            will_topic: will.map(|will| will.topic_name.clone()),
            will_payload: will.map(|will| will.payload.clone()),
            user_name: connect_info.user_name.clone(),
            password: connect_info.password.clone(),
        },
    })
}
