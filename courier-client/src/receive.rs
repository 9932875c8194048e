//! Reads the network interface and drives everything the server sends.
//!
//! Bytes accumulate until a whole packet is buffered; a partial packet is
//! never an error and leaves the buffer untouched. Any structural failure
//! closes the connection with [`DisconnectReason::BadPacketReceived`].

use std::sync::Arc;

use bytes::BytesMut;
use courier_core::{error::Error, qos::QoS, return_code::SubscribeReturnCode};
use courier_packets::{
    puback::PubAckPacket, publish::PublishPacket, ControlPacket, FixedHeader, PacketType,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::{
    connection::{lock, Shared},
    error::{MqttError, Result},
    event::{DisconnectReason, OperationType},
    info::{OperationFlags, PublishInfo},
    operation::Operation,
    subscription::{self, PacketMatch},
};

pub(crate) fn spawn(shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(run(shared))
}

async fn run(shared: Arc<Shared>) {
    let size = shared.config.receive_buffer_size;
    let mut buffer = BytesMut::with_capacity(size);
    let mut chunk = vec![0u8; size];

    let reason = loop {
        let received = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            received = shared.network().receive(&mut chunk) => received,
        };

        match received {
            Ok(0) if buffer.is_empty() => {
                warn!(connection = %shared.id, "Network connection closed by peer.");
                break DisconnectReason::ConnectionLost;
            }
            Ok(0) => {
                error!(
                    connection = %shared.id,
                    buffered = buffer.len(),
                    "Network connection closed in the middle of a packet."
                );
                break DisconnectReason::BadPacketReceived;
            }
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);

                if let Err(err) = process(&shared, &mut buffer).await {
                    error!(connection = %shared.id, "Bad packet received: {}", err);
                    break DisconnectReason::BadPacketReceived;
                }
            }
            Err(err) => {
                error!(connection = %shared.id, "Failed to receive from network: {}", err);
                break DisconnectReason::ConnectionLost;
            }
        }
    };

    shared.close_network(reason).await;
}

/// Handles every complete packet at the front of `buffer`.
pub(crate) async fn process(shared: &Arc<Shared>, buffer: &mut BytesMut) -> Result<()> {
    while !buffer.is_empty() {
        let header = match ControlPacket::check(&buffer[..]) {
            Ok(header) => header,
            Err(Error::PacketIncomplete) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        debug!(
            packet_type = %header.packet_type,
            remaining_length = header.remaining_length,
            "Received packet."
        );

        let packet_id = acknowledged_packet_id(&header, &buffer[..]);
        let mut frame = buffer.split_to(header.packet_length());
        let decoded = match &shared.serializer.deserialize {
            Some(deserialize) => deserialize(&mut frame),
            None => ControlPacket::parse(&mut frame),
        };

        let packet = match decoded {
            Ok(packet) => packet,
            Err(err) => {
                fail_pending(shared, header.packet_type, packet_id);

                return Err(match err {
                    // The frame is already known to be whole.
                    Error::PacketIncomplete => MqttError::Mqtt("packet body is truncated".into()),
                    err => err.into(),
                });
            }
        };

        dispatch(shared, packet).await?;
    }

    Ok(())
}

/// Packet identifier at the start of a framed acknowledgment body, read
/// before decoding so a malformed acknowledgment can still be attributed.
fn acknowledged_packet_id(header: &FixedHeader, frame: &[u8]) -> Option<u16> {
    match frame.get(header.header_length..header.packet_length())? {
        [high, low, ..] => Some(u16::from_be_bytes([*high, *low])),
        _ => None,
    }
}

/// Fails the operation a malformed acknowledgment was meant for.
fn fail_pending(shared: &Shared, packet_type: PacketType, packet_id: Option<u16>) {
    let (kind, packet_id) = match (packet_type, packet_id) {
        (PacketType::ConnAck, _) => (OperationType::Connect, None),
        (PacketType::PubAck, Some(id)) => (OperationType::PublishToServer, Some(id)),
        (PacketType::SubAck, Some(id)) => (OperationType::Subscribe, Some(id)),
        (PacketType::UnsubAck, Some(id)) => (OperationType::Unsubscribe, Some(id)),
        _ => return,
    };

    complete_pending(shared, kind, packet_id, Err(MqttError::BadResponse));
}

fn complete_pending(shared: &Shared, kind: OperationType, packet_id: Option<u16>, result: Result<()>) {
    match shared.take_pending_response(kind, packet_id) {
        Some(operation) => {
            operation.complete(result);
        }
        None => debug!(
            operation = %kind,
            packet_id = ?packet_id,
            "No operation waiting for this response."
        ),
    }
}

async fn dispatch(shared: &Arc<Shared>, packet: ControlPacket) -> Result<()> {
    match packet {
        ControlPacket::ConnAck(connack) => {
            let result = if connack.return_code.is_accepted() {
                Ok(())
            } else {
                warn!(return_code = %connack.return_code, "Connection refused by server.");
                Err(MqttError::ServerRefused)
            };

            complete_pending(shared, OperationType::Connect, None, result);
        }
        ControlPacket::Publish(publish) => deliver(shared, publish).await,
        ControlPacket::PubAck(puback) => {
            complete_pending(shared, OperationType::PublishToServer, Some(puback.packet_id), Ok(()))
        }
        ControlPacket::SubAck(suback) => {
            let mut refused = false;

            {
                let mut registry = lock(&shared.subscriptions);

                for (order, code) in suback.return_codes.iter().enumerate() {
                    if *code == SubscribeReturnCode::Failure {
                        warn!(packet_id = suback.packet_id, order, "Subscription refused by server.");
                        registry.remove_all_matches(PacketMatch {
                            packet_id: suback.packet_id,
                            order: Some(order),
                        });
                        refused = true;
                    }
                }
            }

            let result = if refused {
                Err(MqttError::ServerRefused)
            } else {
                Ok(())
            };

            complete_pending(shared, OperationType::Subscribe, Some(suback.packet_id), result);
        }
        ControlPacket::UnsubAck(unsuback) => {
            complete_pending(shared, OperationType::Unsubscribe, Some(unsuback.packet_id), Ok(()))
        }
        ControlPacket::PingResp(_) => shared.set_keep_alive_failure(false),
        ControlPacket::PingReq(_) => debug!("Ignoring PINGREQ from server."),
        packet => {
            return Err(MqttError::Mqtt(format!(
                "unexpected {} packet from server",
                packet.packet_type()
            )))
        }
    }

    Ok(())
}

async fn deliver(shared: &Arc<Shared>, publish: PublishPacket) {
    let message = PublishInfo {
        qos: publish.qos,
        retain: publish.retain,
        topic_name: publish.topic_name,
        payload: publish.payload,
        ..Default::default()
    };

    if shared.increment_references() {
        subscription::invoke_callbacks(shared, &message);
    }

    match (publish.qos, publish.packet_id) {
        (QoS::AtLeastOnce, Some(packet_id)) => {
            if let Err(err) = send_puback(shared, packet_id).await {
                warn!(packet_id, "Failed to send PUBACK: {}", err);
            }
        }
        (QoS::ExactlyOnce, _) => {
            warn!(topic_name = %message.topic_name, "Received QoS 2 PUBLISH, which is not acknowledged.");
        }
        _ => {}
    }
}

async fn send_puback(shared: &Arc<Shared>, packet_id: u16) -> Result<()> {
    let mut operation = Operation::new(shared, OperationType::PubAck, OperationFlags::empty(), None)?;
    let packet = shared.serialize(&ControlPacket::PubAck(PubAckPacket { packet_id }))?;
    operation.set_packet(packet, Some(packet_id));

    shared.send_operation(Arc::new(operation)).await
}
