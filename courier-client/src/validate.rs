//! Checks run on caller-supplied parameters before anything is serialized.
//!
//! Every rejection logs exactly one error record naming the violated
//! constraint and returns [`MqttError::BadParameter`]. Nothing is mutated.

use courier_core::topic::{validate_topic_filter, validate_topic_name, TopicValidationError};
use tracing::{error, warn};

use crate::{
    error::{MqttError, Result},
    event::OperationType,
    info::{ConnectInfo, OperationFlags, PublishInfo, Subscription},
    network::NetworkInfo,
};

/// Client identifier length every server must accept.
const ADVISORY_CLIENT_ID_LENGTH: usize = 23;

/// Longest string or binary field a 16-bit length prefix can describe.
const MAX_FIELD_LENGTH: usize = u16::MAX as usize;

pub(crate) const AWS_IOT_MAX_CLIENT_ID_LENGTH: usize = 128;
pub(crate) const AWS_IOT_MAX_TOPIC_LENGTH: usize = 256;
pub(crate) const AWS_IOT_MAX_FILTERS_PER_REQUEST: usize = 8;
pub(crate) const AWS_IOT_MIN_KEEP_ALIVE: u16 = 30;
pub(crate) const AWS_IOT_MAX_KEEP_ALIVE: u16 = 1200;

fn reject<T>(message: &str) -> Result<T> {
    error!("{}", message);
    Err(MqttError::BadParameter(message.to_string()))
}

pub(crate) fn network_info(info: &NetworkInfo) -> Result<()> {
    let Some(interface) = &info.interface else {
        return reject("Network interface must be set.");
    };

    let overrides = &info.serializer;
    if !overrides.is_empty() && overrides.free_packet.is_none() {
        return reject("Serializer overrides require a free packet function.");
    }

    if !interface.supports_close() {
        warn!("Network interface cannot be closed; connections will not release the transport.");
    }

    Ok(())
}

pub(crate) fn connect_info(info: &ConnectInfo) -> Result<()> {
    let Some(client_identifier) = &info.client_identifier else {
        return reject("Client identifier must be set.");
    };

    if client_identifier.is_empty() {
        warn!("A zero-length client identifier was provided.");

        if info.clean_session {
            return reject("A zero-length client identifier cannot be used with a clean session.");
        }
    }

    if client_identifier.len() > MAX_FIELD_LENGTH {
        return reject("Client identifier cannot exceed 65535 bytes.");
    }

    if info.user_name.as_ref().is_some_and(|name| name.len() > MAX_FIELD_LENGTH) {
        return reject("User name cannot exceed 65535 bytes.");
    }

    if info.password.as_ref().is_some_and(|password| password.len() > MAX_FIELD_LENGTH) {
        return reject("Password cannot exceed 65535 bytes.");
    }

    if !info.clean_session {
        if let Some(previous) = &info.previous_subscriptions {
            if previous.is_empty() {
                return reject("Previous subscription list cannot be empty.");
            }
        }
    }

    if info.aws_iot_mqtt_mode {
        if client_identifier.len() > AWS_IOT_MAX_CLIENT_ID_LENGTH {
            return reject("Client identifier exceeds the AWS IoT maximum length.");
        }

        if info.keep_alive != clamp_keep_alive(true, info.keep_alive) {
            warn!(
                keep_alive = info.keep_alive,
                "Keep-alive is outside the AWS IoT range and will be clamped."
            );
        }
    } else if client_identifier.len() > ADVISORY_CLIENT_ID_LENGTH {
        warn!(
            length = client_identifier.len(),
            "Client identifier is longer than 23 bytes; some servers may reject it."
        );
    }

    Ok(())
}

/// Keep-alive actually used for a connection, in seconds.
pub(crate) fn clamp_keep_alive(aws_iot_mqtt_mode: bool, keep_alive: u16) -> u16 {
    if !aws_iot_mqtt_mode {
        return keep_alive;
    }

    match keep_alive {
        0 => AWS_IOT_MAX_KEEP_ALIVE,
        k => k.clamp(AWS_IOT_MIN_KEEP_ALIVE, AWS_IOT_MAX_KEEP_ALIVE),
    }
}

pub(crate) fn publish_info(aws_iot_mqtt_mode: bool, info: &PublishInfo) -> Result<()> {
    match validate_topic_name(&info.topic_name) {
        Ok(()) => {}
        Err(TopicValidationError::Empty) => return reject("Publish topic name must be set."),
        Err(err) => {
            error!(topic_name_length = info.topic_name.len(), "Publish topic name is invalid: {}", err);
            return Err(MqttError::BadParameter(err.to_string()));
        }
    }

    if !info.qos.is_supported() {
        return reject("Publish QoS must be either 0 or 1.");
    }

    if info.retry_limit > 0 && info.retry_interval.is_zero() {
        return reject("Publish retry interval cannot be zero when a retry limit is set.");
    }

    if aws_iot_mqtt_mode {
        if info.retain {
            return reject("AWS IoT does not support retained publish messages.");
        }

        if info.topic_name.len() > AWS_IOT_MAX_TOPIC_LENGTH {
            return reject("Publish topic name exceeds the AWS IoT maximum length.");
        }
    }

    Ok(())
}

pub(crate) fn subscription_list(
    operation: OperationType,
    aws_iot_mqtt_mode: bool,
    list: &[Subscription],
) -> Result<()> {
    if list.is_empty() {
        return reject("Subscription list cannot be empty.");
    }

    if aws_iot_mqtt_mode && list.len() > AWS_IOT_MAX_FILTERS_PER_REQUEST {
        return reject("Subscription list exceeds the AWS IoT maximum filters per request.");
    }

    for subscription in list {
        if operation == OperationType::Subscribe {
            if !subscription.qos.is_supported() {
                return reject("Subscription QoS must be either 0 or 1.");
            }

            if subscription.callback.is_none() {
                return reject("Subscription callback must be set.");
            }
        }

        if aws_iot_mqtt_mode && subscription.topic_filter.len() > AWS_IOT_MAX_TOPIC_LENGTH {
            return reject("Topic filter exceeds the AWS IoT maximum length.");
        }

        match validate_topic_filter(&subscription.topic_filter) {
            Ok(()) => {}
            Err(TopicValidationError::Empty) => return reject("Topic filter must be set."),
            Err(err) => {
                error!(topic_filter = %subscription.topic_filter, "{}", err);
                return Err(MqttError::BadParameter(err.to_string()));
            }
        }
    }

    Ok(())
}

/// Completion is reported either through a wait or through a callback.
pub(crate) fn notification(flags: OperationFlags, has_callback: bool) -> Result<()> {
    if flags.contains(OperationFlags::WAITABLE) && has_callback {
        return reject("Callback should not be set for a waitable operation.");
    }

    Ok(())
}

/// Only waitable operations can be waited on.
pub(crate) fn operation_reference(flags: OperationFlags) -> Result<()> {
    if !flags.contains(OperationFlags::WAITABLE) {
        return reject("Operation is not waitable.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use bytes::{Bytes, BytesMut};
    use courier_core::qos::QoS;
    use courier_packets::ControlPacket;

    use super::*;
    use crate::{network::SerializerOverrides, test_support::MockNetwork};

    fn serialize_nothing(_: &ControlPacket) -> courier_core::Result<BytesMut> {
        Ok(BytesMut::new())
    }

    fn subscription(filter: &str) -> Subscription {
        Subscription::new(filter, QoS::AtLeastOnce).callback(|_| {})
    }

    #[test]
    fn test_network_info() {
        assert!(network_info(&NetworkInfo::default()).is_err());

        let network = NetworkInfo::new(Arc::new(MockNetwork::new()));
        assert!(network_info(&network).is_ok());

        let unpaired = network.clone().serializer(SerializerOverrides {
            serialize: Some(Arc::new(serialize_nothing)),
            ..Default::default()
        });
        assert!(network_info(&unpaired).is_err());

        let paired = network.serializer(SerializerOverrides {
            serialize: Some(Arc::new(serialize_nothing)),
            free_packet: Some(Arc::new(|_: Bytes| {})),
            ..Default::default()
        });
        assert!(network_info(&paired).is_ok());
    }

    #[test]
    fn test_connect_info() {
        assert!(connect_info(&ConnectInfo::default()).is_err());
        assert!(connect_info(&ConnectInfo::new("client")).is_ok());

        // Zero-length identifiers are only accepted without a clean session.
        assert!(connect_info(&ConnectInfo::new("")).is_err());
        assert!(connect_info(&ConnectInfo::new("").clean_session(false)).is_ok());

        let empty_previous = ConnectInfo::new("client")
            .clean_session(false)
            .previous_subscriptions(Vec::new());
        assert!(connect_info(&empty_previous).is_err());

        let long_id = "c".repeat(AWS_IOT_MAX_CLIENT_ID_LENGTH + 1);
        assert!(connect_info(&ConnectInfo::new(long_id.clone())).is_ok());
        assert!(connect_info(&ConnectInfo::new(long_id).aws_iot_mqtt_mode(true)).is_err());

        // Out of range keep-alive only warns.
        assert!(connect_info(&ConnectInfo::new("client").aws_iot_mqtt_mode(true).keep_alive(5)).is_ok());
    }

    #[test]
    fn test_clamp_keep_alive() {
        assert_eq!(clamp_keep_alive(false, 0), 0);
        assert_eq!(clamp_keep_alive(false, 5), 5);
        assert_eq!(clamp_keep_alive(true, 0), AWS_IOT_MAX_KEEP_ALIVE);
        assert_eq!(clamp_keep_alive(true, 5), AWS_IOT_MIN_KEEP_ALIVE);
        assert_eq!(clamp_keep_alive(true, 60), 60);
        assert_eq!(clamp_keep_alive(true, 5000), AWS_IOT_MAX_KEEP_ALIVE);
    }

    #[test]
    fn test_publish_info() {
        let valid = PublishInfo::new("a/b", "payload");
        assert!(publish_info(false, &valid).is_ok());

        assert!(publish_info(false, &PublishInfo::new("", "payload")).is_err());
        assert!(publish_info(false, &valid.clone().qos(QoS::ExactlyOnce)).is_err());
        assert!(publish_info(false, &valid.clone().retry(3, Duration::ZERO)).is_err());
        assert!(publish_info(false, &valid.clone().retry(3, Duration::from_millis(10))).is_ok());

        assert!(publish_info(false, &valid.clone().retain(true)).is_ok());
        assert!(publish_info(true, &valid.clone().retain(true)).is_err());

        let long_topic = PublishInfo::new("t".repeat(AWS_IOT_MAX_TOPIC_LENGTH + 1), "");
        assert!(publish_info(false, &long_topic).is_ok());
        assert!(publish_info(true, &long_topic).is_err());
    }

    #[test]
    fn test_publish_topic_name_must_fit_on_the_wire() {
        let oversized = PublishInfo::new("t".repeat(65539), "");
        assert!(matches!(publish_info(false, &oversized), Err(MqttError::BadParameter(_))));

        let largest = PublishInfo::new("t".repeat(65535), "");
        assert!(publish_info(false, &largest).is_ok());

        for topic_name in ["a/+/c", "a/#", "a\0b"] {
            assert!(publish_info(false, &PublishInfo::new(topic_name, "")).is_err(), "{}", topic_name);
        }
    }

    #[test]
    fn test_connect_strings_must_fit_on_the_wire() {
        let oversized = "c".repeat(65536);

        assert!(connect_info(&ConnectInfo::new(oversized.clone())).is_err());
        assert!(connect_info(&ConnectInfo::new("client").user_name(oversized.clone())).is_err());
        assert!(connect_info(&ConnectInfo::new("client").password(oversized.into_bytes())).is_err());

        let largest = "c".repeat(65535);
        let info = ConnectInfo::new(largest.clone())
            .user_name(largest.clone())
            .password(largest.into_bytes());
        assert!(connect_info(&info).is_ok());
    }

    #[test]
    fn test_subscription_list() {
        use OperationType::{Subscribe, Unsubscribe};

        assert!(subscription_list(Subscribe, false, &[]).is_err());
        assert!(subscription_list(Subscribe, false, &[subscription("a/+/c")]).is_ok());

        let no_callback = Subscription::new("a", QoS::AtMostOnce);
        assert!(subscription_list(Subscribe, false, &[no_callback.clone()]).is_err());
        assert!(subscription_list(Unsubscribe, false, &[no_callback]).is_ok());

        let qos2 = Subscription::new("a", QoS::ExactlyOnce).callback(|_| {});
        assert!(subscription_list(Subscribe, false, &[qos2.clone()]).is_err());
        assert!(subscription_list(Unsubscribe, false, &[qos2]).is_ok());

        let nine: Vec<_> = (0..9).map(|i| subscription(&format!("t/{}", i))).collect();
        assert!(subscription_list(Subscribe, false, &nine).is_ok());
        assert!(subscription_list(Subscribe, true, &nine).is_err());
    }

    #[test]
    fn test_subscription_list_wildcards_all_or_nothing() {
        let list = [subscription("a/#"), subscription("a/b#")];
        assert!(subscription_list(OperationType::Subscribe, false, &list).is_err());

        let list = [subscription("+/x"), subscription("x+")];
        assert!(subscription_list(OperationType::Unsubscribe, false, &list).is_err());

        let list = [subscription("")];
        assert!(subscription_list(OperationType::Unsubscribe, false, &list).is_err());
    }

    #[test]
    fn test_notification_and_reference() {
        assert!(notification(OperationFlags::WAITABLE, true).is_err());
        assert!(notification(OperationFlags::WAITABLE, false).is_ok());
        assert!(notification(OperationFlags::empty(), true).is_ok());

        assert!(operation_reference(OperationFlags::WAITABLE).is_ok());
        assert!(operation_reference(OperationFlags::empty()).is_err());
    }
}
