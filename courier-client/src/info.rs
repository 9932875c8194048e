use std::{fmt, ops::BitOr, sync::Arc, time::Duration};

use bytes::Bytes;
use courier_core::qos::QoS;

use crate::event::PublishCallbackParam;

/// A user callback. The closure carries whatever context it needs.
pub struct CallbackInfo<P> {
    function: Arc<dyn Fn(P) + Send + Sync>,
}

impl<P> CallbackInfo<P> {
    pub fn new(function: impl Fn(P) + Send + Sync + 'static) -> Self {
        Self {
            function: Arc::new(function),
        }
    }

    pub(crate) fn invoke(&self, param: P) {
        (self.function)(param)
    }
}

impl<P> Clone for CallbackInfo<P> {
    fn clone(&self) -> Self {
        Self {
            function: Arc::clone(&self.function),
        }
    }
}

impl<P> fmt::Debug for CallbackInfo<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackInfo").finish_non_exhaustive()
    }
}

/// Flags accepted by the operation APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationFlags(u32);

impl OperationFlags {
    /// The caller will block on [`OperationHandle::wait`](crate::OperationHandle::wait).
    pub const WAITABLE: OperationFlags = OperationFlags(0x1);

    /// Disconnect only releases local resources and sends nothing.
    pub const CLEANUP_ONLY: OperationFlags = OperationFlags(0x2);

    pub const fn empty() -> Self {
        OperationFlags(0)
    }

    pub fn contains(self, other: OperationFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OperationFlags {
    type Output = OperationFlags;

    fn bitor(self, rhs: OperationFlags) -> OperationFlags {
        OperationFlags(self.0 | rhs.0)
    }
}

/// A message to publish, a will message, or a message delivered to a
/// subscription callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishInfo {
    pub qos: QoS,
    pub retain: bool,
    pub topic_name: String,
    pub payload: Bytes,
    /// Time between retransmissions of an unacknowledged QoS 1 PUBLISH.
    pub retry_interval: Duration,
    /// Number of retransmissions before the PUBLISH times out.
    pub retry_limit: u32,
}

impl PublishInfo {
    pub fn new(topic_name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic_name: topic_name.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn retry(mut self, limit: u32, interval: Duration) -> Self {
        self.retry_limit = limit;
        self.retry_interval = interval;
        self
    }
}

/// One entry of a SUBSCRIBE or UNSUBSCRIBE request.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub topic_filter: String,
    pub qos: QoS,
    /// Invoked for every PUBLISH matching `topic_filter`. Required when
    /// subscribing, ignored when unsubscribing.
    pub callback: Option<CallbackInfo<PublishCallbackParam>>,
}

impl Subscription {
    pub fn new(topic_filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic_filter: topic_filter.into(),
            qos,
            callback: None,
        }
    }

    pub fn callback(mut self, callback: impl Fn(PublishCallbackParam) + Send + Sync + 'static) -> Self {
        self.callback = Some(CallbackInfo::new(callback));
        self
    }
}

/// Parameters of the CONNECT packet and of the session it opens.
#[derive(Debug, Clone)]
pub struct ConnectInfo {
    pub(crate) aws_iot_mqtt_mode: bool,
    pub(crate) clean_session: bool,
    pub(crate) client_identifier: Option<String>,
    pub(crate) keep_alive: u16,
    pub(crate) will: Option<PublishInfo>,
    pub(crate) user_name: Option<String>,
    pub(crate) password: Option<Bytes>,
    pub(crate) previous_subscriptions: Option<Vec<Subscription>>,
}

impl Default for ConnectInfo {
    fn default() -> Self {
        Self {
            aws_iot_mqtt_mode: false,
            clean_session: true,
            client_identifier: None,
            keep_alive: 60,
            will: None,
            user_name: None,
            password: None,
            previous_subscriptions: None,
        }
    }
}

impl ConnectInfo {
    pub fn new(client_identifier: impl Into<String>) -> Self {
        Self {
            client_identifier: Some(client_identifier.into()),
            ..Default::default()
        }
    }

    /// Apply the service limits of AWS IoT to this connection.
    pub fn aws_iot_mqtt_mode(mut self, enabled: bool) -> Self {
        self.aws_iot_mqtt_mode = enabled;
        self
    }

    /// Set the clean session flag. If false, the server resumes any existing session.
    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Set the keep-alive interval in seconds. Zero disables keep-alive.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set the will message to be published if the client disconnects unexpectedly.
    pub fn will(mut self, will: PublishInfo) -> Self {
        self.will = Some(will);
        self
    }

    /// Set the username for authentication.
    pub fn user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    /// Set the password for authentication.
    pub fn password(mut self, password: impl Into<Bytes>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Subscriptions that survive from a previous session. Only used when
    /// `clean_session` is false.
    pub fn previous_subscriptions(mut self, subscriptions: Vec<Subscription>) -> Self {
        self.previous_subscriptions = Some(subscriptions);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_flags() {
        let flags = OperationFlags::WAITABLE | OperationFlags::CLEANUP_ONLY;

        assert!(flags.contains(OperationFlags::WAITABLE));
        assert!(flags.contains(OperationFlags::CLEANUP_ONLY));
        assert!(!OperationFlags::empty().contains(OperationFlags::WAITABLE));
        assert!(OperationFlags::WAITABLE.contains(OperationFlags::empty()));
    }
}
