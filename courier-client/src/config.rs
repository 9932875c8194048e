use std::time::Duration;

/// Where subscription and completion callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackDispatch {
    /// On the task that produced the notification, typically the receive task.
    Inline,
    /// On tokio's blocking pool, so callbacks may block and run concurrently.
    #[default]
    Spawned,
}

impl CallbackDispatch {
    pub(crate) fn run<F>(self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            CallbackDispatch::Inline => work(),
            CallbackDispatch::Spawned => {
                tokio::task::spawn_blocking(work);
            }
        }
    }
}

/// Engine-wide settings shared by every connection of an [`Mqtt`](crate::Mqtt).
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub(crate) response_wait: Duration,
    pub(crate) max_connections: usize,
    pub(crate) max_subscriptions: usize,
    pub(crate) receive_buffer_size: usize,
    pub(crate) callback_dispatch: CallbackDispatch,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            response_wait: Duration::from_millis(1000),
            max_connections: 2,
            max_subscriptions: 10,
            receive_buffer_size: 1024,
            callback_dispatch: CallbackDispatch::default(),
        }
    }
}

impl MqttConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait for a PINGRESP before the connection is considered dead.
    pub fn response_wait(mut self, wait: Duration) -> Self {
        self.response_wait = wait;
        self
    }

    /// Number of connections that may be open at the same time.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Number of subscriptions each connection can hold.
    pub fn max_subscriptions(mut self, max: usize) -> Self {
        self.max_subscriptions = max;
        self
    }

    /// Size of each read from the network interface.
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size.max(1);
        self
    }

    pub fn callback_dispatch(mut self, dispatch: CallbackDispatch) -> Self {
        self.callback_dispatch = dispatch;
        self
    }
}
