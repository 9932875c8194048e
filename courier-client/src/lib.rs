//! Courier MQTT 3.1.1 Client Engine
//!
//! This crate drives MQTT 3.1.1 sessions over any transport that implements
//! [`NetworkInterface`]. It validates requests, tracks every outstanding
//! operation until the server acknowledges it, and dispatches incoming
//! messages to subscription callbacks.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use courier_client::{
//!     ConnectInfo, Mqtt, NetworkInfo, OperationFlags, PublishInfo, QoS, StreamTransport,
//!     Subscription,
//! };
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mqtt = Mqtt::default();
//!
//!     let stream = TcpStream::connect("localhost:1883").await?;
//!     let network = NetworkInfo::new(Arc::new(StreamTransport::new(stream)));
//!
//!     let connection = mqtt
//!         .connect(network, &ConnectInfo::new("my-client"), Duration::from_secs(5))
//!         .await?;
//!
//!     // Subscribe to a topic
//!     let subscription = Subscription::new("test/+", QoS::AtLeastOnce)
//!         .callback(|param| println!("Received on {}: {:?}", param.topic_filter, param.message.payload));
//!     connection.timed_subscribe(&[subscription], Duration::from_secs(5)).await?;
//!
//!     // Publish a message
//!     let message = PublishInfo::new("test/topic", "Hello, MQTT!").qos(QoS::AtLeastOnce);
//!     connection.timed_publish(&message, Duration::from_secs(5)).await?;
//!
//!     connection.disconnect(OperationFlags::empty()).await;
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod connection;
mod error;
mod event;
mod info;
mod keep_alive;
mod network;
mod operation;
mod receive;
mod subscription;
mod validate;

#[cfg(test)]
mod test_support;

pub use client::{Mqtt, MqttConnection};
pub use config::{CallbackDispatch, MqttConfig};
pub use connection::ConnectionId;
pub use error::{MqttError, Result};
pub use event::{CallbackParam, DisconnectCallbackParam, DisconnectReason, OperationType, PublishCallbackParam};
pub use info::{CallbackInfo, ConnectInfo, OperationFlags, PublishInfo, Subscription};
pub use network::{
    DeserializeFn, FreePacketFn, NetworkInfo, NetworkInterface, SerializeFn, SerializerOverrides,
    StreamTransport,
};
pub use operation::{OperationHandle, OperationStatus};

// Re-export commonly used types from courier-core
pub use courier_core::qos::QoS;
