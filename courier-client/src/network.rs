//! The transport seen by the engine.
//!
//! The engine never opens sockets itself. It writes serialized packets through
//! a [`NetworkInterface`] and reads whatever bytes the interface hands back.

use std::{fmt, io, sync::Arc};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use courier_packets::ControlPacket;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex,
};

use crate::{event::DisconnectCallbackParam, info::CallbackInfo};

/// A bidirectional byte channel to an MQTT server.
#[async_trait]
pub trait NetworkInterface: Send + Sync {
    /// Writes `buf` and returns how many bytes were sent.
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Reads into `buf`, waiting until data is available.
    /// `Ok(0)` means the peer closed the stream.
    async fn receive(&self, buf: &mut [u8]) -> io::Result<usize>;

    async fn close(&self) -> io::Result<()> {
        Ok(())
    }

    /// Implementations that override [`close`](Self::close) return true.
    fn supports_close(&self) -> bool {
        false
    }
}

/// A [`NetworkInterface`] over any tokio byte stream, such as a `TcpStream`.
pub struct StreamTransport<S> {
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<S> NetworkInterface for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self.writer.lock().await;

        writer.write_all(buf).await?;
        writer.flush().await?;

        Ok(buf.len())
    }

    async fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.lock().await.read(buf).await
    }

    async fn close(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }

    fn supports_close(&self) -> bool {
        true
    }
}

pub type SerializeFn =
    Arc<dyn Fn(&ControlPacket) -> courier_core::Result<BytesMut> + Send + Sync>;

/// Receives a buffer holding exactly one framed packet.
pub type DeserializeFn =
    Arc<dyn Fn(&mut BytesMut) -> courier_core::Result<ControlPacket> + Send + Sync>;

/// Releases a packet produced by a [`SerializeFn`] once it has been sent.
pub type FreePacketFn = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Replacements for the built-in MQTT 3.1.1 codec.
#[derive(Clone, Default)]
pub struct SerializerOverrides {
    pub serialize: Option<SerializeFn>,
    pub deserialize: Option<DeserializeFn>,
    pub free_packet: Option<FreePacketFn>,
}

impl SerializerOverrides {
    pub(crate) fn is_empty(&self) -> bool {
        self.serialize.is_none() && self.deserialize.is_none()
    }
}

impl fmt::Debug for SerializerOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerOverrides")
            .field("serialize", &self.serialize.is_some())
            .field("deserialize", &self.deserialize.is_some())
            .field("free_packet", &self.free_packet.is_some())
            .finish()
    }
}

/// Everything a connection needs to know about its transport.
#[derive(Clone, Default)]
pub struct NetworkInfo {
    pub(crate) interface: Option<Arc<dyn NetworkInterface>>,
    pub(crate) serializer: SerializerOverrides,
    pub(crate) disconnect_callback: Option<CallbackInfo<DisconnectCallbackParam>>,
}

impl NetworkInfo {
    pub fn new(interface: Arc<dyn NetworkInterface>) -> Self {
        Self {
            interface: Some(interface),
            ..Default::default()
        }
    }

    pub fn serializer(mut self, overrides: SerializerOverrides) -> Self {
        self.serializer = overrides;
        self
    }

    /// Called once when the connection's network link is closed.
    pub fn disconnect_callback(
        mut self,
        callback: impl Fn(DisconnectCallbackParam) + Send + Sync + 'static,
    ) -> Self {
        self.disconnect_callback = Some(CallbackInfo::new(callback));
        self
    }
}

impl fmt::Debug for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkInfo")
            .field("interface", &self.interface.is_some())
            .field("serializer", &self.serializer)
            .field("disconnect_callback", &self.disconnect_callback.is_some())
            .finish()
    }
}
