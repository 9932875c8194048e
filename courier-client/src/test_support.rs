//! Scripted server used by the engine tests.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use courier_core::codec::{Decoder, Encoder, VariableByteInteger};
use tokio::sync::mpsc;

use crate::{
    config::MqttConfig,
    connection::{ConnectionTable, Shared, SharedParams},
    network::{NetworkInterface, SerializerOverrides},
};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or about two seconds have passed.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    condition()
}

/// A registered connection with no receive or keep-alive task running.
pub(crate) fn test_connection(
    network: Arc<MockNetwork>,
    config: MqttConfig,
    serializer: SerializerOverrides,
) -> (Arc<ConnectionTable>, Arc<Shared>) {
    let table = Arc::new(ConnectionTable::new(1));
    let id = table.reserve().unwrap();

    let shared = Arc::new(Shared::new(SharedParams {
        id,
        aws_iot_mqtt_mode: false,
        keep_alive: Duration::ZERO,
        config,
        network,
        serializer,
        disconnect_callback: None,
        table: Arc::downgrade(&table),
    }));
    table.register(id, &shared);

    (table, shared)
}

struct Responder {
    connack: Option<Vec<u8>>,
    suback_codes: Option<Vec<u8>>,
    puback: bool,
    pingresp: bool,
}

/// Records everything the engine sends and answers like a well-behaved
/// server unless told otherwise. An empty inbound chunk reads as end of
/// stream.
pub(crate) struct MockNetwork {
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    leftover: Mutex<BytesMut>,
    sent: Mutex<Vec<Vec<u8>>>,
    responder: Mutex<Responder>,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl MockNetwork {
    pub(crate) fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            leftover: Mutex::new(BytesMut::new()),
            sent: Mutex::new(Vec::new()),
            responder: Mutex::new(Responder {
                connack: Some(vec![0x20, 0x02, 0x00, 0x00]),
                suback_codes: None,
                puback: true,
                pingresp: true,
            }),
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Bytes sent in reply to CONNECT, or nothing with `None`.
    pub(crate) fn connack(self, reply: Option<Vec<u8>>) -> Self {
        self.responder.lock().unwrap().connack = reply;
        self
    }

    /// SUBACK return codes to send instead of granting each requested QoS.
    pub(crate) fn suback_codes(self, codes: Vec<u8>) -> Self {
        self.responder.lock().unwrap().suback_codes = Some(codes);
        self
    }

    pub(crate) fn without_puback(self) -> Self {
        self.responder.lock().unwrap().puback = false;
        self
    }

    pub(crate) fn without_pingresp(self) -> Self {
        self.responder.lock().unwrap().pingresp = false;
        self
    }

    pub(crate) fn set_pingresp(&self, enabled: bool) {
        self.responder.lock().unwrap().pingresp = enabled;
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn inject(&self, bytes: &[u8]) {
        let _ = self.inbound_tx.send(bytes.to_vec());
    }

    /// Ends the stream as if the server hung up.
    pub(crate) fn hang_up(&self) {
        let _ = self.inbound_tx.send(Vec::new());
    }

    pub(crate) fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// First byte of every packet sent so far.
    pub(crate) fn sent_headers(&self) -> Vec<u8> {
        self.sent().iter().filter_map(|packet| packet.first().copied()).collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn respond(&self, packet: &[u8]) {
        let responder = self.responder.lock().unwrap();

        let mut peeker = packet.get(1..).unwrap_or_default();
        let Ok(remaining_length) = VariableByteInteger::decode(&mut peeker) else {
            return;
        };
        let body = &packet[1 + remaining_length.encoded_size()..];

        let reply = match packet[0] >> 4 {
            0x01 => responder.connack.clone(),
            0x03 if packet[0] & 0x06 != 0 && responder.puback => {
                let topic_length = usize::from(u16::from_be_bytes([body[0], body[1]]));
                let id = &body[2 + topic_length..4 + topic_length];
                Some(vec![0x40, 0x02, id[0], id[1]])
            }
            0x08 => {
                let codes = match &responder.suback_codes {
                    Some(codes) => codes.clone(),
                    None => requested_qos(&body[2..]),
                };

                let mut reply = vec![0x90, (2 + codes.len()) as u8, body[0], body[1]];
                reply.extend(codes);
                Some(reply)
            }
            0x0a => Some(vec![0xb0, 0x02, body[0], body[1]]),
            0x0c if responder.pingresp => Some(vec![0xd0, 0x00]),
            _ => None,
        };

        if let Some(reply) = reply {
            let _ = self.inbound_tx.send(reply);
        }
    }
}

/// QoS byte of every filter in a SUBSCRIBE payload.
fn requested_qos(mut payload: &[u8]) -> Vec<u8> {
    let mut codes = Vec::new();

    while payload.remaining() >= 2 {
        let length = usize::from(payload.get_u16());
        payload.advance(length);
        codes.push(payload.get_u8());
    }

    codes
}

#[async_trait]
impl NetworkInterface for MockNetwork {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "send failed"));
        }

        self.sent.lock().unwrap().push(buf.to_vec());
        self.respond(buf);

        Ok(buf.len())
    }

    async fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut leftover = self.leftover.lock().unwrap();
            if !leftover.is_empty() {
                let n = leftover.len().min(buf.len());
                buf[..n].copy_from_slice(&leftover.split_to(n));
                return Ok(n);
            }
        }

        let chunk = self.inbound_rx.lock().await.recv().await.unwrap_or_default();

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        self.leftover.lock().unwrap().extend_from_slice(&chunk[n..]);

        Ok(n)
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn supports_close(&self) -> bool {
        true
    }
}
