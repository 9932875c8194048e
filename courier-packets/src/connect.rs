use std::mem;

use bytes::{BufMut, Bytes, BytesMut};

use courier_core::{codec::Encoder, qos::QoS};

use crate::encode_fixed_header;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 0x04;

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnectFlags {
    pub user_name: bool,
    pub password: bool,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will_flag: bool,
    pub clean_session: bool,
}

impl Encoder for ConnectFlags {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut flags: u8 = 0;

        if self.user_name {
            flags = 0b1000_0000;
        }

        if self.password {
            flags |= 0b0100_0000;
        }

        if self.will_flag {
            flags |= 0b0000_0100;
            flags |= (self.will_qos as u8) << 3;

            if self.will_retain {
                flags |= 0b0010_0000;
            }
        }

        if self.clean_session {
            flags |= 0b0000_0010;
        }

        buffer.put_u8(flags);
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u8>()
    }
}

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnectPayload {
    pub client_id: String,
    pub will_topic: Option<String>,
    pub will_payload: Option<Bytes>,
    pub user_name: Option<String>,
    pub password: Option<Bytes>,
}

impl Encoder for ConnectPayload {
    fn encode(&self, buffer: &mut BytesMut) {
        self.client_id.encode(buffer);
        self.will_topic.encode(buffer);
        self.will_payload.encode(buffer);
        self.user_name.encode(buffer);
        self.password.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.client_id.encoded_size()
            + self.will_topic.encoded_size()
            + self.will_payload.encoded_size()
            + self.user_name.encoded_size()
            + self.password.encoded_size()
    }
}

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnectPacket {
    pub flags: ConnectFlags,
    pub keepalive: u16,
    pub payload: ConnectPayload,
}

const PACKET_TYPE: u8 = 0x01;

impl ConnectPacket {
    pub fn remaining_length(&self) -> usize {
        PROTOCOL_NAME.encoded_size()
            + PROTOCOL_LEVEL.encoded_size()
            + self.flags.encoded_size()
            + self.keepalive.encoded_size()
            + self.payload.encoded_size()
    }
}

impl Encoder for ConnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        encode_fixed_header(PACKET_TYPE << 4, self.remaining_length(), buffer);

        // Variable header
        PROTOCOL_NAME.encode(buffer);
        PROTOCOL_LEVEL.encode(buffer);
        self.flags.encode(buffer);
        self.keepalive.encode(buffer);

        self.payload.encode(buffer);
    }
}
