use bytes::BytesMut;

use courier_core::{codec::Encoder, qos::QoS};

use crate::encode_fixed_header;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SubscribePayload {
    pub topic_filter: String,
    pub qos: QoS,
}

impl Encoder for SubscribePayload {
    fn encode(&self, buffer: &mut BytesMut) {
        self.topic_filter.encode(buffer);
        (self.qos as u8).encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.topic_filter.encoded_size() + 1
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub payload: Vec<SubscribePayload>,
}

const PACKET_TYPE: u8 = 0x08;

impl SubscribePacket {
    pub fn remaining_length(&self) -> usize {
        self.packet_id.encoded_size() + self.payload.encoded_size()
    }
}

impl Encoder for SubscribePacket {
    fn encode(&self, buffer: &mut BytesMut) {
        // Bit 1 of the fixed header flags is reserved and must be set.
        encode_fixed_header(PACKET_TYPE << 4 | 0b0010, self.remaining_length(), buffer);

        self.packet_id.encode(buffer);
        self.payload.encode(buffer);
    }
}
