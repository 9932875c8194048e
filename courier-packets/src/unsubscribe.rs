use bytes::BytesMut;

use courier_core::codec::Encoder;

use crate::encode_fixed_header;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub topic_filters: Vec<String>,
}

const PACKET_TYPE: u8 = 0x0a;

impl UnsubscribePacket {
    pub fn remaining_length(&self) -> usize {
        self.packet_id.encoded_size() + self.topic_filters.encoded_size()
    }
}

impl Encoder for UnsubscribePacket {
    fn encode(&self, buffer: &mut BytesMut) {
        encode_fixed_header(PACKET_TYPE << 4 | 0b0010, self.remaining_length(), buffer);

        self.packet_id.encode(buffer);
        self.topic_filters.encode(buffer);
    }
}
