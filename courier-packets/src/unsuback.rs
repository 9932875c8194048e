use bytes::{Buf, BytesMut};

use courier_core::codec::{Decoder, Encoder};

use crate::{encode_fixed_header, puback::decode_ack_packet_id, split_fixed_header};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct UnsubAckPacket {
    pub packet_id: u16,
}

const PACKET_TYPE: u8 = 0x0b;

impl Encoder for UnsubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        encode_fixed_header(PACKET_TYPE << 4, self.packet_id.encoded_size(), buffer);

        self.packet_id.encode(buffer);
    }
}

impl Decoder for UnsubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let (_, mut body) = split_fixed_header(buffer)?;

        Ok(UnsubAckPacket {
            packet_id: decode_ack_packet_id(&mut body)?,
        })
    }
}
