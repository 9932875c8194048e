use bytes::BytesMut;

use courier_core::codec::Encoder;

use crate::encode_fixed_header;

#[derive(Default, PartialEq, Eq, Debug, Clone)]
pub struct DisconnectPacket {}

const PACKET_TYPE: u8 = 0x0e;

impl Encoder for DisconnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        encode_fixed_header(PACKET_TYPE << 4, 0, buffer);
    }
}
