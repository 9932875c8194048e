use bytes::{Buf, BytesMut};

use courier_core::{codec::{Decoder, Encoder}, error::Error};

use crate::{encode_fixed_header, split_fixed_header};

#[derive(Default, PartialEq, Eq, Debug, Clone)]
pub struct PingRespPacket {}

const PACKET_TYPE: u8 = 0x0d;

impl Encoder for PingRespPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        encode_fixed_header(PACKET_TYPE << 4, 0, buffer);
    }
}

impl Decoder for PingRespPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let (_, body) = split_fixed_header(buffer)?;

        if !body.is_empty() {
            return Err(Error::MalformedPacket("PINGRESP remaining length must be 0"));
        }

        Ok(Self {})
    }
}
