use bytes::{Buf, BytesMut};

use courier_core::{codec::{Decoder, Encoder}, error::Error};

use crate::{encode_fixed_header, split_fixed_header};

#[derive(Default, PartialEq, Eq, Debug, Clone)]
pub struct PingReqPacket {}

const PACKET_TYPE: u8 = 0x0c;

impl Encoder for PingReqPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        encode_fixed_header(PACKET_TYPE << 4, 0, buffer);
    }
}

impl Decoder for PingReqPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let (_, body) = split_fixed_header(buffer)?;

        if !body.is_empty() {
            return Err(Error::MalformedPacket("PINGREQ remaining length must be 0"));
        }

        Ok(Self {})
    }
}
