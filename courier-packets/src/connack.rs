use bytes::{Buf, BytesMut};

use courier_core::{
    codec::{Decoder, Encoder},
    error::Error,
    return_code::ConnectReturnCode,
};

use crate::{encode_fixed_header, split_fixed_header};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

const PACKET_TYPE: u8 = 0x02;

impl Encoder for ConnAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        encode_fixed_header(PACKET_TYPE << 4, 2, buffer);

        (self.session_present as u8).encode(buffer);
        self.return_code.get_code().encode(buffer);
    }
}

impl Decoder for ConnAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let (_, mut body) = split_fixed_header(buffer)?;

        if body.remaining() != 2 {
            return Err(Error::MalformedPacket("CONNACK remaining length must be 2"));
        }

        let flags = u8::decode(&mut body)?;
        let code = u8::decode(&mut body)?;

        if flags & 0b1111_1110 != 0 {
            return Err(Error::BadResponse {
                packet_id: None,
                reason: "CONNACK reserved bits are set",
            });
        }

        let session_present = flags & 0b0000_0001 != 0;

        if session_present && code != 0 {
            return Err(Error::BadResponse {
                packet_id: None,
                reason: "CONNACK with session present must carry return code 0",
            });
        }

        Ok(ConnAckPacket {
            session_present,
            return_code: ConnectReturnCode::try_from(code)?,
        })
    }
}
