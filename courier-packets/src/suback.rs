use bytes::{Buf, BytesMut};

use courier_core::{
    codec::{Decoder, Encoder},
    error::Error,
    return_code::SubscribeReturnCode,
};

use crate::{encode_fixed_header, split_fixed_header};

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SubAckPacket {
    pub packet_id: u16,
    /// One code per filter of the acknowledged SUBSCRIBE, in request order.
    pub return_codes: Vec<SubscribeReturnCode>,
}

const PACKET_TYPE: u8 = 0x09;

impl Encoder for SubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let remaining_len = self.packet_id.encoded_size() + self.return_codes.len();

        encode_fixed_header(PACKET_TYPE << 4, remaining_len, buffer);

        self.packet_id.encode(buffer);

        for code in &self.return_codes {
            code.get_code().encode(buffer);
        }
    }
}

impl Decoder for SubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let (_, mut body) = split_fixed_header(buffer)?;

        if body.remaining() < 3 {
            return Err(Error::MalformedPacket("SUBACK remaining length too short"));
        }

        let packet_id = u16::decode(&mut body)?;

        if packet_id == 0 {
            return Err(Error::MalformedPacket("packet identifier must be non-zero"));
        }

        let return_codes = body
            .iter()
            .map(|&code| {
                SubscribeReturnCode::try_from(code).map_err(|_| Error::BadResponse {
                    packet_id: Some(packet_id),
                    reason: "invalid SUBACK return code",
                })
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(SubAckPacket {
            packet_id,
            return_codes,
        })
    }
}
