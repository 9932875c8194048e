use bytes::{Buf, Bytes, BytesMut};

use courier_core::{
    codec::{Decoder, Encoder},
    error::Error,
};

use crate::{encode_fixed_header, split_fixed_header};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct PubAckPacket {
    pub packet_id: u16,
}

const PACKET_TYPE: u8 = 0x04;

impl Encoder for PubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        encode_fixed_header(PACKET_TYPE << 4, self.packet_id.encoded_size(), buffer);

        self.packet_id.encode(buffer);
    }
}

impl Decoder for PubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let (_, mut body) = split_fixed_header(buffer)?;

        Ok(PubAckPacket {
            packet_id: decode_ack_packet_id(&mut body)?,
        })
    }
}

/// Reads the body shared by PUBACK and UNSUBACK: a single non-zero packet
/// identifier.
pub(crate) fn decode_ack_packet_id(body: &mut Bytes) -> crate::Result<u16> {
    if body.remaining() != 2 {
        return Err(Error::MalformedPacket(
            "acknowledgment remaining length must be 2",
        ));
    }

    let packet_id = u16::decode(body)?;

    if packet_id == 0 {
        return Err(Error::MalformedPacket("packet identifier must be non-zero"));
    }

    Ok(packet_id)
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use courier_core::{
        codec::{Decoder, Encoder},
        error::Error,
    };

    use crate::puback::PubAckPacket;

    #[test]
    fn test_puback_packet_encode_decode() {
        let expected = vec![0x40, 0x02, 0x00, 0x01];

        let packet = PubAckPacket { packet_id: 1 };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);

        let new_packet = PubAckPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }

    #[test]
    fn test_puback_invalid() {
        for bytes in [
            &[0x40, 0x03, 0x00, 0x01, 0x00][..],
            &[0x40, 0x02, 0x00, 0x00][..],
        ] {
            assert!(matches!(
                PubAckPacket::decode(&mut Bytes::copy_from_slice(bytes)),
                Err(Error::MalformedPacket(_))
            ));
        }
    }
}
