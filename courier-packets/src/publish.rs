use bytes::{Buf, BufMut, Bytes, BytesMut};

use courier_core::{
    codec::{Decoder, Encoder},
    error::Error,
    qos::QoS,
    topic::validate_topic_name,
};

use crate::{encode_fixed_header, split_fixed_header, FixedHeader};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic_name: String,
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

const PACKET_TYPE: u8 = 0x03;

const DUP_FLAG: u8 = 0b0000_1000;

impl PublishPacket {
    pub fn remaining_length(&self) -> usize {
        self.topic_name.encoded_size() + self.packet_id.encoded_size() + self.payload.len()
    }
}

impl Encoder for PublishPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut fixed_header = PACKET_TYPE << 4;

        if self.dup {
            fixed_header |= DUP_FLAG;
        }

        fixed_header |= (self.qos as u8) << 1;

        if self.retain {
            fixed_header |= 0b0000_0001;
        }

        encode_fixed_header(fixed_header, self.remaining_length(), buffer);

        self.topic_name.encode(buffer);
        self.packet_id.encode(buffer);
        buffer.put(self.payload.clone());
    }
}

impl Decoder for PublishPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let (fixed_header, mut body) = split_fixed_header(buffer)?;

        let dup = fixed_header & DUP_FLAG != 0;
        let retain = fixed_header & 0b0000_0001 != 0;
        let qos: QoS = ((fixed_header >> 1) & 0b0000_0011).into();

        if qos == QoS::Invalid {
            return Err(Error::MalformedPacket("PUBLISH QoS must not be 3"));
        }

        // Topic length and at least one topic byte, plus the packet
        // identifier when QoS > 0.
        let minimum = match qos {
            QoS::AtMostOnce => 3,
            _ => 5,
        };

        if body.remaining() < minimum {
            return Err(Error::MalformedPacket("PUBLISH remaining length too short"));
        }

        let topic_name = String::decode(&mut body)?;

        if validate_topic_name(&topic_name).is_err() {
            return Err(Error::MalformedPacket("PUBLISH topic name is invalid"));
        }

        let packet_id = if qos != QoS::AtMostOnce {
            let id = u16::decode(&mut body).map_err(|_| {
                Error::MalformedPacket("PUBLISH is missing its packet identifier")
            })?;

            if id == 0 {
                return Err(Error::MalformedPacket("packet identifier must be non-zero"));
            }

            Some(id)
        } else {
            None
        };

        Ok(PublishPacket {
            dup,
            qos,
            retain,
            topic_name,
            packet_id,
            payload: body,
        })
    }
}

/// Marks an already serialized PUBLISH as a retransmission.
pub fn set_dup(packet: &mut BytesMut) {
    if let Some(first_byte) = packet.first_mut() {
        *first_byte |= DUP_FLAG;
    }
}

/// Rewrites the packet identifier of an already serialized QoS 1 PUBLISH.
pub fn replace_packet_id(packet: &mut BytesMut, packet_id: u16) -> crate::Result<()> {
    let header = FixedHeader::parse(&packet[..])?;

    let topic_start = header.header_length;
    if packet.len() < topic_start + 2 {
        return Err(Error::MalformedPacket("PUBLISH remaining length too short"));
    }

    let topic_len = u16::from_be_bytes([packet[topic_start], packet[topic_start + 1]]) as usize;
    let id_start = topic_start + 2 + topic_len;

    if header.flags & 0b0000_0110 == 0 || packet.len() < id_start + 2 {
        return Err(Error::MalformedPacket("PUBLISH is missing its packet identifier"));
    }

    packet[id_start..id_start + 2].copy_from_slice(&packet_id.to_be_bytes());

    Ok(())
}
