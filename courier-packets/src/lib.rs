pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod pingreq;
pub mod pingresp;
pub mod puback;
pub mod publish;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

use bytes::{Buf, Bytes, BytesMut};

use courier_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    Result,
};

use crate::{
    connack::ConnAckPacket, connect::ConnectPacket, disconnect::DisconnectPacket,
    pingreq::PingReqPacket, pingresp::PingRespPacket, puback::PubAckPacket,
    publish::PublishPacket, suback::SubAckPacket, subscribe::SubscribePacket,
    unsuback::UnsubAckPacket, unsubscribe::UnsubscribePacket,
};

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum ControlPacket {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq(PingReqPacket),
    PingResp(PingRespPacket),
    Disconnect(DisconnectPacket),
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PacketType {
    Connect = 0x01,
    ConnAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    PingReq,
    PingResp,
    Disconnect,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        use PacketType::*;

        let res = match value {
            0x01 => Connect,
            0x02 => ConnAck,
            0x03 => Publish,
            0x04 => PubAck,
            0x05 => PubRec,
            0x06 => PubRel,
            0x07 => PubComp,
            0x08 => Subscribe,
            0x09 => SubAck,
            0x0a => Unsubscribe,
            0x0b => UnsubAck,
            0x0c => PingReq,
            0x0d => PingResp,
            0x0e => Disconnect,
            _ => return Err(Error::MalformedPacket("unknown packet type")),
        };

        Ok(res)
    }
}

impl PacketType {
    /// Whether a server may send this packet type to a client.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            PacketType::ConnAck
                | PacketType::Publish
                | PacketType::PubAck
                | PacketType::SubAck
                | PacketType::UnsubAck
                | PacketType::PingReq
                | PacketType::PingResp
        )
    }

    /// Identifies a packet a server may send to a client from its first byte.
    ///
    /// Apart from PUBLISH, whose low nibble carries DUP/QoS/RETAIN, every
    /// accepted packet has its reserved flags cleared.
    pub fn identify_inbound(first_byte: u8) -> Result<Self> {
        let packet_type = inbound_type(first_byte)?;

        if packet_type != PacketType::Publish && first_byte & 0x0f != 0 {
            return Err(Error::MalformedPacket("reserved flags are set"));
        }

        Ok(packet_type)
    }
}

fn inbound_type(first_byte: u8) -> Result<PacketType> {
    let packet_type = PacketType::try_from(first_byte >> 4)?;

    if !packet_type.is_inbound() {
        return Err(Error::MalformedPacket("unexpected packet from server"));
    }

    Ok(packet_type)
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PacketType::Connect => "CONNECT",
            PacketType::ConnAck => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::PubAck => "PUBACK",
            PacketType::PubRec => "PUBREC",
            PacketType::PubRel => "PUBREL",
            PacketType::PubComp => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::SubAck => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::UnsubAck => "UNSUBACK",
            PacketType::PingReq => "PINGREQ",
            PacketType::PingResp => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
        };

        write!(f, "{}", name)
    }
}

/// Type byte and remaining length at the start of an inbound packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: usize,
    pub header_length: usize,
}

impl FixedHeader {
    /// Reads the fixed header without consuming `src`.
    ///
    /// The packet type is identified before the remaining length is read, so
    /// an unknown type byte fails without looking at further input. Reserved
    /// flags are left for the packet decoder to reject, which lets a caller
    /// frame a bad acknowledgment and tell which request it answers.
    pub fn parse(src: &[u8]) -> Result<FixedHeader> {
        let mut peeker = src;

        let first_byte = u8::decode(&mut peeker)?;
        let packet_type = inbound_type(first_byte)?;
        let remaining_length = VariableByteInteger::decode(&mut peeker)?;

        Ok(FixedHeader {
            packet_type,
            flags: first_byte & 0x0f,
            remaining_length: remaining_length.0 as usize,
            header_length: 1 + remaining_length.encoded_size(),
        })
    }

    pub fn packet_length(&self) -> usize {
        self.header_length + self.remaining_length
    }
}

/// Consumes the fixed header of a packet and returns its first byte together
/// with exactly `remaining length` bytes of body.
pub(crate) fn split_fixed_header<T: Buf>(buffer: &mut T) -> Result<(u8, Bytes)> {
    let first_byte = u8::decode(buffer)?;
    let remaining_len = VariableByteInteger::decode(buffer)?.0 as usize;

    if buffer.remaining() < remaining_len {
        return Err(Error::PacketIncomplete);
    }

    Ok((first_byte, buffer.copy_to_bytes(remaining_len)))
}

/// Writes a fixed header for a packet body of `remaining_len` bytes.
pub(crate) fn encode_fixed_header(first_byte: u8, remaining_len: usize, buffer: &mut BytesMut) {
    first_byte.encode(buffer);
    VariableByteInteger(remaining_len as u32).encode(buffer);
}

impl ControlPacket {
    /// Checks whether `src` starts with one whole packet and returns its
    /// fixed header. Partial input yields `Error::PacketIncomplete`.
    pub fn check(src: &[u8]) -> Result<FixedHeader> {
        let header = FixedHeader::parse(src)?;

        if src.len() < header.packet_length() {
            return Err(Error::PacketIncomplete);
        }

        Ok(header)
    }

    /// Removes exactly one packet from the front of `src` and decodes it.
    ///
    /// On `Error::PacketIncomplete` nothing is consumed.
    pub fn parse(src: &mut BytesMut) -> Result<ControlPacket> {
        use ControlPacket::*;

        let header = Self::check(&src[..])?;
        let mut frame = src.split_to(header.packet_length()).freeze();

        PacketType::identify_inbound(frame[0])?;

        let packet = match header.packet_type {
            PacketType::ConnAck => ConnAck(ConnAckPacket::decode(&mut frame)?),
            PacketType::Publish => Publish(PublishPacket::decode(&mut frame)?),
            PacketType::PubAck => PubAck(PubAckPacket::decode(&mut frame)?),
            PacketType::SubAck => SubAck(SubAckPacket::decode(&mut frame)?),
            PacketType::UnsubAck => UnsubAck(UnsubAckPacket::decode(&mut frame)?),
            PacketType::PingReq => PingReq(PingReqPacket::decode(&mut frame)?),
            PacketType::PingResp => PingResp(PingRespPacket::decode(&mut frame)?),
            _ => return Err(Error::MalformedPacket("unexpected packet from server")),
        };

        Ok(packet)
    }

    pub fn packet_type(&self) -> PacketType {
        use ControlPacket::*;

        match self {
            Connect(_) => PacketType::Connect,
            ConnAck(_) => PacketType::ConnAck,
            Publish(_) => PacketType::Publish,
            PubAck(_) => PacketType::PubAck,
            Subscribe(_) => PacketType::Subscribe,
            SubAck(_) => PacketType::SubAck,
            Unsubscribe(_) => PacketType::Unsubscribe,
            UnsubAck(_) => PacketType::UnsubAck,
            PingReq(_) => PacketType::PingReq,
            PingResp(_) => PacketType::PingResp,
            Disconnect(_) => PacketType::Disconnect,
        }
    }

    /// Number of bytes following the fixed header.
    pub fn remaining_length(&self) -> usize {
        use ControlPacket::*;

        match self {
            Connect(p) => p.remaining_length(),
            ConnAck(_) => 2,
            Publish(p) => p.remaining_length(),
            PubAck(_) => 2,
            Subscribe(p) => p.remaining_length(),
            SubAck(p) => 2 + p.return_codes.len(),
            Unsubscribe(p) => p.remaining_length(),
            UnsubAck(_) => 2,
            PingReq(_) | PingResp(_) | Disconnect(_) => 0,
        }
    }

    /// Encodes the packet into a fresh buffer after checking that its body
    /// fits in the remaining length field.
    pub fn serialize(&self) -> Result<BytesMut> {
        let remaining_len = VariableByteInteger::new(self.remaining_length())?;

        let mut buffer = BytesMut::with_capacity(1 + remaining_len.encoded_size() + remaining_len.0 as usize);
        self.encode(&mut buffer);

        Ok(buffer)
    }
}

impl Encoder for ControlPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        use ControlPacket::*;

        match self {
            Connect(p) => p.encode(buffer),
            ConnAck(p) => p.encode(buffer),
            Publish(p) => p.encode(buffer),
            PubAck(p) => p.encode(buffer),
            Subscribe(p) => p.encode(buffer),
            SubAck(p) => p.encode(buffer),
            Unsubscribe(p) => p.encode(buffer),
            UnsubAck(p) => p.encode(buffer),
            PingReq(p) => p.encode(buffer),
            PingResp(p) => p.encode(buffer),
            Disconnect(p) => p.encode(buffer),
        }
    }
}
