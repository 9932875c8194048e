use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;

/// Largest value representable by the remaining length field.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// The remaining length field never spans more than four bytes.
const MAX_VAR_BYTE_INTEGER_BYTES: usize = 4;

pub trait Decoder {
    fn decode<T>(buffer: &mut T) -> crate::Result<Self>
    where
        Self: Sized,
        T: Buf;
}

pub trait Encoder {
    fn encode(&self, buffer: &mut BytesMut);
    fn encoded_size(&self) -> usize {
        mem::size_of_val(self)
    }
}

fn encode_var_byte_integer(value: u32, encoded: &mut BytesMut) {
    let mut x = value;

    loop {
        let mut encoded_byte: u8 = (x % 128) as u8;
        x /= 128;

        if x > 0 {
            encoded_byte |= 0b1000_0000;
        }

        encoded.put_u8(encoded_byte);

        if x == 0 {
            break;
        }
    }
}

fn decode_var_byte_integer<T: Buf>(encoded: &mut T) -> crate::Result<VariableByteInteger> {
    let mut multiplier: u32 = 1;
    let mut value: u32 = 0;
    let mut bytes_decoded = 0;

    loop {
        if bytes_decoded == MAX_VAR_BYTE_INTEGER_BYTES {
            return Err(Error::MalformedPacket(
                "remaining length continues past the fourth byte",
            ));
        }

        if !encoded.has_remaining() {
            return Err(Error::PacketIncomplete);
        }

        let encoded_byte = encoded.get_u8();
        value += (encoded_byte & 0b0111_1111) as u32 * multiplier;
        multiplier *= 128;
        bytes_decoded += 1;

        if (encoded_byte & 0b1000_0000) == 0 {
            break;
        }
    }

    let decoded = VariableByteInteger(value);

    // 0x80 0x80 0x80 0x00 decodes to zero but is not the minimal encoding.
    if decoded.encoded_size() != bytes_decoded {
        return Err(Error::MalformedPacket(
            "remaining length is not minimally encoded",
        ));
    }

    Ok(decoded)
}

#[derive(PartialEq, Eq, Debug, Default, Clone, Copy)]
pub struct VariableByteInteger(pub u32);

impl VariableByteInteger {
    /// Builds a remaining length, rejecting values the field cannot carry.
    pub fn new(value: usize) -> crate::Result<Self> {
        if value > MAX_REMAINING_LENGTH {
            return Err(Error::RemainingLengthTooLarge(value));
        }

        Ok(VariableByteInteger(value as u32))
    }
}

impl Encoder for VariableByteInteger {
    fn encode(&self, buffer: &mut BytesMut) {
        encode_var_byte_integer(self.0, buffer);
    }

    fn encoded_size(&self) -> usize {
        match self.0 {
            0..=127 => 1,
            128..=16383 => 2,
            16384..=2097151 => 3,
            2097152..=268435455 => 4,
            _ => unreachable!(),
        }
    }
}

impl Decoder for VariableByteInteger {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        decode_var_byte_integer(buffer)
    }
}

impl Encoder for String {
    fn encode(&self, buffer: &mut BytesMut) {
        self.as_str().encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.len() + mem::size_of::<u16>()
    }
}

impl Decoder for String {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let bytes = Bytes::decode(buffer)?;

        String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidUtf8)
    }
}

impl Encoder for &str {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u16(self.len() as u16);
        buffer.put(self.as_bytes());
    }

    fn encoded_size(&self) -> usize {
        self.len() + mem::size_of::<u16>()
    }
}

impl Encoder for u8 {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(*self);
    }
}

impl Decoder for u8 {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if !buffer.has_remaining() {
            return Err(Error::PacketIncomplete);
        }

        Ok(buffer.get_u8())
    }
}

impl Encoder for u16 {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u16(*self);
    }
}

impl Decoder for u16 {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if buffer.remaining() < 2 {
            return Err(Error::PacketIncomplete);
        }

        Ok(buffer.get_u16())
    }
}

impl Encoder for Bytes {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u16(self.len() as u16);
        buffer.extend_from_slice(self);
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u16>() + self.len()
    }
}

impl Decoder for Bytes {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if buffer.remaining() < 2 {
            return Err(Error::PacketIncomplete);
        }

        let length = buffer.get_u16();
        if buffer.remaining() < length as usize {
            return Err(Error::MalformedPacket("string length exceeds packet"));
        }

        Ok(buffer.copy_to_bytes(length.into()))
    }
}

impl<T> Encoder for Option<T>
where
    T: Encoder,
{
    fn encode(&self, buffer: &mut BytesMut) {
        if let Some(v) = self {
            v.encode(buffer);
        }
    }

    fn encoded_size(&self) -> usize {
        match self {
            Some(v) => v.encoded_size(),
            None => 0,
        }
    }
}

impl<T> Encoder for Vec<T>
where
    T: Encoder,
{
    fn encode(&self, buffer: &mut BytesMut) {
        for e in self {
            e.encode(buffer);
        }
    }

    fn encoded_size(&self) -> usize {
        self.iter().map(Encoder::encoded_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use crate::{codec::*, error::Error};

    fn round_trip(value: usize) -> crate::Result<u32> {
        let mut encoded = BytesMut::new();
        VariableByteInteger::new(value)?.encode(&mut encoded);

        Ok(VariableByteInteger::decode(&mut encoded)?.0)
    }

    #[test]
    fn test_codec_encode_decode() -> crate::Result<()> {
        let value: u16 = 325;
        let mut encoded = BytesMut::new();

        VariableByteInteger(value as u32).encode(&mut encoded);
        assert_eq!(encoded, Bytes::from(vec![0xc5, 0x02]));

        let decoded = VariableByteInteger::decode(&mut encoded)?;
        assert_eq!(decoded.0 as u16, value);

        Ok(())
    }

    #[test]
    fn test_remaining_length_boundaries() -> crate::Result<()> {
        for value in [0, 129, 16386, MAX_REMAINING_LENGTH] {
            assert_eq!(round_trip(value)? as usize, value);
        }

        Ok(())
    }

    #[test]
    fn test_remaining_length_known_encodings() -> crate::Result<()> {
        let cases: [(&[u8], u32); 4] = [
            (&[0x00], 0),
            (&[0x81, 0x01], 129),
            (&[0x82, 0x80, 0x01], 16386),
            (&[0xff, 0xff, 0xff, 0x7f], 268_435_455),
        ];

        for (bytes, expected) in cases {
            let mut encoded = Bytes::copy_from_slice(bytes);
            assert_eq!(VariableByteInteger::decode(&mut encoded)?.0, expected);
            assert!(!encoded.has_remaining());
        }

        Ok(())
    }

    #[test]
    fn test_remaining_length_too_large() {
        assert_eq!(
            VariableByteInteger::new(MAX_REMAINING_LENGTH + 1),
            Err(Error::RemainingLengthTooLarge(MAX_REMAINING_LENGTH + 1))
        );
    }

    #[test]
    fn test_decoder_malformed_integer() {
        let mut encoded = Bytes::from(vec![0xff, 0xff, 0xff, 0x8f]);

        assert!(matches!(
            VariableByteInteger::decode(&mut encoded),
            Err(Error::MalformedPacket(_))
        ));

        let mut encoded = Bytes::from(vec![0xc5, 0xc5, 0xc5, 0xc5, 0x02]);

        assert!(matches!(
            VariableByteInteger::decode(&mut encoded),
            Err(Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_decoder_non_minimal_integer() {
        let mut encoded = Bytes::from(vec![0x80, 0x80, 0x80, 0x00]);

        assert!(matches!(
            VariableByteInteger::decode(&mut encoded),
            Err(Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_decoder_incomplete_integer() {
        let mut encoded = Bytes::from(vec![0x82, 0x80]);

        assert_eq!(
            VariableByteInteger::decode(&mut encoded),
            Err(Error::PacketIncomplete)
        );
    }

    #[test]
    fn test_string_decode() -> crate::Result<()> {
        let mut encoded = Bytes::from_static(&[0x00, 0x03, b'a', b'w', b's', 0xff]);
        assert_eq!(String::decode(&mut encoded)?, "aws");
        assert_eq!(encoded.remaining(), 1);

        let mut truncated = Bytes::from_static(&[0x00, 0x05, b'a']);
        assert!(matches!(
            String::decode(&mut truncated),
            Err(Error::MalformedPacket(_))
        ));

        Ok(())
    }
}
