use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Packet is not complete")]
    PacketIncomplete,

    /// The byte stream cannot be framed or a packet's fixed layout is wrong.
    /// No outstanding operation can be attributed to it.
    #[error("Malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// The packet was framed correctly but its content is not acceptable.
    #[error("Bad response (packet identifier {packet_id:?}): {reason}")]
    BadResponse {
        packet_id: Option<u16>,
        reason: &'static str,
    },

    #[error("Remaining length {0} exceeds the maximum of 268435455")]
    RemainingLengthTooLarge(usize),

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,
}
