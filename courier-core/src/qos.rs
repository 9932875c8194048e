#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
    Invalid = 0xff,
}

impl QoS {
    /// Levels the client engine can carry end-to-end.
    pub fn is_supported(self) -> bool {
        matches!(self, QoS::AtMostOnce | QoS::AtLeastOnce)
    }
}

impl From<u8> for QoS {
    fn from(n: u8) -> Self {
        match n {
            0x00 => QoS::AtMostOnce,
            0x01 => QoS::AtLeastOnce,
            0x02 => QoS::ExactlyOnce,
            _ => QoS::Invalid,
        }
    }
}
