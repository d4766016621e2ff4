use std::fmt::{Display, Formatter};

/// Sequence number of a packet in one direction of a connection. Ids are wrap-around, so 0
///  follows after 0xFFFF.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct PacketId(u16);

impl Display for PacketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PacketId {
    pub const ZERO: PacketId = PacketId(0);

    pub fn from_raw(value: u16) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }

    pub fn next(&self) -> PacketId {
        PacketId(self.0.wrapping_add(1))
    }

    pub fn prev(&self) -> PacketId {
        PacketId(self.0.wrapping_sub(1))
    }
}
