use std::fmt::{Display, Formatter};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::PacketError;
use crate::packet_id::PacketId;

/// Fixed length of the packet header: opcode(1) + id(2) + data len(2) + data len left(2)
pub const HEADER_LEN: usize = 7;

/// Maximum UDP payload size for IPV4
pub const MAX_DATAGRAM_LEN: usize = 65_507;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Connect,
    Ack,
    Data,
    Disconnect,
}

impl PacketKind {
    const CONNECT_BIT: u8 = 1 << 0;
    const ACK_BIT: u8 = 1 << 1;
    const DATA_BIT: u8 = 1 << 2;
    const DISCONNECT_BIT: u8 = 1 << 3;

    pub fn opcode(&self) -> u8 {
        match self {
            PacketKind::Connect => Self::CONNECT_BIT,
            PacketKind::Ack => Self::ACK_BIT,
            PacketKind::Data => Self::DATA_BIT,
            PacketKind::Disconnect => Self::DISCONNECT_BIT,
        }
    }

    /// Well-behaved peers set exactly one bit. If several are set, the lowest recognized bit
    ///  determines the kind.
    pub fn from_opcode(opcode: u8) -> Result<PacketKind, PacketError> {
        if opcode & Self::CONNECT_BIT != 0 {
            Ok(PacketKind::Connect)
        }
        else if opcode & Self::ACK_BIT != 0 {
            Ok(PacketKind::Ack)
        }
        else if opcode & Self::DATA_BIT != 0 {
            Ok(PacketKind::Data)
        }
        else if opcode & Self::DISCONNECT_BIT != 0 {
            Ok(PacketKind::Disconnect)
        }
        else {
            Err(PacketError::UnknownOpcode(opcode))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub id: PacketId,
    pub data_len: u16,
    pub data_len_left: u16,
    /// present for DATA packets only
    pub payload: Option<Bytes>,
}

impl Packet {
    /// Creates a packet, checking the per-kind rules for a well-formed packet.
    ///
    /// NB: [Packet::deser] deliberately does not apply these rules - it accepts everything that
    ///  can be parsed
    pub fn new(kind: PacketKind, id: PacketId, data_len: u16, data_len_left: u16, payload: Option<Bytes>) -> Result<Packet, PacketError> {
        match kind {
            PacketKind::Connect if id != PacketId::ZERO => return Err(PacketError::NonZeroConnectId(id)),
            PacketKind::Connect | PacketKind::Ack | PacketKind::Disconnect if payload.is_some() => return Err(PacketError::UnexpectedPayload(kind)),
            PacketKind::Data if payload.as_ref().map_or(true, |p| p.is_empty()) => return Err(PacketError::MissingPayload),
            _ => {}
        }

        Ok(Packet {
            kind,
            id,
            data_len,
            data_len_left,
            payload,
        })
    }

    pub fn connect() -> Packet {
        Self::control(PacketKind::Connect, PacketId::ZERO)
    }

    pub fn ack(id: PacketId) -> Packet {
        Self::control(PacketKind::Ack, id)
    }

    pub fn disconnect(id: PacketId) -> Packet {
        Self::control(PacketKind::Disconnect, id)
    }

    fn control(kind: PacketKind, id: PacketId) -> Packet {
        Packet {
            kind,
            id,
            data_len: 0,
            data_len_left: 0,
            payload: None,
        }
    }

    /// A single DATA fragment. The caller is responsible for `payload` being non-empty and no
    ///  longer than `u16::MAX`.
    pub fn data(id: PacketId, data_len_left: u16, payload: Bytes) -> Packet {
        debug_assert!(!payload.is_empty() && payload.len() <= u16::MAX as usize);

        Packet {
            kind: PacketKind::Data,
            id,
            data_len: payload.len() as u16,
            data_len_left,
            payload: Some(payload),
        }
    }

    pub fn serialized_len(&self) -> usize {
        HEADER_LEN + self.payload.as_ref().map_or(0, |p| p.len())
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.reserve(self.serialized_len());

        buf.put_u8(self.kind.opcode());
        buf.put_u16(self.id.to_raw());
        buf.put_u16(self.data_len);
        buf.put_u16(self.data_len_left);
        if let Some(payload) = &self.payload {
            buf.put_slice(payload);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    /// Parses a received datagram. For DATA packets, everything after the header is payload;
    ///  trailing bytes of other packet kinds are ignored.
    pub fn deser(mut buf: &[u8]) -> Result<Packet, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TooShort(buf.len()));
        }

        let kind = PacketKind::from_opcode(buf.get_u8())?;
        let id = PacketId::from_raw(buf.get_u16());
        let data_len = buf.get_u16();
        let data_len_left = buf.get_u16();

        let payload = match kind {
            PacketKind::Data => Some(Bytes::copy_from_slice(buf)),
            _ => None,
        };

        Ok(Packet {
            kind,
            id,
            data_len,
            data_len_left,
            payload,
        })
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} id={} data_len={} data_len_left={}", self.kind, self.id, self.data_len, self.data_len_left)?;
        if let Some(payload) = &self.payload {
            let ascii: String = payload.iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            write!(f, " payload({})=[{}]", payload.len(), ascii)?;
        }
        Ok(())
    }
}
