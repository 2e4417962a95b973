//! # Physical-Layer Control Header Codec
//!
//! Bit-exact construction and parsing of the DECT NR+ physical-layer control
//! field (ETSI TS 103 636-4, clause 6.2). Three header variants are carried:
//!
//! - **Type 1** (header format 000): 40-bit short broadcast header.
//! - **Type 2, format 000**: 80-bit unicast header with HARQ feedback control.
//! - **Type 2, format 001**: 80-bit unicast header without HARQ feedback
//!   control (the HARQ subfields are a reserved span).
//!
//! Fields are packed most-significant-bit first into a canonical byte order
//! that is independent of host endianness and of any compiler struct layout.
//! 16-bit radio device identities travel as high/low byte pairs on the wire
//! and are split/reassembled here, never by callers.
//!
//! ## Type 1 wire layout (5 bytes)
//!
//! | Byte | Bits 7..0                                                |
//! |------|----------------------------------------------------------|
//! | 0    | header format (3) \| packet length type (1) \| packet length (4) |
//! | 1    | short network id (8)                                     |
//! | 2    | transmitter id, high byte                                |
//! | 3    | transmitter id, low byte                                 |
//! | 4    | transmit power (4) \| reserved (1) \| DF MCS (3)         |
//!
//! ## Type 2 wire layout (10 bytes)
//!
//! Bytes 0..3 as type 1, then:
//!
//! | Byte | Bits 7..0                                                |
//! |------|----------------------------------------------------------|
//! | 4    | transmit power (4) \| DF MCS (4)                         |
//! | 5    | receiver id, high byte                                   |
//! | 6    | receiver id, low byte                                    |
//! | 7    | spatial streams (2) \| redundancy version (2) \| new-data (1) \| HARQ process (3) |
//! | 8    | feedback format (4) \| feedback info bits 11..8          |
//! | 9    | feedback info bits 7..0                                  |
//!
//! In format 001 byte 7 is spatial streams (2) over a 6-bit reserved span.
//!
//! Encoding masks every value to its field width, so oversized values are
//! truncated silently; supplying them is a caller error. Decoding is total:
//! any byte image yields in-width field values, and the caller chooses the
//! variant to interpret the bits with (nothing is inferred from content).

/// Size of the physical header field handed to the modem. Type 1 headers
/// occupy the first [`PHY_TYPE1_HEADER_SIZE`] bytes of it.
pub const PHY_HEADER_MAX_SIZE: usize = 10;
/// Wire size of a type 1 (short broadcast) header.
pub const PHY_TYPE1_HEADER_SIZE: usize = 5;
/// Wire size of a type 2 (unicast) header.
pub const PHY_TYPE2_HEADER_SIZE: usize = 10;

/// Header format code of the type 1 short broadcast header.
pub const HEADER_FORMAT_TYPE1: u8 = 0b000;
/// Header format code of the type 2 header with HARQ feedback control.
pub const HEADER_FORMAT_TYPE2_HARQ: u8 = 0b000;
/// Header format code of the type 2 header without HARQ feedback control.
pub const HEADER_FORMAT_TYPE2_NO_HARQ: u8 = 0b001;

/// Physical header type indicated to (and reported by) the modem alongside
/// the header bytes. The wire image alone does not carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PhyType {
    /// Type 1: short broadcast header.
    Type1 = 0,
    /// Type 2: unicast header, either format.
    Type2 = 1,
}

/// Unit of the packet length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketLengthType {
    /// Length counted in subslots (one subslot is 5 OFDM symbols).
    Subslots = 0,
    /// Length counted in slots.
    Slots = 1,
}

impl PacketLengthType {
    fn from_bit(bit: u8) -> Self {
        if bit & 0x01 == 0 {
            PacketLengthType::Subslots
        } else {
            PacketLengthType::Slots
        }
    }
}

/// An encoded physical header as the modem exchanges it: the fixed-size byte
/// field plus the PHY type tag that selects how much of it is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderBlock {
    pub phy_type: PhyType,
    pub bytes: [u8; PHY_HEADER_MAX_SIZE],
}

impl HeaderBlock {
    /// Number of meaningful leading bytes for this PHY type.
    pub fn used_len(&self) -> usize {
        match self.phy_type {
            PhyType::Type1 => PHY_TYPE1_HEADER_SIZE,
            PhyType::Type2 => PHY_TYPE2_HEADER_SIZE,
        }
    }

    /// The meaningful wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.used_len()]
    }
}

/// Type 1 short broadcast header fields.
///
/// `header_format` is 3 bits, `packet_length` and `transmit_power` 4 bits,
/// `df_mcs` 3 bits, `reserved` a single bit. Values wider than their field
/// are truncated on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortBroadcastHeader {
    pub packet_length: u8,
    pub packet_length_type: PacketLengthType,
    pub header_format: u8,
    pub short_network_id: u8,
    pub transmitter_id: u16,
    pub df_mcs: u8,
    pub reserved: u8,
    pub transmit_power: u8,
}

impl ShortBroadcastHeader {
    /// Packs the fields into the canonical 5-byte wire image.
    pub fn encode(&self) -> [u8; PHY_TYPE1_HEADER_SIZE] {
        [
            (self.header_format & 0x07) << 5
                | (self.packet_length_type as u8) << 4
                | (self.packet_length & 0x0F),
            self.short_network_id,
            (self.transmitter_id >> 8) as u8,
            (self.transmitter_id & 0xFF) as u8,
            (self.transmit_power & 0x0F) << 4 | (self.reserved & 0x01) << 3 | (self.df_mcs & 0x07),
        ]
    }

    /// Exact inverse of [`encode`](Self::encode).
    pub fn decode(bytes: &[u8; PHY_TYPE1_HEADER_SIZE]) -> Self {
        Self {
            packet_length: bytes[0] & 0x0F,
            packet_length_type: PacketLengthType::from_bit(bytes[0] >> 4),
            header_format: bytes[0] >> 5,
            short_network_id: bytes[1],
            transmitter_id: (bytes[2] as u16) << 8 | bytes[3] as u16,
            df_mcs: bytes[4] & 0x07,
            reserved: (bytes[4] >> 3) & 0x01,
            transmit_power: bytes[4] >> 4,
        }
    }
}

/// Type 2 format 000 header fields: unicast with HARQ feedback control.
///
/// `df_mcs` widens to 4 bits here. `feedback_info` is a 12-bit value split
/// into a 4-bit high part and an 8-bit low part on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnicastHarqHeader {
    pub packet_length: u8,
    pub packet_length_type: PacketLengthType,
    pub header_format: u8,
    pub short_network_id: u8,
    pub transmitter_id: u16,
    pub df_mcs: u8,
    pub transmit_power: u8,
    pub receiver_id: u16,
    pub harq_process: u8,
    pub new_data_indication: u8,
    pub redundancy_version: u8,
    pub spatial_streams: u8,
    pub feedback_format: u8,
    pub feedback_info: u16,
}

impl UnicastHarqHeader {
    /// Packs the fields into the canonical 10-byte wire image.
    pub fn encode(&self) -> [u8; PHY_TYPE2_HEADER_SIZE] {
        [
            (self.header_format & 0x07) << 5
                | (self.packet_length_type as u8) << 4
                | (self.packet_length & 0x0F),
            self.short_network_id,
            (self.transmitter_id >> 8) as u8,
            (self.transmitter_id & 0xFF) as u8,
            (self.transmit_power & 0x0F) << 4 | (self.df_mcs & 0x0F),
            (self.receiver_id >> 8) as u8,
            (self.receiver_id & 0xFF) as u8,
            (self.spatial_streams & 0x03) << 6
                | (self.redundancy_version & 0x03) << 4
                | (self.new_data_indication & 0x01) << 3
                | (self.harq_process & 0x07),
            (self.feedback_format & 0x0F) << 4 | ((self.feedback_info >> 8) & 0x0F) as u8,
            (self.feedback_info & 0xFF) as u8,
        ]
    }

    /// Exact inverse of [`encode`](Self::encode).
    pub fn decode(bytes: &[u8; PHY_TYPE2_HEADER_SIZE]) -> Self {
        Self {
            packet_length: bytes[0] & 0x0F,
            packet_length_type: PacketLengthType::from_bit(bytes[0] >> 4),
            header_format: bytes[0] >> 5,
            short_network_id: bytes[1],
            transmitter_id: (bytes[2] as u16) << 8 | bytes[3] as u16,
            df_mcs: bytes[4] & 0x0F,
            transmit_power: bytes[4] >> 4,
            receiver_id: (bytes[5] as u16) << 8 | bytes[6] as u16,
            harq_process: bytes[7] & 0x07,
            new_data_indication: (bytes[7] >> 3) & 0x01,
            redundancy_version: (bytes[7] >> 4) & 0x03,
            spatial_streams: bytes[7] >> 6,
            feedback_format: bytes[8] >> 4,
            feedback_info: ((bytes[8] & 0x0F) as u16) << 8 | bytes[9] as u16,
        }
    }
}

/// Type 2 format 001 header fields: unicast without HARQ feedback control.
/// The receiver is told to ignore the feedback bits; builders leave them 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnicastHeader {
    pub packet_length: u8,
    pub packet_length_type: PacketLengthType,
    pub header_format: u8,
    pub short_network_id: u8,
    pub transmitter_id: u16,
    pub df_mcs: u8,
    pub transmit_power: u8,
    pub receiver_id: u16,
    pub reserved: u8,
    pub spatial_streams: u8,
    pub feedback_format: u8,
    pub feedback_info: u16,
}

impl UnicastHeader {
    /// Packs the fields into the canonical 10-byte wire image.
    pub fn encode(&self) -> [u8; PHY_TYPE2_HEADER_SIZE] {
        [
            (self.header_format & 0x07) << 5
                | (self.packet_length_type as u8) << 4
                | (self.packet_length & 0x0F),
            self.short_network_id,
            (self.transmitter_id >> 8) as u8,
            (self.transmitter_id & 0xFF) as u8,
            (self.transmit_power & 0x0F) << 4 | (self.df_mcs & 0x0F),
            (self.receiver_id >> 8) as u8,
            (self.receiver_id & 0xFF) as u8,
            (self.spatial_streams & 0x03) << 6 | (self.reserved & 0x3F),
            (self.feedback_format & 0x0F) << 4 | ((self.feedback_info >> 8) & 0x0F) as u8,
            (self.feedback_info & 0xFF) as u8,
        ]
    }

    /// Exact inverse of [`encode`](Self::encode).
    pub fn decode(bytes: &[u8; PHY_TYPE2_HEADER_SIZE]) -> Self {
        Self {
            packet_length: bytes[0] & 0x0F,
            packet_length_type: PacketLengthType::from_bit(bytes[0] >> 4),
            header_format: bytes[0] >> 5,
            short_network_id: bytes[1],
            transmitter_id: (bytes[2] as u16) << 8 | bytes[3] as u16,
            df_mcs: bytes[4] & 0x0F,
            transmit_power: bytes[4] >> 4,
            receiver_id: (bytes[5] as u16) << 8 | bytes[6] as u16,
            reserved: bytes[7] & 0x3F,
            spatial_streams: bytes[7] >> 6,
            feedback_format: bytes[8] >> 4,
            feedback_info: ((bytes[8] & 0x0F) as u16) << 8 | bytes[9] as u16,
        }
    }
}

/// A control header of any variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlHeader {
    ShortBroadcast(ShortBroadcastHeader),
    UnicastHarq(UnicastHarqHeader),
    Unicast(UnicastHeader),
}

impl ControlHeader {
    pub fn phy_type(&self) -> PhyType {
        match self {
            ControlHeader::ShortBroadcast(_) => PhyType::Type1,
            ControlHeader::UnicastHarq(_) | ControlHeader::Unicast(_) => PhyType::Type2,
        }
    }

    /// Transmitter identity, present in every variant at the same offset.
    pub fn transmitter_id(&self) -> u16 {
        match self {
            ControlHeader::ShortBroadcast(h) => h.transmitter_id,
            ControlHeader::UnicastHarq(h) => h.transmitter_id,
            ControlHeader::Unicast(h) => h.transmitter_id,
        }
    }

    /// Encodes into the fixed-size header field handed to the modem.
    pub fn to_block(&self) -> HeaderBlock {
        let mut bytes = [0u8; PHY_HEADER_MAX_SIZE];
        match self {
            ControlHeader::ShortBroadcast(h) => {
                bytes[..PHY_TYPE1_HEADER_SIZE].copy_from_slice(&h.encode());
            }
            ControlHeader::UnicastHarq(h) => bytes.copy_from_slice(&h.encode()),
            ControlHeader::Unicast(h) => bytes.copy_from_slice(&h.encode()),
        }
        HeaderBlock {
            phy_type: self.phy_type(),
            bytes,
        }
    }

    /// Decodes a received header field. The variant is selected by the PHY
    /// type the modem reported and, for type 2, by the header format code.
    /// Returns `None` for format codes this layer does not speak.
    pub fn from_block(block: &HeaderBlock) -> Option<ControlHeader> {
        match block.phy_type {
            PhyType::Type1 => {
                let mut bytes = [0u8; PHY_TYPE1_HEADER_SIZE];
                bytes.copy_from_slice(&block.bytes[..PHY_TYPE1_HEADER_SIZE]);
                Some(ControlHeader::ShortBroadcast(ShortBroadcastHeader::decode(
                    &bytes,
                )))
            }
            PhyType::Type2 => match block.bytes[0] >> 5 {
                HEADER_FORMAT_TYPE2_HARQ => Some(ControlHeader::UnicastHarq(
                    UnicastHarqHeader::decode(&block.bytes),
                )),
                HEADER_FORMAT_TYPE2_NO_HARQ => {
                    Some(ControlHeader::Unicast(UnicastHeader::decode(&block.bytes)))
                }
                _ => None,
            },
        }
    }
}
