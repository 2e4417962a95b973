//! # Radio Payload Records
//!
//! The data field of a frame is a fixed 32-byte buffer. Two four-byte record
//! layouts travel in it: a presence report (a radio device announcing its
//! 32-bit identity) and a button command (the 32-bit code of a pressed
//! button). Both are raw little-endian binary.

/// Maximum size of the data field of a single frame, in bytes.
pub const MAX_DATA_LEN: usize = 32;

/// A frame's data field: fixed storage plus the used length.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RadioPayload {
    pub data: [u8; MAX_DATA_LEN],
    pub length: usize,
}

impl RadioPayload {
    pub const fn empty() -> Self {
        Self {
            data: [0; MAX_DATA_LEN],
            length: 0,
        }
    }

    /// Copies `bytes` into a new payload. Returns `None` when the slice does
    /// not fit the data field.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MAX_DATA_LEN {
            return None;
        }
        let mut data = [0u8; MAX_DATA_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            data,
            length: bytes.len(),
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }
}

/// Announcement record a radio device broadcasts about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceReport {
    pub transmitter_id: u32,
}

impl PresenceReport {
    pub fn to_payload(&self) -> RadioPayload {
        let mut payload = RadioPayload::empty();
        payload.data[0..4].copy_from_slice(&self.transmitter_id.to_le_bytes());
        payload.length = 4;
        payload
    }

    pub fn from_payload(payload: &RadioPayload) -> Option<Self> {
        if payload.length != 4 {
            return None;
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&payload.data[0..4]);
        Some(Self {
            transmitter_id: u32::from_le_bytes(bytes),
        })
    }
}

/// Command record carrying the one-hot code of a pressed button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonCommand {
    pub button_code: u32,
}

impl ButtonCommand {
    pub fn to_payload(&self) -> RadioPayload {
        let mut payload = RadioPayload::empty();
        payload.data[0..4].copy_from_slice(&self.button_code.to_le_bytes());
        payload.length = 4;
        payload
    }

    pub fn from_payload(payload: &RadioPayload) -> Option<Self> {
        if payload.length != 4 {
            return None;
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&payload.data[0..4]);
        Some(Self {
            button_code: u32::from_le_bytes(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_report_encodes_little_endian() {
        let payload = PresenceReport {
            transmitter_id: 0x0000_1234,
        }
        .to_payload();
        assert_eq!(payload.as_slice(), [0x34, 0x12, 0x00, 0x00]);
        assert_eq!(
            PresenceReport::from_payload(&payload),
            Some(PresenceReport {
                transmitter_id: 0x1234
            })
        );
    }

    #[test]
    fn button_command_round_trips() {
        let payload = ButtonCommand { button_code: 4 }.to_payload();
        assert_eq!(
            ButtonCommand::from_payload(&payload),
            Some(ButtonCommand { button_code: 4 })
        );
    }

    #[test]
    fn records_reject_foreign_lengths() {
        let payload = RadioPayload::from_slice(&[1, 2, 3]).unwrap();
        assert_eq!(PresenceReport::from_payload(&payload), None);
        assert_eq!(ButtonCommand::from_payload(&payload), None);
    }

    #[test]
    fn oversized_slices_are_refused() {
        assert!(RadioPayload::from_slice(&[0u8; MAX_DATA_LEN]).is_some());
        assert!(RadioPayload::from_slice(&[0u8; MAX_DATA_LEN + 1]).is_none());
    }
}
