//! Fixed-width message codec
//!
//! `decode(encode(m)) == m` for every message whose tag is known.

// Tag bytes
pub const TAG_STATUS: u8 = b'S';
pub const TAG_AMOUNT: u8 = b'A';
pub const TAG_CALIBRATION: u8 = b'C';
pub const TAG_WARNING: u8 = b'W';
pub const TAG_ERROR: u8 = b'E';
pub const TAG_FILL_ABOVE: u8 = b'0';
pub const TAG_FILL_NEAR: u8 = b'1';
pub const TAG_FILL_BELOW: u8 = b'2';
pub const TAG_MODE: u8 = b'M';
pub const TAG_FEED: u8 = b'F';

/// Device id meaning "not addressed to a specific device"
pub const NO_DEVICE: u8 = 99;

/// Largest mass representable in a payload, in grams
pub const MAX_PAYLOAD_GRAMS: f32 = u16::MAX as f32 / 100.0;

/// Fill level band reported alongside the remaining-days estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FillBand {
    /// Container known to be above the top sensor: "more than N days"
    Above = 0,
    /// Between sensors, estimated from grams fed since last full: "about N days"
    Near = 1,
    /// Below the low sensor: "less than N days"
    Below = 2,
}

/// Message tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tag {
    Status,
    Amount,
    Calibration,
    Warning,
    Error,
    FillLevel(FillBand),
    Mode,
    Feed,
}

impl Tag {
    /// Wire byte for this tag
    pub fn to_byte(self) -> u8 {
        match self {
            Tag::Status => TAG_STATUS,
            Tag::Amount => TAG_AMOUNT,
            Tag::Calibration => TAG_CALIBRATION,
            Tag::Warning => TAG_WARNING,
            Tag::Error => TAG_ERROR,
            Tag::FillLevel(FillBand::Above) => TAG_FILL_ABOVE,
            Tag::FillLevel(FillBand::Near) => TAG_FILL_NEAR,
            Tag::FillLevel(FillBand::Below) => TAG_FILL_BELOW,
            Tag::Mode => TAG_MODE,
            Tag::Feed => TAG_FEED,
        }
    }

    /// Parse a wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            TAG_STATUS => Some(Tag::Status),
            TAG_AMOUNT => Some(Tag::Amount),
            TAG_CALIBRATION => Some(Tag::Calibration),
            TAG_WARNING => Some(Tag::Warning),
            TAG_ERROR => Some(Tag::Error),
            TAG_FILL_ABOVE => Some(Tag::FillLevel(FillBand::Above)),
            TAG_FILL_NEAR => Some(Tag::FillLevel(FillBand::Near)),
            TAG_FILL_BELOW => Some(Tag::FillLevel(FillBand::Below)),
            TAG_MODE => Some(Tag::Mode),
            TAG_FEED => Some(Tag::Feed),
            _ => None,
        }
    }
}

/// Errors when interpreting a received word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageError {
    /// Tag byte is not part of the protocol
    UnknownTag(u8),
    /// Tag is valid but not expected in this direction
    UnexpectedTag(Tag),
    /// Payload is not a valid code for the tag
    InvalidCode(u16),
}

/// One protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    pub tag: Tag,
    pub device: u8,
    pub payload: u16,
}

impl Message {
    pub const fn new(tag: Tag, device: u8, payload: u16) -> Self {
        Self {
            tag,
            device,
            payload,
        }
    }

    /// Pack into a 32-bit word
    pub fn encode(&self) -> u32 {
        ((self.tag.to_byte() as u32) << 24) | ((self.device as u32) << 16) | self.payload as u32
    }

    /// Unpack a 32-bit word
    pub fn decode(word: u32) -> Result<Self, MessageError> {
        let tag_byte = (word >> 24) as u8;
        let tag = Tag::from_byte(tag_byte).ok_or(MessageError::UnknownTag(tag_byte))?;
        Ok(Self {
            tag,
            device: (word >> 16) as u8,
            payload: word as u16,
        })
    }
}

/// Convert grams to a hundredths-of-a-gram payload
///
/// Negative readings clamp to zero, oversized readings to `u16::MAX`.
pub fn mass_to_payload(grams: f32) -> u16 {
    if !(grams > 0.0) {
        return 0;
    }
    // `as` saturates
    (grams * 100.0 + 0.5) as u16
}

/// Convert a hundredths-of-a-gram payload to grams
pub fn payload_to_mass(payload: u16) -> f32 {
    payload as f32 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_TAGS: [Tag; 10] = [
        Tag::Status,
        Tag::Amount,
        Tag::Calibration,
        Tag::Warning,
        Tag::Error,
        Tag::FillLevel(FillBand::Above),
        Tag::FillLevel(FillBand::Near),
        Tag::FillLevel(FillBand::Below),
        Tag::Mode,
        Tag::Feed,
    ];

    #[test]
    fn test_feed_scenario() {
        let msg = Message::new(Tag::Feed, 3, 2000);
        let word = msg.encode();
        assert_eq!(word, (b'F' as u32) << 24 | 3 << 16 | 2000);
        assert_eq!(Message::decode(word), Ok(msg));
    }

    #[test]
    fn test_tag_bytes_are_ascii() {
        assert_eq!(Tag::Status.to_byte(), b'S');
        assert_eq!(Tag::FillLevel(FillBand::Below).to_byte(), b'2');
        assert_eq!(Tag::from_byte(b'1'), Some(Tag::FillLevel(FillBand::Near)));
        assert_eq!(Tag::from_byte(b'x'), None);
    }

    #[test]
    fn test_unknown_tag() {
        let word = (b'Z' as u32) << 24 | 1 << 16 | 5;
        assert_eq!(Message::decode(word), Err(MessageError::UnknownTag(b'Z')));
    }

    #[test]
    fn test_mass_payload() {
        assert_eq!(mass_to_payload(20.0), 2000);
        assert_eq!(mass_to_payload(0.014), 1);
        assert_eq!(mass_to_payload(-3.0), 0);
        assert_eq!(mass_to_payload(f32::NAN), 0);
        assert_eq!(mass_to_payload(1.0e6), u16::MAX);
        assert!((payload_to_mass(1234) - 12.34).abs() < 1e-4);
    }

    proptest! {
        #[test]
        fn prop_encode_decode_roundtrip(tag_idx in 0usize..10, device: u8, payload: u16) {
            let msg = Message::new(ALL_TAGS[tag_idx], device, payload);
            prop_assert_eq!(Message::decode(msg.encode()), Ok(msg));
        }

        #[test]
        fn prop_decode_never_panics(word: u32) {
            if let Ok(msg) = Message::decode(word) {
                prop_assert_eq!(msg.encode(), word);
            }
        }
    }
}
