//! Codec information elements
//!
//! The core never interprets codec parameters; it only needs the media and codec type
//! bytes of the element to pick endpoints and to tell SBC apart from everything else.
//! Layout: `[length, media_type << 4, codec_type, codec specific ...]`.

use super::MediaType;

/// Codec types assigned by the A2DP specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum CodecType {
    /// SBC (Sub-Band Coding) - Mandatory codec for A2DP
    Sbc = 0x00,
    /// MPEG-1,2 Audio (MP3)
    Mpeg12Audio = 0x01,
    /// MPEG-2,4 AAC
    Aac = 0x02,
    /// ATRAC family
    Atrac = 0x04,
    /// Vendor-specific codec
    VendorSpecific = 0xFF,
}

impl CodecType {
    /// Decode a codec type byte
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::Sbc),
            0x01 => Some(Self::Mpeg12Audio),
            0x02 => Some(Self::Aac),
            0x04 => Some(Self::Atrac),
            0xFF => Some(Self::VendorSpecific),
            _ => None,
        }
    }
}

/// Borrowed view of a codec information element
#[derive(Debug, Clone, Copy)]
pub struct CodecInfo<'a>(&'a [u8]);

impl<'a> CodecInfo<'a> {
    /// Wrap raw element bytes
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }

    /// Whether the element holds at least a header and its length byte fits the buffer
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self.0.first() {
            Some(&len) => len >= 2 && usize::from(len) < self.0.len(),
            None => false,
        }
    }

    /// Media type of the element
    #[must_use]
    pub fn media_type(&self) -> Option<MediaType> {
        if !self.is_valid() {
            return None;
        }
        MediaType::from_raw(self.0[1] >> 4)
    }

    /// Raw codec type byte
    #[must_use]
    pub fn codec_type(&self) -> Option<u8> {
        if !self.is_valid() {
            return None;
        }
        Some(self.0[2])
    }

    /// Whether this element describes SBC
    #[must_use]
    pub fn is_sbc(&self) -> bool {
        self.codec_type() == Some(CodecType::Sbc as u8)
    }

    /// Codec specific bytes following the header
    #[must_use]
    pub fn parameters(&self) -> &'a [u8] {
        if !self.is_valid() {
            return &[];
        }
        &self.0[3..=usize::from(self.0[0])]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SBC_INFO: [u8; 7] = [0x06, 0x00, 0x00, 0x21, 0x15, 0x02, 0x35];

    #[test]
    fn test_codec_info_sbc() {
        let info = CodecInfo::new(&SBC_INFO);
        assert!(info.is_valid());
        assert!(info.is_sbc());
        assert_eq!(info.media_type(), Some(MediaType::Audio));
        assert_eq!(info.parameters(), &[0x21, 0x15, 0x02, 0x35]);
    }

    #[test]
    fn test_codec_info_invalid() {
        assert!(!CodecInfo::new(&[]).is_valid());
        assert!(!CodecInfo::new(&[0x06, 0x00, 0x00]).is_valid());
        assert_eq!(CodecInfo::new(&[0x01, 0x00]).codec_type(), None);
        assert!(CodecInfo::new(&[0x01, 0x00]).parameters().is_empty());
    }

    #[test]
    fn test_codec_type_from_raw() {
        assert_eq!(CodecType::from_raw(0x02), Some(CodecType::Aac));
        assert_eq!(CodecType::from_raw(0xFF), Some(CodecType::VendorSpecific));
        assert_eq!(CodecType::from_raw(0x03), None);
    }
}
