//! A2DP stream endpoint types
//!
//! Types shared by the stream machine and the call-out boundary: media and endpoint
//! types as reported by AVDTP discovery, the per-stream configuration and the codec
//! information element accessors in [`codec`].

pub mod codec;

pub use codec::*;

use crate::event::Blob;

/// Media Types supported by AVDTP
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum MediaType {
    /// Audio media
    Audio = 0x00,
    /// Video media
    Video = 0x01,
    /// Multimedia media
    Multimedia = 0x02,
}

impl MediaType {
    /// Decode the 4-bit AVDTP media type
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::Audio),
            0x01 => Some(Self::Video),
            0x02 => Some(Self::Multimedia),
            _ => None,
        }
    }
}

/// Stream endpoint type (AVDTP TSEP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum SepType {
    /// Audio source (sends media)
    Source = 0x00,
    /// Audio sink (receives media)
    Sink = 0x01,
}

impl SepType {
    /// The endpoint type a peer needs to pair with this one
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Source => Self::Sink,
            Self::Sink => Self::Source,
        }
    }
}

/// One remote stream endpoint reported by AVDTP discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct SepInfo {
    /// Remote stream endpoint identifier
    pub seid: u8,
    /// Whether the endpoint is already in use by another stream
    pub in_use: bool,
    /// Media type of the endpoint
    pub media_type: MediaType,
    /// Endpoint type
    pub tsep: SepType,
}

impl SepInfo {
    /// Create an endpoint entry that is not in use
    #[must_use]
    pub const fn new(seid: u8, media_type: MediaType, tsep: SepType) -> Self {
        Self {
            seid,
            in_use: false,
            media_type,
            tsep,
        }
    }
}

/// Number of usable remote endpoints found by discovery, per endpoint type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
pub struct SepCounts {
    /// Sinks matching the stream's media type
    pub sinks: u8,
    /// Sources matching the stream's media type
    pub sources: u8,
}

/// A stream configuration: codec and content protection information elements plus the
/// service categories in use
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConfig {
    /// Codec information element
    pub codec: Blob,
    /// Content protection information element
    pub protect: Blob,
    /// Service capability categories (`constants::psc`)
    pub psc_mask: u8,
}

impl StreamConfig {
    /// Create a configuration carrying only a codec element
    #[must_use]
    pub fn with_codec(codec: Blob) -> Self {
        Self {
            codec,
            ..Self::default()
        }
    }

    /// Codec type byte of the codec element, if present
    #[must_use]
    pub fn codec_type(&self) -> Option<u8> {
        CodecInfo::new(self.codec.as_slice()).codec_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sep_type_peer() {
        assert_eq!(SepType::Source.peer(), SepType::Sink);
        assert_eq!(SepType::Sink.peer(), SepType::Source);
    }

    #[test]
    fn test_media_type_from_raw() {
        assert_eq!(MediaType::from_raw(0), Some(MediaType::Audio));
        assert_eq!(MediaType::from_raw(1), Some(MediaType::Video));
        assert_eq!(MediaType::from_raw(7), None);
    }

    #[test]
    fn test_stream_config_codec_type() {
        let codec = Blob::from_slice(&[0x06, 0x00, 0x02, 0x80, 0x01, 0x04, 0x00]).unwrap();
        let config = StreamConfig::with_codec(codec);
        assert_eq!(config.codec_type(), Some(CodecType::Aac as u8));
        assert_eq!(StreamConfig::default().codec_type(), None);
    }
}
