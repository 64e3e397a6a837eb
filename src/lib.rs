#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

pub mod a2dp;
mod address;
pub mod api;
pub mod callout;
pub mod constants;
pub mod cover_art;
pub mod event;
mod host;
pub mod processor;
mod rc;
pub mod registry;
pub mod stream;
#[cfg(test)]
mod testing;

use crate::constants::{
    ACCEPTOR_SIGNAL_TIME_MS, CLOSE_REQUEST_TIME_MS, MAX_MEDIA_MTU, MAX_QUEUED_EVENTS,
    RC_DISCOVERY_TIME_MS, RECONFIG_RETRIES, ROLE_SWITCH_TIME_MS, SIG_COMPANY_ID, SIGNAL_TIME_MS,
};
use crate::event::Envelope;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

pub use address::BluetoothAddress;
pub use callout::{AppCallback, AvEvent, LowerCommand, LowerLayer, MediaCallout, Platform};
pub use host::Core;
pub use registry::StreamHandle;
pub use stream::StreamState;

/// Requests from application code, filled by the functions in [`api`]
pub(crate) static API_CHANNEL: Channel<CriticalSectionRawMutex, Envelope, MAX_QUEUED_EVENTS> =
    Channel::new();

/// Indications and confirmations from the transport glue (AVDTP, AVRCP, SDP, timers)
pub static SIGNAL_CHANNEL: Channel<CriticalSectionRawMutex, Envelope, MAX_QUEUED_EVENTS> =
    Channel::new();

/// Errors reported by the AV core, either as `Err` values or as notification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum AvError {
    /// Generic failure
    Fail,
    /// Service discovery of the peer failed
    Sdp,
    /// Stream signaling failed
    Stream,
    /// No free control block, queue slot or buffer space
    NoResources,
    /// Link role switch failed
    RoleSwitch,
    /// No usable stream endpoint capabilities found on the peer
    GetCapabilities,
    /// The handle does not name a registered stream or RC channel
    NoSuchHandle,
    /// Invalid parameter provided (e.g., malformed address)
    InvalidParameter,
    /// The event queue is full
    QueueFull,
    /// Operation not supported with the enabled features
    NotSupported,
}

/// Media channel a stream is registered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum AvChannel {
    /// Audio (A2DP)
    Audio = 0x40,
    /// Video (VDP)
    Video = 0x80,
}

impl AvChannel {
    /// Handle bits identifying the channel
    #[must_use]
    pub const fn mask(self) -> u8 {
        self as u8
    }

    /// Recover the channel from the upper bits of a stream handle
    #[must_use]
    pub const fn from_handle_bits(bits: u8) -> Option<Self> {
        match bits & 0xC0 {
            0x40 => Some(Self::Audio),
            0x80 => Some(Self::Video),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Local profile features selected when the core is enabled
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u16 {
        /// Act as AVRCP target
        const RC_TARGET = 0x0001;
        /// Act as AVRCP controller
        const RC_CONTROLLER = 0x0004;
        /// Vendor dependent commands
        const VENDOR = 0x0008;
        /// Content protection
        const PROTECT = 0x0010;
        /// Metadata transfer (AVRCP 1.3+)
        const METADATA = 0x0040;
        /// Allow more than one peer at a time
        const MULTI_AV = 0x0080;
        /// Keep the central (master) role on AV links
        const MASTER = 0x0100;
        /// Delay reporting
        const DELAY_REPORT = 0x0400;
        /// AVRCP cover art over OBEX
        const COVER_ART = 0x0800;
    }
}

/// Options for configuring a [`Core`] instance
///
/// Timer values are in milliseconds. The defaults follow the timings peers expect from an
/// A2DP source: the close guard is long enough for a slow peer to confirm, and the RC
/// discovery delay leaves the peer time to open AVRCP itself first.
///
/// # Examples
///
/// ```rust
/// use bondybird_av::AvOptions;
///
/// let options = AvOptions {
///     reconfig_retries: 3,
///     ..AvOptions::default()
/// };
/// assert_eq!(options.close_request_ms, 4000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvOptions {
    /// Guard time for a close request before the stream is torn down
    pub close_request_ms: u32,
    /// Delay before peer RC discovery is started on an open stream
    pub rc_discovery_ms: u32,
    /// Settle time before a pending role switch is re-evaluated
    pub role_switch_ms: u32,
    /// Time an acceptor waits for the peer to configure a stream
    pub acceptor_signal_ms: u32,
    /// Period of the pending-link notification
    pub signal_ms: u32,
    /// Reconfiguration attempts before the stream is closed
    pub reconfig_retries: u8,
    /// Company identifier used when building vendor-dependent AVRCP commands
    pub company_id: u32,
    /// Upper bound for the media MTU reported to the application
    pub max_media_mtu: u16,
}

impl Default for AvOptions {
    fn default() -> Self {
        Self {
            close_request_ms: CLOSE_REQUEST_TIME_MS,
            rc_discovery_ms: RC_DISCOVERY_TIME_MS,
            role_switch_ms: ROLE_SWITCH_TIME_MS,
            acceptor_signal_ms: ACCEPTOR_SIGNAL_TIME_MS,
            signal_ms: SIGNAL_TIME_MS,
            reconfig_retries: RECONFIG_RETRIES,
            company_id: SIG_COMPANY_ID,
            max_media_mtu: MAX_MEDIA_MTU,
        }
    }
}
