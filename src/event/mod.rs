//! Event envelopes
//!
//! Everything the core reacts to arrives as an [`Envelope`]: an event tag, the handle of
//! the control block it targets and an owned payload. Producers hand envelopes over through
//! an `embassy_sync` channel; ownership moves with the envelope, so a payload is released
//! exactly once, by whoever holds it last.
//!
//! Tags are partitioned by raw value into three disjoint ranges, one per handler family:
//!
//! | Range         | Class                         |
//! |---------------|-------------------------------|
//! | `0x000-0x0FF` | system (device level)         |
//! | `0x100-0x1FF` | stream (per SCB)              |
//! | `0x200-0x2FF` | remote control (per RCB)      |

mod data;

pub use data::*;

use crate::AvError;
use crate::constants::MAX_PAYLOAD_LEN;
use crate::cover_art::CaEvent;
use crate::registry::StreamHandle;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, Sender, TrySendError};
use heapless::Vec;

/// Owned variable-length payload (codec elements, protection data, AVRCP bodies)
///
/// Cloning is the explicit deep copy used when a payload must outlive the envelope that
/// carried it.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(not(test), derive(Clone))]
pub struct Blob(Vec<u8, MAX_PAYLOAD_LEN>);

impl Blob {
    /// Create an empty payload
    #[must_use]
    pub fn new() -> Self {
        #[cfg(test)]
        ledger::on_alloc();
        Self(Vec::new())
    }

    /// Copy bytes into a new payload
    ///
    /// # Errors
    /// Returns [`AvError::NoResources`] if `bytes` is longer than `MAX_PAYLOAD_LEN`
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AvError> {
        let inner = Vec::from_slice(bytes).map_err(|()| AvError::NoResources)?;
        #[cfg(test)]
        ledger::on_alloc();
        Ok(Self(inner))
    }

    /// Payload bytes
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Payload length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Blob {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clone for Blob {
    fn clone(&self) -> Self {
        ledger::on_alloc();
        Self(self.0.clone())
    }
}

#[cfg(test)]
impl Drop for Blob {
    fn drop(&mut self) {
        ledger::on_free();
    }
}

/// Per-thread count of payloads created and released, so tests can prove every payload is
/// freed exactly once.
#[cfg(test)]
pub(crate) mod ledger {
    use core::cell::Cell;

    std::thread_local! {
        static ALLOCATED: Cell<usize> = const { Cell::new(0) };
        static FREED: Cell<usize> = const { Cell::new(0) };
    }

    pub(crate) fn on_alloc() {
        ALLOCATED.with(|count| count.set(count.get() + 1));
    }

    pub(crate) fn on_free() {
        FREED.with(|count| count.set(count.get() + 1));
    }

    /// `(allocated, freed)` on the current thread
    pub(crate) fn counts() -> (usize, usize) {
        (ALLOCATED.with(Cell::get), FREED.with(Cell::get))
    }
}

/// Device-level events handled by the dispatcher itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum SystemEvent {
    /// Enable the core with a feature set
    Enable,
    /// Disable the core: close RC channels and deregister every stream
    Disable,
    /// Register a stream on a channel
    Register,
    /// Deregister a stream
    Deregister,
    /// Disconnect every stream and the signaling link of a peer
    Disconnect,
    /// Signaling channel connected or disconnected at link level
    SignalChange,
    /// A timer armed with `LowerCommand::StartTimer` expired
    Timer,
    /// Link role of a peer changed
    RoleChange,
    /// Source media is ready on a channel
    DataReady,
    /// A deregistering stream finished unwinding
    DeregComplete,
}

impl SystemEvent {
    /// Number of system events
    pub const COUNT: usize = 10;

    /// All system events in tag order
    pub const ALL: [Self; Self::COUNT] = [
        Self::Enable,
        Self::Disable,
        Self::Register,
        Self::Deregister,
        Self::Disconnect,
        Self::SignalChange,
        Self::Timer,
        Self::RoleChange,
        Self::DataReady,
        Self::DeregComplete,
    ];
}

/// Events of the per-stream state machine, in table column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum StreamEvent {
    /// Application asks to open a stream
    ApOpen,
    /// Application asks to close a stream
    ApClose,
    /// Application asks to start streaming
    ApStart,
    /// Application asks to stop or suspend streaming
    ApStop,
    /// Application asks to reconfigure the codec
    ApiReconfig,
    /// Application sends a content protection request
    ApiProtectReq,
    /// Application answers a content protection request
    ApiProtectRsp,
    /// Application asks to open AVRCP alongside the stream
    ApiRcOpen,
    /// Source media ready
    SrcDataReady,
    /// Media layer accepted an incoming configuration
    CiSetconfigOk,
    /// Media layer rejected an incoming configuration
    CiSetconfigFail,
    /// SDP search for the peer's A2DP service succeeded
    SdpDiscOk,
    /// SDP search for the peer's A2DP service failed
    SdpDiscFail,
    /// AVDTP discover succeeded
    StrDiscOk,
    /// AVDTP discover failed
    StrDiscFail,
    /// AVDTP get capabilities succeeded
    StrGetcapOk,
    /// AVDTP get capabilities failed
    StrGetcapFail,
    /// Stream transport opened
    StrOpenOk,
    /// Stream transport failed to open
    StrOpenFail,
    /// AVDTP start succeeded
    StrStartOk,
    /// AVDTP start failed
    StrStartFail,
    /// Stream closed
    StrClose,
    /// Peer configured one of our endpoints
    StrConfigInd,
    /// Peer sent a content protection request
    StrSecurityInd,
    /// Peer answered a content protection request
    StrSecurityCfm,
    /// Media packet write completed
    StrWriteCfm,
    /// AVDTP suspend confirmed
    StrSuspendCfm,
    /// AVDTP reconfigure confirmed
    StrReconfigCfm,
    /// RC discovery / role-switch timer expired
    AvrcTimer,
    /// AVDTP signaling channel connected
    AvdtConnect,
    /// AVDTP signaling channel disconnected
    AvdtDisconnect,
    /// Link role changed
    RoleChange,
    /// Peer reported its delay
    AvdtDelayRpt,
    /// Peer opened signaling towards us as acceptor
    AcpConnect,
    /// Application sets the sink delay to report
    ApiSetDelayValue,
}

impl StreamEvent {
    /// Number of stream events
    pub const COUNT: usize = 35;

    /// All stream events in table column order
    pub const ALL: [Self; Self::COUNT] = [
        Self::ApOpen,
        Self::ApClose,
        Self::ApStart,
        Self::ApStop,
        Self::ApiReconfig,
        Self::ApiProtectReq,
        Self::ApiProtectRsp,
        Self::ApiRcOpen,
        Self::SrcDataReady,
        Self::CiSetconfigOk,
        Self::CiSetconfigFail,
        Self::SdpDiscOk,
        Self::SdpDiscFail,
        Self::StrDiscOk,
        Self::StrDiscFail,
        Self::StrGetcapOk,
        Self::StrGetcapFail,
        Self::StrOpenOk,
        Self::StrOpenFail,
        Self::StrStartOk,
        Self::StrStartFail,
        Self::StrClose,
        Self::StrConfigInd,
        Self::StrSecurityInd,
        Self::StrSecurityCfm,
        Self::StrWriteCfm,
        Self::StrSuspendCfm,
        Self::StrReconfigCfm,
        Self::AvrcTimer,
        Self::AvdtConnect,
        Self::AvdtDisconnect,
        Self::RoleChange,
        Self::AvdtDelayRpt,
        Self::AcpConnect,
        Self::ApiSetDelayValue,
    ];

    /// Column index in the transition table
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Remote-control events, routed by RC handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum RcEvent {
    /// Application sends a pass-through command
    ApiRemoteCmd,
    /// Application sends a vendor dependent command
    ApiVendorCmd,
    /// Application answers a vendor dependent command
    ApiVendorRsp,
    /// Application sends a metadata response or command
    ApiMetaRsp,
    /// Application closes an RC channel
    ApiClose,
    /// AVCTP channel opened
    Opened,
    /// AVCTP channel closed
    Closed,
    /// AVRCP message received
    Message,
    /// Peer AVRCP service discovery finished
    DiscoveryDone,
    /// Application opens a cover-art session
    CaOpen,
    /// Application closes a cover-art session
    CaClose,
    /// Application requests an image
    CaGet,
    /// Cover-art transport connected
    CaGoepConnected,
    /// Cover-art transport disconnected
    CaGoepDisconnected,
    /// OBEX connect accepted
    CaObexConnected,
    /// OBEX connect refused
    CaObexConnectFailed,
    /// Non-final OBEX GET response
    CaResponse,
    /// Final OBEX GET response
    CaResponseFinal,
}

impl RcEvent {
    /// Number of remote-control events
    pub const COUNT: usize = 18;

    /// All remote-control events in tag order
    pub const ALL: [Self; Self::COUNT] = [
        Self::ApiRemoteCmd,
        Self::ApiVendorCmd,
        Self::ApiVendorRsp,
        Self::ApiMetaRsp,
        Self::ApiClose,
        Self::Opened,
        Self::Closed,
        Self::Message,
        Self::DiscoveryDone,
        Self::CaOpen,
        Self::CaClose,
        Self::CaGet,
        Self::CaGoepConnected,
        Self::CaGoepDisconnected,
        Self::CaObexConnected,
        Self::CaObexConnectFailed,
        Self::CaResponse,
        Self::CaResponseFinal,
    ];

    /// The cover-art machine event this tag drives, if any
    #[must_use]
    pub const fn cover_art(self) -> Option<CaEvent> {
        match self {
            Self::CaOpen => Some(CaEvent::ApiOpen),
            Self::CaClose => Some(CaEvent::ApiClose),
            Self::CaGet => Some(CaEvent::ApiGet),
            Self::CaGoepConnected => Some(CaEvent::GoepConnected),
            Self::CaGoepDisconnected => Some(CaEvent::GoepDisconnected),
            Self::CaObexConnected => Some(CaEvent::ObexConnected),
            Self::CaObexConnectFailed => Some(CaEvent::ObexConnectFailed),
            Self::CaResponse => Some(CaEvent::Response),
            Self::CaResponseFinal => Some(CaEvent::ResponseFinal),
            _ => None,
        }
    }
}

/// Handler family an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum EventClass {
    /// Device-level handlers
    System,
    /// Per-stream state machine
    Stream,
    /// Remote-control handlers
    Rc,
}

/// Event tag of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum EventTag {
    /// Device-level event
    System(SystemEvent),
    /// Stream event
    Stream(StreamEvent),
    /// Remote-control event
    Rc(RcEvent),
}

impl EventTag {
    /// First raw tag of the system range
    pub const SYSTEM_BASE: u16 = 0x000;
    /// First raw tag of the stream range
    pub const STREAM_BASE: u16 = 0x100;
    /// First raw tag of the remote-control range
    pub const RC_BASE: u16 = 0x200;
    /// One past the last raw tag of the remote-control range
    pub const RC_END: u16 = 0x300;

    /// Raw numeric tag
    #[must_use]
    pub const fn raw(self) -> u16 {
        match self {
            Self::System(event) => Self::SYSTEM_BASE + event as u16,
            Self::Stream(event) => Self::STREAM_BASE + event as u16,
            Self::Rc(event) => Self::RC_BASE + event as u16,
        }
    }

    /// Classify a raw tag by range alone
    #[must_use]
    pub const fn class_of(raw: u16) -> Option<EventClass> {
        match raw {
            Self::SYSTEM_BASE..Self::STREAM_BASE => Some(EventClass::System),
            Self::STREAM_BASE..Self::RC_BASE => Some(EventClass::Stream),
            Self::RC_BASE..Self::RC_END => Some(EventClass::Rc),
            _ => None,
        }
    }

    /// Decode a raw tag
    #[must_use]
    pub fn from_raw(raw: u16) -> Option<Self> {
        let class = Self::class_of(raw)?;
        match class {
            EventClass::System => {
                let index = usize::from(raw - Self::SYSTEM_BASE);
                SystemEvent::ALL.get(index).copied().map(Self::System)
            }
            EventClass::Stream => {
                let index = usize::from(raw - Self::STREAM_BASE);
                StreamEvent::ALL.get(index).copied().map(Self::Stream)
            }
            EventClass::Rc => {
                let index = usize::from(raw - Self::RC_BASE);
                RcEvent::ALL.get(index).copied().map(Self::Rc)
            }
        }
    }

    /// Handler family of this tag
    #[must_use]
    pub const fn class(self) -> EventClass {
        match self {
            Self::System(_) => EventClass::System,
            Self::Stream(_) => EventClass::Stream,
            Self::Rc(_) => EventClass::Rc,
        }
    }
}

impl From<SystemEvent> for EventTag {
    fn from(event: SystemEvent) -> Self {
        Self::System(event)
    }
}

impl From<StreamEvent> for EventTag {
    fn from(event: StreamEvent) -> Self {
        Self::Stream(event)
    }
}

impl From<RcEvent> for EventTag {
    fn from(event: RcEvent) -> Self {
        Self::Rc(event)
    }
}

/// A unit of work for the core: tag, target handle and owned payload
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Event tag
    pub tag: EventTag,
    /// Target handle: stream handle, RC handle, or 0 for device-level events
    pub handle: u8,
    /// Payload
    pub data: EventData,
}

impl Envelope {
    /// Create an envelope
    #[must_use]
    pub fn new(tag: impl Into<EventTag>, handle: u8, data: EventData) -> Self {
        Self {
            tag: tag.into(),
            handle,
            data,
        }
    }

    /// Create a device-level envelope
    #[must_use]
    pub fn system(event: SystemEvent, data: EventData) -> Self {
        Self::new(event, 0, data)
    }

    /// Create an envelope for one stream
    #[must_use]
    pub fn stream(handle: StreamHandle, event: StreamEvent, data: EventData) -> Self {
        Self::new(event, handle.raw(), data)
    }

    /// Create an envelope for one RC channel
    #[must_use]
    pub fn rc(rc_handle: u8, event: RcEvent, data: EventData) -> Self {
        Self::new(event, rc_handle, data)
    }
}

/// Producer side of an envelope queue
///
/// Sending never blocks: when the queue is full the envelope is dropped on the spot, which
/// releases its payload, and the caller is told so.
pub struct EventSender<'a, M: RawMutex, const N: usize> {
    sender: Sender<'a, M, Envelope, N>,
}

impl<'a, M: RawMutex, const N: usize> EventSender<'a, M, N> {
    /// Create a sender feeding `channel`
    #[must_use]
    pub fn new(channel: &'a Channel<M, Envelope, N>) -> Self {
        Self {
            sender: channel.sender(),
        }
    }

    /// Enqueue an envelope
    ///
    /// Returns `false` if the queue was full and the envelope was dropped.
    pub fn send(&self, envelope: Envelope) -> bool {
        match self.sender.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                warn!(
                    "[EVENT] Queue full, dropping event {:?}",
                    defmt::Debug2Format(&dropped.tag)
                );
                false
            }
        }
    }

    /// Build and enqueue an envelope
    ///
    /// Returns `false` if the queue was full and the envelope was dropped.
    pub fn post(&self, tag: impl Into<EventTag>, handle: u8, data: EventData) -> bool {
        self.send(Envelope::new(tag, handle, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn test_tag_ranges_are_disjoint() {
        for raw in 0..EventTag::RC_END {
            if let Some(tag) = EventTag::from_raw(raw) {
                assert_eq!(tag.raw(), raw);
                assert_eq!(EventTag::class_of(raw), Some(tag.class()));
            }
        }
        assert_eq!(EventTag::class_of(0x0FF), Some(EventClass::System));
        assert_eq!(EventTag::class_of(0x100), Some(EventClass::Stream));
        assert_eq!(EventTag::class_of(0x2FF), Some(EventClass::Rc));
        assert_eq!(EventTag::class_of(0x300), None);
    }

    #[test]
    fn test_every_event_has_a_tag() {
        for (i, event) in StreamEvent::ALL.iter().enumerate() {
            assert_eq!(event.index(), i);
            assert_eq!(
                EventTag::from_raw(EventTag::STREAM_BASE + i as u16),
                Some(EventTag::Stream(*event))
            );
        }
        for event in SystemEvent::ALL {
            assert_eq!(EventTag::from_raw(EventTag::System(event).raw()), Some(event.into()));
        }
        for event in RcEvent::ALL {
            assert_eq!(EventTag::from_raw(EventTag::Rc(event).raw()), Some(event.into()));
        }
        assert_eq!(EventTag::from_raw(EventTag::STREAM_BASE + 35), None);
    }

    #[test]
    fn test_blob_from_slice_limits() {
        let full = [0xAAu8; MAX_PAYLOAD_LEN];
        assert_eq!(Blob::from_slice(&full).map(|blob| blob.len()), Ok(MAX_PAYLOAD_LEN));
        let too_long = [0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(Blob::from_slice(&too_long), Err(AvError::NoResources));
    }

    #[test]
    fn test_blob_ownership_through_queue() {
        for size in [0usize, 1, 64, 400] {
            let before = ledger::counts();
            {
                let channel: Channel<NoopRawMutex, Envelope, 2> = Channel::new();
                let sender = EventSender::new(&channel);
                let bytes = [0x5Au8; 400];
                let data = EventData::Protect(ProtectData {
                    label: 1,
                    err_code: 0,
                    data: Blob::from_slice(&bytes[..size]).unwrap(),
                });
                assert!(sender.post(StreamEvent::ApiProtectReq, 0x41, data));
                let received = channel.try_receive().unwrap();
                if let EventData::Protect(protect) = &received.data {
                    assert_eq!(protect.data.len(), size);
                } else {
                    panic!("payload changed in transit");
                }
            }
            let after = ledger::counts();
            assert_eq!(after.0 - before.0, 1, "size {size}");
            assert_eq!(after.1 - before.1, 1, "size {size}");
        }
    }

    #[test]
    fn test_full_queue_drops_envelope() {
        let before = ledger::counts();
        let channel: Channel<NoopRawMutex, Envelope, 1> = Channel::new();
        let sender = EventSender::new(&channel);
        let first = EventData::Protect(ProtectData {
            label: 0,
            err_code: 0,
            data: Blob::from_slice(&[1, 2, 3]).unwrap(),
        });
        let second = first.clone();
        assert!(sender.post(StreamEvent::ApiProtectReq, 0x41, first));
        assert!(!sender.post(StreamEvent::ApiProtectReq, 0x41, second));
        // The rejected copy is already gone; the queued one is still owned by the channel.
        let mid = ledger::counts();
        assert_eq!(mid.0 - before.0, 2);
        assert_eq!(mid.1 - before.1, 1);
        drop(channel.try_receive().unwrap());
        let after = ledger::counts();
        assert_eq!(after.1 - before.1, 2);
    }
}
