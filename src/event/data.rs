use super::Blob;
use crate::a2dp::{SepInfo, SepType, StreamConfig};
use crate::constants::{MAX_IMAGE_DESCRIPTOR_LEN, MAX_SEPS};
use crate::registry::{ServiceName, StreamHandle};
use crate::{AvChannel, BluetoothAddress, Features};
use heapless::{String, Vec};

/// Envelope payload
#[derive(Debug, Clone, Default)]
pub enum EventData {
    /// No payload
    #[default]
    None,
    /// Features to enable
    Enable(Features),
    /// Stream registration
    Register(Registration),
    /// Open a stream to a peer
    Open(OpenRequest),
    /// Stop or suspend a stream
    Stop(StopRequest),
    /// Reconfigure a stream
    Reconfig(ReconfigRequest),
    /// Content protection request or response
    Protect(ProtectData),
    /// Media layer verdict on an incoming configuration
    ConfigResult(ConfigResult),
    /// AVDTP discover result
    Discovery(DiscoveryResult),
    /// AVDTP get capabilities result
    Capabilities(StreamConfig),
    /// Peer configured one of our endpoints
    ConfigInd(ConfigIndication),
    /// Stream transport opened
    Opened(StreamOpened),
    /// Generic signaling confirmation
    Signal(SignalResult),
    /// Signaling link change
    Link(LinkChange),
    /// Link role change
    Role(RoleChange),
    /// Delay value in 1/10 milliseconds
    Delay(u16),
    /// Expired timer
    Timer(TimerId),
    /// Media channel
    Channel(AvChannel),
    /// Peer address
    Peer(BluetoothAddress),
    /// AVCTP channel opened or closed
    RcConnection(RcConnection),
    /// Pass-through command from the application
    RcCommand(RcCommand),
    /// Vendor dependent or metadata message from the application
    Vendor(VendorMessage),
    /// AVRCP message from the peer
    RcMessage(RcMessage),
    /// Peer AVRCP service discovery result
    RcDiscovery(RcDiscovery),
    /// Cover-art payload
    CoverArt(CoverArtData),
}

/// Stream registration request
#[derive(Debug, Clone)]
pub struct Registration {
    /// Channel to register on
    pub channel: AvChannel,
    /// Local endpoint type
    pub tsep: SepType,
    /// Service name advertised for the stream
    pub service_name: ServiceName,
    /// Application identifier echoed in notifications
    pub app_id: u8,
    /// Sink media data callback
    pub media_callback: Option<MediaDataCallback>,
}

/// Callback receiving sink media packets for a stream
pub type MediaDataCallback = fn(StreamHandle, &[u8]);

/// Outcome of a role switch needed before opening
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
pub enum SwitchResult {
    /// No switch evaluated yet
    #[default]
    None,
    /// Switch requested and accepted
    Ok,
    /// Switch failed
    Fail,
    /// Switch finished or not needed
    Done,
}

/// Open request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest {
    /// Peer to open to
    pub peer: BluetoothAddress,
    /// Also open AVRCP
    pub use_rc: bool,
    /// Security mask for the AVDTP connection
    pub sec_mask: u8,
    /// Role switch state carried across a deferred open
    pub switch_res: SwitchResult,
}

impl OpenRequest {
    /// Create an open request
    #[must_use]
    pub const fn new(peer: BluetoothAddress, use_rc: bool, sec_mask: u8) -> Self {
        Self {
            peer,
            use_rc,
            sec_mask,
            switch_res: SwitchResult::None,
        }
    }
}

/// Stop request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopRequest {
    /// Suspend instead of just stopping the media path
    pub suspend: bool,
    /// Flush queued media
    pub flush: bool,
}

/// Reconfiguration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconfigRequest {
    /// New configuration
    pub config: StreamConfig,
    /// Suspend first and reconfigure in place when the peer supports it
    pub suspend: bool,
    /// Index of the remote endpoint to use
    pub sep_info_idx: u8,
}

/// Content protection payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectData {
    /// AVDTP transaction label
    pub label: u8,
    /// AVDTP error code, 0 on success
    pub err_code: u8,
    /// Protection data
    pub data: Blob,
}

/// Media layer verdict on an incoming configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigResult {
    /// AVDTP error code, 0 on success
    pub err_code: u8,
    /// Failing service category
    pub category: u8,
    /// Further peer endpoints worth querying for capabilities
    pub seids: Vec<u8, MAX_SEPS>,
    /// Reconfiguration will be needed once the stream opens
    pub recfg_needed: bool,
}

/// AVDTP discover result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// Remote endpoints
    pub seps: Vec<SepInfo, MAX_SEPS>,
}

/// Peer configured one of our endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIndication {
    /// Configuring peer
    pub peer: BluetoothAddress,
    /// Proposed configuration
    pub config: StreamConfig,
    /// Peer endpoint
    pub int_seid: u8,
    /// AVDTP transaction label
    pub label: u8,
}

/// Stream transport opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOpened {
    /// Peer address
    pub peer: BluetoothAddress,
    /// Peer L2CAP MTU of the media channel
    pub peer_mtu: u16,
    /// Peer AVDTP version
    pub avdt_version: u16,
}

/// Generic signaling confirmation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalResult {
    /// AVDTP error code, 0 on success
    pub err_code: u8,
    /// Whether this side initiated the procedure
    pub initiator: bool,
}

impl SignalResult {
    /// Successful confirmation
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            err_code: 0,
            initiator: true,
        }
    }

    /// Failed confirmation
    #[must_use]
    pub const fn error(err_code: u8) -> Self {
        Self {
            err_code,
            initiator: true,
        }
    }
}

/// Signaling link change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkChange {
    /// Peer address
    pub peer: BluetoothAddress,
    /// Link came up
    pub connected: bool,
    /// Peer initiated the link
    pub acceptor: bool,
    /// HCI disconnect reason
    pub reason: u8,
}

/// Role of this device on an ACL link
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum LinkRole {
    /// Central (master)
    Central,
    /// Peripheral (slave)
    Peripheral,
}

/// Link role change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    /// Peer address
    pub peer: BluetoothAddress,
    /// New local role
    pub role: LinkRole,
    /// HCI status, 0 on success
    pub status: u8,
}

/// Timers the core arms through `LowerCommand::StartTimer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum TimerId {
    /// Per-stream timer (close guard, RC discovery, role switch)
    Stream(StreamHandle),
    /// Acceptor waiting for the peer to configure a stream
    AcceptorSignal,
    /// Pending-link notification
    Signal,
}

/// AVCTP channel opened or closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcConnection {
    /// Peer address
    pub peer: BluetoothAddress,
}

/// Pass-through key state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
pub enum KeyState {
    /// Key pressed
    Pressed,
    /// Key released
    #[default]
    Released,
}

/// Pass-through command from the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcCommand {
    /// AVCTP transaction label
    pub label: u8,
    /// Operation id
    pub op_id: u8,
    /// Key state
    pub key_state: KeyState,
}

/// Vendor dependent or metadata message from the application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorMessage {
    /// AVCTP transaction label
    pub label: u8,
    /// Command type or response code
    pub code: u8,
    /// Company identifier (vendor dependent only)
    pub company_id: u32,
    /// Message body
    pub data: Blob,
}

/// AVRCP operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
pub enum RcOpcode {
    /// Pass-through
    #[default]
    PassThrough,
    /// Vendor dependent, including metadata PDUs
    Vendor,
    /// Anything else
    Other(u8),
}

/// AVRCP message from the peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RcMessage {
    /// AVCTP transaction label
    pub label: u8,
    /// Operation
    pub opcode: RcOpcode,
    /// Command type (`< 0x08`) or response code
    pub code: u8,
    /// Pass-through operation id
    pub op_id: u8,
    /// Pass-through key state
    pub key_state: KeyState,
    /// Vendor company id
    pub company_id: u32,
    /// Message body
    pub data: Blob,
}

impl RcMessage {
    /// Whether the message is a response
    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.code >= crate::constants::avrc::RSP_NOT_IMPL
    }
}

/// Peer AVRCP service discovery result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcDiscovery {
    /// Peer address
    pub peer: BluetoothAddress,
    /// Features found on the peer; empty if no record was found
    pub peer_features: Features,
    /// Controller feature bits from the peer record
    pub ct_features: u16,
    /// Target feature bits from the peer record
    pub tg_features: u16,
    /// L2CAP PSM of the peer's cover-art service, 0 if none
    pub cover_art_psm: u16,
}

/// BIP image handle
pub type ImageHandle = String<7>;

/// BIP image descriptor (XML) naming the encoding and size wanted
pub type ImageDescriptor = Vec<u8, MAX_IMAGE_DESCRIPTOR_LEN>;

/// Object fetched by a cover-art GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverArtGet {
    /// The image properties object
    ImageProperties,
    /// The image itself; an empty descriptor leaves the format to the peer
    Image {
        /// Requested encoding and pixel size
        descriptor: ImageDescriptor,
    },
    /// The linked thumbnail
    LinkedThumbnail,
}

/// Cover-art payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverArtData {
    /// Session open with the OBEX packet size to offer
    Open {
        /// Local OBEX MTU, 0 for the default
        mtu: u16,
    },
    /// Image request
    Get {
        /// Image handle from the metadata
        image_handle: ImageHandle,
        /// What to fetch
        kind: CoverArtGet,
    },
    /// Transport connected with this peer MTU
    Transport {
        /// Peer MTU
        mtu: u16,
    },
    /// OBEX session established
    Session {
        /// OBEX connection id
        connection_id: u32,
    },
    /// Image body chunk
    Body(Blob),
}
