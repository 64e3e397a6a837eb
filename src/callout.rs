//! Call-out boundary
//!
//! The core never talks to a transport, a codec or the application directly. It emits
//! [`LowerCommand`]s to a [`LowerLayer`], asks a [`MediaCallout`] about codec configuration
//! and media, and reports [`AvEvent`]s to an [`AppCallback`]. A [`Platform`] is anything
//! implementing all three.
//!
//! Results of lower-layer requests come back as envelopes, never as return values; the only
//! synchronous query is [`LowerLayer::link_role`].

use crate::a2dp::{SepCounts, SepType, StreamConfig};
use crate::event::{Blob, CoverArtGet, ImageHandle, KeyState, LinkRole, RcOpcode, TimerId};
use crate::registry::StreamHandle;
use crate::{AvChannel, AvError, BluetoothAddress, Features};

/// Outbound request to the signaling, link, SDP or timer services
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerCommand {
    /// Search the peer's SDP records for an A2DP endpoint of type `tsep`
    FindService {
        /// Requesting stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Endpoint type searched for
        tsep: SepType,
    },
    /// Search the peer's SDP records for AVRCP
    FindRcService {
        /// Peer
        peer: BluetoothAddress,
    },
    /// Open the AVDTP signaling channel
    Connect {
        /// Requesting stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Security mask
        sec_mask: u8,
    },
    /// Close the AVDTP signaling channel
    Disconnect {
        /// Peer
        peer: BluetoothAddress,
    },
    /// AVDTP discover
    Discover {
        /// Requesting stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
    },
    /// AVDTP get capabilities
    GetCapabilities {
        /// Requesting stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Remote endpoint
        seid: u8,
    },
    /// AVDTP set configuration and open
    Open {
        /// Requesting stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Remote endpoint
        seid: u8,
        /// Configuration
        config: StreamConfig,
    },
    /// Answer a set configuration indication
    ConfigResponse {
        /// Stream
        handle: StreamHandle,
        /// Transaction label
        label: u8,
        /// AVDTP error code, 0 to accept
        err_code: u8,
        /// Failing service category
        category: u8,
    },
    /// AVDTP start
    Start {
        /// Stream
        handle: StreamHandle,
    },
    /// AVDTP suspend
    Suspend {
        /// Stream
        handle: StreamHandle,
    },
    /// AVDTP close
    Close {
        /// Stream
        handle: StreamHandle,
    },
    /// AVDTP reconfigure
    Reconfigure {
        /// Stream
        handle: StreamHandle,
        /// New configuration
        config: StreamConfig,
    },
    /// AVDTP security control command
    SecurityRequest {
        /// Stream
        handle: StreamHandle,
        /// Protection data
        data: Blob,
    },
    /// AVDTP security control response
    SecurityResponse {
        /// Stream
        handle: StreamHandle,
        /// Transaction label
        label: u8,
        /// AVDTP error code
        err_code: u8,
        /// Protection data
        data: Blob,
    },
    /// AVDTP delay report
    DelayReport {
        /// Stream
        handle: StreamHandle,
        /// Remote endpoint
        seid: u8,
        /// Delay in 1/10 milliseconds
        delay: u16,
    },
    /// Write one media packet
    Write {
        /// Stream
        handle: StreamHandle,
        /// Media payload
        packet: Blob,
        /// RTP timestamp
        timestamp: u32,
    },
    /// Request a link role
    SwitchRole {
        /// Peer
        peer: BluetoothAddress,
        /// Requested local role
        role: LinkRole,
    },
    /// Raise or restore ACL priority
    SetAclPriority {
        /// Peer
        peer: BluetoothAddress,
        /// High priority while streaming
        high: bool,
    },
    /// Open an AVCTP channel, or listen for one when `peer` is `None`
    RcOpen {
        /// RC handle the channel is bound to
        rc_handle: u8,
        /// Peer to connect to
        peer: Option<BluetoothAddress>,
    },
    /// Close an AVCTP channel
    RcClose {
        /// RC handle
        rc_handle: u8,
    },
    /// Pass-through command
    RcPassThrough {
        /// RC handle
        rc_handle: u8,
        /// Transaction label
        label: u8,
        /// Operation id
        op_id: u8,
        /// Key state
        key_state: KeyState,
    },
    /// Pass-through response
    RcPassResponse {
        /// RC handle
        rc_handle: u8,
        /// Transaction label
        label: u8,
        /// Operation id
        op_id: u8,
        /// Key state
        key_state: KeyState,
        /// Response code
        code: u8,
    },
    /// Vendor dependent command or response
    RcVendor {
        /// RC handle
        rc_handle: u8,
        /// Transaction label
        label: u8,
        /// Command type or response code
        code: u8,
        /// Company id
        company_id: u32,
        /// Body
        data: Blob,
    },
    /// Metadata (AVRCP 1.3+) command or response
    RcMeta {
        /// RC handle
        rc_handle: u8,
        /// Transaction label
        label: u8,
        /// Command type or response code
        code: u8,
        /// Body
        data: Blob,
    },
    /// Reject a message the target cannot process
    RcReject {
        /// RC handle
        rc_handle: u8,
        /// Transaction label
        label: u8,
        /// Operation of the rejected message
        opcode: RcOpcode,
        /// Response code
        code: u8,
    },
    /// Arm a timer; expiry comes back as a `Timer` envelope
    StartTimer {
        /// Timer
        timer: TimerId,
        /// Duration in milliseconds
        duration_ms: u32,
    },
    /// Disarm a timer
    StopTimer {
        /// Timer
        timer: TimerId,
    },
    /// Open the cover-art L2CAP transport
    GoepConnect {
        /// RC handle owning the session
        rc_handle: u8,
        /// Peer
        peer: BluetoothAddress,
        /// L2CAP PSM
        psm: u16,
    },
    /// Close the cover-art transport
    GoepDisconnect {
        /// RC handle owning the session
        rc_handle: u8,
    },
    /// OBEX connect to the cover-art target
    ObexConnect {
        /// RC handle owning the session
        rc_handle: u8,
        /// Local OBEX MTU
        mtu: u16,
    },
    /// OBEX GET of an image object
    ObexGet {
        /// RC handle owning the session
        rc_handle: u8,
        /// OBEX connection id
        connection_id: u32,
        /// Image handle
        image_handle: ImageHandle,
        /// Object type and, for images, the descriptor
        kind: CoverArtGet,
    },
}

/// Media packet produced by the source data path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    /// Encoded media
    pub data: Blob,
    /// RTP timestamp
    pub timestamp: u32,
}

/// Notification to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvEvent {
    /// The core is enabled
    Enabled {
        /// Enabled features
        features: Features,
    },
    /// The core is disabled and every stream deregistered
    Disabled,
    /// Registration result
    Registered {
        /// Stream handle or the failure
        result: Result<StreamHandle, AvError>,
        /// Channel
        channel: AvChannel,
        /// Application identifier
        app_id: u8,
    },
    /// A stream finished deregistering
    Deregistered {
        /// Stream handle
        handle: StreamHandle,
    },
    /// Stream open result
    Open {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
        /// Outcome
        status: Result<(), AvError>,
        /// A start follows immediately
        starting: bool,
        /// Media MTU
        mtu: u16,
    },
    /// Stream closed
    Close {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
    },
    /// Stream start result
    Start {
        /// Stream
        handle: StreamHandle,
        /// Outcome
        status: Result<(), AvError>,
        /// This side initiated the start
        initiator: bool,
        /// The stream is suspended again right away
        suspending: bool,
    },
    /// Media path stopped
    Stop {
        /// Stream
        handle: StreamHandle,
        /// A suspend was requested
        suspend: bool,
    },
    /// Stream suspended
    Suspend {
        /// Stream
        handle: StreamHandle,
        /// Outcome
        status: Result<(), AvError>,
        /// This side initiated the suspend
        initiator: bool,
    },
    /// Reconfiguration result
    Reconfig {
        /// Stream
        handle: StreamHandle,
        /// Outcome
        status: Result<(), AvError>,
    },
    /// Peer content protection request
    ProtectRequest {
        /// Stream
        handle: StreamHandle,
        /// Protection data
        data: Blob,
    },
    /// Peer content protection response
    ProtectResponse {
        /// Stream
        handle: StreamHandle,
        /// AVDTP error code
        err_code: u8,
        /// Protection data
        data: Blob,
    },
    /// An incoming configuration was rejected
    Reject {
        /// Stream
        handle: StreamHandle,
        /// Peer
        peer: BluetoothAddress,
    },
    /// A peer holds a signaling link without any stream
    Pending {
        /// Peer
        peer: BluetoothAddress,
    },
    /// Delay value set
    SetDelayValue {
        /// Stream
        handle: StreamHandle,
        /// Delay in 1/10 milliseconds
        delay: u16,
        /// Outcome
        status: Result<(), AvError>,
    },
    /// RC channel opened, or failed to
    RcOpen {
        /// RC handle
        rc_handle: u8,
        /// Peer
        peer: BluetoothAddress,
        /// Outcome
        status: Result<(), AvError>,
        /// Peer features known so far
        peer_features: Features,
    },
    /// RC channel closed
    RcClose {
        /// RC handle
        rc_handle: u8,
        /// Peer
        peer: BluetoothAddress,
    },
    /// Peer RC features discovered
    RcFeatures {
        /// RC handle
        rc_handle: u8,
        /// Peer
        peer: BluetoothAddress,
        /// Peer features
        peer_features: Features,
    },
    /// Pass-through command from the peer
    RemoteCmd {
        /// RC handle
        rc_handle: u8,
        /// Transaction label
        label: u8,
        /// Operation id
        op_id: u8,
        /// Key state
        key_state: KeyState,
    },
    /// Pass-through response from the peer
    RemoteRsp {
        /// RC handle
        rc_handle: u8,
        /// Transaction label
        label: u8,
        /// Operation id
        op_id: u8,
        /// Key state
        key_state: KeyState,
        /// Response code
        code: u8,
    },
    /// Vendor dependent command from the peer
    VendorCmd {
        /// RC handle
        rc_handle: u8,
        /// Transaction label
        label: u8,
        /// Command type
        code: u8,
        /// Company id
        company_id: u32,
        /// Body
        data: Blob,
    },
    /// Vendor dependent response from the peer
    VendorRsp {
        /// RC handle
        rc_handle: u8,
        /// Transaction label
        label: u8,
        /// Response code
        code: u8,
        /// Company id
        company_id: u32,
        /// Body
        data: Blob,
    },
    /// Metadata message from the peer
    MetaMsg {
        /// RC handle
        rc_handle: u8,
        /// Transaction label
        label: u8,
        /// Command type or response code
        code: u8,
        /// Body
        data: Blob,
    },
    /// Cover-art session ready
    CoverArtConnected {
        /// RC handle
        rc_handle: u8,
    },
    /// Cover-art session closed or failed to open
    CoverArtClosed {
        /// RC handle
        rc_handle: u8,
    },
    /// Image data
    CoverArtData {
        /// RC handle
        rc_handle: u8,
        /// Chunk
        data: Blob,
        /// Last chunk of the image
        last: bool,
    },
    /// Image request refused
    CoverArtGetFailed {
        /// RC handle
        rc_handle: u8,
    },
}

/// Signaling, link, SDP and timer services
pub trait LowerLayer {
    /// Issue a request
    fn send(&mut self, command: LowerCommand);

    /// Current local role on the ACL link to `peer`, if connected
    fn link_role(&self, peer: &BluetoothAddress) -> Option<LinkRole>;
}

/// Codec and media collaborator
///
/// Only `get_config` and `set_config` have no default: every stream needs a codec decision.
#[allow(unused_variables)]
pub trait MediaCallout {
    /// Discovery found these usable remote endpoints
    fn discovery_result(&mut self, handle: StreamHandle, counts: SepCounts) {}

    /// Pick a configuration from the capabilities of remote endpoint `seid`
    ///
    /// Returns `None` to skip this endpoint.
    fn get_config(
        &mut self,
        handle: StreamHandle,
        seid: u8,
        caps: &StreamConfig,
    ) -> Option<StreamConfig>;

    /// The peer proposes `config`; answer later through `api::notify_config_result`
    fn set_config(
        &mut self,
        handle: StreamHandle,
        peer: &BluetoothAddress,
        seid: u8,
        config: &StreamConfig,
    );

    /// The stream opened with this codec and media MTU
    fn open(&mut self, handle: StreamHandle, codec_type: u8, mtu: u16) {}

    /// The stream closed
    fn close(&mut self, handle: StreamHandle) {}

    /// Media starts flowing
    fn start(&mut self, handle: StreamHandle, config: &StreamConfig) {}

    /// Media stops flowing
    fn stop(&mut self, handle: StreamHandle) {}

    /// Next encoded packet for a started source stream
    fn next_packet(&mut self, handle: StreamHandle) -> Option<MediaPacket> {
        None
    }

    /// The peer reported its delay
    fn delay(&mut self, handle: StreamHandle, delay: u16) {}

    /// Whether `handle` may start while `companion` is still negotiating
    ///
    /// Returning `false` holds the start until the companion opens or gives up.
    fn can_start(&mut self, handle: StreamHandle, companion: StreamHandle) -> bool {
        true
    }

    /// Whether a pass-through operation is supported by the local target
    fn passthrough_supported(&mut self, op_id: u8) -> bool {
        true
    }
}

/// Application notification sink
pub trait AppCallback {
    /// Deliver a notification
    fn on_event(&mut self, event: AvEvent);
}

/// Everything the core needs from its environment
pub trait Platform: LowerLayer + MediaCallout + AppCallback {}

impl<T: LowerLayer + MediaCallout + AppCallback> Platform for T {}
