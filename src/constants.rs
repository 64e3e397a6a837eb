//! `BondyBird` AV Constants
//!
//! Pool sizes, timer defaults and the AVDTP/AVRCP code points used throughout the crate.

/// Maximum number of registered streams (stream control blocks)
pub const MAX_STREAMS: usize = 4;

/// Maximum number of peer devices with an AVDTP signaling link
pub const MAX_LINKS: usize = 2;

/// Number of link control blocks; the extra slot serves RC-only peers
pub const NUM_LCBS: usize = MAX_LINKS + 1;

/// Number of remote-control blocks
pub const NUM_RCBS: usize = MAX_STREAMS + 2;

/// Link index reserved for the RC acceptor channel that is not tied to a link yet
pub const RC_ACCEPTOR_LINK: u8 = (MAX_LINKS + 1) as u8;

/// Maximum number of stream endpoints remembered from a discovery
pub const MAX_SEPS: usize = 8;

/// Maximum size of an owned event payload in bytes
pub const MAX_PAYLOAD_LEN: usize = 512;

/// Maximum length of a service name given at registration
pub const MAX_SERVICE_NAME_LEN: usize = 32;

/// Depth of the static API and signaling channels
pub const MAX_QUEUED_EVENTS: usize = 8;

/// Depth of the follow-up queue drained after every dispatched event
pub const MAX_PENDING_EVENTS: usize = 16;

/// Delay before RC discovery starts after a stream opens, in milliseconds
pub const RC_DISCOVERY_TIME_MS: u32 = 3500;

/// Guard time for a close request before the stream is torn down, in milliseconds
pub const CLOSE_REQUEST_TIME_MS: u32 = 4000;

/// Settle time before a pending role switch is re-evaluated, in milliseconds
pub const ROLE_SWITCH_TIME_MS: u32 = 1000;

/// Time an acceptor waits for the peer to configure a stream, in milliseconds
pub const ACCEPTOR_SIGNAL_TIME_MS: u32 = 2000;

/// Period of the pending-link notification timer, in milliseconds
pub const SIGNAL_TIME_MS: u32 = 4000;

/// Reconfiguration attempts before the stream is closed
pub const RECONFIG_RETRIES: u8 = 6;

/// Bluetooth SIG company identifier used for AVRCP vendor commands
pub const SIG_COMPANY_ID: u32 = 0x1958;

/// AVDTP header bytes subtracted from the peer MTU for media payloads
pub const AVDT_MEDIA_HEADER_LEN: u16 = 12;

/// Upper bound for the negotiated media MTU
pub const MAX_MEDIA_MTU: u16 = 1008;

/// AVDTP error codes carried in signaling results
pub mod avdt_error {
    /// Unsupported configuration
    pub const UNSUP_CFG: u8 = 0x29;
    /// Operation not allowed in the current stream state
    pub const BAD_STATE: u8 = 0x31;
    /// Content protection: no security control
    pub const NSC: u8 = 0xC1;
    /// Signaling timed out
    pub const TIMEOUT: u8 = 0xFE;
    /// Signaling channel failed while the request was outstanding
    pub const CONNECT: u8 = 0xFF;
}

/// AVDTP service category bits of a configuration
pub mod psc {
    /// Delay reporting
    pub const DELAY_RPT: u8 = 0x01;
    /// Reporting
    pub const REPORT: u8 = 0x02;
    /// Recovery
    pub const RECOV: u8 = 0x04;
    /// Header compression
    pub const HDRCMP: u8 = 0x10;
    /// Multiplexing
    pub const MUX: u8 = 0x20;
    /// Categories this core can honour on an incoming configuration
    pub const SUPPORTED: u8 = DELAY_RPT | REPORT;
}

/// AVRCP message codes
pub mod avrc {
    /// Command type: control
    pub const CMD_CTRL: u8 = 0x00;
    /// Command type: status
    pub const CMD_STATUS: u8 = 0x01;
    /// Command type: specific inquiry
    pub const CMD_SPEC_INQ: u8 = 0x02;
    /// Command type: notify
    pub const CMD_NOTIF: u8 = 0x03;
    /// Command type: general inquiry
    pub const CMD_GEN_INQ: u8 = 0x04;
    /// Response: not implemented
    pub const RSP_NOT_IMPL: u8 = 0x08;
    /// Response: accepted
    pub const RSP_ACCEPT: u8 = 0x09;
    /// Response: rejected
    pub const RSP_REJ: u8 = 0x0A;
    /// Response: implemented / stable
    pub const RSP_IMPL_STBL: u8 = 0x0C;
    /// Response: interim
    pub const RSP_INTERIM: u8 = 0x0F;
    /// Pass-through operation id of a vendor unique (group navigation) key
    pub const ID_VENDOR: u8 = 0x7E;
    /// Company id carried by metadata transfer PDUs
    pub const CO_METADATA: u32 = 0x00_1958;
    /// Metadata PDU id the peer uses for a malformed request
    pub const PDU_INVALID: u8 = 0xFF;
    /// Highest group navigation vendor operation (next group = 0, previous group = 1)
    pub const GROUP_NAVI_MAX: u16 = 0x0001;
}

/// RC handle reported when a failure has no RC channel behind it
pub const RC_HANDLE_NONE: u8 = 0xFF;

/// OBEX packet size offered when the application names none
pub const COVER_ART_OBEX_MTU: u16 = 1024;

/// Smallest OBEX packet size a session may offer
pub const OBEX_MIN_MTU: u16 = 255;

/// Largest BIP image descriptor accepted with an image request
pub const MAX_IMAGE_DESCRIPTOR_LEN: usize = 256;
