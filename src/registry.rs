//! Control-block registry
//!
//! Fixed pools of stream control blocks (SCB), remote-control blocks (RCB) and link control
//! blocks (LCB). Lookups are linear scans; the pools hold a handful of entries.
//!
//! A stream handle encodes the pool slot and the channel: `(index + 1) | channel bits`.
//! An RC handle is the RCB slot index itself.

use crate::a2dp::{MediaType, SepCounts, SepInfo, SepType, StreamConfig};
use crate::constants::{MAX_LINKS, MAX_SEPS, MAX_SERVICE_NAME_LEN, MAX_STREAMS, NUM_LCBS, NUM_RCBS};
use crate::cover_art::CoverArtSession;
use crate::event::{OpenRequest, Registration, StreamEvent};
use crate::stream::StreamState;
use crate::{AvChannel, AvError, BluetoothAddress, Features};
use heapless::{String, Vec};

/// Service name given at registration
pub type ServiceName = String<MAX_SERVICE_NAME_LEN>;

/// Handle of a registered stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, defmt::Format)]
pub struct StreamHandle(u8);

impl StreamHandle {
    const INDEX_MASK: u8 = 0x0F;

    /// Build the handle of pool slot `index` on `channel`
    #[must_use]
    pub const fn new(channel: AvChannel, index: usize) -> Self {
        Self((index as u8 + 1) | channel.mask())
    }

    /// Wrap a raw handle value
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Raw handle value
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Pool slot, if the handle names one
    #[must_use]
    pub const fn index(self) -> Option<usize> {
        let slot = self.0 & Self::INDEX_MASK;
        if slot == 0 || slot as usize > MAX_STREAMS {
            None
        } else {
            Some(slot as usize - 1)
        }
    }

    /// Channel bits of the handle
    #[must_use]
    pub const fn channel(self) -> Option<AvChannel> {
        AvChannel::from_handle_bits(self.0)
    }

    /// Single-bit mask of the slot, as used in connection masks
    #[must_use]
    pub const fn mask(self) -> u8 {
        match self.index() {
            Some(index) => 1 << index,
            None => 0,
        }
    }
}

bitflags::bitflags! {
    /// Collision arbitration state of a stream
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CollisionFlags: u8 {
        /// The acceptor signaling timer is running for this stream
        const INCOMING_TIMER = 0x01;
        /// The application asked to open while the timer was running
        const API_CALLED = 0x02;
    }
}

bitflags::bitflags! {
    /// Outstanding asynchronous work a stream is waiting for
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitFlags: u8 {
        /// Role switch result needed before the open can proceed
        const ROLE_SW_RES_OPEN = 0x01;
        /// Role switch result needed before the start can proceed
        const ROLE_SW_RES_START = 0x02;
        /// The stream started while a role switch was outstanding
        const ROLE_SW_STARTED = 0x04;
        /// Retry the role switch once more
        const ROLE_SW_RETRY = 0x08;
        /// Check for RC once the role switch settles
        const CHECK_RC = 0x10;
        /// The role switch failed
        const ROLE_SW_FAILED = 0x20;
        /// Capabilities of further peer endpoints are being collected as acceptor
        const ACP_CAPS_ON = 0x40;
        /// The stream started while capabilities were still being collected
        const ACP_CAPS_STARTED = 0x80;

        /// Every role switch bit
        const ROLE_SW_BITS = Self::ROLE_SW_RES_OPEN.bits()
            | Self::ROLE_SW_RES_START.bits()
            | Self::ROLE_SW_STARTED.bits()
            | Self::ROLE_SW_RETRY.bits()
            | Self::ROLE_SW_FAILED.bits();
        /// Both role switch result bits
        const ROLE_SW_RES = Self::ROLE_SW_RES_OPEN.bits() | Self::ROLE_SW_RES_START.bits();
        /// Both acceptor capability bits
        const ACP_CAPS = Self::ACP_CAPS_ON.bits() | Self::ACP_CAPS_STARTED.bits();
    }
}

bitflags::bitflags! {
    /// Role of this side in the stream's signaling
    ///
    /// An empty set means initiator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RoleFlags: u8 {
        /// The peer configured the stream (acceptor)
        const ACCEPTOR = 0x01;
        /// This side initiated the start
        const START_INT = 0x10;
        /// The stream is suspended by this side
        const SUSPEND = 0x20;
        /// Suspend right after a peer-initiated start
        const SUSPEND_OPT = 0x40;
    }
}

bitflags::bitflags! {
    /// Status of an RC channel
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RcStatus: u8 {
        /// Opened as acceptor; otherwise initiator
        const ACCEPTOR = 0x10;
        /// The AVCTP channel is connected
        const CONNECTED = 0x20;
    }
}

/// Procedure that is queued behind a role switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
pub enum QueueTag {
    /// Nothing queued
    #[default]
    None,
    /// An open is queued
    Open,
    /// A start is queued
    Start,
}

/// Token for an outstanding SDP search of the peer's A2DP service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryDb {
    /// Endpoint type searched for
    pub tsep: SepType,
}

/// Stream control block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scb {
    /// Stream handle
    pub handle: StreamHandle,
    /// Channel the stream is registered on
    pub channel: AvChannel,
    /// Local endpoint type
    pub tsep: SepType,
    /// Media type of the channel
    pub media_type: MediaType,
    /// Service name
    pub service_name: ServiceName,
    /// Application identifier
    pub app_id: u8,
    /// Current state
    pub state: StreamState,
    /// Peer address, zero when unbound
    pub peer: BluetoothAddress,
    /// Peer AVDTP version
    pub avdt_version: u16,
    /// Media MTU
    pub stream_mtu: u16,
    /// Codec type byte of the current configuration
    pub codec_type: u8,
    /// Remote endpoints from the last discovery
    pub sep_info: Vec<SepInfo, MAX_SEPS>,
    /// Number of remote endpoints to walk
    pub num_seps: u8,
    /// Cursor into `sep_info`
    pub sep_info_idx: u8,
    /// Endpoint index requested by a reconfiguration
    pub rcfg_idx: u8,
    /// Current configuration
    pub config: StreamConfig,
    /// Peer capabilities or pending reconfiguration
    pub pending_cap: Option<StreamConfig>,
    /// Saved open request
    pub open_api: Option<OpenRequest>,
    /// Procedure queued behind a role switch
    pub q_tag: QueueTag,
    /// Media path congested
    pub cong: bool,
    /// Reconfiguration attempts so far
    pub num_recfg: u8,
    /// Signaling role
    pub role: RoleFlags,
    /// Collision state
    pub coll_mask: CollisionFlags,
    /// Outstanding asynchronous work
    pub wait: WaitFlags,
    /// AVDTP stream started
    pub started: bool,
    /// Media call-out started
    pub co_started: bool,
    /// Peer supports suspend
    pub suspend_sup: bool,
    /// Peer supports reconfigure
    pub recfg_sup: bool,
    /// Deregistration in progress
    pub deregistering: bool,
    /// Open AVRCP with the stream
    pub use_rc: bool,
    /// Security mask
    pub sec_mask: u8,
    /// Failure to report when the stream closes
    pub open_status: Option<AvError>,
    /// Associated RC handle
    pub rc_handle: Option<u8>,
    /// Outstanding SDP search
    pub disc_db: Option<DiscoveryDb>,
    /// Usable remote endpoints found by discovery
    pub disc_counts: SepCounts,
    /// Service categories in use
    pub cur_psc_mask: u8,
    /// AVDTP label of the pending configuration or security indication
    pub avdt_label: u8,
    /// HCI reason of the last disconnect
    pub disc_reason: u8,
    /// Event fired when the stream timer expires
    pub timer_event: Option<StreamEvent>,
    /// Start deferred until a companion stream settles
    pub start_held: bool,
}

impl Scb {
    /// Create a fresh control block for a registration
    #[must_use]
    pub fn new(handle: StreamHandle, registration: &Registration) -> Self {
        let media_type = match registration.channel {
            AvChannel::Audio => MediaType::Audio,
            AvChannel::Video => MediaType::Video,
        };
        Self {
            handle,
            channel: registration.channel,
            tsep: registration.tsep,
            media_type,
            service_name: registration.service_name.clone(),
            app_id: registration.app_id,
            state: StreamState::Init,
            peer: BluetoothAddress::ZERO,
            avdt_version: 0,
            stream_mtu: 0,
            codec_type: 0,
            sep_info: Vec::new(),
            num_seps: 0,
            sep_info_idx: 0,
            rcfg_idx: 0,
            config: StreamConfig::default(),
            pending_cap: None,
            open_api: None,
            q_tag: QueueTag::None,
            cong: false,
            num_recfg: 0,
            role: RoleFlags::empty(),
            coll_mask: CollisionFlags::empty(),
            wait: WaitFlags::empty(),
            started: false,
            co_started: false,
            suspend_sup: true,
            recfg_sup: true,
            deregistering: false,
            use_rc: false,
            sec_mask: 0,
            open_status: None,
            rc_handle: None,
            disc_db: None,
            disc_counts: SepCounts::default(),
            cur_psc_mask: 0,
            avdt_label: 0,
            disc_reason: 0,
            timer_event: None,
            start_held: false,
        }
    }

    /// Pool slot of this stream
    #[must_use]
    pub fn index(&self) -> usize {
        self.handle.index().unwrap_or_default()
    }

    /// Whether the stream is bound to `peer`
    #[must_use]
    pub fn is_bound_to(&self, peer: &BluetoothAddress) -> bool {
        !self.peer.is_zero() && self.peer == *peer
    }

    /// Remember the peer; forget what a previous peer supported
    pub fn save_peer(&mut self, peer: BluetoothAddress) {
        if self.peer != peer {
            self.recfg_sup = true;
            self.suspend_sup = true;
        }
        self.peer = peer;
    }

    /// Return an idle stream to the free pool without touching link bookkeeping
    pub fn unbind(&mut self) {
        self.peer = BluetoothAddress::ZERO;
        self.role = RoleFlags::empty();
        self.wait = WaitFlags::empty();
        self.coll_mask = CollisionFlags::empty();
        self.open_api = None;
        self.use_rc = false;
    }
}

/// Remote-control block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rcb {
    /// Slot holds an AVCTP channel (open or listening)
    pub allocated: bool,
    /// Status
    pub status: RcStatus,
    /// Associated stream slot + 1, 0 if none
    pub shdl: u8,
    /// Link slot + 1, `RC_ACCEPTOR_LINK` for the listening acceptor, 0 if none
    pub lidx: u8,
    /// Features of the peer
    pub peer_features: Features,
    /// Peer controller feature bits
    pub ct_features: u16,
    /// Peer target feature bits
    pub tg_features: u16,
    /// Cover-art session
    pub cover_art: CoverArtSession,
}

impl Rcb {
    const fn new() -> Self {
        Self {
            allocated: false,
            status: RcStatus::empty(),
            shdl: 0,
            lidx: 0,
            peer_features: Features::empty(),
            ct_features: 0,
            tg_features: 0,
            cover_art: CoverArtSession::new(),
        }
    }

    /// Whether the AVCTP channel is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.allocated && self.status.contains(RcStatus::CONNECTED)
    }

    /// Release the slot
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for Rcb {
    fn default() -> Self {
        Self::new()
    }
}

/// Link control block: one per peer with an AVDTP signaling link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lcb {
    /// Slot in use
    pub in_use: bool,
    /// Peer address
    pub peer: BluetoothAddress,
    /// Streams bound to this link, one bit per stream slot (bit index + 1)
    pub conn_mask: u8,
    /// Link slot + 1
    pub lidx: u8,
}

impl Lcb {
    const fn new() -> Self {
        Self {
            in_use: false,
            peer: BluetoothAddress::ZERO,
            conn_mask: 0,
            lidx: 0,
        }
    }

    /// Release the slot
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

/// How [`Registry::find_lcb`] treats a missing link
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum LcbMode {
    /// Only return an existing link
    Find,
    /// Return the existing link or claim a free slot
    Allocate,
}

/// Fixed pools of control blocks
#[derive(Debug)]
pub struct Registry {
    scbs: [Option<Scb>; MAX_STREAMS],
    rcbs: [Rcb; NUM_RCBS],
    lcbs: [Lcb; NUM_LCBS],
}

impl Registry {
    /// Create empty pools
    #[must_use]
    pub fn new() -> Self {
        Self {
            scbs: [const { None }; MAX_STREAMS],
            rcbs: [const { Rcb::new() }; NUM_RCBS],
            lcbs: [const { Lcb::new() }; NUM_LCBS],
        }
    }

    /// Claim the first free stream slot
    ///
    /// # Errors
    /// Returns [`AvError::NoResources`] when every slot is taken
    pub fn register(&mut self, registration: &Registration) -> Result<StreamHandle, AvError> {
        let index = self
            .scbs
            .iter()
            .position(Option::is_none)
            .ok_or(AvError::NoResources)?;
        let handle = StreamHandle::new(registration.channel, index);
        self.scbs[index] = Some(Scb::new(handle, registration));
        Ok(handle)
    }

    /// Free a stream slot
    pub fn release(&mut self, index: usize) -> Option<Scb> {
        self.scbs.get_mut(index).and_then(Option::take)
    }

    /// Slot of a registered stream
    #[must_use]
    pub fn index_of(&self, handle: StreamHandle) -> Option<usize> {
        let index = handle.index()?;
        match &self.scbs[index] {
            Some(scb) if scb.handle == handle => Some(index),
            _ => None,
        }
    }

    /// Stream control block of a handle
    pub fn handle_to_scb(&mut self, handle: StreamHandle) -> Option<&mut Scb> {
        let index = self.index_of(handle)?;
        self.scbs[index].as_mut()
    }

    /// Stream control block in slot `index`
    #[must_use]
    pub fn scb(&self, index: usize) -> Option<&Scb> {
        self.scbs.get(index).and_then(Option::as_ref)
    }

    /// Mutable stream control block in slot `index`
    pub fn scb_mut(&mut self, index: usize) -> Option<&mut Scb> {
        self.scbs.get_mut(index).and_then(Option::as_mut)
    }

    /// Registered streams
    pub fn scbs(&self) -> impl Iterator<Item = &Scb> {
        self.scbs.iter().flatten()
    }

    /// Registered streams, mutable
    pub fn scbs_mut(&mut self) -> impl Iterator<Item = &mut Scb> {
        self.scbs.iter_mut().flatten()
    }

    /// Whether any stream is registered
    #[must_use]
    pub fn any_registered(&self) -> bool {
        self.scbs.iter().any(Option::is_some)
    }

    /// Link of `peer`, optionally claiming a free slot
    ///
    /// Only the first `MAX_LINKS` slots hold AVDTP links; see [`Registry::rc_only_lcb`].
    pub fn find_lcb(&mut self, peer: &BluetoothAddress, mode: LcbMode) -> Option<&mut Lcb> {
        let links = &mut self.lcbs[..MAX_LINKS];
        if let Some(index) = links.iter().position(|lcb| lcb.in_use && lcb.peer == *peer) {
            return Some(&mut links[index]);
        }
        if mode == LcbMode::Find {
            return None;
        }
        let index = links.iter().position(|lcb| !lcb.in_use)?;
        let lcb = &mut links[index];
        *lcb = Lcb {
            in_use: true,
            peer: *peer,
            conn_mask: 0,
            lidx: index as u8 + 1,
        };
        Some(lcb)
    }

    /// Release the link of `peer`
    pub fn release_lcb(&mut self, peer: &BluetoothAddress) -> Option<Lcb> {
        let lcb = self.find_lcb(peer, LcbMode::Find)?;
        let released = *lcb;
        *lcb = Lcb::new();
        Some(released)
    }

    /// Link slots in use
    pub fn lcbs(&self) -> impl Iterator<Item = &Lcb> {
        self.lcbs[..MAX_LINKS].iter().filter(|lcb| lcb.in_use)
    }

    /// Whether any AVDTP link is up
    #[must_use]
    pub fn any_link(&self) -> bool {
        self.lcbs().next().is_some()
    }

    /// The extra link slot used by peers that connect RC without AVDTP
    pub fn rc_only_lcb(&mut self) -> &mut Lcb {
        &mut self.lcbs[MAX_LINKS]
    }

    /// Link slot by `lidx` (slot + 1)
    pub fn lcb_by_lidx(&mut self, lidx: u8) -> Option<&mut Lcb> {
        let index = usize::from(lidx).checked_sub(1)?;
        self.lcbs.get_mut(index)
    }

    /// Claim a free RC slot
    pub fn allocate_rcb(&mut self) -> Option<u8> {
        let index = self.rcbs.iter().position(|rcb| !rcb.allocated)?;
        self.rcbs[index] = Rcb {
            allocated: true,
            ..Rcb::new()
        };
        Some(index as u8)
    }

    /// RC block by handle
    #[must_use]
    pub fn rcb(&self, rc_handle: u8) -> Option<&Rcb> {
        self.rcbs.get(usize::from(rc_handle)).filter(|rcb| rcb.allocated)
    }

    /// Mutable RC block by handle
    pub fn rcb_mut(&mut self, rc_handle: u8) -> Option<&mut Rcb> {
        self.rcbs
            .get_mut(usize::from(rc_handle))
            .filter(|rcb| rcb.allocated)
    }

    /// RC handles currently allocated
    pub fn rc_handles(&self) -> impl Iterator<Item = u8> + '_ {
        self.rcbs
            .iter()
            .enumerate()
            .filter(|(_, rcb)| rcb.allocated)
            .map(|(index, _)| index as u8)
    }

    /// RC block associated with a stream
    pub fn get_rcb_by_stream(&mut self, handle: StreamHandle) -> Option<(u8, &mut Rcb)> {
        let shdl = handle.index()? as u8 + 1;
        self.rcbs
            .iter_mut()
            .enumerate()
            .find(|(_, rcb)| rcb.allocated && rcb.shdl == shdl)
            .map(|(index, rcb)| (index as u8, rcb))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
