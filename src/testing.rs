//! Test doubles and drivers shared by the unit tests

use crate::a2dp::{MediaType, SepInfo, SepType, StreamConfig};
use crate::callout::{AppCallback, AvEvent, LowerCommand, LowerLayer, MediaCallout, MediaPacket};
use crate::constants::psc;
use crate::event::{
    Blob, DiscoveryResult, Envelope, EventData, LinkChange, LinkRole, OpenRequest, Registration,
    StreamEvent, StreamOpened, SystemEvent,
};
use crate::registry::{ServiceName, StreamHandle};
use crate::{AvChannel, BluetoothAddress, Core, Features};
use std::vec::Vec;

pub(crate) const PEER: BluetoothAddress =
    BluetoothAddress::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
pub(crate) const PEER2: BluetoothAddress =
    BluetoothAddress::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x14]);

/// Records every call-out; answers queries from its fields
#[derive(Debug, Default)]
pub(crate) struct MockPlatform {
    pub commands: Vec<LowerCommand>,
    pub events: Vec<AvEvent>,
    pub roles: Vec<(BluetoothAddress, LinkRole)>,
    pub unsupported_keys: Vec<u8>,
    pub proposed: Vec<(StreamHandle, u8)>,
    pub closed: Vec<StreamHandle>,
    pub packets_requested: usize,
    pub next_packet: Option<MediaPacket>,
    pub hold_starts: bool,
}

impl MockPlatform {
    pub fn clear(&mut self) {
        self.commands.clear();
        self.events.clear();
    }
}

impl LowerLayer for MockPlatform {
    fn send(&mut self, command: LowerCommand) {
        self.commands.push(command);
    }

    fn link_role(&self, peer: &BluetoothAddress) -> Option<LinkRole> {
        self.roles
            .iter()
            .find(|(address, _)| address == peer)
            .map(|&(_, role)| role)
    }
}

impl MediaCallout for MockPlatform {
    fn get_config(
        &mut self,
        _handle: StreamHandle,
        _seid: u8,
        caps: &StreamConfig,
    ) -> Option<StreamConfig> {
        Some(caps.clone())
    }

    fn set_config(
        &mut self,
        handle: StreamHandle,
        _peer: &BluetoothAddress,
        seid: u8,
        _config: &StreamConfig,
    ) {
        self.proposed.push((handle, seid));
    }

    fn close(&mut self, handle: StreamHandle) {
        self.closed.push(handle);
    }

    fn next_packet(&mut self, _handle: StreamHandle) -> Option<MediaPacket> {
        self.packets_requested += 1;
        self.next_packet.take()
    }

    fn can_start(&mut self, _handle: StreamHandle, _companion: StreamHandle) -> bool {
        !self.hold_starts
    }

    fn passthrough_supported(&mut self, op_id: u8) -> bool {
        !self.unsupported_keys.contains(&op_id)
    }
}

impl AppCallback for MockPlatform {
    fn on_event(&mut self, event: AvEvent) {
        self.events.push(event);
    }
}

pub(crate) fn enabled_core(features: Features) -> Core<MockPlatform> {
    let mut core = Core::new(MockPlatform::default());
    core.handle(Envelope::system(SystemEvent::Enable, EventData::Enable(features)));
    core
}

pub(crate) fn registration(channel: AvChannel) -> Registration {
    Registration {
        channel,
        tsep: SepType::Source,
        service_name: ServiceName::try_from("Audio Source").unwrap(),
        app_id: 1,
        media_callback: None,
    }
}

pub(crate) fn register(core: &mut Core<MockPlatform>, channel: AvChannel) -> StreamHandle {
    core.handle(Envelope::system(
        SystemEvent::Register,
        EventData::Register(registration(channel)),
    ));
    core.platform()
        .events
        .iter()
        .rev()
        .find_map(|event| match event {
            AvEvent::Registered { result, .. } => Some(*result),
            _ => None,
        })
        .unwrap()
        .unwrap()
}

/// SBC capabilities / configuration for a stream of `media_type`
pub(crate) fn sbc_config(media_type: MediaType) -> StreamConfig {
    let codec = [0x06, (media_type as u8) << 4, 0x00, 0x21, 0x15, 0x02, 0x35];
    StreamConfig {
        codec: Blob::from_slice(&codec).unwrap(),
        protect: Blob::new(),
        psc_mask: psc::DELAY_RPT,
    }
}

pub(crate) fn stream(
    core: &mut Core<MockPlatform>,
    handle: StreamHandle,
    event: StreamEvent,
    data: EventData,
) {
    core.handle(Envelope::stream(handle, event, data));
}

pub(crate) fn link_up(core: &mut Core<MockPlatform>, peer: BluetoothAddress, acceptor: bool) {
    core.handle(Envelope::system(
        SystemEvent::SignalChange,
        EventData::Link(LinkChange {
            peer,
            connected: true,
            acceptor,
            reason: 0,
        }),
    ));
}

/// Drive a stream through the initiator open sequence up to OPEN
pub(crate) fn open_stream(
    core: &mut Core<MockPlatform>,
    handle: StreamHandle,
    peer: BluetoothAddress,
) {
    let open = OpenRequest::new(peer, false, 0);
    stream(core, handle, StreamEvent::ApOpen, EventData::Open(open));
    complete_open(core, handle, peer);
}

/// Answer every request of an OPENING stream until it is OPEN
pub(crate) fn complete_open(
    core: &mut Core<MockPlatform>,
    handle: StreamHandle,
    peer: BluetoothAddress,
) {
    let media_type = core
        .registry
        .handle_to_scb(handle)
        .map(|scb| scb.media_type)
        .unwrap();
    stream(core, handle, StreamEvent::SdpDiscOk, EventData::None);
    link_up(core, peer, false);
    stream(core, handle, StreamEvent::AvdtConnect, EventData::None);

    let mut seps = heapless::Vec::new();
    seps.push(SepInfo::new(1, media_type, SepType::Sink)).unwrap();
    stream(
        core,
        handle,
        StreamEvent::StrDiscOk,
        EventData::Discovery(DiscoveryResult { seps }),
    );
    stream(
        core,
        handle,
        StreamEvent::StrGetcapOk,
        EventData::Capabilities(sbc_config(media_type)),
    );
    stream(
        core,
        handle,
        StreamEvent::StrOpenOk,
        EventData::Opened(StreamOpened {
            peer,
            peer_mtu: 895,
            avdt_version: 0x0103,
        }),
    );
    assert_eq!(core.state(handle), Some(crate::StreamState::Open));
}

// Host test binaries still link defmt through embassy-sync; provide the
// symbols it expects so the unit tests can link.
#[defmt::global_logger]
struct NullLogger;

unsafe impl defmt::Logger for NullLogger {
    fn acquire() {}
    unsafe fn flush() {}
    unsafe fn release() {}
    unsafe fn write(_bytes: &[u8]) {}
}

defmt::timestamp!("{=u32}", 0);

#[defmt::panic_handler]
fn defmt_panic() -> ! {
    panic!("defmt panic")
}
