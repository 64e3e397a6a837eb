//! Device-level events: enable/disable, registration and the fan-out of link-wide events.

use crate::callout::{AvEvent, LowerCommand};
use crate::constants::{MAX_STREAMS, NUM_RCBS, RC_ACCEPTOR_LINK};
use crate::event::{
    EventData, Registration, RoleChange, StreamEvent, SwitchResult, SystemEvent, TimerId,
};
use crate::rc::RcRole;
use crate::registry::{QueueTag, Scb, StreamHandle};
use crate::stream::StreamState;
use crate::{AvChannel, AvError, BluetoothAddress, Core, Features, Platform};
use heapless::Vec;

impl<P: Platform> Core<P> {
    pub(super) fn handle_system(&mut self, event: SystemEvent, handle: u8, data: &mut EventData) {
        match (event, data) {
            (SystemEvent::Enable, EventData::Enable(features)) => {
                let features = *features;
                self.enable(features);
            }
            (SystemEvent::Disable, _) => self.disable(),
            (SystemEvent::Register, EventData::Register(registration)) => {
                self.register(registration);
            }
            (SystemEvent::Deregister, _) => self.deregister(StreamHandle::from_raw(handle)),
            (SystemEvent::Disconnect, EventData::Peer(peer)) => {
                let peer = *peer;
                self.disconnect(peer);
            }
            (SystemEvent::SignalChange, EventData::Link(change)) => {
                let change = *change;
                self.sig_chg(change);
            }
            (SystemEvent::Timer, EventData::Timer(timer)) => match *timer {
                TimerId::Stream(stream) => self.stream_timer_expired(stream),
                TimerId::AcceptorSignal => self.acp_sig_timer(),
                TimerId::Signal => self.sig_timer(),
            },
            (SystemEvent::RoleChange, EventData::Role(change)) => {
                let change = *change;
                self.role_change(change);
            }
            (SystemEvent::DataReady, EventData::Channel(channel)) => {
                let channel = *channel;
                self.data_ready(channel);
            }
            (SystemEvent::DeregComplete, _) => self.dereg_comp(StreamHandle::from_raw(handle)),
            (event, _) => warn!("[CORE] {:?} with unexpected payload", event),
        }
    }

    fn enable(&mut self, features: Features) {
        if self.enabled {
            warn!("[CORE] Already enabled");
            return;
        }
        info!("[CORE] Enable, features {:#x}", features.bits());
        self.enabled = true;
        self.disabling = false;
        self.features = features;
        self.notify(AvEvent::Enabled { features });
    }

    fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        info!("[CORE] Disable");
        self.disabling = true;
        self.close_all_rc();
        self.rc_disc_pending = None;
        self.stop_timer(TimerId::Signal);
        self.stop_timer(TimerId::AcceptorSignal);

        let handles: Vec<StreamHandle, MAX_STREAMS> =
            self.registry.scbs().map(|scb| scb.handle).collect();
        if handles.is_empty() {
            self.disabled();
            return;
        }
        for handle in handles {
            self.deregister(handle);
        }
    }

    fn disabled(&mut self) {
        self.enabled = false;
        self.disabling = false;
        self.features = Features::empty();
        self.rc_acp_handle = None;
        self.notify(AvEvent::Disabled);
    }

    fn register(&mut self, registration: &Registration) {
        let channel = registration.channel;
        let app_id = registration.app_id;
        if !self.enabled || self.disabling {
            warn!("[CORE] Register while disabled");
            self.notify(AvEvent::Registered {
                result: Err(AvError::Fail),
                channel,
                app_id,
            });
            return;
        }

        let result = self.registry.register(registration);
        if let Ok(handle) = result {
            let index = handle.index().unwrap_or_default();
            self.media_callbacks[index] = registration.media_callback;
            match channel {
                AvChannel::Audio => self.reg_audio |= handle.mask(),
                AvChannel::Video => self.reg_video |= handle.mask(),
            }
            info!("[CORE] Registered stream {} on {:?}", handle.raw(), channel);

            if channel == AvChannel::Audio
                && self.features.contains(Features::RC_TARGET)
                && self.rc_acp_handle.is_none()
            {
                self.rc_create(RcRole::Acceptor, 0, RC_ACCEPTOR_LINK);
            }
        } else {
            warn!("[CORE] No free stream slot for {:?}", channel);
        }
        self.notify(AvEvent::Registered {
            result,
            channel,
            app_id,
        });
    }

    /// Start unwinding a stream; the slot is released by `DeregComplete`
    fn deregister(&mut self, handle: StreamHandle) {
        let Some(index) = self.registry.index_of(handle) else {
            warn!("[CORE] Deregister unknown stream {}", handle.raw());
            return;
        };
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.deregistering = true;
        if scb.state == StreamState::Init {
            self.cleanup(index);
        } else {
            self.ssm_execute(index, StreamEvent::ApClose, &mut EventData::None);
        }
    }

    fn dereg_comp(&mut self, handle: StreamHandle) {
        let Some(index) = self.registry.index_of(handle) else {
            return;
        };
        let mask = handle.mask();
        self.stop_stream_timer(index);
        match handle.channel() {
            Some(AvChannel::Audio) => {
                if self.conn_audio & mask != 0 {
                    self.audio_open_cnt = self.audio_open_cnt.saturating_sub(1);
                }
                self.reg_audio &= !mask;
                self.conn_audio &= !mask;
                self.audio_streams &= !mask;
            }
            Some(AvChannel::Video) => {
                self.reg_video &= !mask;
                self.conn_video &= !mask;
                self.video_streams &= !mask;
            }
            None => {}
        }

        let shdl = index as u8 + 1;
        let handles: Vec<u8, NUM_RCBS> = self.registry.rc_handles().collect();
        for rc_handle in handles {
            if let Some(rcb) = self
                .registry
                .rcb_mut(rc_handle)
                .filter(|rcb| rcb.shdl == shdl)
            {
                rcb.shdl = 0;
            }
        }
        if self.acp_sig_stream == Some(index) {
            self.acp_sig_stream = None;
        }
        if self.rs_idx == shdl {
            self.rs_idx = 0;
        }

        self.media_callbacks[index] = None;
        self.registry.release(index);
        info!("[CORE] Deregistered stream {}", handle.raw());
        self.notify(AvEvent::Deregistered { handle });

        if self.disabling && !self.registry.any_registered() {
            self.disabled();
        }
    }

    fn disconnect(&mut self, peer: BluetoothAddress) {
        info!("[CORE] Disconnect {}", peer);
        self.stop_timer(TimerId::Signal);
        self.send(LowerCommand::Disconnect { peer });
    }

    /// Forward a role change to every stream on the peer, then resume an open that waited for
    /// a switch on another link
    fn role_change(&mut self, change: RoleChange) {
        let bound: Vec<usize, MAX_STREAMS> = self
            .registry
            .scbs()
            .filter(|scb| scb.is_bound_to(&change.peer))
            .map(Scb::index)
            .collect();
        let peer_idx = bound.last().map_or(0, |&index| index as u8 + 1);
        for &index in &bound {
            self.ssm_execute(index, StreamEvent::RoleChange, &mut EventData::Role(change));
        }

        if self.rs_idx == 0 || self.rs_idx == peer_idx {
            return;
        }
        let index = usize::from(self.rs_idx - 1);
        let open = self
            .registry
            .scb(index)
            .filter(|scb| scb.q_tag == QueueTag::Open)
            .and_then(|scb| scb.open_api);
        if let Some(mut open) = open {
            self.rs_idx = 0;
            open.switch_res = if change.status == 0 {
                SwitchResult::Ok
            } else {
                SwitchResult::Fail
            };
            debug!("[CORE] Resuming open of stream slot {}", index);
            self.stop_stream_timer(index);
            self.open_with(index, open);
        }
    }

    fn data_ready(&mut self, channel: AvChannel) {
        let started: Vec<usize, MAX_STREAMS> = self
            .registry
            .scbs()
            .filter(|scb| scb.channel == channel && scb.co_started)
            .map(Scb::index)
            .collect();
        for index in started {
            self.ssm_execute(index, StreamEvent::SrcDataReady, &mut EventData::None);
        }
    }
}
