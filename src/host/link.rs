//! Link-level bookkeeping: signaling links, connected-stream masks, ACL priority and role
//! switches.

use crate::callout::{AvEvent, LowerCommand};
use crate::constants::RC_ACCEPTOR_LINK;
use crate::event::{EventData, LinkChange, LinkRole, StreamEvent, TimerId};
use crate::rc::RcRole;
use crate::registry::{CollisionFlags, LcbMode, WaitFlags};
use crate::stream::StreamState;
use crate::{AvChannel, BluetoothAddress, Core, Features, Platform};

/// Role-switch policy threshold: one other AV link is tolerated
pub(crate) const ONE_LINK: u8 = 1;
/// Role-switch policy threshold: several AV links are tolerated
pub(crate) const MULTI_LINK: u8 = 2;

impl<P: Platform> Core<P> {
    /// Whether the stream can proceed with the current link role
    ///
    /// When this side is not central and more audio links are open than `bits` tolerates (or
    /// the central role is required), a switch is requested and `false` is returned.
    pub(crate) fn link_role_ok(&mut self, index: usize, bits: u8) -> bool {
        let Some(scb) = self.registry.scb(index) else {
            return true;
        };
        let peer = scb.peer;
        let Some(role) = self.platform.link_role(&peer) else {
            return true;
        };
        let links = match self.conn_audio.count_ones() {
            0 => 0,
            1 => ONE_LINK,
            _ => MULTI_LINK,
        };
        if role == LinkRole::Central
            || (links <= bits && !self.features.contains(Features::MASTER))
        {
            return true;
        }

        debug!("[LINK] Stream {} needs central role (links {})", index, links);
        if let Some(scb) = self.registry.scb_mut(index) {
            scb.wait.insert(WaitFlags::ROLE_SW_RES_START);
        }
        self.send(LowerCommand::SwitchRole {
            peer,
            role: LinkRole::Central,
        });
        false
    }

    /// Switch another connected peer to central before this stream opens
    ///
    /// Returns `true` if a switch was requested; the stream's timer re-evaluates it.
    pub(crate) fn switch_if_needed(&mut self, index: usize) -> bool {
        let conn = self.conn_audio | self.conn_video;
        let other = self
            .registry
            .scbs()
            .filter(|scb| scb.index() != index && conn & scb.handle.mask() != 0)
            .map(|scb| scb.peer)
            .find(|peer| self.platform.link_role(peer) == Some(LinkRole::Peripheral));
        let Some(peer) = other else {
            return false;
        };

        debug!("[LINK] Switching {} to central for stream {}", peer, index);
        self.send(LowerCommand::SwitchRole {
            peer,
            role: LinkRole::Central,
        });
        self.start_stream_timer(index, StreamEvent::AvrcTimer, self.options.role_switch_ms);
        self.rs_idx = index as u8 + 1;
        true
    }

    /// Connected-stream bookkeeping when a transport opens (`up`) or closes
    pub(crate) fn conn_chg(&mut self, index: usize, up: bool) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        let (mask, channel, peer) = (scb.handle.mask(), scb.channel, scb.peer);
        let shdl = index as u8 + 1;

        if up {
            let lidx = self
                .registry
                .find_lcb(&peer, LcbMode::Find)
                .map(|lcb| {
                    lcb.conn_mask |= 1 << shdl;
                    lcb.lidx
                });
            if let Some(lidx) = lidx {
                let handles: heapless::Vec<u8, { crate::constants::NUM_RCBS }> =
                    self.registry.rc_handles().collect();
                for rc_handle in handles {
                    if let Some(rcb) = self
                        .registry
                        .rcb_mut(rc_handle)
                        .filter(|rcb| rcb.lidx == lidx && rcb.shdl == 0)
                    {
                        rcb.shdl = shdl;
                    }
                }
            }

            match channel {
                AvChannel::Audio => {
                    if self.conn_audio & mask == 0 {
                        self.audio_open_cnt += 1;
                    }
                    self.conn_audio |= mask;
                }
                AvChannel::Video => self.conn_video |= mask,
            }

            // A peer that connected AVRCP first now opened a stream: tie its RC channel to it.
            let rc_only = self.registry.rc_only_lcb();
            if rc_only.lidx == RC_ACCEPTOR_LINK && rc_only.peer == peer {
                rc_only.clear();
                let lidx = self.registry.find_lcb(&peer, LcbMode::Find).map(|lcb| lcb.lidx);
                let rc_handle = self.registry.rc_handles().find(|&rc_handle| {
                    self.registry
                        .rcb(rc_handle)
                        .is_some_and(|rcb| rcb.lidx == RC_ACCEPTOR_LINK && rcb.is_connected())
                });
                if let Some(rc_handle) = rc_handle {
                    if let Some(rcb) = self.registry.rcb_mut(rc_handle) {
                        rcb.shdl = shdl;
                        rcb.lidx = lidx.unwrap_or_default();
                    }
                    if let Some(scb) = self.registry.scb_mut(index) {
                        scb.rc_handle = Some(rc_handle);
                    }
                    if self.rc_acp_handle == Some(rc_handle) {
                        self.rc_acp_handle = None;
                    }
                    if self.features.contains(Features::RC_TARGET) {
                        self.rc_create(RcRole::Acceptor, 0, RC_ACCEPTOR_LINK);
                    }
                }
            }
            return;
        }

        match channel {
            AvChannel::Audio => {
                if self.conn_audio & mask != 0 {
                    self.audio_open_cnt = self.audio_open_cnt.saturating_sub(1);
                }
                self.conn_audio &= !mask;
                if let Some(lcb) = self.registry.find_lcb(&peer, LcbMode::Find) {
                    lcb.conn_mask &= !(1 << shdl);
                }
            }
            AvChannel::Video => self.conn_video &= !mask,
        }
        if let Some(scb) = self.registry.scb_mut(index) {
            scb.peer = BluetoothAddress::ZERO;
        }
        self.stop_stream_timer(index);

        let rc_handle = self
            .registry
            .rc_handles()
            .find(|&rc_handle| self.registry.rcb(rc_handle).is_some_and(|rcb| rcb.shdl == shdl));
        if let Some(rc_handle) = rc_handle {
            self.del_rc(rc_handle);
        }

        if self.conn_audio == 0 && self.conn_video == 0 {
            self.close_all_rc();
        }
        if self.rc_acp_handle.is_none()
            && self.features.contains(Features::RC_TARGET)
            && !self.disabling
        {
            self.rc_create(RcRole::Acceptor, 0, RC_ACCEPTOR_LINK);
        }
    }

    /// Media started (`started`) or stopped on a stream: keep ACL priority in step
    pub(crate) fn stream_chg(&mut self, index: usize, started: bool) {
        let Some(scb) = self.registry.scb(index) else {
            return;
        };
        let (mask, channel, peer) = (scb.handle.mask(), scb.channel, scb.peer);

        if started {
            match channel {
                AvChannel::Audio => self.audio_streams |= mask,
                AvChannel::Video => self.video_streams |= mask,
            }
            self.send(LowerCommand::SetAclPriority { peer, high: true });
            return;
        }

        let idle = match channel {
            AvChannel::Audio => {
                self.audio_streams &= !mask;
                self.video_streams == 0
            }
            AvChannel::Video => {
                self.video_streams &= !mask;
                let audio = self.audio_streams;
                !self
                    .registry
                    .scbs()
                    .any(|scb| audio & scb.handle.mask() != 0 && scb.peer == peer)
            }
        };
        if idle {
            self.send(LowerCommand::SetAclPriority { peer, high: false });
        }
    }

    /// Signaling link of a peer came up or went down
    pub(super) fn sig_chg(&mut self, change: LinkChange) {
        let peer = change.peer;
        if !change.connected {
            self.registry.release_lcb(&peer);
            let bound: heapless::Vec<usize, { crate::constants::MAX_STREAMS }> = self
                .registry
                .scbs()
                .filter(|scb| scb.is_bound_to(&peer) && scb.state != StreamState::Init)
                .map(crate::registry::Scb::index)
                .collect();
            info!("[LINK] Signaling to {} down, {} streams", peer, bound.len());
            for index in bound {
                if let Some(scb) = self.registry.scb_mut(index) {
                    scb.disc_reason = change.reason;
                }
                self.ssm_execute(index, StreamEvent::AvdtDisconnect, &mut EventData::None);
            }
            return;
        }

        if self.registry.find_lcb(&peer, LcbMode::Find).is_some() {
            debug!("[LINK] Signaling to {} already known", peer);
            return;
        }
        let free = self
            .registry
            .scbs()
            .find(|scb| scb.state == StreamState::Init && scb.peer.is_zero())
            .map(crate::registry::Scb::index);
        let lidx = if free.is_some() || !change.acceptor {
            self.registry
                .find_lcb(&peer, LcbMode::Allocate)
                .map(|lcb| lcb.lidx)
        } else {
            None
        };
        let Some(lidx) = lidx else {
            warn!("[LINK] No room for signaling from {}", peer);
            self.send(LowerCommand::Disconnect { peer });
            return;
        };
        info!("[LINK] Signaling to {} up (link {})", peer, lidx);

        if self.features.contains(Features::RC_TARGET) {
            self.rc_create(RcRole::Acceptor, 0, lidx);
        }
        if !change.acceptor {
            return;
        }
        let Some(index) = free else {
            return;
        };
        if let Some(scb) = self.registry.scb_mut(index) {
            scb.save_peer(peer);
            scb.use_rc = true;
        }
        self.ssm_execute(index, StreamEvent::AcpConnect, &mut EventData::None);
        self.sig_timer();
        if let Some(scb) = self.registry.scb_mut(index) {
            scb.coll_mask = CollisionFlags::INCOMING_TIMER;
        }
        self.acp_sig_stream = Some(index);
        self.start_timer(TimerId::AcceptorSignal, self.options.acceptor_signal_ms);
    }

    /// Report links nobody has opened a stream on yet, and check again later
    pub(super) fn sig_timer(&mut self) {
        let idle: heapless::Vec<BluetoothAddress, { crate::constants::MAX_LINKS }> = self
            .registry
            .lcbs()
            .filter(|lcb| lcb.conn_mask == 0)
            .map(|lcb| lcb.peer)
            .collect();
        for peer in idle {
            self.start_timer(TimerId::Signal, self.options.signal_ms);
            self.notify(AvEvent::Pending { peer });
        }
    }

    /// The peer did not configure the stream it connected for in time
    pub(super) fn acp_sig_timer(&mut self) {
        let Some(index) = self.acp_sig_stream else {
            return;
        };
        let Some(scb) = self
            .registry
            .scb_mut(index)
            .filter(|scb| scb.coll_mask.contains(CollisionFlags::INCOMING_TIMER))
        else {
            return;
        };
        scb.coll_mask.remove(CollisionFlags::INCOMING_TIMER);

        let state = scb.state;
        match state {
            StreamState::Opening if scb.disc_db.is_some() => {
                // SDP still running; look again later.
                scb.coll_mask.insert(CollisionFlags::INCOMING_TIMER);
                self.start_timer(TimerId::AcceptorSignal, self.options.acceptor_signal_ms);
            }
            StreamState::Opening => self.discover_req(index),
            StreamState::Incoming if scb.coll_mask.contains(CollisionFlags::API_CALLED) => {
                scb.coll_mask.remove(CollisionFlags::API_CALLED);
                let (handle, open) = (scb.handle, scb.open_api);
                if let Some(open) = open {
                    debug!("[LINK] Retrying open of stream {}", handle.raw());
                    self.post(crate::event::Envelope::stream(
                        handle,
                        StreamEvent::ApOpen,
                        EventData::Open(open),
                    ));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Envelope, SystemEvent};
    use crate::testing::{PEER, PEER2, enabled_core, link_up, open_stream, register};

    #[test]
    fn test_acceptor_connect_binds_free_stream() {
        let mut core = enabled_core(Features::empty());
        let handle = register(&mut core, AvChannel::Audio);
        link_up(&mut core, PEER, true);

        let scb = core.registry.handle_to_scb(handle).unwrap();
        assert_eq!(scb.state, StreamState::Incoming);
        assert_eq!(scb.peer, PEER);
        assert!(scb.coll_mask.contains(CollisionFlags::INCOMING_TIMER));
        assert!(core.platform().events.contains(&AvEvent::Pending { peer: PEER }));
        assert!(core.platform().commands.contains(&LowerCommand::StartTimer {
            timer: TimerId::AcceptorSignal,
            duration_ms: core.options.acceptor_signal_ms,
        }));
    }

    #[test]
    fn test_acceptor_connect_without_stream_disconnects() {
        let mut core = enabled_core(Features::empty());
        link_up(&mut core, PEER, true);
        assert_eq!(
            core.platform().commands.last(),
            Some(&LowerCommand::Disconnect { peer: PEER })
        );
        assert!(!core.registry.any_link());
    }

    #[test]
    fn test_acceptor_timer_retries_saved_open() {
        let mut core = enabled_core(Features::empty());
        let handle = register(&mut core, AvChannel::Audio);
        link_up(&mut core, PEER, true);
        core.handle(Envelope::stream(
            handle,
            StreamEvent::ApOpen,
            EventData::Open(crate::event::OpenRequest::new(PEER, false, 0)),
        ));
        let scb = core.registry.handle_to_scb(handle).unwrap();
        assert!(scb.coll_mask.contains(CollisionFlags::API_CALLED));

        core.handle(Envelope::system(
            SystemEvent::Timer,
            EventData::Timer(TimerId::AcceptorSignal),
        ));
        assert_eq!(core.state(handle), Some(StreamState::Opening));
        assert!(core.platform().commands.iter().any(|command| matches!(
            command,
            LowerCommand::FindService { peer, .. } if *peer == PEER
        )));
    }

    #[test]
    fn test_link_down_closes_bound_streams() {
        let mut core = enabled_core(Features::empty());
        let handle = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, handle, PEER);
        assert_eq!(core.audio_open_count(), 1);

        core.handle(Envelope::system(
            SystemEvent::SignalChange,
            EventData::Link(LinkChange {
                peer: PEER,
                connected: false,
                acceptor: false,
                reason: 0x13,
            }),
        ));
        assert_eq!(core.state(handle), Some(StreamState::Init));
        assert_eq!(core.audio_open_count(), 0);
        assert!(core.platform().events.contains(&AvEvent::Close { handle, peer: PEER }));
    }

    #[test]
    fn test_stream_chg_toggles_acl_priority() {
        let mut core = enabled_core(Features::empty());
        let handle = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, handle, PEER);
        let index = core.registry.index_of(handle).unwrap();
        core.platform_mut().clear();

        core.stream_chg(index, true);
        assert_eq!(core.audio_streams, handle.mask());
        core.stream_chg(index, false);
        assert_eq!(
            core.platform().commands,
            [
                LowerCommand::SetAclPriority { peer: PEER, high: true },
                LowerCommand::SetAclPriority { peer: PEER, high: false },
            ]
        );
    }

    #[test]
    fn test_role_ok_when_central() {
        let mut core = enabled_core(Features::MASTER);
        let handle = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, handle, PEER);
        let index = core.registry.index_of(handle).unwrap();
        core.platform_mut().roles.push((PEER, LinkRole::Central));
        assert!(core.link_role_ok(index, ONE_LINK));
    }

    #[test]
    fn test_role_switch_requested_when_master_required() {
        let mut core = enabled_core(Features::MASTER);
        let handle = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, handle, PEER);
        let index = core.registry.index_of(handle).unwrap();
        core.platform_mut().roles.push((PEER, LinkRole::Peripheral));
        core.platform_mut().clear();

        assert!(!core.link_role_ok(index, ONE_LINK));
        assert_eq!(
            core.platform().commands,
            [LowerCommand::SwitchRole {
                peer: PEER,
                role: LinkRole::Central
            }]
        );
        let scb = core.registry.scb(index).unwrap();
        assert!(scb.wait.contains(WaitFlags::ROLE_SW_RES_START));
    }

    #[test]
    fn test_switch_if_needed_targets_other_peer() {
        let mut core = enabled_core(Features::MULTI_AV);
        let first = register(&mut core, AvChannel::Audio);
        let second = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, first, PEER);
        core.platform_mut().roles.push((PEER, LinkRole::Peripheral));
        core.platform_mut().clear();

        let index = core.registry.index_of(second).unwrap();
        if let Some(scb) = core.registry.scb_mut(index) {
            scb.peer = PEER2;
        }
        assert!(core.switch_if_needed(index));
        assert_eq!(core.rs_idx, index as u8 + 1);
        assert_eq!(
            core.platform().commands.first(),
            Some(&LowerCommand::SwitchRole {
                peer: PEER,
                role: LinkRole::Central
            })
        );
    }
}
