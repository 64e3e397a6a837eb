//! Stream machine actions
//!
//! Each action works on one stream slot and may emit lower-layer commands, call into the
//! media layer, notify the application or re-enter the machine for the same stream.

use super::StreamState;
use crate::a2dp::{CodecInfo, SepCounts, SepInfo, SepType};
use crate::callout::{AvEvent, LowerCommand};
use crate::constants::{AVDT_MEDIA_HEADER_LEN, avdt_error, psc};
use crate::event::{
    Blob, ConfigResult, Envelope, EventData, OpenRequest, StopRequest, StreamEvent,
    SwitchResult, SystemEvent,
};
use crate::host::{MULTI_LINK, ONE_LINK, RcDiscoveryTarget};
use crate::registry::{CollisionFlags, DiscoveryDb, QueueTag, RoleFlags, WaitFlags};
use crate::{AvChannel, AvError, Core, Features, Platform};

impl<P: Platform> Core<P> {
    pub(super) fn do_disc(&mut self, index: usize, data: &mut EventData) {
        match data {
            EventData::Open(open) => {
                let open = *open;
                self.open_with(index, open);
            }
            _ => warn!("[SSM] Open without a request"),
        }
    }

    /// Start the SDP search for the peer's endpoint, unless a role switch must settle first
    pub(crate) fn open_with(&mut self, index: usize, open: OpenRequest) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.open_api = Some(open);
        // Role queries below need the peer before the search starts.
        scb.save_peer(open.peer);

        let proceed = match open.switch_res {
            SwitchResult::None => {
                let wait = self.switch_if_needed(index) || !self.link_role_ok(index, MULTI_LINK);
                if let Some(scb) = self.registry.scb_mut(index).filter(|_| wait) {
                    scb.q_tag = QueueTag::Open;
                    scb.wait.insert(WaitFlags::ROLE_SW_RES_OPEN);
                }
                !wait
            }
            SwitchResult::Fail => {
                if let Some(scb) = self.registry.scb_mut(index) {
                    scb.open_status = Some(AvError::RoleSwitch);
                }
                self.ssm_execute(index, StreamEvent::SdpDiscFail, &mut EventData::None);
                false
            }
            SwitchResult::Ok => {
                let ok = self.link_role_ok(index, MULTI_LINK);
                if let Some(scb) = self.registry.scb_mut(index).filter(|_| !ok) {
                    scb.wait.insert(WaitFlags::ROLE_SW_RES_OPEN);
                }
                ok
            }
            SwitchResult::Done => true,
        };
        if !proceed {
            return;
        }

        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.wait.remove(WaitFlags::ROLE_SW_BITS);
        let check_rc = scb.wait.contains(WaitFlags::CHECK_RC);
        scb.wait.remove(WaitFlags::CHECK_RC);
        scb.sec_mask = open.sec_mask;
        scb.use_rc = open.use_rc;
        let tsep = scb.tsep.peer();
        scb.disc_db = Some(DiscoveryDb { tsep });
        let (handle, peer) = (scb.handle, scb.peer);

        if check_rc {
            self.start_stream_timer(index, StreamEvent::AvrcTimer, self.options.rc_discovery_ms);
        }
        self.send(LowerCommand::FindService { handle, peer, tsep });
    }

    pub(super) fn free_sdb(&mut self, index: usize) {
        if let Some(scb) = self.registry.scb_mut(index) {
            scb.disc_db = None;
        }
    }

    pub(super) fn config_ind(&mut self, index: usize, data: &mut EventData) {
        let EventData::ConfigInd(ind) = data else {
            warn!("[SSM] Configuration indication without payload");
            return;
        };
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.avdt_label = ind.label;
        scb.config = core::mem::take(&mut ind.config);
        scb.codec_type = scb.config.codec_type().unwrap_or_default();
        scb.save_peer(ind.peer);
        scb.coll_mask = CollisionFlags::empty();
        self.stop_timer(crate::event::TimerId::AcceptorSignal);

        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        let unsupported = scb.config.psc_mask & !psc::SUPPORTED != 0;
        if scb.config.codec.is_empty() || unsupported {
            debug!("[SSM] Rejecting configuration, psc {=u8:#x}", scb.config.psc_mask);
            let mut reject = EventData::ConfigResult(ConfigResult {
                err_code: avdt_error::UNSUP_CFG,
                ..ConfigResult::default()
            });
            self.ssm_execute(index, StreamEvent::CiSetconfigFail, &mut reject);
            return;
        }

        scb.sep_info.clear();
        scb.sep_info
            .push(SepInfo::new(ind.int_seid, scb.media_type, scb.tsep.peer()))
            .ok();
        scb.role.insert(RoleFlags::ACCEPTOR);
        scb.cur_psc_mask = scb.config.psc_mask;
        scb.use_rc = self.features.contains(Features::RC_TARGET);
        scb.num_seps = 1;
        scb.sep_info_idx = 0;
        self.platform
            .set_config(scb.handle, &scb.peer, ind.int_seid, &scb.config);
    }

    pub(super) fn security_ind(&mut self, index: usize, data: &mut EventData) {
        let EventData::Protect(protect) = data else {
            return;
        };
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.avdt_label = protect.label;
        let handle = scb.handle;
        if self.features.contains(Features::PROTECT) {
            let data = core::mem::take(&mut protect.data);
            self.notify(AvEvent::ProtectRequest { handle, data });
        } else {
            self.send(LowerCommand::SecurityResponse {
                handle,
                label: protect.label,
                err_code: avdt_error::NSC,
                data: Blob::new(),
            });
        }
    }

    pub(super) fn security_cfm(&mut self, index: usize, data: &mut EventData) {
        let EventData::Protect(protect) = data else {
            return;
        };
        let Some(handle) = self.registry.scb(index).map(|scb| scb.handle) else {
            return;
        };
        if self.features.contains(Features::PROTECT) {
            let data = core::mem::take(&mut protect.data);
            self.notify(AvEvent::ProtectResponse {
                handle,
                err_code: protect.err_code,
                data,
            });
        }
    }

    pub(super) fn security_req(&mut self, index: usize, data: &mut EventData) {
        let EventData::Protect(protect) = data else {
            return;
        };
        let Some(handle) = self.registry.scb(index).map(|scb| scb.handle) else {
            return;
        };
        if self.features.contains(Features::PROTECT) {
            let data = core::mem::take(&mut protect.data);
            self.send(LowerCommand::SecurityRequest { handle, data });
        }
    }

    pub(super) fn security_rsp(&mut self, index: usize, data: &mut EventData) {
        let EventData::Protect(protect) = data else {
            return;
        };
        let Some(handle) = self.registry.scb(index).map(|scb| scb.handle) else {
            return;
        };
        let (err_code, data) = if self.features.contains(Features::PROTECT) {
            (protect.err_code, core::mem::take(&mut protect.data))
        } else {
            (avdt_error::NSC, Blob::new())
        };
        self.send(LowerCommand::SecurityResponse {
            handle,
            label: protect.label,
            err_code,
            data,
        });
    }

    pub(super) fn security_rej(&mut self, index: usize, data: &mut EventData) {
        let Some(scb) = self.registry.scb(index) else {
            return;
        };
        let label = match data {
            EventData::Protect(protect) => protect.label,
            _ => scb.avdt_label,
        };
        let handle = scb.handle;
        self.send(LowerCommand::SecurityResponse {
            handle,
            label,
            err_code: avdt_error::BAD_STATE,
            data: Blob::new(),
        });
    }

    pub(super) fn open_at_inc(&mut self, index: usize, data: &mut EventData) {
        let EventData::Open(open) = data else {
            return;
        };
        let open = *open;
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.open_api = Some(open);
        if scb.coll_mask.contains(CollisionFlags::INCOMING_TIMER) {
            // Replayed when the acceptor timer expires, unless the peer configures first.
            scb.coll_mask.insert(CollisionFlags::API_CALLED);
        } else {
            scb.coll_mask = CollisionFlags::empty();
            scb.state = StreamState::Init;
            let handle = scb.handle;
            self.post(Envelope::stream(handle, StreamEvent::ApOpen, EventData::Open(open)));
        }
    }

    pub(super) fn cco_close(&mut self, index: usize) {
        if let Some(handle) = self.registry.scb(index).map(|scb| scb.handle) {
            self.platform.close(handle);
        }
    }

    pub(super) fn disconnect_req(&mut self, index: usize) {
        self.stop_timer(crate::event::TimerId::Signal);
        self.stop_stream_timer(index);
        let Some(scb) = self.registry.scb(index) else {
            return;
        };
        let (handle, peer) = (scb.handle, scb.peer);
        if self.registry.any_link() {
            if let Some((rc_handle, _)) = self.registry.get_rcb_by_stream(handle) {
                self.del_rc(rc_handle);
            }
            self.send(LowerCommand::Disconnect { peer });
        } else {
            self.ssm_execute(index, StreamEvent::AvdtDisconnect, &mut EventData::None);
        }
    }

    pub(super) fn setconfig_rsp(&mut self, index: usize, data: &mut EventData) {
        let EventData::ConfigResult(result) = data else {
            warn!("[SSM] Configuration result without payload");
            return;
        };
        let Some(scb) = self.registry.scb(index) else {
            return;
        };
        let (handle, label) = (scb.handle, scb.avdt_label);
        self.send(LowerCommand::ConfigResponse {
            handle,
            label,
            err_code: result.err_code,
            category: result.category,
        });
        self.stop_timer(crate::event::TimerId::Signal);
        if result.err_code != 0 {
            return;
        }

        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.wait = WaitFlags::ACP_CAPS_ON;
        if result.recfg_needed {
            scb.role.insert(RoleFlags::SUSPEND_OPT);
        }
        let num = result.seids.len() + 1;
        let local_source = scb.tsep == SepType::Source;
        if CodecInfo::new(scb.config.codec.as_slice()).is_sbc() || num > 1 {
            if local_source {
                let counts = SepCounts {
                    sinks: num as u8,
                    sources: 0,
                };
                self.platform.discovery_result(handle, counts);
            }
        } else {
            // Unknown peer with a non-SBC codec: learn every endpoint first.
            self.discover_req(index);
            return;
        }

        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.sep_info.truncate(1);
        for &seid in &result.seids {
            scb.sep_info
                .push(SepInfo::new(seid, scb.media_type, SepType::Sink))
                .ok();
        }
        scb.num_seps = scb.sep_info.len() as u8;
        if local_source {
            self.next_getcap(index);
        }
    }

    pub(super) fn setconfig_rej(&mut self, index: usize, data: &mut EventData) {
        let err_code = match data {
            EventData::ConfigResult(result) if result.err_code != 0 => result.err_code,
            _ => avdt_error::UNSUP_CFG,
        };
        let Some(scb) = self.registry.scb(index) else {
            return;
        };
        let (handle, peer, label) = (scb.handle, scb.peer, scb.avdt_label);
        self.send(LowerCommand::ConfigResponse {
            handle,
            label,
            err_code,
            category: 0,
        });
        self.notify(AvEvent::Reject { handle, peer });
    }

    /// Arm the RC discovery timer once the stream is up, if this stream wants AVRCP
    pub(super) fn st_rc_timer(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if scb.rc_handle.is_some() || !(scb.use_rc || scb.role.contains(RoleFlags::ACCEPTOR)) {
            return;
        }
        if scb.wait.intersects(WaitFlags::ROLE_SW_BITS) {
            scb.wait.insert(WaitFlags::CHECK_RC);
        } else {
            self.start_stream_timer(index, StreamEvent::AvrcTimer, self.options.rc_discovery_ms);
        }
    }

    /// Return the stream to its idle bookkeeping
    pub(crate) fn cleanup(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.pending_cap = None;
        scb.disc_db = None;
        scb.avdt_version = 0;
        scb.open_status = None;
        scb.started = false;
        scb.cong = false;
        scb.role = RoleFlags::empty();
        scb.cur_psc_mask = 0;
        scb.wait = WaitFlags::empty();
        scb.disc_counts = SepCounts::default();
        scb.disc_reason = 0;
        let (handle, deregistering) = (scb.handle, scb.deregistering);

        self.stop_stream_timer(index);
        if deregistering {
            self.post(Envelope::new(SystemEvent::DeregComplete, handle.raw(), EventData::None));
        } else {
            self.conn_chg(index, false);
        }
        self.release_held_starts(index);
    }

    pub(super) fn disc_res_as_acp(&mut self, index: usize, data: &mut EventData) {
        let EventData::Discovery(result) = data else {
            return;
        };
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.sep_info.clear();
        let mut sinks = 0u8;
        for sep in &result.seps {
            if sep.tsep == SepType::Sink && sep.media_type == scb.media_type {
                let mut sep = *sep;
                sep.in_use = false;
                scb.sep_info.push(sep).ok();
                sinks += 1;
            }
        }
        scb.num_seps = scb.sep_info.len() as u8;
        scb.sep_info_idx = 0;
        let handle = scb.handle;
        self.platform
            .discovery_result(handle, SepCounts { sinks, sources: 0 });

        if sinks > 0 {
            self.next_getcap(index);
        } else {
            self.ssm_execute(index, StreamEvent::StrDiscFail, &mut EventData::None);
        }
    }

    pub(super) fn disc_results(&mut self, index: usize, data: &mut EventData) {
        let EventData::Discovery(result) = data else {
            return;
        };
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.sep_info = result.seps.clone();
        scb.num_seps = scb.sep_info.len() as u8;

        let mut counts = SepCounts::default();
        for sep in scb
            .sep_info
            .iter()
            .filter(|sep| !sep.in_use && sep.media_type == scb.media_type)
        {
            match sep.tsep {
                SepType::Sink if scb.tsep == SepType::Source => counts.sinks += 1,
                SepType::Source if scb.tsep == SepType::Sink => counts.sources += 1,
                _ => {}
            }
        }
        scb.disc_counts = counts;
        let handle = scb.handle;
        let any = scb.num_seps > 0;
        self.platform.discovery_result(handle, counts);

        if any {
            if let Some(scb) = self.registry.scb_mut(index) {
                scb.sep_info_idx = 0;
            }
            self.next_getcap(index);
        } else {
            self.ssm_execute(index, StreamEvent::StrDiscFail, &mut EventData::None);
        }
    }

    /// Ask for the capabilities of the next usable remote endpoint
    ///
    /// Returns `false`, after running `STR_GETCAP_FAIL`, when none is left.
    fn next_getcap(&mut self, index: usize) -> bool {
        let Some(scb) = self.registry.scb_mut(index) else {
            return false;
        };
        let wanted = scb.tsep.peer();
        let start = usize::from(scb.sep_info_idx);
        let end = usize::from(scb.num_seps).min(scb.sep_info.len());
        let found = (start..end).find(|&i| {
            let sep = &scb.sep_info[i];
            !sep.in_use && sep.tsep == wanted && sep.media_type == scb.media_type
        });

        match found {
            Some(i) => {
                scb.sep_info_idx = i as u8;
                let (handle, peer, seid) = (scb.handle, scb.peer, scb.sep_info[i].seid);
                self.send(LowerCommand::GetCapabilities { handle, peer, seid });
                true
            }
            None => {
                self.ssm_execute(index, StreamEvent::StrGetcapFail, &mut EventData::None);
                false
            }
        }
    }

    pub(super) fn save_caps(&mut self, index: usize, data: &mut EventData) {
        let EventData::Capabilities(caps) = data else {
            return;
        };
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        let old_wait = scb.wait;
        let handle = scb.handle;
        let seid = scb
            .sep_info
            .get(usize::from(scb.sep_info_idx))
            .map(|sep| sep.seid)
            .unwrap_or_default();
        // The acceptor already has its configuration; the media layer only learns the caps.
        let _ = self.platform.get_config(handle, seid, caps);

        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.sep_info_idx += 1;
        let done = if scb.num_seps > scb.sep_info_idx {
            !self.next_getcap(index)
        } else {
            true
        };

        if let Some(scb) = self.registry.scb_mut(index).filter(|_| done) {
            scb.sep_info_idx = 0;
            scb.wait.remove(WaitFlags::ACP_CAPS);
            if old_wait.contains(WaitFlags::ACP_CAPS_STARTED) {
                self.start_ok(index, SwitchResult::None);
            }
        }
    }

    pub(super) fn getcap_results(&mut self, index: usize, data: &mut EventData) {
        let EventData::Capabilities(caps) = data else {
            return;
        };
        let Some(scb) = self.registry.scb(index) else {
            return;
        };
        let handle = scb.handle;
        let media_type = scb.media_type;
        let seid = scb
            .sep_info
            .get(usize::from(scb.sep_info_idx))
            .map(|sep| sep.seid)
            .unwrap_or_default();

        let info = CodecInfo::new(caps.codec.as_slice());
        let chosen = if info.is_valid() && info.media_type() == Some(media_type) {
            self.platform.get_config(handle, seid, caps)
        } else {
            None
        };

        let Some(mut config) = chosen else {
            debug!("[SSM] Endpoint {} not usable, trying next", seid);
            if let Some(scb) = self.registry.scb_mut(index) {
                scb.sep_info_idx += 1;
            }
            self.next_getcap(index);
            return;
        };

        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        config.psc_mask &= caps.psc_mask;
        scb.cur_psc_mask = config.psc_mask;
        scb.codec_type = config.codec_type().unwrap_or_default();
        scb.config = config.clone();
        if scb.state != StreamState::Reconfiguring {
            scb.pending_cap = None;
        }
        let peer = scb.peer;
        self.send(LowerCommand::Open {
            handle,
            peer,
            seid,
            config,
        });
    }

    pub(super) fn str_opened(&mut self, index: usize, data: &mut EventData) {
        let EventData::Opened(opened) = data else {
            warn!("[SSM] Stream opened without payload");
            return;
        };
        let opened = *opened;
        self.conn_chg(index, true);

        let max_mtu = self.options.max_media_mtu;
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.cong = true;
        scb.avdt_version = opened.avdt_version;
        scb.stream_mtu = opened.peer_mtu.saturating_sub(AVDT_MEDIA_HEADER_LEN);
        let mtu = scb.stream_mtu.min(max_mtu);
        scb.q_tag = QueueTag::None;
        let (handle, peer, codec_type) = (scb.handle, scb.peer, scb.codec_type);
        self.platform.open(handle, codec_type, mtu);

        let starting = self.chk_start(index);
        self.notify(AvEvent::Open {
            handle,
            peer,
            status: Ok(()),
            starting,
            mtu,
        });
        if starting {
            self.ssm_execute(index, StreamEvent::ApStart, &mut EventData::None);
        }
        self.release_held_starts(index);
    }

    /// Whether another audio stream is already streaming, so this one should follow
    fn chk_start(&self, index: usize) -> bool {
        let Some(scb) = self.registry.scb(index) else {
            return false;
        };
        if scb.channel != AvChannel::Audio
            || self.audio_open_cnt < 2
            || (scb.role.contains(RoleFlags::ACCEPTOR)
                && !scb.role.contains(RoleFlags::SUSPEND_OPT))
        {
            return false;
        }
        self.registry.scbs().any(|other| {
            other.index() != index && other.channel == AvChannel::Audio && other.co_started
        })
    }

    /// Re-run held starts of companions now that `index` settled
    fn release_held_starts(&mut self, index: usize) {
        let Some(channel) = self.registry.scb(index).map(|scb| scb.channel) else {
            return;
        };
        let mut held = heapless::Vec::<_, { crate::constants::MAX_STREAMS }>::new();
        for scb in self.registry.scbs_mut() {
            if scb.index() != index && scb.start_held && scb.channel == channel {
                scb.start_held = false;
                held.push(scb.handle).ok();
            }
        }
        for handle in held {
            debug!("[SSM] Releasing held start of stream {}", handle.raw());
            self.post(Envelope::stream(handle, StreamEvent::ApStart, EventData::None));
        }
    }

    pub(super) fn delay_co(&mut self, index: usize, data: &mut EventData) {
        let EventData::Delay(delay) = data else {
            return;
        };
        if let Some(handle) = self.registry.scb(index).map(|scb| scb.handle) {
            self.platform.delay(handle, *delay);
        }
    }

    pub(super) fn do_close(&mut self, index: usize) {
        if self.registry.scb(index).is_some_and(|scb| scb.co_started) {
            self.str_stopped(index, None);
        }
        self.stop_timer(crate::event::TimerId::Signal);
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.started = false;
        let handle = scb.handle;
        self.send(LowerCommand::Close { handle });
        // Torn down by force if the peer never confirms.
        self.start_stream_timer(index, StreamEvent::ApClose, self.options.close_request_ms);
    }

    pub(super) fn connect_req(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.disc_db = None;
        if scb.coll_mask.contains(CollisionFlags::INCOMING_TIMER) {
            // The peer connected while we searched; wait for its configuration.
            return;
        }
        let (handle, peer, sec_mask) = (scb.handle, scb.peer, scb.sec_mask);
        self.send(LowerCommand::Connect {
            handle,
            peer,
            sec_mask,
        });
    }

    pub(super) fn open_fail_sdp(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        let status = scb.open_status.take().unwrap_or(AvError::Sdp);
        let (handle, peer) = (scb.handle, scb.peer);
        self.notify(AvEvent::Open {
            handle,
            peer,
            status: Err(status),
            starting: false,
            mtu: 0,
        });
    }

    pub(super) fn open_failed(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.open_status = Some(AvError::Stream);
        let (handle, peer) = (scb.handle, scb.peer);
        self.platform.close(handle);

        let already_open = self.registry.scbs().any(|other| {
            other.index() != index && other.state == StreamState::Open && other.peer == peer
        });
        if already_open {
            // Keep the link; only this stream gives up.
            let starting = self.chk_start(index);
            if let Some(scb) = self.registry.scb_mut(index) {
                scb.state = StreamState::Init;
                scb.open_status = None;
                scb.disc_db = None;
                scb.wait = WaitFlags::empty();
                scb.role = RoleFlags::empty();
            }
            self.notify(AvEvent::Open {
                handle,
                peer,
                status: Err(AvError::GetCapabilities),
                starting,
                mtu: 0,
            });
        } else {
            self.send(LowerCommand::Disconnect { peer });
        }
    }

    pub(super) fn sdp_failed(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if scb.open_status.is_none() {
            scb.open_status = Some(AvError::Sdp);
        }
        scb.disc_db = None;
        self.str_closed(index);
    }

    pub(super) fn switch_role(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if scb.wait.contains(WaitFlags::ROLE_SW_RES_START) {
            scb.wait.insert(WaitFlags::ROLE_SW_RETRY);
        }
        scb.wait.remove(WaitFlags::ROLE_SW_RES);

        let switch_res = if scb.q_tag == QueueTag::Open {
            if self.switch_if_needed(index) || !self.link_role_ok(index, MULTI_LINK) {
                if let Some(scb) = self.registry.scb_mut(index) {
                    scb.wait.insert(WaitFlags::ROLE_SW_RES_OPEN);
                }
                SwitchResult::None
            } else {
                SwitchResult::Done
            }
        } else {
            SwitchResult::Fail
        };
        if switch_res == SwitchResult::None {
            return;
        }

        if self.rs_idx == index as u8 + 1 {
            self.rs_idx = 0;
        }
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.wait.remove(WaitFlags::ROLE_SW_RETRY);
        scb.q_tag = QueueTag::None;
        let Some(mut open) = scb.open_api else {
            warn!("[SSM] Role switch settled without a queued open");
            return;
        };
        open.switch_res = switch_res;
        self.open_with(index, open);
    }

    pub(super) fn role_res(&mut self, index: usize, data: &mut EventData) {
        let status = match data {
            EventData::Role(change) => change.status,
            _ => 0,
        };
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        let initiator = scb.role.contains(RoleFlags::START_INT);
        let (handle, peer) = (scb.handle, scb.peer);

        match scb.q_tag {
            QueueTag::Start => {
                if scb.wait.contains(WaitFlags::ROLE_SW_STARTED) {
                    scb.wait.remove(WaitFlags::ROLE_SW_BITS);
                    if status == 0 {
                        self.start_ok(index, SwitchResult::Ok);
                    } else {
                        scb.role.remove(RoleFlags::START_INT);
                        self.notify(AvEvent::Start {
                            handle,
                            status: Err(AvError::RoleSwitch),
                            initiator,
                            suspending: false,
                        });
                    }
                } else if scb.wait.contains(WaitFlags::ROLE_SW_RES_START) {
                    scb.wait.insert(WaitFlags::ROLE_SW_FAILED);
                }
            }
            QueueTag::Open => {
                if !scb.wait.contains(WaitFlags::ROLE_SW_RES_OPEN) {
                    warn!("[SSM] Unexpected role change for stream {}", handle.raw());
                    return;
                }
                scb.role.remove(RoleFlags::START_INT);
                scb.wait.remove(WaitFlags::ROLE_SW_BITS);
                if status == 0 {
                    if let Some(mut open) = scb.open_api {
                        open.switch_res = SwitchResult::Done;
                        self.open_with(index, open);
                    }
                } else {
                    self.notify(AvEvent::Open {
                        handle,
                        peer,
                        status: Err(AvError::RoleSwitch),
                        starting: false,
                        mtu: 0,
                    });
                }
            }
            QueueTag::None => {}
        }
    }

    pub(crate) fn discover_req(&mut self, index: usize) {
        if let Some((handle, peer)) = self.registry.scb(index).map(|scb| (scb.handle, scb.peer)) {
            self.send(LowerCommand::Discover { handle, peer });
        }
    }

    pub(super) fn conn_failed(&mut self, index: usize) {
        if let Some(scb) = self.registry.scb_mut(index) {
            scb.open_status = Some(AvError::Stream);
        }
        self.str_closed(index);
    }

    pub(super) fn do_start(&mut self, index: usize) {
        let Some(scb) = self.registry.scb(index) else {
            return;
        };
        let (handle, channel) = (scb.handle, scb.channel);

        let companion = self
            .registry
            .scbs()
            .find(|other| {
                other.index() != index
                    && other.channel == channel
                    && matches!(
                        other.state,
                        StreamState::Opening | StreamState::Incoming | StreamState::Reconfiguring
                    )
            })
            .map(|other| other.handle);
        if let Some(companion) =
            companion.filter(|&companion| !self.platform.can_start(handle, companion))
        {
            debug!(
                "[SSM] Start of stream {} held for {}",
                handle.raw(),
                companion.raw()
            );
            if let Some(scb) = self.registry.scb_mut(index) {
                scb.start_held = true;
            }
            return;
        }

        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if !scb.started && !scb.role.contains(RoleFlags::START_INT) {
            scb.role.insert(RoleFlags::START_INT);
            self.send(LowerCommand::Start { handle });
        } else if scb.started {
            scb.role.insert(RoleFlags::START_INT);
            if scb.wait.is_empty() {
                if scb.role.contains(RoleFlags::SUSPEND) {
                    self.notify_start_failed(index);
                } else {
                    self.start_ok(index, SwitchResult::None);
                }
            }
        }
    }

    fn notify_start_failed(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.role.remove(RoleFlags::START_INT);
        let handle = scb.handle;
        self.notify(AvEvent::Start {
            handle,
            status: Err(AvError::Fail),
            initiator: true,
            suspending: false,
        });
    }

    /// The stream started, or a deferred start may now proceed
    ///
    /// `switch` carries the outcome of a role switch the start was waiting for.
    pub(crate) fn start_ok(&mut self, index: usize, switch: SwitchResult) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.started = true;
        let initiator = scb.role.contains(RoleFlags::START_INT);
        let handle = scb.handle;
        if scb.tsep == SepType::Sink {
            scb.wait.remove(WaitFlags::ACP_CAPS_ON);
        }

        let switch = if scb.wait.contains(WaitFlags::ROLE_SW_FAILED) {
            scb.wait.remove(WaitFlags::ROLE_SW_FAILED);
            SwitchResult::Fail
        } else {
            switch
        };
        if switch != SwitchResult::None {
            scb.wait.remove(WaitFlags::ROLE_SW_BITS);
            if switch == SwitchResult::Fail {
                self.notify(AvEvent::Start {
                    handle,
                    status: Err(AvError::RoleSwitch),
                    initiator,
                    suspending: false,
                });
                return;
            }
        }

        let role_ok = self.link_role_ok(index, ONE_LINK);
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if role_ok {
            scb.wait.remove(WaitFlags::ROLE_SW_BITS);
        } else {
            scb.q_tag = QueueTag::Start;
        }
        if scb.wait.intersects(WaitFlags::ROLE_SW_RES) {
            scb.wait.insert(WaitFlags::ROLE_SW_STARTED);
            scb.q_tag = QueueTag::Start;
        }
        if !scb.wait.is_empty() {
            scb.wait.remove(WaitFlags::ACP_CAPS_ON);
        }
        scb.cong = false;

        let mut suspend = false;
        if scb.role.contains(RoleFlags::START_INT) {
            scb.role.remove(RoleFlags::START_INT);
        } else if scb.role.contains(RoleFlags::ACCEPTOR | RoleFlags::SUSPEND_OPT) {
            suspend = true;
        }
        if !suspend {
            self.stream_chg(index, true);
        }

        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.role.remove(RoleFlags::ACCEPTOR | RoleFlags::SUSPEND_OPT);
        self.platform.start(handle, &scb.config);
        scb.co_started = true;
        self.notify(AvEvent::Start {
            handle,
            status: Ok(()),
            initiator,
            suspending: suspend,
        });

        if let Some(scb) = self.registry.scb_mut(index).filter(|_| suspend) {
            scb.role.insert(RoleFlags::SUSPEND);
            // No media until the reconfiguration that follows.
            scb.cong = true;
            scb.co_started = false;
            self.platform.stop(handle);
            let mut stop = EventData::Stop(StopRequest {
                suspend: true,
                flush: false,
            });
            self.ssm_execute(index, StreamEvent::ApStop, &mut stop);
        }
    }

    pub(super) fn start_failed(&mut self, index: usize) {
        if self
            .registry
            .scb(index)
            .is_some_and(|scb| !scb.started && !scb.co_started)
        {
            self.notify_start_failed(index);
        }
    }

    /// Stop the media path and, if asked, suspend the stream
    pub(crate) fn str_stopped(&mut self, index: usize, stop: Option<StopRequest>) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        let handle = scb.handle;
        if scb.co_started {
            scb.co_started = false;
            self.platform.stop(handle);
            self.stream_chg(index, false);
        }

        let Some(scb) = self.registry.scb(index) else {
            return;
        };
        let reconfiguring = scb.state == StreamState::Reconfiguring;
        match stop {
            Some(stop) if stop.suspend => {
                if scb.started && scb.suspend_sup {
                    self.send(LowerCommand::Suspend { handle });
                } else if !reconfiguring {
                    self.notify(AvEvent::Suspend {
                        handle,
                        status: Ok(()),
                        initiator: true,
                    });
                }
            }
            _ => {
                if !reconfiguring {
                    self.notify(AvEvent::Stop {
                        handle,
                        suspend: false,
                    });
                }
            }
        }
    }

    /// Report the stream closed, or the open that failed, and reset it
    pub(crate) fn str_closed(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        let (handle, peer) = (scb.handle, scb.peer);
        if let Some(status) = scb.open_status.take() {
            self.cleanup(index);
            self.notify(AvEvent::Open {
                handle,
                peer,
                status: Err(status),
                starting: false,
                mtu: 0,
            });
        } else {
            if scb.co_started {
                self.str_stopped(index, None);
            }
            self.platform.close(handle);
            self.cleanup(index);
            self.notify(AvEvent::Close { handle, peer });
        }
    }

    pub(super) fn suspend_cfm(&mut self, index: usize, data: &mut EventData) {
        let result = match data {
            EventData::Signal(result) => *result,
            _ => crate::event::SignalResult::ok(),
        };
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if !scb.started {
            // Crossed suspends: the peer's already took effect.
            return;
        }
        let handle = scb.handle;
        let mut status = Ok(());
        if result.err_code != 0 && result.err_code != avdt_error::BAD_STATE {
            if result.err_code != avdt_error::TIMEOUT {
                scb.suspend_sup = false;
            }
            status = Err(AvError::Fail);
            self.ssm_execute(index, StreamEvent::ApClose, &mut EventData::None);
        } else {
            scb.started = false;
        }

        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if scb.role.contains(RoleFlags::SUSPEND) {
            scb.role.remove(RoleFlags::SUSPEND);
            scb.cong = false;
        }
        if scb.co_started {
            scb.co_started = false;
            self.platform.stop(handle);
            self.stream_chg(index, false);
        }
        self.notify(AvEvent::Suspend {
            handle,
            status,
            initiator: result.initiator,
        });
    }

    pub(super) fn reconfig(&mut self, index: usize, data: &mut EventData) {
        let EventData::Reconfig(request) = data else {
            warn!("[SSM] Reconfigure without a request");
            return;
        };
        self.stop_stream_timer(index);
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.num_recfg = 0;
        let mut pending = core::mem::take(&mut request.config);
        pending.psc_mask = scb.cur_psc_mask;
        scb.pending_cap = Some(pending);
        scb.rcfg_idx = request.sep_info_idx;
        let handle = scb.handle;

        if scb.rcfg_idx == scb.sep_info_idx && request.suspend && scb.recfg_sup && scb.suspend_sup {
            if scb.started {
                self.str_stopped(
                    index,
                    Some(StopRequest {
                        suspend: true,
                        flush: false,
                    }),
                );
            } else if let Some(config) = scb.pending_cap.clone() {
                self.send(LowerCommand::Reconfigure { handle, config });
            }
        } else {
            // Different endpoint or no in-place support: rebuild the transport.
            if scb.started {
                self.str_stopped(index, None);
            }
            if let Some(scb) = self.registry.scb_mut(index) {
                scb.started = false;
            }
            self.send(LowerCommand::Close { handle });
        }
    }

    pub(super) fn rcfg_str_ok(&mut self, index: usize) {
        self.st_rc_timer(index);
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.pending_cap = None;
        scb.role
            .remove(RoleFlags::ACCEPTOR | RoleFlags::SUSPEND_OPT | RoleFlags::START_INT);
        let handle = scb.handle;
        self.notify(AvEvent::Reconfig {
            handle,
            status: Ok(()),
        });
    }

    fn notify_reconfig_failed(&mut self, index: usize) {
        if let Some(handle) = self.registry.scb(index).map(|scb| scb.handle) {
            self.notify(AvEvent::Reconfig {
                handle,
                status: Err(AvError::Fail),
            });
        }
    }

    pub(super) fn rcfg_failed(&mut self, index: usize) {
        let retries = self.options.reconfig_retries;
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if scb.num_recfg > retries {
            let handle = scb.handle;
            self.platform.close(handle);
            self.notify_reconfig_failed(index);
            self.ssm_execute(index, StreamEvent::ApClose, &mut EventData::None);
        } else {
            scb.num_recfg += 1;
            let peer = scb.peer;
            if self.registry.any_link() {
                self.send(LowerCommand::Disconnect { peer });
            } else {
                self.connect_req(index);
            }
        }
    }

    pub(super) fn rcfg_connect(&mut self, index: usize) {
        let retries = self.options.reconfig_retries;
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.cong = false;
        scb.num_recfg += 1;
        if scb.num_recfg > retries {
            self.rcfg_failed(index);
        } else {
            let (handle, peer, sec_mask) = (scb.handle, scb.peer, scb.sec_mask);
            self.send(LowerCommand::Connect {
                handle,
                peer,
                sec_mask,
            });
        }
    }

    pub(super) fn rcfg_discntd(&mut self, index: usize) {
        let retries = self.options.reconfig_retries;
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.num_recfg += 1;
        if scb.num_recfg > retries {
            self.notify_reconfig_failed(index);
            self.ssm_execute(index, StreamEvent::StrDiscFail, &mut EventData::None);
        } else {
            let (handle, peer, sec_mask) = (scb.handle, scb.peer, scb.sec_mask);
            self.send(LowerCommand::Connect {
                handle,
                peer,
                sec_mask,
            });
        }
    }

    pub(super) fn suspend_cont(&mut self, index: usize, data: &mut EventData) {
        let err_code = match data {
            EventData::Signal(result) => result.err_code,
            _ => 0,
        };
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.started = false;
        scb.cong = false;
        let handle = scb.handle;
        match err_code {
            0 => {
                if let Some(config) = scb.pending_cap.clone() {
                    self.send(LowerCommand::Reconfigure { handle, config });
                }
            }
            avdt_error::CONNECT => {
                self.notify_reconfig_failed(index);
                self.ssm_execute(index, StreamEvent::StrDiscFail, &mut EventData::None);
            }
            err_code => {
                if err_code != avdt_error::TIMEOUT {
                    scb.suspend_sup = false;
                }
                self.send(LowerCommand::Close { handle });
            }
        }
    }

    pub(super) fn rcfg_cfm(&mut self, index: usize, data: &mut EventData) {
        let err_code = match data {
            EventData::Signal(result) => result.err_code,
            _ => 0,
        };
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if err_code != 0 {
            if err_code != avdt_error::TIMEOUT {
                scb.recfg_sup = false;
            }
            let handle = scb.handle;
            self.send(LowerCommand::Close { handle });
        } else {
            if let Some(pending) = scb.pending_cap.clone() {
                scb.codec_type = pending.codec_type().unwrap_or(scb.codec_type);
                scb.config = pending;
            }
            self.ssm_execute(index, StreamEvent::StrOpenOk, &mut EventData::None);
        }
    }

    pub(super) fn rcfg_open(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        let handle = scb.handle;
        if scb.disc_counts == SepCounts::default() {
            // Nothing known about the peer's endpoints yet.
            self.platform.stop(handle);
            self.discover_req(index);
            return;
        }
        let Some(pending) = scb.pending_cap.clone() else {
            warn!("[SSM] Re-open without a pending configuration");
            return;
        };
        scb.codec_type = pending.codec_type().unwrap_or(scb.codec_type);
        scb.config = pending.clone();
        scb.sep_info_idx = scb.rcfg_idx;
        let seid = scb
            .sep_info
            .get(usize::from(scb.rcfg_idx))
            .map(|sep| sep.seid)
            .unwrap_or_default();
        let peer = scb.peer;
        self.send(LowerCommand::Open {
            handle,
            peer,
            seid,
            config: pending,
        });
    }

    pub(super) fn set_use_rc(&mut self, index: usize) {
        if let Some(scb) = self.registry.scb_mut(index) {
            scb.use_rc = true;
        }
    }

    pub(super) fn open_rc(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        let handle = scb.handle;

        if scb.wait.intersects(WaitFlags::ROLE_SW_BITS) && scb.q_tag == QueueTag::Start {
            // The role switch the start waited for never reported back.
            if self.link_role_ok(index, ONE_LINK) {
                self.rs_idx = 0;
                self.start_ok(index, SwitchResult::Ok);
            } else {
                self.stop_stream_timer(index);
                if let Some(scb) = self.registry.scb_mut(index) {
                    scb.wait.remove(WaitFlags::ROLE_SW_BITS);
                }
                self.rs_idx = 0;
                self.notify(AvEvent::Start {
                    handle,
                    status: Err(AvError::RoleSwitch),
                    initiator: true,
                    suspending: false,
                });
            }
            return;
        }

        if scb.use_rc || scb.role.contains(RoleFlags::ACCEPTOR) {
            if self.rc_disc_pending.is_some() {
                if scb.rc_handle.is_none() {
                    if scb.wait.intersects(WaitFlags::ROLE_SW_BITS) {
                        scb.wait.insert(WaitFlags::CHECK_RC);
                    } else {
                        self.start_stream_timer(
                            index,
                            StreamEvent::AvrcTimer,
                            self.options.rc_discovery_ms,
                        );
                    }
                }
            } else {
                self.rc_disc(RcDiscoveryTarget::Stream(index));
            }
        } else if let Some(rc_handle) = scb.rc_handle {
            // The open asked for no AVRCP; drop the one the peer brought up.
            self.send(LowerCommand::RcClose { rc_handle });
        }
    }

    pub(super) fn chk_2nd_start(&mut self, index: usize) {
        let Some(scb) = self.registry.scb(index) else {
            return;
        };
        if scb.channel != AvChannel::Audio
            || self.audio_open_cnt < 2
            || scb.role.contains(RoleFlags::SUSPEND_OPT)
            || scb.started
        {
            return;
        }
        let other_started = self.registry.scbs().any(|other| {
            other.index() != index && other.channel == AvChannel::Audio && other.co_started
        });
        if other_started {
            self.link_role_ok(index, ONE_LINK);
            self.ssm_execute(index, StreamEvent::ApStart, &mut EventData::None);
        }
    }

    pub(super) fn data_path(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if scb.cong {
            return;
        }
        let handle = scb.handle;
        if let Some(packet) = self.platform.next_packet(handle) {
            scb.cong = true;
            self.send(LowerCommand::Write {
                handle,
                packet: packet.data,
                timestamp: packet.timestamp,
            });
        }
    }

    pub(super) fn clr_cong(&mut self, index: usize) {
        if let Some(scb) = self.registry.scb_mut(index).filter(|scb| scb.co_started) {
            scb.cong = false;
        }
    }

    pub(super) fn set_delay_value(&mut self, index: usize, data: &mut EventData) {
        let EventData::Delay(delay) = data else {
            return;
        };
        let delay = *delay;
        let Some(scb) = self.registry.scb(index) else {
            return;
        };
        let handle = scb.handle;
        let seid = scb
            .sep_info
            .get(usize::from(scb.sep_info_idx))
            .map(|sep| sep.seid)
            .unwrap_or_default();
        self.send(LowerCommand::DelayReport {
            handle,
            seid,
            delay,
        });
        self.notify(AvEvent::SetDelayValue {
            handle,
            delay,
            status: Ok(()),
        });
    }
}
