//! Remote-control (AVRCP) handlers
//!
//! RC channels live in the RCB pool. A channel is either opened by this side for a stream
//! (initiator) or a listener waiting for the peer (acceptor). Listeners are tied to a link
//! index; the spare index [`RC_ACCEPTOR_LINK`] holds the one listener not bound to any
//! AVDTP link yet, for peers that connect AVRCP before (or without) streaming.

use crate::callout::{AvEvent, LowerCommand};
use crate::constants::{RC_ACCEPTOR_LINK, RC_HANDLE_NONE, avrc};
use crate::event::{
    EventData, RcCommand, RcConnection, RcDiscovery, RcEvent, RcMessage, RcOpcode, VendorMessage,
};
use crate::host::RcDiscoveryTarget;
use crate::registry::{LcbMode, RcStatus};
use crate::{Core, Features, Platform};

/// Which side opens an RC channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub(crate) enum RcRole {
    /// This side connects to the peer
    Initiator,
    /// Listen for the peer
    Acceptor,
}

impl<P: Platform> Core<P> {
    pub(crate) fn handle_rc(&mut self, event: RcEvent, rc_handle: u8, data: &mut EventData) {
        if let Some(event) = event.cover_art() {
            self.ca_execute(rc_handle, event, data);
            return;
        }
        match (event, data) {
            (RcEvent::ApiRemoteCmd, EventData::RcCommand(command)) => {
                let command = *command;
                self.rc_remote_cmd(rc_handle, command);
            }
            (RcEvent::ApiVendorCmd, EventData::Vendor(message)) => {
                let message = core::mem::take(message);
                self.rc_vendor_cmd(rc_handle, message);
            }
            (RcEvent::ApiVendorRsp, EventData::Vendor(message)) => {
                let message = core::mem::take(message);
                self.rc_vendor_rsp(rc_handle, message);
            }
            (RcEvent::ApiMetaRsp, EventData::Vendor(message)) => {
                let message = core::mem::take(message);
                self.rc_meta_rsp(rc_handle, message);
            }
            (RcEvent::ApiClose, _) => self.rc_close(rc_handle),
            (RcEvent::Opened, EventData::RcConnection(connection)) => {
                let connection = *connection;
                self.rc_opened(rc_handle, connection);
            }
            (RcEvent::Closed, EventData::RcConnection(connection)) => {
                let connection = *connection;
                self.rc_closed(rc_handle, connection);
            }
            (RcEvent::Message, EventData::RcMessage(message)) => {
                let message = core::mem::take(message);
                self.rc_msg(rc_handle, message);
            }
            (RcEvent::DiscoveryDone, EventData::RcDiscovery(discovery)) => {
                let discovery = *discovery;
                self.rc_disc_done(discovery);
            }
            (event, _) => warn!("[RC] {:?} with unexpected payload", event),
        }
    }

    /// Open an RC channel, or start listening for one
    pub(crate) fn rc_create(&mut self, role: RcRole, shdl: u8, lidx: u8) -> Option<u8> {
        if role == RcRole::Acceptor {
            let existing = self.registry.rc_handles().find(|&rc_handle| {
                self.registry.rcb(rc_handle).is_some_and(|rcb| {
                    rcb.status.contains(RcStatus::ACCEPTOR)
                        && !rcb.is_connected()
                        && rcb.shdl == shdl
                        && rcb.lidx == lidx
                })
            });
            if existing.is_some() {
                return existing;
            }
        }

        let Some(rc_handle) = self.registry.allocate_rcb() else {
            warn!("[RC] No free RC block");
            return None;
        };
        if let Some(rcb) = self.registry.rcb_mut(rc_handle) {
            rcb.status = match role {
                RcRole::Acceptor => RcStatus::ACCEPTOR,
                RcRole::Initiator => RcStatus::empty(),
            };
            rcb.shdl = shdl;
            rcb.lidx = lidx;
        }
        if lidx == RC_ACCEPTOR_LINK {
            self.rc_acp_handle = Some(rc_handle);
        }

        let peer = match role {
            RcRole::Initiator => usize::from(shdl)
                .checked_sub(1)
                .and_then(|index| self.registry.scb(index))
                .map(|scb| scb.peer),
            RcRole::Acceptor => None,
        };
        debug!("[RC] Create {:?} handle {} (stream {}, link {})", role, rc_handle, shdl, lidx);
        self.send(LowerCommand::RcOpen { rc_handle, peer });
        Some(rc_handle)
    }

    /// Close an RC channel and detach it from its stream
    pub(crate) fn del_rc(&mut self, rc_handle: u8) {
        let Some(rcb) = self.registry.rcb_mut(rc_handle) else {
            return;
        };
        let shdl = rcb.shdl;
        // A connected acceptor stays until the peer's close arrives.
        let keep = rcb.is_connected() && rcb.status.contains(RcStatus::ACCEPTOR);
        if !keep {
            rcb.clear();
        }
        if let Some(index) = usize::from(shdl).checked_sub(1) {
            if let Some(scb) = self
                .registry
                .scb_mut(index)
                .filter(|scb| scb.rc_handle == Some(rc_handle))
            {
                scb.rc_handle = None;
            }
            self.stop_stream_timer(index);
        }

        debug!("[RC] Delete handle {}", rc_handle);
        self.send(LowerCommand::RcClose { rc_handle });
        if self.rc_acp_handle == Some(rc_handle) {
            self.rc_acp_handle = None;
        }
    }

    /// Close the RC channels tied to streams, or every one while disabling
    pub(crate) fn close_all_rc(&mut self) {
        let handles: heapless::Vec<u8, { crate::constants::NUM_RCBS }> =
            self.registry.rc_handles().collect();
        for rc_handle in handles {
            let tied = self.registry.rcb(rc_handle).is_some_and(|rcb| rcb.shdl != 0);
            if self.disabling || tied {
                self.del_rc(rc_handle);
            }
        }
    }

    fn rc_opened(&mut self, rc_handle: u8, connection: RcConnection) {
        let peer = connection.peer;
        let stream = self
            .registry
            .scbs()
            .find(|scb| scb.is_bound_to(&peer))
            .map(crate::registry::Scb::index);

        let mut shdl = 0;
        let mut disc = None;
        if let Some(index) = stream {
            if let Some(scb) = self.registry.scb_mut(index) {
                scb.rc_handle = Some(rc_handle);
            }
            self.stop_stream_timer(index);
            shdl = index as u8 + 1;
            disc = Some(RcDiscoveryTarget::Stream(index));
        }

        let Some(rcb) = self.registry.rcb(rc_handle) else {
            warn!("[RC] Open on unknown handle {}", rc_handle);
            return;
        };
        if rcb.lidx == RC_ACCEPTOR_LINK && shdl != 0 {
            // The spare listener took a peer that streams: swap places with the stream's own.
            let own = self.registry.rc_handles().find(|&other| {
                other != rc_handle && self.registry.rcb(other).is_some_and(|rcb| rcb.shdl == shdl)
            });
            if let Some(own) = own {
                let own_lidx = self.registry.rcb(own).map(|rcb| rcb.lidx).unwrap_or_default();
                if let Some(other) = self.registry.rcb_mut(own) {
                    other.lidx = RC_ACCEPTOR_LINK;
                    other.shdl = 0;
                }
                if let Some(rcb) = self.registry.rcb_mut(rc_handle) {
                    rcb.lidx = own_lidx;
                }
                self.rc_acp_handle = Some(own);
            }
        }

        let Some(rcb) = self.registry.rcb_mut(rc_handle) else {
            return;
        };
        rcb.shdl = shdl;
        rcb.status.insert(RcStatus::CONNECTED);
        let mut peer_features = rcb.peer_features;

        if shdl == 0 {
            let rc_only = self.registry.rc_only_lcb();
            if rc_only.lidx == 0 {
                rc_only.in_use = true;
                rc_only.peer = peer;
                rc_only.lidx = RC_ACCEPTOR_LINK;
                rc_only.conn_mask = 1;
                if let Some(rcb) = self.registry.rcb_mut(rc_handle) {
                    rcb.lidx = RC_ACCEPTOR_LINK;
                }
                disc = Some(RcDiscoveryTarget::Rc(rc_handle));
            }
        }

        if peer_features.is_empty() {
            // Assume a plain controller until discovery tells otherwise.
            peer_features = Features::RC_CONTROLLER;
            if let Some(target) = disc {
                self.rc_disc(target);
            }
        }
        info!("[RC] Handle {} open to {} (stream {})", rc_handle, peer, shdl);
        self.notify(AvEvent::RcOpen {
            rc_handle,
            peer,
            status: Ok(()),
            peer_features,
        });
    }

    fn rc_closed(&mut self, rc_handle: u8, connection: RcConnection) {
        let mut peer = connection.peer;
        if self.registry.rcb(rc_handle).is_some() {
            self.ca_reset(rc_handle);
        }
        if let Some(rcb) = self.registry.rcb_mut(rc_handle) {
            rcb.status.remove(RcStatus::CONNECTED);
            rcb.peer_features = Features::empty();
            rcb.ct_features = 0;
            rcb.tg_features = 0;
            let (shdl, lidx) = (rcb.shdl, rcb.lidx);
            let acceptor = rcb.status.contains(RcStatus::ACCEPTOR);
            rcb.shdl = 0;
            rcb.lidx = 0;

            if let Some(index) = usize::from(shdl).checked_sub(1) {
                if let Some(scb) = self.registry.scb_mut(index) {
                    if !scb.peer.is_zero() {
                        peer = scb.peer;
                    }
                    if scb.rc_handle == Some(rc_handle) {
                        scb.rc_handle = None;
                    }
                }
            } else if lidx == RC_ACCEPTOR_LINK {
                self.registry.rc_only_lcb().clear();
            }

            if acceptor {
                self.del_rc(rc_handle);
                if self.rc_acp_handle.is_none() && self.features.contains(Features::RC_TARGET) {
                    self.rc_create(RcRole::Acceptor, 0, RC_ACCEPTOR_LINK);
                }
            } else if let Some(rcb) = self.registry.rcb_mut(rc_handle) {
                rcb.clear();
            }
        }
        info!("[RC] Handle {} closed", rc_handle);
        self.notify(AvEvent::RcClose { rc_handle, peer });
    }

    /// Start looking up the peer's AVRCP service; one lookup at a time
    pub(crate) fn rc_disc(&mut self, target: RcDiscoveryTarget) {
        if self.rc_disc_pending.is_some() {
            return;
        }
        let peer = match target {
            RcDiscoveryTarget::Rc(rc_handle) => {
                let lidx = self.registry.rcb(rc_handle).map(|rcb| rcb.lidx);
                lidx.and_then(|lidx| self.registry.lcb_by_lidx(lidx))
                    .filter(|lcb| lcb.in_use)
                    .map(|lcb| lcb.peer)
            }
            RcDiscoveryTarget::Stream(index) => self.registry.scb(index).map(|scb| scb.peer),
        };
        let Some(peer) = peer.filter(|peer| !peer.is_zero()) else {
            return;
        };
        debug!("[RC] Discover AVRCP on {}", peer);
        self.rc_disc_pending = Some(target);
        self.send(LowerCommand::FindRcService { peer });
    }

    fn rc_disc_done(&mut self, discovery: RcDiscovery) {
        let Some(target) = self.rc_disc_pending.take() else {
            debug!("[RC] Unsolicited discovery result");
            return;
        };
        let (stream, rc_handle) = match target {
            RcDiscoveryTarget::Rc(rc_handle) => (None, Some(rc_handle)),
            RcDiscoveryTarget::Stream(index) => match self.registry.scb(index) {
                Some(scb) => (Some(index), scb.rc_handle),
                None => return,
            },
        };
        let features = discovery.peer_features;

        if let Some(rc_handle) = rc_handle {
            let Some(rcb) = self.registry.rcb_mut(rc_handle) else {
                return;
            };
            rcb.peer_features = features;
            rcb.ct_features = discovery.ct_features;
            rcb.tg_features = discovery.tg_features;
            rcb.cover_art.psm = discovery.cover_art_psm;
            self.notify(AvEvent::RcFeatures {
                rc_handle,
                peer: discovery.peer,
                peer_features: features,
            });
            return;
        }

        let Some(index) = stream else {
            return;
        };
        let ours = self.features;
        let usable = (ours.contains(Features::RC_CONTROLLER)
            && features.contains(Features::RC_TARGET))
            || (ours.contains(Features::RC_TARGET) && features.contains(Features::RC_CONTROLLER));
        if usable {
            let peer = self.registry.scb(index).map(|scb| scb.peer).unwrap_or_default();
            let lidx = self
                .registry
                .find_lcb(&peer, LcbMode::Find)
                .map(|lcb| lcb.lidx)
                .unwrap_or_default();
            if let Some(rc_handle) = self.rc_create(RcRole::Initiator, index as u8 + 1, lidx) {
                if let Some(rcb) = self.registry.rcb_mut(rc_handle) {
                    rcb.peer_features = features;
                    rcb.ct_features = discovery.ct_features;
                    rcb.tg_features = discovery.tg_features;
                    rcb.cover_art.psm = discovery.cover_art_psm;
                }
            }
            return;
        }

        let Some(scb) = self.registry.scb_mut(index).filter(|scb| scb.use_rc) else {
            return;
        };
        scb.use_rc = false;
        let peer = scb.peer;
        self.notify(AvEvent::RcOpen {
            rc_handle: RC_HANDLE_NONE,
            peer,
            status: Err(crate::AvError::Sdp),
            peer_features: Features::empty(),
        });
    }

    fn rc_remote_cmd(&mut self, rc_handle: u8, command: RcCommand) {
        let connected = self
            .registry
            .rcb(rc_handle)
            .is_some_and(crate::registry::Rcb::is_connected);
        if !self.features.contains(Features::RC_CONTROLLER) || !connected {
            debug!("[RC] Pass-through on {} dropped", rc_handle);
            return;
        }
        self.send(LowerCommand::RcPassThrough {
            rc_handle,
            label: command.label,
            op_id: command.op_id,
            key_state: command.key_state,
        });
    }

    fn rc_vendor_cmd(&mut self, rc_handle: u8, message: VendorMessage) {
        let allowed = self
            .features
            .contains(Features::RC_CONTROLLER | Features::VENDOR);
        if !allowed || self.registry.rcb(rc_handle).is_none() {
            debug!("[RC] Vendor command on {} dropped", rc_handle);
            return;
        }
        self.send(LowerCommand::RcVendor {
            rc_handle,
            label: message.label,
            code: message.code,
            company_id: message.company_id,
            data: message.data,
        });
    }

    fn rc_vendor_rsp(&mut self, rc_handle: u8, message: VendorMessage) {
        let allowed = self.features.contains(Features::RC_TARGET | Features::VENDOR);
        if !allowed || self.registry.rcb(rc_handle).is_none() {
            debug!("[RC] Vendor response on {} dropped", rc_handle);
            return;
        }
        self.send(LowerCommand::RcVendor {
            rc_handle,
            label: message.label,
            code: message.code,
            company_id: message.company_id,
            data: message.data,
        });
    }

    fn rc_meta_rsp(&mut self, rc_handle: u8, message: VendorMessage) {
        let response = message.code >= avrc::RSP_NOT_IMPL;
        let role = if response {
            Features::RC_TARGET
        } else {
            Features::RC_CONTROLLER
        };
        let allowed = self.features.contains(Features::METADATA | role);
        if !allowed || self.registry.rcb(rc_handle).is_none() {
            debug!("[RC] Metadata message on {} dropped", rc_handle);
            return;
        }
        self.send(LowerCommand::RcMeta {
            rc_handle,
            label: message.label,
            code: message.code,
            data: message.data,
        });
    }

    fn rc_close(&mut self, rc_handle: u8) {
        let Some(rcb) = self.registry.rcb(rc_handle) else {
            return;
        };
        if let Some(index) = usize::from(rcb.shdl).checked_sub(1) {
            self.stop_stream_timer(index);
        }
        self.send(LowerCommand::RcClose { rc_handle });
    }

    fn rc_msg(&mut self, rc_handle: u8, message: RcMessage) {
        match message.opcode {
            RcOpcode::PassThrough => self.rc_pass_through(rc_handle, &message),
            RcOpcode::Vendor => self.rc_vendor_msg(rc_handle, message),
            RcOpcode::Other(_) if !message.is_response() => {
                self.send(LowerCommand::RcReject {
                    rc_handle,
                    label: message.label,
                    opcode: message.opcode,
                    code: avrc::RSP_NOT_IMPL,
                });
            }
            RcOpcode::Other(opcode) => trace!("[RC] Ignoring response to opcode {}", opcode),
        }
    }

    fn rc_pass_through(&mut self, rc_handle: u8, message: &RcMessage) {
        let (label, op_id, key_state) = (message.label, message.op_id, message.key_state);

        if message.is_response() {
            match message.code {
                avrc::RSP_NOT_IMPL => {}
                code if code >= avrc::RSP_ACCEPT => self.notify(AvEvent::RemoteRsp {
                    rc_handle,
                    label,
                    op_id,
                    key_state,
                    code,
                }),
                _ => self.send(LowerCommand::RcPassResponse {
                    rc_handle,
                    label,
                    op_id,
                    key_state,
                    code: avrc::RSP_REJ,
                }),
            }
            return;
        }

        let inquiry = matches!(message.code, avrc::CMD_SPEC_INQ | avrc::CMD_GEN_INQ);
        let code = if !matches!(
            message.code,
            avrc::CMD_CTRL | avrc::CMD_SPEC_INQ | avrc::CMD_GEN_INQ
        ) {
            avrc::RSP_NOT_IMPL
        } else if op_id == avrc::ID_VENDOR {
            if self.features.contains(Features::METADATA) {
                group_navigation(message.data.as_slice(), inquiry)
            } else {
                avrc::RSP_NOT_IMPL
            }
        } else if self.platform.passthrough_supported(op_id) {
            if inquiry {
                avrc::RSP_IMPL_STBL
            } else {
                avrc::RSP_ACCEPT
            }
        } else {
            avrc::RSP_NOT_IMPL
        };

        if code != avrc::RSP_INTERIM {
            self.send(LowerCommand::RcPassResponse {
                rc_handle,
                label,
                op_id,
                key_state,
                code,
            });
        }
        if matches!(code, avrc::RSP_ACCEPT | avrc::RSP_INTERIM) {
            self.notify(AvEvent::RemoteCmd {
                rc_handle,
                label,
                op_id,
                key_state,
            });
        }
    }

    fn rc_vendor_msg(&mut self, rc_handle: u8, message: RcMessage) {
        let RcMessage {
            label,
            code,
            company_id,
            data,
            ..
        } = message;
        let command = code <= avrc::CMD_GEN_INQ;
        let metadata =
            self.features.contains(Features::METADATA) && company_id == avrc::CO_METADATA;

        if !self.features.contains(Features::VENDOR) {
            if command {
                let invalid = data.as_slice().first() == Some(&avrc::PDU_INVALID);
                let code = if invalid {
                    avrc::RSP_REJ
                } else {
                    avrc::RSP_NOT_IMPL
                };
                self.send(LowerCommand::RcVendor {
                    rc_handle,
                    label,
                    code,
                    company_id,
                    data,
                });
            }
            return;
        }

        if !command && code < avrc::RSP_ACCEPT {
            trace!("[RC] Ignoring vendor response {}", code);
            return;
        }
        let event = match (metadata, command) {
            (true, _) => AvEvent::MetaMsg {
                rc_handle,
                label,
                code,
                data,
            },
            (false, true) => AvEvent::VendorCmd {
                rc_handle,
                label,
                code,
                company_id,
                data,
            },
            (false, false) => AvEvent::VendorRsp {
                rc_handle,
                label,
                code,
                company_id,
                data,
            },
        };
        self.notify(event);
    }
}

/// Answer to a group navigation pass-through (vendor unique key)
fn group_navigation(operand: &[u8], inquiry: bool) -> u8 {
    let company = avrc::CO_METADATA.to_be_bytes();
    match operand {
        [c0, c1, c2, hi, lo] if [*c0, *c1, *c2] == company[1..] => {
            if u16::from_be_bytes([*hi, *lo]) <= avrc::GROUP_NAVI_MAX {
                if inquiry {
                    avrc::RSP_IMPL_STBL
                } else {
                    avrc::RSP_INTERIM
                }
            } else {
                avrc::RSP_REJ
            }
        }
        _ => avrc::RSP_NOT_IMPL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Blob, Envelope, KeyState};
    use crate::{AvChannel, BluetoothAddress};
    use crate::testing::{MockPlatform, PEER, enabled_core, open_stream, register};

    fn opened(core: &mut Core<MockPlatform>, rc_handle: u8, peer: BluetoothAddress) {
        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::Opened,
            EventData::RcConnection(RcConnection { peer }),
        ));
    }

    fn message(opcode: RcOpcode, code: u8, op_id: u8, data: &[u8]) -> EventData {
        EventData::RcMessage(RcMessage {
            label: 3,
            opcode,
            code,
            op_id,
            key_state: KeyState::Pressed,
            company_id: avrc::CO_METADATA,
            data: Blob::from_slice(data).unwrap(),
        })
    }

    #[test]
    fn test_group_navigation_codes() {
        assert_eq!(group_navigation(&[0x00, 0x19, 0x58, 0x00, 0x00], false), avrc::RSP_INTERIM);
        assert_eq!(group_navigation(&[0x00, 0x19, 0x58, 0x00, 0x01], true), avrc::RSP_IMPL_STBL);
        assert_eq!(group_navigation(&[0x00, 0x19, 0x58, 0x00, 0x02], false), avrc::RSP_REJ);
        assert_eq!(group_navigation(&[0x00, 0x19], false), avrc::RSP_NOT_IMPL);
    }

    #[test]
    fn test_enable_with_target_listens() {
        let mut core = enabled_core(Features::RC_TARGET);
        register(&mut core, AvChannel::Audio);
        assert!(core.rc_acp_handle.is_some());
        assert!(core
            .platform()
            .commands
            .iter()
            .any(|command| matches!(command, LowerCommand::RcOpen { peer: None, .. })));
    }

    #[test]
    fn test_rc_only_peer_gets_discovery() {
        let mut core = enabled_core(Features::RC_TARGET | Features::RC_CONTROLLER);
        register(&mut core, AvChannel::Audio);
        let rc_handle = core.rc_acp_handle.unwrap();
        core.platform_mut().clear();

        opened(&mut core, rc_handle, PEER);
        assert_eq!(
            core.platform().events,
            [AvEvent::RcOpen {
                rc_handle,
                peer: PEER,
                status: Ok(()),
                peer_features: Features::RC_CONTROLLER,
            }]
        );
        assert!(core
            .platform()
            .commands
            .contains(&LowerCommand::FindRcService { peer: PEER }));
        assert_eq!(core.rc_disc_pending, Some(RcDiscoveryTarget::Rc(rc_handle)));

        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::DiscoveryDone,
            EventData::RcDiscovery(RcDiscovery {
                peer: PEER,
                peer_features: Features::RC_TARGET | Features::VENDOR,
                ct_features: 0,
                tg_features: 0x01,
                cover_art_psm: 0x1005,
            }),
        ));
        let rcb = core.registry.rcb(rc_handle).unwrap();
        assert_eq!(rcb.peer_features, Features::RC_TARGET | Features::VENDOR);
        assert_eq!(rcb.cover_art.psm, 0x1005);
        assert!(matches!(
            core.platform().events.last(),
            Some(AvEvent::RcFeatures { .. })
        ));
    }

    #[test]
    fn test_stream_discovery_creates_initiator_channel() {
        let mut core = enabled_core(Features::RC_CONTROLLER);
        let handle = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, handle, PEER);
        let index = core.registry.index_of(handle).unwrap();
        core.rc_disc(RcDiscoveryTarget::Stream(index));
        core.platform_mut().clear();

        core.handle(Envelope::rc(
            0,
            RcEvent::DiscoveryDone,
            EventData::RcDiscovery(RcDiscovery {
                peer: PEER,
                peer_features: Features::RC_TARGET,
                ct_features: 0,
                tg_features: 0,
                cover_art_psm: 0,
            }),
        ));
        assert!(core.platform().commands.iter().any(|command| matches!(
            command,
            LowerCommand::RcOpen { peer: Some(peer), .. } if *peer == PEER
        )));
    }

    #[test]
    fn test_stream_discovery_without_match_reports_failure() {
        let mut core = enabled_core(Features::RC_CONTROLLER);
        let handle = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, handle, PEER);
        let index = core.registry.index_of(handle).unwrap();
        if let Some(scb) = core.registry.scb_mut(index) {
            scb.use_rc = true;
        }
        core.rc_disc(RcDiscoveryTarget::Stream(index));
        core.platform_mut().clear();

        core.handle(Envelope::rc(
            0,
            RcEvent::DiscoveryDone,
            EventData::RcDiscovery(RcDiscovery {
                peer: PEER,
                peer_features: Features::RC_CONTROLLER,
                ct_features: 0,
                tg_features: 0,
                cover_art_psm: 0,
            }),
        ));
        assert_eq!(
            core.platform().events,
            [AvEvent::RcOpen {
                rc_handle: RC_HANDLE_NONE,
                peer: PEER,
                status: Err(crate::AvError::Sdp),
                peer_features: Features::empty(),
            }]
        );
        assert!(!core.registry.scb(index).unwrap().use_rc);
    }

    #[test]
    fn test_pass_through_command_accepted() {
        let mut core = enabled_core(Features::RC_TARGET);
        register(&mut core, AvChannel::Audio);
        let rc_handle = core.rc_acp_handle.unwrap();
        opened(&mut core, rc_handle, PEER);
        core.platform_mut().clear();

        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::Message,
            message(RcOpcode::PassThrough, avrc::CMD_CTRL, 0x44, &[]),
        ));
        assert_eq!(
            core.platform().commands.last(),
            Some(&LowerCommand::RcPassResponse {
                rc_handle,
                label: 3,
                op_id: 0x44,
                key_state: KeyState::Pressed,
                code: avrc::RSP_ACCEPT,
            })
        );
        assert!(core
            .platform()
            .events
            .iter()
            .any(|event| matches!(event, AvEvent::RemoteCmd { op_id: 0x44, .. })));
    }

    #[test]
    fn test_pass_through_unsupported_key_not_implemented() {
        let mut core = enabled_core(Features::RC_TARGET);
        register(&mut core, AvChannel::Audio);
        let rc_handle = core.rc_acp_handle.unwrap();
        opened(&mut core, rc_handle, PEER);
        core.platform_mut().unsupported_keys.push(0x41);
        core.platform_mut().clear();

        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::Message,
            message(RcOpcode::PassThrough, avrc::CMD_CTRL, 0x41, &[]),
        ));
        assert!(matches!(
            core.platform().commands.last(),
            Some(LowerCommand::RcPassResponse { code: avrc::RSP_NOT_IMPL, .. })
        ));
        assert!(core.platform().events.is_empty());
    }

    #[test]
    fn test_vendor_command_without_feature_not_implemented() {
        let mut core = enabled_core(Features::RC_TARGET);
        register(&mut core, AvChannel::Audio);
        let rc_handle = core.rc_acp_handle.unwrap();
        opened(&mut core, rc_handle, PEER);
        core.platform_mut().clear();

        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::Message,
            message(RcOpcode::Vendor, avrc::CMD_STATUS, 0, &[0x10, 0x00]),
        ));
        assert!(matches!(
            core.platform().commands.last(),
            Some(LowerCommand::RcVendor { code: avrc::RSP_NOT_IMPL, .. })
        ));

        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::Message,
            message(RcOpcode::Vendor, avrc::CMD_STATUS, 0, &[avrc::PDU_INVALID]),
        ));
        assert!(matches!(
            core.platform().commands.last(),
            Some(LowerCommand::RcVendor { code: avrc::RSP_REJ, .. })
        ));
    }

    #[test]
    fn test_metadata_command_forwarded() {
        let mut core = enabled_core(Features::RC_TARGET | Features::VENDOR | Features::METADATA);
        register(&mut core, AvChannel::Audio);
        let rc_handle = core.rc_acp_handle.unwrap();
        opened(&mut core, rc_handle, PEER);
        core.platform_mut().clear();

        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::Message,
            message(RcOpcode::Vendor, avrc::CMD_STATUS, 0, &[0x20, 0x00, 0x00, 0x00]),
        ));
        assert!(matches!(
            core.platform().events.last(),
            Some(AvEvent::MetaMsg { code: avrc::CMD_STATUS, .. })
        ));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut core = enabled_core(Features::RC_TARGET);
        register(&mut core, AvChannel::Audio);
        let rc_handle = core.rc_acp_handle.unwrap();
        opened(&mut core, rc_handle, PEER);
        core.platform_mut().clear();

        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::Message,
            message(RcOpcode::Other(0x30), avrc::CMD_STATUS, 0, &[]),
        ));
        assert!(matches!(
            core.platform().commands.last(),
            Some(LowerCommand::RcReject { opcode: RcOpcode::Other(0x30), .. })
        ));
    }

    #[test]
    fn test_remote_cmd_requires_controller() {
        let mut core = enabled_core(Features::RC_TARGET);
        register(&mut core, AvChannel::Audio);
        let rc_handle = core.rc_acp_handle.unwrap();
        opened(&mut core, rc_handle, PEER);
        core.platform_mut().clear();

        let command = RcCommand {
            label: 1,
            op_id: 0x44,
            key_state: KeyState::Pressed,
        };
        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::ApiRemoteCmd,
            EventData::RcCommand(command),
        ));
        assert!(core.platform().commands.is_empty());

        core.features.insert(Features::RC_CONTROLLER);
        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::ApiRemoteCmd,
            EventData::RcCommand(command),
        ));
        assert_eq!(core.platform().commands.len(), 1);
    }

    #[test]
    fn test_meta_response_needs_target_role() {
        let mut core = enabled_core(Features::RC_CONTROLLER | Features::METADATA);
        register(&mut core, AvChannel::Audio);
        let rc_handle = core.rc_create(RcRole::Acceptor, 0, 1).unwrap();
        core.platform_mut().clear();

        let response = VendorMessage {
            label: 2,
            code: avrc::RSP_ACCEPT,
            company_id: avrc::CO_METADATA,
            data: Blob::from_slice(&[0x20]).unwrap(),
        };
        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::ApiMetaRsp,
            EventData::Vendor(response),
        ));
        assert!(core.platform().commands.is_empty());
    }

    #[test]
    fn test_acceptor_close_recreates_listener() {
        let mut core = enabled_core(Features::RC_TARGET);
        register(&mut core, AvChannel::Audio);
        let rc_handle = core.rc_acp_handle.unwrap();
        opened(&mut core, rc_handle, PEER);
        core.platform_mut().clear();

        core.handle(Envelope::rc(
            rc_handle,
            RcEvent::Closed,
            EventData::RcConnection(RcConnection { peer: PEER }),
        ));
        assert!(core
            .platform()
            .events
            .contains(&AvEvent::RcClose { rc_handle, peer: PEER }));
        assert!(core.rc_acp_handle.is_some());
        assert!(!core.registry.rc_only_lcb().in_use);
    }
}
