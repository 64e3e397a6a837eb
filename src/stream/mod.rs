//! Per-stream state machine
//!
//! Every registered stream runs the same table: six states, 35 events, at most two actions
//! per cell. [`Core::ssm_execute`] looks up the cell for the stream's current state, commits
//! the next state and then runs the actions in order. Actions may re-enter the machine for
//! the same stream, in which case the inner run sees the state committed by the outer one.
//! A stream entering INCOMING pushes any other INCOMING stream back to INIT.

mod actions;
mod table;

use table::TABLE;

use crate::event::{EventData, StreamEvent};
use crate::{Core, Platform};

/// State of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum StreamState {
    /// Idle, not bound to a peer
    #[default]
    Init,
    /// The peer is setting up the stream (acceptor)
    Incoming,
    /// This side is setting up the stream (initiator)
    Opening,
    /// Transport open
    Open,
    /// Codec change in progress
    Reconfiguring,
    /// Tearing down
    Closing,
}

impl StreamState {
    /// Number of states
    pub const COUNT: usize = 6;

    /// All states in table row order
    pub const ALL: [Self; Self::COUNT] = [
        Self::Init,
        Self::Incoming,
        Self::Opening,
        Self::Open,
        Self::Reconfiguring,
        Self::Closing,
    ];

    /// Row index in the transition table
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Work a table cell can schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub(crate) enum StreamAction {
    DoDisc,
    FreeSdb,
    ConfigInd,
    SecurityInd,
    SecurityCfm,
    SecurityReq,
    SecurityRsp,
    SecurityRej,
    OpenAtInc,
    CcoClose,
    DisconnectReq,
    SetconfigRsp,
    SetconfigRej,
    StRcTimer,
    Cleanup,
    DiscResAsAcp,
    DiscResults,
    SaveCaps,
    GetcapResults,
    StrOpened,
    DelayCo,
    DoClose,
    ConnectReq,
    OpenFailSdp,
    OpenFailed,
    SdpFailed,
    SwitchRole,
    RoleRes,
    DiscoverReq,
    ConnFailed,
    DoStart,
    StartOk,
    StartFailed,
    StrStopped,
    StrClosed,
    SuspendCfm,
    Reconfig,
    RcfgStrOk,
    RcfgFailed,
    RcfgConnect,
    RcfgDiscntd,
    RcfgCfm,
    RcfgOpen,
    SuspendCont,
    SetUseRc,
    OpenRc,
    Chk2ndStart,
    DataPath,
    ClrCong,
    SetDelayValue,
}

impl<P: Platform> Core<P> {
    /// Run one event through the machine of the stream in pool slot `index`
    pub(crate) fn ssm_execute(&mut self, index: usize, event: StreamEvent, data: &mut EventData) {
        let Some(scb) = self.registry.scb(index) else {
            warn!("[SSM] No stream in slot {}", index);
            return;
        };
        let handle = scb.handle;

        let state = scb.state;
        let cell = &TABLE[state.index()][event.index()];

        if cell.next == StreamState::Incoming && state != StreamState::Incoming {
            // Only one stream may wait for the peer's configuration at a time.
            let holder = self
                .registry
                .scbs()
                .find(|other| other.state == StreamState::Incoming && other.handle != handle)
                .map(crate::registry::Scb::index);
            if let Some(other) = holder.and_then(|holder| self.registry.scb_mut(holder)) {
                debug!("[SSM] Stream {} hands INCOMING to {}", other.handle.raw(), handle.raw());
                other.state = StreamState::Init;
                other.unbind();
            }
        }

        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.state = cell.next;

        debug!(
            "[SSM] Stream {} {:?}: {:?} -> {:?}",
            handle.raw(),
            event,
            state,
            cell.next
        );

        for &action in cell.actions {
            if self.registry.index_of(handle).is_none() {
                break;
            }
            self.run_action(index, action, data);
        }
    }

    fn run_action(&mut self, index: usize, action: StreamAction, data: &mut EventData) {
        trace!("[SSM] Action {:?}", action);
        match action {
            StreamAction::DoDisc => self.do_disc(index, data),
            StreamAction::FreeSdb => self.free_sdb(index),
            StreamAction::ConfigInd => self.config_ind(index, data),
            StreamAction::SecurityInd => self.security_ind(index, data),
            StreamAction::SecurityCfm => self.security_cfm(index, data),
            StreamAction::SecurityReq => self.security_req(index, data),
            StreamAction::SecurityRsp => self.security_rsp(index, data),
            StreamAction::SecurityRej => self.security_rej(index, data),
            StreamAction::OpenAtInc => self.open_at_inc(index, data),
            StreamAction::CcoClose => self.cco_close(index),
            StreamAction::DisconnectReq => self.disconnect_req(index),
            StreamAction::SetconfigRsp => self.setconfig_rsp(index, data),
            StreamAction::SetconfigRej => self.setconfig_rej(index, data),
            StreamAction::StRcTimer => self.st_rc_timer(index),
            StreamAction::Cleanup => self.cleanup(index),
            StreamAction::DiscResAsAcp => self.disc_res_as_acp(index, data),
            StreamAction::DiscResults => self.disc_results(index, data),
            StreamAction::SaveCaps => self.save_caps(index, data),
            StreamAction::GetcapResults => self.getcap_results(index, data),
            StreamAction::StrOpened => self.str_opened(index, data),
            StreamAction::DelayCo => self.delay_co(index, data),
            StreamAction::DoClose => self.do_close(index),
            StreamAction::ConnectReq => self.connect_req(index),
            StreamAction::OpenFailSdp => self.open_fail_sdp(index),
            StreamAction::OpenFailed => self.open_failed(index),
            StreamAction::SdpFailed => self.sdp_failed(index),
            StreamAction::SwitchRole => self.switch_role(index),
            StreamAction::RoleRes => self.role_res(index, data),
            StreamAction::DiscoverReq => self.discover_req(index),
            StreamAction::ConnFailed => self.conn_failed(index),
            StreamAction::DoStart => self.do_start(index),
            StreamAction::StartOk => self.start_ok(index, crate::event::SwitchResult::None),
            StreamAction::StartFailed => self.start_failed(index),
            StreamAction::StrStopped => {
                let stop = match data {
                    EventData::Stop(stop) => Some(*stop),
                    _ => None,
                };
                self.str_stopped(index, stop);
            }
            StreamAction::StrClosed => self.str_closed(index),
            StreamAction::SuspendCfm => self.suspend_cfm(index, data),
            StreamAction::Reconfig => self.reconfig(index, data),
            StreamAction::RcfgStrOk => self.rcfg_str_ok(index),
            StreamAction::RcfgFailed => self.rcfg_failed(index),
            StreamAction::RcfgConnect => self.rcfg_connect(index),
            StreamAction::RcfgDiscntd => self.rcfg_discntd(index),
            StreamAction::RcfgCfm => self.rcfg_cfm(index, data),
            StreamAction::RcfgOpen => self.rcfg_open(index),
            StreamAction::SuspendCont => self.suspend_cont(index, data),
            StreamAction::SetUseRc => self.set_use_rc(index),
            StreamAction::OpenRc => self.open_rc(index),
            StreamAction::Chk2ndStart => self.chk_2nd_start(index),
            StreamAction::DataPath => self.data_path(index),
            StreamAction::ClrCong => self.clr_cong(index),
            StreamAction::SetDelayValue => self.set_delay_value(index, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2dp::{MediaType, SepInfo, SepType};
    use crate::callout::{AvEvent, LowerCommand};
    use crate::constants::avdt_error;
    use crate::event::{
        Blob, ConfigIndication, ConfigResult, Envelope, LinkChange, OpenRequest, ProtectData,
        ReconfigRequest, SignalResult, StopRequest, StreamOpened, SystemEvent, ledger,
    };
    use crate::testing::{
        MockPlatform, PEER, PEER2, complete_open, enabled_core, link_up, open_stream, register,
        sbc_config, stream,
    };
    use crate::{AvChannel, AvError, BluetoothAddress, Features, StreamHandle};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_sync::channel::Channel;

    fn incoming_count(core: &Core<MockPlatform>) -> usize {
        core.registry()
            .scbs()
            .filter(|scb| scb.state == StreamState::Incoming)
            .count()
    }

    fn config_ind(core: &mut Core<MockPlatform>, handle: StreamHandle) {
        let ind = ConfigIndication {
            peer: PEER,
            config: sbc_config(MediaType::Audio),
            int_seid: 1,
            label: 3,
        };
        stream(core, handle, StreamEvent::StrConfigInd, EventData::ConfigInd(ind));
    }

    #[test]
    fn test_close_in_init_has_no_side_effects() {
        let mut core = enabled_core(Features::empty());
        let handle = register(&mut core, AvChannel::Audio);
        core.platform_mut().clear();

        stream(&mut core, handle, StreamEvent::ApClose, EventData::None);
        stream(&mut core, handle, StreamEvent::ApClose, EventData::None);
        assert_eq!(core.state(handle), Some(StreamState::Init));
        assert!(core.platform().commands.is_empty());
        assert!(core.platform().events.is_empty());
    }

    #[test]
    fn test_second_configuration_takes_incoming() {
        let mut core = enabled_core(Features::empty());
        let first = register(&mut core, AvChannel::Audio);
        let second = register(&mut core, AvChannel::Audio);

        config_ind(&mut core, first);
        assert_eq!(core.state(first), Some(StreamState::Incoming));
        config_ind(&mut core, second);

        assert_eq!(incoming_count(&core), 1);
        assert_eq!(core.state(first), Some(StreamState::Init));
        assert_eq!(core.state(second), Some(StreamState::Incoming));
        let scb = core.registry.handle_to_scb(first).unwrap();
        assert!(scb.coll_mask.is_empty());
    }

    #[test]
    fn test_collision_with_local_open() {
        let mut core = enabled_core(Features::empty());
        let first = register(&mut core, AvChannel::Audio);
        let second = register(&mut core, AvChannel::Audio);

        // The peer connects and the first free stream waits for its configuration.
        link_up(&mut core, PEER, true);
        assert_eq!(core.state(first), Some(StreamState::Incoming));

        let open = OpenRequest::new(PEER, false, 0);
        stream(&mut core, second, StreamEvent::ApOpen, EventData::Open(open));
        assert_eq!(core.state(second), Some(StreamState::Opening));

        // The peer configures the stream we are opening.
        config_ind(&mut core, second);
        assert_eq!(core.state(first), Some(StreamState::Init));
        assert_eq!(core.state(second), Some(StreamState::Incoming));
        assert_eq!(incoming_count(&core), 1);
        assert_eq!(core.platform().proposed, [(second, 1)]);

        let result = ConfigResult::default();
        stream(
            &mut core,
            second,
            StreamEvent::CiSetconfigOk,
            EventData::ConfigResult(result),
        );
        assert!(core.platform().commands.contains(&LowerCommand::ConfigResponse {
            handle: second,
            label: 3,
            err_code: 0,
            category: 0,
        }));
        let opened = StreamOpened {
            peer: PEER,
            peer_mtu: 672,
            avdt_version: 0x0103,
        };
        stream(&mut core, second, StreamEvent::StrOpenOk, EventData::Opened(opened));
        assert_eq!(core.state(second), Some(StreamState::Open));
        assert_eq!(core.state(first), Some(StreamState::Init));
        assert_eq!(incoming_count(&core), 0);
    }

    #[test]
    fn test_displaced_stream_is_free_for_next_peer() {
        let mut core = enabled_core(Features::MULTI_AV);
        let first = register(&mut core, AvChannel::Audio);
        let second = register(&mut core, AvChannel::Audio);
        let third_peer = BluetoothAddress::new([9; 6]);

        link_up(&mut core, PEER, true);
        let open = OpenRequest::new(PEER, false, 0);
        stream(&mut core, second, StreamEvent::ApOpen, EventData::Open(open));
        config_ind(&mut core, second);
        assert_eq!(core.state(first), Some(StreamState::Init));
        let scb = core.registry.handle_to_scb(first).unwrap();
        assert!(scb.peer.is_zero());
        assert!(scb.wait.is_empty() && scb.role.is_empty());

        // The peer goes away before configuring; the configured stream closes.
        let down = LinkChange {
            peer: PEER,
            connected: false,
            acceptor: false,
            reason: 0x13,
        };
        core.handle(Envelope::system(SystemEvent::SignalChange, EventData::Link(down)));
        assert_eq!(core.state(second), Some(StreamState::Init));

        core.platform_mut().clear();
        link_up(&mut core, PEER2, true);
        assert_eq!(core.registry.handle_to_scb(first).unwrap().peer, PEER2);
        link_up(&mut core, third_peer, true);
        assert_eq!(core.state(second), Some(StreamState::Incoming));
        assert_eq!(core.registry.handle_to_scb(second).unwrap().peer, third_peer);
        assert!(
            !core
                .platform()
                .commands
                .iter()
                .any(|command| matches!(command, LowerCommand::Disconnect { .. }))
        );
    }

    #[test]
    fn test_rejected_configuration_returns_to_init() {
        let mut core = enabled_core(Features::empty());
        let handle = register(&mut core, AvChannel::Audio);
        config_ind(&mut core, handle);

        let result = ConfigResult {
            err_code: avdt_error::UNSUP_CFG,
            ..ConfigResult::default()
        };
        stream(
            &mut core,
            handle,
            StreamEvent::CiSetconfigFail,
            EventData::ConfigResult(result),
        );
        assert_eq!(core.state(handle), Some(StreamState::Init));
        assert!(core.platform().events.contains(&AvEvent::Reject { handle, peer: PEER }));
    }

    #[test]
    fn test_sdp_failure_while_closing_reports_failed_open() {
        let mut core = enabled_core(Features::empty());
        let handle = register(&mut core, AvChannel::Audio);
        let open = OpenRequest::new(PEER, false, 0);
        stream(&mut core, handle, StreamEvent::ApOpen, EventData::Open(open));
        stream(&mut core, handle, StreamEvent::ApClose, EventData::None);
        assert_eq!(core.state(handle), Some(StreamState::Closing));

        stream(&mut core, handle, StreamEvent::SdpDiscFail, EventData::None);
        assert_eq!(core.state(handle), Some(StreamState::Init));
        assert!(core.platform().events.contains(&AvEvent::Open {
            handle,
            peer: PEER,
            status: Err(AvError::Sdp),
            starting: false,
            mtu: 0,
        }));
        let scb = core.registry.handle_to_scb(handle).unwrap();
        assert!(scb.disc_db.is_none());
        assert!(scb.open_status.is_none());
    }

    #[test]
    fn test_start_stop_and_suspend() {
        let mut core = enabled_core(Features::empty());
        let handle = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, handle, PEER);
        core.platform_mut().clear();

        stream(&mut core, handle, StreamEvent::ApStart, EventData::None);
        assert_eq!(core.platform().commands, [LowerCommand::Start { handle }]);
        stream(&mut core, handle, StreamEvent::StrStartOk, EventData::None);
        assert!(core.platform().events.contains(&AvEvent::Start {
            handle,
            status: Ok(()),
            initiator: true,
            suspending: false,
        }));
        assert!(core.platform().commands.contains(&LowerCommand::SetAclPriority {
            peer: PEER,
            high: true
        }));

        let stop = StopRequest {
            suspend: false,
            flush: false,
        };
        stream(&mut core, handle, StreamEvent::ApStop, EventData::Stop(stop));
        assert!(core.platform().events.contains(&AvEvent::Stop {
            handle,
            suspend: false
        }));

        let suspend = StopRequest {
            suspend: true,
            flush: false,
        };
        core.platform_mut().clear();
        stream(&mut core, handle, StreamEvent::ApStop, EventData::Stop(suspend));
        assert_eq!(core.platform().commands, [LowerCommand::Suspend { handle }]);
        stream(
            &mut core,
            handle,
            StreamEvent::StrSuspendCfm,
            EventData::Signal(SignalResult::ok()),
        );
        assert_eq!(
            core.platform().events,
            [AvEvent::Suspend {
                handle,
                status: Ok(()),
                initiator: true,
            }]
        );
        assert_eq!(core.state(handle), Some(StreamState::Open));
    }

    #[test]
    fn test_start_held_until_companion_opens() {
        let mut core = enabled_core(Features::MULTI_AV);
        let first = register(&mut core, AvChannel::Audio);
        let second = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, first, PEER);

        let open = OpenRequest::new(PEER2, false, 0);
        stream(&mut core, second, StreamEvent::ApOpen, EventData::Open(open));
        core.platform_mut().hold_starts = true;
        core.platform_mut().clear();

        stream(&mut core, first, StreamEvent::ApStart, EventData::None);
        assert!(core.platform().commands.is_empty());
        assert!(core.registry.handle_to_scb(first).unwrap().start_held);

        complete_open(&mut core, second, PEER2);
        assert!(!core.registry.handle_to_scb(first).unwrap().start_held);
        assert!(
            core.platform()
                .commands
                .contains(&LowerCommand::Start { handle: first })
        );
    }

    #[test]
    fn test_reconfigure_falls_back_to_reopen() {
        let mut core = enabled_core(Features::empty());
        let handle = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, handle, PEER);

        let request = ReconfigRequest {
            config: sbc_config(MediaType::Audio),
            suspend: true,
            sep_info_idx: 0,
        };
        stream(&mut core, handle, StreamEvent::ApiReconfig, EventData::Reconfig(request));
        assert_eq!(core.state(handle), Some(StreamState::Reconfiguring));
        assert!(matches!(
            core.platform().commands.last(),
            Some(LowerCommand::Reconfigure { .. })
        ));

        // In-place reconfiguration refused: close and open again.
        stream(
            &mut core,
            handle,
            StreamEvent::StrReconfigCfm,
            EventData::Signal(SignalResult::error(avdt_error::BAD_STATE)),
        );
        assert_eq!(
            core.platform().commands.last(),
            Some(&LowerCommand::Close { handle })
        );
        stream(&mut core, handle, StreamEvent::StrClose, EventData::None);
        assert!(matches!(
            core.platform().commands.last(),
            Some(LowerCommand::Connect { peer, .. }) if *peer == PEER
        ));
        stream(&mut core, handle, StreamEvent::AvdtConnect, EventData::None);
        assert!(matches!(
            core.platform().commands.last(),
            Some(LowerCommand::Open { seid: 1, .. })
        ));
        stream(&mut core, handle, StreamEvent::StrOpenOk, EventData::None);

        assert_eq!(core.state(handle), Some(StreamState::Open));
        assert!(core.platform().events.contains(&AvEvent::Reconfig {
            handle,
            status: Ok(()),
        }));
        let scb = core.registry.handle_to_scb(handle).unwrap();
        assert!(!scb.recfg_sup);
        assert!(scb.pending_cap.is_none());
    }

    #[test]
    fn test_reconfigure_gives_up_after_retries() {
        let mut core = enabled_core(Features::empty());
        let handle = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, handle, PEER);

        let request = ReconfigRequest {
            config: sbc_config(MediaType::Audio),
            suspend: false,
            sep_info_idx: 0,
        };
        stream(&mut core, handle, StreamEvent::ApiReconfig, EventData::Reconfig(request));
        for _ in 0..=core.options().reconfig_retries {
            stream(&mut core, handle, StreamEvent::AvdtDisconnect, EventData::None);
        }
        assert_eq!(core.state(handle), Some(StreamState::Init));
        assert!(core.platform().events.contains(&AvEvent::Reconfig {
            handle,
            status: Err(AvError::Fail),
        }));
    }

    /// Signaling commands a reconfiguration step may send
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Sent {
        Suspend,
        Reconfigure,
        Close,
        Connect,
        Disconnect,
        Open(u8),
    }

    #[derive(Debug, Clone, Copy)]
    enum Input {
        Reconfig { suspend: bool, sep_info_idx: u8 },
        Signal(u8),
        Plain,
    }

    struct Step {
        event: StreamEvent,
        input: Input,
        state: StreamState,
        sent: &'static [Sent],
    }

    struct ReconfigCase {
        name: &'static str,
        started: bool,
        steps: &'static [Step],
        suspend_sup: bool,
        recfg_sup: bool,
    }

    const fn step(
        event: StreamEvent,
        input: Input,
        state: StreamState,
        sent: &'static [Sent],
    ) -> Step {
        Step {
            event,
            input,
            state,
            sent,
        }
    }

    const RCFG: StreamState = StreamState::Reconfiguring;
    const IN_PLACE: Input = Input::Reconfig {
        suspend: true,
        sep_info_idx: 0,
    };
    const ASK_SUSPEND: Step = step(StreamEvent::ApiReconfig, IN_PLACE, RCFG, &[Sent::Suspend]);
    const ASK_RECONFIGURE: Step =
        step(StreamEvent::ApiReconfig, IN_PLACE, RCFG, &[Sent::Reconfigure]);
    const CLOSED: Step = step(StreamEvent::StrClose, Input::Plain, RCFG, &[Sent::Connect]);
    const CONNECTED: Step = step(StreamEvent::AvdtConnect, Input::Plain, RCFG, &[Sent::Open(1)]);
    const OPENED: Step = step(StreamEvent::StrOpenOk, Input::Plain, StreamState::Open, &[]);

    const fn suspend_cfm(err_code: u8, state: StreamState, sent: &'static [Sent]) -> Step {
        step(StreamEvent::StrSuspendCfm, Input::Signal(err_code), state, sent)
    }

    const fn reconfig_cfm(err_code: u8, state: StreamState, sent: &'static [Sent]) -> Step {
        step(StreamEvent::StrReconfigCfm, Input::Signal(err_code), state, sent)
    }

    const RECONFIG_CASES: &[ReconfigCase] = &[
        ReconfigCase {
            name: "suspend refused",
            started: true,
            steps: &[
                ASK_SUSPEND,
                suspend_cfm(avdt_error::BAD_STATE, RCFG, &[Sent::Close]),
                CLOSED,
                CONNECTED,
                OPENED,
            ],
            suspend_sup: false,
            recfg_sup: true,
        },
        ReconfigCase {
            name: "suspend timed out",
            started: true,
            steps: &[
                ASK_SUSPEND,
                suspend_cfm(avdt_error::TIMEOUT, RCFG, &[Sent::Close]),
                CLOSED,
                CONNECTED,
                OPENED,
            ],
            suspend_sup: true,
            recfg_sup: true,
        },
        ReconfigCase {
            name: "suspend lost the link",
            started: true,
            steps: &[
                ASK_SUSPEND,
                suspend_cfm(avdt_error::CONNECT, StreamState::Init, &[]),
            ],
            suspend_sup: true,
            recfg_sup: true,
        },
        ReconfigCase {
            name: "suspend then reconfigure",
            started: true,
            steps: &[
                ASK_SUSPEND,
                suspend_cfm(0, RCFG, &[Sent::Reconfigure]),
                reconfig_cfm(0, StreamState::Open, &[]),
            ],
            suspend_sup: true,
            recfg_sup: true,
        },
        ReconfigCase {
            name: "reconfigure refused",
            started: false,
            steps: &[
                ASK_RECONFIGURE,
                reconfig_cfm(avdt_error::UNSUP_CFG, RCFG, &[Sent::Close]),
                CLOSED,
                CONNECTED,
                OPENED,
            ],
            suspend_sup: true,
            recfg_sup: false,
        },
        ReconfigCase {
            name: "reconfigure timed out",
            started: false,
            steps: &[
                ASK_RECONFIGURE,
                reconfig_cfm(avdt_error::TIMEOUT, RCFG, &[Sent::Close]),
                CLOSED,
                CONNECTED,
                OPENED,
            ],
            suspend_sup: true,
            recfg_sup: true,
        },
        ReconfigCase {
            name: "reconfigure accepted",
            started: false,
            steps: &[ASK_RECONFIGURE, reconfig_cfm(0, StreamState::Open, &[])],
            suspend_sup: true,
            recfg_sup: true,
        },
        ReconfigCase {
            name: "re-open retried",
            started: false,
            steps: &[
                ASK_RECONFIGURE,
                reconfig_cfm(avdt_error::BAD_STATE, RCFG, &[Sent::Close]),
                CLOSED,
                CONNECTED,
                step(StreamEvent::StrOpenFail, Input::Plain, RCFG, &[Sent::Disconnect]),
                step(StreamEvent::AvdtDisconnect, Input::Plain, RCFG, &[Sent::Connect]),
                CONNECTED,
                OPENED,
            ],
            suspend_sup: true,
            recfg_sup: false,
        },
        ReconfigCase {
            name: "other endpoint",
            started: false,
            steps: &[
                step(
                    StreamEvent::ApiReconfig,
                    Input::Reconfig {
                        suspend: true,
                        sep_info_idx: 1,
                    },
                    RCFG,
                    &[Sent::Close],
                ),
                CLOSED,
                step(StreamEvent::AvdtConnect, Input::Plain, RCFG, &[Sent::Open(2)]),
                OPENED,
            ],
            suspend_sup: true,
            recfg_sup: true,
        },
    ];

    fn signaling(commands: &[LowerCommand]) -> std::vec::Vec<Sent> {
        commands
            .iter()
            .filter_map(|command| match command {
                LowerCommand::Suspend { .. } => Some(Sent::Suspend),
                LowerCommand::Reconfigure { .. } => Some(Sent::Reconfigure),
                LowerCommand::Close { .. } => Some(Sent::Close),
                LowerCommand::Connect { .. } => Some(Sent::Connect),
                LowerCommand::Disconnect { .. } => Some(Sent::Disconnect),
                LowerCommand::Open { seid, .. } => Some(Sent::Open(*seid)),
                _ => None,
            })
            .collect()
    }

    fn new_config() -> crate::a2dp::StreamConfig {
        let mut config = sbc_config(MediaType::Audio);
        config.codec = Blob::from_slice(&[0x06, 0x00, 0x00, 0x11, 0x15, 0x02, 0x35]).unwrap();
        config
    }

    #[test]
    fn test_reconfigure_fallback_paths() {
        for case in RECONFIG_CASES {
            let mut core = enabled_core(Features::empty());
            let handle = register(&mut core, AvChannel::Audio);
            open_stream(&mut core, handle, PEER);
            let second = SepInfo::new(2, MediaType::Audio, SepType::Sink);
            let scb = core.registry.handle_to_scb(handle).unwrap();
            scb.sep_info.push(second).unwrap();
            scb.num_seps = 2;
            if case.started {
                stream(&mut core, handle, StreamEvent::ApStart, EventData::None);
                stream(&mut core, handle, StreamEvent::StrStartOk, EventData::None);
            }

            let mut rcfg_idx = 0;
            for (n, step) in case.steps.iter().enumerate() {
                core.platform_mut().clear();
                let data = match step.input {
                    Input::Reconfig {
                        suspend,
                        sep_info_idx,
                    } => {
                        rcfg_idx = sep_info_idx;
                        EventData::Reconfig(ReconfigRequest {
                            config: new_config(),
                            suspend,
                            sep_info_idx,
                        })
                    }
                    Input::Signal(0) => EventData::Signal(SignalResult::ok()),
                    Input::Signal(err_code) => EventData::Signal(SignalResult::error(err_code)),
                    Input::Plain => EventData::None,
                };
                stream(&mut core, handle, step.event, data);
                assert_eq!(core.state(handle), Some(step.state), "{} step {n}", case.name);
                assert_eq!(
                    signaling(&core.platform().commands),
                    step.sent,
                    "{} step {n}",
                    case.name
                );
            }

            let scb = core.registry.handle_to_scb(handle).unwrap();
            assert_eq!(scb.suspend_sup, case.suspend_sup, "{}", case.name);
            assert_eq!(scb.recfg_sup, case.recfg_sup, "{}", case.name);
            match core.state(handle) {
                Some(StreamState::Open) => {
                    let scb = core.registry.handle_to_scb(handle).unwrap();
                    assert_eq!(scb.config.codec, new_config().codec, "{}", case.name);
                    assert_eq!(scb.sep_info_idx, rcfg_idx, "{}", case.name);
                    assert!(scb.pending_cap.is_none(), "{}", case.name);
                    assert!(core.platform().events.contains(&AvEvent::Reconfig {
                        handle,
                        status: Ok(()),
                    }));
                }
                Some(StreamState::Init) => {
                    assert!(core.platform().events.contains(&AvEvent::Reconfig {
                        handle,
                        status: Err(AvError::Fail),
                    }));
                    let closed = AvEvent::Close { handle, peer: PEER };
                    assert!(core.platform().events.contains(&closed), "{}", case.name);
                }
                other => panic!("{} ended in {other:?}", case.name),
            }
        }
    }

    #[test]
    fn test_payloads_delivered_exactly_once() {
        let mut core = enabled_core(Features::PROTECT);
        let handle = register(&mut core, AvChannel::Audio);
        open_stream(&mut core, handle, PEER);
        core.platform_mut().clear();

        let before = ledger::counts();
        let channel = Channel::<NoopRawMutex, Envelope, 4>::new();
        let sender = crate::event::EventSender::new(&channel);
        let sizes = [0usize, 1, 64, 400];
        for &size in &sizes {
            let data = std::vec![size as u8; size];
            let protect = ProtectData {
                label: 0,
                err_code: 0,
                data: Blob::from_slice(&data).unwrap(),
            };
            assert!(sender.post(
                StreamEvent::ApiProtectReq,
                handle.raw(),
                EventData::Protect(protect)
            ));
        }
        while let Ok(envelope) = channel.try_receive() {
            core.handle(envelope);
        }
        assert!(channel.try_receive().is_err());

        let delivered: std::vec::Vec<usize> = core
            .platform()
            .commands
            .iter()
            .map(|command| match command {
                LowerCommand::SecurityRequest { data, .. } => {
                    assert!(data.as_slice().iter().all(|&byte| byte == data.len() as u8));
                    data.len()
                }
                other => panic!("unexpected command {other:?}"),
            })
            .collect();
        assert_eq!(delivered, sizes);

        core.platform_mut().clear();
        let after = ledger::counts();
        assert_eq!(after.0 - before.0, after.1 - before.1);
    }
}
