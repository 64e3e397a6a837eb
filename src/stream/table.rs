//! Stream transition table
//!
//! One row per [`StreamState`], one column per [`StreamEvent`]. Rows start out as "ignore,
//! stay put" and only the cells that do something are spelled out below.

use super::{StreamAction as A, StreamState as S};
use crate::event::StreamEvent as E;

/// One cell: actions to run and the state committed before they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub actions: &'static [A],
    pub next: S,
}

const fn to(actions: &'static [A], next: S) -> Transition {
    Transition { actions, next }
}

const fn row(state: S, cells: &[(E, Transition)]) -> [Transition; E::COUNT] {
    let mut row = [to(&[], state); E::COUNT];
    let mut i = 0;
    while i < cells.len() {
        row[cells[i].0.index()] = cells[i].1;
        i += 1;
    }
    row
}

const INIT: &[(E, Transition)] = &[
    (E::ApOpen, to(&[A::DoDisc], S::Opening)),
    (E::SdpDiscOk, to(&[A::FreeSdb], S::Init)),
    (E::SdpDiscFail, to(&[A::FreeSdb], S::Init)),
    (E::StrConfigInd, to(&[A::ConfigInd], S::Incoming)),
    (E::StrSecurityInd, to(&[A::SecurityInd], S::Init)),
    (E::AcpConnect, to(&[], S::Incoming)),
];

const INCOMING: &[(E, Transition)] = &[
    (E::ApOpen, to(&[A::OpenAtInc], S::Incoming)),
    (E::ApClose, to(&[A::CcoClose, A::DisconnectReq], S::Closing)),
    (E::ApiProtectReq, to(&[A::SecurityReq], S::Incoming)),
    (E::ApiProtectRsp, to(&[A::SecurityRsp], S::Incoming)),
    (E::CiSetconfigOk, to(&[A::SetconfigRsp, A::StRcTimer], S::Incoming)),
    (E::CiSetconfigFail, to(&[A::SetconfigRej, A::Cleanup], S::Init)),
    (E::SdpDiscOk, to(&[A::FreeSdb], S::Incoming)),
    (E::SdpDiscFail, to(&[A::FreeSdb], S::Incoming)),
    (E::StrDiscOk, to(&[A::DiscResAsAcp], S::Incoming)),
    (E::StrGetcapOk, to(&[A::SaveCaps], S::Incoming)),
    (E::StrOpenOk, to(&[A::StrOpened], S::Open)),
    (E::StrOpenFail, to(&[], S::Closing)),
    (E::StrClose, to(&[A::CcoClose, A::Cleanup], S::Init)),
    (E::StrConfigInd, to(&[A::ConfigInd], S::Incoming)),
    (E::StrSecurityInd, to(&[A::SecurityInd], S::Incoming)),
    (E::StrSecurityCfm, to(&[A::SecurityCfm], S::Incoming)),
    (E::AvdtDisconnect, to(&[A::CcoClose, A::DisconnectReq], S::Closing)),
    (E::AvdtDelayRpt, to(&[A::DelayCo], S::Incoming)),
];

const OPENING: &[(E, Transition)] = &[
    (E::ApClose, to(&[A::DoClose], S::Closing)),
    (E::ApiProtectReq, to(&[A::SecurityReq], S::Opening)),
    (E::ApiProtectRsp, to(&[A::SecurityRsp], S::Opening)),
    (E::CiSetconfigOk, to(&[A::SetconfigRsp, A::StRcTimer], S::Opening)),
    (E::CiSetconfigFail, to(&[A::SetconfigRej, A::Cleanup], S::Init)),
    (E::SdpDiscOk, to(&[A::ConnectReq], S::Opening)),
    (E::SdpDiscFail, to(&[A::OpenFailSdp, A::Cleanup], S::Init)),
    (E::StrDiscOk, to(&[A::DiscResults], S::Opening)),
    (E::StrDiscFail, to(&[A::OpenFailed], S::Closing)),
    (E::StrGetcapOk, to(&[A::GetcapResults], S::Opening)),
    (E::StrGetcapFail, to(&[A::OpenFailed], S::Closing)),
    (E::StrOpenOk, to(&[A::StRcTimer, A::StrOpened], S::Open)),
    (E::StrOpenFail, to(&[A::OpenFailed], S::Closing)),
    (E::StrConfigInd, to(&[A::ConfigInd], S::Incoming)),
    (E::StrSecurityInd, to(&[A::SecurityInd], S::Opening)),
    (E::StrSecurityCfm, to(&[A::SecurityCfm], S::Opening)),
    (E::AvrcTimer, to(&[A::SwitchRole], S::Opening)),
    (E::AvdtConnect, to(&[A::DiscoverReq], S::Opening)),
    (E::AvdtDisconnect, to(&[A::ConnFailed], S::Init)),
    (E::RoleChange, to(&[A::RoleRes], S::Opening)),
    (E::AvdtDelayRpt, to(&[A::DelayCo], S::Opening)),
];

const OPEN: &[(E, Transition)] = &[
    (E::ApClose, to(&[A::DoClose], S::Closing)),
    (E::ApStart, to(&[A::DoStart], S::Open)),
    (E::ApStop, to(&[A::StrStopped], S::Open)),
    (E::ApiReconfig, to(&[A::Reconfig], S::Reconfiguring)),
    (E::ApiProtectReq, to(&[A::SecurityReq], S::Open)),
    (E::ApiProtectRsp, to(&[A::SecurityRsp], S::Open)),
    (E::ApiRcOpen, to(&[A::SetUseRc, A::OpenRc], S::Open)),
    (E::SrcDataReady, to(&[A::DataPath], S::Open)),
    (E::SdpDiscOk, to(&[A::FreeSdb], S::Open)),
    (E::SdpDiscFail, to(&[A::FreeSdb], S::Open)),
    (E::StrGetcapOk, to(&[A::SaveCaps], S::Open)),
    (E::StrStartOk, to(&[A::StartOk], S::Open)),
    (E::StrStartFail, to(&[A::StartFailed], S::Open)),
    (E::StrClose, to(&[A::StrClosed], S::Init)),
    (E::StrConfigInd, to(&[A::SetconfigRej], S::Open)),
    (E::StrSecurityInd, to(&[A::SecurityInd], S::Open)),
    (E::StrSecurityCfm, to(&[A::SecurityCfm], S::Open)),
    (E::StrWriteCfm, to(&[A::ClrCong, A::DataPath], S::Open)),
    (E::StrSuspendCfm, to(&[A::SuspendCfm], S::Open)),
    (E::AvrcTimer, to(&[A::OpenRc, A::Chk2ndStart], S::Open)),
    (E::AvdtDisconnect, to(&[A::StrClosed], S::Init)),
    (E::RoleChange, to(&[A::RoleRes], S::Open)),
    (E::AvdtDelayRpt, to(&[A::DelayCo], S::Open)),
    (E::ApiSetDelayValue, to(&[A::SetDelayValue], S::Open)),
];

const RECONFIGURING: &[(E, Transition)] = &[
    (E::ApClose, to(&[A::DisconnectReq], S::Closing)),
    (E::SdpDiscOk, to(&[A::FreeSdb], S::Reconfiguring)),
    (E::SdpDiscFail, to(&[A::FreeSdb], S::Reconfiguring)),
    (E::StrDiscOk, to(&[A::DiscResults], S::Reconfiguring)),
    (E::StrDiscFail, to(&[A::StrClosed], S::Init)),
    (E::StrGetcapOk, to(&[A::GetcapResults], S::Reconfiguring)),
    (E::StrGetcapFail, to(&[A::StrClosed], S::Init)),
    (E::StrOpenOk, to(&[A::RcfgStrOk], S::Open)),
    (E::StrOpenFail, to(&[A::RcfgFailed], S::Reconfiguring)),
    (E::StrClose, to(&[A::RcfgConnect], S::Reconfiguring)),
    (E::StrSecurityInd, to(&[A::SecurityRej], S::Reconfiguring)),
    (E::StrSuspendCfm, to(&[A::SuspendCont], S::Reconfiguring)),
    (E::StrReconfigCfm, to(&[A::RcfgCfm], S::Reconfiguring)),
    (E::AvdtConnect, to(&[A::RcfgOpen], S::Reconfiguring)),
    (E::AvdtDisconnect, to(&[A::RcfgDiscntd], S::Reconfiguring)),
    (E::AvdtDelayRpt, to(&[A::DelayCo], S::Reconfiguring)),
];

const CLOSING: &[(E, Transition)] = &[
    (E::ApClose, to(&[A::DisconnectReq], S::Closing)),
    (E::SdpDiscOk, to(&[A::SdpFailed], S::Init)),
    (E::SdpDiscFail, to(&[A::SdpFailed], S::Init)),
    (E::StrOpenOk, to(&[A::DoClose], S::Closing)),
    (E::StrOpenFail, to(&[A::DisconnectReq], S::Closing)),
    (E::StrClose, to(&[A::DisconnectReq], S::Closing)),
    (E::StrConfigInd, to(&[A::SetconfigRej], S::Closing)),
    (E::StrSecurityInd, to(&[A::SecurityRej], S::Closing)),
    (E::AvdtDisconnect, to(&[A::StrClosed], S::Init)),
];

/// Transition table indexed by `[state][event]`
pub(crate) static TABLE: [[Transition; E::COUNT]; S::COUNT] = [
    row(S::Init, INIT),
    row(S::Incoming, INCOMING),
    row(S::Opening, OPENING),
    row(S::Open, OPEN),
    row(S::Reconfiguring, RECONFIGURING),
    row(S::Closing, CLOSING),
];
