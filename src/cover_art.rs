//! AVRCP cover art over OBEX
//!
//! Each RC channel carries one cover-art session with its own small state machine. The
//! transport (GOEP/L2CAP) and the OBEX session are set up in two steps; images are fetched
//! with GET, and every response chunk is handed to the application as it arrives.
//!
//! | State        | Meaning                                    |
//! |--------------|--------------------------------------------|
//! | `Init`       | No session                                 |
//! | `Opening`    | Transport connect requested                |
//! | `Connecting` | OBEX connect requested                     |
//! | `Connected`  | Ready for a GET                            |
//! | `Getting`    | GET in progress                            |
//! | `Closing`    | Transport disconnect requested             |

use crate::callout::{AvEvent, LowerCommand};
use crate::constants::COVER_ART_OBEX_MTU;
use crate::event::{CoverArtData, EventData};
use crate::{Core, Features, Platform};

/// State of a cover-art session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum CaState {
    /// No session
    #[default]
    Init,
    /// Transport connect requested
    Opening,
    /// OBEX connect requested
    Connecting,
    /// Session ready
    Connected,
    /// Image transfer in progress
    Getting,
    /// Transport disconnect requested
    Closing,
}

impl CaState {
    /// Number of states
    pub const COUNT: usize = 6;

    /// All states in table row order
    pub const ALL: [Self; Self::COUNT] = [
        Self::Init,
        Self::Opening,
        Self::Connecting,
        Self::Connected,
        Self::Getting,
        Self::Closing,
    ];
}

/// Events of the cover-art machine, in table column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum CaEvent {
    /// Application opens the session
    ApiOpen,
    /// Application closes the session
    ApiClose,
    /// Application requests an image
    ApiGet,
    /// Transport connected
    GoepConnected,
    /// Transport disconnected
    GoepDisconnected,
    /// OBEX connect accepted
    ObexConnected,
    /// OBEX connect refused
    ObexConnectFailed,
    /// Non-final GET response
    Response,
    /// Final GET response
    ResponseFinal,
}

impl CaEvent {
    /// Number of events
    pub const COUNT: usize = 9;

    /// All events in table column order
    pub const ALL: [Self; Self::COUNT] = [
        Self::ApiOpen,
        Self::ApiClose,
        Self::ApiGet,
        Self::GoepConnected,
        Self::GoepDisconnected,
        Self::ObexConnected,
        Self::ObexConnectFailed,
        Self::Response,
        Self::ResponseFinal,
    ];
}

/// Work a cover-art cell can schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
enum CaAction {
    Open,
    ObexConnect,
    Connected,
    Get,
    GetRejected,
    Data,
    DataFinal,
    Disconnect,
    ForceDisconnect,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CaTransition {
    action: Option<CaAction>,
    next: CaState,
}

const fn to(action: CaAction, next: CaState) -> CaTransition {
    CaTransition {
        action: Some(action),
        next,
    }
}

const fn row(state: CaState, cells: &[(CaEvent, CaTransition)]) -> [CaTransition; CaEvent::COUNT] {
    let mut row = [CaTransition {
        action: None,
        next: state,
    }; CaEvent::COUNT];
    let mut i = 0;
    while i < cells.len() {
        row[cells[i].0 as usize] = cells[i].1;
        i += 1;
    }
    row
}

use CaAction as A;
use CaEvent as E;
use CaState as S;

static TABLE: [[CaTransition; CaEvent::COUNT]; CaState::COUNT] = [
    row(
        S::Init,
        &[
            (E::ApiOpen, to(A::Open, S::Opening)),
            (E::ApiGet, to(A::GetRejected, S::Init)),
        ],
    ),
    row(
        S::Opening,
        &[
            (E::ApiClose, to(A::ForceDisconnect, S::Init)),
            (E::ApiGet, to(A::GetRejected, S::Opening)),
            (E::GoepConnected, to(A::ObexConnect, S::Connecting)),
            (E::GoepDisconnected, to(A::Closed, S::Init)),
        ],
    ),
    row(
        S::Connecting,
        &[
            (E::ApiClose, to(A::ForceDisconnect, S::Init)),
            (E::ApiGet, to(A::GetRejected, S::Connecting)),
            (E::GoepDisconnected, to(A::Closed, S::Init)),
            (E::ObexConnected, to(A::Connected, S::Connected)),
            (E::ObexConnectFailed, to(A::Disconnect, S::Closing)),
        ],
    ),
    row(
        S::Connected,
        &[
            (E::ApiClose, to(A::ForceDisconnect, S::Init)),
            (E::ApiGet, to(A::Get, S::Getting)),
            (E::GoepDisconnected, to(A::Closed, S::Init)),
        ],
    ),
    row(
        S::Getting,
        &[
            (E::ApiClose, to(A::ForceDisconnect, S::Init)),
            (E::ApiGet, to(A::GetRejected, S::Getting)),
            (E::GoepDisconnected, to(A::Closed, S::Init)),
            (E::Response, to(A::Data, S::Getting)),
            (E::ResponseFinal, to(A::DataFinal, S::Connected)),
        ],
    ),
    row(
        S::Closing,
        &[
            (E::ApiClose, to(A::ForceDisconnect, S::Init)),
            (E::ApiGet, to(A::GetRejected, S::Closing)),
            (E::GoepDisconnected, to(A::Closed, S::Init)),
        ],
    ),
];

/// Cover-art session of one RC channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverArtSession {
    /// Machine state
    pub state: CaState,
    /// OBEX connection id
    pub connection_id: u32,
    /// OBEX packet size offered by this side
    pub obex_mtu: u16,
    /// Transport MTU of the peer
    pub peer_mtu: u16,
    /// Peer cover-art PSM from RC discovery, 0 if not advertised
    pub psm: u16,
}

impl CoverArtSession {
    /// An idle session without a known PSM
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: CaState::Init,
            connection_id: 0,
            obex_mtu: 0,
            peer_mtu: 0,
            psm: 0,
        }
    }

    /// Forget the session but keep the discovered PSM
    fn reset(&mut self) {
        *self = Self {
            psm: self.psm,
            ..Self::new()
        };
    }
}

impl Default for CoverArtSession {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> Core<P> {
    /// Run one event through the cover-art machine of an RC channel
    pub(crate) fn ca_execute(&mut self, rc_handle: u8, event: CaEvent, data: &mut EventData) {
        if !self.features.contains(Features::COVER_ART) {
            warn!("[CA] Cover art not enabled, dropping {:?}", event);
            return;
        }
        let Some(rcb) = self.registry.rcb_mut(rc_handle) else {
            warn!("[CA] {:?} for unknown RC handle {}", event, rc_handle);
            return;
        };
        let state = rcb.cover_art.state;
        let cell = TABLE[state as usize][event as usize];
        rcb.cover_art.state = cell.next;
        debug!("[CA] RC {} {:?}: {:?} -> {:?}", rc_handle, event, state, cell.next);

        if let Some(action) = cell.action {
            self.ca_action(rc_handle, action, data);
        }
    }

    /// Tear the session down when its RC channel goes away
    pub(crate) fn ca_reset(&mut self, rc_handle: u8) {
        let active = self
            .registry
            .rcb(rc_handle)
            .is_some_and(|rcb| rcb.cover_art.state != CaState::Init);
        if active {
            self.ca_action(rc_handle, CaAction::ForceDisconnect, &mut EventData::None);
        }
    }

    fn ca_action(&mut self, rc_handle: u8, action: CaAction, data: &mut EventData) {
        trace!("[CA] Action {:?}", action);
        let Some(rcb) = self.registry.rcb_mut(rc_handle) else {
            return;
        };
        let (shdl, lidx) = (rcb.shdl, rcb.lidx);
        let session = &mut rcb.cover_art;

        match action {
            CaAction::Open => {
                session.obex_mtu = match data {
                    EventData::CoverArt(CoverArtData::Open { mtu }) if *mtu != 0 => *mtu,
                    _ => COVER_ART_OBEX_MTU,
                };
                let psm = session.psm;
                let peer = match usize::from(shdl).checked_sub(1) {
                    Some(index) => self.registry.scb(index).map(|scb| scb.peer),
                    None => self
                        .registry
                        .lcb_by_lidx(lidx)
                        .filter(|lcb| lcb.in_use)
                        .map(|lcb| lcb.peer),
                };
                match peer.filter(|peer| psm != 0 && !peer.is_zero()) {
                    Some(peer) => self.send(LowerCommand::GoepConnect {
                        rc_handle,
                        peer,
                        psm,
                    }),
                    None => {
                        debug!("[CA] Peer has no cover-art service");
                        if let Some(rcb) = self.registry.rcb_mut(rc_handle) {
                            rcb.cover_art.reset();
                        }
                        self.notify(AvEvent::CoverArtClosed { rc_handle });
                    }
                }
            }
            CaAction::ObexConnect => {
                if let EventData::CoverArt(CoverArtData::Transport { mtu }) = data {
                    session.peer_mtu = *mtu;
                }
                if session.obex_mtu == 0 {
                    session.obex_mtu = COVER_ART_OBEX_MTU;
                }
                let mtu = session.obex_mtu;
                self.send(LowerCommand::ObexConnect { rc_handle, mtu });
            }
            CaAction::Connected => {
                if let EventData::CoverArt(CoverArtData::Session { connection_id }) = data {
                    session.connection_id = *connection_id;
                }
                info!("[CA] Session {} ready", rc_handle);
                self.notify(AvEvent::CoverArtConnected { rc_handle });
            }
            CaAction::Get => {
                let connection_id = session.connection_id;
                match core::mem::take(data) {
                    EventData::CoverArt(CoverArtData::Get { image_handle, kind }) => {
                        self.send(LowerCommand::ObexGet {
                            rc_handle,
                            connection_id,
                            image_handle,
                            kind,
                        });
                    }
                    _ => {
                        // Nothing to fetch; the session stays usable.
                        session.state = CaState::Connected;
                        self.notify(AvEvent::CoverArtGetFailed { rc_handle });
                    }
                }
            }
            CaAction::GetRejected => self.notify(AvEvent::CoverArtGetFailed { rc_handle }),
            CaAction::Data | CaAction::DataFinal => {
                let body = match data {
                    EventData::CoverArt(CoverArtData::Body(body)) => core::mem::take(body),
                    _ => crate::event::Blob::new(),
                };
                self.notify(AvEvent::CoverArtData {
                    rc_handle,
                    data: body,
                    last: action == CaAction::DataFinal,
                });
            }
            CaAction::Disconnect => self.send(LowerCommand::GoepDisconnect { rc_handle }),
            CaAction::ForceDisconnect => {
                session.reset();
                self.send(LowerCommand::GoepDisconnect { rc_handle });
                self.notify(AvEvent::CoverArtClosed { rc_handle });
            }
            CaAction::Closed => {
                session.reset();
                self.notify(AvEvent::CoverArtClosed { rc_handle });
            }
        }
    }
}
