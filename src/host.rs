//! AV Core - single-owner dispatcher for the A2DP/AVRCP control blocks
//!
//! [`Core`] owns every stream, link and remote-control block. One task feeds it
//! [`Envelope`]s (see [`crate::processor`]); each envelope is routed by the class of its tag:
//!
//! 1. **System** events are handled here and in the `link` and `system` submodules
//! 2. **Stream** events run the per-stream state machine in [`crate::stream`]
//! 3. **Remote-control** events go to the RC handlers or to the cover-art machine
//!
//! Follow-up work an action schedules for itself (a re-posted open, a deregistration that
//! finished unwinding) is queued internally and drained before [`Core::handle`] returns, so
//! the platform never sees a half-processed event.
//!
//! Outbound effects are synchronous calls on the [`Platform`]: lower-layer commands, media
//! call-outs and application notifications. Timers are lower-layer commands as well; their
//! expiry arrives back as a [`SystemEvent::Timer`](crate::event::SystemEvent::Timer) envelope.

mod link;
mod system;

pub(crate) use link::{MULTI_LINK, ONE_LINK};

use crate::callout::{AvEvent, LowerCommand};
use crate::constants::{MAX_PENDING_EVENTS, MAX_STREAMS};
use crate::event::{Envelope, EventData, EventTag, MediaDataCallback, StreamEvent, TimerId};
use crate::registry::{Registry, StreamHandle};
use crate::stream::StreamState;
use crate::{AvOptions, Features, Platform};
use heapless::Deque;

/// Target of the one RC service discovery that may be outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub(crate) enum RcDiscoveryTarget {
    /// Discovery on behalf of the stream in this pool slot
    Stream(usize),
    /// Discovery for an RC channel without a stream
    Rc(u8),
}

/// A2DP/AVRCP connection and stream management core
///
/// Owns the control-block pools and runs every state machine. Not shared: exactly one task
/// drives a `Core`, and producers reach it through envelope channels.
///
/// ## Platform
///
/// `P` implements the three call-out seams at once:
/// - [`crate::LowerLayer`]: AVDTP, AVRCP, SDP, link and timer requests
/// - [`crate::MediaCallout`]: codec configuration and the media data path
/// - [`crate::AppCallback`]: application notifications
pub struct Core<P: Platform> {
    pub(crate) platform: P,
    pub(crate) options: AvOptions,
    pub(crate) registry: Registry,
    pending: Deque<Envelope, MAX_PENDING_EVENTS>,
    pub(crate) media_callbacks: [Option<MediaDataCallback>; MAX_STREAMS],
    pub(crate) features: Features,
    pub(crate) enabled: bool,
    pub(crate) disabling: bool,
    /// Registered audio streams, one bit per slot
    pub(crate) reg_audio: u8,
    pub(crate) reg_video: u8,
    /// Streams with an open transport, one bit per slot
    pub(crate) conn_audio: u8,
    pub(crate) conn_video: u8,
    /// Streams with media started, one bit per slot
    pub(crate) audio_streams: u8,
    pub(crate) video_streams: u8,
    pub(crate) audio_open_cnt: u8,
    /// Listening RC acceptor channel not tied to a link yet
    pub(crate) rc_acp_handle: Option<u8>,
    pub(crate) rc_disc_pending: Option<RcDiscoveryTarget>,
    /// Stream slot + 1 whose open waits on another link's role switch
    pub(crate) rs_idx: u8,
    /// Stream the acceptor signaling timer was armed for
    pub(crate) acp_sig_stream: Option<usize>,
}

impl<P: Platform> Core<P> {
    /// Create a core with default options
    #[must_use]
    pub fn new(platform: P) -> Self {
        Self::with_options(platform, AvOptions::default())
    }

    /// Create a core with explicit options
    #[must_use]
    pub fn with_options(platform: P, options: AvOptions) -> Self {
        Self {
            platform,
            options,
            registry: Registry::new(),
            pending: Deque::new(),
            media_callbacks: [None; MAX_STREAMS],
            features: Features::empty(),
            enabled: false,
            disabling: false,
            reg_audio: 0,
            reg_video: 0,
            conn_audio: 0,
            conn_video: 0,
            audio_streams: 0,
            video_streams: 0,
            audio_open_cnt: 0,
            rc_acp_handle: None,
            rc_disc_pending: None,
            rs_idx: 0,
            acp_sig_stream: None,
        }
    }

    /// Options the core runs with
    #[must_use]
    pub fn options(&self) -> &AvOptions {
        &self.options
    }

    /// Features enabled by the application
    #[must_use]
    pub fn features(&self) -> Features {
        self.features
    }

    /// Whether the core is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The platform behind the call-outs
    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Mutable access to the platform behind the call-outs
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Control-block pools, for inspection
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// State of a registered stream
    #[must_use]
    pub fn state(&self, handle: StreamHandle) -> Option<StreamState> {
        let index = self.registry.index_of(handle)?;
        self.registry.scb(index).map(|scb| scb.state)
    }

    /// Number of audio streams with an open transport
    #[must_use]
    pub fn audio_open_count(&self) -> u8 {
        self.audio_open_cnt
    }

    /// Process one envelope and everything it schedules
    pub fn handle(&mut self, envelope: Envelope) {
        self.dispatch(envelope);
        while let Some(next) = self.pending.pop_front() {
            self.dispatch(next);
        }
    }

    /// Deliver received media to the callback given at registration
    ///
    /// Called by the transport glue for sink streams; unknown handles are ignored.
    pub fn sink_data(&self, handle: StreamHandle, payload: &[u8]) {
        let callback = self
            .registry
            .index_of(handle)
            .and_then(|index| self.media_callbacks[index]);
        match callback {
            Some(callback) => callback(handle, payload),
            None => trace!("[CORE] No media sink for stream {}", handle.raw()),
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let Envelope {
            tag,
            handle,
            mut data,
        } = envelope;
        match tag {
            EventTag::System(event) => self.handle_system(event, handle, &mut data),
            EventTag::Stream(event) => {
                let stream = StreamHandle::from_raw(handle);
                match self.registry.index_of(stream) {
                    Some(index) => self.ssm_execute(index, event, &mut data),
                    None => warn!("[CORE] {:?} for unknown stream {}", event, handle),
                }
            }
            EventTag::Rc(event) => self.handle_rc(event, handle, &mut data),
        }
    }

    /// Queue follow-up work for this stream of envelopes
    pub(crate) fn post(&mut self, envelope: Envelope) {
        if let Err(dropped) = self.pending.push_back(envelope) {
            warn!(
                "[CORE] Follow-up queue full, dropping {:?}",
                defmt::Debug2Format(&dropped.tag)
            );
        }
    }

    pub(crate) fn send(&mut self, command: LowerCommand) {
        trace!("[CORE] -> {:?}", defmt::Debug2Format(&command));
        self.platform.send(command);
    }

    pub(crate) fn notify(&mut self, event: AvEvent) {
        debug!("[CORE] Event {:?}", defmt::Debug2Format(&event));
        self.platform.on_event(event);
    }

    pub(crate) fn start_timer(&mut self, timer: TimerId, duration_ms: u32) {
        self.send(LowerCommand::StartTimer { timer, duration_ms });
    }

    pub(crate) fn stop_timer(&mut self, timer: TimerId) {
        self.send(LowerCommand::StopTimer { timer });
    }

    /// Arm the stream's own timer; expiry runs `event` on the stream
    pub(crate) fn start_stream_timer(
        &mut self,
        index: usize,
        event: StreamEvent,
        duration_ms: u32,
    ) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        scb.timer_event = Some(event);
        let handle = scb.handle;
        self.start_timer(TimerId::Stream(handle), duration_ms);
    }

    pub(crate) fn stop_stream_timer(&mut self, index: usize) {
        let Some(scb) = self.registry.scb_mut(index) else {
            return;
        };
        if scb.timer_event.take().is_some() {
            let handle = scb.handle;
            self.stop_timer(TimerId::Stream(handle));
        }
    }

    fn stream_timer_expired(&mut self, handle: StreamHandle) {
        let Some(index) = self.registry.index_of(handle) else {
            return;
        };
        let event = self
            .registry
            .scb_mut(index)
            .and_then(|scb| scb.timer_event.take());
        match event {
            Some(event) => self.ssm_execute(index, event, &mut EventData::None),
            None => debug!("[CORE] Stale timer for stream {}", handle.raw()),
        }
    }
}
