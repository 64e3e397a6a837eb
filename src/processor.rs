//! Processor Task - feeds queued envelopes into the AV core
//!
//! Two queues feed the core: [`API_CHANNEL`](crate::api) carries application requests and
//! [`SIGNAL_CHANNEL`](crate::SIGNAL_CHANNEL) carries indications and confirmations from the
//! transport glue. [`run`] waits on both and hands every envelope to
//! [`Core::handle`], which also drains any follow-up work before the next envelope is taken.
//!
//! # Usage
//!
//! Spawn the processor as an Embassy task owning the core:
//!
//! ```rust,no_run
//! use bondybird_av::{AvOptions, Core, Platform, processor};
//!
//! async fn av_task<P: Platform>(platform: P) -> ! {
//!     let mut core = Core::with_options(platform, AvOptions::default());
//!     processor::run(&mut core).await
//! }
//! ```
//!
//! Hosts without an executor can pump the queues with [`drain`] instead.

use crate::event::Envelope;
use crate::{API_CHANNEL, Core, Platform, SIGNAL_CHANNEL};
use embassy_futures::select::{Either, select};

/// Process envelopes from both queues forever
pub async fn run<P: Platform>(core: &mut Core<P>) -> ! {
    let api = API_CHANNEL.receiver();
    let signal = SIGNAL_CHANNEL.receiver();

    loop {
        debug!("[PROCESSOR] Waiting for event...");
        let envelope = match select(api.receive(), signal.receive()).await {
            Either::First(envelope) => {
                debug!("[PROCESSOR] API {:?}", envelope.tag);
                envelope
            }
            Either::Second(envelope) => {
                debug!("[PROCESSOR] Signal {:?}", envelope.tag);
                envelope
            }
        };
        core.handle(envelope);
    }
}

fn next_envelope() -> Option<Envelope> {
    API_CHANNEL
        .try_receive()
        .or_else(|_| SIGNAL_CHANNEL.try_receive())
        .ok()
}

/// Process every envelope queued right now; returns how many were handled
pub fn drain<P: Platform>(core: &mut Core<P>) -> usize {
    let mut handled = 0;
    while let Some(envelope) = next_envelope() {
        core.handle(envelope);
        handled += 1;
    }
    if handled > 0 {
        trace!("[PROCESSOR] Drained {} events", handled);
    }
    handled
}
