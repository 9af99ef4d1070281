use futures::SinkExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::MuxError;
use crate::multiplexer::Shared;
use crate::transport::OutboundSink;

/// Counts from one drain cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DrainReport {
    pub(crate) sent: usize,
    pub(crate) registered: usize,
    pub(crate) deferred: usize,
}

/// Run one pass over a snapshot of the pending queue.
///
/// Persistent requests are registered without sending. Untagged requests and
/// requests whose tag is free are claimed and sent one at a time. Everything
/// else is put back, in order, ahead of requests queued while the pass ran.
///
/// A send that fails or is cut short by `cancel` releases its claim, and it
/// goes back into the queue together with the rest of the snapshot.
pub(crate) async fn drain_cycle(
    shared: &Shared,
    sink: &mut OutboundSink,
    cancel: &CancellationToken,
) -> Result<DrainReport, MuxError> {
    let snapshot = shared.pending.lock().take_snapshot();
    if snapshot.is_empty() {
        return Ok(DrainReport::default());
    }

    let mut report = DrainReport::default();
    let mut deferred = Vec::new();
    let mut failure = None;
    let mut requests = snapshot.into_iter();

    while let Some(request) = requests.next() {
        if request.persistent {
            debug!("Adding listener {}", request.tag);
            let replaced = shared.active.lock().register(&request);
            if replaced.is_some_and(|entry| !entry.persistent) {
                warn!(
                    "Listener for {} replaced an outstanding request",
                    request.tag
                );
            }
            report.registered += 1;
            continue;
        }

        if !shared.active.lock().claim(&request) {
            deferred.push(request);
            continue;
        }

        let frame = request.payload.to_string();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            sent = sink.send(frame) => Some(sent),
        };
        match outcome {
            Some(Ok(())) => {
                debug!("Sending protocol, {}", request.payload);
                report.sent += 1;
            }
            interrupted => {
                shared.active.lock().release(&request);
                deferred.push(request);
                deferred.extend(requests.by_ref());
                match interrupted {
                    Some(Err(e)) => failure = Some(e),
                    _ => debug!("Drain cancelled with {} request(s) unsent", deferred.len()),
                }
                break;
            }
        }
    }

    report.deferred = deferred.len();
    shared.pending.lock().restore(deferred);
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(report),
    }
}

/// Drain the pending queue until cancelled, waking on enqueue and on freed tags.
pub(crate) async fn drain_loop(
    shared: std::sync::Arc<Shared>,
    mut sink: OutboundSink,
    cancel: CancellationToken,
) -> Result<(), MuxError> {
    info!("Starting request queue manager");

    let result = loop {
        match drain_cycle(&shared, &mut sink, &cancel).await {
            Ok(report) if report != DrainReport::default() => {
                debug!(
                    "Drain cycle: sent={} registered={} deferred={}",
                    report.sent, report.registered, report.deferred
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!("Request queue manager stopped: {}", e);
                break Err(e);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            _ = shared.wake.notified() => {}
        }
    };

    if let Err(e) = sink.close().await {
        debug!("Closing outbound half: {}", e);
    }
    debug!("Request queue manager ended");
    result
}
