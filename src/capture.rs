//! This module contains all the capture logic

// The capture thread does one thing, as fast as it can: pull blocks off the
// radio and hand them to the fan-out. Retune requests are serviced between
// reads, so the radio is only ever touched from this thread.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info};

use crate::{
    error::{HardwareError, TuningError},
    fanout::Fanout,
    pipeline::PipelineEvent,
    source::SampleSource,
    tuning::RetuneRequest,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub blocks: u64,
    pub samples: u64,
    pub retunes: u64,
}

/// Apply every queued retune. Only a lost radio is an error here; rejected
/// values go back to whoever asked.
fn service_requests(
    source: &mut SampleSource,
    requests: &Receiver<RetuneRequest>,
    report: &mut CaptureReport,
) -> Result<(), HardwareError> {
    while let Ok(req) = requests.try_recv() {
        let verdict = source.retune(&req.change);
        debug!(change = ?req.change, ok = verdict.is_ok(), "retune serviced");
        if verdict.is_ok() {
            report.retunes += 1;
        }
        let fatal = match &verdict {
            Err(TuningError::Hardware(e @ HardwareError::Disconnected(_))) => Some(e.clone()),
            _ => None,
        };
        // The operator may have given up waiting, that's fine
        let _ = req.reply.send(verdict);
        if let Some(e) = fatal {
            return Err(e);
        }
    }
    Ok(())
}

/// Capture thread body. Starts `source` if it isn't running yet.
///
/// Runs until `running` is cleared, the radio runs dry, or the radio is
/// lost. Dropping the fan-out on the way out is what tells the consumers the
/// stream is over.
pub fn capture(
    mut source: SampleSource,
    fanout: Fanout,
    requests: Receiver<RetuneRequest>,
    running: Arc<AtomicBool>,
    events: Sender<PipelineEvent>,
) -> Result<CaptureReport, HardwareError> {
    let mut report = CaptureReport::default();
    let result = if let Err(e) = source.start() {
        Err(e)
    } else {
        loop {
            if !running.load(Ordering::Acquire) {
                break Ok(());
            }
            if let Err(e) = service_requests(&mut source, &requests, &mut report) {
                break Err(e);
            }
            match source.next_block() {
                // Read timed out, go check for requests again
                Ok(Some(block)) if block.is_empty() => continue,
                Ok(Some(block)) => {
                    report.blocks += 1;
                    report.samples += block.len() as u64;
                    fanout.publish(block);
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        }
    };

    source.stop();
    drop(fanout);
    running.store(false, Ordering::Release);

    match result {
        Ok(()) => {
            info!(
                blocks = report.blocks,
                samples = report.samples,
                retunes = report.retunes,
                "capture finished"
            );
            let _ = events.send(PipelineEvent::EndOfStream);
            Ok(report)
        }
        Err(e) => {
            error!(error = %e, blocks = report.blocks, "capture aborted");
            let _ = events.send(PipelineEvent::HardwareFailure(e.clone()));
            Err(e)
        }
    }
}
