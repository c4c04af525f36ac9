//! The pipeline context: one capture thread feeding the file sink and the
//! spectrum sink, plus the handles the operator shell is allowed to use.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::{
    capture::{capture, CaptureReport},
    error::{HardwareError, PipelineError, TuningError},
    exfil::{file_consumer, FileSink, SinkCommand},
    fanout::{Fanout, FanoutStats, QueueStats},
    monitoring::{spectrum_consumer, DisplayConfig, SpectrumSink, SpectrumView},
    radio::Radio,
    source::SampleSource,
    tuning::{TuningChange, TuningController, TuningParameters},
};

/// Things the operator needs to hear about
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The radio is gone and the run is over
    HardwareFailure(HardwareError),
    /// The file sink stopped writing; the spectrum keeps going
    SinkFailed { path: PathBuf, error: String },
    /// The file sink is writing again after a failure
    SinkResumed { path: PathBuf },
    /// The source ended without error
    EndOfStream,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tuning: TuningParameters,
    pub destination: PathBuf,
    pub display: DisplayConfig,
    /// Per-consumer queue length in blocks
    pub queue_capacity: usize,
    /// Samples per block
    pub block_len: usize,
    /// Longest the capture thread waits on the radio before checking for
    /// retunes and stop requests
    pub read_timeout: Duration,
    /// Longest a retune waits for the capture thread's answer
    pub reply_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tuning: TuningParameters::default(),
            destination: PathBuf::from(crate::DEFAULT_FILENAME),
            display: DisplayConfig::default(),
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            block_len: crate::DEFAULT_BLOCK_LEN,
            read_timeout: Duration::from_millis(50),
            reply_timeout: Duration::from_secs(2),
        }
    }
}

fn spawn<T, F>(name: &'static str, f: F) -> Result<JoinHandle<T>, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .map_err(|source| PipelineError::Spawn { name, source })
}

type CaptureResult = Result<CaptureReport, HardwareError>;

pub struct Pipeline {
    tuning: TuningController,
    sink_commands: Sender<SinkCommand>,
    spectrum: SpectrumView,
    stats: FanoutStats,
    events: Receiver<PipelineEvent>,
    running: Arc<AtomicBool>,
    capture: Option<JoinHandle<CaptureResult>>,
    consumers: Vec<JoinHandle<()>>,
    outcome: Option<CaptureResult>,
}

impl Pipeline {
    /// Configure `radio`, open the output file and start all threads
    pub fn start(radio: Box<dyn Radio>, config: PipelineConfig) -> Result<Self, PipelineError> {
        let mut source = SampleSource::new(radio, config.block_len, config.read_timeout);
        source.configure(&config.tuning)?;
        let file_sink = FileSink::create(&config.destination)?;

        let mut fanout = Fanout::new();
        let file_sub = fanout.subscribe("exfil", config.queue_capacity);
        let spectrum_sub = fanout.subscribe("spectrum", config.queue_capacity);
        let stats = fanout.stats();

        let spectrum_sink = SpectrumSink::new(config.display.clone());
        let spectrum = spectrum_sink.view();
        let (tuning, requests) = TuningController::new(config.tuning.clone(), config.reply_timeout);
        let (sink_commands, command_rx) = unbounded();
        let (event_tx, events) = unbounded();
        let running = Arc::new(AtomicBool::new(true));

        let mut consumers = Vec::with_capacity(2);
        {
            let event_tx = event_tx.clone();
            consumers.push(spawn("exfil", move || {
                file_consumer(file_sub, file_sink, command_rx, event_tx)
            })?);
        }
        consumers.push(spawn("spectrum", move || {
            spectrum_consumer(spectrum_sub, spectrum_sink)
        })?);
        // The radio is activated by the capture thread itself, so a failed
        // spawn never leaves it streaming
        let capture = {
            let running = running.clone();
            spawn("capture", move || {
                capture(source, fanout, requests, running, event_tx)
            })?
        };

        info!(
            tuning = ?config.tuning,
            destination = %config.destination.display(),
            "pipeline running"
        );
        Ok(Self {
            tuning,
            sink_commands,
            spectrum,
            stats,
            events,
            running,
            capture: Some(capture),
            consumers,
            outcome: None,
        })
    }

    pub fn tuning(&self) -> &TuningController {
        &self.tuning
    }

    /// Retune one field on the live radio
    pub fn apply_tuning(&self, change: TuningChange) -> Result<TuningParameters, TuningError> {
        self.tuning.apply(change)
    }

    /// Point the file sink at a new file. Blocks already written stay where
    /// they are.
    pub fn set_destination(&self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let (reply, verdict) = bounded(1);
        self.sink_commands
            .send(SinkCommand::SetDestination {
                path: path.as_ref().to_path_buf(),
                reply,
            })
            .map_err(|_| PipelineError::SinkGone)?;
        match verdict.recv() {
            Ok(result) => result.map_err(PipelineError::from),
            Err(_) => Err(PipelineError::SinkGone),
        }
    }

    pub fn spectrum(&self) -> SpectrumView {
        self.spectrum.clone()
    }

    pub fn queue_stats(&self) -> Vec<QueueStats> {
        self.stats.snapshot()
    }

    pub fn events(&self) -> &Receiver<PipelineEvent> {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the capture and wait for every thread to wind down
    pub fn stop(mut self) -> CaptureResult {
        self.running.store(false, Ordering::Release);
        self.join()
    }

    /// Wait for the source to end on its own (end of file, lost radio)
    pub fn wait(mut self) -> CaptureResult {
        self.join()
    }

    fn join(&mut self) -> CaptureResult {
        if let Some(handle) = self.capture.take() {
            let result = handle.join().unwrap_or_else(|_| {
                Err(HardwareError::Disconnected("capture thread panicked".to_owned()))
            });
            for consumer in self.consumers.drain(..) {
                if consumer.join().is_err() {
                    warn!("consumer thread panicked");
                }
            }
            self.outcome = Some(result);
        }
        self.outcome.clone().unwrap_or(Ok(CaptureReport::default()))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.join();
    }
}
