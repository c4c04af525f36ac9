use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use iq_slurper::{
    block::samples_from_bytes,
    monitoring::{DisplayConfig, FrequencyAxis},
    radio::{DeviceLimits, Radio, RadioError, ReadStatus},
    Field, HardwareError, Pipeline, PipelineConfig, PipelineError, PipelineEvent, Sample,
    TuningError, TuningParameters,
};
use tempfile::TempDir;

const BLOCK: usize = 256;

/// A radio whose samples come from the test, one block per message
struct ScriptedRadio {
    limits: DeviceLimits,
    feed: Receiver<Vec<Sample>>,
    active: bool,
    unplugged: Arc<AtomicBool>,
}

impl ScriptedRadio {
    fn new() -> (Self, Sender<Vec<Sample>>, Arc<AtomicBool>) {
        let (tx, feed) = unbounded();
        let unplugged = Arc::new(AtomicBool::new(false));
        let radio = Self {
            limits: DeviceLimits::default(),
            feed,
            active: false,
            unplugged: unplugged.clone(),
        };
        (radio, tx, unplugged)
    }

    fn check(&self) -> Result<(), RadioError> {
        if self.unplugged.load(Ordering::Acquire) {
            Err(RadioError::Disconnected("scripted".into()))
        } else {
            Ok(())
        }
    }
}

impl Radio for ScriptedRadio {
    fn name(&self) -> &str {
        "scripted"
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn set_antenna(&mut self, _antenna: &str) -> Result<(), RadioError> {
        self.check()
    }

    fn set_gain(&mut self, _gain_db: f64) -> Result<(), RadioError> {
        self.check()
    }

    fn set_frequency(&mut self, _hz: f64) -> Result<(), RadioError> {
        self.check()
    }

    fn set_sample_rate(&mut self, _hz: f64) -> Result<(), RadioError> {
        self.check()
    }

    fn activate(&mut self) -> Result<(), RadioError> {
        self.active = true;
        self.check()
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    fn read(&mut self, buf: &mut [Sample], timeout: Duration) -> Result<ReadStatus, RadioError> {
        self.check()?;
        match self.feed.recv_timeout(timeout) {
            Ok(samples) => {
                let n = samples.len().min(buf.len());
                buf[..n].copy_from_slice(&samples[..n]);
                Ok(ReadStatus::Samples(n))
            }
            Err(RecvTimeoutError::Timeout) => Ok(ReadStatus::Samples(0)),
            Err(RecvTimeoutError::Disconnected) => Ok(ReadStatus::Exhausted),
        }
    }
}

fn block(k: usize) -> Vec<Sample> {
    (0..BLOCK).map(|i| Sample::new(k as f32, i as f32)).collect()
}

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        tuning: TuningParameters {
            center_frequency_hz: 868e6,
            gain_db: 20.0,
            sample_rate_hz: 1e6,
            antenna: "RX2".into(),
        },
        destination: dir.path().join("recv_spls.bin"),
        display: DisplayConfig {
            fft_size: BLOCK,
            min_interval: Duration::from_millis(100),
            ..Default::default()
        },
        queue_capacity: 64,
        block_len: BLOCK,
        read_timeout: Duration::from_millis(10),
        reply_timeout: Duration::from_secs(2),
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

/// Wait until the file sink has taken `n` blocks off its queue
fn wait_written(pipeline: &Pipeline, n: u64) {
    wait_until("file sink to drain", || {
        pipeline
            .queue_stats()
            .iter()
            .any(|q| q.name == "exfil" && q.delivered == n && q.queued == 0)
    });
}

fn read_samples(path: &Path) -> Vec<Sample> {
    samples_from_bytes(&std::fs::read(path).unwrap())
}

#[test]
fn capture_retune_and_record() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let out = cfg.destination.clone();
    let (radio, feed, _) = ScriptedRadio::new();
    let pipeline = Pipeline::start(Box::new(radio), cfg).unwrap();
    let view = pipeline.spectrum();

    for k in 0..10 {
        feed.send(block(k)).unwrap();
    }
    let first = view.wait_newer(0, Duration::from_secs(2)).unwrap();
    assert_eq!(first.frequency_axis, FrequencyAxis { start_hz: 0.0, end_hz: 1e6 });
    wait_written(&pipeline, 10);
    assert_eq!(view.published(), 1);

    let applied = pipeline.tuning().set_sample_rate(2e6).unwrap();
    assert_eq!(applied.sample_rate_hz, 2e6);
    assert_eq!(pipeline.tuning().sample_rate(), 2e6);

    // Let the hold-off run out, then feed a block at the new rate
    thread::sleep(Duration::from_millis(120));
    feed.send(block(10)).unwrap();
    let second = view.wait_newer(1, Duration::from_secs(2)).unwrap();
    assert_eq!(second.frequency_axis, FrequencyAxis { start_hz: 0.0, end_hz: 2e6 });

    wait_written(&pipeline, 11);
    let report = pipeline.stop().unwrap();
    assert_eq!(report.blocks, 11);
    assert_eq!(report.retunes, 1);

    let written = read_samples(&out);
    let expected: Vec<Sample> = (0..11).flat_map(block).collect();
    assert_eq!(written, expected);
    assert!(view.is_closed());
}

#[test]
fn rejected_gain_keeps_previous_value() {
    let dir = TempDir::new().unwrap();
    let (radio, _feed, _) = ScriptedRadio::new();
    let pipeline = Pipeline::start(Box::new(radio), config(&dir)).unwrap();
    let tuning = pipeline.tuning();

    assert_eq!(tuning.set_gain(-5.0), Err(TuningError::Rejected(Field::Gain)));
    assert_eq!(tuning.set_gain(200.0), Err(TuningError::Rejected(Field::Gain)));
    assert_eq!(tuning.gain(), 20.0);

    let p = tuning.set_gain(42.0).unwrap();
    assert_eq!(p.gain_db, 42.0);
    assert_eq!(p.center_frequency_hz, 868e6);
    pipeline.stop().unwrap();
}

#[test]
fn redirect_to_same_path_keeps_only_later_samples() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let out = cfg.destination.clone();
    let (radio, feed, _) = ScriptedRadio::new();
    let pipeline = Pipeline::start(Box::new(radio), cfg).unwrap();

    feed.send(block(0)).unwrap();
    wait_written(&pipeline, 1);
    pipeline.set_destination(&out).unwrap();
    feed.send(block(1)).unwrap();
    wait_written(&pipeline, 2);
    pipeline.set_destination(&out).unwrap();
    feed.send(block(2)).unwrap();
    feed.send(block(3)).unwrap();
    wait_written(&pipeline, 4);
    pipeline.stop().unwrap();

    let expected: Vec<Sample> = (2..4).flat_map(block).collect();
    assert_eq!(read_samples(&out), expected);
}

#[test]
fn storage_failure_does_not_stop_the_spectrum() {
    let dir = TempDir::new().unwrap();
    let (radio, feed, _) = ScriptedRadio::new();
    let pipeline = Pipeline::start(Box::new(radio), config(&dir)).unwrap();
    let view = pipeline.spectrum();

    feed.send(block(0)).unwrap();
    view.wait_newer(0, Duration::from_secs(2)).unwrap();

    // A directory is not a writable file
    let err = pipeline.set_destination(dir.path()).unwrap_err();
    assert!(matches!(err, PipelineError::Sink(_)));
    let event = pipeline.events().recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(event, PipelineEvent::SinkFailed { .. }));

    thread::sleep(Duration::from_millis(120));
    feed.send(block(1)).unwrap();
    assert!(view.wait_newer(1, Duration::from_secs(2)).is_some());
    assert!(pipeline.is_running());
    // Block 1 went to the halted sink and was discarded
    wait_written(&pipeline, 2);

    let resumed = dir.path().join("resumed.bin");
    pipeline.set_destination(&resumed).unwrap();
    assert_eq!(
        pipeline.events().recv_timeout(Duration::from_secs(1)).unwrap(),
        PipelineEvent::SinkResumed { path: resumed.clone() }
    );
    feed.send(block(2)).unwrap();
    wait_written(&pipeline, 3);
    pipeline.stop().unwrap();
    assert_eq!(read_samples(&resumed), block(2));
}

#[test]
fn lost_radio_ends_the_run() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let out = cfg.destination.clone();
    let (radio, feed, unplug) = ScriptedRadio::new();
    let pipeline = Pipeline::start(Box::new(radio), cfg).unwrap();

    feed.send(block(0)).unwrap();
    wait_written(&pipeline, 1);
    unplug.store(true, Ordering::Release);

    let event = pipeline.events().recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(
        event,
        PipelineEvent::HardwareFailure(HardwareError::Disconnected(_))
    ));
    let view = pipeline.spectrum();
    let result = pipeline.wait();
    assert!(matches!(result, Err(HardwareError::Disconnected(_))));
    assert!(view.is_closed());
    // Whatever made it in before the failure is on disk
    assert_eq!(read_samples(&out), block(0));
}

#[test]
fn end_of_source_is_a_clean_finish() {
    let dir = TempDir::new().unwrap();
    let (radio, feed, _) = ScriptedRadio::new();
    let pipeline = Pipeline::start(Box::new(radio), config(&dir)).unwrap();
    feed.send(block(0)).unwrap();
    drop(feed);
    let report = pipeline.wait().unwrap();
    assert_eq!(report.blocks, 1);
}
