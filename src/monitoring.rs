//! In this module, we implement the live spectrum the operator looks at.
//! The sink keeps the newest FFT window of samples, and at most once per
//! update interval turns it into a [`SpectrumSnapshot`] that renderers can
//! pick up through a [`SpectrumView`].

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace};

use crate::{
    block::{Sample, SampleBlock},
    error::MalformedInput,
    f_engine::SpectrumEngine,
    fanout::Subscription,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyAxis {
    pub start_hz: f64,
    pub end_hz: f64,
}

/// Display span for a given sample rate.
///
/// The span is baseband relative, so it does not move with the center
/// frequency.
pub fn frequency_axis(sample_rate_hz: f64) -> FrequencyAxis {
    FrequencyAxis {
        start_hz: 0.0,
        end_hz: sample_rate_hz,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeAxis {
    pub min_db: f32,
    pub max_db: f32,
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub fft_size: usize,
    pub min_interval: Duration,
    pub amplitude_axis: AmplitudeAxis,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            fft_size: crate::DEFAULT_FFT_SIZE,
            min_interval: crate::DEFAULT_UPDATE_INTERVAL,
            amplitude_axis: AmplitudeAxis {
                min_db: -140.0,
                max_db: 10.0,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpectrumSnapshot {
    /// Counts published snapshots, starting at 1
    pub sequence: u64,
    /// One value per FFT bin, DC first
    pub magnitudes_db: Vec<f32>,
    pub frequency_axis: FrequencyAxis,
    pub amplitude_axis: AmplitudeAxis,
    /// Center frequency of the samples, for labelling only
    pub center_frequency_hz: f64,
    pub timestamp: DateTime<Utc>,
}

impl SpectrumSnapshot {
    /// Strongest bin as (offset from the start of the axis in Hz, dB)
    pub fn peak(&self) -> Option<(f64, f32)> {
        let bins = self.magnitudes_db.len();
        let (idx, db) = self
            .magnitudes_db
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        let span = self.frequency_axis.end_hz - self.frequency_axis.start_hz;
        Some((self.frequency_axis.start_hz + span * idx as f64 / bins as f64, db))
    }
}

#[derive(Default)]
struct Latest {
    published: u64,
    snapshot: Option<Arc<SpectrumSnapshot>>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    latest: Mutex<Latest>,
    changed: Condvar,
}

/// Read side of the spectrum, handed to whatever draws it
#[derive(Clone, Default)]
pub struct SpectrumView {
    shared: Arc<Shared>,
}

impl SpectrumView {
    fn lock(&self) -> MutexGuard<'_, Latest> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn latest(&self) -> Option<Arc<SpectrumSnapshot>> {
        self.lock().snapshot.clone()
    }

    /// How many snapshots have been published so far
    pub fn published(&self) -> u64 {
        self.lock().published
    }

    /// True once the sink has seen end of stream
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait until a snapshot with a sequence above `after` exists
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<Arc<SpectrumSnapshot>> {
        let guard = self.lock();
        let (guard, _) = self
            .shared
            .changed
            .wait_timeout_while(guard, timeout, |l| l.published <= after && !l.closed)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.published > after {
            guard.snapshot.clone()
        } else {
            None
        }
    }

    fn publish(&self, snapshot: Arc<SpectrumSnapshot>) {
        let mut latest = self.lock();
        latest.published = snapshot.sequence;
        latest.snapshot = Some(snapshot);
        drop(latest);
        self.shared.changed.notify_all();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.shared.changed.notify_all();
    }
}

pub struct SpectrumSink {
    config: DisplayConfig,
    engine: SpectrumEngine,
    // Circular; once full, `head` is the oldest sample
    ring: Vec<Sample>,
    head: usize,
    filled: usize,
    epoch: Option<u64>,
    axis: FrequencyAxis,
    center_frequency_hz: f64,
    last_publish: Option<Instant>,
    ordered: Vec<Sample>,
    power: Vec<f32>,
    published: u64,
    view: SpectrumView,
}

impl SpectrumSink {
    pub fn new(config: DisplayConfig) -> Self {
        let n = config.fft_size.max(1);
        Self {
            engine: SpectrumEngine::new(n),
            ring: vec![Sample::default(); n],
            head: 0,
            filled: 0,
            epoch: None,
            axis: frequency_axis(0.0),
            center_frequency_hz: 0.0,
            last_publish: None,
            ordered: Vec::with_capacity(n),
            power: Vec::with_capacity(n),
            published: 0,
            view: SpectrumView::default(),
            config,
        }
    }

    pub fn view(&self) -> SpectrumView {
        self.view.clone()
    }

    pub fn frequency_axis(&self) -> FrequencyAxis {
        self.axis
    }

    pub fn consume(
        &mut self,
        block: &SampleBlock,
    ) -> Result<Option<Arc<SpectrumSnapshot>>, MalformedInput> {
        self.consume_at(block, Instant::now())
    }

    /// [`Self::consume`] with an explicit clock
    pub fn consume_at(
        &mut self,
        block: &SampleBlock,
        now: Instant,
    ) -> Result<Option<Arc<SpectrumSnapshot>>, MalformedInput> {
        check(block)?;

        if self.epoch != Some(block.epoch) || self.axis.end_hz != block.sample_rate_hz {
            // Samples from before a retune don't belong in the new picture
            self.head = 0;
            self.filled = 0;
            self.epoch = Some(block.epoch);
            self.axis = frequency_axis(block.sample_rate_hz);
            debug!(epoch = block.epoch, span_hz = self.axis.end_hz, "display axis re-derived");
        }
        self.center_frequency_hz = block.center_frequency_hz;
        self.push(&block.samples);

        if self.filled < self.ring.len() {
            return Ok(None);
        }
        if let Some(last) = self.last_publish {
            if now.saturating_duration_since(last) < self.config.min_interval {
                return Ok(None);
            }
        }

        self.ordered.clear();
        self.ordered.extend_from_slice(&self.ring[self.head..]);
        self.ordered.extend_from_slice(&self.ring[..self.head]);
        self.engine.power_db(&self.ordered, &mut self.power);

        self.published += 1;
        let snapshot = Arc::new(SpectrumSnapshot {
            sequence: self.published,
            magnitudes_db: self.power.clone(),
            frequency_axis: self.axis,
            amplitude_axis: self.config.amplitude_axis,
            center_frequency_hz: self.center_frequency_hz,
            timestamp: Utc::now(),
        });
        self.last_publish = Some(now);
        self.view.publish(snapshot.clone());
        trace!(sequence = snapshot.sequence, "spectrum published");
        Ok(Some(snapshot))
    }

    fn push(&mut self, samples: &[Sample]) {
        let n = self.ring.len();
        if samples.len() >= n {
            self.ring.copy_from_slice(&samples[samples.len() - n..]);
            self.head = 0;
            self.filled = n;
            return;
        }
        for &s in samples {
            self.ring[self.head] = s;
            self.head = (self.head + 1) % n;
        }
        self.filled = (self.filled + samples.len()).min(n);
    }
}

fn check(block: &SampleBlock) -> Result<(), MalformedInput> {
    if block.is_empty() {
        return Err(MalformedInput::Empty);
    }
    if !block.sample_rate_hz.is_finite() || block.sample_rate_hz <= 0.0 {
        return Err(MalformedInput::BadSampleRate);
    }
    if block
        .samples
        .iter()
        .any(|s| !s.re.is_finite() || !s.im.is_finite())
    {
        return Err(MalformedInput::NonFinite);
    }
    Ok(())
}

/// Spectrum consumer thread body. Returns once the fan-out goes away.
pub fn spectrum_consumer(subscription: Subscription, mut sink: SpectrumSink) {
    for block in subscription.iter() {
        if let Err(e) = sink.consume(&block) {
            debug!(sequence = block.sequence, error = %e, "ignoring sample block");
        }
    }
    sink.view.close();
    info!(
        snapshots = sink.published,
        dropped = subscription.dropped(),
        "spectrum sink finished"
    );
}
