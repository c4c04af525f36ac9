//! The sample source: a [`Radio`] plus the tuning that is actually applied
//! to it, turned into a stream of [`SampleBlock`]s.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    block::{Sample, SampleBlock},
    error::{Field, HardwareError, TuningError},
    radio::{DeviceLimits, Radio, RadioError, ReadStatus},
    tuning::{TuningChange, TuningParameters},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Unconfigured,
    Ready,
    Running,
    Stopped,
}

pub struct SampleSource {
    radio: Box<dyn Radio>,
    params: Option<TuningParameters>,
    state: SourceState,
    block_len: usize,
    read_timeout: Duration,
    sequence: u64,
    epoch: u64,
    buf: Vec<Sample>,
}

/// Check every field against the device limits without touching hardware
pub fn validate(params: &TuningParameters, limits: &DeviceLimits) -> Result<(), TuningError> {
    if !limits.antennas.iter().any(|a| *a == params.antenna) {
        return Err(TuningError::Rejected(Field::Antenna));
    }
    if !params.gain_db.is_finite() || !limits.gain_db.contains(&params.gain_db) {
        return Err(TuningError::Rejected(Field::Gain));
    }
    if !params.center_frequency_hz.is_finite()
        || !limits.frequency_hz.contains(&params.center_frequency_hz)
    {
        return Err(TuningError::Rejected(Field::CenterFrequency));
    }
    if !params.sample_rate_hz.is_finite()
        || params.sample_rate_hz <= 0.0
        || !limits.sample_rate_hz.contains(&params.sample_rate_hz)
    {
        return Err(TuningError::Rejected(Field::SampleRate));
    }
    Ok(())
}

fn apply_field(
    radio: &mut dyn Radio,
    params: &TuningParameters,
    field: Field,
) -> Result<(), RadioError> {
    match field {
        Field::Antenna => radio.set_antenna(&params.antenna),
        Field::Gain => radio.set_gain(params.gain_db),
        Field::CenterFrequency => radio.set_frequency(params.center_frequency_hz),
        Field::SampleRate => radio.set_sample_rate(params.sample_rate_hz),
    }
}

impl SampleSource {
    pub fn new(radio: Box<dyn Radio>, block_len: usize, read_timeout: Duration) -> Self {
        Self {
            radio,
            params: None,
            state: SourceState::Unconfigured,
            block_len: block_len.max(1),
            read_timeout,
            sequence: 0,
            epoch: 0,
            buf: Vec::new(),
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn limits(&self) -> &DeviceLimits {
        self.radio.limits()
    }

    /// The parameters the hardware is currently running with
    pub fn parameters(&self) -> Option<&TuningParameters> {
        self.params.as_ref()
    }

    /// Validate and push a full parameter set to the radio.
    ///
    /// Fields go out in antenna, gain, frequency, rate order. Only fields that
    /// differ from what the radio already has are sent (all of them the first
    /// time). If the radio refuses one, the fields already sent in this call
    /// are put back.
    pub fn configure(&mut self, params: &TuningParameters) -> Result<(), TuningError> {
        validate(params, self.radio.limits())?;

        let changed: Vec<Field> = Field::ALL
            .into_iter()
            .filter(|f| match &self.params {
                // After a stop the radio gets everything again
                Some(current) if self.state != SourceState::Stopped => !current.same_field(params, *f),
                _ => true,
            })
            .collect();

        for (i, &field) in changed.iter().enumerate() {
            match apply_field(self.radio.as_mut(), params, field) {
                Ok(()) => {}
                Err(RadioError::Disconnected(why)) => {
                    return Err(HardwareError::Disconnected(why).into());
                }
                Err(RadioError::Refused(why)) => {
                    warn!(%field, %why, "radio refused setting");
                    self.roll_back(&changed[..i]);
                    return Err(TuningError::Rejected(field));
                }
            }
        }

        if changed
            .iter()
            .any(|f| matches!(f, Field::CenterFrequency | Field::SampleRate))
        {
            self.epoch += 1;
        }
        debug!(?params, epoch = self.epoch, "tuning applied");
        self.params = Some(params.clone());
        if matches!(self.state, SourceState::Unconfigured | SourceState::Stopped) {
            self.state = SourceState::Ready;
        }
        Ok(())
    }

    fn roll_back(&mut self, applied: &[Field]) {
        let Some(previous) = self.params.clone() else {
            return;
        };
        for &field in applied.iter().rev() {
            if let Err(e) = apply_field(self.radio.as_mut(), &previous, field) {
                warn!(%field, error = %e, "could not restore previous setting");
            }
        }
    }

    /// Change one field, keeping the rest of the applied parameters
    pub fn retune(&mut self, change: &TuningChange) -> Result<TuningParameters, TuningError> {
        let current = self
            .params
            .clone()
            .ok_or(TuningError::Hardware(HardwareError::NotConfigured))?;
        let next = current.with_change(change);
        self.configure(&next)?;
        Ok(next)
    }

    pub fn start(&mut self) -> Result<(), HardwareError> {
        match self.state {
            SourceState::Running => return Ok(()),
            SourceState::Unconfigured | SourceState::Stopped => {
                return Err(HardwareError::NotConfigured)
            }
            SourceState::Ready => {}
        }
        self.radio.activate()?;
        self.sequence = 0;
        self.state = SourceState::Running;
        info!(radio = self.radio.name(), "streaming started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.state == SourceState::Running {
            self.radio.deactivate();
            info!(blocks = self.sequence, "streaming stopped");
        }
        if self.state != SourceState::Unconfigured {
            self.state = SourceState::Stopped;
        }
    }

    /// Read the next block.
    ///
    /// `Ok(None)` means the source has nothing more to give: it is stopped or
    /// the device ran dry. A read that times out comes back as an empty block
    /// so the caller gets a chance to look at its control inputs.
    pub fn next_block(&mut self) -> Result<Option<SampleBlock>, HardwareError> {
        if self.state != SourceState::Running {
            return Ok(None);
        }
        let Some(params) = &self.params else {
            return Err(HardwareError::NotConfigured);
        };
        self.buf.resize(self.block_len, Sample::default());
        match self.radio.read(&mut self.buf, self.read_timeout) {
            Ok(ReadStatus::Samples(n)) => {
                let block = SampleBlock::new(
                    self.sequence,
                    self.epoch,
                    params.sample_rate_hz,
                    params.center_frequency_hz,
                    self.buf[..n].to_vec(),
                );
                if n > 0 {
                    self.sequence += 1;
                }
                Ok(Some(block))
            }
            Ok(ReadStatus::Exhausted) => {
                self.stop();
                Ok(None)
            }
            Err(e) => {
                self.stop();
                Err(e.into())
            }
        }
    }

    /// Lazily pull non-empty blocks until the source stops or fails
    pub fn blocks(&mut self) -> Blocks<'_> {
        Blocks { source: self }
    }
}

pub struct Blocks<'a> {
    source: &'a mut SampleSource,
}

impl Iterator for Blocks<'_> {
    type Item = Result<SampleBlock, HardwareError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.source.next_block() {
                Ok(Some(block)) if block.is_empty() => continue,
                Ok(Some(block)) => return Some(Ok(block)),
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
