//! A synthetic front end: one tone plus uniform noise, clocked at the
//! configured sample rate.

use std::{
    f64::consts::TAU,
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use super::{DeviceLimits, Radio, RadioError, ReadStatus};
use crate::block::Sample;

// Gain at which the tone comes out at its nominal amplitude
const REFERENCE_GAIN_DB: f64 = 20.0;

pub struct SimRadio {
    name: String,
    limits: DeviceLimits,
    lock_range: Option<RangeInclusive<f64>>,
    antenna: String,
    gain_db: f64,
    frequency_hz: f64,
    sample_rate_hz: f64,
    tone_offset_hz: f64,
    tone_amplitude: f32,
    noise_amplitude: f32,
    phase: f64,
    rng: StdRng,
    active: bool,
    paced: bool,
    unplugged: Arc<AtomicBool>,
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRadio {
    pub fn new() -> Self {
        let limits = DeviceLimits::default();
        Self {
            name: "simulated front end".to_owned(),
            antenna: limits.antennas[0].clone(),
            limits,
            lock_range: None,
            gain_db: REFERENCE_GAIN_DB,
            frequency_hz: 868e6,
            sample_rate_hz: 1e6,
            tone_offset_hz: 100e3,
            tone_amplitude: 0.5,
            noise_amplitude: 1e-3,
            phase: 0.0,
            rng: StdRng::seed_from_u64(0x5eed),
            active: false,
            paced: true,
            unplugged: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Tone at `offset_hz` from the center frequency
    pub fn with_tone(mut self, offset_hz: f64, amplitude: f32) -> Self {
        self.tone_offset_hz = offset_hz;
        self.tone_amplitude = amplitude;
        self
    }

    pub fn with_noise(mut self, amplitude: f32) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    /// Frequencies the synthesizer can actually lock to. Tune requests
    /// outside this range are refused by the "hardware" even when they pass
    /// the advertised limits.
    pub fn with_lock_range(mut self, range: RangeInclusive<f64>) -> Self {
        self.lock_range = Some(range);
        self
    }

    /// Produce samples as fast as they are asked for instead of in real time
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Setting the returned flag makes every later call fail as if the USB
    /// cable was pulled
    pub fn unplug_switch(&self) -> Arc<AtomicBool> {
        self.unplugged.clone()
    }

    fn check_connected(&self) -> Result<(), RadioError> {
        if self.unplugged.load(Ordering::Acquire) {
            Err(RadioError::Disconnected(self.name.clone()))
        } else {
            Ok(())
        }
    }

    fn synthesize(&mut self, buf: &mut [Sample]) {
        let step = TAU * self.tone_offset_hz / self.sample_rate_hz;
        let gain = 10f64.powf((self.gain_db - REFERENCE_GAIN_DB) / 20.0) as f32;
        for s in buf.iter_mut() {
            let (sin, cos) = self.phase.sin_cos();
            let noise = Sample::new(
                self.rng.gen_range(-1.0f32..1.0),
                self.rng.gen_range(-1.0f32..1.0),
            ) * self.noise_amplitude;
            let clean = Sample::new(cos as f32, sin as f32) * self.tone_amplitude + noise;
            // The ADC clips at full scale
            let v = clean * gain;
            *s = Sample::new(v.re.clamp(-1.0, 1.0), v.im.clamp(-1.0, 1.0));
            self.phase = (self.phase + step) % TAU;
        }
    }
}

impl Radio for SimRadio {
    fn name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn set_antenna(&mut self, antenna: &str) -> Result<(), RadioError> {
        self.check_connected()?;
        if !self.limits.antennas.iter().any(|a| a == antenna) {
            return Err(RadioError::Refused(format!("no antenna port {antenna}")));
        }
        self.antenna = antenna.to_owned();
        Ok(())
    }

    fn set_gain(&mut self, gain_db: f64) -> Result<(), RadioError> {
        self.check_connected()?;
        self.gain_db = gain_db;
        Ok(())
    }

    fn set_frequency(&mut self, hz: f64) -> Result<(), RadioError> {
        self.check_connected()?;
        if let Some(range) = &self.lock_range {
            if !range.contains(&hz) {
                return Err(RadioError::Refused(format!("LO failed to lock at {hz} Hz")));
            }
        }
        debug!(hz, "sim tune request");
        self.frequency_hz = hz;
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: f64) -> Result<(), RadioError> {
        self.check_connected()?;
        self.sample_rate_hz = hz;
        Ok(())
    }

    fn activate(&mut self) -> Result<(), RadioError> {
        self.check_connected()?;
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    fn read(&mut self, buf: &mut [Sample], timeout: Duration) -> Result<ReadStatus, RadioError> {
        self.check_connected()?;
        if !self.active || buf.is_empty() {
            return Ok(ReadStatus::Samples(0));
        }
        let mut n = buf.len();
        if self.paced {
            // Only hand out what the ADC would have produced within the timeout
            let max = (timeout.as_secs_f64() * self.sample_rate_hz).floor() as usize;
            n = n.min(max.max(1));
            thread::sleep(Duration::from_secs_f64(n as f64 / self.sample_rate_hz));
        }
        self.synthesize(&mut buf[..n]);
        Ok(ReadStatus::Samples(n))
    }
}
