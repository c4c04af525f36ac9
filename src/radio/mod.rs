//! Radio front ends.
//!
//! Everything hardware specific lives behind [`Radio`]. The sample source is
//! the only thing that ever holds one, and it only ever touches it from the
//! capture thread.

use std::{collections::HashMap, ops::RangeInclusive, path::PathBuf, time::Duration};

use crate::{block::Sample, error::HardwareError};

pub mod replay;
pub mod sim;

pub use replay::ReplayRadio;
pub use sim::SimRadio;

/// What a front end can be tuned to
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLimits {
    pub frequency_hz: RangeInclusive<f64>,
    pub gain_db: RangeInclusive<f64>,
    pub sample_rate_hz: RangeInclusive<f64>,
    pub antennas: Vec<String>,
}

impl Default for DeviceLimits {
    /// Roughly a B2xx-class USRP with the 0-50 dB gain slider of the capture UI
    fn default() -> Self {
        Self {
            frequency_hz: 70e6..=6e9,
            gain_db: 0.0..=50.0,
            sample_rate_hz: 62.5e3..=56e6,
            antennas: vec!["RX2".to_owned(), "TX/RX".to_owned()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RadioError {
    /// The device refused a setting (PLL didn't lock, unknown port, ...)
    #[error("device refused setting: {0}")]
    Refused(String),
    #[error("device disconnected: {0}")]
    Disconnected(String),
}

impl From<RadioError> for HardwareError {
    fn from(e: RadioError) -> Self {
        match e {
            RadioError::Refused(why) => HardwareError::Unsupported(why),
            RadioError::Disconnected(why) => HardwareError::Disconnected(why),
        }
    }
}

/// The outcome of a single [`Radio::read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many samples were written to the front of the buffer (may be 0 on timeout)
    Samples(usize),
    /// The device will never produce more samples
    Exhausted,
}

/// A receive-only SDR front end
pub trait Radio: Send {
    /// Human readable device description
    fn name(&self) -> &str;

    fn limits(&self) -> &DeviceLimits;

    fn set_antenna(&mut self, antenna: &str) -> Result<(), RadioError>;

    fn set_gain(&mut self, gain_db: f64) -> Result<(), RadioError>;

    /// Issue a tune request. Must not wait for the LO to settle.
    fn set_frequency(&mut self, hz: f64) -> Result<(), RadioError>;

    fn set_sample_rate(&mut self, hz: f64) -> Result<(), RadioError>;

    /// Start streaming
    fn activate(&mut self) -> Result<(), RadioError>;

    /// Stop streaming. Safe to call when not active.
    fn deactivate(&mut self);

    /// Block for at most `timeout` filling `buf`
    fn read(&mut self, buf: &mut [Sample], timeout: Duration) -> Result<ReadStatus, RadioError>;
}

/// Parse a UHD-style device locator (`key=value,key=value`)
pub fn parse_locator(address: &str) -> HashMap<String, String> {
    address
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (k.trim().to_owned(), v.trim().to_owned()),
            None => (part.to_owned(), String::new()),
        })
        .collect()
}

/// Open the front end described by `address`.
///
/// Recognized forms are `type=sim[,tone=<hz>][,noise=<amplitude>]` and
/// `type=file,path=<raw fc32 capture>[,loop=1]`.
pub fn open(address: &str) -> Result<Box<dyn Radio>, HardwareError> {
    let args = parse_locator(address);
    let kind = args.get("type").map(String::as_str).unwrap_or("sim");
    match kind {
        "sim" => {
            let mut radio = SimRadio::new();
            if let Some(tone) = args.get("tone") {
                let hz = tone.parse().map_err(|_| {
                    HardwareError::Unsupported(format!("bad tone offset {tone:?}"))
                })?;
                radio = radio.with_tone(hz, 0.5);
            }
            if let Some(noise) = args.get("noise") {
                let amplitude = noise.parse().map_err(|_| {
                    HardwareError::Unsupported(format!("bad noise amplitude {noise:?}"))
                })?;
                radio = radio.with_noise(amplitude);
            }
            Ok(Box::new(radio))
        }
        "file" => {
            let path = args.get("path").ok_or_else(|| {
                HardwareError::Unsupported("file radio needs path=<capture>".to_owned())
            })?;
            let looped = args.get("loop").map(|v| v == "1" || v == "true");
            let radio = ReplayRadio::open(PathBuf::from(path))?.looped(looped.unwrap_or(false));
            Ok(Box::new(radio))
        }
        other => Err(HardwareError::Unsupported(format!(
            "no driver for device type {other:?}"
        ))),
    }
}
