//! Play back a raw fc32 capture as if it were coming off the air.
//!
//! Tuning calls are accepted and only change how the samples are labelled;
//! the recording itself can't be retuned. The sample rate still sets the
//! playback pace.

use std::{
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom},
    path::PathBuf,
    thread,
    time::Duration,
};

use tracing::{info, warn};

use super::{DeviceLimits, Radio, RadioError, ReadStatus};
use crate::{
    block::{samples_from_bytes, Sample},
    error::HardwareError,
};

const BYTES_PER_SAMPLE: usize = 8;

pub struct ReplayRadio {
    name: String,
    path: PathBuf,
    reader: BufReader<File>,
    limits: DeviceLimits,
    sample_rate_hz: f64,
    looped: bool,
    active: bool,
    scratch: Vec<u8>,
}

impl ReplayRadio {
    pub fn open(path: PathBuf) -> Result<Self, HardwareError> {
        let file = File::open(&path).map_err(|e| {
            HardwareError::Unsupported(format!("failed to open {}: {e}", path.display()))
        })?;
        let limits = DeviceLimits {
            frequency_hz: 0.0..=f64::MAX,
            ..Default::default()
        };
        Ok(Self {
            name: format!("replay of {}", path.display()),
            path,
            reader: BufReader::with_capacity(1024 * 1024, file),
            limits,
            sample_rate_hz: 1e6,
            looped: false,
            active: false,
            scratch: Vec::new(),
        })
    }

    /// Start over at the beginning of the file instead of ending the stream
    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    fn fill(&mut self, want: usize) -> io::Result<usize> {
        self.scratch.resize(want * BYTES_PER_SAMPLE, 0);
        let mut filled = 0;
        while filled < self.scratch.len() {
            match self.reader.read(&mut self.scratch[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled / BYTES_PER_SAMPLE)
    }
}

impl Radio for ReplayRadio {
    fn name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn set_antenna(&mut self, _antenna: &str) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_gain(&mut self, _gain_db: f64) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_frequency(&mut self, _hz: f64) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_sample_rate(&mut self, hz: f64) -> Result<(), RadioError> {
        self.sample_rate_hz = hz;
        Ok(())
    }

    fn activate(&mut self) -> Result<(), RadioError> {
        info!(path = %self.path.display(), "replaying capture");
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    fn read(&mut self, buf: &mut [Sample], timeout: Duration) -> Result<ReadStatus, RadioError> {
        if !self.active || buf.is_empty() {
            return Ok(ReadStatus::Samples(0));
        }
        let max = (timeout.as_secs_f64() * self.sample_rate_hz).floor() as usize;
        let want = buf.len().min(max.max(1));
        let mut got = self
            .fill(want)
            .map_err(|e| RadioError::Disconnected(format!("{}: {e}", self.path.display())))?;
        if got == 0 {
            if !self.looped {
                info!(path = %self.path.display(), "end of capture");
                return Ok(ReadStatus::Exhausted);
            }
            self.reader
                .seek(SeekFrom::Start(0))
                .map_err(|e| RadioError::Disconnected(e.to_string()))?;
            got = self
                .fill(want)
                .map_err(|e| RadioError::Disconnected(e.to_string()))?;
            if got == 0 {
                warn!(path = %self.path.display(), "capture is empty");
                return Ok(ReadStatus::Exhausted);
            }
        }
        let samples = samples_from_bytes(&self.scratch[..got * BYTES_PER_SAMPLE]);
        buf[..got].copy_from_slice(&samples);
        thread::sleep(Duration::from_secs_f64(got as f64 / self.sample_rate_hz));
        Ok(ReadStatus::Samples(got))
    }
}
