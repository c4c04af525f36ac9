//! Error types shared across the pipeline.
//!
//! Only [`HardwareError`] is fatal to a run. Everything else stays local to
//! the component that raised it.

use std::{fmt, io, path::PathBuf};

/// One of the retunable fields of [`crate::tuning::TuningParameters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Antenna,
    Gain,
    CenterFrequency,
    SampleRate,
}

impl Field {
    pub const ALL: [Field; 4] = [
        Field::Antenna,
        Field::Gain,
        Field::CenterFrequency,
        Field::SampleRate,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Field::Antenna => 0,
            Field::Gain => 1,
            Field::CenterFrequency => 2,
            Field::SampleRate => 3,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Antenna => "antenna",
            Field::Gain => "gain",
            Field::CenterFrequency => "freq",
            Field::SampleRate => "sample_rate",
        };
        f.write_str(name)
    }
}

/// Errors that end sample production
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HardwareError {
    #[error("radio disconnected: {0}")]
    Disconnected(String),
    #[error("unsupported radio: {0}")]
    Unsupported(String),
    #[error("sample source must be configured before starting")]
    NotConfigured,
}

/// Errors from a single retune request. The previous value stays in effect.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TuningError {
    #[error("{0} rejected")]
    Rejected(Field),
    #[error("{0} change superseded by a newer request")]
    Superseded(Field),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error("capture is not running")]
    Offline,
    #[error("timed out waiting for the radio to accept the change")]
    Timeout,
}

/// File sink failures. These halt the file sink only.
#[derive(Debug, thiserror::Error)]
#[error("{path}: {source}")]
pub struct SinkIoError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl SinkIoError {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// A sample block the spectrum sink could not use
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedInput {
    #[error("empty sample block")]
    Empty,
    #[error("sample block has no valid sample rate")]
    BadSampleRate,
    #[error("sample block contains non-finite samples")]
    NonFinite,
}

/// Everything that can stop a pipeline from starting
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error("initial tuning failed: {0}")]
    Tuning(#[from] TuningError),
    #[error("could not open output file {0}")]
    Sink(#[from] SinkIoError),
    #[error("could not spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("file sink is no longer running")]
    SinkGone,
}
