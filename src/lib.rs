//! Capture IQ samples from an SDR to a raw file while showing a live
//! spectrum, with the radio retunable on the fly.

use std::time::Duration;

pub mod block;
pub mod capture;
pub mod error;
pub mod exfil;
pub mod f_engine;
pub mod fanout;
pub mod monitoring;
pub mod pipeline;
pub mod radio;
pub mod source;
pub mod tuning;

pub use block::{Sample, SampleBlock};
pub use error::{Field, HardwareError, MalformedInput, PipelineError, SinkIoError, TuningError};
pub use monitoring::{frequency_axis, SpectrumSnapshot, SpectrumView};
pub use pipeline::{Pipeline, PipelineConfig, PipelineEvent};
pub use tuning::{TuningChange, TuningController, TuningParameters};

pub const DEFAULT_FFT_SIZE: usize = 1024;
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_BLOCK_LEN: usize = 4096;
pub const DEFAULT_FILENAME: &str = "../recv_spls.bin";
