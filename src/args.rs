//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Device locator, e.g. "type=sim,tone=100e3" or "type=file,path=capture.bin"
    #[clap(short, long, default_value = "type=sim")]
    pub address: String,
    /// Antenna port
    #[clap(short = 'A', long, default_value = "RX2")]
    pub antenna: String,
    /// File to write raw fc32 samples to
    #[clap(short = 'n', long, default_value = iq_slurper::DEFAULT_FILENAME)]
    pub filename: PathBuf,
    /// Center frequency in Hz (accepts k/M/G suffixes)
    #[clap(short, long, default_value = "868M", value_parser = eng_float)]
    pub freq: f64,
    /// RF gain in dB (default is the midpoint of the usual range)
    #[clap(short, long, default_value = "20", value_parser = eng_float)]
    pub gain: f64,
    /// Sample rate in Hz (accepts k/M/G suffixes)
    #[clap(short, long, default_value = "1M", value_parser = eng_float)]
    pub samp_rate: f64,
    /// FFT length of the spectrum display
    #[clap(long, default_value_t = 1024)]
    #[clap(value_parser = clap::value_parser!(u32).range(16..=65536))]
    pub fft_size: u32,
    /// Minimum time between spectrum updates, in milliseconds
    #[clap(long, default_value_t = 100)]
    pub update_ms: u64,
    /// Per-consumer queue capacity, in blocks
    #[clap(short, long, default_value_t = iq_slurper::DEFAULT_QUEUE_CAPACITY)]
    pub capacity: usize,
    /// Samples per block
    #[clap(long, default_value_t = iq_slurper::DEFAULT_BLOCK_LEN)]
    pub block_len: usize,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

/// Parse a number with an optional engineering suffix ("868M", "62.5k", "1e6")
pub fn eng_float(s: &str) -> Result<f64, String> {
    let s = s.trim();
    let (digits, scale) = match s.chars().last() {
        Some('p') => (&s[..s.len() - 1], 1e-12),
        Some('n') => (&s[..s.len() - 1], 1e-9),
        Some('u') => (&s[..s.len() - 1], 1e-6),
        Some('m') => (&s[..s.len() - 1], 1e-3),
        Some('k') | Some('K') => (&s[..s.len() - 1], 1e3),
        Some('M') => (&s[..s.len() - 1], 1e6),
        Some('G') => (&s[..s.len() - 1], 1e9),
        Some('T') => (&s[..s.len() - 1], 1e12),
        _ => (s, 1.0),
    };
    digits
        .parse::<f64>()
        .map(|v| v * scale)
        .map_err(|_| format!("Invalid number {s:?}"))
}
