use std::{error::Error, io::BufRead, path::PathBuf, thread, time::Duration};

use clap::Parser;
use crossbeam_channel::{bounded, never, select, tick, unbounded, Receiver};
use iq_slurper::{
    monitoring::DisplayConfig, radio, Pipeline, PipelineConfig, PipelineEvent, TuningChange,
    TuningParameters,
};
use tracing::{error, info, warn};

mod args;

use args::{convert_filter, eng_float, Args};

/// What the operator can type at the console
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Tune(TuningChange),
    Redirect(PathBuf),
    Status,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or_else(|| "empty command".to_string())?;
    let arg = words.next();
    let number = |arg: Option<&str>| -> Result<f64, String> {
        eng_float(arg.ok_or_else(|| format!("{verb} needs a value"))?)
    };
    match verb {
        "freq" | "f" => Ok(Command::Tune(TuningChange::CenterFrequency(number(arg)?))),
        "gain" | "g" => Ok(Command::Tune(TuningChange::Gain(number(arg)?))),
        "rate" | "s" => Ok(Command::Tune(TuningChange::SampleRate(number(arg)?))),
        "antenna" | "A" => arg
            .map(|a| Command::Tune(TuningChange::Antenna(a.to_owned())))
            .ok_or_else(|| "antenna needs a port name".to_string()),
        "file" | "n" => arg
            .map(|p| Command::Redirect(PathBuf::from(p)))
            .ok_or_else(|| "file needs a path".to_string()),
        "status" => Ok(Command::Status),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("unknown command {other:?}")),
    }
}

/// Read operator lines on their own thread so the main loop can select on them
fn console() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("console".to_owned())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if !line.trim().is_empty() && tx.send(line).is_err() {
                    break;
                }
            }
        })
        .ok();
    rx
}

fn report(pipeline: &Pipeline) {
    let params = pipeline.tuning().parameters();
    match pipeline.spectrum().latest() {
        Some(snap) => {
            if let Some((offset_hz, db)) = snap.peak() {
                info!(
                    freq = params.center_frequency_hz,
                    gain = params.gain_db,
                    rate = params.sample_rate_hz,
                    antenna = %params.antenna,
                    peak_offset_hz = offset_hz,
                    peak_db = db,
                    span_hz = snap.frequency_axis.end_hz - snap.frequency_axis.start_hz,
                    "spectrum"
                );
            }
        }
        None => info!(?params, "waiting for first spectrum"),
    }
    for q in pipeline.queue_stats() {
        if q.dropped > 0 {
            warn!(consumer = %q.name, dropped = q.dropped, queued = q.queued, "queue overflow");
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .with_thread_names(true)
        .init();

    let radio = radio::open(&args.address)?;
    let config = PipelineConfig {
        tuning: TuningParameters {
            center_frequency_hz: args.freq,
            gain_db: args.gain,
            sample_rate_hz: args.samp_rate,
            antenna: args.antenna.clone(),
        },
        destination: args.filename.clone(),
        display: DisplayConfig {
            fft_size: args.fft_size as usize,
            min_interval: Duration::from_millis(args.update_ms),
            ..Default::default()
        },
        queue_capacity: args.capacity,
        block_len: args.block_len,
        ..Default::default()
    };
    let pipeline = Pipeline::start(radio, config)?;

    let (quit_tx, quit_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = quit_tx.try_send(());
    })?;

    let lines = console();
    let no_lines = never();
    let mut stdin_open = true;
    let ticker = tick(Duration::from_secs(1));

    loop {
        let line_rx = if stdin_open { &lines } else { &no_lines };
        select! {
            recv(quit_rx) -> _ => {
                info!("interrupted");
                break;
            }
            recv(pipeline.events()) -> event => match event {
                Ok(PipelineEvent::SinkFailed { path, error }) => {
                    error!(path = %path.display(), %error, "recording stopped, spectrum still live; use `file <path>` to resume");
                }
                Ok(PipelineEvent::SinkResumed { path }) => info!(path = %path.display(), "recording resumed"),
                Ok(PipelineEvent::HardwareFailure(e)) => {
                    error!(error = %e, "radio lost");
                    break;
                }
                Ok(PipelineEvent::EndOfStream) | Err(_) => break,
            },
            recv(line_rx) -> line => match line {
                Ok(line) => match parse_command(&line) {
                    Ok(Command::Tune(change)) => match pipeline.apply_tuning(change) {
                        Ok(p) => info!(?p, "tuned"),
                        Err(e) => warn!(error = %e, current = ?pipeline.tuning().parameters(), "tuning not applied"),
                    },
                    Ok(Command::Redirect(path)) => {
                        if let Err(e) = pipeline.set_destination(&path) {
                            warn!(error = %e, "output not redirected");
                        }
                    }
                    Ok(Command::Status) => report(&pipeline),
                    Ok(Command::Quit) => break,
                    Err(e) => warn!("{e}"),
                },
                Err(_) => stdin_open = false,
            },
            recv(ticker) -> _ => report(&pipeline),
        }
    }

    let summary = pipeline.stop()?;
    info!(
        blocks = summary.blocks,
        samples = summary.samples,
        retunes = summary.retunes,
        "done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command("freq 915M"),
            Ok(Command::Tune(TuningChange::CenterFrequency(915e6)))
        );
        assert_eq!(
            parse_command("  gain 30 "),
            Ok(Command::Tune(TuningChange::Gain(30.0)))
        );
        assert_eq!(
            parse_command("antenna TX/RX"),
            Ok(Command::Tune(TuningChange::Antenna("TX/RX".into())))
        );
        assert_eq!(
            parse_command("file /tmp/x.bin"),
            Ok(Command::Redirect(PathBuf::from("/tmp/x.bin")))
        );
        assert_eq!(parse_command("q"), Ok(Command::Quit));
        assert!(parse_command("rate").is_err());
        assert!(parse_command("warp 9").is_err());
    }
}
