//! This module is responsible for getting raw samples out to disk.
//!
//! The file format is what `gr_complex` file sinks write: interleaved native
//! endian f32 I/Q pairs, no header, no framing.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use byte_slice_cast::AsByteSlice;
use crossbeam_channel::{never, select, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::{
    block::{interleave, SampleBlock},
    error::SinkIoError,
    fanout::Subscription,
    pipeline::PipelineEvent,
};

// Big enough that a 4096-sample block is a single write
const WRITE_BUFFER: usize = 1 << 16;

struct Destination {
    path: PathBuf,
    writer: BufWriter<File>,
    samples: u64,
}

impl Destination {
    fn create(path: &Path) -> Result<Self, SinkIoError> {
        let file = File::create(path).map_err(|e| SinkIoError::new(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(WRITE_BUFFER, file),
            samples: 0,
        })
    }

    /// Flush and close
    fn finish(mut self) -> Result<u64, SinkIoError> {
        self.writer
            .flush()
            .map_err(|e| SinkIoError::new(&self.path, e))?;
        Ok(self.samples)
    }
}

/// Appends sample blocks to one file at a time
pub struct FileSink {
    dest: Option<Destination>,
    scratch: Vec<f32>,
}

impl FileSink {
    /// Create (truncating) the file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkIoError> {
        let dest = Destination::create(path.as_ref())?;
        info!(path = %dest.path.display(), "writing samples");
        Ok(Self {
            dest: Some(dest),
            scratch: Vec::new(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.dest.as_ref().map(|d| d.path.as_path())
    }

    /// A halted sink has no destination and discards what it is given
    pub fn is_halted(&self) -> bool {
        self.dest.is_none()
    }

    /// Samples written to the current destination
    pub fn samples_written(&self) -> u64 {
        self.dest.as_ref().map_or(0, |d| d.samples)
    }

    /// Append `block`. On failure the sink halts until the next successful
    /// [`Self::set_destination`].
    pub fn write(&mut self, block: &SampleBlock) -> Result<(), SinkIoError> {
        let Some(dest) = self.dest.as_mut() else {
            return Ok(());
        };
        interleave(&block.samples, &mut self.scratch);
        match dest.writer.write_all(self.scratch.as_byte_slice()) {
            Ok(()) => {
                dest.samples += block.len() as u64;
                Ok(())
            }
            Err(e) => {
                let err = SinkIoError::new(&dest.path, e);
                self.halt();
                Err(err)
            }
        }
    }

    /// Finish the current file and start a new one at `path`.
    ///
    /// The old file is flushed and closed before the new one is created, so
    /// pointing at the same path again starts that file over.
    pub fn set_destination(&mut self, path: impl AsRef<Path>) -> Result<(), SinkIoError> {
        let path = path.as_ref();
        if let Err(e) = self.close() {
            warn!(error = %e, "previous output did not flush cleanly");
        }
        let dest = Destination::create(path)?;
        info!(path = %path.display(), "output redirected");
        self.dest = Some(dest);
        Ok(())
    }

    /// Flush and release the current file, leaving the sink halted
    pub fn close(&mut self) -> Result<(), SinkIoError> {
        match self.dest.take() {
            Some(dest) => {
                let path = dest.path.clone();
                let samples = dest.finish()?;
                debug!(path = %path.display(), samples, "output closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn halt(&mut self) {
        // The buffered tail is lost anyway, don't let a second error mask the first
        if let Some(dest) = self.dest.take() {
            let _ = dest.finish();
        }
    }
}

/// Requests the file consumer thread serves between blocks
#[derive(Debug)]
pub enum SinkCommand {
    SetDestination {
        path: PathBuf,
        reply: Sender<Result<(), SinkIoError>>,
    },
}

/// File consumer thread body. Returns once the fan-out goes away, with the
/// file flushed and closed.
pub fn file_consumer(
    subscription: Subscription,
    mut sink: FileSink,
    commands: Receiver<SinkCommand>,
    events: Sender<PipelineEvent>,
) {
    let idle = never();
    let mut commands_open = true;
    let mut discarded = 0u64;
    loop {
        // Destination changes take effect before any block still queued
        while let Ok(cmd) = commands.try_recv() {
            handle_command(&mut sink, cmd, &events);
        }
        let command_rx = if commands_open { &commands } else { &idle };
        select! {
            recv(subscription.receiver()) -> msg => {
                let Ok(block) = msg else { break };
                if sink.is_halted() {
                    discarded += 1;
                    continue;
                }
                if let Err(e) = sink.write(&block) {
                    error!(error = %e, "file sink halted");
                    let _ = events.send(PipelineEvent::SinkFailed {
                        path: e.path.clone(),
                        error: e.source.to_string(),
                    });
                }
            }
            recv(command_rx) -> cmd => match cmd {
                Ok(cmd) => handle_command(&mut sink, cmd, &events),
                Err(_) => commands_open = false,
            },
        }
    }
    let path = sink.path().map(Path::to_path_buf);
    let samples = sink.samples_written();
    if let Err(e) = sink.close() {
        error!(error = %e, "failed to flush output on shutdown");
        let _ = events.send(PipelineEvent::SinkFailed {
            path: e.path.clone(),
            error: e.source.to_string(),
        });
    }
    info!(
        path = ?path,
        samples,
        discarded,
        dropped = subscription.dropped(),
        "file sink finished"
    );
}

fn handle_command(sink: &mut FileSink, cmd: SinkCommand, events: &Sender<PipelineEvent>) {
    match cmd {
        SinkCommand::SetDestination { path, reply } => {
            let was_halted = sink.is_halted();
            let result = sink.set_destination(&path);
            match &result {
                Ok(()) if was_halted => {
                    let _ = events.send(PipelineEvent::SinkResumed { path: path.clone() });
                }
                Ok(()) => {}
                Err(e) => {
                    error!(error = %e, "file sink halted");
                    let _ = events.send(PipelineEvent::SinkFailed {
                        path: e.path.clone(),
                        error: e.source.to_string(),
                    });
                }
            }
            let _ = reply.send(result);
        }
    }
}
