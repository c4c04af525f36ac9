//! Tuning parameters and the controller the operator talks to.
//!
//! The controller never touches the radio. It forwards one-field changes to
//! the capture thread, waits for the verdict and only then updates the shared
//! parameter slot.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, info, warn};

use crate::{
    error::{Field, TuningError},
    monitoring::{frequency_axis, FrequencyAxis},
};

#[derive(Debug, Clone, PartialEq)]
pub struct TuningParameters {
    pub center_frequency_hz: f64,
    pub gain_db: f64,
    pub sample_rate_hz: f64,
    pub antenna: String,
}

impl Default for TuningParameters {
    fn default() -> Self {
        Self {
            center_frequency_hz: 868e6,
            gain_db: 20.0,
            sample_rate_hz: 1e6,
            antenna: "RX2".to_owned(),
        }
    }
}

impl TuningParameters {
    pub fn with_change(&self, change: &TuningChange) -> Self {
        let mut next = self.clone();
        match change {
            TuningChange::Antenna(a) => next.antenna = a.clone(),
            TuningChange::Gain(g) => next.gain_db = *g,
            TuningChange::CenterFrequency(f) => next.center_frequency_hz = *f,
            TuningChange::SampleRate(r) => next.sample_rate_hz = *r,
        }
        next
    }

    pub fn same_field(&self, other: &Self, field: Field) -> bool {
        match field {
            Field::Antenna => self.antenna == other.antenna,
            Field::Gain => self.gain_db == other.gain_db,
            Field::CenterFrequency => self.center_frequency_hz == other.center_frequency_hz,
            Field::SampleRate => self.sample_rate_hz == other.sample_rate_hz,
        }
    }
}

/// An operator edit of a single field
#[derive(Debug, Clone, PartialEq)]
pub enum TuningChange {
    Antenna(String),
    Gain(f64),
    CenterFrequency(f64),
    SampleRate(f64),
}

impl TuningChange {
    pub fn field(&self) -> Field {
        match self {
            TuningChange::Antenna(_) => Field::Antenna,
            TuningChange::Gain(_) => Field::Gain,
            TuningChange::CenterFrequency(_) => Field::CenterFrequency,
            TuningChange::SampleRate(_) => Field::SampleRate,
        }
    }
}

/// A change on its way to the capture thread. The reply carries the full
/// parameter set the radio ended up with.
#[derive(Debug)]
pub struct RetuneRequest {
    pub change: TuningChange,
    pub reply: Sender<Result<TuningParameters, TuningError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Applying,
}

/// The accepted parameters plus, per field, the generation they came from
struct Slot {
    params: TuningParameters,
    committed: [u64; 4],
}

impl Slot {
    /// Take `field` from `applied` unless a newer edit of it already landed
    fn commit(&mut self, applied: &TuningParameters, field: Field, generation: u64) -> bool {
        let committed = &mut self.committed[field.index()];
        if generation <= *committed {
            return false;
        }
        *committed = generation;
        copy_field(&mut self.params, applied, field);
        true
    }
}

/// A request whose caller stopped waiting. The radio may still take it.
struct Late {
    field: Field,
    generation: u64,
    reply: Receiver<Result<TuningParameters, TuningError>>,
}

pub struct TuningController {
    slot: Mutex<Slot>,
    requests: Sender<RetuneRequest>,
    // Serializes "take a generation, enqueue" so the capture thread sees
    // same-field edits in generation order
    submit: Mutex<()>,
    submitted: [AtomicU64; 4],
    late: Mutex<Vec<Late>>,
    in_flight: AtomicUsize,
    reply_timeout: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic elsewhere doesn't make a parameter set invalid
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TuningController {
    /// `initial` must be what the source was configured with
    pub fn new(
        initial: TuningParameters,
        reply_timeout: Duration,
    ) -> (Self, Receiver<RetuneRequest>) {
        let (requests, rx) = crossbeam_channel::unbounded();
        let controller = Self {
            slot: Mutex::new(Slot {
                params: initial,
                committed: [0; 4],
            }),
            requests,
            submit: Mutex::new(()),
            submitted: Default::default(),
            late: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            reply_timeout,
        };
        (controller, rx)
    }

    pub fn state(&self) -> ControllerState {
        if self.in_flight.load(Ordering::Acquire) == 0 {
            ControllerState::Idle
        } else {
            ControllerState::Applying
        }
    }

    /// Lock the slot after folding in any answers that arrived for callers
    /// that already timed out
    fn settled(&self) -> MutexGuard<'_, Slot> {
        let mut slot = lock(&self.slot);
        lock(&self.late).retain(|late| match late.reply.try_recv() {
            Err(TryRecvError::Empty) => true,
            Ok(Ok(applied)) => {
                if slot.commit(&applied, late.field, late.generation) {
                    info!(field = %late.field, generation = late.generation, "late tuning accepted");
                }
                false
            }
            Ok(Err(_)) | Err(TryRecvError::Disconnected) => false,
        });
        slot
    }

    /// Snapshot of the accepted parameters
    pub fn parameters(&self) -> TuningParameters {
        self.settled().params.clone()
    }

    /// Submit `change` and wait for the radio's verdict.
    ///
    /// On success the accepted parameters are returned for display. On
    /// rejection the slot keeps its previous value. An accepted change that
    /// a newer edit of the same field has overtaken still lands in the slot
    /// (the radio did apply it) but reports `Superseded` to its caller.
    pub fn apply(&self, change: TuningChange) -> Result<TuningParameters, TuningError> {
        let field = change.field();
        let (reply_tx, reply_rx) = bounded(1);

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let generation = {
            let _order = lock(&self.submit);
            let generation = self.submitted[field.index()].fetch_add(1, Ordering::AcqRel) + 1;
            let request = RetuneRequest {
                change: change.clone(),
                reply: reply_tx,
            };
            if self.requests.send(request).is_err() {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                return Err(TuningError::Offline);
            }
            generation
        };
        debug!(?change, generation, "retune submitted");

        let verdict = match reply_rx.recv_timeout(self.reply_timeout) {
            Ok(verdict) => verdict,
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.late).push(Late {
                    field,
                    generation,
                    reply: reply_rx,
                });
                Err(TuningError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(TuningError::Offline),
        };

        let result = match verdict {
            Ok(applied) => {
                let mut slot = self.settled();
                slot.commit(&applied, field, generation);
                if self.submitted[field.index()].load(Ordering::Acquire) == generation {
                    info!(%field, ?change, "tuning accepted");
                    Ok(slot.params.clone())
                } else {
                    debug!(%field, generation, "superseded before it completed");
                    Err(TuningError::Superseded(field))
                }
            }
            Err(e) => {
                warn!(%field, ?change, error = %e, "tuning rejected");
                Err(e)
            }
        };
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        result
    }

    pub fn center_frequency(&self) -> f64 {
        self.settled().params.center_frequency_hz
    }

    pub fn set_center_frequency(&self, hz: f64) -> Result<TuningParameters, TuningError> {
        self.apply(TuningChange::CenterFrequency(hz))
    }

    pub fn gain(&self) -> f64 {
        self.settled().params.gain_db
    }

    pub fn set_gain(&self, db: f64) -> Result<TuningParameters, TuningError> {
        self.apply(TuningChange::Gain(db))
    }

    pub fn sample_rate(&self) -> f64 {
        self.settled().params.sample_rate_hz
    }

    pub fn set_sample_rate(&self, hz: f64) -> Result<TuningParameters, TuningError> {
        self.apply(TuningChange::SampleRate(hz))
    }

    pub fn antenna(&self) -> String {
        self.settled().params.antenna.clone()
    }

    pub fn set_antenna(&self, antenna: &str) -> Result<TuningParameters, TuningError> {
        self.apply(TuningChange::Antenna(antenna.to_owned()))
    }

    /// Frequency axis the display should be using for the accepted parameters
    pub fn display_axis(&self) -> FrequencyAxis {
        frequency_axis(self.sample_rate())
    }
}

fn copy_field(slot: &mut TuningParameters, from: &TuningParameters, field: Field) {
    match field {
        Field::Antenna => slot.antenna = from.antenna.clone(),
        Field::Gain => slot.gain_db = from.gain_db,
        Field::CenterFrequency => slot.center_frequency_hz = from.center_frequency_hz,
        Field::SampleRate => slot.sample_rate_hz = from.sample_rate_hz,
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::{radio::SimRadio, source::SampleSource};

    /// Stand-in for the capture thread: services requests against a real source
    fn serve(requests: Receiver<RetuneRequest>, radio: SimRadio) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut src =
                SampleSource::new(Box::new(radio.unpaced()), 64, Duration::from_millis(10));
            src.configure(&TuningParameters::default()).unwrap();
            for req in requests {
                let _ = req.reply.send(src.retune(&req.change));
            }
        })
    }

    #[test]
    fn test_accepted_change_is_echoed() {
        let (ctl, rx) = TuningController::new(TuningParameters::default(), Duration::from_secs(1));
        let _srv = serve(rx, SimRadio::new());
        let echoed = ctl.set_sample_rate(2e6).unwrap();
        assert_eq!(echoed.sample_rate_hz, 2e6);
        assert_eq!(ctl.sample_rate(), 2e6);
        assert_eq!(ctl.display_axis(), FrequencyAxis { start_hz: 0.0, end_hz: 2e6 });
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[test]
    fn test_rejected_gain_restores_previous() {
        let (ctl, rx) = TuningController::new(TuningParameters::default(), Duration::from_secs(1));
        let _srv = serve(rx, SimRadio::new());
        ctl.set_gain(35.0).unwrap();
        assert_eq!(ctl.set_gain(-5.0), Err(TuningError::Rejected(Field::Gain)));
        assert_eq!(ctl.set_gain(200.0), Err(TuningError::Rejected(Field::Gain)));
        assert_eq!(ctl.gain(), 35.0);
    }

    #[test]
    fn test_fields_are_independent() {
        let (ctl, rx) = TuningController::new(TuningParameters::default(), Duration::from_secs(1));
        let _srv = serve(rx, SimRadio::new());
        let ctl = Arc::new(ctl);
        let a = {
            let ctl = ctl.clone();
            thread::spawn(move || ctl.set_center_frequency(915e6))
        };
        let b = {
            let ctl = ctl.clone();
            thread::spawn(move || ctl.set_antenna("TX/RX"))
        };
        a.join().unwrap().unwrap();
        b.join().unwrap().unwrap();
        let p = ctl.parameters();
        assert_eq!(p.center_frequency_hz, 915e6);
        assert_eq!(p.antenna, "TX/RX");
        assert_eq!(p.gain_db, 20.0);
    }

    #[test]
    fn test_same_field_last_write_wins() {
        let (ctl, rx) = TuningController::new(TuningParameters::default(), Duration::from_secs(1));
        let ctl = Arc::new(ctl);
        // Hold both requests so the first is still in flight when the second lands
        let first = {
            let ctl = ctl.clone();
            thread::spawn(move || ctl.set_gain(10.0))
        };
        let req1 = rx.recv().unwrap();
        assert_eq!(ctl.state(), ControllerState::Applying);
        let second = {
            let ctl = ctl.clone();
            thread::spawn(move || ctl.set_gain(40.0))
        };
        let req2 = rx.recv().unwrap();

        let mut src = SampleSource::new(
            Box::new(SimRadio::new().unpaced()),
            64,
            Duration::from_millis(10),
        );
        src.configure(&TuningParameters::default()).unwrap();
        req1.reply.send(src.retune(&req1.change)).unwrap();
        assert_eq!(first.join().unwrap(), Err(TuningError::Superseded(Field::Gain)));
        req2.reply.send(src.retune(&req2.change)).unwrap();
        assert_eq!(second.join().unwrap().unwrap().gain_db, 40.0);
        assert_eq!(ctl.gain(), 40.0);
        assert_eq!(src.parameters().unwrap().gain_db, 40.0);
    }

    #[test]
    fn test_overtaken_change_still_lands_when_newer_is_rejected() {
        let (ctl, rx) = TuningController::new(TuningParameters::default(), Duration::from_secs(1));
        let ctl = Arc::new(ctl);
        let first = {
            let ctl = ctl.clone();
            thread::spawn(move || ctl.set_gain(10.0))
        };
        let req1 = rx.recv().unwrap();
        let second = {
            let ctl = ctl.clone();
            thread::spawn(move || ctl.set_gain(60.0))
        };
        let req2 = rx.recv().unwrap();

        let mut src = SampleSource::new(
            Box::new(SimRadio::new().unpaced()),
            64,
            Duration::from_millis(10),
        );
        src.configure(&TuningParameters::default()).unwrap();
        req1.reply.send(src.retune(&req1.change)).unwrap();
        req2.reply.send(src.retune(&req2.change)).unwrap();

        assert_eq!(first.join().unwrap(), Err(TuningError::Superseded(Field::Gain)));
        assert_eq!(second.join().unwrap(), Err(TuningError::Rejected(Field::Gain)));
        // The radio kept 10 dB, so must the slot
        assert_eq!(src.parameters().unwrap().gain_db, 10.0);
        assert_eq!(ctl.gain(), 10.0);
        assert_eq!(ctl.parameters(), *src.parameters().unwrap());
    }

    #[test]
    fn test_change_applied_after_timeout_is_picked_up() {
        let (ctl, rx) =
            TuningController::new(TuningParameters::default(), Duration::from_millis(20));
        assert_eq!(ctl.set_gain(30.0), Err(TuningError::Timeout));
        assert_eq!(ctl.gain(), 20.0);

        // The capture thread gets to it after the caller gave up
        let mut src = SampleSource::new(
            Box::new(SimRadio::new().unpaced()),
            64,
            Duration::from_millis(10),
        );
        src.configure(&TuningParameters::default()).unwrap();
        let req = rx.recv().unwrap();
        req.reply.send(src.retune(&req.change)).unwrap();

        assert_eq!(ctl.gain(), 30.0);
        assert_eq!(ctl.state(), ControllerState::Idle);
    }

    #[test]
    fn test_offline_when_capture_gone() {
        let (ctl, rx) = TuningController::new(TuningParameters::default(), Duration::from_secs(1));
        drop(rx);
        assert_eq!(ctl.set_gain(10.0), Err(TuningError::Offline));
        assert_eq!(ctl.state(), ControllerState::Idle);
    }
}
