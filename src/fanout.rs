//! Fan-out of one block stream to several consumers.
//!
//! Every consumer gets its own bounded queue. When a queue is full the
//! producer throws away that consumer's oldest block and pushes the new one,
//! so a stalled consumer only ever loses its own data and the producer never
//! waits.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{trace, warn};

use crate::block::SampleBlock;

pub type SharedBlock = Arc<SampleBlock>;

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

struct Outlet {
    name: String,
    tx: Sender<SharedBlock>,
    // Producer-side handle on the same queue, used to evict the oldest block
    evict: Receiver<SharedBlock>,
    counters: Arc<Counters>,
}

/// Consumer end of one queue. The queue ends (after draining) once the
/// [`Fanout`] is dropped.
pub struct Subscription {
    name: String,
    rx: Receiver<SharedBlock>,
    counters: Arc<Counters>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the next block arrives or the stream ends
    pub fn recv(&self) -> Option<SharedBlock> {
        self.rx.recv().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = SharedBlock> + '_ {
        self.rx.iter()
    }

    /// For use in `select!`
    pub fn receiver(&self) -> &Receiver<SharedBlock> {
        &self.rx
    }

    /// Blocks evicted from this queue so far
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.counters.closed.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub name: String,
    pub delivered: u64,
    pub dropped: u64,
    pub queued: usize,
    pub closed: bool,
}

/// Cloneable read-only view of the fan-out counters
#[derive(Clone)]
pub struct FanoutStats {
    outlets: Arc<Vec<(String, Receiver<SharedBlock>, Arc<Counters>)>>,
}

impl FanoutStats {
    pub fn snapshot(&self) -> Vec<QueueStats> {
        self.outlets
            .iter()
            .map(|(name, rx, c)| QueueStats {
                name: name.clone(),
                delivered: c.delivered.load(Ordering::Relaxed),
                dropped: c.dropped.load(Ordering::Relaxed),
                queued: rx.len(),
                closed: c.closed.load(Ordering::Acquire),
            })
            .collect()
    }
}

#[derive(Default)]
pub struct Fanout {
    outlets: Vec<Outlet>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a consumer with a queue of `capacity` blocks
    pub fn subscribe(&mut self, name: impl Into<String>, capacity: usize) -> Subscription {
        let name = name.into();
        let (tx, rx) = bounded(capacity.max(1));
        let counters = Arc::new(Counters::default());
        self.outlets.push(Outlet {
            name: name.clone(),
            tx,
            evict: rx.clone(),
            counters: counters.clone(),
        });
        Subscription { name, rx, counters }
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            outlets: Arc::new(
                self.outlets
                    .iter()
                    .map(|o| (o.name.clone(), o.evict.clone(), o.counters.clone()))
                    .collect(),
            ),
        }
    }

    /// Hand `block` to every live consumer without ever blocking
    pub fn publish(&self, block: SampleBlock) {
        let block = Arc::new(block);
        for outlet in &self.outlets {
            if outlet.counters.closed.load(Ordering::Acquire) {
                continue;
            }
            let mut pending = block.clone();
            loop {
                match outlet.tx.try_send(pending) {
                    Ok(()) => {
                        outlet.counters.delivered.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Err(TrySendError::Full(back)) => {
                        pending = back;
                        if let Ok(old) = outlet.evict.try_recv() {
                            let total = outlet.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                            trace!(consumer = %outlet.name, sequence = old.sequence, "evicted oldest block");
                            if total.is_power_of_two() {
                                warn!(consumer = %outlet.name, dropped = total, "consumer falling behind");
                            }
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }
}
