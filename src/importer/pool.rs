//! Fixed-capacity worker pool with a completion barrier.
//!
//! `capacity` scoped worker threads drain a bounded queue of the same
//! capacity. The feeder submits through a [`Submitter`]; when the queue is
//! full only the feeder blocks. Once the feeder returns, the queue is closed,
//! the workers drain what is left and the scope join acts as the barrier:
//! [`BoundedImportPool::run`] returns only after every submitted item has
//! reported an outcome, failures included.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Sender};

use crate::common::ImportAttributes;
use crate::error::ImportError;

/// Default number of concurrently executing import tasks.
pub const DEFAULT_CAPACITY: usize = 256;

/// One object to import.
#[derive(Debug, Clone)]
pub struct ImportItem {
    pub key: String,
    pub size: u64,
    pub attrs: ImportAttributes,
}

/// What happened to one submitted item.
#[derive(Debug)]
pub struct ItemOutcome {
    pub key: String,
    pub result: Result<(), ImportError>,
}

/// Counts tasks currently executing and remembers the highest count seen.
#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Handle the feeder uses to queue work.
pub struct Submitter {
    tx: Sender<ImportItem>,
    submitted: AtomicUsize,
}

impl Submitter {
    /// Queue `item`, blocking while the queue is full.
    ///
    /// Returns `false` if every worker has gone away, which only happens when a
    /// worker panicked.
    pub fn submit(&self, item: ImportItem) -> bool {
        let sent = self.tx.send(item).is_ok();
        if sent {
            self.submitted.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }
}

/// Everything a pool run produced.
#[derive(Debug)]
pub struct PoolOutput<T> {
    /// Whatever the feeder returned.
    pub feed: T,
    /// One entry per submitted item, in completion order.
    pub outcomes: Vec<ItemOutcome>,
    /// Highest number of tasks observed executing at once.
    pub peak_in_flight: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BoundedImportPool {
    capacity: usize,
}

impl Default for BoundedImportPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BoundedImportPool {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run `feed` against a fresh set of workers executing `worker`, then wait
    /// for every submitted item to finish.
    pub fn run<W, F, T>(&self, worker: W, feed: F) -> PoolOutput<T>
    where
        W: Fn(&ImportItem) -> Result<(), ImportError> + Sync,
        F: FnOnce(&Submitter) -> T,
    {
        let (work_tx, work_rx) = bounded::<ImportItem>(self.capacity);
        let (done_tx, done_rx) = unbounded::<ItemOutcome>();
        let in_flight = InFlight::default();

        let feed_result = thread::scope(|s| {
            for _ in 0..self.capacity {
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                let worker = &worker;
                let in_flight = &in_flight;

                s.spawn(move || {
                    for item in work_rx {
                        in_flight.enter();
                        let result = worker(&item);
                        in_flight.leave();
                        if done_tx.send(ItemOutcome { key: item.key, result }).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(work_rx);
            drop(done_tx);

            let submitter = Submitter { tx: work_tx, submitted: AtomicUsize::new(0) };
            let out = feed(&submitter);
            // Closing the queue lets the workers finish and the scope join.
            drop(submitter);
            out
        });

        PoolOutput { feed: feed_result, outcomes: done_rx.try_iter().collect(), peak_in_flight: in_flight.peak() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, SystemTime};

    fn item(i: usize) -> ImportItem {
        let now = SystemTime::now();
        ImportItem {
            key: format!("obj-{i}"),
            size: i as u64,
            attrs: ImportAttributes { uid: 1000, gid: 1000, mode: 0o644, size: i as u64, atime: now, mtime: now },
        }
    }

    #[test]
    fn test_in_flight_keeps_highest_count() {
        let counter = InFlight::default();
        counter.enter();
        counter.enter();
        counter.leave();
        counter.enter();
        counter.leave();
        counter.leave();
        assert_eq!(counter.peak(), 2);
        assert_eq!(counter.current.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let pool = BoundedImportPool::new(4);
        let out = pool.run(
            |_| {
                thread::sleep(Duration::from_millis(5));
                Ok(())
            },
            |sub| {
                for i in 0..64 {
                    assert!(sub.submit(item(i)));
                }
                sub.submitted()
            },
        );
        assert_eq!(out.feed, 64);
        assert_eq!(out.outcomes.len(), 64);
        assert!(out.peak_in_flight <= 4, "peak {}", out.peak_in_flight);
        assert!(out.peak_in_flight >= 1);
    }

    #[test]
    fn test_barrier_waits_for_slow_items() {
        let finished = AtomicUsize::new(0);
        let pool = BoundedImportPool::new(8);
        let out = pool.run(
            |_| {
                thread::sleep(Duration::from_millis(20));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            |sub| {
                for i in 0..10 {
                    sub.submit(item(i));
                }
            },
        );
        assert_eq!(finished.load(Ordering::SeqCst), 10);
        assert_eq!(out.outcomes.len(), 10);
    }

    #[test]
    fn test_failures_do_not_stop_the_batch() {
        let pool = BoundedImportPool::new(3);
        let out = pool.run(
            |item| {
                if item.size % 3 == 0 {
                    Err(ImportError::Register {
                        path: PathBuf::from(&item.key),
                        source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
                    })
                } else {
                    Ok(())
                }
            },
            |sub| {
                for i in 0..30 {
                    sub.submit(item(i));
                }
            },
        );
        let failed = out.outcomes.iter().filter(|o| o.result.is_err()).count();
        assert_eq!(out.outcomes.len(), 30);
        assert_eq!(failed, 10);
    }

    #[test]
    fn test_empty_feed() {
        let called = AtomicBool::new(false);
        let out = BoundedImportPool::new(2).run(
            |_| {
                called.store(true, Ordering::SeqCst);
                Ok(())
            },
            |_| (),
        );
        assert!(out.outcomes.is_empty());
        assert_eq!(out.peak_in_flight, 0);
        assert!(!called.load(Ordering::SeqCst));
    }
}
