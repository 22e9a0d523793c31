//! Upstream sample sources.
//!
//! Drivers push samples (one at a time from a sensor listener, or in chunks from an audio
//! record buffer) into a bounded queue through a [SampleSender]. The acquisition loop drains the
//! queue on its own schedule. Pushing never blocks: if the queue is full the batch is dropped
//! and counted.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::sample::Sample;

#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The device could not be opened (busy, missing or permission revoked).
    Unavailable(String),

    /// The stream stopped delivering: the other end of the queue is gone.
    Closed,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unavailable(why) => write!(f, "stream unavailable: {}", why),
            SourceError::Closed => write!(f, "stream closed"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Driver end of the queue into the acquisition loop.
#[derive(Debug)]
pub struct SampleSender<S> {
    tx: mpsc::Sender<Vec<S>>,
    dropped: Arc<AtomicU64>,
}

impl<S> Clone for SampleSender<S> {
    fn clone(&self) -> Self {
        SampleSender {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<S: Sample> SampleSender<S> {
    /// Create a queue holding at most `capacity` batches.
    pub fn channel(capacity: usize) -> (SampleSender<S>, mpsc::Receiver<Vec<S>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        (
            SampleSender {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn push(&self, sample: S) -> Result<(), SourceError> {
        self.push_batch(vec![sample])
    }

    /// Queue a batch of samples. A full queue drops the batch, only a closed queue is an error.
    pub fn push_batch(&self, batch: Vec<S>) -> Result<(), SourceError> {
        if batch.is_empty() {
            return if self.tx.is_closed() {
                Err(SourceError::Closed)
            } else {
                Ok(())
            };
        }

        match self.tx.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(batch)) => {
                let n = batch.len() as u64;
                let total = self.dropped.fetch_add(n, Ordering::Relaxed) + n;
                warn!(
                    "sample queue overrun: dropped {} samples ({} in total)",
                    n, total
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SourceError::Closed),
        }
    }

    /// Number of samples dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Shared overrun counter, readable without holding the queue open.
    pub(crate) fn overruns(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

/// A live stream of samples (sensor listener registration, audio record handle).
///
/// `open` registers with the driver and returns a guard: the stream is released when the guard
/// is dropped, on every exit path of the acquisition loop.
pub trait SampleSource: Send + Sync + 'static {
    type Sample: Sample;
    type Stream: Send + 'static;

    fn open(&self, tx: SampleSender<Self::Sample>) -> Result<Self::Stream, SourceError>;
}

type GenFn<S> = dyn Fn(u64) -> Option<S> + Send + Sync;

/// Produces samples from a closure of the sample index at the nominal rate, delivered in chunks
/// every `chunk`. When the closure returns `None` the stream goes silent but stays open.
pub struct Generator<S> {
    rate: f64,
    chunk: Duration,
    gen: Arc<GenFn<S>>,
    active: Arc<AtomicUsize>,
}

impl<S: Sample> Generator<S> {
    pub fn new(rate: f64, gen: impl Fn(u64) -> Option<S> + Send + Sync + 'static) -> Generator<S> {
        Generator {
            rate,
            chunk: Duration::from_millis(10),
            gen: Arc::new(gen),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn constant(rate: f64, sample: S) -> Generator<S> {
        Generator::new(rate, move |_| Some(sample))
    }

    /// Never delivers a sample.
    pub fn silent(rate: f64) -> Generator<S> {
        Generator::new(rate, |_| None)
    }

    /// Replay recorded samples at the nominal rate.
    pub fn replay(rate: f64, samples: Vec<S>) -> Generator<S> {
        Generator::new(rate, move |i| samples.get(i as usize).copied())
    }

    pub fn with_chunk(mut self, chunk: Duration) -> Generator<S> {
        self.chunk = chunk.max(Duration::from_millis(1));
        self
    }

    /// Number of currently open streams.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct GeneratorStream {
    task: JoinHandle<()>,
    active: Arc<AtomicUsize>,
}

impl Drop for GeneratorStream {
    fn drop(&mut self) {
        self.task.abort();
        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!("generator stream released");
    }
}

impl<S: Sample> SampleSource for Generator<S> {
    type Sample = S;
    type Stream = GeneratorStream;

    fn open(&self, tx: SampleSender<S>) -> Result<GeneratorStream, SourceError> {
        if !self.rate.is_finite() || self.rate <= 0. {
            return Err(SourceError::Unavailable(format!(
                "invalid sampling rate: {}",
                self.rate
            )));
        }

        let rate = self.rate;
        let chunk = self.chunk;
        let gen = Arc::clone(&self.gen);

        debug!("opening generator stream at {} Hz, chunk: {:?}", rate, chunk);

        let task = tokio::spawn(async move {
            let start = Instant::now();
            let mut tick = time::interval(chunk);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut n: u64 = 0;

            loop {
                tick.tick().await;

                // Every sample with a timestamp up to now is due.
                let due = (start.elapsed().as_secs_f64() * rate).floor() as u64 + 1;
                let batch = (n..due).map_while(|i| gen(i)).collect::<Vec<_>>();
                let exhausted = (batch.len() as u64) < due - n.min(due);
                n += batch.len() as u64;

                if tx.push_batch(batch).is_err() {
                    trace!("generator: queue closed, stopping");
                    break;
                }

                if exhausted {
                    debug!("generator exhausted after {} samples, going silent", n);
                    // Keep `tx` alive: the stream is open but quiet.
                    std::future::pending::<()>().await;
                }
            }
        });

        self.active.fetch_add(1, Ordering::SeqCst);

        Ok(GeneratorStream {
            task,
            active: Arc::clone(&self.active),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Accel;
    use tokio::sync::mpsc::error::TryRecvError;

    #[tokio::test]
    async fn overrun_drops() {
        let (tx, mut rx) = SampleSender::<i16>::channel(2);

        tx.push_batch(vec![1, 2]).unwrap();
        tx.push_batch(vec![3]).unwrap();
        tx.push_batch(vec![4, 5, 6]).unwrap();

        assert_eq!(tx.dropped(), 3);
        assert_eq!(rx.recv().await.unwrap(), vec![1, 2]);
        assert_eq!(rx.recv().await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn closed_queue() {
        let (tx, rx) = SampleSender::<i16>::channel(2);
        drop(rx);

        assert_eq!(tx.push(1), Err(SourceError::Closed));
        assert_eq!(tx.push_batch(vec![]), Err(SourceError::Closed));
        assert!(tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn generator_rate() {
        let g = Generator::constant(40., Accel::new(0., 0., 1.));
        let (tx, mut rx) = SampleSender::channel(1024);

        let stream = g.open(tx).unwrap();
        assert_eq!(g.active(), 1);

        time::sleep(Duration::from_millis(1000)).await;
        drop(stream);
        assert_eq!(g.active(), 0);

        let mut n = 0;
        while let Ok(b) = rx.try_recv() {
            n += b.len();
        }

        // 0 .. 1 s inclusive, give or take the last chunk.
        assert!((40..=41).contains(&n), "n: {}", n);
    }

    #[tokio::test(start_paused = true)]
    async fn replay_goes_silent() {
        let g = Generator::replay(1000., vec![1i16, 2, 3, 4, 5]);
        let (tx, mut rx) = SampleSender::channel(64);

        let _stream = g.open(tx).unwrap();
        time::sleep(Duration::from_millis(100)).await;

        let mut got = Vec::new();
        while let Ok(b) = rx.try_recv() {
            got.extend(b);
        }

        assert_eq!(got, vec![1, 2, 3, 4, 5]);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn invalid_rate() {
        let g = Generator::<i16>::silent(0.);
        let (tx, _rx) = SampleSender::channel(1);
        assert!(matches!(g.open(tx), Err(SourceError::Unavailable(_))));
    }
}
