//! The acquisition loop: gate a pushed sample stream into a fixed number of fixed-duration
//! epochs and analyse every completed epoch.
//!
//! ```text
//!   driver --push--> queue --> epochs() --(epoch, buf)--> analysis() --> sink + live session
//! ```
//!
//! `epochs()` owns the open buffer and is the only reader of the queue. It waits out each epoch
//! while appending whatever arrives, and polls for a stop request every `poll_interval`. A closed
//! buffer is handed to `analysis()` and the next epoch is opened right away: analysis runs on
//! the blocking pool and never holds up sample delivery. Epochs are analysed one at a time, so
//! results reach the sink in order.
//!
//! The stream is opened by `start`. A stopped session discards the open epoch. The stream is
//! released (its guard dropped) as soon as collection ends, on every path, including when the
//! [Acquisition] itself is dropped mid-session.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::StreamConfig;
use crate::decimate::{Decimator, Point};
use crate::features::FeatureExtractor;
use crate::sample::{self, Sample};
use crate::session::SessionContext;
use crate::sink::ResultSink;
use crate::source::{SampleSender, SampleSource, SourceError};
use crate::spectrum::Spectrum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum State {
    Idle,
    Collecting,
}

/// Result of one completed epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochResult<S> {
    /// Starts at 1.
    pub epoch: u32,

    /// Samples in the order and precision they were delivered.
    pub raw: Vec<S>,

    /// Nominal sampling rate of `raw` in Hz.
    pub sampling_rate: f64,
    pub spectrum: Spectrum,
    pub rms: f64,
    pub dominant_freq: f64,
}

impl<S: Sample> EpochResult<S> {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Live state of a session, for display.
#[derive(Debug, Clone)]
pub struct Session<S> {
    pub state: State,

    /// Index of the open epoch, 0 when idle.
    pub epoch: u32,
    pub elapsed_ms: u64,

    /// Samples in the open epoch.
    pub samples: usize,

    pub results: Vec<Arc<EpochResult<S>>>,

    /// Decimated trace of all completed epochs.
    pub display: Vec<Point>,
}

impl<S> Session<S> {
    pub fn new() -> Session<S> {
        Session {
            state: State::Idle,
            epoch: 0,
            elapsed_ms: 0,
            samples: 0,
            results: Vec::new(),
            display: Vec::new(),
        }
    }

    fn reset(&mut self) {
        *self = Session::new();
    }

    /// Back to idle. Completed results are kept for display until the next start.
    fn finish(&mut self) {
        self.state = State::Idle;
        self.epoch = 0;
        self.elapsed_ms = 0;
        self.samples = 0;
    }

    pub fn latest(&self) -> Option<&Arc<EpochResult<S>>> {
        self.results.last()
    }

    /// Dominant frequency per epoch.
    pub fn trend(&self) -> Vec<(u32, f64)> {
        self.results
            .iter()
            .map(|r| (r.epoch, r.dominant_freq))
            .collect()
    }

    pub fn rms_trend(&self) -> Vec<(u32, f64)> {
        self.results.iter().map(|r| (r.epoch, r.rms)).collect()
    }
}

impl<S> Default for Session<S> {
    fn default() -> Self {
        Session::new()
    }
}

pub type Live<S> = Arc<RwLock<Session<S>>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// All epochs were collected.
    Completed,

    /// Stopped on request, the open epoch was discarded.
    Stopped,

    /// The stream failed to open or died.
    Aborted(SourceError),
}

#[derive(Debug, Clone)]
pub struct Report<S> {
    pub context: SessionContext,
    pub outcome: Outcome,
    pub results: Vec<Arc<EpochResult<S>>>,

    /// Samples dropped on queue overrun.
    pub dropped: u64,
}

#[derive(Debug)]
pub enum Error {
    AlreadyCollecting,
    NotStarted,

    /// The session task panicked.
    Task(JoinError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AlreadyCollecting => write!(f, "a session is already collecting"),
            Error::NotStarted => write!(f, "no session has been started"),
            Error::Task(e) => write!(f, "session task failed: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Error {
        Error::Task(e)
    }
}

/// Requests the running session to stop.
#[derive(Debug, Clone)]
pub struct Stopper(Arc<AtomicBool>);

impl Stopper {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs at most one session at a time for one stream.
pub struct Acquisition<Src: SampleSource, E, K> {
    config: StreamConfig,
    source: Arc<Src>,
    extractor: Arc<E>,
    sink: Arc<K>,
    live: Live<Src::Sample>,
    stop: Stopper,
    task: Option<JoinHandle<Report<Src::Sample>>>,
}

impl<Src, E, K> Acquisition<Src, E, K>
where
    Src: SampleSource,
    E: FeatureExtractor,
    K: ResultSink<Src::Sample>,
{
    pub fn new(
        config: StreamConfig,
        source: Arc<Src>,
        extractor: E,
        sink: Arc<K>,
    ) -> Acquisition<Src, E, K> {
        Acquisition {
            config,
            source,
            extractor: Arc::new(extractor),
            sink,
            live: Arc::new(RwLock::new(Session::new())),
            stop: Stopper(Arc::new(AtomicBool::new(false))),
            task: None,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Shared live state of the current (or last) session.
    pub fn session(&self) -> Live<Src::Sample> {
        Arc::clone(&self.live)
    }

    /// Stop handle, valid for every session of this acquisition.
    pub fn stopper(&self) -> Stopper {
        self.stop.clone()
    }

    pub fn is_collecting(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Clear all session state, open the stream and start collecting in the background.
    ///
    /// The stream is open when this returns. If it could not be opened the session ends right
    /// away with [Outcome::Aborted], reported by `wait`.
    pub async fn start(&mut self, ctx: SessionContext) -> Result<(), Error> {
        let kind = <Src::Sample as Sample>::KIND;

        if self.is_collecting() {
            warn!("{}: start requested while collecting, ignoring", kind);
            return Err(Error::AlreadyCollecting);
        }

        if let Some(prev) = self.task.take() {
            match prev.await {
                Ok(r) => debug!(
                    "reaped previous session {}: {:?}",
                    r.context.session_id, r.outcome
                ),
                Err(e) => error!("previous session failed: {}", e),
            }
        }

        self.stop.clear();

        {
            let mut s = self.live.write().await;
            s.reset();
            s.state = State::Collecting;
        }

        info!(
            "{}: starting session {} for {} ({} epochs of {} ms)",
            kind,
            ctx.session_id,
            ctx.user_id,
            self.config.epoch_count,
            self.config.epoch_duration_ms
        );

        let (tx, rx) = SampleSender::channel(self.config.queue_capacity);
        let overruns = tx.overruns();

        let stream = match self.source.open(tx) {
            Ok(stream) => stream,
            Err(e) => {
                error!("{}: could not open stream: {}", kind, e);
                self.live.write().await.finish();

                let report = Report {
                    context: ctx,
                    outcome: Outcome::Aborted(e),
                    results: Vec::new(),
                    dropped: 0,
                };
                self.task = Some(tokio::spawn(async move { report }));

                return Ok(());
            }
        };

        self.task = Some(tokio::spawn(collect(
            self.config.clone(),
            stream,
            rx,
            overruns,
            Arc::clone(&self.extractor),
            Arc::clone(&self.sink),
            Arc::clone(&self.live),
            self.stop.clone(),
            ctx,
        )));

        Ok(())
    }

    pub fn stop(&self) {
        debug!("{}: stop requested", <Src::Sample as Sample>::KIND);
        self.stop.stop();
    }

    /// Wait for the current session to end.
    pub async fn wait(&mut self) -> Result<Report<Src::Sample>, Error> {
        let task = self.task.take().ok_or(Error::NotStarted)?;

        match task.await {
            Ok(r) => Ok(r),
            Err(e) => {
                error!("{}: session task failed: {}", <Src::Sample as Sample>::KIND, e);
                self.live.write().await.finish();
                Err(e.into())
            }
        }
    }

    /// Start a session and wait for it to end.
    pub async fn run(&mut self, ctx: SessionContext) -> Result<Report<Src::Sample>, Error> {
        self.start(ctx).await?;
        self.wait().await
    }
}

impl<Src: SampleSource, E, K> Drop for Acquisition<Src, E, K> {
    /// Ends a running session: the task is aborted, which releases the stream and publishes
    /// nothing more.
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                warn!(
                    "{}: dropped while collecting, aborting session",
                    <Src::Sample as Sample>::KIND
                );
            }

            self.stop.stop();
            task.abort();

            if let Ok(mut s) = self.live.try_write() {
                s.finish();
            }
        }
    }
}

/// A task that is aborted together with its owner.
struct Scoped<T>(JoinHandle<T>);

impl<T> Drop for Scoped<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[allow(clippy::too_many_arguments)]
async fn collect<S, St, E, K>(
    config: StreamConfig,
    stream: St,
    mut rx: mpsc::Receiver<Vec<S>>,
    overruns: Arc<AtomicU64>,
    extractor: Arc<E>,
    sink: Arc<K>,
    live: Live<S>,
    stop: Stopper,
    ctx: SessionContext,
) -> Report<S>
where
    S: Sample,
    St: Send + 'static,
    E: FeatureExtractor,
    K: ResultSink<S>,
{
    let kind = S::KIND;

    let (etx, erx) = mpsc::unbounded_channel();
    let mut analysis = Scoped(tokio::spawn(analysis(
        config.sampling_rate,
        Decimator::new(config.max_display_points, config.display_stride),
        extractor,
        sink,
        Arc::clone(&live),
        ctx.clone(),
        erx,
    )));

    let outcome = epochs(&config, &mut rx, &stop, &live, &etx).await;

    drop(stream);
    drop(rx);
    drop(etx);
    debug!("{}: stream released", kind);

    let results = match (&mut analysis.0).await {
        Ok(results) => results,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            error!("{}: analysis task cancelled: {}", kind, e);
            Vec::new()
        }
    };

    live.write().await.finish();

    let dropped = overruns.load(Ordering::Relaxed);
    info!(
        "{}: session {} ended: {:?}, {} epochs, {} samples dropped",
        kind,
        ctx.session_id,
        outcome,
        results.len(),
        dropped
    );

    Report {
        context: ctx,
        outcome,
        results,
        dropped,
    }
}

/// Collect the epochs. Returns when all epochs are closed, on stop or when the stream dies.
async fn epochs<S: Sample>(
    config: &StreamConfig,
    rx: &mut mpsc::Receiver<Vec<S>>,
    stop: &Stopper,
    live: &Live<S>,
    etx: &mpsc::UnboundedSender<(u32, Vec<S>)>,
) -> Outcome {
    let mut poll = time::interval(config.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for epoch in 1..=config.epoch_count {
        let mut buf: Vec<S> = Vec::new();
        let start = Instant::now();
        let close = time::sleep_until(start + config.epoch_duration());
        tokio::pin!(close);

        {
            let mut s = live.write().await;
            s.epoch = epoch;
            s.elapsed_ms = 0;
            s.samples = 0;
        }

        trace!("epoch {} opened", epoch);

        loop {
            tokio::select! {
                biased;

                _ = &mut close => {
                    // Anything still queued was delivered during this epoch.
                    while let Ok(b) = rx.try_recv() {
                        buf.extend(b);
                    }
                    break;
                }

                _ = poll.tick() => {
                    if stop.is_stopped() {
                        info!(
                            "stopped during epoch {}, discarding {} samples",
                            epoch,
                            buf.len()
                        );
                        return Outcome::Stopped;
                    }

                    let mut s = live.write().await;
                    s.elapsed_ms = start.elapsed().as_millis() as u64;
                    s.samples = buf.len();
                }

                b = rx.recv() => match b {
                    Some(b) => buf.extend(b),
                    None => {
                        error!(
                            "stream closed during epoch {}, discarding {} samples",
                            epoch,
                            buf.len()
                        );
                        return Outcome::Aborted(SourceError::Closed);
                    }
                },
            }
        }

        debug!("epoch {} closed: {} samples", epoch, buf.len());

        if etx.send((epoch, buf)).is_err() {
            // Only happens if analysis has died, which is reported when it is joined.
            error!("analysis is gone, ending collection at epoch {}", epoch);
            return Outcome::Stopped;
        }
    }

    Outcome::Completed
}

/// Analyse closed epochs in order, publish them and update the live session.
async fn analysis<S, E, K>(
    sampling_rate: f64,
    decimator: Decimator,
    extractor: Arc<E>,
    sink: Arc<K>,
    live: Live<S>,
    ctx: SessionContext,
    mut erx: mpsc::UnboundedReceiver<(u32, Vec<S>)>,
) -> Vec<Arc<EpochResult<S>>>
where
    S: Sample,
    E: FeatureExtractor,
    K: ResultSink<S>,
{
    let mut results = Vec::new();
    let mut trace: Vec<f64> = Vec::new();

    while let Some((epoch, raw)) = erx.recv().await {
        let ex = Arc::clone(&extractor);

        let computed = task::spawn_blocking(move || {
            let values = sample::values(&raw);
            let features = ex.extract(&values, sampling_rate);
            (raw, values, features)
        })
        .await;

        let (raw, values, features) = match computed {
            Ok(c) => c,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                error!("analysis of epoch {} cancelled: {}", epoch, e);
                break;
            }
        };

        let r = Arc::new(EpochResult {
            epoch,
            raw,
            sampling_rate,
            spectrum: features.spectrum,
            rms: features.rms,
            dominant_freq: features.dominant_freq,
        });

        info!(
            "epoch {}: {} samples, rms: {:.3}, dominant frequency: {:.2} Hz",
            epoch,
            r.len(),
            r.rms,
            r.dominant_freq
        );

        sink.publish(&ctx, &r);

        trace.extend(values);
        let display = decimator.apply(&trace);

        {
            let mut s = live.write().await;
            s.results.push(Arc::clone(&r));
            s.display = display;
        }

        results.push(r);
    }

    results
}
