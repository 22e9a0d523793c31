//! Consumers of completed epochs.
//!
//! `publish` is called once per completed epoch, in epoch order, from the analysis task. It must
//! not block: slow work (file or network IO) is spawned.

use sanitize_filename::sanitize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::acquisition::EpochResult;
use crate::sample::Sample;
use crate::session::SessionContext;
use crate::wire::{EpochMeta, EpochNote, Wire};

pub trait ResultSink<S: Sample>: Send + Sync + 'static {
    fn publish(&self, ctx: &SessionContext, result: &Arc<EpochResult<S>>);
}

/// Keeps every published result.
pub struct MemorySink<S> {
    results: Mutex<Vec<Arc<EpochResult<S>>>>,
}

impl<S: Sample> MemorySink<S> {
    pub fn new() -> MemorySink<S> {
        MemorySink {
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn results(&self) -> Vec<Arc<EpochResult<S>>> {
        self.results
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        match self.results.lock() {
            Ok(r) => r.len(),
            Err(p) => p.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Sample> Default for MemorySink<S> {
    fn default() -> Self {
        MemorySink::new()
    }
}

impl<S: Sample> ResultSink<S> for MemorySink<S> {
    fn publish(&self, _ctx: &SessionContext, result: &Arc<EpochResult<S>>) {
        match self.results.lock() {
            Ok(mut r) => r.push(Arc::clone(result)),
            Err(p) => p.into_inner().push(Arc::clone(result)),
        }
    }
}

pub struct LogSink;

impl<S: Sample> ResultSink<S> for LogSink {
    fn publish(&self, ctx: &SessionContext, r: &Arc<EpochResult<S>>) {
        info!(
            "{} {}/{} epoch {}: {} samples, {} bins, rms: {:.3}, dominant: {:.2} Hz",
            S::KIND,
            ctx.user_id,
            ctx.session_id,
            r.epoch,
            r.len(),
            r.spectrum.len(),
            r.rms,
            r.dominant_freq
        );
    }
}

/// Prints every epoch as a JSON [EpochNote] on stdout, one per line.
pub struct NoteSink;

impl<S: Wire> ResultSink<S> for NoteSink {
    fn publish(&self, ctx: &SessionContext, r: &Arc<EpochResult<S>>) {
        match EpochNote::new::<S>(ctx, r).and_then(|n| Ok(serde_json::to_string(&n)?)) {
            Ok(n) => println!("{}", n),
            Err(e) => error!("could not encode epoch {}: {:?}", r.epoch, e),
        }
    }
}

/// Stores epochs under `<root>/<motion|voice>/<user>/<session>/epoch_<n>.<ext>`, with the
/// metadata next to it in `epoch_<n>.meta.json`. Epochs of sessions that are not shared are
/// skipped.
pub struct FileSink {
    root: PathBuf,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> FileSink {
        FileSink {
            root: root.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of spawned writes not yet known to be finished.
    pub fn pending(&self) -> usize {
        match self.pending.lock() {
            Ok(p) => p.len(),
            Err(p) => p.into_inner().len(),
        }
    }

    pub fn path<S: Wire>(&self, ctx: &SessionContext, epoch: u32) -> PathBuf {
        self.root
            .join(S::KIND.dir())
            .join(sanitize(&ctx.user_id))
            .join(sanitize(&ctx.session_id))
            .join(format!("epoch_{}.{}", epoch, S::EXTENSION))
    }

    /// Write one epoch and its metadata, returns the path of the samples.
    pub async fn write<S: Wire>(
        &self,
        ctx: &SessionContext,
        r: &EpochResult<S>,
    ) -> eyre::Result<PathBuf> {
        let path = self.path::<S>(ctx, r.epoch);
        write(path, EpochMeta::new(ctx, r), S::encode(&r.raw)?).await
    }

    /// Wait for all writes spawned so far.
    pub async fn flush(&self) {
        let pending = match self.pending.lock() {
            Ok(mut p) => std::mem::take(&mut *p),
            Err(p) => std::mem::take(&mut *p.into_inner()),
        };

        for w in pending {
            if let Err(e) = w.await {
                error!("file write task failed: {}", e);
            }
        }
    }
}

async fn write(path: PathBuf, meta: EpochMeta, payload: Vec<u8>) -> eyre::Result<PathBuf> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    debug!("writing to: {:?}", path);
    tokio::fs::write(&path, payload).await?;
    tokio::fs::write(
        path.with_extension("meta.json"),
        serde_json::to_vec_pretty(&meta)?,
    )
    .await?;

    Ok(path)
}

impl<S: Wire> ResultSink<S> for FileSink {
    fn publish(&self, ctx: &SessionContext, r: &Arc<EpochResult<S>>) {
        if !ctx.share {
            warn!(
                "{}: sharing disabled for {}, not storing epoch {}",
                S::KIND,
                ctx.user_id,
                r.epoch
            );
            return;
        }

        let payload = match S::encode(&r.raw) {
            Ok(p) => p,
            Err(e) => {
                error!("could not encode epoch {}: {:?}", r.epoch, e);
                return;
            }
        };

        let path = self.path::<S>(ctx, r.epoch);
        let meta = EpochMeta::new::<S>(ctx, r);

        let w = tokio::spawn(async move {
            if let Err(e) = write(path.clone(), meta, payload).await {
                error!("failed to write {:?}: {:?}", path, e);
            }
        });

        let mut pending = match self.pending.lock() {
            Ok(p) => p,
            Err(p) => p.into_inner(),
        };
        pending.retain(|h| !h.is_finished());
        pending.push(w);
    }
}

/// Publishes to every sink in order.
pub struct Fanout<S> {
    sinks: Vec<Box<dyn ResultSink<S>>>,
}

impl<S: Sample> Fanout<S> {
    pub fn new() -> Fanout<S> {
        Fanout { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: impl ResultSink<S>) -> Fanout<S> {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn ResultSink<S>>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl<S: Sample> Default for Fanout<S> {
    fn default() -> Self {
        Fanout::new()
    }
}

impl<S: Sample> ResultSink<S> for Fanout<S> {
    fn publish(&self, ctx: &SessionContext, r: &Arc<EpochResult<S>>) {
        for s in &self.sinks {
            s.publish(ctx, r);
        }
    }
}

impl<S: Sample, K: ResultSink<S>> ResultSink<S> for Arc<K> {
    fn publish(&self, ctx: &SessionContext, r: &Arc<EpochResult<S>>) {
        (**self).publish(ctx, r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Accel;
    use crate::spectrum::{Scale, Spectrum};
    use std::time::Duration;

    fn result<S: Sample>(epoch: u32, raw: Vec<S>) -> Arc<EpochResult<S>> {
        Arc::new(EpochResult {
            epoch,
            raw,
            sampling_rate: 40.,
            spectrum: Spectrum::empty(Scale::Power),
            rms: 0.,
            dominant_freq: 0.,
        })
    }

    fn tmp(name: &str) -> PathBuf {
        let d = std::env::temp_dir().join(format!(
            "gloveworks-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&d);
        d
    }

    #[test]
    fn memory_in_order() {
        let ctx = SessionContext::new("u", false);
        let s = MemorySink::<i16>::new();
        for e in 1..=3 {
            s.publish(&ctx, &result(e, vec![1i16]));
        }

        assert_eq!(s.len(), 3);
        assert!(!s.is_empty());

        assert_eq!(
            s.results().iter().map(|r| r.epoch).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn fanout_all() {
        let ctx = SessionContext::new("u", false);
        let a = Arc::new(MemorySink::<Accel>::new());
        let b = Arc::new(MemorySink::<Accel>::new());

        let f = Fanout::<Accel>::new()
            .with(Arc::clone(&a))
            .with(LogSink)
            .with(Arc::clone(&b));
        assert_eq!(f.len(), 3);

        f.publish(&ctx, &result(1, vec![Accel::default()]));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn file_path_sanitized() {
        let s = FileSink::new("/data");
        let mut ctx = SessionContext::new("../glw_anon/x", true);
        ctx.session_id = "s1".into();

        let p = s.path::<i16>(&ctx, 3);
        assert_eq!(p.file_name().unwrap(), "epoch_3.pcm");
        assert_eq!(
            p.parent().and_then(Path::parent).and_then(Path::parent),
            Some(Path::new("/data/voice"))
        );
    }

    #[tokio::test]
    async fn file_write() {
        let root = tmp("write");
        let s = FileSink::new(&root);
        let ctx = SessionContext::new("glw_anon_ABCD123", true);

        let p = s.write::<i16>(&ctx, &result(2, vec![1i16, -1])).await.unwrap();
        assert_eq!(std::fs::read(&p).unwrap(), vec![1, 0, 0xff, 0xff]);

        let meta: EpochMeta =
            serde_json::from_slice(&std::fs::read(p.with_extension("meta.json")).unwrap()).unwrap();
        assert_eq!(meta.epoch, 2);
        assert_eq!(meta.samples, 2);
        assert_eq!(meta.session_id, ctx.session_id);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn finished_writes_are_forgotten() {
        let root = tmp("pending");
        let s = FileSink::new(&root);
        let ctx = SessionContext::new("u", true);

        for e in 1..=20 {
            s.publish(&ctx, &result(e, vec![1i16, 2, 3]));

            let meta = s.path::<i16>(&ctx, e).with_extension("meta.json");
            tokio::time::timeout(Duration::from_secs(5), async {
                while !meta.exists() {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(s.pending() <= 2, "pending: {}", s.pending());
        s.flush().await;
        assert_eq!(s.pending(), 0);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn file_publish_respects_share() {
        let root = tmp("share");
        let s = FileSink::new(&root);

        let private = SessionContext::new("u", false);
        s.publish(&private, &result(1, vec![Accel::new(0., 0., 1.)]));
        s.flush().await;
        assert!(!root.exists());

        let shared = SessionContext::new("u", true);
        s.publish(&shared, &result(1, vec![Accel::new(0., 0., 1.)]));
        s.flush().await;

        let p = s.path::<Accel>(&shared, 1);
        let back = Accel::decode(&std::fs::read(&p).unwrap()).unwrap();
        assert_eq!(back, vec![Accel::new(0., 0., 1.)]);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
