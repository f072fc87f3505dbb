//! Recognition session: a frozen reference set plus the live frame loop.

use crate::capture::FrameSource;
use crate::frame::Frame;
use crate::matcher::{EuclideanMatcher, MatchResult, Matcher};
use crate::provider::{FaceProvider, ProviderError};
use crate::reference::{self, AssetSource, SkippedEntry};
use crate::types::{BoundingBox, Catalog, Descriptor, DetectionResult, LabeledDescriptorSet};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Default period between frame-loop ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("match threshold must be a finite, non-negative distance (got {0})")]
    InvalidThreshold(f32),
    #[error("frame loop interval must be non-zero")]
    InvalidInterval,
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
}

/// What a reload produced.
#[derive(Debug, Clone)]
pub struct ReloadSummary {
    pub labels: usize,
    pub skipped: Vec<SkippedEntry>,
}

/// Recognition session.
///
/// Holds the provider and the current reference set. The set is replaced
/// wholesale by [`reload`](Self::reload); work already in flight keeps the
/// set it started with. Cloning yields another handle to the same session.
pub struct RecognitionSession<P> {
    provider: Arc<Mutex<P>>,
    references: Arc<RwLock<Arc<LabeledDescriptorSet>>>,
    reload_gate: Arc<tokio::sync::Mutex<()>>,
    threshold: f32,
}

impl<P> Clone for RecognitionSession<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            references: Arc::clone(&self.references),
            reload_gate: Arc::clone(&self.reload_gate),
            threshold: self.threshold,
        }
    }
}

impl<P: FaceProvider + 'static> RecognitionSession<P> {
    /// Create a session with an empty reference set.
    pub fn new(provider: P, threshold: f32) -> Result<Self, SessionError> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(SessionError::InvalidThreshold(threshold));
        }
        Ok(Self {
            provider: Arc::new(Mutex::new(provider)),
            references: Arc::new(RwLock::new(Arc::new(LabeledDescriptorSet::new()))),
            reload_gate: Arc::new(tokio::sync::Mutex::new(())),
            threshold,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// The reference set currently in use.
    pub fn references(&self) -> Arc<LabeledDescriptorSet> {
        let guard = self.references.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Exclusive right to reload. Take it before snapshotting the catalog
    /// and hold it until [`reload`](Self::reload) returns, so a reload
    /// built from an older snapshot can never be stored after a newer one.
    pub async fn reload_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.reload_gate.lock().await
    }

    /// Rebuild the reference set from a catalog snapshot and swap it in.
    ///
    /// Blocking: runs the provider once per catalog entry.
    pub fn reload<A: AssetSource + ?Sized>(&self, catalog: &Catalog, assets: &A) -> ReloadSummary {
        let report = {
            let mut provider = self.provider.lock().unwrap_or_else(PoisonError::into_inner);
            reference::build(catalog, assets, &mut *provider)
        };

        let labels = report.set.len();
        *self.references.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(report.set);
        tracing::info!(labels, skipped = report.skipped.len(), "reference set reloaded");

        ReloadSummary {
            labels,
            skipped: report.skipped,
        }
    }

    /// Match one live descriptor against the current reference set.
    pub fn identify(&self, descriptor: &Descriptor) -> MatchResult {
        EuclideanMatcher.compare(descriptor, &self.references(), self.threshold)
    }

    /// Detect every face in `frame` and label each one. Blocking.
    pub fn process_frame(&self, frame: &Frame) -> Result<Vec<Overlay>, ProviderError> {
        let faces = {
            let mut provider = self.provider.lock().unwrap_or_else(PoisonError::into_inner);
            provider.detect_faces(frame)?
        };

        let references = self.references();
        Ok(faces
            .into_iter()
            .map(|face| {
                let result = EuclideanMatcher.compare(&face.descriptor, &references, self.threshold);
                Overlay::new(face, result)
            })
            .collect())
    }

    /// Set up a live loop pulling frames from `source` and drawing into `sink`.
    pub fn frame_loop<S, O>(
        &self,
        source: S,
        sink: O,
        interval: Duration,
    ) -> Result<FrameLoop<P, S, O>, SessionError>
    where
        S: FrameSource,
        O: OverlaySink,
    {
        if interval.is_zero() {
            return Err(SessionError::InvalidInterval);
        }
        Ok(FrameLoop {
            session: self.clone(),
            source,
            sink,
            interval,
            tick_limit: None,
        })
    }
}

/// Everything needed to draw one face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
    pub landmarks: Vec<(f32, f32)>,
    pub label: String,
    pub distance: Option<f32>,
    /// Text lines anchored at the box's top-right corner.
    pub captions: Vec<String>,
}

impl Overlay {
    pub fn new(face: DetectionResult, result: MatchResult) -> Self {
        let mut captions = Vec::new();
        if let Some(gender) = &face.gender {
            match face.gender_probability {
                Some(p) => captions.push(format!("{gender} - {p:.2}")),
                None => captions.push(gender.clone()),
            }
        }
        if let Some(age) = face.age {
            captions.push(format!("{} years", age.round() as i64));
        }

        Self {
            bounding_box: face.bounding_box,
            landmarks: face.landmarks,
            label: result.label,
            distance: result.distance,
            captions,
        }
    }
}

/// Receives the overlays for each processed frame.
pub trait OverlaySink: Send {
    fn draw(&mut self, frame_sequence: u64, overlays: &[Overlay]);
}

/// Counters reported when a frame loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    /// Detection cycles started.
    pub started: u64,
    /// Cycles that finished and were drawn.
    pub processed: u64,
    /// Cycles whose provider call failed.
    pub failed: u64,
    /// Ticks dropped because the previous cycle was still running.
    pub skipped_busy: u64,
    /// Ticks with no frame available, or a source error.
    pub no_frame: u64,
    /// Ticks whose frame had a zero dimension.
    pub invalid_frames: u64,
}

struct CycleOutcome {
    sequence: u64,
    result: Result<Vec<Overlay>, ProviderError>,
}

/// Clears the busy flag when a detection cycle ends, even by panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fixed-interval detect → match → draw loop.
///
/// At most one detection cycle runs at a time: a tick that fires while the
/// previous cycle is still busy is skipped. A bad frame or a failed
/// detection only costs its own tick.
pub struct FrameLoop<P, S, O> {
    session: RecognitionSession<P>,
    source: S,
    sink: O,
    interval: Duration,
    tick_limit: Option<u64>,
}

impl<P, S, O> FrameLoop<P, S, O>
where
    P: FaceProvider + 'static,
    S: FrameSource,
    O: OverlaySink,
{
    /// Stop after `ticks` ticks, letting the last cycle finish.
    pub fn with_tick_limit(mut self, ticks: u64) -> Self {
        self.tick_limit = Some(ticks);
        self
    }

    /// Hand back the sink, e.g. to inspect what was drawn.
    pub fn into_sink(self) -> O {
        self.sink
    }

    /// Run until `shutdown` resolves (in-flight work is abandoned) or the
    /// tick limit is reached (in-flight work is drained).
    pub async fn run<F>(&mut self, shutdown: F) -> LoopStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let busy = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel::<CycleOutcome>();
        let mut stats = LoopStats::default();
        let mut drain = false;

        tracing::info!(interval_ms = self.interval.as_millis() as u64, "frame loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(outcome) = rx.recv() => {
                    self.finish(outcome, &mut stats);
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if self.tick_limit.is_some_and(|limit| stats.ticks >= limit) {
                drain = true;
                break;
            }
            stats.ticks += 1;

            if busy.load(Ordering::Acquire) {
                stats.skipped_busy += 1;
                tracing::trace!(tick = stats.ticks, "previous cycle still running; skipping tick");
                continue;
            }

            let frame = match self.source.current_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    stats.no_frame += 1;
                    continue;
                }
                Err(e) => {
                    stats.no_frame += 1;
                    tracing::warn!(error = %e, "frame source error; skipping tick");
                    continue;
                }
            };

            if frame.is_empty() {
                stats.invalid_frames += 1;
                tracing::warn!(
                    width = frame.width,
                    height = frame.height,
                    "invalid frame dimensions; skipping tick"
                );
                continue;
            }

            busy.store(true, Ordering::Release);
            stats.started += 1;

            let session = self.session.clone();
            let tx = tx.clone();
            let guard = BusyGuard(Arc::clone(&busy));
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                let result = session.process_frame(&frame);
                let _ = tx.send(CycleOutcome {
                    sequence: frame.sequence,
                    result,
                });
            });
        }

        // Once our sender is gone, recv() ends when the in-flight cycle does.
        drop(tx);
        if drain {
            while let Some(outcome) = rx.recv().await {
                self.finish(outcome, &mut stats);
            }
        }

        tracing::info!(?stats, "frame loop stopped");
        stats
    }

    fn finish(&mut self, outcome: CycleOutcome, stats: &mut LoopStats) {
        match outcome.result {
            Ok(overlays) => {
                stats.processed += 1;
                self.sink.draw(outcome.sequence, &overlays);
            }
            Err(e) => {
                stats.failed += 1;
                tracing::warn!(frame = outcome.sequence, error = %e, "detection failed; skipping frame");
            }
        }
    }
}
