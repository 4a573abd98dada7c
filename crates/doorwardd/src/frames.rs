use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use doorward_core::{
    AnalyzerError, DistanceMatcher, FaceAnalyzer, FrameProcessor, FrameSource, Gallery,
    GalleryError, HttpAnalyzer,
};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::engine::DoorHandle;
use crate::spool::SpoolDir;

#[derive(Error, Debug)]
pub enum FrameLoopError {
    #[error("face analyzer: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("spool directory {path}: {source}")]
    Spool {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot spawn frame thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("frame thread exited during startup")]
    StartupAborted,
}

/// Settings the frame thread needs, detached from the full config.
#[derive(Debug, Clone)]
pub struct FrameLoopSettings {
    pub analyzer_url: String,
    pub analyzer_timeout: Duration,
    pub gallery_dir: PathBuf,
    pub spool_dir: PathBuf,
    pub match_tolerance: f32,
    pub dark_threshold: Option<f32>,
    pub interval: Duration,
}

impl FrameLoopSettings {
    pub fn from_config(config: &Config, analyzer_url: &str) -> Self {
        Self {
            analyzer_url: analyzer_url.to_string(),
            analyzer_timeout: config.analyzer_timeout(),
            gallery_dir: config.gallery_dir.clone(),
            spool_dir: config.spool_dir.clone(),
            match_tolerance: config.match_tolerance,
            dark_threshold: config.dark_threshold(),
            interval: config.frame_interval(),
        }
    }
}

/// Start the frame loop on a dedicated OS thread.
///
/// The analyzer client, gallery and spool directory are set up on that
/// thread; startup failures are reported back here so the daemon fails
/// fast. Returns once the gallery is loaded.
pub async fn start(
    settings: FrameLoopSettings,
    door: DoorHandle,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, FrameLoopError> {
    let (ready_tx, ready_rx) = oneshot::channel::<Result<usize, FrameLoopError>>();

    let handle = std::thread::Builder::new()
        .name("doorward-frames".into())
        .spawn(move || {
            let (analyzer, gallery, source) = match prepare(&settings) {
                Ok(parts) => parts,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(gallery.len()));

            let processor = FrameProcessor::new(
                analyzer,
                DistanceMatcher {
                    tolerance: settings.match_tolerance,
                },
                Arc::new(gallery),
                door,
            )
            .with_dark_threshold(settings.dark_threshold);

            run_loop(processor, source, settings.interval, &shutdown);
        })
        .map_err(FrameLoopError::Spawn)?;

    let entries = ready_rx.await.map_err(|_| FrameLoopError::StartupAborted)??;
    tracing::info!(entries, "frame loop running");
    Ok(handle)
}

fn prepare(settings: &FrameLoopSettings) -> Result<(HttpAnalyzer, Gallery, SpoolDir), FrameLoopError> {
    let mut analyzer = HttpAnalyzer::new(&settings.analyzer_url, settings.analyzer_timeout)?;
    tracing::info!(endpoint = analyzer.endpoint(), "face analyzer configured");

    let gallery = Gallery::load(&settings.gallery_dir, &mut analyzer)?;
    if gallery.is_empty() {
        tracing::warn!(dir = %settings.gallery_dir.display(), "gallery is empty; no face will ever match");
    } else {
        tracing::info!(names = ?gallery.names(), "known identities");
    }

    let source = SpoolDir::open(&settings.spool_dir).map_err(|source| FrameLoopError::Spool {
        path: settings.spool_dir.clone(),
        source,
    })?;
    tracing::info!(dir = %source.path().display(), "reading frames from spool");

    Ok((analyzer, gallery, source))
}

/// Tick once per `interval` until `shutdown` is raised.
pub fn run_loop<A, S>(
    mut processor: FrameProcessor<A, DistanceMatcher, DoorHandle>,
    mut source: S,
    interval: Duration,
    shutdown: &AtomicBool,
) where
    A: FaceAnalyzer,
    S: FrameSource,
{
    tracing::info!(interval_ms = interval.as_millis() as u64, "frame thread started");
    while !shutdown.load(Ordering::Relaxed) {
        let started = Instant::now();
        let results = processor.step(&mut source, started);
        for result in &results {
            tracing::debug!(label = result.label(), x = result.bbox.x, y = result.bbox.y, "face");
        }
        std::thread::sleep(interval.saturating_sub(started.elapsed()));
    }
    tracing::info!("frame thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, Publisher};
    use crate::engine::spawn_door_engine;
    use doorward_core::{
        AccessPolicy, BoundingBox, DetectedFace, DoorController, DoorState, Encoding, Frame,
        FrameError, Identity,
    };
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<(String, String)>>>);

    impl Publisher for Recording {
        fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
            self.0
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    /// Always sees alice.
    struct AliceEverywhere;

    impl FaceAnalyzer for AliceEverywhere {
        fn analyze(&mut self, _frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError> {
            Ok(vec![DetectedFace {
                bbox: BoundingBox { x: 0.0, y: 0.0, width: 2.0, height: 2.0, confidence: 1.0 },
                encoding: Encoding::new(vec![0.0, 0.0]),
            }])
        }
    }

    /// Yields a bright frame a fixed number of times, then nothing.
    struct Frames(usize);

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
            if self.0 == 0 {
                return Ok(None);
            }
            self.0 -= 1;
            Frame::from_rgb(vec![200; 2 * 2 * 3], 2, 2, 0).map(Some)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_loop_unlocks_once_then_requests_lock_after_cooldown() {
        let published = Recording::default();
        let policy = AccessPolicy::new(Vec::<String>::new())
            .with_unlock_duration(Duration::from_millis(50));
        let (door, _task) = spawn_door_engine(DoorController::new(policy), published.clone());

        let gallery = Gallery::from_identities(vec![Identity {
            name: "alice".into(),
            encoding: Encoding::new(vec![0.0, 0.0]),
        }]);
        let processor = FrameProcessor::new(
            AliceEverywhere,
            DistanceMatcher::default(),
            Arc::new(gallery),
            door.clone(),
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();
        let thread = std::thread::spawn(move || {
            run_loop(processor, Frames(3), Duration::from_millis(5), &stop);
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.store(true, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || thread.join().unwrap())
            .await
            .unwrap();

        // Without a broker echoing the lock verdict, the door stays unlocked.
        let snapshot = door.snapshot().await.unwrap();
        assert_eq!(snapshot.state, DoorState::Unlocked);
        assert!(!snapshot.session_active);
        assert_eq!(
            *published.0.lock().unwrap(),
            vec![
                ("door/face_recognition".to_string(), "recognized".to_string()),
                ("door/face_recognition".to_string(), "lock".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_fails_fast_on_missing_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let (door, _task) = spawn_door_engine(
            DoorController::new(AccessPolicy::new(Vec::<String>::new())),
            Recording::default(),
        );
        let settings = FrameLoopSettings {
            analyzer_url: "http://127.0.0.1:9".into(),
            analyzer_timeout: Duration::from_millis(200),
            gallery_dir: dir.path().join("missing"),
            spool_dir: dir.path().join("spool"),
            match_tolerance: 0.6,
            dark_threshold: None,
            interval: Duration::from_millis(10),
        };

        let result = start(settings, door, Arc::new(AtomicBool::new(false))).await;
        assert!(matches!(result, Err(FrameLoopError::Gallery(_))));
    }
}
