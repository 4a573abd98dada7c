//! Per-frame orchestration: analyze, match, notify the door, tick cooldown.

use std::sync::Arc;
use std::time::Instant;

use crate::analyzer::FaceAnalyzer;
use crate::frame::{Frame, FrameSource};
use crate::gallery::Gallery;
use crate::matcher::Matcher;
use crate::types::{Identity, RecognitionResult};

/// Default fraction of near-black pixels above which a frame is skipped.
pub const DEFAULT_DARK_THRESHOLD: f32 = 0.95;

/// Receiver of face-path events. Implemented by whatever serializes access
/// to the door controller.
pub trait FaceEvents {
    fn face_recognized(&self, identity: &Identity, now: Instant);
    fn cooldown_tick(&self, now: Instant);
}

/// Drives one analyze → match → notify cycle per captured frame.
pub struct FrameProcessor<A, M, E> {
    analyzer: A,
    matcher: M,
    gallery: Arc<Gallery>,
    events: E,
    dark_threshold: Option<f32>,
}

impl<A, M, E> FrameProcessor<A, M, E>
where
    A: FaceAnalyzer,
    M: Matcher,
    E: FaceEvents,
{
    pub fn new(analyzer: A, matcher: M, gallery: Arc<Gallery>, events: E) -> Self {
        Self {
            analyzer,
            matcher,
            gallery,
            events,
            dark_threshold: Some(DEFAULT_DARK_THRESHOLD),
        }
    }

    /// Skip analysis of frames darker than `threshold`; `None` analyzes all.
    pub fn with_dark_threshold(mut self, threshold: Option<f32>) -> Self {
        self.dark_threshold = threshold;
        self
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Process one frame. Every matched face triggers `face_recognized`;
    /// the cooldown is ticked exactly once afterwards, even when analysis
    /// fails or the frame is skipped.
    pub fn process(&mut self, frame: &Frame, now: Instant) -> Vec<RecognitionResult> {
        let results = self.recognize(frame, now);
        self.events.cooldown_tick(now);
        results
    }

    /// Pull the next frame from `source` and process it. With no frame
    /// available (or a source error) only the cooldown is ticked.
    pub fn step(&mut self, source: &mut dyn FrameSource, now: Instant) -> Vec<RecognitionResult> {
        match source.next_frame() {
            Ok(Some(frame)) => self.process(&frame, now),
            Ok(None) => {
                self.events.cooldown_tick(now);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame acquisition failed; skipping frame");
                self.events.cooldown_tick(now);
                Vec::new()
            }
        }
    }

    fn recognize(&mut self, frame: &Frame, now: Instant) -> Vec<RecognitionResult> {
        if let Some(threshold) = self.dark_threshold {
            if frame.is_dark(threshold) {
                tracing::debug!(sequence = frame.sequence, "dark frame skipped");
                return Vec::new();
            }
        }

        let faces = match self.analyzer.analyze(frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "face analysis failed; skipping frame");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(faces.len());
        for face in faces {
            let identity = self.matcher.find(&face.encoding, &self.gallery).cloned();
            match &identity {
                Some(identity) => self.events.face_recognized(identity, now),
                None => tracing::info!(sequence = frame.sequence, "unknown face detected"),
            }
            results.push(RecognitionResult {
                identity,
                bbox: face.bbox,
            });
        }
        results
    }
}
