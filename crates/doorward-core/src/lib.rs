//! doorward-core: face gallery, first-match matcher and the door lock
//! state machine.
//!
//! Face detection and encoding are external capabilities reached through
//! [`FaceAnalyzer`]; this crate only ever sees encodings and identities.

pub mod analyzer;
pub mod controller;
pub mod frame;
pub mod gallery;
pub mod matcher;
pub mod processor;
#[cfg(feature = "http")]
pub mod remote;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use controller::{
    AccessPolicy, DoorController, DoorState, Outcome, Publication, TimerCommand, Topic,
    UnlockSession,
};
pub use frame::{Frame, FrameError, FrameSource};
pub use gallery::{Gallery, GalleryError};
pub use matcher::{CosineMatcher, DistanceMatcher, Matcher};
pub use processor::{FaceEvents, FrameProcessor};
#[cfg(feature = "http")]
pub use remote::HttpAnalyzer;
pub use types::{BoundingBox, DetectedFace, Encoding, Identity, RecognitionResult};
