//! Boundary to the external face capability.
//!
//! Locating faces in pixels and computing their encodings happens outside
//! this crate. Implementations wrap whatever does the work (an inference
//! service, a native library) behind [`FaceAnalyzer`].

use crate::frame::Frame;
use crate::types::DetectedFace;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer unavailable: {0}")]
    Unavailable(String),
    #[error("analysis failed: {0}")]
    Failed(String),
    #[error("malformed analyzer response: {0}")]
    BadResponse(String),
}

/// Locate every face in a frame and encode it.
///
/// Faces are returned in the analyzer's detection order; an empty vector
/// means no face was found, which is not an error.
pub trait FaceAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError>;
}

impl<A: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<A> {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError> {
        (**self).analyze(frame)
    }
}
