//! First-match face matching against the gallery.
//!
//! Every gallery entry gets a yes/no verdict and the lowest-index "yes"
//! wins. Nothing here ranks candidates by distance: two people within
//! tolerance resolve to whoever was loaded first.

use crate::gallery::Gallery;
use crate::types::{Encoding, Identity};

/// Default Euclidean tolerance for dlib-style 128-d encodings.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Strategy for deciding whether an observed encoding matches a known one.
pub trait Matcher {
    /// Per-entry verdict. Encodings of different length never match.
    fn is_match(&self, known: &Encoding, observed: &Encoding) -> bool;

    /// Return the first gallery entry whose verdict is true.
    fn find<'g>(&self, observed: &Encoding, gallery: &'g Gallery) -> Option<&'g Identity> {
        gallery
            .iter()
            .find(|identity| self.is_match(&identity.encoding, observed))
    }

    /// Verdict for every gallery entry, in gallery order.
    fn compare_all(&self, observed: &Encoding, gallery: &Gallery) -> Vec<bool> {
        gallery
            .iter()
            .map(|identity| self.is_match(&identity.encoding, observed))
            .collect()
    }
}

/// Match when the Euclidean distance is within `tolerance`.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    pub tolerance: f32,
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Matcher for DistanceMatcher {
    fn is_match(&self, known: &Encoding, observed: &Encoding) -> bool {
        known.len() == observed.len()
            && !known.is_empty()
            && known.euclidean_distance(observed) <= self.tolerance
    }
}

/// Match when cosine similarity reaches `threshold` (for L2-normalized
/// embeddings such as ArcFace output).
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    pub threshold: f32,
}

impl Matcher for CosineMatcher {
    fn is_match(&self, known: &Encoding, observed: &Encoding) -> bool {
        known.len() == observed.len()
            && !known.is_empty()
            && known.similarity(observed) >= self.threshold
    }
}
