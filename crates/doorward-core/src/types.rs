use serde::{Deserialize, Serialize};

/// Label shown for a detected face that matched nobody in the gallery.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

/// Face encoding vector produced by the external analyzer (128-dimensional
/// for dlib-style models, but any fixed length works).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute cosine similarity between two encodings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Encoding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two encodings.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A known person: the gallery label plus one reference encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub encoding: Encoding,
}

/// A face located by the analyzer together with its encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub encoding: Encoding,
}

/// Outcome of matching one detected face, handed to the overlay renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub identity: Option<Identity>,
    pub bbox: BoundingBox,
}

impl RecognitionResult {
    /// Text to draw under the face box.
    pub fn label(&self) -> &str {
        self.identity
            .as_ref()
            .map(|id| id.name.as_str())
            .unwrap_or(UNKNOWN_LABEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identical() {
        let a = Encoding::new(vec![1.0, 0.0, 0.0]);
        let b = Encoding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = Encoding::new(vec![1.0, 0.0]);
        let b = Encoding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_label() {
        let bbox = BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 1.0 };
        let unknown = RecognitionResult { identity: None, bbox };
        assert_eq!(unknown.label(), UNKNOWN_LABEL);

        let known = RecognitionResult {
            identity: Some(Identity { name: "alice".into(), encoding: Encoding::new(vec![0.1]) }),
            bbox,
        };
        assert_eq!(known.label(), "alice");
    }

    #[test]
    fn test_detected_face_json_shape() {
        let json = r#"{"box":{"x":1,"y":2,"width":3,"height":4},"encoding":[0.5,0.25]}"#;
        let face: DetectedFace = serde_json::from_str(json).unwrap();
        assert_eq!(face.bbox.width, 3.0);
        assert_eq!(face.bbox.confidence, 1.0);
        assert_eq!(face.encoding.values, vec![0.5, 0.25]);
    }
}
