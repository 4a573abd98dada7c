//! Known identities, loaded once from a directory of per-person folders.
//!
//! Layout: `root/<name>/<image files>`. The folder name is the identity
//! label verbatim. Folders and files are visited in lexicographic order so
//! the resulting order (and therefore first-match tie-breaking) is stable
//! across runs.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::analyzer::FaceAnalyzer;
use crate::frame::Frame;
use crate::types::Identity;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read gallery root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ordered, read-only collection of known identities.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    pub fn from_identities(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    /// Scan `root` and encode every image found one level down.
    ///
    /// Only an unreadable root is fatal. Unreadable person folders, files
    /// that fail to decode, analyzer failures and images without a face are
    /// logged and skipped.
    pub fn load(root: &Path, analyzer: &mut dyn FaceAnalyzer) -> Result<Self, GalleryError> {
        let person_dirs = sorted_entries(root).map_err(|source| GalleryError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        let mut identities = Vec::new();
        let mut sequence = 0u32;

        for person_dir in person_dirs.into_iter().filter(|p| p.is_dir()) {
            let Some(name) = person_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };

            let images = match sorted_entries(&person_dir) {
                Ok(images) => images,
                Err(e) => {
                    tracing::warn!(person = %name, error = %e, "cannot list person directory; skipping");
                    continue;
                }
            };

            for image_path in images.into_iter().filter(|p| p.is_file()) {
                let image_name = image_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                let frame = match Frame::open(&image_path, sequence) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(person = %name, image = %image_name, error = %e, "cannot load image; skipping");
                        continue;
                    }
                };
                sequence = sequence.wrapping_add(1);

                let faces = match analyzer.analyze(&frame) {
                    Ok(faces) => faces,
                    Err(e) => {
                        tracing::warn!(person = %name, image = %image_name, error = %e, "cannot encode image; skipping");
                        continue;
                    }
                };

                match faces.into_iter().next() {
                    Some(face) => {
                        tracing::info!(person = %name, image = %image_name, "loaded encoding");
                        identities.push(Identity {
                            name: name.clone(),
                            encoding: face.encoding,
                        });
                    }
                    None => {
                        tracing::info!(person = %name, image = %image_name, "no face found in image");
                    }
                }
            }
        }

        tracing::info!(root = %root.display(), entries = identities.len(), "gallery loaded");
        Ok(Self { identities })
    }

    /// Number of encodings (a person with three photos counts three times).
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Identity> {
        self.identities.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Identity> {
        self.identities.iter()
    }

    /// Distinct identity names, in load order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for identity in &self.identities {
            if !names.contains(&identity.name.as_str()) {
                names.push(&identity.name);
            }
        }
        names
    }
}

impl<'a> IntoIterator for &'a Gallery {
    type Item = &'a Identity;
    type IntoIter = std::slice::Iter<'a, Identity>;

    fn into_iter(self) -> Self::IntoIter {
        self.identities.iter()
    }
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerError;
    use crate::types::{BoundingBox, DetectedFace, Encoding};
    use image::{Rgb, RgbImage};

    /// Encodes each image as its top-left pixel; pure black means "no face".
    struct PixelAnalyzer;

    impl FaceAnalyzer for PixelAnalyzer {
        fn analyze(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError> {
            let px = &frame.data[..3];
            if px.iter().all(|&v| v == 0) {
                return Ok(vec![]);
            }
            Ok(vec![DetectedFace {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: frame.width as f32,
                    height: frame.height as f32,
                    confidence: 1.0,
                },
                encoding: Encoding::new(px.iter().map(|&v| v as f32 / 255.0).collect()),
            }])
        }
    }

    struct FailingAnalyzer;

    impl FaceAnalyzer for FailingAnalyzer {
        fn analyze(&mut self, _frame: &Frame) -> Result<Vec<DetectedFace>, AnalyzerError> {
            Err(AnalyzerError::Unavailable("offline".into()))
        }
    }

    fn write_png(path: &Path, value: u8) {
        RgbImage::from_pixel(4, 4, Rgb([value, value, value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_corrupt_and_valid_image_yield_one_entry() {
        let root = tempfile::tempdir().unwrap();
        let alice = root.path().join("alice");
        fs::create_dir(&alice).unwrap();
        fs::write(alice.join("a_corrupt.jpg"), b"\xff\xd8 not really a jpeg").unwrap();
        write_png(&alice.join("b_valid.png"), 200);

        let gallery = Gallery::load(root.path(), &mut PixelAnalyzer).unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.get(0).map(|id| id.name.as_str()), Some("alice"));
    }

    #[test]
    fn test_load_order_is_directory_then_file() {
        let root = tempfile::tempdir().unwrap();
        for (person, shades) in [("bob", [30u8, 40]), ("alice", [10u8, 20])] {
            let dir = root.path().join(person);
            fs::create_dir(&dir).unwrap();
            for (i, shade) in shades.iter().enumerate() {
                write_png(&dir.join(format!("{i}.png")), *shade);
            }
        }

        let gallery = Gallery::load(root.path(), &mut PixelAnalyzer).unwrap();
        let order: Vec<(&str, f32)> = gallery
            .iter()
            .map(|id| (id.name.as_str(), (id.encoding.values[0] * 255.0).round()))
            .collect();
        assert_eq!(
            order,
            vec![("alice", 10.0), ("alice", 20.0), ("bob", 30.0), ("bob", 40.0)]
        );
        assert_eq!(gallery.names(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_faceless_images_and_empty_dirs_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let carol = root.path().join("carol");
        fs::create_dir(&carol).unwrap();
        write_png(&carol.join("dark.png"), 0);
        fs::create_dir(root.path().join("nobody")).unwrap();
        fs::write(root.path().join("README.txt"), b"not a person").unwrap();

        let gallery = Gallery::load(root.path(), &mut PixelAnalyzer).unwrap();
        assert!(gallery.is_empty());
        assert!(gallery.names().is_empty());
    }

    #[test]
    fn test_analyzer_failure_is_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        let dave = root.path().join("dave");
        fs::create_dir(&dave).unwrap();
        write_png(&dave.join("face.png"), 90);

        let gallery = Gallery::load(root.path(), &mut FailingAnalyzer).unwrap();
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("does-not-exist");
        let result = Gallery::load(&missing, &mut PixelAnalyzer);
        assert!(matches!(result, Err(GalleryError::Root { .. })));
    }
}
