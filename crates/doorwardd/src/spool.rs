//! Spool-directory frame source.
//!
//! The capture process writes each frame as an image file into the spool
//! directory (writing to a dot-file first and renaming when complete). Every
//! poll takes the oldest complete file, removes it and decodes it.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use doorward_core::{Frame, FrameError, FrameSource};

pub struct SpoolDir {
    dir: PathBuf,
    sequence: u32,
    /// Files that could not be consumed; skipped while they stay on disk.
    skipped: HashSet<PathBuf>,
}

impl SpoolDir {
    /// Open (creating if needed) the spool directory.
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            sequence: 0,
            skipped: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn oldest(&mut self) -> io::Result<Option<PathBuf>> {
        let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();
        let mut present = HashSet::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            if hidden {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            if self.skipped.contains(&path) {
                present.insert(path);
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((modified, path));
        }
        // Forget skipped files once they are gone so a new file may reuse the name.
        self.skipped.retain(|path| present.contains(path));
        Ok(candidates.into_iter().min().map(|(_, path)| path))
    }

    fn skip(&mut self, path: &Path, error: &io::Error) {
        tracing::warn!(path = %path.display(), error = %error, "cannot consume spool file; skipping it");
        self.skipped.insert(path.to_path_buf());
    }
}

impl FrameSource for SpoolDir {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let Some(path) = self.oldest()? else {
            return Ok(None);
        };

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    self.skip(&path, &e);
                }
                return Err(e.into());
            }
        };
        // Remove before decoding so a corrupt file cannot wedge the queue.
        // A file that cannot be removed is still decoded this once.
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                self.skip(&path, &e);
            }
        }

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        Frame::decode(&bytes, sequence).map(Some)
    }
}
