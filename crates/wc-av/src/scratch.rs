//! Per-job scratch files.
//!
//! A [`ScratchDir`] hands out [`ScratchFiles`]: an input path and an output
//! path named after the job id. The files are never created here; the caller
//! writes the upload and the transcoder writes the output. Both paths are
//! removed when the [`ScratchFiles`] value is dropped, which makes release
//! happen exactly once on every exit path, including a cancelled request
//! future.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use wc_core::MediaKind;

/// Marker in scratch file names, used to recognise our own leftovers.
const INPUT_TAG: &str = "in";
const OUTPUT_TAG: &str = "out";

/// The shared scratch directory.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory if needed and remove files left behind by a
    /// previous process (a crash skips drop-based cleanup).
    pub fn prepare(&self) -> wc_core::Result<usize> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| wc_core::Error::storage("create scratch dir", e))?;
        Ok(self.sweep_stale())
    }

    /// Remove every file in the directory whose name matches the scratch
    /// naming scheme. Other files are left alone.
    pub fn sweep_stale(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if is_scratch_name(&name.to_string_lossy()) && remove_quietly(&entry.path()) {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, dir = %self.root.display(), "Removed stale scratch files");
        }
        removed
    }

    /// Allocate input/output paths for `job_id`.
    ///
    /// `input_extension` should come from the sniffed or declared upload
    /// format; anything not on the kind's allow-list is replaced by the
    /// kind's default extension.
    pub fn acquire(&self, job_id: Uuid, kind: MediaKind, input_extension: &str) -> ScratchFiles {
        let input_extension = if kind.accepts_extension(input_extension) {
            input_extension.to_ascii_lowercase()
        } else {
            kind.default_input_extension().to_string()
        };

        let input = self
            .root
            .join(format!("{job_id}.{INPUT_TAG}.{input_extension}"));
        let output = self
            .root
            .join(format!("{job_id}.{OUTPUT_TAG}.{}", kind.output_extension()));

        tracing::trace!(%job_id, input = %input.display(), output = %output.display(), "scratch acquired");

        ScratchFiles {
            job_id,
            input,
            output,
        }
    }
}

/// Input and output scratch paths owned by one job.
///
/// Dropping this value deletes both files if they exist.
#[derive(Debug)]
pub struct ScratchFiles {
    job_id: Uuid,
    input: PathBuf,
    output: PathBuf,
}

impl ScratchFiles {
    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Release the files now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        remove_quietly(&self.input);
        remove_quietly(&self.output);
        tracing::trace!(job_id = %self.job_id, "scratch released");
    }
}

/// Delete `path`, treating "not found" as success. Other failures are logged
/// and swallowed. Returns whether a file was actually removed.
fn remove_quietly(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to remove scratch file: {e}");
            false
        }
    }
}

/// `<uuid>.in.<ext>` or `<uuid>.out.<ext>`.
fn is_scratch_name(name: &str) -> bool {
    let mut parts = name.splitn(3, '.');
    let (Some(id), Some(tag), Some(ext)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !ext.is_empty() && (tag == INPUT_TAG || tag == OUTPUT_TAG) && Uuid::parse_str(id).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn acquire_does_no_io() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let files = scratch.acquire(Uuid::new_v4(), MediaKind::Image, "png");
        assert!(files.input().starts_with(dir.path()));
        assert!(!files.input().exists());
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn paths_carry_kind_extensions() {
        let scratch = ScratchDir::new("/scratch");
        let id = Uuid::new_v4();

        let image = scratch.acquire(id, MediaKind::Image, "PNG");
        assert_eq!(image.input(), Path::new(&format!("/scratch/{id}.in.png")));
        assert_eq!(image.output(), Path::new(&format!("/scratch/{id}.out.webp")));

        let video = scratch.acquire(id, MediaKind::Video, "exe");
        assert_eq!(video.input().extension().unwrap(), "mp4");
        assert_eq!(video.output().extension().unwrap(), "webm");
    }

    #[test]
    fn distinct_jobs_never_collide() {
        let scratch = ScratchDir::new("/scratch");
        let a = scratch.acquire(Uuid::new_v4(), MediaKind::Image, "jpg");
        let b = scratch.acquire(Uuid::new_v4(), MediaKind::Image, "jpg");
        assert_ne!(a.input(), b.input());
        assert_ne!(a.output(), b.output());
    }

    #[test]
    fn drop_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let files = scratch.acquire(Uuid::new_v4(), MediaKind::Video, "mp4");
        fs::write(files.input(), b"in").unwrap();
        fs::write(files.output(), b"out").unwrap();
        assert_eq!(entries(dir.path()).len(), 2);

        drop(files);
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn release_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let files = scratch.acquire(Uuid::new_v4(), MediaKind::Image, "jpg");
        fs::write(files.input(), b"only input").unwrap();
        files.release();
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn prepare_creates_dir_and_sweeps_only_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("scratch");
        let scratch = ScratchDir::new(&root);
        assert_eq!(scratch.prepare().unwrap(), 0);
        assert!(root.is_dir());

        let id = Uuid::new_v4();
        fs::write(root.join(format!("{id}.in.jpg")), b"stale").unwrap();
        fs::write(root.join(format!("{id}.out.webp")), b"stale").unwrap();
        fs::write(root.join("keep.me.txt"), b"not ours").unwrap();
        fs::write(root.join("README"), b"not ours").unwrap();

        assert_eq!(scratch.prepare().unwrap(), 2);
        assert_eq!(entries(&root), vec!["README", "keep.me.txt"]);
    }

    #[test]
    fn scratch_name_recognition() {
        let id = Uuid::new_v4();
        assert!(is_scratch_name(&format!("{id}.in.mp4")));
        assert!(is_scratch_name(&format!("{id}.out.webm")));
        assert!(!is_scratch_name(&format!("{id}.tmp.mp4")));
        assert!(!is_scratch_name(&format!("{id}.in.")));
        assert!(!is_scratch_name("holiday.in.jpg"));
    }
}
