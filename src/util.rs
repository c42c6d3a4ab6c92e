use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Case-insensitive check of a path's extension against a list (without dots).
pub fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// A scratch file living next to its final destination.
///
/// The file is removed when the guard drops unless [`ScratchFile::persist`] moved it into
/// place first, so every early return or `?` cleans up after itself.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    pub fn beside(destination: &Path) -> Self {
        let name = destination
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("output");

        let path = destination.with_file_name(format!(".{}.{}.partial", name, std::process::id()));
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move the scratch file over `destination`.
    pub fn persist(mut self, destination: &Path) -> std::io::Result<()> {
        fs::rename(&self.path, destination)?;
        self.armed = false;
        debug!("Persisted {} -> {}", self.path.display(), destination.display());
        Ok(())
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.armed || !self.path.exists() {
            return;
        }

        if let Err(why) = fs::remove_file(&self.path) {
            warn!(
                "Failed to remove scratch file {}: {}",
                self.path.display(),
                why
            );
        } else {
            debug!("Removed scratch file {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("audio2midi-util-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn extension_matching() {
        assert!(has_extension(Path::new("song.mid"), &["mid"]));
        assert!(has_extension(Path::new("SONG.MP3"), &["mp3", "m4a"]));
        assert!(!has_extension(Path::new("song.txt"), &["mid"]));
        assert!(!has_extension(Path::new("song"), &["mid"]));
        assert!(!has_extension(Path::new("song.mid.bak"), &["mid"]));
    }

    #[test]
    fn dropped_scratch_file_is_removed() {
        env_logger::try_init().unwrap_or(());

        let dir = scratch_dir("drop");
        let destination = dir.join("out.mid");
        let scratch_path = {
            let scratch = ScratchFile::beside(&destination);
            fs::write(scratch.path(), b"partial").unwrap();
            assert!(scratch.path().exists());
            scratch.path().to_path_buf()
        };

        assert!(!scratch_path.exists());
        assert!(!destination.exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn persisted_scratch_file_survives() {
        env_logger::try_init().unwrap_or(());

        let dir = scratch_dir("persist");
        let destination = dir.join("out.mid");
        let scratch = ScratchFile::beside(&destination);
        let scratch_path = scratch.path().to_path_buf();
        fs::write(scratch.path(), b"complete").unwrap();
        scratch.persist(&destination).unwrap();

        assert!(!scratch_path.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"complete");
        fs::remove_dir_all(&dir).unwrap();
    }
}
