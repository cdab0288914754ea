use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::toolkit::MediaToolkit;

/// Attaches the primary source's audio to the silent composite
pub struct AudioRemuxStage<'a> {
    toolkit: &'a dyn MediaToolkit,
}

impl<'a> AudioRemuxStage<'a> {
    pub fn new(toolkit: &'a dyn MediaToolkit) -> Self {
        Self { toolkit }
    }

    /// Extract the audio track of `primary` into `audio`
    ///
    /// Any partial artifact is removed on failure.
    pub fn extract(&self, primary: &Path, audio: &Path) -> Result<()> {
        remove_if_present(audio);

        match self.toolkit.extract_audio(primary, audio) {
            Ok(()) => {
                debug!("Extracted audio from {} into {}", primary.display(), audio.display());
                Ok(())
            }
            Err(e) => {
                remove_if_present(audio);
                Err(e)
            }
        }
    }

    /// Remux `silent` + `audio` into `output` via `staging`
    ///
    /// The toolkit writes to `staging`, which is renamed onto `output` only
    /// after it exits successfully. Both intermediates are removed whether
    /// or not the remux succeeds.
    pub fn remux(&self, silent: &Path, audio: &Path, staging: &Path, output: &Path) -> Result<()> {
        remove_if_present(staging);

        let result = self
            .toolkit
            .remux(silent, audio, staging)
            .and_then(|()| promote(staging, output).map_err(Into::into));

        if result.is_err() {
            remove_if_present(staging);
        }
        remove_if_present(silent);
        remove_if_present(audio);

        if result.is_ok() {
            info!("Remuxed audio into {}", output.display());
        }
        result
    }

    /// Use the silent composite as the final output
    pub fn keep_silent(&self, silent: &Path, output: &Path) -> Result<()> {
        promote(silent, output)?;
        info!("Saved {} without audio", output.display());
        Ok(())
    }
}

/// Move `from` onto `to`, replacing any existing file
///
/// Falls back to copy-and-delete when a rename is not possible (for
/// example across filesystems).
pub fn promote(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_file(to)?;
    }

    if fs::rename(from, to).is_err() {
        copy_across(from, to)?;
    }
    Ok(())
}

/// Copy-and-delete; a failed copy leaves nothing at `to`
fn copy_across(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(e) = fs::copy(from, to) {
        remove_if_present(to);
        return Err(e);
    }
    fs::remove_file(from)
}

/// Best-effort delete of a temporary artifact
pub fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::testing::{AudioBehavior, FakeToolkit};
    use tempfile::tempdir;

    #[test]
    fn test_failed_extraction_leaves_no_artifact() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("out.audio.mp3");
        let toolkit = FakeToolkit::default().with_audio(AudioBehavior::ExtractFails);

        let err = AudioRemuxStage::new(&toolkit)
            .extract(&dir.path().join("in.mp4"), &audio)
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(!audio.exists());
    }

    #[test]
    fn test_successful_remux_cleans_intermediates() {
        let dir = tempdir().unwrap();
        let silent = dir.path().join("out.silent.mp4");
        let audio = dir.path().join("out.audio.mp3");
        let staging = dir.path().join("out.part.mp4");
        let output = dir.path().join("out.mp4");
        fs::write(&silent, b"FFF").unwrap();
        fs::write(&audio, b"audio").unwrap();

        let toolkit = FakeToolkit::default();
        AudioRemuxStage::new(&toolkit).remux(&silent, &audio, &staging, &output).unwrap();

        assert_eq!(fs::read(&output).unwrap(), b"FFF");
        assert!(!silent.exists());
        assert!(!audio.exists());
        assert!(!staging.exists());
    }

    #[test]
    fn test_failed_remux_leaves_no_output() {
        let dir = tempdir().unwrap();
        let silent = dir.path().join("out.silent.mp4");
        let audio = dir.path().join("out.audio.mp3");
        let staging = dir.path().join("out.part.mp4");
        let output = dir.path().join("out.mp4");
        fs::write(&silent, b"FFF").unwrap();
        fs::write(&audio, b"audio").unwrap();

        let toolkit = FakeToolkit::default().with_audio(AudioBehavior::RemuxFails);
        let err = AudioRemuxStage::new(&toolkit)
            .remux(&silent, &audio, &staging, &output)
            .unwrap_err();

        assert!(!err.is_recoverable());
        assert!(!output.exists());
        assert!(!staging.exists());
        assert!(!silent.exists());
        assert!(!audio.exists());
    }

    #[test]
    fn test_promote_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a");
        let to = dir.path().join("b");
        fs::write(&from, b"new").unwrap();
        fs::write(&to, b"old").unwrap();

        promote(&from, &to).unwrap();
        assert_eq!(fs::read(&to).unwrap(), b"new");
        assert!(!from.exists());
    }

    #[test]
    fn test_failed_copy_leaves_no_target() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("vanished.mp4");
        let to = dir.path().join("out.mp4");
        fs::write(&to, b"half").unwrap();

        assert!(copy_across(&from, &to).is_err());
        assert!(!to.exists());
    }

    #[test]
    fn test_copy_across_moves_content() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a.mp4");
        let to = dir.path().join("b.mp4");
        fs::write(&from, b"video").unwrap();

        copy_across(&from, &to).unwrap();
        assert_eq!(fs::read(&to).unwrap(), b"video");
        assert!(!from.exists());
    }
}
