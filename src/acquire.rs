//! Stream acquisition: turns a [`SourceReference`] into local files.
//!
//! Direct files are fetched over HTTP, either straight to the final path
//! (same container, nothing to convert) or to a temp path. Streaming
//! sources are fetched one variant per needed role. Every temp path is
//! registered with the job's [`TempFileRegistry`] before the download that
//! writes it begins.

use crate::jobs::CancelFlag;
use crate::models::{
    OutputMode, OutputRequest, SourceKind, SourceReference, StagedFile, StreamRole,
    StreamVariant, VariantSelection,
};
use crate::registry::TempFileRegistry;
use crate::{EngineError, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

/// Fetches a plain file URL.
pub trait DirectDownloader: Send + Sync {
    /// Writes the resource at `url` to `dest`. On error no partial file may remain.
    fn download(&self, url: &str, dest: &Path, cancel: Option<&CancelFlag>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct VariantListing {
    pub title: String,
    /// Best-first within each kind.
    pub variants: Vec<StreamVariant>,
}

/// Lists and fetches the variants a streaming platform offers for a URL.
pub trait StreamBackend: Send + Sync {
    fn list_variants(&self, url: &str) -> Result<VariantListing>;

    fn download_variant(
        &self,
        url: &str,
        variant: &StreamVariant,
        dest: &Path,
        cancel: Option<&CancelFlag>,
    ) -> Result<()>;
}

/// A staged file plus the time it took to fetch.
#[derive(Debug, Clone)]
pub struct Staged {
    pub file: StagedFile,
    pub elapsed: Duration,
}

/// True when a direct download can go straight to the output path.
pub fn is_direct_fast_path(source: &SourceReference, request: &OutputRequest) -> bool {
    source.kind() == SourceKind::DirectFile
        && request.mode == OutputMode::Video
        && request.extension() == source.extension()
}

/// Collision-resistant temp name in `dir`, keeping `ext` (with its dot, or "").
pub fn temp_path(dir: &Path, ext: &str) -> PathBuf {
    dir.join(format!("{}{ext}", Uuid::new_v4()))
}

pub fn stage_direct(
    downloader: &dyn DirectDownloader,
    source: &SourceReference,
    request: &OutputRequest,
    registry: &mut TempFileRegistry,
    cancel: Option<&CancelFlag>,
) -> Result<Staged> {
    if let Some(flag) = cancel {
        flag.check()?;
    }

    let file = if is_direct_fast_path(source, request) {
        StagedFile::final_output(request.output_path())
    } else {
        let path = temp_path(&request.directory, &source.extension());
        registry.register(&path);
        StagedFile::ephemeral(path)
    };

    let started = Instant::now();
    downloader.download(source.url(), &file.path, cancel)?;
    let elapsed = started.elapsed();
    info!(
        path = %file.path.display(),
        ephemeral = file.is_ephemeral(),
        secs = elapsed.as_secs_f64(),
        "staged direct file"
    );
    Ok(Staged { file, elapsed })
}

/// Picks the variant for every role `mode` needs: the user's id when given,
/// otherwise the best listed candidate.
pub fn select_variants<'a>(
    source: &'a SourceReference,
    mode: OutputMode,
    selection: &VariantSelection,
) -> Result<Vec<(StreamRole, &'a StreamVariant)>> {
    mode.required_roles()
        .iter()
        .map(|&role| -> Result<(StreamRole, &'a StreamVariant)> {
            let variant = match selection.get(role) {
                Some(id) => {
                    let variant = source
                        .find_variant(id)
                        .ok_or_else(|| EngineError::UnknownVariant(id.to_string()))?;
                    if !role.accepts(variant.kind) {
                        return Err(EngineError::VariantKindMismatch {
                            id: id.to_string(),
                            role,
                        });
                    }
                    variant
                }
                None => source
                    .default_variant(role)
                    .ok_or(EngineError::NoVariant(role))?,
            };
            Ok((role, variant))
        })
        .collect()
}

pub fn stage_variants(
    backend: &dyn StreamBackend,
    source: &SourceReference,
    mode: OutputMode,
    selection: &VariantSelection,
    dir: &Path,
    registry: &mut TempFileRegistry,
    cancel: Option<&CancelFlag>,
) -> Result<Vec<(StreamRole, Staged)>> {
    let picked = select_variants(source, mode, selection)?;

    let mut staged = Vec::with_capacity(picked.len());
    for (role, variant) in picked {
        if let Some(flag) = cancel {
            flag.check()?;
        }

        let ext = if variant.ext.is_empty() {
            String::new()
        } else {
            format!(".{}", variant.ext)
        };
        let path = temp_path(dir, &ext);
        registry.register(&path);

        let started = Instant::now();
        backend.download_variant(source.url(), variant, &path, cancel)?;
        let elapsed = started.elapsed();
        info!(
            %role,
            variant = %variant.id,
            path = %path.display(),
            secs = elapsed.as_secs_f64(),
            "staged stream variant"
        );
        staged.push((
            role,
            Staged {
                file: StagedFile::ephemeral(path),
                elapsed,
            },
        ));
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaKind, StagedOrigin};
    use std::sync::Mutex;

    struct WriteBytes;

    impl DirectDownloader for WriteBytes {
        fn download(&self, _url: &str, dest: &Path, _cancel: Option<&CancelFlag>) -> Result<()> {
            std::fs::write(dest, b"media")?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingStreams {
        fetched: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl StreamBackend for RecordingStreams {
        fn list_variants(&self, _url: &str) -> Result<VariantListing> {
            unreachable!("staging never lists")
        }

        fn download_variant(
            &self,
            _url: &str,
            variant: &StreamVariant,
            dest: &Path,
            _cancel: Option<&CancelFlag>,
        ) -> Result<()> {
            if self.fail_on == Some(variant.id.as_str()) {
                return Err(EngineError::DownloadFailed(format!("variant {}", variant.id)));
            }
            self.fetched.lock().expect("lock").push(variant.id.clone());
            std::fs::write(dest, variant.id.as_bytes())?;
            Ok(())
        }
    }

    fn variant(id: &str, kind: MediaKind, ext: &str) -> StreamVariant {
        StreamVariant {
            id: id.to_string(),
            label: id.to_string(),
            kind,
            ext: ext.to_string(),
            height: None,
            fps: None,
            bitrate_kbps: None,
            filesize: None,
        }
    }

    fn youtube_source() -> SourceReference {
        SourceReference::streaming(
            "https://www.youtube.com/watch?v=abc",
            "Clip",
            "www.youtube.com",
            vec![
                variant("137", MediaKind::VideoOnly, "mp4"),
                variant("248", MediaKind::VideoOnly, "webm"),
                variant("140", MediaKind::AudioOnly, "m4a"),
                variant("251", MediaKind::AudioOnly, "webm"),
            ],
        )
    }

    fn request(dir: &Path, mode: OutputMode, filename: &str) -> OutputRequest {
        OutputRequest {
            mode,
            filename: filename.to_string(),
            directory: dir.to_path_buf(),
        }
    }

    #[test]
    fn fast_path_requires_video_mode_and_matching_extension() {
        let source = SourceReference::direct_file("http://x/a.mp4", "a.mp4", "x");
        let dir = Path::new("/out");
        assert!(is_direct_fast_path(&source, &request(dir, OutputMode::Video, "a.mp4")));
        assert!(!is_direct_fast_path(&source, &request(dir, OutputMode::Video, "a.mkv")));
        assert!(!is_direct_fast_path(&source, &request(dir, OutputMode::MuteVideo, "a.mp4")));
        assert!(!is_direct_fast_path(&source, &request(dir, OutputMode::Video, "a.MP4")));
    }

    #[test]
    fn temp_path_keeps_extension_and_is_unique() {
        let a = temp_path(Path::new("/out"), ".mov");
        let b = temp_path(Path::new("/out"), ".mov");
        assert_ne!(a, b);
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("mov"));
        assert_eq!(a.parent(), Some(Path::new("/out")));
    }

    #[test]
    fn fast_path_writes_final_file_without_registering() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = SourceReference::direct_file("http://x/a.mp4", "a.mp4", "x");
        let req = request(dir.path(), OutputMode::Video, "a.mp4");
        let mut registry = TempFileRegistry::new();

        let staged = stage_direct(&WriteBytes, &source, &req, &mut registry, None).expect("stage");
        assert_eq!(staged.file.origin, StagedOrigin::Final);
        assert_eq!(staged.file.path, dir.path().join("a.mp4"));
        assert!(registry.is_empty());
    }

    #[test]
    fn conversion_path_registers_uuid_named_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = SourceReference::direct_file("http://x/a.mov", "a.mov", "x");
        let req = request(dir.path(), OutputMode::Video, "b.mp4");
        let mut registry = TempFileRegistry::new();

        let staged = stage_direct(&WriteBytes, &source, &req, &mut registry, None).expect("stage");
        assert!(staged.file.is_ephemeral());
        assert!(registry.contains(&staged.file.path));
        assert_eq!(staged.file.path.extension().and_then(|e| e.to_str()), Some("mov"));
        assert_ne!(staged.file.path, dir.path().join("b.mp4"));
        registry.drain().expect("drain");
    }

    #[test]
    fn video_mode_selects_video_and_audio() {
        let source = youtube_source();
        let picked = select_variants(&source, OutputMode::Video, &VariantSelection::default())
            .expect("select");
        let ids: Vec<(StreamRole, &str)> = picked.iter().map(|(r, v)| (*r, v.id.as_str())).collect();
        assert_eq!(ids, vec![(StreamRole::Video, "137"), (StreamRole::Audio, "140")]);
    }

    #[test]
    fn audio_and_mute_modes_select_one_role() {
        let source = youtube_source();
        let selection = VariantSelection {
            video: Some("248".to_string()),
            audio: Some("251".to_string()),
        };
        let audio = select_variants(&source, OutputMode::Audio, &selection).expect("audio");
        assert_eq!(audio.len(), 1);
        assert_eq!((audio[0].0, audio[0].1.id.as_str()), (StreamRole::Audio, "251"));

        let mute = select_variants(&source, OutputMode::MuteVideo, &selection).expect("mute");
        assert_eq!(mute.len(), 1);
        assert_eq!((mute[0].0, mute[0].1.id.as_str()), (StreamRole::Video, "248"));
    }

    #[test]
    fn unknown_variant_id_is_rejected() {
        let source = youtube_source();
        let selection = VariantSelection {
            video: None,
            audio: Some("999".to_string()),
        };
        let err = select_variants(&source, OutputMode::Audio, &selection).expect_err("must fail");
        assert!(matches!(err, EngineError::UnknownVariant(ref id) if id == "999"));
    }

    #[test]
    fn variant_id_must_fit_its_role() {
        let source = youtube_source();
        let swapped = VariantSelection {
            video: Some("140".to_string()),
            audio: Some("137".to_string()),
        };
        let err = select_variants(&source, OutputMode::Video, &swapped).expect_err("must fail");
        assert!(matches!(
            err,
            EngineError::VariantKindMismatch { ref id, role: StreamRole::Video } if id == "140"
        ));

        let video_as_audio = VariantSelection {
            video: None,
            audio: Some("248".to_string()),
        };
        let err = select_variants(&source, OutputMode::Audio, &video_as_audio).expect_err("must fail");
        assert!(matches!(
            err,
            EngineError::VariantKindMismatch { ref id, role: StreamRole::Audio } if id == "248"
        ));
    }

    #[test]
    fn missing_role_is_rejected() {
        let source = SourceReference::streaming(
            "https://youtu.be/abc",
            "Clip",
            "youtu.be",
            vec![variant("140", MediaKind::AudioOnly, "m4a")],
        );
        let err = select_variants(&source, OutputMode::MuteVideo, &VariantSelection::default())
            .expect_err("must fail");
        assert!(matches!(err, EngineError::NoVariant(StreamRole::Video)));
    }

    #[test]
    fn stage_variants_registers_each_download() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = RecordingStreams::default();
        let mut registry = TempFileRegistry::new();

        let staged = stage_variants(
            &backend,
            &youtube_source(),
            OutputMode::Video,
            &VariantSelection::default(),
            dir.path(),
            &mut registry,
            None,
        )
        .expect("stage");

        assert_eq!(staged.len(), 2);
        assert_eq!(*backend.fetched.lock().expect("lock"), vec!["137", "140"]);
        for (_, s) in &staged {
            assert!(registry.contains(&s.file.path));
            assert!(s.file.path.exists());
        }
        assert_eq!(
            staged[1].1.file.path.extension().and_then(|e| e.to_str()),
            Some("m4a")
        );
        registry.drain().expect("drain");
    }

    #[test]
    fn failed_second_download_leaves_first_registered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = RecordingStreams {
            fail_on: Some("140"),
            ..RecordingStreams::default()
        };
        let mut registry = TempFileRegistry::new();

        let err = stage_variants(
            &backend,
            &youtube_source(),
            OutputMode::Video,
            &VariantSelection::default(),
            dir.path(),
            &mut registry,
            None,
        )
        .expect_err("must fail");
        assert!(matches!(err, EngineError::DownloadFailed(_)));
        assert_eq!(registry.pending().len(), 2);

        registry.drain().expect("drain");
        assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn canceled_job_stages_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = RecordingStreams::default();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut registry = TempFileRegistry::new();

        let err = stage_variants(
            &backend,
            &youtube_source(),
            OutputMode::Audio,
            &VariantSelection::default(),
            dir.path(),
            &mut registry,
            Some(&cancel),
        )
        .expect_err("must cancel");
        assert!(matches!(err, EngineError::Canceled));
        assert!(backend.fetched.lock().expect("lock").is_empty());
        assert!(registry.is_empty());
    }
}
