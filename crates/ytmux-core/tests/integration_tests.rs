//! Integration tests for ytmux core workflows.
//!
//! These tests run the whole pipeline against a temporary working directory:
//! - In-process fake tools that write premux and muxed files
//! - Shell scripts standing in for `yt-dlp` and `ffmpeg` (unix only)
//!
//! Nothing here touches the network.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tempfile::TempDir;
use ytmux_core::{
    ArbitrationMode, ArbitrationPolicy, CodecFamily, DownloadTool, Error, ErrorKind,
    ListingFormat, MuxJob, MuxTool, Orchestrator, RealFileSystem, Result, RetryPolicy,
    RunOptions, RunPhase, StreamOutcome, ToolStatus,
};

// =============================================================================
// Test Fixtures and Utilities
// =============================================================================

const URL: &str = "https://youtu.be/abc123";

const LISTING: &str = r#"{
    "id": "abc123",
    "title": "A Clip",
    "formats": [
        {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "tbr": 129.5},
        {"format_id": "251", "ext": "webm", "vcodec": "none", "acodec": "opus", "tbr": 135.0},
        {"format_id": "137", "ext": "mp4", "vcodec": "avc1.640028", "acodec": "none", "height": 1080, "fps": 30, "tbr": 4000},
        {"format_id": "248", "ext": "webm", "vcodec": "vp9", "acodec": "none", "height": 1080, "fps": 30, "tbr": 2500},
        {"format_id": "399", "ext": "mp4", "vcodec": "av01.0.08M.08", "acodec": "none", "height": 1080, "fps": 30, "tbr": 1800}
    ]
}"#;

/// Downloader that writes a fixed file per format code into the working directory.
struct FakeDownloader {
    work_dir: PathBuf,
    listing: String,
    files: HashMap<&'static str, &'static str>,
    failures_left: Mutex<u32>,
    fetched: Mutex<Vec<String>>,
}

impl FakeDownloader {
    fn new(work_dir: &Path) -> Self {
        let files = HashMap::from([
            ("248", "A Clip [abc123]_vp9.webm"),
            ("137", "A Clip [abc123]_avc1.640028.mp4"),
            ("399", "A Clip [abc123]_av01.0.08M.08.mp4"),
            ("251", "A Clip [abc123]_opus.webm"),
            ("140", "A Clip [abc123]_mp4a.40.2.m4a"),
        ]);
        Self {
            work_dir: work_dir.to_path_buf(),
            listing: LISTING.to_string(),
            files,
            failures_left: Mutex::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    fn failing_first(self, failures: u32) -> Self {
        *self.failures_left.lock().unwrap() = failures;
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl DownloadTool for FakeDownloader {
    fn list_formats(&self, _url: &str, _format: ListingFormat) -> Result<String> {
        Ok(self.listing.clone())
    }

    fn fetch(&self, _url: &str, format_id: &str, _template: &str) -> Result<ToolStatus> {
        self.fetched.lock().unwrap().push(format_id.to_string());

        let mut failures = self.failures_left.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Ok(ToolStatus::Failed { code: Some(1) });
        }

        match self.files.get(format_id) {
            Some(name) => {
                fs::write(self.work_dir.join(name), b"premux")?;
                Ok(ToolStatus::Success)
            }
            None => Ok(ToolStatus::Failed { code: Some(1) }),
        }
    }
}

/// Muxer that writes an output of a fixed size.
struct FakeMuxer {
    output_size: usize,
    jobs: Mutex<Vec<MuxJob>>,
}

impl FakeMuxer {
    fn new(output_size: usize) -> Self {
        Self {
            output_size,
            jobs: Mutex::new(Vec::new()),
        }
    }

    fn jobs(&self) -> Vec<MuxJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl MuxTool for FakeMuxer {
    fn mux(&self, job: &MuxJob) -> Result<ToolStatus> {
        fs::write(&job.output, vec![0_u8; self.output_size])?;
        self.jobs.lock().unwrap().push(job.clone());
        Ok(ToolStatus::Success)
    }

    fn transcode_mp3(&self, _input: &Path, output: &Path) -> Result<ToolStatus> {
        fs::write(output, b"mp3")?;
        Ok(ToolStatus::Success)
    }
}

/// Test fixture that provides a temporary working directory.
struct TestFixture {
    work_dir: TempDir,
    fs: RealFileSystem,
}

impl TestFixture {
    fn new() -> Result<Self> {
        let work_dir = TempDir::new()
            .map_err(|e| Error::Configuration(format!("Failed to create temp work dir: {e}")))?;
        Ok(Self {
            work_dir,
            fs: RealFileSystem::new(),
        })
    }

    fn path(&self) -> &Path {
        self.work_dir.path()
    }

    fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn no_wait() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        backoff: Duration::ZERO,
    }
}

// =============================================================================
// Auto Mode Workflows
// =============================================================================

#[test]
fn test_auto_mode_picks_dominating_avc() {
    let fixture = TestFixture::new().unwrap();
    let downloader = FakeDownloader::new(fixture.path());
    let muxer = FakeMuxer::new(4_000_000);

    let mut orchestrator = Orchestrator::new(
        &downloader,
        &muxer,
        &fixture.fs,
        fixture.path(),
        RunOptions::default(),
    )
    .unwrap()
    .with_retry(no_wait());
    let report = orchestrator.run(URL).unwrap();

    assert_eq!(orchestrator.phase(), RunPhase::Done);
    assert_eq!(report.title.as_deref(), Some("A Clip"));
    assert_eq!(downloader.fetched(), vec!["137", "140"]);
    assert_eq!(fixture.file_names(), vec!["A_Clip_[abc123]_avc_muxed.mp4"]);
}

#[test]
fn test_strict_margin_without_enough_avc_bitrate_is_undecidable() {
    let fixture = TestFixture::new().unwrap();
    let mut downloader = FakeDownloader::new(fixture.path());
    // avc 3500k dominates vp9 2500k but stays below 2500k * 1.5.
    downloader.listing = LISTING.replace("\"tbr\": 4000", "\"tbr\": 3500");
    let muxer = FakeMuxer::new(4_000_000);

    let mut orchestrator = Orchestrator::new(
        &downloader,
        &muxer,
        &fixture.fs,
        fixture.path(),
        RunOptions::default(),
    )
    .unwrap()
    .with_retry(no_wait())
    .with_arbitration(ArbitrationPolicy::default().with_bitrate_margin(true));
    let err = orchestrator.run(URL).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AmbiguousSelection);
    assert!(downloader.fetched().is_empty());
    assert!(muxer.jobs().is_empty());
}

#[test]
fn test_transient_download_failures_are_retried() {
    let fixture = TestFixture::new().unwrap();
    let downloader = FakeDownloader::new(fixture.path()).failing_first(3);
    let muxer = FakeMuxer::new(4_000_000);

    let mut orchestrator = Orchestrator::new(
        &downloader,
        &muxer,
        &fixture.fs,
        fixture.path(),
        RunOptions::default(),
    )
    .unwrap()
    .with_retry(no_wait());
    let report = orchestrator.run(URL).unwrap();

    assert!(report.all_muxed());
    assert_eq!(downloader.fetched(), vec!["137", "137", "137", "137", "140"]);
}

#[test]
fn test_retry_ceiling_aborts_run() {
    let fixture = TestFixture::new().unwrap();
    let downloader = FakeDownloader::new(fixture.path()).failing_first(u32::MAX);
    let muxer = FakeMuxer::new(4_000_000);

    let mut orchestrator = Orchestrator::new(
        &downloader,
        &muxer,
        &fixture.fs,
        fixture.path(),
        RunOptions::default(),
    )
    .unwrap()
    .with_retry(no_wait());
    let err = orchestrator.run(URL).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExternalTool);
    assert_eq!(downloader.fetched().len(), 5);
    assert_eq!(orchestrator.phase(), RunPhase::Failed);
    assert!(muxer.jobs().is_empty());
}

// =============================================================================
// Multi-stream Workflows
// =============================================================================

#[test]
fn test_all_codecs_with_output_directory() {
    let fixture = TestFixture::new().unwrap();
    let out_dir = TempDir::new().unwrap();
    let downloader = FakeDownloader::new(fixture.path());
    let muxer = FakeMuxer::new(4_000_000);
    let options = RunOptions {
        mode: ArbitrationMode::AllAtTopResolution,
        keep_audio: true,
        output: Some(out_dir.path().to_path_buf()),
        ..RunOptions::default()
    };

    let mut orchestrator =
        Orchestrator::new(&downloader, &muxer, &fixture.fs, fixture.path(), options)
            .unwrap()
            .with_retry(no_wait());
    let report = orchestrator.run(URL).unwrap();

    let families: Vec<CodecFamily> = report
        .outcomes
        .iter()
        .filter_map(|o| match o {
            StreamOutcome::Muxed { family, .. } => Some(*family),
            _ => None,
        })
        .collect();
    assert_eq!(
        families,
        vec![CodecFamily::Vp9, CodecFamily::Avc, CodecFamily::Av1]
    );

    for name in [
        "A_Clip_[abc123]_vp9_muxed.mkv",
        "A_Clip_[abc123]_avc_muxed.mp4",
        "A_Clip_[abc123]_av01_muxed.mp4",
    ] {
        assert!(out_dir.path().join(name).is_file(), "missing {name}");
    }

    // Audio premux files are kept, video premux files are gone.
    assert_eq!(
        fixture.file_names(),
        vec!["A Clip [abc123]_mp4a.40.2.m4a", "A Clip [abc123]_opus.webm"]
    );
}

#[test]
fn test_force_av1_with_mp3_copy() {
    let fixture = TestFixture::new().unwrap();
    let downloader = FakeDownloader::new(fixture.path());
    let muxer = FakeMuxer::new(4_000_000);
    let options = RunOptions {
        mode: ArbitrationMode::ForceAv1,
        mp3_copy: true,
        ..RunOptions::default()
    };

    let mut orchestrator =
        Orchestrator::new(&downloader, &muxer, &fixture.fs, fixture.path(), options)
            .unwrap()
            .with_retry(no_wait());
    let report = orchestrator.run(URL).unwrap();

    assert_eq!(downloader.fetched(), vec!["399", "140"]);
    assert_eq!(
        report.mp3.as_deref(),
        Some(fixture.path().join("A_Clip_[abc123].mp3").as_path())
    );
    assert_eq!(
        fixture.file_names(),
        vec!["A_Clip_[abc123].mp3", "A_Clip_[abc123]_av01_muxed.mp4"]
    );
}

#[test]
fn test_truncated_output_keeps_premux_files() {
    let fixture = TestFixture::new().unwrap();
    let downloader = FakeDownloader::new(fixture.path());
    // avc at 4000k needs 2_500_000 bytes.
    let muxer = FakeMuxer::new(2_499_999);

    let mut orchestrator = Orchestrator::new(
        &downloader,
        &muxer,
        &fixture.fs,
        fixture.path(),
        RunOptions::default(),
    )
    .unwrap()
    .with_retry(no_wait());
    let report = orchestrator.run(URL).unwrap();

    assert_eq!(report.removed_files().count(), 0);
    assert_eq!(fixture.file_names().len(), 3);
}

#[test]
fn test_empty_output_with_unknown_bitrate_keeps_premux_files() {
    let fixture = TestFixture::new().unwrap();
    let mut downloader = FakeDownloader::new(fixture.path());
    downloader.listing = LISTING.replace(", \"tbr\": 2500", "");
    let muxer = FakeMuxer::new(0);
    let options = RunOptions {
        mode: ArbitrationMode::ForceVp9,
        ..RunOptions::default()
    };

    let mut orchestrator =
        Orchestrator::new(&downloader, &muxer, &fixture.fs, fixture.path(), options)
            .unwrap()
            .with_retry(no_wait());
    let report = orchestrator.run(URL).unwrap();

    assert!(matches!(
        report.outcomes[0],
        StreamOutcome::Muxed {
            verified: false,
            ..
        }
    ));
    assert_eq!(report.removed_files().count(), 0);
    assert!(fixture.path().join("A Clip [abc123]_vp9.webm").is_file());
    assert!(fixture.path().join("A Clip [abc123]_opus.webm").is_file());
}

#[test]
fn test_literal_output_file() {
    let fixture = TestFixture::new().unwrap();
    let out_dir = TempDir::new().unwrap();
    let target = out_dir.path().join("final.mp4");
    let downloader = FakeDownloader::new(fixture.path());
    let muxer = FakeMuxer::new(4_000_000);
    let options = RunOptions {
        output: Some(target.clone()),
        ..RunOptions::default()
    };

    let mut orchestrator =
        Orchestrator::new(&downloader, &muxer, &fixture.fs, fixture.path(), options)
            .unwrap()
            .with_retry(no_wait());
    let report = orchestrator.run(URL).unwrap();

    assert_eq!(report.outputs().collect::<Vec<_>>(), vec![target.as_path()]);
    assert!(target.is_file());
}

#[test]
fn test_invalid_output_fails_before_listing() {
    let fixture = TestFixture::new().unwrap();
    let downloader = FakeDownloader::new(fixture.path());
    let muxer = FakeMuxer::new(4_000_000);
    let options = RunOptions {
        output: Some(fixture.path().join("missing").join("final.mp4")),
        ..RunOptions::default()
    };

    let result = Orchestrator::new(&downloader, &muxer, &fixture.fs, fixture.path(), options);
    assert!(matches!(result, Err(Error::Configuration(_))));
    assert!(downloader.fetched().is_empty());
}

// =============================================================================
// Subprocess Workflows
// =============================================================================

#[cfg(unix)]
mod subprocess {
    use super::*;
    use ytmux_core::{Ffmpeg, ToolCommand, YtDlp};

    const YT_DLP_SCRIPT: &str = r#"#!/bin/sh
case "$1" in
  -F)
    cat <<'EOF'
ID  EXT   RESOLUTION FPS CH │   FILESIZE   TBR PROTO │ VCODEC          VBR ACODEC      ABR ASR MORE INFO
251 webm  audio only      2 │    3.89MiB  154k https │ audio only          opus       154k 48k [en] medium, webm_dash
248 webm  1920x1080   30    │   35.63MiB  100k https │ vp9            100k video only          1080p, webm_dash
EOF
    ;;
  -o)
    case "$4" in
      248) printf 'video' > "Clip [abc123]_vp9.webm" ;;
      251) printf 'audio' > "Clip [abc123]_opus.webm" ;;
      *) exit 1 ;;
    esac
    ;;
  *) exit 2 ;;
esac
"#;

    const FFMPEG_SCRIPT: &str = r#"#!/bin/sh
for last; do :; done
dd if=/dev/zero of="$last" bs=1000 count=100 2>/dev/null
"#;

    #[test]
    fn test_scripted_tools_end_to_end() {
        let fixture = TestFixture::new().unwrap();
        let scripts = TempDir::new().unwrap();
        let yt_dlp = scripts.path().join("yt-dlp.sh");
        let ffmpeg = scripts.path().join("ffmpeg.sh");
        fs::write(&yt_dlp, YT_DLP_SCRIPT).unwrap();
        fs::write(&ffmpeg, FFMPEG_SCRIPT).unwrap();

        let downloader = YtDlp::new(
            ToolCommand::from_argv(&["sh".to_string(), yt_dlp.display().to_string()]).unwrap(),
            fixture.path(),
        );
        let muxer = Ffmpeg::new(
            ToolCommand::from_argv(&["sh".to_string(), ffmpeg.display().to_string()]).unwrap(),
        );
        let options = RunOptions {
            listing: ListingFormat::Table,
            ..RunOptions::default()
        };

        let mut orchestrator =
            Orchestrator::new(&downloader, &muxer, &fixture.fs, fixture.path(), options)
                .unwrap()
                .with_retry(no_wait());
        let report = orchestrator.run("https://www.youtube.com/watch?v=abc123").unwrap();

        assert!(report.all_muxed());
        // 100 kbit/s needs 62_500 bytes; the script writes 100_000.
        assert_eq!(fixture.file_names(), vec!["Clip_[abc123]_vp9_muxed.mkv"]);
    }
}
