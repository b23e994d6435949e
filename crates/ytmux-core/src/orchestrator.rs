//! Fetch and mux orchestration.
//!
//! A run lists the available formats, selects and arbitrates, then for each
//! chosen video stream downloads it with its paired audio, muxes the pair and
//! removes the premux files once the muxed output looks complete.
//!
//! Failure scoping:
//! - selection and arbitration failures abort before anything is downloaded
//! - exhausting the download retries aborts the whole run
//! - a missing premux file or a failed mux only affects its own stream

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::arbitration::{ArbitrationPolicy, choose, paired_audio};
use crate::catalog::{CodecFamily, FormatCatalog};
use crate::config::{DEFAULT_BACKOFF_SECS, DEFAULT_MAX_ATTEMPTS, RunOptions};
use crate::error::{Error, Result, SelectionError, ToolError};
use crate::fs::FileSystem;
use crate::naming::{
    AUDIO_TEMPLATE, MUXED_MARKER, VIDEO_TEMPLATE, extract_video_id, mp3_file_name,
    muxed_file_name,
};
use crate::output::OutputTarget;
use crate::selector::{BestStreams, VideoStreamInfo};
use crate::tools::{AudioCodec, DownloadTool, MuxJob, MuxTool};

/// Seconds of video the muxed output must at least hold before cleanup.
pub const MIN_OUTPUT_SECONDS: u64 = 5;

/// Bytes per kilobit.
pub const KILOBITS_TO_BYTES: u64 = 125;

/// Whether a muxed file of `size` bytes holds at least [`MIN_OUTPUT_SECONDS`]
/// of a stream at `bitrate_kbps`.
///
/// An empty file or a zero bitrate never passes.
#[must_use]
pub fn meets_size_floor(size: u64, bitrate_kbps: u32) -> bool {
    size > 0
        && bitrate_kbps > 0
        && size >= MIN_OUTPUT_SECONDS * u64::from(bitrate_kbps) * KILOBITS_TO_BYTES
}

/// Download retry behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per download.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_secs(DEFAULT_BACKOFF_SECS),
        }
    }
}

/// Current phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    /// Listing, selecting and arbitrating.
    Selecting,
    /// Downloading premux files.
    Downloading,
    /// Muxing a stream pair.
    Muxing,
    /// Removing premux files.
    Cleaning,
    /// Run completed.
    Done,
    /// Run aborted.
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Selecting => write!(f, "Selecting"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Muxing => write!(f, "Muxing"),
            Self::Cleaning => write!(f, "Cleaning"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// What happened to one chosen video stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The mux tool succeeded.
    Muxed {
        /// Video family of the stream.
        family: CodecFamily,
        /// Muxed output file.
        output: PathBuf,
        /// Whether the output passed the size floor.
        verified: bool,
        /// Premux files that were deleted.
        removed: Vec<PathBuf>,
    },
    /// The mux tool failed; premux files are kept.
    MuxFailed {
        /// Video family of the stream.
        family: CodecFamily,
        /// Failure description.
        reason: String,
    },
    /// A premux file could not be found; nothing was muxed or deleted.
    Skipped {
        /// Video family of the stream.
        family: CodecFamily,
        /// Failure description.
        reason: String,
    },
}

impl StreamOutcome {
    /// Whether the stream ended in a muxed file.
    #[must_use]
    pub const fn is_muxed(&self) -> bool {
        matches!(self, Self::Muxed { .. })
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Video id the run worked on.
    pub video_id: String,
    /// Title reported by the listing, if any.
    pub title: Option<String>,
    /// One outcome per chosen video stream, in arbitration order.
    pub outcomes: Vec<StreamOutcome>,
    /// MP3 copy, if one was made.
    pub mp3: Option<PathBuf>,
}

impl RunReport {
    /// Whether every chosen stream was muxed.
    #[must_use]
    pub fn all_muxed(&self) -> bool {
        self.outcomes.iter().all(StreamOutcome::is_muxed)
    }

    /// Muxed output files.
    pub fn outputs(&self) -> impl Iterator<Item = &Path> {
        self.outcomes.iter().filter_map(|o| match o {
            StreamOutcome::Muxed { output, .. } => Some(output.as_path()),
            _ => None,
        })
    }

    /// Premux files deleted during cleanup.
    pub fn removed_files(&self) -> impl Iterator<Item = &Path> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                StreamOutcome::Muxed { removed, .. } => Some(removed),
                _ => None,
            })
            .flatten()
            .map(PathBuf::as_path)
    }
}

/// Drives one URL through listing, selection, download, mux and cleanup.
pub struct Orchestrator<'a, D, M, F>
where
    D: DownloadTool,
    M: MuxTool,
    F: FileSystem,
{
    downloader: &'a D,
    muxer: &'a M,
    fs: &'a F,
    work_dir: PathBuf,
    options: RunOptions,
    output: OutputTarget,
    retry: RetryPolicy,
    policy: ArbitrationPolicy,
    phase: RunPhase,
    mp3_attempted: bool,
    mp3: Option<PathBuf>,
}

impl<'a, D, M, F> Orchestrator<'a, D, M, F>
where
    D: DownloadTool,
    M: MuxTool,
    F: FileSystem,
{
    /// Create an orchestrator working in `work_dir`.
    ///
    /// The requested output is validated here, before any tool runs.
    pub fn new(
        downloader: &'a D,
        muxer: &'a M,
        fs: &'a F,
        work_dir: impl Into<PathBuf>,
        options: RunOptions,
    ) -> Result<Self> {
        let work_dir = work_dir.into();
        let output = OutputTarget::resolve(options.output.as_deref(), &work_dir, fs)?;
        let policy = ArbitrationPolicy::with_mode(options.mode);
        Ok(Self {
            downloader,
            muxer,
            fs,
            work_dir,
            options,
            output,
            retry: RetryPolicy::default(),
            policy,
            phase: RunPhase::Selecting,
            mp3_attempted: false,
            mp3: None,
        })
    }

    /// Override the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the arbitration tuning. The mode always comes from the run options.
    #[must_use]
    pub const fn with_arbitration(mut self, policy: ArbitrationPolicy) -> Self {
        self.policy = ArbitrationPolicy {
            mode: self.options.mode,
            ..policy
        };
        self
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> RunPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: RunPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Run phase changed");
            self.phase = phase;
        }
    }

    /// Run the whole pipeline for `url`.
    pub fn run(&mut self, url: &str) -> Result<RunReport> {
        let result = self.run_inner(url);
        match &result {
            Ok(report) => {
                self.set_phase(RunPhase::Done);
                info!(
                    video_id = %report.video_id,
                    muxed = report.outputs().count(),
                    streams = report.outcomes.len(),
                    "Run finished"
                );
            }
            Err(e) => {
                self.set_phase(RunPhase::Failed);
                error!(error = %e, "Run failed");
            }
        }
        result
    }

    fn run_inner(&mut self, url: &str) -> Result<RunReport> {
        self.set_phase(RunPhase::Selecting);
        info!(url, listing = %self.options.listing, "Listing formats");

        let listing = self.downloader.list_formats(url, self.options.listing)?;
        let catalog = FormatCatalog::parse(&listing, self.options.listing)?;
        if catalog.is_empty() {
            warn!(url, "Listing contains no usable formats");
        }
        let video_id = extract_video_id(url).or_else(|e| catalog.video_id.clone().ok_or(e))?;

        let best = BestStreams::select(&catalog)?;
        let chosen = choose(
            best.vp9.as_ref(),
            best.avc.as_ref(),
            best.av1.as_ref(),
            &self.policy,
        )?;

        // Every chosen stream needs its audio before anything is downloaded.
        for stream in &chosen {
            let family = paired_audio(stream.family, self.options.lossless_audio);
            if best.audio(family).is_none() {
                return Err(SelectionError::MissingStream { family }.into());
            }
        }
        self.output.check_stream_count(chosen.len());

        let outcomes = self.process(url, &video_id, &chosen, &best)?;

        Ok(RunReport {
            video_id,
            title: catalog.title,
            outcomes,
            mp3: self.mp3.clone(),
        })
    }

    /// Download, mux and clean up each chosen stream in order.
    pub fn process(
        &mut self,
        url: &str,
        video_id: &str,
        chosen: &[VideoStreamInfo],
        best: &BestStreams,
    ) -> Result<Vec<StreamOutcome>> {
        let mut outcomes = Vec::with_capacity(chosen.len());

        for stream in chosen {
            let audio_family = paired_audio(stream.family, self.options.lossless_audio);
            let audio = best
                .audio(audio_family)
                .ok_or(SelectionError::MissingStream {
                    family: audio_family,
                })?;

            self.set_phase(RunPhase::Downloading);
            info!(
                video = %stream.family,
                video_format = %stream.format_id,
                audio = %audio_family,
                audio_format = %audio.format_id,
                "Downloading stream pair"
            );
            self.fetch_with_retry(url, &stream.format_id, VIDEO_TEMPLATE)?;
            self.fetch_with_retry(url, &audio.format_id, AUDIO_TEMPLATE)?;

            let outcome = self.mux_stream(video_id, stream, audio_family);
            match &outcome {
                StreamOutcome::Muxed { output, .. } => {
                    info!(family = %stream.family, output = %output.display(), "Stream muxed");
                }
                StreamOutcome::MuxFailed { reason, .. } | StreamOutcome::Skipped { reason, .. } => {
                    warn!(family = %stream.family, reason, "Stream not muxed");
                }
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Download one format, retrying non-zero exits up to the policy ceiling.
    pub fn fetch_with_retry(&self, url: &str, format_id: &str, template: &str) -> Result<()> {
        let max = self.retry.max_attempts;
        for attempt in 1..=max {
            let status = self.downloader.fetch(url, format_id, template)?;
            if status.is_success() {
                debug!(format_id, attempt, "Download finished");
                return Ok(());
            }
            warn!(format_id, attempt, max, %status, "Download failed");
            if attempt < max && !self.retry.backoff.is_zero() {
                thread::sleep(self.retry.backoff);
            }
        }

        Err(ToolError::RetriesExhausted {
            format_id: format_id.to_string(),
            attempts: max,
        }
        .into())
    }

    fn mux_stream(
        &mut self,
        video_id: &str,
        stream: &VideoStreamInfo,
        audio_family: CodecFamily,
    ) -> StreamOutcome {
        let family = stream.family;
        let located = self.locate_premux(video_id, family).and_then(|video| {
            let audio = self.locate_premux(video_id, audio_family)?;
            Ok((video, audio))
        });
        let (video_file, audio_file) = match located {
            Ok(files) => files,
            Err(e) => {
                return StreamOutcome::Skipped {
                    family,
                    reason: e.to_string(),
                };
            }
        };

        self.set_phase(RunPhase::Muxing);
        let video_name = file_name_of(&video_file);
        let output = self.output.final_path(
            &self.work_dir,
            &muxed_file_name(&video_name, video_id, family),
        );
        let audio_codec = if self.options.lossless_audio && family == CodecFamily::Vp9 {
            AudioCodec::PcmS16le
        } else {
            AudioCodec::Copy
        };
        let job = MuxJob {
            video: video_file.clone(),
            audio: audio_file.clone(),
            output: output.clone(),
            audio_codec,
        };

        let mux_result = self.muxer.mux(&job);
        self.make_mp3_copy(video_id, &audio_file);

        match mux_result {
            Ok(status) if status.is_success() => {}
            Ok(status) => {
                return StreamOutcome::MuxFailed {
                    family,
                    reason: ToolError::MuxFailed {
                        output,
                        reason: status.to_string(),
                    }
                    .to_string(),
                };
            }
            Err(e) => {
                return StreamOutcome::MuxFailed {
                    family,
                    reason: e.to_string(),
                };
            }
        }

        self.set_phase(RunPhase::Cleaning);
        let (verified, removed) = self.clean_up(&output, stream.bitrate, &video_file, &audio_file);
        StreamOutcome::Muxed {
            family,
            output,
            verified,
            removed,
        }
    }

    /// Find the downloaded premux file of `family` for `video_id`.
    ///
    /// Partial downloads, muxed outputs and MP3 copies are ignored. When
    /// several files match, the most recently modified wins.
    pub fn locate_premux(&self, video_id: &str, family: CodecFamily) -> Result<PathBuf> {
        let id_marker = format!("[{video_id}]");
        let mut best: Option<(PathBuf, Option<std::time::SystemTime>)> = None;

        for path in self.fs.read_dir(&self.work_dir)? {
            if !self.fs.is_file(&path) {
                continue;
            }
            let name = file_name_of(&path);
            if is_excluded(&name) {
                continue;
            }
            let Some(pos) = name.find(&id_marker) else {
                continue;
            };
            let tail = &name[pos + id_marker.len()..];
            if !family.match_tags().iter().any(|tag| tail.contains(tag)) {
                continue;
            }

            let modified = self.fs.metadata(&path).ok().and_then(|m| m.modified);
            let newer = best
                .as_ref()
                .is_none_or(|(_, current)| modified >= *current);
            if newer {
                best = Some((path, modified));
            }
        }

        best.map(|(path, _)| {
            debug!(%family, path = %path.display(), "Located premux file");
            path
        })
        .ok_or_else(|| {
            Error::Tool(ToolError::MissingPremux {
                video_id: video_id.to_string(),
                tag: family.file_tag().to_string(),
                directory: self.work_dir.clone(),
            })
        })
    }

    fn make_mp3_copy(&mut self, video_id: &str, audio_file: &Path) {
        if !self.options.mp3_copy || self.mp3_attempted {
            return;
        }
        self.mp3_attempted = true;

        let target = self
            .work_dir
            .join(mp3_file_name(&file_name_of(audio_file), video_id));
        match self.muxer.transcode_mp3(audio_file, &target) {
            Ok(status) if status.is_success() => {
                info!(path = %target.display(), "MP3 copy written");
                self.mp3 = Some(target);
            }
            Ok(status) => warn!(%status, "MP3 transcode failed"),
            Err(e) => warn!(error = %e, "MP3 transcode failed"),
        }
    }

    /// Delete premux files if the output passes the size floor.
    ///
    /// Without a known bitrate there is no floor to check against, so nothing
    /// is deleted.
    fn clean_up(
        &self,
        output: &Path,
        bitrate_kbps: Option<u32>,
        video_file: &Path,
        audio_file: &Path,
    ) -> (bool, Vec<PathBuf>) {
        let size = if self.fs.is_file(output) {
            self.fs.metadata(output).map(|m| m.len).ok()
        } else {
            None
        };
        let verified = size
            .zip(bitrate_kbps)
            .is_some_and(|(len, kbps)| meets_size_floor(len, kbps));
        if !verified {
            warn!(
                output = %output.display(),
                size = ?size,
                bitrate_kbps = ?bitrate_kbps,
                "Muxed output is missing, too small or unverifiable, keeping premux files"
            );
            return (false, Vec::new());
        }

        let mut targets = vec![video_file];
        if !self.options.keep_audio {
            targets.push(audio_file);
        }

        let mut removed = Vec::new();
        for path in targets {
            if !self.fs.is_file(path) {
                continue;
            }
            match self.fs.remove_file(path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed premux file");
                    removed.push(path.to_path_buf());
                }
                Err(e) => warn!(error = %e, "Failed to remove premux file"),
            }
        }
        (true, removed)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_excluded(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".part")
        || lower.ends_with(".ytdl")
        || lower.ends_with(".mp3")
        || lower.contains(".part-frag")
        || name.contains(MUXED_MARKER)
}
