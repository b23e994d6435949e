//! External tool wrappers.
//!
//! The downloader (`yt-dlp`), the muxer (`ffmpeg`) and the media-info probe
//! are driven as blocking subprocesses. Each tool is configured as an argv
//! prefix, so wrappers such as `toolbox run ffmpeg` work unchanged.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use tracing::{debug, warn};

use crate::catalog::ListingFormat;
use crate::error::{Error, Result, ToolError};

/// A configured tool invocation prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    prefix_args: Vec<String>,
}

impl ToolCommand {
    /// Build from an argv prefix such as `["toolbox", "run", "ffmpeg"]`.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, prefix_args) = argv
            .split_first()
            .ok_or_else(|| Error::Configuration("Tool command must not be empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            prefix_args: prefix_args.to_vec(),
        })
    }

    /// Build for a bare program name.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Program that is actually spawned.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args).args(args);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> Error {
        ToolError::SpawnFailed {
            program: self.program.clone(),
            reason: e.to_string(),
        }
        .into()
    }
}

/// Outcome of a tool invocation that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    /// Exit code zero.
    Success,
    /// Non-zero exit, or killed by a signal (`code` is `None`).
    Failed {
        /// Exit code, if any.
        code: Option<i32>,
    },
}

impl ToolStatus {
    /// Whether the tool exited successfully.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<ExitStatus> for ToolStatus {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            Self::Success
        } else {
            Self::Failed {
                code: status.code(),
            }
        }
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed { code: Some(code) } => write!(f, "exit code {code}"),
            Self::Failed { code: None } => write!(f, "terminated by signal"),
        }
    }
}

/// Download tool used to list and fetch streams.
#[cfg_attr(test, mockall::automock)]
pub trait DownloadTool: Send + Sync {
    /// Fetch the format listing of `url`.
    fn list_formats(&self, url: &str, format: ListingFormat) -> Result<String>;

    /// Download one format of `url` using the output `template`.
    ///
    /// A non-zero exit is reported as [`ToolStatus::Failed`]; only a tool that
    /// cannot be started is an error.
    fn fetch(&self, url: &str, format_id: &str, template: &str) -> Result<ToolStatus>;
}

/// `yt-dlp` driven in a working directory.
#[derive(Debug, Clone)]
pub struct YtDlp {
    command: ToolCommand,
    work_dir: PathBuf,
    cookies: Option<PathBuf>,
}

impl YtDlp {
    /// Create a downloader writing into `work_dir`.
    #[must_use]
    pub fn new(command: ToolCommand, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            work_dir: work_dir.into(),
            cookies: None,
        }
    }

    /// Pass a cookies file with every request.
    #[must_use]
    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    fn cookie_args(&self) -> Vec<String> {
        self.cookies
            .as_ref()
            .map(|path| vec!["--cookies".to_string(), path.display().to_string()])
            .unwrap_or_default()
    }

    fn listing_args(&self, url: &str, format: ListingFormat) -> Vec<String> {
        let flag = match format {
            ListingFormat::Json => "-J",
            ListingFormat::Table => "-F",
        };
        let mut args = vec![flag.to_string(), "--no-playlist".to_string(), url.to_string()];
        args.extend(self.cookie_args());
        args
    }

    fn fetch_args(&self, url: &str, format_id: &str, template: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            template.to_string(),
            "-f".to_string(),
            format_id.to_string(),
            url.to_string(),
        ];
        args.extend(self.cookie_args());
        args
    }
}

impl DownloadTool for YtDlp {
    fn list_formats(&self, url: &str, format: ListingFormat) -> Result<String> {
        let args = self.listing_args(url, format);
        debug!(program = self.command.program(), ?args, "Listing formats");

        let output = self
            .command
            .command(&args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.command.spawn_error(e))?;

        if !output.status.success() {
            return Err(ToolError::ListingFailed {
                url: url.to_string(),
                reason: format!(
                    "{}: {}",
                    ToolStatus::from(output.status),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn fetch(&self, url: &str, format_id: &str, template: &str) -> Result<ToolStatus> {
        let args = self.fetch_args(url, format_id, template);
        debug!(program = self.command.program(), ?args, "Fetching stream");

        let status = self
            .command
            .command(&args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| self.command.spawn_error(e))?;
        Ok(status.into())
    }
}

/// Audio handling when muxing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    /// Copy the audio track as-is.
    Copy,
    /// Decode to 16-bit PCM for editing.
    PcmS16le,
}

impl AudioCodec {
    const fn as_arg(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::PcmS16le => "pcm_s16le",
        }
    }
}

/// One video+audio mux.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxJob {
    /// Video premux file.
    pub video: PathBuf,
    /// Audio premux file.
    pub audio: PathBuf,
    /// Muxed output file.
    pub output: PathBuf,
    /// Audio codec handling.
    pub audio_codec: AudioCodec,
}

/// Mux and transcode tool.
#[cfg_attr(test, mockall::automock)]
pub trait MuxTool: Send + Sync {
    /// Combine video and audio into one container; video is always copied.
    fn mux(&self, job: &MuxJob) -> Result<ToolStatus>;

    /// Transcode an audio file into a high-quality VBR MP3.
    fn transcode_mp3(&self, input: &Path, output: &Path) -> Result<ToolStatus>;
}

/// `ffmpeg` runner.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    command: ToolCommand,
}

impl Ffmpeg {
    /// Create a runner from a configured command.
    #[must_use]
    pub const fn new(command: ToolCommand) -> Self {
        Self { command }
    }

    fn run(&self, args: &[String]) -> Result<ToolStatus> {
        debug!(program = self.command.program(), ?args, "Running muxer");
        let status = self
            .command
            .command(args)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| self.command.spawn_error(e))?;
        Ok(status.into())
    }
}

fn mux_args(job: &MuxJob) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        job.video.display().to_string(),
        "-i".to_string(),
        job.audio.display().to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        job.audio_codec.as_arg().to_string(),
        job.output.display().to_string(),
    ]
}

fn mp3_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-c:a".to_string(),
        "libmp3lame".to_string(),
        "-q:a".to_string(),
        "0".to_string(),
        output.display().to_string(),
    ]
}

impl MuxTool for Ffmpeg {
    fn mux(&self, job: &MuxJob) -> Result<ToolStatus> {
        self.run(&mux_args(job))
    }

    fn transcode_mp3(&self, input: &Path, output: &Path) -> Result<ToolStatus> {
        self.run(&mp3_args(input, output))
    }
}

/// Best-effort probe of a file's video format, uppercased (e.g. `VP9`).
///
/// Returns `None` when the probe cannot run or reports nothing.
pub fn probe_video_codec(command: &ToolCommand, path: &Path) -> Option<String> {
    let output = command
        .command([std::ffi::OsStr::new("--output=Video;%Format%"), path.as_os_str()])
        .stdin(Stdio::null())
        .output();

    match output {
        Ok(out) if out.status.success() => {
            let codec = String::from_utf8_lossy(&out.stdout).trim().to_uppercase();
            if codec.is_empty() { None } else { Some(codec) }
        }
        Ok(out) => {
            debug!(status = %ToolStatus::from(out.status), "Media info probe failed");
            None
        }
        Err(e) => {
            warn!(program = command.program(), error = %e, "Media info probe unavailable");
            None
        }
    }
}
