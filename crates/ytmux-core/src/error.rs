//! Error types for ytmux core operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::CodecFamily;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ytmux core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid run configuration (bad output path, bad config file values).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Stream selection or codec arbitration could not reach a decision.
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// An external tool failed or could not be driven.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// File system operation failed.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Metrics of a video stream as shown in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMetrics {
    /// Vertical resolution in lines.
    pub resolution: u32,
    /// Frames per second.
    pub fps: u32,
    /// Total bitrate in kbit/s, if the listing reported one.
    pub bitrate: Option<u32>,
}

impl std::fmt::Display for StreamMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bitrate {
            Some(kbps) => write!(f, "{}p{} @ {kbps}k", self.resolution, self.fps),
            None => write!(f, "{}p{} @ unknown bitrate", self.resolution, self.fps),
        }
    }
}

/// Failures of the selection and arbitration stages.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// Two streams of one family are incomparable on resolution and fps.
    #[error("Ambiguous {family} selection: best {best} vs {rival}")]
    AmbiguousStream {
        /// Family whose bucket could not be reduced.
        family: CodecFamily,
        /// Stream chosen by the running scan.
        best: StreamMetrics,
        /// Stream that beats it on one axis and loses on the other.
        rival: StreamMetrics,
    },

    /// Neither VP9 nor AVC dominates the other.
    #[error("Cannot decide between vp9 ({vp9}) and avc ({avc})")]
    UndecidableCodec {
        /// Best VP9 stream.
        vp9: StreamMetrics,
        /// Best AVC stream.
        avc: StreamMetrics,
    },

    /// The requested family has no stream in the listing.
    #[error("No {family} stream available")]
    MissingStream {
        /// The absent family.
        family: CodecFamily,
    },

    /// AV1 was forced but is absent or below the top resolution.
    #[error("No AV1 stream at the top resolution ({top_resolution}p)")]
    NoQualifyingAv1 {
        /// Highest resolution across all video families.
        top_resolution: u32,
    },

    /// A listing row lacks a metric the selector needs.
    #[error("Unparseable {family} stream {format_id}: {reason}")]
    UnparseableStream {
        /// Family the row was classified under.
        family: CodecFamily,
        /// Format code of the row.
        format_id: String,
        /// What is missing.
        reason: String,
    },
}

/// Failures while driving external tools.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool binary could not be started.
    #[error("Failed to start {program}: {reason}")]
    SpawnFailed {
        /// Program that failed to spawn.
        program: String,
        /// Underlying reason.
        reason: String,
    },

    /// The format listing could not be obtained.
    #[error("Format listing failed for {url}: {reason}")]
    ListingFailed {
        /// URL that was listed.
        url: String,
        /// Tool output or exit status.
        reason: String,
    },

    /// Every download attempt for a stream failed.
    #[error("Download of format {format_id} failed after {attempts} attempts")]
    RetriesExhausted {
        /// Format code being fetched.
        format_id: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The mux tool exited with a failure.
    #[error("Mux into {output} failed: {reason}")]
    MuxFailed {
        /// Intended output path.
        output: PathBuf,
        /// Exit status description.
        reason: String,
    },

    /// A downloaded premux file could not be found in the working directory.
    #[error("No {tag} premux file for video {video_id} in {directory}")]
    MissingPremux {
        /// Video id searched for.
        video_id: String,
        /// Codec tag searched for.
        tag: String,
        /// Directory searched.
        directory: PathBuf,
    },
}

/// File system errors.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// Failed to read a file or directory.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Failed to write a file.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// Path that could not be written.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Failed to create a directory.
    #[error("Failed to create directory {path}: {reason}")]
    CreateDirFailed {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Failed to delete a file.
    #[error("Failed to delete {path}: {reason}")]
    DeleteFailed {
        /// Path that could not be deleted.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Path does not exist.
    #[error("Path not found: {path}")]
    NotFound {
        /// Missing path.
        path: PathBuf,
    },
}

/// Coarse error classification used for exit codes and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration or arguments.
    Configuration,
    /// Selection or arbitration could not decide.
    AmbiguousSelection,
    /// An external tool failed.
    ExternalTool,
    /// A downloaded file is missing.
    MissingPairedFile,
    /// File system failure.
    FileSystem,
    /// Malformed tool or config output.
    Serialization,
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Selection(_) => ErrorKind::AmbiguousSelection,
            Self::Tool(ToolError::MissingPremux { .. }) => ErrorKind::MissingPairedFile,
            Self::Tool(_) => ErrorKind::ExternalTool,
            Self::FileSystem(_) | Self::Io(_) => ErrorKind::FileSystem,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = Error::Configuration("output directory missing".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: output directory missing"
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_undecidable_codec_names_both_metric_sets() {
        let err: Error = SelectionError::UndecidableCodec {
            vp9: StreamMetrics {
                resolution: 1080,
                fps: 60,
                bitrate: Some(4500),
            },
            avc: StreamMetrics {
                resolution: 1440,
                fps: 30,
                bitrate: Some(8000),
            },
        }
        .into();
        let message = err.to_string();
        assert!(message.contains("1080p60 @ 4500k"));
        assert!(message.contains("1440p30 @ 8000k"));
        assert_eq!(err.kind(), ErrorKind::AmbiguousSelection);
    }

    #[test]
    fn test_unknown_bitrate_display() {
        let metrics = StreamMetrics {
            resolution: 720,
            fps: 30,
            bitrate: None,
        };
        assert_eq!(metrics.to_string(), "720p30 @ unknown bitrate");
    }

    #[test]
    fn test_missing_premux_kind() {
        let err: Error = ToolError::MissingPremux {
            video_id: "abc".to_string(),
            tag: "opus".to_string(),
            directory: PathBuf::from("/tmp"),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::MissingPairedFile);
    }

    #[test]
    fn test_retries_exhausted_kind() {
        let err: Error = ToolError::RetriesExhausted {
            format_id: "248".to_string(),
            attempts: 100,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
        assert!(err.to_string().contains("100 attempts"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::FileSystem);
    }
}
