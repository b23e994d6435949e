//! ytmux Core Library
//!
//! This crate provides the core functionality for ytmux:
//! - Format listing parsing into codec-family buckets
//! - Best-stream selection and codec arbitration
//! - Download, mux and cleanup orchestration around `yt-dlp` and `ffmpeg`

pub mod arbitration;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fs;
pub mod naming;
pub mod orchestrator;
pub mod output;
pub mod selector;
pub mod tools;

pub use arbitration::{
    AVC_BITRATE_MULTIPLIER, ArbitrationMode, ArbitrationPolicy, choose, determine_best_codec,
    paired_audio, streams_at_top_resolution,
};
pub use catalog::{CodecFamily, FormatCatalog, FormatLine, ListingFormat, classify_line};
pub use config::{AppConfig, RunOptions};
pub use error::{
    Error, ErrorKind, FileSystemError, Result, SelectionError, StreamMetrics, ToolError,
};
pub use fs::{FileMetadata, FileSystem, RealFileSystem};
pub use naming::{extract_video_id, mp3_file_name, muxed_file_name};
pub use orchestrator::{
    Orchestrator, RetryPolicy, RunPhase, RunReport, StreamOutcome, meets_size_floor,
};
pub use output::OutputTarget;
pub use selector::{
    AudioStreamInfo, BestStreams, VideoStreamInfo, select_best_audio, select_best_video,
    select_best_video_codec_id,
};
pub use tools::{
    AudioCodec, DownloadTool, Ffmpeg, MuxJob, MuxTool, ToolCommand, ToolStatus, YtDlp,
    probe_video_codec,
};
