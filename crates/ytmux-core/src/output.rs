//! Output path resolution.
//!
//! The requested output is validated before anything is listed or downloaded,
//! so a typo in the destination never costs a download.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fs::FileSystem;

/// Where muxed files are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// No output requested: the computed name in the working directory.
    WorkingDir,
    /// An existing directory: the computed name inside it.
    Directory(PathBuf),
    /// A literal file path whose parent directory exists.
    File(PathBuf),
}

impl OutputTarget {
    /// Validate the requested output against the file system.
    ///
    /// A bare file name has the working directory as its parent.
    pub fn resolve<F: FileSystem>(
        requested: Option<&Path>,
        work_dir: &Path,
        fs: &F,
    ) -> Result<Self> {
        let Some(requested) = requested else {
            return Ok(Self::WorkingDir);
        };

        let absolute = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            work_dir.join(requested)
        };

        if fs.is_dir(&absolute) {
            debug!(path = %absolute.display(), "Output is a directory");
            return Ok(Self::Directory(absolute));
        }

        let parent_exists = absolute.parent().is_some_and(|parent| fs.is_dir(parent));
        if parent_exists {
            debug!(path = %absolute.display(), "Output is a file path");
            return Ok(Self::File(absolute));
        }

        Err(Error::Configuration(format!(
            "Invalid output: neither {} nor its parent directory exists",
            requested.display()
        )))
    }

    /// Final path of a muxed file named `file_name`.
    ///
    /// A literal file target is used verbatim, so several streams written in
    /// one run overwrite each other there.
    #[must_use]
    pub fn final_path(&self, work_dir: &Path, file_name: &str) -> PathBuf {
        match self {
            Self::WorkingDir => work_dir.join(file_name),
            Self::Directory(dir) => dir.join(file_name),
            Self::File(path) => path.clone(),
        }
    }

    /// Warn when a literal file target receives more than one stream.
    pub fn check_stream_count(&self, streams: usize) {
        if let Self::File(path) = self
            && streams > 1
        {
            warn!(
                path = %path.display(),
                streams,
                "Several streams will be muxed into the same output file"
            );
        }
    }
}
