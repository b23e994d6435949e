//! Best-stream selection.
//!
//! Each codec-family bucket is reduced to a single best stream. Video streams
//! are ordered by dominance on resolution and frame rate; bitrate is carried
//! along but never decides, since low resolutions sometimes report inflated
//! bitrates. Audio streams are ordered by bitrate alone.

use tracing::{debug, warn};

use crate::catalog::{CodecFamily, FormatCatalog, FormatLine};
use crate::error::{Result, SelectionError, StreamMetrics};

/// The chosen stream of a video family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStreamInfo {
    /// Family the stream was classified under.
    pub family: CodecFamily,
    /// Full format code handed to the download tool.
    pub format_id: String,
    /// Leading numeric part of the format code.
    pub stream_id: u32,
    /// Vertical resolution in lines.
    pub resolution: u32,
    /// Frames per second.
    pub fps: u32,
    /// Bitrate in kbit/s, `None` when the listing did not report one.
    pub bitrate: Option<u32>,
}

impl VideoStreamInfo {
    /// Metrics for diagnostics.
    #[must_use]
    pub const fn metrics(&self) -> StreamMetrics {
        StreamMetrics {
            resolution: self.resolution,
            fps: self.fps,
            bitrate: self.bitrate,
        }
    }

    /// Whether this stream is at least as good as `other` on resolution and fps.
    #[must_use]
    pub const fn dominates(&self, other: &Self) -> bool {
        self.resolution >= other.resolution && self.fps >= other.fps
    }
}

/// The chosen stream of an audio family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStreamInfo {
    /// Family the stream was classified under.
    pub family: CodecFamily,
    /// Full format code handed to the download tool.
    pub format_id: String,
    /// Leading numeric part of the format code.
    pub stream_id: u32,
    /// Bitrate in kbit/s.
    pub bitrate: u32,
}

fn video_candidate(family: CodecFamily, line: &FormatLine) -> Result<VideoStreamInfo> {
    let unparseable = |reason: &str| SelectionError::UnparseableStream {
        family,
        format_id: line.format_id.clone(),
        reason: reason.to_string(),
    };

    let stream_id = line
        .numeric_id()
        .ok_or_else(|| unparseable("format code is not numeric"))?;
    let resolution = line.height.ok_or_else(|| unparseable("no resolution"))?;
    let fps = line.fps.ok_or_else(|| unparseable("no frame rate"))?;
    let bitrate = line.bitrate_kbps;
    if bitrate.is_none() {
        warn!(format_id = %line.format_id, %family, "No bitrate reported");
    }

    Ok(VideoStreamInfo {
        family,
        format_id: line.format_id.clone(),
        stream_id,
        resolution,
        fps,
        bitrate,
    })
}

/// Pick the best video stream of a bucket.
///
/// A candidate replaces the running best when it is at least as good on both
/// resolution and fps, so among equal streams the later one wins. Once the
/// scan is done every candidate must be dominated by the result; a candidate
/// that is better on one axis and worse on the other fails the selection.
///
/// Unlike a check against the running best during the scan, this accepts a
/// bucket such as `1080p30, 720p60, 2160p60`: the final `2160p60` dominates
/// both earlier rows, so no candidate is left incomparable.
///
/// Returns `Ok(None)` for an empty bucket.
pub fn select_best_video(
    family: CodecFamily,
    lines: &[FormatLine],
) -> Result<Option<VideoStreamInfo>> {
    let candidates = lines
        .iter()
        .map(|line| video_candidate(family, line))
        .collect::<Result<Vec<_>>>()?;

    let mut best: Option<&VideoStreamInfo> = None;
    for candidate in &candidates {
        let replaces = best.is_none_or(|current| candidate.dominates(current));
        if replaces {
            best = Some(candidate);
        }
    }

    let Some(best) = best else {
        return Ok(None);
    };

    if let Some(rival) = candidates.iter().find(|c| !best.dominates(c)) {
        return Err(SelectionError::AmbiguousStream {
            family,
            best: best.metrics(),
            rival: rival.metrics(),
        }
        .into());
    }

    debug!(
        %family,
        format_id = %best.format_id,
        resolution = best.resolution,
        fps = best.fps,
        bitrate = ?best.bitrate,
        "Selected best video stream"
    );
    Ok(Some(best.clone()))
}

/// Numeric format code of the best video stream of a bucket.
pub fn select_best_video_codec_id(
    family: CodecFamily,
    lines: &[FormatLine],
) -> Result<Option<u32>> {
    Ok(select_best_video(family, lines)?.map(|v| v.stream_id))
}

/// Pick the highest-bitrate audio stream of a bucket. Ties go to the later row.
///
/// Returns `Ok(None)` for an empty bucket.
pub fn select_best_audio(
    family: CodecFamily,
    lines: &[FormatLine],
) -> Result<Option<AudioStreamInfo>> {
    let mut best: Option<AudioStreamInfo> = None;

    for line in lines {
        let unparseable = |reason: &str| SelectionError::UnparseableStream {
            family,
            format_id: line.format_id.clone(),
            reason: reason.to_string(),
        };
        let stream_id = line
            .numeric_id()
            .ok_or_else(|| unparseable("format code is not numeric"))?;
        let bitrate = line
            .bitrate_kbps
            .ok_or_else(|| unparseable("no bitrate"))?;

        if best.as_ref().is_none_or(|current| bitrate >= current.bitrate) {
            best = Some(AudioStreamInfo {
                family,
                format_id: line.format_id.clone(),
                stream_id,
                bitrate,
            });
        }
    }

    if let Some(audio) = &best {
        debug!(
            %family,
            format_id = %audio.format_id,
            bitrate = audio.bitrate,
            "Selected best audio stream"
        );
    }
    Ok(best)
}

/// Best stream of every family present in a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BestStreams {
    /// Best VP9 stream.
    pub vp9: Option<VideoStreamInfo>,
    /// Best AVC stream.
    pub avc: Option<VideoStreamInfo>,
    /// Best AV1 stream.
    pub av1: Option<VideoStreamInfo>,
    /// Best Opus stream.
    pub opus: Option<AudioStreamInfo>,
    /// Best m4a stream.
    pub m4a: Option<AudioStreamInfo>,
}

impl BestStreams {
    /// Run selection on every bucket of `catalog`.
    ///
    /// Any ambiguous bucket fails the whole selection.
    pub fn select(catalog: &FormatCatalog) -> Result<Self> {
        Ok(Self {
            vp9: select_best_video(CodecFamily::Vp9, catalog.bucket(CodecFamily::Vp9))?,
            avc: select_best_video(CodecFamily::Avc, catalog.bucket(CodecFamily::Avc))?,
            av1: select_best_video(CodecFamily::Av1, catalog.bucket(CodecFamily::Av1))?,
            opus: select_best_audio(CodecFamily::Opus, catalog.bucket(CodecFamily::Opus))?,
            m4a: select_best_audio(CodecFamily::M4a, catalog.bucket(CodecFamily::M4a))?,
        })
    }

    /// Best audio stream of `family`.
    #[must_use]
    pub const fn audio(&self, family: CodecFamily) -> Option<&AudioStreamInfo> {
        match family {
            CodecFamily::Opus => self.opus.as_ref(),
            CodecFamily::M4a => self.m4a.as_ref(),
            _ => None,
        }
    }
}
