//! Codec arbitration.
//!
//! Decides which selected video stream(s) to fetch. The default policy pits
//! the best VP9 stream against the best AVC stream and refuses to guess when
//! neither dominates.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::CodecFamily;
use crate::error::{Result, SelectionError};
use crate::selector::VideoStreamInfo;

/// Factor by which AVC must out-bitrate VP9 to count as equal quality.
pub const AVC_BITRATE_MULTIPLIER: f64 = 1.5;

/// How the video stream(s) to fetch are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArbitrationMode {
    /// Pick one of VP9 and AVC by dominance.
    #[default]
    Auto,
    /// Fetch every family that reaches the top resolution.
    AllAtTopResolution,
    /// Fetch AV1 only, and only if it reaches the top resolution.
    ForceAv1,
    /// Fetch VP9 without any comparison.
    ForceVp9,
}

/// Explicit inputs of the arbitration policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbitrationPolicy {
    /// Selection mode.
    pub mode: ArbitrationMode,
    /// Bitrate equivalence factor between AVC and VP9.
    pub bitrate_multiplier: f64,
    /// Whether the auto mode also requires the bitrate margin to hold.
    pub require_bitrate_margin: bool,
}

impl Default for ArbitrationPolicy {
    fn default() -> Self {
        Self {
            mode: ArbitrationMode::Auto,
            bitrate_multiplier: AVC_BITRATE_MULTIPLIER,
            require_bitrate_margin: false,
        }
    }
}

impl ArbitrationPolicy {
    /// Policy with the given mode and default tuning.
    #[must_use]
    pub fn with_mode(mode: ArbitrationMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Enable or disable the strict bitrate margin.
    #[must_use]
    pub const fn with_bitrate_margin(mut self, required: bool) -> Self {
        self.require_bitrate_margin = required;
        self
    }
}

/// Choose the video stream(s) to fetch. The result is never empty.
pub fn choose(
    vp9: Option<&VideoStreamInfo>,
    avc: Option<&VideoStreamInfo>,
    av1: Option<&VideoStreamInfo>,
    policy: &ArbitrationPolicy,
) -> Result<Vec<VideoStreamInfo>> {
    let chosen = match policy.mode {
        ArbitrationMode::Auto => match (vp9, avc) {
            (Some(vp9), Some(avc)) => vec![determine_best_codec(vp9, avc, policy)?.clone()],
            (Some(only), None) | (None, Some(only)) => {
                warn!(family = %only.family, "Only one of vp9/avc is available, skipping comparison");
                vec![only.clone()]
            }
            (None, None) => {
                return Err(SelectionError::MissingStream {
                    family: CodecFamily::Vp9,
                }
                .into());
            }
        },
        ArbitrationMode::AllAtTopResolution => streams_at_top_resolution(vp9, avc, av1),
        ArbitrationMode::ForceAv1 => {
            let top = top_resolution(vp9, avc, av1);
            match av1 {
                Some(av1) if av1.resolution == top => vec![av1.clone()],
                _ => {
                    return Err(SelectionError::NoQualifyingAv1 {
                        top_resolution: top,
                    }
                    .into());
                }
            }
        }
        ArbitrationMode::ForceVp9 => match vp9 {
            Some(vp9) => vec![vp9.clone()],
            None => {
                return Err(SelectionError::MissingStream {
                    family: CodecFamily::Vp9,
                }
                .into());
            }
        },
    };

    if chosen.is_empty() {
        return Err(SelectionError::MissingStream {
            family: CodecFamily::Vp9,
        }
        .into());
    }

    for stream in &chosen {
        info!(
            family = %stream.family,
            format_id = %stream.format_id,
            resolution = stream.resolution,
            fps = stream.fps,
            bitrate = ?stream.bitrate,
            mode = ?policy.mode,
            "Chose video stream"
        );
    }
    Ok(chosen)
}

/// Decide between the best VP9 and the best AVC stream.
///
/// AVC is tested first, so an exact tie prefers AVC. With the bitrate margin
/// enabled AVC must also carry `multiplier` times the VP9 bitrate, and VP9
/// wins only while AVC stays below that margin. The margin never holds when
/// either bitrate is unknown.
pub fn determine_best_codec<'a>(
    vp9: &'a VideoStreamInfo,
    avc: &'a VideoStreamInfo,
    policy: &ArbitrationPolicy,
) -> Result<&'a VideoStreamInfo> {
    let margin = policy.bitrate_multiplier;
    let (avc_margin_ok, vp9_margin_ok) = if policy.require_bitrate_margin {
        match (vp9.bitrate, avc.bitrate) {
            (Some(vp9_kbps), Some(avc_kbps)) => {
                let scaled_vp9 = f64::from(vp9_kbps) * margin;
                let avc_kbps = f64::from(avc_kbps);
                (avc_kbps >= scaled_vp9, scaled_vp9 >= avc_kbps)
            }
            _ => (false, false),
        }
    } else {
        (true, true)
    };

    if avc.dominates(vp9) && avc_margin_ok {
        Ok(avc)
    } else if vp9.dominates(avc) && vp9_margin_ok {
        Ok(vp9)
    } else {
        Err(SelectionError::UndecidableCodec {
            vp9: vp9.metrics(),
            avc: avc.metrics(),
        }
        .into())
    }
}

fn top_resolution(
    vp9: Option<&VideoStreamInfo>,
    avc: Option<&VideoStreamInfo>,
    av1: Option<&VideoStreamInfo>,
) -> u32 {
    [vp9, avc, av1]
        .into_iter()
        .flatten()
        .map(|s| s.resolution)
        .max()
        .unwrap_or(0)
}

/// Every present stream whose resolution equals the maximum, in vp9, avc, av1 order.
pub fn streams_at_top_resolution(
    vp9: Option<&VideoStreamInfo>,
    avc: Option<&VideoStreamInfo>,
    av1: Option<&VideoStreamInfo>,
) -> Vec<VideoStreamInfo> {
    let top = top_resolution(vp9, avc, av1);
    [vp9, avc, av1]
        .into_iter()
        .flatten()
        .filter(|s| s.resolution == top)
        .cloned()
        .collect()
}

/// Audio family muxed with a video family.
///
/// VP9 pairs with Opus and the MP4 families with m4a. Lossless audio for
/// editing is transcoded from the m4a stream regardless of the video family.
#[must_use]
pub const fn paired_audio(video: CodecFamily, lossless: bool) -> CodecFamily {
    match video {
        CodecFamily::Vp9 if !lossless => CodecFamily::Opus,
        _ => CodecFamily::M4a,
    }
}
