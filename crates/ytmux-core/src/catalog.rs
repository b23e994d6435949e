//! Format catalog parsing.
//!
//! Turns the download tool's format listing into five codec-family buckets.
//! Two listing sources are understood:
//!
//! - the human-readable table printed by `yt-dlp -F`
//! - the structured report printed by `yt-dlp -J`
//!
//! Both are reduced to [`FormatLine`] records so classification and
//! selection never care where a row came from.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::Result;

/// Codec family of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecFamily {
    /// VP9 video.
    Vp9,
    /// H.264/AVC video.
    Avc,
    /// AV1 video.
    Av1,
    /// Opus audio.
    Opus,
    /// AAC audio in an m4a container.
    M4a,
}

impl CodecFamily {
    /// Tag embedded in downloaded file names by the naming template.
    #[must_use]
    pub const fn file_tag(self) -> &'static str {
        match self {
            Self::Vp9 => "vp9",
            Self::Avc => "avc",
            Self::Av1 => "av01",
            Self::Opus => "opus",
            Self::M4a => "m4a",
        }
    }

    /// Substrings identifying a downloaded premux file of this family.
    ///
    /// The naming template writes the tool's codec string, which may be a
    /// short name (`vp9`) or a full codec id (`vp09.00.40.08`, `mp4a.40.2`).
    /// m4a audio is recognized by its extension.
    #[must_use]
    pub const fn match_tags(self) -> &'static [&'static str] {
        match self {
            Self::Vp9 => &["vp9", "vp09"],
            Self::Avc => &["avc"],
            Self::Av1 => &["av01"],
            Self::Opus => &["opus"],
            Self::M4a => &["m4a"],
        }
    }

    /// Container extension for a muxed file of this video family.
    ///
    /// VP9 goes into Matroska, AVC and AV1 into MP4. Audio families have none.
    #[must_use]
    pub const fn muxed_extension(self) -> Option<&'static str> {
        match self {
            Self::Vp9 => Some("mkv"),
            Self::Avc | Self::Av1 => Some("mp4"),
            Self::Opus | Self::M4a => None,
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vp9 => write!(f, "vp9"),
            Self::Avc => write!(f, "avc"),
            Self::Av1 => write!(f, "av1"),
            Self::Opus => write!(f, "opus"),
            Self::M4a => write!(f, "m4a"),
        }
    }
}

/// Which listing the download tool is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingFormat {
    /// Structured JSON report (`-J`).
    #[default]
    Json,
    /// Human-readable table (`-F`).
    Table,
}

impl fmt::Display for ListingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Table => write!(f, "table"),
        }
    }
}

/// Classify one listing row into a codec family.
///
/// Substring tests run in a fixed priority order and the first match wins:
/// vp9, avc (video only), opus, m4a (audio only), av1.
pub fn classify_line(line: &str) -> Option<CodecFamily> {
    if line.contains("vp9") || line.contains("vp09") {
        Some(CodecFamily::Vp9)
    } else if line.contains("avc") && line.contains("video only") {
        Some(CodecFamily::Avc)
    } else if line.contains("opus") {
        Some(CodecFamily::Opus)
    } else if line.contains("m4a") && line.contains("audio only") {
        Some(CodecFamily::M4a)
    } else if line.contains("av01") || line.contains("av1") {
        Some(CodecFamily::Av1)
    } else {
        None
    }
}

/// One parsed row of a format listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatLine {
    /// Format code as understood by the download tool (e.g. `137`, `251-drc`).
    pub format_id: String,
    /// Text used for codec classification.
    pub descriptor: String,
    /// Vertical resolution, if the row describes video.
    pub height: Option<u32>,
    /// Frame rate, if the row describes video.
    pub fps: Option<u32>,
    /// Total bitrate in kbit/s.
    pub bitrate_kbps: Option<u32>,
}

impl FormatLine {
    /// Leading numeric part of the format code.
    #[must_use]
    pub fn numeric_id(&self) -> Option<u32> {
        leading_digits(&self.format_id)
    }

    /// Parse a row of the `-F` table.
    ///
    /// Returns `None` for headers, separators and rows whose first column is
    /// not a numeric format code (storyboards and the like).
    pub fn from_table_row(row: &str) -> Option<Self> {
        let normalized: String = row
            .chars()
            .map(|c| if matches!(c, '│' | '|' | ',') { ' ' } else { c })
            .collect();
        let tokens: Vec<&str> = normalized.split_whitespace().collect();

        let format_id = *tokens.first()?;
        if !FORMAT_ID.as_ref()?.is_match(format_id) {
            return None;
        }

        let mut height = None;
        let mut fps = None;
        let mut metrics_start = None;

        if let Some(pos) = tokens.iter().position(|t| is_resolution(t)) {
            height = RESOLUTION
                .as_ref()?
                .captures(tokens[pos])
                .and_then(|c| c.get(2))
                .and_then(|m| m.as_str().parse().ok());
            fps = tokens
                .get(pos + 1)
                .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
                .and_then(|t| t.parse().ok());
            metrics_start = Some(pos + 1);
        } else if let Some(pos) = tokens
            .windows(2)
            .position(|w| w[0] == "audio" && w[1] == "only")
        {
            metrics_start = Some(pos + 2);
        }

        if fps.is_none() {
            // Older layouts print the frame rate as "30fps".
            fps = tokens.iter().find_map(|t| {
                LEGACY_FPS
                    .as_ref()?
                    .captures(t)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse().ok())
            });
        }

        let bitrate_kbps = metrics_start.and_then(|start| {
            tokens.iter().skip(start).find_map(|t| parse_bitrate(t))
        });

        Some(Self {
            format_id: format_id.to_string(),
            descriptor: row.to_string(),
            height,
            fps,
            bitrate_kbps,
        })
    }
}

static FORMAT_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d+(-[A-Za-z0-9]+)?$").ok());
static RESOLUTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)x(\d+)$").ok());
static LEGACY_FPS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)fps$").ok());
static BITRATE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^~?(\d+(?:\.\d+)?)k$").ok());

fn is_resolution(token: &str) -> bool {
    RESOLUTION.as_ref().is_some_and(|re| re.is_match(token))
}

/// Parse a `2350k` style bitrate token, rounding fractional values.
fn parse_bitrate(token: &str) -> Option<u32> {
    let value: f64 = BITRATE
        .as_ref()?
        .captures(token)?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;
    Some(value.round() as u32)
}

fn leading_digits(s: &str) -> Option<u32> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Structured report printed by `yt-dlp -J`.
#[derive(Debug, Deserialize)]
struct JsonReport {
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    formats: Vec<JsonFormat>,
}

#[derive(Debug, Deserialize)]
struct JsonFormat {
    format_id: String,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    fps: Option<f64>,
    #[serde(default)]
    tbr: Option<f64>,
    #[serde(default)]
    vbr: Option<f64>,
    #[serde(default)]
    abr: Option<f64>,
}

impl JsonFormat {
    fn into_line(self) -> FormatLine {
        let vcodec = self.vcodec.unwrap_or_else(|| "none".to_string());
        let acodec = self.acodec.unwrap_or_else(|| "none".to_string());
        let kind = match (vcodec.as_str(), acodec.as_str()) {
            ("none", "none") => "",
            (_, "none") => "video only",
            ("none", _) => "audio only",
            _ => "",
        };
        let descriptor = format!(
            "{} {} {} {} {}",
            self.format_id,
            self.ext.as_deref().unwrap_or(""),
            vcodec,
            acodec,
            kind
        );
        let is_audio_only = kind == "audio only";
        FormatLine {
            format_id: self.format_id,
            descriptor: descriptor.trim_end().to_string(),
            height: if is_audio_only { None } else { self.height },
            fps: if is_audio_only {
                None
            } else {
                self.fps.map(|f| f.round() as u32)
            },
            bitrate_kbps: self
                .tbr
                .or(self.vbr)
                .or(self.abr)
                .map(|b| b.round() as u32),
        }
    }
}

/// A format listing split into codec-family buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatCatalog {
    /// Video id reported by the tool, when the listing carries one.
    pub video_id: Option<String>,
    /// Video title reported by the tool, when the listing carries one.
    pub title: Option<String>,
    /// Whether the listing used the DASH-prefixed table variant.
    pub dash_manifest: bool,
    vp9: Vec<FormatLine>,
    avc: Vec<FormatLine>,
    av1: Vec<FormatLine>,
    opus: Vec<FormatLine>,
    m4a: Vec<FormatLine>,
}

impl FormatCatalog {
    /// Parse a listing in the given format.
    pub fn parse(text: &str, format: ListingFormat) -> Result<Self> {
        match format {
            ListingFormat::Json => Self::from_json(text),
            ListingFormat::Table => Ok(Self::from_table(text)),
        }
    }

    /// Parse the `-F` table.
    pub fn from_table(text: &str) -> Self {
        let dash_manifest = text
            .lines()
            .any(|line| line.chars().take(8).collect::<String>().contains("-dash"));
        if dash_manifest {
            debug!("Listing uses the DASH-prefixed table variant");
        }

        let mut catalog = Self::classify(text.lines().filter_map(FormatLine::from_table_row));
        catalog.dash_manifest = dash_manifest;
        catalog
    }

    /// Parse the `-J` report.
    pub fn from_json(text: &str) -> Result<Self> {
        let report: JsonReport = serde_json::from_str(text)?;
        let lines = report
            .formats
            .into_iter()
            .filter(|f| leading_digits(&f.format_id).is_some())
            .map(JsonFormat::into_line);

        let mut catalog = Self::classify(lines);
        catalog.video_id = report.id;
        catalog.title = report.title;
        Ok(catalog)
    }

    /// Bucket parsed rows by codec family. Unmatched rows are dropped.
    pub fn classify(lines: impl IntoIterator<Item = FormatLine>) -> Self {
        let mut catalog = Self::default();
        for line in lines {
            match classify_line(&line.descriptor) {
                Some(family) => {
                    trace!(format_id = %line.format_id, %family, "Classified format");
                    catalog.bucket_mut(family).push(line);
                }
                None => trace!(format_id = %line.format_id, "Dropped unclassified format"),
            }
        }
        debug!(
            vp9 = catalog.vp9.len(),
            avc = catalog.avc.len(),
            av1 = catalog.av1.len(),
            opus = catalog.opus.len(),
            m4a = catalog.m4a.len(),
            "Classified format listing"
        );
        catalog
    }

    /// Rows classified under `family`, in listing order.
    #[must_use]
    pub fn bucket(&self, family: CodecFamily) -> &[FormatLine] {
        match family {
            CodecFamily::Vp9 => &self.vp9,
            CodecFamily::Avc => &self.avc,
            CodecFamily::Av1 => &self.av1,
            CodecFamily::Opus => &self.opus,
            CodecFamily::M4a => &self.m4a,
        }
    }

    fn bucket_mut(&mut self, family: CodecFamily) -> &mut Vec<FormatLine> {
        match family {
            CodecFamily::Vp9 => &mut self.vp9,
            CodecFamily::Avc => &mut self.avc,
            CodecFamily::Av1 => &mut self.av1,
            CodecFamily::Opus => &mut self.opus,
            CodecFamily::M4a => &mut self.m4a,
        }
    }

    /// Whether no row was classified at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vp9.is_empty()
            && self.avc.is_empty()
            && self.av1.is_empty()
            && self.opus.is_empty()
            && self.m4a.is_empty()
    }
}
