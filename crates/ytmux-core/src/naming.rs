//! File naming for downloads, muxed outputs and MP3 copies.

use std::sync::LazyLock;

use regex::Regex;

use crate::catalog::CodecFamily;
use crate::error::{Error, Result};

/// Download template for video premux files.
pub const VIDEO_TEMPLATE: &str = "%(title)s [%(id)s]_%(vcodec)s.%(ext)s";

/// Download template for audio premux files.
pub const AUDIO_TEMPLATE: &str = "%(title)s [%(id)s]_%(acodec)s.%(ext)s";

/// Marker appended to muxed file names.
pub const MUXED_MARKER: &str = "_muxed";

static REPEATED_UNDERSCORES: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"_{2,}").ok());

/// Extract the video id from a watch, short-link or shorts URL.
///
/// Query parameters and trailing path segments are dropped.
pub fn extract_video_id(url: &str) -> Result<String> {
    let markers = ["youtu.be/", "/shorts/", "watch?v="];
    let tail = markers
        .iter()
        .find_map(|marker| url.find(marker).map(|pos| &url[pos + marker.len()..]))
        .ok_or_else(|| Error::Configuration(format!("Cannot find a video id in URL: {url}")))?;

    let id: String = tail
        .chars()
        .take_while(|c| !matches!(c, '/' | '?' | '&' | '#'))
        .collect();

    if id.is_empty() {
        return Err(Error::Configuration(format!(
            "Cannot find a video id in URL: {url}"
        )));
    }
    Ok(id)
}

/// Replace spaces with underscores and collapse underscore runs.
pub fn sanitize(name: &str) -> String {
    let spaced = name.replace(' ', "_");
    match REPEATED_UNDERSCORES.as_ref() {
        Some(re) => re.replace_all(&spaced, "_").into_owned(),
        None => spaced,
    }
}

/// Everything of a downloaded file name up to and including `[<video id>]`.
fn prefix_through_id<'a>(file_name: &'a str, video_id: &str) -> &'a str {
    let marker = format!("[{video_id}]");
    match file_name.find(&marker) {
        Some(pos) => &file_name[..pos + marker.len()],
        None => file_name,
    }
}

/// Name of the muxed file built from a downloaded video premux.
///
/// `My Video [abc]_vp9.webm` becomes `My_Video_[abc]_vp9_muxed.mkv`.
pub fn muxed_file_name(video_file_name: &str, video_id: &str, family: CodecFamily) -> String {
    let extension = family.muxed_extension().unwrap_or("mkv");
    sanitize(&format!(
        "{}_{}{MUXED_MARKER}.{extension}",
        prefix_through_id(video_file_name, video_id),
        family.file_tag()
    ))
}

/// Name of the MP3 copy built from a downloaded audio premux.
pub fn mp3_file_name(audio_file_name: &str, video_id: &str) -> String {
    sanitize(&format!(
        "{}.mp3",
        prefix_through_id(audio_file_name, video_id)
    ))
}
