//! ytmux command line entry point.
//!
//! Fetches the best video and audio streams of a video page with `yt-dlp`,
//! muxes them with `ffmpeg` and removes the intermediate files.

mod logging;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgGroup, Parser, ValueEnum};
use tracing::{debug, error, info, warn};
use ytmux_core::{
    AppConfig, ArbitrationMode, ErrorKind, Ffmpeg, ListingFormat, Orchestrator, RealFileSystem,
    RunOptions, RunReport, StreamOutcome, ToolCommand, YtDlp, probe_video_codec,
};

use crate::logging::LoggingConfig;

/// Fetch the best streams of a video and mux them without re-encoding.
#[derive(Debug, Parser)]
#[command(name = "ytmux", version, about)]
#[command(group(ArgGroup::new("mode").args(["all_codecs", "av1", "vp9"])))]
struct Args {
    /// Video page URL.
    url: String,

    /// Output file or existing directory (defaults to the working directory).
    output: Option<PathBuf>,

    /// Mux every codec family available at the top resolution.
    #[arg(short = 'a', long)]
    all_codecs: bool,

    /// Force AV1; fails if AV1 is below the top resolution.
    #[arg(short = 'v', long)]
    av1: bool,

    /// Force VP9 without comparing against AVC.
    #[arg(short = 'p', long)]
    vp9: bool,

    /// Keep the downloaded audio file after a verified mux.
    #[arg(short = 'k', long)]
    keep_audio: bool,

    /// Also write an MP3 copy of the audio.
    #[arg(short = 'm', long)]
    mp3: bool,

    /// Mux VP9 with uncompressed PCM audio for editing.
    #[arg(short = 'w', long = "wav")]
    lossless_audio: bool,

    /// Listing format requested from yt-dlp (overrides the config file).
    #[arg(long, value_enum)]
    listing: Option<ListingArg>,

    /// Config file to use instead of the default location.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug output on the console.
    #[arg(long)]
    verbose: bool,

    /// Only warnings and errors on the console.
    #[arg(long, conflicts_with = "verbose")]
    quiet: bool,

    /// Do not write a log file.
    #[arg(long)]
    no_log_file: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ListingArg {
    Json,
    Table,
}

impl From<ListingArg> for ListingFormat {
    fn from(arg: ListingArg) -> Self {
        match arg {
            ListingArg::Json => Self::Json,
            ListingArg::Table => Self::Table,
        }
    }
}

impl Args {
    const fn mode(&self) -> ArbitrationMode {
        if self.all_codecs {
            ArbitrationMode::AllAtTopResolution
        } else if self.av1 {
            ArbitrationMode::ForceAv1
        } else if self.vp9 {
            ArbitrationMode::ForceVp9
        } else {
            ArbitrationMode::Auto
        }
    }

    fn run_options(&self, config: &AppConfig) -> RunOptions {
        RunOptions {
            mode: self.mode(),
            keep_audio: self.keep_audio,
            mp3_copy: self.mp3,
            lossless_audio: self.lossless_audio,
            output: self.output.clone(),
            listing: self.listing.map_or(config.listing, ListingFormat::from),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_config =
        LoggingConfig::from_verbosity(args.verbose, args.quiet).with_file(!args.no_log_file);
    let _guard = match logging::init(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("ytmux: logging disabled: {e}");
            None
        }
    };

    match run(&args) {
        Ok(report) if report.all_muxed() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            error!(error = %e, "ytmux failed");
            match e.kind() {
                ErrorKind::Configuration => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

fn run(args: &Args) -> ytmux_core::Result<RunReport> {
    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.validate()?;

    let work_dir = std::env::current_dir()?;
    let fs = RealFileSystem::new();
    let downloader = YtDlp::new(config.downloader()?, work_dir.clone())
        .with_cookies(config.locate_cookies(&fs));
    let muxer = Ffmpeg::new(config.muxer()?);
    let options = args.run_options(&config);
    let mode = options.mode;
    debug!(?options, "Run options");

    let mut orchestrator = Orchestrator::new(&downloader, &muxer, &fs, &work_dir, options)?
        .with_retry(config.retry_policy())
        .with_arbitration(config.arbitration_policy(mode));
    let report = orchestrator.run(&args.url)?;

    let probe = config.mediainfo()?;
    summarize(&report, &probe);
    Ok(report)
}

fn summarize(report: &RunReport, probe: &ToolCommand) {
    for outcome in &report.outcomes {
        match outcome {
            StreamOutcome::Muxed {
                family,
                output,
                verified,
                ..
            } => {
                log_muxed(probe, &family.to_string(), output, *verified);
            }
            StreamOutcome::MuxFailed { family, reason } => {
                error!(%family, reason, "Mux failed");
            }
            StreamOutcome::Skipped { family, reason } => {
                warn!(%family, reason, "Stream skipped");
            }
        }
    }
    if let Some(mp3) = &report.mp3 {
        info!(path = %mp3.display(), "MP3 copy");
    }
}

fn log_muxed(probe: &ToolCommand, family: &str, output: &Path, verified: bool) {
    let codec = probe_video_codec(probe, output);
    if verified {
        info!(family, codec = codec.as_deref(), path = %output.display(), "Done");
    } else {
        warn!(
            family,
            codec = codec.as_deref(),
            path = %output.display(),
            "Output smaller than expected, intermediate files kept"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("ytmux").chain(argv.iter().copied()))
    }

    #[test]
    fn test_url_only_is_auto_mode() {
        let args = parse(&["https://youtu.be/abc123"]).unwrap();
        assert_eq!(args.mode(), ArbitrationMode::Auto);
        assert!(args.output.is_none());
        assert!(!args.keep_audio);
    }

    #[test]
    fn test_mode_flags() {
        assert_eq!(
            parse(&["-a", "u"]).unwrap().mode(),
            ArbitrationMode::AllAtTopResolution
        );
        assert_eq!(parse(&["-v", "u"]).unwrap().mode(), ArbitrationMode::ForceAv1);
        assert_eq!(parse(&["-p", "u"]).unwrap().mode(), ArbitrationMode::ForceVp9);
    }

    #[test]
    fn test_mode_flags_are_exclusive() {
        assert!(parse(&["-a", "-v", "u"]).is_err());
        assert!(parse(&["-p", "--av1", "u"]).is_err());
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(parse(&["--verbose", "--quiet", "u"]).is_err());
    }

    #[test]
    fn test_output_and_audio_flags() {
        let args = parse(&["-k", "-m", "-w", "u", "/tmp/out.mkv"]).unwrap();
        assert!(args.keep_audio);
        assert!(args.mp3);
        assert!(args.lossless_audio);
        assert_eq!(args.output, Some(PathBuf::from("/tmp/out.mkv")));
    }

    #[test]
    fn test_listing_defaults_to_config() {
        let config = AppConfig {
            listing: ListingFormat::Table,
            ..AppConfig::default()
        };

        let args = parse(&["u"]).unwrap();
        assert_eq!(args.run_options(&config).listing, ListingFormat::Table);

        let args = parse(&["--listing", "json", "u"]).unwrap();
        assert_eq!(args.run_options(&config).listing, ListingFormat::Json);
    }

    #[test]
    fn test_run_options_carry_flags() {
        let args = parse(&["-a", "-k", "u", "out"]).unwrap();
        let options = args.run_options(&AppConfig::default());
        assert_eq!(options.mode, ArbitrationMode::AllAtTopResolution);
        assert!(options.keep_audio);
        assert!(!options.mp3_copy);
        assert_eq!(options.output, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_missing_url_is_rejected() {
        assert!(parse(&[]).is_err());
    }
}
