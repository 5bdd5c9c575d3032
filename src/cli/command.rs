use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = env!("CARGO_PKG_VERSION"),
    long_version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (nut ", env!("NUT_VERSION"), ", built ", env!("BUILD_TIMESTAMP"), ")"
    ),
    about      = "Tools for inspecting, demuxing and remuxing NUT multimedia containers",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat damaged data as fatal instead of resynchronising.
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Reader fail level matching `--strict`.
    pub fn fail_level(&self) -> log::Level {
        if self.strict {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print headers, metadata and per stream statistics.
    Info(InfoArgs),

    /// Extract the raw payloads of one stream.
    Demux(DemuxArgs),

    /// Rewrite all frames into a new file, dropping damaged spans.
    Remux(RemuxArgs),
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input NUT file (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Report format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Plain)]
    pub format: ReportFormat,
}

#[derive(Debug, Args)]
pub struct DemuxArgs {
    /// Input NUT file (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Stream to extract.
    #[arg(long, value_name = "INDEX", default_value_t = 0)]
    pub stream: usize,

    /// Output path for the payloads (use "-" for stdout).
    #[arg(long, value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct RemuxArgs {
    /// Input NUT file (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output NUT file.
    #[arg(long, value_name = "PATH")]
    pub output: PathBuf,

    /// How far one stream may run ahead of the others, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub window_ms: u64,

    /// Maximum distance between syncpoints in bytes (1-65536).
    #[arg(long, value_name = "BYTES", default_value_t = 32768,
          value_parser = clap::value_parser!(u64).range(1..=65536))]
    pub max_distance: u64,

    /// Do not write an index at the end of the file.
    #[arg(long)]
    pub no_index: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum ReportFormat {
    /// Aligned human-readable text.
    Plain,
    /// YAML document.
    Yaml,
}

#[test]
fn verify_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
