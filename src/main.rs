use std::io::Write;

use anyhow::Result;
use clap::Parser as ClapParser;
use env_logger::fmt::Formatter;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::command::{Cli, Commands, LogFormat};
use cli::demux::cmd_demux;
use cli::info::cmd_info;
use cli::remux::cmd_remux;

mod cli;
mod input;
pub(crate) mod timestamp;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let multi = MultiProgress::new();

    let progress = init_logging(&cli, &multi)?.then_some(&multi);

    match &cli.command {
        Commands::Info(args) => cmd_info(args, &cli, progress),
        Commands::Demux(args) => cmd_demux(args, &cli, progress),
        Commands::Remux(args) => cmd_remux(args, &cli, progress),
    }
}

/// Installs the global logger. Returns whether progress bars are drawn, in
/// which case log lines go through `multi` to keep the bars intact.
fn init_logging(cli: &Cli, multi: &MultiProgress) -> Result<bool> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(cli.loglevel.to_level_filter());
    match cli.log_format {
        LogFormat::Plain => builder.format_timestamp_millis(),
        LogFormat::Json => builder.format(json_record),
    };

    if cli.progress {
        LogWrapper::new(multi.clone(), builder.build()).try_init()?;
    } else {
        builder.try_init()?;
    }
    Ok(cli.progress)
}

fn json_record(buf: &mut Formatter, record: &log::Record) -> std::io::Result<()> {
    let line = serde_json::json!({
        "ts": buf.timestamp_millis().to_string(),
        "lvl": record.level().as_str(),
        "target": record.target(),
        "msg": record.args().to_string(),
    });
    writeln!(buf, "{line}")
}
