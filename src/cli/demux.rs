use std::fs::File;
use std::io::{self, BufWriter, Write};

use anyhow::{Context, Result};
use indicatif::MultiProgress;

use super::command::{Cli, DemuxArgs};
use super::progress::{create_progress_bar, report};
use crate::input::InputReader;
use nut::process::read::NutReader;

pub fn cmd_demux(args: &DemuxArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    let input = InputReader::new(&args.input)?;
    let total_bytes = input.len();
    let mut reader = NutReader::new(input);
    reader.set_fail_level(cli.fail_level());
    reader.read_headers().context("Failed to read headers")?;

    let stream_count = reader.stream_headers().len();
    if args.stream >= stream_count {
        anyhow::bail!(
            "Stream index must be below {stream_count}, got {}",
            args.stream
        );
    }
    let header = &reader.stream_headers()[args.stream];
    log::info!(
        "Extracting stream {} ({}, {})",
        args.stream,
        header.kind,
        String::from_utf8_lossy(&header.fourcc)
    );

    let mut output: Box<dyn Write> = if args.output.to_string_lossy() == "-" {
        Box::new(BufWriter::new(io::stdout().lock()))
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("Failed to create {}", args.output.display()))?;
        Box::new(BufWriter::new(file))
    };

    let pb = multi
        .map(|multi| create_progress_bar(multi, total_bytes))
        .transpose()?;

    let mut frames = 0u64;
    let mut written = 0u64;
    let mut bytes = 0u64;
    while let Some(frame) = reader
        .read_frame()
        .with_context(|| format!("Failed to read frame at byte {}", reader.position()))?
    {
        frames += 1;
        if frame.stream_id == args.stream && !frame.eor {
            output.write_all(&frame.data)?;
            written += 1;
            bytes += frame.len() as u64;
        }
        report(pb.as_ref(), frames, reader.position(), 256);
    }
    output.flush()?;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if reader.resync_count() > 0 {
        log::warn!(
            "Skipped {} damaged spans, {} frames dropped",
            reader.resync_count(),
            reader.dropped_frames()
        );
    }
    log::info!("Wrote {written} frames ({bytes} bytes) to {}", args.output.display());
    Ok(())
}
