use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar};

use super::command::{Cli, RemuxArgs};
use super::progress::{create_progress_bar, report};
use crate::input::InputReader;
use nut::process::read::NutReader;
use nut::process::write::{NutWriter, WriterConfig};
use nut::structs::frame::NutFrame;
use nut::structs::info::Info;
use nut::structs::stream_header::StreamDescriptor;

/// Messages from the reader thread, in file order.
enum ReadEvent {
    Headers(Vec<StreamDescriptor>, Vec<Info>),
    Frame(NutFrame),
}

struct ReaderThreadConfig {
    input_path: PathBuf,
    fail_level: log::Level,
    tx: mpsc::SyncSender<Result<ReadEvent>>,
    pb: Option<ProgressBar>,
}

fn spawn_reader_thread(config: ReaderThreadConfig) -> thread::JoinHandle<Result<()>> {
    thread::spawn(move || -> Result<()> {
        let ReaderThreadConfig {
            input_path,
            fail_level,
            tx,
            pb,
        } = config;

        let mut reader = NutReader::new(InputReader::new(&input_path)?);
        reader.set_fail_level(fail_level);

        let result = (|| -> Result<()> {
            reader.read_headers().context("Failed to read headers")?;
            let headers = ReadEvent::Headers(reader.stream_descriptors()?, reader.infos().to_vec());
            if tx.send(Ok(headers)).is_err() {
                return Ok(());
            }

            let mut frames = 0u64;
            while let Some(frame) = reader
                .read_frame()
                .with_context(|| format!("Failed to read frame at byte {}", reader.position()))?
            {
                frames += 1;
                report(pb.as_ref(), frames, reader.position(), 256);
                if tx.send(Ok(ReadEvent::Frame(frame))).is_err() {
                    break;
                }
            }
            Ok(())
        })();

        if let Err(e) = result {
            let _ = tx.send(Err(e));
        }

        if reader.resync_count() > 0 {
            log::warn!(
                "Skipped {} damaged spans, {} frames dropped",
                reader.resync_count(),
                reader.dropped_frames()
            );
        }
        log::info!("Read {} frames", reader.frames_read());
        Ok(())
    })
}

pub fn cmd_remux(args: &RemuxArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!(
        "Remuxing {} into {}",
        args.input.display(),
        args.output.display()
    );

    let total_bytes = if args.input.to_string_lossy() == "-" {
        None
    } else {
        std::fs::metadata(&args.input).ok().map(|m| m.len())
    };
    let pb = multi
        .map(|multi| create_progress_bar(multi, total_bytes))
        .transpose()?;

    let (tx, rx) = mpsc::sync_channel(64);
    let handle = spawn_reader_thread(ReaderThreadConfig {
        input_path: args.input.clone(),
        fail_level: cli.fail_level(),
        tx,
        pb: pb.clone(),
    });

    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let config = WriterConfig {
        reorder_window_ms: args.window_ms,
        max_distance: args.max_distance,
        write_index: !args.no_index,
        ..Default::default()
    };
    let mut writer = NutWriter::new(BufWriter::new(file), config);
    let mut last_pts: Vec<Option<i64>> = Vec::new();
    let mut skipped = 0u64;

    for event in rx {
        match event? {
            ReadEvent::Headers(streams, infos) => {
                writer
                    .write_streams(&streams, &infos)
                    .context("Failed to write headers")?;
                last_pts = vec![None; streams.len()];
            }
            ReadEvent::Frame(frame) => {
                // Damaged input can regress; the writer would reject it.
                let last = last_pts.get_mut(frame.stream_id).context("Frame before headers")?;
                let regressed = last.is_some_and(|last| frame.pts < last);
                if frame.pts < 0 || regressed {
                    log::warn!(
                        "Dropping stream {} frame at pts {}",
                        frame.stream_id,
                        frame.pts
                    );
                    skipped += 1;
                    continue;
                }
                *last = Some(frame.pts);
                writer.write_frame(frame)?;
            }
        }
    }

    match handle.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("Reader thread panicked"),
    }

    writer.write_footer().context("Failed to finalize output")?;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    log::info!(
        "Wrote {} frames, {} syncpoints, {} bytes ({skipped} frames dropped)",
        writer.frames_written(),
        writer.syncpoints_written(),
        writer.position()
    );
    Ok(())
}
