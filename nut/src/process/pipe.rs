//! Callback style adapters around the reader and writer.
//!
//! [`write_all`] pulls frames from a [`FrameProducer`] until it runs dry and
//! [`read_all`] pushes every frame of a file into a [`FrameConsumer`].

use std::io::{BufRead, Write};

use anyhow::Context;
use log::debug;

use crate::process::read::NutReader;
use crate::process::write::{NutWriter, WriterConfig};
use crate::structs::frame::NutFrame;
use crate::structs::stream_header::StreamDescriptor;

pub trait FrameProducer {
    /// Streams all later frames belong to. Called once, before [`produce`](Self::produce).
    fn produce_streams(&mut self) -> anyhow::Result<Vec<StreamDescriptor>>;

    /// Next frame, or `None` once there are no more.
    fn produce(&mut self) -> anyhow::Result<Option<NutFrame>>;
}

pub trait FrameConsumer {
    fn consume_streams(&mut self, streams: &[StreamDescriptor]) -> anyhow::Result<()>;

    /// Receives every frame in file order, then `None` once at the end.
    fn consume(&mut self, frame: Option<NutFrame>) -> anyhow::Result<()>;
}

/// Muxes everything `producer` yields into `sink` and returns the sink.
pub fn write_all<W: Write>(
    producer: &mut impl FrameProducer,
    sink: W,
    config: WriterConfig,
) -> anyhow::Result<W> {
    let streams = producer.produce_streams()?;
    let mut writer = NutWriter::new(sink, config);
    writer
        .write_streams(&streams, &[])
        .context("Failed to write headers")?;

    while let Some(frame) = producer.produce()? {
        let (stream_id, pts) = (frame.stream_id, frame.pts);
        writer
            .write_frame(frame)
            .with_context(|| format!("Failed to write frame {pts} of stream {stream_id}"))?;
    }
    writer.write_footer().context("Failed to finalize output")?;
    debug!("Muxed {} frames", writer.frames_written());

    Ok(writer.into_inner())
}

/// Demuxes `source` into `consumer`, returning the number of frames read.
pub fn read_all(
    source: impl BufRead,
    consumer: &mut impl FrameConsumer,
    fail_level: log::Level,
) -> anyhow::Result<u64> {
    let mut reader = NutReader::new(source);
    reader.set_fail_level(fail_level);
    reader.read_headers().context("Failed to read headers")?;
    consumer.consume_streams(&reader.stream_descriptors()?)?;

    let mut count = 0;
    while let Some(frame) = reader
        .read_frame()
        .with_context(|| format!("Failed to read frame at byte {}", reader.position()))?
    {
        consumer.consume(Some(frame))?;
        count += 1;
    }
    consumer.consume(None)?;

    if reader.resync_count() > 0 {
        debug!(
            "Recovered from {} damaged spans, dropped {} frames",
            reader.resync_count(),
            reader.dropped_frames()
        );
    }
    Ok(count)
}
