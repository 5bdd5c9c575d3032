use std::io::Write;

use log::{debug, trace};

use crate::process::reorder::ReorderBuffer;
use crate::structs::frame::{NutFrame, write_sm_data};
use crate::structs::frame_code::{
    FLAG_CHECKSUM, FLAG_EOR, FLAG_KEY, FLAG_SM_DATA, FrameRequest, encode_coded_pts,
};
use crate::structs::index::{Index, IndexEntry};
use crate::structs::info::Info;
use crate::structs::main_header::MainHeader;
use crate::structs::packet::{build_body, write_packet};
use crate::structs::startcode::{
    FILE_ID_STRING, INDEX_STARTCODE, INFO_STARTCODE, MAIN_STARTCODE, STREAM_STARTCODE,
    SYNCPOINT_STARTCODE,
};
use crate::structs::stream_header::{DEFAULT_MSB_PTS_SHIFT, StreamDescriptor, StreamHeader};
use crate::structs::syncpoint::Syncpoint;
use crate::utils::bytestream_io::NutOutput;
use crate::utils::errors::{NutError, Result};
use crate::utils::rational::Rational;
use crate::utils::timing::{GlobalTimestamp, MediaTime, convert};

/// Upper bound on the size of a frame header, used when deciding whether a
/// frame still fits before the next syncpoint.
const FRAME_HEADER_ESTIMATE: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// How far, in milliseconds, one stream may run ahead of another before
    /// its frames are written regardless.
    pub reorder_window_ms: u64,
    /// Upper bound on the bytes between two syncpoints.
    pub max_distance: u64,
    pub msb_pts_shift: u32,
    pub write_index: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            reorder_window_ms: 5000,
            max_distance: 32768,
            msb_pts_shift: DEFAULT_MSB_PTS_SHIFT,
            write_index: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Configuring,
    Streaming,
    Finalized,
}

#[derive(Debug, Clone, Copy)]
struct StreamState {
    time_base: Rational,
    time_base_id: usize,
    /// Pts the next frame header is coded against, as the reader sees it.
    last_pts: i64,
    /// Last pts accepted from the caller.
    last_input_pts: Option<i64>,
    msb_pts_shift: u32,
    max_pts_distance: u64,
}

/// Keyframe bookkeeping for the index written by [`NutWriter::write_footer`].
#[derive(Debug, Default)]
struct IndexBuilder {
    syncpoints: Vec<u64>,
    current: Option<usize>,
    keyframes: Vec<Vec<IndexEntry>>,
    max_pts: Option<(MediaTime, GlobalTimestamp)>,
}

impl IndexBuilder {
    fn add_syncpoint(&mut self, position: u64) {
        let aligned = position / 16 * 16;
        if self.syncpoints.last().is_none_or(|&last| last < aligned) {
            self.syncpoints.push(aligned);
            self.current = Some(self.syncpoints.len() - 1);
        }
    }

    fn add_frame(&mut self, frame: &NutFrame, time: MediaTime, pts: GlobalTimestamp) {
        if frame.keyframe {
            if let (Some(syncpoint), Some(entries)) =
                (self.current, self.keyframes.get_mut(frame.stream_id))
            {
                let fresh = entries
                    .last()
                    .is_none_or(|e| e.syncpoint != syncpoint && e.pts < frame.pts);
                if fresh {
                    entries.push(IndexEntry {
                        syncpoint,
                        pts: frame.pts,
                    });
                }
            }
        }

        if self.max_pts.is_none_or(|(max, _)| max < time) {
            self.max_pts = Some((time, pts));
        }
    }

    fn build(self) -> Index {
        Index {
            max_pts: self.max_pts.map(|(_, pts)| pts).unwrap_or_default(),
            syncpoints: self.syncpoints,
            keyframes: self.keyframes,
        }
    }
}

/// Push based NUT muxer.
///
/// Frames are accepted per stream in pts order and interleaved across
/// streams through a [`ReorderBuffer`]. Any error leaves the writer
/// finalized; the output written so far is not repaired.
///
/// # Example
///
/// ```rust,no_run
/// use std::fs::File;
/// use std::io::BufWriter;
/// use nut::process::write::{NutWriter, WriterConfig};
/// use nut::structs::frame::NutFrame;
/// use nut::structs::stream_header::StreamDescriptor;
/// use nut::utils::rational::Rational;
///
/// let file = BufWriter::new(File::create("output.nut")?);
/// let mut writer = NutWriter::new(file, WriterConfig::default());
/// writer.write_streams(
///     &[StreamDescriptor::video(b"FFV1", Rational::new(1, 25), 640, 480)],
///     &[],
/// )?;
/// writer.write_frame(NutFrame::key(0, 0, vec![0u8; 1024]))?;
/// writer.write_footer()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct NutWriter<W: Write> {
    out: NutOutput<W>,
    config: WriterConfig,
    state: WriterState,
    main_header: Option<MainHeader>,
    streams: Vec<StreamState>,
    reorder: ReorderBuffer,
    last_syncpoint: Option<u64>,
    frames_since_syncpoint: usize,
    index: IndexBuilder,
    frames_written: u64,
    syncpoints_written: u64,
}

impl<W: Write> NutWriter<W> {
    pub fn new(sink: W, config: WriterConfig) -> Self {
        let reorder = ReorderBuffer::new(0, config.reorder_window_ms);
        Self {
            out: NutOutput::new(sink),
            config,
            state: WriterState::Configuring,
            main_header: None,
            streams: Vec::new(),
            reorder,
            last_syncpoint: None,
            frames_since_syncpoint: 0,
            index: IndexBuilder::default(),
            frames_written: 0,
            syncpoints_written: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn main_header(&self) -> Option<&MainHeader> {
        self.main_header.as_ref()
    }

    /// Bytes written to the sink so far.
    pub fn position(&self) -> u64 {
        self.out.position()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn syncpoints_written(&self) -> u64 {
        self.syncpoints_written
    }

    /// Frames accepted but not yet written.
    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }

    pub fn get_ref(&self) -> &W {
        self.out.get_ref()
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn check_state(&self, expected: WriterState) -> Result<()> {
        match self.state {
            state if state == expected => Ok(()),
            WriterState::Configuring => Err(NutError::InvalidState("awaiting headers")),
            WriterState::Streaming => Err(NutError::InvalidState("streaming")),
            WriterState::Finalized => Err(NutError::InvalidState("finalized")),
        }
    }

    /// Builds the headers from stream descriptors and writes them.
    /// Timebases shared by several streams are stored once.
    pub fn write_streams(&mut self, descriptors: &[StreamDescriptor], infos: &[Info]) -> Result<()> {
        let mut time_bases: Vec<Rational> = Vec::new();
        let mut headers = Vec::with_capacity(descriptors.len());

        for (stream_id, descriptor) in descriptors.iter().enumerate() {
            let time_base_id = match time_bases.iter().position(|&tb| tb == descriptor.time_base) {
                Some(id) => id,
                None => {
                    time_bases.push(descriptor.time_base);
                    time_bases.len() - 1
                }
            };
            headers.push(StreamHeader::from_descriptor(
                stream_id,
                descriptor,
                time_base_id,
                self.config.msb_pts_shift,
            ));
        }

        let main = MainHeader::new(descriptors.len(), time_bases, self.config.max_distance);
        self.write_headers(main, headers, infos)
    }

    pub fn write_headers(
        &mut self,
        main: MainHeader,
        streams: Vec<StreamHeader>,
        infos: &[Info],
    ) -> Result<()> {
        self.check_state(WriterState::Configuring)?;
        let result = self.write_headers_inner(main, streams, infos);
        self.state = match result {
            Ok(()) => WriterState::Streaming,
            Err(_) => WriterState::Finalized,
        };
        result
    }

    fn write_headers_inner(
        &mut self,
        main: MainHeader,
        streams: Vec<StreamHeader>,
        infos: &[Info],
    ) -> Result<()> {
        main.validate()?;
        if streams.len() != main.stream_count {
            return Err(NutError::malformed(format!(
                "{} stream headers for {} streams",
                streams.len(),
                main.stream_count
            )));
        }
        for (i, header) in streams.iter().enumerate() {
            if header.stream_id != i {
                return Err(NutError::malformed(format!(
                    "stream header {} at position {i}",
                    header.stream_id
                )));
            }
            header.validate(&main)?;
        }

        let time_base_count = main.time_bases.len();
        self.out.write_bytes(FILE_ID_STRING)?;
        let body = build_body(|out| main.write(out))?;
        write_packet(&mut self.out, MAIN_STARTCODE, &body)?;
        for header in &streams {
            let body = build_body(|out| header.write(out, &main))?;
            write_packet(&mut self.out, STREAM_STARTCODE, &body)?;
        }
        for info in infos {
            let body = build_body(|out| info.write(out, time_base_count))?;
            write_packet(&mut self.out, INFO_STARTCODE, &body)?;
        }
        debug!(
            "Wrote headers: {} streams, {} time bases, {} info packets, {} bytes",
            main.stream_count,
            time_base_count,
            infos.len(),
            self.out.position()
        );

        self.streams = streams
            .iter()
            .map(|h| {
                Ok(StreamState {
                    time_base: main.time_base(h.time_base_id)?,
                    time_base_id: h.time_base_id,
                    last_pts: 0,
                    last_input_pts: None,
                    msb_pts_shift: h.msb_pts_shift,
                    max_pts_distance: h.max_pts_distance,
                })
            })
            .collect::<Result<_>>()?;
        self.reorder = ReorderBuffer::new(main.stream_count, self.config.reorder_window_ms);
        self.index.keyframes = vec![Vec::new(); main.stream_count];
        self.main_header = Some(main);

        Ok(())
    }

    /// Queues a frame and writes every frame that is ready.
    pub fn write_frame(&mut self, frame: NutFrame) -> Result<()> {
        self.check_state(WriterState::Streaming)?;
        let result = self.write_frame_inner(frame);
        if result.is_err() {
            self.state = WriterState::Finalized;
        }
        result
    }

    fn write_frame_inner(&mut self, mut frame: NutFrame) -> Result<()> {
        let stream_count = self.streams.len();
        let stream = self.streams.get_mut(frame.stream_id).ok_or_else(|| {
            NutError::malformed(format!(
                "frame for stream {} of {stream_count}",
                frame.stream_id
            ))
        })?;
        if frame.pts < 0 {
            return Err(NutError::malformed(format!(
                "negative pts {} on stream {}",
                frame.pts, frame.stream_id
            )));
        }

        if frame.eor {
            if !frame.is_empty() || frame.has_sm_data() {
                return Err(NutError::malformed("end of record frame with payload"));
            }
            frame.keyframe = true;
        }
        // An end of record may repeat the last pts, never precede it.
        if let Some(last) = stream.last_input_pts {
            if frame.pts < last {
                return Err(NutError::OutOfOrderTimestamp {
                    stream: frame.stream_id,
                    last,
                    pts: frame.pts,
                });
            }
        }
        stream.last_input_pts = Some(frame.pts);

        let time_base = stream.time_base;
        self.reorder.push(frame, time_base)?;
        while let Some(frame) = self.reorder.pop_ready() {
            self.emit(frame)?;
        }

        Ok(())
    }

    fn write_syncpoint(&mut self, stream_id: usize, pts: i64) -> Result<()> {
        let Some(main) = self.main_header.as_ref() else {
            return Err(NutError::InvalidState("awaiting headers"));
        };
        let stream = self.streams[stream_id];
        let position = self.out.position();

        let syncpoint = Syncpoint {
            global_key_pts: GlobalTimestamp {
                time_base_id: stream.time_base_id,
                pts: pts as u64,
            },
            back_ptr_div16: self.last_syncpoint.map_or(0, |last| (position - last) / 16),
        };
        let body = build_body(|out| syncpoint.write(out, main.time_bases.len()))?;
        write_packet(&mut self.out, SYNCPOINT_STARTCODE, &body)?;

        for state in &mut self.streams {
            state.last_pts = convert(pts, stream.time_base, state.time_base)?;
        }
        trace!("Syncpoint at {position}: pts {pts} of stream {stream_id}");

        self.index.add_syncpoint(position);
        self.last_syncpoint = Some(position);
        self.frames_since_syncpoint = 0;
        self.syncpoints_written += 1;
        Ok(())
    }

    fn emit(&mut self, frame: NutFrame) -> Result<()> {
        let Some(main) = self.main_header.as_ref() else {
            return Err(NutError::InvalidState("awaiting headers"));
        };
        let max_distance = main.max_distance;

        let sm_data = if frame.has_sm_data() {
            build_body(|out| write_sm_data(out, &frame, main.time_bases.len()))?
        } else {
            Vec::new()
        };
        let data_size = (sm_data.len() + frame.len()) as u64;

        let position = self.out.position();
        let needs_syncpoint = match self.last_syncpoint {
            None => true,
            Some(last) => {
                self.frames_since_syncpoint > 0
                    && position + FRAME_HEADER_ESTIMATE + data_size - last > max_distance
            }
        };
        if needs_syncpoint {
            self.write_syncpoint(frame.stream_id, frame.pts)?;
        }

        let Some(main) = self.main_header.as_ref() else {
            return Err(NutError::InvalidState("awaiting headers"));
        };
        let stream = &mut self.streams[frame.stream_id];

        let mut flags = 0;
        if frame.keyframe || frame.eor {
            flags |= FLAG_KEY;
        }
        if frame.eor {
            flags |= FLAG_EOR;
        }
        if !sm_data.is_empty() {
            flags |= FLAG_SM_DATA;
        }
        if data_size > 2 * max_distance || frame.pts.abs_diff(stream.last_pts) > stream.max_pts_distance
        {
            flags |= FLAG_CHECKSUM;
        }

        let request = FrameRequest {
            stream_id: frame.stream_id,
            pts_delta: frame
                .pts
                .checked_sub(stream.last_pts)
                .ok_or(NutError::ArithmeticOverflow)?,
            coded_pts: encode_coded_pts(frame.pts, stream.last_pts, stream.msb_pts_shift),
            data_size,
            flags,
        };
        let selection = main.frame_codes.select(&request).ok_or_else(|| {
            NutError::malformed(format!("no frame code can express {request:?}"))
        })?;

        main.frame_codes.write_header(&mut self.out, &selection, &request)?;
        self.out.write_bytes(&sm_data)?;
        self.out.write_bytes(&frame.data)?;
        stream.last_pts = frame.pts;
        trace!(
            "Frame code {:#04X}: stream {}, pts {}, {data_size} bytes",
            selection.code, frame.stream_id, frame.pts
        );

        let time = MediaTime::new(frame.pts, stream.time_base);
        let global = GlobalTimestamp {
            time_base_id: stream.time_base_id,
            pts: frame.pts as u64,
        };
        self.index.add_frame(&frame, time, global);
        self.frames_since_syncpoint += 1;
        self.frames_written += 1;

        Ok(())
    }

    /// Writes all buffered frames and the index, then flushes the sink.
    pub fn write_footer(&mut self) -> Result<()> {
        self.check_state(WriterState::Streaming)?;
        let result = self.write_footer_inner();
        self.state = WriterState::Finalized;
        result
    }

    fn write_footer_inner(&mut self) -> Result<()> {
        while let Some(frame) = self.reorder.pop() {
            self.emit(frame)?;
        }

        if self.config.write_index {
            let time_base_count = self
                .main_header
                .as_ref()
                .map_or(0, |main| main.time_bases.len());
            let index = std::mem::take(&mut self.index).build();
            let body = index.serialize(time_base_count)?;
            write_packet(&mut self.out, INDEX_STARTCODE, &body)?;
            debug!(
                "Wrote index: {} syncpoints, {} bytes",
                index.syncpoints.len(),
                body.len()
            );
        }

        self.out.flush()?;
        debug!(
            "Finalized after {} frames, {} syncpoints, {} bytes",
            self.frames_written,
            self.syncpoints_written,
            self.out.position()
        );
        Ok(())
    }
}
