use std::io::BufRead;
use std::sync::Arc;

use log::Level::Warn;
use log::{debug, trace, warn};

use crate::log_or_err;
use crate::structs::frame::{NutFrame, read_sm_data};
use crate::structs::frame_code::{FLAG_CHECKSUM, FLAG_EOR, FLAG_KEY, FLAG_SM_DATA, HeaderPts, decode_coded_pts};
use crate::structs::index::Index;
use crate::structs::info::Info;
use crate::structs::main_header::MainHeader;
use crate::structs::packet::{parse_body, read_packet_body, startcode_crc};
use crate::structs::startcode::{INFO_STARTCODE, MAIN_STARTCODE, STARTCODE_PREFIX, Structure};
use crate::structs::stream_header::{StreamDescriptor, StreamHeader};
use crate::structs::syncpoint::Syncpoint;
use crate::utils::bytestream_io::NutInput;
use crate::utils::errors::{NutError, Result};
use crate::utils::rational::Rational;
use crate::utils::timing::convert;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    AwaitingMainHeader,
    AwaitingStreamHeaders,
    Steady,
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct StreamState {
    time_base: Rational,
    last_pts: i64,
    msb_pts_shift: u32,
    max_pts_distance: u64,
}

/// Pull based NUT demuxer.
///
/// Headers are parsed on first use. Damaged spans are skipped by scanning
/// for the next startcode; frames between the damage and the next syncpoint
/// are dropped since their timestamps cannot be trusted.
///
/// # Example
///
/// ```rust,no_run
/// use std::fs::File;
/// use std::io::BufReader;
/// use nut::process::read::NutReader;
///
/// let mut reader = NutReader::new(BufReader::new(File::open("input.nut")?));
/// for frame in &mut reader {
///     let frame = frame?;
///     println!("stream {} pts {} ({} bytes)", frame.stream_id, frame.pts, frame.len());
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct NutReader<R> {
    input: NutInput<R>,
    state: ReaderState,
    pub fail_level: log::Level,
    main_header: Option<MainHeader>,
    stream_headers: Vec<StreamHeader>,
    streams: Vec<StreamState>,
    infos: Vec<Info>,
    index: Option<Index>,
    pending_startcode: Option<u64>,
    synced: bool,
    resync_count: usize,
    dropped_frames: usize,
    frames_read: u64,
    syncpoints_read: u64,
}

impl<R: BufRead> NutReader<R> {
    pub fn new(src: R) -> Self {
        Self {
            input: NutInput::new(src),
            state: ReaderState::AwaitingMainHeader,
            fail_level: log::Level::Error,
            main_header: None,
            stream_headers: Vec::new(),
            streams: Vec::new(),
            infos: Vec::new(),
            index: None,
            pending_startcode: None,
            synced: true,
            resync_count: 0,
            dropped_frames: 0,
            frames_read: 0,
            syncpoints_read: 0,
        }
    }

    /// With `log::Level::Warn` corruption is returned instead of skipped.
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.fail_level = level;
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn main_header(&self) -> Option<&MainHeader> {
        self.main_header.as_ref()
    }

    pub fn stream_headers(&self) -> &[StreamHeader] {
        &self.stream_headers
    }

    pub fn stream_descriptors(&self) -> Result<Vec<StreamDescriptor>> {
        let main = self
            .main_header
            .as_ref()
            .ok_or(NutError::InvalidState("awaiting headers"))?;
        self.stream_headers
            .iter()
            .map(|h| h.descriptor(main))
            .collect()
    }

    pub fn time_base(&self, stream_id: usize) -> Option<Rational> {
        self.streams.get(stream_id).map(|s| s.time_base)
    }

    /// Info packets seen so far.
    pub fn infos(&self) -> &[Info] {
        &self.infos
    }

    /// The index, once the reader has passed it.
    pub fn index(&self) -> Option<&Index> {
        self.index.as_ref()
    }

    /// Bytes consumed from the source.
    pub fn position(&self) -> u64 {
        self.input.position()
    }

    pub fn resync_count(&self) -> usize {
        self.resync_count
    }

    pub fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn syncpoints_read(&self) -> u64 {
        self.syncpoints_read
    }

    pub fn into_inner(self) -> R {
        self.input.into_inner()
    }

    /// Parses the main header and all stream headers if not done already.
    pub fn read_headers(&mut self) -> Result<()> {
        let result = self.read_headers_inner();
        if result.is_err() {
            self.state = ReaderState::Closed;
        }
        result
    }

    fn read_headers_inner(&mut self) -> Result<()> {
        if self.state == ReaderState::AwaitingMainHeader {
            self.read_main_header()?;
            self.state = ReaderState::AwaitingStreamHeaders;
        }
        if self.state == ReaderState::AwaitingStreamHeaders {
            self.read_stream_headers()?;
            self.read_header_infos()?;
            self.state = ReaderState::Steady;
        }
        Ok(())
    }

    fn read_main_header(&mut self) -> Result<()> {
        // Skips the file id string and anything else before the main header.
        let mut window = 0u64;
        while window != MAIN_STARTCODE {
            window = (window << 8) | u64::from(self.input.read_u8()?);
        }
        self.input.set_crc(startcode_crc(MAIN_STARTCODE));

        let body = read_packet_body(&mut self.input)?;
        let main = parse_body(&body, "main header", |input| MainHeader::read(input))?;
        debug!(
            "Main header: version {}, {} streams, max distance {}, time bases {:?}",
            main.version, main.stream_count, main.max_distance, main.time_bases
        );

        self.main_header = Some(main);
        Ok(())
    }

    fn read_stream_headers(&mut self) -> Result<()> {
        let Some(main) = self.main_header.as_ref() else {
            return Err(NutError::InvalidState("awaiting main header"));
        };

        while self.stream_headers.len() < main.stream_count {
            self.input.reset_crc();
            let startcode = self.input.read_u64()?;
            let structure = Structure::from_startcode(startcode).ok_or_else(|| {
                NutError::malformed(format!("unexpected startcode {startcode:#018X} in headers"))
            })?;
            let body = read_packet_body(&mut self.input)?;

            match structure {
                Structure::StreamHeader => {
                    let header = parse_body(&body, "stream header", |input| {
                        StreamHeader::read(input, main)
                    })?;
                    if header.stream_id != self.stream_headers.len() {
                        return Err(NutError::malformed(format!(
                            "stream header {} out of order, expected {}",
                            header.stream_id,
                            self.stream_headers.len()
                        )));
                    }
                    debug!(
                        "Stream {}: {}, fourcc {:?}, time base {}",
                        header.stream_id,
                        header.kind,
                        String::from_utf8_lossy(&header.fourcc),
                        main.time_base(header.time_base_id)?
                    );

                    self.streams.push(StreamState {
                        time_base: main.time_base(header.time_base_id)?,
                        last_pts: 0,
                        msb_pts_shift: header.msb_pts_shift,
                        max_pts_distance: header.max_pts_distance,
                    });
                    self.stream_headers.push(header);
                }
                Structure::Info => {
                    let info = parse_body(&body, "info packet", |input| {
                        Info::read(input, main.stream_count, main.time_bases.len())
                    })?;
                    self.infos.push(info);
                }
                Structure::MainHeader => {
                    trace!("Skipping repeated main header");
                }
                other => {
                    return Err(NutError::malformed(format!(
                        "{} before all stream headers",
                        other.name()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Collects the info packets directly following the stream headers.
    /// Anything else, damaged info packets included, is handed back to the
    /// input for the frame reader.
    fn read_header_infos(&mut self) -> Result<()> {
        while self.input.check_next_byte()? == Some(STARTCODE_PREFIX) {
            self.input.start_journal();
            match self.read_header_info() {
                Ok(Some(info)) => {
                    self.input.stop_journal();
                    self.infos.push(info);
                }
                Ok(None) => break,
                Err(err) if err.is_recoverable() => {
                    debug!("Leaving damaged info packet to the frame reader: {err}");
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        let unused = self.input.take_journal();
        self.input.unread(&unused);
        Ok(())
    }

    fn read_header_info(&mut self) -> Result<Option<Info>> {
        self.input.reset_crc();
        if self.input.read_u64()? != INFO_STARTCODE {
            return Ok(None);
        }
        let body = read_packet_body(&mut self.input)?;
        let Some(main) = self.main_header.as_ref() else {
            return Err(NutError::InvalidState("awaiting main header"));
        };
        let info = parse_body(&body, "info packet", |input| {
            Info::read(input, main.stream_count, main.time_bases.len())
        })?;
        Ok(Some(info))
    }

    /// Next frame, or `None` once the input is exhausted.
    pub fn read_frame(&mut self) -> Result<Option<NutFrame>> {
        match self.state {
            ReaderState::Closed => return Ok(None),
            ReaderState::AwaitingMainHeader | ReaderState::AwaitingStreamHeaders => {
                self.read_headers()?
            }
            ReaderState::Steady => {}
        }

        let result = self.read_frame_inner();
        match &result {
            Ok(Some(_)) => self.frames_read += 1,
            Ok(None) | Err(_) => self.state = ReaderState::Closed,
        }
        result
    }

    fn read_frame_inner(&mut self) -> Result<Option<NutFrame>> {
        loop {
            match self.next_frame() {
                Ok(Some(frame)) if !self.synced => {
                    trace!(
                        "Dropping stream {} frame before the next syncpoint",
                        frame.stream_id
                    );
                    self.dropped_frames += 1;
                }
                Ok(result) => return Ok(result),
                Err(err) if err.is_recoverable() => {
                    log_or_err!(self, Warn, err);
                    self.resync(err)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn next_frame(&mut self) -> Result<Option<NutFrame>> {
        loop {
            // Kept until the payload so a failed element can be scanned again.
            self.input.start_journal();
            let startcode = match self.pending_startcode.take() {
                Some(startcode) => startcode,
                None => match self.input.check_next_byte()? {
                    None => return Ok(None),
                    Some(STARTCODE_PREFIX) => {
                        self.input.reset_crc();
                        self.input.read_u64()?
                    }
                    Some(_) => return self.read_frame_data().map(Some),
                },
            };
            self.read_structure(startcode)?;
        }
    }

    fn read_structure(&mut self, startcode: u64) -> Result<()> {
        let position = self.input.position() - 8;
        let structure = Structure::from_startcode(startcode).ok_or_else(|| {
            NutError::malformed(format!("unknown startcode {startcode:#018X}"))
        })?;
        let body = read_packet_body(&mut self.input)?;
        let Some(main) = self.main_header.as_ref() else {
            return Err(NutError::InvalidState("awaiting main header"));
        };
        let time_base_count = main.time_bases.len();

        match structure {
            Structure::Syncpoint => {
                let syncpoint = parse_body(&body, "syncpoint", |input| {
                    Syncpoint::read(input, time_base_count)
                })?;
                let key = syncpoint.global_key_pts;
                let key_pts = i64::try_from(key.pts).map_err(|_| NutError::ArithmeticOverflow)?;
                let key_time_base = main.time_base(key.time_base_id)?;
                for stream in &mut self.streams {
                    stream.last_pts = convert(key_pts, key_time_base, stream.time_base)?;
                }

                trace!(
                    "Syncpoint at {position}: key pts {key_pts} @ {key_time_base}, back {}",
                    syncpoint.back_ptr_div16
                );
                self.synced = true;
                self.syncpoints_read += 1;
            }
            Structure::Info => {
                let info = parse_body(&body, "info packet", |input| {
                    Info::read(input, main.stream_count, time_base_count)
                })?;
                debug!("Info packet at {position} with {} items", info.items.len());
                self.infos.push(info);
            }
            Structure::Index => {
                let index = Index::parse(&body, main.stream_count, time_base_count)?;
                debug!("Index at {position} with {} syncpoints", index.syncpoints.len());
                self.index = Some(index);
            }
            Structure::MainHeader => {
                let repeated =
                    parse_body(&body, "main header", |input| MainHeader::read(input))?;
                if &repeated != main {
                    warn!("Repeated main header at {position} differs, ignoring it");
                }
            }
            Structure::StreamHeader => {
                let repeated = parse_body(&body, "stream header", |input| {
                    StreamHeader::read(input, main)
                })?;
                if self.stream_headers.get(repeated.stream_id) != Some(&repeated) {
                    warn!(
                        "Repeated stream header {} at {position} differs, ignoring it",
                        repeated.stream_id
                    );
                }
            }
            Structure::Frame(_) => {
                return Err(NutError::malformed("frame code in place of a startcode"));
            }
        }

        Ok(())
    }

    fn read_frame_data(&mut self) -> Result<NutFrame> {
        let Some(main) = self.main_header.as_ref() else {
            return Err(NutError::InvalidState("awaiting main header"));
        };

        let header = main.frame_codes.read_header(&mut self.input)?;
        let stream = self.streams.get_mut(header.stream_id).ok_or_else(|| {
            NutError::malformed(format!(
                "frame for stream {} of {}",
                header.stream_id, main.stream_count
            ))
        })?;

        let pts = match header.pts {
            HeaderPts::Delta(delta) => stream
                .last_pts
                .checked_add(delta)
                .ok_or_else(|| NutError::malformed("pts delta overflows"))?,
            HeaderPts::Coded(coded) => decode_coded_pts(coded, stream.last_pts, stream.msb_pts_shift)?,
        };

        if header.flags & FLAG_CHECKSUM == 0
            && (header.data_size > 2 * main.max_distance
                || pts.abs_diff(stream.last_pts) > stream.max_pts_distance)
        {
            return Err(NutError::malformed(format!(
                "frame of {} bytes at pts {pts} lacks a checksum",
                header.data_size
            )));
        }

        let elision = main.elision_header(header.header_idx).ok_or_else(|| {
            NutError::malformed(format!("elision header {} missing", header.header_idx))
        })?;

        let start = self.input.position();
        let (side_data, meta_data) = if header.flags & FLAG_SM_DATA != 0 {
            read_sm_data(&mut self.input, main.time_bases.len())?
        } else {
            (Vec::new(), Vec::new())
        };
        let sm_len = self.input.position() - start;
        let payload_len = header.data_size.checked_sub(sm_len).ok_or_else(|| {
            NutError::malformed("side data larger than the frame")
        })?;

        self.input.stop_journal();
        let payload = self.input.read_bytes(payload_len)?;
        let data: Arc<[u8]> = if elision.is_empty() {
            payload.into()
        } else {
            [elision, &payload[..]].concat().into()
        };

        stream.last_pts = pts;
        trace!(
            "Frame code {:#04X}: stream {}, pts {pts}, {} bytes",
            header.code,
            header.stream_id,
            data.len()
        );

        Ok(NutFrame {
            stream_id: header.stream_id,
            pts,
            data,
            side_data,
            meta_data,
            keyframe: header.flags & FLAG_KEY != 0,
            eor: header.flags & FLAG_EOR != 0,
        })
    }

    /// Scans for the next startcode, starting one byte into the element that
    /// failed. Running out of input first returns `original`, the error that
    /// caused the resync.
    fn resync(&mut self, original: NutError) -> Result<()> {
        let consumed = self.input.take_journal();
        if let Some(rest) = consumed.get(1..) {
            self.input.unread(rest);
        }
        let start = self.input.position();
        let mut window = 0u64;

        loop {
            let byte = match self.input.read_u8() {
                Ok(byte) => byte,
                Err(NutError::EndOfData) => return Err(original),
                Err(err) => return Err(err),
            };
            window = (window << 8) | u64::from(byte);

            if Structure::from_startcode(window).is_some() {
                self.input.set_crc(startcode_crc(window));
                self.pending_startcode = Some(window);
                self.synced = false;
                self.resync_count += 1;
                warn!(
                    "Resynchronised after skipping {} bytes",
                    self.input.position() - start - 8
                );
                return Ok(());
            }
        }
    }
}

impl<R: BufRead> Iterator for NutReader<R> {
    type Item = Result<NutFrame, NutError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == ReaderState::Closed {
            return None;
        }
        self.read_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::write::{NutWriter, WriterConfig};
    use crate::structs::info::{DataItem, DataValue};
    use crate::structs::startcode::SYNCPOINT_STARTCODE;
    use crate::utils::timing::MediaTime;
    use std::io::Cursor;

    struct Lcg(u32);

    impl Lcg {
        fn next(&mut self) -> u32 {
            self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12345);
            self.0 >> 8
        }
    }

    fn descriptors() -> Vec<StreamDescriptor> {
        vec![
            StreamDescriptor::video(b"FFV1", Rational::new(1, 25), 320, 240),
            StreamDescriptor::audio(b"PCM ", 48000, 2),
            StreamDescriptor {
                kind: crate::structs::stream_header::StreamKind::Subtitle,
                fourcc: b"UTF8".to_vec(),
                time_base: Rational::MILLISECOND,
                decode_delay: 0,
                codec_specific_data: b"charset=utf-8".to_vec(),
            },
        ]
    }

    /// Frames of all streams in presentation order.
    fn random_frames(count: usize, seed: u32) -> Vec<NutFrame> {
        let mut rng = Lcg(seed);
        let steps = [1i64, 960, 100];
        let mut next_pts = [0i64; 3];
        let mut frames = Vec::new();

        for _ in 0..count {
            let stream_id = (rng.next() % 3) as usize;
            let pts = next_pts[stream_id];
            next_pts[stream_id] += steps[stream_id];

            let len = (rng.next() % 4097) as usize;
            let data: Vec<u8> = (0..len).map(|_| rng.next() as u8).collect();
            let mut frame = NutFrame::new(stream_id, pts, data);
            frame.keyframe = rng.next() % 4 == 0;
            if rng.next() % 8 == 0 {
                frame = frame.with_side_data(vec![DataItem::binary(
                    "Palette",
                    "bin",
                    vec![stream_id as u8; 12],
                )]);
            }
            if rng.next() % 16 == 0 {
                frame = frame.with_meta_data(vec![DataItem::new(
                    "Frame",
                    DataValue::Integer(pts),
                )]);
            }
            frames.push(frame);
        }

        let tbs: Vec<_> = descriptors().iter().map(|d| d.time_base).collect();
        frames.sort_by(|a, b| {
            MediaTime::new(a.pts, tbs[a.stream_id]).cmp(&MediaTime::new(b.pts, tbs[b.stream_id]))
        });
        frames
    }

    fn mux(frames: &[NutFrame], infos: &[Info]) -> Result<Vec<u8>> {
        let config = WriterConfig {
            max_distance: 8192,
            ..Default::default()
        };
        let mut writer = NutWriter::new(Vec::new(), config);
        writer.write_streams(&descriptors(), infos)?;
        for frame in frames {
            writer.write_frame(frame.clone())?;
        }
        writer.write_footer()?;
        Ok(writer.into_inner())
    }

    fn nth_syncpoint(bytes: &[u8], n: usize) -> usize {
        let startcode = SYNCPOINT_STARTCODE.to_be_bytes();
        bytes
            .windows(8)
            .enumerate()
            .filter(|(_, w)| *w == startcode)
            .nth(n)
            .map(|(i, _)| i)
            .unwrap()
    }

    fn per_stream(frames: &[NutFrame], stream_id: usize) -> Vec<&NutFrame> {
        frames.iter().filter(|f| f.stream_id == stream_id).collect()
    }

    #[test]
    fn round_trip() -> Result<()> {
        let frames = random_frames(400, 7);
        let infos = [
            Info::global(vec![DataItem::string("Title", "Round trip")]),
            Info {
                stream_id: Some(1),
                items: vec![DataItem::string("Language", "eng")],
                ..Default::default()
            },
        ];
        let bytes = mux(&frames, &infos)?;

        let mut reader = NutReader::new(Cursor::new(bytes));
        reader.read_headers()?;
        assert_eq!(reader.state(), ReaderState::Steady);
        assert_eq!(reader.stream_descriptors()?, descriptors());
        assert_eq!(reader.infos(), infos);

        let read = reader.by_ref().collect::<Result<Vec<_>>>()?;
        assert_eq!(read.len(), frames.len());
        for stream_id in 0..3 {
            assert_eq!(per_stream(&read, stream_id), per_stream(&frames, stream_id));
        }
        assert_eq!(reader.resync_count(), 0);
        assert_eq!(reader.state(), ReaderState::Closed);
        assert!(reader.index().is_some());
        assert_eq!(reader.infos(), infos);
        Ok(())
    }

    #[test]
    fn output_is_time_ordered() -> Result<()> {
        let bytes = mux(&random_frames(300, 99), &[])?;
        let mut reader = NutReader::new(Cursor::new(bytes));

        let mut last: Option<MediaTime> = None;
        while let Some(frame) = reader.read_frame()? {
            let time = MediaTime::new(frame.pts, reader.time_base(frame.stream_id).unwrap());
            assert!(last.is_none_or(|l| l <= time));
            last = Some(time);
        }
        Ok(())
    }

    #[test]
    fn empty_container() -> Result<()> {
        let bytes = mux(&[], &[])?;
        let mut reader = NutReader::new(Cursor::new(bytes));

        assert!(reader.read_frame()?.is_none());
        assert_eq!(reader.stream_headers().len(), 3);
        assert_eq!(reader.state(), ReaderState::Closed);
        assert!(reader.next().is_none());
        Ok(())
    }

    #[test]
    fn missing_main_header_is_end_of_data() {
        let mut reader = NutReader::new(Cursor::new(b"not a nut file".to_vec()));
        assert!(matches!(reader.read_frame(), Err(NutError::EndOfData)));
        assert!(reader.next().is_none());
    }

    #[test]
    fn header_corruption_is_surfaced() -> Result<()> {
        let mut bytes = mux(&random_frames(10, 1), &[])?;
        bytes[FILE_ID_STRING_LEN + 12] ^= 0x10;

        let mut reader = NutReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.read_headers(),
            Err(NutError::CrcMismatch { .. })
        ));
        assert_eq!(reader.state(), ReaderState::Closed);
        Ok(())
    }

    const FILE_ID_STRING_LEN: usize = crate::structs::startcode::FILE_ID_STRING.len();

    #[test]
    fn resyncs_over_garbage() -> Result<()> {
        let frames = random_frames(200, 3);
        let mut bytes = mux(&frames, &[])?;
        let at = nth_syncpoint(&bytes, 3);
        bytes.splice(at..at, [0xFF; 64]);

        let mut reader = NutReader::new(Cursor::new(bytes));
        let read = reader.by_ref().collect::<Result<Vec<_>>>()?;

        assert_eq!(reader.resync_count(), 1);
        assert_eq!(reader.dropped_frames(), 0);
        for stream_id in 0..3 {
            assert_eq!(per_stream(&read, stream_id), per_stream(&frames, stream_id));
        }
        Ok(())
    }

    #[test]
    fn startcode_split_by_damage_is_found() -> Result<()> {
        let frames = random_frames(200, 17);
        let mut bytes = mux(&frames, &[])?;
        let at = nth_syncpoint(&bytes, 3);
        // Read as one unknown startcode overlapping the syncpoint.
        bytes.splice(at..at, [STARTCODE_PREFIX, 0x00, 0x00]);

        let mut reader = NutReader::new(Cursor::new(bytes));
        let read = reader.by_ref().collect::<Result<Vec<_>>>()?;

        assert_eq!(reader.resync_count(), 1);
        assert_eq!(reader.dropped_frames(), 0);
        for stream_id in 0..3 {
            assert_eq!(per_stream(&read, stream_id), per_stream(&frames, stream_id));
        }
        Ok(())
    }

    #[test]
    fn recovers_after_overwritten_span() -> Result<()> {
        let frames: Vec<_> = (0..200u8)
            .map(|i| NutFrame::key(0, i64::from(i), vec![i; 24]))
            .collect();
        let config = WriterConfig {
            max_distance: 256,
            ..Default::default()
        };
        let mut writer = NutWriter::new(Vec::new(), config);
        writer.write_streams(
            &[StreamDescriptor::video(b"FFV1", Rational::new(1, 25), 16, 16)],
            &[],
        )?;
        for frame in &frames {
            writer.write_frame(frame.clone())?;
        }
        writer.write_footer()?;
        let mut bytes = writer.into_inner();

        let at = nth_syncpoint(&bytes, 12);
        let behind: Vec<_> = frames
            .iter()
            .filter(|f| bytes[at..].windows(24).any(|w| w == &f.data[..]))
            .collect();
        assert!(behind.len() > 20);

        let mut rng = Lcg(23);
        for byte in &mut bytes[at - 300..at] {
            *byte = match rng.next() % 8 {
                0 => STARTCODE_PREFIX,
                _ => rng.next() as u8,
            };
        }
        bytes[at - 1] = STARTCODE_PREFIX;

        let mut reader = NutReader::new(Cursor::new(bytes));
        let read = reader.by_ref().collect::<Result<Vec<_>>>()?;

        assert!(reader.resync_count() >= 1);
        for frame in behind {
            assert!(read.contains(frame), "frame {} lost", frame.pts);
        }
        Ok(())
    }

    #[test]
    fn drops_frames_until_next_syncpoint() -> Result<()> {
        let frames = random_frames(200, 5);
        let mut bytes = mux(&frames, &[])?;
        // Damage the end of the third syncpoint and the frame header after it.
        let frame_start = nth_syncpoint(&bytes, 2) + 8 + 1 + 8;
        bytes[frame_start..frame_start + 4].fill(0xFF);

        let mut reader = NutReader::new(Cursor::new(bytes));
        let read = reader.by_ref().collect::<Result<Vec<_>>>()?;

        assert!(reader.resync_count() >= 1);
        assert!(read.len() < frames.len());
        for frame in &read {
            assert!(frames.contains(frame), "frame {} of stream {} altered", frame.pts, frame.stream_id);
        }
        Ok(())
    }

    #[test]
    fn strict_mode_returns_corruption() -> Result<()> {
        let mut bytes = mux(&random_frames(100, 11), &[])?;
        let at = nth_syncpoint(&bytes, 1);
        bytes.splice(at..at, [0xFF; 64]);

        let mut reader = NutReader::new(Cursor::new(bytes));
        reader.set_fail_level(log::Level::Warn);
        let result = reader.by_ref().collect::<Result<Vec<_>>>();

        assert!(matches!(result, Err(NutError::MalformedEncoding(_))));
        assert_eq!(reader.resync_count(), 0);
        assert!(reader.next().is_none());
        Ok(())
    }

    #[test]
    fn damaged_syncpoint_is_skipped() -> Result<()> {
        let frames = random_frames(200, 13);
        let mut bytes = mux(&frames, &[])?;
        let at = nth_syncpoint(&bytes, 2);
        bytes[at + 10] ^= 0x01;

        let mut reader = NutReader::new(Cursor::new(bytes.clone()));
        let read = reader.by_ref().collect::<Result<Vec<_>>>()?;
        assert_eq!(reader.resync_count(), 1);
        assert!(read.iter().all(|f| frames.contains(f)));

        let mut strict = NutReader::new(Cursor::new(bytes));
        strict.set_fail_level(log::Level::Warn);
        let result = strict.by_ref().collect::<Result<Vec<_>>>();
        assert!(matches!(result, Err(NutError::CrcMismatch { .. })));
        Ok(())
    }

    #[test]
    fn truncation_ends_with_end_of_data() -> Result<()> {
        let frames: Vec<_> = (0..20).map(|i| NutFrame::key(0, i, vec![i as u8; 1000])).collect();
        let bytes = mux(&frames, &[])?;
        let cut = nth_syncpoint(&bytes, 1) + 40;

        let reader = NutReader::new(Cursor::new(bytes[..cut].to_vec()));
        let results: Vec<_> = reader.collect();
        assert!(matches!(results.last(), Some(Err(NutError::EndOfData))));
        Ok(())
    }
}
