//! Stream header packets and stream descriptions.
//!
//! ```text
//! stream_id            v
//! stream_class         v   (0 video, 1 audio, 2 subtitles, 3 userdata)
//! fourcc               vb
//! time_base_id         v
//! msb_pts_shift        v
//! max_pts_distance     v
//! decode_delay         v
//! stream_flags         v
//! codec_specific_data  vb
//! video: width, height, sample_width, sample_height, colorspace_type (all v)
//! audio: samplerate_num, samplerate_denom, channel_count (all v)
//! ```

use std::fmt::{Display, Formatter};
use std::io::{BufRead, Write};

use log::trace;

use crate::structs::main_header::MainHeader;
use crate::utils::bytestream_io::{NutInput, NutOutput};
use crate::utils::errors::{NutError, Result};
use crate::utils::rational::Rational;

pub const DEFAULT_MSB_PTS_SHIFT: u32 = 7;
pub const MAX_MSB_PTS_SHIFT: u32 = 62;
pub const STREAM_FLAG_FIXED_FPS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoParams {
    pub width: u64,
    pub height: u64,
    /// Pixel aspect ratio numerator, 0 if unknown.
    pub sample_width: u64,
    pub sample_height: u64,
    pub colorspace_type: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: Rational,
    pub channel_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video(VideoParams),
    Audio(AudioParams),
    Subtitle,
    UserData,
}

impl StreamKind {
    pub fn class(&self) -> u64 {
        match self {
            Self::Video(_) => 0,
            Self::Audio(_) => 1,
            Self::Subtitle => 2,
            Self::UserData => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Video(_) => "video",
            Self::Audio(_) => "audio",
            Self::Subtitle => "subtitle",
            Self::UserData => "userdata",
        }
    }
}

impl Display for StreamKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video(v) => write!(f, "video {}x{}", v.width, v.height),
            Self::Audio(a) => write!(
                f,
                "audio {} Hz, {} channels",
                a.sample_rate, a.channel_count
            ),
            Self::Subtitle | Self::UserData => f.write_str(self.name()),
        }
    }
}

/// Everything a producer has to say about a stream. The writer derives the
/// stream header and the main header time bases from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub kind: StreamKind,
    pub fourcc: Vec<u8>,
    pub time_base: Rational,
    pub decode_delay: u64,
    pub codec_specific_data: Vec<u8>,
}

impl StreamDescriptor {
    pub fn video(fourcc: &[u8], time_base: Rational, width: u64, height: u64) -> Self {
        Self {
            kind: StreamKind::Video(VideoParams {
                width,
                height,
                ..Default::default()
            }),
            fourcc: fourcc.to_vec(),
            time_base,
            decode_delay: 0,
            codec_specific_data: Vec::new(),
        }
    }

    pub fn audio(fourcc: &[u8], sample_rate: u32, channel_count: u64) -> Self {
        let sample_rate = Rational::new(sample_rate as i64, 1);
        Self {
            kind: StreamKind::Audio(AudioParams {
                sample_rate,
                channel_count,
            }),
            fourcc: fourcc.to_vec(),
            time_base: sample_rate.recip().unwrap_or(Rational::MILLISECOND),
            decode_delay: 0,
            codec_specific_data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub stream_id: usize,
    pub kind: StreamKind,
    pub fourcc: Vec<u8>,
    pub time_base_id: usize,
    pub msb_pts_shift: u32,
    pub max_pts_distance: u64,
    pub decode_delay: u64,
    pub flags: u64,
    pub codec_specific_data: Vec<u8>,
}

impl StreamHeader {
    pub fn from_descriptor(
        stream_id: usize,
        descriptor: &StreamDescriptor,
        time_base_id: usize,
        msb_pts_shift: u32,
    ) -> Self {
        // About one second of ticks before a frame needs a checksum.
        let max_pts_distance = descriptor
            .time_base
            .recip()
            .map(|r| (r.num() / r.den()).max(1) as u64)
            .unwrap_or(1);

        Self {
            stream_id,
            kind: descriptor.kind,
            fourcc: descriptor.fourcc.clone(),
            time_base_id,
            msb_pts_shift,
            max_pts_distance,
            decode_delay: descriptor.decode_delay,
            flags: 0,
            codec_specific_data: descriptor.codec_specific_data.clone(),
        }
    }

    pub fn descriptor(&self, main: &MainHeader) -> Result<StreamDescriptor> {
        Ok(StreamDescriptor {
            kind: self.kind,
            fourcc: self.fourcc.clone(),
            time_base: main.time_base(self.time_base_id)?,
            decode_delay: self.decode_delay,
            codec_specific_data: self.codec_specific_data.clone(),
        })
    }

    pub fn validate(&self, main: &MainHeader) -> Result<()> {
        if self.stream_id >= main.stream_count {
            return Err(NutError::malformed(format!(
                "stream id {} of {}",
                self.stream_id, main.stream_count
            )));
        }
        main.time_base(self.time_base_id)?;
        if self.msb_pts_shift > MAX_MSB_PTS_SHIFT {
            return Err(NutError::malformed(format!(
                "msb pts shift {} too large",
                self.msb_pts_shift
            )));
        }

        match &self.kind {
            StreamKind::Video(v) => {
                if v.width == 0 || v.height == 0 {
                    return Err(NutError::malformed("video stream without dimensions"));
                }
                if (v.sample_width == 0) != (v.sample_height == 0) {
                    return Err(NutError::malformed("incomplete sample aspect ratio"));
                }
            }
            StreamKind::Audio(a) => {
                if !a.sample_rate.is_positive() {
                    return Err(NutError::malformed("audio stream without sample rate"));
                }
            }
            StreamKind::Subtitle | StreamKind::UserData => {}
        }

        Ok(())
    }

    pub fn read<R: BufRead>(input: &mut NutInput<R>, main: &MainHeader) -> Result<Self> {
        let stream_id = input.read_usize()?;
        let class = input.read_value()?;
        let fourcc = input.read_variable_bytes()?;
        let time_base_id = input.read_usize()?;
        let msb_pts_shift = u32::try_from(input.read_value()?).unwrap_or(u32::MAX);
        let max_pts_distance = input.read_value()?;
        let decode_delay = input.read_value()?;
        let flags = input.read_value()?;
        let codec_specific_data = input.read_variable_bytes()?;

        let kind = match class {
            0 => StreamKind::Video(VideoParams {
                width: input.read_value()?,
                height: input.read_value()?,
                sample_width: input.read_value()?,
                sample_height: input.read_value()?,
                colorspace_type: input.read_value()?,
            }),
            1 => {
                let num = input.read_value()?;
                let den = input.read_value()?;
                let sample_rate = i64::try_from(num)
                    .ok()
                    .zip(i64::try_from(den).ok())
                    .and_then(|(n, d)| Rational::try_new(n, d))
                    .ok_or_else(|| {
                        NutError::malformed(format!("invalid sample rate {num}/{den}"))
                    })?;
                StreamKind::Audio(AudioParams {
                    sample_rate,
                    channel_count: input.read_value()?,
                })
            }
            2 => StreamKind::Subtitle,
            3 => StreamKind::UserData,
            other => {
                return Err(NutError::malformed(format!("unknown stream class {other}")));
            }
        };

        let header = Self {
            stream_id,
            kind,
            fourcc,
            time_base_id,
            msb_pts_shift,
            max_pts_distance,
            decode_delay,
            flags,
            codec_specific_data,
        };
        header.validate(main)?;
        trace!("{header:?}");

        Ok(header)
    }

    pub fn write<W: Write>(&self, out: &mut NutOutput<W>, main: &MainHeader) -> Result<()> {
        self.validate(main)?;

        out.write_value(self.stream_id as u64)?;
        out.write_value(self.kind.class())?;
        out.write_variable_bytes(&self.fourcc)?;
        out.write_value(self.time_base_id as u64)?;
        out.write_value(u64::from(self.msb_pts_shift))?;
        out.write_value(self.max_pts_distance)?;
        out.write_value(self.decode_delay)?;
        out.write_value(self.flags)?;
        out.write_variable_bytes(&self.codec_specific_data)?;

        match &self.kind {
            StreamKind::Video(v) => {
                out.write_value(v.width)?;
                out.write_value(v.height)?;
                out.write_value(v.sample_width)?;
                out.write_value(v.sample_height)?;
                out.write_value(v.colorspace_type)?;
            }
            StreamKind::Audio(a) => {
                out.write_value(a.sample_rate.num() as u64)?;
                out.write_value(a.sample_rate.den() as u64)?;
                out.write_value(a.channel_count)?;
            }
            StreamKind::Subtitle | StreamKind::UserData => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::packet::{build_body, parse_body};

    fn main_header() -> MainHeader {
        MainHeader::new(
            3,
            vec![Rational::new(1001, 30000), Rational::new(1, 44100)],
            32768,
        )
    }

    fn round_trip(header: &StreamHeader, main: &MainHeader) -> Result<StreamHeader> {
        let body = build_body(|out| header.write(out, main))?;
        parse_body(&body, "stream header", |input| StreamHeader::read(input, main))
    }

    #[test]
    fn stream_kinds_round_trip() -> Result<()> {
        let main = main_header();

        let mut video = StreamDescriptor::video(b"RGB\x18", Rational::new(1001, 30000), 640, 480);
        video.codec_specific_data = vec![1, 2, 3];
        let audio = StreamDescriptor::audio(b"PSD\x10", 44100, 2);
        let subtitle = StreamDescriptor {
            kind: StreamKind::Subtitle,
            fourcc: b"UTF8".to_vec(),
            time_base: Rational::new(1001, 30000),
            decode_delay: 0,
            codec_specific_data: Vec::new(),
        };

        for (id, (desc, tb_id)) in [(video, 0), (audio, 1), (subtitle, 0)].iter().enumerate() {
            let header = StreamHeader::from_descriptor(id, desc, *tb_id, DEFAULT_MSB_PTS_SHIFT);
            let read = round_trip(&header, &main)?;
            assert_eq!(read, header);
            assert_eq!(&read.descriptor(&main)?, desc);
        }
        Ok(())
    }

    #[test]
    fn max_pts_distance_is_one_second() {
        let audio = StreamDescriptor::audio(b"PSD\x10", 48000, 2);
        let header = StreamHeader::from_descriptor(0, &audio, 0, DEFAULT_MSB_PTS_SHIFT);
        assert_eq!(header.max_pts_distance, 48000);

        let video = StreamDescriptor::video(b"RGBA", Rational::new(1001, 30000), 2, 2);
        let header = StreamHeader::from_descriptor(0, &video, 0, DEFAULT_MSB_PTS_SHIFT);
        assert_eq!(header.max_pts_distance, 29);
    }

    #[test]
    fn rejects_invalid_references() {
        let main = main_header();
        let audio = StreamDescriptor::audio(b"PSD\x10", 44100, 2);

        let header = StreamHeader::from_descriptor(3, &audio, 1, DEFAULT_MSB_PTS_SHIFT);
        assert!(round_trip(&header, &main).is_err());

        let header = StreamHeader::from_descriptor(0, &audio, 2, DEFAULT_MSB_PTS_SHIFT);
        assert!(round_trip(&header, &main).is_err());

        let header = StreamHeader::from_descriptor(0, &audio, 1, 63);
        assert!(round_trip(&header, &main).is_err());
    }

    #[test]
    fn unknown_class_is_malformed() -> Result<()> {
        let main = main_header();
        let body = build_body(|out| {
            out.write_value(0)?;
            out.write_value(9)?;
            out.write_variable_bytes(b"????")?;
            for _ in 0..5 {
                out.write_value(0)?;
            }
            out.write_variable_bytes(&[])
        })?;
        let result = parse_body(&body, "stream header", |input| StreamHeader::read(input, &main));
        assert!(matches!(result, Err(NutError::MalformedEncoding(_))));
        Ok(())
    }
}
