use anyhow::{Context, Result};
use indicatif::MultiProgress;
use serde::Serialize;

use super::command::{Cli, InfoArgs, ReportFormat};
use super::progress::{create_progress_bar, report};
use crate::input::InputReader;
use crate::timestamp::pts_str;
use nut::process::read::NutReader;
use nut::structs::frame::NutFrame;
use nut::structs::index::Index;
use nut::structs::info::Info;
use nut::structs::stream_header::{StreamHeader, StreamKind};
use nut::utils::rational::Rational;

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing NUT file: {}", args.input.display());

    let input = InputReader::new(&args.input)?;
    if input.is_pipe() {
        log::debug!("Reading from stdin, progress is shown in bytes only");
    }
    let total_bytes = input.len();
    let mut reader = NutReader::new(input);
    reader.set_fail_level(cli.fail_level());
    reader.read_headers().context("Failed to read headers")?;

    let pb = multi
        .map(|multi| create_progress_bar(multi, total_bytes))
        .transpose()?;

    let mut file = FileReport::from_headers(&reader)?;
    while let Some(frame) = reader
        .read_frame()
        .with_context(|| format!("Failed to read frame at byte {}", reader.position()))?
    {
        file.add_frame(&frame);
        report(pb.as_ref(), file.frames, reader.position(), 256);
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    file.finish(&reader);

    match args.format {
        ReportFormat::Plain => file.print(),
        ReportFormat::Yaml => print!("{}", serde_yaml_ng::to_string(&file)?),
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct FileReport {
    version: u64,
    max_distance: u64,
    time_bases: Vec<String>,
    streams: Vec<StreamReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    infos: Vec<InfoReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<IndexReport>,
    frames: u64,
    syncpoints: u64,
    bytes: u64,
    resyncs: usize,
    dropped_frames: usize,
}

#[derive(Debug, Serialize)]
struct StreamReport {
    id: usize,
    kind: &'static str,
    fourcc: String,
    time_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u64>,
    decode_delay: u64,
    codec_specific_bytes: usize,
    frames: u64,
    keyframes: u64,
    end_of_records: u64,
    bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_pts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_pts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    #[serde(skip)]
    time_base_value: Rational,
}

#[derive(Debug, Serialize)]
struct InfoReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<usize>,
    chapter: i64,
    items: Vec<ItemReport>,
}

#[derive(Debug, Serialize)]
struct ItemReport {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct IndexReport {
    syncpoints: usize,
    keyframes: Vec<usize>,
    max_pts: String,
}

impl FileReport {
    fn from_headers<R: std::io::BufRead>(reader: &NutReader<R>) -> Result<Self> {
        let main = reader
            .main_header()
            .context("Headers have not been read")?;

        let streams = reader
            .stream_headers()
            .iter()
            .map(|header| StreamReport::new(header, main.time_base(header.time_base_id)?))
            .collect::<Result<_>>()?;

        Ok(Self {
            version: main.version,
            max_distance: main.max_distance,
            time_bases: main.time_bases.iter().map(Rational::to_string).collect(),
            streams,
            infos: Vec::new(),
            index: None,
            frames: 0,
            syncpoints: 0,
            bytes: 0,
            resyncs: 0,
            dropped_frames: 0,
        })
    }

    fn add_frame(&mut self, frame: &NutFrame) {
        self.frames += 1;
        if let Some(stream) = self.streams.get_mut(frame.stream_id) {
            stream.frames += 1;
            stream.keyframes += u64::from(frame.keyframe && !frame.eor);
            stream.end_of_records += u64::from(frame.eor);
            stream.bytes += frame.len() as u64;
            stream.first_pts.get_or_insert(frame.pts);
            stream.last_pts = Some(stream.last_pts.map_or(frame.pts, |l| l.max(frame.pts)));
        }
    }

    fn finish<R: std::io::BufRead>(&mut self, reader: &NutReader<R>) {
        self.infos = reader.infos().iter().map(InfoReport::new).collect();
        let time_bases = reader
            .main_header()
            .map(|m| m.time_bases.clone())
            .unwrap_or_default();
        self.index = reader.index().map(|index| IndexReport::new(index, &time_bases));
        self.syncpoints = reader.syncpoints_read();
        self.bytes = reader.position();
        self.resyncs = reader.resync_count();
        self.dropped_frames = reader.dropped_frames();

        for stream in &mut self.streams {
            if let (Some(first), Some(last)) = (stream.first_pts, stream.last_pts) {
                stream.duration = Some(pts_str(last - first, stream.time_base_value));
            }
        }
    }

    fn print(&self) {
        println!();
        println!("NUT File Information");
        println!("====================");
        println!();
        println!("Main Header");
        println!("  Version                   {}", self.version);
        println!("  Streams                   {}", self.streams.len());
        println!("  Max distance              {} bytes", self.max_distance);
        println!("  Time bases                {}", self.time_bases.join(", "));
        println!();

        for stream in &self.streams {
            stream.print();
        }

        if !self.infos.is_empty() {
            println!("Metadata");
            for info in &self.infos {
                match info.stream {
                    Some(id) => println!("  Stream {id}"),
                    None if info.chapter != 0 => println!("  Chapter {}", info.chapter),
                    None => println!("  File"),
                }
                for item in &info.items {
                    println!("    {:24}{}", item.name, item.value);
                }
            }
            println!();
        }

        if let Some(index) = &self.index {
            println!("Index");
            println!("  Syncpoints                {}", index.syncpoints);
            println!("  Max pts                   {}", index.max_pts);
            for (id, count) in index.keyframes.iter().enumerate() {
                println!("  Stream {id} keyframes        {count}");
            }
            println!();
        }

        println!("Analysis Summary");
        println!("  Frames processed          {}", self.frames);
        println!("  Syncpoints                {}", self.syncpoints);
        let size_mb = self.bytes as f64 / 1_000_000.0;
        println!("  Size                      {size_mb:.2} MB ({} bytes)", self.bytes);
        if self.resyncs > 0 {
            println!("  Damaged spans             {}", self.resyncs);
            println!("  Dropped frames            {}", self.dropped_frames);
        }
        println!();
    }
}

impl StreamReport {
    fn new(header: &StreamHeader, time_base: Rational) -> Result<Self> {
        let (width, height, sample_rate, channels) = match &header.kind {
            StreamKind::Video(v) => (Some(v.width), Some(v.height), None, None),
            StreamKind::Audio(a) => (None, None, Some(a.sample_rate.to_string()), Some(a.channel_count)),
            StreamKind::Subtitle | StreamKind::UserData => (None, None, None, None),
        };

        Ok(Self {
            id: header.stream_id,
            kind: header.kind.name(),
            fourcc: String::from_utf8_lossy(&header.fourcc).into_owned(),
            time_base: time_base.to_string(),
            width,
            height,
            sample_rate,
            channels,
            decode_delay: header.decode_delay,
            codec_specific_bytes: header.codec_specific_data.len(),
            frames: 0,
            keyframes: 0,
            end_of_records: 0,
            bytes: 0,
            first_pts: None,
            last_pts: None,
            duration: None,
            time_base_value: time_base,
        })
    }

    fn print(&self) {
        println!("Stream {}", self.id);
        println!("  Type                      {}", self.kind);
        println!("  Codec                     {}", self.fourcc);
        println!("  Time base                 {}", self.time_base);
        if let (Some(width), Some(height)) = (self.width, self.height) {
            println!("  Dimensions                {width}x{height}");
        }
        if let Some(rate) = &self.sample_rate {
            println!("  Sample rate               {rate} Hz");
        }
        if let Some(channels) = self.channels {
            println!("  Channels                  {channels}");
        }
        if self.decode_delay != 0 {
            println!("  Decode delay              {}", self.decode_delay);
        }
        println!("  Frames                    {}", self.frames);
        println!("  Keyframes                 {}", self.keyframes);
        if self.end_of_records != 0 {
            println!("  End of records            {}", self.end_of_records);
        }
        println!("  Payload                   {} bytes", self.bytes);
        if let Some(duration) = &self.duration {
            println!("  Duration                  {duration}");
        }
        println!();
    }
}

impl InfoReport {
    fn new(info: &Info) -> Self {
        Self {
            stream: info.stream_id,
            chapter: info.chapter_id,
            items: info
                .items
                .iter()
                .map(|item| ItemReport {
                    name: item.name.clone(),
                    value: item.value.to_string(),
                })
                .collect(),
        }
    }
}

impl IndexReport {
    fn new(index: &Index, time_bases: &[Rational]) -> Self {
        let max_pts = match (
            time_bases.get(index.max_pts.time_base_id),
            i64::try_from(index.max_pts.pts),
        ) {
            (Some(&tb), Ok(pts)) => pts_str(pts, tb),
            _ => index.max_pts.pts.to_string(),
        };

        Self {
            syncpoints: index.syncpoints.len(),
            keyframes: index.keyframes.iter().map(Vec::len).collect(),
            max_pts,
        }
    }
}
