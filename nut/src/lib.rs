#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! NUT is a low overhead container for interleaving frames of several
//! elementary streams. Payloads are opaque to the container.
//!
//! ### File Organization
//!
//! **Headers**: a file id string, the main header and one header per stream,
//! optionally followed by info packets.
//! **Body**: frames, interrupted by syncpoints at most `max_distance` bytes
//! apart and by repeated headers or info packets.
//! **Footer**: an optional index of syncpoints and keyframes.
//!
//! Every packet carries a CRC32 and starts with a 64-bit startcode, which lets
//! a reader recover from damage by scanning for the next one.
//!
//! ## Quick Start
//!
//! 1. Describe the streams with [`structs::stream_header::StreamDescriptor`]
//! 2. Mux frames with [`process::write::NutWriter`]
//! 3. Demux them again with [`process::read::NutReader`]
//!
//! ```rust
//! use std::io::Cursor;
//! use nut::process::{read::NutReader, write::{NutWriter, WriterConfig}};
//! use nut::structs::{frame::NutFrame, stream_header::StreamDescriptor};
//! use nut::utils::rational::Rational;
//!
//! let mut writer = NutWriter::new(Vec::new(), WriterConfig::default());
//! writer.write_streams(
//!     &[
//!         StreamDescriptor::video(b"FFV1", Rational::new(1, 25), 320, 240),
//!         StreamDescriptor::audio(b"PCM ", 48000, 2),
//!     ],
//!     &[],
//! )?;
//! writer.write_frame(NutFrame::key(0, 0, vec![0; 512]))?;
//! writer.write_frame(NutFrame::key(1, 0, vec![0; 128]))?;
//! writer.write_footer()?;
//!
//! let reader = NutReader::new(Cursor::new(writer.into_inner()));
//! for frame in reader {
//!     let frame = frame?;
//!     println!("stream {} pts {}: {} bytes", frame.stream_id, frame.pts, frame.len());
//! }
//! # Ok::<(), nut::utils::errors::NutError>(())
//! ```

/// Reading, writing and interleaving NUT files.
///
/// 1. **Reading** ([`process::read`]): Header parsing, frame decoding and
///    resynchronisation.
///
/// 2. **Writing** ([`process::write`]): Header emission, syncpoint placement,
///    frame code selection and the index.
///
/// 3. **Reordering** ([`process::reorder`]): Interleaving of streams by time.
///
/// 4. **Adapters** ([`process::pipe`]): Producer and consumer traits.
pub mod process;

/// Data structures representing NUT packets.
///
/// - **Startcodes** ([`structs::startcode`]): Packet identification
/// - **Packets** ([`structs::packet`]): Framing and checksums
/// - **Main Header** ([`structs::main_header`]): Container parameters
/// - **Stream Headers** ([`structs::stream_header`]): Per stream parameters
/// - **Frame Codes** ([`structs::frame_code`]): Frame header compression
/// - **Frames** ([`structs::frame`]): Payloads with side and meta data
/// - **Syncpoints** ([`structs::syncpoint`]): Timestamp resets
/// - **Info** ([`structs::info`]): Metadata
/// - **Index** ([`structs::index`]): Syncpoint positions and keyframes per stream
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Byte I/O** ([`utils::bytestream_io`]): Variable length integers with running checksums
/// - **CRC Validation** ([`utils::crc`]): Error detection
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Rationals** ([`utils::rational`]): Exact timebases
/// - **Timing** ([`utils::timing`]): Timebase conversion
pub mod utils;
