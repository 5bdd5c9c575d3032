//! Utility functions and supporting infrastructure.
//!
//! Provides byte level I/O with running checksums, CRC calculation, exact
//! rational arithmetic, timebase conversion and the error taxonomy shared by
//! the reader and writer.

pub mod bytestream_io;
pub mod crc;
pub mod errors;
pub mod rational;
pub mod timing;
