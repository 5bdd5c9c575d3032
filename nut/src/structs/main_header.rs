//! Main header packet.
//!
//! ```text
//! version               v
//! minor_version         v   (version > 3)
//! stream_count          v
//! max_distance          v
//! time_base_count       v
//!   time_base_num       v
//!   time_base_denom     v
//! frame code table
//! header_count_minus1   v   (optional)
//!   header_len          v
//!   header              header_len bytes
//! main_flags            v   (version > 3, optional)
//! ```

use std::io::{BufRead, Write};

use log::{debug, trace};

use crate::structs::frame_code::FrameCodeTable;
use crate::utils::bytestream_io::{NutInput, NutOutput};
use crate::utils::errors::{NutError, Result};
use crate::utils::rational::Rational;

pub const MIN_VERSION: u64 = 3;
pub const MAX_VERSION: u64 = 4;
pub const MAX_STREAMS: usize = 256;
pub const MAX_DISTANCE_CAP: u64 = 65536;
pub const MAX_ELISION_HEADERS: usize = 127;
pub const MAX_ELISION_TOTAL: usize = 1024;

/// Container wide parameters, immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainHeader {
    pub version: u64,
    pub minor_version: u64,
    pub stream_count: usize,
    /// Upper bound on the bytes between two syncpoints.
    pub max_distance: u64,
    pub time_bases: Vec<Rational>,
    pub frame_codes: FrameCodeTable,
    /// Elision headers `1..`; index 0 is the implicit empty header.
    pub elision_headers: Vec<Vec<u8>>,
    pub flags: u64,
}

impl MainHeader {
    pub fn new(stream_count: usize, time_bases: Vec<Rational>, max_distance: u64) -> Self {
        Self {
            version: MIN_VERSION,
            minor_version: 0,
            stream_count,
            max_distance,
            time_bases,
            frame_codes: FrameCodeTable::minimal(),
            elision_headers: Vec::new(),
            flags: 0,
        }
    }

    /// Elision header selected by `header_idx`, empty for index 0.
    pub fn elision_header(&self, header_idx: usize) -> Option<&[u8]> {
        match header_idx {
            0 => Some(&[]),
            i => self.elision_headers.get(i - 1).map(Vec::as_slice),
        }
    }

    pub fn time_base(&self, id: usize) -> Result<Rational> {
        self.time_bases
            .get(id)
            .copied()
            .ok_or_else(|| NutError::malformed(format!("time base {id} out of range")))
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_VERSION..=MAX_VERSION).contains(&self.version) {
            return Err(NutError::malformed(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if self.stream_count == 0 || self.stream_count > MAX_STREAMS {
            return Err(NutError::malformed(format!(
                "stream count {} outside 1..={MAX_STREAMS}",
                self.stream_count
            )));
        }
        if self.max_distance == 0 || self.max_distance > MAX_DISTANCE_CAP {
            return Err(NutError::malformed(format!(
                "max distance {} outside 1..={MAX_DISTANCE_CAP}",
                self.max_distance
            )));
        }
        if self.time_bases.is_empty() {
            return Err(NutError::malformed("no time bases"));
        }
        if let Some(tb) = self.time_bases.iter().find(|tb| !tb.is_positive()) {
            return Err(NutError::malformed(format!("time base {tb} not positive")));
        }

        if self.elision_headers.len() > MAX_ELISION_HEADERS {
            return Err(NutError::malformed("too many elision headers"));
        }
        if self
            .elision_headers
            .iter()
            .any(|h| h.is_empty() || h.len() > 255)
        {
            return Err(NutError::malformed("elision header length outside 1..=255"));
        }
        let total: usize = self.elision_headers.iter().map(Vec::len).sum();
        if total > MAX_ELISION_TOTAL {
            return Err(NutError::malformed(format!(
                "elision headers of {total} bytes exceed {MAX_ELISION_TOTAL}"
            )));
        }

        let header_count = self.elision_headers.len() + 1;
        for (code, fc) in self.frame_codes.iter().filter(|(_, fc)| !fc.is_invalid()) {
            if fc.stream_id >= self.stream_count {
                return Err(NutError::malformed(format!(
                    "frame code {code} references stream {}",
                    fc.stream_id
                )));
            }
            if fc.header_idx >= header_count {
                return Err(NutError::malformed(format!(
                    "frame code {code} references elision header {}",
                    fc.header_idx
                )));
            }
        }

        Ok(())
    }

    pub fn read<R: BufRead>(input: &mut NutInput<R>) -> Result<Self> {
        let version = input.read_value()?;
        if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
            return Err(NutError::malformed(format!("unsupported version {version}")));
        }
        let minor_version = if version > 3 { input.read_value()? } else { 0 };

        let stream_count = input.read_usize()?;
        let mut max_distance = input.read_value()?;
        if max_distance > MAX_DISTANCE_CAP {
            debug!("max distance {max_distance} capped to {MAX_DISTANCE_CAP}");
            max_distance = MAX_DISTANCE_CAP;
        }

        let time_base_count = input.read_value()?;
        let mut time_bases = Vec::new();
        for _ in 0..time_base_count {
            let num = input.read_value()?;
            let den = input.read_value()?;
            let tb = i64::try_from(num)
                .ok()
                .zip(i64::try_from(den).ok())
                .filter(|&(n, d)| n > 0 && d > 0)
                .and_then(|(n, d)| Rational::try_new(n, d))
                .ok_or_else(|| NutError::malformed(format!("invalid time base {num}/{den}")))?;
            time_bases.push(tb);
        }

        let frame_codes = FrameCodeTable::read(input, stream_count)?;

        let mut elision_headers = Vec::new();
        if input.has_more_data()? {
            let count = input.read_usize()?;
            if count > MAX_ELISION_HEADERS {
                return Err(NutError::malformed(format!("{count} elision headers")));
            }
            for _ in 0..count {
                elision_headers.push(input.read_variable_bytes()?);
            }
        }

        let flags = if version > 3 && input.has_more_data()? {
            input.read_value()?
        } else {
            0
        };

        let header = Self {
            version,
            minor_version,
            stream_count,
            max_distance,
            time_bases,
            frame_codes,
            elision_headers,
            flags,
        };
        header.validate()?;
        trace!("{header:?}");

        Ok(header)
    }

    pub fn write<W: Write>(&self, out: &mut NutOutput<W>) -> Result<()> {
        self.validate()?;

        out.write_value(self.version)?;
        if self.version > 3 {
            out.write_value(self.minor_version)?;
        }
        out.write_value(self.stream_count as u64)?;
        out.write_value(self.max_distance)?;
        out.write_value(self.time_bases.len() as u64)?;
        for tb in &self.time_bases {
            out.write_value(tb.num() as u64)?;
            out.write_value(tb.den() as u64)?;
        }

        self.frame_codes.write(out)?;

        let write_flags = self.version > 3 && self.flags != 0;
        if !self.elision_headers.is_empty() || write_flags {
            out.write_value(self.elision_headers.len() as u64)?;
            for header in &self.elision_headers {
                out.write_variable_bytes(header)?;
            }
        }
        if write_flags {
            out.write_value(self.flags)?;
        }

        Ok(())
    }
}
