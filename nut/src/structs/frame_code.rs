//! Frame code table and frame header coding.
//!
//! The first byte of every frame indexes a 256-entry table stored in the main
//! header. Each entry is a template fixing some of the header fields (stream,
//! pts delta, size, flags); fields the template leaves open follow the code
//! byte explicitly.
//!
//! ## Frame header
//!
//! ```text
//! frame_code      u8
//! coded_flags     v   if FLAG_CODED, xored into the template flags
//! stream_id       v   if FLAG_STREAM_ID
//! coded_pts       v   if FLAG_CODED_PTS
//! data_size_msb   v   if FLAG_SIZE_MSB
//! match_time      s   if FLAG_MATCH_TIME
//! header_idx      v   if FLAG_HEADER_IDX
//! reserved_count  v   if FLAG_RESERVED, followed by as many v
//! checksum        u32 if FLAG_CHECKSUM
//! ```

use std::io::{BufRead, Write};

use log::trace;

use crate::structs::startcode::STARTCODE_PREFIX;
use crate::utils::bytestream_io::{NutInput, NutOutput, value_len};
use crate::utils::errors::{NutError, Result};

pub const FLAG_KEY: u64 = 1;
pub const FLAG_EOR: u64 = 2;
pub const FLAG_CODED_PTS: u64 = 8;
pub const FLAG_STREAM_ID: u64 = 16;
pub const FLAG_SIZE_MSB: u64 = 32;
pub const FLAG_CHECKSUM: u64 = 64;
pub const FLAG_RESERVED: u64 = 128;
pub const FLAG_SM_DATA: u64 = 256;
pub const FLAG_HEADER_IDX: u64 = 1024;
pub const FLAG_MATCH_TIME: u64 = 2048;
pub const FLAG_CODED: u64 = 4096;
pub const FLAG_INVALID: u64 = 8192;

/// Flags describing the frame itself rather than how its header is coded.
pub const SEMANTIC_FLAGS: u64 = FLAG_KEY | FLAG_EOR | FLAG_CHECKSUM | FLAG_SM_DATA;

const DEFAULT_MATCH_TIME_DELTA: i64 = 1 - (1 << 62);

pub const TABLE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCode {
    pub flags: u64,
    pub stream_id: usize,
    pub pts_delta: i64,
    pub size_mul: u64,
    pub size_lsb: u64,
    pub reserved_count: u64,
    pub match_time_delta: i64,
    pub header_idx: usize,
}

impl FrameCode {
    pub const INVALID: FrameCode = FrameCode {
        flags: FLAG_INVALID,
        stream_id: 0,
        pts_delta: 0,
        size_mul: 1,
        size_lsb: 0,
        reserved_count: 0,
        match_time_delta: DEFAULT_MATCH_TIME_DELTA,
        header_idx: 0,
    };

    pub const fn template(flags: u64) -> Self {
        Self {
            flags,
            ..Self::INVALID
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.flags & FLAG_INVALID != 0
    }

    /// Entries sharing all fields but `size_lsb`, which must count up by one.
    fn continues_run(&self, first: &FrameCode, offset: u64) -> bool {
        if first.is_invalid() {
            return self.is_invalid();
        }
        self.flags == first.flags
            && self.stream_id == first.stream_id
            && self.pts_delta == first.pts_delta
            && self.size_mul == first.size_mul
            && Some(self.size_lsb) == first.size_lsb.checked_add(offset)
            && self.reserved_count == first.reserved_count
            && self.match_time_delta == first.match_time_delta
            && self.header_idx == first.header_idx
    }
}

impl Default for FrameCode {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Pts as carried by a frame header, before resolving it against the
/// stream's last pts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPts {
    Delta(i64),
    Coded(u64),
}

/// Fields of a decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub code: u8,
    pub flags: u64,
    pub stream_id: usize,
    pub pts: HeaderPts,
    pub data_size: u64,
    pub header_idx: usize,
}

/// What the writer needs to express for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRequest {
    pub stream_id: usize,
    pub pts_delta: i64,
    pub coded_pts: u64,
    pub data_size: u64,
    /// Any combination of [`SEMANTIC_FLAGS`].
    pub flags: u64,
}

/// Frame code chosen for a [`FrameRequest`] and the flags it ends up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub code: u8,
    pub flags: u64,
    pub cost: usize,
}

/// Resolves a coded pts against the last pts of its stream.
pub fn decode_coded_pts(coded: u64, last_pts: i64, msb_pts_shift: u32) -> Result<i64> {
    let range = 1u64 << msb_pts_shift;
    if coded < range {
        let mask = (range - 1) as i64;
        let delta = last_pts.wrapping_sub(mask >> 1);
        Ok(((coded as i64).wrapping_sub(delta) & mask).wrapping_add(delta))
    } else {
        i64::try_from(coded - range)
            .map_err(|_| NutError::malformed(format!("coded pts {coded} out of range")))
    }
}

/// Codes `pts` relative to `last_pts`, using only the low bits when close enough.
pub fn encode_coded_pts(pts: i64, last_pts: i64, msb_pts_shift: u32) -> u64 {
    let range = 1u64 << msb_pts_shift;
    let mask = range - 1;
    if pts.abs_diff(last_pts) < mask >> 1 {
        pts as u64 & mask
    } else {
        pts as u64 + range
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCodeTable {
    codes: Vec<FrameCode>,
}

impl Default for FrameCodeTable {
    fn default() -> Self {
        Self::minimal()
    }
}

impl FrameCodeTable {
    pub fn new(codes: [FrameCode; TABLE_SIZE]) -> Self {
        let mut codes: Vec<_> = codes
            .iter()
            .map(|fc| if fc.is_invalid() { FrameCode::INVALID } else { *fc })
            .collect();
        codes[STARTCODE_PREFIX as usize] = FrameCode::INVALID;
        Self { codes }
    }

    /// The table the writer uses: one fully explicit code plus a keyframe
    /// and a delta frame template. Everything else is invalid.
    pub fn minimal() -> Self {
        let explicit = FLAG_STREAM_ID | FLAG_CODED_PTS | FLAG_SIZE_MSB;
        let mut codes = [FrameCode::INVALID; TABLE_SIZE];
        codes[0] = FrameCode::template(FLAG_CODED | explicit);
        codes[1] = FrameCode::template(explicit | FLAG_KEY);
        codes[2] = FrameCode::template(explicit);
        Self::new(codes)
    }

    pub fn get(&self, code: u8) -> &FrameCode {
        &self.codes[code as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &FrameCode)> {
        self.codes.iter().enumerate().map(|(i, fc)| (i as u8, fc))
    }

    pub fn valid_count(&self) -> usize {
        self.codes.iter().filter(|fc| !fc.is_invalid()).count()
    }

    pub fn read<R: BufRead>(input: &mut NutInput<R>, stream_count: usize) -> Result<Self> {
        let mut codes = vec![FrameCode::INVALID; TABLE_SIZE];
        let mut pts_delta = 0i64;
        let mut size_mul = 1u64;
        let mut stream_id = 0usize;
        let mut match_time_delta = DEFAULT_MATCH_TIME_DELTA;
        let mut header_idx = 0usize;

        let n = STARTCODE_PREFIX as usize;
        let mut i = 0usize;
        while i < TABLE_SIZE {
            let flags = input.read_value()?;
            let fields = input.read_value()?;
            if fields > 0 {
                pts_delta = input.read_signed_value()?;
            }
            if fields > 1 {
                size_mul = input.read_value()?;
            }
            if fields > 2 {
                stream_id = input.read_usize()?;
            }
            let size_lsb = if fields > 3 { input.read_value()? } else { 0 };
            let reserved_count = if fields > 4 { input.read_value()? } else { 0 };
            let count = if fields > 5 {
                input.read_value()?
            } else {
                size_mul.wrapping_sub(size_lsb)
            };
            if fields > 6 {
                match_time_delta = input.read_signed_value()?;
            }
            if fields > 7 {
                header_idx = input.read_usize()?;
            }
            for _ in 8..fields {
                input.read_value()?;
            }

            let available = (TABLE_SIZE - i - usize::from(i <= n)) as u64;
            if count == 0 || count > available {
                return Err(NutError::malformed(format!(
                    "frame code run of {count} at code {i} overflows the table"
                )));
            }
            if flags & FLAG_INVALID == 0 && stream_id >= stream_count {
                return Err(NutError::malformed(format!(
                    "frame code {i} references stream {stream_id} of {stream_count}"
                )));
            }

            let mut j = 0u64;
            while j < count {
                if i == n {
                    i += 1;
                    continue;
                }
                codes[i] = if flags & FLAG_INVALID != 0 {
                    FrameCode::INVALID
                } else {
                    FrameCode {
                        flags,
                        stream_id,
                        pts_delta,
                        size_mul,
                        size_lsb: size_lsb
                            .checked_add(j)
                            .ok_or_else(|| NutError::malformed("frame code size overflows"))?,
                        reserved_count,
                        match_time_delta,
                        header_idx,
                    }
                };
                i += 1;
                j += 1;
            }
        }

        let table = Self { codes };
        trace!("frame code table with {} valid codes", table.valid_count());
        Ok(table)
    }

    pub fn write<W: Write>(&self, out: &mut NutOutput<W>) -> Result<()> {
        let mut prev = FrameCode::template(0);
        let n = STARTCODE_PREFIX as usize;
        let mut i = 0usize;

        while i < TABLE_SIZE {
            if i == n {
                i += 1;
                continue;
            }
            let first = self.codes[i];

            let mut fields = 0u64;
            if first.pts_delta != prev.pts_delta {
                fields = 1;
            }
            if first.size_mul != prev.size_mul {
                fields = 2;
            }
            if first.stream_id != prev.stream_id {
                fields = 3;
            }
            if first.size_lsb != 0 {
                fields = 4;
            }
            if first.reserved_count != 0 {
                fields = 5;
            }
            if first.match_time_delta != prev.match_time_delta {
                fields = 7;
            }
            if first.header_idx != prev.header_idx {
                fields = 8;
            }

            let mut count = 0u64;
            while i < TABLE_SIZE {
                if i == n {
                    i += 1;
                    continue;
                }
                if !self.codes[i].continues_run(&first, count) {
                    break;
                }
                i += 1;
                count += 1;
            }
            if count != first.size_mul.wrapping_sub(first.size_lsb) {
                fields = fields.max(6);
            }

            out.write_value(first.flags)?;
            out.write_value(fields)?;
            if fields > 0 {
                out.write_signed_value(first.pts_delta)?;
            }
            if fields > 1 {
                out.write_value(first.size_mul)?;
            }
            if fields > 2 {
                out.write_value(first.stream_id as u64)?;
            }
            if fields > 3 {
                out.write_value(first.size_lsb)?;
            }
            if fields > 4 {
                out.write_value(first.reserved_count)?;
            }
            if fields > 5 {
                out.write_value(count)?;
            }
            if fields > 6 {
                out.write_signed_value(first.match_time_delta)?;
            }
            if fields > 7 {
                out.write_value(first.header_idx as u64)?;
            }

            prev = first;
        }

        Ok(())
    }

    /// Reads a frame header starting at its code byte. The running CRC is
    /// reset so that a header checksum covers exactly the header.
    pub fn read_header<R: BufRead>(&self, input: &mut NutInput<R>) -> Result<FrameHeader> {
        input.reset_crc();
        let code = input.read_u8()?;
        let fc = self.get(code);
        if fc.is_invalid() {
            return Err(NutError::malformed(format!("invalid frame code {code:#04X}")));
        }

        let mut flags = fc.flags;
        if flags & FLAG_CODED != 0 {
            flags ^= input.read_value()?;
        }
        if flags & FLAG_INVALID != 0 {
            return Err(NutError::malformed(format!(
                "frame code {code:#04X} coded as invalid"
            )));
        }

        let stream_id = if flags & FLAG_STREAM_ID != 0 {
            input.read_usize()?
        } else {
            fc.stream_id
        };
        let pts = if flags & FLAG_CODED_PTS != 0 {
            HeaderPts::Coded(input.read_value()?)
        } else {
            HeaderPts::Delta(fc.pts_delta)
        };
        let size_msb = if flags & FLAG_SIZE_MSB != 0 {
            input.read_value()?
        } else {
            0
        };
        if flags & FLAG_MATCH_TIME != 0 {
            input.read_signed_value()?;
        }
        let header_idx = if flags & FLAG_HEADER_IDX != 0 {
            input.read_usize()?
        } else {
            fc.header_idx
        };
        let reserved = if flags & FLAG_RESERVED != 0 {
            input.read_value()?
        } else {
            fc.reserved_count
        };
        for _ in 0..reserved {
            input.read_value()?;
        }
        if flags & FLAG_CHECKSUM != 0 {
            input.check_crc()?;
        }

        let data_size = size_msb
            .checked_mul(fc.size_mul)
            .and_then(|s| s.checked_add(fc.size_lsb))
            .ok_or_else(|| NutError::malformed("frame data size overflows"))?;

        Ok(FrameHeader {
            code,
            flags,
            stream_id,
            pts,
            data_size,
            header_idx,
        })
    }

    fn cost(&self, fc: &FrameCode, req: &FrameRequest) -> Option<(u64, usize)> {
        if fc.is_invalid()
            || fc.header_idx != 0
            || fc.reserved_count != 0
            || fc.size_mul == 0
            || req.data_size < fc.size_lsb
            || (req.data_size - fc.size_lsb) % fc.size_mul != 0
        {
            return None;
        }
        let size_msb = (req.data_size - fc.size_lsb) / fc.size_mul;

        let flags = if fc.flags & FLAG_CODED != 0 {
            let mut wanted = req.flags;
            if fc.stream_id != req.stream_id {
                wanted |= FLAG_STREAM_ID;
            }
            if fc.pts_delta != req.pts_delta {
                wanted |= FLAG_CODED_PTS;
            }
            if size_msb != 0 {
                wanted |= FLAG_SIZE_MSB;
            }
            wanted
        } else {
            let flags = fc.flags;
            if flags & SEMANTIC_FLAGS != req.flags
                || flags & (FLAG_RESERVED | FLAG_HEADER_IDX | FLAG_MATCH_TIME) != 0
                || (flags & FLAG_STREAM_ID == 0 && fc.stream_id != req.stream_id)
                || (flags & FLAG_CODED_PTS == 0 && fc.pts_delta != req.pts_delta)
                || (flags & FLAG_SIZE_MSB == 0 && size_msb != 0)
            {
                return None;
            }
            flags
        };

        let mut cost = 1;
        if fc.flags & FLAG_CODED != 0 {
            cost += value_len(fc.flags ^ flags);
        }
        if flags & FLAG_STREAM_ID != 0 {
            cost += value_len(req.stream_id as u64);
        }
        if flags & FLAG_CODED_PTS != 0 {
            cost += value_len(req.coded_pts);
        }
        if flags & FLAG_SIZE_MSB != 0 {
            cost += value_len(size_msb);
        }
        if flags & FLAG_CHECKSUM != 0 {
            cost += 4;
        }

        Some((flags, cost))
    }

    /// Picks the code giving the shortest header for `req`.
    pub fn select(&self, req: &FrameRequest) -> Option<Selection> {
        self.iter()
            .filter_map(|(code, fc)| {
                self.cost(fc, req)
                    .map(|(flags, cost)| Selection { code, flags, cost })
            })
            .min_by_key(|s| s.cost)
    }

    pub fn write_header<W: Write>(
        &self,
        out: &mut NutOutput<W>,
        selection: &Selection,
        req: &FrameRequest,
    ) -> Result<()> {
        let fc = self.get(selection.code);
        let flags = selection.flags;

        out.reset_crc();
        out.write_u8(selection.code)?;
        if fc.flags & FLAG_CODED != 0 {
            out.write_value(fc.flags ^ flags)?;
        }
        if flags & FLAG_STREAM_ID != 0 {
            out.write_value(req.stream_id as u64)?;
        }
        if flags & FLAG_CODED_PTS != 0 {
            out.write_value(req.coded_pts)?;
        }
        if flags & FLAG_SIZE_MSB != 0 {
            out.write_value((req.data_size - fc.size_lsb) / fc.size_mul)?;
        }
        if flags & FLAG_CHECKSUM != 0 {
            out.write_crc32()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A denser table in the spirit of what other muxers write: per stream
    /// templates with an implied pts step and a range of implied sizes.
    fn rich_table() -> FrameCodeTable {
        let mut codes = [FrameCode::INVALID; TABLE_SIZE];
        codes[0] = FrameCode::template(FLAG_CODED | FLAG_STREAM_ID | FLAG_CODED_PTS | FLAG_SIZE_MSB);
        for (i, code) in codes.iter_mut().enumerate().skip(1).take(40) {
            *code = FrameCode {
                flags: FLAG_KEY | FLAG_SIZE_MSB,
                stream_id: 1,
                pts_delta: 1,
                size_mul: 40,
                size_lsb: i as u64 - 1,
                ..FrameCode::INVALID
            };
        }
        for code in codes.iter_mut().skip(100).take(20) {
            *code = FrameCode {
                flags: FLAG_CODED_PTS | FLAG_SIZE_MSB,
                stream_id: 0,
                pts_delta: 0,
                size_mul: 1,
                size_lsb: 0,
                ..FrameCode::INVALID
            };
        }
        codes[200] = FrameCode {
            flags: FLAG_KEY | FLAG_CHECKSUM | FLAG_STREAM_ID | FLAG_CODED_PTS | FLAG_SIZE_MSB,
            ..FrameCode::INVALID
        };
        FrameCodeTable::new(codes)
    }

    fn table_round_trip(table: &FrameCodeTable, stream_count: usize) -> Result<FrameCodeTable> {
        let mut out = NutOutput::new(Vec::new());
        table.write(&mut out)?;
        let bytes = out.into_inner();
        let mut input = NutInput::bounded(&bytes[..], bytes.len() as u64);
        let read = FrameCodeTable::read(&mut input, stream_count)?;
        assert_eq!(input.remaining(), Some(0));
        Ok(read)
    }

    #[test]
    fn minimal_table_round_trip() -> Result<()> {
        let table = FrameCodeTable::minimal();
        assert_eq!(table.valid_count(), 3);
        assert!(table.get(b'N').is_invalid());
        assert_eq!(table_round_trip(&table, 1)?, table);
        Ok(())
    }

    #[test]
    fn rich_table_round_trip() -> Result<()> {
        let table = rich_table();
        assert_eq!(table_round_trip(&table, 2)?, table);
        Ok(())
    }

    #[test]
    fn table_run_overflowing_is_malformed() -> Result<()> {
        let mut out = NutOutput::new(Vec::new());
        out.write_value(0)?; // flags
        out.write_value(6)?; // fields
        out.write_signed_value(0)?;
        out.write_value(1)?;
        out.write_value(0)?;
        out.write_value(0)?;
        out.write_value(0)?;
        out.write_value(256)?; // count, one too many with 'N' skipped
        let bytes = out.into_inner();

        let mut input = NutInput::new(&bytes[..]);
        assert!(matches!(
            FrameCodeTable::read(&mut input, 1),
            Err(NutError::MalformedEncoding(_))
        ));
        Ok(())
    }

    #[test]
    fn table_stream_out_of_range() {
        let table = rich_table();
        assert!(table_round_trip(&table, 1).is_err());
    }

    #[test]
    fn coded_pts_wraps_around_last() -> Result<()> {
        let shift = 7;
        for last in [0i64, 5, 63, 64, 1000, 123_456] {
            for pts in [last, last + 1, last + 30, (last - 30).max(0), last + 62, last + 5000] {
                let coded = encode_coded_pts(pts, last, shift);
                assert_eq!(decode_coded_pts(coded, last, shift)?, pts);
            }
        }
        assert_eq!(encode_coded_pts(1001, 1000, 7), 1001 & 127);
        assert_eq!(encode_coded_pts(5000, 0, 7), 5000 + 128);
        Ok(())
    }

    fn request(stream_id: usize, pts_delta: i64, data_size: u64, flags: u64) -> FrameRequest {
        FrameRequest {
            stream_id,
            pts_delta,
            coded_pts: pts_delta.max(0) as u64 & 127,
            data_size,
            flags,
        }
    }

    #[test]
    fn minimal_table_selection() {
        let table = FrameCodeTable::minimal();

        let key = table.select(&request(0, 1, 100, FLAG_KEY)).unwrap();
        assert_eq!(key.code, 1);
        let delta = table.select(&request(0, 1, 100, 0)).unwrap();
        assert_eq!(delta.code, 2);

        let eor = table.select(&request(0, 0, 0, FLAG_KEY | FLAG_EOR)).unwrap();
        assert_eq!(eor.code, 0);
        assert_eq!(eor.flags & SEMANTIC_FLAGS, FLAG_KEY | FLAG_EOR);

        let checked = table.select(&request(0, 1, 100, FLAG_CHECKSUM)).unwrap();
        assert_eq!(checked.code, 0);
        assert_ne!(checked.flags & FLAG_CHECKSUM, 0);
    }

    #[test]
    fn rich_table_prefers_implied_fields() {
        let table = rich_table();

        // stream 1, pts + 1, size 85 = 5 + 2 * 40
        let sel = table.select(&request(1, 1, 85, FLAG_KEY)).unwrap();
        assert_eq!(sel.code, 6);
        assert_eq!(sel.cost, 2);

        // wrong pts step: only the explicit code or code 200 with checksum fit
        let sel = table.select(&request(1, 3, 85, FLAG_KEY)).unwrap();
        assert_eq!(sel.code, 0);

        let sel = table.select(&request(1, 3, 85, FLAG_KEY | FLAG_CHECKSUM)).unwrap();
        assert_eq!(sel.code, 200);
    }

    #[test]
    fn header_round_trip() -> Result<()> {
        let table = rich_table();
        let requests = [
            request(1, 1, 85, FLAG_KEY),
            request(0, 2, 3, 0),
            request(1, 9, 12345, FLAG_KEY | FLAG_CHECKSUM),
            request(0, 0, 0, FLAG_KEY | FLAG_EOR),
            request(1, 4, 77, FLAG_SM_DATA),
        ];

        let mut out = NutOutput::new(Vec::new());
        let mut selections = Vec::new();
        for req in &requests {
            let sel = table.select(req).unwrap();
            table.write_header(&mut out, &sel, req)?;
            selections.push(sel);
        }
        let bytes = out.into_inner();

        let mut input = NutInput::new(&bytes[..]);
        for (req, sel) in requests.iter().zip(&selections) {
            let header = table.read_header(&mut input)?;
            assert_eq!(header.code, sel.code);
            assert_eq!(header.stream_id, req.stream_id);
            assert_eq!(header.data_size, req.data_size);
            assert_eq!(header.flags & SEMANTIC_FLAGS, req.flags);
            match header.pts {
                HeaderPts::Delta(d) => assert_eq!(d, req.pts_delta),
                HeaderPts::Coded(c) => assert_eq!(c, req.coded_pts),
            }
        }
        assert!(!input.has_more_data()?);
        Ok(())
    }

    #[test]
    fn header_checksum_detects_corruption() -> Result<()> {
        let table = FrameCodeTable::minimal();
        let req = request(0, 5, 300, FLAG_KEY | FLAG_CHECKSUM);
        let sel = table.select(&req).unwrap();
        let mut out = NutOutput::new(Vec::new());
        table.write_header(&mut out, &sel, &req)?;
        let mut bytes = out.into_inner();
        let last_field = bytes.len() - 5;
        bytes[last_field] ^= 0x01;

        let mut input = NutInput::new(&bytes[..]);
        assert!(matches!(
            table.read_header(&mut input),
            Err(NutError::CrcMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn invalid_code_is_malformed() {
        let table = FrameCodeTable::minimal();
        let mut input = NutInput::new(&[0xFFu8, 0, 0][..]);
        assert!(matches!(
            table.read_header(&mut input),
            Err(NutError::MalformedEncoding(_))
        ));
    }
}
