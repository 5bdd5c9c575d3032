//! Byte level primitives of the NUT format.
//!
//! [`NutInput`] and [`NutOutput`] wrap a byte source or sink, keep track of
//! the stream position and accumulate a running CRC over every byte that
//! passes through them. All higher level structures are built from the
//! variable length `v`/`s` integers, length prefixed strings and big-endian
//! fixed width fields provided here.

use std::collections::VecDeque;
use std::io::{self, BufRead, Read, Write};

use bitstream_io::{BigEndian, ByteRead, ByteReader, ByteWrite, ByteWriter};

use crate::utils::crc::NUT_CRC;
use crate::utils::errors::{NutError, Result};
use crate::utils::timing::GlobalTimestamp;

/// Maps the unsigned wire form of an `s` value to its signed value.
#[inline(always)]
pub const fn unsigned_to_signed(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}

#[inline(always)]
pub const fn signed_to_unsigned(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Number of bytes `value` occupies as a `v`.
pub const fn value_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

#[derive(Debug)]
pub struct NutInput<R> {
    src: R,
    crc: u32,
    position: u64,
    limit: Option<u64>,
    /// Bytes handed back with [`NutInput::unread`], served before `src`.
    replay: VecDeque<u8>,
    journal: Option<Vec<u8>>,
}

impl<R: BufRead> NutInput<R> {
    pub fn new(src: R) -> Self {
        Self {
            src,
            crc: 0,
            position: 0,
            limit: None,
            replay: VecDeque::new(),
            journal: None,
        }
    }

    /// Input over a structure of known size. Reads past `len` bytes fail and
    /// length prefixes larger than what is left are rejected as malformed.
    pub fn bounded(src: R, len: u64) -> Self {
        Self {
            limit: Some(len),
            ..Self::new(src)
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn remaining(&self) -> Option<u64> {
        self.limit
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub fn reset_crc(&mut self) {
        self.crc = NUT_CRC.init;
    }

    pub fn set_crc(&mut self, crc: u32) {
        self.crc = crc;
    }

    /// Reads a stored checksum and compares it with the CRC accumulated
    /// since the last reset.
    pub fn check_crc(&mut self) -> Result<()> {
        let calculated = self.crc;
        let read = self.read_u32()?;
        if calculated != read {
            return Err(NutError::CrcMismatch { calculated, read });
        }
        Ok(())
    }

    /// Starts recording every byte read, dropping any earlier recording.
    pub fn start_journal(&mut self) {
        self.journal = Some(Vec::new());
    }

    pub fn stop_journal(&mut self) {
        self.journal = None;
    }

    /// Bytes read since [`NutInput::start_journal`], empty if not recording.
    pub fn take_journal(&mut self) -> Vec<u8> {
        self.journal.take().unwrap_or_default()
    }

    /// Puts `bytes` back in front of the input. They are read again, and
    /// counted again in the position and CRC.
    pub fn unread(&mut self, bytes: &[u8]) {
        for &byte in bytes.iter().rev() {
            self.replay.push_front(byte);
        }
        let len = bytes.len() as u64;
        self.position = self.position.saturating_sub(len);
        if let Some(remaining) = self.limit.as_mut() {
            *remaining += len;
        }
    }

    /// Next byte without consuming it, `None` at the end of input.
    pub fn check_next_byte(&mut self) -> Result<Option<u8>> {
        if self.limit == Some(0) {
            return Ok(None);
        }
        if let Some(&byte) = self.replay.front() {
            return Ok(Some(byte));
        }
        Ok(self.src.fill_buf()?.first().copied())
    }

    pub fn has_more_data(&mut self) -> Result<bool> {
        Ok(self.check_next_byte()?.is_some())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(ByteReader::endian(&mut *self, BigEndian).read::<u32>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(ByteReader::endian(&mut *self, BigEndian).read::<u64>()?)
    }

    /// Reads a `v`.
    pub fn read_value(&mut self) -> Result<u64> {
        let mut value = 0u64;
        loop {
            let byte = self.read_u8()?;
            if value > u64::MAX >> 7 {
                return Err(NutError::malformed("variable length value exceeds 64 bits"));
            }
            value = (value << 7) | u64::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    /// Reads an `s`.
    pub fn read_signed_value(&mut self) -> Result<i64> {
        self.read_value().map(unsigned_to_signed)
    }

    pub fn read_usize(&mut self) -> Result<usize> {
        let value = self.read_value()?;
        usize::try_from(value).map_err(|_| NutError::malformed(format!("value {value} too large")))
    }

    pub fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        match self.limit {
            Some(remaining) if len > remaining => {
                return Err(NutError::malformed(format!(
                    "length {len} exceeds the {remaining} remaining bytes"
                )));
            }
            _ => {}
        }

        // Grow with what the source delivers instead of trusting `len`.
        let mut buf = Vec::new();
        (&mut *self).take(len).read_to_end(&mut buf)?;
        if (buf.len() as u64) < len {
            return Err(NutError::EndOfData);
        }
        Ok(buf)
    }

    /// Reads a `vb`: length as `v` followed by that many bytes.
    pub fn read_variable_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_value()?;
        self.read_bytes(len)
    }

    pub fn read_variable_string(&mut self) -> Result<String> {
        String::from_utf8(self.read_variable_bytes()?)
            .map_err(|e| NutError::malformed(format!("string is not UTF-8: {e}")))
    }

    /// Reads bytes up to and excluding a terminating NUL.
    pub fn read_cstring(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        loop {
            match self.read_u8()? {
                0 => return Ok(buf),
                byte => buf.push(byte),
            }
        }
    }

    /// Reads a `t`, a pts combined with the id of its timebase.
    pub fn read_timestamp(&mut self, time_base_count: usize) -> Result<GlobalTimestamp> {
        let value = self.read_value()?;
        GlobalTimestamp::decode(value, time_base_count)
    }

    pub fn skip(&mut self, len: u64) -> Result<()> {
        let skipped = io::copy(&mut (&mut *self).take(len), &mut io::sink())?;
        if skipped < len {
            return Err(NutError::EndOfData);
        }
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.src
    }
}

impl<R: BufRead> Read for NutInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let max = match self.limit {
            Some(remaining) => buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX)),
            None => buf.len(),
        };
        let n = if self.replay.is_empty() {
            self.src.read(&mut buf[..max])?
        } else {
            let n = max.min(self.replay.len());
            for (dst, byte) in buf[..n].iter_mut().zip(self.replay.drain(..n)) {
                *dst = byte;
            }
            n
        };

        if let Some(journal) = self.journal.as_mut() {
            journal.extend_from_slice(&buf[..n]);
        }
        self.crc = NUT_CRC.update(self.crc, &buf[..n]);
        self.position += n as u64;
        if let Some(remaining) = self.limit.as_mut() {
            *remaining -= n as u64;
        }
        Ok(n)
    }
}

#[derive(Debug)]
pub struct NutOutput<W> {
    sink: W,
    crc: u32,
    position: u64,
}

impl<W: Write> NutOutput<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            crc: 0,
            position: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub fn reset_crc(&mut self) {
        self.crc = NUT_CRC.init;
    }

    /// Appends the CRC of everything written since the last reset.
    pub fn write_crc32(&mut self) -> Result<()> {
        let crc = self.crc;
        self.write_u32(crc)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        Ok(self.write_all(&[value])?)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        Ok(ByteWriter::endian(&mut *self, BigEndian).write::<u32>(value)?)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        Ok(ByteWriter::endian(&mut *self, BigEndian).write::<u64>(value)?)
    }

    pub fn write_value(&mut self, mut value: u64) -> Result<()> {
        let mut buf = [0u8; 10];
        let mut i = buf.len() - 1;
        buf[i] = (value & 0x7F) as u8;
        value >>= 7;
        while value != 0 {
            i -= 1;
            buf[i] = 0x80 | (value & 0x7F) as u8;
            value >>= 7;
        }
        Ok(self.write_all(&buf[i..])?)
    }

    pub fn write_signed_value(&mut self, value: i64) -> Result<()> {
        self.write_value(signed_to_unsigned(value))
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        Ok(self.write_all(bytes)?)
    }

    pub fn write_variable_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_value(bytes.len() as u64)?;
        self.write_bytes(bytes)
    }

    pub fn write_variable_string(&mut self, s: &str) -> Result<()> {
        self.write_variable_bytes(s.as_bytes())
    }

    pub fn write_cstring(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.contains(&0) {
            return Err(NutError::malformed("C string contains NUL"));
        }
        self.write_bytes(bytes)?;
        self.write_u8(0)
    }

    pub fn write_timestamp(&mut self, ts: GlobalTimestamp, time_base_count: usize) -> Result<()> {
        self.write_value(ts.encode(time_base_count)?)
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.sink.flush()?)
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> Write for NutOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.sink.write(buf)?;
        self.crc = NUT_CRC.update(self.crc, &buf[..n]);
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(value: u64) -> Result<Vec<u8>> {
        let mut out = NutOutput::new(Vec::new());
        out.write_value(value)?;
        Ok(out.into_inner())
    }

    #[test]
    fn value_encoding_is_big_endian_base128() -> Result<()> {
        assert_eq!(encode(0)?, [0x00]);
        assert_eq!(encode(127)?, [0x7F]);
        assert_eq!(encode(128)?, [0x81, 0x00]);
        assert_eq!(encode(16383)?, [0xFF, 0x7F]);
        assert_eq!(encode(16384)?, [0x81, 0x80, 0x00]);
        assert_eq!(
            encode(u64::MAX)?,
            [0x81, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F]
        );
        for v in [0, 127, 128, 16383, 16384, u64::MAX] {
            assert_eq!(encode(v)?.len(), value_len(v));
        }
        Ok(())
    }

    #[test]
    fn values_round_trip() -> Result<()> {
        let mut seed = 0x9E37_79B9_7F4A_7C15u64;
        let mut values = vec![0, 1, 127, 128, u64::MAX, u64::MAX - 1];
        for _ in 0..200 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            values.push(seed >> (seed % 64));
        }

        let mut out = NutOutput::new(Vec::new());
        for &v in &values {
            out.write_value(v)?;
            out.write_signed_value(v as i64)?;
        }

        let bytes = out.into_inner();
        let mut input = NutInput::new(&bytes[..]);
        for &v in &values {
            assert_eq!(input.read_value()?, v);
            assert_eq!(input.read_signed_value()?, v as i64);
        }
        assert!(!input.has_more_data()?);
        Ok(())
    }

    #[test]
    fn signed_mapping() {
        assert_eq!(unsigned_to_signed(0), 0);
        assert_eq!(unsigned_to_signed(1), -1);
        assert_eq!(unsigned_to_signed(2), 1);
        assert_eq!(unsigned_to_signed(3), -2);
        assert_eq!(unsigned_to_signed(u64::MAX), i64::MIN);
        assert_eq!(signed_to_unsigned(i64::MAX), u64::MAX - 1);
    }

    #[test]
    fn value_overflow_is_malformed() {
        let bytes = [0x82, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x00];
        let mut input = NutInput::new(&bytes[..]);
        assert!(matches!(
            input.read_value(),
            Err(NutError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn truncated_value_is_end_of_data() {
        let mut input = NutInput::new(&[0x81u8, 0x80][..]);
        assert!(matches!(input.read_value(), Err(NutError::EndOfData)));
        let mut input = NutInput::new(&[0u8, 1, 2][..]);
        assert!(matches!(input.read_u32(), Err(NutError::EndOfData)));
    }

    #[test]
    fn length_prefix_beyond_bounds() -> Result<()> {
        let mut out = NutOutput::new(Vec::new());
        out.write_value(1 << 40)?;
        out.write_bytes(b"short")?;
        let bytes = out.into_inner();

        let mut bounded = NutInput::bounded(&bytes[..], bytes.len() as u64);
        assert!(matches!(
            bounded.read_variable_bytes(),
            Err(NutError::MalformedEncoding(_))
        ));

        let mut unbounded = NutInput::new(&bytes[..]);
        assert!(matches!(
            unbounded.read_variable_bytes(),
            Err(NutError::EndOfData)
        ));
        Ok(())
    }

    #[test]
    fn strings_and_fixed_width() -> Result<()> {
        let mut out = NutOutput::new(Vec::new());
        out.write_u8(0xAB)?;
        out.write_u32(0xDEAD_BEEF)?;
        out.write_u64(0x0123_4567_89AB_CDEF)?;
        out.write_variable_string("stéréo")?;
        out.write_cstring(b"fourcc")?;
        out.write_timestamp(GlobalTimestamp { time_base_id: 1, pts: 77 }, 2)?;
        assert!(out.write_cstring(b"a\0b").is_err());
        let bytes = out.into_inner();
        assert_eq!(&bytes[1..5], &[0xDE, 0xAD, 0xBE, 0xEF]);

        let mut input = NutInput::new(Cursor::new(bytes));
        assert_eq!(input.check_next_byte()?, Some(0xAB));
        assert_eq!(input.read_u8()?, 0xAB);
        assert_eq!(input.read_u32()?, 0xDEAD_BEEF);
        assert_eq!(input.read_u64()?, 0x0123_4567_89AB_CDEF);
        assert_eq!(input.read_variable_string()?, "stéréo");
        assert_eq!(input.read_cstring()?, b"fourcc");
        assert_eq!(
            input.read_timestamp(2)?,
            GlobalTimestamp { time_base_id: 1, pts: 77 }
        );
        assert_eq!(input.check_next_byte()?, None);
        Ok(())
    }

    #[test]
    fn crc_accumulates_on_both_sides() -> Result<()> {
        let mut out = NutOutput::new(Vec::new());
        out.write_bytes(b"ignored")?;
        out.reset_crc();
        out.write_bytes(b"123456789")?;
        assert_eq!(out.crc(), 0x89A1_897F);
        out.write_crc32()?;
        assert_eq!(out.position(), 20);
        let bytes = out.into_inner();

        let mut input = NutInput::new(&bytes[..]);
        input.skip(7)?;
        input.reset_crc();
        input.skip(9)?;
        input.check_crc()?;
        assert_eq!(input.position(), 20);

        let mut corrupt = bytes.clone();
        corrupt[10] ^= 0x04;
        let mut input = NutInput::new(&corrupt[..]);
        input.skip(7)?;
        input.reset_crc();
        input.skip(9)?;
        assert!(matches!(
            input.check_crc(),
            Err(NutError::CrcMismatch { read: 0x89A1_897F, .. })
        ));
        Ok(())
    }

    #[test]
    fn journaled_bytes_can_be_read_again() -> Result<()> {
        let mut input = NutInput::new(&b"\x81\x00rest"[..]);
        input.start_journal();
        assert_eq!(input.read_value()?, 128);
        let journal = input.take_journal();
        assert_eq!(journal, [0x81, 0x00]);
        assert_eq!(input.position(), 2);

        input.unread(&journal[1..]);
        assert_eq!(input.position(), 1);
        assert_eq!(input.check_next_byte()?, Some(0x00));
        input.reset_crc();
        assert_eq!(input.read_bytes(5)?, b"\x00rest");
        assert_eq!(input.crc(), NUT_CRC.checksum(b"\x00rest"));
        assert_eq!(input.position(), 6);
        assert!(!input.has_more_data()?);
        assert!(input.take_journal().is_empty());
        Ok(())
    }
}
