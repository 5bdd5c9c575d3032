//! Generic packet framing.
//!
//! ```text
//! startcode        u64
//! forward_ptr      v     (body + trailing checksum)
//! header_checksum  u32   (only if forward_ptr > 4096)
//! body             forward_ptr - 4 bytes
//! checksum         u32   (CRC of body)
//! ```

use std::io::{BufRead, Write};

use log::trace;

use crate::utils::bytestream_io::{NutInput, NutOutput, value_len};
use crate::utils::crc::NUT_CRC;
use crate::utils::errors::{NutError, Result};

/// Forward pointers above this size carry a header checksum.
pub const MAX_UNCHECKED_FORWARD_PTR: u64 = 4096;

/// Total encoded size of a packet whose body is `body_len` bytes long.
pub fn packet_len(body_len: usize) -> u64 {
    let forward_ptr = body_len as u64 + 4;
    let header_checksum = if forward_ptr > MAX_UNCHECKED_FORWARD_PTR {
        4
    } else {
        0
    };
    8 + value_len(forward_ptr) as u64 + header_checksum + forward_ptr
}

/// CRC state after reading `startcode`, for resuming mid-packet.
pub fn startcode_crc(startcode: u64) -> u32 {
    NUT_CRC.checksum(&startcode.to_be_bytes())
}

/// Reads the rest of a packet whose startcode was already consumed.
///
/// The input CRC must cover exactly the startcode bytes when this is called.
pub fn read_packet_body<R: BufRead>(input: &mut NutInput<R>) -> Result<Vec<u8>> {
    let forward_ptr = input.read_value()?;
    if forward_ptr > MAX_UNCHECKED_FORWARD_PTR {
        input.check_crc()?;
    }
    if forward_ptr < 4 {
        return Err(NutError::malformed(format!(
            "forward pointer {forward_ptr} shorter than the checksum"
        )));
    }

    input.reset_crc();
    let body = input.read_bytes(forward_ptr - 4)?;
    input.check_crc()?;
    trace!("packet body of {} bytes", body.len());

    Ok(body)
}

pub fn write_packet<W: Write>(out: &mut NutOutput<W>, startcode: u64, body: &[u8]) -> Result<()> {
    let forward_ptr = body.len() as u64 + 4;

    out.reset_crc();
    out.write_u64(startcode)?;
    out.write_value(forward_ptr)?;
    if forward_ptr > MAX_UNCHECKED_FORWARD_PTR {
        out.write_crc32()?;
    }

    out.reset_crc();
    out.write_bytes(body)?;
    out.write_crc32()
}

/// Parses a packet body, treating truncation as a malformed structure.
pub fn parse_body<T>(
    body: &[u8],
    structure: &str,
    parse: impl FnOnce(&mut NutInput<&[u8]>) -> Result<T>,
) -> Result<T> {
    let mut input = NutInput::bounded(body, body.len() as u64);
    parse(&mut input).map_err(|e| e.within(structure))
}

/// Serializes a packet body into a buffer.
pub fn build_body(build: impl FnOnce(&mut NutOutput<Vec<u8>>) -> Result<()>) -> Result<Vec<u8>> {
    let mut out = NutOutput::new(Vec::new());
    build(&mut out)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::startcode::INFO_STARTCODE;

    fn read_packet(input: &mut NutInput<&[u8]>, startcode: u64) -> Result<Vec<u8>> {
        input.reset_crc();
        assert_eq!(input.read_u64()?, startcode);
        read_packet_body(input)
    }

    fn round_trip(body: &[u8]) -> Result<()> {
        let mut out = NutOutput::new(Vec::new());
        write_packet(&mut out, INFO_STARTCODE, body)?;
        let bytes = out.into_inner();
        assert_eq!(bytes.len() as u64, packet_len(body.len()));

        let mut input = NutInput::new(&bytes[..]);
        assert_eq!(read_packet(&mut input, INFO_STARTCODE)?, body);
        assert!(!input.has_more_data()?);
        Ok(())
    }

    #[test]
    fn short_and_long_packets() -> Result<()> {
        round_trip(&[])?;
        round_trip(b"payload")?;
        round_trip(&[0x5A; 4092])?;
        round_trip(&[0xA5; 5000])?;
        Ok(())
    }

    #[test]
    fn header_checksum_only_for_long_packets() -> Result<()> {
        let mut out = NutOutput::new(Vec::new());
        write_packet(&mut out, INFO_STARTCODE, &[0; 4093])?;
        // startcode + 2 byte forward_ptr + header checksum + body + checksum
        assert_eq!(out.position(), 8 + 2 + 4 + 4093 + 4);
        Ok(())
    }

    #[test]
    fn corrupt_body_fails_checksum() -> Result<()> {
        let mut out = NutOutput::new(Vec::new());
        write_packet(&mut out, INFO_STARTCODE, b"abcdef")?;
        let mut bytes = out.into_inner();
        bytes[11] ^= 0x80;

        let mut input = NutInput::new(&bytes[..]);
        assert!(matches!(
            read_packet(&mut input, INFO_STARTCODE),
            Err(NutError::CrcMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn corrupt_header_of_long_packet() -> Result<()> {
        let mut out = NutOutput::new(Vec::new());
        write_packet(&mut out, INFO_STARTCODE, &[7; 6000])?;
        let mut bytes = out.into_inner();
        bytes[9] ^= 0x01;

        let mut input = NutInput::new(&bytes[..]);
        assert!(matches!(
            read_packet(&mut input, INFO_STARTCODE),
            Err(NutError::CrcMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn resumed_crc_matches_startcode_read() -> Result<()> {
        let bytes = INFO_STARTCODE.to_be_bytes();
        let mut input = NutInput::new(&bytes[..]);
        input.reset_crc();
        input.read_u64()?;
        assert_eq!(input.crc(), startcode_crc(INFO_STARTCODE));
        Ok(())
    }
}
