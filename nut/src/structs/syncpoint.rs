//! Syncpoints.
//!
//! A syncpoint carries the timestamp of the frame following it, allowing the
//! per stream pts state to be reset, and points back to the previous
//! syncpoint for backwards seeking.

use std::io::{BufRead, Write};

use crate::utils::bytestream_io::{NutInput, NutOutput};
use crate::utils::errors::Result;
use crate::utils::timing::GlobalTimestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Syncpoint {
    pub global_key_pts: GlobalTimestamp,
    /// Distance to the previous syncpoint in units of 16 bytes, 0 for the first.
    pub back_ptr_div16: u64,
}

impl Syncpoint {
    pub fn read<R: BufRead>(input: &mut NutInput<R>, time_base_count: usize) -> Result<Self> {
        Ok(Self {
            global_key_pts: input.read_timestamp(time_base_count)?,
            back_ptr_div16: input.read_value()?,
        })
    }

    pub fn write<W: Write>(&self, out: &mut NutOutput<W>, time_base_count: usize) -> Result<()> {
        out.write_timestamp(self.global_key_pts, time_base_count)?;
        out.write_value(self.back_ptr_div16)
    }
}

#[test]
fn syncpoint_round_trip() -> Result<()> {
    use crate::structs::packet::{build_body, parse_body};

    let sp = Syncpoint {
        global_key_pts: GlobalTimestamp {
            time_base_id: 1,
            pts: 123_456,
        },
        back_ptr_div16: 2048,
    };
    let body = build_body(|out| sp.write(out, 2))?;
    let read = parse_body(&body, "syncpoint", |input| Syncpoint::read(input, 2))?;
    assert_eq!(read, sp);
    Ok(())
}
