//! Frames as seen by producers and consumers.

use std::io::{BufRead, Write};
use std::sync::Arc;

use crate::structs::info::{DataItem, read_items, write_items};
use crate::utils::bytestream_io::{NutInput, NutOutput};
use crate::utils::errors::Result;

/// One media unit of a stream. The payload is opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NutFrame {
    pub stream_id: usize,
    /// Presentation timestamp in the stream's time base.
    pub pts: i64,
    pub data: Arc<[u8]>,
    pub side_data: Vec<DataItem>,
    pub meta_data: Vec<DataItem>,
    pub keyframe: bool,
    /// End of record: the stream pauses at `pts`. Carries no payload.
    pub eor: bool,
}

impl NutFrame {
    pub fn new(stream_id: usize, pts: i64, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            stream_id,
            pts,
            data: data.into(),
            side_data: Vec::new(),
            meta_data: Vec::new(),
            keyframe: false,
            eor: false,
        }
    }

    pub fn key(stream_id: usize, pts: i64, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            keyframe: true,
            ..Self::new(stream_id, pts, data)
        }
    }

    pub fn end_of_record(stream_id: usize, pts: i64) -> Self {
        Self {
            keyframe: true,
            eor: true,
            ..Self::new(stream_id, pts, Vec::new())
        }
    }

    pub fn with_side_data(mut self, side_data: Vec<DataItem>) -> Self {
        self.side_data = side_data;
        self
    }

    pub fn with_meta_data(mut self, meta_data: Vec<DataItem>) -> Self {
        self.meta_data = meta_data;
        self
    }

    pub fn has_sm_data(&self) -> bool {
        !self.side_data.is_empty() || !self.meta_data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AsRef<[u8]> for NutFrame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Side and meta data block that precedes the payload of frames flagged
/// with `FLAG_SM_DATA`.
pub fn read_sm_data<R: BufRead>(
    input: &mut NutInput<R>,
    time_base_count: usize,
) -> Result<(Vec<DataItem>, Vec<DataItem>)> {
    let side_data = read_items(input, time_base_count)?;
    let meta_data = read_items(input, time_base_count)?;
    Ok((side_data, meta_data))
}

pub fn write_sm_data<W: Write>(
    out: &mut NutOutput<W>,
    frame: &NutFrame,
    time_base_count: usize,
) -> Result<()> {
    write_items(out, &frame.side_data, time_base_count)?;
    write_items(out, &frame.meta_data, time_base_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::info::DataValue;
    use crate::structs::packet::{build_body, parse_body};

    #[test]
    fn constructors() {
        let frame = NutFrame::key(1, 10, vec![1, 2, 3]);
        assert!(frame.keyframe && !frame.eor);
        assert_eq!(frame.as_ref(), &[1, 2, 3]);
        assert_eq!(frame.len(), 3);

        let eor = NutFrame::end_of_record(0, 99);
        assert!(eor.keyframe && eor.eor && eor.is_empty());
        assert!(!eor.has_sm_data());
    }

    #[test]
    fn sm_data_round_trip() -> Result<()> {
        let frame = NutFrame::new(0, 0, Vec::new())
            .with_side_data(vec![DataItem::binary("Palette", "bin", vec![0; 16])])
            .with_meta_data(vec![DataItem::new("Channels", DataValue::Integer(6))]);
        assert!(frame.has_sm_data());

        let body = build_body(|out| write_sm_data(out, &frame, 1))?;
        let (side, meta) = parse_body(&body, "side data", |input| read_sm_data(input, 1))?;
        assert_eq!(side, frame.side_data);
        assert_eq!(meta, frame.meta_data);
        Ok(())
    }
}
