//! Info packets and the key/value items they share with frame side data.
//!
//! ```text
//! stream_id_plus1   v
//! chapter_id        s
//! chapter_start     t
//! chapter_len       v
//! count             v
//!   name            vb
//!   value           s    >= 0: integer, -1: UTF-8 vb, -2: type vb + vb,
//!                        -3: s, -4: t, < -4: rational num s / den -value-4
//! ```

use std::fmt::{Display, Formatter};
use std::io::{BufRead, Write};

use log::trace;

use crate::utils::bytestream_io::{NutInput, NutOutput};
use crate::utils::errors::{NutError, Result};
use crate::utils::rational::Rational;
use crate::utils::timing::GlobalTimestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    Integer(i64),
    String(String),
    Binary { type_name: String, data: Vec<u8> },
    Signed(i64),
    Timestamp(GlobalTimestamp),
    Rational(Rational),
}

impl Display for DataValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) | Self::Signed(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Binary { type_name, data } => write!(f, "<{type_name}, {} bytes>", data.len()),
            Self::Timestamp(ts) => write!(f, "{} (time base {})", ts.pts, ts.time_base_id),
            Self::Rational(r) => write!(f, "{r}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub name: String,
    pub value: DataValue,
}

impl DataItem {
    pub fn new(name: impl Into<String>, value: DataValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, DataValue::String(value.into()))
    }

    pub fn binary(name: impl Into<String>, type_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(
            name,
            DataValue::Binary {
                type_name: type_name.into(),
                data,
            },
        )
    }

    pub fn read<R: BufRead>(input: &mut NutInput<R>, time_base_count: usize) -> Result<Self> {
        let name = input.read_variable_string()?;
        let value = match input.read_signed_value()? {
            v if v >= 0 => DataValue::Integer(v),
            -1 => DataValue::String(input.read_variable_string()?),
            -2 => DataValue::Binary {
                type_name: input.read_variable_string()?,
                data: input.read_variable_bytes()?,
            },
            -3 => DataValue::Signed(input.read_signed_value()?),
            -4 => DataValue::Timestamp(input.read_timestamp(time_base_count)?),
            v => {
                let num = input.read_signed_value()?;
                let den = v
                    .checked_neg()
                    .and_then(|d| d.checked_sub(4))
                    .ok_or_else(|| NutError::malformed("rational denominator overflows"))?;
                DataValue::Rational(Rational::try_new(num, den).ok_or_else(|| {
                    NutError::malformed(format!("invalid rational {num}/{den}"))
                })?)
            }
        };

        Ok(Self { name, value })
    }

    pub fn write<W: Write>(&self, out: &mut NutOutput<W>, time_base_count: usize) -> Result<()> {
        out.write_variable_string(&self.name)?;
        match &self.value {
            DataValue::Integer(v) => {
                if *v < 0 {
                    return Err(NutError::malformed(format!(
                        "integer item {} is negative",
                        self.name
                    )));
                }
                out.write_signed_value(*v)
            }
            DataValue::String(s) => {
                out.write_signed_value(-1)?;
                out.write_variable_string(s)
            }
            DataValue::Binary { type_name, data } => {
                out.write_signed_value(-2)?;
                out.write_variable_string(type_name)?;
                out.write_variable_bytes(data)
            }
            DataValue::Signed(v) => {
                out.write_signed_value(-3)?;
                out.write_signed_value(*v)
            }
            DataValue::Timestamp(ts) => {
                out.write_signed_value(-4)?;
                out.write_timestamp(*ts, time_base_count)
            }
            DataValue::Rational(r) => {
                let den = r
                    .den()
                    .checked_add(4)
                    .ok_or(NutError::ArithmeticOverflow)?;
                out.write_signed_value(-den)?;
                out.write_signed_value(r.num())
            }
        }
    }
}

/// Reads a `v` count followed by that many items.
pub fn read_items<R: BufRead>(
    input: &mut NutInput<R>,
    time_base_count: usize,
) -> Result<Vec<DataItem>> {
    let count = input.read_value()?;
    let mut items = Vec::new();
    for _ in 0..count {
        items.push(DataItem::read(input, time_base_count)?);
    }
    Ok(items)
}

pub fn write_items<W: Write>(
    out: &mut NutOutput<W>,
    items: &[DataItem],
    time_base_count: usize,
) -> Result<()> {
    out.write_value(items.len() as u64)?;
    for item in items {
        item.write(out, time_base_count)?;
    }
    Ok(())
}

/// Metadata for the whole file, a stream, or a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Info {
    pub stream_id: Option<usize>,
    pub chapter_id: i64,
    pub chapter_start: GlobalTimestamp,
    pub chapter_len: u64,
    pub items: Vec<DataItem>,
}

impl Info {
    pub fn global(items: Vec<DataItem>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn read<R: BufRead>(
        input: &mut NutInput<R>,
        stream_count: usize,
        time_base_count: usize,
    ) -> Result<Self> {
        let stream_id = match input.read_usize()? {
            0 => None,
            id if id <= stream_count => Some(id - 1),
            id => {
                return Err(NutError::malformed(format!(
                    "info for stream {} of {stream_count}",
                    id - 1
                )));
            }
        };
        let chapter_id = input.read_signed_value()?;
        let chapter_start = input.read_timestamp(time_base_count)?;
        let chapter_len = input.read_value()?;
        let items = read_items(input, time_base_count)?;

        let info = Self {
            stream_id,
            chapter_id,
            chapter_start,
            chapter_len,
            items,
        };
        trace!("{info:?}");

        Ok(info)
    }

    pub fn write<W: Write>(&self, out: &mut NutOutput<W>, time_base_count: usize) -> Result<()> {
        out.write_value(self.stream_id.map_or(0, |id| id as u64 + 1))?;
        out.write_signed_value(self.chapter_id)?;
        out.write_timestamp(self.chapter_start, time_base_count)?;
        out.write_value(self.chapter_len)?;
        write_items(out, &self.items, time_base_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::packet::{build_body, parse_body};

    #[test]
    fn all_value_kinds_round_trip() -> Result<()> {
        let info = Info {
            stream_id: Some(1),
            chapter_id: -2,
            chapter_start: GlobalTimestamp {
                time_base_id: 1,
                pts: 9000,
            },
            chapter_len: 45000,
            items: vec![
                DataItem::string("Title", "Überschrift"),
                DataItem::new("Disposition", DataValue::Integer(7)),
                DataItem::binary("Cover", "image/png", vec![0x89, b'P', b'N', b'G']),
                DataItem::new("Offset", DataValue::Signed(-12)),
                DataItem::new(
                    "Start",
                    DataValue::Timestamp(GlobalTimestamp {
                        time_base_id: 0,
                        pts: 42,
                    }),
                ),
                DataItem::new("Aspect", DataValue::Rational(Rational::new(-16, 9))),
            ],
        };

        let body = build_body(|out| info.write(out, 2))?;
        let read = parse_body(&body, "info packet", |input| Info::read(input, 2, 2))?;
        assert_eq!(read, info);
        Ok(())
    }

    #[test]
    fn global_info_has_no_stream() -> Result<()> {
        let info = Info::global(vec![DataItem::string("Encoder", "nutd")]);
        let body = build_body(|out| info.write(out, 1))?;
        assert_eq!(body[0], 0);
        let read = parse_body(&body, "info packet", |input| Info::read(input, 1, 1))?;
        assert_eq!(read.stream_id, None);
        Ok(())
    }

    #[test]
    fn stream_out_of_range() -> Result<()> {
        let info = Info {
            stream_id: Some(4),
            ..Default::default()
        };
        let body = build_body(|out| info.write(out, 1))?;
        let result = parse_body(&body, "info packet", |input| Info::read(input, 2, 1));
        assert!(matches!(result, Err(NutError::MalformedEncoding(_))));
        Ok(())
    }

    #[test]
    fn negative_integer_rejected() {
        let item = DataItem::new("Bad", DataValue::Integer(-1));
        assert!(build_body(|out| item.write(out, 1)).is_err());
    }
}
