//! Index packet written at the end of a file.
//!
//! ```text
//! max_pts                 t
//! syncpoints              v
//!   syncpoint_pos_div16   v   (delta to the previous position)
//! for each stream:
//!   x                     v   keyframe bitmap over the following syncpoints
//!   for each syncpoint with a keyframe:
//!     A                   v   (0: A v, B v for an end of record)
//! index_ptr               u64 (length of the whole index packet)
//! ```

use log::{debug, trace};

use crate::structs::packet::{build_body, packet_len, parse_body};
use crate::utils::errors::{NutError, Result};
use crate::utils::timing::GlobalTimestamp;

/// Largest keyframe bitmap written in a single `v`.
const BITMAP_CHUNK: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Index into [`Index::syncpoints`].
    pub syncpoint: usize,
    /// Pts of the first keyframe after that syncpoint.
    pub pts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Index {
    pub max_pts: GlobalTimestamp,
    /// Absolute syncpoint positions, multiples of 16.
    pub syncpoints: Vec<u64>,
    /// Keyframe entries per stream, ordered by syncpoint.
    pub keyframes: Vec<Vec<IndexEntry>>,
}

impl Index {
    pub fn parse(body: &[u8], stream_count: usize, time_base_count: usize) -> Result<Self> {
        if body.len() < 8 {
            return Err(NutError::malformed("index without index_ptr"));
        }
        let (content, ptr) = body.split_at(body.len() - 8);
        let mut index_ptr = [0u8; 8];
        index_ptr.copy_from_slice(ptr);
        let index_ptr = u64::from_be_bytes(index_ptr);
        if index_ptr != packet_len(body.len()) {
            debug!(
                "index_ptr {index_ptr} does not match the index length {}",
                packet_len(body.len())
            );
        }

        parse_body(content, "index", |input| {
            let max_pts = input.read_timestamp(time_base_count)?;

            let count = input.read_usize()?;
            let mut syncpoints = Vec::new();
            let mut last = 0u64;
            for _ in 0..count {
                let delta = input.read_value()?;
                if delta == 0 {
                    return Err(NutError::malformed("syncpoint positions not increasing"));
                }
                last = last
                    .checked_add(delta)
                    .filter(|&p| p <= u64::MAX / 16)
                    .ok_or_else(|| NutError::malformed("syncpoint position overflows"))?;
                syncpoints.push(last * 16);
            }

            let mut keyframes = Vec::new();
            for _ in 0..stream_count {
                let mut entries = Vec::new();
                let mut last_pts = -1i64;
                let mut j = 0;

                while j < count {
                    let mut x = input.read_value()?;
                    let has_keyframe = if x & 1 != 0 {
                        x >>= 1;
                        let flag = x & 1 != 0;
                        x >>= 1;
                        if x > (count - j) as u64 {
                            return Err(NutError::malformed("keyframe run exceeds syncpoints"));
                        }
                        let mut run = vec![flag; x as usize];
                        run.push(!flag);
                        run
                    } else {
                        x >>= 1;
                        let mut bits = Vec::new();
                        while x > 1 {
                            bits.push(x & 1 != 0);
                            x >>= 1;
                        }
                        if bits.is_empty() {
                            return Err(NutError::malformed("empty keyframe bitmap"));
                        }
                        bits
                    };

                    let n = (j + has_keyframe.len()).min(count);
                    for (syncpoint, _) in (j..n).zip(&has_keyframe).filter(|(_, has)| **has) {
                        let mut a = input.read_value()?;
                        let mut b = 0;
                        if a == 0 {
                            a = input.read_value()?;
                            b = input.read_value()?;
                        }
                        let pts = i64::try_from(a)
                            .ok()
                            .and_then(|a| last_pts.checked_add(a))
                            .ok_or_else(|| NutError::malformed("keyframe pts overflows"))?;
                        last_pts = i64::try_from(b)
                            .ok()
                            .and_then(|b| pts.checked_add(b))
                            .ok_or_else(|| NutError::malformed("keyframe pts overflows"))?;
                        entries.push(IndexEntry { syncpoint, pts });
                    }
                    j = n;
                }

                keyframes.push(entries);
            }

            let index = Self {
                max_pts,
                syncpoints,
                keyframes,
            };
            trace!("{index:?}");
            Ok(index)
        })
    }

    pub fn serialize(&self, time_base_count: usize) -> Result<Vec<u8>> {
        let mut body = build_body(|out| {
            out.write_timestamp(self.max_pts, time_base_count)?;

            out.write_value(self.syncpoints.len() as u64)?;
            let mut last = 0u64;
            for &position in &self.syncpoints {
                let div16 = position / 16;
                if div16 <= last {
                    return Err(NutError::malformed("syncpoint positions not increasing"));
                }
                out.write_value(div16 - last)?;
                last = div16;
            }

            let count = self.syncpoints.len();
            for entries in &self.keyframes {
                let mut pts_by_syncpoint = vec![None; count];
                for entry in entries {
                    let slot = pts_by_syncpoint
                        .get_mut(entry.syncpoint)
                        .ok_or_else(|| NutError::malformed("index entry without syncpoint"))?;
                    *slot = Some(entry.pts);
                }

                let mut last_pts = -1i64;
                for chunk in pts_by_syncpoint.chunks(BITMAP_CHUNK) {
                    let bitmap = chunk
                        .iter()
                        .enumerate()
                        .filter(|(_, pts)| pts.is_some())
                        .fold(1u64 << chunk.len(), |x, (i, _)| x | 1 << i);
                    out.write_value(bitmap << 1)?;

                    for &pts in chunk.iter().flatten() {
                        if pts <= last_pts {
                            return Err(NutError::malformed("index keyframes not increasing"));
                        }
                        out.write_value(pts.abs_diff(last_pts))?;
                        last_pts = pts;
                    }
                }
            }
            Ok(())
        })?;

        let index_ptr = packet_len(body.len() + 8);
        body.extend_from_slice(&index_ptr.to_be_bytes());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index(syncpoints: usize) -> Index {
        let positions: Vec<u64> = (0..syncpoints as u64).map(|i| 16 + i * 4096).collect();
        let video = (0..syncpoints)
            .filter(|i| i % 3 == 0)
            .map(|i| IndexEntry {
                syncpoint: i,
                pts: i as i64 * 25,
            })
            .collect();
        let audio = (0..syncpoints)
            .map(|i| IndexEntry {
                syncpoint: i,
                pts: i as i64 * 48000 + 7,
            })
            .collect();

        Index {
            max_pts: GlobalTimestamp {
                time_base_id: 1,
                pts: syncpoints as u64 * 48000,
            },
            syncpoints: positions,
            keyframes: vec![video, audio, Vec::new()],
        }
    }

    #[test]
    fn index_round_trip() -> Result<()> {
        for count in [0, 1, 31, 32, 33, 100] {
            let index = sample_index(count);
            let body = index.serialize(2)?;
            assert_eq!(Index::parse(&body, 3, 2)?, index);
        }
        Ok(())
    }

    #[test]
    fn index_ptr_is_packet_length() -> anyhow::Result<()> {
        let body = sample_index(10).serialize(2)?;
        let ptr = u64::from_be_bytes(body[body.len() - 8..].try_into()?);
        assert_eq!(ptr, packet_len(body.len()));
        Ok(())
    }

    #[test]
    fn run_length_bitmaps() -> Result<()> {
        use crate::structs::packet::build_body;

        // Three syncpoints, stream 0: keyframes at 0 and 1 (run of two
        // flagged, then one unflagged).
        let body = build_body(|out| {
            out.write_value(0)?;
            out.write_value(3)?;
            for _ in 0..3 {
                out.write_value(1)?;
            }
            out.write_value(1 | 2 | 2 << 2)?;
            out.write_value(11)?;
            out.write_value(5)?;
            out.write_u64(0)
        })?;

        let index = Index::parse(&body, 1, 1)?;
        assert_eq!(index.syncpoints, [16, 32, 48]);
        assert_eq!(
            index.keyframes[0],
            [
                IndexEntry { syncpoint: 0, pts: 10 },
                IndexEntry { syncpoint: 1, pts: 15 }
            ]
        );
        Ok(())
    }

    #[test]
    fn zero_position_delta_is_malformed() -> Result<()> {
        use crate::structs::packet::build_body;

        let body = build_body(|out| {
            out.write_value(0)?;
            out.write_value(2)?;
            out.write_value(1)?;
            out.write_value(0)?;
            out.write_u64(0)
        })?;
        assert!(matches!(
            Index::parse(&body, 1, 1),
            Err(NutError::MalformedEncoding(_))
        ));
        Ok(())
    }
}
