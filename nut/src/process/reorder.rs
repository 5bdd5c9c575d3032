use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::warn;

use crate::structs::frame::NutFrame;
use crate::utils::errors::Result;
use crate::utils::rational::Rational;
use crate::utils::timing::MediaTime;

#[derive(Debug)]
struct Pending {
    time: MediaTime,
    millis: i64,
    seq: u64,
    frame: NutFrame,
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; the earliest frame must come out first.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

/// Time ordered queue interleaving the frames of several streams.
///
/// A frame leaves the buffer once every stream has progressed at least to
/// its timestamp, or once the newest frame seen is more than the window
/// ahead of it. Frames are ordered exactly across time bases; the window is
/// measured in milliseconds.
///
/// Output is only guaranteed to be ordered if no producer lags more than the
/// window behind the others. A frame arriving later than that is still
/// emitted, after a warning.
#[derive(Debug)]
pub struct ReorderBuffer {
    heap: BinaryHeap<Pending>,
    progress: Vec<Option<MediaTime>>,
    window_ms: u64,
    latest_ms: Option<i64>,
    seq: u64,
    last_emitted: Option<MediaTime>,
}

impl ReorderBuffer {
    pub fn new(stream_count: usize, window_ms: u64) -> Self {
        Self {
            heap: BinaryHeap::new(),
            progress: vec![None; stream_count],
            window_ms,
            latest_ms: None,
            seq: 0,
            last_emitted: None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn push(&mut self, frame: NutFrame, time_base: Rational) -> Result<()> {
        let time = MediaTime::new(frame.pts, time_base);
        let millis = time.millis()?;

        if let Some(progress) = self.progress.get_mut(frame.stream_id) {
            *progress = Some(progress.map_or(time, |p| p.max(time)));
        }
        self.latest_ms = Some(self.latest_ms.map_or(millis, |l| l.max(millis)));

        self.heap.push(Pending {
            time,
            millis,
            seq: self.seq,
            frame,
        });
        self.seq += 1;

        Ok(())
    }

    fn is_ready(&self, head: &Pending) -> bool {
        let caught_up = self
            .progress
            .iter()
            .all(|p| p.is_some_and(|p| p >= head.time));
        let expired = self
            .latest_ms
            .is_some_and(|latest| latest.saturating_sub(head.millis) as i128 > self.window_ms as i128);

        caught_up || expired
    }

    /// Next frame that can no longer be preceded by a frame still to come.
    pub fn pop_ready(&mut self) -> Option<NutFrame> {
        if !self.is_ready(self.heap.peek()?) {
            return None;
        }
        self.pop()
    }

    /// Next frame in time order regardless of the window.
    pub fn pop(&mut self) -> Option<NutFrame> {
        let pending = self.heap.pop()?;

        if let Some(last) = self.last_emitted {
            if pending.time < last {
                warn!(
                    "Stream {} frame at {} ms emitted out of order, reorder window of {} ms exceeded",
                    pending.frame.stream_id, pending.millis, self.window_ms
                );
            }
        }
        self.last_emitted = Some(self.last_emitted.map_or(pending.time, |l| l.max(pending.time)));

        Some(pending.frame)
    }
}
