// Suppliers of fresh entropy for a running trial.
//
// A Source that runs out of bytes asks its provider for another segment
// before giving up with an Overrun. Replays use `NoEntropy`, so a replayed
// trial can only ever see the bytes it was given.

use crate::buffer::Segment;

use log::trace;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub trait EntropyProvider {
    /// Returns a segment holding at least `min_len` bytes, or `None` if no
    /// more entropy is available.
    fn next_segment(&mut self, min_len: usize) -> Option<Segment>;
}

/// Never supplies anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEntropy;

impl EntropyProvider for NoEntropy {
    fn next_segment(&mut self, _min_len: usize) -> Option<Segment> {
        None
    }
}

/// Deterministic stream for trial `trial` of seed `seed`.
#[derive(Debug, Clone)]
pub struct SeededEntropy {
    rng: ChaCha8Rng,
    block_size: usize,
    supplied: usize,
}

impl SeededEntropy {
    pub fn new(seed: u64, trial: u64, block_size: usize) -> SeededEntropy {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(trial);
        SeededEntropy {
            rng,
            block_size: block_size.max(1),
            supplied: 0,
        }
    }

    /// Bytes handed out so far.
    pub fn supplied(&self) -> usize {
        self.supplied
    }
}

impl EntropyProvider for SeededEntropy {
    fn next_segment(&mut self, min_len: usize) -> Option<Segment> {
        let len = self.block_size.max(min_len);
        let mut bytes = vec![0; len];
        self.rng.fill_bytes(&mut bytes);
        self.supplied += len;
        trace!(
            "supplying {} byte segment ({} bytes supplied in total)",
            len,
            self.supplied
        );
        Some(Segment::from(bytes))
    }
}

/// Hands out a fixed list of segments in order, then nothing.
#[derive(Debug, Clone, Default)]
pub struct QueuedEntropy {
    segments: std::collections::VecDeque<Segment>,
}

impl QueuedEntropy {
    pub fn new(segments: impl IntoIterator<Item = Segment>) -> QueuedEntropy {
        QueuedEntropy {
            segments: segments.into_iter().collect(),
        }
    }
}

impl EntropyProvider for QueuedEntropy {
    fn next_segment(&mut self, min_len: usize) -> Option<Segment> {
        let segment = self.segments.pop_front()?;
        if segment.limit() < min_len {
            trace!(
                "queued segment of {} bytes is shorter than the {} required",
                segment.limit(),
                min_len
            );
        }
        Some(segment)
    }
}
