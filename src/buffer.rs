// Segmented byte storage that a trial draws its entropy from.
//
// A buffer is a chain of segments read front to back through a single
// cursor. More segments can be appended while a trial is running, and a
// single segment can be stashed away and restored again so that a shrinker
// can observe a run without those bytes.

use crate::error::{Draw, DrawError, UsageError};

use std::io::{self, Read, Write};

/// Buffer-local identity of an appended segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(u64);

/// A fixed-capacity block of bytes. Bytes in `[0, limit)` are readable;
/// the limit doubles as the write cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    bytes: Vec<u8>,
    limit: usize,
}

impl Segment {
    pub fn with_capacity(capacity: usize) -> Segment {
        Segment {
            bytes: vec![0; capacity],
            limit: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.limit == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.limit]
    }

    pub fn push(&mut self, byte: u8) -> Draw<()> {
        if self.limit == self.capacity() {
            return Err(UsageError::SegmentFull {
                capacity: self.capacity(),
            }
            .into());
        }
        self.bytes[self.limit] = byte;
        self.limit += 1;
        Ok(())
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Draw<()> {
        let end = self.limit + bytes.len();
        if end > self.capacity() {
            return Err(UsageError::SegmentFull {
                capacity: self.capacity(),
            }
            .into());
        }
        self.bytes[self.limit..end].copy_from_slice(bytes);
        self.limit = end;
        Ok(())
    }
}

impl From<Vec<u8>> for Segment {
    fn from(bytes: Vec<u8>) -> Segment {
        let limit = bytes.len();
        Segment { bytes, limit }
    }
}

impl From<&[u8]> for Segment {
    fn from(bytes: &[u8]) -> Segment {
        Segment::from(bytes.to_vec())
    }
}

/// Position of the read cursor: a segment index and an offset into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub segment: usize,
    pub offset: usize,
}

#[derive(Debug, Clone)]
struct Stashed {
    index: usize,
    id: SegmentId,
    segment: Segment,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentedBuffer {
    segments: Vec<(SegmentId, Segment)>,
    cursor: Cursor,
    mark: Option<Cursor>,
    stashed: Option<Stashed>,
    next_id: u64,
}

impl SegmentedBuffer {
    pub fn new() -> SegmentedBuffer {
        SegmentedBuffer::default()
    }

    /// A buffer holding `bytes` as a single segment.
    pub fn from_bytes(bytes: Vec<u8>) -> SegmentedBuffer {
        let mut buffer = SegmentedBuffer::new();
        buffer.append(Segment::from(bytes));
        buffer
    }

    /// Reads a persisted buffer back. The persisted form has no header, so the
    /// whole stream becomes a single segment.
    pub fn read_from<R: Read>(mut reader: R) -> io::Result<SegmentedBuffer> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(SegmentedBuffer::from_bytes(bytes))
    }

    /// Adds a segment to the tail without moving the cursor.
    pub fn append(&mut self, segment: Segment) -> SegmentId {
        let id = SegmentId(self.next_id);
        self.next_id += 1;
        self.segments.push((id, segment));
        id
    }

    pub fn segments(&self) -> impl Iterator<Item = (SegmentId, &Segment)> + '_ {
        self.segments.iter().map(|(id, segment)| (*id, segment))
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Total readable bytes across all active segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|(_, s)| s.limit()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Global byte offset of the cursor.
    pub fn position(&self) -> u64 {
        let before: usize = self
            .segments
            .iter()
            .take(self.cursor.segment)
            .map(|(_, s)| s.limit())
            .sum();
        (before + self.cursor.offset) as u64
    }

    pub fn remaining(&self) -> usize {
        self.segments
            .iter()
            .skip(self.cursor.segment)
            .map(|(_, s)| s.limit())
            .sum::<usize>()
            - self.cursor.offset
    }

    pub fn read_byte(&mut self) -> Draw<u8> {
        loop {
            let segment = match self.segments.get(self.cursor.segment) {
                Some((_, segment)) => segment,
                None => return Err(DrawError::Overrun { needed: 1 }),
            };
            if self.cursor.offset < segment.limit() {
                let byte = segment.bytes[self.cursor.offset];
                self.cursor.offset += 1;
                return Ok(byte);
            }
            if self.cursor.segment + 1 < self.segments.len() {
                self.cursor = Cursor {
                    segment: self.cursor.segment + 1,
                    offset: 0,
                };
            } else {
                return Err(DrawError::Overrun { needed: 1 });
            }
        }
    }

    /// Fills `out` from the cursor. Either all bytes are read or, on Overrun,
    /// none are and the cursor is left where it was.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Draw<()> {
        let remaining = self.remaining();
        if remaining < out.len() {
            return Err(DrawError::Overrun {
                needed: out.len() - remaining,
            });
        }
        for slot in out.iter_mut() {
            *slot = self.read_byte()?;
        }
        Ok(())
    }

    pub fn mark(&mut self) {
        self.mark = Some(self.cursor);
    }

    pub fn reset_to_mark(&mut self) -> Draw<()> {
        match self.mark {
            Some(mark) => {
                self.cursor = mark;
                Ok(())
            }
            None => Err(DrawError::Usage(UsageError::NoMark)),
        }
    }

    /// Moves the cursor back to the first byte and forgets the mark.
    pub fn rewind(&mut self) {
        self.cursor = Cursor::default();
        self.mark = None;
    }

    /// Removes a segment from the active chain until `unstash` is called.
    ///
    /// Neither the cursor nor the mark may point past the start of the
    /// segment, including its end once it has been read in full.
    pub fn stash(&mut self, id: SegmentId) -> Draw<()> {
        if self.stashed.is_some() {
            return Err(DrawError::Usage(UsageError::StashPending));
        }
        let index = self
            .segments
            .iter()
            .position(|(candidate, _)| *candidate == id)
            .ok_or(UsageError::UnknownSegment(id))?;
        // a cursor or mark at (index, 0) has not reached the segment yet and
        // stays valid once it is removed; any later offset would not
        if points_into(self.cursor, index) {
            return Err(DrawError::Usage(UsageError::StashAlreadyRead(id)));
        }
        if self.mark.map_or(false, |mark| points_into(mark, index)) {
            return Err(DrawError::Usage(UsageError::StashUnderMark(id)));
        }

        let (_, segment) = self.segments.remove(index);
        self.cursor = shift_removed(self.cursor, index);
        self.mark = self.mark.map(|mark| shift_removed(mark, index));
        self.stashed = Some(Stashed { index, id, segment });
        Ok(())
    }

    /// Puts the stashed segment back at its original index.
    pub fn unstash(&mut self) -> Draw<()> {
        let Stashed { index, id, segment } =
            self.stashed.take().ok_or(UsageError::NothingStashed)?;
        self.segments.insert(index, (id, segment));
        self.cursor = shift_inserted(self.cursor, index);
        self.mark = self.mark.map(|mark| shift_inserted(mark, index));
        Ok(())
    }

    /// Drops the stashed segment for good.
    pub fn discard_stash(&mut self) -> Option<Segment> {
        self.stashed.take().map(|stashed| stashed.segment)
    }

    pub fn has_stash(&self) -> bool {
        self.stashed.is_some()
    }

    /// The canonical serialized form: every active segment up to its limit.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for (_, segment) in &self.segments {
            out.extend_from_slice(segment.as_bytes());
        }
        out
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for (_, segment) in &self.segments {
            writer.write_all(segment.as_bytes())?;
        }
        writer.flush()
    }
}

fn points_into(cursor: Cursor, index: usize) -> bool {
    cursor.segment == index && cursor.offset > 0
}

fn shift_removed(cursor: Cursor, index: usize) -> Cursor {
    if cursor.segment > index {
        Cursor {
            segment: cursor.segment - 1,
            offset: cursor.offset,
        }
    } else {
        cursor
    }
}

fn shift_inserted(cursor: Cursor, index: usize) -> Cursor {
    if cursor.segment > index || (cursor.segment == index && cursor.offset > 0) {
        Cursor {
            segment: cursor.segment + 1,
            offset: cursor.offset,
        }
    } else {
        cursor
    }
}
