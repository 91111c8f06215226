// Newline-delimited frame assembly
//
// Turns an arbitrarily chunked byte stream into complete frames. A frame is the
// text preceding a `\n`, with surrounding whitespace trimmed. The unterminated
// tail is held until more bytes arrive or the assembler is reset.

use bytes::{Bytes, BytesMut};

/// Default initial capacity of the accumulator, matching the default read size
pub const DEFAULT_ACCUMULATOR_CAPACITY: usize = 16 * 1024;

const FRAME_DELIMITER: u8 = b'\n';

/// Stateful splitter from raw bytes to complete frames
///
/// Splitting happens on bytes, before any UTF-8 decoding, so a multi-byte
/// character cut in half by a read boundary is reassembled intact.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    /// Leading bytes of `buffer` already known not to contain a delimiter
    scanned: usize,
    initial_capacity: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ACCUMULATOR_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            scanned: 0,
            initial_capacity: capacity,
        }
    }

    /// Append a chunk and return the frames it completes, oldest first
    ///
    /// The returned iterator is lazy. Frames it does not yield before being
    /// dropped stay buffered and come out first on the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(bytes);
        Frames { assembler: self }
    }

    /// Discard any partial frame and release the accumulator
    ///
    /// A fresh buffer is allocated so nothing from the previous connection can
    /// be spliced onto bytes from the next one.
    pub fn reset(&mut self) {
        self.buffer = BytesMut::with_capacity(self.initial_capacity);
        self.scanned = 0;
    }

    /// Bytes of the current unterminated frame
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            let offset = self.buffer[self.scanned..]
                .iter()
                .position(|&b| b == FRAME_DELIMITER);

            let Some(offset) = offset else {
                self.scanned = self.buffer.len();
                return None;
            };

            let end = self.scanned + offset;
            let mut line = self.buffer.split_to(end + 1);
            line.truncate(end);
            self.scanned = 0;

            let frame = trim(line.freeze());
            if !frame.is_empty() {
                return Some(frame);
            }
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames completed by one [`FrameAssembler::feed`] call
pub struct Frames<'a> {
    assembler: &'a mut FrameAssembler,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        self.assembler.next_frame()
    }
}

fn trim(frame: Bytes) -> Bytes {
    let start = frame
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(frame.len());
    let end = frame
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    frame.slice(start..end)
}
