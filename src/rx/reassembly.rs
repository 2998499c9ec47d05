// Copyright 2025 The quicmux Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp::min;
use std::collections::BTreeMap;
use thiserror::Error;

/// A fatal inconsistency in the inbound byte sequence. These tear the connection down.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum ReassemblyError {
    #[error("Stream data extends beyond the final offset")]
    DataBeyondFin,

    #[error("A second FIN named a different final offset")]
    ConflictingFin,
}

/// Receive-side reassembly of one stream.
///
/// Inbound chunks arrive at arbitrary offsets and may duplicate or overlap each other; only the
/// bytes that extend the known coverage are stored. Segments are keyed by offset and never
/// overlap. Bytes below `read_offset` have been consumed and their segments discarded.
pub(crate) struct ReassemblyBuffer {
    segments: BTreeMap<u64, Vec<u8>>,
    read_offset: u64,
    fin_offset: Option<u64>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self { segments: BTreeMap::new(), read_offset: 0, fin_offset: None }
    }

    /// Number of contiguous bytes readable at `read_offset`.
    pub fn available(&self) -> usize {
        let mut cur = self.read_offset;
        for (&off, seg) in &self.segments {
            if off > cur {
                break;
            }
            cur = cur.max(off + seg.len() as u64);
        }
        (cur - self.read_offset) as usize
    }

    pub fn empty(&self) -> bool {
        self.available() == 0
    }

    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    pub fn fin_offset(&self) -> Option<u64> {
        self.fin_offset
    }

    /// True once the FIN offset is known and every byte up to it has been consumed.
    pub fn drained(&self) -> bool {
        self.fin_offset == Some(self.read_offset)
    }

    /// Delivers one inbound chunk. Returns whether at least one byte became newly readable.
    ///
    /// Bytes already present are kept; only bytes extending the covered region are stored, and an
    /// exact duplicate is silently discarded.
    pub fn supply(&mut self, offset: u64, data: &[u8], fin: bool) -> Result<bool, ReassemblyError> {
        let end = offset + data.len() as u64;

        if fin {
            match self.fin_offset {
                Some(f) if f != end => return Err(ReassemblyError::ConflictingFin),
                _ => {}
            }
            if self.read_offset > end || self.highest_known() > end {
                return Err(ReassemblyError::DataBeyondFin);
            }
            self.fin_offset = Some(end);
        } else if let Some(f) = self.fin_offset {
            if end > f {
                return Err(ReassemblyError::DataBeyondFin);
            }
        }

        let before = self.available();
        self.insert_uncovered(offset, data);
        Ok(self.available() > before)
    }

    fn highest_known(&self) -> u64 {
        self.segments
            .iter()
            .next_back()
            .map(|(&off, seg)| off + seg.len() as u64)
            .unwrap_or(self.read_offset)
    }

    /// Stores the pieces of `data` not already covered by consumed bytes or stored segments.
    fn insert_uncovered(&mut self, offset: u64, data: &[u8]) {
        let end = offset + data.len() as u64;
        let mut cur = offset.max(self.read_offset);
        while cur < end {
            if let Some((&off, seg)) = self.segments.range(..=cur).next_back() {
                let seg_end = off + seg.len() as u64;
                if seg_end > cur {
                    cur = seg_end;
                    continue;
                }
            }
            let piece_end = match self.segments.range(cur..).next() {
                Some((&next_off, _)) => min(end, next_off),
                None => end,
            };
            let piece = data[(cur - offset) as usize..(piece_end - offset) as usize].to_vec();
            self.segments.insert(cur, piece);
            cur = piece_end;
        }
    }

    /// Copies up to `dst.len()` contiguous bytes into `dst`, advancing `read_offset`. The second
    /// return value is true iff the new read offset is the stream's final offset.
    pub fn read(&mut self, dst: &mut [u8]) -> (usize, bool) {
        let mut n = 0;
        while n < dst.len() {
            let cur = self.read_offset;
            let Some((&off, seg)) = self.segments.range(..=cur).next_back() else {
                break;
            };
            let seg_end = off + seg.len() as u64;
            if seg_end <= cur {
                break;
            }
            let start = (cur - off) as usize;
            let take = min(dst.len() - n, seg.len() - start);
            dst[n..n + take].copy_from_slice(&seg[start..start + take]);
            n += take;
            self.read_offset += take as u64;
            if self.read_offset >= seg_end {
                self.segments.remove(&off);
            }
        }
        (n, self.drained())
    }

    /// Drops all buffered bytes. Used when the peer resets its sending side.
    pub fn discard(&mut self) {
        self.segments.clear();
        self.fin_offset = Some(self.read_offset);
    }
}
