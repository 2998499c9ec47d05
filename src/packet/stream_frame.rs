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

use crate::api::StreamId;
use crate::packet::FRAME_TYPE_STREAM_MASK;
use crate::packet::FrameParseError;
use crate::packet::read_u16_be;
use crate::packet::write_u16_be;
use anyhow::Result;
use anyhow::ensure;
use std::fmt;

/// STREAM frame
///
/// The type byte has the shape `1 1 F S S O O D` (MSB first):
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-+-+-+-+-+-+-+-+
/// |1 1|F| SS| OO|D|
/// +-+-+-+-+-+-+-+-+
/// ```
///
/// `F` is the FIN bit, `SS` encodes the stream-ID width in bytes minus one, `OO` encodes the
/// offset width (0, 2, 4 or 8 bytes; width 0 means offset 0), and `D` marks an explicit 16-bit
/// data length, which this implementation always writes. Stream ID and offset follow in network
/// byte order, left-truncated to their encoded widths, then the data length and the data.
#[derive(Debug, PartialEq)]
pub(crate) struct StreamFrame<'a> {
    pub stream_id: StreamId,
    pub offset: u64,
    pub fin: bool,
    pub data: &'a [u8],
}

const FIN_BIT: u8 = 0x20;
const DATA_LENGTH_BIT: u8 = 0x01;

/// Smallest number of bytes that can hold `id`, capped at 4.
pub(crate) fn stream_id_len(id: StreamId) -> usize {
    match id.0 {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    }
}

/// Encoded width of `offset`. Width 0 is reserved for exactly offset zero; non-zero offsets below
/// 2^16 take two bytes, there is no one-byte encoding.
pub(crate) fn offset_len(offset: u64) -> usize {
    match offset {
        0 => 0,
        1..=0xffff => 2,
        0x1_0000..=0xffff_ffff => 4,
        _ => 8,
    }
}

fn offset_size_type(len: usize) -> u8 {
    match len {
        0 => 0,
        2 => 1,
        4 => 2,
        _ => 3,
    }
}

/// Size of the frame header (type byte, stream ID, offset, data length) for the given placement.
pub(crate) fn header_len(stream_id: StreamId, offset: u64) -> usize {
    1 + stream_id_len(stream_id) + offset_len(offset) + 2
}

/// Writes the frame header into `buf` and returns its length. The caller appends `data_len` bytes
/// of stream data directly after it.
pub(crate) fn write_header(
    buf: &mut [u8],
    stream_id: StreamId,
    offset: u64,
    data_len: u16,
    fin: bool,
) -> usize {
    let id_len = stream_id_len(stream_id);
    let off_len = offset_len(offset);

    let mut type_byte = FRAME_TYPE_STREAM_MASK | DATA_LENGTH_BIT;
    type_byte |= ((id_len - 1) as u8) << 3;
    type_byte |= offset_size_type(off_len) << 1;
    if fin {
        type_byte |= FIN_BIT;
    }
    buf[0] = type_byte;

    let mut at = 1;
    buf[at..at + id_len].copy_from_slice(&stream_id.0.to_be_bytes()[4 - id_len..]);
    at += id_len;
    if off_len > 0 {
        buf[at..at + off_len].copy_from_slice(&offset.to_be_bytes()[8 - off_len..]);
        at += off_len;
    }
    write_u16_be!(&mut buf[at..], data_len);
    at + 2
}

/// Encodes a complete frame. The packer writes frames in place; this is for tests and loopbacks.
#[cfg(test)]
pub(crate) fn encode(stream_id: StreamId, offset: u64, data: &[u8], fin: bool) -> Vec<u8> {
    let mut buf = vec![0u8; header_len(stream_id, offset) + data.len()];
    let n = write_header(&mut buf, stream_id, offset, data.len() as u16, fin);
    buf[n..].copy_from_slice(data);
    buf
}

/// Parses one stream frame from the start of `buf`, returning the descriptor and the number of
/// bytes consumed.
pub(crate) fn parse(buf: &[u8]) -> Result<(StreamFrame<'_>, usize)> {
    ensure!(!buf.is_empty(), FrameParseError::Truncated);
    let type_byte = buf[0];
    ensure!(
        (type_byte & FRAME_TYPE_STREAM_MASK) == FRAME_TYPE_STREAM_MASK,
        FrameParseError::UnknownType
    );
    ensure!((type_byte & DATA_LENGTH_BIT) != 0, FrameParseError::MissingDataLength);

    let fin = (type_byte & FIN_BIT) != 0;
    let id_len = ((type_byte >> 3) & 0x3) as usize + 1;
    let off_len = [0usize, 2, 4, 8][((type_byte >> 1) & 0x3) as usize];

    let mut at = 1;
    ensure!(buf.len() >= at + id_len + off_len + 2, FrameParseError::Truncated);

    let mut id_bytes = [0u8; 4];
    id_bytes[4 - id_len..].copy_from_slice(&buf[at..at + id_len]);
    let stream_id = StreamId(u32::from_be_bytes(id_bytes));
    at += id_len;

    let mut off_bytes = [0u8; 8];
    off_bytes[8 - off_len..].copy_from_slice(&buf[at..at + off_len]);
    let offset = u64::from_be_bytes(off_bytes);
    at += off_len;

    let data_len = read_u16_be!(&buf[at..]) as usize;
    at += 2;
    ensure!(buf.len() >= at + data_len, FrameParseError::Truncated);

    Ok((StreamFrame { stream_id, offset, fin, data: &buf[at..at + data_len] }, at + data_len))
}

impl fmt::Display for StreamFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "STREAM, sid={}, offset={}, length={}, fin={}",
            self.stream_id,
            self.offset,
            self.data.len(),
            self.fin
        )
    }
}
