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

use crate::api::ConnTime;
use crate::packet::chunk::Chunk;
use crate::packet::rst_frame::RST_STREAM_FRAME_LEN;
use crate::packet::rst_frame::RstStreamFrame;
use crate::packet::stream_frame;
use crate::streams::StreamTable;
use crate::types::ErrorCode;
use crate::types::KeyPhase;
use crate::types::PacketNumber;
#[cfg(not(test))]
use log::info;
use std::cmp::min;
#[cfg(test)]
use std::println as info;

/// Transmission metadata applied to every chunk packed into one datagram. All chunks of a datagram
/// share the packet number the protection layer will put on it.
pub(crate) struct TransmitStamp {
    pub packet_number: PacketNumber,
    pub now: ConnTime,
    pub key_phase: KeyPhase,
}

/// Lays chunks from the unwritten queue out into `buf` as frames, moving each packed chunk onto
/// the unacked queue, and returns the number of payload bytes produced.
///
/// The queue is walked in insertion order. A chunk larger than the remaining data budget is split:
/// the head is truncated (losing its FIN) and packed, the tail is reinserted right behind it and
/// picked up by the next flush pass. Packing also stops when a frame header no longer fits, or
/// when the peer's advertised flow-control limits leave no room for a single data byte; that is
/// back-pressure, not an error.
///
/// With `just_zero` set only stream-0 chunks are considered, which is how handshake cleartext
/// packets are built before 1-RTT keys exist.
pub(crate) fn create_stream_frames(
    table: &mut StreamTable,
    buf: &mut [u8],
    stamp: &TransmitStamp,
    just_zero: bool,
) -> usize {
    let mut written = 0;
    let mut idx = 0;
    while idx < table.unwritten.len() {
        let room = buf.len() - written;
        let chunk = &table.unwritten[idx];
        if just_zero && !chunk.stream_id.is_handshake() {
            idx += 1;
            continue;
        }

        let mut did_split = false;
        if chunk.rst {
            if room < RST_STREAM_FRAME_LEN {
                break;
            }
            let frame = RstStreamFrame {
                stream_id: chunk.stream_id,
                error_code: chunk.error_code,
                final_offset: chunk.offset,
            };
            frame.serialize_to(&mut buf[written..]);
            written += RST_STREAM_FRAME_LEN;
        } else {
            let header = stream_frame::header_len(chunk.stream_id, chunk.offset);
            // No room for the header and at least one data byte.
            if room < header + 1 {
                break;
            }
            let budget = data_budget(table, idx, room - header);
            // A bare FIN carries no bytes and passes even an exhausted window.
            if budget == 0 && table.unwritten[idx].len > 0 {
                break;
            }
            if budget < table.unwritten[idx].len {
                split_chunk(table, idx, budget);
                did_split = true;
            }

            let chunk = &table.unwritten[idx];
            let n = stream_frame::write_header(
                &mut buf[written..],
                chunk.stream_id,
                chunk.offset,
                chunk.len as u16,
                chunk.fin,
            );
            buf[written + n..written + n + chunk.len].copy_from_slice(&chunk.data);
            written += n + chunk.len;
            info!(
                "writing a stream {} frame {} @ offset {} [fin={}] in packet {}",
                chunk.stream_id, chunk.len, chunk.offset, chunk.fin, stamp.packet_number
            );
        }

        let mut chunk = table.unwritten.remove(idx).expect("chunk exists at cursor");
        chunk.packet_number = stamp.packet_number;
        chunk.transmit_time = stamp.now;
        chunk.transmit_count += 1;
        chunk.transmit_key_phase = stamp.key_phase;
        chunk.retransmitted = false;
        if !chunk.rst {
            note_flow_credit(table, &chunk);
        }
        table.unacked.push_back(chunk);

        if did_split {
            // The split tail is retried on the next flush pass, never in this datagram.
            break;
        }
    }
    written
}

/// Largest number of data bytes the chunk at `idx` may put on the wire, bounded by the room left
/// in the datagram, the peer's per-stream window, and the connection-wide window. Retransmitted
/// byte ranges are free: only bytes beyond the stream's high-water mark consume connection credit.
fn data_budget(table: &StreamTable, idx: usize, data_room: usize) -> usize {
    let chunk = &table.unwritten[idx];
    let stream_allow = table.peer_max_stream_data.saturating_sub(chunk.offset);
    let already_sent = match table.stream(chunk.stream_id) {
        Some(stream) => stream.largest_sent().saturating_sub(chunk.offset),
        // The stream is gone; whatever is left in the queues was accounted when first sent.
        None => u64::MAX,
    };
    let conn_allow = already_sent
        .saturating_add(table.peer_max_data.saturating_sub(table.conn_bytes_sent));
    min(data_room as u64, min(stream_allow, conn_allow)) as usize
}

/// Splits the chunk at `idx` so that at most `budget` bytes remain in it. The tail keeps the FIN
/// flag and the adjusted offset and is inserted immediately after the head.
fn split_chunk(table: &mut StreamTable, idx: usize, budget: usize) {
    let chunk = &mut table.unwritten[idx];
    let tail_data = chunk.data.split_off(budget);
    let tail = Chunk {
        stream_id: chunk.stream_id,
        offset: chunk.offset + budget as u64,
        len: tail_data.len(),
        data: tail_data,
        fin: chunk.fin,
        rst: false,
        error_code: ErrorCode(0),
        packet_number: PacketNumber(0),
        transmit_time: ConnTime::zero(),
        transmit_count: 0,
        transmit_key_phase: KeyPhase::Unprotected,
        retransmitted: false,
    };
    chunk.len = budget;
    chunk.fin = false;
    table.unwritten.insert(idx + 1, tail);
}

fn note_flow_credit(table: &mut StreamTable, chunk: &Chunk) {
    let end = chunk.offset + chunk.len as u64;
    if let Some(stream) = table.stream_mut(chunk.stream_id) {
        let newly_sent = end.saturating_sub(stream.largest_sent());
        stream.note_sent(end);
        table.conn_bytes_sent += newly_sent;
    }
}
