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
use crate::api::StreamId;
use crate::types::ErrorCode;
use crate::types::KeyPhase;
use crate::types::PacketNumber;

/// A slice of stream bytes queued for transmission, and the atomic element of the two outbound
/// reliability queues.
///
/// The payload and its placement (`stream_id`, `offset`, `fin`) are fixed at construction; the
/// remaining fields are transmission bookkeeping stamped by the frame packer. `len` is kept
/// separately from `data` because a chunk whose buffer has been stolen for a retransmission stays
/// on the unacked queue, length intact, purely for round-trip timing.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub stream_id: StreamId,
    pub offset: u64,
    pub data: Vec<u8>,
    pub len: usize,
    pub fin: bool,
    pub rst: bool,
    pub error_code: ErrorCode,
    pub packet_number: PacketNumber,
    pub transmit_time: ConnTime,
    pub transmit_count: u32,
    pub transmit_key_phase: KeyPhase,
    pub retransmitted: bool,
}

impl Chunk {
    pub fn new(stream_id: StreamId, offset: u64, data: &[u8], fin: bool) -> Self {
        Self {
            stream_id,
            offset,
            data: data.to_vec(),
            len: data.len(),
            fin,
            rst: false,
            error_code: ErrorCode(0),
            packet_number: PacketNumber(0),
            transmit_time: ConnTime::zero(),
            transmit_count: 0,
            transmit_key_phase: KeyPhase::Unprotected,
            retransmitted: false,
        }
    }

    /// Creates a reset marker. It carries no bytes and never a FIN; `offset` records the final
    /// send offset of the stream so the peer can settle flow-control accounting.
    pub fn new_rst(stream_id: StreamId, offset: u64, error_code: ErrorCode) -> Self {
        Self {
            stream_id,
            offset,
            data: Vec::new(),
            len: 0,
            fin: false,
            rst: true,
            error_code,
            packet_number: PacketNumber(0),
            transmit_time: ConnTime::zero(),
            transmit_count: 0,
            transmit_key_phase: KeyPhase::Unprotected,
            retransmitted: false,
        }
    }

    /// Builds the retransmission twin of this chunk, transferring the data buffer instead of
    /// copying it. `self` keeps its offset, length and timing fields so the unacked queue can
    /// still match a late acknowledgement against it.
    pub fn take_data(&mut self) -> Chunk {
        Chunk {
            stream_id: self.stream_id,
            offset: self.offset,
            data: std::mem::take(&mut self.data),
            len: self.len,
            fin: self.fin,
            rst: self.rst,
            error_code: self.error_code,
            packet_number: PacketNumber(0),
            transmit_time: self.transmit_time,
            transmit_count: self.transmit_count,
            transmit_key_phase: self.transmit_key_phase,
            retransmitted: false,
        }
    }
}
