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

use crate::api::Status;
use crate::api::StreamId;
use crate::packet::chunk::Chunk;
use crate::packet::stream_frame::StreamFrame;
use crate::rx::reassembly::ReassemblyBuffer;
use crate::rx::reassembly::ReassemblyError;
use crate::types::ErrorCode;
#[cfg(not(test))]
use log::info;
use std::collections::HashMap;
use std::collections::VecDeque;
#[cfg(test)]
use std::println as info;
use thiserror::Error;

/// Flow-control limits assumed before the peer's transport parameters arrive.
pub(crate) const DEFAULT_MAX_STREAM_DATA: u64 = 8 * 1024 * 1024;
pub(crate) const DEFAULT_MAX_DATA: u64 = 16 * 1024 * 1024;
pub(crate) const DEFAULT_MAX_STREAM_ID: u32 = 1024;

/// A peer behaviour that compromises protocol correctness. Fatal to the connection.
#[derive(Debug, Error, PartialEq)]
pub(crate) enum ProtocolViolation {
    #[error("FIN not allowed on stream 0")]
    FinOnStreamZero,

    #[error("cleartext data on non-zero stream {0}")]
    CleartextStreamData(StreamId),

    #[error("stream {0}: {1}")]
    Reassembly(StreamId, ReassemblyError),
}

/// One bidirectional stream: receive-side reassembly plus send-side bookkeeping.
///
/// A stream does not own outbound chunks; writes are enqueued on the [`StreamTable`], which is the
/// sole owner of both reliability queues. The stream only tracks where its send offset stands and
/// which direction has finished.
pub(crate) struct Stream {
    pub(crate) recv: ReassemblyBuffer,
    next_send_offset: u64,
    /// Highest send offset handed to the packer; bytes below it are retransmissions and consume
    /// no connection-level flow-control credit.
    largest_sent: u64,
    fin_queued: bool,
    send_reset: bool,
    recv_reset: bool,
}

impl Stream {
    fn new() -> Self {
        Self {
            recv: ReassemblyBuffer::new(),
            next_send_offset: 0,
            largest_sent: 0,
            fin_queued: false,
            send_reset: false,
            recv_reset: false,
        }
    }

    pub fn largest_sent(&self) -> u64 {
        self.largest_sent
    }

    pub fn note_sent(&mut self, end_offset: u64) {
        self.largest_sent = self.largest_sent.max(end_offset);
    }

    fn send_done(&self) -> bool {
        self.fin_queued || self.send_reset
    }

    fn recv_done(&self) -> bool {
        self.recv_reset || self.recv.drained()
    }

    /// A stream may be destroyed once both directions have finished and the application has
    /// drained every readable byte.
    fn can_delete(&self) -> bool {
        self.send_done() && self.recv_done() && self.recv.empty()
    }
}

/// The collection of open streams plus the two outbound chunk queues.
///
/// `unwritten` holds chunks awaiting their first transmission in insertion order; `unacked` holds
/// transmitted chunks in transmit order until acknowledged or abandoned. Chunks move between the
/// queues by transfer of ownership, never by sharing.
pub(crate) struct StreamTable {
    streams: HashMap<StreamId, Stream>,
    pub(crate) unwritten: VecDeque<Chunk>,
    pub(crate) unacked: VecDeque<Chunk>,
    next_local_stream_id: u32,
    next_peer_stream_id: u32,
    pub(crate) peer_max_stream_data: u64,
    pub(crate) peer_max_data: u64,
    pub(crate) peer_max_stream_id: u32,
    /// First-transmission bytes counted against `peer_max_data`. Maintained by the packer.
    pub(crate) conn_bytes_sent: u64,
}

impl StreamTable {
    pub fn new() -> Self {
        let mut streams = HashMap::new();
        // Stream 0 carries handshake traffic and exists for the connection's whole life.
        streams.insert(StreamId(0), Stream::new());
        Self {
            streams,
            unwritten: VecDeque::new(),
            unacked: VecDeque::new(),
            next_local_stream_id: 1,
            next_peer_stream_id: 1,
            peer_max_stream_data: DEFAULT_MAX_STREAM_DATA,
            peer_max_data: DEFAULT_MAX_DATA,
            peer_max_stream_id: DEFAULT_MAX_STREAM_ID,
            conn_bytes_sent: 0,
        }
    }

    /// Fixes the stream-ID parities once the endpoint's role is chosen. The client initiates
    /// odd-numbered streams, the server even-numbered ones.
    pub fn set_role(&mut self, local_first: u32, peer_first: u32) {
        self.next_local_stream_id = local_first;
        self.next_peer_stream_id = peer_first;
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn stream_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    /// Creates a new locally-initiated stream and, when `data` or `fin` is given, queues the
    /// first write on it.
    pub fn start_new_stream(&mut self, data: &[u8], fin: bool) -> Result<StreamId, Status> {
        if self.next_local_stream_id > self.peer_max_stream_id {
            return Err(Status::General);
        }
        let id = StreamId(self.next_local_stream_id);
        self.streams.insert(id, Stream::new());
        self.next_local_stream_id += 2;
        if !data.is_empty() || fin {
            let status = self.write(id, data, fin);
            if !status.is_ok() {
                return Err(status);
            }
        }
        Ok(id)
    }

    /// Appends a chunk carrying `data` at the stream's current send offset.
    pub fn write(&mut self, id: StreamId, data: &[u8], fin: bool) -> Status {
        let Some(stream) = self.streams.get_mut(&id) else {
            return Status::AlreadyFinished;
        };
        if stream.fin_queued || stream.send_reset {
            return Status::AlreadyFinished;
        }
        let chunk = Chunk::new(id, stream.next_send_offset, data, fin);
        stream.next_send_offset += data.len() as u64;
        if fin {
            stream.fin_queued = true;
        }
        self.unwritten.push_back(chunk);
        Status::Ok
    }

    pub fn end_stream(&mut self, id: StreamId) -> Status {
        self.write(id, &[], true)
    }

    /// Abandons the sending side: already-queued data is scrubbed from both queues and a reset
    /// marker is queued in its place. In-flight datagrams cannot be recalled.
    pub fn rst_stream(&mut self, id: StreamId, error_code: ErrorCode) -> Status {
        let Some(stream) = self.streams.get_mut(&id) else {
            return Status::AlreadyFinished;
        };
        if stream.send_reset {
            return Status::Ok;
        }
        stream.send_reset = true;
        let final_offset = stream.next_send_offset;
        self.scrub_unwritten(id);
        self.scrub_unacked(id);
        self.unwritten.push_back(Chunk::new_rst(id, final_offset, error_code));
        Status::Ok
    }

    /// Marks the receiving side as cancelled and drops whatever was buffered. The control frame
    /// asking the peer to stop is the connection's job.
    pub fn stop_sending(&mut self, id: StreamId) -> Status {
        let Some(stream) = self.streams.get_mut(&id) else {
            return Status::AlreadyFinished;
        };
        stream.recv_reset = true;
        stream.recv.discard();
        Status::Ok
    }

    /// Looks up the stream a peer frame names, lazily materialising it and every missing
    /// intermediate stream of the peer's parity. A stream that has been destroyed reports
    /// `AlreadyFinished`.
    pub fn find_or_create(&mut self, id: StreamId) -> Result<&mut Stream, Status> {
        if (id.0 & 1) == (self.next_peer_stream_id & 1) {
            while id.0 >= self.next_peer_stream_id {
                let new_id = StreamId(self.next_peer_stream_id);
                info!("materializing peer stream {}", new_id);
                self.streams.insert(new_id, Stream::new());
                self.next_peer_stream_id += 2;
            }
        }
        self.streams.get_mut(&id).ok_or(Status::AlreadyFinished)
    }

    /// Validates and routes one inbound stream frame. Returns the stream ID when the frame made
    /// at least one byte newly readable, so the caller can raise the data event.
    pub fn handle_stream_frame(
        &mut self,
        frame: &StreamFrame<'_>,
        from_cleartext: bool,
    ) -> Result<Option<StreamId>, ProtocolViolation> {
        let id = frame.stream_id;
        if id.is_handshake() && frame.fin {
            return Err(ProtocolViolation::FinOnStreamZero);
        }
        if !id.is_handshake() && from_cleartext {
            return Err(ProtocolViolation::CleartextStreamData(id));
        }

        let stream = if id.is_handshake() {
            self.streams.get_mut(&id).expect("stream 0 always exists")
        } else {
            match self.find_or_create(id) {
                Ok(stream) => stream,
                // Already destroyed; the payload is discarded without error.
                Err(_) => return Ok(None),
            }
        };
        if stream.recv_reset {
            return Ok(None);
        }
        match stream.recv.supply(frame.offset, frame.data, frame.fin) {
            Ok(newly_readable) => Ok(newly_readable.then_some(id)),
            Err(e) => Err(ProtocolViolation::Reassembly(id, e)),
        }
    }

    /// Handles an inbound RST_STREAM: the peer abandoned its sending side. Returns the stream ID
    /// when a reset event should be raised.
    pub fn handle_rst_stream(&mut self, id: StreamId, _error_code: ErrorCode) -> Option<StreamId> {
        let stream = self.find_or_create(id).ok()?;
        if stream.recv_reset {
            return None;
        }
        stream.recv_reset = true;
        stream.recv.discard();
        self.maybe_delete(id);
        Some(id)
    }

    /// Copies readable bytes for the application and destroys the stream once the FIN has been
    /// consumed and the sending side is finished too.
    pub fn read(&mut self, id: StreamId, dst: &mut [u8]) -> Result<(usize, bool), Status> {
        let Some(stream) = self.streams.get_mut(&id) else {
            return Err(Status::AlreadyFinished);
        };
        let (n, fin) = stream.recv.read(dst);
        if fin {
            self.maybe_delete(id);
        }
        Ok((n, fin))
    }

    /// Removes all non-reset chunks of `id` from the unwritten queue. Reset markers stay so the
    /// peer still learns of the reset.
    pub fn scrub_unwritten(&mut self, id: StreamId) {
        self.unwritten.retain(|chunk| {
            let scrub = chunk.stream_id == id && !chunk.rst;
            if scrub {
                info!("scrubbing unwritten chunk of stream {}", id);
            }
            !scrub
        });
    }

    /// Removes all non-reset chunks of `id` from the unacked queue.
    pub fn scrub_unacked(&mut self, id: StreamId) {
        self.unacked.retain(|chunk| {
            let scrub = chunk.stream_id == id && !chunk.rst;
            if scrub {
                info!("scrubbing unacked chunk of stream {}", id);
            }
            !scrub
        });
    }

    /// Appends a chunk to the unwritten queue. Used by the retransmission path, which re-queues
    /// stolen chunk data for another transmission.
    pub fn do_writer(&mut self, chunk: Chunk) {
        self.unwritten.push_back(chunk);
    }

    pub fn delete_stream(&mut self, id: StreamId) {
        info!("delete stream {}", id);
        self.streams.remove(&id);
    }

    /// Destroys the stream if both directions are finished and the application has drained it.
    /// Stream 0 lives as long as the connection.
    pub fn maybe_delete(&mut self, id: StreamId) -> bool {
        if id.is_handshake() {
            return false;
        }
        if self.streams.get(&id).is_some_and(|s| s.can_delete()) {
            self.delete_stream(id);
            return true;
        }
        false
    }

    /// Tears every stream down. Used when the connection reaches a terminal state.
    pub fn clear(&mut self) {
        self.streams.clear();
        self.unwritten.clear();
        self.unacked.clear();
    }
}
