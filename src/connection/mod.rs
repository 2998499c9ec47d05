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

use crate::EventSink;
use crate::api::Config;
use crate::api::ConnTime;
use crate::api::ConnectionEvent;
use crate::api::ConnectionState;
use crate::api::MAX_MTU;
use crate::api::ProtectionLayer;
use crate::api::Status;
use crate::api::StreamId;
use crate::events::Events;
use crate::logging::log_datagram;
use crate::packet::AEAD_TAG_LEN;
use crate::packet::frame;
use crate::packet::frame::Frame;
use crate::packet::rst_frame::STOP_SENDING_FRAME_LEN;
use crate::packet::rst_frame::StopSendingFrame;
use crate::streams::StreamTable;
use crate::timer::Timer;
use crate::tx::frame_packer::TransmitStamp;
use crate::tx::frame_packer::create_stream_frames;
use crate::tx::retransmission;
use crate::types::ErrorCode;
use crate::types::KeyPhase;
use crate::types::PacketNumber;
#[cfg(not(test))]
use log::warn;
use std::cmp::min;
#[cfg(test)]
use std::println as warn;

#[cfg(test)]
pub mod connection_tests;

/// The wire version this endpoint offers.
pub(crate) const VERSION_DRAFT: u32 = 0xff00_0005;

/// A deliberately invalid version, offered to exercise the peer's version negotiation.
pub(crate) const VERSION_GREASE: u32 = 0xfa1a_7a3a;

/// Synchronous event callback. Registered handlers must not re-enter the connection that invoked
/// them.
pub type EventCallback = Box<dyn FnMut(ConnectionEvent)>;

/// Placeholder protection layer installed until the handshake collaborator registers itself. It
/// never produces a decryption context and refuses to transmit, which leaves queued chunks on the
/// unacked list for a later retry.
struct NullProtection;

impl ProtectionLayer for NullProtection {
    fn decoded_ok(&self) -> bool {
        false
    }

    fn create_short_header(&mut self, _buf: &mut [u8], _packet_number: PacketNumber) -> usize {
        0
    }

    fn create_long_header(&mut self, _buf: &mut [u8], _packet_number: PacketNumber) -> usize {
        0
    }

    fn protected_transmit(
        &mut self,
        _header: &[u8],
        _payload: &[u8],
        _max_payload: usize,
        _needs_ack: bool,
    ) -> Status {
        Status::General
    }
}

/// One QUIC connection: the stream multiplexing and reliability engine together with the thin
/// state it observes of the connection machine around it.
///
/// The connection is single-threaded and cooperative. All transitions happen inside the entry
/// points below, driven by an owning event loop that calls [`Connection::io`]; nothing blocks
/// internally.
pub struct Connection {
    config: Config,
    state: ConnectionState,
    version: u32,
    pub(crate) table: StreamTable,
    events: Events,
    event_cb: Option<EventCallback>,
    protection: Box<dyn ProtectionLayer>,
    next_packet_number: PacketNumber,
    now: ConnTime,
    retransmit_timer: Timer,
    back_pressure: bool,
    pending_control: Vec<u8>,
    fd: Option<i32>,
}

impl Connection {
    pub(crate) fn new(config: Config) -> Self {
        let version =
            if config.grease_version_negotiation { VERSION_GREASE } else { VERSION_DRAFT };
        let retransmit_timer = Timer::new(config.retransmit_thresh);
        Self {
            config,
            state: ConnectionState::Uninitialized,
            version,
            table: StreamTable::new(),
            events: Events::new(),
            event_cb: None,
            protection: Box::new(NullProtection),
            next_packet_number: PacketNumber(1),
            now: ConnTime::zero(),
            retransmit_timer,
            back_pressure: false,
            pending_control: Vec::new(),
            fd: None,
        }
    }

    /// Installs the record protection collaborator. Replaces the inert placeholder a fresh
    /// connection starts with.
    pub fn set_protection_layer(&mut self, protection: Box<dyn ProtectionLayer>) {
        self.protection = protection;
    }

    pub fn set_event_callback(&mut self, callback: EventCallback) {
        self.event_cb = Some(callback);
    }

    /// Returns the next queued event. Only useful when no callback is registered.
    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.next_event()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    // Tuning flags read by the handshake collaborator.

    pub fn ignore_pki(&self) -> bool {
        self.config.ignore_pki
    }

    pub fn tolerate_bad_alpn(&self) -> bool {
        self.config.tolerate_bad_alpn
    }

    pub fn tolerate_no_transport_params(&self) -> bool {
        self.config.tolerate_no_transport_params
    }

    pub fn sabotage_vn(&self) -> bool {
        self.config.sabotage_vn
    }

    pub fn force_address_validation(&self) -> bool {
        self.config.force_address_validation
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fd(&self) -> Option<i32> {
        self.fd
    }

    pub fn set_fd(&mut self, fd: i32) {
        self.fd = Some(fd);
    }

    pub fn start_client(&mut self) -> Status {
        if self.state != ConnectionState::Uninitialized {
            return Status::General;
        }
        self.state = ConnectionState::ClientHandshake;
        self.table.set_role(1, 2);
        self.retransmit_timer.start(self.now);
        Status::Ok
    }

    pub fn start_server(&mut self) -> Status {
        if self.state != ConnectionState::Uninitialized {
            return Status::General;
        }
        self.state = ConnectionState::ServerHandshake;
        self.table.set_role(2, 1);
        self.retransmit_timer.start(self.now);
        Status::Ok
    }

    /// Reported by the protection collaborator when early keys allow the client to send 0-RTT
    /// application data. Chunks are labelled 1-RTT from here on; replay concerns stay with the
    /// collaborator.
    pub fn enter_0rtt(&mut self) -> Status {
        if self.state != ConnectionState::ClientHandshake {
            return Status::General;
        }
        self.state = ConnectionState::Client0Rtt;
        Status::Ok
    }

    /// Reported by the protection collaborator once the handshake finished (or failed).
    pub fn handshake_complete(&mut self, status: Status) -> Status {
        if !status.is_ok() {
            self.raise_error(format!("handshake failed: {:?}", status));
            return Status::Ok;
        }
        match self.state {
            ConnectionState::ClientHandshake | ConnectionState::Client0Rtt => {
                self.state = ConnectionState::ClientConnected;
                Status::Ok
            }
            ConnectionState::ServerHandshake => {
                self.state = ConnectionState::ServerConnected;
                Status::Ok
            }
            _ => Status::General,
        }
    }

    fn started(&self) -> bool {
        !matches!(
            self.state,
            ConnectionState::Uninitialized | ConnectionState::Error | ConnectionState::Closed
        )
    }

    /// The key phase outgoing chunks are labelled with: 1-RTT once the connection is in a
    /// connected or 0-RTT state, handshake cleartext before that.
    fn key_phase(&self) -> KeyPhase {
        match self.state {
            ConnectionState::ClientConnected
            | ConnectionState::ServerConnected
            | ConnectionState::Client0Rtt => KeyPhase::OneRtt,
            _ => KeyPhase::Unprotected,
        }
    }

    pub fn start_new_stream(&mut self, data: &[u8], fin: bool) -> Result<StreamId, Status> {
        if !self.started() {
            return Err(Status::General);
        }
        self.table.start_new_stream(data, fin)
    }

    pub fn send(&mut self, stream_id: StreamId, data: &[u8], fin: bool) -> Status {
        if !self.started() {
            return Status::General;
        }
        // Stream 0 is the handshake's; applications feed it via `handshake_output`.
        if stream_id.is_handshake() {
            return Status::Invalid;
        }
        let status = self.table.write(stream_id, data, fin);
        if status.is_ok() && fin {
            self.table.maybe_delete(stream_id);
        }
        status
    }

    pub fn end_stream(&mut self, stream_id: StreamId) -> Status {
        if !self.started() {
            return Status::General;
        }
        if stream_id.is_handshake() {
            return Status::Invalid;
        }
        let status = self.table.end_stream(stream_id);
        if status.is_ok() {
            self.table.maybe_delete(stream_id);
        }
        status
    }

    pub fn reset_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) -> Status {
        if !self.started() {
            return Status::General;
        }
        if stream_id.is_handshake() {
            return Status::Invalid;
        }
        let status = self.table.rst_stream(stream_id, error_code);
        if status.is_ok() {
            self.table.maybe_delete(stream_id);
        }
        status
    }

    /// Asks the peer to cease sending on `stream_id`. Best effort: the request is a small control
    /// frame sent with the next datagram and never retransmitted.
    pub fn stop_sending(&mut self, stream_id: StreamId, error_code: ErrorCode) -> Status {
        if !self.started() {
            return Status::General;
        }
        if stream_id.is_handshake() {
            return Status::Invalid;
        }
        let status = self.table.stop_sending(stream_id);
        if status.is_ok() {
            let frame = StopSendingFrame { stream_id, error_code };
            let mut buf = [0u8; STOP_SENDING_FRAME_LEN];
            frame.serialize_to(&mut buf);
            self.pending_control.extend_from_slice(&buf);
            self.table.maybe_delete(stream_id);
        }
        status
    }

    /// Copies up to `dst.len()` readable bytes from the stream. The second value of the pair is
    /// true once the last byte of the stream has been consumed.
    pub fn recv(&mut self, stream_id: StreamId, dst: &mut [u8]) -> Result<(usize, bool), Status> {
        if !self.started() {
            return Err(Status::General);
        }
        self.table.read(stream_id, dst)
    }

    /// Appends handshake bytes produced by the application's TLS stack to stream 0.
    pub fn handshake_output(&mut self, data: &[u8]) -> Status {
        if !self.started() {
            return Status::General;
        }
        self.table.write(StreamId(0), data, false)
    }

    /// Records the peer's advertised flow-control limits from its transport parameters.
    pub fn update_peer_limits(&mut self, max_stream_data: u64, max_data: u64, max_stream_id: u32) {
        self.table.peer_max_stream_data = max_stream_data;
        self.table.peer_max_data = max_data;
        self.table.peer_max_stream_id = max_stream_id;
    }

    /// Pauses the flusher. Queued data keeps accumulating until released.
    pub fn start_back_pressure(&mut self) {
        self.back_pressure = true;
    }

    pub fn release_back_pressure(&mut self) {
        self.back_pressure = false;
    }

    /// One tick of the event loop: runs the retransmission sweep when due, then flushes whatever
    /// is queued. `now` must be monotonic; a timestamp older than the previous tick is ignored.
    pub fn io(&mut self, now: ConnTime) -> Status {
        if !self.started() {
            return Status::General;
        }
        if now > self.now {
            self.now = now;
        }
        if self.retransmit_timer.expire(self.now) {
            retransmission::retransmit_due(
                &mut self.table,
                self.now,
                self.config.retransmit_thresh,
                self.config.forget_unacked_thresh,
            );
        }
        let status = self.flush(false);
        if self.config.app_handles_send_recv {
            self.dispatch_event(ConnectionEvent::Io);
        }
        status
    }

    /// Closes the connection from the application side.
    pub fn close(&mut self) {
        if !self.started() {
            return;
        }
        self.state = ConnectionState::Closed;
        self.table.clear();
        self.retransmit_timer.stop();
        self.dispatch_event(ConnectionEvent::CloseConnection);
    }

    /// Delivers one decrypted packet payload from the protection layer. `from_cleartext` is true
    /// while the payload was still protected by the handshake's cleartext keys.
    pub fn handle_payload(&mut self, payload: &[u8], from_cleartext: bool) -> Status {
        if !self.started() {
            return Status::General;
        }
        if !self.config.app_handles_logging {
            log_datagram(&self.config.origin_name, self.now.into(), false, payload);
        }
        let mut at = 0;
        while at < payload.len() {
            let (parsed, consumed) = match frame::parse(&payload[at..]) {
                Ok(ok) => ok,
                Err(_) => return Status::Invalid,
            };
            at += consumed;
            match parsed {
                Frame::Padding => {}
                Frame::Stream(stream_frame) => {
                    match self.table.handle_stream_frame(&stream_frame, from_cleartext) {
                        Ok(Some(id)) => self.dispatch_event(ConnectionEvent::NewStreamData(id)),
                        Ok(None) => {}
                        Err(violation) => {
                            self.raise_error(violation.to_string());
                            return Status::General;
                        }
                    }
                }
                Frame::RstStream(rst) if !rst.stream_id.is_handshake() => {
                    if let Some(id) = self.table.handle_rst_stream(rst.stream_id, rst.error_code) {
                        self.dispatch_event(ConnectionEvent::StreamReset(id));
                    }
                }
                Frame::StopSending(stop) if !stop.stream_id.is_handshake() => {
                    // The peer no longer wants this stream; abandon our sending side.
                    self.table.rst_stream(stop.stream_id, stop.error_code);
                    self.table.maybe_delete(stop.stream_id);
                }
                // Control frames naming the handshake stream are discharged quietly.
                Frame::RstStream(_) | Frame::StopSending(_) => {}
            }
        }
        Status::Ok
    }

    /// Settles an acknowledgement delivered by the frame parser.
    pub fn handle_ack(&mut self, packet_number: PacketNumber) -> Status {
        retransmission::handle_ack(&mut self.table, packet_number);
        Status::Ok
    }

    /// Drains the unwritten queue into back-to-back datagrams. Before the handshake delivers a
    /// decryption context only stream 0 is flushed, under a long header.
    pub fn flush(&mut self, force_ack: bool) -> Status {
        if !self.started() || self.back_pressure {
            return Status::Ok;
        }
        if !self.protection.decoded_ok() {
            return self.flush_stream0(force_ack);
        }
        if self.table.unwritten.is_empty() && self.pending_control.is_empty() && !force_ack {
            return Status::Ok;
        }

        let mut pkt = [0u8; MAX_MTU];
        let header_len = self.protection.create_short_header(&mut pkt, self.next_packet_number);
        let end = self.config.mtu - AEAD_TAG_LEN;

        let mut payload_len = self.take_pending_control(&mut pkt[header_len..end]);
        let stamp = TransmitStamp {
            packet_number: self.next_packet_number,
            now: self.now,
            key_phase: self.key_phase(),
        };
        let packed =
            create_stream_frames(&mut self.table, &mut pkt[header_len + payload_len..end], &stamp, false);
        payload_len += packed;
        if payload_len == 0 && !force_ack {
            return Status::Ok;
        }

        let status = self.transmit(&pkt, header_len, payload_len, end);
        if !status.is_ok() {
            // The chunks already moved to the unacked queue; the timer will retransmit them.
            return Status::General;
        }
        if !self.table.unwritten.is_empty() && packed > 0 {
            return self.flush(false);
        }
        Status::Ok
    }

    /// Cleartext flush used while the handshake is still in flight: long headers, stream-0 chunks
    /// only.
    fn flush_stream0(&mut self, force_ack: bool) -> Status {
        let has_stream0 =
            self.table.unwritten.iter().any(|chunk| chunk.stream_id.is_handshake());
        if !has_stream0 && !force_ack {
            return Status::Ok;
        }

        let mut pkt = [0u8; MAX_MTU];
        let header_len = self.protection.create_long_header(&mut pkt, self.next_packet_number);
        let end = self.config.mtu - AEAD_TAG_LEN;
        let stamp = TransmitStamp {
            packet_number: self.next_packet_number,
            now: self.now,
            key_phase: self.key_phase(),
        };
        let packed = create_stream_frames(&mut self.table, &mut pkt[header_len..end], &stamp, true);
        if packed == 0 && !force_ack {
            return Status::Ok;
        }

        let status = self.transmit(&pkt, header_len, packed, end);
        if !status.is_ok() {
            return Status::General;
        }
        let more = self.table.unwritten.iter().any(|chunk| chunk.stream_id.is_handshake());
        if more && packed > 0 {
            return self.flush_stream0(false);
        }
        Status::Ok
    }

    fn transmit(&mut self, pkt: &[u8], header_len: usize, payload_len: usize, end: usize) -> Status {
        let status = self.protection.protected_transmit(
            &pkt[..header_len],
            &pkt[header_len..header_len + payload_len],
            end - header_len,
            true,
        );
        if status.is_ok() {
            if !self.config.app_handles_logging {
                log_datagram(
                    &self.config.origin_name,
                    self.now.into(),
                    true,
                    &pkt[header_len..header_len + payload_len],
                );
            }
            self.next_packet_number += 1;
        }
        status
    }

    /// Moves as many queued control frames into `buf` as fit whole; the rest wait for the next
    /// datagram.
    fn take_pending_control(&mut self, buf: &mut [u8]) -> usize {
        if self.pending_control.is_empty() {
            return 0;
        }
        let n = min(self.pending_control.len(), buf.len());
        // Control frames are fixed-size records; only move a whole number of them.
        let n = n - (n % STOP_SENDING_FRAME_LEN);
        buf[..n].copy_from_slice(&self.pending_control[..n]);
        self.pending_control.drain(..n);
        n
    }

    /// A protocol violation: the connection transitions to its terminal error state, all streams
    /// are torn down, and nothing but a close frame may be sent afterwards.
    fn raise_error(&mut self, message: String) {
        warn!("connection error: {}", message);
        self.state = ConnectionState::Error;
        self.table.clear();
        self.retransmit_timer.stop();
        self.dispatch_event(ConnectionEvent::Error(Status::General, message));
    }

    fn dispatch_event(&mut self, event: ConnectionEvent) {
        match self.event_cb.as_mut() {
            Some(callback) => callback(event),
            None => self.events.add(event),
        }
    }
}
