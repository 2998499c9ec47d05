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

use crate::types::PacketNumber;
use std::fmt;
use std::ops::Add;
use std::ops::Sub;
use std::time::Duration;

pub use crate::connection::Connection;

/// Represents a point in time relative to the creation of the connection.
///
/// The core never reads a system clock; the owning event loop supplies a monotonic timestamp with
/// every [`Connection::io`] tick, expressed on this timeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnTime(Duration);

impl ConnTime {
    /// The moment the connection was created (t=0).
    pub const fn zero() -> ConnTime {
        ConnTime(Duration::ZERO)
    }

    pub const fn infinite_future() -> ConnTime {
        ConnTime(Duration::MAX)
    }
}

impl Add<Duration> for ConnTime {
    type Output = ConnTime;
    fn add(self, rhs: Duration) -> ConnTime {
        ConnTime(self.0 + rhs)
    }
}

impl Sub<Duration> for ConnTime {
    type Output = ConnTime;
    fn sub(self, rhs: Duration) -> ConnTime {
        ConnTime(self.0 - rhs)
    }
}

impl Sub<ConnTime> for ConnTime {
    type Output = Duration;
    fn sub(self, rhs: ConnTime) -> Duration {
        self.0 - rhs.0
    }
}

impl From<Duration> for ConnTime {
    fn from(value: Duration) -> Self {
        ConnTime(value)
    }
}

impl From<ConnTime> for Duration {
    fn from(value: ConnTime) -> Self {
        value.0
    }
}

/// Stream Identifier
///
/// The low bit encodes which endpoint initiated the stream: the client opens odd-numbered streams,
/// the server even-numbered ones. Stream 0 is reserved for handshake data.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId(pub u32);

impl StreamId {
    pub fn is_handshake(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Return codes of the public entry points. `Ok` is zero; the remaining values match the wire-level
/// error space of the original C API.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    /// The operation completed, or was enqueued to complete asynchronously.
    Ok = 0,

    /// A malformed argument or missing required configuration. The call had no side effects.
    Invalid = 1,

    /// A transient or internal failure. Queued data is kept and will be retried.
    General = 2,

    /// The referenced stream has already been destroyed. The operation was discarded.
    AlreadyFinished = 3,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        *self == Status::Ok
    }
}

/// Application level events generated by the connection.
///
/// Events are delivered synchronously through the callback registered with
/// [`Connection::set_event_callback`], or queued for [`Connection::poll_event`] when no callback is
/// installed. Handlers must not re-enter the connection that delivered the event.
#[derive(Debug, PartialEq)]
pub enum ConnectionEvent {
    /// The named stream has newly readable bytes; drain them with [`Connection::recv`].
    NewStreamData(StreamId),

    /// The peer reset its sending side of the named stream. Buffered undelivered bytes for the
    /// stream were discarded.
    StreamReset(StreamId),

    /// A server connection accepted a new peer. Generated by the listening machinery, never by the
    /// stream engine itself.
    AcceptNewConnection,

    /// The connection reached its terminal state in a controlled way. No event follows this one.
    CloseConnection,

    /// A fatal protocol error. The connection is terminal; all streams were torn down.
    Error(Status, String),

    /// The application should perform socket I/O on behalf of the connection. Only generated when
    /// [`Config::app_handles_send_recv`] is set.
    Io,
}

/// The connection state, as observed by the stream engine.
///
/// The engine reads this to label outgoing chunks with the key phase that will protect them; the
/// full handshake state machine lives in the protection collaborator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// Neither `start_client` nor `start_server` has been called.
    Uninitialized,

    /// Client role chosen, handshake in flight.
    ClientHandshake,

    /// Client sending 0-RTT application data before handshake confirmation.
    Client0Rtt,

    /// Client handshake complete.
    ClientConnected,

    /// Server role chosen, handshake in flight.
    ServerHandshake,

    /// Server handshake complete.
    ServerConnected,

    /// A protocol violation occurred. Terminal.
    Error,

    /// Closed by the application. Terminal.
    Closed,
}

/// User configurable options.
///
/// The retransmission thresholds are deliberately exposed: the timer in this crate is a stand-in
/// until a full loss-recovery module exists, and deployments tune it per path.
#[derive(Clone)]
pub struct Config {
    /// Hostname of the origin this connection speaks to. Required; used for certificate
    /// validation by the handshake collaborator and as the log identifier.
    pub origin_name: String,

    /// Port of the origin.
    pub origin_port: u16,

    /// Maximum datagram size generated by the flusher, including the short header and the AEAD
    /// tag. Must not exceed [`MAX_MTU`].
    pub mtu: usize,

    /// Key for generating stateless reset tokens. All-absent disables the feature.
    pub stateless_reset_key: Option<[u8; 128]>,

    /// Send a deliberately invalid version field to exercise the peer's version negotiation.
    pub grease_version_negotiation: bool,

    /// Accept any certificate chain.
    pub ignore_pki: bool,

    /// Do not reject the handshake on an ALPN mismatch.
    pub tolerate_bad_alpn: bool,

    /// Accept a handshake that lacks the transport-parameters extension.
    pub tolerate_no_transport_params: bool,

    /// Deliberately corrupt version-negotiation output. Test servers only.
    pub sabotage_vn: bool,

    /// Require the stateless retry dance before accepting a client.
    pub force_address_validation: bool,

    /// Per-stream receive window, in bytes, advertised to the peer.
    pub stream_window: u64,

    /// Per-connection receive window, in kilobytes, advertised to the peer.
    pub conn_window_kb: u64,

    /// The caller pumps datagrams itself instead of the library reading the socket. When set,
    /// [`ConnectionEvent::Io`] is generated on every tick.
    pub app_handles_send_recv: bool,

    /// The caller installs its own log sink; suppress the built-in datagram logging.
    pub app_handles_logging: bool,

    /// Base interval before an unacknowledged chunk is retransmitted. Backoff is linear in the
    /// number of transmissions.
    pub retransmit_thresh: Duration,

    /// How long a chunk that has already been retransmitted is kept on the unacked queue for
    /// round-trip bookkeeping before being forgotten.
    pub forget_unacked_thresh: Duration,
}

/// Upper bound for [`Config::mtu`], sized for an Ethernet path.
pub const MAX_MTU: usize = 1500;

impl Default for Config {
    fn default() -> Self {
        Config {
            origin_name: String::new(),
            origin_port: 443,
            // The minimum datagram size every QUIC path must support.
            mtu: 1280,
            stateless_reset_key: None,
            grease_version_negotiation: false,
            ignore_pki: false,
            tolerate_bad_alpn: false,
            tolerate_no_transport_params: false,
            sabotage_vn: false,
            force_address_validation: false,
            stream_window: 8 * 1024 * 1024,
            conn_window_kb: 16 * 1024,
            app_handles_send_recv: false,
            app_handles_logging: false,
            retransmit_thresh: Duration::from_millis(500),
            forget_unacked_thresh: Duration::from_secs(10),
        }
    }
}

/// The record protection collaborator.
///
/// The stream engine builds plaintext payloads and hands them to this layer for encryption and
/// transmission; decrypted inbound payloads come back through
/// [`Connection::handle_payload`] together with a flag telling whether they arrived in the
/// handshake's cleartext phase.
pub trait ProtectionLayer {
    /// True once the handshake has produced a 1-RTT decryption context.
    fn decoded_ok(&self) -> bool;

    /// Writes a short (1-RTT) packet header into `buf` and returns its length.
    fn create_short_header(&mut self, buf: &mut [u8], packet_number: PacketNumber) -> usize;

    /// Writes a long (handshake) packet header into `buf` and returns its length.
    fn create_long_header(&mut self, buf: &mut [u8], packet_number: PacketNumber) -> usize;

    /// Encrypts `payload` under the current keys, appends the AEAD tag, and transmits one
    /// datagram. `max_payload` is the largest protected payload the datagram may carry.
    fn protected_transmit(
        &mut self,
        header: &[u8],
        payload: &[u8],
        max_payload: usize,
        needs_ack: bool,
    ) -> Status;
}
