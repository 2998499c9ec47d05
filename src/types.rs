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

use std::fmt;

/// Packet Number
///
/// Assigned when a chunk is first handed to the protection layer, never when the chunk is created,
/// and used to match acknowledgements against the unacked queue.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct PacketNumber(pub u64);

impl fmt::Debug for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl std::ops::AddAssign<u64> for PacketNumber {
    fn add_assign(&mut self, rhs: u64) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl std::ops::Add<u64> for PacketNumber {
    type Output = PacketNumber;

    #[inline]
    fn add(self, rhs: u64) -> PacketNumber {
        PacketNumber(self.0.wrapping_add(rhs))
    }
}

/// Application error code, carried by RST_STREAM and STOP_SENDING frames.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct ErrorCode(pub u32);

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error code used when the application abandons a stream.
pub const ERROR_CANCELLED: ErrorCode = ErrorCode(1);

/// Which cryptographic context protected (or will protect) a packet.
///
/// Chunks are labelled at transmit time so that a retransmission after the handshake completes is
/// not accidentally sent under the old keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyPhase {
    /// Handshake cleartext. Only stream 0 may carry data in this phase.
    Unprotected,
    /// Established 1-RTT keys (also used for 0-RTT application data).
    OneRtt,
}
