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

use crate::api::ProtectionLayer;
use crate::api::Status;
use crate::types::PacketNumber;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A captured datagram: the plaintext payload the engine asked to protect, and whether it went
/// out under a long (cleartext) header.
#[derive(Debug)]
pub(crate) struct SentDatagram {
    pub payload: Vec<u8>,
    pub cleartext: bool,
}

/// Shared knobs and capture buffer of a [`CapturingProtection`]. Tests keep one side while the
/// connection owns the layer itself.
pub(crate) struct CaptureHandle {
    pub established: Rc<Cell<bool>>,
    pub refuse_transmit: Rc<Cell<bool>>,
    pub sent: Rc<RefCell<VecDeque<SentDatagram>>>,
}

impl CaptureHandle {
    pub fn next_payload(&self) -> Vec<u8> {
        self.sent.borrow_mut().pop_front().expect("a datagram was sent").payload
    }

    pub fn sent_count(&self) -> usize {
        self.sent.borrow().len()
    }
}

/// Protection layer that performs no cryptography: payloads are recorded verbatim so tests can
/// inspect them or feed them to a peer connection.
pub(crate) struct CapturingProtection {
    established: Rc<Cell<bool>>,
    refuse_transmit: Rc<Cell<bool>>,
    sent: Rc<RefCell<VecDeque<SentDatagram>>>,
    last_header_was_long: bool,
    header_len: usize,
}

impl CapturingProtection {
    pub fn new(established: bool, header_len: usize) -> (Self, CaptureHandle) {
        let established = Rc::new(Cell::new(established));
        let refuse_transmit = Rc::new(Cell::new(false));
        let sent = Rc::new(RefCell::new(VecDeque::new()));
        let handle = CaptureHandle {
            established: Rc::clone(&established),
            refuse_transmit: Rc::clone(&refuse_transmit),
            sent: Rc::clone(&sent),
        };
        let layer = Self {
            established,
            refuse_transmit,
            sent,
            last_header_was_long: false,
            header_len,
        };
        (layer, handle)
    }
}

impl ProtectionLayer for CapturingProtection {
    fn decoded_ok(&self) -> bool {
        self.established.get()
    }

    fn create_short_header(&mut self, buf: &mut [u8], packet_number: PacketNumber) -> usize {
        buf[0] = 0x40;
        buf[1..self.header_len].fill(packet_number.0 as u8);
        self.last_header_was_long = false;
        self.header_len
    }

    fn create_long_header(&mut self, buf: &mut [u8], packet_number: PacketNumber) -> usize {
        buf[0] = 0x80;
        buf[1..self.header_len].fill(packet_number.0 as u8);
        self.last_header_was_long = true;
        self.header_len
    }

    fn protected_transmit(
        &mut self,
        _header: &[u8],
        payload: &[u8],
        _max_payload: usize,
        _needs_ack: bool,
    ) -> Status {
        if self.refuse_transmit.get() {
            return Status::General;
        }
        self.sent.borrow_mut().push_back(SentDatagram {
            payload: payload.to_vec(),
            cleartext: self.last_header_was_long,
        });
        Status::Ok
    }
}
