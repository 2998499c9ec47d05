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
use crate::streams::StreamTable;
use crate::types::PacketNumber;
#[cfg(not(test))]
use log::info;
#[cfg(test)]
use std::println as info;
use std::time::Duration;

// This is a crude stand-in for reliability until a real loss recovery module exists: a linear
// per-chunk backoff swept in transmit order.

/// Sweeps the unacked queue and re-queues every chunk whose retransmission deadline has passed.
/// Returns how many chunks were re-queued.
///
/// The queue is in transmit order and the deadline grows with the transmit count, so the sweep can
/// stop at the first chunk that is not yet due. A chunk that was already retransmitted is kept
/// only for round-trip timing and is dropped once `forget_thresh` has passed.
pub(crate) fn retransmit_due(
    table: &mut StreamTable,
    now: ConnTime,
    thresh: Duration,
    forget_thresh: Duration,
) -> usize {
    let mut requeued = 0;
    let mut i = 0;
    while i < table.unacked.len() {
        let chunk = &table.unacked[i];
        let deadline = chunk.transmit_time + thresh * chunk.transmit_count;
        if now < deadline {
            break;
        }
        if chunk.retransmitted {
            if chunk.transmit_time + forget_thresh <= now {
                info!("old unacked packet forgotten {}", chunk.packet_number);
                table.unacked.remove(i);
            } else {
                i += 1;
            }
        } else {
            let chunk = &mut table.unacked[i];
            chunk.retransmitted = true;
            info!("data associated with packet {} retransmitted", chunk.packet_number);
            // The twin steals the data buffer; the original stays behind for ack timing.
            let twin = chunk.take_data();
            table.do_writer(twin);
            requeued += 1;
            i += 1;
        }
    }
    requeued
}

/// Settles an acknowledgement: every chunk transmitted in the acked packet leaves the unacked
/// queue. Returns how many entries were removed.
pub(crate) fn handle_ack(table: &mut StreamTable, packet_number: PacketNumber) -> usize {
    let before = table.unacked.len();
    table.unacked.retain(|chunk| chunk.packet_number != packet_number);
    before - table.unacked.len()
}
