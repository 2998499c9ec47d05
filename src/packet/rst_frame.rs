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
use crate::packet::FRAME_TYPE_RST_STREAM;
use crate::packet::FRAME_TYPE_STOP_SENDING;
use crate::packet::FrameParseError;
use crate::packet::read_u32_be;
use crate::packet::read_u64_be;
use crate::packet::write_u32_be;
use crate::packet::write_u64_be;
use crate::types::ErrorCode;
use anyhow::Result;
use anyhow::ensure;

/// RST_STREAM frame: type byte, 32-bit stream ID, 32-bit error code, 64-bit final offset.
#[derive(Debug, PartialEq)]
pub(crate) struct RstStreamFrame {
    pub stream_id: StreamId,
    pub error_code: ErrorCode,
    pub final_offset: u64,
}

/// Serialized size of a RST_STREAM frame.
pub(crate) const RST_STREAM_FRAME_LEN: usize = 1 + 4 + 4 + 8;

impl RstStreamFrame {
    pub fn serialize_to(&self, buf: &mut [u8]) {
        buf[0] = FRAME_TYPE_RST_STREAM;
        write_u32_be!(&mut buf[1..], self.stream_id.0);
        write_u32_be!(&mut buf[5..], self.error_code.0);
        write_u64_be!(&mut buf[9..], self.final_offset);
    }

    pub fn parse(buf: &[u8]) -> Result<(RstStreamFrame, usize)> {
        ensure!(buf.len() >= RST_STREAM_FRAME_LEN, FrameParseError::Truncated);
        ensure!(buf[0] == FRAME_TYPE_RST_STREAM, FrameParseError::UnknownType);
        Ok((
            RstStreamFrame {
                stream_id: StreamId(read_u32_be!(&buf[1..])),
                error_code: ErrorCode(read_u32_be!(&buf[5..])),
                final_offset: read_u64_be!(&buf[9..]),
            },
            RST_STREAM_FRAME_LEN,
        ))
    }
}

/// STOP_SENDING frame: type byte, 32-bit stream ID, 32-bit error code.
///
/// A best-effort request that the peer cease sending on a stream. It is sent once and never
/// retransmitted.
#[derive(Debug, PartialEq)]
pub(crate) struct StopSendingFrame {
    pub stream_id: StreamId,
    pub error_code: ErrorCode,
}

/// Serialized size of a STOP_SENDING frame.
pub(crate) const STOP_SENDING_FRAME_LEN: usize = 1 + 4 + 4;

impl StopSendingFrame {
    pub fn serialize_to(&self, buf: &mut [u8]) {
        buf[0] = FRAME_TYPE_STOP_SENDING;
        write_u32_be!(&mut buf[1..], self.stream_id.0);
        write_u32_be!(&mut buf[5..], self.error_code.0);
    }

    pub fn parse(buf: &[u8]) -> Result<(StopSendingFrame, usize)> {
        ensure!(buf.len() >= STOP_SENDING_FRAME_LEN, FrameParseError::Truncated);
        ensure!(buf[0] == FRAME_TYPE_STOP_SENDING, FrameParseError::UnknownType);
        Ok((
            StopSendingFrame {
                stream_id: StreamId(read_u32_be!(&buf[1..])),
                error_code: ErrorCode(read_u32_be!(&buf[5..])),
            },
            STOP_SENDING_FRAME_LEN,
        ))
    }
}
