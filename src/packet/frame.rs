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

use crate::packet::FRAME_TYPE_PADDING;
use crate::packet::FRAME_TYPE_RST_STREAM;
use crate::packet::FRAME_TYPE_STOP_SENDING;
use crate::packet::FRAME_TYPE_STREAM_MASK;
use crate::packet::FrameParseError;
use crate::packet::rst_frame::RstStreamFrame;
use crate::packet::rst_frame::StopSendingFrame;
use crate::packet::stream_frame;
use crate::packet::stream_frame::StreamFrame;
use anyhow::Result;
use anyhow::bail;

/// One frame out of a decrypted packet payload.
///
/// Only the frames the stream engine consumes are represented; acknowledgement and connection
/// control frames are consumed by the framing collaborator before the payload reaches this parser.
#[derive(Debug)]
pub(crate) enum Frame<'a> {
    Padding,
    Stream(StreamFrame<'a>),
    RstStream(RstStreamFrame),
    StopSending(StopSendingFrame),
}

/// Parses the frame starting at `buf[0]`, returning it and the number of bytes consumed.
pub(crate) fn parse(buf: &[u8]) -> Result<(Frame<'_>, usize)> {
    let Some(&type_byte) = buf.first() else {
        bail!(FrameParseError::Truncated);
    };
    if (type_byte & FRAME_TYPE_STREAM_MASK) == FRAME_TYPE_STREAM_MASK {
        let (frame, consumed) = stream_frame::parse(buf)?;
        return Ok((Frame::Stream(frame), consumed));
    }
    match type_byte {
        FRAME_TYPE_PADDING => Ok((Frame::Padding, 1)),
        FRAME_TYPE_RST_STREAM => {
            let (frame, consumed) = RstStreamFrame::parse(buf)?;
            Ok((Frame::RstStream(frame), consumed))
        }
        FRAME_TYPE_STOP_SENDING => {
            let (frame, consumed) = StopSendingFrame::parse(buf)?;
            Ok((Frame::StopSending(frame), consumed))
        }
        _ => bail!(FrameParseError::UnknownType),
    }
}
