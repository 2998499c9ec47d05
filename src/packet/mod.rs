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

use thiserror::Error;

pub(crate) mod chunk;
pub(crate) mod frame;
pub(crate) mod rst_frame;
pub(crate) mod stream_frame;

/// Frame type byte of a PADDING frame.
pub(crate) const FRAME_TYPE_PADDING: u8 = 0x00;

/// Frame type byte of a RST_STREAM frame.
pub(crate) const FRAME_TYPE_RST_STREAM: u8 = 0x01;

/// Frame type byte of a STOP_SENDING frame.
pub(crate) const FRAME_TYPE_STOP_SENDING: u8 = 0x0c;

/// Mask and value identifying a STREAM frame: the two top bits of the type byte are `11`.
pub(crate) const FRAME_TYPE_STREAM_MASK: u8 = 0xc0;

/// Bytes reserved at the end of every datagram for the AEAD tag.
pub(crate) const AEAD_TAG_LEN: usize = 16;

macro_rules! read_u16_be {
    ($buf: expr) => {
        u16::from_be_bytes($buf[..2].try_into().unwrap())
    };
}

macro_rules! read_u32_be {
    ($buf: expr) => {
        u32::from_be_bytes($buf[..4].try_into().unwrap())
    };
}

macro_rules! read_u64_be {
    ($buf: expr) => {
        u64::from_be_bytes($buf[..8].try_into().unwrap())
    };
}

macro_rules! write_u16_be {
    ($buf: expr, $n: expr) => {
        $buf[..2].copy_from_slice(&($n as u16).to_be_bytes());
    };
}

macro_rules! write_u32_be {
    ($buf: expr, $n: expr) => {
        $buf[..4].copy_from_slice(&($n as u32).to_be_bytes());
    };
}

macro_rules! write_u64_be {
    ($buf: expr, $n: expr) => {
        $buf[..8].copy_from_slice(&($n as u64).to_be_bytes());
    };
}

pub(crate) use read_u16_be;
pub(crate) use read_u32_be;
pub(crate) use read_u64_be;
pub(crate) use write_u16_be;
pub(crate) use write_u32_be;
pub(crate) use write_u64_be;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum FrameParseError {
    #[error("The frame is truncated")]
    Truncated,

    #[error("The frame type byte is not recognized")]
    UnknownType,

    #[error("The stream frame lacks an explicit data length")]
    MissingDataLength,
}
