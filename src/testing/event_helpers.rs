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

macro_rules! expect_event_1 {
    ($event:expr, $event_type:ident) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                crate::api::ConnectionEvent::$event_type(d) => d,
                _ => panic!("Expected $event_type, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_new_stream_data {
    ($event:expr) => {
        crate::testing::event_helpers::expect_event_1!($event, NewStreamData)
    };
}

macro_rules! expect_stream_reset {
    ($event:expr) => {
        crate::testing::event_helpers::expect_event_1!($event, StreamReset)
    };
}

macro_rules! expect_error {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                crate::api::ConnectionEvent::Error(status, message) => (status, message),
                _ => panic!("Expected Error, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_close_connection {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                crate::api::ConnectionEvent::CloseConnection => {}
                _ => panic!("Expected CloseConnection, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_no_event {
    ($event:expr) => {
        match $event {
            None => {}
            Some(e) => panic!("Expected no event, got {:?}", e),
        }
    };
}

pub(crate) use expect_close_connection;
pub(crate) use expect_error;
pub(crate) use expect_event_1;
pub(crate) use expect_new_stream_data;
pub(crate) use expect_no_event;
pub(crate) use expect_stream_reset;
