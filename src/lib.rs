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

use crate::api::Config;
use crate::api::Connection;
use crate::api::MAX_MTU;
use crate::api::Status;
use std::sync::OnceLock;

pub mod api;

pub(crate) mod connection;
pub(crate) mod events;
pub(crate) mod packet;
pub(crate) mod rx;
pub(crate) mod streams;
pub(crate) mod timer;
pub(crate) mod tx;
pub(crate) mod types;

pub use crate::connection::EventCallback;
pub use crate::types::ERROR_CANCELLED;
pub use crate::types::ErrorCode;
pub use crate::types::KeyPhase;
pub use crate::types::PacketNumber;

trait EventSink {
    fn add(&mut self, event: api::ConnectionEvent);
    fn next_event(&mut self) -> Option<api::ConnectionEvent>;
}

#[cfg(test)]
pub(crate) mod testing;

/// Process-wide cryptographic library profile, initialised exactly once.
struct CryptoProfile {
    #[allow(dead_code)]
    config_dir: Option<String>,
}

static CRYPTO_PROFILE: OnceLock<CryptoProfile> = OnceLock::new();

/// Points the cryptographic library at a configuration directory. May be called at most once, and
/// only before any connection has been created; afterwards initialisation has already happened
/// with the default profile and this returns `General`.
pub fn configure_crypto(dir: &str) -> Status {
    if dir.is_empty() {
        return Status::Invalid;
    }
    match CRYPTO_PROFILE.set(CryptoProfile { config_dir: Some(dir.into()) }) {
        Ok(()) => Status::Ok,
        Err(_) => Status::General,
    }
}

/// Returns the version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Creates a new [`Connection`].
///
/// The first connection lazily initialises the cryptographic library with a default profile
/// unless [`configure_crypto`] ran first. The connection starts without a role; call
/// [`Connection::start_client`] or [`Connection::start_server`] to activate it.
pub fn new_connection(config: &Config) -> Result<Connection, Status> {
    CRYPTO_PROFILE.get_or_init(|| CryptoProfile { config_dir: None });

    if config.origin_name.is_empty() {
        return Err(Status::Invalid);
    }
    if config.mtu < 128 || config.mtu > MAX_MTU {
        return Err(Status::Invalid);
    }
    Ok(Connection::new(config.clone()))
}

pub(crate) mod logging {
    #[cfg(not(test))]
    use log::info;
    use std::fmt::Write;
    use std::string::String;
    #[cfg(test)]
    use std::println as info;
    use std::time::Duration;

    pub fn log_datagram(name: &str, ts: Duration, sent: bool, data: &[u8]) {
        let s = data.iter().fold(String::new(), |mut output, c| {
            let _ = write!(output, " {c:02x}");
            output
        });
        let prefix = if sent { "O" } else { "I" };
        let mut remaining = (ts.as_millis() % (24 * 60 * 60 * 1000)) as u64;
        let hours = remaining / (60 * 60 * 1000);
        remaining %= 60 * 60 * 1000;
        let minutes = remaining / (60 * 1000);
        remaining %= 60 * 1000;
        let seconds = remaining / 1000;
        let ms = remaining % 1000;
        info!(
            "{} {:02}:{:02}:{:02}.{:03}{} # QUIC_PAYLOAD {}",
            prefix, hours, minutes, seconds, ms, s, name
        );
    }
}
