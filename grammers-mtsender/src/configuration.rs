// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::time::Duration;

/// Tunables for [`crate::MTProtoSender::connect`] and its reconnection
/// loop: how many times to retry a failing connection attempt, how long
/// to wait between attempts, and whether reconnection should happen
/// automatically at all.
///
/// Used via struct-update syntax rather than a builder, the same way
/// callers configure the rest of this family of crates.
#[derive(Clone, Debug)]
pub struct Configuration {
    /// How many times [`crate::MTProtoSender::connect`] (and the
    /// reconnect loop) will retry a failing transport connection or
    /// key-negotiation attempt before giving up.
    pub retries: usize,

    /// How long to sleep between connection attempts.
    pub delay: Duration,

    /// If `false`, a dropped connection is reported to the caller
    /// instead of being retried automatically.
    pub auto_reconnect: bool,

    #[doc(hidden)]
    pub __non_exhaustive: (),
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            retries: 5,
            delay: Duration::from_secs(1),
            auto_reconnect: true,
            __non_exhaustive: (),
        }
    }
}
