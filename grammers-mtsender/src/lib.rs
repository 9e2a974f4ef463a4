// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Owns the connection to Telegram: multiplexes concurrent outbound
//! requests over a single logical session, matches replies back to their
//! caller, negotiates the authorization key on cold start, and reacts to
//! the server's clock-skew/salt/sequence corrections by re-sending
//! whatever was affected.
//!
//! [`MTProtoSender`] is the single entry point. It owns a send loop and a
//! receive loop (spawned as Tokio tasks once [`MTProtoSender::connect`]
//! succeeds) that cooperate through state guarded by a single mutex, as
//! described by the concurrency model this crate implements: enqueue
//! happens on the send loop, resolution happens on the receive loop,
//! nothing else touches the wire.

#![deny(unsafe_code)]

mod configuration;
pub mod errors;
mod plain;
mod sender;
pub mod transport;

pub use configuration::Configuration;
pub use errors::{InvocationError, RpcError};
pub use sender::{MTProtoSender, SenderHandle};
