// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Hand-curated request objects: just the handful the sender issues for
//! its own housekeeping (ping, difference fetch) plus one outgoing RPC
//! used to ground the `UpdateShortSentMessage` pairing.
use crate::deserialize::Cursor;
use crate::{enums, types, DeserializeResult, Identifiable, RemoteCall, Serializable};

macro_rules! impl_identifiable {
    ($ty:ty, $id:expr) => {
        impl Identifiable for $ty {
            const CONSTRUCTOR_ID: u32 = $id;
        }
    };
}

/// `invokeAfterMsg#cb9f372d {X:Type} msg_id:long query:!X = X;`
///
/// Wraps an already-serialized request so the server executes it only
/// after the message identified by `msg_id` has been handled. `query` is
/// spliced in verbatim: its own constructor ID is part of those bytes.
pub struct InvokeAfterMsg {
    pub msg_id: i64,
    pub query: Vec<u8>,
}
impl_identifiable!(InvokeAfterMsg, 0xcb9f372d);
impl Serializable for InvokeAfterMsg {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_id.serialize(buf);
        buf.extend(self.query.iter().copied());
    }
}

/// `ping#7abe77ec ping_id:long = Pong;`
pub struct Ping {
    pub ping_id: i64,
}
impl_identifiable!(Ping, 0x7abe77ec);
impl Serializable for Ping {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.ping_id.serialize(buf);
    }
}
impl RemoteCall for Ping {
    type Return = types::Pong;
    fn read_result(buf: &[u8]) -> DeserializeResult<Self::Return> {
        types::Pong::deserialize(&mut Cursor::from_slice(buf))
    }
}

/// `ping_delay_disconnect#f3427b8c ping_id:long disconnect_delay:int = Pong;`
pub struct PingDelayDisconnect {
    pub ping_id: i64,
    pub disconnect_delay: i32,
}
impl_identifiable!(PingDelayDisconnect, 0xf3427b8c);
impl Serializable for PingDelayDisconnect {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.ping_id.serialize(buf);
        self.disconnect_delay.serialize(buf);
    }
}
impl RemoteCall for PingDelayDisconnect {
    type Return = types::Pong;
    fn read_result(buf: &[u8]) -> DeserializeResult<Self::Return> {
        types::Pong::deserialize(&mut Cursor::from_slice(buf))
    }
}

/// `destroy_session#e7512126 session_id:long = DestroySessionRes;`
pub struct DestroySession {
    pub session_id: i64,
}
impl_identifiable!(DestroySession, 0xe7512126);
impl Serializable for DestroySession {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.session_id.serialize(buf);
    }
}

/// `auth.logOut#3e72ba19 = Bool;`
///
/// Telegram never sends a real `rpc_result` for this one: the connection
/// is torn down and the request is acknowledged via a bare `MsgsAck`
/// instead, which the sender's dispatch table special-cases.
pub struct LogOut;
impl_identifiable!(LogOut, 0x3e72ba19);
impl Serializable for LogOut {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
    }
}
impl RemoteCall for LogOut {
    type Return = bool;
    fn read_result(buf: &[u8]) -> DeserializeResult<Self::Return> {
        bool::deserialize(&mut Cursor::from_slice(buf))
    }
}

use crate::Deserializable;

/// `help.getConfig#c4f9186b = Config;`
///
/// A deliberately minimal stand-in: the sender only needs something
/// innocuous to batch alongside `updates.getState` to exercise ordered
/// submission, not the real (much larger) `Config` schema.
pub mod help {
    use super::*;

    pub struct GetConfig;
    impl_identifiable!(GetConfig, 0xc4f9186b);
    impl Serializable for GetConfig {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            Self::CONSTRUCTOR_ID.serialize(buf);
        }
    }
    impl RemoteCall for GetConfig {
        type Return = ();
        fn read_result(_buf: &[u8]) -> DeserializeResult<Self::Return> {
            Ok(())
        }
    }
}

pub mod updates {
    use super::*;

    /// `updates.getState#edd4882a = updates.State;`
    pub struct GetState;
    impl_identifiable!(GetState, 0xedd4882a);
    impl Serializable for GetState {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            Self::CONSTRUCTOR_ID.serialize(buf);
        }
    }
    impl RemoteCall for GetState {
        type Return = types::updates::State;
        fn read_result(buf: &[u8]) -> DeserializeResult<Self::Return> {
            types::updates::State::deserialize(&mut Cursor::from_slice(buf))
        }
    }

    /// `updates.getDifference#19c2f763 flags:# pts:int pts_limit:flags.1?int
    /// pts_total_limit:flags.0?int date:int qts:int qts_limit:flags.2?int = updates.Difference;`
    pub struct GetDifference {
        pub pts: i32,
        pub pts_limit: Option<i32>,
        pub pts_total_limit: Option<i32>,
        pub date: i32,
        pub qts: i32,
        pub qts_limit: Option<i32>,
    }
    impl_identifiable!(GetDifference, 0x19c2f763);
    impl Serializable for GetDifference {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            Self::CONSTRUCTOR_ID.serialize(buf);
            let mut flags = 0i32;
            if self.pts_total_limit.is_some() {
                flags |= 1;
            }
            if self.pts_limit.is_some() {
                flags |= 2;
            }
            if self.qts_limit.is_some() {
                flags |= 4;
            }
            flags.serialize(buf);
            self.pts.serialize(buf);
            if let Some(v) = self.pts_limit {
                v.serialize(buf);
            }
            if let Some(v) = self.pts_total_limit {
                v.serialize(buf);
            }
            self.date.serialize(buf);
            self.qts.serialize(buf);
            if let Some(v) = self.qts_limit {
                v.serialize(buf);
            }
        }
    }
    impl RemoteCall for GetDifference {
        type Return = enums::updates::Difference;
        fn read_result(buf: &[u8]) -> DeserializeResult<Self::Return> {
            enums::updates::Difference::deserialize(&mut Cursor::from_slice(buf))
        }
    }

    /// `updates.getChannelDifference#3173d78 flags:# force:flags.0?true
    /// channel:InputChannel filter:ChannelMessagesFilter pts:int limit:int = updates.ChannelDifference;`
    pub struct GetChannelDifference {
        pub force: bool,
        pub channel: enums::InputChannel,
        pub filter: enums::ChannelMessagesFilter,
        pub pts: i32,
        pub limit: i32,
    }
    impl_identifiable!(GetChannelDifference, 0x03173d78);
    impl Serializable for GetChannelDifference {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            Self::CONSTRUCTOR_ID.serialize(buf);
            (if self.force { 1i32 } else { 0i32 }).serialize(buf);
            self.channel.serialize(buf);
            self.filter.serialize(buf);
            self.pts.serialize(buf);
            self.limit.serialize(buf);
        }
    }
    impl RemoteCall for GetChannelDifference {
        type Return = enums::updates::ChannelDifference;
        fn read_result(buf: &[u8]) -> DeserializeResult<Self::Return> {
            enums::updates::ChannelDifference::deserialize(&mut Cursor::from_slice(buf))
        }
    }
}

pub mod messages {
    use super::*;

    /// A deliberately minimal stand-in for `messages.sendMessage`: just
    /// enough fields to be the request an `UpdateShortSentMessage` reply
    /// is paired against.
    pub struct SendMessage {
        pub peer: types::Peer,
        pub message: String,
        pub random_id: i64,
    }
    impl_identifiable!(SendMessage, 0x280d096f);
    impl Serializable for SendMessage {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            Self::CONSTRUCTOR_ID.serialize(buf);
            self.peer.serialize(buf);
            self.message.clone().serialize(buf);
            self.random_id.serialize(buf);
        }
    }
    impl Deserializable for SendMessage {
        fn deserialize(buf: &mut Cursor) -> DeserializeResult<Self> {
            let id = u32::deserialize(buf)?;
            if id != Self::CONSTRUCTOR_ID {
                return Err(crate::DeserializeError::UnexpectedConstructor { id });
            }
            Ok(Self {
                peer: types::Peer::deserialize(buf)?,
                message: String::deserialize(buf)?,
                random_id: i64::deserialize(buf)?,
            })
        }
    }
    impl RemoteCall for SendMessage {
        type Return = enums::Updates;
        fn read_result(buf: &[u8]) -> DeserializeResult<Self::Return> {
            enums::Updates::deserialize(&mut Cursor::from_slice(buf))
        }
    }
}
