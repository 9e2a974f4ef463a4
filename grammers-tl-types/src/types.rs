// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Hand-curated leaf types for the slice of Telegram's schema the sender
//! and message box actually need to reason about. A full schema is
//! produced by code generation from the `.tl` files, out of scope here;
//! every struct below only carries the fields its callers read.
#![allow(clippy::unreadable_literal)]
use crate::deserialize::{Cursor, Error, Result};
use crate::{Deserializable, Identifiable, Serializable};

macro_rules! impl_identifiable {
    ($ty:ty, $id:expr) => {
        impl Identifiable for $ty {
            const CONSTRUCTOR_ID: u32 = $id;
        }
    };
}

/// `msgs_ack#62d6b459 msg_ids:Vector<long> = MsgsAck;`
pub struct MsgsAck {
    pub msg_ids: Vec<i64>,
}
impl_identifiable!(MsgsAck, 0x62d6b459);
impl Serializable for MsgsAck {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_ids.serialize(buf);
    }
}
impl Deserializable for MsgsAck {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            msg_ids: Vec::deserialize(buf)?,
        })
    }
}

/// `bad_msg_notification#a7eff811 bad_msg_id:long bad_msg_seqno:int error_code:int = BadMsgNotification;`
pub struct BadMsgNotification {
    pub bad_msg_id: i64,
    pub bad_msg_seqno: i32,
    pub error_code: i32,
}
impl_identifiable!(BadMsgNotification, 0xa7eff811);
impl Deserializable for BadMsgNotification {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            bad_msg_id: i64::deserialize(buf)?,
            bad_msg_seqno: i32::deserialize(buf)?,
            error_code: i32::deserialize(buf)?,
        })
    }
}

/// `bad_server_salt#edab447b bad_msg_id:long bad_msg_seqno:int error_code:int new_server_salt:long = BadMsgNotification;`
pub struct BadServerSalt {
    pub bad_msg_id: i64,
    pub bad_msg_seqno: i32,
    pub error_code: i32,
    pub new_server_salt: i64,
}
impl_identifiable!(BadServerSalt, 0xedab447b);
impl Deserializable for BadServerSalt {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            bad_msg_id: i64::deserialize(buf)?,
            bad_msg_seqno: i32::deserialize(buf)?,
            error_code: i32::deserialize(buf)?,
            new_server_salt: i64::deserialize(buf)?,
        })
    }
}

/// `msgs_state_req#da69fb52 msg_ids:Vector<long> = MsgsStateReq;`
pub struct MsgsStateReq {
    pub msg_ids: Vec<i64>,
}
impl_identifiable!(MsgsStateReq, 0xda69fb52);
impl Deserializable for MsgsStateReq {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            msg_ids: Vec::deserialize(buf)?,
        })
    }
}

/// `msg_resend_req#7d861a08 msg_ids:Vector<long> = MsgResendReq;`
pub struct MsgResendReq {
    pub msg_ids: Vec<i64>,
}
impl_identifiable!(MsgResendReq, 0x7d861a08);
impl Deserializable for MsgResendReq {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            msg_ids: Vec::deserialize(buf)?,
        })
    }
}

/// `msgs_state_info#04deb57d req_msg_id:long info:string = MsgsStateInfo;`
pub struct MsgsStateInfo {
    pub req_msg_id: i64,
    pub info: Vec<u8>,
}
impl_identifiable!(MsgsStateInfo, 0x04deb57d);
impl Serializable for MsgsStateInfo {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        self.info.serialize(buf);
    }
}

/// `msgs_all_info#8cc0d131 msg_ids:Vector<long> info:string = MsgsAllInfo;`
pub struct MsgsAllInfo {
    pub msg_ids: Vec<i64>,
    pub info: Vec<u8>,
}
impl_identifiable!(MsgsAllInfo, 0x8cc0d131);
impl Deserializable for MsgsAllInfo {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            msg_ids: Vec::deserialize(buf)?,
            info: Vec::deserialize(buf)?,
        })
    }
}

/// `msg_detailed_info#276d3ec6 msg_id:long answer_msg_id:long bytes:int status:int = MsgDetailedInfo;`
pub struct MsgDetailedInfo {
    pub msg_id: i64,
    pub answer_msg_id: i64,
    pub bytes: i32,
    pub status: i32,
}
impl_identifiable!(MsgDetailedInfo, 0x276d3ec6);
impl Deserializable for MsgDetailedInfo {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            msg_id: i64::deserialize(buf)?,
            answer_msg_id: i64::deserialize(buf)?,
            bytes: i32::deserialize(buf)?,
            status: i32::deserialize(buf)?,
        })
    }
}

/// `msg_new_detailed_info#809db6df answer_msg_id:long bytes:int status:int = MsgDetailedInfo;`
pub struct MsgNewDetailedInfo {
    pub answer_msg_id: i64,
    pub bytes: i32,
    pub status: i32,
}
impl_identifiable!(MsgNewDetailedInfo, 0x809db6df);
impl Deserializable for MsgNewDetailedInfo {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            answer_msg_id: i64::deserialize(buf)?,
            bytes: i32::deserialize(buf)?,
            status: i32::deserialize(buf)?,
        })
    }
}

/// `new_session_created#9ec20908 first_msg_id:long unique_id:long server_salt:long = NewSession;`
pub struct NewSessionCreated {
    pub first_msg_id: i64,
    pub unique_id: i64,
    pub server_salt: i64,
}
impl_identifiable!(NewSessionCreated, 0x9ec20908);
impl Deserializable for NewSessionCreated {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            first_msg_id: i64::deserialize(buf)?,
            unique_id: i64::deserialize(buf)?,
            server_salt: i64::deserialize(buf)?,
        })
    }
}

/// `pong#347773c5 msg_id:long ping_id:long = Pong;`
pub struct Pong {
    pub msg_id: i64,
    pub ping_id: i64,
}
impl_identifiable!(Pong, 0x347773c5);
impl Deserializable for Pong {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            msg_id: i64::deserialize(buf)?,
            ping_id: i64::deserialize(buf)?,
        })
    }
}

/// `destroy_session_ok#e22045fc session_id:long = DestroySessionRes;`
pub struct DestroySessionOk {
    pub session_id: i64,
}
impl_identifiable!(DestroySessionOk, 0xe22045fc);
impl Deserializable for DestroySessionOk {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            session_id: i64::deserialize(buf)?,
        })
    }
}

/// `destroy_session_none#62d350c9 session_id:long = DestroySessionRes;`
pub struct DestroySessionNone {
    pub session_id: i64,
}
impl_identifiable!(DestroySessionNone, 0x62d350c9);
impl Deserializable for DestroySessionNone {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            session_id: i64::deserialize(buf)?,
        })
    }
}

/// `future_salt#0949d9dc valid_since:int valid_until:int salt:long = FutureSalt;`
pub struct FutureSalt {
    pub valid_since: i32,
    pub valid_until: i32,
    pub salt: i64,
}
impl_identifiable!(FutureSalt, 0x0949d9dc);
impl Deserializable for FutureSalt {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            valid_since: i32::deserialize(buf)?,
            valid_until: i32::deserialize(buf)?,
            salt: i64::deserialize(buf)?,
        })
    }
}

/// `future_salts#ae500895 req_msg_id:long now:int salts:vector<future_salt> = FutureSalts;`
pub struct FutureSalts {
    pub req_msg_id: i64,
    pub now: i32,
    pub salts: Vec<FutureSalt>,
}
impl_identifiable!(FutureSalts, 0xae500895);
impl Deserializable for FutureSalts {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        let req_msg_id = i64::deserialize(buf)?;
        let now = i32::deserialize(buf)?;
        // Bare vector: the inner future_salt constructors are read directly,
        // not wrapped in the usual boxed-vector envelope.
        let len = u32::deserialize(buf)? as usize;
        let mut salts = Vec::with_capacity(len);
        for _ in 0..len {
            salts.push(FutureSalt::deserialize(buf)?);
        }
        Ok(Self {
            req_msg_id,
            now,
            salts,
        })
    }
}

/// `rpc_error#2144ca19 error_code:int error_message:string = RpcError;`
pub struct RpcError {
    pub error_code: i32,
    pub error_message: String,
}
impl_identifiable!(RpcError, 0x2144ca19);
impl Deserializable for RpcError {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            error_code: i32::deserialize(buf)?,
            error_message: String::deserialize(buf)?,
        })
    }
}

/// A deliberately minimal stand-in for Telegram's real, much larger `User`
/// schema: code-generating the full thing is out of scope, and the message
/// box only ever forwards these opaquely to its caller.
pub struct User {
    pub id: i64,
}
impl_identifiable!(User, 0x5db19c1a);
impl Serializable for User {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.id.serialize(buf);
    }
}
impl Deserializable for User {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            id: i64::deserialize(buf)?,
        })
    }
}

/// A deliberately minimal stand-in for Telegram's real `Chat`/`Channel`
/// schema, analogous to [`User`] above.
pub struct Chat {
    pub id: i64,
    pub is_channel: bool,
}
impl_identifiable!(Chat, 0x2e13f4c9);
impl Serializable for Chat {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.id.serialize(buf);
        self.is_channel.serialize(buf);
    }
}
impl Deserializable for Chat {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            id: i64::deserialize(buf)?,
            is_channel: bool::deserialize(buf)?,
        })
    }
}

/// Where a message lives; only the `Channel` case matters for [`PtsInfo`]
/// extraction, but all three are kept to round-trip real payloads.
pub enum Peer {
    User(i64),
    Chat(i64),
    Channel(i64),
}
impl Serializable for Peer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        match self {
            Peer::User(id) => {
                0x59511722u32.serialize(buf);
                id.serialize(buf);
            }
            Peer::Chat(id) => {
                0x36c6019au32.serialize(buf);
                id.serialize(buf);
            }
            Peer::Channel(id) => {
                0xa2a5371eu32.serialize(buf);
                id.serialize(buf);
            }
        }
    }
}
impl Deserializable for Peer {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        Ok(match id {
            0x59511722 => Peer::User(i64::deserialize(buf)?),
            0x36c6019a => Peer::Chat(i64::deserialize(buf)?),
            0xa2a5371e => Peer::Channel(i64::deserialize(buf)?),
            _ => return Err(Error::UnexpectedConstructor { id }),
        })
    }
}

/// A deliberately minimal stand-in for Telegram's real `Message`/`Dialog`
/// schema: only the fields `apply_pts_info`'s entry resolution needs.
pub struct Message {
    pub id: i32,
    pub peer_id: Option<Peer>,
    pub date: i32,
    pub message: String,
}
impl_identifiable!(Message, 0x38116ee0);
impl Serializable for Message {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.id.serialize(buf);
        self.peer_id.is_some().serialize(buf);
        if let Some(peer) = &self.peer_id {
            peer.serialize(buf);
        }
        self.date.serialize(buf);
        self.message.clone().serialize(buf);
    }
}
impl Deserializable for Message {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        let msg_id = i32::deserialize(buf)?;
        let has_peer = bool::deserialize(buf)?;
        let peer_id = if has_peer {
            Some(Peer::deserialize(buf)?)
        } else {
            None
        };
        Ok(Self {
            id: msg_id,
            peer_id,
            date: i32::deserialize(buf)?,
            message: String::deserialize(buf)?,
        })
    }
}

/// A deliberately minimal stand-in for Telegram's real `EncryptedMessage`.
pub struct EncryptedMessage {
    pub random_id: i64,
    pub chat_id: i32,
    pub date: i32,
}
impl_identifiable!(EncryptedMessage, 0xed18c118);
impl Serializable for EncryptedMessage {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.random_id.serialize(buf);
        self.chat_id.serialize(buf);
        self.date.serialize(buf);
    }
}
impl Deserializable for EncryptedMessage {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            random_id: i64::deserialize(buf)?,
            chat_id: i32::deserialize(buf)?,
            date: i32::deserialize(buf)?,
        })
    }
}

/// `updateNewMessage#1f2b0afd message:Message pts:int pts_count:int = Update;`
pub struct UpdateNewMessage {
    pub message: Message,
    pub pts: i32,
    pub pts_count: i32,
}
impl_identifiable!(UpdateNewMessage, 0x1f2b0afd);
impl Serializable for UpdateNewMessage {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.message.serialize(buf);
        self.pts.serialize(buf);
        self.pts_count.serialize(buf);
    }
}
impl Deserializable for UpdateNewMessage {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            message: Message::deserialize(buf)?,
            pts: i32::deserialize(buf)?,
            pts_count: i32::deserialize(buf)?,
        })
    }
}

/// `updateNewChannelMessage#62ba04d9 message:Message pts:int pts_count:int = Update;`
pub struct UpdateNewChannelMessage {
    pub message: Message,
    pub pts: i32,
    pub pts_count: i32,
}
impl_identifiable!(UpdateNewChannelMessage, 0x62ba04d9);
impl Serializable for UpdateNewChannelMessage {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.message.serialize(buf);
        self.pts.serialize(buf);
        self.pts_count.serialize(buf);
    }
}
impl Deserializable for UpdateNewChannelMessage {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            message: Message::deserialize(buf)?,
            pts: i32::deserialize(buf)?,
            pts_count: i32::deserialize(buf)?,
        })
    }
}

/// `updateNewEncryptedMessage#12bcbd9a message:EncryptedMessage qts:int = Update;`
pub struct UpdateNewEncryptedMessage {
    pub message: EncryptedMessage,
    pub qts: i32,
}
impl_identifiable!(UpdateNewEncryptedMessage, 0x12bcbd9a);
impl Serializable for UpdateNewEncryptedMessage {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.message.serialize(buf);
        self.qts.serialize(buf);
    }
}
impl Deserializable for UpdateNewEncryptedMessage {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            message: EncryptedMessage::deserialize(buf)?,
            qts: i32::deserialize(buf)?,
        })
    }
}

/// `updateChannelTooLong#108d941f channel_id:long pts:flags.0?int = Update;`
///
/// `pts` is absent when the server doesn't know it either; the message
/// box then has to fall back on whatever state it already holds.
pub struct UpdateChannelTooLong {
    pub channel_id: i64,
    pub pts: Option<i32>,
}
impl_identifiable!(UpdateChannelTooLong, 0x108d941f);
impl Serializable for UpdateChannelTooLong {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (if self.pts.is_some() { 1i32 } else { 0i32 }).serialize(buf);
        self.channel_id.serialize(buf);
        if let Some(pts) = self.pts {
            pts.serialize(buf);
        }
    }
}
impl Deserializable for UpdateChannelTooLong {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        let flags = i32::deserialize(buf)?;
        let channel_id = i64::deserialize(buf)?;
        let pts = if flags & 1 != 0 {
            Some(i32::deserialize(buf)?)
        } else {
            None
        };
        Ok(Self { channel_id, pts })
    }
}

/// `updateDeleteMessages#a20db0e5 messages:Vector<int> pts:int pts_count:int = Update;`
pub struct UpdateDeleteMessages {
    pub messages: Vec<i32>,
    pub pts: i32,
    pub pts_count: i32,
}
impl_identifiable!(UpdateDeleteMessages, 0xa20db0e5);
impl Serializable for UpdateDeleteMessages {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.messages.serialize(buf);
        self.pts.serialize(buf);
        self.pts_count.serialize(buf);
    }
}
impl Deserializable for UpdateDeleteMessages {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            messages: Vec::deserialize(buf)?,
            pts: i32::deserialize(buf)?,
            pts_count: i32::deserialize(buf)?,
        })
    }
}

/// `updateDeleteChannelMessages#c37521c9 channel_id:long messages:Vector<int> pts:int pts_count:int = Update;`
pub struct UpdateDeleteChannelMessages {
    pub channel_id: i64,
    pub messages: Vec<i32>,
    pub pts: i32,
    pub pts_count: i32,
}
impl_identifiable!(UpdateDeleteChannelMessages, 0xc37521c9);
impl Serializable for UpdateDeleteChannelMessages {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.channel_id.serialize(buf);
        self.messages.serialize(buf);
        self.pts.serialize(buf);
        self.pts_count.serialize(buf);
    }
}
impl Deserializable for UpdateDeleteChannelMessages {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Ok(Self {
            channel_id: i64::deserialize(buf)?,
            messages: Vec::deserialize(buf)?,
            pts: i32::deserialize(buf)?,
            pts_count: i32::deserialize(buf)?,
        })
    }
}

/// `updatesCombined#725b04c3 updates:Vector<Update> users:Vector<User> chats:Vector<Chat> date:int seq_start:int seq:int = Updates;`
pub struct UpdatesCombined {
    pub updates: Vec<crate::enums::Update>,
    pub users: Vec<User>,
    pub chats: Vec<Chat>,
    pub date: i32,
    pub seq_start: i32,
    pub seq: i32,
}
impl_identifiable!(UpdatesCombined, 0x725b04c3);
impl UpdatesCombined {
    /// Reads the fields only; the caller has already consumed the
    /// constructor ID (used when dispatching from within the `Updates`
    /// union, which must peek the ID before knowing which arm to parse).
    pub(crate) fn deserialize_fields(buf: &mut Cursor) -> Result<Self> {
        Ok(Self {
            updates: Vec::deserialize(buf)?,
            users: Vec::deserialize(buf)?,
            chats: Vec::deserialize(buf)?,
            date: i32::deserialize(buf)?,
            seq_start: i32::deserialize(buf)?,
            seq: i32::deserialize(buf)?,
        })
    }
}
impl Deserializable for UpdatesCombined {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Self::deserialize_fields(buf)
    }
}

/// `updates#74ae4240 updates:Vector<Update> users:Vector<User> chats:Vector<Chat> date:int seq:int = Updates;`
pub struct Updates {
    pub updates: Vec<crate::enums::Update>,
    pub users: Vec<User>,
    pub chats: Vec<Chat>,
    pub date: i32,
    pub seq: i32,
}
impl_identifiable!(Updates, 0x74ae4240);
impl Updates {
    pub(crate) fn deserialize_fields(buf: &mut Cursor) -> Result<Self> {
        Ok(Self {
            updates: Vec::deserialize(buf)?,
            users: Vec::deserialize(buf)?,
            chats: Vec::deserialize(buf)?,
            date: i32::deserialize(buf)?,
            seq: i32::deserialize(buf)?,
        })
    }
}
impl Deserializable for Updates {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != Self::CONSTRUCTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
        Self::deserialize_fields(buf)
    }
}

/// `inputChannel#f35aec28 channel_id:long access_hash:long = InputChannel;`
pub struct InputChannelData {
    pub channel_id: i64,
    pub access_hash: i64,
}
impl_identifiable!(InputChannelData, 0xf35aec28);
impl Serializable for InputChannelData {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.channel_id.serialize(buf);
        self.access_hash.serialize(buf);
    }
}

/// The non-slice arm of `updates.Difference`, shared by `difference` and
/// `differenceSlice` (the latter additionally carries an intermediate
/// `state` that the message box treats identically to a final one).
pub struct DifferenceFull {
    pub new_messages: Vec<Message>,
    pub new_encrypted_messages: Vec<EncryptedMessage>,
    pub other_updates: Vec<crate::enums::Update>,
    pub users: Vec<User>,
    pub chats: Vec<Chat>,
    pub state: updates::State,
}
impl Deserializable for DifferenceFull {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        Ok(Self {
            new_messages: Vec::deserialize(buf)?,
            new_encrypted_messages: Vec::deserialize(buf)?,
            other_updates: Vec::deserialize(buf)?,
            users: Vec::deserialize(buf)?,
            chats: Vec::deserialize(buf)?,
            state: updates::State::deserialize(buf)?,
        })
    }
}

/// The non-empty, non-too-long arm of `updates.ChannelDifference`.
pub struct ChannelDifferenceFull {
    pub final_: bool,
    pub pts: i32,
    pub timeout: Option<i32>,
    pub new_messages: Vec<Message>,
    pub other_updates: Vec<crate::enums::Update>,
    pub users: Vec<User>,
    pub chats: Vec<Chat>,
}
impl Deserializable for ChannelDifferenceFull {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let flags = i32::deserialize(buf)?;
        let final_ = flags & 1 != 0;
        let pts = i32::deserialize(buf)?;
        let timeout = if flags & 2 != 0 {
            Some(i32::deserialize(buf)?)
        } else {
            None
        };
        Ok(Self {
            final_,
            pts,
            timeout,
            new_messages: Vec::deserialize(buf)?,
            other_updates: Vec::deserialize(buf)?,
            users: Vec::deserialize(buf)?,
            chats: Vec::deserialize(buf)?,
        })
    }
}

pub mod updates {
    use super::*;

    /// `updates.state#a56c2a3e pts:int qts:int date:int seq:int unread_count:int = updates.State;`
    pub struct State {
        pub pts: i32,
        pub qts: i32,
        pub date: i32,
        pub seq: i32,
        pub unread_count: i32,
    }
    impl_identifiable!(State, 0xa56c2a3e);
    impl Deserializable for State {
        fn deserialize(buf: &mut Cursor) -> Result<Self> {
            let id = u32::deserialize(buf)?;
            if id != Self::CONSTRUCTOR_ID {
                return Err(Error::UnexpectedConstructor { id });
            }
            Ok(Self {
                pts: i32::deserialize(buf)?,
                qts: i32::deserialize(buf)?,
                date: i32::deserialize(buf)?,
                seq: i32::deserialize(buf)?,
                unread_count: i32::deserialize(buf)?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_roundtrip() {
        let peer = Peer::Channel(123456);
        let bytes = peer.to_bytes();
        match Peer::from_bytes(&bytes).unwrap() {
            Peer::Channel(id) => assert_eq!(id, 123456),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn message_roundtrip_with_channel_peer() {
        let message = Message {
            id: 1,
            peer_id: Some(Peer::Channel(42)),
            date: 1000,
            message: "hi".to_owned(),
        };
        let bytes = message.to_bytes();
        let back = Message::from_bytes(&bytes).unwrap();
        match back.peer_id {
            Some(Peer::Channel(id)) => assert_eq!(id, 42),
            _ => panic!("expected channel peer"),
        }
    }

    #[test]
    fn future_salts_roundtrip() {
        let bytes = [
            0x95, 0x08, 0x50, 0xae, // future_salts
            7, 0, 0, 0, 0, 0, 0, 0, // req_msg_id
            9, 0, 0, 0, // now
            1, 0, 0, 0, // salts len (bare vector)
            0xdc, 0xd9, 0x49, 0x09, // future_salt
            1, 0, 0, 0, // valid_since
            2, 0, 0, 0, // valid_until
            3, 0, 0, 0, 0, 0, 0, 0, // salt
        ];
        let salts = FutureSalts::from_bytes(&bytes).unwrap();
        assert_eq!(salts.req_msg_id, 7);
        assert_eq!(salts.salts.len(), 1);
        assert_eq!(salts.salts[0].salt, 3);
    }
}
