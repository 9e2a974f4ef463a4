// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Hand-curated TL surface: wire framing plus the slice of Telegram's
//! schema the sender and message box need to reason about. A full schema
//! would be produced by code generation from the `.tl` files; that
//! generator, and the general (de)serialization of arbitrary TL objects,
//! are out of scope here.
pub mod deserializable;
pub mod deserialize;
pub mod enums;
pub mod functions;
pub mod handshake;
pub mod manual;
pub mod serializable;
pub mod types;

pub use deserializable::Deserializable;
pub use deserialize::{Cursor, Error as DeserializeError, Result as DeserializeResult};
pub use manual::{GzipPacked, Message, MessageContainer, RpcResult};
pub use serializable::Serializable;

/// The 32-bit constructor identifier every boxed TL object is prefixed
/// with on the wire.
pub trait Identifiable {
    const CONSTRUCTOR_ID: u32;
}

/// CRC32 of the supertype name `Updates`, used to recognize any of its
/// variants regardless of which concrete constructor arrived.
pub const UPDATES_SUBCLASS_OF_ID: u32 = 0x8af52aac;

/// A request: knows how to serialize itself and how to parse its own
/// reply out of the bytes carried by an `RpcResult`.
pub trait RemoteCall: Serializable {
    type Return;

    fn read_result(buf: &[u8]) -> DeserializeResult<Self::Return>
    where
        Self: Sized;
}

/// Best-effort human-readable name for a constructor ID, used only for
/// logging; unrecognized IDs are not an error.
pub fn name_for_id(id: u32) -> &'static str {
    use types::updates::State as UpdatesState;
    match id {
        x if x == RpcResult::CONSTRUCTOR_ID => "rpc_result",
        x if x == MessageContainer::CONSTRUCTOR_ID => "msg_container",
        x if x == GzipPacked::CONSTRUCTOR_ID => "gzip_packed",
        x if x == types::MsgsAck::CONSTRUCTOR_ID => "msgs_ack",
        x if x == types::BadMsgNotification::CONSTRUCTOR_ID => "bad_msg_notification",
        x if x == types::BadServerSalt::CONSTRUCTOR_ID => "bad_server_salt",
        x if x == types::MsgsStateReq::CONSTRUCTOR_ID => "msgs_state_req",
        x if x == types::MsgResendReq::CONSTRUCTOR_ID => "msg_resend_req",
        x if x == types::MsgsStateInfo::CONSTRUCTOR_ID => "msgs_state_info",
        x if x == types::MsgsAllInfo::CONSTRUCTOR_ID => "msgs_all_info",
        x if x == types::MsgDetailedInfo::CONSTRUCTOR_ID => "msg_detailed_info",
        x if x == types::MsgNewDetailedInfo::CONSTRUCTOR_ID => "msg_new_detailed_info",
        x if x == types::NewSessionCreated::CONSTRUCTOR_ID => "new_session_created",
        x if x == types::Pong::CONSTRUCTOR_ID => "pong",
        x if x == types::DestroySessionOk::CONSTRUCTOR_ID => "destroy_session_ok",
        x if x == types::DestroySessionNone::CONSTRUCTOR_ID => "destroy_session_none",
        x if x == types::FutureSalt::CONSTRUCTOR_ID => "future_salt",
        x if x == types::FutureSalts::CONSTRUCTOR_ID => "future_salts",
        x if x == types::RpcError::CONSTRUCTOR_ID => "rpc_error",
        x if x == UpdatesState::CONSTRUCTOR_ID => "updates.state",
        x if x == enums::Updates::TOO_LONG_ID => "updatesTooLong",
        x if x == enums::UpdateShort::CONSTRUCTOR_ID => "updateShort",
        x if x == types::UpdatesCombined::CONSTRUCTOR_ID => "updatesCombined",
        x if x == types::Updates::CONSTRUCTOR_ID => "updates",
        x if x == enums::UpdateShortSentMessage::CONSTRUCTOR_ID => "updateShortSentMessage",
        _ => "unknown",
    }
}
