// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Transport errors trigger reconnection, security errors drop a single
//! message, `InvalidBuffer` (404) tears the session down for good, and
//! RPC errors are handed back to whichever caller issued the request.
use std::{fmt, io};

use grammers_mtproto::authentication;
use grammers_mtproto::packer::EnqueueError;
use grammers_tl_types as tl;

/// Failures that can occur while reading and framing a single message off
/// the wire. None of these are necessarily fatal to the connection: most
/// are logged and the offending message dropped, while a few (`Io`,
/// `InvalidBuffer`) bring the connection down.
#[derive(Debug)]
pub enum ReadError {
    /// The transport or socket itself failed.
    Io(io::Error),

    /// Decrypting or unframing the envelope failed integrity checks.
    /// The offending message is dropped; the connection is not killed.
    Security(grammers_mtproto::errors::Error),

    /// The server rejected our authorization key outright (transport
    /// error code 404). The key must be cleared and the session
    /// considered dead.
    InvalidBuffer,

    /// A constructor ID was encountered that this crate's hand-curated
    /// TL schema does not recognize. Never fatal.
    TypeNotFound { constructor_id: u32 },

    /// The body of an otherwise well-framed message failed to parse.
    Deserialize(tl::DeserializeError),
}

impl std::error::Error for ReadError {}

impl Clone for ReadError {
    fn clone(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(
                e.raw_os_error()
                    .map(io::Error::from_raw_os_error)
                    .unwrap_or_else(|| io::Error::new(e.kind(), e.to_string())),
            ),
            Self::Security(e) => Self::Security(e_clone(e)),
            Self::InvalidBuffer => Self::InvalidBuffer,
            Self::TypeNotFound { constructor_id } => Self::TypeNotFound {
                constructor_id: *constructor_id,
            },
            Self::Deserialize(e) => Self::Deserialize(*e),
        }
    }
}

// `grammers_mtproto::errors::Error` does not derive `Clone` (it carries a
// `tl::DeserializeError`, which is `Copy`, plus small value types), so a
// manual re-match avoids adding a dependency edge just for this.
fn e_clone(e: &grammers_mtproto::errors::Error) -> grammers_mtproto::errors::Error {
    use grammers_mtproto::errors::Error::*;
    match e {
        NoAuthKey => NoAuthKey,
        Crypto(c) => Crypto(c.clone()),
        BadSessionId { got, expected } => BadSessionId {
            got: *got,
            expected: *expected,
        },
        BadMessageId { msg_id } => BadMessageId { msg_id: *msg_id },
        Deserialize(d) => Deserialize(*d),
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "read error, io failed: {err}"),
            Self::Security(err) => write!(f, "read error, security check failed: {err}"),
            Self::InvalidBuffer => write!(f, "read error, server rejected the authorization key"),
            Self::TypeNotFound { constructor_id } => {
                write!(f, "read error, unknown constructor: {constructor_id:08x}")
            }
            Self::Deserialize(err) => write!(f, "read error, bad response body: {err}"),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<grammers_mtproto::errors::Error> for ReadError {
    fn from(error: grammers_mtproto::errors::Error) -> Self {
        Self::Security(error)
    }
}

impl From<tl::DeserializeError> for ReadError {
    fn from(error: tl::DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

/// The error type reported by the server when a request is misused.
///
/// Returned when Telegram replies to an RPC with [`tl::types::RpcError`].
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// A numerical value similar to HTTP response status codes.
    pub code: i32,

    /// The ASCII error name, normally in screaming snake case. Digit
    /// words are stripped out and surfaced via [`RpcError::value`]
    /// instead (e.g. `FLOOD_WAIT_31` becomes `FLOOD_WAIT` with value 31).
    pub name: String,

    /// The numeric value embedded in the error name, if any.
    pub value: Option<u32>,

    /// The constructor identifier of the request that triggered this
    /// error, when known.
    pub caused_by: Option<u32>,
}

impl std::error::Error for RpcError {}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.name)?;
        if let Some(caused_by) = self.caused_by {
            write!(f, " caused by {}", tl::name_for_id(caused_by))?;
        }
        if let Some(value) = self.value {
            write!(f, " (value: {value})")?;
        }
        Ok(())
    }
}

impl From<tl::types::RpcError> for RpcError {
    fn from(error: tl::types::RpcError) -> Self {
        if let Some((value, parsed_value)) = error
            .error_message
            .split(|c: char| !c.is_ascii_digit())
            .flat_map(|value| value.parse::<u32>().map(|parsed_value| (value, parsed_value)))
            .next()
        {
            let mut to_remove = String::with_capacity(1 + value.len());
            to_remove.push('_');
            to_remove.push_str(value);
            Self {
                code: error.error_code,
                name: error.error_message.replace(&to_remove, ""),
                value: Some(parsed_value),
                caused_by: None,
            }
        } else {
            Self {
                code: error.error_code,
                name: error.error_message.clone(),
                value: None,
                caused_by: None,
            }
        }
    }
}

impl RpcError {
    /// Matches on the name of the RPC error (case-sensitive). A single
    /// leading or trailing `*` checks a prefix/suffix instead of exact
    /// equality (e.g. `"PHONE_CODE_*"`).
    pub fn is(&self, rpc_error: &str) -> bool {
        if let Some(rpc_error) = rpc_error.strip_suffix('*') {
            self.name.starts_with(rpc_error)
        } else if let Some(rpc_error) = rpc_error.strip_prefix('*') {
            self.name.ends_with(rpc_error)
        } else {
            self.name == rpc_error
        }
    }

    pub fn with_caused_by(mut self, constructor_id: u32) -> Self {
        self.caused_by = Some(constructor_id);
        self
    }
}

/// Errors reported back to the caller of [`crate::MTProtoSender::send`].
#[derive(Debug)]
pub enum InvocationError {
    /// The server rejected the request outright.
    Rpc(RpcError),

    /// A `bad_msg_notification` was received for this request with a
    /// code outside the set the sender knows how to recover from
    /// automatically (16, 17, 32, 33).
    BadMessage { code: i32 },

    /// The connection was lost and could not be recovered before the
    /// sender gave up, or the session was torn down while this request
    /// was still pending.
    Dropped,

    /// The response body could not be parsed by the request's own
    /// `read_result`.
    Deserialize(tl::DeserializeError),

    /// The authorization key was rejected by the server (404). The
    /// session is no longer usable.
    InvalidBuffer,

    /// Authentication (key negotiation) failed while (re)connecting.
    Authentication(authentication::Error),

    /// The underlying transport failed.
    Io(io::Error),

    /// The request could never be packed into a container: either its
    /// serialized body is larger than a container can ever hold, or it
    /// was not a multiple of 4 bytes long.
    InvalidRequest(EnqueueError),
}

impl std::error::Error for InvocationError {}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(err) => write!(f, "request error: {err}"),
            Self::BadMessage { code } => write!(f, "request error: bad message (code {code})"),
            Self::Dropped => write!(f, "request error: dropped (connection lost or cancelled)"),
            Self::Deserialize(err) => write!(f, "request error: {err}"),
            Self::InvalidBuffer => write!(f, "request error: authorization key was rejected"),
            Self::Authentication(err) => write!(f, "request error: {err}"),
            Self::Io(err) => write!(f, "request error: {err}"),
            Self::InvalidRequest(err) => write!(f, "request error: {err}"),
        }
    }
}

impl From<tl::DeserializeError> for InvocationError {
    fn from(error: tl::DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl From<authentication::Error> for InvocationError {
    fn from(error: authentication::Error) -> Self {
        Self::Authentication(error)
    }
}

impl From<io::Error> for InvocationError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<EnqueueError> for InvocationError {
    fn from(error: EnqueueError) -> Self {
        Self::InvalidRequest(error)
    }
}

impl From<ReadError> for InvocationError {
    fn from(error: ReadError) -> Self {
        match error {
            ReadError::Io(e) => Self::Io(e),
            ReadError::Security(_) => Self::Dropped,
            ReadError::InvalidBuffer => Self::InvalidBuffer,
            ReadError::TypeNotFound { .. } => Self::Dropped,
            ReadError::Deserialize(e) => Self::Deserialize(e),
        }
    }
}

impl InvocationError {
    /// See [`RpcError::is`]. Returns `false` for non-RPC errors.
    pub fn is(&self, rpc_error: &str) -> bool {
        match self {
            Self::Rpc(rpc) => rpc.is(rpc_error),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_extracts_trailing_value() {
        let err = RpcError::from(tl::types::RpcError {
            error_code: 420,
            error_message: "FLOOD_WAIT_31".into(),
        });
        assert_eq!(err.name, "FLOOD_WAIT");
        assert_eq!(err.value, Some(31));
    }

    #[test]
    fn rpc_error_without_value_is_untouched() {
        let err = RpcError::from(tl::types::RpcError {
            error_code: 400,
            error_message: "CHAT_INVALID".into(),
        });
        assert_eq!(
            err,
            RpcError {
                code: 400,
                name: "CHAT_INVALID".into(),
                value: None,
                caused_by: None,
            }
        );
    }

    #[test]
    fn rpc_error_glob_matching() {
        let err = RpcError {
            code: 401,
            name: "SESSION_PASSWORD_NEEDED".into(),
            value: None,
            caused_by: None,
        };
        assert!(err.is("SESSION_PASSWORD_NEEDED"));
        assert!(err.is("SESSION_*"));
        assert!(err.is("*_NEEDED"));
        assert!(!err.is("OTHER"));
    }
}
