// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors that can occur when driving MTProto state.

use grammers_tl_types as tl;
use std::fmt;

/// Something went wrong turning a decrypted buffer back into a usable
/// [`tl::Message`], or the buffer itself could not be decrypted at all.
#[derive(Debug)]
pub enum Error {
    /// No authorization key has been set yet, so nothing can be
    /// encrypted or decrypted.
    NoAuthKey,

    /// The `auth_key_id` or `msg_key` embedded in the ciphertext did
    /// not match what was expected for the configured key.
    Crypto(grammers_crypto::Error),

    /// The decrypted envelope carried a session ID that does not match
    /// this instance's.
    BadSessionId { got: i64, expected: i64 },

    /// The inner message's `msg_id` did not have the low-bit pattern a
    /// server-originated message is required to have (odd modulo 4).
    BadMessageId { msg_id: i64 },

    /// The decrypted envelope's inner message failed to parse.
    Deserialize(tl::DeserializeError),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAuthKey => write!(f, "no authorization key has been set"),
            Self::Crypto(e) => write!(f, "failed to decrypt message: {}", e),
            Self::BadSessionId { got, expected } => {
                write!(f, "bad session id (got {}, expected {})", got, expected)
            }
            Self::BadMessageId { msg_id } => write!(f, "bad message id: {}", msg_id),
            Self::Deserialize(e) => write!(f, "failed to deserialize decrypted message: {}", e),
        }
    }
}

impl From<grammers_crypto::Error> for Error {
    fn from(error: grammers_crypto::Error) -> Self {
        Self::Crypto(error)
    }
}

impl From<tl::DeserializeError> for Error {
    fn from(error: tl::DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}
