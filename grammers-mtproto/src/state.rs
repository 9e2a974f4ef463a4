// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::errors::Error;
use getrandom::getrandom;
use grammers_crypto::{decrypt_data_v2, encrypt_data_v2, AuthKey};
use grammers_tl_types::{self as tl, Deserializable, Serializable};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-session MTProto state: the authorization key, the running clock
/// used to stamp message IDs, and the salt and sequence number
/// negotiated with the server.
///
/// None of the encryption math lives here; this type only knows how to
/// frame and unframe the plaintext envelope (`salt`, `session_id`,
/// `msg_id`, `seq_no`, `length`, `body`) that wraps every message, and
/// delegates the actual AES-IGE work to `grammers_crypto`.
pub struct MTProtoState {
    auth_key: Option<AuthKey>,
    time_offset: i32,
    salt: i64,
    session_id: i64,
    sequence: i32,
    last_msg_id: i64,
}

impl MTProtoState {
    pub fn new() -> Self {
        Self {
            auth_key: None,
            time_offset: 0,
            salt: 0,
            session_id: Self::random_session_id(),
            sequence: 0,
            last_msg_id: 0,
        }
    }

    fn random_session_id() -> i64 {
        let mut buffer = [0u8; 8];
        getrandom(&mut buffer).expect("failed to generate a secure session id");
        i64::from_le_bytes(buffer)
    }

    pub fn auth_key(&self) -> Option<&AuthKey> {
        self.auth_key.as_ref()
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn salt(&self) -> i64 {
        self.salt
    }

    /// Sets a generated authorization key as the current one, alongside
    /// the time offset and first salt negotiated during the handshake.
    pub fn set_auth_key(&mut self, auth_key: AuthKey, time_offset: i32) {
        self.auth_key = Some(auth_key);
        self.time_offset = time_offset;
    }

    pub fn set_salt(&mut self, salt: i64) {
        self.salt = salt;
    }

    /// Clears the authorization key, invalidating every derivative
    /// cached from it. Called when the server rejects the key outright
    /// (transport error code 404); the session can never recover and a
    /// fresh handshake is required.
    pub fn clear_auth_key(&mut self) {
        self.auth_key = None;
    }

    /// Clears the session identifier, salt, sequence number and last
    /// message ID, as required after a reconnection. The authorization
    /// key and time offset survive: both remain valid across transport
    /// reconnects.
    pub fn reset(&mut self) {
        self.session_id = Self::random_session_id();
        self.salt = 0;
        self.sequence = 0;
        self.last_msg_id = 0;
    }

    /// Corrects the time offset based on a message ID known to be valid,
    /// as reported back by a `bad_msg_notification`.
    pub fn correct_time_offset(&mut self, msg_id: i64) {
        let now = Self::now_secs();
        self.time_offset = (msg_id >> 32) as i32 - now;
    }

    /// Nudges the sequence counter in response to a `bad_msg_notification`
    /// with error code 32 (msg_seqno too low, `delta = 64`) or 33 (too
    /// high, `delta = -16`).
    pub fn bump_sequence(&mut self, delta: i32) {
        self.sequence += delta;
    }

    fn now_secs() -> i32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch")
            .as_secs() as i32
    }

    /// Generates a new, strictly increasing message ID derived from wall
    /// clock time (adjusted by the known server offset) and a
    /// sub-second counter in its low bits.
    pub fn get_new_msg_id(&mut self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time is before epoch");

        let seconds = (now.as_secs() as i32 + self.time_offset) as u64;
        let nanoseconds = now.subsec_nanos() as u64;
        let mut new_msg_id = ((seconds << 32) | (nanoseconds << 2)) as i64;

        if self.last_msg_id >= new_msg_id {
            new_msg_id = self.last_msg_id + 4;
        }

        self.last_msg_id = new_msg_id;
        new_msg_id
    }

    /// Returns the next sequence number, advancing the running counter
    /// only for content-related messages.
    pub fn get_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let result = self.sequence * 2 + 1;
            self.sequence += 1;
            result
        } else {
            self.sequence * 2
        }
    }

    /// Wraps an already-framed `Message` (or `MessageContainer`) body in
    /// the plaintext envelope and encrypts it with the current
    /// authorization key.
    pub fn encrypt_message_data(&self, body: Vec<u8>) -> Result<Vec<u8>, Error> {
        let auth_key = self.auth_key.as_ref().ok_or(Error::NoAuthKey)?;

        let mut buffer = Vec::with_capacity(16 + body.len());
        self.salt.serialize(&mut buffer);
        self.session_id.serialize(&mut buffer);
        buffer.extend(body);

        Ok(encrypt_data_v2(&buffer, auth_key))
    }

    /// Decrypts a ciphertext received from the server and parses out
    /// the inner `Message`, checking that it belongs to this session and
    /// that its `msg_id` carries a valid server-originated pattern.
    pub fn decrypt_message_data(&self, ciphertext: &[u8]) -> Result<tl::Message, Error> {
        let auth_key = self.auth_key.as_ref().ok_or(Error::NoAuthKey)?;

        let plaintext = decrypt_data_v2(ciphertext, auth_key)?;
        let mut cursor = tl::Cursor::from_slice(&plaintext);

        let _salt = i64::deserialize(&mut cursor)?;
        let session_id = i64::deserialize(&mut cursor)?;
        if session_id != self.session_id {
            return Err(Error::BadSessionId {
                got: session_id,
                expected: self.session_id,
            });
        }

        let message = tl::Message::deserialize(&mut cursor)?;

        // Messages coming from the server have a msg_id whose two lowest
        // bits are 01 (a reply to a content-related request) or 11 (one
        // the server pushed unprompted): https://core.telegram.org/mtproto/description#message-identifier-msg-id
        if message.msg_id <= 0 || message.msg_id % 4 == 0 || message.msg_id % 4 == 2 {
            return Err(Error::BadMessageId { msg_id: message.msg_id });
        }

        Ok(message)
    }
}

impl Default for MTProtoState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_id_is_monotonic_even_when_clock_does_not_advance() {
        let mut state = MTProtoState::new();
        let a = state.get_new_msg_id();
        let b = state.get_new_msg_id();
        let c = state.get_new_msg_id();
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a % 4, 0);
        assert_eq!(b % 4, 0);
    }

    #[test]
    fn seq_no_only_advances_for_content_related_messages() {
        let mut state = MTProtoState::new();
        assert_eq!(state.get_seq_no(false), 0);
        assert_eq!(state.get_seq_no(true), 1);
        assert_eq!(state.get_seq_no(true), 3);
        assert_eq!(state.get_seq_no(false), 4);
    }

    #[test]
    fn correct_time_offset_matches_high_bits_of_msg_id() {
        let mut state = MTProtoState::new();
        let now = MTProtoState::now_secs();
        let server_msg_id = ((now + 100) as i64) << 32;
        state.correct_time_offset(server_msg_id);
        assert_eq!(state.time_offset, 100);
    }

    #[test]
    fn encrypt_requires_auth_key() {
        let state = MTProtoState::new();
        assert!(matches!(
            state.encrypt_message_data(vec![1, 2, 3]),
            Err(Error::NoAuthKey)
        ));
    }
}
