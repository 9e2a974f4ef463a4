// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Unencrypted ("plain") message framing, used only while negotiating an
//! authorization key: `auth_key_id:0 | msg_id | message_data_length |
//! message_data`. Once a key exists, every subsequent message goes through
//! [`grammers_mtproto::MTProtoState`] instead.

use grammers_tl_types::{Cursor, Deserializable, Serializable};

use crate::errors::ReadError;
use crate::transport::Transport;

/// Header size in bytes: `auth_key_id` (8) + `msg_id` (8) + length (4).
const HEADER_SIZE: usize = 20;

/// Drives the handshake's request/response pairs over a [`Transport`],
/// wrapping and unwrapping the plain message envelope each step expects.
pub struct PlainSender<'a, T: Transport> {
    transport: &'a mut T,
}

impl<'a, T: Transport> PlainSender<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    /// Wraps `request` in a plain message, writes it, and returns the
    /// inner contents of the server's plain message reply.
    pub async fn send(&mut self, request: Vec<u8>) -> Result<Vec<u8>, ReadError> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + request.len());
        0i64.serialize(&mut buf); // auth_key_id, always zero before a key exists
        0i64.serialize(&mut buf); // msg_id: the server does not check this side's value
        (request.len() as i32).serialize(&mut buf);
        buf.extend(request);

        self.transport.send(&buf).await?;
        let payload = self.transport.recv().await?;
        unwrap(&payload)
    }
}

/// Validates that `payload` is a correctly framed plain message and
/// returns its inner `message_data`.
fn unwrap(payload: &[u8]) -> Result<Vec<u8>, ReadError> {
    if payload.len() < HEADER_SIZE {
        return Err(ReadError::InvalidBuffer);
    }

    let mut cursor = Cursor::from_slice(payload);
    let auth_key_id = i64::deserialize(&mut cursor)?;
    if auth_key_id != 0 {
        return Err(ReadError::InvalidBuffer);
    }

    let msg_id = i64::deserialize(&mut cursor)?;
    // Server message IDs are required to be odd modulo 4 when replying to a
    // client message: https://core.telegram.org/mtproto/description#message-identifier-msg-id
    // We can't yet validate closeness to wall-clock time since the time
    // offset this session will use hasn't been negotiated.
    if msg_id <= 0 || msg_id % 4 != 1 {
        return Err(ReadError::InvalidBuffer);
    }

    let len = i32::deserialize(&mut cursor)?;
    if len < 0 || HEADER_SIZE + len as usize > payload.len() {
        return Err(ReadError::InvalidBuffer);
    }

    Ok(payload[HEADER_SIZE..HEADER_SIZE + len as usize].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// An in-memory transport pairing two ends of a channel, used to drive
    /// [`PlainSender`] without a real socket.
    #[derive(Clone)]
    struct LoopbackTransport {
        outbox: Arc<Mutex<Vec<Vec<u8>>>>,
        next_reply: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl LoopbackTransport {
        fn new(replies: Vec<Vec<u8>>) -> Self {
            Self {
                outbox: Arc::new(Mutex::new(Vec::new())),
                next_reply: Arc::new(Mutex::new(replies)),
            }
        }
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        type Sender = LoopbackHalf;
        type Receiver = LoopbackHalf;

        async fn connect(&mut self) -> io::Result<()> {
            Ok(())
        }

        async fn disconnect(&mut self) {}

        async fn send(&mut self, data: &[u8]) -> io::Result<()> {
            self.outbox.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn recv(&mut self) -> io::Result<Vec<u8>> {
            self.next_reply
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no reply queued"))
        }

        fn connected(&self) -> bool {
            true
        }

        fn split(self) -> (Self::Sender, Self::Receiver) {
            (LoopbackHalf(self.clone()), LoopbackHalf(self))
        }
    }

    /// Both halves of a split [`LoopbackTransport`] are the same shared
    /// handle; only used to satisfy the trait, never exercised by these
    /// tests since they drive [`PlainSender`] directly.
    #[derive(Clone)]
    struct LoopbackHalf(LoopbackTransport);

    #[async_trait]
    impl crate::transport::TransportSender for LoopbackHalf {
        async fn send(&mut self, data: &[u8]) -> io::Result<()> {
            self.0.send(data).await
        }
    }

    #[async_trait]
    impl crate::transport::TransportReceiver for LoopbackHalf {
        async fn recv(&mut self) -> io::Result<Vec<u8>> {
            self.0.recv().await
        }
    }

    fn plain_message(msg_id: i64, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        0i64.serialize(&mut buf);
        msg_id.serialize(&mut buf);
        (body.len() as i32).serialize(&mut buf);
        buf.extend(body);
        buf
    }

    #[tokio::test]
    async fn round_trips_a_valid_reply() {
        let reply = plain_message(5, b"pong");
        let mut transport = LoopbackTransport::new(vec![reply]);
        let mut sender = PlainSender::new(&mut transport);

        let got = sender.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(got, b"pong");
    }

    #[tokio::test]
    async fn rejects_a_nonzero_auth_key_id() {
        let mut buf = Vec::new();
        1i64.serialize(&mut buf);
        5i64.serialize(&mut buf);
        4i32.serialize(&mut buf);
        buf.extend(b"pong");

        let mut transport = LoopbackTransport::new(vec![buf]);
        let mut sender = PlainSender::new(&mut transport);
        assert!(matches!(
            sender.send(b"ping".to_vec()).await,
            Err(ReadError::InvalidBuffer)
        ));
    }

    #[tokio::test]
    async fn rejects_a_msg_id_not_congruent_to_one_mod_four() {
        let reply = plain_message(4, b"pong");
        let mut transport = LoopbackTransport::new(vec![reply]);
        let mut sender = PlainSender::new(&mut transport);
        assert!(matches!(
            sender.send(b"ping".to_vec()).await,
            Err(ReadError::InvalidBuffer)
        ));
    }
}
