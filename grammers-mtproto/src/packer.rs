// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Batches queued requests into the single encrypted container the
//! transport actually writes, assigning message IDs and sequence numbers
//! from the shared [`MTProtoState`] only once a batch is actually formed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use grammers_tl_types as tl;
use tl::Serializable;

use crate::state::MTProtoState;

/// Aim to never exceed this many payload bytes in a single container;
/// Telegram closes the connection around 1 MiB including its own framing.
const MAXIMUM_PAYLOAD_SIZE: usize = 1_013_760;

/// Aim to never pack more than this many messages into one container.
const MAXIMUM_MESSAGE_COUNT: usize = 1_020;

/// Below this many bytes, gzipping a container is not worth the overhead.
const COMPRESSION_THRESHOLD: usize = 512;

/// A message identifier assigned by [`MessagePacker::pack`].
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct MsgId(pub i64);

/// Something an enqueued [`PackedRequest`] and its dependents can poll
/// once a message ID becomes known, regardless of which `pack()` call
/// ends up assigning it. Shared (not merely cloned) so that an "after"
/// reference keeps seeing updates made by the predecessor it points to.
#[derive(Clone)]
struct IdSlot(Arc<Mutex<Option<i64>>>);

impl IdSlot {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    fn set(&self, id: i64) {
        *self.0.lock().unwrap() = Some(id);
    }

    fn get(&self) -> Option<i64> {
        *self.0.lock().unwrap()
    }
}

/// A serialized request waiting to be packed into a container.
///
/// Carries everything [`MessagePacker`] needs to frame it on the wire:
/// the body, whether it counts towards the content-related sequence
/// counter, and an optional predecessor it must be `invoke_after`-wrapped
/// to reference. Once packed, [`Self::msg_id`] and [`Self::container_msg_id`]
/// resolve so the caller can correlate the request with its eventual
/// reply.
pub struct PackedRequest {
    body: Vec<u8>,
    content_related: bool,
    after: Option<IdSlot>,
    id: IdSlot,
    container_id: IdSlot,
}

impl PackedRequest {
    /// A standalone, content-related request with no ordering constraint.
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            content_related: true,
            after: None,
            id: IdSlot::new(),
            container_id: IdSlot::new(),
        }
    }

    /// A request that must be executed by the server only after
    /// `predecessor` has been handled, via the `invoke_after` wrapper.
    pub fn after(body: Vec<u8>, predecessor: &PackedRequest) -> Self {
        Self {
            body,
            content_related: true,
            after: Some(predecessor.id.clone()),
            id: IdSlot::new(),
            container_id: IdSlot::new(),
        }
    }

    /// Housekeeping requests (acknowledgments, state reports) that must
    /// not advance the content-related sequence counter.
    pub fn not_content_related(body: Vec<u8>) -> Self {
        Self {
            body,
            content_related: false,
            after: None,
            id: IdSlot::new(),
            container_id: IdSlot::new(),
        }
    }

    /// The message ID this request was assigned, once packed.
    pub fn msg_id(&self) -> Option<MsgId> {
        self.id.get().map(MsgId)
    }

    /// The ID of the container this request was sent in, which equals
    /// its own `msg_id` when it was not batched with anything else.
    pub fn container_msg_id(&self) -> Option<MsgId> {
        self.container_id.get().map(MsgId)
    }
}

/// A request could not be enqueued into the packer.
#[derive(Debug)]
pub enum EnqueueError {
    /// The serialized body is larger than a single container can ever
    /// hold, so it could never be sent regardless of batching.
    PayloadTooLarge,

    /// TL serialization is always a multiple of 4 bytes; a body that
    /// isn't indicates a bug in the caller rather than a batching
    /// decision this type can make.
    IncorrectPadding,
}

impl std::error::Error for EnqueueError {}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLarge => write!(f, "request payload is too large to ever be sent"),
            Self::IncorrectPadding => write!(f, "request body length is not a multiple of 4"),
        }
    }
}

/// Accumulates [`PackedRequest`]s and produces the encrypted-ready
/// payload for the next outgoing container.
pub struct MessagePacker {
    queue: VecDeque<PackedRequest>,
}

impl MessagePacker {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Queues `request` to be included in a future batch.
    pub fn enqueue(&mut self, request: PackedRequest) -> Result<(), EnqueueError> {
        if request.body.len() % 4 != 0 {
            return Err(EnqueueError::IncorrectPadding);
        }
        if request.body.len() + tl::Message::SIZE_OVERHEAD > tl::MessageContainer::MAXIMUM_SIZE {
            return Err(EnqueueError::PayloadTooLarge);
        }

        self.queue.push_back(request);
        Ok(())
    }

    /// Greedily drains the queue into a single batch, assigns message
    /// IDs and sequence numbers from `state`, and returns the batch
    /// alongside the bytes ready to be encrypted and written to the
    /// transport. Returns `None` if nothing is queued.
    pub fn pack(&mut self, state: &mut MTProtoState) -> Option<(Vec<PackedRequest>, Vec<u8>)> {
        if self.queue.is_empty() {
            return None;
        }

        let mut batch = Vec::new();
        let mut batch_size = 0usize;
        while let Some(front) = self.queue.front() {
            if batch.len() >= MAXIMUM_MESSAGE_COUNT {
                break;
            }

            let size = front.body.len() + tl::Message::SIZE_OVERHEAD;
            if !batch.is_empty() && batch_size + size > MAXIMUM_PAYLOAD_SIZE {
                break;
            }

            batch_size += size;
            batch.push(self.queue.pop_front().unwrap());
        }

        let any_content_related = batch.iter().any(|r| r.content_related);

        // Requests are popped (and therefore assigned an ID) in FIFO
        // order, so by the time a dependent request is reached its
        // predecessor's slot is already filled, whether the predecessor
        // was assigned just now or in an earlier `pack()` call.
        let messages = batch
            .iter()
            .map(|request| {
                let msg_id = state.get_new_msg_id();
                let seq_no = state.get_seq_no(request.content_related);
                request.id.set(msg_id);

                let body = match &request.after {
                    Some(predecessor) => {
                        let after_id = predecessor.get().expect(
                            "predecessor must be assigned an id before its dependent is packed",
                        );
                        tl::functions::InvokeAfterMsg {
                            msg_id: after_id,
                            query: request.body.clone(),
                        }
                        .to_bytes()
                    }
                    None => request.body.clone(),
                };

                tl::Message {
                    msg_id,
                    seq_no,
                    body,
                }
            })
            .collect::<Vec<_>>();

        let payload = if messages.len() == 1 {
            let message = messages.into_iter().next().unwrap();
            batch[0].container_id.set(message.msg_id);
            frame(message, any_content_related)
        } else {
            let container_msg_id = state.get_new_msg_id();
            let container_seq_no = state.get_seq_no(false);
            for request in &batch {
                request.container_id.set(container_msg_id);
            }

            let mut container_body = Vec::new();
            tl::MessageContainer { messages }.serialize(&mut container_body);

            frame(
                tl::Message {
                    msg_id: container_msg_id,
                    seq_no: container_seq_no,
                    body: container_body,
                },
                any_content_related,
            )
        };

        Some((batch, payload))
    }
}

impl Default for MessagePacker {
    fn default() -> Self {
        Self::new()
    }
}

/// Gzips `message`'s body in place when doing so is profitable, then
/// serializes the whole framed message.
fn frame(mut message: tl::Message, content_related: bool) -> Vec<u8> {
    if content_related && message.body.len() >= COMPRESSION_THRESHOLD {
        let compressed = tl::GzipPacked::new(&message.body).to_bytes();
        if compressed.len() < message.body.len() {
            message.body = compressed;
        }
    }
    message.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grammers_tl_types::Deserializable;

    fn padded(mut body: Vec<u8>) -> Vec<u8> {
        while body.len() % 4 != 0 {
            body.push(0);
        }
        body
    }

    #[test]
    fn single_request_is_sent_unwrapped() {
        let mut packer = MessagePacker::new();
        let body = padded(b"hello".to_vec());
        let request = PackedRequest::new(body.clone());
        packer.enqueue(request).unwrap();

        let mut state = MTProtoState::new();
        let (batch, payload) = packer.pack(&mut state).unwrap();

        assert_eq!(batch.len(), 1);
        let message = tl::Message::from_bytes(&payload).unwrap();
        assert_eq!(message.body, body);
        assert_eq!(Some(MsgId(message.msg_id)), batch[0].msg_id());
        assert_eq!(batch[0].msg_id(), batch[0].container_msg_id());
    }

    #[test]
    fn two_requests_are_wrapped_in_a_container() {
        let mut packer = MessagePacker::new();
        packer
            .enqueue(PackedRequest::new(padded(b"first".to_vec())))
            .unwrap();
        packer
            .enqueue(PackedRequest::new(padded(b"second".to_vec())))
            .unwrap();

        let mut state = MTProtoState::new();
        let (batch, payload) = packer.pack(&mut state).unwrap();

        assert_eq!(batch.len(), 2);
        let outer = tl::Message::from_bytes(&payload).unwrap();
        let container = tl::MessageContainer::from_bytes(&outer.body).unwrap();
        assert_eq!(container.messages.len(), 2);
        assert_eq!(batch[0].container_msg_id(), batch[1].container_msg_id());
        assert_ne!(batch[0].msg_id(), batch[0].container_msg_id());
    }

    #[test]
    fn ordered_request_wraps_predecessor_id() {
        let mut packer = MessagePacker::new();
        let a = PackedRequest::new(padded(b"a".to_vec()));
        let b = PackedRequest::after(padded(b"b".to_vec()), &a);
        packer.enqueue(a).unwrap();
        packer.enqueue(b).unwrap();

        let mut state = MTProtoState::new();
        let (batch, payload) = packer.pack(&mut state).unwrap();

        let outer = tl::Message::from_bytes(&payload).unwrap();
        let container = tl::MessageContainer::from_bytes(&outer.body).unwrap();
        let wrapped = &container.messages[1].body;
        let ctor = u32::from_le_bytes(wrapped[0..4].try_into().unwrap());
        let after_id = i64::from_le_bytes(wrapped[4..12].try_into().unwrap());
        assert_eq!(ctor, 0xcb9f372d);
        assert_eq!(Some(MsgId(after_id)), batch[0].msg_id());
    }

    #[test]
    fn oversized_request_is_rejected() {
        let mut packer = MessagePacker::new();
        let huge = vec![0u8; tl::MessageContainer::MAXIMUM_SIZE + 4];
        let err = packer.enqueue(PackedRequest::new(huge)).unwrap_err();
        assert!(matches!(err, EnqueueError::PayloadTooLarge));
    }

    #[test]
    fn misaligned_request_is_rejected() {
        let mut packer = MessagePacker::new();
        let err = packer
            .enqueue(PackedRequest::new(vec![1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, EnqueueError::IncorrectPadding));
    }

    #[test]
    fn compressible_payload_is_gzipped() {
        let mut packer = MessagePacker::new();
        let body = padded(b"x".repeat(2000));
        packer.enqueue(PackedRequest::new(body.clone())).unwrap();

        let mut state = MTProtoState::new();
        let (_, payload) = packer.pack(&mut state).unwrap();

        let message = tl::Message::from_bytes(&payload).unwrap();
        let gzip = tl::GzipPacked::from_bytes(&message.body).unwrap();
        assert_eq!(gzip.decompress().unwrap(), body);
    }

    #[test]
    fn housekeeping_request_does_not_advance_content_sequence() {
        let mut packer = MessagePacker::new();
        packer
            .enqueue(PackedRequest::not_content_related(padded(
                b"ack".to_vec(),
            )))
            .unwrap();

        let mut state = MTProtoState::new();
        let (_, payload) = packer.pack(&mut state).unwrap();
        let message = tl::Message::from_bytes(&payload).unwrap();
        assert_eq!(message.seq_no, 0);
    }
}
