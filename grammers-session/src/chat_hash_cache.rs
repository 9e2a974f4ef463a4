// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A deliberately minimal stand-in for the real access-hash cache: our
//! [`crate::message_box`] only needs to know *whether* a peer has been seen
//! before, not the access hash itself (our [`grammers_tl_types::types::User`]
//! and [`grammers_tl_types::types::Chat`] stand-ins don't carry one).
use grammers_tl_types as tl;
use std::collections::HashSet;

/// Tracks which peers the client has already seen, so that an update
/// referencing an unknown one can be treated as a gap instead of silently
/// dropped.
pub struct ChatHashCache {
    users: HashSet<i64>,
    channels: HashSet<i64>,
    self_id: Option<i64>,
    self_bot: bool,
}

impl ChatHashCache {
    pub fn new(self_id: Option<i64>, self_bot: bool) -> Self {
        Self {
            users: HashSet::new(),
            channels: HashSet::new(),
            self_id,
            self_bot,
        }
    }

    pub fn self_id(&self) -> i64 {
        self.self_id
            .expect("tried to query self_id before it's known")
    }

    pub fn is_self_bot(&self) -> bool {
        self.self_bot
    }

    pub fn contains_user(&self, user_id: i64) -> bool {
        self.users.contains(&user_id)
    }

    pub fn contains_channel(&self, channel_id: i64) -> bool {
        self.channels.contains(&channel_id)
    }

    /// Returns an `InputChannel` for a known channel. The access hash is a
    /// stand-in zero: the real value isn't modeled, only whether the peer
    /// is known at all.
    pub fn get_input_channel(&self, channel_id: i64) -> Option<tl::enums::InputChannel> {
        if self.channels.contains(&channel_id) {
            Some(tl::enums::InputChannel::Channel(tl::types::InputChannelData {
                channel_id,
                access_hash: 0,
            }))
        } else {
            None
        }
    }

    pub fn extend(&mut self, users: &[tl::types::User], chats: &[tl::types::Chat]) {
        self.users.extend(users.iter().map(|u| u.id));
        self.channels
            .extend(chats.iter().filter(|c| c.is_channel).map(|c| c.id));
    }

    /// Folds the users/chats carried by an incoming `Updates` payload into
    /// the cache, reporting whether every channel referenced by the
    /// embedded updates was either already known or introduced by this
    /// same batch's `chats` list.
    ///
    /// Our reduced schema never references users by bare ID (messages
    /// carry a full `Peer`), so only channels can go stale here.
    pub fn extend_from_updates(&mut self, updates: &tl::enums::Updates) -> bool {
        let (inner, users, chats) = match updates {
            tl::enums::Updates::Updates(u) => (u.updates.as_slice(), u.users.as_slice(), u.chats.as_slice()),
            tl::enums::Updates::Combined(u) => (u.updates.as_slice(), u.users.as_slice(), u.chats.as_slice()),
            tl::enums::Updates::UpdateShort(s) => (std::slice::from_ref(&s.update), &[][..], &[][..]),
            _ => (&[][..], &[][..], &[][..]),
        };

        self.extend(users, chats);

        inner.iter().all(|update| match update {
            tl::enums::Update::NewChannelMessage(u) => self.channel_known(&u.message),
            tl::enums::Update::ChannelTooLong(_) => true,
            tl::enums::Update::DeleteChannelMessages(u) => self.channels.contains(&u.channel_id),
            _ => true,
        })
    }

    fn channel_known(&self, message: &tl::types::Message) -> bool {
        match message.peer_id {
            Some(tl::types::Peer::Channel(id)) => self.channels.contains(&id),
            _ => true,
        }
    }
}
