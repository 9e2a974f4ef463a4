// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::*;
use crate::ChatHashCache;
use std::cell::RefCell;
use std::ops::Add;

thread_local! {
    static NOW: RefCell<Instant> = RefCell::new(Instant(Duration::ZERO));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(Duration);

impl Instant {
    pub fn now() -> Self {
        NOW.with(|now| *now.borrow())
    }
}

impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs)
    }
}

fn reset_time() {
    NOW.with(|now| now.borrow_mut().0 = Duration::ZERO);
}

fn advance_time_by(duration: Duration) {
    NOW.with(|now| now.borrow_mut().0 += duration);
}

fn hashes() -> ChatHashCache {
    ChatHashCache::new(Some(1), false)
}

fn state(pts: i32, qts: i32, date: i32, seq: i32) -> tl::types::updates::State {
    tl::types::updates::State {
        pts,
        qts,
        date,
        seq,
        unread_count: 0,
    }
}

fn delete(pts: i32, pts_count: i32) -> tl::enums::Update {
    tl::enums::Update::DeleteMessages(tl::types::UpdateDeleteMessages {
        messages: Vec::new(),
        pts,
        pts_count,
    })
}

fn updates_with(pts: i32, pts_count: i32, date: i32, seq: i32) -> UpdatesLike {
    UpdatesLike::Updates(tl::enums::Updates::Updates(tl::types::Updates {
        updates: vec![delete(pts, pts_count)],
        users: Vec::new(),
        chats: Vec::new(),
        date,
        seq,
    }))
}

#[test]
fn new_message_box_is_empty() {
    let mb = MessageBox::new();
    assert!(mb.is_empty());
}

#[test]
fn loaded_message_box_with_state_is_not_empty() {
    let mb = MessageBox::load(SessionState {
        pts: 12,
        qts: 34,
        date: 56,
        seq: 78,
        channels: vec![(43, 21)],
    });
    assert!(!mb.is_empty());
    let session = mb.session_state();
    assert_eq!(session.pts, 12);
    assert_eq!(session.qts, 34);
    assert_eq!(session.date, 56);
    assert_eq!(session.seq, 78);
    assert_eq!(session.channels, vec![(43, 21)]);
}

#[test]
fn set_state_makes_box_non_empty() {
    reset_time();
    let mut mb = MessageBox::new();
    mb.set_state(state(12, 34, 56, 78));
    assert!(!mb.is_empty());
    assert_eq!(mb.get_difference(), None);
}

#[test]
fn in_order_update_is_applied_and_advances_pts() {
    reset_time();
    let mut mb = MessageBox::new();
    mb.set_state(state(100, 0, 1, 0));
    let mut hashes = hashes();

    let (result, _, _) = mb
        .process_updates(updates_with(101, 1, 2, 0), &mut hashes)
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(mb.session_state().pts, 101);
}

#[test]
fn pts_count_zero_coexists_with_pts_count_one_at_same_pts() {
    // `ReadChannelInbox`-style updates (count 0) shouldn't be treated as skipping ahead of
    // a `NewChannelMessage`-style update (count 1) that lands on the same pts.
    reset_time();
    let mut mb = MessageBox::new();
    mb.set_state(state(100, 0, 1, 0));
    let mut hashes = hashes();

    let (result, _, _) = mb
        .process_updates(
            UpdatesLike::Updates(tl::enums::Updates::Updates(tl::types::Updates {
                updates: vec![delete(101, 0), delete(101, 1)],
                users: Vec::new(),
                chats: Vec::new(),
                date: 2,
                seq: 0,
            })),
            &mut hashes,
        )
        .unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(mb.session_state().pts, 101);
}

#[test]
fn out_of_order_update_buffers_as_possible_gap() {
    // A lone gap on a single entry doesn't escalate into a seq-level `Gap`: it's buffered
    // and quietly produces no output, waiting for either a filling update or a timeout.
    reset_time();
    let mut mb = MessageBox::new();
    mb.set_state(state(100, 0, 1, 0));
    let mut hashes = hashes();

    // Local pts is 100; an update claiming pts 110 with count 5 implies pts 105 was
    // expected to be the predecessor, so this should be buffered rather than applied.
    let (result, _, _) = mb
        .process_updates(updates_with(110, 5, 2, 0), &mut hashes)
        .unwrap();
    assert!(result.is_empty());
    assert_eq!(mb.session_state().pts, 100);
}

#[test]
fn gap_resolves_once_filling_update_arrives() {
    reset_time();
    let mut mb = MessageBox::new();
    mb.set_state(state(100, 0, 1, 0));
    let mut hashes = hashes();

    let (result, _, _) = mb
        .process_updates(updates_with(110, 5, 2, 0), &mut hashes)
        .unwrap();
    assert!(result.is_empty());

    // This one bridges the local pts (100) exactly up to the buffered gap's start (110),
    // so both it and the previously-buffered update should apply in this single call.
    let (result, _, _) = mb
        .process_updates(updates_with(105, 5, 2, 0), &mut hashes)
        .unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(mb.session_state().pts, 110);
}

#[test]
fn gap_times_out_and_requires_get_difference() {
    reset_time();
    let mut mb = MessageBox::new();
    mb.set_state(state(100, 0, 1, 0));
    let mut hashes = hashes();

    mb.process_updates(updates_with(110, 5, 2, 0), &mut hashes)
        .unwrap();

    advance_time_by(POSSIBLE_GAP_TIMEOUT + Duration::from_millis(1));
    mb.check_deadlines();

    assert!(mb.get_difference().is_some());
}

#[test]
fn seq_gap_triggers_get_difference() {
    reset_time();
    let mut mb = MessageBox::new();
    mb.set_state(state(100, 0, 1, 5));
    let mut hashes = hashes();

    let err = mb
        .process_updates(updates_with(101, 1, 2, 10), &mut hashes)
        .unwrap_err();
    assert_eq!(err, Gap);
    assert!(mb.get_difference().is_some());
}

#[test]
fn no_updates_timeout_requires_get_difference() {
    reset_time();
    let mut mb = MessageBox::new();
    mb.set_state(state(100, 0, 1, 0));

    advance_time_by(NO_UPDATES_TIMEOUT + Duration::from_secs(1));
    mb.check_deadlines();

    assert!(mb.get_difference().is_some());
}

#[test]
fn apply_difference_clears_getting_diff_and_sets_state() {
    reset_time();
    let mut mb = MessageBox::new();
    mb.set_state(state(100, 0, 1, 0));
    let mut hashes = hashes();

    mb.process_updates(updates_with(200, 50, 2, 5), &mut hashes)
        .unwrap_err();
    assert!(mb.get_difference().is_some());

    let (result, _, _) = mb.apply_difference(
        tl::enums::updates::Difference::Difference(tl::types::DifferenceFull {
            new_messages: Vec::new(),
            new_encrypted_messages: Vec::new(),
            other_updates: Vec::new(),
            users: Vec::new(),
            chats: Vec::new(),
            state: state(150, 0, 9, 2),
        }),
        &mut hashes,
    );
    assert!(result.is_empty());
    assert_eq!(mb.session_state().pts, 150);
    assert_eq!(mb.session_state().seq, 2);
    assert_eq!(mb.get_difference(), None);
}

#[test]
fn channel_difference_advances_channel_pts_independently() {
    reset_time();
    let mut mb = MessageBox::new();
    mb.try_set_channel_state(555, 10);
    let mut hashes = hashes();
    hashes.extend(
        &[],
        &[tl::types::Chat {
            id: 555,
            is_channel: true,
        }],
    );

    mb.try_begin_get_diff(Entry::Channel(555));

    let gd = tl::functions::updates::GetChannelDifference {
        force: false,
        channel: tl::enums::InputChannel::Channel(tl::types::InputChannelData {
            channel_id: 555,
            access_hash: 0,
        }),
        filter: tl::enums::ChannelMessagesFilter::Empty,
        pts: 10,
        limit: USER_CHANNEL_DIFF_LIMIT,
    };

    assert_eq!(mb.session_state().channels, vec![(555, 10)]);

    let (result, _, _) = mb.apply_channel_difference(
        gd,
        tl::enums::updates::ChannelDifference::Empty {
            final_: true,
            pts: 20,
            timeout: None,
        },
        &mut hashes,
    );
    assert!(result.is_empty());
    assert_eq!(mb.session_state().channels, vec![(555, 20)]);
}
