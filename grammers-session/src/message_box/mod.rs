// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This module deals with correct handling of updates, including gaps, and knowing when the code
//! should "get difference" (the set of updates that the client should know by now minus the set
//! of updates that it actually knows).
//!
//! Each chat has its own [`Entry`] in the [`MessageBox`] (this `struct` is the "entry point").
//! At any given time, the message box may be either getting difference for them (entry is in
//! [`MessageBox::getting_diff_for`]) or not. If not getting difference, a possible gap may be
//! found for the updates (entry is in [`MessageBox::possible_gaps`]). Otherwise, the entry is
//! on its happy path.
//!
//! Gaps are cleared when they are either resolved on their own (by waiting for a short time)
//! or because we got the difference for the corresponding entry.
//!
//! While there are entries for which their difference must be fetched,
//! [`MessageBox::check_deadlines`] will always return [`Instant::now`], since "now" is the time
//! to get the difference.
#[cfg(test)]
mod tests;

use crate::ChatHashCache;
use grammers_tl_types as tl;
use log::{debug, info, trace, warn};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::fmt;
use std::mem;
use std::time::Duration;
#[cfg(test)]
use tests::Instant;
#[cfg(not(test))]
use web_time::Instant;

/// Telegram sends `seq` equal to `0` when "it doesn't matter", so we use that value too.
const NO_SEQ: i32 = 0;

/// It has been observed that Telegram may send updates with `qts` equal to `0` (for
/// example with `ChannelParticipant`), interleaved with non-zero `qts` values. This
/// presumably means that the ordering should be "ignored" in that case.
const NO_PTS: i32 = 0;

/// Non-update types can carry `pts` that should still be processed. Because there's no
/// `date`, `0` is used as the sentinel when constructing the dummy `Updates` used to
/// handle them uniformly.
const NO_DATE: i32 = 0;

// > It may be useful to wait up to 0.5 seconds
const POSSIBLE_GAP_TIMEOUT: Duration = Duration::from_millis(500);

/// After how long without updates the client will "timeout" and fetch the difference
/// itself, ignoring whatever arrives in the meantime until it catches up.
///
/// Documentation recommends 15 minutes without updates (https://core.telegram.org/api/updates).
const NO_UPDATES_TIMEOUT: Duration = Duration::from_secs(15 * 60);

const BOT_CHANNEL_DIFF_LIMIT: i32 = 100_000;
const USER_CHANNEL_DIFF_LIMIT: i32 = 100;

/// Identifies one of the independently-sequenced update streams a client has to track:
/// the account-wide one, the one for secret chats, or one per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entry {
    Account,
    Secret,
    Channel(i64),
}

#[derive(Debug)]
struct State {
    pts: i32,
    deadline: Instant,
}

/// Updates that arrived with a `pts` higher than expected, buffered in case the gap
/// resolves itself (the missing updates show up shortly after, in a later batch).
#[derive(Debug)]
pub struct PossibleGap {
    deadline: Instant,
    updates: Vec<tl::enums::Update>,
}

/// Returned whenever the message box notices it is missing updates and the caller needs
/// to fetch the difference before it can make progress.
#[derive(Debug, PartialEq, Eq)]
pub struct Gap;

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a gap was detected in the update sequence")
    }
}

impl StdError for Gap {}

/// Anything that should be treated like an update for the purposes of `pts` bookkeeping.
#[derive(Debug)]
pub enum UpdatesLike {
    Updates(tl::enums::Updates),
    /// The reply to an outgoing request, paired with the `pts`/`pts_count`/`date` it
    /// carried so it can be folded into the account-wide stream like any other update.
    ShortSentMessage { pts: i32, pts_count: i32, date: i32 },
}

#[derive(Debug)]
struct PtsInfo {
    entry: Entry,
    pts: i32,
    pts_count: i32,
}

fn message_channel_id(message: &tl::types::Message) -> Option<i64> {
    match message.peer_id {
        Some(tl::types::Peer::Channel(id)) => Some(id),
        _ => None,
    }
}

fn pts_info_of(update: &tl::enums::Update) -> Option<PtsInfo> {
    use tl::enums::Update::*;
    match update {
        NewMessage(u) => {
            debug_assert!(
                !matches!(u.message.peer_id, Some(tl::types::Peer::Channel(_))),
                "channel messages should arrive as NewChannelMessage"
            );
            Some(PtsInfo {
                entry: Entry::Account,
                pts: u.pts,
                pts_count: u.pts_count,
            })
        }
        NewChannelMessage(u) => message_channel_id(&u.message).map(|channel_id| PtsInfo {
            entry: Entry::Channel(channel_id),
            pts: u.pts,
            pts_count: u.pts_count,
        }),
        NewEncryptedMessage(u) => Some(PtsInfo {
            entry: Entry::Secret,
            pts: u.qts,
            pts_count: 1,
        }),
        ChannelTooLong(u) => u.pts.map(|pts| PtsInfo {
            entry: Entry::Channel(u.channel_id),
            pts,
            pts_count: 0,
        }),
        DeleteMessages(u) => Some(PtsInfo {
            entry: Entry::Account,
            pts: u.pts,
            pts_count: u.pts_count,
        }),
        DeleteChannelMessages(u) => Some(PtsInfo {
            entry: Entry::Channel(u.channel_id),
            pts: u.pts,
            pts_count: u.pts_count,
        }),
    }
}

fn next_updates_deadline() -> Instant {
    Instant::now() + NO_UPDATES_TIMEOUT
}

/// Flattened view of whatever shape an incoming `Updates` payload takes, since only
/// `Updates` and `UpdatesCombined` carry a `seq`/`seq_start` worth checking.
struct Combined {
    date: i32,
    seq_start: i32,
    seq: i32,
    updates: Vec<tl::enums::Update>,
    users: Vec<tl::types::User>,
    chats: Vec<tl::types::Chat>,
}

fn adapt(updates: UpdatesLike, chat_hashes: &mut ChatHashCache) -> Result<Combined, Gap> {
    let updates = match updates {
        UpdatesLike::ShortSentMessage { pts, pts_count, date } => {
            return Ok(Combined {
                date,
                seq_start: NO_SEQ,
                seq: NO_SEQ,
                updates: vec![tl::enums::Update::NewMessage(tl::types::UpdateNewMessage {
                    message: tl::types::Message {
                        id: 0,
                        peer_id: None,
                        date,
                        message: String::new(),
                    },
                    pts,
                    pts_count,
                })],
                users: Vec::new(),
                chats: Vec::new(),
            });
        }
        UpdatesLike::Updates(u) => u,
    };

    if !chat_hashes.extend_from_updates(&updates) {
        info!("received an update referencing an unknown channel, treating as gap");
        return Err(Gap);
    }

    Ok(match updates {
        tl::enums::Updates::TooLong => {
            info!("received updatesTooLong, treating as gap");
            return Err(Gap);
        }
        tl::enums::Updates::UpdateShort(short) => Combined {
            date: short.date,
            seq_start: NO_SEQ,
            seq: NO_SEQ,
            updates: vec![short.update],
            users: Vec::new(),
            chats: Vec::new(),
        },
        tl::enums::Updates::Combined(c) => Combined {
            date: c.date,
            seq_start: c.seq_start,
            seq: c.seq,
            updates: c.updates,
            users: c.users,
            chats: c.chats,
        },
        tl::enums::Updates::Updates(u) => Combined {
            date: u.date,
            seq_start: u.seq,
            seq: u.seq,
            updates: u.updates,
            users: u.users,
            chats: u.chats,
        },
        tl::enums::Updates::UpdateShortSentMessage(s) => Combined {
            date: s.date,
            seq_start: NO_SEQ,
            seq: NO_SEQ,
            updates: Vec::new(),
            users: Vec::new(),
            chats: Vec::new(),
        },
    })
}

/// Tracks the `pts`/`qts`/`seq` sequence counters for every entry that has been seen,
/// detects gaps in them, and orchestrates fetching the difference to fill those gaps.
#[derive(Debug)]
pub struct MessageBox {
    map: HashMap<Entry, State>,
    date: i32,
    seq: i32,
    possible_gaps: HashMap<Entry, PossibleGap>,
    getting_diff_for: HashSet<Entry>,
    next_deadline: Option<Entry>,
    tmp_entries: HashSet<Entry>,
}

/// The persisted shape of a [`MessageBox`]'s state, suitable for storing between runs.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub pts: i32,
    pub qts: i32,
    pub date: i32,
    pub seq: i32,
    pub channels: Vec<(i64, i32)>,
}

#[allow(clippy::new_without_default)]
/// Creation, querying, and setting base state.
impl MessageBox {
    /// Create a new, empty [`MessageBox`].
    ///
    /// This is the only way it may return `true` from [`MessageBox::is_empty`].
    pub fn new() -> Self {
        trace!("created new message box with no previous state");
        Self {
            map: HashMap::new(),
            date: 1, // non-zero or getting difference will fail
            seq: NO_SEQ,
            possible_gaps: HashMap::new(),
            getting_diff_for: HashSet::new(),
            next_deadline: None,
            tmp_entries: HashSet::new(),
        }
    }

    /// Create a [`MessageBox`] from a previously known update state.
    pub fn load(state: SessionState) -> Self {
        trace!("created new message box with state: {:?}", state);
        let deadline = next_updates_deadline();
        let mut map = HashMap::with_capacity(2 + state.channels.len());
        map.insert(
            Entry::Account,
            State {
                pts: state.pts,
                deadline,
            },
        );
        map.insert(
            Entry::Secret,
            State {
                pts: state.qts,
                deadline,
            },
        );
        map.extend(state.channels.iter().map(|&(channel_id, pts)| {
            (Entry::Channel(channel_id), State { pts, deadline })
        }));

        Self {
            map,
            date: state.date,
            seq: state.seq,
            possible_gaps: HashMap::new(),
            getting_diff_for: HashSet::new(),
            next_deadline: Some(Entry::Account),
            tmp_entries: HashSet::new(),
        }
    }

    /// Return the current state in a format suitable for persisting between runs.
    pub fn session_state(&self) -> SessionState {
        SessionState {
            pts: self.map.get(&Entry::Account).map(|s| s.pts).unwrap_or(NO_PTS),
            qts: self.map.get(&Entry::Secret).map(|s| s.pts).unwrap_or(NO_PTS),
            date: self.date,
            seq: self.seq,
            channels: self
                .map
                .iter()
                .filter_map(|(entry, s)| match entry {
                    Entry::Channel(id) => Some((*id, s.pts)),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Return true if the message box is empty and has no state yet.
    pub fn is_empty(&self) -> bool {
        self.map.get(&Entry::Account).map(|s| s.pts).unwrap_or(NO_PTS) == NO_PTS
    }

    /// Return the next deadline when receiving updates should timeout.
    ///
    /// If a deadline expired, the corresponding entries will be marked as needing to get
    /// its difference. While there are entries pending a difference fetch, this method
    /// returns the current instant.
    pub fn check_deadlines(&mut self) -> Instant {
        let now = Instant::now();

        if !self.getting_diff_for.is_empty() {
            return now;
        }

        let deadline = next_updates_deadline();

        // Most of the time there will be zero or one gap in flight so finding the minimum is cheap.
        let deadline = if let Some(gap_deadline) =
            self.possible_gaps.values().map(|gap| gap.deadline).min()
        {
            deadline.min(gap_deadline)
        } else if let Some(state) = self.next_deadline.and_then(|entry| self.map.get(&entry)) {
            deadline.min(state.deadline)
        } else {
            deadline
        };

        if now >= deadline {
            self.getting_diff_for
                .extend(self.possible_gaps.iter().filter_map(|(entry, gap)| {
                    if now >= gap.deadline {
                        info!("gap was not resolved after waiting for {:?}", entry);
                        Some(*entry)
                    } else {
                        None
                    }
                }));

            self.getting_diff_for
                .extend(self.map.iter().filter_map(|(entry, state)| {
                    if now >= state.deadline {
                        debug!("too much time has passed without updates for {:?}", entry);
                        Some(*entry)
                    } else {
                        None
                    }
                }));

            let possible_gaps = &mut self.possible_gaps;
            self.getting_diff_for.iter().for_each(|entry| {
                possible_gaps.remove(entry);
            });
        }

        deadline
    }

    /// Reset the deadline for the periods without updates for all input entries.
    fn reset_deadlines(&mut self, entries: &HashSet<Entry>, deadline: Instant) {
        if entries.is_empty() {
            return;
        }
        for entry in entries {
            if let Some(state) = self.map.get_mut(entry) {
                state.deadline = deadline;
                debug!("reset deadline {:?} for {:?}", deadline, entry);
            } else {
                panic!("did not reset deadline for {:?} as it had no entry", entry);
            }
        }

        if self
            .next_deadline
            .as_ref()
            .map(|next| entries.contains(next))
            .unwrap_or(false)
        {
            self.next_deadline = Some(
                *self
                    .map
                    .iter()
                    .min_by_key(|(_, state)| state.deadline)
                    .map(|(entry, _)| entry)
                    .expect("deadline should exist"),
            );
        } else if self
            .next_deadline
            .map(|e| deadline < self.map[&e].deadline)
            .unwrap_or(false)
        {
            self.next_deadline = Some(*entries.iter().next().unwrap());
        }
    }

    /// Convenience to reset a single entry's deadline.
    fn reset_deadline(&mut self, entry: Entry, deadline: Instant) {
        let mut entries = mem::take(&mut self.tmp_entries);
        entries.insert(entry);
        self.reset_deadlines(&entries, deadline);
        entries.clear();
        self.tmp_entries = entries;
    }

    /// Convenience to reset a channel's deadline, with optional timeout.
    fn reset_channel_deadline(&mut self, channel_id: i64, timeout: Option<i32>) {
        self.reset_deadline(
            Entry::Channel(channel_id),
            Instant::now()
                + timeout
                    .map(|t| Duration::from_secs(t as _))
                    .unwrap_or(NO_UPDATES_TIMEOUT),
        );
    }

    /// Sets the update state. Should be called right after login if [`MessageBox::new`]
    /// was used, otherwise undesirable updates will be fetched.
    pub fn set_state(&mut self, state: tl::types::updates::State) {
        trace!("setting state {:?}", state);
        let deadline = next_updates_deadline();
        self.map.insert(
            Entry::Account,
            State {
                pts: state.pts,
                deadline,
            },
        );
        self.map.insert(
            Entry::Secret,
            State {
                pts: state.qts,
                deadline,
            },
        );
        self.date = state.date;
        self.seq = state.seq;
    }

    /// Like [`MessageBox::set_state`], but for channels. Useful when getting dialogs.
    ///
    /// The update state will only be set if no entry was known previously.
    pub fn try_set_channel_state(&mut self, id: i64, pts: i32) {
        trace!("trying to set channel state for {}: {}", id, pts);
        self.map.entry(Entry::Channel(id)).or_insert_with(|| State {
            pts,
            deadline: next_updates_deadline(),
        });
    }

    /// Try to begin getting difference for the given entry. No-op if the entry has no
    /// previously-known state to start off from (there is nothing to recover).
    ///
    /// Clears any previous gap for it.
    fn try_begin_get_diff(&mut self, entry: Entry) {
        if !self.map.contains_key(&entry) {
            if self.possible_gaps.contains_key(&entry) {
                panic!(
                    "should not have a possible_gap for an entry {:?} not in the state map",
                    entry
                );
            }
            return;
        }

        self.getting_diff_for.insert(entry);
        self.possible_gaps.remove(&entry);
    }

    /// Finish getting difference for the given entry, resetting its deadline.
    fn end_get_diff(&mut self, entry: Entry) {
        if !self.getting_diff_for.remove(&entry) {
            panic!("called end_get_diff on an entry which was not getting diff for");
        }
        self.reset_deadline(entry, next_updates_deadline());
        assert!(
            !self.possible_gaps.contains_key(&entry),
            "gaps shouldn't be created while getting difference"
        );
    }
}

// "Normal" updates flow (processing and detection of gaps).
impl MessageBox {
    /// Process an incoming update-like payload, returning the updates ready for delivery
    /// to the caller along with any new users/chats it introduced.
    ///
    /// Updates corresponding to entries for which the difference is currently being
    /// fetched are discarded; they should also be returned by getting the difference.
    pub fn process_updates(
        &mut self,
        updates: UpdatesLike,
        chat_hashes: &mut ChatHashCache,
    ) -> Result<(Vec<tl::enums::Update>, Vec<tl::types::User>, Vec<tl::types::Chat>), Gap> {
        trace!("processing updates: {:?}", updates);

        let Combined {
            date,
            seq_start,
            seq,
            mut updates,
            users,
            chats,
        } = match adapt(updates, chat_hashes) {
            Ok(combined) => combined,
            Err(Gap) => {
                self.try_begin_get_diff(Entry::Account);
                return Err(Gap);
            }
        };

        // > For all the other [not `updates` or `updatesCombined`] `Updates` type constructors
        // > there is no need to check `seq` or change a local state.
        if seq_start != NO_SEQ {
            match (self.seq + 1).cmp(&seq_start) {
                Ordering::Equal => {}
                Ordering::Greater => {
                    debug!("skipping updates that were already handled at seq = {}", self.seq);
                    return Ok((Vec::new(), users, chats));
                }
                Ordering::Less => {
                    debug!("gap detected (local seq {}, remote seq {})", self.seq, seq_start);
                    self.try_begin_get_diff(Entry::Account);
                    return Err(Gap);
                }
            }
        }

        fn update_sort_key(update: &tl::enums::Update) -> i32 {
            match pts_info_of(update) {
                Some(pts) => pts.pts - pts.pts_count,
                None => NO_PTS,
            }
        }

        // Telegram can send updates out of order (e.g. `ReadChannelInbox` first and then
        // `NewChannelMessage`, both with the same `pts`, but the `count` is `0` and `1`
        // respectively), so we sort them first.
        updates.sort_by_key(update_sort_key);

        let mut result = Vec::with_capacity(updates.len() + self.possible_gaps.len());

        let mut any_pts_applied = false;
        let mut reset_deadlines_for = mem::take(&mut self.tmp_entries);
        for update in updates {
            let (entry, update) = self.apply_pts_info(update);
            if let Some(entry) = entry {
                reset_deadlines_for.insert(entry);
            }
            if let Some(update) = update {
                result.push(update);
                any_pts_applied |= entry.is_some();
            }
        }
        self.reset_deadlines(&reset_deadlines_for, next_updates_deadline());
        reset_deadlines_for.clear();
        self.tmp_entries = reset_deadlines_for;

        // > If the updates were applied, local *Updates* state must be updated with `seq`
        // > (unless it's 0) and `date` from the constructor.
        if any_pts_applied {
            if date != NO_DATE {
                self.date = date;
            }
            if seq != NO_SEQ {
                self.seq = seq;
            }
        }

        if !self.possible_gaps.is_empty() {
            let keys = self.possible_gaps.keys().copied().collect::<Vec<_>>();
            for key in keys {
                self.possible_gaps
                    .get_mut(&key)
                    .unwrap()
                    .updates
                    .sort_by_key(update_sort_key);

                for _ in 0..self.possible_gaps[&key].updates.len() {
                    let update = self.possible_gaps.get_mut(&key).unwrap().updates.remove(0);
                    if let (_, Some(update)) = self.apply_pts_info(update) {
                        result.push(update);
                    }
                }
            }

            self.possible_gaps.retain(|_, v| !v.updates.is_empty());
            if self.possible_gaps.is_empty() {
                debug!("successfully resolved gap by waiting");
            }
        }

        Ok((result, users, chats))
    }

    /// Tries to apply the input update if its `pts` follows the correct order.
    ///
    /// If the update can be applied, it is returned; otherwise, the update is stored in a
    /// possible gap (unless it was already handled or would be handled through getting
    /// difference) and `None` is returned.
    fn apply_pts_info(&mut self, update: tl::enums::Update) -> (Option<Entry>, Option<tl::enums::Update>) {
        if let tl::enums::Update::ChannelTooLong(ref u) = update {
            self.try_begin_get_diff(Entry::Channel(u.channel_id));
            return (None, None);
        }

        let pts = match pts_info_of(&update) {
            Some(pts) => pts,
            // No pts means that the update can be applied in any order.
            None => return (None, Some(update)),
        };

        if self.getting_diff_for.contains(&pts.entry) {
            debug!(
                "skipping update for {:?} (getting difference, count {:?}, remote {:?})",
                pts.entry, pts.pts_count, pts.pts
            );
            return (Some(pts.entry), None);
        }

        if let Some(state) = self.map.get(&pts.entry) {
            let local_pts = state.pts;
            match (local_pts + pts.pts_count).cmp(&pts.pts) {
                Ordering::Equal => {}
                Ordering::Greater => {
                    debug!(
                        "skipping update for {:?} (local {:?}, count {:?}, remote {:?})",
                        pts.entry, local_pts, pts.pts_count, pts.pts
                    );
                    return (Some(pts.entry), None);
                }
                Ordering::Less => {
                    info!(
                        "gap on update for {:?} (local {:?}, count {:?}, remote {:?})",
                        pts.entry, local_pts, pts.pts_count, pts.pts
                    );
                    self.possible_gaps
                        .entry(pts.entry)
                        .or_insert_with(|| PossibleGap {
                            deadline: Instant::now() + POSSIBLE_GAP_TIMEOUT,
                            updates: Vec::new(),
                        })
                        .updates
                        .push(update);

                    return (Some(pts.entry), None);
                }
            }
        }
        // else, there is no previous `pts` known, and because this update has to be
        // "right" (it's the first one) our `local_pts` must be `pts - pts_count`.

        self.map
            .entry(pts.entry)
            .or_insert_with(|| State {
                pts: NO_PTS,
                deadline: next_updates_deadline(),
            })
            .pts = pts.pts;

        (Some(pts.entry), Some(update))
    }
}

/// Getting and applying account (and secret chat) difference.
impl MessageBox {
    /// Return the request that needs to be made to get the difference, if any.
    pub fn get_difference(&mut self) -> Option<tl::functions::updates::GetDifference> {
        for entry in [Entry::Account, Entry::Secret] {
            if self.getting_diff_for.contains(&entry) {
                if !self.map.contains_key(&entry) {
                    panic!(
                        "should not try to get difference for an entry {:?} without known state",
                        entry
                    );
                }

                let gd = tl::functions::updates::GetDifference {
                    pts: self.map[&Entry::Account].pts,
                    pts_limit: None,
                    pts_total_limit: None,
                    date: self.date,
                    qts: self.map.get(&Entry::Secret).map(|s| s.pts).unwrap_or(NO_PTS),
                    qts_limit: None,
                };
                trace!("requesting {:?}", gd);
                return Some(gd);
            }
        }
        None
    }

    /// Similar to [`MessageBox::process_updates`], but using the result from getting the
    /// account-wide difference.
    pub fn apply_difference(
        &mut self,
        difference: tl::enums::updates::Difference,
        chat_hashes: &mut ChatHashCache,
    ) -> (Vec<tl::enums::Update>, Vec<tl::types::User>, Vec<tl::types::Chat>) {
        trace!("applying account difference: {:?}", difference);
        let finish: bool;
        let result = match difference {
            tl::enums::updates::Difference::Empty { date, seq } => {
                debug!(
                    "handling empty difference (date = {}, seq = {}); no longer getting diff",
                    date, seq
                );
                finish = true;
                self.date = date;
                self.seq = seq;
                (Vec::new(), Vec::new(), Vec::new())
            }
            tl::enums::updates::Difference::Difference(diff) => {
                chat_hashes.extend(&diff.users, &diff.chats);
                debug!("handling full difference (pts = {}); no longer getting diff", diff.state.pts);
                finish = true;
                self.apply_difference_type(diff, chat_hashes)
            }
            tl::enums::updates::Difference::Slice(diff) => {
                chat_hashes.extend(&diff.users, &diff.chats);
                debug!("handling partial difference (pts = {})", diff.state.pts);
                finish = false;
                self.apply_difference_type(diff, chat_hashes)
            }
            tl::enums::updates::Difference::TooLong { pts } => {
                debug!("handling too-long difference (pts = {}); no longer getting diff", pts);
                finish = true;
                // the deadline will be reset once the diff ends
                self.map.get_mut(&Entry::Account).unwrap().pts = pts;
                (Vec::new(), Vec::new(), Vec::new())
            }
        };

        if finish {
            let account = self.getting_diff_for.contains(&Entry::Account);
            let secret = self.getting_diff_for.contains(&Entry::Secret);

            if !account && !secret {
                panic!("should not be applying the difference when neither account or secret diff was active")
            }

            if account {
                self.end_get_diff(Entry::Account);
            }
            if secret {
                self.end_get_diff(Entry::Secret);
            }
        }

        result
    }

    fn apply_difference_type(
        &mut self,
        diff: tl::types::DifferenceFull,
        chat_hashes: &mut ChatHashCache,
    ) -> (Vec<tl::enums::Update>, Vec<tl::types::User>, Vec<tl::types::Chat>) {
        self.map.get_mut(&Entry::Account).unwrap().pts = diff.state.pts;
        self.map.get_mut(&Entry::Secret).unwrap().pts = diff.state.qts;
        self.date = diff.state.date;
        self.seq = diff.state.seq;

        // other_updates can contain things like UpdateChannelTooLong and
        // UpdateNewChannelMessage. Process them as if they were socket updates to discard
        // any already handled.
        let us = UpdatesLike::Updates(tl::enums::Updates::Updates(tl::types::Updates {
            updates: diff.other_updates,
            users: diff.users,
            chats: diff.chats,
            date: NO_DATE,
            seq: NO_SEQ,
        }));

        let (mut result_updates, users, chats) = self
            .process_updates(us, chat_hashes)
            .expect("gap is detected while applying difference");

        result_updates.extend(
            diff.new_messages
                .into_iter()
                .map(|message| {
                    tl::enums::Update::NewMessage(tl::types::UpdateNewMessage {
                        message,
                        pts: NO_PTS,
                        pts_count: 0,
                    })
                })
                .chain(diff.new_encrypted_messages.into_iter().map(|message| {
                    tl::enums::Update::NewEncryptedMessage(tl::types::UpdateNewEncryptedMessage {
                        message,
                        qts: NO_PTS,
                    })
                })),
        );

        (result_updates, users, chats)
    }
}

/// Getting and applying channel difference.
impl MessageBox {
    /// Return the request that needs to be made to get a channel's difference, if any.
    pub fn get_channel_difference(
        &mut self,
        chat_hashes: &ChatHashCache,
    ) -> Option<tl::functions::updates::GetChannelDifference> {
        let (entry, id) = self.getting_diff_for.iter().find_map(|&entry| match entry {
            Entry::Channel(id) => Some((entry, id)),
            _ => None,
        })?;

        if let Some(channel) = chat_hashes.get_input_channel(id) {
            if let Some(state) = self.map.get(&entry) {
                let gd = tl::functions::updates::GetChannelDifference {
                    force: false,
                    channel,
                    filter: tl::enums::ChannelMessagesFilter::Empty,
                    pts: state.pts,
                    limit: if chat_hashes.is_self_bot() {
                        BOT_CHANNEL_DIFF_LIMIT
                    } else {
                        USER_CHANNEL_DIFF_LIMIT
                    },
                };
                trace!("requesting {:?}", gd);
                Some(gd)
            } else {
                panic!(
                    "should not try to get difference for an entry {:?} without known state",
                    entry
                );
            }
        } else {
            warn!("cannot getChannelDifference for {} as we're missing its hash", id);
            self.end_get_diff(entry);
            // Remove the outdated `pts` entry so that the next update can correct it
            // instead of spamming that the hash is missing.
            self.map.remove(&entry);
            None
        }
    }

    /// Similar to [`MessageBox::process_updates`], but using the result from getting a
    /// channel's difference.
    pub fn apply_channel_difference(
        &mut self,
        request: tl::functions::updates::GetChannelDifference,
        difference: tl::enums::updates::ChannelDifference,
        chat_hashes: &mut ChatHashCache,
    ) -> (Vec<tl::enums::Update>, Vec<tl::types::User>, Vec<tl::types::Chat>) {
        let channel_id = channel_id(&request).expect("request had wrong input channel");
        trace!("applying channel difference for {}: {:?}", channel_id, difference);
        let entry = Entry::Channel(channel_id);

        self.possible_gaps.remove(&entry);

        match difference {
            tl::enums::updates::ChannelDifference::Empty { final_, pts, timeout } => {
                assert!(final_);
                debug!(
                    "handling empty channel {} difference (pts = {}); no longer getting diff",
                    channel_id, pts
                );
                self.end_get_diff(entry);
                self.map.get_mut(&entry).unwrap().pts = pts;
                let _ = timeout;
                (Vec::new(), Vec::new(), Vec::new())
            }
            tl::enums::updates::ChannelDifference::TooLong {
                final_,
                timeout,
                dialog_pts,
            } => {
                assert!(final_);
                info!(
                    "handling too long channel {} difference; no longer getting diff",
                    channel_id
                );
                self.end_get_diff(entry);
                self.map.get_mut(&entry).unwrap().pts = dialog_pts;
                self.reset_channel_deadline(channel_id, timeout);
                // This has the "latest messages and corresponding chats", but it would be
                // strange to give the caller only partial changes when they'd expect all
                // updates to be fetched. Nothing is returned instead.
                (Vec::new(), Vec::new(), Vec::new())
            }
            tl::enums::updates::ChannelDifference::Difference(diff) => {
                chat_hashes.extend(&diff.users, &diff.chats);

                if diff.final_ {
                    debug!("handling channel {} difference; no longer getting diff", channel_id);
                    self.end_get_diff(entry);
                } else {
                    debug!("handling channel {} difference", channel_id);
                }

                self.map.get_mut(&entry).unwrap().pts = diff.pts;
                let us = UpdatesLike::Updates(tl::enums::Updates::Updates(tl::types::Updates {
                    updates: diff.other_updates,
                    users: diff.users,
                    chats: diff.chats,
                    date: NO_DATE,
                    seq: NO_SEQ,
                }));
                let (mut result_updates, users, chats) = self
                    .process_updates(us, chat_hashes)
                    .expect("gap is detected while applying channel difference");

                result_updates.extend(diff.new_messages.into_iter().map(|message| {
                    tl::enums::Update::NewChannelMessage(tl::types::UpdateNewChannelMessage {
                        message,
                        pts: NO_PTS,
                        pts_count: 0,
                    })
                }));
                self.reset_channel_deadline(channel_id, diff.timeout);

                (result_updates, users, chats)
            }
        }
    }

    pub fn end_channel_difference(
        &mut self,
        request: &tl::functions::updates::GetChannelDifference,
        reason: PrematureEndReason,
    ) {
        if let Some(channel_id) = channel_id(request) {
            trace!("ending channel difference for {} because {:?}", channel_id, reason);
            let entry = Entry::Channel(channel_id);
            self.possible_gaps.remove(&entry);
            self.end_get_diff(entry);
            if let PrematureEndReason::Banned = reason {
                self.map.remove(&entry);
            }
        }
    }
}

pub fn channel_id(request: &tl::functions::updates::GetChannelDifference) -> Option<i64> {
    match request.channel {
        tl::enums::InputChannel::Channel(ref c) => Some(c.channel_id),
        tl::enums::InputChannel::Empty => None,
    }
}

/// Why a channel difference fetch was abandoned before Telegram sent a proper reply.
#[derive(Debug)]
pub enum PrematureEndReason {
    TemporaryServerIssues,
    Banned,
}
