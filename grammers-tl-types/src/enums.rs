// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The trimmed slice of Telegram's `Update`/`Updates` family the message
//! box needs to recognize. A full client would code-generate every
//! variant from the `.tl` schema; here only the handful that drive
//! pts/qts bookkeeping are hand-curated.
use crate::deserialize::{Cursor, Error, Result};
use crate::{types, Deserializable, Identifiable, Serializable};

/// Peeks the leading constructor ID without consuming it.
fn peek_id(buf: &Cursor) -> Result<u32> {
    let mut probe = *buf;
    u32::deserialize(&mut probe)
}

/// `Update` constructors that carry (or deny) a `pts`/`qts` ordering
/// constraint. See [`crate::types::Message`] and
/// [`crate::types::EncryptedMessage`] for the payloads these wrap.
pub enum Update {
    NewMessage(types::UpdateNewMessage),
    NewChannelMessage(types::UpdateNewChannelMessage),
    NewEncryptedMessage(types::UpdateNewEncryptedMessage),
    ChannelTooLong(types::UpdateChannelTooLong),
    DeleteMessages(types::UpdateDeleteMessages),
    DeleteChannelMessages(types::UpdateDeleteChannelMessages),
}

impl Serializable for Update {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        match self {
            Update::NewMessage(u) => u.serialize(buf),
            Update::NewChannelMessage(u) => u.serialize(buf),
            Update::NewEncryptedMessage(u) => u.serialize(buf),
            Update::ChannelTooLong(u) => u.serialize(buf),
            Update::DeleteMessages(u) => u.serialize(buf),
            Update::DeleteChannelMessages(u) => u.serialize(buf),
        }
    }
}

impl Deserializable for Update {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        use types::*;
        Ok(match peek_id(buf)? {
            x if x == UpdateNewMessage::CONSTRUCTOR_ID => {
                Update::NewMessage(UpdateNewMessage::deserialize(buf)?)
            }
            x if x == UpdateNewChannelMessage::CONSTRUCTOR_ID => {
                Update::NewChannelMessage(UpdateNewChannelMessage::deserialize(buf)?)
            }
            x if x == UpdateNewEncryptedMessage::CONSTRUCTOR_ID => {
                Update::NewEncryptedMessage(UpdateNewEncryptedMessage::deserialize(buf)?)
            }
            x if x == UpdateChannelTooLong::CONSTRUCTOR_ID => {
                Update::ChannelTooLong(UpdateChannelTooLong::deserialize(buf)?)
            }
            x if x == UpdateDeleteMessages::CONSTRUCTOR_ID => {
                Update::DeleteMessages(UpdateDeleteMessages::deserialize(buf)?)
            }
            x if x == UpdateDeleteChannelMessages::CONSTRUCTOR_ID => {
                Update::DeleteChannelMessages(UpdateDeleteChannelMessages::deserialize(buf)?)
            }
            id => return Err(Error::UnexpectedConstructor { id }),
        })
    }
}

/// `updateShort#78d4dec1 update:Update date:int = Updates;`
pub struct UpdateShort {
    pub update: Update,
    pub date: i32,
}
impl UpdateShort {
    pub const CONSTRUCTOR_ID: u32 = 0x78d4dec1;
}

/// `updateShortSentMessage#9015e101 out:flags.0?true pts:int pts_count:int date:int = Updates;`
///
/// Only ever returned as the result of sending a message; the caller
/// pairs it with the request that produced it.
pub struct UpdateShortSentMessage {
    pub pts: i32,
    pub pts_count: i32,
    pub date: i32,
}
impl UpdateShortSentMessage {
    pub const CONSTRUCTOR_ID: u32 = 0x9015e101;
}

/// The `Updates` supertype: whatever shape the server chooses to wrap a
/// batch of updates in. [`crate::UPDATES_SUBCLASS_OF_ID`] is the CRC32
/// every one of these constructors declares itself a subclass of.
pub enum Updates {
    TooLong,
    UpdateShort(UpdateShort),
    Combined(types::UpdatesCombined),
    Updates(types::Updates),
    UpdateShortSentMessage(UpdateShortSentMessage),
}

impl Updates {
    /// `updatesTooLong#e317af7e = Updates;`
    pub const TOO_LONG_ID: u32 = 0xe317af7e;
    pub const SUBCLASS_OF_ID: u32 = crate::UPDATES_SUBCLASS_OF_ID;
}

impl Deserializable for Updates {
    fn deserialize(buf: &mut Cursor) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        Ok(match id {
            Updates::TOO_LONG_ID => Updates::TooLong,
            x if x == UpdateShort::CONSTRUCTOR_ID => Updates::UpdateShort(UpdateShort {
                update: Update::deserialize(buf)?,
                date: i32::deserialize(buf)?,
            }),
            x if x == types::UpdatesCombined::CONSTRUCTOR_ID => {
                Updates::Combined(types::UpdatesCombined::deserialize_fields(buf)?)
            }
            x if x == types::Updates::CONSTRUCTOR_ID => {
                Updates::Updates(types::Updates::deserialize_fields(buf)?)
            }
            x if x == UpdateShortSentMessage::CONSTRUCTOR_ID => {
                let flags = i32::deserialize(buf)?;
                let _out = flags & 1 != 0;
                Updates::UpdateShortSentMessage(UpdateShortSentMessage {
                    pts: i32::deserialize(buf)?,
                    pts_count: i32::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                })
            }
            _ => return Err(Error::UnexpectedConstructor { id }),
        })
    }
}

/// `updates.differenceEmpty#5d75a138 date:int seq:int = updates.Difference;`
/// `updates.difference#00f49ca0 ... = updates.Difference;`
/// `updates.differenceSlice#a8fb1981 ... = updates.Difference;`
/// `updates.differenceTooLong#4afe8f6d pts:int = updates.Difference;`
pub mod updates {
    use super::*;

    pub enum Difference {
        Empty { date: i32, seq: i32 },
        Difference(types::DifferenceFull),
        Slice(types::DifferenceFull),
        TooLong { pts: i32 },
    }

    impl Difference {
        pub const EMPTY_ID: u32 = 0x5d75a138;
        pub const FULL_ID: u32 = 0x00f49ca0;
        pub const SLICE_ID: u32 = 0xa8fb1981;
        pub const TOO_LONG_ID: u32 = 0x4afe8f6d;
    }

    impl Deserializable for Difference {
        fn deserialize(buf: &mut Cursor) -> Result<Self> {
            let id = u32::deserialize(buf)?;
            Ok(match id {
                Difference::EMPTY_ID => Difference::Empty {
                    date: i32::deserialize(buf)?,
                    seq: i32::deserialize(buf)?,
                },
                Difference::FULL_ID => Difference::Difference(types::DifferenceFull::deserialize(buf)?),
                Difference::SLICE_ID => Difference::Slice(types::DifferenceFull::deserialize(buf)?),
                Difference::TOO_LONG_ID => Difference::TooLong {
                    pts: i32::deserialize(buf)?,
                },
                _ => return Err(Error::UnexpectedConstructor { id }),
            })
        }
    }

    /// `updates.channelDifferenceEmpty#3e11affb ... = updates.ChannelDifference;`
    /// `updates.channelDifferenceTooLong#f0e3e596 ... = updates.ChannelDifference;`
    /// `updates.channelDifference#2064674e ... = updates.ChannelDifference;`
    pub enum ChannelDifference {
        Empty {
            final_: bool,
            pts: i32,
            timeout: Option<i32>,
        },
        TooLong {
            final_: bool,
            timeout: Option<i32>,
            dialog_pts: i32,
        },
        Difference(types::ChannelDifferenceFull),
    }

    impl ChannelDifference {
        pub const EMPTY_ID: u32 = 0x3e11affb;
        pub const TOO_LONG_ID: u32 = 0xf0e3e596;
        pub const FULL_ID: u32 = 0x2064674e;
    }

    impl Deserializable for ChannelDifference {
        fn deserialize(buf: &mut Cursor) -> Result<Self> {
            let id = u32::deserialize(buf)?;
            Ok(match id {
                ChannelDifference::EMPTY_ID => {
                    let flags = i32::deserialize(buf)?;
                    ChannelDifference::Empty {
                        final_: flags & 1 != 0,
                        pts: i32::deserialize(buf)?,
                        timeout: if flags & 2 != 0 {
                            Some(i32::deserialize(buf)?)
                        } else {
                            None
                        },
                    }
                }
                ChannelDifference::TOO_LONG_ID => {
                    let flags = i32::deserialize(buf)?;
                    ChannelDifference::TooLong {
                        final_: flags & 1 != 0,
                        timeout: if flags & 2 != 0 {
                            Some(i32::deserialize(buf)?)
                        } else {
                            None
                        },
                        dialog_pts: i32::deserialize(buf)?,
                    }
                }
                ChannelDifference::FULL_ID => {
                    ChannelDifference::Difference(types::ChannelDifferenceFull::deserialize(buf)?)
                }
                _ => return Err(Error::UnexpectedConstructor { id }),
            })
        }
    }
}

/// `inputChannel#f35aec28 channel_id:long access_hash:long = InputChannel;`
/// `inputChannelEmpty#ee8c1e86 = InputChannel;`
pub enum InputChannel {
    Empty,
    Channel(types::InputChannelData),
}

impl Serializable for InputChannel {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        match self {
            InputChannel::Empty => 0xee8c1e86u32.serialize(buf),
            InputChannel::Channel(c) => c.serialize(buf),
        }
    }
}

/// `channelMessagesFilterEmpty#94d42ee7 = ChannelMessagesFilter;`
pub enum ChannelMessagesFilter {
    Empty,
}

impl Serializable for ChannelMessagesFilter {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        match self {
            ChannelMessagesFilter::Empty => 0x94d42ee7u32.serialize(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_new_message_roundtrip() {
        let update = Update::NewMessage(types::UpdateNewMessage {
            message: types::Message {
                id: 1,
                peer_id: None,
                date: 100,
                message: "hi".to_owned(),
            },
            pts: 5,
            pts_count: 1,
        });
        let bytes = update.to_bytes();
        match Update::from_bytes(&bytes).unwrap() {
            Update::NewMessage(u) => {
                assert_eq!(u.pts, 5);
                assert_eq!(u.pts_count, 1);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn updates_combined_roundtrip() {
        use crate::Serializable as _;
        let mut bytes = Vec::new();
        types::UpdatesCombined::CONSTRUCTOR_ID.serialize(&mut bytes);
        Vec::<Update>::new().serialize(&mut bytes);
        Vec::<types::User>::new().serialize(&mut bytes);
        Vec::<types::Chat>::new().serialize(&mut bytes);
        1000i32.serialize(&mut bytes);
        7i32.serialize(&mut bytes);
        9i32.serialize(&mut bytes);
        match Updates::from_bytes(&bytes).unwrap() {
            Updates::Combined(c) => {
                assert_eq!(c.seq_start, 7);
                assert_eq!(c.seq, 9);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn updates_too_long_roundtrip() {
        let bytes = Updates::TOO_LONG_ID.to_le_bytes();
        assert!(matches!(Updates::from_bytes(&bytes).unwrap(), Updates::TooLong));
    }
}
