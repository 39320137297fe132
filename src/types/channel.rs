//! Channel and favorite group records.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

/// Highest favorite group id representable in the `FavMark` bitmask.
pub const MAX_FAVORITE_GROUP_ID: u8 = 32;

/// Kind of program carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProgramType {
    /// Radio service (`ProgramType` 0)
    #[default]
    Radio,
    /// Television service (`ProgramType` 1)
    Tv,
}

impl ProgramType {
    /// Map the device's numeric program type. Unknown values are radio.
    pub fn from_device(value: i32) -> Self {
        if value == 1 {
            Self::Tv
        } else {
            Self::Radio
        }
    }
}

/// A channel as reported by the device.
///
/// The favorite membership is kept as a set of group ids. The `FavMark`
/// bitmask is always derived from that set, so the two views cannot drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Fixed-width numeric program id, e.g. `00050029700001`. Unique key.
    pub program_id: String,
    /// Display name
    pub name: String,
    /// Position in the device's own list
    pub index: u32,
    /// Radio or TV
    pub program_type: ProgramType,
    /// High definition service
    pub is_hd: bool,
    /// Parental lock
    pub is_locked: bool,
    /// Device channel type
    pub channel_type: i32,
    /// Provider label, from the device or the provider lookup
    pub provider: String,
    /// UI selection flag, never sent to the device
    #[serde(default)]
    pub selected: bool,
    #[serde(default, deserialize_with = "deserialize_group_ids")]
    favorite_groups: BTreeSet<u8>,
}

impl Channel {
    /// Create a channel with no favorite membership.
    pub fn new(program_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
            name: name.into(),
            index: 0,
            program_type: ProgramType::Tv,
            is_hd: false,
            is_locked: false,
            channel_type: 0,
            provider: String::new(),
            selected: false,
            favorite_groups: BTreeSet::new(),
        }
    }

    /// Favorite group ids this channel belongs to, ascending.
    pub fn favorite_groups(&self) -> &BTreeSet<u8> {
        &self.favorite_groups
    }

    /// `FavMark` bitmask: bit `id - 1` set for every member group.
    pub fn fav_mark(&self) -> u32 {
        self.favorite_groups
            .iter()
            .fold(0, |mark, id| mark | (1u32 << (id - 1)))
    }

    /// Whether the channel belongs to the given favorite group.
    pub fn is_in_favorite_group(&self, group_id: u8) -> bool {
        self.favorite_groups.contains(&group_id)
    }

    /// Add the channel to a favorite group.
    ///
    /// Returns false for ids outside `1..=32`, which the bitmask cannot hold.
    pub fn add_to_favorite_group(&mut self, group_id: u8) -> bool {
        if !is_valid_group_id(group_id) {
            return false;
        }
        self.favorite_groups.insert(group_id);
        true
    }

    /// Remove the channel from a favorite group.
    pub fn remove_from_favorite_group(&mut self, group_id: u8) {
        self.favorite_groups.remove(&group_id);
    }

    /// Replace the favorite membership. Invalid ids are dropped.
    pub fn set_favorite_groups(&mut self, groups: impl IntoIterator<Item = u8>) {
        self.favorite_groups = groups.into_iter().filter(|id| is_valid_group_id(*id)).collect();
    }

    /// Replace the favorite membership from a `FavMark` bitmask.
    pub fn set_fav_mark(&mut self, mark: u32) {
        self.favorite_groups = (1..=MAX_FAVORITE_GROUP_ID)
            .filter(|id| mark & (1u32 << (id - 1)) != 0)
            .collect();
    }

    /// `FavorGroupID` wire string, e.g. `"1:2:"`. Empty for no membership.
    pub fn favor_group_id_string(&self) -> String {
        format_favor_group_ids(&self.favorite_groups)
    }
}

/// A named favorite group on the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FavoriteGroup {
    /// Group id, starting at 1
    pub id: u8,
    /// Display name
    pub name: String,
}

impl FavoriteGroup {
    /// Create a favorite group.
    pub fn new(id: u8, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[inline]
fn is_valid_group_id(id: u8) -> bool {
    (1..=MAX_FAVORITE_GROUP_ID).contains(&id)
}

/// Cached snapshots are not trusted to hold only valid group ids.
fn deserialize_group_ids<'de, D>(deserializer: D) -> Result<BTreeSet<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = Vec::<u32>::deserialize(deserializer)?;
    Ok(ids
        .into_iter()
        .filter_map(|id| u8::try_from(id).ok())
        .filter(|id| is_valid_group_id(*id))
        .collect())
}

/// Parse a `FavorGroupID` string (`"2:1:"` → `{1, 2}`).
///
/// Empty segments and anything that is not a valid group id are skipped.
pub fn parse_favor_group_ids(s: &str) -> BTreeSet<u8> {
    s.split(':')
        .filter_map(|part| part.trim().parse::<u8>().ok())
        .filter(|id| is_valid_group_id(*id))
        .collect()
}

/// Format group ids as a `FavorGroupID` string with a trailing colon.
pub fn format_favor_group_ids<'a>(ids: impl IntoIterator<Item = &'a u8>) -> String {
    ids.into_iter().map(|id| format!("{id}:")).collect()
}
