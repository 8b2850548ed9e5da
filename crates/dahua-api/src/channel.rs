//! Channel identity and the per-device registry.

use std::fmt;

use dashmap::DashMap;
use serde::Serialize;

/// A logical camera/video input line on a device, identified by a stable
/// user-facing number. The name is the last-known display title and may
/// be absent for channels only ever seen through live events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    number: i64,
    name: Option<String>,
}

impl Channel {
    pub fn number(&self) -> i64 {
        self.number
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "channel {}", self.number),
        }
    }
}

/// Index → number mapping plus every channel observed this session.
///
/// Owned by exactly one [`Device`](crate::device::Device). Channels are
/// created lazily — by a title lookup or by a live event referencing an
/// unseen index — renamed in place when a later lookup reports a new
/// title, and never removed. Written by the listener task or an info
/// refresh; safe to read concurrently from entity/sensor collaborators.
#[derive(Debug)]
pub struct ChannelRegistry {
    offset: i64,
    channels: DashMap<i64, Channel>,
}

impl ChannelRegistry {
    /// A registry with the device's fixed channel-number offset.
    pub fn new(offset: i64) -> Self {
        Self {
            offset,
            channels: DashMap::new(),
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Map a device-reported index to the user-facing channel number.
    pub fn index_to_number(&self, index: i64) -> i64 {
        index + self.offset
    }

    /// Create a channel or rename an existing one.
    pub fn upsert(&self, number: i64, name: impl Into<String>) {
        let name = Some(name.into());
        self.channels
            .entry(number)
            .and_modify(|channel| channel.name = name.clone())
            .or_insert(Channel { number, name });
    }

    /// Record that a live event referenced `number`, creating a nameless
    /// channel on first sight. Returns a snapshot of the channel.
    pub fn observe(&self, number: i64) -> Channel {
        self.channels
            .entry(number)
            .or_insert(Channel { number, name: None })
            .value()
            .clone()
    }

    /// Snapshot of the channel with the given number, if known.
    pub fn get(&self, number: i64) -> Option<Channel> {
        self.channels.get(&number).map(|entry| entry.value().clone())
    }

    /// All known channels, ordered by number.
    pub fn snapshot(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> =
            self.channels.iter().map(|entry| entry.value().clone()).collect();
        channels.sort_by_key(Channel::number);
        channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_to_number_is_a_bijection() {
        let registry = ChannelRegistry::new(1);
        for index in 0..32 {
            assert_eq!(registry.index_to_number(index) - registry.offset(), index);
        }
        let zero_based = ChannelRegistry::new(0);
        assert_eq!(zero_based.index_to_number(7), 7);
    }

    #[test]
    fn upsert_creates_then_renames() {
        let registry = ChannelRegistry::new(1);
        registry.upsert(1, "Front");
        assert_eq!(registry.get(1).unwrap().name(), Some("Front"));

        registry.upsert(1, "Front Door");
        assert_eq!(registry.get(1).unwrap().name(), Some("Front Door"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn observe_creates_nameless_channel_once() {
        let registry = ChannelRegistry::new(1);
        let channel = registry.observe(4);
        assert_eq!(channel.number(), 4);
        assert_eq!(channel.name(), None);

        // a later title lookup names it in place
        registry.upsert(4, "Garage");
        assert_eq!(registry.observe(4).name(), Some("Garage"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_is_ordered_by_number() {
        let registry = ChannelRegistry::new(1);
        registry.upsert(3, "C");
        registry.upsert(1, "A");
        registry.upsert(2, "B");
        let numbers: Vec<i64> = registry.snapshot().iter().map(Channel::number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn display_falls_back_to_number() {
        let registry = ChannelRegistry::new(1);
        let unnamed = registry.observe(2);
        assert_eq!(unnamed.to_string(), "channel 2");
        registry.upsert(2, "Lobby");
        assert_eq!(registry.observe(2).to_string(), "Lobby");
    }
}
