//! # Peer Registry
//!
//! Fixed-capacity table of the radio device identities heard over the air.
//! Slots fill in discovery order and never move: the application targets
//! transmissions by slot index, so an identity keeps its slot for the whole
//! session. There is no eviction and no reset; once the table is full new
//! identities are dropped silently (the reference hardware drives at most a
//! handful of peers per session).

/// Result of offering an identity to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// The identity already occupies this slot; nothing changed.
    AlreadyKnown(usize),
    /// The identity was stored in this (previously empty) slot.
    Inserted(usize),
    /// Every slot is taken by another identity; the observation was dropped.
    Full,
}

/// Table of up to `CAPACITY` distinct peer identities.
pub struct PeerRegistry<const CAPACITY: usize> {
    slots: [Option<u16>; CAPACITY],
}

impl<const CAPACITY: usize> PeerRegistry<CAPACITY> {
    pub const fn new() -> Self {
        Self {
            slots: [None; CAPACITY],
        }
    }

    /// Records a heard identity. Deduplicates by equality before taking a
    /// slot, so repeated observations are idempotent.
    pub fn observe(&mut self, id: u16) -> ObserveOutcome {
        for (slot, entry) in self.slots.iter().enumerate() {
            if *entry == Some(id) {
                return ObserveOutcome::AlreadyKnown(slot);
            }
        }
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(id);
                return ObserveOutcome::Inserted(slot);
            }
        }
        ObserveOutcome::Full
    }

    /// The identity stored in `slot`, if any. Out-of-range slots read as
    /// empty.
    pub fn get(&self, slot: usize) -> Option<u16> {
        self.slots.get(slot).copied().flatten()
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_fill_slots_in_discovery_order() {
        let mut registry: PeerRegistry<3> = PeerRegistry::new();
        assert!(registry.is_empty());

        assert_eq!(registry.observe(0x000A), ObserveOutcome::Inserted(0));
        assert_eq!(registry.observe(0x000B), ObserveOutcome::Inserted(1));
        assert_eq!(registry.observe(0x000C), ObserveOutcome::Inserted(2));

        assert_eq!(registry.get(0), Some(0x000A));
        assert_eq!(registry.get(1), Some(0x000B));
        assert_eq!(registry.get(2), Some(0x000C));
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn re_observation_is_idempotent() {
        let mut registry: PeerRegistry<3> = PeerRegistry::new();
        registry.observe(0x000A);
        registry.observe(0x000B);

        assert_eq!(registry.observe(0x000A), ObserveOutcome::AlreadyKnown(0));
        assert_eq!(registry.observe(0x000B), ObserveOutcome::AlreadyKnown(1));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn fourth_identity_is_dropped_at_capacity_three() {
        let mut registry: PeerRegistry<3> = PeerRegistry::new();
        registry.observe(0x000A);
        registry.observe(0x000B);
        registry.observe(0x000C);

        assert_eq!(registry.observe(0x000D), ObserveOutcome::Full);
        assert_eq!(registry.count(), 3);
        assert_eq!(registry.get(0), Some(0x000A));
        // A known identity still answers after a dropped observation.
        assert_eq!(registry.observe(0x000C), ObserveOutcome::AlreadyKnown(2));
    }

    #[test]
    fn empty_and_out_of_range_slots_read_as_none() {
        let mut registry: PeerRegistry<3> = PeerRegistry::new();
        registry.observe(0x000A);

        assert_eq!(registry.get(1), None);
        assert_eq!(registry.get(7), None);
    }
}
