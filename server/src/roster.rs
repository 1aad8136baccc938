//! Fixed-capacity roster of greeted clients
//!
//! A client only gets a slot once its greeting arrives; a bare transport
//! connection is not a roster member. Slots are handed out lowest index first
//! and a slot's index stays stable for as long as it is occupied.

use log::info;
use shared::{ClientName, PeerId};

/// One occupied roster slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub name: ClientName,
    /// Transport handle of the client, owned by the server while the slot is active
    pub peer: PeerId,
}

/// Outcome of [`Roster::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(usize),
    /// The peer already holds this slot
    AlreadyAdmitted(usize),
    Full,
}

/// Slots for greeted clients, indexed by slot number
#[derive(Debug)]
pub struct Roster {
    slots: Vec<Option<Slot>>,
    client_count: usize,
}

impl Roster {
    /// Creates a roster with `capacity` empty slots
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            client_count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of active slots
    pub fn client_count(&self) -> usize {
        self.client_count
    }

    pub fn is_empty(&self) -> bool {
        self.client_count == 0
    }

    pub fn is_full(&self) -> bool {
        self.client_count == self.slots.len()
    }

    /// Puts `peer` into the first free slot
    pub fn admit(&mut self, peer: PeerId, name: ClientName) -> Admission {
        if let Some(index) = self.find_by_peer(peer) {
            return Admission::AlreadyAdmitted(index);
        }

        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Admission::Full;
        };

        info!("Client {} admitted to slot {}", name, index);
        self.slots[index] = Some(Slot { name, peer });
        self.client_count += 1;

        Admission::Admitted(index)
    }

    pub fn find_by_peer(&self, peer: PeerId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().map_or(false, |slot| slot.peer == peer))
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Frees the slot at `index`, returning what it held
    pub fn remove(&mut self, index: usize) -> Option<Slot> {
        let slot = self.slots.get_mut(index).and_then(Option::take)?;
        self.client_count -= 1;

        info!("Client {} removed from slot {}", slot.name, index);
        Some(slot)
    }

    /// Frees the slot held by `peer`; unknown peers are ignored
    pub fn remove_by_peer(&mut self, peer: PeerId) -> Option<(usize, Slot)> {
        let index = self.find_by_peer(peer)?;
        self.remove(index).map(|slot| (index, slot))
    }

    /// Active slots in index order
    pub fn active(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|slot| (index, slot)))
    }

    /// Empties every slot, returning the evicted clients in index order
    pub fn clear(&mut self) -> Vec<(usize, Slot)> {
        let evicted: Vec<(usize, Slot)> = self
            .slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.take().map(|slot| (index, slot)))
            .collect();
        self.client_count = 0;

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn name(name: &str) -> ClientName {
        ClientName::new(name).unwrap()
    }

    #[test]
    fn test_roster_creation() {
        let roster = Roster::new(3);
        assert_eq!(roster.capacity(), 3);
        assert_eq!(roster.client_count(), 0);
        assert!(roster.is_empty());
        assert!(!roster.is_full());
    }

    #[test]
    fn test_admit_lowest_free_slot() {
        let mut roster = Roster::new(3);

        assert_eq!(roster.admit(PeerId(7), name("a")), Admission::Admitted(0));
        assert_eq!(roster.admit(PeerId(3), name("b")), Admission::Admitted(1));
        assert_eq!(roster.client_count(), 2);

        roster.remove(0);
        assert_eq!(roster.admit(PeerId(9), name("c")), Admission::Admitted(0));
        assert_eq!(roster.get(0).unwrap().name.as_str(), "c");
        assert_eq!(roster.get(1).unwrap().peer, PeerId(3));
    }

    #[test]
    fn test_admit_when_full() {
        let mut roster = Roster::new(1);

        roster.admit(PeerId(0), name("a"));
        assert!(roster.is_full());
        assert_eq!(roster.admit(PeerId(1), name("b")), Admission::Full);
        assert_eq!(roster.client_count(), 1);
    }

    #[test]
    fn test_repeated_greeting_keeps_slot() {
        let mut roster = Roster::new(2);

        roster.admit(PeerId(4), name("a"));
        assert_eq!(
            roster.admit(PeerId(4), name("again")),
            Admission::AlreadyAdmitted(0)
        );
        assert_eq!(roster.client_count(), 1);
        assert_eq!(roster.get(0).unwrap().name.as_str(), "a");
    }

    #[test]
    fn test_remove_by_peer() {
        let mut roster = Roster::new(2);
        roster.admit(PeerId(4), name("a"));
        roster.admit(PeerId(5), name("b"));

        let (index, slot) = roster.remove_by_peer(PeerId(5)).unwrap();
        assert_eq!(index, 1);
        assert_eq!(slot.name.as_str(), "b");
        assert_eq!(roster.client_count(), 1);
        assert!(roster.get(1).is_none());
    }

    #[test]
    fn test_remove_unknown_is_ignored() {
        let mut roster = Roster::new(2);
        roster.admit(PeerId(4), name("a"));

        assert!(roster.remove_by_peer(PeerId(9)).is_none());
        assert!(roster.remove(1).is_none());
        assert!(roster.remove(42).is_none());
        assert_eq!(roster.client_count(), 1);
    }

    #[test]
    fn test_clear_evicts_everyone() {
        let mut roster = Roster::new(3);
        roster.admit(PeerId(1), name("a"));
        roster.admit(PeerId(2), name("b"));

        let evicted = roster.clear();
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].0, 0);
        assert_eq!(evicted[1].1.peer, PeerId(2));
        assert!(roster.is_empty());
        assert_eq!(roster.active().count(), 0);
    }

    #[test]
    fn test_count_matches_active_slots_under_churn() {
        let mut rng = rand::thread_rng();
        let mut roster = Roster::new(3);

        for _ in 0..500 {
            let peer = PeerId(rng.gen_range(0..6));
            if rng.gen_bool(0.5) {
                roster.admit(peer, name("x"));
            } else {
                roster.remove_by_peer(peer);
            }

            assert_eq!(roster.client_count(), roster.active().count());
            assert!(roster.client_count() <= roster.capacity());
        }
    }
}
