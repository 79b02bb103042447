use crate::signal::ParticipantId;
use std::collections::HashSet;

/// Bookkeeping of connected participants and of those which declared readiness.
///
/// The registry is not synchronized on its own: [crate::SignalingHub] owns it behind a single
/// lock, so that a readiness change and the election check it may trigger are observed
/// atomically.
#[derive(Debug, Default)]
pub struct Registry {
    connected: HashSet<ParticipantId>,
    /// Ready participants in order of readiness arrival.
    ready: Vec<ParticipantId>,
}

/// Result of a readiness transition into a ready set of exactly two participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Election {
    pub initiator: ParticipantId,
    pub answerer: ParticipantId,
}

impl Registry {
    /// Register a new participant and return its freshly generated id.
    pub fn connect(&mut self) -> ParticipantId {
        loop {
            let id = ParticipantId::generate();
            if self.connected.insert(id) {
                return id;
            }
        }
    }

    /// Remove participant from both connected and ready sets. Returns `false` if participant was
    /// not connected in the first place.
    pub fn disconnect(&mut self, id: &ParticipantId) -> bool {
        self.ready.retain(|p| p != id);
        self.connected.remove(id)
    }

    /// Mark participant as ready. Returns `true` if the ready set changed.
    pub fn set_ready(&mut self, id: ParticipantId) -> bool {
        if !self.connected.contains(&id) || self.ready.contains(&id) {
            false
        } else {
            self.ready.push(id);
            true
        }
    }

    /// Remove participant from the ready set, leaving it connected.
    pub fn unready(&mut self, id: &ParticipantId) -> bool {
        let before = self.ready.len();
        self.ready.retain(|p| p != id);
        before != self.ready.len()
    }

    /// Pick an initiator if the ready set holds exactly two participants. First to become ready
    /// wins. Must be called right after a successful [Registry::set_ready].
    pub fn elect(&self) -> Option<Election> {
        match self.ready.as_slice() {
            [initiator, answerer] => Some(Election {
                initiator: *initiator,
                answerer: *answerer,
            }),
            _ => None,
        }
    }

    pub fn is_connected(&self, id: &ParticipantId) -> bool {
        self.connected.contains(id)
    }

    pub fn is_ready(&self, id: &ParticipantId) -> bool {
        self.ready.contains(id)
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_ready_becomes_initiator() {
        let mut registry = Registry::default();
        let a = registry.connect();
        let b = registry.connect();

        // b connected later but signals readiness first
        assert!(registry.set_ready(b));
        assert_eq!(registry.elect(), None);
        assert!(registry.set_ready(a));
        assert_eq!(
            registry.elect(),
            Some(Election {
                initiator: b,
                answerer: a
            })
        );
    }

    #[test]
    fn set_ready_is_idempotent() {
        let mut registry = Registry::default();
        let a = registry.connect();
        assert!(registry.set_ready(a));
        assert!(!registry.set_ready(a));
        assert_eq!(registry.ready_count(), 1);
    }

    #[test]
    fn unknown_participant_cannot_become_ready() {
        let mut registry = Registry::default();
        assert!(!registry.set_ready(ParticipantId::generate()));
        assert_eq!(registry.ready_count(), 0);
    }

    #[test]
    fn third_ready_participant_is_not_elected() {
        let mut registry = Registry::default();
        let ids: Vec<_> = (0..3).map(|_| registry.connect()).collect();
        for id in &ids[..2] {
            registry.set_ready(*id);
        }
        assert!(registry.elect().is_some());
        assert!(registry.set_ready(ids[2]));
        assert_eq!(registry.elect(), None);
        assert_eq!(registry.ready_count(), 3);
    }

    #[test]
    fn disconnect_removes_from_both_sets_once() {
        let mut registry = Registry::default();
        let a = registry.connect();
        let b = registry.connect();
        registry.set_ready(a);
        registry.set_ready(b);

        assert!(registry.disconnect(&a));
        assert!(!registry.is_connected(&a));
        assert!(!registry.is_ready(&a));
        assert_eq!(registry.connected_count(), 1);
        assert_eq!(registry.ready_count(), 1);

        assert!(!registry.disconnect(&a));
        assert_eq!(registry.connected_count(), 1);
        assert_eq!(registry.ready_count(), 1);
    }
}
