use crate::registry::Election;
use crate::signal::ParticipantId;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closed,
}

/// Pairing of exactly two participants. Negotiation messages are routed only between members of
/// the same session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub initiator: ParticipantId,
    pub answerer: ParticipantId,
    pub state: SessionState,
}

impl Session {
    /// Returns the other member of this session, or `None` if `id` is not a member.
    pub fn peer_of(&self, id: &ParticipantId) -> Option<ParticipantId> {
        if *id == self.initiator {
            Some(self.answerer)
        } else if *id == self.answerer {
            Some(self.initiator)
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

/// Table of active sessions indexed by their members.
#[derive(Debug, Default)]
pub struct Sessions {
    next_id: u64,
    active: HashMap<SessionId, Session>,
    members: HashMap<ParticipantId, SessionId>,
}

impl Sessions {
    pub fn open(&mut self, election: Election) -> &Session {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        self.members.insert(election.initiator, id);
        self.members.insert(election.answerer, id);
        self.active.entry(id).or_insert(Session {
            id,
            initiator: election.initiator,
            answerer: election.answerer,
            state: SessionState::Active,
        })
    }

    pub fn of(&self, participant: &ParticipantId) -> Option<&Session> {
        let id = self.members.get(participant)?;
        self.active.get(id)
    }

    /// Close the session `participant` belongs to, releasing both members. Returns the closed
    /// session.
    pub fn close(&mut self, participant: &ParticipantId) -> Option<Session> {
        let id = self.members.remove(participant)?;
        let mut session = self.active.remove(&id)?;
        if let Some(peer) = session.peer_of(participant) {
            self.members.remove(&peer);
        }
        session.state = SessionState::Closed;
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn election() -> Election {
        Election {
            initiator: ParticipantId::generate(),
            answerer: ParticipantId::generate(),
        }
    }

    #[test]
    fn members_route_to_each_other() {
        let mut sessions = Sessions::default();
        let e = election();
        let session = sessions.open(e);
        assert_eq!(session.peer_of(&e.initiator), Some(e.answerer));
        assert_eq!(session.peer_of(&e.answerer), Some(e.initiator));
        assert_eq!(session.peer_of(&ParticipantId::generate()), None);
    }

    #[test]
    fn closing_releases_both_members() {
        let mut sessions = Sessions::default();
        let e = election();
        sessions.open(e);

        let closed = sessions.close(&e.answerer).unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        assert!(sessions.of(&e.initiator).is_none());
        assert!(sessions.of(&e.answerer).is_none());
        assert!(sessions.is_empty());
        assert!(sessions.close(&e.initiator).is_none());
    }
}
