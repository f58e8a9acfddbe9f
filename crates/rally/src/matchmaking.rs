//! FIFO matchmaking queue.
//!
//! Participants wait in arrival order. As soon as `match_size` of them are
//! waiting, the oldest `match_size` are taken out together and announced
//! in a `match` frame whose timestamp doubles as the match id.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use rally_protocol::{MatchNotice, ParticipantId};

#[derive(Debug)]
pub(crate) struct MatchmakingQueue {
    waiting: VecDeque<ParticipantId>,
    match_size: usize,
}

impl MatchmakingQueue {
    pub(crate) fn new(match_size: usize) -> Self {
        Self {
            waiting: VecDeque::new(),
            match_size,
        }
    }

    /// Enqueues `participant`. Returns the match it completed, if any.
    /// Joining twice keeps the original position.
    pub(crate) fn join(&mut self, participant: &ParticipantId) -> Option<MatchNotice> {
        if !self.waiting.contains(participant) {
            self.waiting.push_back(participant.clone());
            tracing::debug!(%participant, waiting = self.waiting.len(), "joined matchmaking");
        }
        if self.waiting.len() < self.match_size {
            return None;
        }

        let players: Vec<_> = self.waiting.drain(..self.match_size).collect();
        let notice = MatchNotice {
            players,
            timestamp: unix_millis().to_string(),
        };
        tracing::info!(
            match_id = %notice.timestamp,
            players = notice.players.len(),
            "match formed"
        );
        Some(notice)
    }

    /// Removes `participant` from the queue. Returns `false` if they were
    /// not waiting.
    pub(crate) fn leave(&mut self, participant: &ParticipantId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|p| p != participant);
        before != self.waiting.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiting.len()
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(id: &str) -> ParticipantId {
        ParticipantId::from(id)
    }

    #[test]
    fn test_join_pairs_in_arrival_order() {
        let mut queue = MatchmakingQueue::new(2);
        assert!(queue.join(&pid("a")).is_none());
        assert!(queue.join(&pid("b")).is_some());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_join_match_carries_players_and_numeric_timestamp() {
        let mut queue = MatchmakingQueue::new(2);
        queue.join(&pid("a"));
        let notice = queue.join(&pid("b")).expect("two waiting should match");

        assert_eq!(notice.players, [pid("a"), pid("b")]);
        assert!(notice.timestamp.parse::<u128>().unwrap() > 0);
        assert!(notice.includes(&pid("a")));
    }

    #[test]
    fn test_join_twice_keeps_single_entry() {
        let mut queue = MatchmakingQueue::new(3);
        queue.join(&pid("a"));
        queue.join(&pid("a"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_leave_removes_waiting_participant() {
        let mut queue = MatchmakingQueue::new(2);
        queue.join(&pid("a"));

        assert!(queue.leave(&pid("a")));
        assert!(!queue.leave(&pid("a")));
        assert!(queue.join(&pid("b")).is_none());
    }

    #[test]
    fn test_larger_match_size_leaves_overflow_waiting() {
        let mut queue = MatchmakingQueue::new(3);
        for id in ["a", "b"] {
            assert!(queue.join(&pid(id)).is_none());
        }
        let notice = queue.join(&pid("c")).unwrap();
        assert_eq!(notice.players.len(), 3);

        assert!(queue.join(&pid("d")).is_none());
        assert_eq!(queue.len(), 1);
    }
}
