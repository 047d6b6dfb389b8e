//! Callgroup to worker bookkeeping
//!
//! A callgroup keeps all of its sessions on one worker. Its mapping lives
//! exactly as long as it has members; a fresh group goes to the least-loaded
//! worker.
//!
//! The book also threads hand-offs from each detach to the session's next
//! insertion, wherever that lands.

use indexmap::IndexSet;
use std::collections::HashMap;
use std::sync::Arc;

use super::handoff::{Handoff, Release};
use crate::error::{MediaError, Result};
use crate::types::SessionId;

/// Where a session runs and under which insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub callgroup: String,
    pub worker: usize,
    /// Distinguishes successive insertions of the same session id.
    pub epoch: u64,
}

#[derive(Debug)]
pub(crate) struct GroupBook {
    callgroup_workers: HashMap<String, usize>,
    callgroup_members: HashMap<String, IndexSet<SessionId>>,
    sessions: HashMap<SessionId, Assignment>,
    /// Latest detach of a session, until its next insertion picks it up
    handoffs: HashMap<SessionId, Arc<Handoff>>,
    /// Hand-off the current insertion of a session is still waiting on
    waiting: HashMap<SessionId, Arc<Handoff>>,
    loads: Vec<usize>,
    max_per_worker: Option<usize>,
    next_epoch: u64,
}

impl GroupBook {
    pub fn new(workers: usize, max_per_worker: Option<usize>) -> Self {
        Self {
            callgroup_workers: HashMap::new(),
            callgroup_members: HashMap::new(),
            sessions: HashMap::new(),
            handoffs: HashMap::new(),
            waiting: HashMap::new(),
            loads: vec![0; workers.max(1)],
            max_per_worker,
            next_epoch: 1,
        }
    }

    pub fn assign(&mut self, session_id: &SessionId, callgroup: &str) -> Result<Assignment> {
        if self.sessions.contains_key(session_id) {
            return Err(MediaError::SessionAlreadyScheduled {
                session_id: session_id.clone(),
            });
        }

        let worker = match self.callgroup_workers.get(callgroup) {
            Some(&worker) => worker,
            None => self.least_loaded(),
        };
        if let Some(max) = self.max_per_worker {
            if self.loads[worker] >= max {
                return Err(MediaError::CapacityExhausted { worker, max });
            }
        }

        let assignment = Assignment {
            callgroup: callgroup.to_string(),
            worker,
            epoch: self.next_epoch,
        };
        self.next_epoch += 1;

        self.callgroup_workers.insert(callgroup.to_string(), worker);
        self.callgroup_members
            .entry(callgroup.to_string())
            .or_default()
            .insert(session_id.clone());
        self.sessions.insert(session_id.clone(), assignment.clone());
        self.loads[worker] += 1;
        if let Some(handoff) = self.handoffs.remove(session_id) {
            if !handoff.is_complete() {
                self.waiting.insert(session_id.clone(), handoff);
            }
        }
        Ok(assignment)
    }

    /// Hand-off the session's current insertion has to wait for.
    pub fn waiting_on(&self, session_id: &SessionId) -> Option<Arc<Handoff>> {
        self.waiting.get(session_id).cloned()
    }

    /// Unassign and open a hand-off for the next insertion. The returned
    /// [`Release`] rides on the detach event posted to the old worker.
    pub fn detach(&mut self, session_id: &SessionId) -> Option<(Assignment, Release)> {
        if !self.sessions.contains_key(session_id) {
            return None;
        }
        let after = self.waiting.remove(session_id);
        let assignment = self.unassign(session_id)?;

        self.handoffs.retain(|_, handoff| !handoff.is_complete());
        let handoff = Handoff::new(after);
        self.handoffs.insert(session_id.clone(), handoff.clone());
        Some((assignment, Release::new(handoff)))
    }

    pub fn unassign(&mut self, session_id: &SessionId) -> Option<Assignment> {
        let assignment = self.sessions.remove(session_id)?;
        self.waiting.remove(session_id);
        self.loads[assignment.worker] = self.loads[assignment.worker].saturating_sub(1);

        let now_empty = match self.callgroup_members.get_mut(&assignment.callgroup) {
            Some(members) => {
                members.shift_remove(session_id);
                members.is_empty()
            }
            None => true,
        };
        if now_empty {
            self.callgroup_members.remove(&assignment.callgroup);
            self.callgroup_workers.remove(&assignment.callgroup);
        }
        Some(assignment)
    }

    /// Unassign only if the session is still under insertion `epoch`.
    pub fn forget(&mut self, session_id: &SessionId, epoch: u64) -> Option<Assignment> {
        match self.sessions.get(session_id) {
            Some(current) if current.epoch == epoch => self.unassign(session_id),
            _ => None,
        }
    }

    pub fn assignment(&self, session_id: &SessionId) -> Option<&Assignment> {
        self.sessions.get(session_id)
    }

    pub fn callgroup_worker(&self, callgroup: &str) -> Option<usize> {
        self.callgroup_workers.get(callgroup).copied()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn loads(&self) -> &[usize] {
        &self.loads
    }

    fn least_loaded(&self) -> usize {
        self.loads
            .iter()
            .enumerate()
            .min_by_key(|&(index, &load)| (load, index))
            .map(|(index, _)| index)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::from(s)
    }

    #[test]
    fn test_callgroup_affinity() {
        let mut book = GroupBook::new(4, None);
        let a = book.assign(&sid("a"), "room-1").unwrap();
        let b = book.assign(&sid("b"), "room-1").unwrap();
        let c = book.assign(&sid("c"), "room-2").unwrap();

        assert_eq!(a.worker, b.worker);
        assert_ne!(a.worker, c.worker);
        assert_eq!(book.loads()[a.worker], 2);
        assert_ne!(a.epoch, b.epoch);
    }

    #[test]
    fn test_new_groups_spread_to_least_loaded() {
        let mut book = GroupBook::new(3, None);
        let workers: Vec<_> = ["g0", "g1", "g2", "g3"]
            .iter()
            .enumerate()
            .map(|(i, g)| book.assign(&sid(&format!("s{i}")), g).unwrap().worker)
            .collect();
        assert_eq!(workers, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_last_member_erases_mapping() {
        let mut book = GroupBook::new(2, None);
        book.assign(&sid("a"), "room").unwrap();
        book.assign(&sid("b"), "room").unwrap();

        book.unassign(&sid("a"));
        assert_eq!(book.callgroup_worker("room"), Some(0));
        book.unassign(&sid("b"));
        assert_eq!(book.callgroup_worker("room"), None);
        assert_eq!(book.loads(), &[0, 0]);
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let mut book = GroupBook::new(2, None);
        book.assign(&sid("a"), "x").unwrap();
        assert!(matches!(
            book.assign(&sid("a"), "y"),
            Err(MediaError::SessionAlreadyScheduled { .. })
        ));
    }

    #[test]
    fn test_capacity_limit() {
        let mut book = GroupBook::new(1, Some(2));
        book.assign(&sid("a"), "g").unwrap();
        book.assign(&sid("b"), "h").unwrap();
        assert!(matches!(
            book.assign(&sid("c"), "g"),
            Err(MediaError::CapacityExhausted { worker: 0, max: 2 })
        ));
    }

    #[test]
    fn test_forget_requires_matching_epoch() {
        let mut book = GroupBook::new(1, None);
        let first = book.assign(&sid("a"), "g").unwrap();
        book.unassign(&sid("a"));
        let second = book.assign(&sid("a"), "g").unwrap();

        assert!(book.forget(&sid("a"), first.epoch).is_none());
        assert_eq!(book.session_count(), 1);
        assert!(book.forget(&sid("a"), second.epoch).is_some());
        assert_eq!(book.session_count(), 0);
    }

    #[test]
    fn test_reinsert_waits_on_detach() {
        let mut book = GroupBook::new(2, None);
        book.assign(&sid("a"), "tone").unwrap();
        assert!(book.waiting_on(&sid("a")).is_none());

        let (previous, release) = book.detach(&sid("a")).unwrap();
        assert_eq!(previous.callgroup, "tone");
        book.assign(&sid("a"), "room").unwrap();
        let handoff = book.waiting_on(&sid("a")).unwrap();
        assert!(!handoff.is_complete());

        drop(release);
        assert!(handoff.is_complete());
    }

    #[test]
    fn test_detach_while_waiting_chains_handoffs() {
        let mut book = GroupBook::new(3, None);
        book.assign(&sid("a"), "g0").unwrap();
        let (_, first) = book.detach(&sid("a")).unwrap();
        book.assign(&sid("a"), "g1").unwrap();
        let (_, second) = book.detach(&sid("a")).unwrap();
        book.assign(&sid("a"), "g2").unwrap();
        let handoff = book.waiting_on(&sid("a")).unwrap();

        drop(second);
        assert!(!handoff.is_complete());
        drop(first);
        assert!(handoff.is_complete());
    }

    #[test]
    fn test_completed_detach_does_not_block() {
        let mut book = GroupBook::new(1, None);
        book.assign(&sid("a"), "g").unwrap();
        let (_, release) = book.detach(&sid("a")).unwrap();
        drop(release);
        book.assign(&sid("a"), "g").unwrap();
        assert!(book.waiting_on(&sid("a")).is_none());
        assert!(book.detach(&sid("missing")).is_none());
    }
}
