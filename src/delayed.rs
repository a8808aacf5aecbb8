//! Hold actions waiting for their deadline.

use crate::config::Action;
use mio::Token;
use std::{
    rc::Rc,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Down,
    Up,
}

#[derive(Debug, Clone)]
pub struct DelayedAction {
    /// The device whose config the action belongs to
    pub owner: Token,
    pub action: Rc<Action>,
    pub deadline: Instant,
    pub phase: Phase,
}

impl DelayedAction {
    fn is(&self, owner: Token, id: usize) -> bool {
        self.owner == owner && self.action.id == id
    }
}

/// Delayed actions ordered by deadline. At most one entry exists per
/// device and action.
#[derive(Debug, Default)]
pub struct DelayedQueue {
    entries: Vec<DelayedAction>,
}

impl DelayedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DelayedAction> {
        self.entries.iter()
    }

    /// Add an entry, replacing any existing one for the same action
    pub fn schedule(&mut self, entry: DelayedAction) {
        self.cancel(entry.owner, entry.action.id);

        // entries with equal deadlines keep their scheduling order
        let index = self
            .entries
            .partition_point(|e| e.deadline <= entry.deadline);

        self.entries.insert(index, entry);
    }

    /// Remove the entry for an action, whatever its phase
    pub fn cancel(&mut self, owner: Token, id: usize) -> Option<DelayedAction> {
        let index = self.entries.iter().position(|e| e.is(owner, id))?;

        Some(self.entries.remove(index))
    }

    /// Remove the entry for an action only if it has not fired yet. A
    /// release owed by a fired hold stays queued.
    pub fn cancel_pending(&mut self, owner: Token, id: usize) -> Option<DelayedAction> {
        let index = self
            .entries
            .iter()
            .position(|e| e.is(owner, id) && e.phase == Phase::Down)?;

        Some(self.entries.remove(index))
    }

    /// Remove and return every entry belonging to `owner`
    pub fn take_owner(&mut self, owner: Token) -> Vec<DelayedAction> {
        let (taken, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.owner == owner);

        self.entries = kept;

        taken
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.first().map(|e| e.deadline)
    }

    /// How long the loop may wait; `None` means indefinitely
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Remove the earliest entry if its deadline has passed
    pub fn pop_due(&mut self, now: Instant) -> Option<DelayedAction> {
        if self.next_deadline()? <= now {
            Some(self.entries.remove(0))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Effect, Mode};
    use evdev::Key;

    fn action(id: usize) -> Rc<Action> {
        Rc::new(Action {
            id,
            trigger: Vec::new(),
            mode: Mode::Simultaneous,
            hold: true,
            effect: Effect::Key(vec![Key::KEY_A]),
        })
    }

    fn entry(owner: usize, id: usize, deadline: Instant) -> DelayedAction {
        DelayedAction {
            owner: Token(owner),
            action: action(id),
            deadline,
            phase: Phase::Down,
        }
    }

    #[test]
    fn ordered_by_deadline() {
        let now = Instant::now();
        let mut queue = DelayedQueue::new();

        queue.schedule(entry(3, 0, now + Duration::from_millis(30)));
        queue.schedule(entry(3, 1, now + Duration::from_millis(10)));
        queue.schedule(entry(4, 0, now + Duration::from_millis(20)));

        assert_eq!(queue.timeout(now), Some(Duration::from_millis(10)));
        assert!(queue.pop_due(now).is_none());

        let later = now + Duration::from_millis(25);

        let ids: Vec<(Token, usize)> = std::iter::from_fn(|| queue.pop_due(later))
            .map(|e| (e.owner, e.action.id))
            .collect();

        assert_eq!(ids, vec![(Token(3), 1), (Token(4), 0)]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.timeout(now + Duration::from_secs(1)), Some(Duration::ZERO));
    }

    #[test]
    fn empty_queue_waits_forever() {
        let queue = DelayedQueue::new();

        assert_eq!(queue.timeout(Instant::now()), None);
    }

    #[test]
    fn one_entry_per_action() {
        let now = Instant::now();
        let mut queue = DelayedQueue::new();

        queue.schedule(entry(3, 0, now));
        queue.schedule(entry(3, 0, now + Duration::from_millis(5)));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_millis(5)));
    }

    #[test]
    fn cancel() {
        let now = Instant::now();
        let mut queue = DelayedQueue::new();

        queue.schedule(entry(3, 0, now));
        queue.schedule(entry(4, 0, now));

        // same id, other device
        assert!(queue.cancel(Token(5), 0).is_none());
        assert!(queue.cancel(Token(3), 0).is_some());
        assert!(queue.cancel(Token(3), 0).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn cancel_pending_keeps_release() {
        let now = Instant::now();
        let mut queue = DelayedQueue::new();

        queue.schedule(DelayedAction {
            phase: Phase::Up,
            ..entry(3, 0, now)
        });
        queue.schedule(entry(3, 1, now));

        assert!(queue.cancel_pending(Token(3), 0).is_none());
        assert!(queue.cancel_pending(Token(3), 1).is_some());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().phase, Phase::Up);
    }

    #[test]
    fn take_owner() {
        let now = Instant::now();
        let mut queue = DelayedQueue::new();

        queue.schedule(entry(3, 0, now));
        queue.schedule(entry(4, 0, now));
        queue.schedule(entry(3, 1, now));

        let taken = queue.take_owner(Token(3));

        assert_eq!(taken.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().owner, Token(4));
    }
}
