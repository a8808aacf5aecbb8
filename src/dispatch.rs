//! Carry out action edges, immediately or after the long press threshold.

use crate::{
    config::{Action, Effect},
    context::Context,
    delayed::{DelayedAction, DelayedQueue, Phase},
    output::Output,
    source::Edge,
};
use log::{debug, warn};
use mio::Token;
use std::{
    io,
    rc::Rc,
    time::{Duration, Instant},
};

pub struct Dispatcher<O> {
    output: O,
    delayed: DelayedQueue,
    long_press: Duration,
    release_settle: Duration,
}

impl<O: Output> Dispatcher<O> {
    pub fn new(ctx: &Context, output: O) -> Self {
        Dispatcher {
            output,
            delayed: DelayedQueue::new(),
            long_press: ctx.long_press,
            release_settle: ctx.release_settle,
        }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn delayed(&self) -> &DelayedQueue {
        &self.delayed
    }

    /// Handle the edges produced by the device `owner`
    pub fn perform(&mut self, owner: Token, actions: Vec<(Rc<Action>, Edge)>, now: Instant) {
        for (action, edge) in actions {
            debug!("{action}: {edge:?}");

            if action.hold {
                match edge {
                    Edge::Down => {
                        // pressed again before the last long press released its keys
                        if let Some(entry) = self.delayed.cancel(owner, action.id) {
                            self.release(&entry);
                        }

                        self.delayed.schedule(DelayedAction {
                            owner,
                            action,
                            deadline: now + self.long_press,
                            phase: Phase::Down,
                        });
                    }
                    Edge::Up => {
                        if self.delayed.cancel_pending(owner, action.id).is_some() {
                            debug!("{action}: released before long press");
                        }
                    }
                }
            } else {
                let res = match (&action.effect, edge) {
                    (Effect::Key(keys), Edge::Down) => self.keys(keys, true),
                    (Effect::Key(keys), Edge::Up) => self.keys(keys, false),
                    (Effect::Exec(commands), Edge::Down) => self.output.exec(commands),
                    (Effect::Exec(_), Edge::Up) => Ok(()),
                };

                if let Err(e) = res {
                    warn!("{action}: {e}");
                }
            }
        }
    }

    /// Run the earliest delayed action if it is due. Returns whether one ran.
    pub fn perform_delayed(&mut self, now: Instant) -> bool {
        let Some(entry) = self.delayed.pop_due(now) else {
            return false;
        };

        debug!("{}: long press {:?}", entry.action, entry.phase);

        let res = match (&entry.action.effect, entry.phase) {
            (Effect::Key(keys), Phase::Down) => {
                let res = self.keys(keys, true);

                self.delayed.schedule(DelayedAction {
                    deadline: now + self.release_settle,
                    phase: Phase::Up,
                    ..entry.clone()
                });

                res
            }
            (Effect::Key(keys), Phase::Up) => self.keys(keys, false),
            (Effect::Exec(commands), _) => self.output.exec(commands),
        };

        if let Err(e) = res {
            warn!("{}: {e}", entry.action);
        }

        true
    }

    /// How long until the next delayed action is due
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        self.delayed.timeout(now)
    }

    /// Drop everything pending for a device whose config went away. Keys
    /// that were already pressed are released, both those of fired long
    /// presses and those of the `held` actions still waiting for their `Up`.
    pub fn forget(&mut self, owner: Token, held: &[Rc<Action>]) {
        for entry in self.delayed.take_owner(owner) {
            self.release(&entry);
        }

        for action in held {
            if let Effect::Key(keys) = &action.effect {
                debug!("{action}: released on forget");

                if let Err(e) = self.keys(keys, false) {
                    warn!("{action}: {e}");
                }
            }
        }
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.output.flush() {
            warn!("failed to write key events: {e}");
        }
    }

    /// Release the keys of a long press which already fired
    fn release(&mut self, entry: &DelayedAction) {
        if let (Effect::Key(keys), Phase::Up) = (&entry.action.effect, entry.phase) {
            if let Err(e) = self.keys(keys, false) {
                warn!("{}: {e}", entry.action);
            }
        }
    }

    fn keys(&mut self, keys: &[evdev::Key], pressed: bool) -> io::Result<()> {
        for key in keys {
            self.output.key(*key, pressed)?;
        }

        Ok(())
    }
}
