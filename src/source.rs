//! Turn raw device events into action edges. Each input device gets one
//! `Source`, holding the device and the `Normalizer` running its `Config`.

use crate::{
    config::{self, Action, Config, ConfigError, EventKind, EventRef, Extreme, Mode, TriggerState},
    context::Context,
    device::{InputDevice, RawEvent},
};
use evdev::EventType;
use log::{debug, info, trace, warn};
use std::{
    io,
    os::unix::io::RawFd,
    path::{Path, PathBuf},
    rc::Rc,
};
use thiserror::Error;

/// Direction of an action's activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Down,
    Up,
}

/// A watched event crossing into or out of its active state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub event: EventRef,
    pub active: bool,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("device removed")]
    Removed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Edge detection and trigger matching for one device
#[derive(Debug)]
pub struct Normalizer {
    config: Config,
}

impl Normalizer {
    pub fn new(mut config: Config) -> Self {
        config.reset();

        Normalizer { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Swap in a new config wholesale. Partially matched triggers are dropped.
    pub fn replace(&mut self, mut config: Config) -> Config {
        config.reset();

        std::mem::replace(&mut self.config, config)
    }

    /// Immediate actions which went `Down` and are still owed their `Up`
    pub fn held(&self) -> Vec<Rc<Action>> {
        self.config
            .actions
            .iter()
            .zip(&self.config.states)
            .filter(|(action, state)| !action.hold && state.is_down(action.mode))
            .map(|(action, _)| action.clone())
            .collect()
    }

    /// Translate one raw value into an edge of a watched event, if it makes one
    pub fn normalize(&mut self, code: u16, value: i32) -> Option<Transition> {
        let spec = self.config.events.get_mut(&code)?;
        let previous = spec.previous;

        match spec.kind {
            EventKind::Button => {
                // autorepeat
                if value == 2 {
                    return None;
                }

                spec.previous = value;

                let pressed = value != 0;

                if pressed == (previous != 0) {
                    return None;
                }

                Some(Transition {
                    event: EventRef {
                        code,
                        extreme: None,
                    },
                    active: pressed,
                })
            }
            EventKind::Axis { min, max } => {
                spec.previous = value;

                let (extreme, active) = if previous > min && value <= min {
                    (Extreme::Min, true)
                } else if previous <= min && value > min {
                    (Extreme::Min, false)
                } else if previous < max && value >= max {
                    (Extreme::Max, true)
                } else if previous >= max && value < max {
                    (Extreme::Max, false)
                } else {
                    return None;
                };

                Some(Transition {
                    event: EventRef {
                        code,
                        extreme: Some(extreme),
                    },
                    active,
                })
            }
        }
    }

    /// Feed a batch of raw events and collect the resulting action edges, in
    /// the order the events were read
    pub fn process(&mut self, events: &[RawEvent]) -> Vec<(Rc<Action>, Edge)> {
        let mut pending = Vec::new();

        for event in events {
            if event.event_type != EventType::KEY && event.event_type != EventType::ABSOLUTE {
                continue;
            }

            let Some(transition) = self.normalize(event.code, event.value) else {
                continue;
            };

            trace!(
                "{} {}",
                self.config.describe(&transition.event),
                if transition.active {
                    "active"
                } else {
                    "inactive"
                }
            );

            self.matches(transition, &mut pending);
        }

        pending
    }

    fn matches(&mut self, transition: Transition, pending: &mut Vec<(Rc<Action>, Edge)>) {
        let Some(ids) = self.config.dispatch.get(&transition.event.code) else {
            return;
        };

        for id in ids {
            let action = &self.config.actions[*id];
            let state = &mut self.config.states[*id];

            let edge = match action.mode {
                Mode::Simultaneous => state.simultaneous(&action.trigger, transition),
                Mode::Any => state.any(&action.trigger, transition),
                Mode::Sequence => state.sequence(&action.trigger, transition),
            };

            if let Some(edge) = edge {
                pending.push((action.clone(), edge));
            }
        }
    }
}

impl TriggerState {
    fn simultaneous(&mut self, trigger: &[EventRef], transition: Transition) -> Option<Edge> {
        let index = trigger.iter().position(|e| *e == transition.event)?;

        let was_complete = self.active.iter().all(|active| *active);

        self.active[index] = transition.active;

        if transition.active {
            if !was_complete && !self.latched && self.active.iter().all(|active| *active) {
                self.fired = true;

                return Some(Edge::Down);
            }

            None
        } else {
            let mut edge = None;

            if self.fired {
                self.fired = false;
                self.latched = true;
                edge = Some(Edge::Up);
            }

            if self.active.iter().all(|active| !active) {
                self.latched = false;
            }

            edge
        }
    }

    fn any(&mut self, trigger: &[EventRef], transition: Transition) -> Option<Edge> {
        let index = trigger.iter().position(|e| *e == transition.event)?;

        let before = self.active.iter().any(|active| *active);

        self.active[index] = transition.active;

        match (before, self.active.iter().any(|active| *active)) {
            (false, true) => Some(Edge::Down),
            (true, false) => Some(Edge::Up),
            _ => None,
        }
    }

    fn sequence(&mut self, trigger: &[EventRef], transition: Transition) -> Option<Edge> {
        // other extremes of the same axis are not steps
        if !trigger.contains(&transition.event) {
            return None;
        }

        let last = trigger.len() - 1;

        if self.satisfied {
            if !transition.active && trigger[last] == transition.event {
                self.restart(0);

                return Some(Edge::Up);
            }

            return None;
        }

        // releases between the steps of a sequence do not matter
        if !transition.active {
            return None;
        }

        if trigger[self.position] == transition.event {
            self.active[self.position] = true;
            self.position += 1;

            if self.position > last {
                self.satisfied = true;

                return Some(Edge::Down);
            }
        } else if trigger[0] == transition.event {
            self.restart(1);
        } else {
            self.restart(0);
        }

        None
    }

    /// Whether the last edge emitted was `Down`
    fn is_down(&self, mode: Mode) -> bool {
        match mode {
            Mode::Simultaneous => self.fired,
            Mode::Any => self.active.iter().any(|active| *active),
            Mode::Sequence => self.satisfied,
        }
    }

    /// Start matching a sequence over, with the first `position` steps done
    fn restart(&mut self, position: usize) {
        self.active.fill(false);
        self.active[..position].fill(true);
        self.position = position;
        self.satisfied = false;
    }
}

/// An input device together with the mapping it runs
pub struct Source {
    device: Box<dyn InputDevice>,
    normalizer: Normalizer,
    grabbed: bool,
}

impl Source {
    /// Start handling a device using its default mapping file
    pub fn open(ctx: &Context, device: Box<dyn InputDevice>) -> Result<Self, ConfigError> {
        let path = config::default_path(ctx, device.name());
        let config = config::load(&path)?;

        info!("{}: loaded {}", device.path().display(), path.display());

        Ok(Source::with_config(device, config))
    }

    pub fn with_config(device: Box<dyn InputDevice>, config: Config) -> Self {
        let grab = config.grab;

        let mut source = Source {
            device,
            normalizer: Normalizer::new(config),
            grabbed: false,
        };

        source.set_grab(grab);

        source
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn path(&self) -> &Path {
        self.device.path()
    }

    pub fn raw_fd(&self) -> RawFd {
        self.device.raw_fd()
    }

    pub fn config(&self) -> &Config {
        self.normalizer.config()
    }

    pub fn held(&self) -> Vec<Rc<Action>> {
        self.normalizer.held()
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    /// Replace the mapping with the one from `file`, or the device default.
    /// On error the current mapping stays in place.
    pub fn load_config(&mut self, ctx: &Context, file: Option<&str>) -> Result<PathBuf, ConfigError> {
        let path = config::config_path(ctx, self.name(), file);
        let config = config::load(&path)?;

        info!("{}: loaded {}", self.path().display(), path.display());

        self.replace_config(config);

        Ok(path)
    }

    pub fn replace_config(&mut self, config: Config) {
        let grab = config.grab;

        self.normalizer.replace(config);

        self.set_grab(grab);
    }

    fn set_grab(&mut self, grab: bool) {
        if grab == self.grabbed {
            return;
        }

        let res = if grab {
            self.device.grab()
        } else {
            self.device.ungrab()
        };

        match res {
            Ok(()) => {
                self.grabbed = grab;
                info!(
                    "{}: device {}",
                    self.path().display(),
                    if grab { "grabbed" } else { "ungrabbed" }
                );
            }
            Err(e) => warn!(
                "{}: failed to {} device: {e}",
                self.path().display(),
                if grab { "grab" } else { "ungrab" }
            ),
        }
    }

    /// Read everything the device has pending and translate it
    pub fn process(&mut self) -> Result<Vec<(Rc<Action>, Edge)>, SourceError> {
        let events = match self.device.read() {
            Ok(events) => events,
            Err(e) if e.raw_os_error() == Some(libc::ENODEV) => return Err(SourceError::Removed),
            Err(e) => return Err(SourceError::Io(e)),
        };

        for event in &events {
            debug!(
                "{}: type {:?} code {} value {}",
                self.path().display(),
                event.event_type,
                event.code,
                event.value
            );
        }

        Ok(self.normalizer.process(&events))
    }

    /// Give up exclusive access, if we have it
    pub fn release(&mut self) {
        if self.grabbed {
            if let Err(e) = self.device.ungrab() {
                debug!("{}: ungrab: {e}", self.path().display());
            }
            self.grabbed = false;
        }
    }
}
