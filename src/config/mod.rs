//! Per-device mapping files and the compiled form the event normalizer runs on.

use evdev::Key;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, rc::Rc};

mod compile;
mod generate;
mod load;


pub use compile::{compile, ValidationError};
pub use generate::{generate, Capabilities};
pub use load::{config_path, default_path, load, parse, read, save, ConfigError};

/// A mapping file as written on disk
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mapping {
    #[serde(default)]
    pub grab: bool,
    #[serde(default)]
    pub buttons: Vec<ButtonDef>,
    #[serde(default)]
    pub axes: Vec<AxisDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ButtonDef {
    pub name: String,
    pub code: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisDef {
    pub name: String,
    pub code: u16,
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionDef {
    pub trigger: OneOrMany<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub hold: bool,
    #[serde(rename = "type")]
    pub kind: Kind,
    pub target: OneOrMany<String>,
}

/// Fields which accept either a single value or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(value) => std::slice::from_ref(value),
            OneOrMany::Many(values) => values,
        }
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(value: T) -> Self {
        OneOrMany::One(value)
    }
}

/// How the elements of a trigger combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Every element must be active at the same time
    #[default]
    #[serde(rename = "all", alias = "simultaneous")]
    Simultaneous,
    /// Any one active element is enough
    #[serde(rename = "any")]
    Any,
    /// Elements must become active one after the other, in order
    #[serde(rename = "sequence")]
    Sequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Key,
    Exec,
}

/// One end of an absolute axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extreme {
    Min,
    Max,
}

impl fmt::Display for Extreme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Extreme::Min => write!(f, "min"),
            Extreme::Max => write!(f, "max"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Button,
    Axis { min: i32, max: i32 },
}

/// A watched hardware event. `previous` is the last raw value seen, which
/// edge detection compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    pub name: String,
    pub code: u16,
    pub kind: EventKind,
    pub previous: i32,
}

impl EventSpec {
    pub fn button(name: &str, code: u16) -> Self {
        EventSpec {
            name: name.to_owned(),
            code,
            kind: EventKind::Button,
            previous: 0,
        }
    }

    pub fn axis(name: &str, code: u16, min: i32, max: i32) -> Self {
        let mut spec = EventSpec {
            name: name.to_owned(),
            code,
            kind: EventKind::Axis { min, max },
            previous: 0,
        };

        spec.previous = spec.idle();

        spec
    }

    /// The resting value: released for buttons, the midpoint for axes
    pub fn idle(&self) -> i32 {
        match self.kind {
            EventKind::Button => 0,
            EventKind::Axis { min, max } => (i64::from(min) + i64::from(max)).div_euclid(2) as i32,
        }
    }
}

/// Reference to a watched event, with the axis extreme for axes. Resolved to
/// a code when the mapping is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventRef {
    pub code: u16,
    pub extreme: Option<Extreme>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Key(Vec<Key>),
    Exec(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Position in the mapping file. Only meaningful within one `Config`
    pub id: usize,
    pub trigger: Vec<EventRef>,
    pub mode: Mode,
    pub hold: bool,
    pub effect: Effect,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.effect {
            Effect::Key(keys) => write!(
                f,
                "action {} (key {})",
                self.id,
                keys.iter().map(|key| format!("{key:?}")).join(" ")
            ),
            Effect::Exec(commands) => {
                write!(f, "action {} (exec {})", self.id, commands.join("; "))
            }
        }
    }
}

/// Per-action matching progress. Reset whenever a `Config` is (re)loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerState {
    /// One flag per trigger element
    pub active: Vec<bool>,
    /// Next expected element of a sequence
    pub position: usize,
    /// A sequence has completed and waits for its final element to release
    pub satisfied: bool,
    /// `Down` was emitted and `Up` is still owed
    pub fired: bool,
    /// A chord released part way; it must be fully released before it can fire again
    pub latched: bool,
}

impl TriggerState {
    fn new(len: usize) -> Self {
        TriggerState {
            active: vec![false; len],
            ..Default::default()
        }
    }
}

/// Compiled mapping for one device
#[derive(Debug, Clone)]
pub struct Config {
    pub grab: bool,
    pub(crate) events: HashMap<u16, EventSpec>,
    pub(crate) actions: Vec<Rc<Action>>,
    pub(crate) states: Vec<TriggerState>,
    pub(crate) dispatch: HashMap<u16, Vec<usize>>,
}

impl Config {
    pub fn event(&self, code: u16) -> Option<&EventSpec> {
        self.events.get(&code)
    }

    pub fn event_by_name(&self, name: &str) -> Option<&EventSpec> {
        self.events.values().find(|spec| spec.name == name)
    }

    /// Watched events, ordered by code
    pub fn events(&self) -> impl Iterator<Item = &EventSpec> {
        self.events.values().sorted_by_key(|spec| spec.code)
    }

    /// Actions in definition order; the index is the action id
    pub fn actions(&self) -> &[Rc<Action>] {
        &self.actions
    }

    pub fn state(&self, id: usize) -> Option<&TriggerState> {
        self.states.get(id)
    }

    /// Every action referencing `code`, in definition order
    pub fn dispatch(&self, code: u16) -> impl Iterator<Item = &Rc<Action>> {
        self.dispatch
            .get(&code)
            .into_iter()
            .flatten()
            .map(|id| &self.actions[*id])
    }

    /// Actions whose trigger contains exactly `event`, in definition order
    pub fn triggered_by(&self, event: &EventRef) -> Vec<&Rc<Action>> {
        self.dispatch(event.code)
            .filter(|action| action.trigger.contains(event))
            .collect()
    }

    /// Human readable name of an event reference, like `ABS_X:min`
    pub fn describe(&self, event: &EventRef) -> String {
        let name = self
            .events
            .get(&event.code)
            .map(|spec| spec.name.as_str())
            .unwrap_or("?");

        match event.extreme {
            Some(extreme) => format!("{name}:{extreme}"),
            None => name.to_owned(),
        }
    }

    /// Put all transient state back to idle: axis midpoints, released buttons,
    /// no partially matched triggers
    pub fn reset(&mut self) {
        for spec in self.events.values_mut() {
            spec.previous = spec.idle();
        }

        for (state, action) in self.states.iter_mut().zip(&self.actions) {
            *state = TriggerState::new(action.trigger.len());
        }
    }
}
