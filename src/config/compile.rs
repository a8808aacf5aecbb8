use super::{
    Action, ActionDef, Config, Effect, EventKind, EventRef, EventSpec, Extreme, Kind, Mapping,
    Mode, TriggerState,
};
use evdev::Key;
use std::{collections::HashMap, rc::Rc, str::FromStr};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0}")]
    Schema(String),
    #[error("duplicate event name '{0}'")]
    DuplicateName(String),
    #[error("duplicate event code {0}")]
    DuplicateCode(u16),
    #[error("axis '{name}': min {min} must be less than max {max}")]
    InvalidRange { name: String, min: i32, max: i32 },
    #[error("action {action}: 'hold' cannot be set for sequences")]
    SequenceHold { action: usize },
    #[error("action {action}: trigger is empty")]
    EmptyTrigger { action: usize },
    #[error("action {action}: a sequence needs at least two events")]
    ShortSequence { action: usize },
    #[error("action {action}: unknown event '{trigger}'")]
    UnknownEvent { action: usize, trigger: String },
    #[error("action {action}: invalid suffix in '{trigger}'")]
    InvalidSuffix { action: usize, trigger: String },
    #[error("action {action}: duplicate trigger event '{trigger}'")]
    DuplicateTrigger { action: usize, trigger: String },
    #[error("action {action}: target is empty")]
    EmptyTarget { action: usize },
    #[error("action {action}: unknown key '{key}'")]
    UnknownKey { action: usize, key: String },
    #[error("action {action}: duplicate target '{target}'")]
    DuplicateTarget { action: usize, target: String },
}

/// Turn a mapping into a `Config`. Action ids follow definition order,
/// starting at 0.
pub fn compile(mapping: &Mapping) -> Result<Config, ValidationError> {
    let mut events = HashMap::new();
    let mut names = HashMap::new();

    let specs = mapping
        .buttons
        .iter()
        .map(|button| EventSpec::button(&button.name, button.code))
        .chain(mapping.axes.iter().map(|axis| {
            EventSpec::axis(&axis.name, axis.code, axis.min, axis.max)
        }));

    for spec in specs {
        if let EventKind::Axis { min, max } = spec.kind {
            if min >= max {
                return Err(ValidationError::InvalidRange {
                    name: spec.name,
                    min,
                    max,
                });
            }
        }

        if names.contains_key(&spec.name) {
            return Err(ValidationError::DuplicateName(spec.name));
        }

        if events.contains_key(&spec.code) {
            return Err(ValidationError::DuplicateCode(spec.code));
        }

        names.insert(spec.name.clone(), spec.code);
        events.insert(spec.code, spec);
    }

    let mut dispatch: HashMap<u16, Vec<usize>> =
        events.keys().map(|code| (*code, Vec::new())).collect();
    let mut actions = Vec::with_capacity(mapping.actions.len());
    let mut states = Vec::with_capacity(mapping.actions.len());

    for (id, def) in mapping.actions.iter().enumerate() {
        let action = compile_action(id, def, &events, &names)?;

        for event in &action.trigger {
            let list = dispatch.entry(event.code).or_default();

            if !list.contains(&id) {
                list.push(id);
            }
        }

        states.push(TriggerState::new(action.trigger.len()));
        actions.push(Rc::new(action));
    }

    Ok(Config {
        grab: mapping.grab,
        events,
        actions,
        states,
        dispatch,
    })
}

fn compile_action(
    id: usize,
    def: &ActionDef,
    events: &HashMap<u16, EventSpec>,
    names: &HashMap<String, u16>,
) -> Result<Action, ValidationError> {
    if def.mode == Mode::Sequence && def.hold {
        return Err(ValidationError::SequenceHold { action: id });
    }

    let triggers = def.trigger.as_slice();

    if triggers.is_empty() {
        return Err(ValidationError::EmptyTrigger { action: id });
    }

    if def.mode == Mode::Sequence && triggers.len() < 2 {
        return Err(ValidationError::ShortSequence { action: id });
    }

    let mut trigger = Vec::with_capacity(triggers.len());

    for text in triggers {
        let event = resolve(id, text, events, names)?;

        // sequences may repeat an event, like a double tap
        if def.mode != Mode::Sequence && trigger.contains(&event) {
            return Err(ValidationError::DuplicateTrigger {
                action: id,
                trigger: text.to_owned(),
            });
        }

        trigger.push(event);
    }

    let targets = def.target.as_slice();

    if targets.is_empty() {
        return Err(ValidationError::EmptyTarget { action: id });
    }

    for (i, target) in targets.iter().enumerate() {
        if targets[..i].contains(target) {
            return Err(ValidationError::DuplicateTarget {
                action: id,
                target: target.to_owned(),
            });
        }
    }

    let effect = match def.kind {
        Kind::Key => Effect::Key(
            targets
                .iter()
                .map(|name| {
                    Key::from_str(name).map_err(|_| ValidationError::UnknownKey {
                        action: id,
                        key: name.to_owned(),
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
        Kind::Exec => Effect::Exec(targets.to_vec()),
    };

    Ok(Action {
        id,
        trigger,
        mode: def.mode,
        hold: def.hold,
        effect,
    })
}

/// Resolve `NAME` for buttons or `NAME:min` / `NAME:max` for axes
fn resolve(
    id: usize,
    text: &str,
    events: &HashMap<u16, EventSpec>,
    names: &HashMap<String, u16>,
) -> Result<EventRef, ValidationError> {
    let (name, suffix) = match text.split_once(':') {
        Some((name, suffix)) => (name, Some(suffix)),
        None => (text, None),
    };

    let Some(code) = names.get(name) else {
        return Err(ValidationError::UnknownEvent {
            action: id,
            trigger: text.to_owned(),
        });
    };

    let extreme = match (events[code].kind, suffix) {
        (EventKind::Button, None) => None,
        (EventKind::Axis { .. }, Some("min")) => Some(Extreme::Min),
        (EventKind::Axis { .. }, Some("max")) => Some(Extreme::Max),
        _ => {
            return Err(ValidationError::InvalidSuffix {
                action: id,
                trigger: text.to_owned(),
            })
        }
    };

    Ok(EventRef {
        code: *code,
        extreme,
    })
}
