use super::{ActionDef, AxisDef, ButtonDef, Kind, Mapping, Mode, OneOrMany};

/// Buttons and absolute axes reported by a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub buttons: Vec<ButtonDef>,
    pub axes: Vec<AxisDef>,
}

/// Build a starting mapping for a device. With `with_actions`, every button
/// and every axis extreme gets an `echo` action naming it, which makes it easy
/// to see what a device sends before writing a real mapping.
pub fn generate(capabilities: Capabilities, with_actions: bool) -> Mapping {
    let buttons = capabilities.buttons;

    // axes without a usable range cannot have edges
    let axes: Vec<AxisDef> = capabilities
        .axes
        .into_iter()
        .filter(|axis| axis.min < axis.max)
        .collect();

    let mut actions = Vec::new();

    if with_actions {
        for button in &buttons {
            actions.push(echo(button.name.clone(), format!("echo {}", button.name)));
        }

        for axis in &axes {
            for limit in ["min", "max"] {
                actions.push(echo(
                    format!("{}:{limit}", axis.name),
                    format!("echo {} {limit}", axis.name),
                ));
            }
        }
    }

    Mapping {
        grab: false,
        buttons,
        axes,
        actions,
    }
}

fn echo(trigger: String, command: String) -> ActionDef {
    ActionDef {
        trigger: OneOrMany::One(trigger),
        mode: Mode::Simultaneous,
        hold: false,
        kind: Kind::Exec,
        target: OneOrMany::One(command),
    }
}
