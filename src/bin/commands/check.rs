use evmapper::config::{self, EventKind};

pub fn check(args: &crate::Check) {
    let config = match config::load(&args.file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let buttons = config
        .events()
        .filter(|e| e.kind == EventKind::Button)
        .count();
    let axes = config.events().count() - buttons;

    println!(
        "{}: {buttons} buttons, {axes} axes, {} actions{}",
        args.file.display(),
        config.actions().len(),
        if config.grab { ", grab" } else { "" }
    );

    for action in config.actions() {
        let trigger: Vec<String> = action
            .trigger
            .iter()
            .map(|event| config.describe(event))
            .collect();

        println!(
            "\t{action}: {:?} {}{}",
            action.mode,
            trigger.join(" "),
            if action.hold { " (hold)" } else { "" }
        );
    }
}
