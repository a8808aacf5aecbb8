use evmapper::{
    config::{self, generate},
    context::Context,
    device::InputDevice,
};

pub fn configure(ctx: &Context, args: &crate::Configure) {
    let device = super::open_device(&args.device);

    let path = config::default_path(ctx, device.name());

    if path.exists() {
        eprintln!("error: {}: file exists, not overwriting", path.display());
        std::process::exit(1);
    }

    let capabilities = match device.capabilities() {
        Ok(capabilities) => capabilities,
        Err(e) => {
            eprintln!("error: {}: {e}", args.device.display());
            std::process::exit(1);
        }
    };

    let mapping = generate(capabilities, !args.no_actions);

    if let Err(e) = config::save(&path, &mapping) {
        eprintln!("error: {}: {e}", path.display());
        std::process::exit(1);
    }

    println!(
        "{}: wrote {} ({} buttons, {} axes, {} actions)",
        args.device.display(),
        path.display(),
        mapping.buttons.len(),
        mapping.axes.len(),
        mapping.actions.len()
    );
}
