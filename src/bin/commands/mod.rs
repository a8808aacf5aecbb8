use evmapper::{context::Context, device::EvdevDevice};
use std::path::Path;

pub mod check;
pub mod configure;
pub mod control;
pub mod daemon;
pub mod list;

/// The application context with the paths given on the command line
pub fn context(args: &crate::App) -> Context {
    let mut ctx = Context::new();

    if let Some(dir) = &args.config_dir {
        ctx.config_dir = dir.clone();
    }

    if let Some(socket) = &args.socket {
        ctx.socket_path = socket.clone();
    }

    ctx
}

fn open_device(path: &Path) -> EvdevDevice {
    match EvdevDevice::open(path) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("error: {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}
