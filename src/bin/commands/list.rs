use evmapper::device::{self, EvdevDevice, InputDevice};

pub fn list() {
    let paths = match device::list_devices() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("error: {}: {e}", device::INPUT_DIR);
            std::process::exit(1);
        }
    };

    for path in paths {
        match EvdevDevice::open(&path) {
            Ok(dev) => println!("{}: {}", path.display(), dev.name()),
            Err(e) => log::debug!("{}: {e}", path.display()),
        }
    }
}
