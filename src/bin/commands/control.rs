use evmapper::{
    context::Context,
    control::{self, DeviceInfo},
};
use serde_json::json;
use std::time::Duration;

pub fn load(ctx: &Context, args: &crate::Load) {
    let mut request = json!({
        "command": "config",
        "device": args.device.to_string_lossy(),
    });

    if let Some(file) = &args.file {
        request["file"] = json!(file);
    }

    if let Err(e) = control::send_request(ctx, &request, None) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

pub fn devices(ctx: &Context, args: &crate::Devices) {
    let request = json!({ "command": "list" });

    let reply = match control::send_request(
        ctx,
        &request,
        Some(Duration::from_millis(args.timeout)),
    ) {
        Ok(Some(reply)) => reply,
        Ok(None) => return,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let devices: Vec<DeviceInfo> = match serde_json::from_value(reply) {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("error: malformed reply: {e}");
            std::process::exit(1);
        }
    };

    for device in devices {
        println!("{}: {}", device.path.display(), device.name);
    }
}
