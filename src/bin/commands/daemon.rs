use evmapper::{context::Context, multiplexer::Multiplexer};

pub fn daemon(mut ctx: Context, args: &crate::Daemon) {
    ctx.long_press = args.long_press;

    log::debug!(
        "config directory {}, control socket {}",
        ctx.config_dir.display(),
        ctx.socket_path.display()
    );

    let mut multiplexer = match Multiplexer::new(ctx) {
        Ok(multiplexer) => multiplexer,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = multiplexer.run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
