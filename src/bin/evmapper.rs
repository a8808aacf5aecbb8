use clap::{ArgAction, Args, Parser, Subcommand};
use log::{Level, LevelFilter, Metadata, Record};
use std::{path::PathBuf, time::Duration};

mod commands;

#[derive(Parser)]
#[command(
    name = "evmapper",
    version = env!("CARGO_PKG_VERSION"),
    about = "Map input device buttons and axes to keys and commands",
    subcommand_required = true
)]
struct App {
    /// Increase message verbosity
    #[arg(long, short, action = ArgAction::Count, global = true, conflicts_with = "quiet")]
    verbose: u8,

    /// Silence all warnings
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Directory holding the device mapping files
    #[arg(long = "config-dir", global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Path of the daemon control socket
    #[arg(long = "socket", global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle all input devices which have a mapping
    Daemon(Daemon),
    /// List input devices
    List,
    /// Write a starting mapping for a device
    Configure(Configure),
    /// Check a mapping file
    Check(Check),
    /// Make the daemon reload the mapping of a device
    Load(Load),
    /// List the devices handled by the daemon
    Devices(Devices),
}

#[derive(Args)]
struct Daemon {
    /// How long a hold action must be held before it fires
    #[arg(long = "long-press", value_name = "DURATION", default_value = "1s", value_parser = humantime::parse_duration)]
    long_press: Duration,
}

#[derive(Args)]
struct Configure {
    /// Input device, e.g. /dev/input/event3
    #[arg(name = "DEVICE")]
    device: PathBuf,

    /// Do not generate an echo action for every button and axis
    #[arg(long = "no-actions")]
    no_actions: bool,
}

#[derive(Args)]
struct Check {
    /// Mapping file to check
    #[arg(name = "FILE")]
    file: PathBuf,
}

#[derive(Args)]
struct Load {
    /// Input device handled by the daemon
    #[arg(name = "DEVICE")]
    device: PathBuf,

    /// Mapping file name in the config directory; the device default if absent
    #[arg(name = "FILE")]
    file: Option<String>,
}

#[derive(Args)]
struct Devices {
    /// How long to wait for the daemon to reply, in milliseconds
    #[arg(long, short, value_name = "MS", default_value_t = 1000)]
    timeout: u64,
}

fn main() {
    let args = App::parse();

    if let Err(e) = log::set_logger(&CLI_LOGGER) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    let level = if args.quiet {
        LevelFilter::Error
    } else {
        match args.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    log::set_max_level(level);

    let ctx = commands::context(&args);

    match &args.command {
        Commands::Daemon(daemon) => commands::daemon::daemon(ctx, daemon),
        Commands::List => commands::list::list(),
        Commands::Configure(configure) => commands::configure::configure(&ctx, configure),
        Commands::Check(check) => commands::check::check(check),
        Commands::Load(load) => commands::control::load(&ctx, load),
        Commands::Devices(devices) => commands::control::devices(&ctx, devices),
    }
}

static CLI_LOGGER: CliLogger = CliLogger;

struct CliLogger;

impl log::Log for CliLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!(
                "{}: {}",
                match record.level() {
                    Level::Trace => "trace",
                    Level::Debug => "debug",
                    Level::Info => "info",
                    Level::Warn => "warn",
                    Level::Error => "error",
                },
                record.args()
            );
        }
    }

    fn flush(&self) {}
}
