//! The daemon main loop: wait for input devices, control requests, signals
//! and hold deadlines, all on one thread.

use crate::{
    context::Context,
    control::{ControlSocket, ControlTarget, DeviceInfo},
    device::{Discovery, EvdevDiscovery},
    dispatch::Dispatcher,
    output::{Output, SystemOutput},
    source::{Source, SourceError},
};
use itertools::Itertools;
use log::{debug, error, info, warn};
use mio::{net::UnixStream, unix::SourceFd, Events, Interest, Poll, Registry, Token};
use signal_hook::{
    consts::{SIGHUP, SIGINT, SIGTERM},
    SigId,
};
use std::{
    collections::HashMap,
    io::{self, Read},
    os::unix::net,
    path::Path,
    time::Instant,
};

pub const CONTROL: Token = Token(0);
pub const RESCAN: Token = Token(1);
pub const SHUTDOWN: Token = Token(2);
const FIRST_DEVICE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Draining,
    Stopped,
}

/// Handled devices by poll token
#[derive(Default)]
pub struct DeviceTable {
    sources: HashMap<Token, Source>,
    next: usize,
}

impl DeviceTable {
    pub fn new() -> Self {
        DeviceTable {
            sources: HashMap::new(),
            next: FIRST_DEVICE,
        }
    }

    /// Add a source under a token which has never been used before
    pub fn insert(&mut self, source: Source) -> Token {
        let token = Token(self.next.max(FIRST_DEVICE));

        self.next = token.0 + 1;
        self.sources.insert(token, source);

        token
    }

    pub fn remove(&mut self, token: Token) -> Option<Source> {
        self.sources.remove(&token)
    }

    pub fn get(&self, token: Token) -> Option<&Source> {
        self.sources.get(&token)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Source> {
        self.sources.get_mut(&token)
    }

    pub fn find(&self, path: &Path) -> Option<Token> {
        self.sources
            .iter()
            .find(|(_, source)| source.path() == path)
            .map(|(token, _)| *token)
    }

    /// Sources ordered by device path
    pub fn iter(&self) -> impl Iterator<Item = (Token, &Source)> {
        self.sources
            .iter()
            .map(|(token, source)| (*token, source))
            .sorted_by(|a, b| a.1.path().cmp(b.1.path()))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn drain(&mut self) -> Vec<(Token, Source)> {
        self.sources.drain().collect()
    }
}

fn log_device_count(table: &DeviceTable) {
    info!("handling {} device(s)", table.len());
}

/// Read every ready device in order and hand the resulting edges to the
/// dispatcher. Devices which went away are taken out of the table and pushed
/// onto `removed`; the others are still read. Any other read error stops
/// processing and is returned.
pub fn process_ready<O: Output>(
    table: &mut DeviceTable,
    ready: &[Token],
    dispatcher: &mut Dispatcher<O>,
    now: Instant,
    removed: &mut Vec<(Token, Source)>,
) -> io::Result<()> {
    for token in ready {
        let Some(source) = table.get_mut(*token) else {
            continue;
        };

        match source.process() {
            Ok(actions) => dispatcher.perform(*token, actions, now),
            Err(SourceError::Removed) => {
                dispatcher.forget(*token, &source.held());

                if let Some(source) = table.remove(*token) {
                    removed.push((*token, source));
                }
            }
            Err(SourceError::Io(e)) => {
                error!("{}: {e}", source.path().display());
                return Err(e);
            }
        }
    }

    Ok(())
}

/// The device table as seen by control requests
pub struct Devices<'a, O> {
    pub ctx: &'a Context,
    pub table: &'a mut DeviceTable,
    pub dispatcher: &'a mut Dispatcher<O>,
}

impl<O: Output> ControlTarget for Devices<'_, O> {
    fn load_device_config(&mut self, path: &Path, file: Option<&str>) {
        let Some(token) = self.table.find(path) else {
            warn!("{}: device not handled", path.display());
            return;
        };

        let Some(source) = self.table.get_mut(token) else {
            return;
        };

        let held = source.held();

        match source.load_config(self.ctx, file) {
            // pending holds and pressed keys belong to the old config
            Ok(_) => self.dispatcher.forget(token, &held),
            Err(e) => error!("{e}"),
        }
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.table
            .iter()
            .map(|(_, source)| DeviceInfo {
                name: source.name().to_owned(),
                path: source.path().to_owned(),
            })
            .collect()
    }
}

/// Signals arrive on the read end of a socket pair
struct SignalPipe {
    token: Token,
    stream: UnixStream,
    ids: Vec<SigId>,
}

impl SignalPipe {
    fn new(registry: &Registry, token: Token, signals: &[libc::c_int]) -> io::Result<Self> {
        let (read, write) = net::UnixStream::pair()?;

        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;

        let mut ids = Vec::new();

        for signal in signals {
            ids.push(signal_hook::low_level::pipe::register(
                *signal,
                write.try_clone()?,
            )?);
        }

        let mut stream = UnixStream::from_std(read);

        registry.register(&mut stream, token, Interest::READABLE)?;

        Ok(SignalPipe { token, stream, ids })
    }

    /// Empty the pipe. Returns whether any signal was pending.
    fn drain(&mut self) -> bool {
        let mut buf = [0u8; 64];
        let mut received = false;

        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => received = true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(_) => break,
            }
        }

        received
    }

    fn close(&mut self, registry: &Registry) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }

        if let Err(e) = registry.deregister(&mut self.stream) {
            debug!("signal pipe {:?}: {e}", self.token);
        }
    }
}

pub struct Multiplexer<O, D> {
    ctx: Context,
    poll: Poll,
    control: ControlSocket,
    rescan: SignalPipe,
    shutdown: SignalPipe,
    table: DeviceTable,
    dispatcher: Dispatcher<O>,
    discovery: D,
    state: LoopState,
}

impl Multiplexer<SystemOutput, EvdevDiscovery> {
    /// Set up the control socket, signal handling and virtual keyboard, then
    /// pick up the devices which are already present
    pub fn new(ctx: Context) -> io::Result<Self> {
        let output = SystemOutput::new(ctx.name);

        Multiplexer::with(ctx, output, EvdevDiscovery)
    }
}

impl<O: Output, D: Discovery> Multiplexer<O, D> {
    pub fn with(ctx: Context, output: O, discovery: D) -> io::Result<Self> {
        let poll = Poll::new()?;

        let mut control = ControlSocket::bind(&ctx.socket_path)?;

        control.register(poll.registry(), CONTROL)?;

        let rescan = SignalPipe::new(poll.registry(), RESCAN, &[SIGHUP])?;
        let shutdown = SignalPipe::new(poll.registry(), SHUTDOWN, &[SIGINT, SIGTERM])?;

        let dispatcher = Dispatcher::new(&ctx, output);

        let mut multiplexer = Multiplexer {
            ctx,
            poll,
            control,
            rescan,
            shutdown,
            table: DeviceTable::new(),
            dispatcher,
            discovery,
            state: LoopState::Running,
        };

        multiplexer.scan_devices();

        Ok(multiplexer)
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until asked to stop. Devices are released and the virtual
    /// keyboard closed however the loop ends.
    pub fn run(&mut self) -> io::Result<()> {
        let res = self.event_loop();

        if let Err(e) = &res {
            error!("unhandled error: {e}");
        }

        self.state = LoopState::Draining;
        self.cleanup();
        self.state = LoopState::Stopped;

        info!("quitting");

        res
    }

    fn event_loop(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(64);
        let mut ready = Vec::new();
        let mut removed = Vec::new();

        while self.state == LoopState::Running {
            let timeout = self.dispatcher.timeout(Instant::now());

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }

                return Err(e);
            }

            ready.clear();

            for event in events.iter() {
                match event.token() {
                    CONTROL => {
                        let mut devices = Devices {
                            ctx: &self.ctx,
                            table: &mut self.table,
                            dispatcher: &mut self.dispatcher,
                        };

                        if let Err(e) = self.control.process(&mut devices) {
                            warn!("control: {e}");
                        }
                    }
                    RESCAN => {
                        if self.rescan.drain() {
                            info!("SIGHUP received");
                            self.scan_devices();
                        }
                    }
                    SHUTDOWN => {
                        if self.shutdown.drain() {
                            info!("user requested shutdown");
                            self.state = LoopState::Draining;
                        }
                    }
                    token => ready.push(token),
                }
            }

            let now = Instant::now();

            let res = process_ready(
                &mut self.table,
                &ready,
                &mut self.dispatcher,
                now,
                &mut removed,
            );

            for (_, source) in removed.drain(..) {
                self.remove_device(source, false);
            }

            res?;

            self.dispatcher.perform_delayed(now);
            self.dispatcher.flush();
        }

        Ok(())
    }

    /// Start handling every device which is not handled yet
    pub fn scan_devices(&mut self) {
        info!("scanning devices...");

        match self.discovery.list() {
            Ok(paths) => {
                for path in paths {
                    if self.table.find(&path).is_none() {
                        self.add_device(&path);
                    }
                }
            }
            Err(e) => warn!("cannot list devices: {e}"),
        }

        log_device_count(&self.table);
    }

    fn add_device(&mut self, path: &Path) {
        let device = match self.discovery.open(path) {
            Ok(device) => device,
            Err(e) => {
                debug!("{}: {e}", path.display());
                return;
            }
        };

        debug!("trying to add {} ({})", path.display(), device.name());

        let source = match Source::open(&self.ctx, device) {
            Ok(source) => source,
            Err(e) if e.is_not_found() => {
                debug!("{e}");
                return;
            }
            Err(e) => {
                error!("{e}");
                return;
            }
        };

        let raw_fd = source.raw_fd();
        let token = self.table.insert(source);

        if let Err(e) =
            self.poll
                .registry()
                .register(&mut SourceFd(&raw_fd), token, Interest::READABLE)
        {
            error!("{}: {e}", path.display());

            if let Some(mut source) = self.table.remove(token) {
                source.release();
            }
        }
    }

    fn remove_device(&mut self, mut source: Source, quiet: bool) {
        // the fd may be gone already, in which case epoll forgot it anyway
        if let Err(e) = self
            .poll
            .registry()
            .deregister(&mut SourceFd(&source.raw_fd()))
        {
            debug!("{}: {e}", source.path().display());
        }

        source.release();

        if !quiet {
            info!("removed {} ({})", source.path().display(), source.name());
            log_device_count(&self.table);
        }
    }

    fn cleanup(&mut self) {
        for (token, source) in self.table.drain() {
            self.dispatcher.forget(token, &source.held());
            self.remove_device(source, true);
        }

        self.dispatcher.flush();

        if let Err(e) = self.control.deregister(self.poll.registry()) {
            debug!("{}: {e}", self.control.path().display());
        }

        self.rescan.close(self.poll.registry());
        self.shutdown.close(self.poll.registry());

        self.dispatcher.output_mut().close();
    }
}
