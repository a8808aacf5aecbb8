//! Input devices under `/dev/input`.

use crate::config::{AxisDef, ButtonDef, Capabilities};
use evdev::{Device, EventType, InputEvent};
use log::debug;
use nix::fcntl::{FcntlArg, OFlag};
use std::{
    fs, io,
    os::unix::io::{AsRawFd, RawFd},
    path::{Path, PathBuf},
};

pub const INPUT_DIR: &str = "/dev/input";

/// One event as read from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub event_type: EventType,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn new(event_type: EventType, code: u16, value: i32) -> Self {
        RawEvent {
            event_type,
            code,
            value,
        }
    }
}

impl From<InputEvent> for RawEvent {
    fn from(ev: InputEvent) -> Self {
        RawEvent::new(ev.event_type(), ev.code(), ev.value())
    }
}

/// What the daemon needs from an input device
pub trait InputDevice {
    fn name(&self) -> &str;
    fn path(&self) -> &Path;
    fn raw_fd(&self) -> RawFd;
    /// Every event currently pending; empty if there are none
    fn read(&mut self) -> io::Result<Vec<RawEvent>>;
    fn grab(&mut self) -> io::Result<()>;
    fn ungrab(&mut self) -> io::Result<()>;
}

/// An evdev character device, opened non-blocking
pub struct EvdevDevice {
    device: Device,
    path: PathBuf,
    name: String,
}

impl EvdevDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = Device::open(path)?;

        nix::fcntl::fcntl(device.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;

        let name = device.name().unwrap_or_default().to_owned();

        Ok(EvdevDevice {
            device,
            path: path.to_owned(),
            name,
        })
    }

    /// The keys and absolute axes the device reports, with the axis ranges
    pub fn capabilities(&self) -> io::Result<Capabilities> {
        let mut capabilities = Capabilities::default();

        if let Some(keys) = self.device.supported_keys() {
            for key in keys.iter() {
                capabilities.buttons.push(ButtonDef {
                    name: format!("{key:?}"),
                    code: key.code(),
                });
            }
        }

        if let Some(axes) = self.device.supported_absolute_axes() {
            let state = self.device.get_abs_state()?;

            for axis in axes.iter() {
                let info = &state[usize::from(axis.0)];

                capabilities.axes.push(AxisDef {
                    name: format!("{axis:?}"),
                    code: axis.0,
                    min: info.minimum,
                    max: info.maximum,
                });
            }
        }

        Ok(capabilities)
    }
}

impl InputDevice for EvdevDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn raw_fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }

    fn read(&mut self) -> io::Result<Vec<RawEvent>> {
        let mut events = Vec::new();

        loop {
            match self.device.fetch_events() {
                Ok(iter) => events.extend(iter.map(RawEvent::from)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(e),
            }
        }

        Ok(events)
    }

    fn grab(&mut self) -> io::Result<()> {
        self.device.grab()
    }

    fn ungrab(&mut self) -> io::Result<()> {
        self.device.ungrab()
    }
}

/// Where the daemon looks for devices
pub trait Discovery {
    /// Paths of every candidate device
    fn list(&self) -> io::Result<Vec<PathBuf>>;
    fn open(&self, path: &Path) -> io::Result<Box<dyn InputDevice>>;
}

/// The event devices under `/dev/input`
pub struct EvdevDiscovery;

impl Discovery for EvdevDiscovery {
    fn list(&self) -> io::Result<Vec<PathBuf>> {
        list_devices()
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn InputDevice>> {
        Ok(Box::new(EvdevDevice::open(path)?))
    }
}

/// Paths of all event devices, sorted
pub fn list_devices() -> io::Result<Vec<PathBuf>> {
    list_devices_in(Path::new(INPUT_DIR))
}

pub fn list_devices_in(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();

        if file_name.to_string_lossy().starts_with("event") {
            paths.push(entry.path());
        }
    }

    paths.sort_by_key(|path| {
        let name = path.file_name().unwrap_or_default().to_string_lossy();

        // event10 after event9
        (
            name.trim_start_matches("event").parse::<u32>().unwrap_or(u32::MAX),
            name.into_owned(),
        )
    });

    debug!("found {} event devices in {}", paths.len(), dir.display());

    Ok(paths)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{cell::RefCell, collections::HashMap, io::Write, os::unix::net::UnixStream, rc::Rc};

    #[derive(Default)]
    struct FakeState {
        pending: Vec<RawEvent>,
        error: Option<io::Error>,
        grabs: usize,
        ungrabs: usize,
    }

    /// A device fed from the test. Clones share their state. The descriptor
    /// is one end of a socket pair, which turns readable whenever the test
    /// feeds the device.
    #[derive(Clone)]
    pub(crate) struct FakeDevice {
        name: String,
        path: PathBuf,
        state: Rc<RefCell<FakeState>>,
        wake: Rc<(UnixStream, UnixStream)>,
    }

    impl FakeDevice {
        pub(crate) fn new(path: &str, name: &str) -> Self {
            FakeDevice {
                name: name.to_owned(),
                path: PathBuf::from(path),
                state: Rc::default(),
                wake: Rc::new(UnixStream::pair().unwrap()),
            }
        }

        pub(crate) fn push(&self, events: &[RawEvent]) {
            self.state.borrow_mut().pending.extend_from_slice(events);
            self.wake();
        }

        /// Make the read after the pending events fail with `error`
        pub(crate) fn fail(&self, error: io::Error) {
            self.state.borrow_mut().error = Some(error);
            self.wake();
        }

        fn wake(&self) {
            (&self.wake.1).write_all(&[0]).unwrap();
        }

        pub(crate) fn grabs(&self) -> (usize, usize) {
            let state = self.state.borrow();

            (state.grabs, state.ungrabs)
        }
    }

    impl InputDevice for FakeDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn path(&self) -> &Path {
            &self.path
        }

        fn raw_fd(&self) -> RawFd {
            self.wake.0.as_raw_fd()
        }

        fn read(&mut self) -> io::Result<Vec<RawEvent>> {
            let mut state = self.state.borrow_mut();

            if state.pending.is_empty() {
                if let Some(error) = state.error.take() {
                    return Err(error);
                }
            }

            let events = std::mem::take(&mut state.pending);

            // the error is still to come
            if state.error.is_some() {
                self.wake();
            }

            Ok(events)
        }

        fn grab(&mut self) -> io::Result<()> {
            self.state.borrow_mut().grabs += 1;
            Ok(())
        }

        fn ungrab(&mut self) -> io::Result<()> {
            self.state.borrow_mut().ungrabs += 1;
            Ok(())
        }
    }

    /// Devices the test has plugged in, by path
    #[derive(Clone, Default)]
    pub(crate) struct FakeDiscovery {
        devices: Rc<RefCell<HashMap<PathBuf, FakeDevice>>>,
        missing: Rc<RefCell<Vec<PathBuf>>>,
        opened: Rc<RefCell<Vec<PathBuf>>>,
    }

    impl FakeDiscovery {
        pub(crate) fn plug(&self, device: &FakeDevice) {
            self.devices
                .borrow_mut()
                .insert(device.path.clone(), device.clone());
        }

        /// Listed, but fails to open
        pub(crate) fn plug_broken(&self, path: &str) {
            self.missing.borrow_mut().push(PathBuf::from(path));
        }

        pub(crate) fn opened(&self, path: &str) -> usize {
            self.opened
                .borrow()
                .iter()
                .filter(|opened| *opened == Path::new(path))
                .count()
        }
    }

    impl Discovery for FakeDiscovery {
        fn list(&self) -> io::Result<Vec<PathBuf>> {
            let mut paths: Vec<PathBuf> = self.devices.borrow().keys().cloned().collect();

            paths.extend(self.missing.borrow().iter().cloned());
            paths.sort();

            Ok(paths)
        }

        fn open(&self, path: &Path) -> io::Result<Box<dyn InputDevice>> {
            self.opened.borrow_mut().push(path.to_owned());

            match self.devices.borrow().get(path) {
                Some(device) => Ok(Box::new(device.clone())),
                None => Err(io::Error::from_raw_os_error(libc::EACCES)),
            }
        }
    }

    #[test]
    fn list_event_devices() {
        let dir = std::env::temp_dir().join(format!("evmapper-list-{}", std::process::id()));

        fs::create_dir_all(&dir).unwrap();

        for name in ["event10", "event2", "mouse0", "event0", "js0"] {
            fs::write(dir.join(name), "").unwrap();
        }

        let paths = list_devices_in(&dir).unwrap();

        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(
            paths,
            vec![dir.join("event0"), dir.join("event2"), dir.join("event10")]
        );
    }

    #[test]
    fn fake_device_drains() {
        let mut device = FakeDevice::new("/dev/input/event3", "Pad");

        device.push(&[RawEvent::new(EventType::KEY, 304, 1)]);

        assert_eq!(device.read().unwrap().len(), 1);
        assert!(device.read().unwrap().is_empty());
    }

    #[test]
    fn fake_device_fails_after_pending() {
        let mut device = FakeDevice::new("/dev/input/event3", "Pad");

        device.push(&[RawEvent::new(EventType::KEY, 304, 1)]);
        device.fail(io::Error::from_raw_os_error(libc::EIO));

        assert_eq!(device.read().unwrap().len(), 1);
        assert_eq!(device.read().unwrap_err().raw_os_error(), Some(libc::EIO));
        assert!(device.read().unwrap().is_empty());
    }
}
