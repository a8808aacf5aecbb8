//! Where actions end up: synthesized key events and spawned commands.

use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, EventType, InputEvent, Key};
use log::{debug, info, warn};
use std::{
    io,
    process::{Child, Command, Stdio},
};

/// Highest key code the input subsystem knows about
const KEY_MAX: u16 = 0x2ff;

pub trait Output {
    /// Queue a key press or release; written out by `flush`
    fn key(&mut self, key: Key, pressed: bool) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    /// Run commands one after the other, without waiting for them
    fn exec(&mut self, commands: &[String]) -> io::Result<()>;
    /// Done for good; nothing is written after this
    fn close(&mut self);
}

/// uinput keyboard plus `sh` for commands
pub struct SystemOutput {
    keyboard: Option<evdev::uinput::VirtualDevice>,
    pending: Vec<InputEvent>,
    children: Vec<(Child, String)>,
}

impl SystemOutput {
    /// Create the virtual keyboard. Without access to uinput, key actions do
    /// nothing but commands still run.
    pub fn new(name: &str) -> Self {
        let name = format!("{name}[{}]", std::process::id());

        let keyboard = match virtual_keyboard(&name) {
            Ok(keyboard) => {
                info!("created virtual keyboard {name}");
                Some(keyboard)
            }
            Err(e) => {
                warn!("failed to create virtual keyboard, key actions disabled: {e}");
                None
            }
        };

        SystemOutput {
            keyboard,
            pending: Vec::new(),
            children: Vec::new(),
        }
    }

    fn reap(&mut self) {
        self.children.retain_mut(|(child, command)| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if !status.success() {
                    warn!("command '{command}' failed: {status}");
                }
                false
            }
            Err(e) => {
                warn!("command '{command}': {e}");
                false
            }
        });
    }
}

fn virtual_keyboard(name: &str) -> io::Result<evdev::uinput::VirtualDevice> {
    let mut keys = AttributeSet::<Key>::new();

    for code in 1..=KEY_MAX {
        keys.insert(Key::new(code));
    }

    VirtualDeviceBuilder::new()?
        .name(name)
        .with_keys(&keys)?
        .build()
}

impl Output for SystemOutput {
    fn key(&mut self, key: Key, pressed: bool) -> io::Result<()> {
        if self.keyboard.is_none() {
            debug!("no virtual keyboard, ignoring {key:?}");
            return Ok(());
        }

        self.pending
            .push(InputEvent::new(EventType::KEY, key.code(), i32::from(pressed)));

        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.reap();

        if self.pending.is_empty() {
            return Ok(());
        }

        let events = std::mem::take(&mut self.pending);

        match &mut self.keyboard {
            // emit() follows the events with a SYN_REPORT
            Some(keyboard) => keyboard.emit(&events),
            None => Ok(()),
        }
    }

    fn exec(&mut self, commands: &[String]) -> io::Result<()> {
        let script = commands.join("\n");

        debug!("running '{script}'");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .spawn()?;

        self.children.push((child, script));

        Ok(())
    }

    /// Destroy the virtual keyboard
    fn close(&mut self) {
        self.pending.clear();

        if self.keyboard.take().is_some() {
            debug!("virtual keyboard closed");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Emitted {
        Key(Key, bool),
        Flush,
        Exec(Vec<String>),
        Closed,
    }

    /// Remembers everything asked of it
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) emitted: Vec<Emitted>,
    }

    impl Recorder {
        /// Everything but the flushes
        pub(crate) fn effects(&self) -> Vec<Emitted> {
            self.emitted
                .iter()
                .filter(|e| **e != Emitted::Flush)
                .cloned()
                .collect()
        }
    }

    impl Output for Recorder {
        fn key(&mut self, key: Key, pressed: bool) -> io::Result<()> {
            self.emitted.push(Emitted::Key(key, pressed));
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.emitted.push(Emitted::Flush);
            Ok(())
        }

        fn exec(&mut self, commands: &[String]) -> io::Result<()> {
            self.emitted.push(Emitted::Exec(commands.to_vec()));
            Ok(())
        }

        fn close(&mut self) {
            self.emitted.push(Emitted::Closed);
        }
    }

    #[test]
    fn commands_run_in_order() {
        let dir = std::env::temp_dir().join(format!("evmapper-exec-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let log = dir.join("log");

        let mut output = SystemOutput {
            keyboard: None,
            pending: Vec::new(),
            children: Vec::new(),
        };

        output
            .exec(&[
                format!("echo one >> {}", log.display()),
                format!("echo two >> {}", log.display()),
            ])
            .unwrap();

        let (child, _) = &mut output.children[0];
        assert!(child.wait().unwrap().success());

        output.flush().unwrap();
        assert!(output.children.is_empty());

        let contents = std::fs::read_to_string(&log).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(contents, "one\ntwo\n");
    }

    #[test]
    fn keys_without_keyboard() {
        let mut output = SystemOutput {
            keyboard: None,
            pending: Vec::new(),
            children: Vec::new(),
        };

        output.key(Key::KEY_A, true).unwrap();
        assert!(output.pending.is_empty());
        output.flush().unwrap();
    }
}
