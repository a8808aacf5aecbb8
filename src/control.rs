//! Control requests over a unix datagram socket.
//!
//! Every datagram holds one JSON object with a `command` field:
//!
//! - `{"command": "config", "device": "/dev/input/event3", "file": "pad.json"}`
//!   reloads the mapping of a device, from `file` inside the config directory
//!   or from the default file when `file` is absent. There is no reply.
//! - `{"command": "list"}` replies with `[{"name": .., "path": ..}, ..]`, one
//!   entry per handled device.
//!
//! Bad requests are logged by the daemon and never answered.

use crate::context::Context;
use log::{debug, warn};
use mio::{net::UnixDatagram, Interest, Registry, Token};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fs, io,
    os::unix::{fs::PermissionsExt, net},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use thiserror::Error;

/// Largest request or reply we handle
const MAX_DATAGRAM: usize = 65536;

static NEXT_CLIENT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("request has no command")]
    MissingCommand,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{command}: missing or invalid field '{field}'")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub path: PathBuf,
}

/// What control requests act on
pub trait ControlTarget {
    /// Reload the mapping of the device at `path`
    fn load_device_config(&mut self, path: &Path, file: Option<&str>);
    fn devices(&self) -> Vec<DeviceInfo>;
}

type Handler =
    fn(&mut dyn ControlTarget, &Map<String, Value>) -> Result<Option<Value>, ProtocolError>;

const COMMANDS: &[(&str, Handler)] = &[("config", do_config), ("list", do_list)];

fn do_config(
    target: &mut dyn ControlTarget,
    request: &Map<String, Value>,
) -> Result<Option<Value>, ProtocolError> {
    let Some(device) = request.get("device").and_then(Value::as_str) else {
        return Err(ProtocolError::MissingField {
            command: "config",
            field: "device",
        });
    };

    let file = match request.get("file") {
        None | Some(Value::Null) => None,
        Some(Value::String(file)) => Some(file.as_str()),
        Some(_) => {
            return Err(ProtocolError::MissingField {
                command: "config",
                field: "file",
            })
        }
    };

    target.load_device_config(Path::new(device), file);

    Ok(None)
}

fn do_list(
    target: &mut dyn ControlTarget,
    _request: &Map<String, Value>,
) -> Result<Option<Value>, ProtocolError> {
    let devices = serde_json::to_value(target.devices())
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    Ok(Some(devices))
}

/// Parse and carry out one request. Returns the reply, if the command has one.
pub fn handle(
    target: &mut dyn ControlTarget,
    data: &[u8],
) -> Result<Option<Value>, ProtocolError> {
    let request: Value =
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let Value::Object(request) = request else {
        return Err(ProtocolError::Malformed("not an object".into()));
    };

    let Some(command) = request.get("command").and_then(Value::as_str) else {
        return Err(ProtocolError::MissingCommand);
    };

    let Some((_, handler)) = COMMANDS.iter().find(|(name, _)| *name == command) else {
        return Err(ProtocolError::UnknownCommand(command.to_owned()));
    };

    handler(target, &request)
}

/// The daemon end. The socket file is removed again on drop.
pub struct ControlSocket {
    socket: UnixDatagram,
    path: PathBuf,
}

impl ControlSocket {
    /// Bind to `path`, replacing a stale socket file. Fails if another
    /// daemon is still listening there. Only the owner may connect.
    pub fn bind(path: &Path) -> io::Result<Self> {
        match net::UnixDatagram::unbound()?.connect(path) {
            Ok(()) => {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{}: daemon already running", path.display()),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(_) => {
                fs::remove_file(path)?;
                debug!("{}: removed stale socket", path.display());
            }
        }

        let socket = UnixDatagram::bind(path)?;

        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(ControlSocket {
            socket,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.socket, token, Interest::READABLE)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.socket)
    }

    /// Handle every pending request
    pub fn process(&mut self, target: &mut dyn ControlTarget) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf) {
                Ok(res) => res,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            debug!("control: {}", String::from_utf8_lossy(&buf[..len]));

            let reply = match handle(target, &buf[..len]) {
                Ok(Some(reply)) => reply,
                Ok(None) => continue,
                Err(e) => {
                    warn!("control: {e}");
                    continue;
                }
            };

            // unnamed peers cannot be answered
            let Some(peer) = peer.as_pathname() else {
                debug!("control: no address to reply to");
                continue;
            };

            let reply = reply.to_string();

            if let Err(e) = self.socket.send_to(reply.as_bytes(), peer) {
                warn!("control: reply to {}: {e}", peer.display());
            }
        }
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("{}: {e}", self.path.display());
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot reach daemon at {}: {source}", path.display())]
    Unreachable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no reply from daemon")]
    Timeout,
    #[error("malformed reply: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The requesting end. Binds its own socket so the daemon can reply.
pub struct Client {
    socket: net::UnixDatagram,
    server: PathBuf,
    path: PathBuf,
}

impl Client {
    pub fn bind(ctx: &Context) -> Result<Self, ClientError> {
        let path = std::env::temp_dir().join(format!(
            "{}-client.{}.{}.socket",
            ctx.name,
            std::process::id(),
            NEXT_CLIENT.fetch_add(1, Ordering::Relaxed)
        ));

        // left behind by a process with the same pid
        let _ = fs::remove_file(&path);

        let socket = net::UnixDatagram::bind(&path)?;

        Ok(Client {
            socket,
            server: ctx.socket_path.clone(),
            path,
        })
    }

    pub fn send(&self, request: &Value) -> Result<(), ClientError> {
        let request = request.to_string();

        self.socket
            .send_to(request.as_bytes(), &self.server)
            .map_err(|source| ClientError::Unreachable {
                path: self.server.clone(),
                source,
            })?;

        Ok(())
    }

    pub fn receive(&self, timeout: Duration) -> Result<Value, ClientError> {
        // a zero timeout means blocking forever
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        let mut buf = vec![0u8; MAX_DATAGRAM];

        let len = match self.socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                return Err(ClientError::Timeout)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_slice(&buf[..len])?)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Send a request to the daemon, then wait up to `wait` for the reply if given
pub fn send_request(
    ctx: &Context,
    request: &Value,
    wait: Option<Duration>,
) -> Result<Option<Value>, ClientError> {
    let client = Client::bind(ctx)?;

    client.send(request)?;

    match wait {
        Some(timeout) => client.receive(timeout).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Default)]
    struct Target {
        loads: Vec<(PathBuf, Option<String>)>,
    }

    impl ControlTarget for Target {
        fn load_device_config(&mut self, path: &Path, file: Option<&str>) {
            self.loads.push((path.to_owned(), file.map(str::to_owned)));
        }

        fn devices(&self) -> Vec<DeviceInfo> {
            vec![DeviceInfo {
                name: "Fake Pad".into(),
                path: "/dev/input/event7".into(),
            }]
        }
    }

    #[test]
    fn config_request() {
        let mut target = Target::default();

        let reply = handle(
            &mut target,
            br#"{"command": "config", "device": "/dev/input/event7", "file": "other.json"}"#,
        );
        assert_eq!(reply, Ok(None));

        let reply = handle(
            &mut target,
            br#"{"command": "config", "device": "/dev/input/event7"}"#,
        );
        assert_eq!(reply, Ok(None));

        assert_eq!(
            target.loads,
            vec![
                (
                    PathBuf::from("/dev/input/event7"),
                    Some("other.json".to_owned())
                ),
                (PathBuf::from("/dev/input/event7"), None),
            ]
        );
    }

    #[test]
    fn list_request() {
        let mut target = Target::default();

        let reply = handle(&mut target, br#"{"command": "list"}"#);

        assert_eq!(
            reply,
            Ok(Some(json!([{"name": "Fake Pad", "path": "/dev/input/event7"}])))
        );
    }

    #[test]
    fn bad_requests() {
        let mut target = Target::default();

        assert!(matches!(
            handle(&mut target, b"{\"command\": "),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            handle(&mut target, b"[1, 2]"),
            Err(ProtocolError::Malformed(_))
        ));
        assert_eq!(
            handle(&mut target, br#"{"device": "/dev/input/event7"}"#),
            Err(ProtocolError::MissingCommand)
        );
        assert_eq!(
            handle(&mut target, br#"{"command": "quit"}"#),
            Err(ProtocolError::UnknownCommand("quit".into()))
        );
        assert_eq!(
            handle(&mut target, br#"{"command": "config"}"#),
            Err(ProtocolError::MissingField {
                command: "config",
                field: "device"
            })
        );
        assert_eq!(
            handle(
                &mut target,
                br#"{"command": "config", "device": "/dev/input/event7", "file": 3}"#
            ),
            Err(ProtocolError::MissingField {
                command: "config",
                field: "file"
            })
        );
        assert!(target.loads.is_empty());
    }

    fn scratch(name: &str) -> Context {
        let dir = std::env::temp_dir().join(format!("evmapper-{name}-{}", std::process::id()));

        fs::create_dir_all(&dir).unwrap();

        Context {
            socket_path: dir.join("control.socket"),
            config_dir: dir,
            ..Context::default()
        }
    }

    #[test]
    fn socket_round_trip() {
        let ctx = scratch("socket");
        let mut server = ControlSocket::bind(&ctx.socket_path).unwrap();

        let mode = fs::metadata(&ctx.socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let client = Client::bind(&ctx).unwrap();
        let mut target = Target::default();

        client.send(&json!({"command": "bogus"})).unwrap();
        client.send(&json!({"command": "list"})).unwrap();

        server.process(&mut target).unwrap();

        let reply = client.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(
            reply,
            json!([{"name": "Fake Pad", "path": "/dev/input/event7"}])
        );

        // nothing else was answered
        assert!(matches!(
            client.receive(Duration::from_millis(50)),
            Err(ClientError::Timeout)
        ));

        drop(server);
        assert!(!ctx.socket_path.exists());

        fs::remove_dir_all(&ctx.config_dir).unwrap();
    }

    #[test]
    fn socket_in_use() {
        let ctx = scratch("inuse");
        let server = ControlSocket::bind(&ctx.socket_path).unwrap();

        let res = ControlSocket::bind(&ctx.socket_path);

        assert_eq!(res.err().map(|e| e.kind()), Some(io::ErrorKind::AddrInUse));
        assert!(ctx.socket_path.exists());

        drop(server);

        // left behind by a daemon which did not clean up
        drop(net::UnixDatagram::bind(&ctx.socket_path).unwrap());
        assert!(ctx.socket_path.exists());

        let server = ControlSocket::bind(&ctx.socket_path).unwrap();

        drop(server);
        fs::remove_dir_all(&ctx.config_dir).unwrap();
    }

    #[test]
    fn daemon_not_running() {
        let ctx = scratch("unreachable");

        let res = send_request(&ctx, &json!({"command": "list"}), None);

        assert!(matches!(res, Err(ClientError::Unreachable { .. })));

        fs::remove_dir_all(&ctx.config_dir).unwrap();
    }
}
