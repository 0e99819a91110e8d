use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::Session as Ssh2Session;

use crate::config::model::{Auth, HostSpec};
use crate::ssh::channel::{Channel, ChannelLike};
use crate::ssh::error::SshError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const BANNER_TIMEOUT_MS: u32 = 30_000;
const KEEPALIVE_INTERVAL_SECS: u32 = 30;

/// The surface the Process Detector, Metrics Sampler and Supervisor cycle
/// functions need from a connection. Implemented by [`Session`] over a real
/// `ssh2` session, and by a scripted fake in `supervisor::worker`'s tests so
/// the state machine's literal scenarios can run without a live host.
pub trait SessionLike {
    type Channel: ChannelLike;

    fn connect(&mut self) -> Result<(), SshError>;
    fn is_connected(&self) -> bool;
    fn run_short(&self, cmd: &str, timeout: Duration) -> Result<(i32, String, String), SshError>;
    fn start_stream(&self, full_cmd: &str) -> Result<Self::Channel, SshError>;
}

/// Thin connection abstraction around `ssh2`. Owned exclusively by one
/// Supervisor; never shared across hosts.
pub struct Session {
    host: String,
    port: u16,
    username: String,
    auth: Auth,
    inner: Option<Ssh2Session>,
}

impl Session {
    pub fn new(host: &str, port: u16, username: &str, auth: Auth) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            auth,
            inner: None,
        }
    }

    /// Establishes the TCP connection, performs the SSH handshake within the
    /// 15 s/30 s timeouts, authenticates, and enables a 30 s keepalive.
    pub fn connect(&mut self) -> Result<(), SshError> {
        let addr = format!("{}:{}", self.host, self.port);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::NetworkError(format!("failed to resolve {addr}: {e}")))?
            .next()
            .ok_or_else(|| SshError::NetworkError(format!("no address found for {addr}")))?;
        let tcp = TcpStream::connect_timeout(&socket_addr, HANDSHAKE_TIMEOUT)
            .map_err(|e| SshError::NetworkError(e.to_string()))?;

        let mut session =
            Ssh2Session::new().map_err(|e| SshError::NetworkError(e.to_string()))?;
        session.set_banner_timeout(BANNER_TIMEOUT_MS);
        session.set_timeout(HANDSHAKE_TIMEOUT.as_millis() as u32);
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| SshError::NetworkError(e.to_string()))?;

        Self::authenticate(&mut session, &self.username, &self.auth)?;

        session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);
        session.set_blocking(true);

        self.inner = Some(session);
        Ok(())
    }

    fn authenticate(session: &mut Ssh2Session, username: &str, auth: &Auth) -> Result<(), SshError> {
        match auth {
            Auth::Key { key_path, passphrase } => {
                let path = Path::new(key_path);
                if !path.exists() {
                    return Err(SshError::KeyError(format!(
                        "Private key not found: {key_path}"
                    )));
                }
                session
                    .userauth_pubkey_file(username, None, path, passphrase.as_deref())
                    .map_err(|e| SshError::AuthError(e.to_string()))?;
            }
            Auth::Password { password } => {
                session
                    .userauth_password(username, password)
                    .map_err(|e| SshError::AuthError(e.to_string()))?;
            }
        }

        if !session.authenticated() {
            return Err(SshError::AuthError(
                "server rejected credentials".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        match &self.inner {
            Some(s) => s.authenticated(),
            None => false,
        }
    }

    /// Runs `cmd` to completion, bounded by `timeout`, and returns its exit
    /// code, stdout and stderr. Intended for short status/probe commands.
    pub fn run_short(&self, cmd: &str, timeout: Duration) -> Result<(i32, String, String), SshError> {
        let session = self.inner.as_ref().ok_or_else(|| {
            SshError::NetworkError("not connected".to_string())
        })?;

        // The blocking flag is session-wide, not per-channel: once a
        // streaming command is active (`start_stream` leaves the session in
        // non-blocking mode) a short probe command still needs a blocking
        // read to completion, so it is toggled around this call and always
        // left non-blocking afterwards to match the streaming channel's
        // expectation.
        session.set_blocking(true);
        let result = (|| {
            session.set_timeout(timeout.as_millis() as u32);
            let mut channel = session
                .channel_session()
                .map_err(|e| SshError::ProtocolError(e.to_string()))?;
            channel
                .exec(cmd)
                .map_err(|e| SshError::ProtocolError(e.to_string()))?;

            let mut stdout = String::new();
            channel
                .read_to_string(&mut stdout)
                .map_err(SshError::Io)?;
            let mut stderr = String::new();
            channel
                .stderr()
                .read_to_string(&mut stderr)
                .map_err(SshError::Io)?;

            channel.wait_close().ok();
            let exit_code = channel.exit_status().unwrap_or(-1);

            // reset to the handshake timeout for subsequent short commands
            session.set_timeout(HANDSHAKE_TIMEOUT.as_millis() as u32);

            Ok((exit_code, stdout, stderr))
        })();
        session.set_blocking(false);

        result
    }

    /// Executes `full_cmd` without a pseudo-terminal and returns a [`Channel`]
    /// offering non-blocking reads of stdout/stderr and the exit status.
    pub fn start_stream(&self, full_cmd: &str) -> Result<Channel, SshError> {
        let session = self.inner.as_ref().ok_or_else(|| {
            SshError::NetworkError("not connected".to_string())
        })?;

        session.set_timeout(0);
        let mut channel = session
            .channel_session()
            .map_err(|e| SshError::ProtocolError(e.to_string()))?;
        channel
            .exec(full_cmd)
            .map_err(|e| SshError::ProtocolError(e.to_string()))?;

        // non-blocking so the Supervisor tick loop never stalls on a read
        session.set_blocking(false);

        Ok(Channel::new(channel))
    }

    /// Idempotent release of transport and channel resources.
    pub fn close(&mut self) {
        if let Some(session) = self.inner.take() {
            let _ = session.disconnect(None, "closing", None);
        }
    }
}

impl SessionLike for Session {
    type Channel = Channel;

    fn connect(&mut self) -> Result<(), SshError> {
        Session::connect(self)
    }

    fn is_connected(&self) -> bool {
        Session::is_connected(self)
    }

    fn run_short(&self, cmd: &str, timeout: Duration) -> Result<(i32, String, String), SshError> {
        Session::run_short(self, cmd, timeout)
    }

    fn start_stream(&self, full_cmd: &str) -> Result<Channel, SshError> {
        Session::start_stream(self, full_cmd)
    }
}

/// Builds the login-shell invocation described in the component design: a
/// `bash -lc` wrapper applying the working directory, optional pre-command,
/// environment assignments, and finally the command itself.
pub fn wrap_supervised_command(spec: &HostSpec) -> String {
    let mut inner = format!("cd {} && ", spec.working_dir);

    if !spec.pre_command.trim().is_empty() {
        inner.push_str(&spec.pre_command);
        inner.push_str(" && ");
    }

    let mut env_keys: Vec<&String> = spec.env.keys().collect();
    env_keys.sort();
    for key in env_keys {
        inner.push_str(&format!("{}={} ", key, shell_single_quote(&spec.env[key])));
    }

    inner.push_str("PYTHONUNBUFFERED=1 ");
    inner.push_str(&spec.command);

    format!("bash -lc {}", shell_single_quote(&inner))
}

/// Single-quotes a shell fragment, escaping embedded single quotes with the
/// close-quote/escaped-quote/reopen-quote technique (`'\''`) rather than
/// rejecting them, per the quoting contract adopted for the open question.
pub fn shell_single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
