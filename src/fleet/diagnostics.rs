use std::time::Duration;

use crate::config::model::HostSpec;
use crate::ssh::session::Session;
use crate::supervisor::error::SupervisorError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of `FleetManager::test_connection`: a one-shot diagnostic probe,
/// not an Event and not tied to any Supervisor's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDiagnostics {
    pub os: String,
    pub python: String,
    pub python_version: Option<String>,
    pub current_dir: String,
}

/// Opens a throwaway session against `spec`, runs `uname -a`,
/// `which python3 || which python`, and `pwd`, then closes it. Never leaves a
/// partially-filled struct behind: a connection failure is returned as an
/// error instead.
pub fn test_connection(spec: &HostSpec) -> Result<ConnectionDiagnostics, SupervisorError> {
    let mut session = Session::new(&spec.host, spec.port, &spec.username, spec.auth.clone());
    session.connect()?;

    let os = run_trimmed(&session, "uname -a").unwrap_or_else(|| "Unknown".to_string());

    let python_path = run_trimmed(&session, "which python3 || which python").unwrap_or_default();
    let python = if python_path.is_empty() {
        "Not found".to_string()
    } else {
        python_path
    };

    let python_version = (python != "Not found")
        .then(|| run_trimmed(&session, &format!("{python} --version")))
        .flatten();

    let current_dir = run_trimmed(&session, "pwd").unwrap_or_default();

    session.close();

    Ok(ConnectionDiagnostics {
        os,
        python,
        python_version,
        current_dir,
    })
}

/// Runs a short probe command, returning its combined stdout (falling back to
/// stderr, since e.g. Python 2's `--version` prints there) trimmed of
/// surrounding whitespace, or `None` on any failure.
fn run_trimmed(session: &Session, cmd: &str) -> Option<String> {
    let (_, stdout, stderr) = session.run_short(cmd, PROBE_TIMEOUT).ok()?;
    let out = stdout.trim();
    if !out.is_empty() {
        return Some(out.to_string());
    }
    let err = stderr.trim();
    (!err.is_empty()).then(|| err.to_string())
}
