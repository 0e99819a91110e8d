use std::time::Duration;

use crate::ssh::error::SshError;
use crate::ssh::session::SessionLike;

const PGREP_TIMEOUT: Duration = Duration::from_secs(5);
const PS_FALLBACK_TIMEOUT: Duration = Duration::from_secs(6);

/// Decides whether a process matching `regex` is currently running on the
/// host reachable through `session`. Tries `pgrep -af` first, falling back to
/// `ps -eo pid,command | grep` if `pgrep` is unavailable or returns nothing.
pub fn detect<S: SessionLike>(session: &S, regex: &str) -> Result<Option<(u32, String)>, SshError> {
    let pgrep_cmd = format!("pgrep -af '{regex}' 2>/dev/null || true");
    let (_, stdout, _) = session.run_short(&pgrep_cmd, PGREP_TIMEOUT)?;
    if let Some(found) = parse_pgrep_output(&stdout) {
        return Ok(Some(found));
    }

    let fallback_cmd = format!(
        "ps -eo pid,command 2>/dev/null | grep -E -i '{regex}' | grep -v grep | head -n 1"
    );
    let (_, stdout, _) = session.run_short(&fallback_cmd, PS_FALLBACK_TIMEOUT)?;
    Ok(parse_ps_fallback_output(&stdout))
}

/// Parses `pgrep -af` output: one `"<pid> <command line>"` per line. Lines
/// whose command contains `pgrep` (the probe matching itself) are skipped.
fn parse_pgrep_output(stdout: &str) -> Option<(u32, String)> {
    for line in stdout.trim().lines() {
        if let Some((pid, cmd)) = split_pid_and_command(line) {
            if !cmd.contains("pgrep") {
                return Some((pid, cmd));
            }
        }
    }
    None
}

/// Parses the `ps -eo pid,command | grep -v grep | head -n1` fallback: a
/// single candidate line, already filtered of any `grep` self-match upstream.
fn parse_ps_fallback_output(stdout: &str) -> Option<(u32, String)> {
    let line = stdout.trim().lines().next()?;
    split_pid_and_command(line)
}

fn split_pid_and_command(line: &str) -> Option<(u32, String)> {
    let mut parts = line.trim().splitn(2, char::is_whitespace);
    let pid_str = parts.next()?;
    let pid: u32 = pid_str.parse().ok()?;
    let cmd = parts.next().unwrap_or("").trim_start().to_string();
    Some((pid, cmd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_pgrep_line() {
        let out = "4711 python3 worker.py\n";
        assert_eq!(
            parse_pgrep_output(out),
            Some((4711, "python3 worker.py".to_string()))
        );
    }

    #[test]
    fn excludes_self_matching_pgrep_lines() {
        let out = "123 pgrep -af worker.py\n4711 python3 worker.py\n";
        assert_eq!(
            parse_pgrep_output(out),
            Some((4711, "python3 worker.py".to_string()))
        );
    }

    #[test]
    fn empty_output_yields_none() {
        assert_eq!(parse_pgrep_output(""), None);
        assert_eq!(parse_ps_fallback_output(""), None);
    }

    #[test]
    fn non_numeric_pid_is_skipped() {
        let out = "not-a-pid some command\n4711 python3 worker.py\n";
        assert_eq!(
            parse_pgrep_output(out),
            Some((4711, "python3 worker.py".to_string()))
        );
    }

    #[test]
    fn ps_fallback_parses_first_line() {
        let out = "  4712 python3 /home/v13/worker.py --flag\n";
        assert_eq!(
            parse_ps_fallback_output(out),
            Some((4712, "python3 /home/v13/worker.py --flag".to_string()))
        );
    }
}
