use std::time::Duration;

use tracing::debug;

use crate::metrics::sample::{round1, Sample};
use crate::ssh::session::SessionLike;
use crate::supervisor::error::SupervisorError;

const CPU_TIMEOUT: Duration = Duration::from_secs(3);
const RAM_TIMEOUT: Duration = Duration::from_secs(3);
const GPU_TIMEOUT: Duration = Duration::from_secs(4);

/// Samples CPU, RAM and (optionally) GPU usage for one host, once per tick.
/// Retains the previous `/proc/stat` jiffy reading so CPU usage can be
/// reported as a delta; the first sample after connecting (or after a
/// restart, via [`Sampler::reset`]) has no baseline and yields `cpu = none`.
pub struct Sampler {
    host_name: String,
    prev_jiffies: Option<(u64, u64)>,
}

impl Sampler {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            prev_jiffies: None,
        }
    }

    /// Drops the CPU baseline so the next sample reports `cpu = none`.
    /// Called whenever the supervised process (re)starts.
    pub fn reset(&mut self) {
        self.prev_jiffies = None;
    }

    pub fn sample<S: SessionLike>(&mut self, session: &S, timestamp_s: i64) -> Sample {
        let mut sample = Sample::empty(self.host_name.clone(), timestamp_s);
        sample.cpu_pct = self.sample_cpu(session);

        if let Some((used, total)) = self.sample_ram(session) {
            sample.ram_used_mb = Some(used);
            sample.ram_total_mb = Some(total);
        }

        if let Some((util, mem_used, mem_total)) = self.sample_gpu(session) {
            sample.gpu_util_pct = Some(util);
            sample.gpu_mem_used_mb = Some(mem_used);
            sample.gpu_mem_total_mb = Some(mem_total);
        }

        sample
    }

    /// CPU sampling surfaces a `MetricsError` (logged, field dropped to
    /// `none`) for a broken `/proc/stat` read or parse, distinct from the
    /// expected "no baseline yet" `None` on the first tick after a restart.
    fn sample_cpu<S: SessionLike>(&mut self, session: &S) -> Option<f64> {
        match self.try_sample_cpu(session) {
            Ok(pct) => pct,
            Err(e) => {
                debug!(host = %self.host_name, error = %e, "cpu sample unavailable");
                None
            }
        }
    }

    fn try_sample_cpu<S: SessionLike>(&mut self, session: &S) -> Result<Option<f64>, SupervisorError> {
        let (_, stdout, _) = session
            .run_short("cat /proc/stat | head -n1", CPU_TIMEOUT)
            .map_err(|e| SupervisorError::MetricsError(e.to_string()))?;
        let (total, idle) = parse_proc_stat_line(&stdout)
            .ok_or_else(|| SupervisorError::MetricsError("failed to parse /proc/stat".to_string()))?;

        let prev = self.prev_jiffies.replace((total, idle));
        let Some((prev_total, prev_idle)) = prev else {
            return Ok(None);
        };

        let delta_total = total.saturating_sub(prev_total) as f64;
        let delta_idle = idle.saturating_sub(prev_idle) as f64;
        if delta_total <= 0.0 {
            return Ok(None);
        }

        let pct = 100.0 * (1.0 - delta_idle / delta_total);
        Ok(Some(round1(pct.clamp(0.0, 100.0))))
    }

    fn sample_ram<S: SessionLike>(&self, session: &S) -> Option<(f64, f64)> {
        match self.try_sample_ram(session) {
            Ok(v) => v,
            Err(e) => {
                debug!(host = %self.host_name, error = %e, "ram sample unavailable");
                None
            }
        }
    }

    fn try_sample_ram<S: SessionLike>(&self, session: &S) -> Result<Option<(f64, f64)>, SupervisorError> {
        let (_, stdout, _) = session
            .run_short("cat /proc/meminfo", RAM_TIMEOUT)
            .map_err(|e| SupervisorError::MetricsError(e.to_string()))?;
        let total_kb = parse_meminfo_field(&stdout, "MemTotal")
            .ok_or_else(|| SupervisorError::MetricsError("failed to parse MemTotal".to_string()))?;
        let available_kb = parse_meminfo_field(&stdout, "MemAvailable")
            .ok_or_else(|| SupervisorError::MetricsError("failed to parse MemAvailable".to_string()))?;
        let total_mb = total_kb / 1024.0;
        let used_mb = (total_kb - available_kb) / 1024.0;
        Ok(Some((round1(used_mb), round1(total_mb))))
    }

    fn sample_gpu<S: SessionLike>(&self, session: &S) -> Option<(f64, f64, f64)> {
        let (_, stdout, _) = session
            .run_short(
                "nvidia-smi --query-gpu=utilization.gpu,memory.used,memory.total --format=csv,noheader,nounits",
                GPU_TIMEOUT,
            )
            .ok()?;
        parse_nvidia_smi_line(&stdout)
    }
}

fn parse_proc_stat_line(stdout: &str) -> Option<(u64, u64)> {
    let line = stdout.trim().lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
    if values.len() < 5 {
        return None;
    }
    let total: u64 = values.iter().sum();
    let idle = values[3] + values[4];
    Some((total, idle))
}

fn parse_meminfo_field(stdout: &str, key: &str) -> Option<f64> {
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix(key) {
            let rest = rest.trim_start_matches(':').trim();
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                return digits.parse().ok();
            }
        }
    }
    None
}

fn parse_nvidia_smi_line(stdout: &str) -> Option<(f64, f64, f64)> {
    let line = stdout.trim().lines().next()?;
    let mut parts = line.split(',').map(|s| s.trim());
    let util: f64 = parts.next()?.parse().ok()?;
    let mem_used: f64 = parts.next()?.parse().ok()?;
    let mem_total: f64 = parts.next()?.parse().ok()?;
    Some((round1(util), round1(mem_used), round1(mem_total)))
}
