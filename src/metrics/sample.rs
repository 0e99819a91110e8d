/// One point-in-time resource reading for a single host. Any field may be
/// absent if the host did not provide it (no `nvidia-smi`, parse failure, or
/// no CPU baseline yet).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub host_name: String,
    pub timestamp_s: i64,
    pub cpu_pct: Option<f64>,
    pub ram_used_mb: Option<f64>,
    pub ram_total_mb: Option<f64>,
    pub gpu_util_pct: Option<f64>,
    pub gpu_mem_used_mb: Option<f64>,
    pub gpu_mem_total_mb: Option<f64>,
}

impl Sample {
    pub fn empty(host_name: impl Into<String>, timestamp_s: i64) -> Self {
        Self {
            host_name: host_name.into(),
            timestamp_s,
            cpu_pct: None,
            ram_used_mb: None,
            ram_total_mb: None,
            gpu_util_pct: None,
            gpu_mem_used_mb: None,
            gpu_mem_total_mb: None,
        }
    }
}

/// Rounds to one decimal place, matching the original's `round(x, 1)`.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
