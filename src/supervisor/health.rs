use crate::config::model::HealthCheckConfig;
use crate::metrics::sample::Sample;

/// Why the health-check evaluator wants a force-restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthViolation {
    CpuLow,
    GpuLow,
}

impl HealthViolation {
    pub fn reason(self) -> &'static str {
        match self {
            HealthViolation::CpuLow => "CPU usage too low",
            HealthViolation::GpuLow => "GPU usage too low",
        }
    }
}

/// Tracks how long CPU/GPU utilisation has stayed below its configured
/// threshold, forcing a restart once it stays down for `duration_s`. Only
/// evaluated while the Supervisor is Running; any transition out of Running
/// must call [`HealthEvaluator::reset`].
#[derive(Debug, Default)]
pub struct HealthEvaluator {
    cpu_below_since: Option<i64>,
    gpu_below_since: Option<i64>,
}

impl HealthEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.cpu_below_since = None;
        self.gpu_below_since = None;
    }

    pub fn evaluate(
        &mut self,
        config: &HealthCheckConfig,
        sample: &Sample,
        now_s: i64,
    ) -> Option<HealthViolation> {
        if !config.enabled {
            return None;
        }

        if let Some(violation) = Self::track(
            &mut self.cpu_below_since,
            config.cpu.enabled,
            sample.cpu_pct,
            config.cpu.threshold_pct,
            config.cpu.duration_s,
            now_s,
            HealthViolation::CpuLow,
        ) {
            self.reset();
            return Some(violation);
        }

        if let Some(violation) = Self::track(
            &mut self.gpu_below_since,
            config.gpu.enabled,
            sample.gpu_util_pct,
            config.gpu.threshold_pct,
            config.gpu.duration_s,
            now_s,
            HealthViolation::GpuLow,
        ) {
            self.reset();
            return Some(violation);
        }

        None
    }

    #[allow(clippy::too_many_arguments)]
    fn track(
        since: &mut Option<i64>,
        check_enabled: bool,
        value: Option<f64>,
        threshold_pct: f64,
        duration_s: u64,
        now_s: i64,
        violation: HealthViolation,
    ) -> Option<HealthViolation> {
        if !check_enabled {
            return None;
        }

        let value = value?;
        if value < threshold_pct {
            let started = *since.get_or_insert(now_s);
            if now_s - started >= duration_s as i64 {
                return Some(violation);
            }
        } else if since.is_some() {
            *since = None;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{CheckConfig, HealthCheckConfig};

    fn sample_with_cpu(cpu: Option<f64>) -> Sample {
        let mut s = Sample::empty("h1", 0);
        s.cpu_pct = cpu;
        s
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            cpu: CheckConfig {
                enabled: true,
                threshold_pct: 10.0,
                duration_s: 100,
            },
            gpu: CheckConfig {
                enabled: false,
                threshold_pct: 10.0,
                duration_s: 100,
            },
        }
    }

    #[test]
    fn no_violation_before_duration_elapses() {
        let cfg = config();
        let mut eval = HealthEvaluator::new();
        assert_eq!(eval.evaluate(&cfg, &sample_with_cpu(Some(1.0)), 0), None);
        assert_eq!(eval.evaluate(&cfg, &sample_with_cpu(Some(1.0)), 50), None);
    }

    #[test]
    fn violation_once_duration_elapses() {
        let cfg = config();
        let mut eval = HealthEvaluator::new();
        eval.evaluate(&cfg, &sample_with_cpu(Some(1.0)), 0);
        let violation = eval.evaluate(&cfg, &sample_with_cpu(Some(1.0)), 100);
        assert_eq!(violation, Some(HealthViolation::CpuLow));
    }

    #[test]
    fn recovery_clears_timestamp() {
        let cfg = config();
        let mut eval = HealthEvaluator::new();
        eval.evaluate(&cfg, &sample_with_cpu(Some(1.0)), 0);
        eval.evaluate(&cfg, &sample_with_cpu(Some(50.0)), 50);
        let violation = eval.evaluate(&cfg, &sample_with_cpu(Some(1.0)), 200);
        assert_eq!(violation, None);
    }

    #[test]
    fn absent_sample_value_is_ignored() {
        let cfg = config();
        let mut eval = HealthEvaluator::new();
        eval.evaluate(&cfg, &sample_with_cpu(Some(1.0)), 0);
        assert_eq!(eval.evaluate(&cfg, &sample_with_cpu(None), 200), None);
    }

    /// Scenario: sustained low CPU forces a restart. Threshold 50%, duration
    /// 3 s, three consecutive 1 s-spaced samples at 20/25/30%.
    #[test]
    fn three_consecutive_low_cpu_samples_force_a_restart() {
        let cfg = HealthCheckConfig {
            enabled: true,
            cpu: CheckConfig {
                enabled: true,
                threshold_pct: 50.0,
                duration_s: 3,
            },
            gpu: CheckConfig {
                enabled: false,
                threshold_pct: 50.0,
                duration_s: 3,
            },
        };
        let mut eval = HealthEvaluator::new();
        assert_eq!(eval.evaluate(&cfg, &sample_with_cpu(Some(20.0)), 0), None);
        assert_eq!(eval.evaluate(&cfg, &sample_with_cpu(Some(25.0)), 1), None);
        let violation = eval.evaluate(&cfg, &sample_with_cpu(Some(30.0)), 3);
        assert_eq!(violation, Some(HealthViolation::CpuLow));
    }
}
