//! Deployment verdict grading

use std::fmt;

use serde::{Deserialize, Serialize};

/// Overall grade of a deployment, ordered worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Failed,
    Degraded,
    Good,
    Excellent,
}

impl Verdict {
    /// Excellent and good are successful deployments
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Excellent | Verdict::Good)
    }

    /// Process exit code for a run ending with this verdict
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            2
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Failed => "failed",
            Verdict::Degraded => "degraded",
            Verdict::Good => "good",
            Verdict::Excellent => "excellent",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ratio thresholds for each grade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingThresholds {
    pub excellent_services: f64,
    pub excellent_endpoints: f64,
    pub good_services: f64,
    pub good_endpoints: f64,
    pub degraded_services: f64,
}

impl Default for GradingThresholds {
    fn default() -> Self {
        Self {
            excellent_services: 0.90,
            excellent_endpoints: 0.80,
            good_services: 0.70,
            good_endpoints: 0.60,
            degraded_services: 0.50,
        }
    }
}

impl GradingThresholds {
    /// Thresholds must lie in `0..=1` and tighten from degraded to excellent
    pub fn validate(&self) -> Result<(), String> {
        let all = [
            self.excellent_services,
            self.excellent_endpoints,
            self.good_services,
            self.good_endpoints,
            self.degraded_services,
        ];
        if all.iter().any(|t| !(0.0..=1.0).contains(t)) {
            return Err("grading thresholds must be within 0..=1".to_string());
        }
        if self.degraded_services > self.good_services
            || self.good_services > self.excellent_services
            || self.good_endpoints > self.excellent_endpoints
        {
            return Err("grading thresholds must not loosen from good to excellent".to_string());
        }
        Ok(())
    }
}

/// Grade a deployment from its running-service and passing-endpoint ratios.
///
/// Non-decreasing in both ratios for any thresholds accepted by
/// [`GradingThresholds::validate`].
pub fn grade(service_ratio: f64, endpoint_ratio: f64, thresholds: &GradingThresholds) -> Verdict {
    if service_ratio >= thresholds.excellent_services
        && endpoint_ratio >= thresholds.excellent_endpoints
    {
        Verdict::Excellent
    } else if service_ratio >= thresholds.good_services
        && endpoint_ratio >= thresholds.good_endpoints
    {
        Verdict::Good
    } else if service_ratio >= thresholds.degraded_services {
        Verdict::Degraded
    } else {
        Verdict::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_boundaries() {
        let t = GradingThresholds::default();
        assert_eq!(grade(0.90, 0.80, &t), Verdict::Excellent);
        assert_eq!(grade(1.0, 0.79, &t), Verdict::Good);
        assert_eq!(grade(0.70, 0.60, &t), Verdict::Good);
        assert_eq!(grade(0.70, 0.59, &t), Verdict::Degraded);
        assert_eq!(grade(0.50, 0.0, &t), Verdict::Degraded);
        assert_eq!(grade(0.49, 1.0, &t), Verdict::Failed);
    }

    #[test]
    fn test_grade_is_monotonic_in_service_ratio() {
        let t = GradingThresholds::default();
        for endpoint_step in 0..=20 {
            let endpoint_ratio = endpoint_step as f64 / 20.0;
            let mut previous = Verdict::Failed;
            for service_step in 0..=100 {
                let service_ratio = service_step as f64 / 100.0;
                let verdict = grade(service_ratio, endpoint_ratio, &t);
                assert!(
                    verdict >= previous,
                    "grade dropped at service={} endpoint={}",
                    service_ratio,
                    endpoint_ratio
                );
                previous = verdict;
            }
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Verdict::Excellent.exit_code(), 0);
        assert_eq!(Verdict::Good.exit_code(), 0);
        assert_eq!(Verdict::Degraded.exit_code(), 2);
        assert_eq!(Verdict::Failed.exit_code(), 2);
    }

    #[test]
    fn test_validate_rejects_loosening_thresholds() {
        let t = GradingThresholds {
            good_services: 0.95,
            ..GradingThresholds::default()
        };
        assert!(t.validate().is_err());
        assert!(GradingThresholds::default().validate().is_ok());
    }
}
