//! Semantic validation of parsed configuration values.

use anyhow::{bail, Result};

use crate::config::types::Config;

/// Validate a parsed configuration.
/// Returns `Ok(())` if valid, `Err` listing all validation failures if not.
///
/// # Errors
///
/// Returns an error enumerating every problem found.
pub fn validate_config(config: &Config) -> Result<()> {
    let mut errors = Vec::new();

    if config.window.width_minutes < 1 {
        errors.push(format!(
            "window.width_minutes must be >= 1, got {}",
            config.window.width_minutes
        ));
    }
    if config.heartbeat.cadence_minutes < 1 {
        errors.push(format!(
            "heartbeat.cadence_minutes must be >= 1, got {}",
            config.heartbeat.cadence_minutes
        ));
    }
    if config.cache.max_entries == 0 {
        errors.push("cache.max_entries must be at least 1".to_string());
    }
    if config.sim.binary.as_os_str().is_empty() {
        errors.push("sim.binary must not be empty".to_string());
    }
    if config.sim.subprocess_timeout_seconds == 0 {
        errors.push("sim.subprocess_timeout_seconds must be > 0".to_string());
    }
    if config.sim.max_pending_windows == 0 {
        errors.push("sim.max_pending_windows must be at least 1".to_string());
    }
    if config.sim.workers == 0 {
        errors.push("sim.workers must be at least 1".to_string());
    }

    let cal = &config.calibration;
    if cal.enabled {
        match &cal.param_path {
            None => errors.push("calibration.param_path is required when enabled".to_string()),
            Some(path) if path.trim().is_empty() => {
                errors.push("calibration.param_path must not be empty".to_string());
            }
            Some(_) => {}
        }
        match (cal.min_value, cal.max_value) {
            (Some(min), Some(max)) if min >= max => errors.push(format!(
                "calibration bounds inverted: min_value {min} >= max_value {max}"
            )),
            (Some(_), Some(_)) => {}
            _ => errors
                .push("calibration.min_value and .max_value are required when enabled".to_string()),
        }
        if cal.linspace_points < 2 {
            errors.push("calibration.linspace_points must be at least 2".to_string());
        }
        if cal.max_parallel_workers == 0 {
            errors.push("calibration.max_parallel_workers must be at least 1".to_string());
        }
        if cal.mape_window_minutes < 1 {
            errors.push("calibration.mape_window_minutes must be >= 1".to_string());
        }
        if cal.improvement_epsilon < 0.0 {
            errors.push("calibration.improvement_epsilon must be >= 0".to_string());
        }
    }

    if !errors.is_empty() {
        bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config_str;

    fn base_yaml() -> &'static str {
        "sim:\n  binary: /opt/opendc/run\n"
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse_config_str(base_yaml()).unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn zero_width_rejected() {
        let yaml = format!("{}window:\n  width_minutes: 0\n", base_yaml());
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("width_minutes"));
    }

    #[test]
    fn enabled_calibration_requires_path_and_bounds() {
        let yaml = format!("{}calibration:\n  enabled: true\n", base_yaml());
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("param_path"));
        assert!(err.contains("min_value"));
    }

    #[test]
    fn inverted_bounds_rejected() {
        let yaml = format!(
            "{}calibration:\n  enabled: true\n  param_path: a.b\n  min_value: 0.9\n  max_value: 0.1\n",
            base_yaml()
        );
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("inverted"));
    }

    #[test]
    fn all_errors_reported_together() {
        let yaml = "window:\n  width_minutes: 0\ncache:\n  max_entries: 0\nsim:\n  binary: /x\n  workers: 0\n";
        let config = parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("width_minutes"));
        assert!(err.contains("max_entries"));
        assert!(err.contains("workers"));
    }
}
