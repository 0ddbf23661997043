use crate::config::{Config, LifecycleConfig, RuntimeConfig, TerminationPolicy};
use crate::error::{Error, Result};

/// Validates the runtime section
pub fn validate_runtime_config(config: &RuntimeConfig) -> Result<()> {
    if config.executable.trim().is_empty() {
        return Err(Error::ConfigInvalid(
            "runtime.executable must not be empty".to_string(),
        ));
    }

    if let Some(flag) = config.extra_flags.iter().find(|f| f.trim().is_empty()) {
        return Err(Error::ConfigInvalid(format!(
            "runtime.extra_flags contains an empty flag: {:?}",
            flag
        )));
    }

    Ok(())
}

/// Validates the lifecycle timings
pub fn validate_lifecycle_config(config: &LifecycleConfig) -> Result<()> {
    if config.confirmation_window_ms == 0 {
        return Err(Error::ConfigInvalid(
            "lifecycle.confirmation_window_ms must be greater than zero".to_string(),
        ));
    }

    if config.termination_timeout_ms == 0 {
        return Err(Error::ConfigInvalid(
            "lifecycle.termination_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if config.output_buffer_lines == 0 {
        return Err(Error::ConfigInvalid(
            "lifecycle.output_buffer_lines must be greater than zero".to_string(),
        ));
    }

    if let TerminationPolicy::Graceful { grace_period_ms } = config.termination {
        if grace_period_ms >= config.termination_timeout_ms {
            return Err(Error::ConfigInvalid(format!(
                "graceful grace_period_ms ({}) must be shorter than termination_timeout_ms ({})",
                grace_period_ms, config.termination_timeout_ms
            )));
        }
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    validate_runtime_config(&config.runtime)?;
    validate_lifecycle_config(&config.lifecycle)?;

    if config.monitor.interval_ms == 0 {
        return Err(Error::ConfigInvalid(
            "monitor.interval_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
