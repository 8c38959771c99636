use crate::config::types::{
    Config, ExtractConfig, FleetConfig, HarvestConfig, ProxyConfig, SchedulerConfig,
};
use crate::ConfigError;
use url::Url;

const PROXY_SCHEMES: &[&str] = &["socks5", "socks5h", "socks4", "http", "https"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_proxy_config(&config.proxy)?;
    validate_harvest_config(&config.harvest)?;
    validate_fleet_config(&config.fleet)?;
    validate_scheduler_config(&config.scheduler)?;
    validate_extract_config(&config.extract)?;

    if config.browser.navigation_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "navigation_timeout_secs must be > 0".to_string(),
        ));
    }

    if !config.capture.command.is_empty() && config.capture.command[0].trim().is_empty() {
        return Err(ConfigError::Validation(
            "capture command program cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates proxy configuration
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    if let Some(address) = &config.address {
        let url = Url::parse(address)
            .map_err(|e| ConfigError::InvalidProxy(format!("'{}': {}", address, e)))?;

        if !PROXY_SCHEMES.contains(&url.scheme()) {
            return Err(ConfigError::InvalidProxy(format!(
                "'{}': unsupported scheme '{}'",
                address,
                url.scheme()
            )));
        }

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidProxy(format!(
                "'{}': missing host",
                address
            )));
        }
    }

    if config.control_port == 0 {
        return Err(ConfigError::Validation(
            "control_port must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates harvest configuration
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_fetches < 1 || config.max_concurrent_fetches > 100 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_fetches must be between 1 and 100, got {}",
            config.max_concurrent_fetches
        )));
    }

    if config.offline_disable_days < 1 {
        return Err(ConfigError::Validation(format!(
            "offline_disable_days must be >= 1, got {}",
            config.offline_disable_days
        )));
    }

    if config.direct_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "direct_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.max_redirects > 20 {
        return Err(ConfigError::Validation(format!(
            "max_redirects must be <= 20, got {}",
            config.max_redirects
        )));
    }

    Ok(())
}

/// Validates fleet stage limits
fn validate_fleet_config(config: &FleetConfig) -> Result<(), ConfigError> {
    if config.harvest_timeout_secs == 0 || config.extract_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fleet stage timeouts must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates scheduler timing
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.interval_hours < 1 {
        return Err(ConfigError::Validation(format!(
            "interval_hours must be >= 1, got {}",
            config.interval_hours
        )));
    }

    if config.periodic_interval_minutes < 1 {
        return Err(ConfigError::Validation(format!(
            "periodic_interval_minutes must be >= 1, got {}",
            config.periodic_interval_minutes
        )));
    }

    if config.poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "poll_interval_secs must be > 0".to_string(),
        ));
    }

    if config.harvest_timeout_secs == 0 || config.extract_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "scheduler stage timeouts must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates the extraction command
fn validate_extract_config(config: &ExtractConfig) -> Result<(), ConfigError> {
    match config.command.first() {
        None => Err(ConfigError::Validation(
            "extract command cannot be empty".to_string(),
        )),
        Some(program) if program.trim().is_empty() => Err(ConfigError::Validation(
            "extract command program cannot be empty".to_string(),
        )),
        Some(_) => Ok(()),
    }
}
