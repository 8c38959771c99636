//! Environment overrides
//!
//! Deployments configure the install layout and proxy credentials through
//! environment variables (usually a `.env` file loaded by `dotenvy`). These
//! take precedence over the TOML file.

use crate::config::types::Config;
use crate::ConfigError;
use std::path::PathBuf;

pub const ENV_HOME: &str = "LEAKWATCH_HOME";
pub const ENV_DB_DIR: &str = "DB_DIR";
pub const ENV_TMP_DIR: &str = "TMP_DIR";
pub const ENV_IMAGES_DIR: &str = "IMAGES_DIR";
pub const ENV_LOGS_DIR: &str = "LOGS_DIR";
pub const ENV_PROXY: &str = "TOR_PROXY_SERVER";
pub const ENV_CONTROL_PASSWORD: &str = "TOR_PASSWORD";
pub const ENV_CONTROL_PORT: &str = "TOR_CONTROL_PORT";
pub const ENV_INTERVAL_HOURS: &str = "SCRAPE_INTERVAL_HOURS";
pub const ENV_SKIP_FAVICON: &str = "SKIP_FAVICON_DOWNLOAD";

/// Applies environment overrides read through `lookup`
///
/// Sub-directory variables are always relative to the install home; a
/// leading `/` is stripped so `DB_DIR=/db` means `<home>/db`.
///
/// # Arguments
///
/// * `config` - Configuration to update in place
/// * `lookup` - Variable source, usually `std::env::var`
///
/// # Returns
///
/// * `Ok(())` - All present variables applied
/// * `Err(ConfigError)` - A variable held an unusable value
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(home) = lookup(ENV_HOME) {
        config.paths.home = PathBuf::from(home);
    }

    if let Some(dir) = lookup(ENV_DB_DIR) {
        config.paths.db_dir = home_relative(&dir);
    }
    if let Some(dir) = lookup(ENV_TMP_DIR) {
        config.paths.tmp_dir = home_relative(&dir);
    }
    if let Some(dir) = lookup(ENV_IMAGES_DIR) {
        config.paths.images_dir = home_relative(&dir);
    }
    if let Some(dir) = lookup(ENV_LOGS_DIR) {
        config.paths.logs_dir = home_relative(&dir);
    }

    if let Some(proxy) = lookup(ENV_PROXY) {
        let proxy = proxy.trim();
        config.proxy.address = if proxy.is_empty() || proxy.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(proxy.to_string())
        };
    }

    if let Some(password) = lookup(ENV_CONTROL_PASSWORD) {
        config.proxy.control_password = Some(password).filter(|p| !p.is_empty());
    }

    if let Some(port) = lookup(ENV_CONTROL_PORT) {
        config.proxy.control_port = parse_number(ENV_CONTROL_PORT, &port)?;
    }

    if let Some(hours) = lookup(ENV_INTERVAL_HOURS) {
        config.scheduler.interval_hours = parse_number(ENV_INTERVAL_HOURS, &hours)?;
    }

    if let Some(flag) = lookup(ENV_SKIP_FAVICON) {
        config.harvest.skip_favicon_download = parse_flag(ENV_SKIP_FAVICON, &flag)?;
    }

    Ok(())
}

/// Applies overrides from the process environment
pub fn apply_process_env(config: &mut Config) -> Result<(), ConfigError> {
    apply_env_overrides(config, |name| std::env::var(name).ok())
}

fn home_relative(value: &str) -> PathBuf {
    PathBuf::from(value.trim().trim_start_matches('/'))
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_no_variables_keeps_defaults() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, lookup_from(&[])).unwrap();
        assert_eq!(
            config.proxy.address.as_deref(),
            Some("socks5h://127.0.0.1:9050")
        );
        assert!(config.harvest.skip_favicon_download);
    }

    #[test]
    fn test_directories_are_home_relative() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            lookup_from(&[(ENV_HOME, "/opt/leakwatch"), (ENV_DB_DIR, "/db"), (ENV_TMP_DIR, "scratch")]),
        )
        .unwrap();

        assert_eq!(config.paths.db_dir(), PathBuf::from("/opt/leakwatch/db"));
        assert_eq!(config.paths.tmp_dir(), PathBuf::from("/opt/leakwatch/scratch"));
        assert_eq!(
            config.paths.registry_file(),
            PathBuf::from("/opt/leakwatch/db/groups.json")
        );
    }

    #[test]
    fn test_proxy_override_and_disable() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, lookup_from(&[(ENV_PROXY, "socks5://10.0.0.2:9050")]))
            .unwrap();
        assert_eq!(config.proxy.address.as_deref(), Some("socks5://10.0.0.2:9050"));

        apply_env_overrides(&mut config, lookup_from(&[(ENV_PROXY, "none")])).unwrap();
        assert!(config.proxy.address.is_none());
    }

    #[test]
    fn test_numeric_overrides() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            lookup_from(&[(ENV_INTERVAL_HOURS, "12"), (ENV_CONTROL_PORT, "9151")]),
        )
        .unwrap();
        assert_eq!(config.scheduler.interval_hours, 12);
        assert_eq!(config.proxy.control_port, 9151);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut config = Config::default();
        let result = apply_env_overrides(&mut config, lookup_from(&[(ENV_INTERVAL_HOURS, "six")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_favicon_flag() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, lookup_from(&[(ENV_SKIP_FAVICON, "0")])).unwrap();
        assert!(!config.harvest.skip_favicon_download);

        let result = apply_env_overrides(&mut config, lookup_from(&[(ENV_SKIP_FAVICON, "maybe")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_password_clears() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, lookup_from(&[(ENV_CONTROL_PASSWORD, "")])).unwrap();
        assert!(config.proxy.control_password.is_none());

        apply_env_overrides(&mut config, lookup_from(&[(ENV_CONTROL_PASSWORD, "hunter2")])).unwrap();
        assert_eq!(config.proxy.control_password.as_deref(), Some("hunter2"));
    }
}
