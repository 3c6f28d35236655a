//! Centralized path resolution for stackplan
//!
//! # Environment Variables
//!
//! - `STACKPLAN_CONFIG_DIR` - Override config directory (holds `config.toml`)
//! - `STACKPLAN_STATE_DIR` - Override state directory (state and lock files)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `STACKPLAN_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/stackplan` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\stackplan`
//!    - macOS/Linux: `~/.config/stackplan`
//!
//! For state_dir():
//! 1. `STACKPLAN_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/stackplan` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\stackplan`
//!    - macOS/Linux: `~/.local/state/stackplan`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "STACKPLAN_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "STACKPLAN_STATE_DIR";

const APP_DIR: &str = "stackplan";

/// Get the stackplan config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Using config dir from {}: {}", ENV_CONFIG_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP_DIR);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join(APP_DIR));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP_DIR);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the stackplan state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP_DIR);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            return Ok(local_app_data.join(APP_DIR));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP_DIR);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as-is.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/stacks/erp.toml");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("stacks").join("erp.toml"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/srv/state"), PathBuf::from("/srv/state"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$STACKPLAN_NONEXISTENT_VAR_98765/file");
        assert_eq!(
            result,
            PathBuf::from("/path/$STACKPLAN_NONEXISTENT_VAR_98765/file")
        );
    }

    #[test]
    fn test_dirs_resolve() {
        // Whatever the environment, both directories resolve to something
        assert!(config_dir().is_ok());
        assert!(state_dir().is_ok());
    }
}
