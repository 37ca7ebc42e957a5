//! Configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults, YAML file, environment
//! variables prefixed `CRUCIBLE_` (nested keys separated by `__`, e.g.
//! `CRUCIBLE_ENGINE__MAX_ITERATIONS=5`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;

use crate::domain::models::Config;

pub const ENV_PREFIX: &str = "CRUCIBLE_";

/// Load configuration, optionally from an explicit file path. Without one,
/// the default locations are checked in order.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        figment = figment.merge(Yaml::file(path));
    } else {
        for candidate in default_config_paths() {
            if candidate.exists() {
                figment = figment.merge(Yaml::file(candidate));
                break;
            }
        }
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("crucible.yaml")];
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".crucible").join("config.yaml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.engine.max_iterations, 3);
        assert_eq!(config.jobs.ttl_secs, 3600);
        assert_eq!(config.provider.backend, "anthropic");
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "engine:\n  max_iterations: 9\n  stop_marker: \"<<DONE>>\"\njobs:\n  ttl_secs: 120"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.engine.max_iterations, 9);
        assert_eq!(config.engine.stop_marker, "<<DONE>>");
        assert_eq!(config.jobs.ttl_secs, 120);
        // Untouched sections keep their defaults.
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/crucible.yaml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
