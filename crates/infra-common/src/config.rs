//! Typed configuration loading
//!
//! Configuration lives in a TOML file; any key can be overridden through the
//! environment with `<PREFIX>_<SECTION>__<KEY>`, e.g.
//! `CONFMIX_SCHEDULER__WORKER_COUNT=4`.

use crate::errors::types::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load configuration from `path`, overlaying environment variables that
/// start with `env_prefix`.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>, env_prefix: &str) -> Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::Config(format!("Config file not found: {}", path.display())));
    }

    let settings = Config::builder()
        .add_source(File::from(path).format(FileFormat::Toml).required(true))
        .add_source(environment(env_prefix))
        .build()?;

    let parsed = settings.try_deserialize::<T>()?;
    tracing::debug!(path = %path.display(), "loaded configuration");
    Ok(parsed)
}

/// Parse configuration from an in-memory TOML document, with the same
/// environment overlay as [`load_config`].
pub fn parse_config<T: DeserializeOwned>(toml_source: &str, env_prefix: &str) -> Result<T> {
    let settings = Config::builder()
        .add_source(File::from_str(toml_source, FileFormat::Toml))
        .add_source(environment(env_prefix))
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}

fn environment(prefix: &str) -> Environment {
    Environment::with_prefix(prefix)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Section {
        worker_count: usize,
        #[serde(default)]
        name: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    struct Sample {
        scheduler: Section,
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[scheduler]\nworker_count = 3\nname = \"media\"").unwrap();

        let sample: Sample = load_config(file.path(), "CONFMIX_INFRA_FILE_TEST").unwrap();
        assert_eq!(sample.scheduler.worker_count, 3);
        assert_eq!(sample.scheduler.name.as_deref(), Some("media"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result: Result<Sample> = load_config("/nonexistent/confmix.toml", "CONFMIX_INFRA_MISSING");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_environment_overrides_file_value() {
        std::env::set_var("CONFMIXENVTEST_SCHEDULER__WORKER_COUNT", "9");
        let sample: Sample = parse_config("[scheduler]\nworker_count = 2\n", "CONFMIXENVTEST").unwrap();
        std::env::remove_var("CONFMIXENVTEST_SCHEDULER__WORKER_COUNT");
        assert_eq!(sample.scheduler.worker_count, 9);
    }

    #[test]
    fn test_bad_type_is_config_error() {
        let result: Result<Sample> = parse_config("[scheduler]\nworker_count = \"many\"\n", "CONFMIX_INFRA_BAD");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
