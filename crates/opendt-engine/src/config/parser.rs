//! Configuration loading.
//!
//! Config files may reference environment variables as `${NAME}`. Every
//! reference is resolved before the YAML is deserialized; unresolvable names
//! fail loading as a group so the operator sees all of them at once instead
//! of one per restart.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::{Captures, Regex};

use crate::config::types::Config;

static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env ref pattern"));

/// Replace every `${NAME}` reference with the value of that environment
/// variable, collecting the names that have no value.
///
/// # Errors
///
/// Fails when one or more referenced variables are unset, naming them all.
fn resolve_env_refs(raw: &str) -> Result<String> {
    let mut unresolved: Vec<String> = Vec::new();
    let resolved = ENV_REF.replace_all(raw, |caps: &Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                unresolved.push(name.to_string());
                String::new()
            }
        }
    });

    if unresolved.is_empty() {
        Ok(resolved.into_owned())
    } else {
        bail!(
            "config references unset environment variable(s): {}",
            unresolved.join(", ")
        );
    }
}

/// Load a [`Config`] from a YAML document.
///
/// # Errors
///
/// Returns an error when an environment reference is unset or the document
/// does not deserialize.
pub fn parse_config_str(raw: &str) -> Result<Config> {
    let resolved = resolve_env_refs(raw)?;
    serde_yaml::from_str(&resolved).context("invalid config YAML")
}

/// Load a [`Config`] from a file on disk.
///
/// # Errors
///
/// Returns an error when the file is unreadable or its content is invalid.
pub fn parse_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    parse_config_str(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_refs_from_environment() {
        std::env::set_var("ODT_TEST_BIN", "/opt/opendc/run");
        let resolved = resolve_env_refs("binary: ${ODT_TEST_BIN}").unwrap();
        assert_eq!(resolved, "binary: /opt/opendc/run");
        std::env::remove_var("ODT_TEST_BIN");
    }

    #[test]
    fn plain_documents_pass_through_unchanged() {
        let raw = "sim:\n  binary: /opt/opendc/run\n";
        assert_eq!(resolve_env_refs(raw).unwrap(), raw);
    }

    #[test]
    fn every_unresolved_name_is_listed() {
        let err = resolve_env_refs("a: ${ODT_NOPE_A}\nb: ${ODT_NOPE_B}\n")
            .unwrap_err()
            .to_string();
        assert!(err.contains("ODT_NOPE_A"), "got: {err}");
        assert!(err.contains("ODT_NOPE_B"), "got: {err}");
    }

    #[test]
    fn repeated_refs_resolve_everywhere() {
        std::env::set_var("ODT_TEST_DIR", "/data");
        let resolved = resolve_env_refs("x: ${ODT_TEST_DIR}\ny: ${ODT_TEST_DIR}/sub").unwrap();
        assert_eq!(resolved, "x: /data\ny: /data/sub");
        std::env::remove_var("ODT_TEST_DIR");
    }

    #[test]
    fn config_loads_with_resolved_refs() {
        std::env::set_var("ODT_TEST_OUT", "/data/runs");
        let config = parse_config_str(
            "run:\n  output_dir: ${ODT_TEST_OUT}\nsim:\n  binary: /opt/opendc/run\n",
        )
        .unwrap();
        assert_eq!(config.run.output_dir.to_str(), Some("/data/runs"));
        std::env::remove_var("ODT_TEST_OUT");
    }

    #[test]
    fn broken_yaml_is_rejected() {
        assert!(parse_config_str("sim: [not: {valid").is_err());
    }
}
