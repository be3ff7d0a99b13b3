//! Re-emission of dynamic configuration as YAML.
//!
//! Used by tooling that rewrites `dynamic.yaml` in place (the watcher picks
//! the change up like any other edit). The target directory must already
//! exist; this module never creates directories.

use std::fs;
use std::path::Path;

use crate::dynamic::DynamicConfig;
use crate::error::ConfigError;

pub fn write_config(
    path: &Path,
    config: &DynamicConfig,
    header_comment: &str,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            return Err(ConfigError::MissingDirectory(dir.to_path_buf()));
        }
    }

    let body = serde_yaml::to_string(config)?;
    let contents = if header_comment.is_empty() {
        body
    } else {
        format!("{header_comment}\n\n{body}")
    };

    fs::write(path, contents).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}
