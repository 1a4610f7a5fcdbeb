//! Layered loading of notifier settings from files and environment.

use crate::error::{Result, WatcherError};
use config::{Environment, File};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Loads settings from files and environment variables.
///
/// Sources are merged in the order they were added; environment variables
/// are applied last and override every file.
pub(crate) struct ConfigLoader {
    files: Vec<PathBuf>,
    env: Option<(String, String)>,
}

impl ConfigLoader {
    pub(crate) fn new() -> Self {
        Self {
            files: Vec::new(),
            env: None,
        }
    }

    pub(crate) fn add_file(&mut self, path: PathBuf) {
        self.files.push(path);
    }

    pub(crate) fn set_env(&mut self, prefix: String, separator: String) {
        self.env = Some((prefix, separator));
    }

    /// Load and merge all sources, starting from `defaults`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A file has an unsupported extension or does not exist
    /// - A source cannot be parsed
    /// - The merged result does not deserialize into `T`
    pub(crate) fn load<T>(&self, defaults: &[(&str, &str)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut builder = config::Config::builder();

        for (key, value) in defaults {
            builder = builder.set_default(*key, *value)?;
        }

        for path in &self.files {
            validate_extension(path)?;
            if !path.exists() {
                return Err(WatcherError::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        if let Some((prefix, separator)) = &self.env {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator(separator)
                    .try_parsing(true),
            );
        }

        let merged = builder
            .build()
            .map_err(|e| WatcherError::Config(format!("Failed to build configuration: {}", e)))?;

        merged.try_deserialize::<T>().map_err(|e| {
            WatcherError::Config(format!("Failed to deserialize configuration: {}", e))
        })
    }

    /// Source names in merge order.
    pub(crate) fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .iter()
            .map(|p| format!("file:{}", p.display()))
            .collect();
        if let Some((prefix, _)) = &self.env {
            names.push(format!("env:{}_*", prefix));
        }
        names
    }
}

fn validate_extension(path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| {
            WatcherError::Config(format!(
                "Unable to determine file format for: {}",
                path.display()
            ))
        })?;

    match extension {
        "yaml" | "yml" | "toml" | "json" => Ok(()),
        _ => Err(WatcherError::Config(format!(
            "Unsupported file extension: {}. Supported: .yaml, .yml, .toml, .json",
            extension
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Debug, Deserialize, PartialEq)]
    struct TestSettings {
        endpoint: String,
        subject: String,
    }

    #[test]
    fn test_validate_extension() {
        assert!(validate_extension(Path::new("watcher.yaml")).is_ok());
        assert!(validate_extension(Path::new("watcher.yml")).is_ok());
        assert!(validate_extension(Path::new("watcher.toml")).is_ok());
        assert!(validate_extension(Path::new("watcher.json")).is_ok());
        assert!(validate_extension(Path::new("watcher.txt")).is_err());
        assert!(validate_extension(Path::new("watcher")).is_err());
    }

    #[test]
    fn test_defaults_only() {
        let loader = ConfigLoader::new();
        let settings: TestSettings = loader
            .load(&[("endpoint", "mem://a"), ("subject", "policy.updated")])
            .unwrap();
        assert_eq!(settings.endpoint, "mem://a");
        assert_eq!(settings.subject, "policy.updated");
    }

    #[test]
    fn test_later_file_overrides_earlier() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("base.yaml");
        let prod = temp_dir.path().join("prod.toml");
        fs::write(&base, "endpoint: mem://base\nsubject: base.subject\n").unwrap();
        fs::write(&prod, "endpoint = \"mem://prod\"\n").unwrap();

        let mut loader = ConfigLoader::new();
        loader.add_file(base);
        loader.add_file(prod);

        let settings: TestSettings = loader.load(&[]).unwrap();
        assert_eq!(settings.endpoint, "mem://prod");
        assert_eq!(settings.subject, "base.subject");
    }

    #[test]
    fn test_missing_file() {
        let mut loader = ConfigLoader::new();
        loader.add_file(PathBuf::from("/nonexistent/watcher.yaml"));
        let result: Result<TestSettings> = loader.load(&[]);
        assert!(matches!(result, Err(WatcherError::Config(_))));
    }

    #[test]
    fn test_source_names() {
        let mut loader = ConfigLoader::new();
        loader.add_file(PathBuf::from("a.yaml"));
        loader.add_file(PathBuf::from("b.json"));
        loader.set_env("POLICY".to_string(), "__".to_string());

        assert_eq!(
            loader.source_names(),
            vec!["file:a.yaml", "file:b.json", "env:POLICY_*"]
        );
    }
}
