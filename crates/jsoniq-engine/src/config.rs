//! Runtime configuration: a flat map of `--key value` pairs with typed accessors.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

const DEFAULT_PORT: u16 = 8001;
const DEFAULT_RESULT_SIZE_CAP: usize = 200;
const DEFAULT_PARALLELISM: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfiguration {
    arguments: BTreeMap<String, String>,
}

impl RuntimeConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> RuntimeConfigurationBuilder {
        RuntimeConfigurationBuilder::default()
    }

    /// Parse alternating `--key value` arguments.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut arguments = BTreeMap::new();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            let Some(key) = arg.strip_prefix("--").filter(|k| !k.is_empty()) else {
                return Err(Error::configuration(format!("Invalid argument '{arg}': expected --key value pairs")));
            };
            let Some(value) = args.next() else {
                return Err(Error::configuration(format!("Missing value for argument --{key}")));
            };
            arguments.insert(key.to_string(), value.as_ref().to_string());
        }
        tracing::debug!(count = arguments.len(), "parsed runtime configuration");
        Ok(Self { arguments })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).map(String::as_str)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true"))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::configuration(format!("Invalid value '{raw}' for --{key}"))),
        }
    }

    pub fn port(&self) -> Result<u16> {
        self.parsed("port", DEFAULT_PORT)
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.get("output-path").map(PathBuf::from)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.get("log-path").map(PathBuf::from)
    }

    pub fn query_path(&self) -> Option<PathBuf> {
        self.get("query-path").map(PathBuf::from)
    }

    /// Existing output may only be replaced with `--overwrite yes`.
    pub fn overwrite(&self) -> bool {
        self.get("overwrite") == Some("yes")
    }

    pub fn show_error_info(&self) -> bool {
        self.flag("show-error-info")
    }

    /// Maximum number of items returned for a query; `0` disables the cap.
    pub fn result_size_cap(&self) -> Result<usize> {
        self.parsed("result-size", DEFAULT_RESULT_SIZE_CAP)
    }

    pub fn print_iterator_tree(&self) -> bool {
        self.flag("print-iterator-tree")
    }

    /// Value given on the command line for an external variable, under
    /// `--variable:<name>`.
    pub fn external_variable_value(&self, name: &str) -> Option<&str> {
        self.get(&format!("variable:{name}"))
    }

    /// Number of partitions distributed collections are split into.
    pub fn parallelism(&self) -> Result<usize> {
        let parallelism = self.parsed("parallelism", DEFAULT_PARALLELISM)?;
        if parallelism == 0 {
            return Err(Error::configuration("--parallelism must be at least 1"));
        }
        Ok(parallelism)
    }
}

#[derive(Debug, Default)]
pub struct RuntimeConfigurationBuilder {
    arguments: BTreeMap<String, String>,
}

impl RuntimeConfigurationBuilder {
    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.arguments.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn result_size_cap(self, cap: usize) -> Self {
        self.set("result-size", cap.to_string())
    }

    #[must_use]
    pub fn parallelism(self, partitions: usize) -> Self {
        self.set("parallelism", partitions.to_string())
    }

    #[must_use]
    pub fn variable(self, name: &str, value: impl Into<String>) -> Self {
        self.set(&format!("variable:{name}"), value)
    }

    pub fn build(self) -> RuntimeConfiguration {
        RuntimeConfiguration { arguments: self.arguments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use rstest::rstest;

    #[test]
    fn defaults_apply_without_arguments() {
        let config = RuntimeConfiguration::new();
        assert_eq!(config.port().unwrap(), 8001);
        assert_eq!(config.result_size_cap().unwrap(), 200);
        assert_eq!(config.parallelism().unwrap(), 4);
        assert!(!config.overwrite());
        assert!(config.output_path().is_none());
    }

    #[test]
    fn parses_key_value_pairs() {
        let config = RuntimeConfiguration::from_args([
            "--port",
            "9000",
            "--overwrite",
            "yes",
            "--variable:input",
            "data.json",
            "--result-size",
            "5",
        ])
        .unwrap();
        assert_eq!(config.port().unwrap(), 9000);
        assert!(config.overwrite());
        assert_eq!(config.external_variable_value("input"), Some("data.json"));
        assert_eq!(config.result_size_cap().unwrap(), 5);
    }

    #[rstest]
    #[case(&["port", "1"])]
    #[case(&["--port"])]
    #[case(&["--", "x"])]
    fn malformed_arguments_are_rejected(#[case] args: &[&str]) {
        let err = RuntimeConfiguration::from_args(args).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::JNRT0004);
    }

    #[test]
    fn invalid_numbers_are_configuration_errors() {
        let config = RuntimeConfiguration::builder().set("port", "high").parallelism(0).build();
        assert_eq!(config.port().unwrap_err().code_enum(), ErrorCode::JNRT0004);
        assert_eq!(config.parallelism().unwrap_err().code_enum(), ErrorCode::JNRT0004);
    }

    #[test]
    fn overwrite_requires_literal_yes() {
        let config = RuntimeConfiguration::builder().set("overwrite", "true").build();
        assert!(!config.overwrite());
    }
}
