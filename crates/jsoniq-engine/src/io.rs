//! Access to input files for the built-in input functions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use url::Url;

use crate::error::{Error, Result};

/// Source of input documents. Implementations report every failure as
/// `FODC0002` with the offending location in the message.
pub trait FileReader: Send + Sync + fmt::Debug {
    fn read_to_string(&self, location: &Url) -> Result<String>;

    /// Non-blank lines of the resource.
    fn read_lines(&self, location: &Url) -> Result<Vec<String>> {
        Ok(self.read_to_string(location)?.lines().filter(|l| !l.trim().is_empty()).map(str::to_string).collect())
    }
}

/// Resolve `location` against `base`. Plain paths are interpreted relative to
/// the working directory.
pub fn resolve_uri(base: Option<&Url>, location: &str) -> Result<Url> {
    if location.contains(['*', '?']) {
        return Err(Error::resource(format!("Wildcards are not supported in input locations: {location}")));
    }
    match Url::parse(location) {
        Ok(url) if url.scheme().len() > 1 => Ok(url),
        // single-letter schemes are Windows drive letters
        Ok(_) | Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base.join(location).map_err(|e| malformed(location, e)),
            None => file_url(location),
        },
        Err(e) => Err(malformed(location, e)),
    }
}

fn file_url(location: &str) -> Result<Url> {
    let path = std::path::Path::new(location);
    let absolute = if path.is_absolute() { path.to_path_buf() } else { std::env::current_dir()?.join(path) };
    Url::from_file_path(&absolute).map_err(|()| Error::resource(format!("Malformed file location: {location}")))
}

fn malformed(location: &str, e: url::ParseError) -> Error {
    Error::resource(format!("Malformed URI: {location}"))
        .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
}

/// Reads `file:` URLs from the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileReader;

impl FileReader for LocalFileReader {
    fn read_to_string(&self, location: &Url) -> Result<String> {
        if location.scheme() != "file" {
            return Err(Error::resource(format!("Unsupported file system scheme '{}' in {location}", location.scheme())));
        }
        let path = location.to_file_path().map_err(|()| Error::resource(format!("Malformed file location: {location}")))?;
        tracing::debug!(path = %path.display(), "reading input file");
        std::fs::read_to_string(&path).map_err(|e| {
            let message = if e.kind() == std::io::ErrorKind::NotFound {
                format!("Resource not found: {location}")
            } else {
                format!("Cannot read {location}: {e}")
            };
            Error::resource(message).with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
        })
    }
}

/// In-memory documents keyed by URL, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryFileReader {
    files: RwLock<BTreeMap<String, String>>,
}

impl MemoryFileReader {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(self, location: &str, content: impl Into<String>) -> Self {
        self.insert(location, content);
        self
    }

    pub fn insert(&self, location: &str, content: impl Into<String>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(location.to_string(), content.into());
        }
    }
}

impl FileReader for MemoryFileReader {
    fn read_to_string(&self, location: &Url) -> Result<String> {
        let files = self.files.read().map_err(|_| Error::internal("memory file table is poisoned"))?;
        files.get(location.as_str()).cloned().ok_or_else(|| Error::resource(format!("Resource not found: {location}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Write;

    #[test]
    fn relative_locations_resolve_against_base() {
        let base = Url::parse("file:///data/queries/").unwrap();
        let url = resolve_uri(Some(&base), "input.json").unwrap();
        assert_eq!(url.as_str(), "file:///data/queries/input.json");
    }

    #[test]
    fn wildcards_are_resource_errors() {
        let err = resolve_uri(None, "/tmp/*.json").unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FODC0002);
    }

    #[test]
    fn local_reader_reads_lines_and_reports_missing_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"a\": 1}}\n\n{{\"a\": 2}}").unwrap();
        let url = Url::from_file_path(file.path()).unwrap();
        assert_eq!(LocalFileReader.read_lines(&url).unwrap().len(), 2);

        let missing = Url::parse("file:///definitely/not/here.json").unwrap();
        let err = LocalFileReader.read_to_string(&missing).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FODC0002);
        assert!(err.source.is_some());
    }

    #[test]
    fn unsupported_schemes_are_rejected() {
        let err = LocalFileReader.read_to_string(&Url::parse("hdfs://cluster/x.json").unwrap()).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FODC0002);
    }

    #[test]
    fn memory_reader_serves_registered_files() {
        let reader = MemoryFileReader::new().with_file("memory:///people.json", "{}\n{}");
        let url = Url::parse("memory:///people.json").unwrap();
        assert_eq!(reader.read_lines(&url).unwrap(), vec!["{}", "{}"]);
    }
}
