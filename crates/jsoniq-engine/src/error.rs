use core::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::name::{ENGINE_ERR_NS, ERR_NS, Name};

/// Line/column (1-based) of the construct an error or node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Location used for nodes built programmatically.
    pub const fn unknown() -> Self {
        Self { line: 0, column: 0 }
    }

    pub fn is_known(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() { write!(f, "line {}:{}", self.line, self.column) } else { write!(f, "unknown location") }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum ErrorCode {
    XPST0003, // syntax error
    XPST0008, // undeclared variable
    XPST0017, // unknown function / wrong arity
    XQST0034, // duplicate function declaration
    XQST0049, // duplicate variable declaration
    XPTY0004, // unexpected type
    XPDY0002, // absent value for an external variable
    FORG0001, // invalid value for cast
    FORG0006, // effective boolean value not defined
    FOAR0001, // division by zero
    FOAR0002, // numeric overflow
    FODC0002, // resource cannot be retrieved
    JNDY0003, // duplicate object key
    // engine specific
    JNRT0001, // iterator flow violation
    JNRT0002, // job within a job
    JNRT0003, // internal consistency
    JNRT0004, // configuration / command line
    JNRT0005, // function items cannot be serialised
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::XPST0003 => "XPST0003",
            ErrorCode::XPST0008 => "XPST0008",
            ErrorCode::XPST0017 => "XPST0017",
            ErrorCode::XQST0034 => "XQST0034",
            ErrorCode::XQST0049 => "XQST0049",
            ErrorCode::XPTY0004 => "XPTY0004",
            ErrorCode::XPDY0002 => "XPDY0002",
            ErrorCode::FORG0001 => "FORG0001",
            ErrorCode::FORG0006 => "FORG0006",
            ErrorCode::FOAR0001 => "FOAR0001",
            ErrorCode::FOAR0002 => "FOAR0002",
            ErrorCode::FODC0002 => "FODC0002",
            ErrorCode::JNDY0003 => "JNDY0003",
            ErrorCode::JNRT0001 => "JNRT0001",
            ErrorCode::JNRT0002 => "JNRT0002",
            ErrorCode::JNRT0003 => "JNRT0003",
            ErrorCode::JNRT0004 => "JNRT0004",
            ErrorCode::JNRT0005 => "JNRT0005",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    pub fn is_engine_specific(&self) -> bool {
        matches!(
            self,
            ErrorCode::JNRT0001
                | ErrorCode::JNRT0002
                | ErrorCode::JNRT0003
                | ErrorCode::JNRT0004
                | ErrorCode::JNRT0005
                | ErrorCode::Unknown
        )
    }

    /// Qualified name of the code; engine codes live in their own namespace.
    pub fn qname(&self) -> Name {
        let ns = if self.is_engine_specific() { ENGINE_ERR_NS } else { ERR_NS };
        Name::new(Some(ns), self.as_str())
    }

    /// Static errors abort compilation; everything else is raised while evaluating.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            ErrorCode::XPST0003
                | ErrorCode::XPST0008
                | ErrorCode::XPST0017
                | ErrorCode::XQST0034
                | ErrorCode::XQST0049
        )
    }

    pub fn from_code(s: &str) -> Self {
        use ErrorCode::*;
        match s.strip_prefix("err:").unwrap_or(s) {
            "XPST0003" => XPST0003,
            "XPST0008" => XPST0008,
            "XPST0017" => XPST0017,
            "XQST0034" => XQST0034,
            "XQST0049" => XQST0049,
            "XPTY0004" => XPTY0004,
            "XPDY0002" => XPDY0002,
            "FORG0001" => FORG0001,
            "FORG0006" => FORG0006,
            "FOAR0001" => FOAR0001,
            "FOAR0002" => FOAR0002,
            "FODC0002" => FODC0002,
            "JNDY0003" => JNDY0003,
            "JNRT0001" => JNRT0001,
            "JNRT0002" => JNRT0002,
            "JNRT0003" => JNRT0003,
            "JNRT0004" => JNRT0004,
            "JNRT0005" => JNRT0005,
            _ => Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub location: Option<SourceLocation>,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), location: None, source: None }
    }

    pub fn code_enum(&self) -> ErrorCode {
        self.code
    }

    /// Attach the location the error was raised from. An already recorded
    /// location is kept, so the innermost construct wins.
    pub fn at(mut self, location: SourceLocation) -> Self {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }

    /// Compose an error with a source cause.
    pub fn with_source(mut self, source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>) -> Self {
        self.source = source.into();
        self
    }

    /// Format the code as `err:LOCAL` or `jerr:LOCAL` for engine codes.
    pub fn format_code(&self) -> String {
        if self.code.is_engine_specific() { format!("jerr:{}", self.code) } else { format!("err:{}", self.code) }
    }

    pub fn undeclared_variable(name: &Name, location: SourceLocation) -> Self {
        Self::from_code(ErrorCode::XPST0008, format!("Uninitialized variable reference: ${name}")).at(location)
    }

    pub fn variable_already_exists(name: &Name, location: SourceLocation) -> Self {
        Self::from_code(ErrorCode::XQST0049, format!("Variable ${name} already exists in this scope")).at(location)
    }

    pub fn unexpected_type(msg: impl Into<String>, location: SourceLocation) -> Self {
        Self::from_code(ErrorCode::XPTY0004, msg).at(location)
    }

    /// `next()` called without a pending result.
    pub fn iterator_flow(construct: &str, location: SourceLocation) -> Self {
        Self::from_code(ErrorCode::JNRT0001, format!("Invalid next() call; no more items in {construct}")).at(location)
    }

    pub fn job_within_a_job(location: SourceLocation) -> Self {
        Self::from_code(
            ErrorCode::JNRT0002,
            "A for clause expression cannot produce a big sequence of items for a big number of tuples, \
             as this would lead to a data flow explosion.",
        )
        .at(location)
    }

    /// Violated precondition inside the engine itself.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::JNRT0003, msg)
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::FODC0002, msg)
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::JNRT0004, msg)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::resource(e.to_string()).with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::resource(format!("malformed JSON: {e}"))
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {} ({})", self.message, self.format_code())?;
        if let Some(location) = self.location.filter(SourceLocation::is_known) {
            write!(f, " at {location}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_location() {
        let err = Error::undeclared_variable(&Name::local("y"), SourceLocation::new(3, 7));
        assert_eq!(err.to_string(), "error: Uninitialized variable reference: $y (err:XPST0008) at line 3:7");
        assert!(err.code_enum().is_static());
    }

    #[test]
    fn innermost_location_wins() {
        let err = Error::internal("boom").at(SourceLocation::new(1, 1)).at(SourceLocation::new(9, 9));
        assert_eq!(err.location, Some(SourceLocation::new(1, 1)));
        assert_eq!(err.format_code(), "jerr:JNRT0003");
    }

    #[test]
    fn codes_round_trip_through_strings() {
        for code in [ErrorCode::XPTY0004, ErrorCode::JNRT0002, ErrorCode::FODC0002] {
            assert_eq!(ErrorCode::from_code(&format!("err:{code}")), code);
        }
        assert_eq!(ErrorCode::from_code("nope"), ErrorCode::Unknown);
    }
}
