//! Uniform reporting of backend failures
//!
//! The cache layer never propagates a [`BackendError`]; it hands it to
//! [`handle_exception`], which logs it once and returns a record that callers
//! may inspect through `ConfigDb::last_failure`.

use serde::Serialize;
use std::fmt;
use tracing::error;

use crate::backend::BackendError;

/// Subsystem whose failures a call site expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureDomain {
    /// FEC hardware-access layer
    Fec,
    /// FED software
    Fed,
    /// Configuration database
    Sql,
}

impl fmt::Display for FailureDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fec => f.write_str("FEC"),
            Self::Fed => f.write_str("FED"),
            Self::Sql => f.write_str("SQL"),
        }
    }
}

/// Bucket a failure falls into, in order of precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Error of the expected domain carrying a numeric code
    DomainError,
    /// Error of the expected domain carrying only a message
    DomainMessage,
    /// Any other error with a message
    Runtime,
    /// Opaque failure
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedFailure {
    pub method: String,
    pub domain: FailureDomain,
    pub class: FailureClass,
    pub message: Option<String>,
}

impl fmt::Display for ClassifiedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.method)?;
        match &self.message {
            Some(message) => write!(f, "{:?}: {}", self.class, message),
            None => f.write_str("unknown exception"),
        }
    }
}

/// Place an error in its bucket
pub fn classify(domain: FailureDomain, err: &BackendError) -> FailureClass {
    match (domain, err) {
        (_, BackendError::Unknown) => FailureClass::Unknown,
        (FailureDomain::Fec, BackendError::FecError { code: Some(_), .. }) => {
            FailureClass::DomainError
        }
        (FailureDomain::Fec, BackendError::FecError { code: None, .. }) => {
            FailureClass::DomainMessage
        }
        (FailureDomain::Sql, BackendError::SqlError { .. }) => FailureClass::DomainError,
        (FailureDomain::Fed, BackendError::FedError(_)) => FailureClass::DomainMessage,
        _ => FailureClass::Runtime,
    }
}

/// Log a backend failure and turn it into a diagnostic record
pub fn handle_exception(
    domain: FailureDomain,
    method: &str,
    err: &BackendError,
) -> ClassifiedFailure {
    let class = classify(domain, err);
    let message = err.message();
    let text = message.as_deref().unwrap_or("");

    match class {
        FailureClass::DomainError => {
            error!(method, domain = %domain, error = %err, "{} exception thrown", domain)
        }
        FailureClass::DomainMessage => {
            error!(method, domain = %domain, "{} exception thrown with message: {}", domain, text)
        }
        FailureClass::Runtime => {
            error!(method, "Runtime error thrown with message: {}", text)
        }
        FailureClass::Unknown => error!(method, "Caught unknown exception"),
    }

    ClassifiedFailure {
        method: method.to_string(),
        domain,
        class,
        message,
    }
}
