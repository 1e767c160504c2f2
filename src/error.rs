use std::time::Duration;

use crate::{api::Problem, order::AuthorizationReport};

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while talking to an ACME server.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Network-level failure (connect, TLS, read timeout).
    ///
    /// These are worth retrying by the caller.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a problem document.
    #[error("ACME server returned {0}")]
    Protocol(Problem),

    /// A challenge or authorization reached a terminal state other than `valid`.
    #[error("validation of {identifier} ended as {status}{}", fmt_problem(.problem))]
    Validation {
        identifier: String,
        status: String,
        problem: Option<Problem>,
    },

    /// None of the offered challenges has a registered solver.
    #[error("no solver registered for any challenge offered for {identifier} (offered: {offered:?})")]
    UnsupportedChallenge {
        identifier: String,
        offered: Vec<String>,
    },

    /// A proof provider failed to present or clean up a proof.
    #[error("proof provider {provider} failed for {identifier}: {cause:#}")]
    Provider {
        provider: String,
        identifier: String,
        cause: eyre::Report,
    },

    /// A polling loop or the propagation self-check ran out of time.
    #[error("{operation} did not complete within {budget:?}")]
    Timeout { operation: String, budget: Duration },

    /// A response body exceeded the configured ceiling.
    #[error("response body from {url} exceeds {limit} bytes")]
    SizeLimit { url: String, limit: usize },

    /// The operation was cancelled through a [`CancelToken`](crate::CancelToken).
    #[error("operation cancelled")]
    Cancelled,

    /// One or more identifiers of an order could not be authorized.
    #[error("{0}")]
    Authorizations(AuthorizationReport),

    /// The order itself became `invalid`, or is not in a state that allows the request.
    #[error("order {url} is {status}{}", fmt_problem(.problem))]
    Order {
        url: String,
        status: String,
        problem: Option<Problem>,
    },

    /// The CSR names don't match the identifiers of the order.
    #[error("CSR names {found:?} don't match order identifiers {expected:?}")]
    CsrMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// A header required by the protocol was absent.
    #[error("response from {url} is missing the {header} header")]
    MissingHeader { url: String, header: &'static str },

    /// A response body was not the JSON we expected.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Key, CSR, or encoding failures.
    #[error("{0:#}")]
    Other(eyre::Report),
}

impl Error {
    /// Returns true if a later attempt at the same request may succeed.
    ///
    /// Network failures and server-side (5xx) problems are transient. Everything else is a
    /// definitive answer.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::Protocol(problem) => problem.is_server_error(),
            _ => false,
        }
    }

    /// Returns the server problem document carried by this error, if any.
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Error::Protocol(problem) => Some(problem),
            Error::Validation { problem, .. } | Error::Order { problem, .. } => problem.as_ref(),
            _ => None,
        }
    }
}

impl From<eyre::Report> for Error {
    fn from(err: eyre::Report) -> Self {
        Error::Other(err)
    }
}

impl From<Problem> for Error {
    fn from(problem: Problem) -> Self {
        Error::Protocol(problem)
    }
}

fn fmt_problem(problem: &Option<Problem>) -> String {
    match problem {
        Some(problem) => format!(": {problem}"),
        None => String::new(),
    }
}
