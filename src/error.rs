use thiserror::Error;

/// Failures that can abort the evaluation of an ESI document.
///
/// Only fragment failures propagate: a fetch that exhausts `src` and `alt`
/// without `onerror="continue"` rejects the whole evaluation unless an
/// enclosing `<esi:try>` catches it. Parsing and variable-resolution edge
/// cases never surface here; they degrade to empty strings or pass-through.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// A fragment response came back with a status code >= 400.
    #[error("unexpected status `{1}` for fragment `{0}`")]
    UnexpectedStatus(String, u16),

    /// The fragment request failed at the transport level before a
    /// response was available (DNS, connection refused, timeout).
    #[error("fragment request to `{0}` failed: {1}")]
    RequestFailed(String, String),

    /// A directive was missing an attribute it cannot work without, and
    /// the configured policy says that is fatal.
    #[error("missing required attribute `{1}` in `<{0}>`")]
    MissingRequiredAttribute(String, String),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
