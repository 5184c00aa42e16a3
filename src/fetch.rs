use crate::error::Result;

/// The outcome of a fragment request: the response status code and the full
/// response body as text.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A successful response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }
}

/// An in-flight fragment request that can be waited on exactly once.
///
/// Waiting is the evaluator's only suspension point: the dispatcher is free
/// to start the transfer immediately and let several requests progress
/// concurrently, the evaluator will collect them in document order.
pub trait PendingFetch {
    fn wait(self: Box<Self>) -> Result<FetchResponse>;
}

impl<F> PendingFetch for F
where
    F: FnOnce() -> Result<FetchResponse>,
{
    fn wait(self: Box<Self>) -> Result<FetchResponse> {
        (*self)()
    }
}

/// Representation of a fragment that is either still being fetched, has
/// already been fetched (or generated synthetically), or is skipped.
pub enum PendingFragmentContent {
    Pending(Box<dyn PendingFetch>),
    Completed(FetchResponse),
    NoContent,
}

impl From<FetchResponse> for PendingFragmentContent {
    fn from(value: FetchResponse) -> Self {
        Self::Completed(value)
    }
}

impl PendingFragmentContent {
    pub(crate) fn wait_for_content(self) -> Result<FetchResponse> {
        Ok(match self {
            Self::Pending(pending_request) => pending_request.wait()?,
            Self::Completed(response) => response,
            Self::NoContent => FetchResponse::new(204, ""),
        })
    }
}

/// The fetch capability handed to the processor by its host.
///
/// Dispatching should start the request and return without waiting; return
/// an `Err` for failures detected up front, or a [`PendingFetch`] whose
/// `wait` reports the transport failure later. The evaluator treats a
/// response status >= 400 identically to a transport-level failure.
pub type FragmentDispatcher = dyn Fn(&str) -> Result<PendingFragmentContent>;
