use crate::error::Result;
use crate::fetch::PendingFragmentContent;

/// An include that has been dispatched but not yet collected.
///
/// Holds everything the settle pass needs to finish the job: the resolved
/// request, the fallback policy, and how to treat the body once it arrives.
pub struct Fragment {
    // The resolved URL the request was dispatched to.
    pub(crate) url: String,
    // An optional alternate URL to try once if the original request fails.
    pub(crate) alt: Option<String>,
    // Whether a failed fetch resolves to an empty string instead of failing.
    pub(crate) continue_on_error: bool,
    // Whether the fetched body is recursively evaluated (`dca="esi"`).
    pub(crate) process_body: bool,
    // Whether the body is evaluated against the caller's own scope
    // (`esi:eval`) rather than a sandboxed child scope (`esi:include`).
    pub(crate) share_scope: bool,
    // The dispatched request; a dispatch-time error is carried here so the
    // `alt` fallback still applies to it.
    pub(crate) pending_content: Result<PendingFragmentContent>,
}

/// One ordered slot of an evaluation level's output.
///
/// The build pass produces these in document order; the settle pass turns
/// each into a string, waiting where it must, and joins them by position.
/// Completion order of the underlying fetches never affects the output.
pub enum Part {
    /// Finished text, nothing left to wait for.
    Text(String),
    /// An include whose response is still outstanding.
    Fragment(Box<Fragment>),
    /// Already-built sub-parts that settle in place, in order.
    Group(Vec<Part>),
    /// An attempt arm plus the raw except body to evaluate if it fails.
    Try { attempt: Vec<Part>, except: String },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub(crate) fn empty() -> Self {
        Self::Text(String::new())
    }
}

impl std::fmt::Debug for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "Text({} bytes)", text.len()),
            Self::Fragment(fragment) if fragment.alt.is_some() => {
                write!(f, "Fragment({}, with alt)", fragment.url)
            }
            Self::Fragment(fragment) => write!(f, "Fragment({})", fragment.url),
            Self::Group(parts) => write!(f, "Group({parts:?})"),
            Self::Try { attempt, .. } => write!(f, "Try - Attempt: {attempt:?}"),
        }
    }
}
