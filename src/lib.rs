#![doc = include_str!("../README.md")]

mod config;
mod directives;
mod document;
mod error;
mod expression;
mod fetch;
mod parse;
mod variables;

use log::{debug, error, warn};
use std::collections::HashMap;

pub use crate::config::{Configuration, MissingSrcPolicy};
pub use crate::directives::DirectiveHandler;
pub use crate::document::{Fragment, Part};
pub use crate::error::{ExecutionError, Result};
pub use crate::expression::{evaluate_condition, evaluate_value, TestOutcome};
pub use crate::fetch::{
    FetchResponse, FragmentDispatcher, PendingFetch, PendingFragmentContent,
};
pub use crate::parse::{parse_attributes, rewrite_esi_comments, split_segments, Segment, Tag};
pub use crate::variables::{Scope, Value};

/// A processor for resolving ESI documents.
///
/// The processor owns the directive registry and configuration; it does not
/// perform HTTP itself. Fragment requests go through the dispatcher callback
/// supplied per document, which lets the host decide on transport, backends
/// and concurrency while the processor guarantees that output order matches
/// document order.
///
/// # Example
/// ```
/// use edge_esi::{Configuration, FetchResponse, Processor};
/// use std::collections::HashMap;
///
/// let processor = Processor::new(Configuration::default());
/// let output = processor.process_document(
///     "<esi:include src=\"/header\"/>body",
///     HashMap::new(),
///     &|_url| Ok(FetchResponse::ok("header").into()),
/// )?;
/// assert_eq!(output, "headerbody");
/// # Ok::<(), edge_esi::ExecutionError>(())
/// ```
pub struct Processor {
    // The configuration for the processor.
    configuration: Configuration,
    // Directive registry, keyed by bare tag name within the namespace.
    handlers: HashMap<String, Box<dyn DirectiveHandler>>,
}

impl Processor {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            handlers: directives::builtin_handlers(),
        }
    }

    /// Registers a handler for a directive name (without the namespace, so
    /// `"capture"` handles `<esi:capture>`). Replaces any existing handler
    /// for that name, built-ins included.
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        handler: Box<dyn DirectiveHandler>,
    ) {
        self.handlers.insert(name.into(), handler);
    }

    /// Removes a directive handler. Tags with that name fall back to
    /// pass-through afterwards.
    pub fn deregister_handler(&mut self, name: &str) {
        self.handlers.remove(name);
    }

    /// Resolves an ESI document to its final text.
    ///
    /// `variables` seeds the root scope, typically with request metadata
    /// such as `HTTP_HOST`, `HTTP_COOKIE`, `REQUEST_PATH` or `QUERY_STRING`.
    /// Every fragment request is sent through `dispatch_fragment_request`.
    ///
    /// # Errors
    /// Returns an error when a fragment fetch exhausts its `src` and `alt`
    /// without `onerror="continue"` and outside any `<esi:try>`; the host
    /// decides what to serve in that case.
    pub fn process_document(
        &self,
        document: &str,
        variables: HashMap<String, String>,
        dispatch_fragment_request: &FragmentDispatcher,
    ) -> Result<String> {
        let mut scope = Scope::from_variables(variables);
        self.process_document_with_scope(document, &mut scope, dispatch_fragment_request)
    }

    /// Like [`Self::process_document`], but against a caller-owned scope,
    /// which keeps any top-level `esi:assign` bindings around for
    /// inspection afterwards.
    pub fn process_document_with_scope(
        &self,
        document: &str,
        scope: &mut Scope,
        dispatch_fragment_request: &FragmentDispatcher,
    ) -> Result<String> {
        let engine = Engine {
            configuration: &self.configuration,
            handlers: &self.handlers,
            dispatch_fragment_request,
        };
        match engine.process(document, scope) {
            Ok(output) => Ok(output),
            Err(err) => {
                error!("error processing ESI document: {err}");
                Err(err)
            }
        }
    }
}

/// The recursive evaluation core, handed to directive handlers.
///
/// Evaluation of one level happens in two passes. The *build* pass splits
/// the text into segments and runs every directive handler; include handlers
/// dispatch their fragment requests here, so independent fetches are all in
/// flight before anything waits. The *settle* pass then walks the resulting
/// parts in document order, waiting on each pending fragment as it is
/// reached, and joins the results by position. Completion order never
/// reorders output.
pub struct Engine<'a> {
    configuration: &'a Configuration,
    handlers: &'a HashMap<String, Box<dyn DirectiveHandler>>,
    dispatch_fragment_request: &'a FragmentDispatcher,
}

impl Engine<'_> {
    pub fn configuration(&self) -> &Configuration {
        self.configuration
    }

    /// Fully evaluates `body` against `scope`: comment rewrite, build pass,
    /// settle pass. This is the recursion entry for fetched fragment bodies
    /// and for custom handlers that need a complete sub-evaluation.
    pub fn process(&self, body: &str, scope: &mut Scope) -> Result<String> {
        let body = rewrite_esi_comments(body, &self.configuration.namespace);
        let parts = self.build_parts(&body, scope)?;
        self.settle_parts(parts, scope)
    }

    /// The build pass: splits `body` into segments and maps each to a
    /// [`Part`] without waiting on anything. Literal text is interpolated;
    /// tags go through the directive registry. A well-formed tag with no
    /// registered handler passes through as its original text.
    pub fn build_parts(&self, body: &str, scope: &mut Scope) -> Result<Vec<Part>> {
        let namespace = &self.configuration.namespace;
        let segments = split_segments(body, namespace);
        let mut parts = Vec::with_capacity(segments.len());

        for segment in segments {
            match segment {
                Segment::Text(text) => parts.push(Part::Text(scope.interpolate(&text))),
                Segment::Tag(tag) => match self.handlers.get(&tag.name) {
                    Some(handler) => parts.push(handler.evaluate(&tag, scope, self)?),
                    None => {
                        warn!("unknown directive <{namespace}:{}>, passing through", tag.name);
                        parts.push(Part::Text(tag.raw));
                    }
                },
            }
        }
        Ok(parts)
    }

    /// Sends one fragment request through the host's dispatcher.
    pub fn dispatch(&self, url: &str) -> Result<PendingFragmentContent> {
        (self.dispatch_fragment_request)(url)
    }

    // Interpolates a src/alt attribute and, for HTML content, unescapes
    // entities so `&amp;` in an attribute reaches the dispatcher as `&`.
    pub(crate) fn resolve_url(&self, raw: &str, scope: &Scope) -> String {
        let url = scope.interpolate(raw);
        if self.configuration.is_escaped_content {
            html_escape::decode_html_entities(&url).into_owned()
        } else {
            url
        }
    }

    /// The settle pass: waits on each part in original positional order and
    /// concatenates the results.
    pub fn settle_parts(&self, parts: Vec<Part>, scope: &mut Scope) -> Result<String> {
        let mut output = String::new();
        for part in parts {
            output.push_str(&self.settle_part(part, scope)?);
        }
        Ok(output)
    }

    fn settle_part(&self, part: Part, scope: &mut Scope) -> Result<String> {
        match part {
            Part::Text(text) => Ok(text),
            Part::Group(parts) => self.settle_parts(parts, scope),
            Part::Fragment(fragment) => self.settle_fragment(*fragment, scope),
            Part::Try { attempt, except } => match self.settle_parts(attempt, scope) {
                Ok(output) => Ok(output),
                Err(err) => {
                    debug!("attempt arm failed ({err}), evaluating except arm");
                    self.process(&except, scope)
                }
            },
        }
    }

    // Collects one include: wait for the response, retry once against `alt`
    // on failure, then either splice the body verbatim or evaluate it.
    fn settle_fragment(&self, fragment: Fragment, scope: &mut Scope) -> Result<String> {
        let Fragment {
            url,
            alt,
            continue_on_error,
            process_body,
            share_scope,
            pending_content,
        } = fragment;

        let body = match wait_for_success(pending_content, &url) {
            Ok(body) => body,
            Err(err) => match alt {
                Some(alt_url) => {
                    warn!("fragment `{url}` failed ({err}), retrying alt `{alt_url}`");
                    match wait_for_success(self.dispatch(&alt_url), &alt_url) {
                        Ok(body) => body,
                        Err(alt_err) if continue_on_error => {
                            debug!("alt fragment failed ({alt_err}), continuing");
                            return Ok(String::new());
                        }
                        Err(alt_err) => return Err(alt_err),
                    }
                }
                None if continue_on_error => {
                    debug!("fragment `{url}` failed ({err}), continuing");
                    return Ok(String::new());
                }
                None => return Err(err),
            },
        };

        if !process_body {
            return Ok(body);
        }

        if share_scope {
            // esi:eval shares the caller's scope; writes persist
            self.process(&body, scope)
        } else {
            // esi:include sandboxes the fragment in a child scope
            scope.enter();
            let result = self.process(&body, scope);
            scope.exit();
            result
        }
    }
}

fn wait_for_success(pending: Result<PendingFragmentContent>, url: &str) -> Result<String> {
    let response = pending?.wait_for_content()?;
    if response.status >= 400 {
        return Err(ExecutionError::UnexpectedStatus(
            url.to_string(),
            response.status,
        ));
    }
    Ok(response.body)
}
