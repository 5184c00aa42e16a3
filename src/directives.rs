use crate::config::MissingSrcPolicy;
use crate::document::{Fragment, Part};
use crate::error::{ExecutionError, Result};
use crate::expression::{evaluate_condition, evaluate_value};
use crate::parse::{split_segments, Segment, Tag};
use crate::variables::{Scope, Value};
use crate::Engine;
use log::{debug, warn};
use std::collections::HashMap;

// The scope variable that records a successful `esi:when` match within the
// enclosing `esi:choose`.
const MATCHES: &str = "MATCHES";

/// The evaluation contract shared by built-in and caller-registered
/// directives.
///
/// A handler receives the tag occurrence (attributes raw, body unsplit), the
/// current variable scope, and the engine for recursive evaluation and
/// fragment dispatch. It returns one ordered [`Part`]: finished text, a
/// pending fragment, or a group of already-built sub-parts.
pub trait DirectiveHandler {
    fn evaluate(&self, tag: &Tag, scope: &mut Scope, engine: &Engine<'_>) -> Result<Part>;
}

// Registry pre-populated with the built-in directives. Caller extensions go
// into the same map through `Processor::register_handler`.
pub(crate) fn builtin_handlers() -> HashMap<String, Box<dyn DirectiveHandler>> {
    let mut handlers: HashMap<String, Box<dyn DirectiveHandler>> = HashMap::new();
    handlers.insert(
        "include".to_string(),
        Box::new(IncludeDirective { share_scope: false }),
    );
    handlers.insert(
        "eval".to_string(),
        Box::new(IncludeDirective { share_scope: true }),
    );
    handlers.insert("try".to_string(), Box::new(TryDirective));
    handlers.insert("choose".to_string(), Box::new(ChooseDirective));
    handlers.insert("when".to_string(), Box::new(WhenDirective));
    handlers.insert("otherwise".to_string(), Box::new(OtherwiseDirective));
    handlers.insert("assign".to_string(), Box::new(AssignDirective));
    handlers.insert("vars".to_string(), Box::new(VarsDirective));
    handlers.insert("text".to_string(), Box::new(TextDirective));
    handlers.insert("comment".to_string(), Box::new(CommentDirective));
    handlers.insert("remove".to_string(), Box::new(CommentDirective));
    handlers
}

/// `<esi:include>` and `<esi:eval>`: fetch `src` and splice the result in.
///
/// The two differ only in scoping: when the fetched body is evaluated
/// (`dca="esi"`), `esi:include` sandboxes it in a child scope while
/// `esi:eval` shares the caller's scope, so its variable writes persist.
struct IncludeDirective {
    share_scope: bool,
}

impl DirectiveHandler for IncludeDirective {
    fn evaluate(&self, tag: &Tag, scope: &mut Scope, engine: &Engine<'_>) -> Result<Part> {
        let Some(src) = tag.attributes.get("src") else {
            return match engine.configuration().missing_src_policy {
                MissingSrcPolicy::Ignore => {
                    warn!("<{}> without src attribute, skipping", tag.name);
                    Ok(Part::empty())
                }
                MissingSrcPolicy::PassThrough => Ok(Part::text(tag.raw.clone())),
                MissingSrcPolicy::Fail => Err(ExecutionError::MissingRequiredAttribute(
                    tag.name.clone(),
                    "src".to_string(),
                )),
            };
        };

        let url = engine.resolve_url(src, scope);
        let alt = tag
            .attributes
            .get("alt")
            .map(|alt| engine.resolve_url(alt, scope));
        let process_body = tag.attributes.get("dca").is_some_and(|dca| dca == "esi");
        let continue_on_error = tag
            .attributes
            .get("onerror")
            .is_some_and(|onerror| onerror == "continue");

        debug!("requesting ESI fragment: {url}");
        let pending_content = engine.dispatch(&url);

        Ok(Part::Fragment(Box::new(Fragment {
            url,
            alt,
            continue_on_error,
            process_body,
            share_scope: self.share_scope,
            pending_content,
        })))
    }
}

/// `<esi:try>`: evaluate the `esi:attempt` body, fall back to the
/// `esi:except` body if it fails. Both arms run against the caller's scope.
///
/// The arms are located by scanning the unsplit body for the first
/// occurrence of each tag, not by a general recursive parse.
struct TryDirective;

impl DirectiveHandler for TryDirective {
    fn evaluate(&self, tag: &Tag, scope: &mut Scope, engine: &Engine<'_>) -> Result<Part> {
        let mut attempt_body = None;
        let mut except_body = None;

        for segment in split_segments(&tag.body, &engine.configuration().namespace) {
            if let Segment::Tag(inner) = segment {
                match inner.name.as_str() {
                    "attempt" if attempt_body.is_none() => attempt_body = Some(inner.body),
                    "except" if except_body.is_none() => except_body = Some(inner.body),
                    _ => {}
                }
            }
        }

        // the attempt arm dispatches its fetches now; the except body stays
        // raw and is only evaluated if the attempt fails
        let attempt = engine.build_parts(&attempt_body.unwrap_or_default(), scope)?;
        Ok(Part::Try {
            attempt,
            except: except_body.unwrap_or_default(),
        })
    }
}

/// `<esi:choose>`: evaluate the body (its `esi:when`/`esi:otherwise`
/// children coordinate through the `MATCHES` binding), then clear `MATCHES`
/// so the next `esi:choose` block starts clean whether or not this one
/// matched.
struct ChooseDirective;

impl DirectiveHandler for ChooseDirective {
    fn evaluate(&self, tag: &Tag, scope: &mut Scope, engine: &Engine<'_>) -> Result<Part> {
        let parts = engine.build_parts(&tag.body, scope)?;
        scope.remove_local(MATCHES);
        Ok(Part::Group(parts))
    }
}

/// `<esi:when>`: first match among siblings wins. A successful test records
/// its result under `MATCHES` (and under `matchname` if given) before the
/// body is evaluated, so the body can interpolate `$(MATCHES{n})`.
struct WhenDirective;

impl DirectiveHandler for WhenDirective {
    fn evaluate(&self, tag: &Tag, scope: &mut Scope, engine: &Engine<'_>) -> Result<Part> {
        if scope.has_local(MATCHES) {
            // an earlier sibling already matched; this test never runs
            return Ok(Part::empty());
        }
        let Some(test) = tag.attributes.get("test") else {
            warn!("<{}> without test attribute, skipping", tag.name);
            return Ok(Part::empty());
        };

        let outcome = evaluate_condition(test, scope);
        debug!("when test `{test}` evaluated to {outcome:?}");
        if !outcome.to_bool() {
            return Ok(Part::empty());
        }

        let result = outcome.into_value();
        if let Some(match_name) = tag.attributes.get("matchname") {
            scope.set(match_name.clone(), result.clone());
        }
        scope.set(MATCHES, result);

        Ok(Part::Group(engine.build_parts(&tag.body, scope)?))
    }
}

/// `<esi:otherwise>`: contributes its body only when no sibling `esi:when`
/// matched.
struct OtherwiseDirective;

impl DirectiveHandler for OtherwiseDirective {
    fn evaluate(&self, tag: &Tag, scope: &mut Scope, engine: &Engine<'_>) -> Result<Part> {
        if scope.has_local(MATCHES) {
            return Ok(Part::empty());
        }
        Ok(Part::Group(engine.build_parts(&tag.body, scope)?))
    }
}

/// `<esi:assign>`: bind `name` to the evaluated `value` expression in the
/// current scope. Visible to later siblings and descendants, never to
/// ancestors.
struct AssignDirective;

impl DirectiveHandler for AssignDirective {
    fn evaluate(&self, tag: &Tag, scope: &mut Scope, _engine: &Engine<'_>) -> Result<Part> {
        let (Some(name), Some(value)) = (tag.attributes.get("name"), tag.attributes.get("value"))
        else {
            warn!("<{}> requires name and value attributes, skipping", tag.name);
            return Ok(Part::empty());
        };
        let value = evaluate_value(value, scope);
        debug!("assign {name} = {value}");
        scope.set(name.clone(), Value::Text(value));
        Ok(Part::empty())
    }
}

/// `<esi:vars>`: the self-closing form with a `name` attribute resolves that
/// name directly; the body-bearing form evaluates its body against the
/// current scope. The latter is also the target of the rewritten
/// `<!--esi -->` comment form.
struct VarsDirective;

impl DirectiveHandler for VarsDirective {
    fn evaluate(&self, tag: &Tag, scope: &mut Scope, engine: &Engine<'_>) -> Result<Part> {
        if tag.body.is_empty() {
            if let Some(name) = tag.attributes.get("name") {
                return Ok(Part::text(scope.interpolate(name)));
            }
        }
        Ok(Part::Group(engine.build_parts(&tag.body, scope)?))
    }
}

/// `<esi:text>`: the body is emitted completely unprocessed, no
/// interpolation and no directive expansion.
struct TextDirective;

impl DirectiveHandler for TextDirective {
    fn evaluate(&self, tag: &Tag, _scope: &mut Scope, _engine: &Engine<'_>) -> Result<Part> {
        Ok(Part::text(tag.body.clone()))
    }
}

/// `<esi:comment>` and `<esi:remove>`: always contribute nothing.
struct CommentDirective;

impl DirectiveHandler for CommentDirective {
    fn evaluate(&self, _tag: &Tag, _scope: &mut Scope, _engine: &Engine<'_>) -> Result<Part> {
        Ok(Part::empty())
    }
}
