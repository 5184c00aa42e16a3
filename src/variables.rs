use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// A variable binding. Either plain text or the capture groups of a
/// successful `matches` test (index 0 is the whole match, 1.. the groups).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Groups(Vec<String>),
}

impl Value {
    // Subfield access, used by `$(name{sub})`. Only capture-group values
    // have subfields; anything else renders empty.
    fn subfield(&self, key: &str) -> &str {
        match self {
            Value::Groups(groups) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| groups.get(i))
                .map_or("", String::as_str),
            Value::Text(_) => "",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Groups(groups) => f.write_str(&groups.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// The chained variable scope a directive sees during evaluation.
///
/// Implemented as a stack of frames: lookups walk from the innermost frame
/// outwards, writes always land in the innermost frame. Entering a frame
/// gives a child scope whose writes vanish again on exit, which is how
/// `<esi:include dca="esi">` sandboxes fetched fragments. Directives that
/// share their caller's scope (`<esi:eval>`, inline bodies) simply evaluate
/// without entering a frame.
#[derive(Debug)]
pub struct Scope {
    frames: Vec<HashMap<String, Value>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    /// Builds a root scope from a caller-provided variable map, typically
    /// request metadata such as `HTTP_HOST` or `QUERY_STRING`.
    pub fn from_variables(variables: HashMap<String, String>) -> Self {
        Self {
            frames: vec![variables
                .into_iter()
                .map(|(k, v)| (k, Value::Text(v)))
                .collect()],
        }
    }

    /// Pushes a child frame. Writes made until the matching [`Self::exit`]
    /// are invisible to the parent.
    pub fn enter(&mut self) {
        self.frames.push(HashMap::new());
    }

    /// Discards the innermost frame and every write made in it.
    pub fn exit(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot exit the root frame");
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Looks `name` up through the frame chain, innermost first.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Binds `name` in the innermost frame.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.frames
            .last_mut()
            .expect("scope always has a root frame")
            .insert(name.into(), value);
    }

    /// Whether `name` is bound in the innermost frame specifically. Used
    /// for the `MATCHES` first-sibling-wins check, which must not be
    /// fooled by a stale binding in an outer frame.
    pub fn has_local(&self, name: &str) -> bool {
        self.frames
            .last()
            .is_some_and(|frame| frame.contains_key(name))
    }

    /// Unbinds `name` from the innermost frame only.
    pub fn remove_local(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.remove(name);
        }
    }

    /// Replaces every `$(name)` and `$(name{sub})` token in `text` with the
    /// current value for `name`. Unresolved names substitute the empty
    /// string, never an error.
    pub fn interpolate(&self, text: &str) -> String {
        static TOKEN: OnceLock<Regex> = OnceLock::new();
        let token = TOKEN.get_or_init(|| {
            Regex::new(r"\$\((.*?)(?:\{(\w+)\})?\)").expect("interpolation pattern is valid")
        });

        token
            .replace_all(text, |caps: &regex::Captures| {
                let Some(value) = self.get(&caps[1]) else {
                    return String::new();
                };
                match caps.get(2) {
                    Some(sub) => value.subfield(sub.as_str()).to_string(),
                    None => value.to_string(),
                }
            })
            .into_owned()
    }
}
