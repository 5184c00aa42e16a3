use log::trace;
use std::collections::HashMap;

/// A single ESI tag occurrence found in a document.
///
/// `name` is the bare directive name with the namespace stripped and
/// lowercased, e.g. `include` for `<esi:include>`. Attribute values are kept
/// raw; interpolation of `$(...)` tokens happens at evaluation time, not
/// here.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub attributes: HashMap<String, String>,
    /// Inner body text, empty for self-closing tags.
    pub body: String,
    /// The full original text of the occurrence, used for pass-through.
    pub raw: String,
}

/// A section of a document: either a literal text run or a recognised tag.
/// Segments are emitted in document order and that order is preserved all
/// the way to the final output.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Tag(Tag),
}

/// Rewrites `<!--esi ... -->` comment blocks to `<{ns}:vars>...</{ns}:vars>`
/// so their interior is always interpolated and scanned for directives.
pub fn rewrite_esi_comments(input: &str, namespace: &str) -> String {
    let open = format!("<!--{namespace}");
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(at) = find_ci(rest, &open) {
        let after = at + open.len();
        // require a word boundary so e.g. `<!--esix` is left alone
        let boundary = match rest[after..].chars().next() {
            Some(c) => !(c.is_ascii_alphanumeric() || c == '_'),
            None => true,
        };
        if !boundary {
            out.push_str(&rest[..after]);
            rest = &rest[after..];
            continue;
        }
        let Some(end) = rest[after..].find("-->") else {
            // unterminated comment, leave the remainder untouched
            break;
        };
        out.push_str(&rest[..at]);
        out.push_str(&format!(
            "<{namespace}:vars>{}</{namespace}:vars>",
            &rest[after..after + end]
        ));
        rest = &rest[after + end + 3..];
    }
    out.push_str(rest);
    out
}

/// Splits text into an ordered sequence of literal and tag segments.
///
/// A tag is `<{ns}:name ...>` either closed immediately with `/>` or
/// terminated by the first literal `</{ns}:name>`; nested same-named tags
/// are not balanced, the first closing occurrence wins. Anything that does
/// not scan as a complete tag falls through as literal text.
pub fn split_segments(input: &str, namespace: &str) -> Vec<Segment> {
    let open = format!("<{namespace}:");
    let bytes = input.as_bytes();
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' || !starts_with_ci(&input[i..], &open) {
            i += 1;
            continue;
        }

        let Some((tag, next)) = scan_tag(input, i, namespace, &open) else {
            // not a complete tag, the '<' stays literal
            i += 1;
            continue;
        };

        if text_start < i {
            segments.push(Segment::Text(input[text_start..i].to_string()));
        }
        trace!("matched <{namespace}:{}> at offset {i}", tag.name);
        segments.push(Segment::Tag(tag));
        i = next;
        text_start = next;
    }

    if text_start < bytes.len() {
        segments.push(Segment::Text(input[text_start..].to_string()));
    }
    segments
}

// Scans one tag occurrence starting at the `<` at `start`. Returns the tag
// and the offset just past it, or None when the input does not form a
// complete tag.
fn scan_tag(input: &str, start: usize, namespace: &str, open: &str) -> Option<(Tag, usize)> {
    let bytes = input.as_bytes();
    let name_start = start + open.len();
    let mut j = name_start;
    while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
        j += 1;
    }
    if j == name_start {
        return None;
    }
    let name = input[name_start..j].to_ascii_lowercase();

    // the name must end at whitespace, '/' or '>'
    match bytes.get(j) {
        Some(c) if c.is_ascii_whitespace() || *c == b'/' || *c == b'>' => {}
        _ => return None,
    }

    // scan to the closing '>' of the open tag; a '>' inside a quoted
    // attribute value does not count
    let mut k = j;
    let mut quote: Option<u8> = None;
    loop {
        let c = *bytes.get(k)?;
        match quote {
            Some(q) => {
                if c == b'\\' {
                    k += 2;
                    continue;
                }
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'\'' | b'"' => quote = Some(c),
                b'>' => break,
                _ => {}
            },
        }
        k += 1;
    }

    let mut attrs_raw = input[j..k].trim();
    let self_closing = attrs_raw.ends_with('/');
    if self_closing {
        attrs_raw = attrs_raw[..attrs_raw.len() - 1].trim_end();
    }
    let attributes = parse_attributes(attrs_raw);

    if self_closing {
        let raw = input[start..=k].to_string();
        return Some((
            Tag {
                name,
                attributes,
                body: String::new(),
                raw,
            },
            k + 1,
        ));
    }

    // body runs to the first literal close tag for this exact name
    let close = format!("</{namespace}:{name}>");
    let body_start = k + 1;
    let close_at = body_start + find_ci(&input[body_start..], &close)?;
    let end = close_at + close.len();
    Some((
        Tag {
            name,
            attributes,
            body: input[body_start..close_at].to_string(),
            raw: input[start..end].to_string(),
        },
        end,
    ))
}

/// Parses a tag's attribute string into a name-to-value map.
///
/// Values may be single-quoted, double-quoted or unquoted; a bare name with
/// no `=` is recorded with an empty value. Backslash escapes inside quoted
/// values are kept verbatim. Duplicate names: last occurrence wins.
pub fn parse_attributes(raw: &str) -> HashMap<String, String> {
    let bytes = raw.as_bytes();
    let mut attrs = HashMap::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let name_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'=' {
            i += 1;
        }
        let name = &raw[name_start..i];
        if name.is_empty() {
            i += 1;
            continue;
        }

        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            let value = if i < bytes.len() && (bytes[i] == b'\'' || bytes[i] == b'"') {
                let q = bytes[i];
                i += 1;
                let value_start = i;
                while i < bytes.len() {
                    if bytes[i] == b'\\' {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == q {
                        break;
                    }
                    i += 1;
                }
                let value_end = i.min(bytes.len());
                if i < bytes.len() {
                    i += 1; // closing quote
                }
                &raw[value_start..value_end]
            } else {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                &raw[value_start..i]
            };
            attrs.insert(name.to_string(), value.to_string());
        } else {
            // boolean-style attribute, present but empty
            attrs.insert(name.to_string(), String::new());
        }
    }
    attrs
}

fn starts_with_ci(haystack: &str, needle: &str) -> bool {
    haystack.len() >= needle.len()
        && haystack.as_bytes()[..needle.len()].eq_ignore_ascii_case(needle.as_bytes())
}

// Byte offset of the first ASCII-case-insensitive occurrence of `needle`.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}
