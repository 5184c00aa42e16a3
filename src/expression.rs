use crate::variables::{Scope, Value};
use log::warn;
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

/// Outcome of an `esi:when` test expression: plain boolean, or the capture
/// groups of a successful `matches`/`matches_i`.
#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    False,
    True,
    Captures(Vec<String>),
}

impl TestOutcome {
    pub fn to_bool(&self) -> bool {
        !matches!(self, TestOutcome::False)
    }

    /// The value recorded under `MATCHES` when the test succeeds.
    pub fn into_value(self) -> Value {
        match self {
            TestOutcome::Captures(groups) => Value::Groups(groups),
            TestOutcome::True => Value::Text("true".to_string()),
            TestOutcome::False => Value::Text("false".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Connector {
    And,
    Or,
}

/// Evaluates a conditional test expression against a scope.
///
/// A test is one or more clauses joined by `&&`/`||`. Evaluation is strictly
/// left to right with positional short-circuit: `&&` stops once the running
/// result is false, `||` stops once it is true. There is no conventional
/// operator precedence, deliberately; grouping the way a precedence parser
/// would changes the meaning of existing expressions.
pub fn evaluate_condition(test: &str, scope: &Scope) -> TestOutcome {
    let mut running = false;
    let mut captures: Option<Vec<String>> = None;

    for (connector, clause) in split_clauses(test.trim()) {
        match connector {
            Some(Connector::And) if !running => break,
            Some(Connector::Or) if running => break,
            _ => {}
        }

        let negated = clause.starts_with('!');
        let clause = if negated { &clause[1..] } else { clause };
        running = evaluate_clause(clause.trim(), scope, &mut captures) != negated;
    }

    if running {
        match captures {
            Some(groups) => TestOutcome::Captures(groups),
            None => TestOutcome::True,
        }
    } else {
        TestOutcome::False
    }
}

/// Evaluates an `esi:assign` value expression: a single-quoted expression is
/// a literal (outer quotes stripped, interior kept verbatim), anything else
/// is variable-interpolated.
pub fn evaluate_value(raw: &str, scope: &Scope) -> String {
    if raw.is_empty() {
        return String::new();
    }
    if raw.starts_with('\'') {
        let inner = raw.strip_prefix('\'').unwrap_or(raw);
        return inner.strip_suffix('\'').unwrap_or(inner).to_string();
    }
    scope.interpolate(raw)
}

// Splits a test into clauses, keeping the connector that precedes each one.
// Connectors are only recognised with whitespace on both sides, matching the
// original grammar; quoting is not considered.
fn split_clauses(test: &str) -> Vec<(Option<Connector>, &str)> {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    let separator =
        SEPARATOR.get_or_init(|| Regex::new(r"\s(&&|\|\|)\s").expect("separator pattern is valid"));

    let mut clauses = Vec::new();
    let mut connector = None;
    let mut last = 0;
    for found in separator.find_iter(test) {
        clauses.push((connector, test[last..found.start()].trim()));
        connector = Some(if found.as_str().trim() == "&&" {
            Connector::And
        } else {
            Connector::Or
        });
        last = found.end();
    }
    clauses.push((connector, test[last..].trim()));
    clauses
}

fn evaluate_clause(clause: &str, scope: &Scope, captures: &mut Option<Vec<String>>) -> bool {
    static COMPARISON: OnceLock<Regex> = OnceLock::new();
    let comparison = COMPARISON.get_or_init(|| {
        Regex::new(r"^(.*?)\s+(matches_i|matches|has_i|has|==|!=|>=|<=|=)\s+(.*)$")
            .expect("comparison pattern is valid")
    });

    let Some(parts) = comparison.captures(clause) else {
        // bare clause: interpolate and test for truthiness
        let value = operand(clause, scope);
        return !value.is_empty() && value != "false";
    };

    let a = operand(&parts[1], scope);
    let operator = &parts[2];
    let b = operand(&parts[3], scope);

    match operator {
        "=" | "==" => a == b,
        "!=" => a != b,
        ">=" => a >= b,
        "<=" => a <= b,
        "has" => a.contains(&b),
        "has_i" => a.to_lowercase().contains(&b.to_lowercase()),
        "matches" | "matches_i" => {
            let pattern = match RegexBuilder::new(&b)
                .case_insensitive(operator == "matches_i")
                .build()
            {
                Ok(pattern) => pattern,
                Err(err) => {
                    warn!("invalid pattern `{b}` in test expression: {err}");
                    return false;
                }
            };
            match pattern.captures(&a) {
                Some(groups) => {
                    *captures = Some(
                        groups
                            .iter()
                            .map(|g| g.map_or(String::new(), |m| m.as_str().to_string()))
                            .collect(),
                    );
                    true
                }
                None => false,
            }
        }
        _ => unreachable!("operator alternation is exhaustive"),
    }
}

// Strips the quoting delimiters from an operand and interpolates it.
// Triple single-quotes delimit a literal pattern; a plain single-quote pair
// is ordinary value quoting.
fn operand(raw: &str, scope: &Scope) -> String {
    let raw = if raw.len() >= 6 && raw.starts_with("'''") && raw.ends_with("'''") {
        &raw[3..raw.len() - 3]
    } else if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };
    scope.interpolate(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        let mut scope = Scope::new();
        scope.set("HTTP_HOST", "localhost".into());
        scope
    }

    #[test]
    fn test_truthy_conditions() {
        for test in [
            "$(HTTP_HOST) == localhost",
            "$(HTTP_HOST)",
            "$(HTTP_HOST) matches '''^local.*''' ",
            "$(HTTP_HOST) has local",
            "$(HTTP_HOST) != remote",
            "$(HTTP_HOST) == 'localhost'",
            "$(HTTP_HOST) has_i LOCAL",
            "$(HTTP_HOST) matches_i '^LOCAL'",
        ] {
            assert!(
                evaluate_condition(test, &scope()).to_bool(),
                "expected true: {test}"
            );
        }
    }

    #[test]
    fn test_falsy_conditions() {
        for test in [
            "$(unknown)",
            "!$(HTTP_HOST)",
            "$(HTTP_HOST) == remote",
            "$(HTTP_HOST) has remote",
            "$(HTTP_HOST) matches '^remote'",
        ] {
            assert!(
                !evaluate_condition(test, &scope()).to_bool(),
                "expected false: {test}"
            );
        }
    }

    #[test]
    fn test_the_string_false_is_not_truthy() {
        let mut s = Scope::new();
        s.set("flag", "false".into());
        assert!(!evaluate_condition("$(flag)", &s).to_bool());
    }

    #[test]
    fn test_negated_comparison() {
        assert!(evaluate_condition("!$(HTTP_HOST) == remote", &scope()).to_bool());
        assert!(!evaluate_condition("!$(HTTP_HOST) == localhost", &scope()).to_bool());
    }

    #[test]
    fn test_lexical_ordering_operators() {
        assert!(evaluate_condition("b >= a", &scope()).to_bool());
        assert!(evaluate_condition("a <= b", &scope()).to_bool());
        assert!(!evaluate_condition("a >= b", &scope()).to_bool());
    }

    #[test]
    fn test_match_capture_groups() {
        let mut s = Scope::new();
        s.set("HTTP_HOST", "localok".into());
        let outcome = evaluate_condition("$(HTTP_HOST) matches '''^local(.*)'''", &s);
        assert_eq!(
            outcome,
            TestOutcome::Captures(vec!["localok".to_string(), "ok".to_string()])
        );
    }

    #[test]
    fn test_match_without_groups_is_plain_true() {
        let outcome = evaluate_condition("$(HTTP_HOST) matches '^local'", &scope());
        assert_eq!(
            outcome,
            TestOutcome::Captures(vec!["local".to_string()])
        );
        assert!(outcome.to_bool());
    }

    #[test]
    fn test_invalid_pattern_degrades_to_false() {
        assert!(!evaluate_condition("$(HTTP_HOST) matches '('", &scope()).to_bool());
    }

    #[test]
    fn test_and_chain_short_circuits() {
        // the second clause would match, but && stops on a false running result
        let outcome = evaluate_condition("$(unknown) && $(HTTP_HOST) matches '(local)'", &scope());
        assert_eq!(outcome, TestOutcome::False);
    }

    #[test]
    fn test_or_chain_short_circuits() {
        let outcome = evaluate_condition("$(HTTP_HOST) || $(unknown)", &scope());
        assert!(outcome.to_bool());
    }

    #[test]
    fn test_chains_evaluate_positionally_not_by_precedence() {
        // left-to-right: (true || stop) never reaches the &&-false clause
        assert!(evaluate_condition("$(HTTP_HOST) || $(x) && $(y)", &scope()).to_bool());
        // whereas a false head stops the chain at the &&
        assert!(!evaluate_condition("$(x) && $(HTTP_HOST) || $(y)", &scope()).to_bool());
    }

    #[test]
    fn test_earlier_captures_survive_later_clauses() {
        let mut s = Scope::new();
        s.set("HTTP_HOST", "localok".into());
        let outcome = evaluate_condition(
            "$(HTTP_HOST) matches '''^local(.*)''' && $(HTTP_HOST)",
            &s,
        );
        assert_eq!(
            outcome,
            TestOutcome::Captures(vec!["localok".to_string(), "ok".to_string()])
        );
    }

    #[test]
    fn test_assign_quoted_literal() {
        assert_eq!(evaluate_value("'ok'", &Scope::new()), "ok");
    }

    #[test]
    fn test_assign_quoted_literal_keeps_escapes_verbatim() {
        assert_eq!(
            evaluate_value(r"'quote\'s'", &Scope::new()),
            r"quote\'s"
        );
    }

    #[test]
    fn test_assign_unquoted_is_interpolated() {
        let mut s = Scope::new();
        s.set("server", "http://example.com/".into());
        assert_eq!(evaluate_value("$(server)ok", &s), "http://example.com/ok");
        assert_eq!(evaluate_value("ok", &s), "ok");
    }

    #[test]
    fn test_assign_empty_value() {
        assert_eq!(evaluate_value("", &Scope::new()), "");
    }
}
