//! Pure binding-match predicates.
//!
//! Every function here is a deterministic function of its arguments with
//! no side effects, so the registry can re-evaluate bindings freely.

use super::exchange::{BindingSpec, MatchMode};
use super::message::Headers;

/// Decides whether a binding receives a message with the given routing
/// key and headers. Spec validation happens at bind time, so each variant
/// only interprets its own attributes here.
pub fn matches(spec: &BindingSpec, routing_key: &str, headers: &Headers) -> bool {
    match spec {
        BindingSpec::Direct(key) => key == routing_key,
        BindingSpec::Topic(pattern) => topic_matches(pattern, routing_key),
        BindingSpec::Headers { mode, required } => headers_match(*mode, required, headers),
    }
}

/// Dot-delimited topic matching: `*` matches exactly one token, `#`
/// matches zero or more. `#` may appear anywhere in the pattern, so the
/// match backtracks over how many tokens each `#` consumes.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    align(&pattern, &key)
}

fn align(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|taken| align(rest, &key[taken..])),
        Some((token, rest)) => match key.split_first() {
            Some((word, words)) => (*token == "*" || token == word) && align(rest, words),
            None => false,
        },
    }
}

/// Header matching in `all` or `any` mode. The `x-match` selector itself
/// is stripped from the requirement set before this is called.
pub fn headers_match(mode: MatchMode, required: &Headers, headers: &Headers) -> bool {
    if required.is_empty() {
        // An empty requirement set matches everything in `all` mode and
        // nothing in `any` mode.
        return mode == MatchMode::All;
    }
    let satisfied = |(key, value): (&String, &String)| headers.get(key) == Some(value);
    match mode {
        MatchMode::All => required.iter().all(satisfied),
        MatchMode::Any => required.iter().any(satisfied),
    }
}
