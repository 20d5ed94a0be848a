//! Utility functions for working with identifiers.

use std::collections::HashSet;

use heck::{ToSnakeCase, ToUpperCamelCase};

/// Words an identifier position cannot hold in edition-2021 Rust: strict and
/// reserved keywords plus `async`/`await`/`dyn`/`try`. Sorted for binary
/// search; `Self` orders before the lowercase entries.
const RESERVED: &[&str] = &[
    "Self", "abstract", "as", "async", "await", "become", "box", "break", "const", "continue",
    "crate", "do", "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "if", "impl",
    "in", "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "self", "static", "struct", "super", "trait", "true", "try", "type", "typeof",
    "unsafe", "unsized", "use", "virtual", "where", "while", "yield",
];

/// Rewrites `ident` so it can stand alone in generated code. Most reserved
/// words take the `r#` spelling; the path keywords (`self`, `Self`, `crate`,
/// `super`) have no raw form, so they gain a trailing underscore instead.
pub fn escape_keyword(ident: &str) -> String {
    if RESERVED.binary_search(&ident).is_err() {
        return ident.to_string();
    }
    match ident {
        "Self" | "crate" | "self" | "super" => format!("{}_", ident),
        _ => format!("r#{}", ident),
    }
}

/// Converts a `camelCase` or `SCREAMING_SNAKE_CASE` proto name to a
/// `lower_snake` Rust field identifier, escaped as needed.
pub fn to_snake(s: &str) -> String {
    escape_keyword(&s.to_snake_case())
}

/// [`to_snake`] without the escape. For building prefixed or suffixed names
/// (`get_type`, `TYPE_WIRE`, `type_head`), where a keyword can never stand
/// alone.
pub fn to_snake_raw(s: &str) -> String {
    s.to_snake_case()
}

/// Converts a proto name to an `UpperCamel` Rust type identifier, escaped as
/// needed (a message named `self` becomes the type `Self_`).
pub fn to_upper_camel(s: &str) -> String {
    escape_keyword(&s.to_upper_camel_case())
}

/// Hands out names within one scope, appending a numeric suffix when the
/// wanted name is already taken.
#[derive(Debug, Default)]
pub struct NameSet {
    used: HashSet<String>,
}

impl NameSet {
    pub fn new() -> NameSet {
        NameSet::default()
    }

    /// Marks a name as taken without claiming it, e.g. for names fixed by
    /// the caller.
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    /// Returns `wanted`, or the first `wanted2`, `wanted3`, ... that is
    /// still free.
    pub fn claim(&mut self, wanted: &str) -> String {
        if self.used.insert(wanted.to_string()) {
            return wanted.to_string();
        }
        for n in 2.. {
            let candidate = format!("{}{}", wanted, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
        unreachable!()
    }
}
