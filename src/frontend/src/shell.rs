//! Shell-lex variable expansion.
//!
//! A POSIX-subset word expander: `$VAR`, `${VAR}`, `${VAR:-def}`,
//! `${VAR-def}`, `${VAR:+alt}`, `${VAR+alt}`, `${VAR/pat/repl}`, single and
//! double quotes, backslash escapes. Expansion is pure; it never executes
//! commands. Undefined references expand to the empty string and are
//! recorded once per occurrence for the linter.

use std::collections::{BTreeMap, BTreeSet};
use std::iter::Peekable;
use std::str::Chars;

use basalt_core::error::{FrontendError, Result};

/// A three-tier variable environment.
///
/// Lookup order is stage ENV, then stage ARG, then global ARG. Scopes are
/// immutable snapshots; the `with_*` constructors produce the next snapshot.
#[derive(Debug, Clone, Default)]
pub struct VarScope {
    env: BTreeMap<String, String>,
    stage_args: BTreeMap<String, Option<String>>,
    global_args: BTreeMap<String, Option<String>>,
}

impl VarScope {
    pub fn new() -> Self {
        VarScope::default()
    }

    /// Scope holding only global ARG bindings (used for base-name and
    /// platform expansion before any stage is entered).
    pub fn with_global_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        VarScope {
            global_args: args.into_iter().collect(),
            ..VarScope::default()
        }
    }

    /// Next snapshot with a global ARG admitted (possibly unbound).
    pub fn with_global_arg(&self, key: &str, value: Option<String>) -> Self {
        let mut next = self.clone();
        next.global_args.insert(key.to_string(), value);
        next
    }

    /// Next snapshot with an ENV binding added or replaced.
    pub fn with_env(&self, key: &str, value: &str) -> Self {
        let mut next = self.clone();
        next.env.insert(key.to_string(), value.to_string());
        next
    }

    /// Next snapshot with a stage ARG admitted (possibly unbound).
    pub fn with_arg(&self, key: &str, value: Option<String>) -> Self {
        let mut next = self.clone();
        next.stage_args.insert(key.to_string(), value);
        next
    }

    /// Look up a variable following the tier order.
    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some(v) = self.env.get(name) {
            return Some(v);
        }
        if let Some(v) = self.stage_args.get(name) {
            return v.as_deref();
        }
        self.global_args.get(name).and_then(|v| v.as_deref())
    }

    /// ARG bindings visible in this scope (stage over global), for
    /// substitution into exec environments where needed.
    pub fn arg_vars(&self) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        for (k, v) in &self.global_args {
            if let Some(v) = v {
                vars.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &self.stage_args {
            if let Some(v) = v {
                vars.insert(k.clone(), v.clone());
            }
        }
        vars
    }
}

/// The outcome of expanding one word.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub result: String,
    /// Variables that resolved to a binding
    pub matched: BTreeSet<String>,
    /// Undefined references, one entry per occurrence, in source order
    pub unmatched: Vec<String>,
}

impl Expansion {
    fn absorb(&mut self, other: Expansion) -> String {
        self.matched.extend(other.matched);
        self.unmatched.extend(other.unmatched);
        other.result
    }
}

/// Expand a single word against a scope.
pub fn expand(input: &str, scope: &VarScope) -> Result<Expansion> {
    let mut exp = Expansion::default();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(n) => exp.result.push(n),
                None => exp.result.push('\\'),
            },
            '\'' => loop {
                match chars.next() {
                    Some('\'') => break,
                    Some(ch) => exp.result.push(ch),
                    None => {
                        return Err(FrontendError::expand(
                            "unterminated single-quoted string",
                        ));
                    }
                }
            },
            '"' => loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(n) => exp.result.push(n),
                        None => exp.result.push('\\'),
                    },
                    Some('$') => expand_dollar(&mut chars, scope, &mut exp)?,
                    Some(ch) => exp.result.push(ch),
                    None => {
                        return Err(FrontendError::expand(
                            "unterminated double-quoted string",
                        ));
                    }
                }
            },
            '$' => expand_dollar(&mut chars, scope, &mut exp)?,
            _ => exp.result.push(c),
        }
    }

    Ok(exp)
}

/// Expand several words, merging their match reports.
pub fn expand_words(words: &[String], scope: &VarScope) -> Result<(Vec<String>, Expansion)> {
    let mut results = Vec::with_capacity(words.len());
    let mut merged = Expansion::default();
    for word in words {
        let exp = expand(word, scope)?;
        results.push(merged.absorb(exp));
    }
    Ok((results, merged))
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Handle the text following a `$`.
fn expand_dollar(
    chars: &mut Peekable<Chars>,
    scope: &VarScope,
    exp: &mut Expansion,
) -> Result<()> {
    match chars.peek() {
        Some('{') => {
            chars.next();
            let body = read_braced(chars)?;
            let value = expand_braced(&body, scope, exp)?;
            exp.result.push_str(&value);
            Ok(())
        }
        Some(&c) if is_name_start(c) => {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if is_name_char(c) {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            match scope.get(&name) {
                Some(value) => {
                    exp.result.push_str(value);
                    exp.matched.insert(name);
                }
                None => exp.unmatched.push(name),
            }
            Ok(())
        }
        // A bare `$` (or `$1` etc.) stays literal.
        _ => {
            exp.result.push('$');
            Ok(())
        }
    }
}

/// Collect the body of a `${...}` expression, honoring nested braces.
fn read_braced(chars: &mut Peekable<Chars>) -> Result<String> {
    let mut body = String::new();
    let mut depth = 1usize;
    for c in chars.by_ref() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(body);
                }
            }
            _ => {}
        }
        body.push(c);
    }
    Err(FrontendError::expand("unterminated variable expression"))
}

/// Evaluate a `${...}` body.
fn expand_braced(body: &str, scope: &VarScope, exp: &mut Expansion) -> Result<String> {
    let name_end = body
        .char_indices()
        .find(|(i, c)| {
            if *i == 0 {
                !is_name_start(*c)
            } else {
                !is_name_char(*c)
            }
        })
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    let name = &body[..name_end];
    if name.is_empty() {
        return Err(FrontendError::expand(format!(
            "bad variable expression ${{{}}}",
            body
        )));
    }
    let modifier = &body[name_end..];
    let value = scope.get(name);

    // Plain ${VAR}
    if modifier.is_empty() {
        return Ok(match value {
            Some(v) => {
                exp.matched.insert(name.to_string());
                v.to_string()
            }
            None => {
                exp.unmatched.push(name.to_string());
                String::new()
            }
        });
    }

    if let Some(word) = modifier.strip_prefix(":-") {
        return match value {
            Some(v) if !v.is_empty() => {
                exp.matched.insert(name.to_string());
                Ok(v.to_string())
            }
            _ => expand_subword(word, scope, exp),
        };
    }
    if let Some(word) = modifier.strip_prefix(":+") {
        return match value {
            Some(v) if !v.is_empty() => {
                exp.matched.insert(name.to_string());
                expand_subword(word, scope, exp)
            }
            _ => Ok(String::new()),
        };
    }
    if let Some(word) = modifier.strip_prefix('-') {
        return match value {
            Some(v) => {
                exp.matched.insert(name.to_string());
                Ok(v.to_string())
            }
            None => expand_subword(word, scope, exp),
        };
    }
    if let Some(word) = modifier.strip_prefix('+') {
        return match value {
            Some(_) => {
                exp.matched.insert(name.to_string());
                expand_subword(word, scope, exp)
            }
            None => Ok(String::new()),
        };
    }
    if let Some(rest) = modifier.strip_prefix('/') {
        let (pattern, replacement) = split_replacement(rest)?;
        let base = match value {
            Some(v) => {
                exp.matched.insert(name.to_string());
                v.to_string()
            }
            None => {
                exp.unmatched.push(name.to_string());
                String::new()
            }
        };
        let replacement = expand_subword(&replacement, scope, exp)?;
        return Ok(base.replacen(&pattern, &replacement, 1));
    }

    Err(FrontendError::expand(format!(
        "unsupported modifier in ${{{}}}",
        body
    )))
}

/// Expand a modifier word (defaults and alternates may themselves contain
/// variable references).
fn expand_subword(word: &str, scope: &VarScope, exp: &mut Expansion) -> Result<String> {
    let inner = expand(word, scope)?;
    Ok(exp.absorb(inner))
}

/// Split `pat/repl`, where the pattern may escape `/` with a backslash.
fn split_replacement(rest: &str) -> Result<(String, String)> {
    let mut pattern = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, n)) = chars.next() {
                    pattern.push(n);
                }
            }
            '/' => return Ok((pattern, rest[i + 1..].to_string())),
            _ => pattern.push(c),
        }
    }
    Err(FrontendError::expand(format!(
        "missing replacement in substitution {:?}",
        rest
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> VarScope {
        VarScope::new()
            .with_env("FOO", "bar")
            .with_env("EMPTY", "")
            .with_arg("VERSION", Some("1.2".to_string()))
            .with_arg("UNBOUND", None)
    }

    fn run(input: &str) -> Expansion {
        expand(input, &scope()).unwrap()
    }

    #[test]
    fn test_plain_variable() {
        assert_eq!(run("$FOO").result, "bar");
        assert_eq!(run("${FOO}").result, "bar");
        assert_eq!(run("pre-${FOO}-post").result, "pre-bar-post");
    }

    #[test]
    fn test_undefined_expands_empty_and_reported() {
        let exp = run("$MISSING/$MISSING");
        assert_eq!(exp.result, "/");
        assert_eq!(exp.unmatched, vec!["MISSING", "MISSING"]);
    }

    #[test]
    fn test_unbound_arg_is_undefined() {
        let exp = run("$UNBOUND");
        assert_eq!(exp.result, "");
        assert_eq!(exp.unmatched, vec!["UNBOUND"]);
    }

    #[test]
    fn test_matched_recorded() {
        let exp = run("${FOO}${VERSION}");
        assert!(exp.matched.contains("FOO"));
        assert!(exp.matched.contains("VERSION"));
    }

    #[test]
    fn test_default_when_unset() {
        assert_eq!(run("${MISSING:-fallback}").result, "fallback");
        assert_eq!(run("${MISSING-fallback}").result, "fallback");
        assert_eq!(run("${FOO:-fallback}").result, "bar");
    }

    #[test]
    fn test_colon_dash_treats_empty_as_unset() {
        assert_eq!(run("${EMPTY:-fallback}").result, "fallback");
        assert_eq!(run("${EMPTY-fallback}").result, "");
    }

    #[test]
    fn test_alt_forms() {
        assert_eq!(run("${FOO:+alt}").result, "alt");
        assert_eq!(run("${EMPTY:+alt}").result, "");
        assert_eq!(run("${EMPTY+alt}").result, "alt");
        assert_eq!(run("${MISSING+alt}").result, "");
    }

    #[test]
    fn test_pattern_replacement() {
        assert_eq!(run("${FOO/ba/BA}").result, "BAr");
        assert_eq!(run("${FOO/zz/BA}").result, "bar");
    }

    #[test]
    fn test_nested_default() {
        assert_eq!(run("${MISSING:-${FOO}}").result, "bar");
    }

    #[test]
    fn test_single_quotes_literal() {
        assert_eq!(run("'$FOO'").result, "$FOO");
    }

    #[test]
    fn test_double_quotes_expand() {
        assert_eq!(run("\"$FOO baz\"").result, "bar baz");
    }

    #[test]
    fn test_backslash_escapes() {
        assert_eq!(run("\\$FOO").result, "$FOO");
        assert_eq!(run("a\\ b").result, "a b");
    }

    #[test]
    fn test_bare_dollar_literal() {
        assert_eq!(run("$ $1").result, "$ $1");
    }

    #[test]
    fn test_unterminated_quote_errors() {
        assert!(expand("'open", &scope()).is_err());
        assert!(expand("\"open", &scope()).is_err());
    }

    #[test]
    fn test_unterminated_brace_errors() {
        assert!(expand("${FOO", &scope()).is_err());
    }

    #[test]
    fn test_bad_modifier_errors() {
        assert!(expand("${FOO%x}", &scope()).is_err());
    }

    #[test]
    fn test_expansion_is_pure() {
        let a = run("${VERSION}-$FOO");
        let b = run("${VERSION}-$FOO");
        assert_eq!(a.result, b.result);
        assert_eq!(a.matched, b.matched);
    }

    #[test]
    fn test_expand_words_merges_reports() {
        let words = vec!["$FOO".to_string(), "$NOPE".to_string()];
        let (results, exp) = expand_words(&words, &scope()).unwrap();
        assert_eq!(results, vec!["bar", ""]);
        assert!(exp.matched.contains("FOO"));
        assert_eq!(exp.unmatched, vec!["NOPE"]);
    }

    #[test]
    fn test_lookup_order_env_over_arg() {
        let s = VarScope::new()
            .with_arg("X", Some("from-arg".to_string()))
            .with_env("X", "from-env");
        assert_eq!(expand("$X", &s).unwrap().result, "from-env");
    }

    #[test]
    fn test_global_args_lowest_tier() {
        let s = VarScope::with_global_args(vec![("G".to_string(), Some("g".to_string()))]);
        assert_eq!(expand("$G", &s).unwrap().result, "g");
        let shadowed = s.with_env("G", "env");
        assert_eq!(expand("$G", &shadowed).unwrap().result, "env");
    }
}
