//! Instruction flag parsing.
//!
//! Each instruction parser registers the flags it accepts, then parses the
//! raw `--name[=value]` tokens the tokenizer collected. Booleans may appear
//! bare (`--link`), strings require a value (`--chown=1000`), and
//! repeated-string flags accumulate every occurrence.

use std::collections::{BTreeMap, BTreeSet};

use basalt_core::error::{FrontendError, Result};

#[derive(Debug, Clone)]
enum FlagValue {
    Bool(bool),
    String(Option<String>),
    Strings(Vec<String>),
}

/// A set of registered flags plus the raw tokens to parse them from.
#[derive(Debug)]
pub struct FlagSet {
    raw: Vec<String>,
    values: BTreeMap<String, FlagValue>,
    used: BTreeSet<String>,
}

impl FlagSet {
    pub fn new(raw: &[String]) -> Self {
        FlagSet {
            raw: raw.to_vec(),
            values: BTreeMap::new(),
            used: BTreeSet::new(),
        }
    }

    pub fn add_bool(&mut self, name: &str, default: bool) {
        self.values
            .insert(name.to_string(), FlagValue::Bool(default));
    }

    pub fn add_string(&mut self, name: &str) {
        self.values.insert(name.to_string(), FlagValue::String(None));
    }

    pub fn add_strings(&mut self, name: &str) {
        self.values
            .insert(name.to_string(), FlagValue::Strings(Vec::new()));
    }

    /// Parse the raw tokens against the registered flags.
    pub fn parse(&mut self) -> Result<()> {
        for token in self.raw.clone() {
            let body = token.strip_prefix("--").ok_or_else(|| {
                FrontendError::parse(format!("invalid flag token {:?}", token))
            })?;
            let (name, value) = match body.split_once('=') {
                Some((n, v)) => (n, Some(v)),
                None => (body, None),
            };
            let slot = self.values.get_mut(name).ok_or_else(|| {
                FrontendError::parse(format!("unknown flag: --{}", name))
            })?;
            match slot {
                FlagValue::Bool(b) => {
                    *b = match value {
                        None => true,
                        Some(v) => v.parse().map_err(|_| {
                            FrontendError::parse(format!(
                                "expected boolean value for flag --{}, got {:?}",
                                name, v
                            ))
                        })?,
                    };
                }
                FlagValue::String(s) => {
                    let v = value.ok_or_else(|| {
                        FrontendError::parse(format!("flag --{} requires a value", name))
                    })?;
                    *s = Some(unquote(v));
                }
                FlagValue::Strings(list) => {
                    let v = value.ok_or_else(|| {
                        FrontendError::parse(format!("flag --{} requires a value", name))
                    })?;
                    list.push(unquote(v));
                }
            }
            self.used.insert(name.to_string());
        }
        Ok(())
    }

    pub fn boolean(&self, name: &str) -> bool {
        match self.values.get(name) {
            Some(FlagValue::Bool(b)) => *b,
            _ => false,
        }
    }

    pub fn string(&self, name: &str) -> Option<String> {
        match self.values.get(name) {
            Some(FlagValue::String(s)) => s.clone(),
            _ => None,
        }
    }

    pub fn strings(&self, name: &str) -> Vec<String> {
        match self.values.get(name) {
            Some(FlagValue::Strings(list)) => list.clone(),
            _ => Vec::new(),
        }
    }

    /// Whether the flag appeared in the source.
    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// Names of all flags that appeared, sorted.
    pub fn used(&self) -> Vec<String> {
        self.used.iter().cloned().collect()
    }
}

/// Strip one layer of surrounding quotes from a flag value.
fn unquote(s: &str) -> String {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"'))
            || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bool_flag_bare_and_valued() {
        let mut flags = FlagSet::new(&raw(&["--link"]));
        flags.add_bool("link", false);
        flags.parse().unwrap();
        assert!(flags.boolean("link"));

        let mut flags = FlagSet::new(&raw(&["--link=false"]));
        flags.add_bool("link", true);
        flags.parse().unwrap();
        assert!(!flags.boolean("link"));
    }

    #[test]
    fn test_string_flag() {
        let mut flags = FlagSet::new(&raw(&["--chown=1000:1000"]));
        flags.add_string("chown");
        flags.parse().unwrap();
        assert_eq!(flags.string("chown"), Some("1000:1000".to_string()));
    }

    #[test]
    fn test_string_flag_requires_value() {
        let mut flags = FlagSet::new(&raw(&["--chown"]));
        flags.add_string("chown");
        let err = flags.parse().unwrap_err();
        assert!(err.to_string().contains("requires a value"));
    }

    #[test]
    fn test_repeated_strings() {
        let mut flags = FlagSet::new(&raw(&["--exclude=a", "--exclude=b"]));
        flags.add_strings("exclude");
        flags.parse().unwrap();
        assert_eq!(flags.strings("exclude"), vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let mut flags = FlagSet::new(&raw(&["--bogus"]));
        let err = flags.parse().unwrap_err();
        assert!(err.to_string().contains("unknown flag: --bogus"));
    }

    #[test]
    fn test_used_tracking() {
        let mut flags = FlagSet::new(&raw(&["--network=none"]));
        flags.add_string("network");
        flags.add_string("security");
        flags.parse().unwrap();
        assert!(flags.is_used("network"));
        assert!(!flags.is_used("security"));
        assert_eq!(flags.used(), vec!["network"]);
    }

    #[test]
    fn test_quoted_value_unwrapped() {
        let mut flags = FlagSet::new(&raw(&["--chown=\"app user\""]));
        flags.add_string("chown");
        flags.parse().unwrap();
        assert_eq!(flags.string("chown"), Some("app user".to_string()));
    }

    #[test]
    fn test_bad_bool_value() {
        let mut flags = FlagSet::new(&raw(&["--link=banana"]));
        flags.add_bool("link", false);
        assert!(flags.parse().is_err());
    }
}
