//! `#{key}#` placeholder substitution for deployment files.

use dockyard_core::{Error, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#\{([^{}#]+)\}#").expect("valid regex"))
}

/// What to do with a token that has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingToken {
    Keep,
    Fail,
}

/// Looks keys up case-insensitively in explicit values first, then in the
/// environment. A key containing `.` also matches its `_` spelling.
pub struct TokenValues<'a> {
    values: BTreeMap<String, String>,
    env: &'a BTreeMap<String, String>,
}

impl<'a> TokenValues<'a> {
    pub fn new<K, V>(values: impl IntoIterator<Item = (K, V)>, env: &'a BTreeMap<String, String>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_uppercase(), v.into()))
            .collect();
        Self { values, env }
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        let key = key.trim().to_uppercase();
        let alt = key.replace('.', "_");
        let found = [key.as_str(), alt.as_str()]
            .into_iter()
            .find_map(|k| self.values.get(k).or_else(|| self.env.get(k)));
        found.map(String::as_str)
    }
}

pub fn contains_tokens(text: &str) -> bool {
    token_pattern().is_match(text)
}

pub fn replace_tokens(text: &str, values: &TokenValues<'_>, missing: MissingToken) -> Result<String> {
    let mut unresolved = None;

    let replaced = token_pattern().replace_all(text, |caps: &Captures<'_>| {
        match values.lookup(&caps[1]) {
            Some(value) => value.to_string(),
            None => {
                if unresolved.is_none() {
                    unresolved = Some(caps[1].to_string());
                }
                caps[0].to_string()
            }
        }
    });

    match (unresolved, missing) {
        (Some(key), MissingToken::Fail) => Err(Error::config(format!(
            "Could not find replace value for key {}",
            key.to_uppercase()
        ))),
        _ => Ok(replaced.into_owned()),
    }
}
