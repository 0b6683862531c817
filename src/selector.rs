use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Eq(String, String),
    NotEq(String, String),
    Exists(String),
    NotExists(String),
}

/// An equality-based label selector (`a=b,c!=d,e,!f`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Parses a selector string; empty means "match everything".
    pub fn parse(selector: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for term in selector.split(',') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            if let Some((key, value)) = term.split_once("!=") {
                requirements.push(Requirement::NotEq(key.trim().into(), value.trim().into()));
            } else if let Some((key, value)) = term.split_once("==") {
                requirements.push(Requirement::Eq(key.trim().into(), value.trim().into()));
            } else if let Some((key, value)) = term.split_once('=') {
                requirements.push(Requirement::Eq(key.trim().into(), value.trim().into()));
            } else if let Some(key) = term.strip_prefix('!') {
                requirements.push(Requirement::NotExists(key.trim().into()));
            } else if term.contains(|c: char| c.is_whitespace()) {
                return Err(anyhow!("invalid label selector term {:?}", term));
            } else {
                requirements.push(Requirement::Exists(term.into()));
            }
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        self.requirements.iter().all(|req| match req {
            Requirement::Eq(key, value) => labels.get(key) == Some(value),
            Requirement::NotEq(key, value) => labels.get(key) != Some(value),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::NotExists(key) => !labels.contains_key(key),
        })
    }
}
