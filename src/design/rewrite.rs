//! `_rewrite` rule matching and destination resolution.
//!
//! Rules match decoded path segments: literals, `:name` binds one segment,
//! `*` binds the remainder. Destinations are resolved relative to
//! `/<db>/_design/<ddoc>/` and may not climb above the database.

use std::collections::{BTreeMap, HashMap};
use serde_json::Value;

use super::ddoc::RewriteRule;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    /// Destination segments, database first.
    pub segments: Vec<String>,
    /// Query parameters contributed by the rule.
    pub query: BTreeMap<String, String>,
}

fn method_matches(rule: &RewriteRule, method: &str) -> bool {
    match rule.method.as_deref() {
        None | Some("*") => true,
        Some(m) => m.eq_ignore_ascii_case(method),
    }
}

fn split(path: &str) -> Vec<&str> { path.split('/').filter(|s| !s.is_empty()).collect() }

/// Bindings for `rule.from` against `rest`, or `None` if it does not match.
fn bind(pattern: &str, rest: &[String]) -> Option<(HashMap<String, String>, Vec<String>)> {
    let mut vars = HashMap::new();
    let pat = split(pattern);
    for (i, p) in pat.iter().enumerate() {
        if *p == "*" {
            return Some((vars, rest[i.min(rest.len())..].to_vec()));
        }
        let seg = rest.get(i)?;
        if let Some(name) = p.strip_prefix(':') {
            vars.insert(name.to_string(), seg.clone());
        } else if p != seg {
            return None;
        }
    }
    if pat.len() == rest.len() { Some((vars, Vec::new())) } else { None }
}

/// First rule matching `method` and `rest`, resolved to a destination under `db`.
pub fn rewrite(rules: &[RewriteRule], db: &str, ddoc_name: &str, method: &str, rest: &[String]) -> AppResult<Option<Rewritten>> {
    for rule in rules.iter().filter(|r| method_matches(r, method)) {
        let Some((vars, tail)) = bind(&rule.from, rest) else { continue };

        let mut relative: Vec<String> = Vec::new();
        for seg in split(&rule.to) {
            if seg == "*" {
                relative.extend(tail.iter().cloned());
            } else if let Some(v) = seg.strip_prefix(':').and_then(|name| vars.get(name)) {
                relative.push(v.clone());
            } else {
                relative.push(seg.to_string());
            }
        }

        let mut segments = vec![db.to_string(), "_design".to_string(), ddoc_name.to_string()];
        for seg in relative {
            match seg.as_str() {
                "." => {}
                ".." => {
                    if segments.len() <= 1 {
                        return Err(AppError::bad_request(format!("insecure_rewrite_rule: {} walks above the database", rule.to)));
                    }
                    segments.pop();
                }
                _ => segments.push(seg),
            }
        }

        let mut query = BTreeMap::new();
        for (k, v) in rule.query.iter() {
            let val = match v {
                Value::String(s) => match s.strip_prefix(':').and_then(|name| vars.get(name)) {
                    Some(bound) => bound.clone(),
                    None if s == "*" => tail.join("/"),
                    None => s.clone(),
                },
                other => other.to_string(),
            };
            query.insert(k.clone(), val);
        }
        return Ok(Some(Rewritten { segments, query }));
    }
    Ok(None)
}
