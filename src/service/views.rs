//! View querying over map output: collation, key filtering and the builtin
//! `_count` / `_sum` reducers.

use std::cmp::Ordering;
use serde_json::{json, Value};

use crate::engine::ViewRow;
use crate::error::{AppError, AppResult};

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Key collation: null < false < true < numbers < strings < arrays < objects.
pub fn collate(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().unwrap_or(0.0).partial_cmp(&y.as_f64().unwrap_or(0.0)).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let o = collate(l, r);
                if o != Ordering::Equal { return o; }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let o = lk.cmp(rk).then_with(|| collate(lv, rv));
                if o != Ordering::Equal { return o; }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Query options understood by stored and temporary views.
#[derive(Debug, Clone, Default)]
pub struct ViewQuery {
    pub keys: Option<Vec<Value>>,
    pub key: Option<Value>,
    pub reduce: Option<bool>,
    pub group: bool,
    pub descending: bool,
    pub limit: Option<usize>,
    pub include_docs: bool,
}

impl ViewQuery {
    pub fn from_params(params: &std::collections::BTreeMap<String, String>, body: Option<&Value>) -> AppResult<Self> {
        let json_param = |name: &str| -> AppResult<Option<Value>> {
            match params.get(name) {
                Some(raw) => serde_json::from_str(raw).map(Some).map_err(|_| AppError::bad_request(format!("invalid JSON in {}", name))),
                None => Ok(None),
            }
        };
        let flag = |name: &str| params.get(name).map(|v| v == "true");
        let keys = match body.and_then(|b| b.get("keys")) {
            Some(Value::Array(k)) => Some(k.clone()),
            Some(_) => return Err(AppError::bad_request("`keys` must be an array")),
            None => match json_param("keys")? {
                Some(Value::Array(k)) => Some(k),
                Some(_) => return Err(AppError::bad_request("`keys` must be an array")),
                None => None,
            },
        };
        let limit = match params.get("limit") {
            Some(l) => Some(l.parse::<usize>().map_err(|_| AppError::bad_request("limit must be a non-negative integer"))?),
            None => None,
        };
        Ok(Self {
            keys,
            key: json_param("key")?,
            reduce: flag("reduce"),
            group: flag("group").unwrap_or(false),
            descending: flag("descending").unwrap_or(false),
            limit,
            include_docs: flag("include_docs").unwrap_or(false),
        })
    }
}

fn reduce_values(reducer: &str, rows: &[ViewRow]) -> AppResult<Value> {
    match reducer {
        "_count" => Ok(json!(rows.len())),
        "_sum" => {
            let mut total = 0f64;
            let mut all_int = true;
            for r in rows {
                let n = r.value.as_f64().ok_or_else(|| AppError::bad_request(format!("_sum needs numeric values, got {}", r.value)))?;
                all_int &= r.value.is_i64() || r.value.is_u64();
                total += n;
            }
            Ok(if all_int { json!(total as i64) } else { json!(total) })
        }
        other => Err(AppError::bad_request(format!("unsupported reduce {}", other))),
    }
}

/// Shape map output into a view response. `docs` resolves ids for `include_docs`.
pub fn query_view(
    mut rows: Vec<ViewRow>,
    reducer: Option<&str>,
    q: &ViewQuery,
    docs: &dyn Fn(&str) -> Option<Value>,
) -> AppResult<Value> {
    rows.sort_by(|a, b| collate(&a.key, &b.key).then_with(|| a.id.cmp(&b.id)));
    let total_rows = rows.len();

    if let Some(keys) = q.keys.as_ref() {
        let mut picked = Vec::new();
        for k in keys {
            picked.extend(rows.iter().filter(|r| collate(&r.key, k) == Ordering::Equal).cloned());
        }
        rows = picked;
    } else if let Some(k) = q.key.as_ref() {
        rows.retain(|r| collate(&r.key, k) == Ordering::Equal);
    }
    if q.descending { rows.reverse(); }

    if let Some(reducer) = reducer.filter(|_| q.reduce != Some(false)) {
        if !q.group {
            return Ok(json!({ "rows": [{ "key": Value::Null, "value": reduce_values(reducer, &rows)? }] }));
        }
        let mut out: Vec<Value> = Vec::new();
        let mut start = 0;
        while start < rows.len() {
            let mut end = start + 1;
            while end < rows.len() && collate(&rows[end].key, &rows[start].key) == Ordering::Equal { end += 1; }
            out.push(json!({ "key": rows[start].key, "value": reduce_values(reducer, &rows[start..end])? }));
            start = end;
        }
        if let Some(limit) = q.limit { out.truncate(limit); }
        return Ok(json!({ "rows": out }));
    }

    if let Some(limit) = q.limit { rows.truncate(limit); }
    let out: Vec<Value> = rows.into_iter().map(|r| {
        let mut row = json!({ "id": r.id, "key": r.key, "value": r.value });
        if q.include_docs { row["doc"] = docs(&r.id).unwrap_or(Value::Null); }
        row
    }).collect();
    Ok(json!({ "total_rows": total_rows, "offset": 0, "rows": out }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn row(id: &str, key: Value, value: Value) -> ViewRow { ViewRow { id: id.into(), key, value } }

    fn no_docs(_: &str) -> Option<Value> { None }

    #[test]
    fn collation_orders_by_type_then_value() {
        let mut keys = vec![json!("b"), json!(2), json!(null), json!([1]), json!(true), json!("a"), json!(1.5), json!(false), json!({"a": 1})];
        keys.sort_by(collate);
        assert_eq!(keys, vec![json!(null), json!(false), json!(true), json!(1.5), json!(2), json!("a"), json!("b"), json!([1]), json!({"a": 1})]);
    }

    #[test]
    fn keys_filter_in_request_order() {
        let rows = vec![row("a_doc", json!("a_doc"), json!(1)), row("song", json!("song"), json!(1)), row("x", json!("x"), json!(1))];
        let q = ViewQuery { keys: Some(vec![json!("song"), json!("a_doc")]), ..Default::default() };
        let out = query_view(rows, None, &q, &no_docs).unwrap();
        assert_eq!(out["total_rows"], 3);
        assert_eq!(out["rows"][0]["id"], "song");
        assert_eq!(out["rows"][1]["id"], "a_doc");
    }

    #[test]
    fn builtin_reducers() {
        let rows = || vec![row("a", json!("x"), json!(2)), row("b", json!("y"), json!(3)), row("c", json!("x"), json!(4))];
        let q = ViewQuery::default();
        assert_eq!(query_view(rows(), Some("_sum"), &q, &no_docs).unwrap()["rows"][0]["value"], 9);
        assert_eq!(query_view(rows(), Some("_count"), &q, &no_docs).unwrap()["rows"][0]["value"], 3);
        let grouped = query_view(rows(), Some("_sum"), &ViewQuery { group: true, ..Default::default() }, &no_docs).unwrap();
        assert_eq!(grouped["rows"], json!([{"key": "x", "value": 6}, {"key": "y", "value": 3}]));
        let unreduced = query_view(rows(), Some("_sum"), &ViewQuery { reduce: Some(false), ..Default::default() }, &no_docs).unwrap();
        assert_eq!(unreduced["total_rows"], 3);
    }

    #[test]
    fn params_parse_json_values() {
        let mut p = BTreeMap::new();
        p.insert("key".to_string(), "\"joe\"".to_string());
        p.insert("reduce".to_string(), "false".to_string());
        p.insert("limit".to_string(), "2".to_string());
        let q = ViewQuery::from_params(&p, None).unwrap();
        assert_eq!(q.key, Some(json!("joe")));
        assert_eq!(q.reduce, Some(false));
        assert_eq!(q.limit, Some(2));
        p.insert("key".to_string(), "joe".to_string());
        assert!(ViewQuery::from_params(&p, None).is_err());
        let q = ViewQuery::from_params(&BTreeMap::new(), Some(&json!({"keys": ["a_doc", "song"]}))).unwrap();
        assert_eq!(q.keys.unwrap().len(), 2);
    }
}
