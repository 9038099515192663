// src/graph/merge.rs
//! JSON pointer and merge helpers shared by the writer, pruner, and
//! coordinator.
//!
//! - Pointers follow RFC 6901 (`/a/b/0`, `~0`/`~1` escapes).
//! - `deep_merge` is object-wise: object values merge key-by-key into the
//!   existing structure, everything else replaces outright.
//! - `merge_keep_null_deletes` is the same merge with one twist used on the
//!   partial-delete path: a null value removes the key instead of storing it.

use serde_json::{Map, Value};

/// Split a JSON pointer into unescaped segments. `""` -> `[]`.
pub fn parse_pointer(pointer: &str) -> Vec<String> {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .trim_start_matches('/')
        .split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}

/// Compile segments back into a JSON pointer. `[]` -> `""`.
pub fn compile_pointer(parts: &[String]) -> String {
    let mut out = String::new();
    for p in parts {
        out.push('/');
        out.push_str(&p.replace('~', "~0").replace('/', "~1"));
    }
    out
}

/// Read the value at `parts`, if every intermediate step exists.
pub fn pointer_get<'a>(doc: &'a Value, parts: &[String]) -> Option<&'a Value> {
    let mut cur = doc;
    for p in parts {
        match cur {
            Value::Object(m) => cur = m.get(p)?,
            Value::Array(a) => cur = a.get(p.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }
    Some(cur)
}

/// True if the full pointer path exists in `doc`.
pub fn pointer_has(doc: &Value, parts: &[String]) -> bool {
    pointer_get(doc, parts).is_some()
}

/// Set `value` at `parts`, creating intermediate objects as needed.
/// Non-object intermediates are replaced by objects.
pub fn pointer_set(doc: &mut Value, parts: &[String], value: Value) {
    if parts.is_empty() {
        *doc = value;
        return;
    }
    let mut cur = doc;
    for p in &parts[..parts.len() - 1] {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        cur = cur
            .as_object_mut()
            .expect("just ensured object")
            .entry(p.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    cur.as_object_mut()
        .expect("just ensured object")
        .insert(parts[parts.len() - 1].clone(), value);
}

/// Object-wise deep merge of `patch` into `base`.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(b), Value::Object(p)) => {
            for (k, v) in p {
                match b.get_mut(k) {
                    Some(slot) => deep_merge(slot, v),
                    None => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, other) => *slot = other.clone(),
    }
}

/// Deep merge where a null patch value deletes the key from `base`.
pub fn merge_keep_null_deletes(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(b), Value::Object(p)) => {
            for (k, v) in p {
                if v.is_null() {
                    b.remove(k);
                    continue;
                }
                match b.get_mut(k) {
                    Some(slot) => merge_keep_null_deletes(slot, v),
                    None => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, other) => *slot = other.clone(),
    }
}

/// Merge `body` into `base` at the location named by `parts`.
/// An empty pointer merges into the document root.
pub fn merge_at_pointer(base: &mut Value, parts: &[String], body: &Value) {
    if parts.is_empty() {
        deep_merge(base, body);
        return;
    }
    match pointer_get(base, parts) {
        Some(_) => {
            // Walk mutably to the existing slot and merge in place.
            let mut cur = base;
            for p in parts {
                cur = match cur {
                    Value::Object(m) => m.get_mut(p).expect("checked by pointer_get"),
                    Value::Array(a) => a
                        .get_mut(p.parse::<usize>().expect("checked by pointer_get"))
                        .expect("checked by pointer_get"),
                    _ => unreachable!("checked by pointer_get"),
                };
            }
            deep_merge(cur, body);
        }
        None => pointer_set(base, parts, body.clone()),
    }
}
