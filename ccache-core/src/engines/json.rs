//! # JSON Engine
//!
//! Nested documents over `serde_json::Value`, addressed by a restricted
//! JSONPath subset: `$`, dot fields, and bracket notation with string or
//! integer indices. No filter predicates.

use serde_json::Value;

use ccache_common::{CacheError, CacheResult, ValueKind};

use crate::db::Db;

/// One resolved path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Seg {
    Key(String),
    Index(i64),
}

/// Parses `$.a.b[0]["c"]` style paths. `$`, `.`, and the empty string all
/// address the root.
fn parse_path(path: &str) -> CacheResult<Vec<Seg>> {
    let mut rest = path.strip_prefix('$').unwrap_or(path);
    let mut segs = Vec::new();

    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('.') {
            rest = stripped;
            if rest.is_empty() {
                break;
            }
            let end = rest
                .find(|c| c == '.' || c == '[')
                .unwrap_or(rest.len());
            if end == 0 {
                return Err(CacheError::other("invalid json path"));
            }
            segs.push(Seg::Key(rest[..end].to_string()));
            rest = &rest[end..];
        } else if let Some(stripped) = rest.strip_prefix('[') {
            let end = stripped
                .find(']')
                .ok_or_else(|| CacheError::other("invalid json path"))?;
            let inner = &stripped[..end];
            if (inner.starts_with('"') && inner.ends_with('"') && inner.len() >= 2)
                || (inner.starts_with('\'') && inner.ends_with('\'') && inner.len() >= 2)
            {
                segs.push(Seg::Key(inner[1..inner.len() - 1].to_string()));
            } else {
                let index: i64 = inner
                    .parse()
                    .map_err(|_| CacheError::other("invalid json path"))?;
                segs.push(Seg::Index(index));
            }
            rest = &stripped[end + 1..];
        } else {
            // Bare leading identifier, e.g. "a.b".
            let end = rest
                .find(|c| c == '.' || c == '[')
                .unwrap_or(rest.len());
            segs.push(Seg::Key(rest[..end].to_string()));
            rest = &rest[end..];
        }
    }
    Ok(segs)
}

fn resolve<'a>(root: &'a Value, segs: &[Seg]) -> Option<&'a Value> {
    let mut current = root;
    for seg in segs {
        current = match seg {
            Seg::Key(key) => current.as_object()?.get(key)?,
            Seg::Index(index) => {
                let array = current.as_array()?;
                array.get(array_index(*index, array.len())?)?
            }
        };
    }
    Some(current)
}

fn resolve_mut<'a>(root: &'a mut Value, segs: &[Seg]) -> Option<&'a mut Value> {
    let mut current = root;
    for seg in segs {
        current = match seg {
            Seg::Key(key) => current.as_object_mut()?.get_mut(key)?,
            Seg::Index(index) => {
                let len = current.as_array()?.len();
                current.as_array_mut()?.get_mut(array_index(*index, len)?)?
            }
        };
    }
    Some(current)
}

fn array_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    if resolved < 0 || resolved as usize >= len {
        None
    } else {
        Some(resolved as usize)
    }
}

fn missing_path() -> CacheError {
    CacheError::other("path does not exist")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Db {
    /// JSON.SET. Root paths replace the whole document; deeper paths
    /// require the parent to exist.
    pub fn json_set(&self, key: &str, path: &str, json_text: &str) -> CacheResult<()> {
        let value: Value = serde_json::from_str(json_text)
            .map_err(|_| CacheError::other("invalid JSON value"))?;
        let segs = parse_path(path)?;

        self.expire_if_due(key);
        self.keyspace.claim(key, ValueKind::Json)?;
        let body = self.keyspace.json.load_or_store(key, || Value::Null);
        let mut doc = body.write();

        if segs.is_empty() {
            *doc = value;
        } else {
            let (last, parents) = segs.split_last().expect("non-empty path");
            let parent = resolve_mut(&mut doc, parents).ok_or_else(missing_path)?;
            match last {
                Seg::Key(field) => {
                    let object = parent
                        .as_object_mut()
                        .ok_or_else(missing_path)?;
                    object.insert(field.clone(), value);
                }
                Seg::Index(index) => {
                    let len = parent.as_array().ok_or_else(missing_path)?.len();
                    let slot = array_index(*index, len).ok_or(CacheError::IndexOutOfRange)?;
                    parent.as_array_mut().expect("checked array")[slot] = value;
                }
            }
        }
        drop(doc);
        self.touch_write(key);
        Ok(())
    }

    /// JSON.GET: serialized value at one path, the whole document when the
    /// path list is empty, or a path-keyed object for several paths.
    pub fn json_get(&self, key: &str, paths: &[String]) -> CacheResult<Option<String>> {
        let Some(doc) = self.json_snapshot(key)? else {
            return Ok(None);
        };

        match paths {
            [] => Ok(Some(doc.to_string())),
            [path] => {
                let segs = parse_path(path)?;
                let value = resolve(&doc, &segs).ok_or_else(missing_path)?;
                Ok(Some(value.to_string()))
            }
            _ => {
                let mut combined = serde_json::Map::new();
                for path in paths {
                    let segs = parse_path(path)?;
                    let value = resolve(&doc, &segs).ok_or_else(missing_path)?;
                    combined.insert(path.clone(), value.clone());
                }
                Ok(Some(Value::Object(combined).to_string()))
            }
        }
    }

    /// JSON.DEL. Deleting the root removes the key. Returns the number of
    /// values removed (0 or 1).
    pub fn json_del(&self, key: &str, path: &str) -> CacheResult<i64> {
        let segs = parse_path(path)?;
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Json)? {
            return Ok(0);
        }

        if segs.is_empty() {
            return Ok(self.del(&[key.to_string()]));
        }

        let Some(body) = self.keyspace.json.load(key) else {
            return Ok(0);
        };
        let mut doc = body.write();
        let (last, parents) = segs.split_last().expect("non-empty path");
        let Some(parent) = resolve_mut(&mut doc, parents) else {
            return Ok(0);
        };
        let removed = match last {
            Seg::Key(field) => parent
                .as_object_mut()
                .map(|o| o.remove(field).is_some())
                .unwrap_or(false),
            Seg::Index(index) => match parent.as_array_mut() {
                Some(array) => match array_index(*index, array.len()) {
                    Some(slot) => {
                        array.remove(slot);
                        true
                    }
                    None => false,
                },
                None => false,
            },
        };
        drop(doc);
        if removed {
            self.touch_write(key);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    pub fn json_type(&self, key: &str, path: &str) -> CacheResult<Option<&'static str>> {
        let Some(doc) = self.json_snapshot(key)? else {
            return Ok(None);
        };
        let segs = parse_path(path)?;
        Ok(resolve(&doc, &segs).map(type_name))
    }

    /// JSON.ARRAPPEND. Returns the new array length.
    pub fn json_arrappend(&self, key: &str, path: &str, values: &[String]) -> CacheResult<i64> {
        self.json_array_edit(key, path, |array| {
            for text in values {
                let value: Value = serde_json::from_str(text)
                    .map_err(|_| CacheError::other("invalid JSON value"))?;
                array.push(value);
            }
            Ok(array.len() as i64)
        })
    }

    /// JSON.ARRINSERT. Index may be one past the end.
    pub fn json_arrinsert(
        &self,
        key: &str,
        path: &str,
        index: i64,
        values: &[String],
    ) -> CacheResult<i64> {
        self.json_array_edit(key, path, |array| {
            let len = array.len() as i64;
            let at = if index < 0 { len + index } else { index };
            if at < 0 || at > len {
                return Err(CacheError::IndexOutOfRange);
            }
            for (offset, text) in values.iter().enumerate() {
                let value: Value = serde_json::from_str(text)
                    .map_err(|_| CacheError::other("invalid JSON value"))?;
                array.insert(at as usize + offset, value);
            }
            Ok(array.len() as i64)
        })
    }

    pub fn json_arrlen(&self, key: &str, path: &str) -> CacheResult<Option<i64>> {
        let Some(doc) = self.json_snapshot(key)? else {
            return Ok(None);
        };
        let segs = parse_path(path)?;
        let value = resolve(&doc, &segs).ok_or_else(missing_path)?;
        Ok(value.as_array().map(|a| a.len() as i64))
    }

    /// JSON.ARRTRIM to the inclusive clipped range. Returns the new length.
    pub fn json_arrtrim(&self, key: &str, path: &str, start: i64, stop: i64) -> CacheResult<i64> {
        self.json_array_edit(key, path, |array| {
            match super::clip_range(start, stop, array.len()) {
                Some((lo, hi)) => {
                    array.truncate(hi + 1);
                    array.drain(..lo);
                }
                None => array.clear(),
            }
            Ok(array.len() as i64)
        })
    }

    /// JSON.ARRPOP at `index` (default -1). Returns the serialized value.
    pub fn json_arrpop(&self, key: &str, path: &str, index: i64) -> CacheResult<Option<String>> {
        let mut popped = None;
        self.json_array_edit(key, path, |array| {
            if let Some(slot) = array_index(index, array.len()) {
                popped = Some(array.remove(slot).to_string());
            }
            Ok(array.len() as i64)
        })?;
        Ok(popped)
    }

    /// JSON.STRAPPEND. Returns the new string length.
    pub fn json_strappend(&self, key: &str, path: &str, text: &str) -> CacheResult<i64> {
        // The appended argument is itself a JSON string literal.
        let suffix: Value = serde_json::from_str(text)
            .map_err(|_| CacheError::other("invalid JSON value"))?;
        let suffix = suffix
            .as_str()
            .ok_or_else(|| CacheError::other("expected string value"))?
            .to_string();

        self.json_value_edit(key, path, |value| match value {
            Value::String(s) => {
                s.push_str(&suffix);
                Ok(s.len() as i64)
            }
            _ => Err(CacheError::other("expected string value")),
        })
    }

    pub fn json_strlen(&self, key: &str, path: &str) -> CacheResult<Option<i64>> {
        let Some(doc) = self.json_snapshot(key)? else {
            return Ok(None);
        };
        let segs = parse_path(path)?;
        let value = resolve(&doc, &segs).ok_or_else(missing_path)?;
        Ok(value.as_str().map(|s| s.len() as i64))
    }

    /// JSON.NUMINCRBY. Returns the new value.
    pub fn json_numincrby(&self, key: &str, path: &str, delta: f64) -> CacheResult<f64> {
        self.json_number_edit(key, path, |n| n + delta)
    }

    /// JSON.NUMMULTBY. Returns the new value.
    pub fn json_nummultby(&self, key: &str, path: &str, factor: f64) -> CacheResult<f64> {
        self.json_number_edit(key, path, |n| n * factor)
    }

    fn json_snapshot(&self, key: &str) -> CacheResult<Option<Value>> {
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Json)? {
            return Ok(None);
        }
        Ok(self.keyspace.json.load(key).map(|body| body.read().clone()))
    }

    fn json_array_edit(
        &self,
        key: &str,
        path: &str,
        edit: impl FnOnce(&mut Vec<Value>) -> CacheResult<i64>,
    ) -> CacheResult<i64> {
        let segs = parse_path(path)?;
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Json)? {
            return Err(CacheError::NoSuchKey);
        }
        let body = self.keyspace.json.load(key).ok_or(CacheError::NoSuchKey)?;
        let mut doc = body.write();
        let value = resolve_mut(&mut doc, &segs).ok_or_else(missing_path)?;
        let array = value
            .as_array_mut()
            .ok_or_else(|| CacheError::other("expected array value"))?;
        let result = edit(array)?;
        drop(doc);
        self.touch_write(key);
        Ok(result)
    }

    fn json_value_edit(
        &self,
        key: &str,
        path: &str,
        edit: impl FnOnce(&mut Value) -> CacheResult<i64>,
    ) -> CacheResult<i64> {
        let segs = parse_path(path)?;
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Json)? {
            return Err(CacheError::NoSuchKey);
        }
        let body = self.keyspace.json.load(key).ok_or(CacheError::NoSuchKey)?;
        let mut doc = body.write();
        let value = resolve_mut(&mut doc, &segs).ok_or_else(missing_path)?;
        let result = edit(value)?;
        drop(doc);
        self.touch_write(key);
        Ok(result)
    }

    fn json_number_edit(
        &self,
        key: &str,
        path: &str,
        apply: impl FnOnce(f64) -> f64,
    ) -> CacheResult<f64> {
        let segs = parse_path(path)?;
        self.expire_if_due(key);
        if !self.keyspace.check(key, ValueKind::Json)? {
            return Err(CacheError::NoSuchKey);
        }
        let body = self.keyspace.json.load(key).ok_or(CacheError::NoSuchKey)?;
        let mut doc = body.write();
        let value = resolve_mut(&mut doc, &segs).ok_or_else(missing_path)?;
        let current = value
            .as_f64()
            .ok_or_else(|| CacheError::other("expected number value"))?;
        let next = apply(current);
        if !next.is_finite() {
            return Err(CacheError::Overflow);
        }
        *value = serde_json::Number::from_f64(next)
            .map(Value::Number)
            .ok_or(CacheError::Overflow)?;
        drop(doc);
        self.touch_write(key);
        Ok(next)
    }
}
