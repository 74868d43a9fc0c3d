use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::tree::RenderOutput;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("invalid json pointer path: {0}")]
    InvalidPointer(String),

    #[error("invalid escape in json pointer token: {0}")]
    InvalidEscape(String),

    #[error("cannot descend into non-object value at {0}")]
    NotAnObject(String),

    #[error("root render must produce an object, got {0}")]
    NonObjectRoot(&'static str),
}

/// Materialized UI tree state. The root is always an object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Map<String, Value>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    Set { value: Value },
    Remove,
}

impl Change {
    pub fn set(value: impl Into<Value>) -> Self {
        Change::Set {
            value: value.into(),
        }
    }
}

/// A diff rooted at `path`. Change keys are pointers relative to `path`
/// written without the leading slash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub path: String,
    pub changes: BTreeMap<String, Change>,
}

impl Patch {
    /// Root patch carrying the whole snapshot, for views that join late.
    pub fn full(snapshot: &Snapshot) -> Self {
        let changes = snapshot
            .0
            .iter()
            .map(|(key, value)| (escape_token(key), Change::set(value.clone())))
            .collect();

        Self {
            path: String::new(),
            changes,
        }
    }

    /// Root patch clearing every key of `snapshot`.
    pub fn reset(snapshot: &Snapshot) -> Self {
        let changes = snapshot
            .0
            .keys()
            .map(|key| (escape_token(key), Change::Remove))
            .collect();

        Self {
            path: String::new(),
            changes,
        }
    }

    /// Computes the patch that moves `previous` to the state in `output`.
    pub fn create_from(previous: &Snapshot, output: &RenderOutput) -> Result<Self, PatchError> {
        let tokens = parse_pointer(&output.path)?;
        let mut changes = BTreeMap::new();

        let Some((last, parent)) = tokens.split_last() else {
            let Value::Object(new) = &output.model else {
                return Err(PatchError::NonObjectRoot(value_kind(&output.model)));
            };
            diff_objects(&previous.0, new, "", &mut changes);
            return Ok(Self {
                path: String::new(),
                changes,
            });
        };

        match (lookup(&previous.0, &tokens), &output.model) {
            (Some(Value::Object(old)), Value::Object(new)) => {
                diff_objects(old, new, "", &mut changes);
                Ok(Self {
                    path: output.path.clone(),
                    changes,
                })
            }
            (old, new) => {
                if old != Some(new) {
                    changes.insert(escape_token(last), Change::set(new.clone()));
                }
                Ok(Self {
                    path: join_pointer(parent),
                    changes,
                })
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Applies the patch to a copy of `snapshot`. The input is never partially
    /// modified: on error nothing is returned.
    pub fn apply_to(&self, snapshot: &Snapshot) -> Result<Snapshot, PatchError> {
        let mut next = snapshot.clone();
        self.apply_in_place(&mut next.0)?;
        Ok(next)
    }

    fn apply_in_place(&self, root: &mut Map<String, Value>) -> Result<(), PatchError> {
        let base = parse_pointer(&self.path)?;

        for (sub_path, change) in &self.changes {
            let tokens = parse_relative(sub_path)?;
            let full: Vec<String> = base.iter().cloned().chain(tokens).collect();

            match change {
                Change::Set { value } => set_path(root, &full, value.clone())?,
                Change::Remove => remove_path(root, &full)?,
            }
        }

        Ok(())
    }

    /// Folds `next` into this patch. The result is rooted at `""` and applying
    /// it equals applying `self` then `next`.
    pub fn merge(&mut self, next: &Patch) -> Result<(), PatchError> {
        let mut merged = self.rooted()?;

        for (key, change) in next.rooted()? {
            let descendant_prefix = format!("{key}/");
            merged.retain(|existing, _| {
                existing != &key && !existing.starts_with(&descendant_prefix)
            });
            merged.insert(key, change);
        }

        self.path = String::new();
        self.changes = merged;
        Ok(())
    }

    fn rooted(&self) -> Result<BTreeMap<String, Change>, PatchError> {
        let base = parse_pointer(&self.path)?;
        let prefix: Vec<String> = base.iter().map(|token| escape_token(token)).collect();

        self.changes
            .iter()
            .map(|(sub_path, change)| {
                parse_relative(sub_path)?;
                let key = if prefix.is_empty() {
                    sub_path.clone()
                } else {
                    format!("{}/{sub_path}", prefix.join("/"))
                };
                Ok((key, change.clone()))
            })
            .collect()
    }
}

fn diff_objects(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    prefix: &str,
    changes: &mut BTreeMap<String, Change>,
) {
    for (key, new_value) in new {
        let sub_path = join_relative(prefix, key);

        match (old.get(key), new_value) {
            (Some(old_value), _) if old_value == new_value => {}
            (Some(Value::Object(old_child)), Value::Object(new_child)) => {
                diff_objects(old_child, new_child, &sub_path, changes);
            }
            _ => {
                changes.insert(sub_path, Change::set(new_value.clone()));
            }
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            changes.insert(join_relative(prefix, key), Change::Remove);
        }
    }
}

fn set_path(
    root: &mut Map<String, Value>,
    tokens: &[String],
    value: Value,
) -> Result<(), PatchError> {
    let Some((last, parents)) = tokens.split_last() else {
        return Err(PatchError::InvalidPointer(String::new()));
    };

    let mut current = root;
    for (depth, token) in parents.iter().enumerate() {
        let child = current
            .entry(token.clone())
            .or_insert_with(|| Value::Object(Map::new()));

        current = match child {
            Value::Object(map) => map,
            _ => return Err(PatchError::NotAnObject(join_pointer(&tokens[..=depth]))),
        };
    }

    current.insert(last.clone(), value);
    Ok(())
}

fn remove_path(root: &mut Map<String, Value>, tokens: &[String]) -> Result<(), PatchError> {
    let Some((last, parents)) = tokens.split_last() else {
        return Err(PatchError::InvalidPointer(String::new()));
    };

    let mut current = root;
    for (depth, token) in parents.iter().enumerate() {
        current = match current.get_mut(token) {
            Some(Value::Object(map)) => map,
            // Nothing to remove below a missing key.
            None => return Ok(()),
            Some(_) => return Err(PatchError::NotAnObject(join_pointer(&tokens[..=depth]))),
        };
    }

    current.remove(last);
    Ok(())
}

fn lookup<'a>(root: &'a Map<String, Value>, tokens: &[String]) -> Option<&'a Value> {
    let Some((first, rest)) = tokens.split_first() else {
        return None;
    };

    let mut current = root.get(first)?;
    for token in rest {
        current = current.as_object()?.get(token)?;
    }

    Some(current)
}

fn parse_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(vec![]);
    }

    if !path.starts_with('/') {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }

    path.split('/')
        .skip(1)
        .map(unescape_json_pointer_token)
        .collect()
}

fn parse_relative(sub_path: &str) -> Result<Vec<String>, PatchError> {
    if sub_path.is_empty() || sub_path.starts_with('/') {
        return Err(PatchError::InvalidPointer(sub_path.to_string()));
    }

    sub_path.split('/').map(unescape_json_pointer_token).collect()
}

fn unescape_json_pointer_token(token: &str) -> Result<String, PatchError> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();

    while let Some(ch) = chars.next() {
        if ch == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return Err(PatchError::InvalidEscape(token.to_string())),
            }
        } else {
            out.push(ch);
        }
    }

    Ok(out)
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn join_relative(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        escape_token(key)
    } else {
        format!("{prefix}/{}", escape_token(key))
    }
}

fn join_pointer(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|token| format!("/{}", escape_token(token)))
        .collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn root(model: Value) -> RenderOutput {
        RenderOutput::new("", model)
    }

    fn snapshot(value: Value) -> Snapshot {
        match value {
            Value::Object(map) => Snapshot::from_map(map),
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn second_render_only_carries_new_key() {
        let empty = Snapshot::new();
        let first = Patch::create_from(&empty, &root(json!({"a": 1}))).expect("first patch");
        assert_eq!(first.path, "");
        assert_eq!(
            first.changes,
            BTreeMap::from([("a".to_string(), Change::set(1))])
        );

        let after_first = first.apply_to(&empty).expect("apply first");
        let second = Patch::create_from(&after_first, &root(json!({"a": 1, "b": 2})))
            .expect("second patch");
        assert_eq!(second.path, "");
        assert_eq!(
            second.changes,
            BTreeMap::from([("b".to_string(), Change::set(2))])
        );

        let after_second = second.apply_to(&after_first).expect("apply second");
        assert_eq!(after_second, snapshot(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn patches_replayed_in_order_materialize_last_render() {
        let renders = [
            json!({"title": "hi", "list": {"0": "a"}}),
            json!({"title": "hi", "list": {"0": "a", "1": "b"}, "footer": true}),
            json!({"list": {"1": "c"}, "footer": {"text": "bye"}}),
            json!({"list": {"1": "c"}, "footer": "plain", "a/b": {"~": 1}}),
            json!({}),
            json!({"again": [1, 2, 3]}),
        ];

        let mut rendered = Snapshot::new();
        let mut replayed = Snapshot::new();

        for render in &renders {
            let patch = Patch::create_from(&rendered, &root(render.clone())).expect("patch");
            rendered = patch.apply_to(&rendered).expect("apply to rendered");
            replayed = patch.apply_to(&replayed).expect("apply to replayed");
            assert_eq!(replayed.to_value(), *render);
        }
    }

    #[test]
    fn applying_same_patch_twice_is_idempotent() {
        let start = snapshot(json!({"a": {"b": 1, "c": 2}, "d": 3}));
        let target = root(json!({"a": {"b": 5}, "e": {"f": {"g": 1}}}));
        let patch = Patch::create_from(&start, &target).expect("patch");

        let once = patch.apply_to(&start).expect("apply once");
        let twice = patch.apply_to(&once).expect("apply twice");
        assert_eq!(once, twice);
    }

    #[test]
    fn nested_changes_use_relative_sub_paths() {
        let start = snapshot(json!({"a": {"b": 1, "c": 2}}));
        let patch =
            Patch::create_from(&start, &root(json!({"a": {"b": 1, "c": 3}}))).expect("patch");

        assert_eq!(
            patch.changes,
            BTreeMap::from([("a/c".to_string(), Change::set(3))])
        );
    }

    #[test]
    fn removed_keys_become_remove_changes() {
        let start = snapshot(json!({"a": 1, "b": 2}));
        let patch = Patch::create_from(&start, &root(json!({"a": 1}))).expect("patch");

        assert_eq!(
            patch.changes,
            BTreeMap::from([("b".to_string(), Change::Remove)])
        );
        assert_eq!(
            patch.apply_to(&start).expect("apply"),
            snapshot(json!({"a": 1}))
        );
    }

    #[test]
    fn partial_render_is_rooted_at_its_path() {
        let start = snapshot(json!({"app": {"counter": {"value": 1}, "title": "t"}}));
        let output = RenderOutput::new("/app/counter", json!({"value": 2}));
        let patch = Patch::create_from(&start, &output).expect("patch");

        assert_eq!(patch.path, "/app/counter");
        assert_eq!(
            patch.changes,
            BTreeMap::from([("value".to_string(), Change::set(2))])
        );
        assert_eq!(
            patch.apply_to(&start).expect("apply"),
            snapshot(json!({"app": {"counter": {"value": 2}, "title": "t"}}))
        );
    }

    #[test]
    fn scalar_subtree_render_reroots_at_parent() {
        let start = snapshot(json!({"app": {"label": "old"}}));
        let output = RenderOutput::new("/app/label", json!("new"));
        let patch = Patch::create_from(&start, &output).expect("patch");

        assert_eq!(patch.path, "/app");
        assert_eq!(
            patch.changes,
            BTreeMap::from([("label".to_string(), Change::set("new"))])
        );
    }

    #[test]
    fn scalar_root_render_is_rejected() {
        let err = Patch::create_from(&Snapshot::new(), &root(json!(5))).expect_err("scalar root");
        assert_eq!(err, PatchError::NonObjectRoot("number"));
    }

    #[test]
    fn malformed_paths_fail_fast() {
        let bad_root = Patch {
            path: "app".to_string(),
            changes: BTreeMap::from([("x".to_string(), Change::set(1))]),
        };
        assert_eq!(
            bad_root.apply_to(&Snapshot::new()),
            Err(PatchError::InvalidPointer("app".to_string()))
        );

        let bad_escape = Patch {
            path: String::new(),
            changes: BTreeMap::from([("a~2".to_string(), Change::set(1))]),
        };
        assert_eq!(
            bad_escape.apply_to(&Snapshot::new()),
            Err(PatchError::InvalidEscape("a~2".to_string()))
        );

        let empty_sub_path = Patch {
            path: String::new(),
            changes: BTreeMap::from([(String::new(), Change::set(1))]),
        };
        assert!(empty_sub_path.apply_to(&Snapshot::new()).is_err());
    }

    #[test]
    fn failed_apply_leaves_snapshot_untouched() {
        let start = snapshot(json!({"a": 1}));
        let patch = Patch {
            path: String::new(),
            changes: BTreeMap::from([
                ("a/b".to_string(), Change::set(2)),
                ("c".to_string(), Change::set(3)),
            ]),
        };

        assert_eq!(
            patch.apply_to(&start),
            Err(PatchError::NotAnObject("/a".to_string()))
        );
        assert_eq!(start, snapshot(json!({"a": 1})));
    }

    #[test]
    fn merged_patch_equals_sequential_application() {
        let start = snapshot(json!({"a": {"b": 1}, "c": 2}));
        let first = Patch {
            path: "/a".to_string(),
            changes: BTreeMap::from([("b".to_string(), Change::set(10))]),
        };
        let second = Patch {
            path: String::new(),
            changes: BTreeMap::from([
                ("a".to_string(), Change::Remove),
                ("c".to_string(), Change::set(3)),
            ]),
        };
        let third = Patch {
            path: "/a".to_string(),
            changes: BTreeMap::from([("z".to_string(), Change::set(true))]),
        };

        let sequential = [&first, &second, &third]
            .iter()
            .try_fold(start.clone(), |acc, patch| patch.apply_to(&acc))
            .expect("sequential");

        let mut merged = first.clone();
        merged.merge(&second).expect("merge second");
        merged.merge(&third).expect("merge third");

        assert_eq!(merged.path, "");
        assert_eq!(merged.apply_to(&start).expect("apply merged"), sequential);
        assert_eq!(sequential, snapshot(json!({"a": {"z": true}, "c": 3})));
    }

    #[test]
    fn full_patch_carries_entire_snapshot() {
        let current = snapshot(json!({"a": 1, "x/y": {"z": 2}}));
        let patch = Patch::full(&current);

        assert_eq!(patch.path, "");
        assert_eq!(
            patch.changes,
            BTreeMap::from([
                ("a".to_string(), Change::set(1)),
                ("x~1y".to_string(), Change::set(json!({"z": 2}))),
            ])
        );
        assert_eq!(patch.apply_to(&Snapshot::new()).expect("apply"), current);
    }

    #[test]
    fn reset_patch_clears_snapshot() {
        let current = snapshot(json!({"a": 1, "b": {"c": 2}}));
        let cleared = Patch::reset(&current).apply_to(&current).expect("apply");
        assert!(cleared.is_empty());
    }

    #[test]
    fn unchanged_render_yields_empty_patch() {
        let current = snapshot(json!({"a": {"b": [1, 2]}}));
        let patch = Patch::create_from(&current, &root(json!({"a": {"b": [1, 2]}})))
            .expect("patch");
        assert!(patch.is_empty());
    }

    #[test]
    fn change_serializes_with_op_tag() {
        let patch = Patch {
            path: String::new(),
            changes: BTreeMap::from([
                ("a".to_string(), Change::set(1)),
                ("b".to_string(), Change::Remove),
            ]),
        };

        let value = serde_json::to_value(&patch).expect("serialize");
        assert_eq!(
            value,
            json!({
                "path": "",
                "changes": {
                    "a": {"op": "set", "value": 1},
                    "b": {"op": "remove"}
                }
            })
        );
    }
}
