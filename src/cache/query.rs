//! A small jq-style filter language for querying stored JSON.
//!
//! Supported:
//!
//! | filter          | meaning                                     |
//! |-----------------|---------------------------------------------|
//! | `.`             | identity                                    |
//! | `.field`        | object field (`null` when missing)          |
//! | `."some field"` | quoted object field                         |
//! | `["field"]`     | bracketed object field                      |
//! | `[n]`           | array element, negative counts from the end |
//! | `[]`            | iterate array elements or object values     |
//! | `[a:b]`         | array or string slice, bounds optional      |
//! | `a \| b`        | feed every output of `a` into `b`           |
//! | `keys`          | sorted object keys, or array indices        |
//! | `length`        | element, field or character count           |
//! | `type`          | JSON type name                              |

use anyhow::{Context, Result, bail};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Field(String),
    Index(i64),
    Iterate,
    Slice(Option<i64>, Option<i64>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    Path(Vec<Step>),
    Keys,
    Length,
    Type,
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    stages: Vec<Stage>,
}

impl Filter {
    /// Parse `expression`.
    ///
    /// # Errors
    /// Returns an error describing the first unsupported or malformed stage.
    pub fn parse(expression: &str) -> Result<Self> {
        let stages = split_stages(expression)?
            .into_iter()
            .map(parse_stage)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { stages })
    }

    /// Run the filter against `input`, returning every output value.
    ///
    /// # Errors
    /// Returns an error when a step does not apply to the value it meets,
    /// e.g. indexing a string with a field name.
    pub fn apply(&self, input: &Value) -> Result<Vec<Value>> {
        let mut values = vec![input.clone()];
        for stage in &self.stages {
            let mut next = Vec::new();
            for value in values {
                next.extend(apply_stage(stage, value)?);
            }
            values = next;
        }
        Ok(values)
    }
}

/// Split on `|` outside of quoted strings.
fn split_stages(expression: &str) -> Result<Vec<&str>> {
    let mut stages = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in expression.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '|' if !in_string => {
                stages.push(expression[start..offset].trim());
                start = offset + 1;
            }
            _ => {}
        }
    }
    if in_string {
        bail!("Unterminated string in filter '{expression}'");
    }
    stages.push(expression[start..].trim());
    if stages.iter().any(|stage| stage.is_empty()) {
        bail!("Empty stage in filter '{expression}'");
    }
    Ok(stages)
}

fn parse_stage(stage: &str) -> Result<Stage> {
    match stage {
        "keys" => return Ok(Stage::Keys),
        "length" => return Ok(Stage::Length),
        "type" => return Ok(Stage::Type),
        _ => {}
    }
    if !stage.starts_with('.') {
        bail!("Unsupported filter '{stage}': expected a path starting with '.', or keys, length, type");
    }

    let chars: Vec<char> = stage.chars().collect();
    let mut steps = Vec::new();
    let mut pos = 0;
    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                pos += 1;
                match chars.get(pos) {
                    None | Some('[') => {}
                    Some('"') => {
                        let (field, end) = read_quoted(&chars, pos)?;
                        steps.push(Step::Field(field));
                        pos = end;
                    }
                    Some(c) if is_ident_char(*c) => {
                        let end = chars[pos..]
                            .iter()
                            .position(|c| !is_ident_char(*c))
                            .map_or(chars.len(), |n| pos + n);
                        steps.push(Step::Field(chars[pos..end].iter().collect()));
                        pos = end;
                    }
                    Some(c) => bail!("Unexpected '{c}' after '.' in '{stage}'"),
                }
            }
            '[' => {
                let close = find_closing_bracket(&chars, pos)
                    .with_context(|| format!("Missing ']' in '{stage}'"))?;
                let inner: String = chars[pos + 1..close].iter().collect();
                steps.push(parse_bracket(inner.trim())?);
                pos = close + 1;
            }
            c => bail!("Unexpected '{c}' in '{stage}'"),
        }
    }
    Ok(Stage::Path(steps))
}

const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Read a JSON string literal starting at `start`; returns the decoded text
/// and the position after the closing quote.
fn read_quoted(chars: &[char], start: usize) -> Result<(String, usize)> {
    let mut escaped = false;
    for (offset, c) in chars[start + 1..].iter().enumerate() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => {
                let end = start + 1 + offset;
                let literal: String = chars[start..=end].iter().collect();
                let text = serde_json::from_str(&literal)
                    .with_context(|| format!("Invalid string literal {literal}"))?;
                return Ok((text, end + 1));
            }
            _ => {}
        }
    }
    bail!("Unterminated string in filter")
}

fn find_closing_bracket(chars: &[char], open: usize) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in chars[open + 1..].iter().enumerate() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ']' if !in_string => return Some(open + 1 + offset),
            _ => {}
        }
    }
    None
}

fn parse_bracket(inner: &str) -> Result<Step> {
    if inner.is_empty() {
        return Ok(Step::Iterate);
    }
    if inner.starts_with('"') {
        let field: String = serde_json::from_str(inner)
            .with_context(|| format!("Invalid field name {inner}"))?;
        return Ok(Step::Field(field));
    }
    if let Some((from, to)) = inner.split_once(':') {
        return Ok(Step::Slice(parse_bound(from)?, parse_bound(to)?));
    }
    inner
        .parse()
        .map(Step::Index)
        .with_context(|| format!("Invalid index '{inner}'"))
}

fn parse_bound(bound: &str) -> Result<Option<i64>> {
    let bound = bound.trim();
    if bound.is_empty() {
        return Ok(None);
    }
    bound
        .parse()
        .map(Some)
        .with_context(|| format!("Invalid slice bound '{bound}'"))
}

fn apply_stage(stage: &Stage, value: Value) -> Result<Vec<Value>> {
    match stage {
        Stage::Path(steps) => {
            let mut values = vec![value];
            for step in steps {
                let mut next = Vec::new();
                for value in values {
                    next.extend(apply_step(step, value)?);
                }
                values = next;
            }
            Ok(values)
        }
        Stage::Keys => keys(&value).map(|keys| vec![keys]),
        Stage::Length => length(&value).map(|length| vec![length]),
        Stage::Type => Ok(vec![Value::String(type_name(&value).to_string())]),
    }
}

fn apply_step(step: &Step, value: Value) -> Result<Vec<Value>> {
    match (step, value) {
        (Step::Field(field), Value::Object(mut map)) => {
            Ok(vec![map.remove(field).unwrap_or(Value::Null)])
        }
        (Step::Field(_) | Step::Index(_) | Step::Slice(..), Value::Null) => Ok(vec![Value::Null]),
        (Step::Field(field), other) => {
            bail!("Cannot index {} with \"{field}\"", type_name(&other))
        }
        (Step::Index(index), Value::Array(mut items)) => {
            let element = resolve_index(*index, items.len())
                .map_or(Value::Null, |i| items.swap_remove(i));
            Ok(vec![element])
        }
        (Step::Index(index), other) => bail!("Cannot index {} with {index}", type_name(&other)),
        (Step::Iterate, Value::Array(items)) => Ok(items),
        (Step::Iterate, Value::Object(map)) => Ok(map.into_iter().map(|(_, v)| v).collect()),
        (Step::Iterate, other) => bail!("Cannot iterate over {}", type_name(&other)),
        (Step::Slice(from, to), Value::Array(items)) => {
            let (start, end) = slice_bounds(*from, *to, items.len());
            Ok(vec![Value::Array(items[start..end].to_vec())])
        }
        (Step::Slice(from, to), Value::String(text)) => {
            let chars: Vec<char> = text.chars().collect();
            let (start, end) = slice_bounds(*from, *to, chars.len());
            Ok(vec![Value::String(chars[start..end].iter().collect())])
        }
        (Step::Slice(..), other) => bail!("Cannot slice {}", type_name(&other)),
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

fn slice_bounds(from: Option<i64>, to: Option<i64>, len: usize) -> (usize, usize) {
    let clamp = |bound: i64| -> usize {
        let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
        let resolved = if bound < 0 { signed_len + bound } else { bound };
        usize::try_from(resolved.clamp(0, signed_len)).unwrap_or(len)
    };
    let start = from.map_or(0, clamp);
    let end = to.map_or(len, clamp);
    (start, end.max(start))
}

fn keys(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Ok(Value::from(keys.into_iter().cloned().collect::<Vec<_>>()))
        }
        Value::Array(items) => Ok(Value::from((0..items.len()).collect::<Vec<_>>())),
        other => bail!("{} has no keys", type_name(other)),
    }
}

fn length(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => Ok(Value::from(map.len())),
        Value::Array(items) => Ok(Value::from(items.len())),
        Value::String(text) => Ok(Value::from(text.chars().count())),
        Value::Null => Ok(Value::from(0)),
        Value::Number(number) => {
            if let Some(n) = number.as_i64() {
                Ok(Value::from(n.unsigned_abs()))
            } else {
                Ok(Value::from(number.as_f64().map_or(0.0, f64::abs)))
            }
        }
        Value::Bool(_) => bail!("boolean has no length"),
    }
}

/// JSON type name as jq reports it.
#[must_use]
pub const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(filter: &str, input: &Value) -> Result<Vec<Value>> {
        Filter::parse(filter)?.apply(input)
    }

    fn sample() -> Value {
        json!({
            "users": [
                {"name": "ada", "tags": ["admin", "ops"]},
                {"name": "bob", "tags": []},
                {"name": "cy", "tags": ["ops"]}
            ],
            "meta data": {"total": 3, "next": null}
        })
    }

    #[test]
    fn test_identity_and_fields() -> Result<()> {
        let input = sample();
        assert_eq!(run(".", &input)?, vec![input.clone()]);
        assert_eq!(run(".users[0].name", &input)?, vec![json!("ada")]);
        assert_eq!(run(".\"meta data\".total", &input)?, vec![json!(3)]);
        assert_eq!(run(".[\"meta data\"].total", &input)?, vec![json!(3)]);
        assert_eq!(run(".missing", &input)?, vec![Value::Null]);
        assert_eq!(run(".missing.deeper", &input)?, vec![Value::Null]);
        Ok(())
    }

    #[test]
    fn test_indexing_and_slices() -> Result<()> {
        let input = json!([10, 20, 30, 40]);
        assert_eq!(run(".[-1]", &input)?, vec![json!(40)]);
        assert_eq!(run(".[9]", &input)?, vec![Value::Null]);
        assert_eq!(run(".[1:3]", &input)?, vec![json!([20, 30])]);
        assert_eq!(run(".[:-2]", &input)?, vec![json!([10, 20])]);
        assert_eq!(run(".[3:1]", &input)?, vec![json!([])]);
        assert_eq!(run(".[1:]", &json!("héllo"))?, vec![json!("éllo")]);
        Ok(())
    }

    #[test]
    fn test_iteration_and_pipes() -> Result<()> {
        let input = sample();
        assert_eq!(
            run(".users[].name", &input)?,
            vec![json!("ada"), json!("bob"), json!("cy")]
        );
        assert_eq!(
            run(".users[] | .tags | length", &input)?,
            vec![json!(2), json!(0), json!(1)]
        );
        assert_eq!(run(".users | length", &input)?, vec![json!(3)]);
        Ok(())
    }

    #[test]
    fn test_builtins() -> Result<()> {
        let input = sample();
        assert_eq!(run("keys", &input)?, vec![json!(["meta data", "users"])]);
        assert_eq!(run(".users | keys", &input)?, vec![json!([0, 1, 2])]);
        assert_eq!(run(".users | type", &input)?, vec![json!("array")]);
        assert_eq!(run(".\"meta data\".next | type", &input)?, vec![json!("null")]);
        assert_eq!(run(".users[0].name | length", &input)?, vec![json!(3)]);
        Ok(())
    }

    #[test]
    fn test_pipe_inside_quotes_is_not_a_stage() -> Result<()> {
        let input = json!({"a|b": 1});
        assert_eq!(run(".\"a|b\"", &input)?, vec![json!(1)]);
        Ok(())
    }

    #[test]
    fn test_type_errors() {
        let input = sample();
        let err = run(".users.name", &input).unwrap_err();
        assert!(err.to_string().contains("Cannot index array"));
        assert!(run(".users[0].name[]", &input).is_err());
        assert!(run(".users[0] | .name | keys", &input).is_err());
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["users", ".users[", ". | ", ".a..b", ".[x]", ".\"open", "select(.a)"] {
            assert!(Filter::parse(bad).is_err(), "{bad} should not parse");
        }
    }
}
