/*!
Rule compilation.

Turns a rule's JSON definition into sub-rule specifications: sorted maps
from dotted field name to the pattern alternatives constraining that
field. Objects mirror the event shape; leaves are arrays of scalars or
matcher objects; `"$or"` expands into the cross product of its branches.

Everything is validated here, before any machine mutation, so a rejected
rule leaves the machine exactly as it was.
*/

use std::collections::BTreeMap;

use itertools::iproduct;
use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    numeric,
    pattern::{Pattern, Range, Segment, WildcardPattern},
};

/// One conjunction: field name → alternatives, ordered by field name.
pub(crate) type SubRuleSpec = BTreeMap<String, Vec<Pattern>>;

pub(crate) fn compile(value: &Value) -> Result<Vec<SubRuleSpec>> {
    let Value::Object(map) = value else {
        return Err(Error::InvalidRule("rule must be a JSON object".into()));
    };
    compile_object(map, "")
}

fn compile_object(map: &Map<String, Value>, path: &str) -> Result<Vec<SubRuleSpec>> {
    if map.is_empty() {
        return Err(Error::InvalidRule(format!(
            "no constraints under `{}`",
            if path.is_empty() { "the rule root" } else { path }
        )));
    }
    let mut specs: Vec<SubRuleSpec> = vec![BTreeMap::new()];
    for (key, val) in map {
        let alternatives: Vec<SubRuleSpec> = if key == "$or" {
            let Value::Array(branches) = val else {
                return Err(Error::InvalidRule("`$or` must hold an array".into()));
            };
            if branches.len() < 2 {
                return Err(Error::InvalidRule(
                    "`$or` needs at least two branches".into(),
                ));
            }
            let mut alts = Vec::new();
            for branch in branches {
                let Value::Object(m) = branch else {
                    return Err(Error::InvalidRule("`$or` branches must be objects".into()));
                };
                alts.extend(compile_object(m, path)?);
            }
            alts
        } else {
            let sub_path = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            match val {
                Value::Object(inner) => compile_object(inner, &sub_path)?,
                Value::Array(items) => {
                    vec![BTreeMap::from([(
                        sub_path.clone(),
                        compile_leaf(items, &sub_path)?,
                    )])]
                }
                _ => {
                    return Err(Error::InvalidRule(format!(
                        "field `{sub_path}` must hold an array of values or a nested object"
                    )));
                }
            }
        };
        specs = cross(specs, &alternatives)?;
    }
    Ok(specs)
}

fn cross(left: Vec<SubRuleSpec>, right: &[SubRuleSpec]) -> Result<Vec<SubRuleSpec>> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for (l, r) in iproduct!(left.iter(), right.iter()) {
        let mut merged = l.clone();
        for (k, v) in r {
            if merged.insert(k.clone(), v.clone()).is_some() {
                return Err(Error::InvalidRule(format!(
                    "duplicate constraint for field `{k}`"
                )));
            }
        }
        out.push(merged);
    }
    Ok(out)
}

fn compile_leaf(items: &[Value], path: &str) -> Result<Vec<Pattern>> {
    if items.is_empty() {
        return Err(Error::InvalidRule(format!("field `{path}` has no values")));
    }
    let mut patterns = Vec::with_capacity(items.len());
    for item in items {
        patterns.push(compile_matcher(item, path)?);
    }
    if patterns.contains(&Pattern::Absent) && patterns.len() > 1 {
        return Err(Error::InvalidRule(format!(
            "`exists: false` must be the only constraint on field `{path}`"
        )));
    }
    Ok(patterns)
}

fn compile_matcher(item: &Value, path: &str) -> Result<Pattern> {
    match item {
        Value::String(s) => Ok(Pattern::Exact(quote(s))),
        Value::Number(_) => {
            let f = number(item, path)?;
            Ok(Pattern::NumericEq(numeric::canonicalize(f)?))
        }
        Value::Bool(b) => Ok(Pattern::Exact(b.to_string())),
        Value::Null => Ok(Pattern::Exact("null".into())),
        Value::Object(m) => matcher_object(m, path),
        Value::Array(_) => Err(Error::InvalidRule(format!(
            "nested arrays are not a legal value for field `{path}`"
        ))),
    }
}

fn matcher_object(m: &Map<String, Value>, path: &str) -> Result<Pattern> {
    if m.len() != 1 {
        return Err(Error::InvalidRule(format!(
            "matcher objects on field `{path}` hold exactly one operator"
        )));
    }
    let (op, arg) = m.iter().next().expect("one entry");
    match op.as_str() {
        "prefix" => Ok(Pattern::Prefix(open_quote(string(arg, op, path)?))),
        "suffix" => Ok(Pattern::Suffix(close_quote(string(arg, op, path)?))),
        "equals-ignore-case" => Ok(Pattern::EqualsIgnoreCase(quote(string(arg, op, path)?))),
        "wildcard" => {
            let source = wildcard_normal_form(string(arg, op, path)?)?;
            Ok(Pattern::Wildcard(WildcardPattern::parse(&source)?))
        }
        "numeric" => numeric_matcher(arg, path),
        "anything-but" => anything_but(arg, path),
        "exists" => match arg {
            Value::Bool(true) => Ok(Pattern::Exists),
            Value::Bool(false) => Ok(Pattern::Absent),
            _ => Err(Error::InvalidRule(format!(
                "`exists` on field `{path}` takes true or false"
            ))),
        },
        other => Err(Error::InvalidRule(format!(
            "unknown matcher `{other}` on field `{path}`"
        ))),
    }
}

fn numeric_matcher(arg: &Value, path: &str) -> Result<Pattern> {
    let Value::Array(terms) = arg else {
        return Err(Error::InvalidRule(format!(
            "`numeric` on field `{path}` takes an array of comparisons"
        )));
    };
    match terms.as_slice() {
        [op, v] => {
            let v = number(v, path)?;
            match comparator(op, path)? {
                "=" => Ok(Pattern::NumericEq(numeric::canonicalize(v)?)),
                "<" => Ok(Pattern::Range(Range::less_than(v)?)),
                "<=" => Ok(Pattern::Range(Range::less_than_or_equal_to(v)?)),
                ">" => Ok(Pattern::Range(Range::greater_than(v)?)),
                ">=" => Ok(Pattern::Range(Range::greater_than_or_equal_to(v)?)),
                other => Err(Error::InvalidRule(format!(
                    "unknown comparator `{other}` on field `{path}`"
                ))),
            }
        }
        [op1, v1, op2, v2] => {
            let (bottom, top) = (number(v1, path)?, number(v2, path)?);
            let open_bottom = match comparator(op1, path)? {
                ">" => true,
                ">=" => false,
                other => {
                    return Err(Error::InvalidRule(format!(
                        "two-sided `numeric` on field `{path}` opens with > or >=, not `{other}`"
                    )));
                }
            };
            let open_top = match comparator(op2, path)? {
                "<" => true,
                "<=" => false,
                other => {
                    return Err(Error::InvalidRule(format!(
                        "two-sided `numeric` on field `{path}` closes with < or <=, not `{other}`"
                    )));
                }
            };
            Ok(Pattern::Range(Range::between(
                bottom,
                open_bottom,
                top,
                open_top,
            )?))
        }
        _ => Err(Error::InvalidRule(format!(
            "`numeric` on field `{path}` takes one or two comparisons"
        ))),
    }
}

fn anything_but(arg: &Value, path: &str) -> Result<Pattern> {
    match arg {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            Ok(Pattern::anything_but([excluded_literal(arg, path)?]))
        }
        Value::Array(items) => {
            if items.is_empty() {
                return Err(Error::InvalidRule(format!(
                    "`anything-but` on field `{path}` excludes at least one value"
                )));
            }
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(excluded_literal(item, path)?);
            }
            Ok(Pattern::anything_but(values))
        }
        Value::Object(m) => {
            if let Some(prefix) = m.get("prefix").filter(|_| m.len() == 1) {
                Ok(Pattern::AnythingButPrefix(open_quote(string(
                    prefix, "prefix", path,
                )?)))
            } else {
                Err(Error::InvalidRule(format!(
                    "`anything-but` on field `{path}` takes values or {{\"prefix\": ...}}"
                )))
            }
        }
        Value::Null => Err(Error::InvalidRule(format!(
            "`anything-but` on field `{path}` cannot exclude null"
        ))),
    }
}

fn excluded_literal(item: &Value, path: &str) -> Result<String> {
    match item {
        Value::String(s) => Ok(quote(s)),
        Value::Number(_) => Ok(numeric::canonicalize(number(item, path)?)?),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::InvalidRule(format!(
            "`anything-but` on field `{path}` excludes strings, numbers or booleans"
        ))),
    }
}

/// Re-quotes a wildcard source into normal form: literal runs get the
/// JSON escaping that event values carry, stars survive, and the whole
/// thing is wrapped in the value quotes.
fn wildcard_normal_form(raw: &str) -> Result<String> {
    let parsed = WildcardPattern::parse(raw)?;
    let mut out = String::from("\"");
    for segment in parsed.segments() {
        match segment {
            Segment::Star => out.push('*'),
            Segment::Literal(bytes) => {
                let text =
                    std::str::from_utf8(bytes).expect("wildcard literals come from a str");
                let quoted = serde_json::to_string(text)
                    .expect("string serialization is infallible");
                for ch in quoted[1..quoted.len() - 1].chars() {
                    match ch {
                        '*' => out.push_str("\\*"),
                        '\\' => out.push_str("\\\\"),
                        c => out.push(c),
                    }
                }
            }
        }
    }
    out.push('"');
    Ok(out)
}

fn string<'a>(arg: &'a Value, op: &str, path: &str) -> Result<&'a str> {
    match arg {
        Value::String(s) => Ok(s),
        _ => Err(Error::InvalidRule(format!(
            "`{op}` on field `{path}` takes a string"
        ))),
    }
}

fn comparator<'a>(v: &'a Value, path: &str) -> Result<&'a str> {
    match v {
        Value::String(s) => Ok(s),
        _ => Err(Error::InvalidRule(format!(
            "`numeric` on field `{path}` alternates comparators and numbers"
        ))),
    }
}

fn number(v: &Value, path: &str) -> Result<f64> {
    v.as_f64().ok_or_else(|| {
        Error::InvalidNumber(format!("field `{path}` expects a finite number, got {v}"))
    })
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).expect("string serialization is infallible")
}

/// Opening quote only: a prefix constrains the front of a quoted value.
fn open_quote(s: &str) -> String {
    let quoted = quote(s);
    quoted[..quoted.len() - 1].to_owned()
}

/// Closing quote only: a suffix constrains the back of a quoted value.
fn close_quote(s: &str) -> String {
    quote(s)[1..].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_str(rule: &str) -> Result<Vec<SubRuleSpec>> {
        compile(&serde_json::from_str(rule).unwrap())
    }

    #[test]
    fn exact_leaves_are_quoted() {
        let specs = compile_str(r#"{"a": {"b": ["x", 5, true]}}"#).unwrap();
        assert_eq!(specs.len(), 1);
        let patterns = &specs[0]["a.b"];
        assert_eq!(patterns[0], Pattern::Exact("\"x\"".into()));
        assert_eq!(
            patterns[1],
            Pattern::NumericEq(numeric::canonicalize(5.0).unwrap())
        );
        assert_eq!(patterns[2], Pattern::Exact("true".into()));
    }

    #[test]
    fn matcher_objects() {
        let specs = compile_str(
            r#"{"f": [{"prefix": "ab"}], "g": [{"suffix": "yz"}], "h": [{"equals-ignore-case": "Hi"}], "i": [{"exists": true}], "j": [{"exists": false}]}"#,
        )
        .unwrap();
        let spec = &specs[0];
        assert_eq!(spec["f"], vec![Pattern::Prefix("\"ab".into())]);
        assert_eq!(spec["g"], vec![Pattern::Suffix("yz\"".into())]);
        assert_eq!(spec["h"], vec![Pattern::EqualsIgnoreCase("\"Hi\"".into())]);
        assert_eq!(spec["i"], vec![Pattern::Exists]);
        assert_eq!(spec["j"], vec![Pattern::Absent]);
    }

    #[test]
    fn numeric_grammar() {
        let specs = compile_str(r#"{"n": [{"numeric": [">", 0, "<=", 5]}]}"#).unwrap();
        assert_eq!(
            specs[0]["n"],
            vec![Pattern::Range(Range::between(0.0, true, 5.0, false).unwrap())]
        );

        let specs = compile_str(r#"{"n": [{"numeric": ["=", 3.5]}]}"#).unwrap();
        assert_eq!(
            specs[0]["n"],
            vec![Pattern::NumericEq(numeric::canonicalize(3.5).unwrap())]
        );

        assert!(compile_str(r#"{"n": [{"numeric": ["<", 1, ">", 0]}]}"#).is_err());
        assert!(compile_str(r#"{"n": [{"numeric": ["~", 1]}]}"#).is_err());
        assert!(compile_str(r#"{"n": [{"numeric": [">", 6000000000]}]}"#).is_err());
    }

    #[test]
    fn anything_but_forms() {
        let specs = compile_str(r#"{"a": [{"anything-but": "v"}]}"#).unwrap();
        assert_eq!(specs[0]["a"], vec![Pattern::anything_but(["\"v\""])]);

        let specs = compile_str(r#"{"a": [{"anything-but": ["v", 3]}]}"#).unwrap();
        assert_eq!(
            specs[0]["a"],
            vec![Pattern::anything_but([
                "\"v\"".to_string(),
                numeric::canonicalize(3.0).unwrap()
            ])]
        );

        let specs = compile_str(r#"{"a": [{"anything-but": {"prefix": "p"}}]}"#).unwrap();
        assert_eq!(specs[0]["a"], vec![Pattern::AnythingButPrefix("\"p".into())]);

        assert!(compile_str(r#"{"a": [{"anything-but": []}]}"#).is_err());
        assert!(compile_str(r#"{"a": [{"anything-but": null}]}"#).is_err());
    }

    #[test]
    fn wildcard_normal_forms() {
        let specs = compile_str(r#"{"w": [{"wildcard": "f*r"}]}"#).unwrap();
        let Pattern::Wildcard(w) = &specs[0]["w"][0] else {
            panic!("expected a wildcard");
        };
        assert_eq!(w.source(), "\"f*r\"");

        // An escaped star stays literal through re-quoting.
        let specs = compile_str(r#"{"w": [{"wildcard": "f\\*r"}]}"#).unwrap();
        let Pattern::Wildcard(w) = &specs[0]["w"][0] else {
            panic!("expected a wildcard");
        };
        assert_eq!(w.source(), "\"f\\*r\"");
        assert!(w.is_literal());

        assert!(compile_str(r#"{"w": [{"wildcard": "a**b"}]}"#).is_err());
    }

    #[test]
    fn or_expands_to_sub_rules() {
        let specs = compile_str(
            r#"{"common": ["c"], "$or": [{"a": ["1"]}, {"b": ["2"]}]}"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|s| s.contains_key("common")));
        assert!(specs[0].contains_key("a") ^ specs[0].contains_key("b"));
        assert!(specs[1].contains_key("a") ^ specs[1].contains_key("b"));

        assert!(compile_str(r#"{"$or": [{"a": ["1"]}]}"#).is_err());
        assert!(compile_str(r#"{"$or": {"a": ["1"]}}"#).is_err());
    }

    #[test]
    fn rejects_malformed_rules() {
        assert!(compile_str(r#"{}"#).is_err());
        assert!(compile_str(r#"{"a": "scalar"}"#).is_err());
        assert!(compile_str(r#"{"a": []}"#).is_err());
        assert!(compile_str(r#"{"a": [[1]]}"#).is_err());
        assert!(compile_str(r#"{"a": [{"exists": false}, "x"]}"#).is_err());
        assert!(compile_str(r#"{"a": [{"prefix": 3}]}"#).is_err());
        assert!(compile_str(r#"{"a": {"b": ["x"]}, "$or": [{"a": {"b": ["y"]}}, {"c": ["z"]}]}"#).is_err());
    }

    #[test]
    fn nested_paths_use_dots() {
        let specs = compile_str(r#"{"x": {"y": {"z": ["deep"]}}}"#).unwrap();
        assert!(specs[0].contains_key("x.y.z"));
    }
}
