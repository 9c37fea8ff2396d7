//! Parameter expansion (spec §4.1): turns one tool's declared
//! `{group-name -> {key -> raw value}}` mapping into the concrete
//! cartesian-product set of parameter groups.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExpandError {
    #[error("PCS requested but no configuration-space support is available for: {0}")]
    PcsUnsupported(String),
    #[error("invalid range expression: {0}")]
    InvalidRange(String),
}

type ExpandResult<T> = Result<T, ExpandError>;

/// One key's resolved set of values: every declared value becomes one point
/// ranged over by the cartesian product; a non-ranged key has exactly one.
fn expand_value(key: &str, value: &Json) -> ExpandResult<Vec<Json>> {
    match value {
        Json::Array(items) => Ok(items.clone()),
        Json::String(s) => {
            if let Some(values) = try_parse_numeric_range(s)? {
                Ok(values)
            } else {
                Ok(vec![value.clone()])
            }
        }
        other => {
            let _ = key;
            Ok(vec![other.clone()])
        }
    }
}

/// Parses `start..end` or `start..end..step` (inclusive, decimal integers)
/// per spec §4.1. Returns `Ok(None)` when `s` doesn't match the grammar at
/// all (so it's treated as a literal constant, not a range).
fn try_parse_numeric_range(s: &str) -> ExpandResult<Option<Vec<Json>>> {
    let parts: Vec<&str> = s.split("..").collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Ok(None);
    }
    let parsed: Vec<Option<i64>> = parts.iter().map(|p| p.trim().parse::<i64>().ok()).collect();
    if parsed.iter().any(|p| p.is_none()) {
        return Ok(None);
    }
    let start = parsed[0].unwrap();
    let end = parsed[1].unwrap();
    let step = if parsed.len() == 3 { parsed[2].unwrap() } else { 1 };
    if step == 0 {
        return Err(ExpandError::InvalidRange(s.to_string()));
    }
    let mut values = Vec::new();
    if step > 0 {
        let mut v = start;
        while v <= end {
            values.push(Json::from(v));
            v += step;
        }
    } else {
        let mut v = start;
        while v >= end {
            values.push(Json::from(v));
            v += step;
        }
    }
    Ok(Some(values))
}

/// `range(start, stop[, step])`: integer range, Python `range()` semantics
/// (end-exclusive).
pub fn range_fn(args: &[f64]) -> ExpandResult<Vec<Json>> {
    let (start, stop, step) = numpy_args(args)?;
    if step == 0.0 {
        return Err(ExpandError::InvalidRange("range() step of 0".to_string()));
    }
    let mut values = Vec::new();
    let mut v = start;
    if step > 0.0 {
        while v < stop {
            values.push(Json::from(v as i64));
            v += step;
        }
    } else {
        while v > stop {
            values.push(Json::from(v as i64));
            v += step;
        }
    }
    Ok(values)
}

/// `arange(start, stop[, step])`: numpy semantics, float-valued, end-exclusive.
pub fn arange_fn(args: &[f64]) -> ExpandResult<Vec<Json>> {
    let (start, stop, step) = numpy_args(args)?;
    if step == 0.0 {
        return Err(ExpandError::InvalidRange("arange() step of 0".to_string()));
    }
    let mut values = Vec::new();
    let mut v = start;
    let mut guard = 0;
    while (step > 0.0 && v < stop) || (step < 0.0 && v > stop) {
        values.push(json_float(v));
        v += step;
        guard += 1;
        if guard > 1_000_000 {
            break;
        }
    }
    Ok(values)
}

/// `linspace(start, stop, num)`: `num` evenly spaced points, inclusive of
/// both endpoints (numpy semantics).
pub fn linspace_fn(start: f64, stop: f64, num: usize) -> Vec<Json> {
    if num == 0 {
        return Vec::new();
    }
    if num == 1 {
        return vec![json_float(start)];
    }
    let step = (stop - start) / (num - 1) as f64;
    (0..num).map(|i| json_float(start + step * i as f64)).collect()
}

/// `logspace(start, stop, num[, base=10])`: `num` points spaced evenly on a
/// log scale between `base^start` and `base^stop`.
pub fn logspace_fn(start: f64, stop: f64, num: usize, base: f64) -> Vec<Json> {
    linspace_fn(start, stop, num)
        .into_iter()
        .map(|v| json_float(base.powf(v.as_f64().unwrap_or(0.0))))
        .collect()
}

/// `geomspace(start, stop, num)`: `num` points spaced evenly on a geometric
/// (log-uniform) progression between `start` and `stop` directly (no base
/// exponent indirection, unlike `logspace`).
pub fn geomspace_fn(start: f64, stop: f64, num: usize) -> Vec<Json> {
    if start <= 0.0 || stop <= 0.0 {
        return Vec::new();
    }
    logspace_fn(start.log10(), stop.log10(), num, 10.0)
}

fn numpy_args(args: &[f64]) -> ExpandResult<(f64, f64, f64)> {
    match args.len() {
        1 => Ok((0.0, args[0], 1.0)),
        2 => Ok((args[0], args[1], 1.0)),
        3 => Ok((args[0], args[1], args[2])),
        _ => Err(ExpandError::InvalidRange(format!("expected 1-3 numeric args, got {}", args.len()))),
    }
}

fn json_float(v: f64) -> Json {
    serde_json::Number::from_f64(v).map(Json::Number).unwrap_or(Json::Null)
}

/// Full cartesian-product expansion of one tool's `{group-name -> {key ->
/// value}}` declaration into concrete `(expanded-group-name, {key ->
/// value})` pairs. One declared group with zero ranged dimensions yields a
/// single group keeping the declared name unchanged (the `default`-style
/// single-group case from spec scenario 1).
pub fn expand_group(name: &str, raw: &BTreeMap<String, Json>) -> ExpandResult<Vec<(String, BTreeMap<String, Json>)>> {
    if let Some(pcs) = raw.get("__pcs") {
        let text = pcs.as_str().ok_or_else(|| ExpandError::PcsUnsupported("__pcs value must be a string".to_string()))?;
        return expand_pcs(name, text);
    }

    let mut ranged: Vec<(String, Vec<Json>)> = Vec::new();
    let mut constant: BTreeMap<String, Json> = BTreeMap::new();
    for (key, value) in raw {
        let values = expand_value(key, value)?;
        if values.len() > 1 {
            ranged.push((key.clone(), values));
        } else if let Some(v) = values.into_iter().next() {
            constant.insert(key.clone(), v);
        }
    }

    if ranged.is_empty() {
        return Ok(vec![(name.to_string(), constant)]);
    }

    let mut combos: Vec<BTreeMap<String, Json>> = vec![constant];
    for (key, values) in &ranged {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for v in values {
                let mut c = combo.clone();
                c.insert(key.clone(), v.clone());
                next.push(c);
            }
        }
        combos = next;
    }

    let mut ranged_keys: Vec<&str> = ranged.iter().map(|(k, _)| k.as_str()).collect();
    ranged_keys.sort();

    let groups = combos
        .into_iter()
        .map(|combo| {
            let label = ranged_keys
                .iter()
                .map(|k| format!("{k}={}", display_value(&combo[*k])))
                .collect::<Vec<_>>()
                .join(",");
            (format!("{name}[{label}]"), combo)
        })
        .collect();
    Ok(groups)
}

fn display_value(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        Json::Number(n) => n.to_string(),
        Json::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Conservative PCS subset (SPEC_FULL.md §4.1): lines with a trailing
/// `# --> fn(args...)` marker comment are expanded by the named numpy-style
/// function; everything else in the block is treated as one constant
/// parameter whose value is the line's first whitespace-delimited token as
/// a key and the remainder as a literal string value. Full PCS
/// conditional/forbidden-clause validity checking is out of scope (the
/// "configuration-space library absent" fatal path from the distilled
/// spec is hit instead, via `ExpandError::PcsUnsupported`, for anything this
/// subset can't parse).
fn expand_pcs(name: &str, text: &str) -> ExpandResult<Vec<(String, BTreeMap<String, Json>)>> {
    let marker = "# -->";
    let mut ranged: Vec<(String, Vec<Json>)> = Vec::new();
    let mut constant: BTreeMap<String, Json> = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.splitn(2, char::is_whitespace);
        let key = tokens.next().unwrap_or_default().to_string();
        if key.is_empty() {
            continue;
        }

        if let Some(idx) = line.find(marker) {
            let call = line[idx + marker.len()..].trim();
            let values = parse_pcs_call(call)?;
            ranged.push((key, values));
        } else {
            let rest = tokens.next().unwrap_or_default().trim().to_string();
            constant.insert(key, Json::String(rest));
        }
    }

    if ranged.is_empty() {
        return Ok(vec![(name.to_string(), constant)]);
    }

    let mut combos: Vec<BTreeMap<String, Json>> = vec![constant];
    for (key, values) in &ranged {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for v in values {
                let mut c = combo.clone();
                c.insert(key.clone(), v.clone());
                next.push(c);
            }
        }
        combos = next;
    }
    let mut ranged_keys: Vec<&str> = ranged.iter().map(|(k, _)| k.as_str()).collect();
    ranged_keys.sort();
    Ok(combos
        .into_iter()
        .map(|combo| {
            let label = ranged_keys
                .iter()
                .map(|k| format!("{k}={}", display_value(&combo[*k])))
                .collect::<Vec<_>>()
                .join(",");
            (format!("{name}[{label}]"), combo)
        })
        .collect())
}

fn parse_pcs_call(call: &str) -> ExpandResult<Vec<Json>> {
    let open = call.find('(').ok_or_else(|| ExpandError::PcsUnsupported(call.to_string()))?;
    let close = call.rfind(')').ok_or_else(|| ExpandError::PcsUnsupported(call.to_string()))?;
    let func = call[..open].trim();
    let args_str = &call[open + 1..close];
    let args: Vec<f64> = args_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|_| ExpandError::InvalidRange(s.to_string())))
        .collect::<ExpandResult<_>>()?;

    match func {
        "range" => range_fn(&args),
        "arange" => arange_fn(&args),
        "linspace" => {
            if args.len() != 3 {
                return Err(ExpandError::InvalidRange("linspace() takes 3 args".to_string()));
            }
            Ok(linspace_fn(args[0], args[1], args[2] as usize))
        }
        "logspace" => {
            if args.len() < 3 {
                return Err(ExpandError::InvalidRange("logspace() takes start,stop,num[,base]".to_string()));
            }
            let base = args.get(3).copied().unwrap_or(10.0);
            Ok(logspace_fn(args[0], args[1], args[2] as usize, base))
        }
        "geomspace" => {
            if args.len() != 3 {
                return Err(ExpandError::InvalidRange("geomspace() takes 3 args".to_string()));
            }
            Ok(geomspace_fn(args[0], args[1], args[2] as usize))
        }
        other => Err(ExpandError::PcsUnsupported(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_ranged_dims_yields_single_default_group() {
        let mut raw = BTreeMap::new();
        raw.insert("threads".to_string(), Json::from(4));
        let groups = expand_group("default", &raw).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "default");
    }

    #[test]
    fn cardinality_is_product_of_ranged_dims() {
        let mut raw = BTreeMap::new();
        raw.insert("solver".to_string(), Json::Array(vec![Json::from("glucose"), Json::from("lingeling")]));
        raw.insert("seed".to_string(), Json::from("1..3"));
        let groups = expand_group("g", &raw).unwrap();
        assert_eq!(groups.len(), 6);
        assert!(groups.iter().any(|(name, _)| name == "g[seed=1,solver=glucose]"));
    }

    #[test]
    fn numeric_range_is_inclusive() {
        let values = try_parse_numeric_range("1..3").unwrap().unwrap();
        assert_eq!(values, vec![Json::from(1), Json::from(2), Json::from(3)]);
    }

    #[test]
    fn numeric_range_with_step() {
        let values = try_parse_numeric_range("0..10..5").unwrap().unwrap();
        assert_eq!(values, vec![Json::from(0), Json::from(5), Json::from(10)]);
    }

    #[test]
    fn non_range_string_is_left_alone() {
        assert_eq!(try_parse_numeric_range("glucose").unwrap(), None);
    }

    #[test]
    fn linspace_includes_both_endpoints() {
        let values = linspace_fn(0.0, 1.0, 3);
        assert_eq!(values.len(), 3);
        assert_eq!(values[0].as_f64().unwrap(), 0.0);
        assert_eq!(values[2].as_f64().unwrap(), 1.0);
    }

    #[test]
    fn range_fn_is_end_exclusive() {
        let values = range_fn(&[0.0, 3.0]).unwrap();
        assert_eq!(values, vec![Json::from(0), Json::from(1), Json::from(2)]);
    }

    #[test]
    fn pcs_block_expands_marked_lines() {
        let text = "seed [1, 5] 1 # --> range(1, 4)\nmode fixed\n";
        let groups = expand_pcs("cfg", text).unwrap();
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|(_, combo)| combo["mode"] == Json::String("fixed".to_string())));
    }
}
