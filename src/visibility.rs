use std::collections::HashMap;

/// Parses a `visData` attribute: `"N;PROP1;VAL1;...;PROPn;VALn"`.
///
/// Anything malformed (non-numeric count, fewer pairs than announced)
/// yields no conditions, which means always visible.
pub fn parse_visibility(raw: &str) -> Vec<(String, String)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    let mut parts = raw.split(';').map(str::trim);
    let Some(count) = parts.next().and_then(|n| n.parse::<usize>().ok()) else {
        return Vec::new();
    };

    let mut conditions = Vec::with_capacity(count);
    for _ in 0..count {
        match (parts.next(), parts.next()) {
            (Some(prop), Some(value)) if !prop.is_empty() => {
                conditions.push((prop.to_uppercase(), value.to_string()));
            }
            _ => return Vec::new(),
        }
    }
    conditions
}

/// An entry with conditions is visible only when every referenced prop is
/// present in the snapshot with exactly the expected value. Without a
/// snapshot nothing conditional is visible.
pub fn is_visible(
    conditions: &[(String, String)],
    snapshot: Option<&HashMap<String, String>>,
) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let Some(snapshot) = snapshot else {
        return false;
    };
    conditions
        .iter()
        .all(|(prop, expected)| snapshot.get(prop).is_some_and(|v| v == expected))
}
