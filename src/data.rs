use tracing::trace;

use crate::error::ParseError;
use crate::types::{format_entity_id, RawValue, TypeHint};
use crate::xml::XmlDocument;

/// Decodes a data page into raw values.
///
/// Primary shape: `<INPUT P="SVENKU" NAME="__R3254_REAL_.1f" VALUE="13.0"/>`.
/// Older firmware puts the prop on an element with inline text instead
/// (`<value prop="SVENKU" unit="°C">13.0</value>`); that shape is only tried
/// when the primary one yields nothing.
pub fn decode(xml: &str, page: &str, prefix: &str) -> Result<Vec<RawValue>, ParseError> {
    let doc = XmlDocument::parse(xml, page)?;

    let mut values: Vec<RawValue> = doc
        .elements()
        .filter_map(|el| {
            let prop = el.non_empty_attr("P")?;
            let value = el.non_empty_attr("VALUE")?;
            let internal_name = el.non_empty_attr("NAME");
            let type_hint = internal_name
                .map(TypeHint::from_internal_name)
                .unwrap_or(TypeHint::Unknown);
            Some(RawValue {
                prop: prop.to_string(),
                value: normalize_value(value, type_hint),
                type_hint,
                entity_id: format_entity_id(prefix, prop),
                page: page.to_string(),
                internal_name: internal_name.map(str::to_string),
                unit: None,
            })
        })
        .collect();

    if values.is_empty() {
        values = doc
            .elements()
            .filter_map(|el| {
                let prop = el.non_empty_attr("prop")?;
                let value = el.text();
                if value.is_empty() {
                    return None;
                }
                let unit = el.non_empty_attr("unit");
                let type_hint = legacy_type_hint(value, unit);
                Some(RawValue {
                    prop: prop.to_string(),
                    value: value.to_string(),
                    type_hint,
                    entity_id: format_entity_id(prefix, prop),
                    page: page.to_string(),
                    internal_name: None,
                    unit: unit.map(str::to_string),
                })
            })
            .collect();
    }

    trace!(page, count = values.len(), "decoded data page");
    Ok(values)
}

fn normalize_value(value: &str, hint: TypeHint) -> String {
    match hint {
        TypeHint::Bool => {
            let on = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" => true,
                other => other.parse::<f64>().map(|v| v != 0.0).unwrap_or(false),
            };
            let normalized = if on { "1" } else { "0" };
            normalized.to_string()
        }
        TypeHint::UInt => value
            .parse::<f64>()
            .map(|v| (v.trunc() as i64).to_string())
            .unwrap_or_else(|_| value.to_string()),
        TypeHint::Real | TypeHint::Unknown => value.to_string(),
    }
}

fn legacy_type_hint(value: &str, unit: Option<&str>) -> TypeHint {
    if unit.is_none() && (value == "0" || value == "1") {
        TypeHint::Bool
    } else if value.parse::<f64>().is_ok() {
        TypeHint::Real
    } else {
        TypeHint::Unknown
    }
}
