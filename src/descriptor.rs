use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::error::ParseError;
use crate::types::{
    ChoiceOption, Constraints, DescriptorEntry, DeviceClass, ElementKind, SensorAttrs,
};
use crate::visibility::parse_visibility;
use crate::xml::{NodeRef, XmlDocument};

/// Descriptor entries keyed by uppercased prop.
pub type DescriptorMap = HashMap<String, DescriptorEntry>;

/// Parses one descriptor page.
///
/// Every `number`, `switch`, `choice` and `button` element with a `prop`
/// attribute becomes an entry unless its `config` marks it read-only. Props
/// that sit inside a `row` without such a writable control (read-only
/// controls included) become read-only sensor entries.
pub fn parse(xml: &str, page: &str) -> Result<Vec<DescriptorEntry>, ParseError> {
    let doc = XmlDocument::parse(xml, page)?;
    let mut entries = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for el in doc.elements() {
        let Some(prop) = el.non_empty_attr("prop") else {
            continue;
        };
        if is_readonly(el) || seen.contains(&prop.to_uppercase()) {
            continue;
        }
        if let Some(entry) = control_entry(el, prop, page) {
            seen.insert(prop.to_uppercase());
            entries.push(entry);
        }
    }

    for row in doc.elements_named("row") {
        for el in row.descendants() {
            let Some(prop) = el.non_empty_attr("prop") else {
                continue;
            };
            if seen.insert(prop.to_uppercase()) {
                entries.push(row_sensor_entry(el, row, prop, page));
            }
        }
    }

    debug!(page, count = entries.len(), "parsed descriptor page");
    Ok(entries)
}

fn is_readonly(el: NodeRef<'_>) -> bool {
    el.attr("config").is_some_and(|c| c.contains("readonly"))
}

fn control_entry(el: NodeRef<'_>, prop: &str, page: &str) -> Option<DescriptorEntry> {
    let element = match el.name() {
        "number" => ElementKind::Number(Constraints {
            min: float_attr(el, "min"),
            max: float_attr(el, "max"),
            step: float_attr(el, "step"),
            digits: el.non_empty_attr("digits").and_then(|d| d.parse().ok()),
            unit: el.non_empty_attr("unit").map(str::to_string),
            unit_en: el.non_empty_attr("unit_en").map(str::to_string),
        }),
        "switch" => ElementKind::Switch,
        "choice" => ElementKind::Choice(choice_options(el)),
        "button" => ElementKind::Button(el.non_empty_attr("value").map(str::to_string)),
        _ => return None,
    };

    let (friendly_name_local, friendly_name_en) = friendly_names(el, prop);
    let visibility = el
        .attr("visData")
        .map(parse_visibility)
        .unwrap_or_default();

    trace!(prop, kind = el.name(), name = %friendly_name_en, "descriptor control");
    Some(DescriptorEntry {
        prop: prop.to_string(),
        element,
        friendly_name_local,
        friendly_name_en,
        page: page.to_string(),
        writable: true,
        visibility,
    })
}

fn row_sensor_entry(el: NodeRef<'_>, row: NodeRef<'_>, prop: &str, page: &str) -> DescriptorEntry {
    let (friendly_name_local, friendly_name_en) = friendly_names(el, prop);
    let context = row
        .non_empty_attr("text_en")
        .or_else(|| row.non_empty_attr("text"))
        .unwrap_or("");
    let unit = el
        .non_empty_attr("unit_en")
        .or_else(|| el.non_empty_attr("unit"))
        .map(str::to_string)
        .or_else(|| infer_unit(prop, context).map(str::to_string));
    let device_class = unit.as_deref().and_then(DeviceClass::from_unit);

    DescriptorEntry {
        prop: prop.to_string(),
        element: ElementKind::Sensor(SensorAttrs {
            unit,
            device_class,
            binary: el.name() == "switch",
        }),
        friendly_name_local,
        friendly_name_en,
        page: page.to_string(),
        writable: false,
        visibility: Vec::new(),
    }
}

fn float_attr(el: NodeRef<'_>, key: &str) -> Option<f64> {
    el.non_empty_attr(key).and_then(|v| v.parse().ok())
}

fn choice_options(el: NodeRef<'_>) -> Vec<ChoiceOption> {
    el.children()
        .filter(|c| c.name() == "option")
        .map(|opt| {
            let text_local = opt.attr("text").unwrap_or("").to_string();
            let text_en = opt
                .non_empty_attr("text_en")
                .map(str::to_string)
                .unwrap_or_else(|| text_local.clone());
            ChoiceOption {
                value: opt.attr("value").unwrap_or("").to_string(),
                text_local,
                text_en,
            }
        })
        .collect()
}

/// Row that labels `el`: the nearest enclosing `row`, or when that one has
/// no text, the closest earlier row in the same block that does.
fn labelling_row<'a>(el: NodeRef<'a>) -> Option<NodeRef<'a>> {
    let row = el.ancestors().find(|a| a.name() == "row")?;
    if has_text(row) {
        return Some(row);
    }
    row.preceding_siblings()
        .filter(|s| s.name() == "row")
        .find(|s| has_text(*s))
}

fn has_text(node: NodeRef<'_>) -> bool {
    node.non_empty_attr("text").is_some() || node.non_empty_attr("text_en").is_some()
}

const CONTROL_ELEMENTS: &[&str] = &["number", "switch", "choice", "button"];

/// Words marking a label as transient status text rather than a caption.
const STATUS_LABEL_WORDS: &[&str] = &["probíhá", "nastavování", "writing", "settings"];

/// Caption `label` for a control. Captions are read from the control's own
/// row, or the labelling row when that one has none. They pair up with the
/// last controls of the enclosing block in order.
fn caption_label<'a>(el: NodeRef<'a>) -> Option<NodeRef<'a>> {
    if !CONTROL_ELEMENTS.contains(&el.name()) {
        return None;
    }
    let row = el.ancestors().find(|a| a.name() == "row")?;
    let mut labels = captions_in(row);
    if labels.is_empty()
        && let Some(labelling) = labelling_row(el)
    {
        labels = captions_in(labelling);
    }
    if labels.is_empty() {
        return None;
    }

    let scope = el
        .ancestors()
        .find(|a| a.name() == "block")
        .or_else(|| row.parent())
        .unwrap_or(row);
    let controls: Vec<NodeRef<'a>> = scope
        .descendants()
        .filter(|n| CONTROL_ELEMENTS.contains(&n.name()) && n.non_empty_attr("prop").is_some())
        .collect();
    let index = controls.iter().position(|c| *c == el)?;
    let offset = controls.len().saturating_sub(labels.len());
    labels.get(index.checked_sub(offset)?).copied()
}

fn captions_in(row: NodeRef<'_>) -> Vec<NodeRef<'_>> {
    row.descendants()
        .filter(|n| n.name() == "label" && has_text(*n))
        .filter(|n| {
            let text = n.attr("text").unwrap_or("").to_lowercase();
            !STATUS_LABEL_WORDS.iter().any(|w| text.contains(w))
        })
        .collect()
}

/// (local, English) names. Each falls back to the caption label, then the
/// row text, then the other language, then the prop itself.
fn friendly_names(el: NodeRef<'_>, prop: &str) -> (String, String) {
    let label = caption_label(el);
    let row = labelling_row(el);
    let local = el
        .non_empty_attr("text")
        .or_else(|| label.and_then(|l| l.non_empty_attr("text")))
        .or_else(|| row.and_then(|r| r.non_empty_attr("text")));
    let english = el
        .non_empty_attr("text_en")
        .or_else(|| label.and_then(|l| l.non_empty_attr("text_en")))
        .or_else(|| row.and_then(|r| r.non_empty_attr("text_en")));

    let local_name = local.or(english).unwrap_or(prop).to_string();
    let english_name = english.or(local).unwrap_or(prop).to_string();
    (local_name, english_name)
}

/// Guesses a unit from keywords in the prop or its label.
pub fn infer_unit(prop: &str, context: &str) -> Option<&'static str> {
    let prop = prop.to_uppercase();
    let context = context.to_lowercase();
    let prop_has = |words: &[&str]| words.iter().any(|w| prop.contains(w));
    let context_has = |words: &[&str]| words.iter().any(|w| context.contains(w));

    if prop_has(&["TEMP", "TEPLOTA"]) || context_has(&["teplota", "temperature", "°c"]) {
        Some("°C")
    } else if prop_has(&["PRICE", "CENA"]) || context_has(&["price", "cena", "cost"]) {
        Some("€/MWh")
    } else if prop_has(&["POWER", "VYKON", "PREBYTEK"])
        || context_has(&["power", "výkon", "watt"])
    {
        Some("W")
    } else if prop_has(&["TLAK", "PRESSURE"]) || context_has(&["tlak", "pressure"]) {
        Some("bar")
    } else if prop_has(&["SOC", "PERCENT"]) {
        Some("%")
    } else {
        None
    }
}

/// Merges per-page entries into one map (first declaration of a prop wins)
/// and suffixes colliding friendly names with ` (PROP)`.
pub fn merge(pages: impl IntoIterator<Item = Vec<DescriptorEntry>>) -> DescriptorMap {
    let mut map = DescriptorMap::new();
    for entry in pages.into_iter().flatten() {
        map.entry(entry.prop.to_uppercase()).or_insert(entry);
    }
    disambiguate_names(&mut map);
    map
}

fn disambiguate_names(map: &mut DescriptorMap) {
    let mut local_counts: HashMap<String, usize> = HashMap::new();
    let mut en_counts: HashMap<String, usize> = HashMap::new();
    for entry in map.values() {
        *local_counts.entry(entry.friendly_name_local.clone()).or_default() += 1;
        *en_counts.entry(entry.friendly_name_en.clone()).or_default() += 1;
    }
    for entry in map.values_mut() {
        if local_counts.get(&entry.friendly_name_local).copied().unwrap_or(0) > 1 {
            entry.friendly_name_local = format!("{} ({})", entry.friendly_name_local, entry.prop);
        }
        if en_counts.get(&entry.friendly_name_en).copied().unwrap_or(0) > 1 {
            entry.friendly_name_en = format!("{} ({})", entry.friendly_name_en, entry.prop);
        }
    }
}
