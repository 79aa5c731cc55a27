use serde_json::Value;

use crate::types::{EntityMap, Event};

/// Recursively collects `(path, old, new)` for every leaf that differs.
/// Keys missing from `current` are not reported.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            let empty = Value::Object(serde_json::Map::new());
                            diff_json(&empty, curr_val, &path, changes);
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

/// Events describing how `current` differs from `previous`: removals first,
/// then additions and state changes in id order.
pub(crate) fn diff_entities(previous: &EntityMap, current: &EntityMap) -> Vec<Event> {
    let mut events: Vec<Event> = previous
        .keys()
        .filter(|id| !current.contains_key(*id))
        .map(|id| Event::EntityRemoved { id: id.clone() })
        .collect();

    for (id, entity) in current {
        match previous.get(id) {
            None => events.push(Event::EntityAdded {
                id: id.clone(),
                kind: entity.kind,
                device: entity.device,
            }),
            Some(prev) if prev.state != entity.state => events.push(Event::StateChanged {
                id: id.clone(),
                prop: entity.prop.clone(),
                old: prev.state.clone(),
                new: entity.state.clone(),
            }),
            Some(_) => {}
        }
    }
    events
}
