use std::collections::HashMap;

use tracing::{debug, trace};

use crate::descriptor::{infer_unit, DescriptorMap};
use crate::protocol::page_family;
use crate::types::{
    format_entity_id, DescriptorEntry, DeviceClass, DeviceKey, ElementKind, Entity,
    EntityAttributes, EntityKind, EntityMap, EntityState, Language, RawValue, TypeHint,
};
use crate::visibility::is_visible;

/// Uppercased prop -> value, first occurrence wins.
pub fn snapshot_of(raw: &[RawValue]) -> HashMap<String, String> {
    let mut snapshot = HashMap::with_capacity(raw.len());
    for value in raw {
        snapshot
            .entry(value.prop.to_uppercase())
            .or_insert_with(|| value.value.clone());
    }
    snapshot
}

/// Turns raw values plus descriptors into the classified entity map.
/// Stateless: the same inputs always give the same map.
#[derive(Debug, Clone)]
pub struct Reconciler {
    pub language: Language,
    pub prefix: String,
    pub ignore_visibility: bool,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            language: Language::default(),
            prefix: "xcc".to_string(),
            ignore_visibility: false,
        }
    }
}

struct Candidate<'a> {
    raw: &'a RawValue,
    descriptor: Option<&'a DescriptorEntry>,
    /// Families of the data pages the prop was read from.
    families: Vec<String>,
}

impl Candidate<'_> {
    /// Data pages decide the bucket. The descriptor's own page only counts
    /// when none of them belongs to a bucket.
    fn in_family(&self, family: &str) -> bool {
        if self.families.iter().any(|f| is_bucket_family(f)) {
            return self.families.iter().any(|f| f == family);
        }
        self.descriptor.is_some_and(|d| page_family(&d.page) == family)
    }
}

fn is_bucket_family(family: &str) -> bool {
    DeviceKey::PRIORITY.iter().any(|b| b.page_family() == Some(family))
}

impl Reconciler {
    pub fn reconcile(
        &self,
        raw: &[RawValue],
        descriptors: &DescriptorMap,
        snapshot: Option<&HashMap<String, String>>,
    ) -> EntityMap {
        let mut order: Vec<String> = Vec::new();
        let mut candidates: HashMap<String, Candidate<'_>> = HashMap::new();

        for value in raw {
            let key = value.prop.to_uppercase();
            let family = page_family(&value.page);
            if let Some(existing) = candidates.get_mut(&key) {
                if !existing.families.contains(&family) {
                    existing.families.push(family);
                }
                continue;
            }

            let descriptor = descriptors.get(&key);
            if let Some(entry) = descriptor
                && !self.ignore_visibility
                && !is_visible(&entry.visibility, snapshot)
            {
                trace!(prop = %key, "hidden by visibility condition");
                continue;
            }

            order.push(key.clone());
            candidates.insert(
                key,
                Candidate {
                    raw: value,
                    descriptor,
                    families: vec![family],
                },
            );
        }

        let mut devices: HashMap<&str, DeviceKey> = HashMap::new();
        for bucket in DeviceKey::PRIORITY {
            for key in &order {
                if devices.contains_key(key.as_str()) {
                    continue;
                }
                let candidate = &candidates[key];
                let claims = match bucket.page_family() {
                    Some(family) => candidate.descriptor.is_some() && candidate.in_family(family),
                    None => candidate.descriptor.is_none(),
                };
                if claims {
                    devices.insert(key.as_str(), bucket);
                }
            }
        }

        let mut entities = EntityMap::new();
        for key in &order {
            let candidate = &candidates[key];
            let device = devices.get(key.as_str()).copied().unwrap_or(DeviceKey::Unassigned);
            let mut entity = self.build_entity(candidate.raw, candidate.descriptor, device);
            if entities.contains_key(&entity.id) {
                let base = entity.id.clone();
                let mut n = 2;
                while entities.contains_key(&entity.id) {
                    entity.id = format!("{base}_{n}");
                    n += 1;
                }
            }
            entities.insert(entity.id.clone(), entity);
        }

        debug!(
            raw = raw.len(),
            descriptors = descriptors.len(),
            entities = entities.len(),
            "reconciled entities"
        );
        entities
    }

    fn build_entity(
        &self,
        raw: &RawValue,
        descriptor: Option<&DescriptorEntry>,
        device: DeviceKey,
    ) -> Entity {
        let kind = match descriptor {
            Some(entry) => entry.entity_kind(),
            None => match raw.type_hint {
                TypeHint::Bool => EntityKind::BinarySensor,
                TypeHint::Real | TypeHint::UInt | TypeHint::Unknown => EntityKind::Sensor,
            },
        };

        let (name_local, name_en) = descriptor
            .map(|d| (d.friendly_name_local.clone(), d.friendly_name_en.clone()))
            .unwrap_or_default();
        let name = self.pick_name(&name_local, &name_en, &raw.prop);

        let mut attributes = EntityAttributes {
            friendly_name_local: non_empty_or(name_local, &raw.prop),
            friendly_name_en: non_empty_or(name_en, &raw.prop),
            source_page: raw.page.clone(),
            descriptor_page: descriptor.map(|d| d.page.clone()),
            writable: descriptor.is_some_and(|d| d.writable),
            internal_name: raw.internal_name.clone(),
            ..Default::default()
        };

        match descriptor.map(|d| &d.element) {
            Some(ElementKind::Number(constraints)) => {
                let declared = match self.language {
                    Language::English => constraints.unit_en.as_ref().or(constraints.unit.as_ref()),
                    Language::Czech => constraints.unit.as_ref().or(constraints.unit_en.as_ref()),
                };
                attributes.unit = declared.cloned().or_else(|| {
                    infer_unit(&raw.prop, &attributes.friendly_name_en).map(str::to_string)
                });
                attributes.constraints = Some(constraints.clone());
            }
            Some(ElementKind::Choice(options)) => attributes.options = options.clone(),
            Some(ElementKind::Button(payload)) => attributes.button_payload = payload.clone(),
            Some(ElementKind::Sensor(sensor)) => {
                attributes.unit = sensor.unit.clone();
                attributes.device_class = sensor.device_class;
            }
            Some(ElementKind::Switch) => {}
            None => {
                attributes.unit = raw.unit.clone().or_else(|| {
                    (raw.type_hint == TypeHint::Real)
                        .then(|| infer_unit(&raw.prop, ""))
                        .flatten()
                        .map(str::to_string)
                });
            }
        }
        if attributes.device_class.is_none() {
            attributes.device_class = attributes.unit.as_deref().and_then(DeviceClass::from_unit);
        }

        Entity {
            id: format_entity_id(&self.prefix, &raw.prop),
            prop: raw.prop.clone(),
            kind,
            name,
            state: parse_state(kind, &raw.value),
            attributes,
            device,
        }
    }

    fn pick_name(&self, local: &str, english: &str, prop: &str) -> String {
        let (preferred, other) = match self.language {
            Language::English => (english, local),
            Language::Czech => (local, english),
        };
        [preferred, other, prop]
            .into_iter()
            .find(|n| !n.is_empty())
            .unwrap_or(prop)
            .to_string()
    }
}

fn non_empty_or(name: String, prop: &str) -> String {
    if name.is_empty() { prop.to_string() } else { name }
}

fn parse_state(kind: EntityKind, value: &str) -> EntityState {
    match kind {
        EntityKind::Switch | EntityKind::BinarySensor => EntityState::Bool(is_on(value)),
        EntityKind::Number | EntityKind::Sensor => match value.trim().parse::<f64>() {
            Ok(v) => EntityState::Number(v),
            Err(_) => EntityState::Text(value.to_string()),
        },
        EntityKind::Select => EntityState::Text(value.to_string()),
        EntityKind::Button => EntityState::None,
    }
}

fn is_on(value: &str) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => true,
        other => other.parse::<f64>().is_ok_and(|v| v != 0.0),
    }
}
