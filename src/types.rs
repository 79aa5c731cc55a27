use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Value type encoded in a data element's internal name (`__R3254_REAL_.1f`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeHint {
    Real,
    Bool,
    UInt,
    Unknown,
}

impl TypeHint {
    pub fn from_internal_name(name: &str) -> Self {
        if name.contains("_REAL_") {
            TypeHint::Real
        } else if name.contains("_BOOL_") {
            TypeHint::Bool
        } else if name.contains("_USINT_") || name.contains("_UINT_") {
            TypeHint::UInt
        } else {
            TypeHint::Unknown
        }
    }
}

/// One property value as read from a data page.
#[derive(Debug, Clone, PartialEq)]
pub struct RawValue {
    pub prop: String,
    pub value: String,
    pub type_hint: TypeHint,
    pub entity_id: String,
    /// Data page the value was read from.
    pub page: String,
    /// Controller-side variable name, preferred by the write path.
    pub internal_name: Option<String>,
    /// Only set by the legacy element shape.
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    /// Local language of the controller UI.
    Czech,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Constraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub digits: Option<u32>,
    pub unit: Option<String>,
    pub unit_en: Option<String>,
}

impl Constraints {
    pub const DEFAULT_STEP: f64 = 1.0;

    pub fn effective_step(&self) -> f64 {
        self.step.unwrap_or(Self::DEFAULT_STEP)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceOption {
    pub value: String,
    pub text_local: String,
    pub text_en: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorAttrs {
    pub unit: Option<String>,
    pub device_class: Option<DeviceClass>,
    /// Came from an on/off control.
    pub binary: bool,
}

/// Descriptor element shape, decided once at parse time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ElementKind {
    Number(Constraints),
    Switch,
    Choice(Vec<ChoiceOption>),
    /// Action payload sent on activation, if the element carries one.
    Button(Option<String>),
    /// Read-only value found inside a descriptor row.
    Sensor(SensorAttrs),
}

impl ElementKind {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            ElementKind::Number(_) => EntityKind::Number,
            ElementKind::Switch => EntityKind::Switch,
            ElementKind::Choice(_) => EntityKind::Select,
            ElementKind::Button(_) => EntityKind::Button,
            ElementKind::Sensor(attrs) if attrs.binary => EntityKind::BinarySensor,
            ElementKind::Sensor(_) => EntityKind::Sensor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorEntry {
    pub prop: String,
    pub element: ElementKind,
    pub friendly_name_local: String,
    pub friendly_name_en: String,
    /// Descriptor page the entry was declared on.
    pub page: String,
    pub writable: bool,
    pub visibility: Vec<(String, String)>,
}

impl DescriptorEntry {
    pub fn entity_kind(&self) -> EntityKind {
        self.element.entity_kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Sensor,
    BinarySensor,
    Switch,
    Number,
    Select,
    Button,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Temperature,
    Power,
    Energy,
    Pressure,
    Voltage,
    Current,
    Frequency,
    Duration,
}

impl DeviceClass {
    pub fn from_unit(unit: &str) -> Option<Self> {
        match unit {
            "°C" | "K" | "°F" => Some(DeviceClass::Temperature),
            "W" | "kW" | "MW" => Some(DeviceClass::Power),
            "Wh" | "kWh" | "MWh" | "J" | "kJ" => Some(DeviceClass::Energy),
            "Pa" | "kPa" | "MPa" | "bar" | "mbar" | "psi" => Some(DeviceClass::Pressure),
            "V" | "mV" | "kV" => Some(DeviceClass::Voltage),
            "A" | "mA" => Some(DeviceClass::Current),
            "Hz" | "kHz" | "MHz" => Some(DeviceClass::Frequency),
            "s" | "min" | "h" => Some(DeviceClass::Duration),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntityState {
    Bool(bool),
    Number(f64),
    Text(String),
    None,
}

/// Logical sub-device. Variant order is the claim priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKey {
    SpotPricing,
    PvInverter,
    Photovoltaics,
    BivalentHeatSource,
    HeatingCircuits,
    HotWater,
    UnitStatus,
    HeatPumpSettings,
    HiddenSettings,
    Unassigned,
}

impl DeviceKey {
    /// Buckets that claim entities, in priority order.
    pub const PRIORITY: [DeviceKey; 9] = [
        DeviceKey::SpotPricing,
        DeviceKey::PvInverter,
        DeviceKey::Photovoltaics,
        DeviceKey::BivalentHeatSource,
        DeviceKey::HeatingCircuits,
        DeviceKey::HotWater,
        DeviceKey::UnitStatus,
        DeviceKey::HeatPumpSettings,
        DeviceKey::HiddenSettings,
    ];

    /// Normalized page family a bucket claims. Hidden settings and the
    /// fallback bucket have none.
    pub fn page_family(&self) -> Option<&'static str> {
        match self {
            DeviceKey::SpotPricing => Some("SPOT"),
            DeviceKey::PvInverter => Some("FVEINV"),
            DeviceKey::Photovoltaics => Some("FVE"),
            DeviceKey::BivalentHeatSource => Some("BIV"),
            DeviceKey::HeatingCircuits => Some("OKRUH"),
            DeviceKey::HotWater => Some("TUV"),
            DeviceKey::UnitStatus => Some("STAVJED"),
            DeviceKey::HeatPumpSettings => Some("NAST"),
            DeviceKey::HiddenSettings | DeviceKey::Unassigned => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DeviceKey::SpotPricing => "Spot Prices",
            DeviceKey::PvInverter => "PV Inverter",
            DeviceKey::Photovoltaics => "Solar PV System",
            DeviceKey::BivalentHeatSource => "Heat Pump (BIV)",
            DeviceKey::HeatingCircuits => "Heating Circuits",
            DeviceKey::HotWater => "Hot Water System",
            DeviceKey::UnitStatus => "Unit Status",
            DeviceKey::HeatPumpSettings => "Heat Pump Settings",
            DeviceKey::HiddenSettings => "Hidden Settings",
            DeviceKey::Unassigned => "XCC Controller",
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityAttributes {
    pub unit: Option<String>,
    pub device_class: Option<DeviceClass>,
    pub friendly_name_local: String,
    pub friendly_name_en: String,
    pub options: Vec<ChoiceOption>,
    pub constraints: Option<Constraints>,
    /// Data page the state was read from.
    pub source_page: String,
    pub descriptor_page: Option<String>,
    pub writable: bool,
    pub internal_name: Option<String>,
    pub button_payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub id: String,
    pub prop: String,
    pub kind: EntityKind,
    pub name: String,
    pub state: EntityState,
    pub attributes: EntityAttributes,
    pub device: DeviceKey,
}

impl Entity {
    /// Label of the currently selected option, for select entities.
    pub fn selected_option(&self) -> Option<&ChoiceOption> {
        match &self.state {
            EntityState::Text(value) => self.attributes.options.iter().find(|o| &o.value == value),
            _ => None,
        }
    }
}

pub type EntityMap = BTreeMap<String, Entity>;

/// Changes observed between two successful refreshes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    EntityAdded {
        id: String,
        kind: EntityKind,
        device: DeviceKey,
    },
    EntityRemoved {
        id: String,
    },
    StateChanged {
        id: String,
        prop: String,
        old: EntityState,
        new: EntityState,
    },
}

/// Builds `<prefix>_<prop>` with the prop folded to a lowercase identifier.
pub fn format_entity_id(prefix: &str, prop: &str) -> String {
    let mut out = String::with_capacity(prop.len());
    for c in prop.chars().flat_map(char::to_lowercase) {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches('_');
    let suffix = if trimmed.is_empty() { "unknown" } else { trimmed };
    if prefix.is_empty() {
        suffix.to_string()
    } else {
        format!("{prefix}_{suffix}")
    }
}
