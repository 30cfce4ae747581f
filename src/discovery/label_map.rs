use crate::discovery::classify::DeviceClass;
use crate::prelude::*;

use serde::Deserialize;
use std::collections::HashMap;

/// An operator-edited JSON override file: friendly names, forced device
/// classes, custom entity id slugs, and an exclude list, keyed by `N/A/G`
/// address strings. Overrides tree-derived classification per the decision
/// recorded in DESIGN.md.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawLabelMap {
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    #[serde(rename = "typeOverrides")]
    type_overrides: HashMap<String, String>,
    #[serde(default)]
    #[serde(rename = "entityIds")]
    entity_ids: HashMap<String, String>,
    #[serde(default)]
    exclude: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    pub labels: HashMap<GroupAddress, String>,
    pub type_overrides: HashMap<GroupAddress, DeviceClass>,
    pub entity_ids: HashMap<GroupAddress, String>,
    pub exclude: std::collections::HashSet<GroupAddress>,
}

impl LabelMap {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| file_error_with_source!(err, "error reading label map {}", path))?;
        let raw: RawLabelMap = serde_json::from_str(&content)?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawLabelMap) -> Self {
        let mut labels = HashMap::new();
        for (addr, label) in raw.labels {
            match GroupAddress::from_str(&addr) {
                Ok(a) => { labels.insert(a, label); }
                Err(e) => warn!("label_map.rs:ignoring bad address {:?} in labels: {}", addr, e),
            }
        }

        let mut type_overrides = HashMap::new();
        for (addr, class) in raw.type_overrides {
            let a = match GroupAddress::from_str(&addr) {
                Ok(a) => a,
                Err(e) => {
                    warn!("label_map.rs:ignoring bad address {:?} in typeOverrides: {}", addr, e);
                    continue;
                }
            };
            match DeviceClass::from_override_str(&class) {
                Some(c) => { type_overrides.insert(a, c); }
                // reject-on-load: an unrecognised class string is logged
                // and the group falls back to tree classification.
                None => warn!("label_map.rs:ignoring unrecognised typeOverride {:?} for {}", class, a),
            }
        }

        let mut entity_ids = HashMap::new();
        for (addr, slug) in raw.entity_ids {
            match GroupAddress::from_str(&addr) {
                Ok(a) => { entity_ids.insert(a, slug); }
                Err(e) => warn!("label_map.rs:ignoring bad address {:?} in entityIds: {}", addr, e),
            }
        }

        let mut exclude = std::collections::HashSet::new();
        for addr in raw.exclude {
            match GroupAddress::from_str(&addr) {
                Ok(a) => { exclude.insert(a); }
                Err(e) => warn!("label_map.rs:ignoring bad address {:?} in exclude: {}", addr, e),
            }
        }

        Self { labels, type_overrides, entity_ids, exclude }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_parses_a_well_formed_label_map() {
        let json = r#"{
            "labels": {"254/56/4": "Kitchen"},
            "typeOverrides": {"254/203/1": "cover"},
            "entityIds": {"254/56/4": "kitchen_light"},
            "exclude": ["254/56/99"]
        }"#;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.json");
        std::fs::write(&path, json).unwrap();

        let map = LabelMap::load(path.to_str().unwrap()).unwrap();
        let kitchen = GroupAddress::new(254, 56, 4);
        assert_eq!(map.labels.get(&kitchen).unwrap(), "Kitchen");
        assert_eq!(map.entity_ids.get(&kitchen).unwrap(), "kitchen_light");
        assert_eq!(
            map.type_overrides.get(&GroupAddress::new(254, 203, 1)).unwrap(),
            &DeviceClass::Cover
        );
        assert!(map.exclude.contains(&GroupAddress::new(254, 56, 99)));
    }

    #[test]
    fn invalid_type_override_value_is_rejected_not_fatal() {
        let raw = RawLabelMap {
            type_overrides: HashMap::from([("254/56/4".to_string(), "spaceship".to_string())]),
            ..Default::default()
        };
        let map = LabelMap::from_raw(raw);
        assert!(map.type_overrides.is_empty());
    }
}
