use crate::discovery::classify::DeviceClass;
use crate::discovery::tree::TreeGroup;
use crate::prelude::*;

use serde_json::{json, Value};

/// The slug used in both the discovery config topic and the `unique_id`:
/// `cgateweb_<network>_<application>_<group>`.
pub fn slug(address: GroupAddress) -> String {
    format!("cgateweb_{}_{}_{}", address.network, address.application, address.group)
}

/// The retained config topic a group's discovery message is published to.
pub fn config_topic(prefix: &str, class: DeviceClass, address: GroupAddress) -> String {
    format!("{}/{}/{}/config", prefix, class.component(), slug(address))
}

/// Builds the JSON discovery payload for one group. `name` is the final
/// display name (label map override, or the tree's tagName, or a generic
/// fallback); grounded on the teacher's `Message::for_param` constructors
/// that assemble a fixed JSON shape per value kind.
pub fn build(class: DeviceClass, address: GroupAddress, name: &str) -> Value {
    let state_topic = format!("cbus/read/{}/state", address);
    let command_topic = format!("cbus/write/{}/switch", address);
    let device = json!({
        "identifiers": [format!("cgateweb_network_{}", address.network)],
        "name": format!("C-Bus Network {}", address.network),
        "manufacturer": "Clipsal",
        "model": "C-Bus",
    });

    let mut payload = json!({
        "name": name,
        "unique_id": slug(address),
        "device": device,
    });

    let obj = payload.as_object_mut().expect("payload is always a json object");

    match class {
        DeviceClass::Light => {
            obj.insert("state_topic".into(), json!(state_topic));
            obj.insert("command_topic".into(), json!(command_topic));
            obj.insert("brightness_state_topic".into(), json!(format!("cbus/read/{}/level", address)));
            obj.insert("brightness_command_topic".into(), json!(format!("cbus/write/{}/ramp", address)));
            obj.insert("brightness_scale".into(), json!(100));
            obj.insert("payload_on".into(), json!("ON"));
            obj.insert("payload_off".into(), json!("OFF"));
        }
        DeviceClass::Cover => {
            obj.insert("position_topic".into(), json!(format!("cbus/read/{}/level", address)));
            obj.insert("set_position_topic".into(), json!(format!("cbus/write/{}/position", address)));
            obj.insert("command_topic".into(), json!(format!("cbus/write/{}/stop", address)));
            obj.insert("position_open".into(), json!(100));
            obj.insert("position_closed".into(), json!(0));
        }
        DeviceClass::Switch | DeviceClass::Relay => {
            obj.insert("state_topic".into(), json!(state_topic));
            obj.insert("command_topic".into(), json!(command_topic));
            obj.insert("payload_on".into(), json!("ON"));
            obj.insert("payload_off".into(), json!("OFF"));
        }
        DeviceClass::Pir => {
            obj.insert("state_topic".into(), json!(state_topic));
            obj.insert("payload_on".into(), json!("ON"));
            obj.insert("payload_off".into(), json!("OFF"));
            obj.insert("device_class".into(), json!("motion"));
        }
    }

    payload
}

/// Picks the display name for a group: label map label wins, else the
/// tree's `tagName`, else a generic `N/A/G` fallback.
pub fn display_name(group: &TreeGroup, label: Option<&str>) -> String {
    label
        .map(str::to_string)
        .or_else(|| group.tag.clone())
        .unwrap_or_else(|| format!("CBus {}/{}/{}", group.network, group.application, group.group))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_payload_has_brightness_topics() {
        let address = GroupAddress::new(254, 56, 4);
        let payload = build(DeviceClass::Light, address, "Kitchen Light");
        assert_eq!(payload["command_topic"], "cbus/write/254/56/4/switch");
        assert_eq!(payload["brightness_command_topic"], "cbus/write/254/56/4/ramp");
        assert_eq!(payload["unique_id"], "cgateweb_254_56_4");
    }

    #[test]
    fn cover_payload_has_position_topics_not_switch_topics() {
        let address = GroupAddress::new(254, 203, 1);
        let payload = build(DeviceClass::Cover, address, "Lounge Blind");
        assert_eq!(payload["set_position_topic"], "cbus/write/254/203/1/position");
        assert!(payload.get("brightness_command_topic").is_none());
    }

    #[test]
    fn display_name_prefers_label_then_tag_then_fallback() {
        let group = TreeGroup { network: 254, application: 56, group: 4, tag: Some("Tree Tag".into()) };
        assert_eq!(display_name(&group, Some("Label Wins")), "Label Wins");
        assert_eq!(display_name(&group, None), "Tree Tag");

        let untagged = TreeGroup { network: 254, application: 56, group: 9, tag: None };
        assert_eq!(display_name(&untagged, None), "CBus 254/56/9");
    }
}
