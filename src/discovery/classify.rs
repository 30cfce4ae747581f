use crate::settings::Discovery;

/// The device class a group is classified as, used to pick the
/// Home-Assistant-style MQTT discovery component and the shape of its
/// config payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Light,
    Cover,
    Switch,
    Relay,
    Pir,
}

impl DeviceClass {
    /// The discovery component name used in the config topic, e.g.
    /// `homeassistant/<component>/cgateweb_N_A_G/config`.
    pub fn component(self) -> &'static str {
        match self {
            DeviceClass::Light => "light",
            DeviceClass::Cover => "cover",
            DeviceClass::Switch => "switch",
            DeviceClass::Relay => "switch",
            DeviceClass::Pir => "binary_sensor",
        }
    }

    pub fn from_override_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Some(DeviceClass::Light),
            "cover" => Some(DeviceClass::Cover),
            "switch" => Some(DeviceClass::Switch),
            "relay" => Some(DeviceClass::Relay),
            "pir" | "binary_sensor" => Some(DeviceClass::Pir),
            _ => None,
        }
    }
}

const LIGHTING_APPLICATION: u8 = 56;

/// Classifies an application id into a device class, per the priority order
/// Cover > Switch > Relay > PIR when a configured id is ambiguous, and with
/// the Lighting application always treated as a dimmable light regardless of
/// any other configured id that happens to collide with it.
pub fn classify(application: u8, discovery: &Discovery) -> Option<DeviceClass> {
    if application == LIGHTING_APPLICATION {
        return Some(DeviceClass::Light);
    }

    if Some(application) == discovery.cover_app_id {
        return Some(DeviceClass::Cover);
    }
    if Some(application) == discovery.switch_app_id {
        return Some(DeviceClass::Switch);
    }
    if Some(application) == discovery.relay_app_id {
        return Some(DeviceClass::Relay);
    }
    if Some(application) == discovery.pir_app_id {
        return Some(DeviceClass::Pir);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery(cover: u8, switch: u8) -> Discovery {
        Discovery {
            enabled: true,
            prefix: "homeassistant".to_string(),
            networks: vec![254],
            cover_app_id: Some(cover),
            switch_app_id: Some(switch),
            relay_app_id: None,
            pir_app_id: None,
            label_file: None,
            period_secs: None,
        }
    }

    #[test]
    fn lighting_is_always_a_light() {
        let d = discovery(56, 56); // deliberately ambiguous with lighting
        assert_eq!(classify(56, &d), Some(DeviceClass::Light));
    }

    #[test]
    fn cover_outranks_switch_on_the_same_id() {
        let d = discovery(203, 203);
        assert_eq!(classify(203, &d), Some(DeviceClass::Cover));
    }

    #[test]
    fn unmapped_application_is_skipped() {
        let d = discovery(203, 204);
        assert_eq!(classify(99, &d), None);
    }
}
