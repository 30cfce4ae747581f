use crate::address::GroupAddress;
use crate::level::Level;

/// A bridge-internal representation of a write request, independent of
/// whether it arrived via MQTT. Encoded to a C-Gate command string by
/// `encode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Switch { address: GroupAddress, on: bool },
    Ramp { address: GroupAddress, percent: u8, time: Option<String> },
    Increase { address: GroupAddress },
    Decrease { address: GroupAddress },
    Position { address: GroupAddress, percent: u8 },
    Stop { address: GroupAddress },
    GetAll { network: u8, application: u8 },
    GetTree { network: u8 },
    Announce,
}

/// Encodes a `Command` into the literal C-Gate command string (without the
/// trailing newline; the queue/pool add framing).
pub fn encode(cmd: &Command, project: &str) -> Option<String> {
    match cmd {
        Command::Switch { address, on } => Some(format!(
            "{} //{}/{}",
            if *on { "ON" } else { "OFF" },
            project,
            address
        )),
        Command::Ramp { address, percent, time } => {
            let raw = Level::from_percent(*percent).raw();
            match time {
                Some(t) => Some(format!("RAMP //{}/{} {} {}", project, address, raw, t)),
                None => Some(format!("RAMP //{}/{} {}", project, address, raw)),
            }
        }
        Command::Position { address, percent } => {
            let raw = Level::from_percent(*percent).raw();
            Some(format!("RAMP //{}/{} {}", project, address, raw))
        }
        Command::Stop { address } => Some(format!("TERMINATERAMP //{}/{}", project, address)),
        Command::GetAll { network, application } => {
            Some(format!("GET //{}/{}/{}/*  level", project, network, application))
        }
        Command::GetTree { network } => Some(format!("TREEXML {}", network)),
        // Increase/Decrease are not directly encodable: the correlator
        // issues the GET and, on reply, a Ramp command of its own.
        Command::Increase { .. } | Command::Decrease { .. } => None,
        Command::Announce => None,
    }
}

/// Encodes a one-shot level query for `address`, used by the relative-level
/// flow (§4.3) ahead of issuing the follow-up ramp.
pub fn encode_get_level(address: &GroupAddress, project: &str) -> String {
    format!("GET //{}/{} level", project, address)
}

/// Encodes a RAMP command directly from a raw `[0, 255]` level, bypassing
/// `Command::Ramp`'s percent field entirely. Used by the relative-level flow
/// (§4.3), which already computes the clamped raw level and must enqueue
/// that exact integer rather than re-deriving it through a percent round-trip.
pub fn encode_ramp_raw(address: &GroupAddress, raw: u8, project: &str) -> String {
    format!("RAMP //{}/{} {}", project, address, raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_switch_on() {
        let cmd = Command::Switch { address: GroupAddress::new(254, 56, 4), on: true };
        assert_eq!(encode(&cmd, "PROJECT").unwrap(), "ON //PROJECT/254/56/4");
    }

    #[test]
    fn encodes_ramp_percent() {
        let cmd = Command::Ramp { address: GroupAddress::new(254, 56, 1), percent: 75, time: None };
        assert_eq!(encode(&cmd, "PROJECT").unwrap(), "RAMP //PROJECT/254/56/1 191");
    }

    #[test]
    fn encodes_ramp_with_time() {
        let cmd = Command::Ramp {
            address: GroupAddress::new(254, 56, 1),
            percent: 50,
            time: Some("5s".to_string()),
        };
        assert_eq!(encode(&cmd, "PROJECT").unwrap(), "RAMP //PROJECT/254/56/1 128 5s");
    }

    #[test]
    fn encodes_stop_as_terminateramp() {
        let cmd = Command::Stop { address: GroupAddress::new(254, 56, 1) };
        assert_eq!(encode(&cmd, "PROJECT").unwrap(), "TERMINATERAMP //PROJECT/254/56/1");
    }

    #[test]
    fn increase_decrease_have_no_direct_encoding() {
        let cmd = Command::Increase { address: GroupAddress::new(254, 56, 1) };
        assert!(encode(&cmd, "PROJECT").is_none());
    }

    #[test]
    fn encodes_ramp_raw_with_the_exact_integer_no_percent_rounding() {
        let address = GroupAddress::new(254, 56, 1);
        // 100 + 26 clamped is 126, which does not round-trip exactly through
        // a percent conversion (100 -> 39% -> 99, not 100); encode_ramp_raw
        // must still emit 126 verbatim.
        assert_eq!(encode_ramp_raw(&address, 126, "PROJECT"), "RAMP //PROJECT/254/56/1 126");
    }
}
