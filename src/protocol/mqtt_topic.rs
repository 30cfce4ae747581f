use crate::address::GroupAddress;
use crate::prelude::*;
use crate::protocol::command::Command;

/// Parses an inbound MQTT write topic (already stripped of any outer
/// namespace, e.g. `cbus/write/254/56/4/ramp`) and its payload into a
/// `Command`. Grounded on the teacher's `Message::to_command`/
/// `split_cmd_topic` topic-slice matching.
pub fn parse(topic: &str, payload: &str) -> Result<Command> {
    let parts: Vec<&str> = topic.split('/').collect();

    match parts[..] {
        ["cbus", "write", "bridge", "announce"] => Ok(Command::Announce),
        ["cbus", "write", n, _a, _g, "switch"] => {
            let address = full_address(&parts[2..5])?;
            Ok(Command::Switch { address, on: payload_bool(payload)? })
        }
        ["cbus", "write", _n, _a, _g, "ramp"] => {
            let address = full_address(&parts[2..5])?;
            parse_ramp_payload(address, payload)
        }
        ["cbus", "write", _n, _a, _g, "position"] => {
            let address = full_address(&parts[2..5])?;
            Ok(Command::Position { address, percent: payload_percent(payload)? })
        }
        ["cbus", "write", _n, _a, _g, "stop"] => {
            let address = full_address(&parts[2..5])?;
            Ok(Command::Stop { address })
        }
        ["cbus", "write", n, a, "", "getall"] => Ok(Command::GetAll {
            network: n.parse()?,
            application: a.parse()?,
        }),
        ["cbus", "write", n, "", "", "gettree"] => Ok(Command::GetTree { network: n.parse()? }),
        _ => bail!("mqtt_topic.rs:unhandled topic {:?}", topic),
    }
}

fn full_address(parts: &[&str]) -> Result<GroupAddress> {
    GroupAddress::from_str(&parts.join("/"))
}

fn parse_ramp_payload(address: GroupAddress, payload: &str) -> Result<Command> {
    let upper = payload.trim().to_ascii_uppercase();
    match upper.as_str() {
        "ON" => return Ok(Command::Switch { address, on: true }),
        "OFF" => return Ok(Command::Switch { address, on: false }),
        "INCREASE" => return Ok(Command::Increase { address }),
        "DECREASE" => return Ok(Command::Decrease { address }),
        _ => {}
    }

    if let Some((pct, time)) = payload.split_once(',') {
        return Ok(Command::Ramp {
            address,
            percent: pct.trim().parse()?,
            time: Some(time.trim().to_string()),
        });
    }

    Ok(Command::Ramp {
        address,
        percent: payload_percent(payload)?,
        time: None,
    })
}

fn payload_percent(payload: &str) -> Result<u8> {
    let v: u8 = payload
        .trim()
        .parse()
        .map_err(|err| anyhow!("mqtt_topic.rs:invalid percent payload {:?}: {}", payload, err))?;
    if v > 100 {
        bail!("mqtt_topic.rs:percent payload {} out of range", v);
    }
    Ok(v)
}

fn payload_bool(payload: &str) -> Result<bool> {
    match payload.trim().to_ascii_uppercase().as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        other => bail!("mqtt_topic.rs:invalid switch payload {:?}", other),
    }
}
