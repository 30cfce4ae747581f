use crate::prelude::*;
use crate::protocol::line::ParsedLine;
use crate::queue::ThrottledQueue;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TreeGroup {
    pub network: u8,
    pub application: u8,
    pub group: u8,
    pub tag: Option<String>,
}

/// Enqueues `TREEXML <network>` and collects the multi-line `343-`/`343 `
/// response into a single buffer, terminating on the first non-continuation
/// `343` line or the timeout.
pub async fn request_tree_xml(
    channels: &Channels,
    queue: &Arc<ThrottledQueue>,
    network: u8,
    timeout: Duration,
) -> Result<String> {
    let mut receiver = channels.from_cgate.subscribe();
    queue.push(format!("TREEXML {}", network));

    let mut buffer = String::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            bail!("tree.rs:timed out collecting TREEXML response for network {}", network);
        }

        match tokio::time::timeout(remaining, receiver.recv()).await {
            Ok(Ok(ParsedLine::Response { code: 343, continuation, payload })) => {
                buffer.push_str(&payload);
                if !continuation {
                    return Ok(buffer);
                }
            }
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => bail!("tree.rs:from_cgate channel error: {}", e),
            Err(_) => bail!("tree.rs:timed out collecting TREEXML response for network {}", network),
        }
    }
}

/// Parses a TREEXML payload into `(network, application, group, tag)`
/// triples. Tolerant of two encodings: attributes on the element
/// (`<Group Address="4" Name="Kitchen"/>`) and attributes expressed as
/// child elements (`<Group><Address>4</Address><Name>Kitchen</Name></Group>`).
pub fn parse(xml: &str, fallback_network: u8) -> Result<Vec<TreeGroup>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut groups = Vec::new();
    let mut network = fallback_network;
    let mut current_application: Option<u8> = None;

    // Text-child accumulators for whichever of network/application/group is
    // currently open, used only by the child-element encoding; the
    // attribute encoding fills these fields directly from `attrs` instead.
    let mut network_ctx: Option<HashMap<String, String>> = None;
    let mut app_ctx: Option<HashMap<String, String>> = None;
    let mut group_ctx: Option<(HashMap<String, String>, HashMap<String, String>)> = None;
    let mut child_stack: Vec<String> = Vec::new();
    let mut last_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            // Self-closing tags (`<Group .../>`) carry no children, so they
            // finalize immediately from their attributes alone.
            Ok(Event::Empty(e)) => {
                let name = local_name(&e);
                let attrs = attrs_of(&e)?;

                match name.as_str() {
                    "network" => {
                        if let Some(a) = attrs.get("address").and_then(|v| v.parse().ok()) {
                            network = a;
                        }
                    }
                    "group" | "unit" => {
                        push_group(&mut groups, network, current_application, &attrs, &HashMap::new());
                    }
                    _ => {}
                }
            }
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                let attrs = attrs_of(&e)?;

                match name.as_str() {
                    "network" => {
                        if let Some(a) = attrs.get("address").and_then(|v| v.parse().ok()) {
                            network = a;
                        }
                        network_ctx = Some(attrs);
                    }
                    "application" => {
                        if let Some(a) = attrs.get("address").and_then(|v| v.parse().ok()) {
                            current_application = Some(a);
                        }
                        app_ctx = Some(attrs);
                    }
                    "group" | "unit" => {
                        group_ctx = Some((attrs, HashMap::new()));
                    }
                    _ => {
                        if group_ctx.is_some() || app_ctx.is_some() || network_ctx.is_some() {
                            child_stack.push(name);
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                last_text = t.unescape().unwrap_or_default().into_owned();
            }
            Ok(Event::End(e)) => {
                let name = local_name_from_end(&e);

                if let Some(child) = child_stack.last() {
                    if child == &name {
                        child_stack.pop();
                        if let Some((_, fields)) = group_ctx.as_mut() {
                            fields.insert(name.clone(), last_text.clone());
                        } else if let Some(fields) = app_ctx.as_mut() {
                            fields.insert(name.clone(), last_text.clone());
                            // The application's address may arrive as a child
                            // element before a nested Group closes, so make it
                            // available immediately rather than waiting for
                            // the Application End event.
                            if name == "address" {
                                if let Ok(a) = last_text.parse() {
                                    current_application = Some(a);
                                }
                            }
                        } else if let Some(fields) = network_ctx.as_mut() {
                            fields.insert(name.clone(), last_text.clone());
                            if name == "address" {
                                if let Ok(a) = last_text.parse() {
                                    network = a;
                                }
                            }
                        }
                        continue;
                    }
                }

                match name.as_str() {
                    "network" => {
                        if let Some(fields) = network_ctx.take() {
                            if let Some(a) = fields.get("address").and_then(|v| v.parse().ok()) {
                                network = a;
                            }
                        }
                    }
                    "application" => {
                        if let Some(fields) = app_ctx.take() {
                            if current_application.is_none() {
                                current_application = fields.get("address").and_then(|v| v.parse().ok());
                            }
                        } else {
                            current_application = None;
                        }
                    }
                    "group" | "unit" => {
                        if let Some((attrs, fields)) = group_ctx.take() {
                            push_group(&mut groups, network, current_application, &attrs, &fields);
                        }
                    }
                    _ => {}
                }
            }
            Ok(_) => {}
            Err(e) => bail!("tree.rs:xml parse error: {}", e),
        }
    }

    Ok(groups)
}

fn push_group(
    groups: &mut Vec<TreeGroup>,
    network: u8,
    application: Option<u8>,
    attrs: &HashMap<String, String>,
    fields: &HashMap<String, String>,
) {
    let application = match application.or_else(|| fields.get("application").and_then(|v| v.parse().ok())) {
        Some(a) => a,
        None => return,
    };

    let group = attrs
        .get("address")
        .or_else(|| fields.get("address"))
        .and_then(|v| v.parse().ok());
    let group = match group {
        Some(g) => g,
        None => return,
    };

    let tag = attrs
        .get("name")
        .or_else(|| fields.get("name"))
        .or_else(|| attrs.get("tagname"))
        .or_else(|| fields.get("tagname"))
        .cloned();

    groups.push(TreeGroup { network, application, group, tag });
}

fn local_name(e: &quick_xml::events::BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}

fn local_name_from_end(e: &quick_xml::events::BytesEnd) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}

fn attrs_of(e: &quick_xml::events::BytesStart) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| anyhow!("tree.rs:bad xml attribute: {}", e))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
        let value = attr
            .unescape_value()
            .map_err(|e| anyhow!("tree.rs:bad xml attribute value: {}", e))?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attribute_encoding() {
        let xml = r#"<Network Address="254">
            <Application Address="56" Name="Lighting">
                <Group Address="4" Name="Kitchen Light"/>
                <Group Address="6" Name="Hallway Light"/>
            </Application>
        </Network>"#;

        let groups = parse(xml, 0).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], TreeGroup { network: 254, application: 56, group: 4, tag: Some("Kitchen Light".into()) });
        assert_eq!(groups[1].group, 6);
    }

    #[test]
    fn parses_child_element_encoding() {
        let xml = r#"<Network>
            <Address>254</Address>
            <Application>
                <Address>56</Address>
                <Name>Lighting</Name>
                <Group>
                    <Address>4</Address>
                    <Name>Kitchen Light</Name>
                </Group>
            </Application>
        </Network>"#;

        let groups = parse(xml, 0).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0], TreeGroup { network: 254, application: 56, group: 4, tag: Some("Kitchen Light".into()) });
    }
}
