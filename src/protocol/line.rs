use crate::address::GroupAddress;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, space1},
    combinator::{map, map_res, opt, rest},
    sequence::{preceded, tuple},
    IResult,
};

/// A single line received from the C-Gate event socket or command socket,
/// decoded into a structured record. Lines that don't match a recognised
/// shape are `Invalid`; callers drop those after logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// An unsolicited event: `<deviceType> <action> <N/A/G> [level] [meta]`.
    Event {
        device_type: String,
        action: String,
        address: GroupAddress,
        level: Option<u8>,
    },
    /// A status response line, code 300, carrying `level=<n>` for an address.
    Status {
        address: GroupAddress,
        level: u8,
    },
    /// Any other numeric-coded response line (banners, `200`, `4xx`, `3xx-`
    /// continuation lines that aren't status reports).
    Response {
        code: u16,
        continuation: bool,
        payload: String,
    },
    Invalid,
}

impl ParsedLine {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return ParsedLine::Invalid;
        }

        if let Ok((_, status)) = parse_status_line(line) {
            return status;
        }
        if let Ok((_, response)) = parse_response_line(line) {
            return response;
        }
        if let Ok((_, event)) = parse_event_line(line) {
            return event;
        }

        ParsedLine::Invalid
    }
}

fn word(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

fn address(input: &str) -> IResult<&str, GroupAddress> {
    map_res(
        tuple((digit1, char('/'), digit1, char('/'), digit1)),
        |(n, _, a, _, g): (&str, char, &str, char, &str)| -> Result<GroupAddress, std::num::ParseIntError> {
            Ok(GroupAddress::new(n.parse()?, a.parse()?, g.parse()?))
        },
    )(input)
}

/// `lighting on 254/56/4  #sourceunit=8` / `lighting ramp 254/56/6 128`
fn parse_event_line(input: &str) -> IResult<&str, ParsedLine> {
    let (rest_input, (device_type, _, action, _, addr)) = tuple((
        word,
        space1,
        word,
        space1,
        address,
    ))(input)?;

    let (_, level) = opt(preceded(space1, map_res(digit1, str::parse::<u8>)))(rest_input)?;

    Ok((
        "",
        ParsedLine::Event {
            device_type: device_type.to_string(),
            action: action.to_string(),
            address: addr,
            level,
        },
    ))
}

/// `300 //PROJECT/254/56/4: level=128`
///
/// The address sits in the path *before* the colon, as its last three
/// slash-separated components; `level=<n>` follows the colon.
fn parse_status_line(input: &str) -> IResult<&str, ParsedLine> {
    let (input, _) = tag("300")(input)?;
    let (input, _) = alt((space1, tag("-")))(input)?;
    let (input, path) = take_while1(|c| c != ':')(input)?;
    let (input, _) = char(':')(input)?;
    let (input, _) = opt(space1)(input)?;
    let (input, _) = opt(take_while1(|c: char| c != 'l'))(input)?;
    let (input, level) = preceded(tag("level="), map_res(digit1, str::parse::<u8>))(input)?;

    let (_, addr) = path_address(path)?;

    Ok((input, ParsedLine::Status { address: addr, level }))
}

/// Extracts the last three slash-separated numeric components of a
/// `//PROJECT/254/56/4` style path as a `GroupAddress`, ignoring any
/// leading project/segment prefix.
fn path_address(path: &str) -> IResult<&str, GroupAddress> {
    let parts: Vec<&str> = path.trim().trim_end_matches('/').split('/').collect();
    if parts.len() < 3 {
        return Err(nom::Err::Error(nom::error::Error::new(path, nom::error::ErrorKind::Digit)));
    }
    let tail = parts[parts.len() - 3..].join("/");
    match address(&tail) {
        Ok((_, addr)) => Ok((path, addr)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(path, nom::error::ErrorKind::Digit))),
    }
}

/// Any `<3 digits><- or space><payload>` line that isn't a `300` status line.
fn parse_response_line(input: &str) -> IResult<&str, ParsedLine> {
    let (input, code) = map_res(digit1, str::parse::<u16>)(input)?;
    if !(100..1000).contains(&code) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        )));
    }
    let (input, sep) = alt((char('-'), char(' ')))(input)?;
    let (input, payload) = rest(input)?;

    Ok((
        "",
        ParsedLine::Response {
            code,
            continuation: sep == '-',
            payload: payload.trim_start().to_string(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unsolicited_on_event() {
        let parsed = ParsedLine::parse("lighting on 254/56/4  #sourceunit=8");
        assert_eq!(
            parsed,
            ParsedLine::Event {
                device_type: "lighting".into(),
                action: "on".into(),
                address: GroupAddress::new(254, 56, 4),
                level: None,
            }
        );
    }

    #[test]
    fn parses_ramp_event_with_level() {
        let parsed = ParsedLine::parse("lighting ramp 254/56/6 128");
        assert_eq!(
            parsed,
            ParsedLine::Event {
                device_type: "lighting".into(),
                action: "ramp".into(),
                address: GroupAddress::new(254, 56, 6),
                level: Some(128),
            }
        );
    }

    #[test]
    fn rejects_two_segment_clock_broadcast() {
        let parsed = ParsedLine::parse("clock date //CLIPSAL/254/223 2026-03-02");
        assert_eq!(parsed, ParsedLine::Invalid);
    }

    #[test]
    fn rejects_empty_line() {
        assert_eq!(ParsedLine::parse(""), ParsedLine::Invalid);
        assert_eq!(ParsedLine::parse("   "), ParsedLine::Invalid);
    }

    #[test]
    fn parses_status_line() {
        let parsed = ParsedLine::parse("300 //PROJECT/254/56/4: level=250");
        assert_eq!(
            parsed,
            ParsedLine::Status {
                address: GroupAddress::new(254, 56, 4),
                level: 250,
            }
        );
    }

    #[test]
    fn parses_plain_response_line() {
        let parsed = ParsedLine::parse("200 OK");
        assert_eq!(
            parsed,
            ParsedLine::Response {
                code: 200,
                continuation: false,
                payload: "OK".into(),
            }
        );
    }

    #[test]
    fn parses_continuation_response_line() {
        let parsed = ParsedLine::parse("343-<network>stuff</network>");
        assert_eq!(
            parsed,
            ParsedLine::Response {
                code: 343,
                continuation: true,
                payload: "<network>stuff</network>".into(),
            }
        );
    }
}
