//! Parsing for the over-the-air control channel.
//!
//! A ground station configures the radio by sending
//! `rocket-netid=5&airspeed=64-end` (sets) or `rocket-netid?&airspeed?-end`
//! (queries), where `rocket` and `end` are the configured start and end tokens.
//! The text between the tokens must begin and end with `-`.

use std::fmt;

use serde::Serialize;
use tracing::debug;

/// A radio setting reachable from the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioParameter {
    /// Network id, S-register 3.
    NetId,
    /// Serial baud rate, S-register 1.
    SerialSpeed,
    /// Air data rate, S-register 2.
    AirSpeed,
}

impl RadioParameter {
    /// The modem S-register holding this setting.
    #[must_use]
    pub fn register(self) -> u8 {
        match self {
            Self::NetId => 3,
            Self::SerialSpeed => 1,
            Self::AirSpeed => 2,
        }
    }

    /// Key used on the control channel.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::NetId => "netid",
            Self::SerialSpeed => "serialspeed",
            Self::AirSpeed => "airspeed",
        }
    }

    /// Look up a control-channel key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "netid" => Some(Self::NetId),
            "serialspeed" => Some(Self::SerialSpeed),
            "airspeed" => Some(Self::AirSpeed),
            _ => None,
        }
    }
}

impl fmt::Display for RadioParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One `key=value` or `key?` item of a control command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Change a setting.
    Set {
        /// Setting to change.
        parameter: RadioParameter,
        /// New value.
        value: u32,
    },
    /// Report a setting.
    Query {
        /// Setting to report.
        parameter: RadioParameter,
    },
}

/// Location of a complete command inside the pending text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpan {
    /// Byte range of the text between the tokens.
    pub body: std::ops::Range<usize>,
    /// Byte offset just past the end token.
    pub consumed: usize,
}

/// Find the first start token and the first end token after it.
#[must_use]
pub fn find_command(pending: &str, start: &str, end: &str) -> Option<CommandSpan> {
    let start_at = pending.find(start)?;
    let body_start = start_at + start.len();
    let end_at = body_start + pending[body_start..].find(end)?;
    Some(CommandSpan {
        body: body_start..end_at,
        consumed: end_at + end.len(),
    })
}

/// Parse the text between the tokens into requests.
///
/// Returns `None` if the `-` sentinels are missing. Unknown keys and values
/// that are not unsigned integers are skipped.
#[must_use]
pub fn parse_command(body: &str) -> Option<Vec<ControlRequest>> {
    let inner = body.strip_prefix('-')?.strip_suffix('-')?;

    let requests = inner
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let request = if let Some((key, value)) = pair.split_once('=') {
                let parameter = RadioParameter::from_key(key)?;
                match value.trim().parse() {
                    Ok(value) => ControlRequest::Set { parameter, value },
                    Err(_) => {
                        debug!(key, value, "ignoring non-numeric control value");
                        return None;
                    }
                }
            } else if let Some((key, _)) = pair.split_once('?') {
                ControlRequest::Query {
                    parameter: RadioParameter::from_key(key)?,
                }
            } else {
                debug!(pair, "ignoring malformed control pair");
                return None;
            };
            Some(request)
        })
        .collect();
    Some(requests)
}

/// Pull the register value out of a modem query reply.
///
/// The modem echoes the command line and then prints the value, so the value
/// sits between the first and the last line feed. Replies without two line
/// feeds are returned trimmed.
#[must_use]
pub fn parse_register_reply(reply: &str) -> String {
    let value = match (reply.find('\n'), reply.rfind('\n')) {
        (Some(first), Some(last)) if last > first => &reply[first + 1..last],
        _ => reply,
    };
    value.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_command() {
        let pending = "noiserocket-netid?-endtail";
        let span = find_command(pending, "rocket", "end").unwrap();
        assert_eq!(&pending[span.body.clone()], "-netid?-");
        assert_eq!(&pending[span.consumed..], "tail");
    }

    #[test]
    fn test_find_command_needs_both_tokens() {
        assert!(find_command("rocket-netid=5-", "rocket", "end").is_none());
        assert!(find_command("-netid=5-end", "rocket", "end").is_none());
        // An end token before the start token does not count.
        assert!(find_command("end rocket-netid?-", "rocket", "end").is_none());
    }

    #[test]
    fn test_parse_sets_and_queries() {
        let requests = parse_command("-netid=25&airspeed?&serialspeed=57-").unwrap();
        assert_eq!(
            requests,
            vec![
                ControlRequest::Set {
                    parameter: RadioParameter::NetId,
                    value: 25
                },
                ControlRequest::Query {
                    parameter: RadioParameter::AirSpeed
                },
                ControlRequest::Set {
                    parameter: RadioParameter::SerialSpeed,
                    value: 57
                },
            ]
        );
    }

    #[test]
    fn test_parse_skips_unknown_and_bad_values() {
        let requests = parse_command("-power=20&netid=abc&channel?&airspeed?-").unwrap();
        assert_eq!(
            requests,
            vec![ControlRequest::Query {
                parameter: RadioParameter::AirSpeed
            }]
        );
    }

    #[test]
    fn test_parse_requires_sentinels() {
        assert!(parse_command("netid=5").is_none());
        assert!(parse_command("-netid=5").is_none());
        assert!(parse_command("-").is_none());
        assert_eq!(parse_command("--"), Some(vec![]));
    }

    #[test]
    fn test_register_reply() {
        assert_eq!(parse_register_reply("ATS3?\r\n25\r\n"), "25");
        assert_eq!(parse_register_reply("64"), "64");
        assert_eq!(parse_register_reply("\r\n"), "");
    }

    #[test]
    fn test_parameter_registers() {
        assert_eq!(RadioParameter::NetId.register(), 3);
        assert_eq!(RadioParameter::SerialSpeed.register(), 1);
        assert_eq!(RadioParameter::AirSpeed.register(), 2);
        assert_eq!(RadioParameter::from_key("airspeed"), Some(RadioParameter::AirSpeed));
    }
}
