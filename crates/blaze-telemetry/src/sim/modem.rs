//! A SiK-style radio modem for simulated flights.
//!
//! In data mode every written byte goes to the downlink writer. `+++` switches to
//! command mode, where `ATSn?`, `ATSn=v`, `AT&W` and `ATZ` are answered the way
//! the real firmware answers them. `ATZ` reboots back into data mode.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Write};

use tracing::{debug, trace};

use crate::radio::SerialTransport;

/// S-register contents a freshly configured modem reports.
const FACTORY_REGISTERS: [(u8, u32); 3] = [(1, 57), (2, 64), (3, 25)];

/// Simulated modem writing downlink traffic to `W`.
#[derive(Debug)]
pub struct SimulatedModem<W> {
    downlink: W,
    registers: BTreeMap<u8, u32>,
    replies: VecDeque<u8>,
    line: String,
    command_mode: bool,
    reboots: usize,
}

impl<W: Write> SimulatedModem<W> {
    /// A modem with factory settings in data mode.
    pub fn new(downlink: W) -> Self {
        Self {
            downlink,
            registers: FACTORY_REGISTERS.into_iter().collect(),
            replies: VecDeque::new(),
            line: String::new(),
            command_mode: false,
            reboots: 0,
        }
    }

    /// Current value of an S-register.
    #[must_use]
    pub fn register(&self, register: u8) -> Option<u32> {
        self.registers.get(&register).copied()
    }

    /// Whether the modem is waiting for AT commands.
    #[must_use]
    pub fn in_command_mode(&self) -> bool {
        self.command_mode
    }

    /// How many times `ATZ` rebooted the modem.
    #[must_use]
    pub fn reboots(&self) -> usize {
        self.reboots
    }

    /// The downlink writer.
    pub fn downlink(&self) -> &W {
        &self.downlink
    }

    /// Give back the downlink writer.
    pub fn into_downlink(self) -> W {
        self.downlink
    }

    fn reply(&mut self, text: &str) {
        self.replies.extend(text.as_bytes());
    }

    fn handle_line(&mut self, line: &str) {
        trace!(line, "modem command");
        if line == "ATZ" {
            self.command_mode = false;
            self.reboots += 1;
            debug!("modem rebooted into data mode");
            return;
        }
        if line == "AT&W" {
            self.reply("OK\r\n");
            return;
        }

        let Some(rest) = line.strip_prefix("ATS") else {
            self.reply("ERROR\r\n");
            return;
        };
        if let Some((register, value)) = rest.split_once('=') {
            match (register.parse::<u8>(), value.parse::<u32>()) {
                (Ok(register), Ok(value)) => {
                    self.registers.insert(register, value);
                    self.reply("OK\r\n");
                }
                _ => self.reply("ERROR\r\n"),
            }
        } else if let Some(register) = rest.strip_suffix('?') {
            let value = register
                .parse::<u8>()
                .ok()
                .and_then(|r| self.register(r));
            let answer = value.map_or_else(|| "ERROR".to_string(), |v| v.to_string());
            self.reply(&format!("{line}\r\n{answer}\r\n"));
        } else {
            self.reply("ERROR\r\n");
        }
    }
}

impl<W: Write> SerialTransport for SimulatedModem<W> {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.command_mode {
            if bytes == b"+++" {
                self.command_mode = true;
                self.reply("OK\r\n");
                return Ok(());
            }
            return self.downlink.write_all(bytes);
        }

        for &byte in bytes {
            match byte {
                b'\r' => {}
                b'\n' => {
                    let line = std::mem::take(&mut self.line);
                    self.handle_line(line.trim());
                }
                _ => self.line.push(char::from(byte)),
            }
        }
        Ok(())
    }

    fn flush_bytes(&mut self) -> io::Result<()> {
        self.downlink.flush()
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.replies.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RadioConfig;
    use crate::radio::{RadioLink, RadioParameter};

    fn drain(modem: &mut SimulatedModem<Vec<u8>>) -> String {
        let mut text = String::new();
        while let Some(byte) = modem.read_byte().unwrap() {
            text.push(char::from(byte));
        }
        text
    }

    #[test]
    fn test_data_mode_passes_bytes_through() {
        let mut modem = SimulatedModem::new(Vec::new());
        modem.write_bytes(b"telemetry\r\n").unwrap();
        assert_eq!(modem.downlink(), b"telemetry\r\n");
        assert!(drain(&mut modem).is_empty());
    }

    #[test]
    fn test_command_mode_answers_queries() {
        let mut modem = SimulatedModem::new(Vec::new());
        modem.write_bytes(b"+++").unwrap();
        assert!(modem.in_command_mode());
        assert_eq!(drain(&mut modem), "OK\r\n");

        modem.write_bytes(b"ATS3?\r\n").unwrap();
        assert_eq!(drain(&mut modem), "ATS3?\r\n25\r\n");

        modem.write_bytes(b"ATS3=7\r\n").unwrap();
        assert_eq!(drain(&mut modem), "OK\r\n");
        assert_eq!(modem.register(3), Some(7));

        modem.write_bytes(b"ATS9?\r\nATX\r\n").unwrap();
        assert_eq!(drain(&mut modem), "ATS9?\r\nERROR\r\nERROR\r\n");

        // Nothing leaks to the downlink while configuring.
        assert!(modem.downlink().is_empty());
    }

    #[test]
    fn test_atz_returns_to_data_mode() {
        let mut modem = SimulatedModem::new(Vec::new());
        modem.write_bytes(b"+++").unwrap();
        modem.write_bytes(b"AT&W\r\nATZ\r\n").unwrap();
        assert!(!modem.in_command_mode());
        assert_eq!(modem.reboots(), 1);
        modem.write_bytes(b"+++").unwrap();
        assert!(modem.in_command_mode());
    }

    #[test]
    fn test_radio_link_configures_simulated_modem() {
        let mut link = RadioLink::new(
            SimulatedModem::new(Vec::new()),
            ManualClock::default(),
            RadioConfig::default(),
        )
        .unwrap();

        assert!(link.enter_at_mode().unwrap());
        assert!(link.set_setting(RadioParameter::NetId, 42).unwrap());
        assert_eq!(link.get_setting(RadioParameter::AirSpeed).unwrap(), "64");
        link.exit_at_mode().unwrap();

        assert_eq!(link.transport().register(3), Some(42));
        assert!(!link.transport().in_command_mode());
    }
}
