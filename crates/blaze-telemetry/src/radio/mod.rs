//! Serial radio link.
//!
//! [`RadioLink`] sits between a [`SerialTransport`] and the rest of the flight
//! computer. It owns the RX and TX rings, splits received bytes into CR LF
//! delimited frames, and runs the over-the-air control channel that lets the
//! ground station read and change modem settings through the modem's AT command
//! mode.

pub mod at;
pub mod ring;

use std::io::{self, Read, Write};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

pub use at::{ControlRequest, RadioParameter};
pub use ring::{RxProducer, RxRing, TxRing};

use crate::clock::Clock;
use crate::config::RadioConfig;
use crate::error::{Error, Result};

/// Guard sequence that switches the modem into AT command mode.
const AT_ESCAPE: &[u8] = b"+++";

/// The byte-level serial port under the radio modem.
pub trait SerialTransport {
    /// Write all of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Block until written bytes have left the port.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn flush_bytes(&mut self) -> io::Result<()>;

    /// Take one received byte if one is available, without blocking.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
}

/// A [`SerialTransport`] over a reader for received bytes and a writer for sent ones.
///
/// End of input and `WouldBlock` both read as "nothing available".
#[derive(Debug)]
pub struct StreamTransport<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> StreamTransport<R, W> {
    /// Combine a reader and a writer.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// The writer, e.g. to inspect captured downlink bytes.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Split back into reader and writer.
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W: Write> SerialTransport for StreamTransport<R, W> {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn flush_bytes(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A setting change requested over the control channel and whether the modem
/// confirmed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedSetting {
    /// Setting that was changed.
    pub parameter: RadioParameter,
    /// Requested value.
    pub value: u32,
    /// Whether reading the register back showed the new value.
    pub confirmed: bool,
}

/// Result of feeding text to the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlOutcome {
    /// No complete command yet; the text is kept for the next call.
    Pending,
    /// The modem would not enter AT mode. The command is kept and retried on
    /// the next call.
    AtModeUnavailable,
    /// A command was processed and the pending text cleared.
    Processed {
        /// Text sent back to the ground station, if any queries were answered.
        response: Option<String>,
        /// Setting changes attempted.
        applied: Vec<AppliedSetting>,
    },
}

/// Buffered radio link.
#[derive(Debug)]
pub struct RadioLink<T, C> {
    transport: T,
    clock: C,
    config: RadioConfig,
    rx: Arc<RxRing>,
    producer: RxProducer,
    tx: TxRing,
    pending: String,
}

impl<T: SerialTransport, C: Clock> RadioLink<T, C> {
    /// Create a link with rings sized from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if a ring is smaller than 2 slots or
    /// the largest payload would not fit the TX ring.
    pub fn new(transport: T, clock: C, config: RadioConfig) -> Result<Self> {
        if config.rx_capacity < 2 || config.tx_capacity < 2 {
            return Err(Error::config("radio ring capacities must be at least 2"));
        }
        if config.max_payload == 0 || config.max_payload >= config.tx_capacity {
            return Err(Error::config(format!(
                "max_payload {} must be between 1 and tx_capacity - 1 ({})",
                config.max_payload,
                config.tx_capacity - 1
            )));
        }
        let rx = Arc::new(RxRing::new(config.rx_capacity));
        Ok(Self {
            producer: RxProducer::new(Arc::clone(&rx)),
            tx: TxRing::new(config.tx_capacity),
            rx,
            transport,
            clock,
            config,
            pending: String::new(),
        })
    }

    /// A handle that a byte-arrival callback can push into.
    #[must_use]
    pub fn rx_handle(&self) -> RxProducer {
        self.producer.clone()
    }

    /// Byte-arrival hook. Returns false if the byte was dropped because RX is full.
    pub fn on_rx_byte(&self, byte: u8) -> bool {
        let stored = self.producer.push(byte);
        if !stored {
            trace!(byte, "rx ring full, byte dropped");
        }
        stored
    }

    /// Bytes waiting in the RX ring.
    #[must_use]
    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    /// Move up to `buf.len()` bytes out of the RX ring.
    pub fn read_from_rx(&self, buf: &mut [u8]) -> usize {
        self.rx.read_into(buf)
    }

    /// Length of the first complete CR LF frame in RX, or 0.
    #[must_use]
    pub fn first_frame_length(&self) -> usize {
        self.rx.first_frame_length()
    }

    /// Take the first complete CR LF frame out of RX, delimiter included.
    pub fn read_frame(&self) -> Option<Vec<u8>> {
        let len = self.first_frame_length();
        if len == 0 {
            return None;
        }
        let mut frame = vec![0; len];
        let n = self.rx.read_into(&mut frame);
        frame.truncate(n);
        Some(frame)
    }

    /// Empty RX if it is full and holds no CR LF.
    ///
    /// Such a ring can never yield a frame and would drop every later byte.
    /// Returns how many bytes were discarded.
    pub fn discard_unterminated_rx(&self) -> usize {
        if !self.rx.is_full() || self.first_frame_length() != 0 {
            return 0;
        }
        let mut stale = vec![0; self.rx.len()];
        let n = self.rx.read_into(&mut stale);
        debug!(
            discarded = n,
            text = %String::from_utf8_lossy(&stale[..n]),
            "rx ring full without a line break, discarded"
        );
        n
    }

    /// Move every byte the transport has ready into the RX ring.
    ///
    /// For targets without a byte-arrival interrupt. Returns how many bytes were
    /// read; bytes arriving while RX is full are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if reading fails.
    pub fn poll_transport(&mut self) -> Result<usize> {
        let mut count = 0;
        while let Some(byte) = self.transport.read_byte().map_err(Error::Transport)? {
            self.on_rx_byte(byte);
            count += 1;
        }
        Ok(count)
    }

    /// Queue `bytes` for transmission, flushing first if TX lacks room.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] for payloads above the configured
    /// maximum, or [`Error::Transport`] if the automatic flush fails.
    pub fn write_to_tx(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.config.max_payload {
            return Err(Error::PayloadTooLarge {
                len: bytes.len(),
                max: self.config.max_payload,
            });
        }
        if bytes.len() > self.tx.free() {
            self.flush_tx()?;
        }
        self.tx.extend(bytes);
        Ok(())
    }

    /// Bytes waiting in the TX ring.
    #[must_use]
    pub fn tx_usage(&self) -> usize {
        self.tx.len()
    }

    /// Send everything in TX and flush the transport.
    ///
    /// TX is empty afterwards even if the write failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if writing or flushing fails.
    pub fn flush_tx(&mut self) -> Result<()> {
        let (first, second) = self.tx.as_slices();
        let sent = first.len() + second.len();
        let outcome = self
            .transport
            .write_bytes(first)
            .and_then(|()| self.transport.write_bytes(second))
            .and_then(|()| self.transport.flush_bytes());
        self.tx.clear();

        outcome.map_err(|e| {
            warn!(bytes = sent, error = %e, "radio transmit failed");
            Error::Transport(e)
        })
    }

    /// Read up to `buf.len()` bytes straight from the transport, polling until
    /// the buffer is full or `timeout_ms` has passed on the link's clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if reading fails.
    pub fn recv(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let started = self.clock.now_ms();
        let mut count = 0;
        while count < buf.len() && self.clock.now_ms().saturating_sub(started) < timeout_ms {
            match self.transport.read_byte().map_err(Error::Transport)? {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => self.clock.sleep_ms(1),
            }
        }
        Ok(count)
    }

    /// Read whatever the transport has ready, up to `buf.len()` bytes, without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if reading fails.
    pub fn recv_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut count = 0;
        while count < buf.len() {
            match self.transport.read_byte().map_err(Error::Transport)? {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.transport
            .write_bytes(line.as_bytes())
            .and_then(|()| self.transport.write_bytes(b"\r\n"))
            .and_then(|()| self.transport.flush_bytes())
            .map_err(Error::Transport)
    }

    fn recv_text(&mut self, timeout_ms: u64) -> Result<String> {
        let mut reply = [0u8; 15];
        let n = self.recv(&mut reply, timeout_ms)?;
        Ok(String::from_utf8_lossy(&reply[..n]).into_owned())
    }

    /// Drop replies left over from earlier commands, e.g. the `OK` after a write.
    fn discard_input(&mut self) -> Result<()> {
        let mut scratch = [0u8; 32];
        while self.recv_available(&mut scratch)? > 0 {}
        Ok(())
    }

    /// Switch the modem into AT command mode.
    ///
    /// Waits out the guard silence, sends the escape sequence, waits again and
    /// then expects an `OK` reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn enter_at_mode(&mut self) -> Result<bool> {
        self.clock.sleep_ms(self.config.at_guard_silence_ms);
        self.transport
            .write_bytes(AT_ESCAPE)
            .and_then(|()| self.transport.flush_bytes())
            .map_err(Error::Transport)?;
        self.clock.sleep_ms(self.config.at_guard_silence_ms);

        let reply = self.recv_text(self.config.at_reply_timeout_ms)?;
        let entered = reply.contains("OK");
        debug!(entered, reply = reply.trim(), "AT escape sent");
        Ok(entered)
    }

    /// Save settings and reboot the modem back into data mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn exit_at_mode(&mut self) -> Result<()> {
        self.send_line("AT&W")?;
        self.send_line("ATZ")
    }

    /// Write an S-register and read it back.
    ///
    /// Returns whether the register reads back as the new value. The modem
    /// must already be in AT mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn change_parameter(&mut self, register: u8, value: &str) -> Result<bool> {
        self.send_line(&format!("ATS{register}={value}"))?;
        self.clock.sleep_ms(self.config.param_settle_ms);
        Ok(self.get_parameter(register)? == value)
    }

    /// Read an S-register. The modem must already be in AT mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn get_parameter(&mut self, register: u8) -> Result<String> {
        self.discard_input()?;
        self.send_line(&format!("ATS{register}?"))?;
        let reply = self.recv_text(self.config.query_timeout_ms)?;
        Ok(at::parse_register_reply(&reply))
    }

    /// Change a named setting, confirming by read-back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn set_setting(&mut self, parameter: RadioParameter, value: u32) -> Result<bool> {
        self.change_parameter(parameter.register(), &value.to_string())
    }

    /// Read a named setting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn get_setting(&mut self, parameter: RadioParameter) -> Result<String> {
        self.get_parameter(parameter.register())
    }

    /// Set the network id (S3).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn change_net_id(&mut self, id: u32) -> Result<bool> {
        self.set_setting(RadioParameter::NetId, id)
    }

    /// Set the serial speed (S1).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn change_serial_speed(&mut self, speed: u32) -> Result<bool> {
        self.set_setting(RadioParameter::SerialSpeed, speed)
    }

    /// Set the air data rate (S2).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn change_air_speed(&mut self, speed: u32) -> Result<bool> {
        self.set_setting(RadioParameter::AirSpeed, speed)
    }

    /// Read the network id (S3).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn net_id(&mut self) -> Result<String> {
        self.get_setting(RadioParameter::NetId)
    }

    /// Read the serial speed (S1).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn serial_speed(&mut self) -> Result<String> {
        self.get_setting(RadioParameter::SerialSpeed)
    }

    /// Read the air data rate (S2).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure.
    pub fn air_speed(&mut self) -> Result<String> {
        self.get_setting(RadioParameter::AirSpeed)
    }

    /// Text received on the control channel that has not formed a complete
    /// command yet.
    #[must_use]
    pub fn pending_control(&self) -> &str {
        &self.pending
    }

    /// Whether the pending text already holds a complete command, e.g. one kept
    /// after the modem refused AT mode.
    #[must_use]
    pub fn has_pending_command(&self) -> bool {
        at::find_command(
            &self.pending,
            &self.config.control_start_token,
            &self.config.control_end_token,
        )
        .is_some()
    }

    /// Feed received text to the control channel.
    ///
    /// Text accumulates until a start token and a later end token are both
    /// present. At most `control_buffer_capacity` bytes are kept, oldest dropped
    /// first, and text that cannot be part of a start token is discarded. The enclosed command is then applied in AT mode, the modem is
    /// returned to data mode, and after the settle delay any query answers are
    /// sent back as `\n`-separated `key=value` lines. The pending text is cleared
    /// once a command has been processed, including malformed ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on I/O failure. The pending text is kept.
    pub fn handle_control_text(&mut self, text: &str) -> Result<ControlOutcome> {
        self.pending.push_str(text);
        let dropped = drop_front(&mut self.pending, self.config.control_buffer_capacity);
        if dropped > 0 {
            debug!(dropped, "control buffer full, oldest text dropped");
        }

        let Some(span) = at::find_command(
            &self.pending,
            &self.config.control_start_token,
            &self.config.control_end_token,
        ) else {
            let start = &self.config.control_start_token;
            if !self.pending.contains(start.as_str()) {
                // Keep a tail that may be the first half of a split start token.
                drop_front(&mut self.pending, start.len().saturating_sub(1));
            }
            return Ok(ControlOutcome::Pending);
        };

        if !self.enter_at_mode()? {
            warn!("modem did not acknowledge AT escape, command kept for retry");
            return Ok(ControlOutcome::AtModeUnavailable);
        }

        let body = self.pending[span.body].to_string();
        let mut response = String::from("\n");
        let mut applied = Vec::new();

        match at::parse_command(&body) {
            Some(requests) => {
                for request in requests {
                    match request {
                        ControlRequest::Set { parameter, value } => {
                            let confirmed = self.set_setting(parameter, value)?;
                            info!(%parameter, value, confirmed, "radio setting changed");
                            applied.push(AppliedSetting {
                                parameter,
                                value,
                                confirmed,
                            });
                        }
                        ControlRequest::Query { parameter } => {
                            let current = self.get_setting(parameter)?;
                            debug!(%parameter, current = %current, "radio setting queried");
                            response.push_str(&format!("{parameter}={current}\n"));
                        }
                    }
                }
            }
            None => debug!(body = %body, "control command missing '-' sentinels, ignored"),
        }

        self.exit_at_mode()?;
        self.clock.sleep_ms(self.config.response_settle_ms);

        let response = if response.len() > 1 {
            self.transport
                .write_bytes(response.as_bytes())
                .and_then(|()| self.transport.flush_bytes())
                .map_err(Error::Transport)?;
            Some(response)
        } else {
            None
        };

        self.pending.clear();
        Ok(ControlOutcome::Processed { response, applied })
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Drop bytes from the front of `text` until at most `keep` remain, moving
/// forward to a char boundary. Returns how many bytes were dropped.
fn drop_front(text: &mut String, keep: usize) -> usize {
    let mut cut = text.len().saturating_sub(keep);
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text.drain(..cut);
    cut
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::io::Cursor;

    use super::*;
    use crate::clock::ManualClock;
    use crate::packet::FRAME_LEN;

    /// Scripted modem: answers `+++` and `ATSn=` / `ATSn?` the way the radio does.
    #[derive(Debug, Default)]
    struct FakeModem {
        registers: HashMap<u8, String>,
        incoming: VecDeque<u8>,
        sent: Vec<u8>,
        line: String,
        refuse_at: bool,
        ignore_writes: bool,
    }

    impl FakeModem {
        fn new() -> Self {
            let mut modem = Self::default();
            modem.registers.insert(1, "57".into());
            modem.registers.insert(2, "64".into());
            modem.registers.insert(3, "25".into());
            modem
        }

        fn reply(&mut self, text: &str) {
            self.incoming.extend(text.as_bytes());
        }

        fn sent_text(&self) -> String {
            String::from_utf8_lossy(&self.sent).into_owned()
        }

        fn handle_line(&mut self, line: &str) {
            let Some(rest) = line.strip_prefix("ATS") else {
                return;
            };
            if let Some((reg, value)) = rest.split_once('=') {
                if !self.ignore_writes {
                    self.registers.insert(reg.parse::<u8>().unwrap(), value.to_string());
                }
                self.reply("OK\r\n");
            } else if let Some(reg) = rest.strip_suffix('?') {
                let value = self
                    .registers
                    .get(&reg.parse::<u8>().unwrap())
                    .cloned()
                    .unwrap_or_default();
                self.reply(&format!("{line}\r\n{value}\r\n"));
            }
        }
    }

    impl SerialTransport for FakeModem {
        fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.sent.extend_from_slice(bytes);
            if bytes == AT_ESCAPE {
                if !self.refuse_at {
                    self.reply("OK\r\n");
                }
                return Ok(());
            }
            for &byte in bytes {
                match byte {
                    b'\r' => {}
                    b'\n' => {
                        let line = std::mem::take(&mut self.line);
                        self.handle_line(&line);
                    }
                    _ => self.line.push(byte as char),
                }
            }
            Ok(())
        }

        fn flush_bytes(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn read_byte(&mut self) -> io::Result<Option<u8>> {
            Ok(self.incoming.pop_front())
        }
    }

    fn link(modem: FakeModem) -> (RadioLink<FakeModem, ManualClock>, ManualClock) {
        let clock = ManualClock::default();
        let link = RadioLink::new(modem, clock.clone(), RadioConfig::default()).unwrap();
        (link, clock)
    }

    fn capture_link(
        config: RadioConfig,
    ) -> RadioLink<StreamTransport<Cursor<Vec<u8>>, Vec<u8>>, ManualClock> {
        let transport = StreamTransport::new(Cursor::new(Vec::new()), Vec::new());
        RadioLink::new(transport, ManualClock::default(), config).unwrap()
    }

    #[test]
    fn test_rx_frames_are_split_on_crlf() {
        let (link, _) = link(FakeModem::new());
        for &byte in b"one\r\ntwo\r\nthr" {
            assert!(link.on_rx_byte(byte));
        }
        assert_eq!(link.read_frame().unwrap(), b"one\r\n");
        assert_eq!(link.read_frame().unwrap(), b"two\r\n");
        assert!(link.read_frame().is_none());
        assert_eq!(link.rx_len(), 3);
    }

    #[test]
    fn test_rx_handle_feeds_same_ring() {
        let (link, _) = link(FakeModem::new());
        let handle = link.rx_handle();
        handle.push(b'x');
        let mut buf = [0u8; 4];
        assert_eq!(link.read_from_rx(&mut buf), 1);
        assert_eq!(buf[0], b'x');
    }

    #[test]
    fn test_rx_full_drops_bytes() {
        let config = RadioConfig {
            rx_capacity: 4,
            ..RadioConfig::default()
        };
        let link = RadioLink::new(FakeModem::new(), ManualClock::default(), config).unwrap();
        assert!(link.on_rx_byte(1));
        assert!(link.on_rx_byte(2));
        assert!(link.on_rx_byte(3));
        assert!(!link.on_rx_byte(4));
        assert_eq!(link.rx_len(), 3);
    }

    #[test]
    fn test_full_rx_without_line_break_is_discarded() {
        let config = RadioConfig {
            rx_capacity: 8,
            ..RadioConfig::default()
        };
        let link = RadioLink::new(FakeModem::new(), ManualClock::default(), config).unwrap();
        for byte in 0..10u8 {
            link.on_rx_byte(byte);
        }
        assert!(link.read_frame().is_none());
        assert_eq!(link.rx_len(), 7);

        assert_eq!(link.discard_unterminated_rx(), 7);
        assert_eq!(link.rx_len(), 0);
        for &byte in b"ok
" {
            assert!(link.on_rx_byte(byte));
        }
        assert_eq!(link.read_frame().unwrap(), b"ok\r\n");
    }

    #[test]
    fn test_partial_line_is_kept_until_ring_fills() {
        let (link, _) = link(FakeModem::new());
        for &byte in b"half a li" {
            link.on_rx_byte(byte);
        }
        assert_eq!(link.discard_unterminated_rx(), 0);
        assert_eq!(link.rx_len(), 9);
    }

    #[test]
    fn test_poll_transport_fills_rx() {
        let mut modem = FakeModem::new();
        modem.reply("ping\r\n");
        let (mut link, _) = link(modem);
        assert_eq!(link.poll_transport().unwrap(), 6);
        assert_eq!(link.first_frame_length(), 6);
    }

    #[test]
    fn test_tx_rejects_oversized_payload() {
        let mut link = capture_link(RadioConfig::default());
        let err = link.write_to_tx(&[0u8; 33]).unwrap_err();
        assert!(err.is_capacity_error());
        assert_eq!(link.tx_usage(), 0);
    }

    #[test]
    fn test_tx_auto_flushes_when_full() {
        let config = RadioConfig {
            tx_capacity: 70,
            ..RadioConfig::default()
        };
        let mut link = capture_link(config);
        let frame = [0x55u8; FRAME_LEN];

        link.write_to_tx(&frame).unwrap();
        link.write_to_tx(&frame).unwrap();
        assert!(link.transport().writer().is_empty());
        assert_eq!(link.tx_usage(), 64);

        // Third frame does not fit in 69 usable bytes: the first two go out.
        link.write_to_tx(&frame).unwrap();
        assert_eq!(link.transport().writer().len(), 64);
        assert_eq!(link.tx_usage(), 32);

        link.flush_tx().unwrap();
        assert_eq!(link.transport().writer().len(), 96);
        assert_eq!(link.tx_usage(), 0);
    }

    #[test]
    fn test_max_payload_must_fit_ring() {
        let config = RadioConfig {
            tx_capacity: 32,
            max_payload: 32,
            ..RadioConfig::default()
        };
        assert!(RadioLink::new(FakeModem::new(), ManualClock::default(), config).is_err());
    }

    #[test]
    fn test_recv_times_out_on_clock() {
        let mut modem = FakeModem::new();
        modem.reply("ab");
        let (mut link, clock) = link(modem);
        let mut buf = [0u8; 8];
        let start = clock.now_ms();
        assert_eq!(link.recv(&mut buf, 50).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
        assert!(clock.now_ms() - start >= 50);
    }

    #[test]
    fn test_recv_available_does_not_wait() {
        let mut modem = FakeModem::new();
        modem.reply("xyz");
        let (mut link, clock) = link(modem);
        let mut buf = [0u8; 2];
        assert_eq!(link.recv_available(&mut buf).unwrap(), 2);
        assert_eq!(link.recv_available(&mut buf).unwrap(), 1);
        assert_eq!(link.recv_available(&mut buf).unwrap(), 0);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn test_at_primitives() {
        let (mut link, _) = link(FakeModem::new());
        assert!(link.enter_at_mode().unwrap());
        assert_eq!(link.net_id().unwrap(), "25");
        assert!(link.change_air_speed(128).unwrap());
        assert_eq!(link.air_speed().unwrap(), "128");
        link.exit_at_mode().unwrap();

        let sent = link.transport().sent_text();
        assert!(sent.starts_with("+++"));
        assert!(sent.contains("ATS2=128\r\n"));
        assert!(sent.ends_with("AT&W\r\nATZ\r\n"));
    }

    #[test]
    fn test_change_parameter_detects_rejected_write() {
        let mut modem = FakeModem::new();
        modem.ignore_writes = true;
        let (mut link, _) = link(modem);
        assert!(!link.change_net_id(7).unwrap());
    }

    #[test]
    fn test_control_command_split_across_reads() {
        let (mut link, clock) = link(FakeModem::new());

        assert_eq!(
            link.handle_control_text("rocket-netid=4").unwrap(),
            ControlOutcome::Pending
        );
        assert_eq!(link.pending_control(), "rocket-netid=4");

        let outcome = link.handle_control_text("2&airspeed?-end").unwrap();
        let ControlOutcome::Processed { response, applied } = outcome else {
            panic!("expected processed, got {outcome:?}");
        };
        assert_eq!(
            applied,
            vec![AppliedSetting {
                parameter: RadioParameter::NetId,
                value: 42,
                confirmed: true,
            }]
        );
        assert_eq!(response.as_deref(), Some("\nairspeed=64\n"));
        assert!(link.pending_control().is_empty());
        assert!(link.transport().sent_text().ends_with("\nairspeed=64\n"));
        assert!(clock.now_ms() >= RadioConfig::default().response_settle_ms);
    }

    #[test]
    fn test_control_set_only_sends_no_response() {
        let (mut link, _) = link(FakeModem::new());
        let outcome = link.handle_control_text("rocket-serialspeed=115-end").unwrap();
        let ControlOutcome::Processed { response, applied } = outcome else {
            panic!("expected processed");
        };
        assert!(response.is_none());
        assert_eq!(applied.len(), 1);
        assert!(link.transport().sent_text().ends_with("AT&W\r\nATZ\r\n"));
    }

    #[test]
    fn test_control_without_at_mode_keeps_text() {
        let mut modem = FakeModem::new();
        modem.refuse_at = true;
        let (mut link, _) = link(modem);

        let outcome = link.handle_control_text("rocket-netid?-end").unwrap();
        assert_eq!(outcome, ControlOutcome::AtModeUnavailable);
        assert_eq!(link.pending_control(), "rocket-netid?-end");

        link.transport_mut().refuse_at = false;
        let outcome = link.handle_control_text("").unwrap();
        assert!(matches!(outcome, ControlOutcome::Processed { .. }));
    }

    #[test]
    fn test_control_noise_does_not_accumulate() {
        let (mut link, _) = link(FakeModem::new());
        for _ in 0..1000 {
            let outcome = link.handle_control_text("noise line without tokens\r\n").unwrap();
            assert_eq!(outcome, ControlOutcome::Pending);
        }
        assert_eq!(link.pending_control(), "ens\r\n");
    }

    #[test]
    fn test_control_start_token_split_across_reads() {
        let (mut link, _) = link(FakeModem::new());
        link.handle_control_text("noise roc").unwrap();
        assert_eq!(link.pending_control(), "e roc");

        let outcome = link.handle_control_text("ket-netid?-end").unwrap();
        let ControlOutcome::Processed { response, .. } = outcome else {
            panic!("expected processed, got {outcome:?}");
        };
        assert_eq!(response.as_deref(), Some("\nnetid=25\n"));
    }

    #[test]
    fn test_control_buffer_is_bounded() {
        let config = RadioConfig {
            control_buffer_capacity: 32,
            ..RadioConfig::default()
        };
        let mut link = RadioLink::new(FakeModem::new(), ManualClock::default(), config).unwrap();

        link.handle_control_text("rocket-netid?").unwrap();
        for _ in 0..50 {
            link.handle_control_text("&airspeed?").unwrap();
            assert!(link.pending_control().len() <= 32);
        }
        // The start token was pushed out, so the end token alone does nothing.
        assert_eq!(link.handle_control_text("-end").unwrap(), ControlOutcome::Pending);

        let outcome = link.handle_control_text("rocket-netid?-end").unwrap();
        assert!(matches!(outcome, ControlOutcome::Processed { .. }));
        assert!(link.pending_control().is_empty());
    }

    #[test]
    fn test_has_pending_command() {
        let mut modem = FakeModem::new();
        modem.refuse_at = true;
        let (mut link, _) = link(modem);
        link.handle_control_text("rocket-netid?").unwrap();
        assert!(!link.has_pending_command());
        link.handle_control_text("-end").unwrap();
        assert!(link.has_pending_command());
    }

    #[test]
    fn test_malformed_command_is_discarded() {
        let (mut link, _) = link(FakeModem::new());
        let outcome = link.handle_control_text("rocket netid?end").unwrap();
        assert_eq!(
            outcome,
            ControlOutcome::Processed {
                response: None,
                applied: vec![],
            }
        );
        assert!(link.pending_control().is_empty());
    }
}
