//! Galil DMC command protocol implementation
//!
//! This module implements the low-level ASCII command protocol spoken by Galil
//! DMC motion controllers over Ethernet.
//!
//! # Protocol Overview
//!
//! Commands are two-letter mnemonics followed by comma-separated arguments, one
//! field per axis in A,B,C,D,E order (e.g. `PR 1000,0,0,0,0`). Empty fields leave
//! an axis untouched (`KS ,,,25,25`). A `?` in a field turns the command into a
//! query (`PA ?,?,?,?,?`). Each command is terminated with a carriage return.
//!
//! ## Response Format
//!
//! The controller answers every command with any response text followed by a
//! single terminator byte:
//!
//! ```text
//!  1000, 0, 0, 0, 0\r\n:
//! ```
//!
//! `:` means the command was accepted. `?` means it was rejected; the reason is
//! then available from `TC1`, which answers `<code> <message>`:
//!
//! ```text
//! 57 Bad data\r\n:
//! ```
//!
//! ## Compound Commands
//!
//! The controller accepts `;`-separated statements on one line but answers each
//! statement with its own terminator. [`DmcDevice::command`] splits compound
//! commands and sends the statements one at a time so each terminator is read
//! back before the next statement goes out.
//!
//! # Transport
//!
//! TCP port 23 (the controller's command port). Reads and writes time out
//! after 7 seconds by default.
//!
//! A statement that times out may still be answered later. The device counts
//! unanswered statements and reads their late replies off the socket before
//! the next statement goes out, so each reply stays paired with its statement.
//!
//! # Example
//!
//! ```no_run
//! use rig_hardware::galil::{DmcDevice, DmcLink};
//!
//! let mut device = DmcDevice::connect_default_port("192.168.42.10")?;
//!
//! let response = device.command("PA ?,?,?,?,?")?;
//! let steps = DmcDevice::parse_fields(&response)?;
//! println!("Position: {steps:?}");
//!
//! device.command("SH")?;
//! # Ok::<(), rig_hardware::galil::DmcError>(())
//! ```

use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

/// Default TCP command port for Galil controllers.
pub const DEFAULT_PORT: u16 = 23;

/// Default address of the gantry's DMC controller on the lab network.
pub const DEFAULT_GANTRY_IP: &str = "192.168.42.10";

/// Default timeout for socket reads and writes.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(7);

/// Errors that can occur during DMC communication.
#[derive(Error, Debug)]
pub enum DmcError {
    /// Low-level I/O error (socket read/write failure).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to establish the TCP connection to the controller.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No response received within the timeout period.
    #[error("Timeout waiting for response")]
    Timeout,

    /// Motion did not report complete before the wall-clock limit.
    #[error("Motion did not complete within {0:?}")]
    MotionTimeout(Duration),

    /// Response from the controller doesn't match the expected format.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Controller rejected a command with `?`.
    ///
    /// The code and message come from the `TC1` query that follows the
    /// rejection. Common codes:
    /// - 1: Unrecognized command
    /// - 6: Number out of range
    /// - 7: Command not valid while running
    /// - 22: Begin not possible due to limit switch
    /// - 57: Bad data
    #[error("Controller rejected {command:?}: {code}")]
    ControllerError {
        /// The statement that was rejected
        command: String,
        /// Reason reported by `TC1`
        code: ControllerErrorCode,
    },

    /// Failed to parse response values.
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type for DMC operations.
pub type DmcResult<T> = Result<T, DmcError>;

/// Error code and message reported by the controller's `TC1` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerErrorCode {
    /// Galil error number, 0 when no error is pending
    pub code: i32,
    /// Controller's description of the error
    pub message: String,
}

impl ControllerErrorCode {
    /// Parse a `TC1` response such as `57 Bad data`.
    ///
    /// # Example
    ///
    /// ```
    /// use rig_hardware::galil::ControllerErrorCode;
    ///
    /// let code = ControllerErrorCode::parse("22 Begin not possible due to Limit Switch\r\n").unwrap();
    /// assert_eq!(code.code, 22);
    /// assert_eq!(code.message, "Begin not possible due to Limit Switch");
    /// ```
    pub fn parse(response: &str) -> DmcResult<Self> {
        let text = response.trim();
        let (number, message) = match text.split_once(char::is_whitespace) {
            Some((number, message)) => (number, message.trim()),
            None => (text, ""),
        };
        let code = number
            .parse()
            .map_err(|_| DmcError::InvalidResponse(format!("Invalid error code: {text}")))?;
        Ok(Self {
            code,
            message: message.to_string(),
        })
    }

    /// True when the controller reports no pending error.
    pub fn is_clear(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for ControllerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "error {}", self.code)
        } else {
            write!(f, "error {} ({})", self.code, self.message)
        }
    }
}

/// Command channel to a DMC controller.
///
/// Abstracts the transport so the gantry logic can run against the real TCP
/// connection or the in-memory [`MockDmc`](super::mock::MockDmc).
pub trait DmcLink {
    /// Send one command and return its response text with the terminator stripped.
    ///
    /// A rejected command must surface as [`DmcError::ControllerError`].
    fn command(&mut self, command: &str) -> DmcResult<String>;

    /// Query the reason for the most recent rejected command (`TC1`).
    fn tell_error(&mut self) -> DmcResult<ControllerErrorCode> {
        let response = self.command("TC1")?;
        ControllerErrorCode::parse(&response)
    }
}

/// Low-level DMC device communicating over TCP/IP.
///
/// Handles the message framing of the Galil command port:
///
/// - Connection management via [`connect`](Self::connect)
/// - Raw statement sending via [`send`](Self::send)
/// - Terminator-aware response reading via [`read`](Self::read)
/// - Error checking through [`DmcLink::command`]
/// - Response parsing utilities for comma-separated numeric fields
///
/// For gantry motion with unit conversion and position tracking, use
/// [`GantryController`](crate::gantry::GantryController) instead.
///
/// The socket is shut down when the device is dropped.
pub struct DmcDevice {
    stream: TcpStream,
    /// Statements whose reply never arrived within the timeout
    unanswered: usize,
}

impl DmcDevice {
    /// Connect to a DMC controller at the given address.
    ///
    /// # Errors
    ///
    /// Returns [`DmcError::ConnectionFailed`] if the TCP connection cannot be established.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> DmcResult<Self> {
        let stream = TcpStream::connect(&addr)
            .map_err(|e| DmcError::ConnectionFailed(format!("Failed to connect: {e}")))?;

        stream.set_read_timeout(Some(DEFAULT_SOCKET_TIMEOUT))?;
        stream.set_write_timeout(Some(DEFAULT_SOCKET_TIMEOUT))?;
        stream.set_nodelay(true)?;

        debug!("Connected to DMC controller via TCP");

        Ok(Self {
            stream,
            unanswered: 0,
        })
    }

    /// Connect to a DMC controller at the given IP using the default port (23).
    pub fn connect_default_port(ip: &str) -> DmcResult<Self> {
        Self::connect(format!("{ip}:{DEFAULT_PORT}"))
    }

    /// Set the timeout for socket read/write operations.
    pub fn set_timeout(&mut self, timeout: Duration) -> DmcResult<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    /// Send a single raw statement, appending the carriage return.
    ///
    /// Does not read the response. Use [`read`](Self::read) afterwards, or
    /// [`DmcLink::command`] to do both with error checking.
    pub fn send(&mut self, statement: &str) -> DmcResult<()> {
        let mut msg = statement.trim_end_matches(['\r', '\n']).to_string();
        msg.push('\r');

        debug!("DMC send: {:?}", msg.trim());
        self.stream.write_all(msg.as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read one response up to and including its terminator.
    ///
    /// Returns the response text (terminator removed) and whether the
    /// controller accepted the statement (`:`) or rejected it (`?`).
    ///
    /// # Errors
    ///
    /// Returns [`DmcError::Timeout`] if no terminator arrives within the
    /// configured timeout.
    pub fn read(&mut self) -> DmcResult<(String, bool)> {
        let mut buf = [0u8; 1];
        let mut bytes = Vec::new();

        let accepted = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(DmcError::Timeout),
                Ok(_) => match buf[0] {
                    b':' => break true,
                    b'?' => break false,
                    byte => bytes.push(byte),
                },
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(DmcError::Timeout);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Err(DmcError::Timeout);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let response: String = bytes.iter().map(|&b| b as char).collect();
        trace!("DMC recv: {:?} accepted={}", response, accepted);
        Ok((response.trim_end().to_string(), accepted))
    }

    /// Read and discard the late replies of statements that timed out.
    ///
    /// Fails with [`DmcError::Timeout`] while a reply is still outstanding;
    /// the count is kept so the next statement tries again.
    fn discard_late_replies(&mut self) -> DmcResult<()> {
        while self.unanswered > 0 {
            let (stale, accepted) = self.read()?;
            warn!("Discarding late DMC reply {:?} (accepted={})", stale, accepted);
            self.unanswered -= 1;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &str) -> DmcResult<String> {
        self.discard_late_replies()?;
        self.send(statement)?;
        let (response, accepted) = match self.read() {
            Err(DmcError::Timeout) => {
                self.unanswered += 1;
                return Err(DmcError::Timeout);
            }
            other => other?,
        };
        if accepted {
            return Ok(response);
        }

        let code = self.tell_error()?;
        Err(DmcError::ControllerError {
            command: statement.to_string(),
            code,
        })
    }

    /// Parse a comma-separated numeric response such as ` 1000, 0, 0, 0, 0`.
    ///
    /// # Example
    ///
    /// ```
    /// use rig_hardware::galil::DmcDevice;
    ///
    /// let fields = DmcDevice::parse_fields(" 1000, -25, 0, 3.5, 0\r\n").unwrap();
    /// assert_eq!(fields, vec![1000.0, -25.0, 0.0, 3.5, 0.0]);
    /// ```
    pub fn parse_fields(response: &str) -> DmcResult<Vec<f64>> {
        response
            .trim()
            .split(',')
            .map(|field| {
                let field = field.trim();
                field
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| DmcError::ParseError(format!("Invalid number: {field:?}")))
            })
            .collect()
    }

    /// Parse a single numeric response such as the output of `MG _BGA`.
    ///
    /// # Example
    ///
    /// ```
    /// use rig_hardware::galil::DmcDevice;
    ///
    /// assert_eq!(DmcDevice::parse_value(" 1.0000\r\n").unwrap(), 1.0);
    /// ```
    pub fn parse_value(response: &str) -> DmcResult<f64> {
        match Self::parse_fields(response)?.as_slice() {
            [value] => Ok(*value),
            other => Err(DmcError::ParseError(format!(
                "Expected one value, got {}",
                other.len()
            ))),
        }
    }
}

impl DmcLink for DmcDevice {
    fn command(&mut self, command: &str) -> DmcResult<String> {
        let mut responses = Vec::new();
        for statement in command.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let response = self.statement(statement)?;
            if !response.is_empty() {
                responses.push(response);
            }
        }
        Ok(responses.join("\n"))
    }
}

impl Drop for DmcDevice {
    fn drop(&mut self) {
        debug!("Closing DMC connection");
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
