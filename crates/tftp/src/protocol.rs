//! TFTP wire protocol
//!
//! Message codec for the five RFC 1350 packet types. Each UDP datagram
//! carries exactly one message: a 2-byte big-endian opcode followed by an
//! opcode-specific body. [`decode`] is total: malformed input decodes to
//! an illegal-operation [`Packet::Error`] rather than failing.

use std::fmt;

/// Fixed diagnostic carried by the decoder's illegal-operation fallback.
const ILLEGAL_OPERATION_MESSAGE: &str = "Illegal operation type";

/// TFTP opcodes as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Read Request (RRQ) - client asks to read a file from the server.
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    ReadRequest = 1,

    /// Write Request (WRQ) - client asks to write a file to the server.
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    WriteRequest = 2,

    /// Data packet carrying one block of file content. The final block of
    /// a transfer is shorter than the block size (possibly empty).
    ///
    /// Packet format: | Opcode | Block# | Data |
    Data = 3,

    /// Acknowledgment of a data block. Block 0 acknowledges a write
    /// request itself.
    ///
    /// Packet format: | Opcode | Block# |
    Acknowledgment = 4,

    /// Error report. Terminates the transfer it arrives on.
    ///
    /// Packet format: | Opcode | ErrorCode | ErrMsg | 0 |
    Error = 5,
}

impl Opcode {
    /// Convert a u16 wire value to an opcode.
    ///
    /// # Examples
    /// ```
    /// use tftp::Opcode;
    ///
    /// assert_eq!(Opcode::from_u16(1), Some(Opcode::ReadRequest));
    /// assert_eq!(Opcode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert the opcode to its u16 wire representation.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Conventional short name of the opcode.
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::WriteRequest => "WRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
        }
    }
}

impl From<Opcode> for u16 {
    fn from(opcode: Opcode) -> Self {
        opcode.as_u16()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP error codes from the RFC 1350 appendix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Error code 0: not defined, see error message for details.
    Undefined = 0,

    /// Error code 1: file not found.
    FileNotFound = 1,

    /// Error code 2: access violation.
    AccessViolation = 2,

    /// Error code 3: disk full or allocation exceeded.
    DiskFull = 3,

    /// Error code 4: illegal TFTP operation.
    IllegalOperation = 4,

    /// Error code 5: unknown transfer ID.
    UnknownTransferId = 5,

    /// Error code 6: file already exists.
    FileAlreadyExists = 6,

    /// Error code 7: no such user.
    NoSuchUser = 7,
}

impl ErrorCode {
    /// Convert a u16 wire value to an error code.
    ///
    /// # Examples
    /// ```
    /// use tftp::ErrorCode;
    ///
    /// assert_eq!(ErrorCode::from_u16(1), Some(ErrorCode::FileNotFound));
    /// assert_eq!(ErrorCode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Undefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    /// Convert the error code to its u16 wire representation.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Default human-readable message for this error code.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Undefined => "Undefined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists",
            Self::NoSuchUser => "No such user",
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// A decoded TFTP message.
///
/// Closed variant type over the five packet kinds. [`decode`] produces one
/// of these for every datagram; [`encode`] is the byte-exact inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Read request for `filename`. The transfer mode is carried but not
    /// interpreted by this server.
    ReadRequest { filename: String, mode: String },

    /// Write request for `filename`.
    WriteRequest { filename: String, mode: String },

    /// One block of file content. A payload shorter than the block size
    /// marks the end of the transfer.
    Data { block: u16, payload: Vec<u8> },

    /// Acknowledgment of block `block`.
    Ack { block: u16 },

    /// Error report. The code is kept as a raw u16 so foreign codes
    /// survive a round trip; [`ErrorCode`] covers the values this server
    /// generates.
    Error { code: u16, message: String },
}

impl Packet {
    /// Build an error packet from a known [`ErrorCode`].
    ///
    /// # Examples
    /// ```
    /// use tftp::{ErrorCode, Packet};
    ///
    /// let packet = Packet::error(ErrorCode::FileNotFound, "no such file");
    /// assert_eq!(packet, Packet::Error { code: 1, message: "no such file".into() });
    /// ```
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.as_u16(),
            message: message.into(),
        }
    }

    /// The illegal-operation packet produced for undecodable input.
    fn illegal_operation() -> Self {
        Self::error(ErrorCode::IllegalOperation, ILLEGAL_OPERATION_MESSAGE)
    }

    /// The opcode this packet encodes with.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::ReadRequest { .. } => Opcode::ReadRequest,
            Self::WriteRequest { .. } => Opcode::WriteRequest,
            Self::Data { .. } => Opcode::Data,
            Self::Ack { .. } => Opcode::Acknowledgment,
            Self::Error { .. } => Opcode::Error,
        }
    }
}

/// Decode one datagram into a [`Packet`].
///
/// Total over arbitrary input: an unknown opcode, a buffer too short for
/// its opcode's fixed header, or a request body with more than two NUL
/// bytes all decode to well-formed packets (the latter to a request with
/// empty filename and mode, which callers treat as a protocol error).
/// This function never panics.
pub fn decode(buf: &[u8]) -> Packet {
    if buf.len() < 2 {
        return Packet::illegal_operation();
    }

    let opcode = u16::from_be_bytes([buf[0], buf[1]]);
    let body = &buf[2..];

    match Opcode::from_u16(opcode) {
        Some(Opcode::ReadRequest) => {
            let (filename, mode) = parse_request_body(body);
            Packet::ReadRequest { filename, mode }
        }
        Some(Opcode::WriteRequest) => {
            let (filename, mode) = parse_request_body(body);
            Packet::WriteRequest { filename, mode }
        }
        Some(Opcode::Data) => match parse_block_number(body) {
            Some(block) => Packet::Data {
                block,
                payload: body[2..].to_vec(),
            },
            None => Packet::illegal_operation(),
        },
        Some(Opcode::Acknowledgment) => match parse_block_number(body) {
            Some(block) => Packet::Ack { block },
            None => Packet::illegal_operation(),
        },
        Some(Opcode::Error) => match parse_block_number(body) {
            Some(code) => Packet::Error {
                code,
                message: parse_nul_terminated(&body[2..]),
            },
            None => Packet::illegal_operation(),
        },
        None => Packet::illegal_operation(),
    }
}

/// Encode a [`Packet`] to its wire bytes.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4);
    buf.extend_from_slice(&packet.opcode().as_u16().to_be_bytes());

    match packet {
        Packet::ReadRequest { filename, mode } | Packet::WriteRequest { filename, mode } => {
            buf.extend_from_slice(filename.as_bytes());
            buf.push(0);
            buf.extend_from_slice(mode.as_bytes());
            buf.push(0);
        }
        Packet::Data { block, payload } => {
            buf.extend_from_slice(&block.to_be_bytes());
            buf.extend_from_slice(payload);
        }
        Packet::Ack { block } => {
            buf.extend_from_slice(&block.to_be_bytes());
        }
        Packet::Error { code, message } => {
            buf.extend_from_slice(&code.to_be_bytes());
            buf.extend_from_slice(message.as_bytes());
            buf.push(0);
        }
    }

    buf
}

/// Parse the two NUL-terminated strings of an RRQ/WRQ body.
///
/// Exactly two NUL bytes are expected. A third NUL is malformed and both
/// strings come back empty; a missing terminator leaves the corresponding
/// string empty.
fn parse_request_body(body: &[u8]) -> (String, String) {
    let mut filename = String::new();
    let mut mode = String::new();
    let mut terminators = 0;
    let mut start = 0;

    for (i, &byte) in body.iter().enumerate() {
        if byte != 0 {
            continue;
        }
        match terminators {
            0 => filename = String::from_utf8_lossy(&body[start..i]).into_owned(),
            1 => mode = String::from_utf8_lossy(&body[start..i]).into_owned(),
            _ => return (String::new(), String::new()),
        }
        terminators += 1;
        start = i + 1;
    }

    (filename, mode)
}

/// Read the 2-byte big-endian field that opens a Data/Ack/Error body.
fn parse_block_number(body: &[u8]) -> Option<u16> {
    if body.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([body[0], body[1]]))
}

/// Read a NUL-terminated string; an unterminated buffer is taken whole.
fn parse_nul_terminated(body: &[u8]) -> String {
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}
