//! device-protocol: wire types and byte-level framing for the identity token.
//!
//! All outbound frames are a fixed 72 bytes; inbound frames are parsed from
//! an ASCII-hex stream at fixed offsets. See the module docs on
//! [`OutboundFrame`] and [`InboundFrame`] for the exact layout.

use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// One of the four operations a token understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Identify,
    Bist,
    ChallengeResponse,
    ChallengeResponseWithEk,
}

impl Command {
    fn opcode(self) -> u8 {
        match self {
            Command::Identify => 0x01,
            Command::Bist => 0x80,
            Command::ChallengeResponse => 0x03,
            Command::ChallengeResponseWithEk => 0x07,
        }
    }

    /// Bytes 1..4 of the outbound frame: literal `00 00 00` except the two
    /// challenge-response commands, which use `00 08 00`.
    fn header_tail(self) -> [u8; 3] {
        match self {
            Command::Identify | Command::Bist => [0x00, 0x00, 0x00],
            Command::ChallengeResponse | Command::ChallengeResponseWithEk => [0x00, 0x08, 0x00],
        }
    }

    /// The settle interval Transport should sleep before reading a reply.
    pub fn processing_delay(self) -> std::time::Duration {
        match self {
            Command::Identify => std::time::Duration::from_millis(250),
            Command::ChallengeResponse | Command::ChallengeResponseWithEk => {
                std::time::Duration::from_millis(300)
            }
            Command::Bist => std::time::Duration::from_millis(150),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Identify => "Identify",
            Command::Bist => "Bist",
            Command::ChallengeResponse => "ChallengeResponse",
            Command::ChallengeResponseWithEk => "ChallengeResponseWithEk",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// OutboundFrame
// ---------------------------------------------------------------------------

/// The fixed 72-byte layout written to the device for every command:
///
/// | offset | len | meaning |
/// |---|---|---|
/// | 0 | 1 | opcode |
/// | 1 | 3 | `00 00 00`, or `00 08 00` for CR/CR+EK |
/// | 4 | 1 | separator |
/// | 5 | 32 | challenge payload, zero-padded |
/// | 37 | 1 | separator |
/// | 38 | 34 | trailing pad |
///
/// The challenge payload's *content* is the caller's concern — zero for
/// Identify/BIST, a CW-derived byte list for ChallengeResponse. The codec
/// only guarantees the fixed 72-byte shape.
pub const OUTBOUND_FRAME_LEN: usize = 72;

const CHALLENGE_OFFSET: usize = 5;
const CHALLENGE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundFrame {
    bytes: [u8; OUTBOUND_FRAME_LEN],
    command: Command,
}

impl OutboundFrame {
    /// Build a frame for `command` with an optional challenge payload.
    ///
    /// `payload` must be at most 32 bytes; it is zero-padded on the right
    /// (i.e. placed at the low end of the 32-byte field, matching the
    /// device's big-endian convention for the CW-derived byte list).
    pub fn new(command: Command, payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() > CHALLENGE_LEN {
            return Err(CodecError::PayloadTooLarge {
                len: payload.len(),
                max: CHALLENGE_LEN,
            });
        }
        let mut bytes = [0u8; OUTBOUND_FRAME_LEN];
        bytes[0] = command.opcode();
        bytes[1..4].copy_from_slice(&command.header_tail());
        bytes[CHALLENGE_OFFSET..CHALLENGE_OFFSET + payload.len()].copy_from_slice(payload);
        Ok(OutboundFrame { bytes, command })
    }

    /// The command this frame was built for — Transport uses it to pick the
    /// per-command processing delay.
    pub fn command(&self) -> Command {
        self.command
    }

    pub fn identify() -> Self {
        OutboundFrame::new(Command::Identify, &[]).expect("empty payload always fits")
    }

    pub fn bist() -> Self {
        OutboundFrame::new(Command::Bist, &[]).expect("empty payload always fits")
    }

    pub fn challenge_response(challenge: &[u8]) -> Result<Self, CodecError> {
        OutboundFrame::new(Command::ChallengeResponse, challenge)
    }

    pub fn challenge_response_with_ek(challenge: &[u8]) -> Result<Self, CodecError> {
        OutboundFrame::new(Command::ChallengeResponseWithEk, challenge)
    }

    pub fn as_bytes(&self) -> &[u8; OUTBOUND_FRAME_LEN] {
        &self.bytes
    }

    /// Serialize as lowercase ASCII hex, terminated by `\r`, ready to write
    /// to the wire.
    pub fn encode_wire(&self) -> String {
        let mut out = String::with_capacity(self.bytes.len() * 2 + 1);
        for b in self.bytes {
            out.push_str(&format!("{b:02x}"));
        }
        out.push('\r');
        out
    }
}

// ---------------------------------------------------------------------------
// InboundFrame
// ---------------------------------------------------------------------------

const PCC_OFFSET: usize = 5;
const PCC_LEN: usize = 16;
const ID_OFFSET: usize = 21;
const ID_LEN: usize = 16;
const RW_OFFSET: usize = 71;
const RW_LEN: usize = 16;
const EK_OFFSET: usize = 87;
const EK_LEN: usize = 16;
const BIST_OFFSET: usize = 71;
const BIST_PASS_BYTE: u8 = 0x50;

/// A parsed response from the device: the raw decoded bytes plus
/// fixed-offset field extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    bytes: Vec<u8>,
}

impl InboundFrame {
    /// Decode an ASCII-hex wire response into an `InboundFrame`.
    ///
    /// Non-hex characters (whitespace, CR, LF) are stripped first; an odd
    /// number of remaining hex digits truncates the final half-byte.
    pub fn decode_wire(raw: &str) -> Self {
        let hex: String = raw.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        let pair_count = hex.len() / 2;
        let mut bytes = Vec::with_capacity(pair_count);
        let hex_bytes = hex.as_bytes();
        for i in 0..pair_count {
            let pair = std::str::from_utf8(&hex_bytes[i * 2..i * 2 + 2]).expect("ascii hex");
            bytes.push(u8::from_str_radix(pair, 16).expect("validated hex digits"));
        }
        InboundFrame { bytes }
    }

    fn field(&self, offset: usize, len: usize) -> Result<&[u8], CodecError> {
        self.bytes
            .get(offset..offset + len)
            .ok_or(CodecError::ShortFrame {
                needed: offset + len,
                got: self.bytes.len(),
            })
    }

    /// The 16-byte PCC half of the device identity.
    pub fn pcc(&self) -> Result<&[u8], CodecError> {
        self.field(PCC_OFFSET, PCC_LEN)
    }

    /// The 16-byte ID half of the device identity.
    pub fn id(&self) -> Result<&[u8], CodecError> {
        self.field(ID_OFFSET, ID_LEN)
    }

    /// The 16-byte response word computed by the device from a CW.
    pub fn rw(&self) -> Result<&[u8], CodecError> {
        self.field(RW_OFFSET, RW_LEN)
    }

    /// The optional 16-byte encryption-key-related field.
    pub fn ek(&self) -> Result<&[u8], CodecError> {
        self.field(EK_OFFSET, EK_LEN)
    }

    /// Whether the BIST pass byte is present and equals `0x50`.
    pub fn bist_passed(&self) -> Result<bool, CodecError> {
        let byte = self
            .bytes
            .get(BIST_OFFSET)
            .ok_or(CodecError::ShortFrame {
                needed: BIST_OFFSET + 1,
                got: self.bytes.len(),
            })?;
        Ok(*byte == BIST_PASS_BYTE)
    }

    /// PCC and ID concatenated and rendered as 64 lowercase hex characters.
    pub fn pccid_hex(&self) -> Result<String, CodecError> {
        let pcc = self.pcc()?;
        let id = self.id()?;
        Ok(to_hex(pcc) + &to_hex(id))
    }

    /// The RW field rendered as 32 lowercase hex characters.
    pub fn rw_hex(&self) -> Result<String, CodecError> {
        Ok(to_hex(self.rw()?))
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("response too short: needed at least {needed} bytes, got {got}")]
    ShortFrame { needed: usize, got: usize },
    #[error("payload of {len} bytes exceeds the {max}-byte challenge field")]
    PayloadTooLarge { len: usize, max: usize },
}

// ---------------------------------------------------------------------------
// intToList — the CW-to-challenge-bytes conversion used by the orchestrator
// ---------------------------------------------------------------------------

/// Convert a CW integer into a big-endian byte list, the way the original
/// `intToList` does it: `L2 = ceil(log256(n))`, bumped by one when `n` is an
/// exact power of 256 (because `log256(256^k) == k` exactly, and `ceil` of an
/// already-integer value doesn't round up).
///
/// Tracing that through: for every `n` the bump does is restore `L2` to the
/// true minimal big-endian byte length of `n` — the same length this
/// function would reach by counting bytes directly. `256^k` needs `k+1`
/// bytes (one significant byte followed by `k` zero bytes) and the bump is
/// exactly what gets `L2` there. So despite `spec.md` describing this as a
/// spurious extra byte, replaying the source shows it never drifts from the
/// minimal byte length — see `DESIGN.md` for the worked table. We implement
/// the minimal-byte-length rule directly rather than the float `log`/`ceil`
/// dance, since they agree everywhere `n > 0`.
///
/// `n == 0` has no defined `log256`; the source would raise. We return a
/// single zero byte rather than panic.
///
/// `min_len_hint` left-pads the result with zero bytes up to that length
/// when the minimal encoding is shorter (a CW with a leading zero byte
/// otherwise yields fewer than 16 bytes). It never truncates.
pub fn int_to_list(mut n: u128, min_len_hint: usize) -> Vec<u8> {
    if n == 0 {
        return vec![0u8; min_len_hint.max(1)];
    }
    let mut len = 0usize;
    let mut probe = n;
    while probe > 0 {
        len += 1;
        probe >>= 8;
    }
    let out_len = len.max(min_len_hint);
    let mut out = vec![0u8; out_len];
    for slot in out.iter_mut().rev() {
        *slot = (n & 0xff) as u8;
        n >>= 8;
    }
    out
}
