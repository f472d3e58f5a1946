//! IEC 60870-5-104 APCI (Application Protocol Control Information).
//!
//! APCI is the 6-byte header of an APDU, containing frame type and sequence numbers.

use crate::error::{Iec104Error, Result};

/// Start byte for IEC 104 frames.
pub const START_BYTE: u8 = 0x68;

/// Length of the control field.
pub const CONTROL_FIELD_LENGTH: usize = 4;

/// Minimum APDU length (APCI only, no ASDU).
pub const MIN_APDU_LENGTH: usize = 4;

/// Maximum APDU length.
pub const MAX_APDU_LENGTH: usize = 253;

/// Maximum ASDU length carried by one I-frame.
pub const MAX_ASDU_LENGTH: usize = MAX_APDU_LENGTH - CONTROL_FIELD_LENGTH;

/// Sequence numbers are counted modulo 2^15.
pub const SEQ_MODULUS: u16 = 1 << 15;

/// APCI frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// I-frame: Information transfer
    IFrame,
    /// S-frame: Supervisory (acknowledgment)
    SFrame,
    /// U-frame: Unnumbered (control)
    UFrame,
}

impl FrameType {
    /// Classify a frame by the low bits of its first control byte.
    #[inline]
    pub const fn classify(cf1: u8) -> Self {
        if cf1 & 0x01 == 0 {
            Self::IFrame
        } else if cf1 & 0x03 == 0x01 {
            Self::SFrame
        } else {
            Self::UFrame
        }
    }
}

/// U-frame function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFunction {
    /// STARTDT act (Start Data Transfer activation)
    StartDtAct,
    /// STARTDT con (Start Data Transfer confirmation)
    StartDtCon,
    /// STOPDT act (Stop Data Transfer activation)
    StopDtAct,
    /// STOPDT con (Stop Data Transfer confirmation)
    StopDtCon,
    /// TESTFR act (Test Frame activation)
    TestFrAct,
    /// TESTFR con (Test Frame confirmation)
    TestFrCon,
}

impl UFunction {
    /// Get the control field byte for this U-function.
    #[inline]
    pub const fn control_byte(&self) -> u8 {
        match self {
            Self::StartDtAct => 0x07, // 0000 0111
            Self::StartDtCon => 0x0B, // 0000 1011
            Self::StopDtAct => 0x13,  // 0001 0011
            Self::StopDtCon => 0x23,  // 0010 0011
            Self::TestFrAct => 0x43,  // 0100 0011
            Self::TestFrCon => 0x83,  // 1000 0011
        }
    }

    /// Parse U-function from control byte. Exactly one function bit must be set.
    #[inline]
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        match byte {
            0x07 => Ok(Self::StartDtAct),
            0x0B => Ok(Self::StartDtCon),
            0x13 => Ok(Self::StopDtAct),
            0x23 => Ok(Self::StopDtCon),
            0x43 => Ok(Self::TestFrAct),
            0x83 => Ok(Self::TestFrCon),
            _ => Err(Iec104Error::invalid_frame(format!(
                "unknown U-frame function 0x{byte:02X}"
            ))),
        }
    }

    /// The confirmation expected for an activation, if any.
    #[inline]
    pub const fn confirmation(&self) -> Option<Self> {
        match self {
            Self::StartDtAct => Some(Self::StartDtCon),
            Self::StopDtAct => Some(Self::StopDtCon),
            Self::TestFrAct => Some(Self::TestFrCon),
            _ => None,
        }
    }

    /// Short standard name, e.g. `STARTDT con`.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartDtAct => "STARTDT act",
            Self::StartDtCon => "STARTDT con",
            Self::StopDtAct => "STOPDT act",
            Self::StopDtCon => "STOPDT con",
            Self::TestFrAct => "TESTFR act",
            Self::TestFrCon => "TESTFR con",
        }
    }
}

/// 15-bit sequence number, wrapping at 2^15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum(u16);

impl SeqNum {
    /// Create from a raw value, reduced modulo 2^15.
    #[inline]
    pub const fn new(value: u16) -> Self {
        Self(value % SEQ_MODULUS)
    }

    /// Raw value (0-32767).
    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// The next sequence number, wrapping 32767 to 0.
    #[inline]
    pub const fn next(self) -> Self {
        Self((self.0 + 1) % SEQ_MODULUS)
    }

    /// Number of increments needed to go from `self` to `to`.
    #[inline]
    pub const fn distance_to(self, to: SeqNum) -> u16 {
        (to.0 + SEQ_MODULUS - self.0) % SEQ_MODULUS
    }

    /// Whether `self` lies in the inclusive window `[low, high]`, wraparound aware.
    #[inline]
    pub const fn within(self, low: SeqNum, high: SeqNum) -> bool {
        low.distance_to(self) <= low.distance_to(high)
    }
}

impl std::fmt::Display for SeqNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// APCI (Application Protocol Control Information).
///
/// The 6-byte header of an IEC 104 APDU.
///
/// ```text
/// +--------+--------+--------+--------+--------+--------+
/// | 0x68   | Length | CF1    | CF2    | CF3    | CF4    |
/// +--------+--------+--------+--------+--------+--------+
///   Start    APDU     Control Field (4 bytes)
///   Byte     Length
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    /// I-frame with send and receive sequence numbers.
    IFrame {
        /// Send sequence number N(S)
        send_seq: SeqNum,
        /// Receive sequence number N(R)
        recv_seq: SeqNum,
    },
    /// S-frame with receive sequence number only.
    SFrame {
        /// Receive sequence number N(R)
        recv_seq: SeqNum,
    },
    /// U-frame with function code.
    UFrame {
        /// U-frame function
        function: UFunction,
    },
}

impl Apci {
    /// Create a new I-frame APCI.
    #[inline]
    pub fn i_frame(send_seq: SeqNum, recv_seq: SeqNum) -> Self {
        Self::IFrame { send_seq, recv_seq }
    }

    /// Create a new S-frame APCI.
    #[inline]
    pub fn s_frame(recv_seq: SeqNum) -> Self {
        Self::SFrame { recv_seq }
    }

    /// Create a new U-frame APCI.
    #[inline]
    pub fn u_frame(function: UFunction) -> Self {
        Self::UFrame { function }
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::IFrame { .. } => FrameType::IFrame,
            Self::SFrame { .. } => FrameType::SFrame,
            Self::UFrame { .. } => FrameType::UFrame,
        }
    }

    /// Parse APCI from the 4 control field bytes.
    #[inline]
    pub fn parse(control: &[u8]) -> Result<Self> {
        if control.len() < CONTROL_FIELD_LENGTH {
            return Err(Iec104Error::invalid_frame("control field too short"));
        }

        match FrameType::classify(control[0]) {
            FrameType::IFrame => Ok(Self::IFrame {
                send_seq: decode_seq(control[0], control[1]),
                recv_seq: decode_seq(control[2], control[3]),
            }),
            FrameType::SFrame => Ok(Self::SFrame {
                recv_seq: decode_seq(control[2], control[3]),
            }),
            FrameType::UFrame => Ok(Self::UFrame {
                function: UFunction::from_control_byte(control[0])?,
            }),
        }
    }

    /// Encode APCI to 4 bytes of control field.
    #[inline]
    pub fn encode(&self) -> [u8; 4] {
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                let [cf1, cf2] = encode_seq(*send_seq);
                let [cf3, cf4] = encode_seq(*recv_seq);
                [cf1, cf2, cf3, cf4]
            }
            Self::SFrame { recv_seq } => {
                let [cf3, cf4] = encode_seq(*recv_seq);
                [0x01, 0x00, cf3, cf4]
            }
            Self::UFrame { function } => [function.control_byte(), 0x00, 0x00, 0x00],
        }
    }

    /// Encode full APDU header (6 bytes: start + length + control).
    ///
    /// `asdu_len` is the length of the ASDU that follows (0 for S-frame and U-frame).
    /// Fails when it exceeds [`MAX_ASDU_LENGTH`].
    #[inline]
    pub fn encode_header(&self, asdu_len: usize) -> Result<[u8; 6]> {
        if asdu_len > MAX_ASDU_LENGTH {
            return Err(Iec104Error::invalid_frame(format!(
                "ASDU of {} bytes exceeds {}",
                asdu_len, MAX_ASDU_LENGTH
            )));
        }
        let control = self.encode();
        let apdu_len = (CONTROL_FIELD_LENGTH + asdu_len) as u8;
        Ok([
            START_BYTE, apdu_len, control[0], control[1], control[2], control[3],
        ])
    }

    /// Check if this is an I-frame.
    #[inline]
    pub fn is_i_frame(&self) -> bool {
        matches!(self, Self::IFrame { .. })
    }

    /// Check if this is an S-frame.
    #[inline]
    pub fn is_s_frame(&self) -> bool {
        matches!(self, Self::SFrame { .. })
    }

    /// Check if this is a U-frame.
    #[inline]
    pub fn is_u_frame(&self) -> bool {
        matches!(self, Self::UFrame { .. })
    }

    /// Get the send sequence number (I-frame only).
    #[inline]
    pub fn send_seq(&self) -> Option<SeqNum> {
        match self {
            Self::IFrame { send_seq, .. } => Some(*send_seq),
            _ => None,
        }
    }

    /// Get the receive sequence number (I-frame and S-frame).
    #[inline]
    pub fn recv_seq(&self) -> Option<SeqNum> {
        match self {
            Self::IFrame { recv_seq, .. } | Self::SFrame { recv_seq } => Some(*recv_seq),
            _ => None,
        }
    }
}

/// Sequence numbers travel little-endian, shifted left by one so bit 0 stays free.
#[inline]
fn encode_seq(seq: SeqNum) -> [u8; 2] {
    (seq.value() << 1).to_le_bytes()
}

#[inline]
fn decode_seq(lo: u8, hi: u8) -> SeqNum {
    SeqNum::new(u16::from_le_bytes([lo, hi]) >> 1)
}

impl std::fmt::Display for Apci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                write!(f, "I(S={}, R={})", send_seq, recv_seq)
            }
            Self::SFrame { recv_seq } => {
                write!(f, "S(R={})", recv_seq)
            }
            Self::UFrame { function } => write!(f, "U({})", function.name()),
        }
    }
}
