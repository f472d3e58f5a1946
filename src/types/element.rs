//! Information elements, qualifiers and time tags.
//!
//! Every [`TypeId`](super::TypeId) maps to exactly one [`ElementKind`] and one
//! [`TimeTagKind`], which together fix the byte size of each information
//! object. Decoding is total once the caller has checked the size; encoding
//! rejects any field that would not fit its bit width.

use bytes::{Buf, BufMut, BytesMut};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{Iec104Error, Result};
use crate::types::Quality;

/// Fixed test pattern carried by C_TS_NA_1.
pub const TEST_PATTERN: u16 = 0x55AA;

/// Qualifier of interrogation: station interrogation (global).
pub const QOI_STATION: u8 = 20;

/// Qualifier of counter interrogation: general request, no freeze.
pub const QCC_GENERAL: u8 = 5;

/// Qualifier of reset process: general reset.
pub const QRP_GENERAL: u8 = 1;

/// Shape of a single information element on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    SinglePoint,
    DoublePoint,
    StepPosition,
    Bitstring,
    Normalized,
    NormalizedNoQuality,
    Scaled,
    Float,
    Counter,
    SingleCommand,
    DoubleCommand,
    RegulatingStep,
    SetpointNormalized,
    SetpointScaled,
    SetpointFloat,
    BitstringCommand,
    EndOfInit,
    Interrogation,
    CounterInterrogation,
    Read,
    ClockSync,
    TestPattern,
    ResetProcess,
    DelayAcquisition,
    TestCounter,
}

impl ElementKind {
    /// Encoded size in bytes, excluding address and time tag.
    pub const fn size(&self) -> usize {
        match self {
            Self::Read => 0,
            Self::SinglePoint
            | Self::DoublePoint
            | Self::SingleCommand
            | Self::DoubleCommand
            | Self::RegulatingStep
            | Self::EndOfInit
            | Self::Interrogation
            | Self::CounterInterrogation
            | Self::ResetProcess => 1,
            Self::StepPosition
            | Self::NormalizedNoQuality
            | Self::TestPattern
            | Self::DelayAcquisition
            | Self::TestCounter => 2,
            Self::Normalized | Self::Scaled | Self::SetpointNormalized | Self::SetpointScaled => 3,
            Self::BitstringCommand => 4,
            Self::Bitstring | Self::Float | Self::Counter | Self::SetpointFloat => 5,
            Self::ClockSync => 7,
        }
    }
}

/// Time tag trailing each element of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeTagKind {
    None,
    Cp24,
    Cp56,
}

impl TimeTagKind {
    /// Encoded size in bytes.
    pub const fn size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Cp24 => 3,
            Self::Cp56 => 7,
        }
    }
}

/// Double-point state (DPI / DCS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoublePointValue {
    /// Indeterminate or intermediate (00)
    Indeterminate = 0,
    /// Determined OFF (01)
    Off = 1,
    /// Determined ON (10)
    On = 2,
    /// Indeterminate (11)
    IndeterminateOrFaulty = 3,
}

impl DoublePointValue {
    /// Decode from the low two bits.
    pub const fn from_bits(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Indeterminate,
            1 => Self::Off,
            2 => Self::On,
            _ => Self::IndeterminateOrFaulty,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Value with transient state indication (VTI), range -64..=63.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepPosition {
    pub value: i8,
    pub transient: bool,
}

impl StepPosition {
    fn from_byte(b: u8) -> Self {
        Self {
            // sign-extend the 7-bit two's complement field
            value: ((b << 1) as i8) >> 1,
            transient: b & 0x80 != 0,
        }
    }

    fn to_byte(self) -> Result<u8> {
        if !(-64..=63).contains(&self.value) {
            return Err(Iec104Error::invalid_field(format!(
                "step position {} outside -64..=63",
                self.value
            )));
        }
        Ok((self.value as u8 & 0x7F) | if self.transient { 0x80 } else { 0 })
    }
}

/// Binary counter reading (BCR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinaryCounter {
    pub value: i32,
    /// Sequence number, 0..=31
    pub sequence: u8,
    pub carry: bool,
    pub adjusted: bool,
    pub invalid: bool,
}

impl BinaryCounter {
    pub const fn new(value: i32) -> Self {
        Self {
            value,
            sequence: 0,
            carry: false,
            adjusted: false,
            invalid: false,
        }
    }
}

/// Qualifier of single, double and regulating step commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommandQualifier {
    /// Qualifier of command (QU), 0..=31
    pub qualifier: u8,
    /// Select (true) or execute (false)
    pub select: bool,
}

impl CommandQualifier {
    pub const fn execute() -> Self {
        Self {
            qualifier: 0,
            select: false,
        }
    }

    pub const fn select() -> Self {
        Self {
            qualifier: 0,
            select: true,
        }
    }

    fn from_byte(b: u8) -> Self {
        Self {
            qualifier: (b >> 2) & 0x1F,
            select: b & 0x80 != 0,
        }
    }

    fn to_bits(self) -> Result<u8> {
        if self.qualifier > 0x1F {
            return Err(Iec104Error::invalid_field(format!(
                "command qualifier {} exceeds 31",
                self.qualifier
            )));
        }
        Ok((self.qualifier << 2) | if self.select { 0x80 } else { 0 })
    }
}

/// Qualifier of set-point command (QOS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SetpointQualifier {
    /// QL, 0..=127
    pub qualifier: u8,
    pub select: bool,
}

impl SetpointQualifier {
    fn from_byte(b: u8) -> Self {
        Self {
            qualifier: b & 0x7F,
            select: b & 0x80 != 0,
        }
    }

    fn to_byte(self) -> Result<u8> {
        if self.qualifier > 0x7F {
            return Err(Iec104Error::invalid_field(format!(
                "set-point qualifier {} exceeds 127",
                self.qualifier
            )));
        }
        Ok(self.qualifier | if self.select { 0x80 } else { 0 })
    }
}

/// CP24Time2a: minutes and milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cp24Time2a {
    pub milliseconds: u16,
    pub minutes: u8,
    pub invalid: bool,
}

impl Cp24Time2a {
    fn decode(buf: &mut impl Buf) -> Self {
        let milliseconds = buf.get_u16_le();
        let min = buf.get_u8();
        Self {
            milliseconds,
            minutes: min & 0x3F,
            invalid: min & 0x80 != 0,
        }
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        check_width("minutes", self.minutes, 0x3F)?;
        buf.put_u16_le(self.milliseconds);
        buf.put_u8(self.minutes | if self.invalid { 0x80 } else { 0 });
        Ok(())
    }
}

/// CP56Time2a timestamp (7 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cp56Time2a {
    /// Milliseconds including seconds (0-59999)
    pub milliseconds: u16,
    pub minutes: u8,
    pub hours: u8,
    /// Day of month (1-31)
    pub day: u8,
    /// Day of week (1-7, 1=Monday, 0 unused)
    pub day_of_week: u8,
    pub month: u8,
    /// Years since 2000 (0-99)
    pub year: u8,
    pub invalid: bool,
    pub summer_time: bool,
}

impl Cp56Time2a {
    /// Local wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(&Local::now().naive_local())
    }

    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        Self {
            milliseconds: (dt.second() * 1000 + dt.nanosecond() / 1_000_000).min(59_999) as u16,
            minutes: dt.minute() as u8,
            hours: dt.hour() as u8,
            day: dt.day() as u8,
            day_of_week: dt.weekday().number_from_monday() as u8,
            month: dt.month() as u8,
            year: dt.year().rem_euclid(100) as u8,
            invalid: false,
            summer_time: false,
        }
    }

    /// Calendar time, or `None` when the fields do not form a valid date.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let ms = u32::from(self.milliseconds);
        NaiveDate::from_ymd_opt(
            2000 + i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_milli_opt(
            u32::from(self.hours),
            u32::from(self.minutes),
            ms / 1000,
            ms % 1000,
        )
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let milliseconds = buf.get_u16_le();
        let min = buf.get_u8();
        let hour = buf.get_u8();
        let day = buf.get_u8();
        let month = buf.get_u8();
        let year = buf.get_u8();
        Self {
            milliseconds,
            minutes: min & 0x3F,
            hours: hour & 0x1F,
            day: day & 0x1F,
            day_of_week: day >> 5,
            month: month & 0x0F,
            year: year & 0x7F,
            invalid: min & 0x80 != 0,
            summer_time: hour & 0x80 != 0,
        }
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        check_width("minutes", self.minutes, 0x3F)?;
        check_width("hours", self.hours, 0x1F)?;
        check_width("day", self.day, 0x1F)?;
        check_width("day of week", self.day_of_week, 0x07)?;
        check_width("month", self.month, 0x0F)?;
        check_width("year", self.year, 0x7F)?;
        buf.put_u16_le(self.milliseconds);
        buf.put_u8(self.minutes | if self.invalid { 0x80 } else { 0 });
        buf.put_u8(self.hours | if self.summer_time { 0x80 } else { 0 });
        buf.put_u8(self.day | (self.day_of_week << 5));
        buf.put_u8(self.month);
        buf.put_u8(self.year);
        Ok(())
    }
}

/// Time tag attached to an information object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeTag {
    Cp24(Cp24Time2a),
    Cp56(Cp56Time2a),
}

impl TimeTag {
    pub const fn kind(&self) -> TimeTagKind {
        match self {
            Self::Cp24(_) => TimeTagKind::Cp24,
            Self::Cp56(_) => TimeTagKind::Cp56,
        }
    }

    pub(crate) fn decode(kind: TimeTagKind, buf: &mut impl Buf) -> Option<Self> {
        match kind {
            TimeTagKind::None => None,
            TimeTagKind::Cp24 => Some(Self::Cp24(Cp24Time2a::decode(buf))),
            TimeTagKind::Cp56 => Some(Self::Cp56(Cp56Time2a::decode(buf))),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Self::Cp24(t) => t.encode(buf),
            Self::Cp56(t) => t.encode(buf),
        }
    }
}

/// One typed information element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InformationElement {
    /// SIQ
    SinglePoint { value: bool, quality: Quality },
    /// DIQ
    DoublePoint {
        value: DoublePointValue,
        quality: Quality,
    },
    /// VTI + QDS
    StepPosition { value: StepPosition, quality: Quality },
    /// BSI + QDS
    Bitstring { value: u32, quality: Quality },
    /// NVA + QDS
    Normalized { value: i16, quality: Quality },
    /// NVA
    NormalizedNoQuality(i16),
    /// SVA + QDS
    Scaled { value: i16, quality: Quality },
    /// IEEE STD 754 + QDS
    Float { value: f32, quality: Quality },
    /// BCR
    Counter(BinaryCounter),
    /// SCO
    SingleCommand {
        value: bool,
        qualifier: CommandQualifier,
    },
    /// DCO
    DoubleCommand {
        value: DoublePointValue,
        qualifier: CommandQualifier,
    },
    /// RCO; state 1 lowers, 2 raises
    RegulatingStep {
        state: u8,
        qualifier: CommandQualifier,
    },
    /// NVA + QOS
    SetpointNormalized {
        value: i16,
        qualifier: SetpointQualifier,
    },
    /// SVA + QOS
    SetpointScaled {
        value: i16,
        qualifier: SetpointQualifier,
    },
    /// IEEE STD 754 + QOS
    SetpointFloat {
        value: f32,
        qualifier: SetpointQualifier,
    },
    /// BSI
    BitstringCommand(u32),
    /// COI
    EndOfInit { cause: u8, after_change: bool },
    /// QOI
    Interrogation { qoi: u8 },
    /// QCC
    CounterInterrogation { qcc: u8 },
    /// No element
    Read,
    /// CP56Time2a
    ClockSync(Cp56Time2a),
    /// FBP
    TestPattern(u16),
    /// QRP
    ResetProcess { qrp: u8 },
    /// CP16Time2a, milliseconds
    DelayAcquisition(u16),
    /// TSC
    TestCounter(u16),
}

impl InformationElement {
    pub const fn kind(&self) -> ElementKind {
        match self {
            Self::SinglePoint { .. } => ElementKind::SinglePoint,
            Self::DoublePoint { .. } => ElementKind::DoublePoint,
            Self::StepPosition { .. } => ElementKind::StepPosition,
            Self::Bitstring { .. } => ElementKind::Bitstring,
            Self::Normalized { .. } => ElementKind::Normalized,
            Self::NormalizedNoQuality(_) => ElementKind::NormalizedNoQuality,
            Self::Scaled { .. } => ElementKind::Scaled,
            Self::Float { .. } => ElementKind::Float,
            Self::Counter(_) => ElementKind::Counter,
            Self::SingleCommand { .. } => ElementKind::SingleCommand,
            Self::DoubleCommand { .. } => ElementKind::DoubleCommand,
            Self::RegulatingStep { .. } => ElementKind::RegulatingStep,
            Self::SetpointNormalized { .. } => ElementKind::SetpointNormalized,
            Self::SetpointScaled { .. } => ElementKind::SetpointScaled,
            Self::SetpointFloat { .. } => ElementKind::SetpointFloat,
            Self::BitstringCommand(_) => ElementKind::BitstringCommand,
            Self::EndOfInit { .. } => ElementKind::EndOfInit,
            Self::Interrogation { .. } => ElementKind::Interrogation,
            Self::CounterInterrogation { .. } => ElementKind::CounterInterrogation,
            Self::Read => ElementKind::Read,
            Self::ClockSync(_) => ElementKind::ClockSync,
            Self::TestPattern(_) => ElementKind::TestPattern,
            Self::ResetProcess { .. } => ElementKind::ResetProcess,
            Self::DelayAcquisition(_) => ElementKind::DelayAcquisition,
            Self::TestCounter(_) => ElementKind::TestCounter,
        }
    }

    /// Decode one element. The caller guarantees `kind.size()` bytes remain.
    pub(crate) fn decode(kind: ElementKind, buf: &mut impl Buf) -> Self {
        match kind {
            ElementKind::SinglePoint => {
                let siq = buf.get_u8();
                Self::SinglePoint {
                    value: siq & 0x01 != 0,
                    quality: Quality::from_siq(siq),
                }
            }
            ElementKind::DoublePoint => {
                let diq = buf.get_u8();
                Self::DoublePoint {
                    value: DoublePointValue::from_bits(diq),
                    quality: Quality::from_siq(diq),
                }
            }
            ElementKind::StepPosition => {
                let value = StepPosition::from_byte(buf.get_u8());
                Self::StepPosition {
                    value,
                    quality: Quality::from_qds(buf.get_u8()),
                }
            }
            ElementKind::Bitstring => {
                let value = buf.get_u32_le();
                Self::Bitstring {
                    value,
                    quality: Quality::from_qds(buf.get_u8()),
                }
            }
            ElementKind::Normalized => {
                let value = buf.get_i16_le();
                Self::Normalized {
                    value,
                    quality: Quality::from_qds(buf.get_u8()),
                }
            }
            ElementKind::NormalizedNoQuality => Self::NormalizedNoQuality(buf.get_i16_le()),
            ElementKind::Scaled => {
                let value = buf.get_i16_le();
                Self::Scaled {
                    value,
                    quality: Quality::from_qds(buf.get_u8()),
                }
            }
            ElementKind::Float => {
                let value = buf.get_f32_le();
                Self::Float {
                    value,
                    quality: Quality::from_qds(buf.get_u8()),
                }
            }
            ElementKind::Counter => {
                let value = buf.get_i32_le();
                let flags = buf.get_u8();
                Self::Counter(BinaryCounter {
                    value,
                    sequence: flags & 0x1F,
                    carry: flags & 0x20 != 0,
                    adjusted: flags & 0x40 != 0,
                    invalid: flags & 0x80 != 0,
                })
            }
            ElementKind::SingleCommand => {
                let sco = buf.get_u8();
                Self::SingleCommand {
                    value: sco & 0x01 != 0,
                    qualifier: CommandQualifier::from_byte(sco),
                }
            }
            ElementKind::DoubleCommand => {
                let dco = buf.get_u8();
                Self::DoubleCommand {
                    value: DoublePointValue::from_bits(dco),
                    qualifier: CommandQualifier::from_byte(dco),
                }
            }
            ElementKind::RegulatingStep => {
                let rco = buf.get_u8();
                Self::RegulatingStep {
                    state: rco & 0x03,
                    qualifier: CommandQualifier::from_byte(rco),
                }
            }
            ElementKind::SetpointNormalized => {
                let value = buf.get_i16_le();
                Self::SetpointNormalized {
                    value,
                    qualifier: SetpointQualifier::from_byte(buf.get_u8()),
                }
            }
            ElementKind::SetpointScaled => {
                let value = buf.get_i16_le();
                Self::SetpointScaled {
                    value,
                    qualifier: SetpointQualifier::from_byte(buf.get_u8()),
                }
            }
            ElementKind::SetpointFloat => {
                let value = buf.get_f32_le();
                Self::SetpointFloat {
                    value,
                    qualifier: SetpointQualifier::from_byte(buf.get_u8()),
                }
            }
            ElementKind::BitstringCommand => Self::BitstringCommand(buf.get_u32_le()),
            ElementKind::EndOfInit => {
                let coi = buf.get_u8();
                Self::EndOfInit {
                    cause: coi & 0x7F,
                    after_change: coi & 0x80 != 0,
                }
            }
            ElementKind::Interrogation => Self::Interrogation { qoi: buf.get_u8() },
            ElementKind::CounterInterrogation => Self::CounterInterrogation { qcc: buf.get_u8() },
            ElementKind::Read => Self::Read,
            ElementKind::ClockSync => Self::ClockSync(Cp56Time2a::decode(buf)),
            ElementKind::TestPattern => Self::TestPattern(buf.get_u16_le()),
            ElementKind::ResetProcess => Self::ResetProcess { qrp: buf.get_u8() },
            ElementKind::DelayAcquisition => Self::DelayAcquisition(buf.get_u16_le()),
            ElementKind::TestCounter => Self::TestCounter(buf.get_u16_le()),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match *self {
            Self::SinglePoint { value, quality } => {
                buf.put_u8(quality.to_siq()? | u8::from(value));
            }
            Self::DoublePoint { value, quality } => {
                buf.put_u8(quality.to_siq()? | value.as_u8());
            }
            Self::StepPosition { value, quality } => {
                buf.put_u8(value.to_byte()?);
                buf.put_u8(quality.to_qds());
            }
            Self::Bitstring { value, quality } => {
                buf.put_u32_le(value);
                buf.put_u8(quality.to_qds());
            }
            Self::Normalized { value, quality } | Self::Scaled { value, quality } => {
                buf.put_i16_le(value);
                buf.put_u8(quality.to_qds());
            }
            Self::NormalizedNoQuality(value) => buf.put_i16_le(value),
            Self::Float { value, quality } => {
                buf.put_f32_le(value);
                buf.put_u8(quality.to_qds());
            }
            Self::Counter(bcr) => {
                check_width("counter sequence", bcr.sequence, 0x1F)?;
                buf.put_i32_le(bcr.value);
                buf.put_u8(
                    bcr.sequence
                        | if bcr.carry { 0x20 } else { 0 }
                        | if bcr.adjusted { 0x40 } else { 0 }
                        | if bcr.invalid { 0x80 } else { 0 },
                );
            }
            Self::SingleCommand { value, qualifier } => {
                buf.put_u8(qualifier.to_bits()? | u8::from(value));
            }
            Self::DoubleCommand { value, qualifier } => {
                buf.put_u8(qualifier.to_bits()? | value.as_u8());
            }
            Self::RegulatingStep { state, qualifier } => {
                check_width("regulating step state", state, 0x03)?;
                buf.put_u8(qualifier.to_bits()? | state);
            }
            Self::SetpointNormalized { value, qualifier }
            | Self::SetpointScaled { value, qualifier } => {
                buf.put_i16_le(value);
                buf.put_u8(qualifier.to_byte()?);
            }
            Self::SetpointFloat { value, qualifier } => {
                buf.put_f32_le(value);
                buf.put_u8(qualifier.to_byte()?);
            }
            Self::BitstringCommand(value) => buf.put_u32_le(value),
            Self::EndOfInit {
                cause,
                after_change,
            } => {
                check_width("cause of initialization", cause, 0x7F)?;
                buf.put_u8(cause | if after_change { 0x80 } else { 0 });
            }
            Self::Interrogation { qoi } => buf.put_u8(qoi),
            Self::CounterInterrogation { qcc } => buf.put_u8(qcc),
            Self::Read => {}
            Self::ClockSync(time) => time.encode(buf)?,
            Self::TestPattern(fbp) => buf.put_u16_le(fbp),
            Self::ResetProcess { qrp } => buf.put_u8(qrp),
            Self::DelayAcquisition(ms) => buf.put_u16_le(ms),
            Self::TestCounter(tsc) => buf.put_u16_le(tsc),
        }
        Ok(())
    }
}

/// Convert a normalized value (NVA) to its fractional form in [-1, 1).
pub fn normalized_to_f32(raw: i16) -> f32 {
    f32::from(raw) / 32768.0
}

fn check_width(field: &str, value: u8, max: u8) -> Result<()> {
    if value > max {
        return Err(Iec104Error::invalid_field(format!(
            "{} value {} exceeds {}",
            field, value, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(element: InformationElement) -> Vec<u8> {
        let mut buf = BytesMut::new();
        element.encode(&mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_sizes_match_encoding() {
        let samples = [
            InformationElement::StepPosition {
                value: StepPosition {
                    value: -5,
                    transient: true,
                },
                quality: Quality::Good,
            },
            InformationElement::Counter(BinaryCounter::new(-1)),
            InformationElement::SetpointFloat {
                value: 1.5,
                qualifier: SetpointQualifier::default(),
            },
            InformationElement::ClockSync(Cp56Time2a::default()),
            InformationElement::Read,
            InformationElement::DelayAcquisition(250),
        ];
        for element in samples {
            assert_eq!(encode(element).len(), element.kind().size(), "{:?}", element);
        }
    }

    #[test]
    fn test_step_position_sign_extension() {
        let mut data: &[u8] = &[0x7F, 0x00];
        let element = InformationElement::decode(ElementKind::StepPosition, &mut data);
        assert_eq!(
            element,
            InformationElement::StepPosition {
                value: StepPosition {
                    value: -1,
                    transient: false
                },
                quality: Quality::Good,
            }
        );

        let mut data: &[u8] = &[0xBF, 0x00];
        match InformationElement::decode(ElementKind::StepPosition, &mut data) {
            InformationElement::StepPosition { value, .. } => {
                assert_eq!(value.value, 63);
                assert!(value.transient);
            }
            other => panic!("unexpected element {:?}", other),
        }

        let out_of_range = InformationElement::StepPosition {
            value: StepPosition {
                value: 64,
                transient: false,
            },
            quality: Quality::Good,
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            out_of_range.encode(&mut buf),
            Err(Iec104Error::InvalidField(_))
        ));
    }

    #[test]
    fn test_single_command_bits() {
        let element = InformationElement::SingleCommand {
            value: true,
            qualifier: CommandQualifier {
                qualifier: 1,
                select: true,
            },
        };
        assert_eq!(encode(element), vec![0x85]);

        let mut data: &[u8] = &[0x85];
        assert_eq!(
            InformationElement::decode(ElementKind::SingleCommand, &mut data),
            element
        );
    }

    #[test]
    fn test_counter_flags() {
        let element = InformationElement::Counter(BinaryCounter {
            value: 1000,
            sequence: 3,
            carry: true,
            adjusted: false,
            invalid: true,
        });
        assert_eq!(encode(element), vec![0xE8, 0x03, 0x00, 0x00, 0xA3]);

        let bad = InformationElement::Counter(BinaryCounter {
            sequence: 32,
            ..BinaryCounter::new(0)
        });
        let mut buf = BytesMut::new();
        assert!(bad.encode(&mut buf).is_err());
    }

    #[test]
    fn test_overflow_rejected_on_siq() {
        let element = InformationElement::SinglePoint {
            value: true,
            quality: Quality::Good.set_overflow(true),
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            element.encode(&mut buf),
            Err(Iec104Error::InvalidField(_))
        ));
    }

    #[test]
    fn test_cp56time2a_wire_layout() {
        let time = Cp56Time2a {
            milliseconds: 30000,
            minutes: 30,
            hours: 12,
            day: 15,
            day_of_week: 3,
            month: 6,
            year: 24,
            invalid: false,
            summer_time: true,
        };
        let mut buf = BytesMut::new();
        time.encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x30, 0x75, 30, 0x8C, 0x6F, 6, 24]);

        let mut data = buf.freeze();
        assert_eq!(Cp56Time2a::decode(&mut data), time);
    }

    #[test]
    fn test_cp56time2a_rejects_wide_fields() {
        let time = Cp56Time2a {
            month: 16,
            ..Cp56Time2a::default()
        };
        let mut buf = BytesMut::new();
        assert!(time.encode(&mut buf).is_err());
    }

    #[test]
    fn test_cp56time2a_chrono() {
        let dt = NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_milli_opt(12, 30, 45, 123)
            .unwrap();
        let time = Cp56Time2a::from_datetime(&dt);
        assert_eq!(time.milliseconds, 45_123);
        assert_eq!(time.year, 24);
        assert_eq!(time.day_of_week, 6); // Saturday
        assert_eq!(time.to_datetime(), Some(dt));

        assert_eq!(Cp56Time2a::default().to_datetime(), None);
    }

    #[test]
    fn test_normalized_scale() {
        assert_eq!(normalized_to_f32(i16::MIN), -1.0);
        assert_eq!(normalized_to_f32(16384), 0.5);
    }
}
