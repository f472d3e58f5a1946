//! Data point types for IEC 60870-5-104.
//!
//! A [`DataPoint`] is the flattened, application-facing view of one
//! monitoring information object: address, value, quality and time tag.

use crate::error::{Iec104Error, Result};
use crate::types::{normalized_to_f32, BinaryCounter, DoublePointValue, TimeTag};

/// Unified data point representing an information object.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Information object address (IOA)
    pub ioa: u32,
    /// Data value
    pub value: DataValue,
    /// Quality flags
    pub quality: Quality,
    /// Time tag (if the type carries one)
    pub timestamp: Option<TimeTag>,
}

impl DataPoint {
    #[inline]
    pub const fn new(ioa: u32, value: DataValue) -> Self {
        Self {
            ioa,
            value,
            quality: Quality::Good,
            timestamp: None,
        }
    }

    #[inline]
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    #[inline]
    pub fn with_timestamp(mut self, timestamp: Option<TimeTag>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[inline]
    pub const fn is_good(&self) -> bool {
        self.quality.is_good()
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }
}

/// Data value types.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// Single-point information (M_SP_*)
    Single(bool),

    /// Double-point information (M_DP_*)
    Double(DoublePointValue),

    /// Step position -64..=63 with transient flag (M_ST_*)
    StepPosition { value: i8, transient: bool },

    /// Bitstring of 32 bits (M_BO_*)
    Bitstring(u32),

    /// Normalized value in [-1, 1) (M_ME_NA_1, M_ME_TA_1, M_ME_TD_1, M_ME_ND_1)
    Normalized(f32),

    /// Scaled value (M_ME_NB_1, M_ME_TB_1, M_ME_TE_1)
    Scaled(i16),

    /// Short floating point (M_ME_NC_1, M_ME_TC_1, M_ME_TF_1)
    Float(f32),

    /// Integrated totals (M_IT_*)
    Counter(BinaryCounter),
}

impl DataValue {
    /// Convert to f64 if numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Single(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Double(DoublePointValue::Off) => Some(0.0),
            Self::Double(DoublePointValue::On) => Some(1.0),
            Self::Double(_) => None,
            Self::StepPosition { value, .. } => Some(f64::from(*value)),
            Self::Bitstring(v) => Some(f64::from(*v)),
            Self::Normalized(v) | Self::Float(v) => Some(f64::from(*v)),
            Self::Scaled(v) => Some(f64::from(*v)),
            Self::Counter(c) => Some(f64::from(c.value)),
        }
    }

    /// Convert to bool for determined single and double points.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Single(v) => Some(*v),
            Self::Double(DoublePointValue::Off) => Some(false),
            Self::Double(DoublePointValue::On) => Some(true),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_boolean(&self) -> bool {
        matches!(self, Self::Single(_) | Self::Double(_))
    }

    pub(crate) fn normalized(raw: i16) -> Self {
        Self::Normalized(normalized_to_f32(raw))
    }
}

/// Quality descriptor, packed in its wire layout.
///
/// Bit layout (shared by SIQ, DIQ and QDS):
/// - Bit 0: overflow (OV), QDS only
/// - Bit 4: blocked (BL)
/// - Bit 5: substituted (SB)
/// - Bit 6: not topical (NT)
/// - Bit 7: invalid (IV)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Quality(u8);

impl Quality {
    const OV: u8 = 0x01;
    const BL: u8 = 0x10;
    const SB: u8 = 0x20;
    const NT: u8 = 0x40;
    const IV: u8 = 0x80;
    const SIQ_MASK: u8 = Self::BL | Self::SB | Self::NT | Self::IV;
    const QDS_MASK: u8 = Self::SIQ_MASK | Self::OV;

    /// Good quality (all flags false).
    #[allow(non_upper_case_globals)]
    pub const Good: Self = Self(0);

    /// Invalid quality.
    #[allow(non_upper_case_globals)]
    pub const Invalid: Self = Self(Self::IV);

    /// Extract the quality bits of a SIQ or DIQ byte.
    #[inline]
    pub const fn from_siq(byte: u8) -> Self {
        Self(byte & Self::SIQ_MASK)
    }

    /// Extract the quality bits of a QDS byte.
    #[inline]
    pub const fn from_qds(byte: u8) -> Self {
        Self(byte & Self::QDS_MASK)
    }

    /// Quality bits for a SIQ or DIQ byte. SIQ has no overflow flag.
    pub fn to_siq(self) -> Result<u8> {
        if self.overflow() {
            return Err(Iec104Error::invalid_field(
                "overflow flag not allowed in SIQ/DIQ",
            ));
        }
        Ok(self.0)
    }

    #[inline]
    pub const fn to_qds(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn overflow(&self) -> bool {
        self.0 & Self::OV != 0
    }

    #[inline]
    pub const fn blocked(&self) -> bool {
        self.0 & Self::BL != 0
    }

    #[inline]
    pub const fn substituted(&self) -> bool {
        self.0 & Self::SB != 0
    }

    #[inline]
    pub const fn not_topical(&self) -> bool {
        self.0 & Self::NT != 0
    }

    #[inline]
    pub const fn invalid(&self) -> bool {
        self.0 & Self::IV != 0
    }

    #[inline]
    pub const fn set_overflow(self, value: bool) -> Self {
        self.with(Self::OV, value)
    }

    #[inline]
    pub const fn set_blocked(self, value: bool) -> Self {
        self.with(Self::BL, value)
    }

    #[inline]
    pub const fn set_substituted(self, value: bool) -> Self {
        self.with(Self::SB, value)
    }

    #[inline]
    pub const fn set_not_topical(self, value: bool) -> Self {
        self.with(Self::NT, value)
    }

    #[inline]
    pub const fn set_invalid(self, value: bool) -> Self {
        self.with(Self::IV, value)
    }

    /// Check if the quality is good (all flags false).
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn as_raw(&self) -> u8 {
        self.0
    }

    const fn with(self, mask: u8, value: bool) -> Self {
        if value {
            Self(self.0 | mask)
        } else {
            Self(self.0 & !mask)
        }
    }
}

impl std::fmt::Debug for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Quality({})", self)
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_good() {
            return f.write_str("Good");
        }
        let flags = [
            (self.overflow(), "OV"),
            (self.blocked(), "BL"),
            (self.substituted(), "SB"),
            (self.not_topical(), "NT"),
            (self.invalid(), "IV"),
        ];
        let mut first = true;
        for (set, name) in flags {
            if set {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
