//! IEC 60870-5-104 type identifications.
//!
//! The catalogue is one table: wire code, standard name and the element
//! layout every object of the type carries.

use crate::error::{Iec104Error, Result};
use crate::types::{ElementKind, TimeTagKind};

macro_rules! catalogue {
    ($(
        $(#[$doc:meta])*
        $variant:ident = $code:literal => $name:ident, $kind:ident, $tag:ident;
    )*) => {
        /// IEC 60870-5-104 Type Identification.
        ///
        /// Variants without their own doc are the CP56Time2a-tagged forms
        /// of the preceding types.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum TypeId {
            $( $(#[$doc])* $variant = $code, )*
        }

        /// All type identifications of the catalogue, in ascending order.
        pub const ALL_TYPE_IDS: [TypeId; 48] = [$( TypeId::$variant, )*];

        impl TypeId {
            /// Look up a wire code.
            pub fn from_u8(value: u8) -> Result<Self> {
                match value {
                    $( $code => Ok(Self::$variant), )*
                    _ => Err(Iec104Error::UnknownTypeId(value)),
                }
            }

            /// Standard mnemonic, e.g. `M_SP_NA_1`.
            pub const fn standard_name(&self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($name), )*
                }
            }

            /// Element shape and trailing time tag of every object of this type.
            pub const fn layout(&self) -> (ElementKind, TimeTagKind) {
                match self {
                    $( Self::$variant => (ElementKind::$kind, TimeTagKind::$tag), )*
                }
            }
        }
    };
}

catalogue! {
    // monitoring, process information
    /// Single-point information (M_SP_NA_1)
    SinglePoint = 1 => M_SP_NA_1, SinglePoint, None;
    /// Single-point information with CP24Time2a (M_SP_TA_1)
    SinglePointTime24 = 2 => M_SP_TA_1, SinglePoint, Cp24;
    /// Double-point information (M_DP_NA_1)
    DoublePoint = 3 => M_DP_NA_1, DoublePoint, None;
    /// Double-point information with CP24Time2a (M_DP_TA_1)
    DoublePointTime24 = 4 => M_DP_TA_1, DoublePoint, Cp24;
    /// Step position (M_ST_NA_1)
    StepPosition = 5 => M_ST_NA_1, StepPosition, None;
    /// Step position with CP24Time2a (M_ST_TA_1)
    StepPositionTime24 = 6 => M_ST_TA_1, StepPosition, Cp24;
    /// 32-bit bitstring (M_BO_NA_1)
    Bitstring32 = 7 => M_BO_NA_1, Bitstring, None;
    /// 32-bit bitstring with CP24Time2a (M_BO_TA_1)
    Bitstring32Time24 = 8 => M_BO_TA_1, Bitstring, Cp24;
    /// Normalized measurement (M_ME_NA_1)
    MeasuredNormalized = 9 => M_ME_NA_1, Normalized, None;
    /// Normalized measurement with CP24Time2a (M_ME_TA_1)
    MeasuredNormalizedTime24 = 10 => M_ME_TA_1, Normalized, Cp24;
    /// Scaled measurement (M_ME_NB_1)
    MeasuredScaled = 11 => M_ME_NB_1, Scaled, None;
    /// Scaled measurement with CP24Time2a (M_ME_TB_1)
    MeasuredScaledTime24 = 12 => M_ME_TB_1, Scaled, Cp24;
    /// Short float measurement (M_ME_NC_1)
    MeasuredFloat = 13 => M_ME_NC_1, Float, None;
    /// Short float measurement with CP24Time2a (M_ME_TC_1)
    MeasuredFloatTime24 = 14 => M_ME_TC_1, Float, Cp24;
    /// Integrated totals (M_IT_NA_1)
    IntegratedTotals = 15 => M_IT_NA_1, Counter, None;
    /// Integrated totals with CP24Time2a (M_IT_TA_1)
    IntegratedTotalsTime24 = 16 => M_IT_TA_1, Counter, Cp24;
    /// Normalized measurement without quality descriptor (M_ME_ND_1)
    MeasuredNormalizedNoQuality = 21 => M_ME_ND_1, NormalizedNoQuality, None;
    SinglePointTime56 = 30 => M_SP_TB_1, SinglePoint, Cp56;
    DoublePointTime56 = 31 => M_DP_TB_1, DoublePoint, Cp56;
    StepPositionTime56 = 32 => M_ST_TB_1, StepPosition, Cp56;
    Bitstring32Time56 = 33 => M_BO_TB_1, Bitstring, Cp56;
    MeasuredNormalizedTime56 = 34 => M_ME_TD_1, Normalized, Cp56;
    MeasuredScaledTime56 = 35 => M_ME_TE_1, Scaled, Cp56;
    MeasuredFloatTime56 = 36 => M_ME_TF_1, Float, Cp56;
    IntegratedTotalsTime56 = 37 => M_IT_TB_1, Counter, Cp56;

    // control, process information
    /// Single command (C_SC_NA_1)
    SingleCommand = 45 => C_SC_NA_1, SingleCommand, None;
    /// Double command (C_DC_NA_1)
    DoubleCommand = 46 => C_DC_NA_1, DoubleCommand, None;
    /// Regulating step command (C_RC_NA_1)
    RegulatingStep = 47 => C_RC_NA_1, RegulatingStep, None;
    /// Normalized set-point (C_SE_NA_1)
    SetpointNormalized = 48 => C_SE_NA_1, SetpointNormalized, None;
    /// Scaled set-point (C_SE_NB_1)
    SetpointScaled = 49 => C_SE_NB_1, SetpointScaled, None;
    /// Short float set-point (C_SE_NC_1)
    SetpointFloat = 50 => C_SE_NC_1, SetpointFloat, None;
    /// 32-bit bitstring command (C_BO_NA_1)
    Bitstring32Command = 51 => C_BO_NA_1, BitstringCommand, None;
    SingleCommandTime56 = 58 => C_SC_TA_1, SingleCommand, Cp56;
    DoubleCommandTime56 = 59 => C_DC_TA_1, DoubleCommand, Cp56;
    RegulatingStepTime56 = 60 => C_RC_TA_1, RegulatingStep, Cp56;
    SetpointNormalizedTime56 = 61 => C_SE_TA_1, SetpointNormalized, Cp56;
    SetpointScaledTime56 = 62 => C_SE_TB_1, SetpointScaled, Cp56;
    SetpointFloatTime56 = 63 => C_SE_TC_1, SetpointFloat, Cp56;
    Bitstring32CommandTime56 = 64 => C_BO_TA_1, BitstringCommand, Cp56;

    // monitoring, system information
    /// End of initialization (M_EI_NA_1)
    EndOfInit = 70 => M_EI_NA_1, EndOfInit, None;

    // control, system information
    /// Interrogation (C_IC_NA_1)
    InterrogationCommand = 100 => C_IC_NA_1, Interrogation, None;
    /// Counter interrogation (C_CI_NA_1)
    CounterInterrogation = 101 => C_CI_NA_1, CounterInterrogation, None;
    /// Read (C_RD_NA_1)
    ReadCommand = 102 => C_RD_NA_1, Read, None;
    /// Clock synchronization (C_CS_NA_1)
    ClockSync = 103 => C_CS_NA_1, ClockSync, None;
    /// Test (C_TS_NA_1)
    TestCommand = 104 => C_TS_NA_1, TestPattern, None;
    /// Reset process (C_RP_NA_1)
    ResetProcess = 105 => C_RP_NA_1, ResetProcess, None;
    /// Delay acquisition (C_CD_NA_1)
    DelayAcquisition = 106 => C_CD_NA_1, DelayAcquisition, None;
    /// Test with counter and CP56Time2a (C_TS_TA_1)
    TestCommandTime56 = 107 => C_TS_TA_1, TestCounter, Cp56;
}

impl TypeId {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Sent by the controlled station.
    #[inline]
    pub const fn is_monitoring(&self) -> bool {
        matches!(self.as_u8(), 1..=44 | 70)
    }

    /// Sent by the controlling station.
    #[inline]
    pub const fn is_control(&self) -> bool {
        matches!(self.as_u8(), 45..=69 | 100..=107)
    }

    /// Whether each element is followed by a time tag.
    #[inline]
    pub const fn has_time_tag(&self) -> bool {
        !matches!(self.layout().1, TimeTagKind::None)
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.standard_name())
    }
}
