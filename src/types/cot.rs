//! IEC 60870-5-104 Cause of Transmission (COT).
//!
//! The cause occupies the low six bits of the third ASDU header byte; the
//! test and P/N flags share that byte and live in [`AsduHeader`](super::AsduHeader).

use crate::error::{Iec104Error, Result};

/// Highest value the 6-bit cause field can carry.
pub const COT_MAX: u8 = 0x3F;

macro_rules! cot_catalogue {
    ($($(#[$doc:meta])* $variant:ident = $value:literal => $mnemonic:literal,)+) => {
        /// Cause of Transmission.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Cot {
            $($(#[$doc])* $variant = $value,)+
        }

        impl Cot {
            /// Decode the cause from a header byte. The T and P/N bits are ignored.
            pub fn from_u8(value: u8) -> Result<Self> {
                match value & COT_MAX {
                    $($value => Ok(Self::$variant),)+
                    other => Err(Iec104Error::UnknownCot(other)),
                }
            }

            /// Standard mnemonic, e.g. `spont` or `actcon`.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $(Self::$variant => $mnemonic,)+
                }
            }
        }
    };
}

cot_catalogue! {
    /// Periodic, cyclic
    Periodic = 1 => "per/cyc",
    /// Background scan
    Background = 2 => "back",
    /// Spontaneous
    Spontaneous = 3 => "spont",
    /// Initialized
    Initialized = 4 => "init",
    /// Request or requested
    Request = 5 => "req",
    /// Activation
    Activation = 6 => "act",
    /// Activation confirmation
    ActivationConfirm = 7 => "actcon",
    /// Deactivation
    Deactivation = 8 => "deact",
    /// Deactivation confirmation
    DeactivationConfirm = 9 => "deactcon",
    /// Activation termination
    ActivationTermination = 10 => "actterm",
    /// Return information caused by a remote command
    ReturnRemoteCommand = 11 => "retrem",
    /// Return information caused by a local command
    ReturnLocalCommand = 12 => "retloc",
    /// File transfer
    FileTransfer = 13 => "file",
    /// Interrogated by station interrogation
    InterrogatedByStation = 20 => "inrogen",
    InterrogatedByGroup1 = 21 => "inro1",
    InterrogatedByGroup2 = 22 => "inro2",
    InterrogatedByGroup3 = 23 => "inro3",
    InterrogatedByGroup4 = 24 => "inro4",
    InterrogatedByGroup5 = 25 => "inro5",
    InterrogatedByGroup6 = 26 => "inro6",
    InterrogatedByGroup7 = 27 => "inro7",
    InterrogatedByGroup8 = 28 => "inro8",
    InterrogatedByGroup9 = 29 => "inro9",
    InterrogatedByGroup10 = 30 => "inro10",
    InterrogatedByGroup11 = 31 => "inro11",
    InterrogatedByGroup12 = 32 => "inro12",
    InterrogatedByGroup13 = 33 => "inro13",
    InterrogatedByGroup14 = 34 => "inro14",
    InterrogatedByGroup15 = 35 => "inro15",
    InterrogatedByGroup16 = 36 => "inro16",
    /// Requested by general counter request
    RequestedByGeneralCounter = 37 => "reqcogen",
    RequestedByGroup1Counter = 38 => "reqco1",
    RequestedByGroup2Counter = 39 => "reqco2",
    RequestedByGroup3Counter = 40 => "reqco3",
    RequestedByGroup4Counter = 41 => "reqco4",
    /// Unknown type identification
    UnknownTypeId = 44 => "uknown_type",
    /// Unknown cause of transmission
    UnknownCot = 45 => "uknown_cause",
    /// Unknown common address of ASDU
    UnknownCommonAddress = 46 => "uknown_asdu_address",
    /// Unknown information object address
    UnknownIoa = 47 => "uknown_object_address",
}

impl Cot {
    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Confirmation or termination of a previously activated command.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        matches!(
            self,
            Self::ActivationConfirm | Self::DeactivationConfirm | Self::ActivationTermination
        )
    }

    /// Mirror causes a station uses to reject a request it cannot serve.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        matches!(
            self,
            Self::UnknownTypeId | Self::UnknownCot | Self::UnknownCommonAddress | Self::UnknownIoa
        )
    }

    #[inline]
    pub const fn is_interrogation_response(&self) -> bool {
        matches!(self.as_u8(), 20..=36)
    }

    #[inline]
    pub const fn is_counter_response(&self) -> bool {
        matches!(self.as_u8(), 37..=41)
    }
}

impl std::fmt::Display for Cot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cot_from_u8() {
        assert_eq!(Cot::from_u8(3).unwrap(), Cot::Spontaneous);
        assert_eq!(Cot::from_u8(6).unwrap(), Cot::Activation);
        assert_eq!(Cot::from_u8(20).unwrap(), Cot::InterrogatedByStation);
        assert_eq!(Cot::from_u8(47).unwrap(), Cot::UnknownIoa);
    }

    #[test]
    fn test_cot_catalogue_roundtrip() {
        let valid = (1..=13).chain(20..=41).chain(44..=47);
        for val in valid {
            let cot = Cot::from_u8(val).unwrap();
            assert_eq!(cot.as_u8(), val, "Roundtrip failed for value {}", val);
        }
    }

    #[test]
    fn test_cot_gaps_are_unknown() {
        for val in [0u8, 14, 19, 42, 43, 48, 63] {
            assert!(
                matches!(Cot::from_u8(val), Err(Iec104Error::UnknownCot(v)) if v == val),
                "Expected UnknownCot for {}",
                val
            );
        }
    }

    #[test]
    fn test_cot_flag_bits_ignored() {
        // T (0x80) and P/N (0x40) share the byte with the cause
        assert_eq!(Cot::from_u8(0x43).unwrap(), Cot::Spontaneous);
        assert_eq!(Cot::from_u8(0x86).unwrap(), Cot::Activation);
        assert_eq!(Cot::from_u8(0xC7).unwrap(), Cot::ActivationConfirm);
    }

    #[test]
    fn test_cot_classification() {
        assert!(Cot::ActivationConfirm.is_positive());
        assert!(Cot::ActivationTermination.is_positive());
        assert!(!Cot::Activation.is_positive());

        assert!(Cot::UnknownTypeId.is_negative());
        assert!(!Cot::Spontaneous.is_negative());

        assert!(Cot::InterrogatedByGroup16.is_interrogation_response());
        assert!(!Cot::RequestedByGeneralCounter.is_interrogation_response());
        assert!(Cot::RequestedByGroup4Counter.is_counter_response());
    }

    #[test]
    fn test_cot_display() {
        assert_eq!(Cot::Spontaneous.to_string(), "spont");
        assert_eq!(Cot::ActivationConfirm.to_string(), "actcon");
        assert_eq!(Cot::InterrogatedByStation.to_string(), "inrogen");
    }
}
