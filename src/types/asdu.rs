//! IEC 60870-5-104 ASDU (Application Service Data Unit).
//!
//! ```text
//! +---------+-----+---------------+------------+----------------+
//! | TypeID  | VSQ | T|PN|COT      | Originator | Common address |
//! | 1 byte  | 1   | 1 byte        | 1 byte     | 2 bytes (LE)   |
//! +---------+-----+---------------+------------+----------------+
//! | IOA (3, LE) | element | time tag | IOA | element | ...       |
//! +-------------------------------------------------------------+
//! ```
//!
//! With SQ=1 only the first object carries an address; object *i* has
//! address `base + i`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Iec104Error, Result};
use crate::types::{
    CommandQualifier, Cot, Cp56Time2a, DoublePointValue, InformationElement, SetpointQualifier,
    TimeTag, TimeTagKind, TypeId, MAX_ASDU_LENGTH, QOI_STATION, TEST_PATTERN,
};

/// Fixed ASDU header size in bytes.
pub const ASDU_HEADER_LENGTH: usize = 6;

/// Highest count the 7-bit VSQ field can carry.
pub const MAX_OBJECTS: u8 = 0x7F;

/// Highest 24-bit information object address.
pub const MAX_IOA: u32 = 0x00FF_FFFF;

/// Broadcast common address.
pub const BROADCAST_ADDRESS: u16 = 0xFFFF;

/// Variable Structure Qualifier (VSQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vsq {
    /// Number of information objects (0-127)
    pub count: u8,
    /// If true, addresses are sequential (SQ=1)
    pub sequence: bool,
}

impl Vsq {
    #[inline]
    pub const fn new(count: u8, sequence: bool) -> Self {
        Self { count, sequence }
    }

    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            count: value & MAX_OBJECTS,
            sequence: (value & 0x80) != 0,
        }
    }

    /// Encode to the wire byte. A count above 127 is a caller error.
    pub fn to_u8(self) -> Result<u8> {
        if self.count > MAX_OBJECTS {
            return Err(Iec104Error::invalid_field(format!(
                "object count {} exceeds {}",
                self.count, MAX_OBJECTS
            )));
        }
        Ok(self.count | if self.sequence { 0x80 } else { 0 })
    }
}

/// Information Object Address (IOA).
///
/// 3-byte address identifying a specific data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Ioa(pub u32);

impl Ioa {
    /// Create IOA from u32 (lower 24 bits).
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value & MAX_IOA)
    }

    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }

    fn decode(buf: &mut impl Buf) -> Self {
        Self(buf.get_uint_le(3) as u32)
    }

    fn encode(self, buf: &mut BytesMut) -> Result<()> {
        if self.0 > MAX_IOA {
            return Err(Iec104Error::invalid_field(format!(
                "IOA {:#x} exceeds 24 bits",
                self.0
            )));
        }
        buf.put_uint_le(u64::from(self.0), 3);
        Ok(())
    }
}

impl std::fmt::Display for Ioa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ASDU header (fixed part).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsduHeader {
    /// Type identification
    pub type_id: TypeId,
    /// Variable structure qualifier
    pub vsq: Vsq,
    /// Cause of transmission
    pub cot: Cot,
    /// Test flag (T)
    pub test: bool,
    /// Negative confirmation flag (P/N)
    pub negative: bool,
    /// Originator address (0 if not used)
    pub originator: u8,
    /// Common address of ASDU (station address)
    pub common_address: u16,
}

impl AsduHeader {
    pub fn new(type_id: TypeId, cot: Cot, common_address: u16) -> Self {
        Self {
            type_id,
            vsq: Vsq::new(0, false),
            cot,
            test: false,
            negative: false,
            originator: 0,
            common_address,
        }
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < ASDU_HEADER_LENGTH {
            return Err(Iec104Error::MalformedHeader(data.len()));
        }
        Ok(Self {
            type_id: TypeId::from_u8(data[0])?,
            vsq: Vsq::from_u8(data[1]),
            cot: Cot::from_u8(data[2])?,
            test: data[2] & 0x80 != 0,
            negative: data[2] & 0x40 != 0,
            originator: data[3],
            common_address: u16::from_le_bytes([data[4], data[5]]),
        })
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.type_id.as_u8());
        buf.put_u8(self.vsq.to_u8()?);
        buf.put_u8(
            self.cot.as_u8()
                | if self.test { 0x80 } else { 0 }
                | if self.negative { 0x40 } else { 0 },
        );
        buf.put_u8(self.originator);
        buf.put_u16_le(self.common_address);
        Ok(())
    }
}

/// One information object: address, element and optional time tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InformationObject {
    pub ioa: Ioa,
    pub element: InformationElement,
    pub time: Option<TimeTag>,
}

impl InformationObject {
    pub const fn new(ioa: Ioa, element: InformationElement) -> Self {
        Self {
            ioa,
            element,
            time: None,
        }
    }

    pub const fn with_time(mut self, time: TimeTag) -> Self {
        self.time = Some(time);
        self
    }
}

/// Complete ASDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    pub header: AsduHeader,
    pub objects: Vec<InformationObject>,
}

impl Asdu {
    /// Build an ASDU, deriving the VSQ from the objects.
    pub fn new(
        type_id: TypeId,
        cot: Cot,
        common_address: u16,
        sequence: bool,
        objects: Vec<InformationObject>,
    ) -> Self {
        let mut header = AsduHeader::new(type_id, cot, common_address);
        header.vsq = Vsq::new(objects.len().min(usize::from(u8::MAX)) as u8, sequence);
        Self { header, objects }
    }

    fn single(type_id: TypeId, cot: Cot, common_address: u16, object: InformationObject) -> Self {
        Self::new(type_id, cot, common_address, false, vec![object])
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.header.type_id
    }

    #[inline]
    pub fn cot(&self) -> Cot {
        self.header.cot
    }

    #[inline]
    pub fn common_address(&self) -> u16 {
        self.header.common_address
    }

    /// Copy of this ASDU with another cause, for confirmations and terminations.
    pub fn mirror(&self, cot: Cot) -> Self {
        let mut asdu = self.clone();
        asdu.header.cot = cot;
        asdu
    }

    /// Decode an ASDU from the bytes following the APCI.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = AsduHeader::decode(data)?;
        let (kind, tag) = header.type_id.layout();
        let count = usize::from(header.vsq.count);
        let sequence = header.vsq.sequence;

        let mut buf = &data[ASDU_HEADER_LENGTH..];
        let mut objects = Vec::with_capacity(count);
        let mut base = 0u32;

        for index in 0..count {
            let carries_address = !sequence || index == 0;
            let needed = (if carries_address { 3 } else { 0 }) + kind.size() + tag.size();
            if buf.remaining() < needed {
                return Err(Iec104Error::TruncatedPayload { index, count });
            }

            let ioa = if carries_address {
                let ioa = Ioa::decode(&mut buf);
                base = ioa.0;
                ioa
            } else {
                let address = base + index as u32;
                if address > MAX_IOA {
                    return Err(Iec104Error::invalid_field(format!(
                        "sequence address {:#x} exceeds 24 bits",
                        address
                    )));
                }
                Ioa(address)
            };

            let element = InformationElement::decode(kind, &mut buf);
            let time = TimeTag::decode(tag, &mut buf);
            objects.push(InformationObject { ioa, element, time });
        }

        if buf.has_remaining() {
            return Err(Iec104Error::invalid_field(format!(
                "{} trailing bytes after {} objects",
                buf.remaining(),
                count
            )));
        }

        Ok(Self { header, objects })
    }

    /// Encode to wire bytes, validating every field against the type layout.
    pub fn encode(&self) -> Result<Bytes> {
        let (kind, tag) = self.header.type_id.layout();
        if usize::from(self.header.vsq.count) != self.objects.len() {
            return Err(Iec104Error::invalid_field(format!(
                "VSQ count {} does not match {} objects",
                self.header.vsq.count,
                self.objects.len()
            )));
        }

        let per_object = kind.size() + tag.size();
        let mut buf = BytesMut::with_capacity(
            ASDU_HEADER_LENGTH + self.objects.len() * (3 + per_object),
        );
        self.header.encode(&mut buf)?;

        let sequence = self.header.vsq.sequence;
        let base = self.objects.first().map(|o| o.ioa.0).unwrap_or_default();

        for (index, object) in self.objects.iter().enumerate() {
            if object.element.kind() != kind {
                return Err(Iec104Error::invalid_field(format!(
                    "{:?} element in {} ASDU",
                    object.element.kind(),
                    self.header.type_id
                )));
            }
            let object_tag = object.time.map_or(TimeTagKind::None, |t| t.kind());
            if object_tag != tag {
                return Err(Iec104Error::invalid_field(format!(
                    "{:?} time tag in {} ASDU",
                    object_tag, self.header.type_id
                )));
            }

            if !sequence || index == 0 {
                object.ioa.encode(&mut buf)?;
            } else if u64::from(object.ioa.0) != u64::from(base) + index as u64 {
                return Err(Iec104Error::invalid_field(format!(
                    "IOA {} breaks the sequence starting at {}",
                    object.ioa, base
                )));
            }

            object.element.encode(&mut buf)?;
            if let Some(time) = &object.time {
                time.encode(&mut buf)?;
            }
        }

        if buf.len() > MAX_ASDU_LENGTH {
            return Err(Iec104Error::invalid_field(format!(
                "encoded ASDU is {} bytes, limit is {}",
                buf.len(),
                MAX_ASDU_LENGTH
            )));
        }
        Ok(buf.freeze())
    }

    // ----- outbound commands -----

    /// C_IC_NA_1, activation.
    pub fn interrogation_command(common_address: u16, qoi: u8) -> Self {
        Self::single(
            TypeId::InterrogationCommand,
            Cot::Activation,
            common_address,
            InformationObject::new(Ioa(0), InformationElement::Interrogation { qoi }),
        )
    }

    /// Station interrogation (QOI 20).
    pub fn general_interrogation(common_address: u16) -> Self {
        Self::interrogation_command(common_address, QOI_STATION)
    }

    /// C_CI_NA_1, activation.
    pub fn counter_interrogation_command(common_address: u16, qcc: u8) -> Self {
        Self::single(
            TypeId::CounterInterrogation,
            Cot::Activation,
            common_address,
            InformationObject::new(Ioa(0), InformationElement::CounterInterrogation { qcc }),
        )
    }

    /// C_RD_NA_1, request.
    pub fn read_command(common_address: u16, ioa: Ioa) -> Self {
        Self::single(
            TypeId::ReadCommand,
            Cot::Request,
            common_address,
            InformationObject::new(ioa, InformationElement::Read),
        )
    }

    /// C_CS_NA_1, activation.
    pub fn clock_sync_command(common_address: u16, time: Cp56Time2a) -> Self {
        Self::single(
            TypeId::ClockSync,
            Cot::Activation,
            common_address,
            InformationObject::new(Ioa(0), InformationElement::ClockSync(time)),
        )
    }

    /// C_TS_NA_1 with the fixed test pattern.
    pub fn test_command(common_address: u16) -> Self {
        Self::single(
            TypeId::TestCommand,
            Cot::Activation,
            common_address,
            InformationObject::new(Ioa(0), InformationElement::TestPattern(TEST_PATTERN)),
        )
    }

    /// C_TS_TA_1: test sequence counter plus time tag.
    pub fn test_command_with_time(common_address: u16, counter: u16, time: Cp56Time2a) -> Self {
        Self::single(
            TypeId::TestCommandTime56,
            Cot::Activation,
            common_address,
            InformationObject::new(Ioa(0), InformationElement::TestCounter(counter))
                .with_time(TimeTag::Cp56(time)),
        )
    }

    /// C_RP_NA_1, activation.
    pub fn reset_process_command(common_address: u16, qrp: u8) -> Self {
        Self::single(
            TypeId::ResetProcess,
            Cot::Activation,
            common_address,
            InformationObject::new(Ioa(0), InformationElement::ResetProcess { qrp }),
        )
    }

    /// C_CD_NA_1, activation.
    pub fn delay_acquisition_command(common_address: u16, milliseconds: u16) -> Self {
        Self::single(
            TypeId::DelayAcquisition,
            Cot::Activation,
            common_address,
            InformationObject::new(Ioa(0), InformationElement::DelayAcquisition(milliseconds)),
        )
    }

    /// C_SC_NA_1, select or execute.
    pub fn single_command(common_address: u16, ioa: Ioa, value: bool, select: bool) -> Self {
        Self::single(
            TypeId::SingleCommand,
            Cot::Activation,
            common_address,
            InformationObject::new(
                ioa,
                InformationElement::SingleCommand {
                    value,
                    qualifier: command_qualifier(select),
                },
            ),
        )
    }

    /// C_DC_NA_1, select or execute.
    pub fn double_command(
        common_address: u16,
        ioa: Ioa,
        value: DoublePointValue,
        select: bool,
    ) -> Self {
        Self::single(
            TypeId::DoubleCommand,
            Cot::Activation,
            common_address,
            InformationObject::new(
                ioa,
                InformationElement::DoubleCommand {
                    value,
                    qualifier: command_qualifier(select),
                },
            ),
        )
    }

    /// C_SE_NC_1, select or execute.
    pub fn setpoint_float_command(common_address: u16, ioa: Ioa, value: f32, select: bool) -> Self {
        Self::single(
            TypeId::SetpointFloat,
            Cot::Activation,
            common_address,
            InformationObject::new(
                ioa,
                InformationElement::SetpointFloat {
                    value,
                    qualifier: SetpointQualifier {
                        qualifier: 0,
                        select,
                    },
                },
            ),
        )
    }
}

fn command_qualifier(select: bool) -> CommandQualifier {
    if select {
        CommandQualifier::select()
    } else {
        CommandQualifier::execute()
    }
}
