//! IEC 60870-5-104 codec for tokio.
//!
//! Frames are `0x68 | length | control field (4) | ASDU`. The length byte
//! counts everything after itself, so a frame boundary is known as soon as
//! two bytes are buffered. There is no resynchronisation: a wrong start byte,
//! an impossible length or an unknown U function is fatal to the stream.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Iec104Error, Result};
use crate::types::{
    Apci, Asdu, SeqNum, UFunction, CONTROL_FIELD_LENGTH, MAX_APDU_LENGTH, MAX_ASDU_LENGTH,
    MIN_APDU_LENGTH, START_BYTE,
};

/// An IEC 104 APDU (Application Protocol Data Unit).
///
/// The ASDU stays encoded; S- and U-frames carry an empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub apci: Apci,
    pub asdu: Bytes,
}

impl Apdu {
    pub fn i_frame(send_seq: SeqNum, recv_seq: SeqNum, asdu: Bytes) -> Self {
        Self {
            apci: Apci::i_frame(send_seq, recv_seq),
            asdu,
        }
    }

    pub fn s_frame(recv_seq: SeqNum) -> Self {
        Self {
            apci: Apci::s_frame(recv_seq),
            asdu: Bytes::new(),
        }
    }

    pub fn u_frame(function: UFunction) -> Self {
        Self {
            apci: Apci::u_frame(function),
            asdu: Bytes::new(),
        }
    }

    /// Decode the carried ASDU.
    pub fn decode_asdu(&self) -> Result<Asdu> {
        Asdu::decode(&self.asdu)
    }
}

impl std::fmt::Display for Apdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apci)?;
        if !self.asdu.is_empty() {
            write!(f, " +{}B", self.asdu.len())?;
        }
        Ok(())
    }
}

/// IEC 60870-5-104 framing codec.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use iec104_link::codec::{Apdu, Iec104Codec};
///
/// let stream = TcpStream::connect("192.168.1.100:2404").await?;
/// let mut framed = Framed::new(stream, Iec104Codec::new());
/// framed.send(Apdu::u_frame(UFunction::StartDtAct)).await?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Iec104Codec;

impl Iec104Codec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Iec104Codec {
    type Item = Apdu;
    type Error = Iec104Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.is_empty() {
            return Ok(None);
        }
        if src[0] != START_BYTE {
            return Err(Iec104Error::invalid_frame(format!(
                "expected start byte 0x68, got {:#04x}",
                src[0]
            )));
        }
        if src.len() < 2 {
            return Ok(None);
        }

        let length = usize::from(src[1]);
        if !(MIN_APDU_LENGTH..=MAX_APDU_LENGTH).contains(&length) {
            return Err(Iec104Error::invalid_frame(format!(
                "APDU length {} outside {}..={}",
                length, MIN_APDU_LENGTH, MAX_APDU_LENGTH
            )));
        }

        let total = 2 + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(2);
        let apci = Apci::parse(&frame[..CONTROL_FIELD_LENGTH])?;
        frame.advance(CONTROL_FIELD_LENGTH);
        let asdu = frame.freeze();

        match (apci.is_i_frame(), asdu.is_empty()) {
            (true, true) => Err(Iec104Error::invalid_frame("I-frame without ASDU")),
            (false, false) => Err(Iec104Error::invalid_frame(format!(
                "{} carries {} payload bytes",
                apci,
                asdu.len()
            ))),
            _ => Ok(Some(Apdu { apci, asdu })),
        }
    }
}

impl Encoder<Apdu> for Iec104Codec {
    type Error = Iec104Error;

    fn encode(&mut self, item: Apdu, dst: &mut BytesMut) -> Result<()> {
        let asdu_len = item.asdu.len();
        if asdu_len > MAX_ASDU_LENGTH {
            return Err(Iec104Error::Codec(format!(
                "ASDU of {} bytes exceeds {}",
                asdu_len, MAX_ASDU_LENGTH
            )));
        }
        if item.apci.is_i_frame() == item.asdu.is_empty() {
            return Err(Iec104Error::Codec(format!(
                "{} with {} payload bytes",
                item.apci, asdu_len
            )));
        }

        let header = item.apci.encode_header(asdu_len)?;
        dst.reserve(header.len() + asdu_len);
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&item.asdu);
        Ok(())
    }
}
