//! Flatten decoded ASDUs into data points.
//!
//! Only monitoring information becomes a [`DataPoint`]; commands and system
//! messages are answered by handlers, not stored as signals.

use crate::types::{Asdu, DataPoint, DataValue, InformationElement, InformationObject, Quality};

/// Convert the information objects of a monitoring ASDU into data points.
///
/// # Example
///
/// ```rust,ignore
/// let asdu = Asdu::decode(&payload)?;
/// for point in parse_asdu(&asdu) {
///     println!("IOA {}: {:?} ({})", point.ioa, point.value, point.quality);
/// }
/// ```
pub fn parse_asdu(asdu: &Asdu) -> Vec<DataPoint> {
    if !asdu.type_id().is_monitoring() {
        return Vec::new();
    }
    asdu.objects.iter().filter_map(to_data_point).collect()
}

fn to_data_point(object: &InformationObject) -> Option<DataPoint> {
    let (value, quality) = match object.element {
        InformationElement::SinglePoint { value, quality } => (DataValue::Single(value), quality),
        InformationElement::DoublePoint { value, quality } => (DataValue::Double(value), quality),
        InformationElement::StepPosition { value, quality } => (
            DataValue::StepPosition {
                value: value.value,
                transient: value.transient,
            },
            quality,
        ),
        InformationElement::Bitstring { value, quality } => (DataValue::Bitstring(value), quality),
        InformationElement::Normalized { value, quality } => (DataValue::normalized(value), quality),
        InformationElement::NormalizedNoQuality(value) => (DataValue::normalized(value), Quality::Good),
        InformationElement::Scaled { value, quality } => (DataValue::Scaled(value), quality),
        InformationElement::Float { value, quality } => (DataValue::Float(value), quality),
        InformationElement::Counter(counter) => {
            let quality = if counter.invalid {
                Quality::Invalid
            } else {
                Quality::Good
            };
            (DataValue::Counter(counter), quality)
        }
        _ => return None,
    };

    Some(
        DataPoint::new(object.ioa.value(), value)
            .with_quality(quality)
            .with_timestamp(object.time),
    )
}
