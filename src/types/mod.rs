//! IEC 60870-5-104 type definitions.
//!
//! - `Apci`, `UFunction`, `SeqNum` - link-layer control information
//! - `TypeId` - type identification catalogue and element layouts
//! - `Cot` - cause of transmission
//! - `Asdu`, `InformationObject` - application data units and their codec
//! - `InformationElement`, time tags and qualifiers
//! - `DataPoint`, `DataValue`, `Quality` - flattened monitoring view

mod apci;
mod asdu;
mod cot;
mod data;
mod element;
mod type_id;

pub use apci::*;
pub use asdu::*;
pub use cot::*;
pub use data::*;
pub use element::*;
pub use type_id::*;
