//! # iec104_link
//!
//! IEC 60870-5-104 protocol engine for Rust.
//!
//! The crate covers both stations of a 104 link:
//!
//! - **ASDU codec**: typed information objects for the monitoring, control
//!   and system catalogue, with byte-exact encode and decode
//! - **APCI framing**: I-, S- and U-frames as a `tokio_util` codec
//! - **Link state machine**: sequence numbers, the k/w windows and the
//!   t1/t2/t3 timers, independent of any socket
//! - **Client**: dial, STARTDT handshake, reconnect supervision and a command API
//! - **Server**: accept loop with one engine per connection
//! - **TLS** behind the `tls` feature
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use iec104_link::{ClientOption, Iec104Client, NoopHandler};
//!
//! #[tokio::main]
//! async fn main() -> iec104_link::Result<()> {
//!     let option = ClientOption::new("192.168.1.100:2404", Arc::new(NoopHandler))?;
//!     let mut client = Iec104Client::new(option);
//!     let mut events = client.subscribe().unwrap();
//!
//!     // Connect and start data transfer
//!     client.connect().await?;
//!
//!     // Request general interrogation
//!     client.general_interrogation(1).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Received ASDUs are delivered to a [`Handler`]; [`parse_asdu`] flattens
//! monitoring data into [`DataPoint`]s.
//!
//! ## Protocol Overview
//!
//! IEC 60870-5-104 uses TCP/IP for communication (default port 2404).
//! The protocol defines three frame types:
//!
//! - **I-frame**: Information transfer (contains ASDU)
//! - **S-frame**: Supervisory (acknowledgment)
//! - **U-frame**: Unnumbered (control: STARTDT, STOPDT, TESTFR)
//!
//! ### APDU Structure
//!
//! ```text
//! APCI (6 bytes):
//! +--------+--------+--------+--------+--------+--------+
//! | 0x68   | Length | Control Field (4 bytes)           |
//! +--------+--------+--------+--------+--------+--------+
//! ASDU (up to 249 bytes):
//! +--------+--------+--------+--------+--------+--------+------------
//! | Type   | VSQ    | COT    | Orig.  | Common Address  | Objects ...
//! +--------+--------+--------+--------+--------+--------+------------
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod parser;
pub mod server;
pub mod transport;
pub mod types;

// Re-export main types
pub use client::{ClientOption, Iec104Client, Iec104Event, LinkHook, ReconnectRule};
pub use codec::{Apdu, Iec104Codec};
pub use connection::LinkHandle;
pub use dispatch::{Dispatcher, Handler, NoopHandler};
pub use error::{HandlerResult, Iec104Error, Result};
pub use link::{LinkConfig, LinkSession, LinkState};
pub use parser::parse_asdu;
pub use server::Server;
#[cfg(feature = "tls")]
pub use transport::{TlsClientConfig, TlsServerConfig};
pub use types::*;

/// Re-exported so handler implementations need no direct dependency.
pub use async_trait::async_trait;
