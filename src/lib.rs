//! Proximity presentment for ISO/IEC 18013-5 mobile documents.
//!
//! This crate runs the device-retrieval session between a holder (the mdoc) and a reader:
//! device engagement, ephemeral key agreement, encrypted and counter-protected session
//! messages, and fragmentation over whatever radio the platform provides. What is
//! carried inside the session (requests, responses, document schemas) is up to the caller.
//!
//! ```text
//!   holder                                         reader
//!     │ SessionManagerInit::initialise                 │
//!     │──────── QR `mdoc:` URI / NFC handover ───────▶ │ SessionManagerEngaged::from_qr_code
//!     │ Session::start_as_holder   ◀── transport ───▶  │ Session::start_as_reader
//!     │ ◀──── SessionEstablishment (key + request) ──── │ send
//!     │ receive ─────────── SessionData ─────────────▶ │ receive
//!     │                         ...                     │
//!     │ ◀──────────────── status 20 ─────────────────── │ terminate
//! ```
//!
//! Engagement on its own is synchronous:
//!
//! ```
//! use isomdl_proximity::definitions::{BleOptions, ConnectionMethod, PeripheralServerMode};
//! use isomdl_proximity::presentation::{device, reader};
//!
//! let methods = vec![ConnectionMethod::Ble(BleOptions {
//!     peripheral_server_mode: Some(PeripheralServerMode {
//!         uuid: uuid::Uuid::new_v4(),
//!         ble_device_address: None,
//!     }),
//!     central_client_mode: None,
//! })];
//! let (holder, qr_code) = device::SessionManagerInit::initialise(methods, None)?.qr_engagement();
//! let reader = reader::SessionManagerEngaged::from_qr_code(&qr_code)?;
//! assert_eq!(
//!     reader.device_engagement().inner_bytes,
//!     holder.device_engagement().inner_bytes
//! );
//! # Ok::<(), isomdl_proximity::error::SessionError>(())
//! ```
//!
//! The session itself is async; see [presentation::session::Session].
pub mod cbor;
pub mod config;
pub mod definitions;
pub mod error;
pub mod presentation;
pub mod transport;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
