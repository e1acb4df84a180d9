//! Admin-side transfer engine.
//!
//! The [`ReceiverEngine`] accepts customer connections on the admin's
//! persisted identity, keeps one registry entry per customer with the files
//! it announced, and exposes the operator actions: request a download,
//! approve or reject a print, close a customer and export completed files
//! as a zip.

mod engine;
mod error;
pub mod pairing;
pub mod print;
mod registry;
mod types;

pub use engine::{PrintAction, ReceiverEngine};
pub use error::{ProtocolViolation, ReceiverError};
pub use pairing::{PairingCode, PairingError, load_or_create_identity};
pub use print::{PrintError, PrintJob, PrintSink, SpoolDirPrinter};
pub use registry::customer_label;
pub use types::{
    CustomerSnapshot, FileTarget, PrintRequest, ReceivedFile, ReceivedFileStatus, ReceiverConfig,
    ReceiverEvent,
};

pub use printlink_export::{Archive, ExportError};
