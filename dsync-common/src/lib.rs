//! # dicom-sync common library
//!
//! Shared code for the dicom-sync workspace:
//! - Error and Result types
//! - TOML configuration model and file resolution
//! - DICOM node descriptors
//! - Clock abstraction and DICOM date/time helpers

pub mod config;
pub mod error;
pub mod node;
pub mod time;

pub use error::{Error, Result};
pub use node::{Destination, DicomNode, TransferSyntax};
