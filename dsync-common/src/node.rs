//! DICOM application entity descriptors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transfer syntax proposed when talking to a remote node.
///
/// Unknown names fall back to JPEG 2000 Lossless, matching the default used
/// for freshly configured nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransferSyntax {
    #[default]
    Jpeg2000Lossless,
    ExplicitVrLittleEndian,
    ImplicitVrLittleEndian,
}

impl TransferSyntax {
    pub fn name(&self) -> &'static str {
        match self {
            TransferSyntax::Jpeg2000Lossless => "JPEG2000Lossless",
            TransferSyntax::ExplicitVrLittleEndian => "ExplicitVRLittleEndian",
            TransferSyntax::ImplicitVrLittleEndian => "ImplicitVRLittleEndian",
        }
    }
}

impl From<String> for TransferSyntax {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ExplicitVRLittleEndian" => TransferSyntax::ExplicitVrLittleEndian,
            "ImplicitVRLittleEndian" => TransferSyntax::ImplicitVrLittleEndian,
            _ => TransferSyntax::Jpeg2000Lossless,
        }
    }
}

impl From<TransferSyntax> for String {
    fn from(value: TransferSyntax) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for TransferSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// C-MOVE destination: how a remote node addresses the local archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub ae_title: String,
    pub ip_address: String,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.ae_title, self.ip_address, self.port)
    }
}

/// A configured DICOM node (the local archive or one of the remotes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DicomNode {
    pub name: String,
    pub ae_title: String,
    pub ip_address: String,
    pub port: u16,
    #[serde(default)]
    pub transfer_syntax: TransferSyntax,
    /// Per-remote override of how this remote knows the local archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_config: Option<Destination>,
}

impl DicomNode {
    pub fn new(
        name: impl Into<String>,
        ae_title: impl Into<String>,
        ip_address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            ae_title: ae_title.into(),
            ip_address: ip_address.into(),
            port,
            transfer_syntax: TransferSyntax::default(),
            local_config: None,
        }
    }

    /// Destination this node is addressed as when it is the C-MOVE target
    pub fn as_destination(&self) -> Destination {
        Destination {
            ae_title: self.ae_title.clone(),
            ip_address: self.ip_address.clone(),
            port: self.port,
        }
    }

    /// Resolve the C-MOVE destination a remote should send to.
    ///
    /// The remote's own `local_config` wins; otherwise the local node itself.
    pub fn move_destination(&self, local: &DicomNode) -> Destination {
        self.local_config
            .clone()
            .unwrap_or_else(|| local.as_destination())
    }
}

impl fmt::Display for DicomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}@{}:{}, {})",
            self.name, self.ae_title, self.ip_address, self.port, self.transfer_syntax
        )
    }
}
