//! dcmtk command-line adapter
//!
//! Implements [`InventoryQuery`] with `findscu` and [`NetworkTransfer`] with
//! `movescu` (Study Root Query/Retrieve). Responses are recovered from the
//! verbose dataset dumps the tools print.

use super::{InventoryQuery, NetworkTransfer, ServiceError};
use crate::models::{SeriesRecord, StudyRecord};
use async_trait::async_trait;
use dsync_common::config::DcmtkSettings;
use dsync_common::{Destination, DicomNode, TransferSyntax};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

mod tag {
    pub const SOP_INSTANCE_UID: &str = "0008,0018";
    pub const STUDY_DATE: &str = "0008,0020";
    pub const STUDY_TIME: &str = "0008,0030";
    pub const MODALITY: &str = "0008,0060";
    pub const STUDY_DESCRIPTION: &str = "0008,1030";
    pub const SERIES_DESCRIPTION: &str = "0008,103e";
    pub const PATIENT_NAME: &str = "0010,0010";
    pub const PATIENT_ID: &str = "0010,0020";
    pub const STUDY_INSTANCE_UID: &str = "0020,000d";
    pub const SERIES_INSTANCE_UID: &str = "0020,000e";
    pub const SERIES_NUMBER: &str = "0020,0011";
    pub const STUDY_RELATED_INSTANCES: &str = "0020,1208";
    pub const SERIES_RELATED_INSTANCES: &str = "0020,1209";
}

/// One C-FIND identifier: tag ("gggg,eeee", lower-case) → value
type Identifier = HashMap<String, String>;

/// Query/retrieve client driving the dcmtk tools
#[derive(Debug, Clone)]
pub struct DcmtkClient {
    settings: DcmtkSettings,
    calling_ae_title: String,
}

impl DcmtkClient {
    pub fn new(settings: DcmtkSettings, calling_ae_title: impl Into<String>) -> Self {
        Self {
            settings,
            calling_ae_title: calling_ae_title.into(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    /// Arguments shared by findscu and movescu
    fn association_args(&self, node: &DicomNode) -> Vec<String> {
        let mut args = vec![
            "-v".to_string(),
            "-S".to_string(),
            "-aet".to_string(),
            self.calling_ae_title.clone(),
            "-aec".to_string(),
            node.ae_title.clone(),
        ];
        if let Some(flag) = proposal_flag(node.transfer_syntax) {
            args.push(flag.to_string());
        }
        args
    }

    /// Run a tool and return its combined stdout/stderr
    async fn run(
        &self,
        tool: &Path,
        args: Vec<String>,
        node: &DicomNode,
    ) -> Result<(bool, String), ServiceError> {
        debug!(tool = %tool.display(), args = ?args, "Invoking dcmtk tool");

        let child = Command::new(tool)
            .args(&args)
            .arg(&node.ip_address)
            .arg(node.port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout(), child).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ServiceError::Launch {
                    tool: tool.display().to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(ServiceError::Timeout {
                    node: node.name.clone(),
                    seconds: self.settings.timeout_secs,
                })
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), text))
    }

    async fn find(
        &self,
        node: &DicomNode,
        keys: &[(&str, &str)],
    ) -> Result<Vec<Identifier>, ServiceError> {
        let mut args = self.association_args(node);
        for (key, value) in keys {
            args.push("-k".to_string());
            args.push(if value.is_empty() {
                key.to_string()
            } else {
                format!("{}={}", key, value)
            });
        }

        let (ok, text) = self.run(&self.settings.findscu, args, node).await?;
        if let Some(reason) = association_failure(&text) {
            return Err(ServiceError::Association {
                node: node.name.clone(),
                reason,
            });
        }
        if !ok {
            return Err(ServiceError::Malformed {
                node: node.name.clone(),
                reason: last_error_line(&text).unwrap_or_else(|| "findscu failed".to_string()),
            });
        }
        Ok(parse_find_responses(&text))
    }

    async fn do_move(
        &self,
        source: &DicomNode,
        destination: &Destination,
        keys: &[(&str, &str)],
    ) -> bool {
        let mut args = self.association_args(source);
        args.push("--move".to_string());
        args.push(destination.ae_title.clone());
        for (key, value) in keys {
            args.push("-k".to_string());
            args.push(format!("{}={}", key, value));
        }

        match self.run(&self.settings.movescu, args, source).await {
            Ok((ok, text)) => {
                if let Some(reason) = association_failure(&text) {
                    warn!(node = %source.name, reason = %reason, "C-MOVE association failed");
                    return false;
                }
                match final_move_status(&text) {
                    Some(true) => true,
                    Some(false) => {
                        warn!(
                            node = %source.name,
                            detail = %last_error_line(&text).unwrap_or_default(),
                            "C-MOVE reported failure status"
                        );
                        false
                    }
                    None => ok,
                }
            }
            Err(e) => {
                error!(node = %source.name, error = %e, "C-MOVE request failed");
                false
            }
        }
    }
}

#[async_trait]
impl InventoryQuery for DcmtkClient {
    async fn query_studies(
        &self,
        node: &DicomNode,
        date_from: &str,
        date_to: &str,
    ) -> Result<Vec<StudyRecord>, ServiceError> {
        info!(
            node = %node.name,
            ae_title = %node.ae_title,
            date_from,
            date_to,
            "Querying studies"
        );
        let range = format!("{}-{}", date_from, date_to);
        let identifiers = self
            .find(
                node,
                &[
                    ("QueryRetrieveLevel", "STUDY"),
                    ("StudyDate", range.as_str()),
                    ("StudyInstanceUID", ""),
                    ("PatientID", ""),
                    ("PatientName", ""),
                    ("StudyDescription", ""),
                    ("StudyTime", ""),
                    ("NumberOfStudyRelatedInstances", ""),
                ],
            )
            .await?;

        let studies: Vec<StudyRecord> = identifiers.iter().map(study_from_identifier).collect();
        info!(node = %node.name, studies = studies.len(), "Study query complete");
        Ok(studies)
    }

    async fn query_series(
        &self,
        node: &DicomNode,
        study_uid: &str,
    ) -> Result<Vec<SeriesRecord>, ServiceError> {
        let identifiers = self
            .find(
                node,
                &[
                    ("QueryRetrieveLevel", "SERIES"),
                    ("StudyInstanceUID", study_uid),
                    ("SeriesInstanceUID", ""),
                    ("SeriesNumber", ""),
                    ("Modality", ""),
                    ("SeriesDescription", ""),
                    ("NumberOfSeriesRelatedInstances", ""),
                ],
            )
            .await?;
        Ok(identifiers.iter().map(series_from_identifier).collect())
    }

    async fn query_image_ids(
        &self,
        node: &DicomNode,
        study_uid: &str,
        series_uid: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let identifiers = self
            .find(
                node,
                &[
                    ("QueryRetrieveLevel", "IMAGE"),
                    ("StudyInstanceUID", study_uid),
                    ("SeriesInstanceUID", series_uid),
                    ("SOPInstanceUID", ""),
                ],
            )
            .await?;
        Ok(identifiers
            .iter()
            .filter_map(|id| id.get(tag::SOP_INSTANCE_UID).cloned())
            .filter(|uid| !uid.is_empty())
            .collect())
    }
}

#[async_trait]
impl NetworkTransfer for DcmtkClient {
    async fn move_series(
        &self,
        source: &DicomNode,
        destination: &Destination,
        study_uid: &str,
        series_uid: &str,
    ) -> bool {
        debug!(
            transfer_syntax = %source.transfer_syntax,
            destination = %destination,
            "C-MOVE series"
        );
        self.do_move(
            source,
            destination,
            &[
                ("QueryRetrieveLevel", "SERIES"),
                ("StudyInstanceUID", study_uid),
                ("SeriesInstanceUID", series_uid),
            ],
        )
        .await
    }

    async fn move_image(
        &self,
        source: &DicomNode,
        destination: &Destination,
        study_uid: &str,
        series_uid: &str,
        image_id: &str,
    ) -> bool {
        self.do_move(
            source,
            destination,
            &[
                ("QueryRetrieveLevel", "IMAGE"),
                ("StudyInstanceUID", study_uid),
                ("SeriesInstanceUID", series_uid),
                ("SOPInstanceUID", image_id),
            ],
        )
        .await
    }
}

/// dcmtk flag proposing the node's transfer syntax on the association.
///
/// JPEG 2000 is not a valid proposal for the query/retrieve context itself,
/// so the tool default is kept for it.
fn proposal_flag(syntax: TransferSyntax) -> Option<&'static str> {
    match syntax {
        TransferSyntax::ExplicitVrLittleEndian => Some("-xe"),
        TransferSyntax::ImplicitVrLittleEndian => Some("-xi"),
        TransferSyntax::Jpeg2000Lossless => None,
    }
}

fn strip_log_prefix(line: &str) -> &str {
    let trimmed = line.trim();
    for prefix in ["I: ", "W: ", "E: ", "D: ", "F: "] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim();
        }
    }
    trimmed
}

/// Parse a dump line such as `(0020,000d) UI [1.2.3]   #  6, 1 StudyInstanceUID`
fn parse_element(line: &str) -> Option<(String, String)> {
    let line = strip_log_prefix(line);
    if !line.starts_with('(') {
        return None;
    }
    let close = line.find(')')?;
    let tag = line[1..close].to_ascii_lowercase();
    if tag.len() != 9 || tag.as_bytes()[4] != b',' {
        return None;
    }
    let rest = &line[close + 1..];
    let value = match (rest.find('['), rest.find(']')) {
        (Some(open), Some(end)) if end > open => rest[open + 1..end].trim().to_string(),
        _ => String::new(),
    };
    Some((tag, value))
}

/// Split findscu output into the identifiers of its pending responses
fn parse_find_responses(text: &str) -> Vec<Identifier> {
    let mut responses = Vec::new();
    let mut current: Option<Identifier> = None;

    for line in text.lines() {
        let stripped = strip_log_prefix(line);
        if stripped.contains("Find Response:") {
            if let Some(done) = current.take() {
                responses.push(done);
            }
            if stripped.contains("Pending") {
                current = Some(Identifier::new());
            }
            continue;
        }
        if let Some(identifier) = current.as_mut() {
            if let Some((tag, value)) = parse_element(stripped) {
                identifier.insert(tag, value);
            }
        }
    }
    if let Some(done) = current.take() {
        responses.push(done);
    }
    responses.retain(|identifier| !identifier.is_empty());
    responses
}

/// Non-numeric or missing counts are treated as zero
fn parse_count(value: Option<&String>) -> i64 {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn field(identifier: &Identifier, tag: &str) -> String {
    identifier.get(tag).cloned().unwrap_or_default()
}

fn study_from_identifier(identifier: &Identifier) -> StudyRecord {
    StudyRecord {
        study_uid: field(identifier, tag::STUDY_INSTANCE_UID),
        date: field(identifier, tag::STUDY_DATE),
        time: field(identifier, tag::STUDY_TIME),
        patient_id: field(identifier, tag::PATIENT_ID),
        patient_name: field(identifier, tag::PATIENT_NAME),
        description: field(identifier, tag::STUDY_DESCRIPTION),
        total_image_count: parse_count(identifier.get(tag::STUDY_RELATED_INSTANCES)),
        series: Vec::new(),
    }
}

fn series_from_identifier(identifier: &Identifier) -> SeriesRecord {
    SeriesRecord {
        series_uid: field(identifier, tag::SERIES_INSTANCE_UID),
        number: field(identifier, tag::SERIES_NUMBER),
        image_count: parse_count(identifier.get(tag::SERIES_RELATED_INSTANCES)),
        modality: field(identifier, tag::MODALITY),
        description: field(identifier, tag::SERIES_DESCRIPTION),
    }
}

fn association_failure(text: &str) -> Option<String> {
    text.lines()
        .map(strip_log_prefix)
        .find(|line| {
            line.contains("Association Rejected")
                || line.contains("Association Aborted")
                || line.contains("Failed to establish association")
        })
        .map(str::to_string)
}

/// Status of the last C-MOVE response: Some(true) only for Success
fn final_move_status(text: &str) -> Option<bool> {
    text.lines()
        .map(strip_log_prefix)
        .filter(|line| line.contains("Move Response"))
        .filter(|line| !line.contains("Pending"))
        .last()
        .map(|line| line.contains("Success"))
}

fn last_error_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("E: ") || line.starts_with("F: "))
        .last()
        .map(|line| line[3..].to_string())
}
