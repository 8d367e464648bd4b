//! Output renderers and formatting helpers for CLI commands.

use std::fmt::Write as _;

use anyhow::anyhow;
use replica_core::{CopyOperation, HistoryEntry};
use replica_engine::{CopyOperationHandle, CopyStatusReport};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::context::{CliError, CliResult};

fn to_json<T: Serialize + ?Sized>(value: &T) -> CliResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))
}

fn emit(text: &str) {
    println!("{}", text.trim_end());
}

pub(crate) fn render_handle(handle: &CopyOperationHandle, format: OutputFormat) -> CliResult<()> {
    emit(&format_handle(handle, format)?);
    Ok(())
}

pub(crate) fn render_report(report: &CopyStatusReport, format: OutputFormat) -> CliResult<()> {
    emit(&format_report(report, format)?);
    Ok(())
}

pub(crate) fn render_history(history: &[HistoryEntry], format: OutputFormat) -> CliResult<()> {
    emit(&format_history(history, format)?);
    Ok(())
}

pub(crate) fn render_operations(
    operations: &[CopyOperation],
    format: OutputFormat,
) -> CliResult<()> {
    emit(&format_operations(operations, format)?);
    Ok(())
}

pub(crate) fn format_handle(
    handle: &CopyOperationHandle,
    format: OutputFormat,
) -> CliResult<String> {
    match format {
        OutputFormat::Json => to_json(handle),
        OutputFormat::Table => Ok(format!(
            "operation: {}\nstatus: {}\n",
            handle.operation_id, handle.status
        )),
    }
}

pub(crate) fn format_report(report: &CopyStatusReport, format: OutputFormat) -> CliResult<String> {
    if format == OutputFormat::Json {
        return to_json(report);
    }
    let operation = &report.operation;
    let mut out = String::new();
    let _ = writeln!(out, "operation: {}", operation.id);
    let _ = writeln!(out, "status: {}", operation.status);
    let _ = writeln!(out, "source training: {}", operation.source_training_id);
    if let Some(target) = operation.target_training_id {
        let _ = writeln!(out, "target training: {target}");
    }
    let _ = writeln!(out, "owner: {}", operation.target);
    let _ = writeln!(out, "initiated by: {}", operation.initiated_by);
    if let Some(comment) = &operation.comment {
        let _ = writeln!(out, "comment: {comment}");
    }
    let _ = writeln!(out, "updated: {}", operation.updated_at.to_rfc3339());
    if let Some(message) = &report.error_message {
        let _ = writeln!(out, "error: {message}");
    }
    let _ = writeln!(
        out,
        "{:<24} {:>10} {:>10} {:<12} {:>8}",
        "ENTITY", "SOURCE", "TARGET", "STATUS", "ATTEMPTS"
    );
    for mapping in &report.mappings {
        let target = mapping
            .target_entity_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let _ = writeln!(
            out,
            "{:<24} {:>10} {:>10} {:<12} {:>8}",
            mapping.entity_type.as_str(),
            mapping.source_entity_id,
            target,
            mapping.status.as_str(),
            mapping.attempts
        );
        for key in &mapping.target_keys {
            let _ = writeln!(out, "  blob: {key}");
        }
        if let Some(message) = &mapping.error_message {
            let _ = writeln!(out, "  error: {message}");
        }
    }
    Ok(out)
}

pub(crate) fn format_history(history: &[HistoryEntry], format: OutputFormat) -> CliResult<String> {
    if format == OutputFormat::Json {
        return to_json(history);
    }
    let mut out = String::new();
    let _ = writeln!(out, "{:<25} {:<16} {:<36} DETAIL", "AT", "ACTION", "ACTOR");
    for entry in history {
        let actor = entry
            .actor
            .map_or_else(|| "-".to_string(), |actor| actor.to_string());
        let _ = writeln!(
            out,
            "{:<25} {:<16} {:<36} {}",
            entry.recorded_at.format("%Y-%m-%dT%H:%M:%SZ"),
            entry.action.as_str(),
            actor,
            entry.detail.as_deref().unwrap_or("")
        );
    }
    Ok(out)
}

pub(crate) fn format_operations(
    operations: &[CopyOperation],
    format: OutputFormat,
) -> CliResult<String> {
    if format == OutputFormat::Json {
        return to_json(operations);
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<36} {:<12} {:>10} {:>10} {:<24} CREATED",
        "ID", "STATUS", "SOURCE", "TARGET", "OWNER"
    );
    for operation in operations {
        let target = operation
            .target_training_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let _ = writeln!(
            out,
            "{:<36} {:<12} {:>10} {:>10} {:<24} {}",
            operation.id,
            operation.status.as_str(),
            operation.source_training_id,
            target,
            operation.target.key(),
            operation.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    if operations.is_empty() {
        out.push_str("no copy operations\n");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use replica_core::{
        CopyPlan, CopyStatus, EntityType, HistoryAction, MappingSummary, TargetOwner,
    };
    use uuid::Uuid;

    fn operation() -> CopyOperation {
        let at = Utc
            .with_ymd_and_hms(2024, 5, 2, 9, 30, 0)
            .single()
            .expect("valid timestamp");
        CopyOperation {
            id: Uuid::nil(),
            source_training_id: 12,
            target_training_id: Some(40),
            initiated_by: Uuid::nil(),
            target: TargetOwner::Group(3),
            comment: None,
            status: CopyStatus::Completed,
            error_message: None,
            plan: CopyPlan {
                root_training_id: 12,
                entities: Vec::new(),
            },
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn report_table_lists_mappings_and_blobs() {
        let report = CopyStatusReport {
            operation: operation(),
            mappings: vec![MappingSummary {
                entity_type: EntityType::Dataset,
                source_entity_id: 1,
                target_entity_id: Some(41),
                status: CopyStatus::Completed,
                error_message: None,
                target_keys: vec!["copies/x/dataset/1/dataset_file/iris.csv".into()],
                attempts: 1,
            }],
            error_message: None,
        };
        let text = format_report(&report, OutputFormat::Table).expect("table");
        assert!(text.contains("target training: 40"));
        assert!(text.contains("owner: group:3"));
        assert!(text.contains("dataset "));
        assert!(text.contains("  blob: copies/x/dataset/1/dataset_file/iris.csv"));
    }

    #[test]
    fn json_output_is_structured() {
        let handle = CopyOperationHandle {
            operation_id: Uuid::nil(),
            status: CopyStatus::Pending,
        };
        let text = format_handle(&handle, OutputFormat::Json).expect("json");
        let value: serde_json::Value = serde_json::from_str(&text).expect("parse");
        assert_eq!(value["status"], "PENDING");
    }

    #[test]
    fn empty_listing_says_so() {
        let text = format_operations(&[], OutputFormat::Table).expect("table");
        assert!(text.ends_with("no copy operations\n"));
        let text = format_operations(&[operation()], OutputFormat::Table).expect("table");
        assert!(text.contains("group:3"));
        assert!(text.contains("2024-05-02 09:30"));
    }

    #[test]
    fn history_rows_show_missing_actor() {
        let entry = HistoryEntry {
            id: 1,
            operation_id: Uuid::nil(),
            action: HistoryAction::CopyInitiated,
            actor: None,
            recorded_at: Utc::now(),
            detail: Some("training 12 to group:3".into()),
        };
        let text = format_history(&[entry], OutputFormat::Table).expect("table");
        assert!(text.contains("copy_initiated"));
        assert!(text.contains(" - "));
    }
}
