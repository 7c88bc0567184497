//! Actions export: its own watermark stream, one flat row per action.

use crate::context::SyncContext;
use crate::dispatch::ExportError;
use crate::shutdown::Shutdown;
use crate::watermark::Stream;
use auditsync_client::InspectionApi;
use auditsync_db::TableSetup;
use auditsync_model::{parse_timestamp, ActionRecord, ActionRow};
use auditsync_sinks::{action_rows_to_db, append_action_rows, RelationalSink};
use tracing::{info, warn};

/// Where exported actions go.
pub enum ActionTargets<'a> {
    Csv,
    Relational(&'a TableSetup),
}

/// Fetch actions modified since the actions watermark, write them, then
/// advance the watermark to the newest modification in the batch.
pub fn export_actions(
    api: &dyn InspectionApi,
    ctx: &SyncContext,
    target: ActionTargets<'_>,
    shutdown: &Shutdown,
) -> Result<usize, ExportError> {
    info!("Exporting actions");
    let since = ctx.watermarks.read(Stream::Actions)?;
    info!("Searching for actions modified after {}", since);

    let records: Vec<ActionRecord> = api
        .fetch_actions(&since)?
        .into_iter()
        .filter_map(|value| match ActionRecord::from_value(value) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("Skipping malformed action: {}", err);
                None
            }
        })
        .collect();
    info!("Found {} actions", records.len());
    if records.is_empty() {
        return Ok(0);
    }
    let rows: Vec<ActionRow> = records.iter().map(ActionRecord::to_row).collect();

    match target {
        ActionTargets::Csv => {
            append_action_rows(ctx.export_dir(), &rows)?;
        }
        ActionTargets::Relational(TableSetup::Ready { conn, table }) => {
            let sink = RelationalSink::new(conn.clone(), table.clone());
            let should_commit = move || !shutdown.is_requested();
            sink.write(&action_rows_to_db(&rows), Some(&should_commit))?;
        }
        ActionTargets::Relational(TableSetup::Failed { reason }) => {
            warn!("Skipping relational actions export: {}", reason);
            return Ok(0);
        }
        ActionTargets::Relational(TableSetup::NotStarted) => {
            return Err(ExportError::TableSetup(
                "actions table was never set up".to_string(),
            ));
        }
    }

    if let Some(newest) = newest_modification(&records) {
        ctx.watermarks.write(Stream::Actions, &newest)?;
    }
    Ok(rows.len())
}

/// Latest `modified_at` of the batch. Unparseable values are ignored.
fn newest_modification(records: &[ActionRecord]) -> Option<String> {
    records
        .iter()
        .filter_map(|r| r.modified_at.as_deref())
        .filter_map(|raw| parse_timestamp(raw).ok().map(|ts| (ts, raw)))
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, raw)| raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn newest_modification_compares_instants() {
        let records: Vec<ActionRecord> = [
            json!({"action_id": "a1", "modified_at": "2024-03-01T10:00:00.000Z"}),
            json!({"action_id": "a2", "modified_at": "2024-03-01T12:00:00+01:00"}),
            json!({"action_id": "a3", "modified_at": "2024-03-01T10:30:00.000Z"}),
            json!({"action_id": "a4", "modified_at": "not a date"}),
        ]
        .into_iter()
        .map(|v| ActionRecord::from_value(v).unwrap())
        .collect();
        assert_eq!(
            newest_modification(&records).as_deref(),
            Some("2024-03-01T12:00:00+01:00")
        );
        assert_eq!(newest_modification(&records[3..]), None);
    }
}
