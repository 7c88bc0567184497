//! End-to-end passes against an in-memory inspection platform.

use auditsync::{
    ExportError, ExportFormat, ExportConfig, Home, RawConfig, Shutdown, Stream, SyncContext,
    SyncRunner,
};
use auditsync::discovery::Clock;
use auditsync_client::{
    ApiError, DiscoveredAudit, Discovery, DiscoveryQuery, InspectionApi, Preference, RenderFormat,
};
use auditsync_db::DbConnection;
use auditsync_model::{flatten, parse_timestamp, AuditDocument, BEGINNING_OF_TIME};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use tempfile::{tempdir, TempDir};

const TOKEN: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn noon() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
}

#[derive(Default)]
struct FakeApi {
    audits: BTreeMap<String, Value>,
    actions: Vec<Value>,
    failing: HashSet<String>,
    fetched: RefCell<Vec<String>>,
    queries: RefCell<Vec<String>>,
}

impl FakeApi {
    fn with_audit(mut self, audit: Value) -> Self {
        let id = audit["audit_id"].as_str().unwrap().to_string();
        self.audits.insert(id, audit);
        self
    }

    fn failing_on(mut self, audit_id: &str) -> Self {
        self.failing.insert(audit_id.to_string());
        self
    }
}

fn newer_than(value: &Value, since: &str) -> bool {
    let since = parse_timestamp(since).unwrap();
    value["modified_at"]
        .as_str()
        .and_then(|raw| parse_timestamp(raw).ok())
        .map_or(false, |ts| ts > since)
}

impl InspectionApi for FakeApi {
    fn discover(&self, query: &DiscoveryQuery) -> Result<Discovery, ApiError> {
        self.queries.borrow_mut().push(query.modified_after.clone());
        let mut audits: Vec<DiscoveredAudit> = self
            .audits
            .values()
            .filter(|a| newer_than(a, &query.modified_after))
            .map(|a| DiscoveredAudit {
                audit_id: a["audit_id"].as_str().unwrap().to_string(),
                modified_at: a["modified_at"].as_str().unwrap().to_string(),
                template_id: a["template_id"].as_str().unwrap_or_default().to_string(),
            })
            .collect();
        audits.sort_by_key(|a| parse_timestamp(&a.modified_at).unwrap());
        Ok(Discovery {
            total: audits.len() as u64,
            audits,
        })
    }

    fn fetch_audit(&self, audit_id: &str) -> Result<Value, ApiError> {
        if self.failing.contains(audit_id) {
            return Err(ApiError::Api {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        self.fetched.borrow_mut().push(audit_id.to_string());
        self.audits.get(audit_id).cloned().ok_or(ApiError::Api {
            status: 404,
            message: "not found".to_string(),
        })
    }

    fn fetch_rendered(
        &self,
        audit_id: &str,
        _preference_id: Option<&str>,
        format: RenderFormat,
    ) -> Result<Vec<u8>, ApiError> {
        Ok(format!("{} as {}", audit_id, format.extension()).into_bytes())
    }

    fn fetch_media(&self, _audit_id: &str, media_id: &str) -> Result<Box<dyn Read>, ApiError> {
        Ok(Box::new(Cursor::new(format!("bytes of {}", media_id).into_bytes())))
    }

    fn fetch_web_report_link(&self, audit_id: &str) -> Result<String, ApiError> {
        Ok(format!("https://reports.example/{}", audit_id))
    }

    fn fetch_actions(&self, modified_after: &str) -> Result<Vec<Value>, ApiError> {
        Ok(self
            .actions
            .iter()
            .filter(|a| newer_than(a, modified_after))
            .cloned()
            .collect())
    }

    fn list_preferences(&self, _template_id: Option<&str>) -> Result<Vec<Preference>, ApiError> {
        Ok(Vec::new())
    }
}

fn audit(id: &str, modified_at: &str) -> Value {
    json!({
        "audit_id": id,
        "template_id": "template_1",
        "modified_at": modified_at,
        "template_data": {"metadata": {"name": "Daily Check"}},
        "audit_data": {"name": format!("Audit {}", id)},
        "header_items": [],
        "items": [
            {"item_id": "sec", "type": "section", "label": "Checks"},
            {"item_id": "q1", "parent_id": "sec", "type": "text", "label": "Notes",
             "responses": {"text": "ok"}},
            {"item_id": "q2", "parent_id": "sec", "type": "question", "label": "Clean?",
             "scoring": {"score": 1, "max_score": 1}}
        ]
    })
}

struct Workspace {
    _dir: TempDir,
    home: Home,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let home = Home::new(dir.path());
        Self { _dir: dir, home }
    }

    fn context(&self, options: &str, formats: &[ExportFormat]) -> SyncContext {
        let yaml = format!(
            "API:\n    token: {}\nconfig_name: test\nexport_options:\n    export_path: out\n{}",
            TOKEN, options
        );
        let raw = RawConfig::from_yaml(&yaml, Path::new("config.yaml")).unwrap();
        let config = ExportConfig::from_raw(raw, self.home.root()).unwrap();
        SyncContext::new(&self.home, config, formats.to_vec())
    }
}

#[test]
fn watermark_follows_each_exported_audit() {
    let ws = Workspace::new();
    let ctx = ws.context("", &[ExportFormat::Json]);
    let api = FakeApi::default()
        .with_audit(audit("audit_2", "2024-05-02T08:00:00.000Z"))
        .with_audit(audit("audit_1", "2024-05-01T08:00:00.000Z"))
        .with_audit(audit("audit_3", "2024-05-03T08:00:00.000Z"));
    let shutdown = Shutdown::new();
    let clock = noon();

    let report = SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap();

    assert_eq!(report.exported, 3);
    assert_eq!(*api.fetched.borrow(), vec!["audit_1", "audit_2", "audit_3"]);
    assert_eq!(
        ctx.watermarks.read(Stream::Audits).unwrap(),
        "2024-05-03T08:00:00.000Z"
    );
    for id in ["audit_1", "audit_2", "audit_3"] {
        assert!(ctx.export_dir().join(format!("{}.json", id)).is_file());
    }
}

#[test]
fn failed_audit_aborts_pass_and_next_pass_resumes() {
    let ws = Workspace::new();
    let ctx = ws.context("", &[ExportFormat::Json]);
    let shutdown = Shutdown::new();
    let clock = noon();
    let audits = [
        audit("audit_1", "2024-05-01T08:00:00.000Z"),
        audit("audit_2", "2024-05-02T08:00:00.000Z"),
        audit("audit_3", "2024-05-03T08:00:00.000Z"),
    ];

    let broken = audits
        .iter()
        .cloned()
        .fold(FakeApi::default(), FakeApi::with_audit)
        .failing_on("audit_2");
    let err = SyncRunner::new(&broken, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap_err();
    assert!(matches!(err, ExportError::Api(_)));
    assert!(!err.is_fatal());
    assert_eq!(
        ctx.watermarks.read(Stream::Audits).unwrap(),
        "2024-05-01T08:00:00.000Z"
    );
    assert!(!ctx.export_dir().join("audit_3.json").exists());

    let healthy = audits.iter().cloned().fold(FakeApi::default(), FakeApi::with_audit);
    let report = SyncRunner::new(&healthy, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap();
    assert_eq!(report.exported, 2);
    assert_eq!(
        *healthy.queries.borrow(),
        vec!["2024-05-01T08:00:00.000Z".to_string()]
    );
    assert_eq!(
        ctx.watermarks.read(Stream::Audits).unwrap(),
        "2024-05-03T08:00:00.000Z"
    );
}

#[test]
fn empty_discovery_changes_nothing() {
    let ws = Workspace::new();
    let ctx = ws.context("", &[ExportFormat::Json, ExportFormat::Csv]);
    let api = FakeApi::default();
    let shutdown = Shutdown::new();
    let clock = noon();

    let report = SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap();

    assert_eq!(report.exported, 0);
    assert_eq!(ctx.watermarks.read(Stream::Audits).unwrap(), BEGINNING_OF_TIME);
    assert!(!ctx.export_dir().exists());
}

#[test]
fn recently_modified_audits_wait_for_media_sync() {
    let ws = Workspace::new();
    let ctx = ws.context(
        "    media_sync_offset_in_seconds: 600\n",
        &[ExportFormat::Json],
    );
    let api = FakeApi::default()
        .with_audit(audit("settled", "2024-06-01T11:48:20.000Z"))
        .with_audit(audit("fresh", "2024-06-01T11:55:00.000Z"));
    let shutdown = Shutdown::new();
    let clock = noon();

    let report = SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap();

    assert_eq!(report.discovered, 2);
    assert_eq!(report.exported, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(*api.fetched.borrow(), vec!["settled"]);
    assert_eq!(
        ctx.watermarks.read(Stream::Audits).unwrap(),
        "2024-06-01T11:48:20.000Z"
    );
}

#[test]
fn title_item_names_the_exported_files() {
    let ws = Workspace::new();
    let ctx = ws.context(
        "    filename: f3245d40-ea77-11e1-aff1-0800200c9a66\n",
        &[ExportFormat::Json, ExportFormat::Media],
    );
    let mut doc = audit("audit_1", "2024-05-01T08:00:00.000Z");
    doc["audit_data"]["name"] = json!("Site A/B");
    doc["items"]
        .as_array_mut()
        .unwrap()
        .push(json!({"item_id": "photo", "type": "media", "label": "Photo",
                     "media": [{"media_id": "m1", "file_ext": "png"}]}));
    let api = FakeApi::default().with_audit(doc);
    let shutdown = Shutdown::new();
    let clock = noon();

    SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap();

    assert!(ctx.export_dir().join("Site A_B.json").is_file());
    let media = ctx.media_dir("Site A_B").join("m1.png");
    assert_eq!(fs::read_to_string(media).unwrap(), "bytes of m1");
}

#[test]
fn csv_and_report_link_rows_are_appended() {
    let ws = Workspace::new();
    let ctx = ws.context("", &[ExportFormat::Csv, ExportFormat::WebReportLink]);
    let api = FakeApi::default()
        .with_audit(audit("audit_1", "2024-05-01T08:00:00.000Z"))
        .with_audit(audit("audit_2", "2024-05-02T08:00:00.000Z"));
    let shutdown = Shutdown::new();
    let clock = noon();

    SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap();

    let per_audit = flatten(
        &AuditDocument::from_value(audit("audit_1", "2024-05-01T08:00:00.000Z")).unwrap(),
        true,
    )
    .len();
    let csv = fs::read_to_string(ctx.export_dir().join("template_1.csv")).unwrap();
    assert_eq!(csv.lines().count(), 1 + 2 * per_audit);

    let links = fs::read_to_string(ctx.export_dir().join("web-report-links.csv")).unwrap();
    assert_eq!(links.lines().count(), 3);
    assert!(links.contains("https://reports.example/audit_2"));
}

#[test]
fn relational_export_keeps_history_per_modification() {
    let ws = Workspace::new();
    let db_path = ws.home.root().join("audits.duckdb");
    let options = format!(
        "    allow_table_creation: true\n    database_url: duckdb:{}\n",
        db_path.display()
    );
    let ctx = ws.context(&options, &[ExportFormat::Sql]);
    let shutdown = Shutdown::new();
    let clock = noon();
    let first = audit("audit_1", "2024-05-01T08:00:00.000Z");
    let per_audit = flatten(&AuditDocument::from_value(first.clone()).unwrap(), true).len();

    let api = FakeApi::default().with_audit(first);
    SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap();

    // Re-modified audit: same item ids, new DatePK.
    let api = FakeApi::default().with_audit(audit("audit_1", "2024-05-02T08:00:00.000Z"));
    SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap();

    let conn = DbConnection::open_from_url(&format!("duckdb:{}", db_path.display())).unwrap();
    let rows: i64 = conn
        .query_scalar("SELECT COUNT(*) FROM main.iauditor_data", &[])
        .unwrap();
    assert_eq!(rows as usize, 2 * per_audit);
}

#[test]
fn merged_relational_export_replaces_rows() {
    let ws = Workspace::new();
    let db_path = ws.home.root().join("merged.duckdb");
    let options = format!(
        "    merge_rows: true\n    allow_table_creation: true\n    database_url: duckdb:{}\n",
        db_path.display()
    );
    let ctx = ws.context(&options, &[ExportFormat::Sql]);
    let shutdown = Shutdown::new();
    let clock = noon();
    let mut doc = audit("audit_1", "2024-05-01T08:00:00.000Z");
    let per_audit = flatten(&AuditDocument::from_value(doc.clone()).unwrap(), true).len();

    {
        let api = FakeApi::default().with_audit(doc.clone());
        SyncRunner::new(&api, &ctx, &shutdown)
            .with_clock(&clock)
            .run_pass()
            .unwrap();

        doc["modified_at"] = json!("2024-05-02T08:00:00.000Z");
        doc["items"][1]["responses"]["text"] = json!("needs attention");
        let api = FakeApi::default().with_audit(doc);
        SyncRunner::new(&api, &ctx, &shutdown)
            .with_clock(&clock)
            .run_pass()
            .unwrap();
    }

    let conn = DbConnection::open_from_url(&format!("duckdb:{}", db_path.display())).unwrap();
    let rows: i64 = conn
        .query_scalar("SELECT COUNT(*) FROM main.iauditor_data", &[])
        .unwrap();
    assert_eq!(rows as usize, per_audit);
    let response: String = conn
        .query_scalar(
            "SELECT Response FROM main.iauditor_data WHERE ItemID = 'q1'",
            &[],
        )
        .unwrap();
    assert_eq!(response, "needs attention");
}

#[test]
fn refused_table_creation_is_fatal() {
    let ws = Workspace::new();
    let db_path = ws.home.root().join("refused.duckdb");
    let options = format!("    database_url: duckdb:{}\n", db_path.display());
    let ctx = ws.context(&options, &[ExportFormat::Sql]);
    let api = FakeApi::default().with_audit(audit("audit_1", "2024-05-01T08:00:00.000Z"));
    let shutdown = Shutdown::new();
    let clock = noon();
    let mut asked = 0;

    let err = SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .with_confirm(|_| {
            asked += 1;
            false
        })
        .run_pass()
        .unwrap_err();

    assert!(matches!(err, ExportError::TableSetup(_)));
    assert!(err.is_fatal());
    assert_eq!(asked, 1);
    assert_eq!(ctx.watermarks.read(Stream::Audits).unwrap(), BEGINNING_OF_TIME);
}

#[test]
fn actions_export_advances_its_own_watermark() {
    let ws = Workspace::new();
    let ctx = ws.context("", &[ExportFormat::Actions]);
    let api = FakeApi {
        actions: vec![
            json!({"action_id": "act_1", "title": "Fix leak", "priority_id": 1,
                   "modified_at": "2024-05-03T09:00:00.000Z"}),
            json!({"task_id": "act_2", "title": "Replace bulb",
                   "modified_at": "2024-05-04T09:00:00.000Z"}),
        ],
        ..FakeApi::default()
    };
    let shutdown = Shutdown::new();
    let clock = noon();

    let report = SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap();
    assert_eq!(report.actions, 2);
    assert_eq!(
        ctx.watermarks.read(Stream::Actions).unwrap(),
        "2024-05-04T09:00:00.000Z"
    );
    assert_eq!(ctx.watermarks.read(Stream::Audits).unwrap(), BEGINNING_OF_TIME);

    let csv_path = ctx.export_dir().join("iauditor_actions.csv");
    assert_eq!(fs::read_to_string(&csv_path).unwrap().lines().count(), 3);

    let report = SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap();
    assert_eq!(report.actions, 0);
    assert_eq!(fs::read_to_string(&csv_path).unwrap().lines().count(), 3);
}

#[test]
fn interrupted_run_stops_before_exporting() {
    let ws = Workspace::new();
    let ctx = ws.context("", &[ExportFormat::Json]);
    let api = FakeApi::default().with_audit(audit("audit_1", "2024-05-01T08:00:00.000Z"));
    let shutdown = Shutdown::new();
    shutdown.request();
    let clock = noon();

    let err = SyncRunner::new(&api, &ctx, &shutdown)
        .with_clock(&clock)
        .run_pass()
        .unwrap_err();
    assert!(matches!(err, ExportError::Interrupted));
    assert!(api.fetched.borrow().is_empty());
    assert_eq!(ctx.watermarks.read(Stream::Audits).unwrap(), BEGINNING_OF_TIME);
}
