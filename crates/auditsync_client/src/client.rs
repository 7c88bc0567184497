//! Blocking HTTP implementation of [`InspectionApi`].

use crate::error::ApiError;
use crate::http::check_response;
use crate::types::{Discovery, DiscoveryQuery, Preference, RenderFormat};
use crate::InspectionApi;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.safetyculture.io";

const ACTIONS_PAGE_SIZE: u64 = 100;
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Connection settings for [`HttpInspectionApi`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
    pub connect_timeout: Duration,
    /// Upper bound on a whole request, body included.
    pub request_timeout: Duration,
    /// How often a pending report render is polled.
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl ClientConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
            max_polls: 90,
        }
    }
}

pub struct HttpInspectionApi {
    http: Client,
    base_url: String,
    poll_interval: Duration,
    max_polls: u32,
}

#[derive(Deserialize)]
struct ReportRequested {
    #[serde(rename = "messageId", alias = "id")]
    message_id: String,
}

#[derive(Deserialize)]
struct ReportStatus {
    #[serde(default)]
    status: String,
    #[serde(default, alias = "href")]
    url: Option<String>,
}

#[derive(Deserialize)]
struct WebReportLink {
    url: String,
}

#[derive(Deserialize)]
struct ActionsPage {
    #[serde(default)]
    total: u64,
    #[serde(default, alias = "activities")]
    tasks: Vec<Value>,
}

#[derive(Deserialize)]
struct PreferencesPage {
    #[serde(default)]
    preferences: Vec<Preference>,
}

impl HttpInspectionApi {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| ApiError::InvalidToken)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("auditsync/", env!("CARGO_PKG_VERSION"))),
        );

        let http = Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval,
            max_polls: config.max_polls,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, waiting out 429 responses a bounded number of times.
    fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, ApiError> {
        let mut attempt = 0;
        loop {
            match check_response(build().send()?) {
                Err(ApiError::RateLimited { retry_after_secs })
                    if attempt < MAX_RATE_LIMIT_RETRIES =>
                {
                    attempt += 1;
                    warn!(retry_after_secs, attempt, "Rate limited by API, waiting");
                    thread::sleep(Duration::from_secs(retry_after_secs));
                }
                other => return other,
            }
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let resp = self.send(|| self.http.get(&url))?;
        parse_json(resp)
    }
}

fn parse_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let bytes = resp.bytes()?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))
}

fn report_format(format: RenderFormat) -> &'static str {
    match format {
        RenderFormat::Pdf => "PDF",
        RenderFormat::Docx => "WORD",
    }
}

impl InspectionApi for HttpInspectionApi {
    fn discover(&self, query: &DiscoveryQuery) -> Result<Discovery, ApiError> {
        let url = self.url("audits/search");
        let params = query.params();
        let resp = self.send(|| self.http.get(&url).query(&params))?;
        let discovery: Discovery = parse_json(resp)?;
        debug!(total = discovery.total, "Audit search complete");
        Ok(discovery)
    }

    fn fetch_audit(&self, audit_id: &str) -> Result<Value, ApiError> {
        self.get_json(&format!("audits/{}", audit_id))
    }

    fn fetch_rendered(
        &self,
        audit_id: &str,
        preference_id: Option<&str>,
        format: RenderFormat,
    ) -> Result<Vec<u8>, ApiError> {
        let mut body = json!({ "format": report_format(format) });
        if let Some(preference_id) = preference_id {
            body["preference_id"] = Value::String(preference_id.to_string());
        }
        let request_url = self.url(&format!("audits/{}/report", audit_id));
        let requested: ReportRequested =
            parse_json(self.send(|| self.http.post(&request_url).json(&body))?)?;

        let status_url = self.url(&format!("audits/{}/report/{}", audit_id, requested.message_id));
        for _ in 0..self.max_polls {
            let status: ReportStatus = parse_json(self.send(|| self.http.get(&status_url))?)?;
            match (status.status.as_str(), status.url) {
                ("SUCCESS", Some(url)) => {
                    let resp = self.send(|| self.http.get(&url))?;
                    return Ok(resp.bytes()?.to_vec());
                }
                ("FAILED", _) => {
                    return Err(ApiError::ExportFailed {
                        audit_id: audit_id.to_string(),
                        status: "FAILED".to_string(),
                    })
                }
                _ => thread::sleep(self.poll_interval),
            }
        }
        Err(ApiError::ExportFailed {
            audit_id: audit_id.to_string(),
            status: "TIMED_OUT".to_string(),
        })
    }

    fn fetch_media(&self, audit_id: &str, media_id: &str) -> Result<Box<dyn Read>, ApiError> {
        let url = self.url(&format!("audits/{}/media/{}", audit_id, media_id));
        let resp = self.send(|| self.http.get(&url))?;
        Ok(Box::new(resp))
    }

    fn fetch_web_report_link(&self, audit_id: &str) -> Result<String, ApiError> {
        let link: WebReportLink = self.get_json(&format!("audits/{}/web_report_link", audit_id))?;
        Ok(link.url)
    }

    fn fetch_actions(&self, modified_after: &str) -> Result<Vec<Value>, ApiError> {
        let url = self.url("tasks/search");
        let mut actions = Vec::new();
        let mut offset = 0;
        loop {
            let body = json!({
                "modified_at": { "from": modified_after },
                "offset": offset,
                "limit": ACTIONS_PAGE_SIZE,
                "status": [0, 10, 50, 60],
            });
            let page: ActionsPage = parse_json(self.send(|| self.http.post(&url).json(&body))?)?;
            let fetched = page.tasks.len() as u64;
            actions.extend(page.tasks);
            offset += ACTIONS_PAGE_SIZE;
            if fetched == 0 || offset >= page.total {
                break;
            }
        }
        info!(count = actions.len(), "Fetched actions");
        Ok(actions)
    }

    fn list_preferences(&self, template_id: Option<&str>) -> Result<Vec<Preference>, ApiError> {
        let url = self.url("preferences/search");
        let resp = self.send(|| match template_id {
            Some(id) => self.http.get(&url).query(&[("template_id", id)]),
            None => self.http.get(&url),
        })?;
        let page: PreferencesPage = parse_json(resp)?;
        Ok(page.preferences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_cleanly() {
        let mut config = ClientConfig::new("a".repeat(64));
        config.base_url = "https://example.test/".to_string();
        let api = HttpInspectionApi::new(config).unwrap();
        assert_eq!(api.url("/audits/search"), "https://example.test/audits/search");
        assert_eq!(api.url("audits/a1"), "https://example.test/audits/a1");
    }

    #[test]
    fn requests_have_a_finite_timeout() {
        let config = ClientConfig::new("a".repeat(64));
        assert!(config.request_timeout > config.connect_timeout);
        assert!(config.request_timeout <= Duration::from_secs(600));
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let err = HttpInspectionApi::new(ClientConfig::new("bad\ntoken")).err().unwrap();
        assert!(matches!(err, ApiError::InvalidToken));
    }

    #[test]
    fn action_pages_accept_either_key() {
        let page: ActionsPage =
            serde_json::from_str(r#"{"total": 1, "activities": [{"task_id": "t1"}]}"#).unwrap();
        assert_eq!(page.tasks.len(), 1);
        let page: ActionsPage =
            serde_json::from_str(r#"{"total": 0, "tasks": []}"#).unwrap();
        assert!(page.tasks.is_empty());
    }

    #[test]
    fn report_status_accepts_href() {
        let body = r#"{"status": "SUCCESS", "href": "https://x/report.pdf"}"#;
        let status: ReportStatus = serde_json::from_str(body).unwrap();
        assert_eq!(status.url.as_deref(), Some("https://x/report.pdf"));
        assert_eq!(report_format(RenderFormat::Docx), "WORD");
    }
}
