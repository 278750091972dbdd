//! Authenticated access to the campus portal's score service.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::Course;

const IAAA_LOGIN_URL: &str = "https://iaaa.pku.edu.cn/iaaa/oauthlogin.do";
const SSO_LOGIN_URL: &str = "https://portal.pku.edu.cn/portal2017/ssoLogin.do";
const SCORE_PORTLET_URL: &str =
    "https://portal.pku.edu.cn/portal2017/util/portletRedir.do?portletId=myscores";
const SCORE_QUERY_URL: &str =
    "https://portal.pku.edu.cn/publicQuery/ctrl/topic/myScore/retrScores.do";
const PORTAL_APP_ID: &str = "portal2017";
const PORTAL_REFERER: &str = "https://portal.pku.edu.cn/publicQuery/";
// The score service rejects clients that do not look like a browser.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.149 Safari/537.36";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 12;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 6;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("portal request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("login rejected: {0}")]
    LoginRejected(String),
    #[error("unexpected portal response: {0}")]
    UnexpectedResponse(String),
    #[error("duplicate course in portal snapshot: {0}")]
    DuplicateCourse(String),
}

/// Anything that can produce the account's current course records.
#[async_trait]
pub trait GradeSource: Send + Sync {
    async fn fetch_courses(&self) -> Result<Vec<Course>, SourceError>;
}

/// Talks to the campus portal: IAAA OAuth login, SSO handoff, then the
/// score query endpoint. One instance per account.
pub struct PortalClient {
    client: Client,
    jar: Arc<Jar>,
    username: String,
    password: String,
    raw_dump_file: Option<PathBuf>,
}

impl PortalClient {
    pub fn new(username: String, password: String, raw_dump_file: Option<PathBuf>) -> Self {
        let jar = Arc::new(Jar::default());
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static(PORTAL_REFERER));
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .cookie_provider(jar.clone())
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .expect("failed to build portal HTTP client");
        Self {
            client,
            jar,
            username,
            password,
            raw_dump_file,
        }
    }

    async fn login(&self) -> Result<String, SourceError> {
        let form = [
            ("userName", self.username.as_str()),
            ("appid", PORTAL_APP_ID),
            ("password", self.password.as_str()),
            ("redirUrl", SSO_LOGIN_URL),
            ("randCode", ""),
            ("smsCode", ""),
            ("optCode", ""),
        ];
        let response = self
            .client
            .post(IAAA_LOGIN_URL)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        let outcome: LoginOutcome = serde_json::from_str(&body)
            .map_err(|_| SourceError::UnexpectedResponse(preview("login response", &body)))?;
        if !outcome.success || outcome.token.is_empty() {
            return Err(SourceError::LoginRejected(preview("login", &body)));
        }
        debug!("authenticated against the campus SSO");
        Ok(outcome.token)
    }

    /// Walk the SSO handoff: validate the token against the portal, then
    /// follow the score portlet redirect and install the `JSESSIONID` it
    /// hands back in the URL.
    async fn open_score_session(&self, token: &str) -> Result<(), SourceError> {
        let cache_buster = format!("0.{:09}", Utc::now().timestamp_subsec_nanos());
        self.client
            .get(SSO_LOGIN_URL)
            .query(&[("_rand", cache_buster.as_str()), ("token", token)])
            .send()
            .await?
            .error_for_status()?;

        let response = self
            .client
            .get(SCORE_PORTLET_URL)
            .send()
            .await?
            .error_for_status()?;
        let final_url = response.url().to_string();
        let Some(session_id) = extract_jsessionid(&final_url) else {
            return Err(SourceError::UnexpectedResponse(format!(
                "score portlet redirect carried no jsessionid: {final_url}"
            )));
        };
        let target: Url = SCORE_QUERY_URL
            .parse()
            .expect("score query endpoint is a valid URL");
        self.jar
            .add_cookie_str(&format!("JSESSIONID={session_id}"), &target);
        debug!("score session established");
        Ok(())
    }

    async fn fetch_score_payload(&self) -> Result<String, SourceError> {
        let response = self
            .client
            .get(SCORE_QUERY_URL)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        if let Some(path) = &self.raw_dump_file {
            if let Err(err) = fs::write(path, &body) {
                warn!(path = %path.display(), error = %err, "failed writing raw score dump");
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl GradeSource for PortalClient {
    async fn fetch_courses(&self) -> Result<Vec<Course>, SourceError> {
        let token = self.login().await?;
        self.open_score_session(&token).await?;
        let body = self.fetch_score_payload().await?;
        let payload: ScorePayload = serde_json::from_str(&body)
            .map_err(|_| SourceError::UnexpectedResponse(preview("score payload", &body)))?;
        let courses = courses_from_payload(payload);
        info!(courses = courses.len(), "fetched score records");
        Ok(courses)
    }
}

#[derive(Debug, Deserialize)]
struct LoginOutcome {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    token: String,
}

/// Score payload as the portal ships it, keyed by its own field names.
#[derive(Debug, Deserialize)]
struct ScorePayload {
    #[serde(default)]
    cjxx: Vec<TermBlock>,
}

#[derive(Debug, Deserialize)]
struct TermBlock {
    /// Term label, e.g. "24-25-1".
    #[serde(default)]
    xq: String,
    #[serde(default)]
    list: Vec<ScoreRow>,
}

#[derive(Debug, Deserialize)]
struct ScoreRow {
    /// Grade record number. Rows without one are not yet graded.
    #[serde(default)]
    bkcjbh: Option<Value>,
    /// Course name.
    #[serde(default)]
    kcmc: String,
    /// Grade, letter or numeric.
    #[serde(default)]
    xqcj: Option<Value>,
    /// Grade point.
    #[serde(default)]
    jd: Option<Value>,
    /// Credit.
    #[serde(default)]
    xf: Option<Value>,
}

fn courses_from_payload(payload: ScorePayload) -> Vec<Course> {
    let mut courses = Vec::new();
    let mut skipped = 0usize;
    for term in payload.cjxx {
        for row in term.list {
            if !has_record_id(row.bkcjbh.as_ref()) {
                skipped += 1;
                continue;
            }
            courses.push(Course {
                course_name: row.kcmc.trim().to_string(),
                grade: text_value(row.xqcj.as_ref()),
                gpa: decimal_value(row.jd.as_ref()),
                credit: decimal_value(row.xf.as_ref()),
                term: term.xq.trim().to_string(),
            });
        }
    }
    if skipped > 0 {
        debug!(skipped, "rows without a grade record number were skipped");
    }
    courses
}

fn has_record_id(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => !s.trim().is_empty(),
        // A numeric id of zero marks a not-yet-graded row.
        Some(Value::Number(n)) => n.as_f64().map_or(false, |v| v != 0.0),
        _ => false,
    }
}

fn text_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn decimal_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn extract_jsessionid(url: &str) -> Option<&str> {
    let start = url.find("jsessionid=")? + "jsessionid=".len();
    let rest = &url[start..];
    let end = rest.find(['#', ';']).unwrap_or(rest.len());
    let id = &rest[..end];
    (!id.is_empty()).then_some(id)
}

fn preview(what: &str, body: &str) -> String {
    let snippet: String = body.chars().take(180).collect();
    format!("{what}: {snippet}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_score_rows_and_skips_ungraded() {
        let payload: ScorePayload = serde_json::from_value(json!({
            "cjxx": [
                {
                    "xq": "24-25-1",
                    "list": [
                        { "bkcjbh": "2024001", "kcmc": "Algorithms", "xqcj": "92", "jd": "3.8", "xf": "3" },
                        { "kcmc": "Seminar", "xqcj": "", "jd": "", "xf": "1" }
                    ]
                },
                {
                    "xq": "24-25-2",
                    "list": [
                        { "bkcjbh": 2025001, "kcmc": "Compilers", "xqcj": 88, "jd": 3.6, "xf": 4 }
                    ]
                }
            ]
        }))
        .unwrap();

        let courses = courses_from_payload(payload);
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].course_name, "Algorithms");
        assert_eq!(courses[0].term, "24-25-1");
        assert_eq!(courses[0].grade, "92");
        assert!((courses[0].gpa - 3.8).abs() < 1e-9);
        assert!((courses[0].credit - 3.0).abs() < 1e-9);
        assert_eq!(courses[1].course_name, "Compilers");
        assert_eq!(courses[1].grade, "88");
        assert_eq!(courses[1].term, "24-25-2");
    }

    #[test]
    fn blank_numeric_fields_default_to_zero() {
        let payload: ScorePayload = serde_json::from_value(json!({
            "cjxx": [{ "xq": "24-25-1", "list": [
                { "bkcjbh": "1", "kcmc": "Writing", "xqcj": "P", "jd": "", "xf": null }
            ]}]
        }))
        .unwrap();
        let courses = courses_from_payload(payload);
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].grade, "P");
        assert_eq!(courses[0].gpa, 0.0);
        assert_eq!(courses[0].credit, 0.0);
    }

    #[test]
    fn zero_record_id_counts_as_ungraded() {
        let payload: ScorePayload = serde_json::from_value(json!({
            "cjxx": [{ "xq": "24-25-1", "list": [
                { "bkcjbh": 0, "kcmc": "Lab", "xqcj": "A", "jd": "4.0", "xf": "1" },
                { "bkcjbh": "0", "kcmc": "Drill", "xqcj": "B", "jd": "3.0", "xf": "1" }
            ]}]
        }))
        .unwrap();
        let courses = courses_from_payload(payload);
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].course_name, "Drill");
    }

    #[test]
    fn empty_payload_yields_no_courses() {
        let payload: ScorePayload = serde_json::from_value(json!({})).unwrap();
        assert!(courses_from_payload(payload).is_empty());
    }

    #[test]
    fn extracts_session_id_from_redirect_url() {
        let url = "https://portal.pku.edu.cn/publicQuery/;jsessionid=ABC123DEF456;extra#frag";
        assert_eq!(extract_jsessionid(url), Some("ABC123DEF456"));
        assert_eq!(
            extract_jsessionid("https://portal.pku.edu.cn/publicQuery/;jsessionid=XYZ"),
            Some("XYZ")
        );
        assert_eq!(
            extract_jsessionid("https://portal.pku.edu.cn/publicQuery/"),
            None
        );
        assert_eq!(extract_jsessionid("https://x/;jsessionid="), None);
    }

    #[test]
    fn login_outcome_tolerates_missing_fields() {
        let outcome: LoginOutcome = serde_json::from_str("{}").unwrap();
        assert!(!outcome.success);
        assert!(outcome.token.is_empty());

        let ok: LoginOutcome =
            serde_json::from_str(r#"{"success": true, "token": "tok123"}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.token, "tok123");
    }
}
