use super::{SaveReceipt, SyncService, SyncStatus};
use crate::session::{Result, SessionError, Snapshot};

use log::{debug, trace};
use platform_dirs::AppDirs;
use reqwest::{header, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

const DEFAULT_API_HOST: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_api_host() -> String {
    DEFAULT_API_HOST.to_owned()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "install_id")]
    pub install_id: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(skip)]
    location: PathBuf,
}

impl Config {
    pub fn new() -> Result<Self> {
        let app_dirs = AppDirs::new(None, true).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no config directory")
        })?;
        Config::load_or_create(&app_dirs.config_dir.join("ExpSession"))
    }

    pub fn load_or_create(config_root: &Path) -> Result<Self> {
        fs::create_dir_all(config_root)?;

        let config_file = config_root.join("config.json");
        if config_file.exists() {
            let mut c: Config = serde_json::from_str(&fs::read_to_string(&config_file)?)?;
            c.location = config_file;
            Ok(c)
        } else {
            let c = Config {
                install_id: Uuid::new_v4().to_string(),
                api_host: default_api_host(),
                timeout_secs: default_timeout_secs(),
                location: config_file,
            };
            fs::write(&c.location, serde_json::to_string_pretty(&c)?)?;
            debug!("created config at {}", c.location.display());
            Ok(c)
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}

/// Client for the experiment server's `/sync/<session>/` endpoint.
pub struct ExpFactory {
    api_host: Url,
    http_client: reqwest::blocking::Client,
}

impl ExpFactory {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let cred = format!("user:{}", config.install_id);
        let cred_b64 = base64::encode_config(cred, base64::STANDARD);
        let hdr = format!("Basic {}", cred_b64);
        let mut auth_value = header::HeaderValue::from_str(hdr.as_str())
            .map_err(|e| SessionError::Persistence(e.to_string()))?;
        auth_value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth_value);

        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent())
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let api_host = Url::parse(&config.api_host).map_err(|e| {
            SessionError::Persistence(format!("invalid api host `{}`: {}", config.api_host, e))
        })?;

        Ok(ExpFactory {
            api_host,
            http_client: client,
        })
    }

    /// `<api_host>/sync/<session>/`, with the session id percent-encoded as a
    /// single path segment.
    fn sync_url(&self, session_id: &str) -> Result<Url> {
        let mut url = self.api_host.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SessionError::Persistence(format!("api host `{}` cannot hold a path", self.api_host))
            })?
            .pop_if_empty()
            .extend(["sync", session_id, ""]);
        Ok(url)
    }
}

/// `ExpSession/<version> <rustc version> <os>`, sent as the HTTP user agent
/// and recorded as the session's user agent.
pub fn user_agent() -> String {
    format!(
        "ExpSession/{version} {runtime_version} {os_info}",
        version = env!("CARGO_PKG_VERSION"),
        runtime_version = rustc_version_runtime::version(),
        os_info = os_info::get(),
    )
}

/// Pulls a snapshot out of a load response. The server may wrap the record
/// in a `taskdata` envelope, or answer with a bare acknowledgement when it
/// has nothing stored.
fn snapshot_from_body(body: &str) -> Result<Option<Snapshot>> {
    if body.trim().is_empty() {
        return Ok(None);
    }

    let mut value: Value = serde_json::from_str(body)?;
    if let Some(inner) = value.get_mut("taskdata") {
        value = inner.take();
    }
    if value.get("sessionId").is_none() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

impl SyncService for ExpFactory {
    fn load(&self, session_id: &str) -> Result<Option<Snapshot>> {
        let url = self.sync_url(session_id)?;
        trace!("GET {}", url);

        let res = self.http_client.get(url).send()?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = res.text()?;
        if !status.is_success() {
            return Err(SessionError::Persistence(format!("{}: {}", status, body)));
        }
        snapshot_from_body(&body)
    }

    fn save(&self, snapshot: &Snapshot, status: SyncStatus) -> Result<SaveReceipt> {
        let url = self.sync_url(&snapshot.session_id)?;
        trace!("POST {} ({:?})", url, status);

        let res = self
            .http_client
            .post(url)
            .json(&json!({ "taskdata": snapshot, "djstatus": status }))
            .send()?;
        let code = res.status();
        let body = res.text()?;
        if !code.is_success() {
            return Err(SessionError::Persistence(format!("{}: {}", code, body)));
        }

        let reply: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        Ok(SaveReceipt {
            status,
            finished_battery: reply["finished_battery"] == "FINISHED",
        })
    }
}
