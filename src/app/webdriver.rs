use std::fs::{self, File};
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use url::Url;

use super::error::WebDriverError;
use super::types::{BrowserArg, WebDriverConfig};

static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub browser: BrowserArg,
    pub headless: bool,
    pub page_load_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: reqwest::Client,
    base: String,
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    profile_dir: Option<PathBuf>,
}

impl WebDriverClient {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, WebDriverError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| WebDriverError::Transport {
                op: "client build",
                source,
            })?;
        Ok(WebDriverClient {
            http,
            base: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn command(
        &self,
        op: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, WebDriverError> {
        let res = request
            .send()
            .await
            .map_err(|source| WebDriverError::Transport { op, source })?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|source| WebDriverError::Transport { op, source })?;
        parse_command_response(op, status.as_u16(), &body)
    }

    pub async fn create_session(
        &self,
        options: &SessionOptions,
    ) -> Result<Session, WebDriverError> {
        let profile_dir = match options.browser {
            BrowserArg::Firefox => None,
            BrowserArg::Chrome | BrowserArg::Edge => Some(fresh_profile_dir()),
        };
        let caps = capabilities(options, profile_dir.as_deref());
        let value = self
            .command(
                "session create",
                self.http.post(format!("{}/session", self.base)).json(&caps),
            )
            .await;
        let value = match value {
            Ok(value) => value,
            Err(err) => {
                remove_profile_dir(profile_dir.as_deref());
                return Err(err);
            }
        };

        match session_id_from(&value) {
            Some(id) => Ok(Session { id, profile_dir }),
            None => {
                remove_profile_dir(profile_dir.as_deref());
                Err(WebDriverError::MissingSessionId(clip_for_log(
                    &value.to_string(),
                    220,
                )))
            }
        }
    }

    pub async fn navigate(&self, session: &Session, url: &str) -> Result<(), WebDriverError> {
        self.command(
            "navigate",
            self.http
                .post(format!("{}/session/{}/url", self.base, session.id))
                .json(&json!({ "url": url })),
        )
        .await
        .map(|_| ())
    }

    pub async fn execute_string(
        &self,
        session: &Session,
        script: &str,
    ) -> Result<String, WebDriverError> {
        let value = self
            .command(
                "execute script",
                self.http
                    .post(format!("{}/session/{}/execute/sync", self.base, session.id))
                    .json(&json!({ "script": script, "args": [] })),
            )
            .await?;
        match value.get("value") {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            other => Err(WebDriverError::ScriptResult(clip_for_log(
                &other.unwrap_or(&Value::Null).to_string(),
                120,
            ))),
        }
    }

    pub async fn accept_alert(&self, session: &Session) -> Result<(), WebDriverError> {
        self.command(
            "accept alert",
            self.http
                .post(format!("{}/session/{}/alert/accept", self.base, session.id))
                .json(&json!({})),
        )
        .await
        .map(|_| ())
    }

    pub async fn delete_session(&self, session: Session) -> Result<(), WebDriverError> {
        let result = self
            .command(
                "delete session",
                self.http.delete(format!("{}/session/{}", self.base, session.id)),
            )
            .await
            .map(|_| ());
        remove_profile_dir(session.profile_dir.as_deref());
        result
    }
}

fn parse_command_response(
    op: &'static str,
    status: u16,
    body: &str,
) -> Result<Value, WebDriverError> {
    let parsed: Result<Value, _> = serde_json::from_str(body);
    if let Ok(value) = &parsed
        && let Some(envelope) = value
            .get("value")
            .and_then(|v| ErrorEnvelope::deserialize(v).ok())
    {
        return Err(WebDriverError::Protocol {
            error: envelope.error,
            message: if envelope.message.is_empty() {
                format!("unknown {op} error")
            } else {
                clip_for_log(&envelope.message, 260)
            },
        });
    }
    if !(200..300).contains(&status) {
        return Err(WebDriverError::Status {
            op,
            status,
            body: clip_for_log(body, 260),
        });
    }
    parsed.map_err(|source| WebDriverError::Parse { op, source })
}

fn session_id_from(value: &Value) -> Option<String> {
    value
        .pointer("/value/sessionId")
        .and_then(|v| v.as_str())
        .or_else(|| value.pointer("/sessionId").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

pub fn capabilities(options: &SessionOptions, profile_dir: Option<&Path>) -> Value {
    let timeouts = json!({
        "pageLoad": options.page_load_timeout.as_millis() as u64,
        "script": 30_000
    });
    let mut always_match = match options.browser {
        BrowserArg::Firefox => {
            let mut args = Vec::<String>::new();
            if options.headless {
                args.push("-headless".to_string());
            }
            json!({
                "browserName": "firefox",
                "moz:firefoxOptions": {
                    "args": args,
                    "prefs": {
                        "browser.cache.disk.enable": false,
                        "browser.cache.memory.enable": false,
                        "network.http.use-cache": false
                    }
                }
            })
        }
        BrowserArg::Chrome | BrowserArg::Edge => {
            let mut args = Vec::<String>::new();
            if let Some(dir) = profile_dir {
                args.push(format!("--user-data-dir={}", dir.display()));
            }
            if options.headless {
                args.push("--headless=new".to_string());
            }
            args.push("--ignore-certificate-errors".to_string());
            args.push("--disable-gpu".to_string());
            args.push("--disable-dev-shm-usage".to_string());
            args.push("--no-first-run".to_string());
            args.push("--no-default-browser-check".to_string());
            args.push("--disable-crash-reporter".to_string());
            args.push("--disk-cache-size=0".to_string());
            if !cfg!(target_os = "macos") {
                args.push("--no-sandbox".to_string());
            }
            if options.browser == BrowserArg::Edge {
                json!({
                    "browserName": "MicrosoftEdge",
                    "ms:edgeOptions": { "args": args }
                })
            } else {
                json!({
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                })
            }
        }
    };
    always_match["acceptInsecureCerts"] = json!(true);
    always_match["unhandledPromptBehavior"] = json!("accept");
    always_match["timeouts"] = timeouts;

    json!({ "capabilities": { "alwaysMatch": always_match } })
}

fn fresh_profile_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "hostsift-profile-{}-{}-{}",
        std::process::id(),
        Utc::now().timestamp_millis(),
        PROFILE_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    if let Err(err) = fs::create_dir_all(&dir) {
        tracing::debug!("profile dir {} not created: {err}", dir.display());
    }
    dir
}

fn remove_profile_dir(dir: Option<&Path>) {
    if let Some(dir) = dir {
        let _ = fs::remove_dir_all(dir);
    }
}

fn clip_for_log(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &input[..cut]),
        None => input.to_string(),
    }
}

#[derive(Debug)]
pub struct WebDriverBackend {
    pub endpoint: String,
    child: Option<Child>,
}

impl Drop for WebDriverBackend {
    fn drop(&mut self) {
        if let Some(ref mut c) = self.child {
            let _ = c.kill();
            let _ = c.wait();
            tracing::debug!("stopped webdriver at {}", self.endpoint);
        }
    }
}

pub async fn prepare_backend(
    config: &WebDriverConfig,
) -> Result<WebDriverBackend, WebDriverError> {
    let requested = local_endpoint(&config.endpoint);
    let mut errors = Vec::new();

    if config.autostart {
        match free_local_port() {
            Ok(port) => {
                let endpoint = format!("http://127.0.0.1:{port}");
                match start_webdriver(config, port, &endpoint).await {
                    Ok(child) => {
                        tracing::info!("webdriver autostarted at {endpoint}");
                        return Ok(WebDriverBackend {
                            endpoint,
                            child: Some(child),
                        });
                    }
                    Err(err) => {
                        tracing::debug!("autostart failed at {endpoint}: {err}");
                        errors.push(format!("autostart at {endpoint}: {err}"));
                    }
                }
            }
            Err(err) => errors.push(format!("no free local port: {err}")),
        }
    }

    if endpoint_accepts(&requested).await {
        tracing::info!("using webdriver endpoint {requested}");
        return Ok(WebDriverBackend {
            endpoint: requested,
            child: None,
        });
    }
    errors.push(format!("endpoint {requested} unreachable"));
    Err(WebDriverError::Backend(errors.join(" || ")))
}

async fn start_webdriver(
    config: &WebDriverConfig,
    port: u16,
    endpoint: &str,
) -> Result<Child, String> {
    let binary = config
        .binary
        .clone()
        .unwrap_or_else(|| config.browser.driver_binary().to_string());
    if !driver_runs(&binary).await {
        return Err(format!("{binary} not found"));
    }

    let log_path = std::env::temp_dir().join(format!("hostsift-webdriver-{port}.log"));
    let log_file = File::options()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)
        .map_err(|e| format!("failed to open webdriver log {}: {e}", log_path.display()))?;
    let log_file_err = log_file
        .try_clone()
        .map_err(|e| format!("failed to clone webdriver log handle: {e}"))?;

    let mut cmd = Command::new(&binary);
    configure_webdriver_command(&mut cmd, &binary, port);
    cmd.stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .stdin(Stdio::null());

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn {binary}: {e}"))?;
    let steps = (config.start_timeout.as_millis() / 200).max(1);
    for _ in 0..steps {
        if endpoint_accepts(endpoint).await {
            return Ok(child);
        }
        if let Ok(Some(status)) = child.try_wait() {
            let mut err = format!("{binary} exited early with status {status}");
            if let Some(tail) = log_tail(&log_path, 30) {
                err = format!("{err}; tail: {tail}");
            }
            return Err(err);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let _ = child.kill();
    let _ = child.wait();
    let mut err = format!(
        "{binary} did not become ready in time (log: {})",
        log_path.display()
    );
    if let Some(tail) = log_tail(&log_path, 30) {
        err = format!("{err}; tail: {tail}");
    }
    Err(err)
}

fn configure_webdriver_command(cmd: &mut Command, bin: &str, port: u16) {
    let lower = bin.to_ascii_lowercase();
    if lower.contains("geckodriver") {
        cmd.arg("--port").arg(port.to_string());
        return;
    }
    cmd.arg(format!("--port={port}"));
    if lower.contains("chromedriver") {
        cmd.arg("--log-level=SEVERE");
    }
}

async fn endpoint_accepts(endpoint: &str) -> bool {
    let Some((host, port)) = Url::parse(endpoint).ok().and_then(|url| {
        let port = url.port_or_known_default().unwrap_or(4444);
        url.host_str().map(|host| (host.to_string(), port))
    }) else {
        return false;
    };
    let connect = TcpStream::connect((host.as_str(), port));
    matches!(
        tokio::time::timeout(Duration::from_secs(2), connect).await,
        Ok(Ok(_))
    )
}

// loopback endpoints are pinned to 127.0.0.1
fn local_endpoint(endpoint: &str) -> String {
    let Ok(url) = Url::parse(endpoint) else {
        return endpoint.to_string();
    };
    match url.host_str() {
        Some("localhost" | "127.0.0.1") => format!(
            "{}://127.0.0.1:{}",
            url.scheme(),
            url.port_or_known_default().unwrap_or(4444)
        ),
        _ => endpoint.trim_end_matches('/').to_string(),
    }
}

async fn driver_runs(bin: &str) -> bool {
    let path = PathBuf::from(bin);
    if path.is_absolute() || path.components().count() > 1 {
        return path.exists();
    }
    let bin = bin.to_string();
    tokio::task::spawn_blocking(move || {
        Command::new(bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    })
    .await
    .unwrap_or(false)
}

fn log_tail(path: &Path, lines: usize) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let all = text.lines().collect::<Vec<_>>();
    let tail = all[all.len().saturating_sub(lines.max(1))..].join(" | ");
    (!tail.is_empty()).then_some(tail)
}

fn free_local_port() -> std::io::Result<u16> {
    Ok(TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?.local_addr()?.port())
}
