use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::error::WebDriverError;
use super::hosts::hostname;
use super::pool::run_pool;
use super::types::{HostRecord, WebDriverConfig};
use super::webdriver::{Session, SessionOptions, WebDriverClient};

const LOCATION_SCRIPT: &str = "return window.location.href;";
const MAX_DIALOG_DISMISSALS: usize = 3;

pub trait LandingResolver: Send + Sync + 'static {
    fn final_url(&self, host: &str) -> impl Future<Output = Result<String, WebDriverError>> + Send;
}

pub struct BrowserResolver {
    client: WebDriverClient,
    options: SessionOptions,
    settle_delay: Duration,
    deadline: Duration,
}

impl BrowserResolver {
    pub fn new(endpoint: &str, config: &WebDriverConfig) -> Result<Self, WebDriverError> {
        let request_timeout = config.session_deadline + Duration::from_secs(30);
        let client = WebDriverClient::new(endpoint, request_timeout)?;
        Ok(BrowserResolver {
            client,
            options: SessionOptions {
                browser: config.browser,
                headless: config.headless,
                page_load_timeout: config.session_deadline,
            },
            settle_delay: config.settle_delay,
            deadline: config.session_deadline,
        })
    }

    // `opened` keeps the session reachable for teardown if the deadline fires.
    async fn visit(
        &self,
        opened: &mut Option<Session>,
        host: &str,
    ) -> Result<String, WebDriverError> {
        let session = opened.insert(self.client.create_session(&self.options).await?);
        self.land(session, host).await
    }

    async fn land(&self, session: &Session, host: &str) -> Result<String, WebDriverError> {
        match self.client.navigate(session, host).await {
            Err(err) if err.is_unexpected_alert() => self.dismiss_dialog(session, host).await,
            other => other?,
        }
        tokio::time::sleep(self.settle_delay).await;

        let mut dismissed = 0;
        loop {
            match self.client.execute_string(session, LOCATION_SCRIPT).await {
                Err(err) if err.is_unexpected_alert() && dismissed < MAX_DIALOG_DISMISSALS => {
                    dismissed += 1;
                    self.dismiss_dialog(session, host).await;
                }
                other => return other,
            }
        }
    }

    async fn dismiss_dialog(&self, session: &Session, host: &str) {
        tracing::debug!(host, "accepting javascript dialog");
        if let Err(err) = self.client.accept_alert(session).await {
            tracing::debug!(host, "dialog accept failed: {err}");
        }
    }
}

impl LandingResolver for BrowserResolver {
    async fn final_url(&self, host: &str) -> Result<String, WebDriverError> {
        let mut opened = None;
        let visit = self.visit(&mut opened, host);
        let outcome = match tokio::time::timeout(self.deadline, visit).await {
            Ok(result) => result,
            Err(_) => Err(WebDriverError::Deadline(self.deadline)),
        };
        if let Some(session) = opened
            && let Err(err) = self.client.delete_session(session).await
        {
            tracing::debug!(host, "session teardown failed: {err}");
        }
        outcome
    }
}

/// Pick one host per final URL, scanning records in order.
///
/// A record claims its final URL if nobody holds it yet, or if the record's
/// own hostname equals the final URL's hostname. A holder that merely
/// redirected there can therefore be displaced by a later self-hosted record,
/// but a self-hosted holder is only displaced by another self-hosted record.
/// Records without a final URL are ignored. Output follows the order in which
/// each final URL was first claimed.
pub fn select_representatives(records: &[HostRecord]) -> Vec<String> {
    let mut claimed: Vec<&str> = Vec::new();
    let mut chosen: HashMap<&str, &str> = HashMap::new();

    for record in records {
        let final_url = record.final_url.as_str();
        if final_url.is_empty() {
            continue;
        }
        let vacant = !chosen.contains_key(final_url);
        if vacant || hostname(final_url) == hostname(&record.host) {
            if vacant {
                claimed.push(final_url);
            }
            chosen.insert(final_url, record.host.as_str());
        }
    }

    claimed
        .into_iter()
        .filter_map(|url| chosen.get(url).map(|host| host.to_string()))
        .collect()
}

pub async fn landing_page_filter<R: LandingResolver>(
    hosts: Vec<String>,
    resolver: Arc<R>,
    concurrency: usize,
) -> Vec<String> {
    if hosts.is_empty() {
        return hosts;
    }
    let total = hosts.len();
    let jobs = hosts
        .into_iter()
        .map(HostRecord::new)
        .enumerate()
        .collect::<Vec<_>>();

    // each record is owned by exactly one worker until it is handed back
    let worker = move |(idx, mut record): (usize, HostRecord)| {
        let resolver = resolver.clone();
        async move {
            match resolver.final_url(&record.host).await {
                Ok(url) => {
                    tracing::debug!(host = %record.host, "landed on {url}");
                    record.final_url = url;
                }
                Err(err) => tracing::warn!(host = %record.host, "{err}"),
            }
            (idx, record)
        }
    };
    let mut resolved = run_pool(jobs, concurrency, worker).await;
    resolved.sort_by_key(|(idx, _)| *idx);
    let records = resolved
        .into_iter()
        .map(|(_, record)| record)
        .collect::<Vec<_>>();

    let kept = select_representatives(&records);
    tracing::info!("landing page filter: kept {} of {} hosts", kept.len(), total);
    kept
}
