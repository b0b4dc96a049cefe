use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{CONNECTION, LOCATION, USER_AGENT};

use super::error::ProbeError;
use super::hosts::{
    apply_removals, canonical_forms, contains_any, group_hosts, hostname, passes_through,
    remove_first,
};
use super::pool::run_pool;
use super::types::ProbeConfig;

pub trait RedirectProbe: Send + Sync + 'static {
    fn redirect_chain(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Vec<String>, ProbeError>> + Send;
}

pub struct HttpProbe {
    client: reqwest::Client,
    user_agent: String,
    timeout: Duration,
    max_redirects: usize,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(0)
            .timeout(config.timeout)
            .build()?;
        Ok(HttpProbe {
            client,
            user_agent: config.user_agent.clone(),
            timeout: config.timeout,
            max_redirects: config.max_redirects,
        })
    }

    async fn walk(&self, start: &str) -> Result<Vec<String>, ProbeError> {
        let mut chain = Vec::new();
        let mut current = start.to_string();

        for _ in 0..=self.max_redirects {
            let response = self
                .client
                .get(&current)
                .header(USER_AGENT, &self.user_agent)
                .header(CONNECTION, "close")
                .send()
                .await?;
            let url = response.url().clone();
            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .unwrap_or_default();
            if let Err(err) = response.bytes().await {
                tracing::debug!(host = start, "body drain failed for {url}: {err}");
            }
            chain.push(url.to_string());

            if !follows_redirect(status) || location.is_empty() {
                return Ok(chain);
            }
            current = url
                .join(&location)
                .map_err(|source| ProbeError::InvalidLocation {
                    location: location.clone(),
                    source,
                })?
                .to_string();
        }

        Err(ProbeError::TooManyRedirects(self.max_redirects))
    }
}

impl RedirectProbe for HttpProbe {
    async fn redirect_chain(&self, url: &str) -> Result<Vec<String>, ProbeError> {
        tokio::time::timeout(self.timeout, self.walk(url))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }
}

fn follows_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Alias,
    Distinct,
    Unreachable,
}

// Only groups holding a literal `https://{hostname}` or `:443` member qualify.
pub fn probe_candidates(hosts: &[String]) -> Vec<String> {
    let mut candidates = Vec::new();
    for (name, group) in group_hosts(hosts) {
        let canonical = canonical_forms(&name, false);
        if !contains_any(&group, &canonical) || group.len() < 2 {
            continue;
        }
        let mut members = group;
        for form in &canonical {
            remove_first(&mut members, form);
        }
        candidates.extend(members);
    }
    candidates
}

async fn judge<P: RedirectProbe>(probe: &P, host: &str) -> Verdict {
    match probe.redirect_chain(host).await {
        Ok(chain) => {
            if passes_through(&chain, &canonical_forms(&hostname(host), true)) {
                tracing::debug!(host, "redirects to its canonical HTTPS host");
                Verdict::Alias
            } else {
                Verdict::Distinct
            }
        }
        Err(err) => {
            tracing::warn!(host, "{err}");
            Verdict::Unreachable
        }
    }
}

pub async fn https_redirect_filter<P: RedirectProbe>(
    hosts: Vec<String>,
    probe: Arc<P>,
    concurrency: usize,
) -> Vec<String> {
    let candidates = probe_candidates(&hosts);
    if candidates.is_empty() {
        return hosts;
    }
    tracing::info!(
        "probing {} of {} hosts for HTTPS redirects",
        candidates.len(),
        hosts.len()
    );

    let outcomes = run_pool(candidates, concurrency, move |host: String| {
        let probe = probe.clone();
        async move {
            let verdict = judge(probe.as_ref(), &host).await;
            (host, verdict)
        }
    })
    .await;

    let (mut aliases, mut unreachable) = (Vec::new(), Vec::new());
    for (host, verdict) in outcomes {
        match verdict {
            Verdict::Alias => aliases.push(host),
            Verdict::Unreachable => unreachable.push(host),
            Verdict::Distinct => {}
        }
    }
    tracing::info!(
        "https redirect filter: {} aliases, {} unreachable",
        aliases.len(),
        unreachable.len()
    );

    let hosts = apply_removals(hosts, &aliases);
    apply_removals(hosts, &unreachable)
}
