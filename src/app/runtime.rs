use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;

use super::landing::{BrowserResolver, LandingResolver, landing_page_filter};
use super::logging::init_logging;
use super::redirect::{HttpProbe, RedirectProbe, https_redirect_filter};
use super::types::{Cli, Config};
use super::webdriver::prepare_backend;

pub async fn run() -> io::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = Config::from(cli);

    let hosts = read_hosts(io::stdin().lock())?;
    tracing::info!("read {} hosts", hosts.len());

    let mut hosts = run_pipeline(hosts, &config).await;
    if config.sort {
        hosts.sort();
    }
    write_hosts(io::stdout().lock(), &hosts)
}

fn read_hosts(reader: impl BufRead) -> io::Result<Vec<String>> {
    let mut hosts = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let host = line.trim();
        if !host.is_empty() {
            hosts.push(host.to_string());
        }
    }
    Ok(hosts)
}

fn write_hosts(mut out: impl Write, hosts: &[String]) -> io::Result<()> {
    for host in hosts {
        writeln!(out, "{host}")?;
    }
    out.flush()
}

async fn run_pipeline(hosts: Vec<String>, config: &Config) -> Vec<String> {
    let probe = if config.https_filter {
        match HttpProbe::new(&config.probe) {
            Ok(probe) => Some(Arc::new(probe)),
            Err(err) => {
                tracing::error!("https redirect filter skipped: {err}");
                None
            }
        }
    } else {
        None
    };

    if !config.landing_filter {
        return apply_filters(hosts, config, probe, None::<Arc<BrowserResolver>>).await;
    }

    // The driver process lives as long as `backend`.
    let backend = match prepare_backend(&config.webdriver).await {
        Ok(backend) => Some(backend),
        Err(err) => {
            tracing::error!("landing page filter skipped: {err}");
            None
        }
    };
    let resolver = backend.as_ref().and_then(|backend| {
        BrowserResolver::new(&backend.endpoint, &config.webdriver)
            .map(Arc::new)
            .map_err(|err| tracing::error!("landing page filter skipped: {err}"))
            .ok()
    });

    let kept = apply_filters(hosts, config, probe, resolver).await;
    drop(backend);
    kept
}

async fn apply_filters<P, R>(
    mut hosts: Vec<String>,
    config: &Config,
    probe: Option<Arc<P>>,
    resolver: Option<Arc<R>>,
) -> Vec<String>
where
    P: RedirectProbe,
    R: LandingResolver,
{
    if let Some(probe) = probe {
        hosts = https_redirect_filter(hosts, probe, config.https_concurrency).await;
    }
    if let Some(resolver) = resolver {
        hosts = landing_page_filter(hosts, resolver, config.landing_concurrency).await;
    }
    hosts
}
