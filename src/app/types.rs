use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use super::pool::sanitize_concurrency;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:85.0) Gecko/20100101 Firefox/85.0";

#[derive(Debug, Parser, Clone)]
#[command(
    name = "hostsift",
    version,
    about = "Collapse recon hosts that are HTTPS-redirect aliases or land on the same page"
)]
pub struct Cli {
    #[arg(
        long = "c1",
        alias = "https-concurrency",
        value_name = "N",
        default_value_t = 10,
        help = "HTTPS redirect filter pool size"
    )]
    pub concurrency1: usize,

    #[arg(
        long = "c2",
        alias = "landing-concurrency",
        value_name = "N",
        default_value_t = 5,
        help = "landing page filter pool size"
    )]
    pub concurrency2: usize,

    #[arg(
        long = "f1",
        default_value_t = true,
        action = ArgAction::Set,
        help = "HTTPS redirect filter"
    )]
    pub filter1: bool,

    #[arg(
        long = "f2",
        default_value_t = true,
        action = ArgAction::Set,
        help = "landing page filter"
    )]
    pub filter2: bool,

    #[arg(short, long, value_name = "SECS", default_value_t = 10)]
    pub delay: u64,

    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub timeout: u64,

    #[arg(long, value_name = "N", default_value_t = 10)]
    pub max_redirects: usize,

    #[arg(long, value_name = "UA", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub navigation_timeout: u64,

    #[arg(long, value_name = "URL", default_value = "http://localhost:4444")]
    pub webdriver_url: String,

    #[arg(long, value_enum, default_value_t = BrowserArg::Chrome)]
    pub webdriver_browser: BrowserArg,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub webdriver_headless: bool,

    #[arg(long, value_name = "PATH")]
    pub webdriver_binary: Option<String>,

    #[arg(long, default_value_t = false)]
    pub no_webdriver_autostart: bool,

    #[arg(long, value_name = "MS", default_value_t = 12000)]
    pub webdriver_start_timeout_ms: u64,

    #[arg(long, default_value_t = false)]
    pub sort: bool,

    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum BrowserArg {
    Chrome,
    Firefox,
    Edge,
}

impl BrowserArg {
    pub fn driver_binary(self) -> &'static str {
        match self {
            BrowserArg::Chrome => "chromedriver",
            BrowserArg::Firefox => "geckodriver",
            BrowserArg::Edge => "msedgedriver",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_redirects: usize,
}

#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    pub endpoint: String,
    pub browser: BrowserArg,
    pub headless: bool,
    pub binary: Option<String>,
    pub autostart: bool,
    pub start_timeout: Duration,
    pub settle_delay: Duration,
    pub session_deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub https_concurrency: usize,
    pub landing_concurrency: usize,
    pub https_filter: bool,
    pub landing_filter: bool,
    pub sort: bool,
    pub probe: ProbeConfig,
    pub webdriver: WebDriverConfig,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            https_concurrency: sanitize_concurrency(cli.concurrency1),
            landing_concurrency: sanitize_concurrency(cli.concurrency2),
            https_filter: cli.filter1,
            landing_filter: cli.filter2,
            sort: cli.sort,
            probe: ProbeConfig {
                user_agent: cli.user_agent,
                timeout: Duration::from_secs(cli.timeout.max(1)),
                max_redirects: cli.max_redirects,
            },
            webdriver: WebDriverConfig {
                endpoint: cli.webdriver_url,
                browser: cli.webdriver_browser,
                headless: cli.webdriver_headless,
                binary: cli.webdriver_binary,
                autostart: !cli.no_webdriver_autostart,
                start_timeout: Duration::from_millis(cli.webdriver_start_timeout_ms),
                settle_delay: Duration::from_secs(cli.delay),
                session_deadline: Duration::from_secs(
                    cli.navigation_timeout.max(cli.delay.saturating_add(1)),
                ),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub host: String,
    pub final_url: String,
}

impl HostRecord {
    pub fn new(host: impl Into<String>) -> Self {
        HostRecord {
            host: host.into(),
            final_url: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_classic_flags() {
        let config = Config::from(Cli::try_parse_from(["hostsift"]).unwrap());
        assert_eq!(config.https_concurrency, 10);
        assert_eq!(config.landing_concurrency, 5);
        assert!(config.https_filter);
        assert!(config.landing_filter);
        assert_eq!(config.webdriver.settle_delay, Duration::from_secs(10));
        assert_eq!(config.probe.timeout, Duration::from_secs(10));
        assert_eq!(config.probe.user_agent, DEFAULT_USER_AGENT);
        assert!(config.webdriver.autostart);
        assert!(config.webdriver.headless);
    }

    #[test]
    fn filters_can_be_switched_off() {
        let cli = Cli::try_parse_from(["hostsift", "--f1", "false", "--f2=false", "--c1", "0"])
            .unwrap();
        let config = Config::from(cli);
        assert!(!config.https_filter);
        assert!(!config.landing_filter);
        assert_eq!(config.https_concurrency, 1);
    }

    #[test]
    fn session_deadline_always_outlasts_the_settle_delay() {
        let cli =
            Cli::try_parse_from(["hostsift", "-d", "90", "--navigation-timeout", "30"]).unwrap();
        let config = Config::from(cli);
        assert!(config.webdriver.session_deadline > config.webdriver.settle_delay);
    }
}
