use std::time::Duration;

use clap::Args;

/// How the result of a job is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// A single fetch, any failure is final.
    Once,
    /// Retry while the server reports the job isn't done yet.
    Poll { interval: Duration, timeout: Duration },
}

#[derive(Clone, Debug, Args)]
pub struct RemoteConfig {
    /// Base url of the reconstruction server.
    #[arg(
        long,
        env = "SPLATVIEW_SERVER_URL",
        help_heading = "Remote options",
        default_value = "http://localhost:8000/"
    )]
    pub server_url: String,

    /// Timeout for a single request, eg. "90s" or "5m".
    #[arg(
        long,
        help_heading = "Remote options",
        default_value = "2m",
        value_parser = humantime::parse_duration
    )]
    pub request_timeout: Duration,

    /// Poll for the result at this interval until it's ready.
    ///
    /// When not set the result is fetched exactly once.
    #[arg(long, help_heading = "Remote options", value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Give up polling after this long.
    #[arg(
        long,
        help_heading = "Remote options",
        default_value = "10m",
        value_parser = humantime::parse_duration
    )]
    pub poll_timeout: Duration,

    /// Ignore proxy settings from the environment.
    #[arg(long, help_heading = "Remote options", default_value = "false")]
    pub no_proxy: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000/".to_owned(),
            request_timeout: Duration::from_secs(120),
            poll_interval: None,
            poll_timeout: Duration::from_secs(600),
            no_proxy: false,
        }
    }
}

impl RemoteConfig {
    pub fn fetch_policy(&self) -> FetchPolicy {
        match self.poll_interval {
            Some(interval) => FetchPolicy::Poll {
                interval,
                timeout: self.poll_timeout,
            },
            None => FetchPolicy::Once,
        }
    }
}
