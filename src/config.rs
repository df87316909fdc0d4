//! CLI argument parsing and runtime configuration (§6), the ambient-stack
//! analogue of the teacher's `BotConfig::from_env`: CLI flags are primary,
//! environment variables are convenience fallbacks for local development.

use clap::Parser;

use crate::error::RelayError;
use crate::study::client::Host;

/// `pgnstudyrelay <username> <password> <study_url> <source> [--poll_delay
/// <seconds>] [--log_ws <bool>]`
#[derive(Debug, Parser)]
#[command(name = "pgnstudyrelay", about = "Relay a live PGN feed into a remote study")]
struct Cli {
    /// A Lichess (or staging-host) username.
    username: Option<String>,
    /// The password for that username.
    password: Option<String>,
    /// The study URL moves should be relayed into; the user must have
    /// contributor access.
    study_url: Option<String>,
    /// A PGN URL to poll, a directory of already-polled `.pgn` files, or a
    /// single file to re-read on every tick.
    source: Option<String>,

    /// Seconds to wait between polling cycles. Accepts floats.
    #[arg(long, default_value_t = 1.0)]
    poll_delay: f64,

    /// Log every inbound/outbound websocket frame.
    #[arg(long, default_value_t = false)]
    log_ws: bool,
}

/// Fully-resolved runtime configuration for one relay run.
#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub host: Host,
    pub study_id: String,
    pub source: String,
    pub poll_delay: std::time::Duration,
    pub log_ws: bool,
}

impl Config {
    /// Parse CLI args, falling back to `LICHESS_USERNAME`/`LICHESS_PASSWORD`
    /// environment variables when the positional args are omitted.
    pub fn from_args() -> Result<Config, RelayError> {
        let cli = Cli::parse();

        let username = cli
            .username
            .or_else(|| std::env::var("LICHESS_USERNAME").ok())
            .ok_or_else(|| RelayError::AuthFailure("no username given".into()))?;
        let password = cli
            .password
            .or_else(|| std::env::var("LICHESS_PASSWORD").ok())
            .ok_or_else(|| RelayError::AuthFailure("no password given".into()))?;
        let study_url = cli
            .study_url
            .ok_or_else(|| RelayError::StudyUnavailable("no study_url given".into()))?;
        let source = cli
            .source
            .ok_or_else(|| RelayError::StudyUnavailable("no source given".into()))?;

        let (host, study_id) = parse_study_url(&study_url)?;

        Ok(Config {
            username,
            password,
            host,
            study_id,
            source,
            poll_delay: std::time::Duration::from_secs_f64(cli.poll_delay.max(0.0)),
            log_ws: cli.log_ws,
        })
    }
}

/// Derive the study host and id from a study URL: host from scheme+authority,
/// id from the final path segment.
fn parse_study_url(study_url: &str) -> Result<(Host, String), RelayError> {
    let without_scheme = study_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(study_url);
    let authority = without_scheme.split('/').next().unwrap_or("");
    let host = Host::from_authority(authority).ok_or_else(|| {
        RelayError::StudyUnavailable(format!("'{}' is not a supported study host", authority))
    })?;
    let study_id = without_scheme
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::StudyUnavailable(format!("'{}' has no study id", study_url)))?
        .to_string();
    Ok((host, study_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_live_study_url() {
        let (host, id) = parse_study_url("https://lichess.org/study/abcd1234").unwrap();
        assert_eq!(host, Host::Live);
        assert_eq!(id, "abcd1234");
    }

    #[test]
    fn parses_staging_study_url() {
        let (host, id) = parse_study_url("https://listage.ovh/study/wxyz9876").unwrap();
        assert_eq!(host, Host::Staging);
        assert_eq!(id, "wxyz9876");
    }

    #[test]
    fn rejects_unsupported_host() {
        assert!(parse_study_url("https://example.com/study/abcd").is_err());
    }

    #[test]
    fn rejects_url_with_no_trailing_segment() {
        assert!(parse_study_url("https://lichess.org/study/").is_err());
    }
}
