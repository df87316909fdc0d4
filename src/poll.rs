//! Poll driver (C6): periodically feeds fresh PGN bytes to the sync
//! engine from a URL, a single file, or a directory of `*.pgn` files.
//!
//! Source shape is picked once, by argument inspection, matching §6's
//! classification rules: `http(s)://` prefix → URL; an existing directory
//! → directory walk; anything else → single-file re-read.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::RelayError;
use crate::pgn::{self, Game};

/// The three source shapes a `<source>` CLI argument can classify as.
#[derive(Debug, Clone)]
pub enum PollSource {
    Url(String),
    Directory(PathBuf),
    File(PathBuf),
}

impl PollSource {
    /// Classify a raw CLI `<source>` argument.
    pub fn classify(source: &str) -> PollSource {
        if source.starts_with("http://") || source.starts_with("https://") {
            return PollSource::Url(source.to_string());
        }
        let path = PathBuf::from(source);
        if path.is_dir() {
            PollSource::Directory(path)
        } else {
            PollSource::File(path)
        }
    }
}

/// Drives PGN acquisition for the relay's main loop. `F` is invoked with
/// every batch of games parsed out of one poll tick.
pub struct PollDriver {
    source: PollSource,
    poll_delay: Duration,
    http: reqwest::Client,
    processed: HashSet<PathBuf>,
}

impl PollDriver {
    pub fn new(source: PollSource, poll_delay: Duration) -> Self {
        PollDriver {
            source,
            poll_delay,
            http: reqwest::Client::new(),
            processed: HashSet::new(),
        }
    }

    /// Run the poll loop forever, calling `on_games` with each tick's
    /// parsed games and awaiting it before polling again (so one chapter's
    /// append loop never races the next tick's read of the same game).
    /// Returns only on an unrecoverable I/O or HTTP error.
    pub async fn run<F, Fut>(&mut self, mut on_games: F) -> Result<(), RelayError>
    where
        F: FnMut(Vec<Game>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        match self.source.clone() {
            PollSource::Url(url) => self.run_url(&url, &mut on_games).await,
            PollSource::File(path) => self.run_file(&path, &mut on_games).await,
            PollSource::Directory(dir) => self.run_directory(&dir, &mut on_games).await,
        }
    }

    async fn run_url<F, Fut>(&self, url: &str, on_games: &mut F) -> Result<(), RelayError>
    where
        F: FnMut(Vec<Game>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            let versioned = format!("{}?v={}", url, epoch_seconds());
            debug!("polling {}", versioned);
            let resp = self.http.get(&versioned).send().await?;
            let bytes = resp.bytes().await?;
            let text = pgn::decode_latin1(pgn::strip_bom(&bytes));
            self.feed(&text, on_games).await?;
            tokio::time::sleep(self.poll_delay).await;
        }
    }

    async fn run_file<F, Fut>(&self, path: &Path, on_games: &mut F) -> Result<(), RelayError>
    where
        F: FnMut(Vec<Game>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            let bytes = tokio::fs::read(path).await?;
            let text = String::from_utf8_lossy(pgn::strip_bom(&bytes)).into_owned();
            self.feed(&text, on_games).await?;
            tokio::time::sleep(self.poll_delay).await;
        }
    }

    async fn run_directory<F, Fut>(&mut self, dir: &Path, on_games: &mut F) -> Result<(), RelayError>
    where
        F: FnMut(Vec<Game>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map(|ext| ext == "pgn").unwrap_or(false))
                .collect();
            entries.sort();

            let mut processed_any = false;
            for path in entries {
                if self.processed.contains(&path) {
                    continue;
                }
                info!("polling {}", path.display());
                let bytes = tokio::fs::read(&path).await?;
                let text = String::from_utf8_lossy(pgn::strip_bom(&bytes)).into_owned();
                self.feed(&text, on_games).await?;
                self.processed.insert(path);
                processed_any = true;
                tokio::time::sleep(self.poll_delay).await;
            }
            if !processed_any {
                tokio::time::sleep(self.poll_delay).await;
            }
        }
    }

    async fn feed<F, Fut>(&self, text: &str, on_games: &mut F) -> Result<(), RelayError>
    where
        F: FnMut(Vec<Game>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        match pgn::parse_games(text) {
            Ok(games) => {
                on_games(games).await;
                Ok(())
            }
            Err(e) => {
                warn!("skipping malformed PGN this cycle: {}", e);
                Ok(())
            }
        }
    }
}

fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_and_https_as_url() {
        assert!(matches!(PollSource::classify("http://example.com/x.pgn"), PollSource::Url(_)));
        assert!(matches!(PollSource::classify("https://example.com/x.pgn"), PollSource::Url(_)));
    }

    #[test]
    fn classifies_existing_directory() {
        let dir = std::env::temp_dir().join(format!("pgnstudyrelay-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        assert!(matches!(
            PollSource::classify(dir.to_str().unwrap()),
            PollSource::Directory(_)
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn classifies_non_directory_path_as_file() {
        assert!(matches!(
            PollSource::classify("/definitely/not/a/real/dir/game.pgn"),
            PollSource::File(_)
        ));
    }
}
