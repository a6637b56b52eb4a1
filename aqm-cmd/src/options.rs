//! Source selection flags shared by every subcommand.

use aqm_feeds::sources::{catalogue, SourceConfig};
use aqm_feeds::tabular::PartialPolicy;
use aqm_feeds::transport::FeedClient;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone, Default)]
pub struct SourceOptions {
    /// Base URL for the AirFire exports (monitors, purpleair, HMS fires, CalFire)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Per-source load timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Keep the valid rows of a partially malformed table instead of failing the source
    #[arg(long)]
    pub keep_valid_rows: bool,

    /// Only load these sources (comma separated catalogue names)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Read a source from local files: NAME=PATH[,PATH]. Monitor sources take metadata then data.
    #[arg(long = "source-file", value_name = "NAME=PATHS")]
    pub source_files: Vec<String>,

    /// Initial backoff between retries in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub backoff_ms: u64,
}

fn parse_source_file(raw: &str) -> anyhow::Result<(String, Vec<PathBuf>)> {
    let (name, paths) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected NAME=PATH[,PATH], got {:?}", raw))?;
    let paths: Vec<PathBuf> = paths
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect();
    if paths.is_empty() {
        anyhow::bail!("no paths given for source {}", name);
    }
    Ok((name.trim().to_string(), paths))
}

impl SourceOptions {
    /// The catalogue with every override applied, in catalogue order.
    pub fn sources(&self) -> anyhow::Result<Vec<SourceConfig>> {
        let mut overrides = Vec::new();
        for raw in &self.source_files {
            overrides.push(parse_source_file(raw)?);
        }
        let all = catalogue();
        for name in self.only.iter().chain(overrides.iter().map(|(n, _)| n)) {
            if !all.iter().any(|s| &s.name == name) {
                anyhow::bail!("unknown source {}", name);
            }
        }

        let mut sources = Vec::new();
        for mut source in all {
            if !self.only.is_empty() && !self.only.contains(&source.name) {
                continue;
            }
            if let Some(base_url) = &self.base_url {
                source = source.with_base_url(base_url);
            }
            if let Some(secs) = self.timeout_secs {
                source = source.with_timeout(Duration::from_secs(secs));
            }
            if self.keep_valid_rows {
                source = source.with_policy(PartialPolicy::KeepValid);
            }
            if let Some((_, paths)) = overrides.iter().find(|(n, _)| *n == source.name) {
                source = source.with_file_override(paths)?;
            }
            sources.push(source);
        }
        Ok(sources)
    }

    pub fn client(&self) -> FeedClient {
        FeedClient::default().with_initial_backoff(Duration::from_millis(self.backoff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqm_feeds::sources::Address;

    #[test]
    fn test_defaults_are_the_catalogue() {
        let sources = SourceOptions::default().sources().unwrap();
        assert_eq!(sources.len(), catalogue().len());
    }

    #[test]
    fn test_overrides() {
        let options = SourceOptions {
            only: vec!["airnow".to_string(), "calfire".to_string()],
            source_files: vec!["airnow=meta.csv, data.csv".to_string()],
            keep_valid_rows: true,
            timeout_secs: Some(5),
            ..Default::default()
        };
        let sources = options.sources().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(
            sources[0].addresses,
            vec![
                Address::Path(PathBuf::from("meta.csv")),
                Address::Path(PathBuf::from("data.csv"))
            ]
        );
        assert_eq!(sources[0].policy, PartialPolicy::KeepValid);
        assert_eq!(sources[1].timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_bad_overrides_are_rejected() {
        let unknown = SourceOptions {
            source_files: vec!["smoke=a.csv".to_string()],
            ..Default::default()
        };
        assert!(unknown.sources().is_err());
        let wrong_count = SourceOptions {
            source_files: vec!["airnow=meta.csv".to_string()],
            ..Default::default()
        };
        assert!(wrong_count.sources().is_err());
        assert!(parse_source_file("calfire").is_err());
    }
}
