use anyhow::Result;
use serde::Deserialize;
use std::fs;
use tracing::warn;

fn default_chart_url() -> String {
    "https://www.imdb.com/chart/top/".to_string()
}

fn default_database_path() -> String {
    "imdb.db".to_string()
}

fn default_csv_dir() -> String {
    "data".to_string()
}

fn default_limit() -> usize {
    50
}

fn default_max_concurrent() -> usize {
    4
}

fn default_requests_per_sec() -> u32 {
    1
}

fn default_sinks() -> String {
    "all".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_chart_url")]
    pub chart_url: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_csv_dir")]
    pub csv_dir: String,
    /// How many chart entries to process, counted from rank 1.
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_requests_per_sec")]
    pub requests_per_sec: u32,
    /// "all", "csv" or "db".
    #[serde(default = "default_sinks")]
    pub sinks: String,
    /// Outbound proxies (http://, socks4://, socks5://). Empty = direct.
    #[serde(default)]
    pub proxies: Vec<String>,
    /// User-Agent pool; a built-in list is used when empty.
    #[serde(default)]
    pub user_agents: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chart_url: default_chart_url(),
            database_path: default_database_path(),
            csv_dir: default_csv_dir(),
            limit: default_limit(),
            max_concurrent: default_max_concurrent(),
            requests_per_sec: default_requests_per_sec(),
            sinks: default_sinks(),
            proxies: Vec::new(),
            user_agents: Vec::new(),
        }
    }
}

pub fn load(path: Option<&str>) -> Result<Config> {
    let mut config = match path {
        Some(p) => {
            let text = fs::read_to_string(p)?;
            serde_json::from_str(&text)?
        }
        None => Config::default(),
    };

    // Environment wins over the file
    if let Ok(db) = std::env::var("DATABASE_PATH") {
        config.database_path = db;
    }
    if let Ok(dir) = std::env::var("CSV_DIR") {
        config.csv_dir = dir;
    }
    if let Ok(limit) = std::env::var("CHART_LIMIT") {
        match limit.parse() {
            Ok(n) => config.limit = n,
            Err(_) => warn!(value = %limit, "ignoring unparseable CHART_LIMIT override"),
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_chart_limit_override_falls_back() {
        unsafe { std::env::set_var("CHART_LIMIT", "many") };
        let config = load(None).unwrap();
        assert_eq!(config.limit, 50);
        unsafe { std::env::remove_var("CHART_LIMIT") };
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config: Config = serde_json::from_str(r#"{"limit": 10}"#).unwrap();
        assert_eq!(config.limit, 10);
        assert_eq!(config.database_path, "imdb.db");
        assert_eq!(config.chart_url, "https://www.imdb.com/chart/top/");
        assert_eq!(config.sinks, "all");
        assert!(config.proxies.is_empty());
    }
}
