use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ScrapeError;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(90);

// Used when no user_agents are configured and no dynamic source is available.
const FALLBACK_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/114.0.5735.198 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/14.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:115.0) Gecko/20100101 Firefox/115.0",
];

pub struct HeaderSet {
    pub user_agent: String,
}

/// Per-request header decoration. One operation: produce the next set.
/// Rotation state lives inside the implementation.
pub trait HeaderRotation: Send + Sync {
    fn next(&self) -> HeaderSet;
}

pub struct RotatingAgents {
    agents: Vec<String>,
    cursor: AtomicUsize,
}

impl RotatingAgents {
    pub fn new(configured: &[String]) -> Self {
        let agents = if configured.is_empty() {
            FALLBACK_AGENTS.iter().map(|a| a.to_string()).collect()
        } else {
            configured.to_vec()
        };
        Self {
            agents,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl HeaderRotation for RotatingAgents {
    fn next(&self) -> HeaderSet {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.agents.len();
        HeaderSet {
            user_agent: self.agents[i].clone(),
        }
    }
}

struct ProxyClient {
    client: Client,
    proxy: Option<String>,
}

/// Shared HTTP capability for both fetchers: one politeness gate in front of
/// every outbound request, User-Agent rotation, and an optional proxy pool
/// rotated per request.
pub struct Fetcher {
    clients: Vec<ProxyClient>,
    rotation: Box<dyn HeaderRotation>,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    cursor: AtomicUsize,
    last_proxy: AtomicUsize,
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("es-ES,es;q=0.9,en;q=0.8"),
    );
    headers
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let mut clients = Vec::new();

        if config.proxies.is_empty() {
            let client = Client::builder()
                .timeout(DOWNLOAD_TIMEOUT)
                .default_headers(default_headers())
                .build()?;
            clients.push(ProxyClient {
                client,
                proxy: None,
            });
        } else {
            for proxy in &config.proxies {
                let client = Client::builder()
                    .timeout(DOWNLOAD_TIMEOUT)
                    .default_headers(default_headers())
                    .proxy(reqwest::Proxy::all(proxy)?)
                    .build()?;
                clients.push(ProxyClient {
                    client,
                    proxy: Some(proxy.clone()),
                });
            }
        }

        let rps = NonZeroU32::new(config.requests_per_sec.max(1)).unwrap();
        let limiter = RateLimiter::direct(Quota::per_second(rps));

        Ok(Self {
            clients,
            rotation: Box::new(RotatingAgents::new(&config.user_agents)),
            limiter,
            cursor: AtomicUsize::new(0),
            last_proxy: AtomicUsize::new(usize::MAX),
        })
    }

    pub async fn get_html(&self, url: &str) -> Result<String, ScrapeError> {
        self.limiter.until_ready().await;

        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        let entry = &self.clients[i];

        if entry.proxy.is_some() && self.last_proxy.swap(i, Ordering::Relaxed) != i {
            self.log_effective_ip(entry).await;
        }

        let headers = self.rotation.next();
        debug!(url = %url, "GET");

        let response = entry
            .client
            .get(url)
            .header(USER_AGENT, headers.user_agent)
            .send()
            .await
            .map_err(|source| ScrapeError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status,
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|source| ScrapeError::Fetch {
            url: url.to_string(),
            source,
        })
    }

    // Evidence that the rotation actually changed our egress address.
    async fn log_effective_ip(&self, entry: &ProxyClient) {
        let proxy = entry.proxy.as_deref().unwrap_or("direct");
        let lookup = entry
            .client
            .get("https://api.ipify.org")
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match lookup {
            Ok(resp) => match resp.text().await {
                Ok(ip) => info!(proxy = %proxy, ip = %ip.trim(), "proxy rotated"),
                Err(e) => warn!(proxy = %proxy, error = %e, "proxy rotated, IP lookup failed"),
            },
            Err(e) => warn!(proxy = %proxy, error = %e, "proxy rotated, IP lookup failed"),
        }
    }
}
