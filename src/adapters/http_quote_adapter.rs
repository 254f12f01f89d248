//! HTTP market-data source adapter.
//!
//! A data source is described declaratively: URL templates with wildcard
//! slots, a response-parent path, the keys holding symbol/price/volume, and
//! a rolling rate limit. Responses can be memoised for the process
//! lifetime; cache hits do not count against the limit.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tracing::warn;

use crate::domain::error::TraderError;
use crate::domain::tick::Tick;
use crate::ports::config_port::ConfigPort;
use crate::ports::quote_port::{Quote, QuotePort};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

/// Rolling request counter. Once `max_requests` land inside the window the
/// next acquire sleeps until the window expires, then resets. State is
/// process-local and does not survive restarts.
pub struct RateLimiter {
    limit: RateLimit,
    count: u32,
    window_start: Option<Instant>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        RateLimiter {
            limit,
            count: 0,
            window_start: None,
        }
    }

    pub fn acquire(&mut self) {
        let now = Instant::now();
        match self.window_start {
            None => {
                self.window_start = Some(now);
                self.count = 1;
            }
            Some(start) => {
                let elapsed = now.duration_since(start);
                if elapsed >= self.limit.window {
                    self.window_start = Some(now);
                    self.count = 1;
                } else if self.count < self.limit.max_requests {
                    self.count += 1;
                } else {
                    let wait = self.limit.window - elapsed;
                    warn!(wait_ms = wait.as_millis() as u64, "rate limit reached, sleeping");
                    std::thread::sleep(wait);
                    self.window_start = Some(Instant::now());
                    self.count = 1;
                }
            }
        }
    }
}

/// Declarative descriptor for one HTTP data source.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceConfig {
    pub name: String,
    pub quote_template: String,
    pub intraday_template: String,
    pub quote_parent: String,
    pub intraday_parent: String,
    pub symbol_key: String,
    pub price_key: String,
    pub volume_key: String,
    /// Separator for the parent path, usually `.`.
    pub delimiter: String,
    pub wildcards: HashMap<String, String>,
    pub limit: RateLimit,
}

const KNOWN_KEYS: &[&str] = &[
    "quote_url",
    "intraday_url",
    "quote_parent",
    "intraday_parent",
    "symbol_key",
    "price_key",
    "volume_key",
    "delimiter",
    "max_requests",
    "window_secs",
];

impl DataSourceConfig {
    /// Read the `[source.<name>]` section. Any key beyond the recognised
    /// set becomes a wildcard substitution (api keys, intervals, ...).
    pub fn from_config(config: &dyn ConfigPort, name: &str) -> Result<Self, TraderError> {
        let section = format!("source.{name}");
        let quote_template = config.get_string(&section, "quote_url").ok_or_else(|| {
            TraderError::ConfigMissing {
                section: section.clone(),
                key: "quote_url".into(),
            }
        })?;
        let intraday_template = config
            .get_string(&section, "intraday_url")
            .unwrap_or_else(|| quote_template.clone());

        let mut wildcards = HashMap::new();
        for key in config.section_keys(&section) {
            if KNOWN_KEYS.contains(&key.as_str()) {
                continue;
            }
            if let Some(value) = config.get_string(&section, &key) {
                wildcards.insert(key, value);
            }
        }

        Ok(DataSourceConfig {
            name: name.to_string(),
            quote_template,
            intraday_template,
            quote_parent: config
                .get_string(&section, "quote_parent")
                .unwrap_or_default(),
            intraday_parent: config
                .get_string(&section, "intraday_parent")
                .unwrap_or_default(),
            symbol_key: config
                .get_string(&section, "symbol_key")
                .unwrap_or_else(|| "symbol".into()),
            price_key: config
                .get_string(&section, "price_key")
                .unwrap_or_else(|| "price".into()),
            volume_key: config
                .get_string(&section, "volume_key")
                .unwrap_or_else(|| "volume".into()),
            delimiter: config
                .get_string(&section, "delimiter")
                .unwrap_or_else(|| ".".into()),
            wildcards,
            limit: RateLimit {
                max_requests: config.get_int(&section, "max_requests", 5) as u32,
                window: Duration::from_secs(config.get_int(&section, "window_secs", 60) as u64),
            },
        })
    }

    /// Serialised descriptor for the data_sources audit row. Credentials
    /// in the wildcard map are not included.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "name": self.name,
            "quote_url": self.quote_template,
            "intraday_url": self.intraday_template,
            "max_requests": self.limit.max_requests,
            "window_secs": self.limit.window.as_secs(),
        })
        .to_string()
    }

    fn render(&self, template: &str, symbol: &str) -> String {
        let mut url = template.replace("{symbol}", symbol);
        for (key, value) in &self.wildcards {
            url = url.replace(&format!("{{{key}}}"), value);
        }
        url
    }
}

/// Descend `value` along `path` split by `delimiter`. An empty path is the
/// value itself.
fn navigate<'v>(value: &'v Value, path: &str, delimiter: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for part in path.split(delimiter) {
        current = current.get(part)?;
    }
    Some(current)
}

fn as_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Extract a quote from a response body. A missing parent is `Ok(None)`.
fn parse_quote(
    source: &DataSourceConfig,
    symbol: &str,
    body: &str,
) -> Result<Option<Quote>, TraderError> {
    let json: Value = serde_json::from_str(body).map_err(|e| TraderError::Source {
        source_name: source.name.clone(),
        status: 200,
        message: format!("unparseable body: {e}"),
    })?;
    let Some(parent) = navigate(&json, &source.quote_parent, &source.delimiter) else {
        warn!(source = %source.name, symbol, "response parent absent, no quote");
        return Ok(None);
    };

    let price = parent
        .get(&source.price_key)
        .and_then(as_f64)
        .ok_or_else(|| TraderError::Source {
            source_name: source.name.clone(),
            status: 200,
            message: format!("missing price key {}", source.price_key),
        })?;
    let quote_symbol = parent
        .get(&source.symbol_key)
        .and_then(|v| v.as_str())
        .unwrap_or(symbol)
        .to_string();
    let volume = parent.get(&source.volume_key).and_then(as_i64).unwrap_or(0);

    Ok(Some(Quote {
        symbol: quote_symbol,
        price,
        volume,
    }))
}

/// Extract an intraday series. Provider timestamps are taken as UTC and
/// converted to `timezone`; ordering follows the timestamp key ascending.
fn parse_intraday(
    source: &DataSourceConfig,
    symbol: &str,
    body: &str,
    timezone: Tz,
) -> Result<Option<Vec<Tick>>, TraderError> {
    let json: Value = serde_json::from_str(body).map_err(|e| TraderError::Source {
        source_name: source.name.clone(),
        status: 200,
        message: format!("unparseable body: {e}"),
    })?;
    let Some(parent) = navigate(&json, &source.intraday_parent, &source.delimiter) else {
        warn!(source = %source.name, symbol, "response parent absent, no series");
        return Ok(None);
    };
    let Some(entries) = parent.as_object() else {
        warn!(source = %source.name, symbol, "series parent is not an object");
        return Ok(None);
    };

    let mut ticks = Vec::new();
    for (raw_ts, entry) in entries {
        let Some(utc) = parse_timestamp(raw_ts) else {
            continue;
        };
        let local = Utc
            .from_utc_datetime(&utc)
            .with_timezone(&timezone)
            .naive_local();
        let Some(price) = entry.get(&source.price_key).and_then(as_f64) else {
            continue;
        };
        let volume = entry.get(&source.volume_key).and_then(as_i64).unwrap_or(0);
        ticks.push(Tick {
            date_time: local,
            symbol: symbol.to_string(),
            value: price,
            volume,
        });
    }
    ticks.sort_by_key(|t| t.date_time);
    Ok(Some(ticks))
}

pub struct HttpQuoteAdapter {
    client: reqwest::blocking::Client,
    source: DataSourceConfig,
    timezone: Tz,
    limiter: Mutex<RateLimiter>,
    cache: Option<Mutex<HashMap<String, String>>>,
}

impl HttpQuoteAdapter {
    pub fn new(
        source: DataSourceConfig,
        timezone: Tz,
        timeout: Duration,
        caching: bool,
    ) -> Result<Self, TraderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TraderError::Transport {
                endpoint: source.name.clone(),
                reason: e.to_string(),
            })?;
        let limiter = Mutex::new(RateLimiter::new(source.limit));
        Ok(HttpQuoteAdapter {
            client,
            source,
            timezone,
            limiter,
            cache: caching.then(|| Mutex::new(HashMap::new())),
        })
    }

    /// Fetch a URL through the cache and the rate limiter. Non-2xx raises
    /// with the status, the source name, and the body's message field.
    fn get(&self, url: &str) -> Result<String, TraderError> {
        if let Some(cache) = &self.cache {
            if let Some(body) = cache.lock().unwrap().get(url) {
                return Ok(body.clone());
            }
        }

        self.limiter.lock().unwrap().acquire();

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| TraderError::Transport {
                endpoint: url.to_string(),
                reason: e.to_string(),
            })?;
        let status = response.status();
        let body = response.text().map_err(|e| TraderError::Transport {
            endpoint: url.to_string(),
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or(body);
            return Err(TraderError::Source {
                source_name: self.source.name.clone(),
                status: status.as_u16(),
                message,
            });
        }

        if let Some(cache) = &self.cache {
            cache.lock().unwrap().insert(url.to_string(), body.clone());
        }
        Ok(body)
    }
}

impl QuotePort for HttpQuoteAdapter {
    fn quote(&self, symbol: &str) -> Result<Option<Quote>, TraderError> {
        let url = self.source.render(&self.source.quote_template, symbol);
        let body = self.get(&url)?;
        parse_quote(&self.source, symbol, &body)
    }

    fn intraday(&self, symbol: &str) -> Result<Option<Vec<Tick>>, TraderError> {
        let url = self.source.render(&self.source.intraday_template, symbol);
        let body = self.get(&url)?;
        parse_intraday(&self.source, symbol, &body, self.timezone)
    }
}
