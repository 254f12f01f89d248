//! Live brokerage REST adapter.
//!
//! Maps the exchange port onto a key-id/secret authenticated REST API:
//! `GET /account`, `GET /positions/{sym}`, `POST /orders`,
//! `GET /orders/{id}`, `GET /clock`. Non-200 responses raise with the
//! broker's message field.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::error::TraderError;
use crate::domain::signal::{OrderReport, OrderSide, OrderStatus};
use crate::ports::config_port::ConfigPort;
use crate::ports::exchange_port::{ExchangePort, PositionInfo};

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

#[derive(Debug)]
pub struct BrokerAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
    key_id: String,
    secret: String,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    symbol: &'a str,
    qty: i64,
    side: &'a str,
    #[serde(rename = "type")]
    order_type: &'a str,
    time_in_force: &'a str,
}

#[derive(Debug, Deserialize)]
struct BrokerOrder {
    id: String,
    symbol: String,
    side: String,
    status: String,
    #[serde(default)]
    qty: Option<String>,
    #[serde(default)]
    filled_qty: Option<String>,
    #[serde(default)]
    filled_avg_price: Option<String>,
}

impl BrokerAdapter {
    pub fn from_config(
        config: &dyn ConfigPort,
        timeout: Duration,
    ) -> Result<Self, TraderError> {
        let require = |key: &str| {
            config
                .get_string("broker", key)
                .ok_or_else(|| TraderError::ConfigMissing {
                    section: "broker".into(),
                    key: key.into(),
                })
        };
        let base_url = require("base_url")?;
        let key_id = require("key_id")?;
        let secret = require("secret")?;

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TraderError::Transport {
                endpoint: base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(BrokerAdapter {
            client,
            base_url,
            key_id,
            secret,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    fn check(
        &self,
        response: reqwest::blocking::Response,
    ) -> Result<String, TraderError> {
        let status = response.status();
        let url = response.url().to_string();
        let body = response.text().map_err(|e| TraderError::Transport {
            endpoint: url.clone(),
            reason: e.to_string(),
        })?;
        if status.as_u16() == 200 {
            return Ok(body);
        }
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or(body);
        Err(TraderError::Exchange {
            reason: format!("broker returned {status}: {message}"),
        })
    }

    fn get(&self, path: &str) -> Result<String, TraderError> {
        let url = self.url(path);
        debug!(url = %url, "broker GET");
        let response = self
            .client
            .get(&url)
            .header(KEY_HEADER, &self.key_id)
            .header(SECRET_HEADER, &self.secret)
            .send()
            .map_err(|e| TraderError::Transport {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;
        self.check(response)
    }

    fn post(&self, path: &str, payload: &impl Serialize) -> Result<String, TraderError> {
        let url = self.url(path);
        debug!(url = %url, "broker POST");
        let response = self
            .client
            .post(&url)
            .header(KEY_HEADER, &self.key_id)
            .header(SECRET_HEADER, &self.secret)
            .json(payload)
            .send()
            .map_err(|e| TraderError::Transport {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;
        self.check(response)
    }

    fn parse<T: serde::de::DeserializeOwned>(&self, body: &str) -> Result<T, TraderError> {
        serde_json::from_str(body).map_err(|e| TraderError::Exchange {
            reason: format!("unparseable broker payload: {e}"),
        })
    }
}

fn report_from(order: BrokerOrder) -> Result<OrderReport, TraderError> {
    let status = OrderStatus::parse(&order.status).ok_or_else(|| TraderError::Exchange {
        reason: format!("unknown order status {}", order.status),
    })?;
    let side = match order.side.as_str() {
        "buy" => OrderSide::Buy,
        "sell" => OrderSide::Sell,
        other => {
            return Err(TraderError::Exchange {
                reason: format!("unknown order side {other}"),
            })
        }
    };
    let parse_num = |raw: &Option<String>| {
        raw.as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    Ok(OrderReport {
        id: order.id,
        symbol: order.symbol,
        side,
        status,
        units: parse_num(&order.qty) as i64,
        filled_units: parse_num(&order.filled_qty) as i64,
        filled_mean_price: parse_num(&order.filled_avg_price),
    })
}

impl ExchangePort for BrokerAdapter {
    fn is_open(&self) -> Result<bool, TraderError> {
        let body = self.get("/clock")?;
        let clock: Value = self.parse(&body)?;
        Ok(clock.get("is_open").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn cash(&self) -> Result<Option<f64>, TraderError> {
        let body = self.get("/account")?;
        let account: Value = self.parse(&body)?;
        Ok(account
            .get("cash")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok()))
    }

    fn position(&self, symbol: &str) -> Result<Option<PositionInfo>, TraderError> {
        let body = match self.get(&format!("/positions/{symbol}")) {
            Ok(body) => body,
            // Flat symbols come back as a 404 with a position-not-found
            // message; treat any such exchange error as no position.
            Err(TraderError::Exchange { reason }) if reason.contains("404") => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        let position: Value = self.parse(&body)?;
        let get_num = |key: &str| {
            position
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        Ok(Some(PositionInfo {
            symbol: symbol.to_string(),
            units: get_num("qty") as i64,
            market_value: get_num("market_value"),
        }))
    }

    fn submit(
        &self,
        symbol: &str,
        units: i64,
        side: OrderSide,
    ) -> Result<Option<String>, TraderError> {
        if side == OrderSide::Sell && self.position(symbol)?.is_none() {
            return Err(TraderError::NoPosition {
                symbol: symbol.to_string(),
            });
        }
        let request = OrderRequest {
            symbol,
            qty: units,
            side: match side {
                OrderSide::Buy => "buy",
                OrderSide::Sell => "sell",
            },
            order_type: "market",
            time_in_force: "day",
        };
        let body = self.post("/orders", &request)?;
        let order: Value = self.parse(&body)?;
        Ok(order
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn order(&self, id: &str) -> Result<OrderReport, TraderError> {
        let body = self.get(&format!("/orders/{id}"))?;
        report_from(self.parse(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    #[test]
    fn missing_credentials_is_config_error() {
        let adapter =
            FileConfigAdapter::from_string("[broker]\nbase_url = https://paper.example.com\n")
                .unwrap();
        let err = BrokerAdapter::from_config(&adapter, Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, TraderError::ConfigMissing { .. }));
    }

    #[test]
    fn order_report_parses_broker_payload() {
        let order = BrokerOrder {
            id: "ord-1".into(),
            symbol: "AAPL".into(),
            side: "buy".into(),
            status: "filled".into(),
            qty: Some("3".into()),
            filled_qty: Some("3".into()),
            filled_avg_price: Some("101.25".into()),
        };
        let report = report_from(order).unwrap();
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.side, OrderSide::Buy);
        assert_eq!(report.filled_units, 3);
        assert!((report.filled_mean_price - 101.25).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_status_is_an_exchange_error() {
        let order = BrokerOrder {
            id: "ord-1".into(),
            symbol: "AAPL".into(),
            side: "buy".into(),
            status: "held".into(),
            qty: None,
            filled_qty: None,
            filled_avg_price: None,
        };
        assert!(report_from(order).is_err());
    }

    #[test]
    fn url_joins_without_double_slash() {
        let adapter = FileConfigAdapter::from_string(
            "[broker]\nbase_url = https://paper.example.com/\nkey_id = k\nsecret = s\n",
        )
        .unwrap();
        let broker = BrokerAdapter::from_config(&adapter, Duration::from_secs(10)).unwrap();
        assert_eq!(broker.url("/clock"), "https://paper.example.com/clock");
    }
}
