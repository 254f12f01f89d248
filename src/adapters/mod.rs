//! Concrete adapter implementations for ports.

pub mod broker_adapter;
pub mod crumb_csv_adapter;
pub mod file_config_adapter;
pub mod http_quote_adapter;
pub mod sim_exchange;
pub mod sqlite_store;
pub mod xml_strategy_adapter;
