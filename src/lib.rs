//! autotrader — automated equity trading platform.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in
//! [`ports`], concrete implementations in [`adapters`]. The pipeline runs
//! declarative strategies over captured market ticks, gates proposed trades
//! through a risk profile, drives orders to a terminal state on an
//! exchange, and supports deterministic back-testing over a run calendar.

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
