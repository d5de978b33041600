//! PRAHARI Order Management & Risk Control Core
//!
//! This library mediates between an algorithmic trading strategy and an
//! external brokerage venue: pre-trade validation, the order lifecycle
//! state machine, the FIFO position ledger, venue reconciliation, and the
//! real-time risk monitor with its kill switch.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod task_runner;
