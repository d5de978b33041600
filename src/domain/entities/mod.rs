pub mod fill;
pub mod kill_switch;
pub mod order;
pub mod position;
pub mod reconciliation;
