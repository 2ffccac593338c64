pub mod catalog;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod holds;
pub mod ledger;
pub mod membership;
pub mod models;
pub mod notify;
pub mod orders;
pub mod shipping;
