pub mod api;
pub mod config;
pub mod content;
pub mod humanize;
pub mod ledger;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod storage;
