pub mod catalog;
pub mod client;
pub mod ledger;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod reconcile;
pub mod scoring;
pub mod store;
