pub mod api;
pub mod captions;
pub mod config;
pub mod entity;
pub mod format;
pub mod languages;
pub mod ledger;
pub mod runtime;
pub mod search;
pub mod statements;
pub mod sync;

#[cfg(test)]
mod mock;
