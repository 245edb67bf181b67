//! Flight Oracle Server Library
//!
//! Core modules for the oracle pool & response coordination service: the
//! ledger client boundary, the oracle registry, the request tracker, the
//! event dispatcher and the response submitter, plus the read-only query API
//! served to the dapp.

pub mod app_state;
pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod registry;
pub mod routes;
pub mod submitter;
pub mod tracker;
