// Library root for the tournament engine: bracket construction, placement
// recording, points reconciliation, ranking projection, and the storage,
// configuration and transport plumbing around them.

pub mod bracket;
pub mod config;
pub mod db;
pub mod entity;
pub mod ledger;
pub mod protocol;
pub mod ranking;
pub mod roster;
pub mod scoring;
pub mod ws_server;
