//! # CrystalCache Server
//!
//! Accept RESP2 connections, frame commands, and dispatch them to the
//! cache core with per-connection session handles.

mod acl;
mod metrics;
mod resp;
mod server;

pub use acl::{AclCheck, AllowAll};
pub use metrics::{LatencyHistogram, LatencySnapshot, Metrics, MetricsSnapshot};
pub use resp::{encode_reply, RespError, RespParser};
pub use server::{handle_connection, serve, ServerState};
