//! Multi-vendor asynchronous job dispatch service
//!
//! Clients submit opaque JSON payloads and receive a request ID
//! immediately; workers later deliver each payload to one of the
//! configured vendors and the normalized outcome becomes readable under
//! the same ID. Sync vendors return results inline; async vendors ack and
//! finalize through a webhook, with a sweeper failing jobs whose webhook
//! never arrives.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
