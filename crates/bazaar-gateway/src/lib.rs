//! Realtime push channel: a fan-out dispatcher and the per-connection
//! WebSocket loop that filters it down to what each client may see.
pub mod connection;
pub mod dispatcher;
