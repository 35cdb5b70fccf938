// chairlink-api: Async Rust client for the fleet REST backend and telemetry broker

pub mod client;
pub mod error;
pub mod transport;
pub mod websocket;

pub use client::{AlarmQuery, FleetClient};
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{BrokerEvent, ReconnectConfig, StreamHandle, StreamState};
