//! WhatsApp gateway integration

pub mod client;
pub mod poller;

pub use client::{GatewayClient, GatewayInstanceState, SendOutcome};
pub use poller::{map_gateway_status, StatePoller};
