//! Connected clients and the hub that coordinates them.

pub mod client;
pub mod hub;

pub use client::{ClientSession, SessionId};
pub use hub::{ConnectedInfo, HubConfig, LatencyReport, SessionHub};
