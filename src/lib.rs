//! Rust library for controlling Pioneer AV receivers over their TCP control protocol
//!
//! Pioneer receivers expose a line-oriented ASCII protocol on one of a handful
//! of well-known ports. This library keeps one connection open, mirrors the
//! receiver's state, and sends commands. It supports:
//!
//! - Power on/off (toggle based)
//! - Volume in dB, plus single-step up/down
//! - Input selection and renaming
//! - Speaker output configuration (A, B, A+B, off)
//! - Front panel text
//! - State change subscriptions
//!
//! # Quick Start
//!
//! ```no_run
//! use pioneer_avr::{AvrClient, AvrConfig, SetOutcome, SpeakerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AvrClient::connect(&AvrConfig::new("192.168.1.50")).await?;
//!
//!     // Wait for the first answers to the startup queries
//!     let mut updates = client.subscribe();
//!     updates.recv().await?;
//!
//!     let avr = client.controller();
//!     if avr.set_volume(-30.0)? == SetOutcome::RejectedPowerOff {
//!         avr.set_power(true)?;
//!     }
//!     avr.set_speaker_config(SpeakerConfig::A)?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Client**: wiring and lifecycle
//! - **Controller**: state mirror, setters with power gating, status decoding
//! - **Connection**: socket, readiness loop, outbound queue, line splitting
//! - **Protocol**: command encoding and status line classification
//! - **Config**: host and candidate ports

mod client;
mod config;
mod connection;
mod controller;
mod error;
mod framing;
mod outbound;
mod protocol;
mod subscription;
mod types;

// Public exports
pub use client::AvrClient;
pub use crate::config::{load_config, AvrConfig, DEFAULT_HOST, DEFAULT_PORTS};
pub use connection::{CommandSink, Connection, LineHandler};
pub use controller::{AvrController, DeviceState};
pub use error::{AvrError, Result};
pub use protocol::{decode_display_text, Command, Message, MessageKind, LINE_TERMINATOR};
pub use subscription::{StateReceiver, StateUpdate};
pub use types::{
    code_to_db, db_to_code, ChannelId, Decibels, InputName, SetOutcome, SpeakerConfig,
    VolumeCode, INPUT_CHANNELS, MAX_TEXT_LEN, VOLUME_CODE_MAX, VOLUME_CODE_MIN, VOLUME_FLOOR_DB,
    VOLUME_MAX_DB, VOLUME_MIN_DB, VOLUME_STEP_DB,
};
