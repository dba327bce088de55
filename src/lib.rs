//! Synthetic hospital traffic for a publish-subscribe broker.
//!
//! A pool of publisher workers generates linked patient, doctor, medicine,
//! appointment and prescription records and publishes them as JSON onto the
//! `patients`, `appointments`, `medicines` and `prescriptions` topics; a
//! subscriber reads all four under one consumer group and reports throughput.

pub mod config;
pub mod generator;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod pacing;
pub mod records;
pub mod roles;
pub mod time_sync;
pub mod transport;
