//! Argus engine — behavioral traffic pipeline for IoT event inference.
//!
//! Packets flow through five concurrent stages connected by bounded
//! drop-oldest queues:
//!
//! 1. **Burst assembler** — groups packets by direction-normalized flow key
//!    into 1-second bursts and emits a 28-column feature vector (BFV) per
//!    sealed burst.
//! 2. **Standardizer** — applies the device's pre-fitted scaler.
//! 3. **Periodic filter** — drops bursts matching the device's periodic
//!    fingerprint that fall inside a trained density cluster.
//! 4. **Event predictor** — per-event binary classifiers; the first positive
//!    one names the event.
//! 5. **Idle recorder** — side channel appending raw BFVs of operator-idle
//!    devices to training CSVs.
//!
//! The offline counterpart lives in the `argus-trainer` crate and produces
//! every artifact the hot path loads.

pub mod burst;
pub mod cache;
pub mod config;
pub mod error;
pub mod features;
pub mod filter;
pub mod idle;
pub mod model;
pub mod normalize;
pub mod packet;
pub mod pipeline;
pub mod predict;
pub mod queue;
pub mod registry;
pub mod replay;
pub mod resolver;
pub mod standardize;
pub mod state;
