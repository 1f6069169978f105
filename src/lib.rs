#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
// Allow acronyms like HDR
#![allow(clippy::upper_case_acronyms)]

//! # Framequeue: a cross-process graphics buffer queue
//!
//! This crate mediates the handoff of frame buffers between a *producer*
//! (application rendering code) and a *consumer* (compositor, encoder, display
//! pipeline) living in distinct address spaces. The producer requests empty
//! buffers, draws into them and flushes them together with damage and timing
//! metadata; the consumer acquires the flushed buffers in order, presents them
//! and releases them back to the pool.
//!
//! ## Structure of the crate
//!
//! The centerpiece is [`queue::BufferQueue`]: the slot cache, the five-state
//! per-buffer lifecycle and the request/cancel/flush/acquire/release/attach/
//! detach protocol, all guarded by one mutex with condition-variable gating.
//! [`consumer::ConsumerSurface`] is the thin consumer-side facade over it.
//! The producer side talks to the queue through [`ipc`]: parcels carry the
//! wire protocol, [`producer::service::ProducerService`] dispatches request
//! codes into the queue, and [`producer::client::ProducerClient`] is the
//! producer-side proxy with its own mirror of the slot cache.
//!
//! Buffers themselves are described by [`buffer::SurfaceBuffer`]; allocation
//! goes through a thin adaptor over a display-buffer HAL
//! ([`buffer::BufferAllocator`]), with a memfd-backed implementation for
//! local rendering. Asynchronous GPU completion is carried as opaque
//! [`fence::SyncFence`] handles which the queue stores and forwards but never
//! interprets.

pub mod buffer;
pub mod consumer;
pub mod error;
pub mod fence;
pub mod hebc;
pub mod ipc;
pub mod producer;
pub mod queue;
pub mod registry;
pub mod utils;
pub mod window;

pub use error::SurfaceError;
