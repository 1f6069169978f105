//! Producer-side plumbing: the IPC service, the client proxy and the
//! release-listener dispatch.
//!
//! The [`service::ProducerService`] lives next to the queue (consumer
//! process) and dispatches wire request codes into it. The
//! [`client::ProducerClient`] lives in the producer process, mirrors the
//! queue's slot map by sequence number, and heals itself when the consumer
//! goes away. [`listener`] carries release notifications back the other way.

pub mod client;
pub mod listener;
pub mod service;

/// Everything a producer learns when it connects.
#[derive(Debug, Clone, Default)]
pub struct ProducerInitInfo {
    /// Queue name.
    pub name: String,
    /// Queue unique id.
    pub unique_id: u64,
    /// Debug name applied to allocated buffers.
    pub buffer_name: String,
    /// The producer process's application name.
    pub app_name: String,
    /// Server-assigned id of this producer connection.
    pub producer_id: u64,
    /// Default width configured by the consumer.
    pub width: i32,
    /// Default height configured by the consumer.
    pub height: i32,
    /// Transform hint in effect at connect time.
    pub transform_hint: crate::buffer::TransformType,
    /// Whether the application is on the HEBC whitelist.
    pub is_in_hebc_list: bool,
}
