use std::sync::Arc;

use crate::buffer::{
    BufferRequestConfig, HdrMetadata, HdrMetadataKey, HdrMetadataType, PresentTimestamp,
    ScalingMode, SurfaceBuffer,
};
use crate::fence::SyncFence;
use crate::utils::DamageRegion;

/// The five-state per-buffer lifecycle.
///
/// A slot is in exactly one list iff it is in the matching state:
/// `Released` slots sit on the free list, `Flushed` slots on the dirty list,
/// and the remaining states mean a peer currently holds the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the queue, ready for the next request.
    Released,
    /// Handed to the producer for rendering.
    Requested,
    /// Committed by the producer, queued for the consumer.
    Flushed,
    /// Held by the consumer for composition.
    Acquired,
    /// Injected from outside; exits to `Requested` or out of the cache.
    Attached,
}

/// One slot record: the ground truth of ownership for one cached buffer.
#[derive(Debug)]
pub struct BufferElement {
    pub(crate) buffer: Arc<SurfaceBuffer>,
    pub(crate) state: BufferState,
    /// Sticky: free this slot as soon as it returns to `Released`.
    pub(crate) is_deleting: bool,
    pub(crate) config: BufferRequestConfig,
    pub(crate) fence: Arc<SyncFence>,
    pub(crate) timestamp: i64,
    pub(crate) desired_present_timestamp: i64,
    pub(crate) is_auto_timestamp: bool,
    pub(crate) damages: DamageRegion,
    pub(crate) scaling_mode: ScalingMode,
    pub(crate) metadata: Vec<HdrMetadata>,
    pub(crate) metadata_set: Option<(HdrMetadataKey, Vec<u8>)>,
    pub(crate) hdr_metadata_type: HdrMetadataType,
    pub(crate) present_timestamp: PresentTimestamp,
}

impl BufferElement {
    pub(crate) fn new(
        buffer: Arc<SurfaceBuffer>,
        state: BufferState,
        config: BufferRequestConfig,
    ) -> BufferElement {
        BufferElement {
            buffer,
            state,
            is_deleting: false,
            config,
            fence: Arc::new(SyncFence::invalid()),
            timestamp: 0,
            desired_present_timestamp: 0,
            is_auto_timestamp: true,
            damages: DamageRegion::new(),
            scaling_mode: ScalingMode::default(),
            metadata: Vec::new(),
            metadata_set: None,
            hdr_metadata_type: HdrMetadataType::default(),
            present_timestamp: PresentTimestamp::default(),
        }
    }

    /// The buffer occupying this slot.
    pub fn buffer(&self) -> &Arc<SurfaceBuffer> {
        &self.buffer
    }

    /// The slot's current lifecycle state.
    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Whether the slot will leave the cache on its next release.
    pub fn is_deleting(&self) -> bool {
        self.is_deleting
    }
}
