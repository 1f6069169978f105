//! Process-wide surface registry.
//!
//! Maps queue unique ids to live producer surfaces and native windows so a
//! 64-bit id passed across language or process boundaries can be turned
//! back into a working handle. Entries are weak: the registry never keeps a
//! surface alive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use tracing::trace;

use crate::error::{SurfaceError, SurfaceResult};
use crate::producer::client::ProducerClient;
use crate::window::NativeWindow;

static REGISTRY: Lazy<SurfaceRegistry> = Lazy::new(|| SurfaceRegistry {
    surfaces: Mutex::new(HashMap::new()),
    windows: Mutex::new(HashMap::new()),
});

/// The process-wide `unique_id -> surface` and `unique_id -> window` maps.
#[derive(Debug)]
pub struct SurfaceRegistry {
    surfaces: Mutex<HashMap<u64, Weak<ProducerClient>>>,
    windows: Mutex<HashMap<u64, Weak<NativeWindow>>>,
}

impl SurfaceRegistry {
    /// The process-wide registry.
    pub fn global() -> &'static SurfaceRegistry {
        &REGISTRY
    }

    /// Registers a surface under its queue id, replacing a dead entry.
    pub fn add_surface(&self, unique_id: u64, surface: &Arc<ProducerClient>) -> SurfaceResult<()> {
        let mut surfaces = self.surfaces.lock().unwrap();
        if let Some(existing) = surfaces.get(&unique_id) {
            if existing.upgrade().is_some() {
                return Err(SurfaceError::BufferIsInCache);
            }
        }
        trace!(unique_id, "surface registered");
        surfaces.insert(unique_id, Arc::downgrade(surface));
        Ok(())
    }

    /// Promotes the weak reference; `None` once the surface is gone.
    pub fn get_surface(&self, unique_id: u64) -> Option<Arc<ProducerClient>> {
        let mut surfaces = self.surfaces.lock().unwrap();
        match surfaces.get(&unique_id).and_then(Weak::upgrade) {
            Some(surface) => Some(surface),
            None => {
                surfaces.remove(&unique_id);
                None
            }
        }
    }

    /// Removes a surface entry.
    pub fn remove_surface(&self, unique_id: u64) -> SurfaceResult<()> {
        match self.surfaces.lock().unwrap().remove(&unique_id) {
            Some(_) => Ok(()),
            None => Err(SurfaceError::NoEntry),
        }
    }

    /// Registers a native window under its surface's queue id.
    pub fn add_window(&self, unique_id: u64, window: &Arc<NativeWindow>) {
        self.windows
            .lock()
            .unwrap()
            .insert(unique_id, Arc::downgrade(window));
    }

    /// Recovers a native window from a queue id.
    pub fn get_window(&self, unique_id: u64) -> Option<Arc<NativeWindow>> {
        let mut windows = self.windows.lock().unwrap();
        match windows.get(&unique_id).and_then(Weak::upgrade) {
            Some(window) => Some(window),
            None => {
                windows.remove(&unique_id);
                None
            }
        }
    }

    /// Removes a window entry.
    pub fn remove_window(&self, unique_id: u64) -> SurfaceResult<()> {
        match self.windows.lock().unwrap().remove(&unique_id) {
            Some(_) => Ok(()),
            None => Err(SurfaceError::NoEntry),
        }
    }
}
