use std::sync::atomic::{AtomicU32, Ordering};

pub mod registry;
pub mod storage;
pub mod task;
pub mod time;

pub use registry::*;
pub use storage::*;
pub use task::*;
pub use time::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(pub(crate) u32);

impl Entity {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Entity id allocator. Ids can be reserved through a shared reference so
/// that systems running on worker threads can name entities they spawn
/// before the spawn itself is committed.
#[derive(Debug, Default)]
pub struct Entities {
    next: AtomicU32,
}

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&self) -> Entity {
        Entity(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn len(&self) -> usize {
        self.next.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
