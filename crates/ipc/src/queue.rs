use std::marker::PhantomData;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Result;
use crate::segment::{SegmentOptions, SharedSegment};

const QUEUE_KEY: &str = "queue";

/// Serialized size is multiplied by this to leave room for allocator overhead.
const PUSH_OVERHEAD_FACTOR: u64 = 2;

/// FIFO of work items shared between a coordinator and its workers.
///
/// Delivery is at-most-once: an item returned by [`CommandQueue::pop_one`] is
/// gone from the queue even if the caller dies before finishing it.
pub struct CommandQueue<T> {
    segment: SharedSegment,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CommandQueue<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn open(dir: &Path, name: &str, options: SegmentOptions) -> Result<Self> {
        Ok(Self {
            segment: SharedSegment::open(dir, name, options)?,
            _marker: PhantomData,
        })
    }

    pub fn push_all(&self, items: Vec<T>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut estimate = 0u64;
        for item in &items {
            estimate += rmp_serde::to_vec(item)?.len() as u64;
        }
        estimate *= PUSH_OVERHEAD_FACTOR;

        let mut guard = self.segment.scoped_access()?;
        guard.ensure_free(estimate)?;

        let count = items.len();
        for item in &items {
            guard.push_back(QUEUE_KEY, item)?;
        }

        debug!("Queued {} items on '{}'", count, self.segment.name());
        Ok(())
    }

    pub fn pop_one(&self) -> Result<Option<T>> {
        self.segment.scoped_access()?.pop_front(QUEUE_KEY)
    }

    pub fn size(&self) -> Result<usize> {
        Ok(self.segment.scoped_access()?.list_len(QUEUE_KEY)? as usize)
    }

    pub fn clear(&self) -> Result<()> {
        self.segment.scoped_access()?.clear_list(QUEUE_KEY)?;
        Ok(())
    }

    pub fn segment(&self) -> &SharedSegment {
        &self.segment
    }
}
