use std::marker::PhantomData;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::segment::{SegmentOptions, SharedSegment};

const RESULTS_KEY: &str = "results";

/// Bounded handoff of worker results to the coordinator.
///
/// The bound is enforced by producers: a worker checks [`ResultChannel::count`]
/// before taking more work and backs off while the backlog is at its limit.
pub struct ResultChannel<T> {
    segment: SharedSegment,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResultChannel<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn open(dir: &Path, name: &str, options: SegmentOptions) -> Result<Self> {
        Ok(Self {
            segment: SharedSegment::open(dir, name, options)?,
            _marker: PhantomData,
        })
    }

    pub fn push(&self, item: T) -> Result<()> {
        self.segment.scoped_access()?.push_back(RESULTS_KEY, &item)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.segment.scoped_access()?.list_len(RESULTS_KEY)? as usize)
    }

    pub fn pop_front(&self) -> Result<Option<T>> {
        self.segment.scoped_access()?.pop_front(RESULTS_KEY)
    }

    pub fn clear(&self) -> Result<()> {
        self.segment.scoped_access()?.clear_list(RESULTS_KEY)?;
        Ok(())
    }
}
