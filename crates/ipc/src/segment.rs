//! Growable, file-backed shared memory segment.
//!
//! A segment is a memory-mapped file that several processes map at the same
//! time. Everything stored inside it is addressed by its offset from the start
//! of the mapping, so growing the file (and re-mapping it at a different base
//! address) never invalidates a reference held by another process.
//!
//! # Layout
//!
//! ```text
//! +--------------------+  0
//! | header (64 bytes)  |  magic, version, total, heap end, free list, directory
//! +--------------------+  64
//! | block | block | .. |  [capacity: u64][len: u64][payload: capacity bytes]
//! +--------------------+  heap end
//! | unused tail        |
//! +--------------------+  total
//! ```
//!
//! Named values live in blocks; the directory (itself a block) maps each name
//! to the offset of its block. Released blocks go onto a singly linked free
//! list threaded through their `len` field.
//!
//! A list is a named meta block `[head: u64][tail: u64][len: u64]` plus one
//! block per element, `[next: u64][value]`. Pushing and popping touch the meta
//! block and one element block only, whatever the list length.
//!
//! # Locking
//!
//! `fs2` locks belong to the open file handle, and threads sharing one
//! [`SharedSegment`] share that handle, so the file lock is paired with an
//! in-process mutex. A [`SegmentGuard`] holds both.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fs2::FileExt as _;
use memmap2::MmapMut;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{IpcError, Result};

const MAGIC: &[u8; 8] = b"FANOUTSG";
const LAYOUT_VERSION: u32 = 1;
const HEADER_SIZE: u64 = 64;
const BLOCK_HEADER: u64 = 16;
const ALIGN: u64 = 16;
const PAGE: u64 = 4096;
const MAX_GROW_ATTEMPTS: usize = 16;

const OFF_MAGIC: u64 = 0;
const OFF_VERSION: u64 = 8;
const OFF_TOTAL: u64 = 16;
const OFF_HEAP_END: u64 = 24;
const OFF_FREE_HEAD: u64 = 32;
const OFF_DIRECTORY: u64 = 40;
const OFF_FREE_TOTAL: u64 = 48;

const LINK_SIZE: u64 = 8;
const LIST_HEAD: u64 = 0;
const LIST_TAIL: u64 = 8;
const LIST_LEN: u64 = 16;
const LIST_META_SIZE: usize = 24;

#[derive(Debug, Clone)]
pub struct SegmentOptions {
    pub initial_bytes: u64,
    /// Hard ceiling; growing past it is reported as [`IpcError::Exhausted`].
    pub max_bytes: u64,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            initial_bytes: 256 * 1024,
            max_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// A named, growable block of memory shared between processes.
pub struct SharedSegment {
    name: String,
    path: PathBuf,
    options: SegmentOptions,
    state: Mutex<Mapping>,
}

struct Mapping {
    file: File,
    map: MmapMut,
}

impl SharedSegment {
    /// Open (or create) the segment `name` inside `dir`.
    pub fn open(dir: &Path, name: &str, options: SegmentOptions) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = Self::backing_path(dir, name);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        file.lock_exclusive()?;
        let mapped = Self::map_or_initialize(&file, name, &options);
        let _ = fs2::FileExt::unlock(&file);
        let map = mapped?;

        debug!("Opened segment '{}' at {}", name, path.display());

        Ok(Self {
            name: name.to_string(),
            path,
            options,
            state: Mutex::new(Mapping { file, map }),
        })
    }

    pub fn backing_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.seg"))
    }

    /// Delete the backing file of segment `name`. Missing files are ignored.
    pub fn remove_backing(dir: &Path, name: &str) -> Result<()> {
        match std::fs::remove_file(Self::backing_path(dir, name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until this handle holds the segment exclusively.
    ///
    /// The returned guard has already re-mapped the file if another process
    /// grew it since this handle last looked.
    pub fn scoped_access(&self) -> Result<SegmentGuard<'_>> {
        let mapping = self
            .state
            .lock()
            .map_err(|_| IpcError::Poisoned(self.name.clone()))?;
        mapping.file.lock_exclusive()?;

        let mut guard = SegmentGuard {
            segment: self,
            mapping,
        };
        guard.refresh()?;
        Ok(guard)
    }

    fn map_or_initialize(file: &File, name: &str, options: &SegmentOptions) -> Result<MmapMut> {
        let len = file.metadata()?.len();
        if len == 0 {
            let total = round_up(options.initial_bytes.max(HEADER_SIZE + PAGE), PAGE);
            file.set_len(total)?;
            // SAFETY: the file is only resized under the exclusive file lock,
            // and every access to the mapping re-validates its length first.
            let mut map = unsafe { MmapMut::map_mut(file)? };
            map[0..HEADER_SIZE as usize].fill(0);
            map[OFF_MAGIC as usize..8].copy_from_slice(MAGIC);
            write_u32(&mut map, OFF_VERSION, LAYOUT_VERSION);
            write_u64(&mut map, OFF_TOTAL, total);
            write_u64(&mut map, OFF_HEAP_END, HEADER_SIZE);
            map.flush()?;
            return Ok(map);
        }

        // SAFETY: see above.
        let map = unsafe { MmapMut::map_mut(file)? };
        if (map.len() as u64) < HEADER_SIZE || &map[OFF_MAGIC as usize..8] != MAGIC {
            return Err(IpcError::Corrupt {
                segment: name.to_string(),
                reason: "bad magic".to_string(),
            });
        }
        let version = read_u32(&map, OFF_VERSION);
        if version != LAYOUT_VERSION {
            return Err(IpcError::Corrupt {
                segment: name.to_string(),
                reason: format!("layout version {version}, expected {LAYOUT_VERSION}"),
            });
        }
        Ok(map)
    }
}

/// Exclusive access to a [`SharedSegment`] for the guard's lifetime.
pub struct SegmentGuard<'a> {
    segment: &'a SharedSegment,
    mapping: MutexGuard<'a, Mapping>,
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.mapping.file);
    }
}

impl SegmentGuard<'_> {
    pub fn total_bytes(&self) -> u64 {
        self.header(OFF_TOTAL)
    }

    /// Unused tail plus every released block. Fragmentation means a single
    /// allocation of this size may still fail; [`SegmentGuard::store`] copes.
    pub fn free_bytes(&self) -> u64 {
        let tail = self.total_bytes().saturating_sub(self.header(OFF_HEAP_END));
        tail + self.header(OFF_FREE_TOTAL)
    }

    /// Extend the segment by at least `extra` bytes (rounded up to a page).
    pub fn grow(&mut self, extra: u64) -> Result<()> {
        let current = self.total_bytes();
        let limit = self.segment.options.max_bytes;
        let requested = current.saturating_add(extra.max(1));
        if requested > limit {
            return Err(IpcError::Exhausted {
                segment: self.segment.name.clone(),
                limit,
                requested,
            });
        }
        let target = round_up(requested, PAGE).min(limit);

        let mapping = &mut *self.mapping;
        mapping.map.flush()?;
        mapping.file.set_len(target)?;
        // SAFETY: resized under the exclusive lock held by this guard.
        mapping.map = unsafe { MmapMut::map_mut(&mapping.file)? };
        self.set_header(OFF_TOTAL, target);

        debug!(
            "Grew segment '{}' from {} to {} bytes",
            self.segment.name, current, target
        );
        Ok(())
    }

    /// Look up `key`, default-constructing (and storing) it when absent.
    pub fn get<T>(&mut self, key: &str) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        if let Some(value) = self.lookup(key)? {
            return Ok(value);
        }
        let value = T::default();
        self.store(key, &value)?;
        Ok(value)
    }

    pub fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let directory = self.read_directory()?;
        let Some(&offset) = directory.get(key) else {
            return Ok(None);
        };
        let bytes = self.read_payload(offset)?;
        Ok(Some(rmp_serde::from_slice(bytes)?))
    }

    /// Write `value` under `key` without growing.
    ///
    /// Fails with [`IpcError::OutOfSpace`] and leaves the stored value intact
    /// when no block large enough is available.
    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let bytes = rmp_serde::to_vec(value)?;
        if let Some(&offset) = self.read_directory()?.get(key) {
            if self.block_capacity(offset)? >= bytes.len() as u64 {
                return self.write_payload(offset, &bytes);
            }
        }
        self.insert_block(key, &bytes)?;
        Ok(())
    }

    /// Write `value` under `key`, growing the segment until it fits.
    pub fn store<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.with_growth(|guard| guard.put(key, value))
    }

    /// Read-modify-write of the value under `key`.
    pub fn update<T, R>(&mut self, key: &str, f: impl FnOnce(&mut T) -> R) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let mut value: T = self.lookup(key)?.unwrap_or_default();
        let out = f(&mut value);
        self.store(key, &value)?;
        Ok(out)
    }

    /// Append `value` to the list `list`, growing the segment as needed.
    pub fn push_back<T: Serialize>(&mut self, list: &str, value: &T) -> Result<()> {
        let bytes = rmp_serde::to_vec(value)?;
        self.push_back_bytes(list, &bytes)
    }

    /// Unlink and decode the first element of `list`.
    ///
    /// The element is gone from the list even when decoding fails.
    pub fn pop_front<T: DeserializeOwned>(&mut self, list: &str) -> Result<Option<T>> {
        match self.pop_front_bytes(list)? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_len(&self, list: &str) -> Result<u64> {
        Ok(match self.find_list(list)? {
            Some(meta) => self.list_field(meta, LIST_LEN),
            None => 0,
        })
    }

    /// Release every element of `list` and the list itself.
    pub fn clear_list(&mut self, list: &str) -> Result<u64> {
        let Some(meta) = self.find_list(list)? else {
            return Ok(0);
        };
        let mut released = 0;
        let mut current = self.list_field(meta, LIST_HEAD);
        while current != 0 {
            let next = self.element_link(current)?;
            self.release(current)?;
            released += 1;
            current = next;
        }
        self.remove(list)?;
        Ok(released)
    }

    fn push_back_bytes(&mut self, list: &str, bytes: &[u8]) -> Result<()> {
        let meta = match self.find_list(list)? {
            Some(meta) => meta,
            None => self.with_growth(|guard| guard.insert_block(list, &[0u8; LIST_META_SIZE]))?,
        };

        let mut payload = Vec::with_capacity(LINK_SIZE as usize + bytes.len());
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(bytes);
        let element = self.with_growth(|guard| guard.alloc(payload.len() as u64))?;
        self.write_payload(element, &payload)?;

        let tail = self.list_field(meta, LIST_TAIL);
        if tail == 0 {
            self.set_list_field(meta, LIST_HEAD, element);
        } else {
            self.write(tail + BLOCK_HEADER, element);
        }
        self.set_list_field(meta, LIST_TAIL, element);
        let len = self.list_field(meta, LIST_LEN);
        self.set_list_field(meta, LIST_LEN, len + 1);
        Ok(())
    }

    fn pop_front_bytes(&mut self, list: &str) -> Result<Option<Vec<u8>>> {
        let Some(meta) = self.find_list(list)? else {
            return Ok(None);
        };
        let head = self.list_field(meta, LIST_HEAD);
        if head == 0 {
            return Ok(None);
        }

        let next = self.element_link(head)?;
        let bytes = self.read_payload(head)?[LINK_SIZE as usize..].to_vec();

        self.set_list_field(meta, LIST_HEAD, next);
        if next == 0 {
            self.set_list_field(meta, LIST_TAIL, 0);
        }
        let len = self.list_field(meta, LIST_LEN);
        self.set_list_field(meta, LIST_LEN, len.saturating_sub(1));
        self.release(head)?;
        Ok(Some(bytes))
    }

    fn find_list(&self, list: &str) -> Result<Option<u64>> {
        let Some(&meta) = self.read_directory()?.get(list) else {
            return Ok(None);
        };
        if self.read_payload(meta)?.len() < LIST_META_SIZE {
            return Err(self.corrupt(format!("'{list}' is not a list")));
        }
        Ok(Some(meta))
    }

    fn element_link(&self, element: u64) -> Result<u64> {
        let payload = self.read_payload(element)?;
        if payload.len() < LINK_SIZE as usize {
            return Err(self.corrupt(format!("list element at {element} has no link")));
        }
        Ok(read_u64(payload, 0))
    }

    fn list_field(&self, meta: u64, field: u64) -> u64 {
        self.read(meta + BLOCK_HEADER + field)
    }

    fn set_list_field(&mut self, meta: u64, field: u64, value: u64) {
        self.write(meta + BLOCK_HEADER + field, value);
    }

    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let mut directory = self.read_directory()?;
        let Some(offset) = directory.remove(key) else {
            return Ok(false);
        };
        self.write_directory(&directory)?;
        self.release(offset)?;
        Ok(true)
    }

    /// Grow until `free_bytes()` reports at least `needed`.
    pub fn ensure_free(&mut self, needed: u64) -> Result<()> {
        let mut attempts = 0;
        while self.free_bytes() < needed {
            if attempts == MAX_GROW_ATTEMPTS {
                return Err(IpcError::Exhausted {
                    segment: self.segment.name.clone(),
                    limit: self.segment.options.max_bytes,
                    requested: needed,
                });
            }
            self.grow_for(needed - self.free_bytes())?;
            attempts += 1;
        }
        Ok(())
    }

    /// Retry `op` after growing for as long as it reports `OutOfSpace`.
    fn with_growth<R>(&mut self, mut op: impl FnMut(&mut Self) -> Result<R>) -> Result<R> {
        for _ in 0..MAX_GROW_ATTEMPTS {
            match op(self) {
                Ok(out) => return Ok(out),
                // Growing may itself need directory space, so recheck.
                Err(IpcError::OutOfSpace { needed, .. }) => self.grow_for(needed)?,
                Err(err) => return Err(err),
            }
        }
        Err(IpcError::Exhausted {
            segment: self.segment.name.clone(),
            limit: self.segment.options.max_bytes,
            requested: self.total_bytes(),
        })
    }

    /// Put `bytes` in a fresh block registered under `key`, replacing any
    /// previous block of that name.
    fn insert_block(&mut self, key: &str, bytes: &[u8]) -> Result<u64> {
        let fresh = self.alloc(bytes.len() as u64)?;
        self.write_payload(fresh, bytes)?;
        let mut directory = self.read_directory()?;
        let previous = directory.insert(key.to_string(), fresh);
        if let Err(err) = self.write_directory(&directory) {
            self.release(fresh)?;
            return Err(err);
        }
        if let Some(old) = previous {
            self.release(old)?;
        }
        Ok(fresh)
    }

    fn grow_for(&mut self, needed: u64) -> Result<()> {
        let total = self.total_bytes();
        let preferred = needed.saturating_mul(2).max(total / 2);
        let headroom = self.segment.options.max_bytes.saturating_sub(total);
        self.grow(if preferred <= headroom { preferred } else { needed })
    }

    fn refresh(&mut self) -> Result<()> {
        let file_len = self.mapping.file.metadata()?.len();
        if file_len != self.mapping.map.len() as u64 {
            let mapping = &mut *self.mapping;
            // SAFETY: another process resized the file under the lock we now hold.
            mapping.map = unsafe { MmapMut::map_mut(&mapping.file)? };
        }

        let recorded = self.total_bytes();
        if recorded != file_len {
            if recorded > file_len {
                return Err(self.corrupt(format!(
                    "header claims {recorded} bytes but file has {file_len}"
                )));
            }
            // A writer died between `set_len` and the header update.
            warn!(
                "Segment '{}' header lagged behind file size ({} < {}), repairing",
                self.segment.name, recorded, file_len
            );
            self.set_header(OFF_TOTAL, file_len);
        }
        Ok(())
    }

    fn alloc(&mut self, len: u64) -> Result<u64> {
        let capacity = round_up(len.max(1), ALIGN);

        let mut previous: Option<u64> = None;
        let mut current = self.header(OFF_FREE_HEAD);
        while current != 0 {
            let block_capacity = self.block_capacity(current)?;
            let next = self.read(current + 8);
            if block_capacity >= capacity {
                match previous {
                    Some(prev) => self.write(prev + 8, next),
                    None => self.set_header(OFF_FREE_HEAD, next),
                }
                let free_total = self.header(OFF_FREE_TOTAL);
                self.set_header(OFF_FREE_TOTAL, free_total.saturating_sub(block_capacity));
                self.write(current + 8, 0);
                return Ok(current);
            }
            previous = Some(current);
            current = next;
        }

        let heap_end = self.header(OFF_HEAP_END);
        let end = heap_end + BLOCK_HEADER + capacity;
        if end > self.total_bytes() {
            return Err(IpcError::OutOfSpace {
                segment: self.segment.name.clone(),
                needed: BLOCK_HEADER + capacity,
            });
        }
        self.write(heap_end, capacity);
        self.write(heap_end + 8, 0);
        self.set_header(OFF_HEAP_END, end);
        Ok(heap_end)
    }

    fn release(&mut self, offset: u64) -> Result<()> {
        let capacity = self.block_capacity(offset)?;
        let head = self.header(OFF_FREE_HEAD);
        self.write(offset + 8, head);
        self.set_header(OFF_FREE_HEAD, offset);
        let free_total = self.header(OFF_FREE_TOTAL);
        self.set_header(OFF_FREE_TOTAL, free_total + capacity);
        Ok(())
    }

    fn block_capacity(&self, offset: u64) -> Result<u64> {
        let heap_end = self.header(OFF_HEAP_END);
        if offset < HEADER_SIZE || offset + BLOCK_HEADER > heap_end {
            return Err(self.corrupt(format!("block offset {offset} out of bounds")));
        }
        let capacity = self.read(offset);
        if offset + BLOCK_HEADER + capacity > heap_end {
            return Err(self.corrupt(format!("block at {offset} overruns heap")));
        }
        Ok(capacity)
    }

    fn read_payload(&self, offset: u64) -> Result<&[u8]> {
        let capacity = self.block_capacity(offset)?;
        let len = self.read(offset + 8);
        if len > capacity {
            return Err(self.corrupt(format!("block at {offset} holds {len} > {capacity}")));
        }
        let start = (offset + BLOCK_HEADER) as usize;
        Ok(&self.mapping.map[start..start + len as usize])
    }

    fn write_payload(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let capacity = self.block_capacity(offset)?;
        if bytes.len() as u64 > capacity {
            return Err(self.corrupt(format!("payload too large for block at {offset}")));
        }
        self.write(offset + 8, bytes.len() as u64);
        let start = (offset + BLOCK_HEADER) as usize;
        self.mapping.map[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_directory(&self) -> Result<BTreeMap<String, u64>> {
        let offset = self.header(OFF_DIRECTORY);
        if offset == 0 {
            return Ok(BTreeMap::new());
        }
        Ok(rmp_serde::from_slice(self.read_payload(offset)?)?)
    }

    fn write_directory(&mut self, directory: &BTreeMap<String, u64>) -> Result<()> {
        let bytes = rmp_serde::to_vec(directory)?;
        let current = self.header(OFF_DIRECTORY);
        if current != 0 && self.block_capacity(current)? >= bytes.len() as u64 {
            return self.write_payload(current, &bytes);
        }

        let fresh = self.alloc(bytes.len() as u64)?;
        self.write_payload(fresh, &bytes)?;
        self.set_header(OFF_DIRECTORY, fresh);
        if current != 0 {
            self.release(current)?;
        }
        Ok(())
    }

    fn header(&self, field: u64) -> u64 {
        self.read(field)
    }

    fn set_header(&mut self, field: u64, value: u64) {
        self.write(field, value);
    }

    fn read(&self, offset: u64) -> u64 {
        read_u64(&self.mapping.map, offset)
    }

    fn write(&mut self, offset: u64, value: u64) {
        write_u64(&mut self.mapping.map, offset, value);
    }

    fn corrupt(&self, reason: String) -> IpcError {
        IpcError::Corrupt {
            segment: self.segment.name.clone(),
            reason,
        }
    }
}

fn round_up(value: u64, multiple: u64) -> u64 {
    value.div_ceil(multiple) * multiple
}

fn read_u64(map: &[u8], offset: u64) -> u64 {
    let start = offset as usize;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&map[start..start + 8]);
    u64::from_le_bytes(buf)
}

fn write_u64(map: &mut [u8], offset: u64, value: u64) {
    let start = offset as usize;
    map[start..start + 8].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(map: &[u8], offset: u64) -> u32 {
    let start = offset as usize;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&map[start..start + 4]);
    u32::from_le_bytes(buf)
}

fn write_u32(map: &mut [u8], offset: u64, value: u32) {
    let start = offset as usize;
    map[start..start + 4].copy_from_slice(&value.to_le_bytes());
}
