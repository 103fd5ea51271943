//! Disks attached to hosts.
//!
//! A storage owns two constraints in the resource model, one for reads and
//! one for writes, and a capacity ledger. The sum of file sizes plus the
//! space reserved by writes in flight never exceeds the storage size; a write
//! that would overflow is shortened to what still fits.
//!
//! Actors reach files through a [`File`] handle that carries its own
//! position. A write ending at position `p` leaves the file `p` bytes long.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{SimError, SimResult};
use crate::resource::ResourceId;
use crate::types::{Bytes, HostId, StorageId};

/// A disk attached to a host.
#[derive(Clone, Debug)]
pub struct Storage {
    pub id: StorageId,
    pub name: String,
    /// Host the disk is attached to.
    pub host: HostId,
    /// Capacity in bytes.
    pub size: Bytes,
    used: Bytes,
    files: BTreeMap<String, Bytes>,
    pub(crate) read: ResourceId,
    pub(crate) write: ResourceId,
}

/// Snapshot of a storage's occupation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StorageInfo {
    pub name: String,
    pub host: String,
    pub size: Bytes,
    pub used: Bytes,
    pub free: Bytes,
    pub files: usize,
}

/// Space set aside by a write in flight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct WriteReservation {
    /// Bytes the write will actually put on disk.
    pub written: Bytes,
    /// Bytes added to `used` when the write started.
    pub reserved: Bytes,
}

impl Storage {
    pub(crate) fn new(
        id: StorageId,
        name: String,
        host: HostId,
        size: Bytes,
        read: ResourceId,
        write: ResourceId,
        content: &BTreeMap<String, Bytes>,
    ) -> Self {
        Self {
            id,
            name,
            host,
            size,
            used: content.values().sum(),
            files: content.clone(),
            read,
            write,
        }
    }

    /// Bytes held by files and writes in flight.
    pub fn used(&self) -> Bytes {
        self.used
    }

    /// Bytes still available.
    pub fn free(&self) -> Bytes {
        (self.size - self.used).max(0.0)
    }

    /// Size of a file.
    pub fn file_size(&self, path: &str) -> SimResult<Bytes> {
        self.files
            .get(path)
            .copied()
            .ok_or_else(|| self.unknown_file(path))
    }

    /// Files with their sizes, in path order.
    pub fn files(&self) -> impl Iterator<Item = (&str, Bytes)> {
        self.files.iter().map(|(p, s)| (p.as_str(), *s))
    }

    fn unknown_file(&self, path: &str) -> SimError {
        SimError::UnknownFile {
            storage: self.name.clone(),
            path: path.to_string(),
        }
    }

    /// Creates an empty file unless it already exists.
    pub(crate) fn create(&mut self, path: &str) {
        self.files.entry(path.to_string()).or_insert(0.0);
    }

    /// Bytes a read of `bytes` starting at `offset` covers.
    pub(crate) fn readable(&self, path: &str, offset: Bytes, bytes: Bytes) -> SimResult<Bytes> {
        let size = self.file_size(path)?;
        Ok(bytes.min((size - offset).max(0.0)))
    }

    /// Sets space aside for a write of `bytes` at `offset`.
    pub(crate) fn reserve_write(&mut self, path: &str, offset: Bytes, bytes: Bytes) -> WriteReservation {
        let current = self.files.get(path).copied().unwrap_or(0.0);
        let growth = (offset + bytes - current).max(0.0);
        let reserved = growth.min(self.free());
        self.used += reserved;
        WriteReservation {
            written: bytes - (growth - reserved),
            reserved,
        }
    }

    /// Applies a finished write: the file now ends where the write ended.
    pub(crate) fn commit_write(&mut self, path: &str, offset: Bytes, reservation: WriteReservation) {
        let old = self.files.get(path).copied().unwrap_or(0.0);
        let new = offset + reservation.written;
        self.used = (self.used - reservation.reserved + (new - old)).max(0.0);
        self.files.insert(path.to_string(), new);
    }

    /// Returns the space of an aborted write.
    pub(crate) fn cancel_write(&mut self, reservation: WriteReservation) {
        self.used = (self.used - reservation.reserved).max(0.0);
    }

    pub(crate) fn move_file(&mut self, from: &str, to: &str) -> SimResult<()> {
        if from == to {
            return self.file_size(from).map(|_| ());
        }
        if self.files.contains_key(to) {
            return Err(SimError::DuplicateName(to.to_string()));
        }
        let size = self
            .files
            .remove(from)
            .ok_or_else(|| self.unknown_file(from))?;
        self.files.insert(to.to_string(), size);
        Ok(())
    }

    /// Deletes a file and frees its space.
    pub(crate) fn remove_file(&mut self, path: &str) -> SimResult<Bytes> {
        let size = self
            .files
            .remove(path)
            .ok_or_else(|| self.unknown_file(path))?;
        self.used = (self.used - size).max(0.0);
        Ok(size)
    }
}

/// An open file: a path on a storage plus a position.
#[derive(Clone, Debug, PartialEq)]
pub struct File {
    storage: StorageId,
    path: String,
    position: Bytes,
}

impl File {
    pub(crate) fn new(storage: StorageId, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
            position: 0.0,
        }
    }

    pub fn storage(&self) -> StorageId {
        self.storage
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Current position, in bytes from the start.
    pub fn tell(&self) -> Bytes {
        self.position
    }

    /// Moves the position; negative offsets clamp to the start.
    pub fn seek(&mut self, position: Bytes) {
        self.position = position.max(0.0);
    }

    pub(crate) fn advance(&mut self, bytes: Bytes) {
        self.position += bytes;
    }
}
