//! Open-file registry: canonical CP/M filename -> open host file handle.
//!
//! Keyed by canonical filename rather than FCB address, per the data
//! model: CP/M identifies a file by the content of its FCB, and a guest
//! may hold several FCBs referring to the same file. All files live in
//! one host directory (the emulator's current working directory); there
//! is no drive indirection beyond ignoring the FCB's drive byte.

use std::fs::{File, OpenOptions};

use crate::error::{CpmError, CpmResult};

/// A single open file: its canonical name and a host file handle opened
/// for random read/write binary access. The handle's own cursor serves
/// as the implicit sequential read/write position.
pub struct OpenFile {
    name: String,
    pub file: File,
}

impl OpenFile {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of files currently open in the guest. Insertion is
/// exclusive: a second open under the same canonical name fails.
#[derive(Default)]
pub struct FileRegistry {
    open: Vec<Option<OpenFile>>,
}

/// Opaque handle into the registry. Not exposed to guest memory; each
/// BDOS call re-derives the canonical name from the FCB and looks it up.
pub type Handle = usize;

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, name: &str) -> Option<Handle> {
        self.open
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|f| f.name == name))
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Open an existing host file for random read/write. Fails if the
    /// canonical name is already registered.
    pub fn open_existing(&mut self, name: &str) -> CpmResult<Handle> {
        if self.is_open(name) {
            return Err(CpmError::FileAlreadyOpen(name.to_string()));
        }
        let file = OpenOptions::new().read(true).write(true).open(name)?;
        Ok(self.insert(name, file))
    }

    /// Create (or truncate) a host file and register it open for
    /// random read/write. Fails if the canonical name is already
    /// registered.
    pub fn create(&mut self, name: &str) -> CpmResult<Handle> {
        if self.is_open(name) {
            return Err(CpmError::FileAlreadyOpen(name.to_string()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(name)?;
        Ok(self.insert(name, file))
    }

    fn insert(&mut self, name: &str, file: File) -> Handle {
        let entry = OpenFile {
            name: name.to_string(),
            file,
        };
        match self.open.iter().position(|s| s.is_none()) {
            Some(handle) => {
                self.open[handle] = Some(entry);
                handle
            }
            None => {
                self.open.push(Some(entry));
                self.open.len() - 1
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Handle> {
        self.find(name)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut OpenFile> {
        self.open.get_mut(handle).and_then(|s| s.as_mut())
    }

    /// Close and remove the entry for `name`. Returns an error if it is
    /// not open.
    pub fn close(&mut self, name: &str) -> CpmResult<()> {
        let handle = self
            .find(name)
            .ok_or_else(|| CpmError::FileNotOpen(name.to_string()))?;
        self.open[handle] = None;
        Ok(())
    }

    /// Delete a host file by canonical name. Fails if currently open.
    pub fn delete(&mut self, name: &str) -> CpmResult<()> {
        if self.is_open(name) {
            return Err(CpmError::FileAlreadyOpen(name.to_string()));
        }
        std::fs::remove_file(name)?;
        Ok(())
    }

    /// Close every still-open handle, flushing pending writes. Called on
    /// machine destruction so no host file handle outlives the machine.
    pub fn close_all(&mut self) {
        for slot in self.open.iter_mut() {
            if let Some(entry) = slot.take() {
                let _ = entry.file.sync_all();
            }
        }
    }
}

impl Drop for FileRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
