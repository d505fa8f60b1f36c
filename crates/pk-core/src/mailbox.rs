//! Single-slot mailbox documents.
//!
//! A mailbox holds at most one document. Writers replace it whole; readers
//! see either the previous document or the new one, never a mix. "Missing"
//! and "blank" both read as `None`, which is the normal idle state rather
//! than an error.
//!
//! [`FileMailbox`] is what crosses the process boundary. [`MemoryMailbox`]
//! has the same semantics inside one process and is used for tests and
//! offline replay.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::MailboxConfig;
use crate::error::MailboxError;

/// Overwrite-only document slot
pub trait Mailbox: Send {
    /// Replace the current document.
    fn write(&self, body: &str) -> Result<(), MailboxError>;

    /// Current document, or `None` when missing or blank.
    fn read(&self) -> Result<Option<String>, MailboxError>;

    /// Reset to an empty document. The slot itself is never removed.
    fn clear(&self) -> Result<(), MailboxError> {
        self.write("")
    }

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

impl<T: Mailbox + ?Sized> Mailbox for Box<T> {
    fn write(&self, body: &str) -> Result<(), MailboxError> {
        (**self).write(body)
    }

    fn read(&self) -> Result<Option<String>, MailboxError> {
        (**self).read()
    }

    fn clear(&self) -> Result<(), MailboxError> {
        (**self).clear()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

fn non_blank(body: &str) -> Option<String> {
    let body = body.trim_start_matches('\u{feff}');
    if body.trim().is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

/// Mailbox backed by one file, replaced atomically via write-then-rename.
///
/// Every write stages into its own uniquely named file in the target's
/// directory, so handles in different processes never share a staging file.
#[derive(Debug, Clone)]
pub struct FileMailbox {
    path: PathBuf,
    dir: PathBuf,
}

impl FileMailbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self { path, dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> MailboxError {
        MailboxError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Mailbox for FileMailbox {
    fn write(&self, body: &str) -> Result<(), MailboxError> {
        let mut staging = tempfile::Builder::new()
            .prefix(".pokelink-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| self.io_error(e))?;
        staging.write_all(body.as_bytes()).map_err(|e| self.io_error(e))?;
        staging.flush().map_err(|e| self.io_error(e))?;
        staging.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        Ok(())
    }

    fn read(&self) -> Result<Option<String>, MailboxError> {
        match fs::read_to_string(&self.path) {
            Ok(body) => Ok(non_blank(&body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default)]
struct Slot {
    body: String,
    generation: u64,
}

/// In-process mailbox. Clones share the same slot.
#[derive(Debug, Clone)]
pub struct MemoryMailbox {
    name: Arc<str>,
    slot: Arc<Mutex<Slot>>,
}

impl MemoryMailbox {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            slot: Arc::default(),
        }
    }

    /// Number of writes (including clears) so far. A change means the slot
    /// was overwritten since the caller last looked.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Raw contents, including blank documents
    pub fn contents(&self) -> String {
        self.lock().body.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        // A panicked writer cannot leave a torn String behind
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Mailbox for MemoryMailbox {
    fn write(&self, body: &str) -> Result<(), MailboxError> {
        let mut slot = self.lock();
        slot.body = body.to_string();
        slot.generation += 1;
        Ok(())
    }

    fn read(&self) -> Result<Option<String>, MailboxError> {
        Ok(non_blank(&self.lock().body))
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}

/// The four documents exchanged by the two loops
pub struct Mailboxes {
    pub snapshot: Box<dyn Mailbox>,
    pub action: Box<dyn Mailbox>,
    pub reset: Box<dyn Mailbox>,
    pub memory_edit: Box<dyn Mailbox>,
}

impl Mailboxes {
    /// File mailboxes at the configured paths. Creates the directory.
    pub fn from_config(config: &MailboxConfig) -> Result<Self, MailboxError> {
        fs::create_dir_all(&config.directory).map_err(|source| MailboxError::Io {
            path: config.directory.clone(),
            source,
        })?;
        Ok(Self {
            snapshot: Box::new(FileMailbox::new(config.snapshot_path())),
            action: Box::new(FileMailbox::new(config.action_path())),
            reset: Box::new(FileMailbox::new(config.reset_path())),
            memory_edit: Box::new(FileMailbox::new(config.memory_edit_path())),
        })
    }

    /// In-memory mailboxes plus handles to each slot, for wiring both loops
    /// inside one process.
    pub fn in_memory() -> (Self, MemoryMailboxes) {
        let handles = MemoryMailboxes {
            snapshot: MemoryMailbox::new("snapshot"),
            action: MemoryMailbox::new("action"),
            reset: MemoryMailbox::new("reset"),
            memory_edit: MemoryMailbox::new("memory_edit"),
        };
        (handles.to_mailboxes(), handles)
    }
}

/// Shared handles to a set of in-memory mailboxes
#[derive(Debug, Clone)]
pub struct MemoryMailboxes {
    pub snapshot: MemoryMailbox,
    pub action: MemoryMailbox,
    pub reset: MemoryMailbox,
    pub memory_edit: MemoryMailbox,
}

impl MemoryMailboxes {
    /// Another [`Mailboxes`] view onto the same slots
    pub fn to_mailboxes(&self) -> Mailboxes {
        Mailboxes {
            snapshot: Box::new(self.snapshot.clone()),
            action: Box::new(self.action.clone()),
            reset: Box::new(self.reset.clone()),
            memory_edit: Box::new(self.memory_edit.clone()),
        }
    }
}
