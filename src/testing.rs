//! Test entities and helpers shared by the unit tests.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Level;

use crate::storage::{DeleteAware, Entity, EntityType, MemoryStore};
use crate::transaction::{DatabaseContext, MemoryTransactor, TransactError, TransactResult};

/// A fresh executor over an empty store.
pub fn memory() -> MemoryTransactor {
    MemoryTransactor::new(MemoryStore::new())
}

/// Run `f` with a subscriber that keeps formatted events at `WARN` and above.
pub fn capture_warnings<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock()).into_owned();
    (result, logs)
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A person that notices when it is deleted.
#[derive(Debug, Default)]
pub struct Person {
    name: Mutex<String>,
    deletes: AtomicUsize,
    veto_delete: AtomicBool,
}

impl Person {
    pub fn named(name: &str) -> Self {
        Self {
            name: Mutex::new(name.to_string()),
            ..Default::default()
        }
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn rename(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }

    /// How many times `on_delete` ran.
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn was_deleted(&self) -> bool {
        self.deletes() > 0
    }

    /// Make the next `on_delete` fail.
    pub fn veto_delete(&self) {
        self.veto_delete.store(true, Ordering::SeqCst);
    }
}

impl Entity for Person {
    fn as_delete_aware(&self) -> Option<&dyn DeleteAware> {
        Some(self)
    }
}

impl DeleteAware for Person {
    fn on_delete(&self, _db: &dyn DatabaseContext) -> TransactResult<()> {
        if self.veto_delete.load(Ordering::SeqCst) {
            return Err(TransactError::message(format!("{} refuses to go", self.name())));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Stands in for a [`Person`]; hooks see it as one.
#[derive(Debug)]
pub struct PersonProxy {
    pub target: Arc<Person>,
}

impl Entity for PersonProxy {
    fn declared_type(&self) -> EntityType {
        EntityType::of::<Person>()
    }
}

/// An entity with no hooks registered and no delete callback.
#[derive(Debug, Default)]
pub struct Invoice {
    pub amount: u64,
}

impl Entity for Invoice {}
