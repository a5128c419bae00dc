//! The persistence collaborator.
//!
//! The engine only ever asks three things of a store: does an identifier
//! already exist, hand me its bytes, keep these bytes. How the bytes are laid
//! out on disk (or elsewhere) is entirely the store's business, and turning a
//! payload into bytes is the business of the class's `load`/`save`
//! capability.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::sync::Mutex;

use camino::Utf8PathBuf;

use crate::hash::NodeId;

pub trait Store: Send + Sync {
    /// Already materialized? Checked before `init` runs.
    fn contains(&self, id: NodeId) -> bool;

    fn read(&self, id: NodeId) -> anyhow::Result<Vec<u8>>;

    fn write(&self, id: NodeId, bytes: &[u8]) -> anyhow::Result<()>;

    /// Called after a successful save with the node's canonical call, so a
    /// store can keep a human-readable ledger of what it holds.
    fn record(&self, _id: NodeId, _description: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Minimal directory-backed [`Store`]: one file per identifier, written
/// through a `.part` rename, plus an `info.txt` ledger mapping identifiers
/// to canonical calls.
pub struct DirStore {
    root: Utf8PathBuf,
    ledger: Mutex<()>,
}

impl DirStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            ledger: Mutex::new(()),
        })
    }

    fn path(&self, id: NodeId) -> Utf8PathBuf {
        self.root.join(id.to_hex())
    }
}

impl Store for DirStore {
    fn contains(&self, id: NodeId) -> bool {
        self.path(id).exists()
    }

    fn read(&self, id: NodeId) -> anyhow::Result<Vec<u8>> {
        Ok(fs::read(self.path(id))?)
    }

    fn write(&self, id: NodeId, bytes: &[u8]) -> anyhow::Result<()> {
        let path = self.path(id);
        let part = path.with_extension("part");
        fs::write(&part, bytes)?;
        fs::rename(&part, &path)?;
        Ok(())
    }

    fn record(&self, id: NodeId, description: &str) -> anyhow::Result<()> {
        let _guard = self.ledger.lock().expect("ledger lock poisoned");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("info.txt"))?;
        writeln!(file, "{id}\t{description}")?;
        Ok(())
    }
}
