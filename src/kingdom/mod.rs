use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::identity::Address;
use crate::ledger::{build_merkle, LedgerState};
use crate::monarchy::{ConfigError, Monarchy, MonarchyConfig};

pub const STATE_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum KingdomError {
    #[error("state file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported state version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid monarchy config: {0}")]
    Config(#[from] ConfigError),
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("kingdom lock poisoned")]
    Poisoned,
}

#[derive(Serialize, Deserialize)]
struct KingdomFile {
    version: u8,
    monarchy: Monarchy,
    bank: LedgerState,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Exclusive advisory lock on `<state>.lock`. Held across a whole
/// load, apply, save cycle so separate processes never interleave on one
/// state file. Released on drop.
pub struct StateLock {
    file: fs::File,
}

impl StateLock {
    pub fn acquire(state: &Path) -> Result<Self, KingdomError> {
        if let Some(parent) = state.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock_path = sibling(state, ".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        FileExt::lock_exclusive(&file)?;
        debug!(path = %lock_path.display(), "state lock acquired");
        Ok(Self { file })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// The monarchy together with the balances it moves. Every operation runs
/// against both, so this is the unit that gets locked and persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kingdom {
    pub monarchy: Monarchy,
    pub bank: LedgerState,
}

impl Kingdom {
    pub fn new(owner: Address, config: MonarchyConfig) -> Result<Self, KingdomError> {
        Ok(Self {
            monarchy: Monarchy::with_config(owner, config)?,
            bank: LedgerState::new(),
        })
    }

    /// Reads a state file. The embedded config is validated like a fresh one.
    pub fn load(path: &Path) -> Result<Self, KingdomError> {
        let bytes = fs::read(path)?;
        let file: KingdomFile = serde_json::from_slice(&bytes)?;
        if file.version != STATE_VERSION {
            return Err(KingdomError::UnsupportedVersion(file.version));
        }
        file.monarchy.config().validate()?;
        Ok(Self {
            monarchy: file.monarchy,
            bank: file.bank,
        })
    }

    /// Loads `path`, applies `op` and saves, all under the state lock.
    /// Nothing is written when `op` fails.
    pub fn update<R, E>(path: &Path, op: impl FnOnce(&mut Kingdom) -> Result<R, E>) -> Result<R, E>
    where
        E: From<KingdomError>,
    {
        let _lock = StateLock::acquire(path)?;
        let mut kingdom = Self::load(path)?;
        let out = op(&mut kingdom)?;
        kingdom.save(path)?;
        Ok(out)
    }

    /// Writes a brand new state file under the state lock. Refuses to
    /// replace an existing one unless `overwrite` is set.
    pub fn create(&self, path: &Path, overwrite: bool) -> Result<(), KingdomError> {
        let _lock = StateLock::acquire(path)?;
        if path.exists() && !overwrite {
            return Err(KingdomError::AlreadyExists(path.to_path_buf()));
        }
        self.save(path)
    }

    /// Writes to a sibling temp file first, then renames over `path`.
    pub fn save(&self, path: &Path) -> Result<(), KingdomError> {
        let file = KingdomFile {
            version: STATE_VERSION,
            monarchy: self.monarchy.clone(),
            bank: self.bank.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = sibling(path, ".tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&json)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        info!(path = %path.display(), height = self.bank.height, "state saved");
        Ok(())
    }

    /// Commitment over every monarchy field except the event log (config and
    /// the full name map included), paired with the bank's account root.
    pub fn state_root(&self) -> [u8; 32] {
        let m = &self.monarchy;
        let config = m.config();
        let mut hasher = Sha256::new();
        hasher.update(b"monarchy");
        hasher.update(m.owner().as_bytes());
        hasher.update(m.treasury().as_bytes());
        hasher.update(m.monarch().as_bytes());
        hasher.update(m.claim_price().to_le_bytes());
        hasher.update(m.accumulated_fees().to_le_bytes());
        hasher.update([u8::from(m.paused())]);
        hasher.update(config.floor_price.to_le_bytes());
        hasher.update(config.fee_divisor.to_le_bytes());
        hasher.update(config.escalation_numerator.to_le_bytes());
        hasher.update(config.escalation_denominator.to_le_bytes());
        for (who, name) in m.names() {
            hasher.update(b"name");
            hasher.update(who.as_bytes());
            hasher.update(name.as_bytes());
        }
        let monarchy_leaf: [u8; 32] = hasher.finalize().into();
        build_merkle(vec![monarchy_leaf, self.bank.state_root()])
    }
}

/// Cloneable handle that serializes all access to one [`Kingdom`].
#[derive(Clone)]
pub struct SharedKingdom {
    inner: Arc<Mutex<Kingdom>>,
}

impl SharedKingdom {
    pub fn new(kingdom: Kingdom) -> Self {
        Self {
            inner: Arc::new(Mutex::new(kingdom)),
        }
    }

    /// Runs `f` with the lock held for its whole duration.
    pub fn with<R>(&self, f: impl FnOnce(&mut Kingdom) -> R) -> Result<R, KingdomError> {
        let mut guard = self.inner.lock().map_err(|_| KingdomError::Poisoned)?;
        Ok(f(&mut guard))
    }

    pub fn snapshot(&self) -> Result<Kingdom, KingdomError> {
        self.with(|k| k.clone())
    }
}
