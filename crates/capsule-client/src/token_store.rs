//! Two-tier persistence for the session token.
//!
//! The durable tier survives restarts ("remember me"); the ephemeral tier
//! lives only as long as the process. Both are always cleared together.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::ClientError;

/// One storage slot holding at most one token.
pub trait TokenSlot: Send + Sync {
    fn get(&self) -> Result<Option<String>, ClientError>;
    fn set(&self, token: &str) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

#[derive(Debug, Default)]
pub struct MemorySlot {
    token: Mutex<Option<String>>,
}

impl TokenSlot for MemorySlot {
    fn get(&self) -> Result<Option<String>, ClientError> {
        Ok(self.token.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn set(&self, token: &str) -> Result<(), ClientError> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// A token kept in a single file.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenSlot for FileSlot {
    fn get(&self) -> Result<Option<String>, ClientError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let token = raw.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, token: &str) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, token)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Durable,
    Ephemeral,
}

pub struct TokenStore {
    durable: Box<dyn TokenSlot>,
    ephemeral: Box<dyn TokenSlot>,
}

impl TokenStore {
    pub fn new(durable: Box<dyn TokenSlot>, ephemeral: Box<dyn TokenSlot>) -> Self {
        Self { durable, ephemeral }
    }

    /// Both tiers in memory; nothing outlives the process.
    pub fn in_memory() -> Self {
        Self::new(Box::<MemorySlot>::default(), Box::<MemorySlot>::default())
    }

    fn slot(&self, tier: Tier) -> &dyn TokenSlot {
        match tier {
            Tier::Durable => self.durable.as_ref(),
            Tier::Ephemeral => self.ephemeral.as_ref(),
        }
    }

    /// The token to start from: durable first, then ephemeral.
    pub fn resolve(&self) -> Result<Option<(String, Tier)>, ClientError> {
        for tier in [Tier::Durable, Tier::Ephemeral] {
            if let Some(token) = self.slot(tier).get()? {
                debug!(?tier, "Resolved stored session token");
                return Ok(Some((token, tier)));
            }
        }
        Ok(None)
    }

    /// Put `token` in `tier` and empty the other one.
    pub fn store(&self, tier: Tier, token: &str) -> Result<(), ClientError> {
        let other = match tier {
            Tier::Durable => Tier::Ephemeral,
            Tier::Ephemeral => Tier::Durable,
        };
        self.slot(other).clear()?;
        self.slot(tier).set(token)
    }

    /// Clear both tiers. Both are attempted even if the first fails.
    pub fn clear_all(&self) -> Result<(), ClientError> {
        let durable = self.durable.clear();
        let ephemeral = self.ephemeral.clear();
        if let Err(e) = &durable {
            warn!(error = %e, "Failed to clear durable token");
        }
        if let Err(e) = &ephemeral {
            warn!(error = %e, "Failed to clear ephemeral token");
        }
        durable.and(ephemeral)
    }
}
