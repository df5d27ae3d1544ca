//! CIB collaborator interface.
//!
//! The CIB is an external versioned store; the controller reads
//! snapshots and writes status updates through this trait. Writes use
//! optimistic concurrency on the version triple: a conflicting write
//! is rejected and the caller requeues a fresh read-compute-write
//! cycle with exponential backoff.

use steward_state::cib::CibVersion;
use tracing::{debug, warn};

/// CIB access failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CibError {
    /// Write rejected: the document moved under us
    #[error("version conflict: expected {expected}, store has {actual}")]
    Conflict {
        /// Version the writer expected
        expected: CibVersion,
        /// Version actually in the store
        actual: CibVersion,
    },

    /// Store unreachable
    #[error("CIB unavailable: {0}")]
    Unavailable(String),

    /// Document rejected by the store
    #[error("CIB rejected update: {0}")]
    Rejected(String),
}

/// Access to the cluster information base
pub trait CibClient: Send {
    /// Read the current document
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable
    fn read(&self) -> Result<String, CibError>;

    /// Current version triple
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable
    fn version(&self) -> Result<CibVersion, CibError>;

    /// Replace the document, guarded by the expected version
    ///
    /// # Errors
    ///
    /// Returns [`CibError::Conflict`] when the store has moved past
    /// `expected`
    fn write(&mut self, xml: &str, expected: CibVersion) -> Result<CibVersion, CibError>;
}

/// Retry schedule for transient CIB failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First delay
    pub base_ms: u64,
    /// Delay ceiling
    pub cap_ms: u64,
    /// Give up after this many attempts
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 100,
            cap_ms: 5000,
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given (zero-based) retry attempt
    #[must_use]
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exp = self.base_ms.saturating_mul(1u64 << attempt.min(16));
        exp.min(self.cap_ms)
    }
}

/// Run a read-compute-write cycle until it lands or the retry cap is
/// hit
///
/// `compute` maps the current document to the replacement; returning
/// `None` abandons the update (the state it wanted is already there).
///
/// # Errors
///
/// Returns the last error once `max_attempts` is exhausted, and
/// non-conflict errors immediately.
pub async fn update_with_retry<F>(
    client: &mut dyn CibClient,
    policy: RetryPolicy,
    mut compute: F,
) -> Result<Option<CibVersion>, CibError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut attempt = 0;
    loop {
        let current = client.read()?;
        let expected = client.version()?;
        let Some(replacement) = compute(&current) else {
            return Ok(None);
        };
        match client.write(&replacement, expected) {
            Ok(version) => return Ok(Some(version)),
            Err(CibError::Conflict { expected, actual }) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    warn!(%expected, %actual, attempt, "giving up on CIB update");
                    return Err(CibError::Conflict { expected, actual });
                }
                let delay = policy.backoff_ms(attempt - 1);
                debug!(%actual, attempt, delay, "CIB write conflict, retrying");
                tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
            }
            Err(other) => return Err(other),
        }
    }
}

/// In-process CIB used by tests and the sanity check
#[derive(Debug, Clone)]
pub struct InMemoryCib {
    xml: String,
    version: CibVersion,
}

impl InMemoryCib {
    /// Create a store holding the given document
    #[must_use]
    pub fn new(xml: &str) -> Self {
        Self {
            xml: xml.to_string(),
            version: CibVersion::default(),
        }
    }

    /// Mutate the document out-of-band, simulating another writer
    pub fn external_update(&mut self, xml: &str) {
        self.xml = xml.to_string();
        self.version.num_updates += 1;
    }
}

impl CibClient for InMemoryCib {
    fn read(&self) -> Result<String, CibError> {
        Ok(self.xml.clone())
    }

    fn version(&self) -> Result<CibVersion, CibError> {
        Ok(self.version)
    }

    fn write(&mut self, xml: &str, expected: CibVersion) -> Result<CibVersion, CibError> {
        if expected != self.version {
            return Err(CibError::Conflict {
                expected,
                actual: self.version,
            });
        }
        self.xml = xml.to_string();
        self.version.num_updates += 1;
        Ok(self.version)
    }
}
