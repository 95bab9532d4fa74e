//! Trust-on-first-use pinning of peer key fingerprints.
//!
//! The first fingerprint observed for an identity is pinned and persisted
//! under `fingerprint:<identity>`. Later observations are compared against
//! the pin; a differing value is reported, never written. The only way to
//! move a pin is [`FingerprintStore::replace_pin`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use murmur_shared::constants::FINGERPRINT_KEY_PREFIX;
use murmur_shared::{Fingerprint, PeerIdentity};

use crate::error::{Result, StoreError};
use crate::kv::{KvStore, SharedKv};

/// Outcome of comparing a received fingerprint with the pinned one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// No pin existed; the received value is now pinned.
    Pinned,
    /// The received value equals the pin.
    Confirmed,
    /// The received value differs from the pin. The pin is unchanged.
    Mismatch {
        expected: Fingerprint,
        received: Fingerprint,
    },
}

/// Decide the observation outcome from the stored pin and the received value.
pub fn classify(stored: Option<&Fingerprint>, received: &Fingerprint) -> Observation {
    match stored {
        None => Observation::Pinned,
        Some(pin) if pin == received => Observation::Confirmed,
        Some(pin) => Observation::Mismatch {
            expected: pin.clone(),
            received: received.clone(),
        },
    }
}

/// One store per process, shared by every session. The mutex serialises
/// the read-compare-write in [`FingerprintStore::observe`].
pub type SharedFingerprintStore = Arc<Mutex<FingerprintStore>>;

pub struct FingerprintStore {
    kv: SharedKv,
    pins: HashMap<PeerIdentity, Fingerprint>,
    /// Pins accepted in memory whose durable write has not succeeded yet.
    pending: BTreeMap<PeerIdentity, Fingerprint>,
}

impl FingerprintStore {
    /// Load every persisted pin from `kv`. Unreadable entries are skipped.
    pub fn load(kv: SharedKv) -> Result<Self> {
        let entries = lock(&kv)?.scan_prefix(FINGERPRINT_KEY_PREFIX)?;

        let mut pins = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            match parse_entry(&key, &value) {
                Ok((identity, fingerprint)) => {
                    pins.insert(identity, fingerprint);
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable fingerprint pin"),
            }
        }

        info!(count = pins.len(), "Loaded pinned fingerprints");

        Ok(Self {
            kv,
            pins,
            pending: BTreeMap::new(),
        })
    }

    pub fn into_shared(self) -> SharedFingerprintStore {
        Arc::new(Mutex::new(self))
    }

    /// Compare `fingerprint` with the pin for `identity`, pinning it if none
    /// exists.
    ///
    /// A failed durable write does not change the outcome: the pin holds for
    /// this process and the write is queued for [`Self::retry_pending`].
    pub fn observe(&mut self, identity: &PeerIdentity, fingerprint: &Fingerprint) -> Observation {
        let observation = classify(self.pins.get(identity), fingerprint);

        match &observation {
            Observation::Pinned => {
                info!(identity = %identity, fingerprint = %fingerprint, "Pinned new peer fingerprint");
                self.pins.insert(identity.clone(), fingerprint.clone());
                self.persist(identity, fingerprint);
            }
            Observation::Confirmed => {
                debug!(identity = %identity, "Fingerprint matches pin");
            }
            Observation::Mismatch { expected, received } => {
                warn!(
                    identity = %identity,
                    expected = %expected,
                    received = %received,
                    "Fingerprint does not match pinned value"
                );
            }
        }

        observation
    }

    /// Overwrite the pin for `identity`. Returns the previous pin, if any.
    pub fn replace_pin(
        &mut self,
        identity: &PeerIdentity,
        fingerprint: &Fingerprint,
    ) -> Option<Fingerprint> {
        let previous = self.pins.insert(identity.clone(), fingerprint.clone());
        warn!(
            identity = %identity,
            previous = ?previous.as_ref().map(Fingerprint::as_str),
            fingerprint = %fingerprint,
            "Replacing pinned fingerprint"
        );
        self.persist(identity, fingerprint);
        previous
    }

    pub fn pinned(&self, identity: &PeerIdentity) -> Option<&Fingerprint> {
        self.pins.get(identity)
    }

    /// Every pin, ordered by identity.
    pub fn all_pins(&self) -> Vec<(PeerIdentity, Fingerprint)> {
        let mut pins: Vec<_> = self
            .pins
            .iter()
            .map(|(id, fp)| (id.clone(), fp.clone()))
            .collect();
        pins.sort_by(|a, b| a.0.cmp(&b.0));
        pins
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of pins not yet durably written.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Re-attempt queued writes. Returns how many are still pending.
    pub fn retry_pending(&mut self) -> usize {
        let queued = std::mem::take(&mut self.pending);
        if !queued.is_empty() {
            debug!(count = queued.len(), "Retrying pending fingerprint writes");
        }
        for (identity, fingerprint) in queued {
            self.persist(&identity, &fingerprint);
        }
        self.pending.len()
    }

    fn persist(&mut self, identity: &PeerIdentity, fingerprint: &Fingerprint) {
        match self.write(identity, fingerprint) {
            Ok(()) => {
                self.pending.remove(identity);
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Failed to persist fingerprint pin");
                self.pending.insert(identity.clone(), fingerprint.clone());
            }
        }
    }

    fn write(&self, identity: &PeerIdentity, fingerprint: &Fingerprint) -> Result<()> {
        lock(&self.kv)?.put(&pin_key(identity), fingerprint.as_str())
    }
}

/// Storage key of the pin for `identity`.
pub fn pin_key(identity: &PeerIdentity) -> String {
    format!("{FINGERPRINT_KEY_PREFIX}{identity}")
}

fn parse_entry(key: &str, value: &str) -> Result<(PeerIdentity, Fingerprint)> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let raw_identity = key
        .strip_prefix(FINGERPRINT_KEY_PREFIX)
        .ok_or_else(|| corrupt("missing prefix".into()))?;
    let identity = PeerIdentity::new(raw_identity).map_err(|e| corrupt(e.to_string()))?;
    let fingerprint = Fingerprint::parse(value).map_err(|e| corrupt(e.to_string()))?;
    Ok((identity, fingerprint))
}

pub(crate) fn lock(kv: &SharedKv) -> Result<MutexGuard<'_, Box<dyn KvStore>>> {
    kv.lock().map_err(|_| StoreError::LockPoisoned)
}
