//! Persisted user preferences.

use tracing::{info, warn};

use murmur_shared::constants::LANGUAGE_KEY;
use murmur_shared::Language;

use crate::error::Result;
use crate::fingerprints::lock;
use crate::kv::SharedKv;

#[derive(Clone)]
pub struct Settings {
    kv: SharedKv,
}

impl Settings {
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    /// The saved interface language, or the default when none (or an
    /// unsupported code) is stored.
    pub fn language(&self) -> Result<Language> {
        let saved = lock(&self.kv)?.get(LANGUAGE_KEY)?;
        Ok(match saved {
            Some(code) => Language::from_code(&code).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring saved language");
                Language::default()
            }),
            None => Language::default(),
        })
    }

    pub fn set_language(&self, language: Language) -> Result<()> {
        lock(&self.kv)?.put(LANGUAGE_KEY, language.code())?;
        info!(language = %language, "Language updated");
        Ok(())
    }
}
