//! Where a session loads the local preferences from, and restores them to.
//!
//! Player two overwrites its active preferences with the ones player one sends. The
//! store always ends up holding the *local* preferences again when the session stops.

use crate::sync::Mutex;
use crate::{NetplayError, Preferences};

/// Persistent storage for the local [`Preferences`].
pub trait PreferenceStore: Send + Sync {
    /// Loads the stored preferences. `Ok(None)` means nothing was stored yet.
    fn load(&self) -> Result<Option<Preferences>, NetplayError>;

    /// Stores `preferences`, replacing what was stored.
    fn save(&self, preferences: &Preferences) -> Result<(), NetplayError>;
}

/// A [`PreferenceStore`] that keeps the preferences in memory.
///
/// ```
/// use bubble_netplay::{InMemoryPreferenceStore, PreferenceStore, Preferences};
///
/// let store = InMemoryPreferenceStore::new();
/// assert_eq!(store.load()?, None);
/// store.save(&Preferences::default())?;
/// assert_eq!(store.current(), Some(Preferences::default()));
/// # Ok::<(), bubble_netplay::NetplayError>(())
/// ```
#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    stored: Mutex<Option<Preferences>>,
}

impl InMemoryPreferenceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `preferences`.
    #[must_use]
    pub fn with_preferences(preferences: Preferences) -> Self {
        Self {
            stored: Mutex::new(Some(preferences)),
        }
    }

    /// What is stored right now.
    #[must_use]
    pub fn current(&self) -> Option<Preferences> {
        *self.stored.lock()
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn load(&self) -> Result<Option<Preferences>, NetplayError> {
        Ok(self.current())
    }

    fn save(&self, preferences: &Preferences) -> Result<(), NetplayError> {
        *self.stored.lock() = Some(*preferences);
        Ok(())
    }
}

/// A [`PreferenceStore`] backed by a JSON file.
///
/// A missing file loads as `None`. Saving writes the whole file.
#[cfg(feature = "json")]
#[derive(Debug, Clone)]
pub struct JsonFilePreferenceStore {
    path: std::path::PathBuf,
}

#[cfg(feature = "json")]
impl JsonFilePreferenceStore {
    /// A store reading and writing `path`.
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(feature = "json")]
impl PreferenceStore for JsonFilePreferenceStore {
    fn load(&self) -> Result<Option<Preferences>, NetplayError> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) => Preferences::from_json(&json).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(NetplayError::InvalidRequest {
                info: format!("cannot read {}: {err}", self.path.display()),
            }),
        }
    }

    fn save(&self, preferences: &Preferences) -> Result<(), NetplayError> {
        let json = preferences.to_json()?;
        std::fs::write(&self.path, json).map_err(|err| NetplayError::InvalidRequest {
            info: format!("cannot write {}: {err}", self.path.display()),
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_round_trip() {
        let store = InMemoryPreferenceStore::new();
        assert_eq!(store.load().unwrap(), None);

        let prefs = Preferences {
            difficulty: 2,
            ..Preferences::default()
        };
        store.save(&prefs).unwrap();
        assert_eq!(store.load().unwrap(), Some(prefs));

        let other = InMemoryPreferenceStore::with_preferences(Preferences::default());
        assert_eq!(other.current(), Some(Preferences::default()));
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_store_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "bubble-netplay-prefs-{}.json",
            std::process::id()
        ));
        let store = JsonFilePreferenceStore::new(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!(store.load().unwrap(), None);

        let prefs = Preferences {
            game_mode: 2,
            music_on: false,
            ..Preferences::default()
        };
        store.save(&prefs).unwrap();
        assert_eq!(store.load().unwrap(), Some(prefs));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            store.load(),
            Err(NetplayError::SerializationError { .. })
        ));
        std::fs::remove_file(&path).unwrap();
    }
}
