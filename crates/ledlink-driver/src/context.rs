//! Registry of the configured strips, keyed by strip index.

use std::collections::BTreeMap;
use std::sync::Arc;

use ledlink_peer::{DeviceConfiguration, StripId, StripIndex, StripStatusEntry};
use tracing::{info, warn};

use crate::config::PlayerConfig;
use crate::error::{DriverError, Result};
use crate::state::StripStateMachine;
use crate::store::ConfigurationStore;
use crate::strip::StripBackend;

/// Owns every strip state machine and the configuration they came from.
pub struct StripContext {
    backend: Arc<dyn StripBackend>,
    store: Arc<dyn ConfigurationStore>,
    player_config: PlayerConfig,
    configuration: Option<DeviceConfiguration>,
    strips: BTreeMap<StripIndex, StripStateMachine>,
}

impl StripContext {
    /// Build the registry from whatever the store holds. A stored
    /// configuration that cannot be brought up is ignored; the portal will be
    /// asked to upload a fresh one.
    pub fn new(
        backend: Arc<dyn StripBackend>,
        store: Arc<dyn ConfigurationStore>,
        player_config: PlayerConfig,
    ) -> Result<Self> {
        let mut context = Self {
            backend,
            store,
            player_config,
            configuration: None,
            strips: BTreeMap::new(),
        };

        if let Some(stored) = context.store.load()? {
            match stored
                .validate()
                .map_err(DriverError::InvalidArgument)
                .and_then(|()| context.open_strips(&stored))
            {
                Ok(strips) => {
                    info!(
                        token = %stored.concurrency_token,
                        strips = strips.len(),
                        "stored configuration loaded"
                    );
                    context.strips = strips;
                    context.configuration = Some(stored);
                }
                Err(err) => warn!(error = %err, "ignoring stored configuration"),
            }
        }
        Ok(context)
    }

    pub fn is_configured(&self) -> bool {
        self.configuration.is_some()
    }

    /// Token of the active configuration, checked by the connect handshake.
    pub fn concurrency_token(&self) -> Option<&str> {
        self.configuration
            .as_ref()
            .map(|config| config.concurrency_token.as_str())
    }

    pub fn configuration(&self) -> Option<&DeviceConfiguration> {
        self.configuration.as_ref()
    }

    /// Validate, stop everything, open the new strips, persist, then swap.
    /// On failure the previous strips and token stay in place.
    pub fn apply_configuration(&mut self, config: DeviceConfiguration) -> Result<()> {
        config.validate().map_err(DriverError::InvalidArgument)?;

        self.reset_all();
        let strips = self.open_strips(&config)?;
        self.store.save(&config)?;

        info!(
            token = %config.concurrency_token,
            strips = strips.len(),
            "configuration applied"
        );
        self.strips = strips;
        self.configuration = Some(config);
        Ok(())
    }

    /// The state machine for `index`.
    pub fn strip_mut(&mut self, index: StripIndex) -> Result<&mut StripStateMachine> {
        if !self.is_configured() {
            return Err(DriverError::InvalidState(
                "no configuration loaded".to_string(),
            ));
        }
        self.strips
            .get_mut(&index)
            .ok_or_else(|| DriverError::NotFound(format!("strip {index}")))
    }

    /// Status of every strip, or of the one with `id`.
    pub fn status(&self, id: Option<StripId>) -> Result<Vec<StripStatusEntry>> {
        let entries = self
            .strips
            .values()
            .filter(|strip| id.is_none_or(|id| strip.configuration().id == id))
            .map(|strip| StripStatusEntry {
                strip_id: strip.configuration().id,
                index: strip.index(),
                status: strip.status(),
            })
            .collect::<Vec<_>>();

        match id {
            Some(id) if entries.is_empty() => Err(DriverError::NotFound(format!("strip {id}"))),
            _ => Ok(entries),
        }
    }

    /// Every strip back to idle and dark.
    pub fn reset_all(&mut self) {
        for strip in self.strips.values_mut() {
            strip.reset();
        }
    }

    fn open_strips(
        &self,
        config: &DeviceConfiguration,
    ) -> Result<BTreeMap<StripIndex, StripStateMachine>> {
        config
            .strips
            .iter()
            .map(|strip| -> Result<(StripIndex, StripStateMachine)> {
                let proxy = self.backend.open(strip)?;
                Ok((
                    strip.index,
                    StripStateMachine::new(strip.clone(), proxy, self.player_config.clone()),
                ))
            })
            .collect()
    }
}

impl std::fmt::Debug for StripContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripContext")
            .field("token", &self.concurrency_token())
            .field("strips", &self.strips)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use ledlink_peer::{Color, ColorSpectrum, Frame, StripConfiguration, StripStatus};

    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use crate::strip::{RecordingBackend, StripEvent};

    struct ReadOnlyStore;

    impl ConfigurationStore for ReadOnlyStore {
        fn load(&self) -> std::result::Result<Option<DeviceConfiguration>, StoreError> {
            Ok(None)
        }

        fn save(&self, _config: &DeviceConfiguration) -> std::result::Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    fn device(token: &str, strips: &[(StripIndex, u16)]) -> DeviceConfiguration {
        DeviceConfiguration::new(
            token,
            strips
                .iter()
                .map(|(index, pixels)| StripConfiguration::new(*index, *pixels, ColorSpectrum::Rgb))
                .collect(),
        )
    }

    fn context(store: Arc<dyn ConfigurationStore>) -> (StripContext, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::new());
        let context = StripContext::new(
            Arc::clone(&backend) as Arc<dyn StripBackend>,
            store,
            PlayerConfig::default(),
        )
        .unwrap();
        (context, backend)
    }

    #[test]
    fn unconfigured_context_rejects_strip_operations() {
        let (mut context, _backend) = context(Arc::new(MemoryStore::new()));
        assert!(!context.is_configured());
        assert!(context.concurrency_token().is_none());
        assert!(matches!(context.strip_mut(0), Err(DriverError::InvalidState(_))));
        assert!(context.status(None).unwrap().is_empty());
    }

    #[test]
    fn stored_configuration_is_loaded() {
        let store = Arc::new(MemoryStore::with(device("tok-A", &[(0, 8), (1, 16)])));
        let (mut context, backend) = context(store);

        assert_eq!(context.concurrency_token(), Some("tok-A"));
        assert_eq!(context.status(None).unwrap().len(), 2);
        assert!(backend.strip(1).is_some());
        assert!(matches!(context.strip_mut(5), Err(DriverError::NotFound(_))));
    }

    #[test]
    fn apply_swaps_and_persists() {
        let store = Arc::new(MemoryStore::with(device("tok-OLD", &[(0, 8)])));
        let (mut context, _backend) = context(Arc::clone(&store) as Arc<dyn ConfigurationStore>);

        context.apply_configuration(device("tok-NEW", &[(3, 12)])).unwrap();

        assert_eq!(context.concurrency_token(), Some("tok-NEW"));
        assert!(matches!(context.strip_mut(0), Err(DriverError::NotFound(_))));
        assert_eq!(context.strip_mut(3).unwrap().configuration().pixel_count, 12);
        assert_eq!(store.load().unwrap().unwrap().concurrency_token, "tok-NEW");
    }

    #[test]
    fn apply_stops_running_strips() {
        let store = Arc::new(MemoryStore::with(device("tok-A", &[(0, 2)])));
        let (mut context, backend) = context(store);
        context
            .strip_mut(0)
            .unwrap()
            .display_frame(&Frame::solid(ColorSpectrum::Rgb, 2, Color::rgb(1, 2, 3)))
            .unwrap();
        let old = backend.strip(0).unwrap();

        context.apply_configuration(device("tok-B", &[(0, 4)])).unwrap();
        assert_eq!(old.last(), Some(StripEvent::Clear));
        assert_eq!(context.strip_mut(0).unwrap().status(), StripStatus::Idle);
    }

    #[test]
    fn invalid_configuration_keeps_previous() {
        let store = Arc::new(MemoryStore::with(device("tok-A", &[(0, 8)])));
        let (mut context, _backend) = context(store);

        let err = context
            .apply_configuration(device("tok-B", &[(1, 8), (1, 9)]))
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument(_)));
        assert_eq!(context.concurrency_token(), Some("tok-A"));
        assert!(context.strip_mut(0).is_ok());
    }

    #[test]
    fn failed_open_rolls_back() {
        let store = Arc::new(MemoryStore::with(device("tok-A", &[(0, 8)])));
        let (mut context, backend) = context(store);

        backend.refuse_open(true);
        let err = context.apply_configuration(device("tok-B", &[(1, 8)])).unwrap_err();
        assert!(matches!(err, DriverError::Strip(_)));
        assert_eq!(context.concurrency_token(), Some("tok-A"));
        assert!(context.strip_mut(0).is_ok());
    }

    #[test]
    fn failed_save_rolls_back() {
        let (mut context, _backend) = context(Arc::new(ReadOnlyStore));

        let err = context.apply_configuration(device("tok-A", &[(0, 8)])).unwrap_err();
        assert!(matches!(err, DriverError::Store(_)));
        assert!(!context.is_configured());
        assert!(context.status(None).unwrap().is_empty());
    }

    #[test]
    fn status_filters_by_id() {
        let config = device("tok-A", &[(0, 8), (1, 8)]);
        let wanted = config.strips[1].id;
        let (context, _backend) = context(Arc::new(MemoryStore::with(config)));

        let entries = context.status(Some(wanted)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].index, 1);
        assert_eq!(entries[0].status, StripStatus::Idle);

        assert!(matches!(
            context.status(Some(StripId::new())),
            Err(DriverError::NotFound(_))
        ));
    }

    #[test]
    fn corrupt_stored_configuration_is_ignored() {
        let store = Arc::new(MemoryStore::with(device("", &[(0, 8)])));
        let (context, _backend) = context(store);
        assert!(!context.is_configured());
    }
}
