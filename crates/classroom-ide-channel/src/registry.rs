//! Named channels sharing one connector and identity.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use classroom_ide_core::Identity;

use crate::{
    Channel, ChannelConfig, ChannelError, ChannelOptions, LocationOverride, transport::Connector,
};

/// Key of the channel every front end uses unless told otherwise.
pub const DEFAULT_CHANNEL: &str = "default";

/// Registry of channels keyed by name.
pub struct ChannelRegistry {
    connector: Arc<dyn Connector>,
    identity: RwLock<Option<Identity>>,
    channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, identity: Option<Identity>) -> Self {
        Self {
            connector,
            identity: RwLock::new(identity),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a channel under `key`, replacing (and closing) any previous one.
    pub fn register(&self, key: &str, config: ChannelConfig) -> Arc<Channel> {
        let identity = self
            .identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let channel = Channel::new(key, config, Arc::clone(&self.connector), identity);
        let previous = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Arc::clone(&channel));
        if let Some(previous) = previous {
            previous.close();
        }
        channel
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// The default channel, registered with default configuration on first use.
    pub fn get_or_default(&self) -> Arc<Channel> {
        self.get(DEFAULT_CHANNEL)
            .unwrap_or_else(|| self.register(DEFAULT_CHANNEL, ChannelConfig::default()))
    }

    /// Connect a registered channel.
    ///
    /// # Errors
    /// Returns error if no channel is registered under `key`.
    pub fn init(
        &self,
        key: &str,
        location: Option<LocationOverride>,
        options: Option<ChannelOptions>,
    ) -> Result<Arc<Channel>, ChannelError> {
        let channel = self
            .get(key)
            .ok_or_else(|| ChannelError::UnknownChannel(key.to_string()))?;
        channel.init(location, options);
        Ok(channel)
    }

    /// Close one channel; it stays registered.
    ///
    /// # Errors
    /// Returns error if no channel is registered under `key`.
    pub fn close(&self, key: &str) -> Result<(), ChannelError> {
        self.get(key)
            .ok_or_else(|| ChannelError::UnknownChannel(key.to_string()))?
            .close();
        Ok(())
    }

    /// Replace the identity used by every channel from its next connection on.
    pub fn set_identity(&self, identity: Option<Identity>) {
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = identity.clone();
        for channel in self.channels() {
            channel.set_identity(identity.clone());
        }
    }

    /// Snapshot of all registered channels.
    #[must_use]
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Close and forget every channel.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        for channel in drained {
            channel.close();
        }
    }
}
