//! Volume registry for multi-volume input.
//!
//! Resources are kept in precedence order and addressed by a [`VolumeKey`].
//! Keys come from a monotonic counter, so a key that has been removed is
//! never handed out again within the same session.

use crate::stream::StreamResource;
use oxiarc_core::{OxiArcError, Result, VolumeKey};

/// Ordered set of stream resources keyed by volume.
pub struct StreamRegistry {
    volumes: Vec<(VolumeKey, Box<dyn StreamResource>)>,
    next_key: u32,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            volumes: Vec::new(),
            next_key: 1,
        }
    }

    fn allocate_key(&mut self) -> Result<VolumeKey> {
        let key = VolumeKey::new(self.next_key)
            .ok_or_else(|| OxiArcError::protocol("register", "volume keys exhausted"))?;
        self.next_key = self
            .next_key
            .checked_add(1)
            .ok_or_else(|| OxiArcError::protocol("register", "volume keys exhausted"))?;
        Ok(key)
    }

    /// Append a resource as the last volume.
    pub fn register(&mut self, resource: Box<dyn StreamResource>) -> Result<VolumeKey> {
        let key = self.allocate_key()?;
        self.volumes.push((key, resource));
        tracing::debug!(volume = key.get(), "registered volume");
        Ok(key)
    }

    /// Insert a resource as the first volume.
    ///
    /// The resource still receives a fresh key; only its precedence changes.
    pub fn prepend(&mut self, resource: Box<dyn StreamResource>) -> Result<VolumeKey> {
        let key = self.allocate_key()?;
        self.volumes.insert(0, (key, resource));
        tracing::debug!(volume = key.get(), "prepended volume");
        Ok(key)
    }

    /// Close and evict a volume. Returns `false` if it was already gone.
    ///
    /// Close failures are logged, not raised.
    pub fn remove(&mut self, key: VolumeKey) -> bool {
        let Some(index) = self.volumes.iter().position(|(k, _)| *k == key) else {
            return false;
        };
        let (_, mut resource) = self.volumes.remove(index);
        if let Err(err) = resource.close() {
            tracing::warn!(volume = key.get(), error = %err, "failed to close evicted volume");
        }
        tracing::debug!(volume = key.get(), "removed volume");
        true
    }

    /// Look up a live volume.
    ///
    /// # Errors
    ///
    /// Returns [`OxiArcError::UnknownVolume`] if the key was never registered
    /// or has been removed.
    pub fn get(&mut self, key: VolumeKey) -> Result<&mut dyn StreamResource> {
        self.get_for("get", key)
    }

    pub(crate) fn get_for(
        &mut self,
        op: &'static str,
        key: VolumeKey,
    ) -> Result<&mut dyn StreamResource> {
        match self.volumes.iter_mut().find(|(k, _)| *k == key) {
            Some((_, resource)) => Ok(resource.as_mut()),
            None => Err(OxiArcError::unknown_volume(op, key.get())),
        }
    }

    /// Whether `key` names a live volume.
    pub fn contains(&self, key: VolumeKey) -> bool {
        self.volumes.iter().any(|(k, _)| *k == key)
    }

    /// Live keys in precedence order.
    pub fn keys(&self) -> Vec<VolumeKey> {
        self.volumes.iter().map(|(k, _)| *k).collect()
    }

    /// Number of live volumes.
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Whether no volume is registered.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Close and evict every volume.
    pub fn close_all(&mut self) {
        for (key, mut resource) in self.volumes.drain(..) {
            if let Err(err) = resource.close() {
                tracing::warn!(volume = key.get(), error = %err, "failed to close volume");
            }
        }
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("keys", &self.keys())
            .field("next_key", &self.next_key)
            .finish()
    }
}
