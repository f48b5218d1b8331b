//! Active channel list with selection and navigation

use crate::models::{default_channels, Channel};
use std::sync::Arc;

/// Owns the current channel list. The list is swapped as a whole and is
/// never left empty.
#[derive(Debug, Clone)]
pub struct ChannelCatalog {
    channels: Arc<[Channel]>,
    selected: Option<u32>,
}

impl Default for ChannelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelCatalog {
    /// Catalog holding the bundled channels
    pub fn new() -> Self {
        Self::with_channels(Vec::new())
    }

    /// Catalog holding `channels`, or the bundled channels when empty
    pub fn with_channels(channels: Vec<Channel>) -> Self {
        let channels = if channels.is_empty() {
            default_channels()
        } else {
            channels
        };
        Self {
            channels: channels.into(),
            selected: None,
        }
    }

    /// Swap in a new list. An empty list is rejected and the current one kept.
    pub fn replace(&mut self, channels: Vec<Channel>) -> bool {
        if channels.is_empty() {
            tracing::warn!(kept = self.channels.len(), "Refusing to replace catalog with an empty list");
            return false;
        }

        self.channels = channels.into();
        if let Some(id) = self.selected {
            if self.get(id).is_none() {
                self.selected = None;
            }
        }
        tracing::info!(count = self.channels.len(), "Channel catalog replaced");
        true
    }

    /// Look up a channel by id and make it the selection
    pub fn select(&mut self, id: u32) -> Option<&Channel> {
        let index = self.index_of(id)?;
        self.selected = Some(id);
        self.channels.get(index)
    }

    pub fn get(&self, id: u32) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id() == id)
    }

    /// Channel after `after_id`, wrapping to the first at the end or when unknown
    pub fn next(&self, after_id: u32) -> &Channel {
        let index = match self.index_of(after_id) {
            Some(i) if i + 1 < self.channels.len() => i + 1,
            _ => 0,
        };
        &self.channels[index]
    }

    pub fn first(&self) -> &Channel {
        &self.channels[0]
    }

    pub fn selected(&self) -> Option<&Channel> {
        self.selected.and_then(|id| self.get(id))
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Cheap shared handle to the current list for readers on other threads
    pub fn snapshot(&self) -> Arc<[Channel]> {
        Arc::clone(&self.channels)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn index_of(&self, id: u32) -> Option<usize> {
        self.channels.iter().position(|c| c.id() == id)
    }
}
