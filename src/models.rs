//! Data models for the channel catalog

use serde::{Deserialize, Serialize};

/// A playable channel entry. Fields are read-only once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    id: u32,
    name: String,
    description: String,
    url: String,
    category: String,
    logo: Option<String>,
    is_live: bool,
}

impl Channel {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            url: url.into(),
            category: category.into(),
            logo: None,
            is_live: true,
        }
    }

    pub fn with_logo(mut self, logo: Option<String>) -> Self {
        self.logo = logo;
        self
    }

    pub fn with_live(mut self, is_live: bool) -> Self {
        self.is_live = is_live;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn logo(&self) -> Option<&str> {
        self.logo.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }
}

/// Free channels bundled with the app, used until a playlist has been loaded
pub fn default_channels() -> Vec<Channel> {
    vec![
        Channel::new(
            1,
            "Red Bull TV",
            "Extreme sports and events",
            "https://rbmn-live.akamaized.net/hls/live/590964/BoRB-AT/master.m3u8",
            "Sports",
        ),
        Channel::new(
            2,
            "RT News",
            "Russia Today - 24/7 news",
            "https://rt-glb.rttv.com/live/rtnews/playlist.m3u8",
            "News",
        ),
        Channel::new(
            3,
            "Al Jazeera English",
            "International news channel",
            "https://live-hls-web-aje.getaj.net/AJE/index.m3u8",
            "News",
        ),
        Channel::new(
            4,
            "Fashion TV",
            "Fashion and lifestyle",
            "https://fashiontv-fashiontv-1-eu.rakuten.wurl.tv/playlist.m3u8",
            "Lifestyle",
        ),
        Channel::new(
            5,
            "Bloomberg TV",
            "Financial news",
            "https://bloomberg.com/media-manifest/streams/phoenix-us.m3u8",
            "Business",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channels_have_sequential_ids() {
        let channels = default_channels();
        assert_eq!(channels.len(), 5);
        let ids: Vec<u32> = channels.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(channels.iter().all(|c| c.is_live() && c.logo().is_none()));
    }

    #[test]
    fn test_builder_sets_optional_fields() {
        let channel = Channel::new(7, "Name", "Desc", "http://x/y.m3u8", "Cat")
            .with_logo(Some("http://x/logo.png".to_string()))
            .with_live(false);
        assert_eq!(channel.logo(), Some("http://x/logo.png"));
        assert!(!channel.is_live());
    }
}
