//! Normalized card record and the remote catalog wire format
//!
//! Every source a search can draw from (the precomputed set, the disk cache,
//! the remote catalog, the local database) is converted into a [`CardRecord`]
//! at its boundary, so downstream code only ever handles one shape.

use serde::{Deserialize, Serialize};

/// Where a [`CardRecord`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardSource {
    /// Built-in result list for a well-known card family
    Precomputed,
    /// Disk cache of an earlier remote lookup
    Cache,
    /// Live remote catalog lookup
    #[default]
    Remote,
    /// Locally imported catalog (database fallback)
    Catalog,
}

/// A card as shown in search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    /// External card identifier (`api_card_id`)
    pub id: String,
    pub name: String,
    pub set_name: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub image_small: Option<String>,
    #[serde(default)]
    pub image_large: Option<String>,
    #[serde(default)]
    pub source: CardSource,
}

impl CardRecord {
    /// True when a small (thumbnail) image is available
    pub fn has_thumbnail(&self) -> bool {
        self.image_small.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Re-tag the record with the source it was just read from
    pub fn with_source(mut self, source: CardSource) -> Self {
        self.source = source;
        self
    }
}

/// Remote catalog card (`{id, name, set:{name, releaseDate}, images:{small, large}}`)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteCard {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub set: Option<RemoteSet>,
    #[serde(default)]
    pub images: Option<RemoteImages>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSet {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteImages {
    pub small: Option<String>,
    pub large: Option<String>,
}

/// One page of remote search results
#[derive(Debug, Deserialize)]
pub struct RemoteCardPage {
    #[serde(default)]
    pub data: Vec<RemoteCard>,
}

impl RemoteCard {
    /// Convert into a normalized record.
    ///
    /// Cards without an identifier cannot be priced or purchased and are dropped.
    pub fn into_record(self, source: CardSource) -> Option<CardRecord> {
        let id = match self.id {
            Some(id) if !id.is_empty() => id,
            _ => {
                log::debug!("Discarding remote card without id: {:?}", self.name);
                return None;
            }
        };
        let (set_name, release_date) = match self.set {
            Some(set) => (set.name, set.release_date),
            None => (String::new(), None),
        };
        let (image_small, image_large) = match self.images {
            Some(images) => (images.small, images.large),
            None => (None, None),
        };
        Some(CardRecord {
            id,
            name: self.name,
            set_name,
            release_date,
            image_small,
            image_large,
            source,
        })
    }
}

impl RemoteCardPage {
    /// Convert every usable card on the page
    pub fn into_records(self, source: CardSource) -> Vec<CardRecord> {
        self.data
            .into_iter()
            .filter_map(|card| card.into_record(source))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_card_converts_to_record() {
        let json = r#"{
            "id": "base1-58",
            "name": "Pikachu",
            "set": {"id": "base1", "name": "Base", "series": "Base", "releaseDate": "1999/01/09"},
            "images": {"small": "https://images.example/base1/58.png", "large": "https://images.example/base1/58_hires.png"}
        }"#;

        let card: RemoteCard = serde_json::from_str(json).unwrap();
        let record = card.into_record(CardSource::Remote).unwrap();

        assert_eq!(record.id, "base1-58");
        assert_eq!(record.name, "Pikachu");
        assert_eq!(record.set_name, "Base");
        assert_eq!(record.release_date.as_deref(), Some("1999/01/09"));
        assert!(record.has_thumbnail());
        assert_eq!(record.source, CardSource::Remote);
    }

    #[test]
    fn remote_card_without_id_is_dropped() {
        let page: RemoteCardPage = serde_json::from_str(
            r#"{"data": [{"name": "Nameless"}, {"id": "x-1", "name": "Kept"}]}"#,
        )
        .unwrap();

        let records = page.into_records(CardSource::Remote);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Kept");
        assert_eq!(records[0].set_name, "");
        assert!(!records[0].has_thumbnail());
    }

    #[test]
    fn page_without_data_is_empty() {
        let page: RemoteCardPage = serde_json::from_str("{}").unwrap();
        assert!(page.into_records(CardSource::Remote).is_empty());
    }

    #[test]
    fn record_source_defaults_when_missing() {
        let record: CardRecord =
            serde_json::from_str(r#"{"id": "a", "name": "A", "set_name": "S"}"#).unwrap();
        assert_eq!(record.source, CardSource::Remote);
        assert_eq!(record.with_source(CardSource::Cache).source, CardSource::Cache);
    }
}
