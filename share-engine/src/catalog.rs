//! Catalog seeding
//!
//! Reads inventory definitions from TOML:
//!
//! ```toml
//! [[item]]
//! name = "Charizard"
//! share_percentage = "2.5"
//! market_value = "10.00"
//! tier = "rare"
//! units = 4
//! ```
//!
//! Decimal fields are strings so no value ever passes through a float.

use crate::{
    types::{InventoryItem, Tier},
    Error, Result,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "item")]
    items: Vec<CatalogEntry>,
}

/// One catalog line; `units` identical items are created from it
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    /// Display name
    pub name: String,

    /// Ownership percentage per unit
    #[serde(with = "rust_decimal::serde::str")]
    pub share_percentage: Decimal,

    /// Market value per unit
    #[serde(with = "rust_decimal::serde::str")]
    pub market_value: Decimal,

    /// Tier label
    pub tier: String,

    /// Number of units
    #[serde(default = "default_units")]
    pub units: u32,
}

fn default_units() -> u32 {
    1
}

impl CatalogEntry {
    /// Expand into validated inventory items
    pub fn into_items(self) -> Result<Vec<InventoryItem>> {
        let tier: Tier = self.tier.parse()?;

        (0..self.units)
            .map(|_| {
                let item = InventoryItem::new(
                    self.name.clone(),
                    self.share_percentage,
                    self.market_value,
                    tier,
                );
                item.validate()?;
                Ok(item)
            })
            .collect()
    }
}

/// Parse catalog TOML into inventory items
pub fn parse_catalog(content: &str) -> Result<Vec<InventoryItem>> {
    let file: CatalogFile =
        toml::from_str(content).map_err(|e| Error::Catalog(format!("Failed to parse catalog: {}", e)))?;

    let mut items = Vec::new();
    for entry in file.items {
        items.extend(entry.into_items()?);
    }
    Ok(items)
}

/// Load catalog file into inventory items
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<InventoryItem>> {
    let content = std::fs::read_to_string(path)?;
    parse_catalog(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_catalog_expands_units() {
        let items = parse_catalog(
            r#"
            [[item]]
            name = "Charizard"
            share_percentage = "2.5"
            market_value = "10.00"
            tier = "Rare"
            units = 3

            [[item]]
            name = "Mewtwo"
            share_percentage = "1"
            market_value = "250"
            tier = "legendary"
            "#,
        )
        .unwrap();

        assert_eq!(items.len(), 4);
        assert_eq!(items[0].tier, Tier::Rare);
        assert_eq!(items[0].market_value, Decimal::new(1000, 2));
        assert_eq!(items[3].name, "Mewtwo");

        // Every unit is a distinct item
        assert_ne!(items[0].item_id, items[1].item_id);
    }

    #[test]
    fn test_unknown_tier_rejected() {
        let result = parse_catalog(
            "[[item]]\nname = \"X\"\nshare_percentage = \"1\"\nmarket_value = \"1\"\ntier = \"mythic\"\n",
        );
        assert!(matches!(result, Err(Error::Catalog(_))));
    }

    #[test]
    fn test_zero_value_rejected() {
        let result = parse_catalog(
            "[[item]]\nname = \"X\"\nshare_percentage = \"1\"\nmarket_value = \"0\"\ntier = \"common\"\n",
        );
        assert!(matches!(result, Err(Error::InvalidAmount(_))));
    }

    #[test]
    fn test_empty_catalog() {
        assert!(parse_catalog("").unwrap().is_empty());
    }

    #[test]
    fn test_shipped_files_parse() {
        let items = parse_catalog(include_str!("../config/catalog.toml")).unwrap();
        assert_eq!(items.len(), 40);
        assert_eq!(items.iter().filter(|i| i.tier == Tier::Legendary).count(), 1);

        let config = crate::Config::from_toml(include_str!("../config/share-engine.toml")).unwrap();
        assert_eq!(config.allocation.max_claim_attempts, 8);
        assert!(config.catalog_path.is_some());
    }
}
