//! Category table mapping detector class ids to labels.
//!
use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One entry of the category table.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// Immutable lookup from class id to category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryIndex {
    by_id: BTreeMap<i64, Category>,
}

impl CategoryIndex {
    /// Build an index, rejecting duplicate ids.
    pub fn new(categories: impl IntoIterator<Item = Category>) -> Result<Self, ConfigError> {
        let mut by_id = BTreeMap::new();
        for category in categories {
            let id = category.id;
            if by_id.insert(id, category).is_some() {
                return Err(ConfigError::DuplicateId(id));
            }
        }
        Ok(Self { by_id })
    }

    /// The three classes of the face mask model.
    pub fn face_masks() -> Self {
        let by_id = [(1, "with_mask"), (2, "without_mask"), (3, "mask_weared_incorrect")]
            .into_iter()
            .map(|(id, name)| {
                (
                    id,
                    Category {
                        id,
                        name: name.to_owned(),
                    },
                )
            })
            .collect();
        Self { by_id }
    }

    /// Load a JSON array of `{"id": .., "name": ..}` objects.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let categories: Vec<Category> =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_owned(),
                source,
            })?;
        Self::new(categories)
    }

    /// Look up the label of a class id.
    pub fn label(&self, class_id: i64) -> Result<&str, ConfigError> {
        self.by_id
            .get(&class_id)
            .map(|category| category.name.as_str())
            .ok_or(ConfigError::UnknownClass(class_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for CategoryIndex {
    fn default() -> Self {
        Self::face_masks()
    }
}
