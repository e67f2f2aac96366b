use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Kind of gallery node.
///
/// The kind is descriptive only; any kind may be nested under any other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GalleryType {
    /// General-purpose collection (the default).
    #[default]
    Collection,
    /// Ordered series of related images.
    Series,
    /// Photo album.
    Album,
    /// Working set for a project.
    Project,
}

impl GalleryType {
    /// Lowercase name used in serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Series => "series",
            Self::Album => "album",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for GalleryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GalleryType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "collection" => Ok(Self::Collection),
            "series" => Ok(Self::Series),
            "album" => Ok(Self::Album),
            "project" => Ok(Self::Project),
            other => Err(TypeError::UnknownGalleryType(other.to_string())),
        }
    }
}
