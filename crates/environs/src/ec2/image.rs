//! Machine image selection contract

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What kind of image an instance should boot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageConstraint {
    /// Region the image must be available in
    pub region: String,
    /// OS series, e.g. `precise`
    pub series: String,
    /// CPU architecture, e.g. `amd64`
    pub arch: String,
}

impl fmt::Display for ImageConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} in {}", self.series, self.arch, self.region)
    }
}

/// A selected image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Provider image id
    pub image_id: String,
}

/// Image selection failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// Nothing matches the constraint
    #[error("no image matches {constraint}")]
    NoMatch {
        /// The unmatched constraint
        constraint: ImageConstraint,
    },

    /// The image index could not be consulted
    #[error("image lookup failed: {reason}")]
    Lookup {
        /// Why
        reason: String,
    },
}

/// Chooses the machine image for new instances
#[async_trait]
pub trait ImageSelector: Send + Sync {
    /// Find an image satisfying `constraint`
    async fn find_image(&self, constraint: &ImageConstraint) -> Result<ImageSpec, ImageError>;
}
