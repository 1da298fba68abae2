//! Sources of ambient observations.
//!
//! The desktop app grabbed the screen; here a source is anything that can hand
//! back the image the user is currently looking at. The shipped source watches
//! a folder that a screenshot tool drops captures into.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use image::DynamicImage;
use tracing::{debug, warn};

use crate::error::{ClarityError, Result};
use crate::images::list_images;

/// One captured frame
#[derive(Debug, Clone)]
pub struct Observation {
    pub image: DynamicImage,
    pub label: String,
}

#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// The current frame, or `None` when there is nothing new to look at.
    async fn capture(&self) -> Result<Option<Observation>>;
}

/// Most recently modified image in a folder. A file already observed is not
/// returned again until it changes.
pub struct LatestImageSource {
    dir: PathBuf,
    last_seen: Mutex<Option<(PathBuf, SystemTime)>>,
}

impl LatestImageSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_seen: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn newest(&self) -> Result<Option<(PathBuf, SystemTime)>> {
        if !self.dir.exists() {
            return Ok(None);
        }
        let mut newest: Option<(PathBuf, SystemTime)> = None;
        for path in list_images(&self.dir)? {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .map_err(|e| ClarityError::local_io(&path, e))?;
            if newest.as_ref().map_or(true, |(_, best)| modified > *best) {
                newest = Some((path, modified));
            }
        }
        Ok(newest)
    }
}

#[async_trait]
impl ObservationSource for LatestImageSource {
    async fn capture(&self) -> Result<Option<Observation>> {
        let Some((path, modified)) = self.newest()? else {
            debug!(dir = %self.dir.display(), "no images to observe");
            return Ok(None);
        };

        {
            let mut last_seen = self
                .last_seen
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if last_seen.as_ref() == Some(&(path.clone(), modified)) {
                debug!(path = %path.display(), "latest image unchanged");
                return Ok(None);
            }
            *last_seen = Some((path.clone(), modified));
        }

        let blob = tokio::fs::read(&path)
            .await
            .map_err(|e| ClarityError::local_io(&path, e))?;
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        match image::load_from_memory(&blob) {
            Ok(image) => Ok(Some(Observation { image, label })),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "observation is not a readable image");
                Ok(None)
            }
        }
    }
}
