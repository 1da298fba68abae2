//! The dossier: an ordered, user-editable collection of evidence items.
//!
//! Insertion order is significant because it becomes payload order. Rejected
//! mutations (duplicate image label, blank note, bad index) are reported as
//! outcomes and logged, never raised as errors.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::error::{ClarityError, Result};

/// Characters of a note kept in its label before truncation
const NOTE_PREVIEW_CHARS: usize = 20;

/// One piece of evidence in the dossier
#[derive(Debug, Clone)]
pub enum EvidenceItem {
    Image {
        pixels: Arc<DynamicImage>,
        label: String,
    },
    Text {
        content: String,
        label: String,
    },
}

impl EvidenceItem {
    pub fn label(&self) -> &str {
        match self {
            EvidenceItem::Image { label, .. } | EvidenceItem::Text { label, .. } => label,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, EvidenceItem::Image { .. })
    }

    /// Build a text item with its derived preview label
    pub fn note(content: impl Into<String>) -> Self {
        let content = content.into();
        let label = note_label(&content);
        EvidenceItem::Text { content, label }
    }
}

/// Result of an insertion attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added { index: usize },
    /// An image with the same label is already in the dossier
    DuplicateLabel { label: String },
    /// The blob could not be decoded as an image
    Unreadable { label: String, reason: String },
    /// Blank note
    Ignored,
}

impl AddOutcome {
    pub fn is_added(&self) -> bool {
        matches!(self, AddOutcome::Added { .. })
    }

    /// Acknowledgement or warning suitable for showing to the user. Item
    /// numbers are 1-based.
    pub fn message(&self) -> String {
        match self {
            AddOutcome::Added { index } => format!("Added item #{}", index + 1),
            AddOutcome::DuplicateLabel { label } => format!("Image '{label}' was already added."),
            AddOutcome::Unreadable { label, reason } => {
                format!("Could not read '{label}' as an image: {reason}")
            }
            AddOutcome::Ignored => "Empty note ignored.".to_string(),
        }
    }
}

/// `"Note: "` plus the first 20 characters, with `...` when truncated.
pub fn note_label(content: &str) -> String {
    let mut chars = content.chars();
    let preview: String = chars.by_ref().take(NOTE_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("Note: {preview}...")
    } else {
        format!("Note: {preview}")
    }
}

#[derive(Debug, Default)]
pub struct EvidenceStore {
    items: Vec<EvidenceItem>,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Decode `blob` and append it as an image labeled `label`.
    pub fn add_image(&mut self, blob: &[u8], label: impl Into<String>) -> AddOutcome {
        let label = label.into();
        if self.has_image_label(&label) {
            return self.reject_duplicate(label);
        }

        match image::load_from_memory(blob) {
            Ok(decoded) => self.push_image(decoded, label),
            Err(err) => {
                warn!(label = %label, error = %err, "evidence image could not be decoded");
                AddOutcome::Unreadable {
                    label,
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Read `path` and add it labeled with its file name.
    pub fn add_image_file(&mut self, path: &Path) -> Result<AddOutcome> {
        let blob = fs::read(path).map_err(|e| ClarityError::local_io(path, e))?;
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(self.add_image(&blob, label))
    }

    /// Append an already decoded image (screen captures, tests).
    pub fn add_decoded_image(&mut self, image: DynamicImage, label: impl Into<String>) -> AddOutcome {
        let label = label.into();
        if self.has_image_label(&label) {
            return self.reject_duplicate(label);
        }
        self.push_image(image, label)
    }

    pub fn add_text(&mut self, content: &str) -> AddOutcome {
        if content.trim().is_empty() {
            debug!("blank note ignored");
            return AddOutcome::Ignored;
        }

        let item = EvidenceItem::note(content);
        info!(label = %item.label(), "note added to dossier");
        self.items.push(item);
        AddOutcome::Added {
            index: self.items.len() - 1,
        }
    }

    /// Remove the item at `index`. Out-of-range indices are a silent no-op.
    pub fn remove(&mut self, index: usize) -> Option<EvidenceItem> {
        if index >= self.items.len() {
            debug!(index, len = self.items.len(), "remove ignored: index out of range");
            return None;
        }
        let removed = self.items.remove(index);
        info!(label = %removed.label(), "removed from dossier");
        Some(removed)
    }

    pub fn clear(&mut self) {
        let dropped = self.items.len();
        self.items.clear();
        info!(dropped, "dossier cleared");
    }

    /// Stable copy for payload assembly; later edits do not affect it.
    pub fn snapshot(&self) -> EvidenceSnapshot {
        EvidenceSnapshot {
            items: Arc::from(self.items.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items.iter()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.items.iter().map(EvidenceItem::label).collect()
    }

    fn has_image_label(&self, label: &str) -> bool {
        self.items
            .iter()
            .any(|item| item.is_image() && item.label() == label)
    }

    fn reject_duplicate(&self, label: String) -> AddOutcome {
        warn!(label = %label, "image already in dossier, skipping");
        AddOutcome::DuplicateLabel { label }
    }

    fn push_image(&mut self, image: DynamicImage, label: String) -> AddOutcome {
        info!(
            label = %label,
            width = image.width(),
            height = image.height(),
            "image added to dossier"
        );
        self.items.push(EvidenceItem::Image {
            pixels: Arc::new(image),
            label,
        });
        AddOutcome::Added {
            index: self.items.len() - 1,
        }
    }
}

/// Immutable, cheaply clonable view of the dossier at one point in time
#[derive(Debug, Clone)]
pub struct EvidenceSnapshot {
    items: Arc<[EvidenceItem]>,
}

impl Default for EvidenceSnapshot {
    fn default() -> Self {
        Self::from(Vec::new())
    }
}

impl EvidenceSnapshot {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items.iter()
    }

    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }
}

impl From<Vec<EvidenceItem>> for EvidenceSnapshot {
    fn from(items: Vec<EvidenceItem>) -> Self {
        Self {
            items: Arc::from(items),
        }
    }
}
