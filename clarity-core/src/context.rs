use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::{ClarityError, Result};

/// Business background for the whole session, loaded wholesale from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainContext {
    content: String,
    source_name: String,
}

impl DomainContext {
    pub fn new(source_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source_name: source_name.into(),
        }
    }

    /// Read `path` as text. Invalid UTF-8 is replaced rather than rejected.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| ClarityError::local_io(path, e))?;
        let content = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), "domain context is not valid UTF-8, decoding lossily");
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }
        };

        let source_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        info!(source = %source_name, chars = content.chars().count(), "domain context loaded");
        Ok(Self {
            content,
            source_name,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// File name the context was loaded from, for display
    pub fn file_name(&self) -> &str {
        &self.source_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_file_and_remembers_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims-portal.md");
        fs::write(&path, "# Claims\nPolicy holders upload receipts.").unwrap();

        let context = DomainContext::load(&path).unwrap();
        assert_eq!(context.file_name(), "claims-portal.md");
        assert!(context.content().contains("upload receipts"));
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.txt");
        fs::write(&path, [b'o', b'k', 0xff, b'!']).unwrap();

        let context = DomainContext::load(&path).unwrap();
        assert_eq!(context.content(), "ok\u{fffd}!");
    }

    #[test]
    fn missing_file_is_local_io_error() {
        let err = DomainContext::load(Path::new("/definitely/not/here.md")).unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::LocalIoError);
    }
}
