use std::collections::BTreeMap;

use crate::storage::checksum::DigestAlgorithm;
use crate::storage::paths::{TEMP_DIR, TRASH_DIR};

pub type Coordinates = BTreeMap<String, String>;

/// What the repository layout knows about a single path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathAttributes {
    pub is_artifact: bool,
    pub is_metadata: bool,
    pub is_checksum: bool,
    pub coordinates: Option<Coordinates>,
    /// Resource path on the remote when it differs from the local path.
    pub resource_uri: Option<String>,
}

/// Package-format knowledge (Maven, NuGet, ...) lives behind this trait.
///
/// `describe` receives the root-relative, `/`-separated path and is called at
/// most once per [`VirtualPath`](crate::storage::paths::VirtualPath) instance.
pub trait LayoutProvider: Send + Sync {
    fn describe(&self, relative: &str) -> PathAttributes;
}

/// Format-neutral layout: checksum siblings are recognised by their digest
/// extension, metadata by exact file name, everything else is an artifact.
#[derive(Clone, Debug)]
pub struct GenericLayout {
    checksum_extensions: Vec<String>,
    metadata_names: Vec<String>,
}

impl GenericLayout {
    pub fn new() -> Self {
        GenericLayout {
            checksum_extensions: DigestAlgorithm::ALL
                .iter()
                .map(|algo| algo.extension().to_string())
                .collect(),
            metadata_names: Vec::new(),
        }
    }

    pub fn with_metadata_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata_names = names.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for GenericLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutProvider for GenericLayout {
    fn describe(&self, relative: &str) -> PathAttributes {
        let mut components = relative.split('/').filter(|c| !c.is_empty());
        let first = components.clone().next();
        let Some(file_name) = components.next_back() else {
            return PathAttributes::default();
        };
        if matches!(first, Some(TEMP_DIR) | Some(TRASH_DIR)) {
            return PathAttributes::default();
        }

        let is_checksum = file_name
            .rsplit_once('.')
            .map(|(_, ext)| self.checksum_extensions.iter().any(|e| e == ext))
            .unwrap_or(false);
        let is_metadata = !is_checksum && self.metadata_names.iter().any(|n| n == file_name);

        PathAttributes {
            is_artifact: !is_checksum && !is_metadata,
            is_metadata,
            is_checksum,
            coordinates: None,
            resource_uri: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_file_name() {
        let layout = GenericLayout::new().with_metadata_names(["maven-metadata.xml"]);

        let jar = layout.describe("a/b/1.0/b-1.0.jar");
        assert!(jar.is_artifact);
        assert!(!jar.is_checksum);

        let sha1 = layout.describe("a/b/1.0/b-1.0.jar.sha1");
        assert!(sha1.is_checksum);
        assert!(!sha1.is_artifact);

        let meta = layout.describe("a/b/maven-metadata.xml");
        assert!(meta.is_metadata);
        assert!(!meta.is_artifact);
    }

    #[test]
    fn root_and_hidden_paths_are_nothing() {
        let layout = GenericLayout::new();
        assert_eq!(layout.describe(""), PathAttributes::default());
        assert_eq!(layout.describe(".trash/a/b.jar"), PathAttributes::default());
    }
}
