// VirtualPath maps root-relative repository locations onto the physical
// backend. Every repository root is laid out as follows:
//
//	<root>
//	├── .temp
//	│   └── <mirror of the live tree, in-flight writes>
//	├── .trash
//	│   └── <mirror of the live tree, soft-deleted content>
//	└── <live tree>
//	    └── a/b/1.0
//	        ├── b-1.0.jar
//	        └── b-1.0.jar.sha1
//
// A write lands in `.temp/<path>.<uuid>`, private to that one write, and
// becomes visible at `<path>` through one rename. A soft delete moves `<path>`
// to `.trash/<path>`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use uuid::Uuid;

use crate::domain::{Coordinates, PathAttributes, Repository};
use crate::error::PathConstructionError;

pub const TEMP_DIR: &str = ".temp";
pub const TRASH_DIR: &str = ".trash";

/// Backend independent identity of a repository location, used as lock and
/// cache key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalUri(String);

impl CanonicalUri {
    pub fn new(storage_id: &str, repository_id: &str, relative: &str) -> Self {
        CanonicalUri(format!("depot://{storage_id}/{repository_id}/{relative}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A location inside one repository. The target is always lexically inside
/// the repository root.
#[derive(Clone)]
pub struct VirtualPath {
    repository: Arc<Repository>,
    components: Vec<String>,
    attributes: OnceLock<PathAttributes>,
}

impl VirtualPath {
    pub fn root(repository: Arc<Repository>) -> Self {
        VirtualPath {
            repository,
            components: Vec::new(),
            attributes: OnceLock::new(),
        }
    }

    /// Shorthand for `VirtualPath::root(repository).resolve(relative)`.
    pub fn new(repository: Arc<Repository>, relative: &str) -> Result<Self, PathConstructionError> {
        Self::root(repository).resolve(relative)
    }

    fn with_components(&self, components: Vec<String>) -> Self {
        VirtualPath {
            repository: self.repository.clone(),
            components,
            attributes: OnceLock::new(),
        }
    }

    pub fn resolve(&self, relative: &str) -> Result<VirtualPath, PathConstructionError> {
        let components = normalize(&self.repository, self.components.clone(), relative)?;
        Ok(self.with_components(components))
    }

    pub fn resolve_sibling(&self, relative: &str) -> Result<VirtualPath, PathConstructionError> {
        let Some((_, parent)) = self.components.split_last() else {
            return Err(PathConstructionError::ExceedsRoot {
                root: self.repository.root.display().to_string(),
                path: format!("../{relative}"),
            });
        };
        let components = normalize(&self.repository, parent.to_vec(), relative)?;
        Ok(self.with_components(components))
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Root-relative path with `/` separators, empty for the root itself.
    pub fn relative(&self) -> String {
        self.components.join("/")
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<VirtualPath> {
        self.components
            .split_last()
            .map(|(_, parent)| self.with_components(parent.to_vec()))
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Location on the physical backend.
    pub fn physical(&self) -> PathBuf {
        let mut path = self.repository.root.clone();
        path.extend(self.components.iter());
        path
    }

    pub fn canonical_uri(&self) -> CanonicalUri {
        CanonicalUri::new(
            &self.repository.storage_id,
            &self.repository.id,
            &self.relative(),
        )
    }

    pub fn is_in_temp(&self) -> bool {
        self.components.first().is_some_and(|c| c == TEMP_DIR)
    }

    pub fn is_in_trash(&self) -> bool {
        self.components.first().is_some_and(|c| c == TRASH_DIR)
    }

    pub fn is_hidden(&self) -> bool {
        self.is_in_temp() || self.is_in_trash()
    }

    fn mirrored(&self, hidden: &str) -> VirtualPath {
        let mut components = Vec::with_capacity(self.components.len() + 1);
        components.push(hidden.to_string());
        let live = if self.is_hidden() {
            &self.components[1..]
        } else {
            &self.components[..]
        };
        components.extend(live.iter().cloned());
        self.with_components(components)
    }

    /// Live location a hidden path mirrors; the path itself when not hidden.
    pub fn live(&self) -> VirtualPath {
        if self.is_hidden() {
            self.with_components(self.components[1..].to_vec())
        } else {
            self.clone()
        }
    }

    /// The `.temp` mirror of this path. Staged writes for a file live next
    /// to it, see [`VirtualPath::staging_path`].
    pub fn temp_path(&self) -> TempPath {
        TempPath {
            path: self.mirrored(TEMP_DIR),
            target: self.live(),
        }
    }

    /// A fresh staging file for one write to this path. Two writes never
    /// share a staging file, even for the same target.
    pub fn staging_path(&self) -> TempPath {
        let mut path = self.mirrored(TEMP_DIR);
        if let Some(name) = path.components.last_mut() {
            *name = format!("{name}.{}", Uuid::new_v4());
        }
        TempPath {
            path,
            target: self.live(),
        }
    }

    /// Whether `name` is a staging file name produced for this path.
    pub fn is_staging_name(&self, name: &str) -> bool {
        self.file_name()
            .and_then(|own| name.strip_prefix(own))
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|id| Uuid::parse_str(id).is_ok())
    }

    pub fn trash_path(&self) -> TrashPath {
        TrashPath {
            path: self.mirrored(TRASH_DIR),
            origin: self.live(),
        }
    }

    pub fn temp_root(&self) -> VirtualPath {
        self.with_components(vec![TEMP_DIR.to_string()])
    }

    pub fn trash_root(&self) -> VirtualPath {
        self.with_components(vec![TRASH_DIR.to_string()])
    }

    /// Checksum siblings for the repository's digest algorithms, e.g.
    /// `foo.jar.sha1`. Empty for the root and for checksum files themselves.
    pub fn checksum_siblings(&self) -> Vec<VirtualPath> {
        let Some(name) = self.file_name() else {
            return Vec::new();
        };
        if self.is_checksum() {
            return Vec::new();
        }
        let mut parent = self.components.clone();
        parent.pop();
        self.repository
            .policy
            .digest_algorithms
            .iter()
            .map(|algo| {
                let mut components = parent.clone();
                components.push(format!("{name}.{}", algo.extension()));
                self.with_components(components)
            })
            .collect()
    }

    pub fn attributes(&self) -> &PathAttributes {
        self.attributes
            .get_or_init(|| self.repository.layout.describe(&self.relative()))
    }

    pub fn is_artifact(&self) -> bool {
        self.attributes().is_artifact
    }

    pub fn is_metadata(&self) -> bool {
        self.attributes().is_metadata
    }

    pub fn is_checksum(&self) -> bool {
        self.attributes().is_checksum
    }

    pub fn coordinates(&self) -> Option<&Coordinates> {
        self.attributes().coordinates.as_ref()
    }

    /// Resource path to request from the remote repository.
    pub fn resource_uri(&self) -> String {
        self.attributes()
            .resource_uri
            .clone()
            .unwrap_or_else(|| self.relative())
    }
}

fn normalize(
    repository: &Repository,
    mut components: Vec<String>,
    relative: &str,
) -> Result<Vec<String>, PathConstructionError> {
    let looks_absolute =
        relative.starts_with('/') || relative.contains('\\') || has_drive_prefix(relative);
    if looks_absolute {
        return Err(PathConstructionError::NotRelativized(relative.to_string()));
    }

    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if components.pop().is_none() {
                    return Err(PathConstructionError::ExceedsRoot {
                        root: repository.root.display().to_string(),
                        path: relative.to_string(),
                    });
                }
            }
            name => components.push(name.to_string()),
        }
    }
    Ok(components)
}

/// `C:` or `C:/...`; a colon elsewhere is an ordinary name character.
fn has_drive_prefix(relative: &str) -> bool {
    match relative.as_bytes() {
        [drive, b':'] => drive.is_ascii_alphabetic(),
        [drive, b':', b'/', ..] => drive.is_ascii_alphabetic(),
        _ => false,
    }
}

impl PartialEq for VirtualPath {
    fn eq(&self, other: &Self) -> bool {
        self.repository.storage_id == other.repository.storage_id
            && self.repository.id == other.repository.id
            && self.components == other.components
    }
}

impl Eq for VirtualPath {}

impl Hash for VirtualPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.repository.storage_id.hash(state);
        self.repository.id.hash(state);
        self.components.hash(state);
    }
}

impl fmt::Debug for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPath({})", self.canonical_uri())
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}", self.repository.full_name(), self.relative())
    }
}

/// Staging location under `.temp` for a write to `target`.
#[derive(Clone, Debug)]
pub struct TempPath {
    path: VirtualPath,
    target: VirtualPath,
}

impl TempPath {
    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    pub fn target(&self) -> &VirtualPath {
        &self.target
    }
}

/// Location under `.trash` holding the soft-deleted copy of `origin`.
#[derive(Clone, Debug)]
pub struct TrashPath {
    path: VirtualPath,
    origin: VirtualPath,
}

impl TrashPath {
    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    pub fn origin(&self) -> &VirtualPath {
        &self.origin
    }
}
