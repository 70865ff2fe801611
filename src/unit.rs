//! Unit identifiers: the logical name of a source file, derived from its
//! project-relative path.

use std::path::{Path, PathBuf};

/// The logical name of a unit, e.g. `P1::A` for `P1/A.cppl`.
///
/// Derived from a project-relative path by splitting on the path separator
/// and stripping the trailing extension of the final component; components
/// are then joined with `::` when rendered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId {
    components: Vec<String>,
}

impl UnitId {
    /// Build a `UnitId` from a path already relative to the project root.
    pub fn from_relative_path(relative: &Path) -> Self {
        let mut components: Vec<String> =
            relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();

        if let Some(last) = components.last_mut() {
            *last = strip_extension(last);
        }

        Self { components }
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Render as `A::B::C` for human-readable diagnostics.
    pub fn render(&self) -> String {
        self.components.join("::")
    }

    /// Render as `A/B/C`, matching the slash-joined, extension-less form
    /// manifests intern path ids under (spec §4.2/§4.3).
    pub fn path_key(&self) -> String {
        self.components.join("/")
    }

    /// Reconstruct the relative path this unit was derived from, given the
    /// extension to re-attach to the final component.
    pub fn to_relative_path(&self, extension: &str) -> PathBuf {
        let mut path = PathBuf::new();
        let (last, rest) = self.components.split_last().expect("UnitId always has >= 1 component");
        for c in rest {
            path.push(c);
        }
        path.push(format!("{last}.{extension}"));
        path
    }
}

fn strip_extension(filename: &str) -> String {
    match filename.rfind('.') {
        Some(0) | None => filename.to_string(),
        Some(i) => filename[..i].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_strips_extension() {
        let id = UnitId::from_relative_path(Path::new("P1/A.cppl"));
        assert_eq!(id.components(), &["P1", "A"]);
        assert_eq!(id.render(), "P1::A");
    }

    #[test]
    fn single_component() {
        let id = UnitId::from_relative_path(Path::new("main.cpp"));
        assert_eq!(id.render(), "main");
    }

    #[test]
    fn dotfile_has_no_extension_stripped() {
        let id = UnitId::from_relative_path(Path::new(".hidden"));
        assert_eq!(id.render(), ".hidden");
    }

    #[test]
    fn round_trips_to_relative_path() {
        let id = UnitId::from_relative_path(Path::new("P1/Sub/A.cppl"));
        assert_eq!(id.to_relative_path("ldeps"), PathBuf::from("P1/Sub/A.ldeps"));
    }
}
