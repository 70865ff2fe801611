//! Merges per-unit dependency manifests, each keyed to its own local
//! string pool, into a single project-wide view keyed to one global pool.

use std::collections::HashMap;

use crate::manifest::DependencyManifest;
use crate::string_pool::{StringId, StringPool};
use crate::unit::UnitId;

/// One unit's manifest, translated into the global pool, plus its
/// derived [`UnitId`].
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    pub unit_id: UnitId,
    pub manifest: DependencyManifest,
}

/// The project-wide view C4 builds its graph from.
///
/// `pool` is the single global [`StringPool`] every ID in every
/// [`ParsedUnit`]'s manifest is drawn from.
#[derive(Debug, Default)]
pub struct ParsedDependencies {
    pool: StringPool,
    by_path_id: HashMap<StringId, ParsedUnit>,
}

impl ParsedDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> &StringPool {
        &self.pool
    }

    /// Insert a unit's manifest, which was decoded against its own local
    /// pool. `local_pool` supplies the strings behind `manifest`'s local
    /// IDs; they are re-interned into the global pool and the manifest's
    /// ID fields are rewritten in place onto the global IDs.
    ///
    /// # Panics
    /// Panics if a manifest for the same `unit_path_id` (after remapping)
    /// has already been inserted -- this is a logic error in the caller,
    /// not a recoverable condition (spec §4.3).
    pub fn insert(&mut self, unit_id: UnitId, manifest: DependencyManifest, local_pool: &StringPool) {
        let remapped = self.remap_manifest(&manifest, local_pool);

        if self.by_path_id.contains_key(&remapped.package_file_path_id) {
            panic!(
                "duplicate manifest insertion for unit path id {}",
                remapped.package_file_path_id.get()
            );
        }

        self.by_path_id.insert(remapped.package_file_path_id, ParsedUnit { unit_id, manifest: remapped });
    }

    fn remap_manifest(&mut self, manifest: &DependencyManifest, local_pool: &StringPool) -> DependencyManifest {
        let mut remap_one = |id: StringId| -> StringId {
            let s = local_pool.get(id).expect("manifest ID must exist in its own local pool");
            self.pool.add(s)
        };

        let package_file_path_id = remap_one(manifest.package_file_path_id);
        let declaration_dependencies = manifest.declaration_dependencies.iter().map(|&id| remap_one(id)).collect();
        let definition_dependencies = manifest.definition_dependencies.iter().map(|&id| remap_one(id)).collect();

        DependencyManifest {
            package_file_path_id,
            is_public: manifest.is_public,
            is_body_only: manifest.is_body_only,
            declaration_dependencies,
            definition_dependencies,
        }
    }

    pub fn get(&self, path_id: StringId) -> Option<&ParsedUnit> {
        self.by_path_id.get(&path_id)
    }

    pub fn len(&self) -> usize {
        self.by_path_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path_id.is_empty()
    }

    pub fn units(&self) -> impl Iterator<Item = &ParsedUnit> {
        self.by_path_id.values()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn manifest_for(local: &mut StringPool, me: &str, deps: &[&str]) -> DependencyManifest {
        let me_id = local.add(me);
        let mut manifest = DependencyManifest::new(me_id, true, false);
        for d in deps {
            manifest.declaration_dependencies.insert(local.add(d));
        }
        manifest
    }

    #[test]
    fn remaps_local_ids_into_shared_global_pool() {
        let mut parsed = ParsedDependencies::new();

        let mut local_a = StringPool::new();
        let manifest_a = manifest_for(&mut local_a, "P1/A", &["P1/B"]);
        parsed.insert(UnitId::from_relative_path(Path::new("P1/A.cppl")), manifest_a, &local_a);

        let mut local_b = StringPool::new();
        let manifest_b = manifest_for(&mut local_b, "P1/B", &[]);
        parsed.insert(UnitId::from_relative_path(Path::new("P1/B.cppl")), manifest_b, &local_b);

        assert_eq!(parsed.len(), 2);
        let a_path_id = parsed.pool().find("P1/A").unwrap();
        let a = parsed.get(a_path_id).unwrap();
        let dep_id = *a.manifest.declaration_dependencies.iter().next().unwrap();
        assert_eq!(parsed.pool().get(dep_id), Some("P1/B"));
    }

    #[test]
    #[should_panic(expected = "duplicate manifest insertion")]
    fn duplicate_insertion_panics() {
        let mut parsed = ParsedDependencies::new();
        let mut local = StringPool::new();
        let manifest = manifest_for(&mut local, "P1/A", &[]);
        parsed.insert(UnitId::from_relative_path(Path::new("P1/A.cppl")), manifest.clone(), &local);
        parsed.insert(UnitId::from_relative_path(Path::new("P1/A.cppl")), manifest, &local);
    }
}
