//! Traversal of the spatial containment tree shared by both export passes.
//!
//! The measuring and emitting passes must see entities in the same order and
//! apply the same filtering, so there is exactly one walk, parameterized by a
//! [`SceneVisitor`].

use std::collections::{HashMap, HashSet};

use rootcause::Report;
use tracing::{debug, warn};

use crate::error::{ExportError, ExportResult};
use crate::models::{Entity, EntityId, ModelStore};

/// Name of the root node carrying the centering translation.
pub const TRANSLATION_PIVOT: &str = "TranslationPivot";
/// Name of the outermost root node carrying the Z-up to Y-up rotation.
pub const ROTATION_PIVOT: &str = "RotationPivot";

/// Which part of the hierarchy contributes geometry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExportMode {
    #[default]
    Full,
    /// Only subtrees whose resolved name (or type group name) is in `allow`.
    /// The rest of the hierarchy is still walked and its group nodes kept.
    Part { allow: HashSet<String> },
    /// The whole hierarchy as nodes only: no meshes and no binary body.
    Metadata,
}

impl ExportMode {
    pub fn part<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExportMode::Part {
            allow: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a host-supplied, comma separated list of part names.
    ///
    /// Underscores stand for spaces. An empty list, or one naming a root
    /// pivot, selects the whole model.
    pub fn from_part_list(list: &str) -> Self {
        let allow: HashSet<String> = list
            .split(',')
            .map(|part| part.trim().replace('_', " "))
            .filter(|part| !part.is_empty())
            .collect();
        if allow.is_empty() || allow.contains(TRANSLATION_PIVOT) || allow.contains(ROTATION_PIVOT) {
            return ExportMode::Full;
        }
        ExportMode::Part { allow }
    }

    pub fn admits(&self, name: &str) -> bool {
        match self {
            ExportMode::Full | ExportMode::Metadata => true,
            ExportMode::Part { allow } => allow.contains(name),
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, ExportMode::Full)
    }

    pub fn is_metadata(&self) -> bool {
        matches!(self, ExportMode::Metadata)
    }
}

/// Callbacks of one pass over the hierarchy.
pub trait SceneVisitor {
    /// Handle to a group created by this visitor.
    type Group: Copy;

    /// Create a named group below `parent`; site groups have no parent.
    fn group(&mut self, parent: Option<Self::Group>, name: &str) -> Self::Group;

    /// An admitted entity whose geometry (if any) belongs below `parent`.
    fn entity(
        &mut self,
        parent: Self::Group,
        id: EntityId,
        entity: &Entity,
        name: &str,
    ) -> ExportResult<()>;
}

/// Assigns `Unknown<N>` to unnamed entities from one counter per traversal.
#[derive(Debug)]
pub struct NameResolver {
    next: usize,
}

impl NameResolver {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn resolve(&mut self, entity: &Entity) -> String {
        match entity.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                let name = format!("Unknown{}", self.next);
                self.next += 1;
                name
            }
        }
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk every site of `store`, reporting groups and admitted entities to `visitor`.
pub fn walk<S, V>(store: &S, mode: &ExportMode, visitor: &mut V) -> ExportResult<()>
where
    S: ModelStore + ?Sized,
    V: SceneVisitor,
{
    let mut walker = Walker {
        store,
        mode,
        visitor,
        names: NameResolver::new(),
        visited: HashSet::new(),
    };
    for &site in store.sites() {
        walker.site(site)?;
    }
    Ok(())
}

struct Walker<'a, S: ?Sized, V> {
    store: &'a S,
    mode: &'a ExportMode,
    visitor: &'a mut V,
    names: NameResolver,
    visited: HashSet<EntityId>,
}

type TypeGroups<G> = HashMap<String, G>;

impl<'a, S, V> Walker<'a, S, V>
where
    S: ModelStore + ?Sized,
    V: SceneVisitor,
{
    fn lookup(&self, id: EntityId) -> ExportResult<&'a Entity> {
        let store = self.store;
        store
            .entity(id)
            .ok_or_else(|| Report::new(ExportError::MissingEntity(id)))
    }

    /// Marks `id` visited. Relation cycles and shared children are only walked once.
    fn enter(&mut self, id: EntityId) -> bool {
        if self.visited.insert(id) {
            return true;
        }
        warn!(entity = %id, "entity reached more than once in the hierarchy, skipping");
        false
    }

    fn site(&mut self, id: EntityId) -> ExportResult<()> {
        if !self.enter(id) {
            return Ok(());
        }
        let entity = self.lookup(id)?;
        let name = self.names.resolve(entity);
        let admitted = self.mode.admits(&name);
        let group = self.visitor.group(None, &name);
        if admitted {
            self.visitor.entity(group, id, entity, &name)?;
        }
        self.spatial_contents(id, group, admitted)
    }

    fn spatial(&mut self, id: EntityId, parent: V::Group, parent_admitted: bool) -> ExportResult<()> {
        if !self.enter(id) {
            return Ok(());
        }
        let entity = self.lookup(id)?;
        let name = self.names.resolve(entity);
        let admitted = parent_admitted || self.mode.admits(&name);
        let group = self.visitor.group(Some(parent), &name);
        if admitted {
            self.visitor.entity(group, id, entity, &name)?;
        }
        self.spatial_contents(id, group, admitted)
    }

    /// Contained products first, then decomposition children.
    fn spatial_contents(&mut self, id: EntityId, group: V::Group, admitted: bool) -> ExportResult<()> {
        let store = self.store;
        let mut type_groups = TypeGroups::new();
        for &product in store.contained_elements(id) {
            self.product(product, group, &mut type_groups, admitted)?;
        }
        self.children(id, group, &mut type_groups, admitted)
    }

    fn children(
        &mut self,
        id: EntityId,
        group: V::Group,
        type_groups: &mut TypeGroups<V::Group>,
        admitted: bool,
    ) -> ExportResult<()> {
        let store = self.store;
        for &child in store.decomposed_by(id) {
            if self.lookup(child)?.kind.is_spatial() {
                self.spatial(child, group, admitted)?;
            } else {
                self.product(child, group, type_groups, admitted)?;
            }
        }
        Ok(())
    }

    fn product(
        &mut self,
        id: EntityId,
        parent: V::Group,
        type_groups: &mut TypeGroups<V::Group>,
        parent_admitted: bool,
    ) -> ExportResult<()> {
        if !self.enter(id) {
            return Ok(());
        }
        let store = self.store;
        let entity = self.lookup(id)?;
        let name = self.names.resolve(entity);
        let type_group_name = format!("{} Group", entity.type_name);
        let admitted =
            parent_admitted || self.mode.admits(&name) || self.mode.admits(&type_group_name);

        let type_group = match type_groups.get(&type_group_name) {
            Some(&group) => group,
            None => {
                debug!(group = %type_group_name, "new type group");
                let group = self.visitor.group(Some(parent), &type_group_name);
                type_groups.insert(type_group_name, group);
                group
            }
        };

        let has_children = !store.decomposed_by(id).is_empty()
            || (entity.kind.is_spatial() && !store.contained_elements(id).is_empty());
        if !has_children {
            if admitted {
                self.visitor.entity(type_group, id, entity, &name)?;
            }
            return Ok(());
        }

        let group = self.visitor.group(Some(type_group), &name);
        if admitted {
            self.visitor.entity(group, id, entity, &name)?;
        }
        if entity.kind.is_spatial() {
            self.spatial_contents(id, group, admitted)
        } else {
            self.children(id, group, &mut TypeGroups::new(), admitted)
        }
    }
}
