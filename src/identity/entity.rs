//! Named entities addressed by colon-delimited identifier paths.
//!
//! An identifier path is the chain of labels from the root down to a node, joined
//! with `:`; the root sentinel contributes nothing. A literal colon inside a label
//! must be escaped as `\:` (and a literal backslash as `\\`).

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{AuthError, AuthResult};

pub const PATH_SEPARATOR: char = ':';
const ESCAPE: char = '\\';

#[derive(Debug)]
struct EntityNode {
    label: String,
    path: String,
    parent: Option<Entity>,
    children: RwLock<Vec<String>>,
}

/// Cheap handle to a node in an [`EntityTree`].
///
/// Equality and hashing are structural on the label alone, so two handles compare
/// equal whenever their labels match string-for-string. Use [`Entity::same_path`]
/// when the full position in the forest matters.
#[derive(Clone)]
pub struct Entity(Arc<EntityNode>);

impl Entity {
    fn root() -> Self {
        Entity(Arc::new(EntityNode { label: String::new(), path: String::new(), parent: None, children: RwLock::new(Vec::new()) }))
    }

    pub fn label(&self) -> &str { &self.0.label }

    pub fn identifier_path(&self) -> &str { &self.0.path }

    pub fn parent(&self) -> Option<&Entity> { self.0.parent.as_ref() }

    pub fn is_root(&self) -> bool { self.0.parent.is_none() }

    pub fn is_leaf(&self) -> bool { self.0.children.read().is_empty() }

    pub fn child_labels(&self) -> Vec<String> { self.0.children.read().clone() }

    pub fn same_path(&self, other: &Entity) -> bool { self.0.path == other.0.path }

    /// True when this entity's direct parent matches `parent` (the root sentinel
    /// when `None`).
    pub fn has_parent(&self, parent: Option<&Entity>) -> bool {
        match (self.parent(), parent) {
            (Some(mine), Some(wanted)) => mine == wanted,
            (Some(mine), None) => mine.is_root(),
            (None, _) => false,
        }
    }

    fn detached(label: &str, path: String, parent: &Entity) -> Self {
        Entity(Arc::new(EntityNode {
            label: label.to_string(),
            path,
            parent: Some(parent.clone()),
            children: RwLock::new(Vec::new()),
        }))
    }

    fn add_child(&self, label: &str) {
        let mut children = self.0.children.write();
        if !children.iter().any(|c| c == label) {
            children.push(label.to_string());
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool { self.0.label == other.0.label }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) { self.0.label.hash(state) }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity").field("path", &self.0.path).field("leaf", &self.is_leaf()).finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0.path) }
}

/// Escape a raw name so it can be used as a label.
pub fn escape_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == ESCAPE || c == PATH_SEPARATOR {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Inverse of [`escape_label`].
pub fn unescape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut chars = label.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            if let Some(n) = chars.next() {
                out.push(n);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// A label is valid when it is non-empty, has no unescaped colon and no dangling
/// escape character.
pub fn validate_label(label: &str) -> AuthResult<()> {
    if label.is_empty() {
        return Err(AuthError::InvalidLabel(label.to_string()));
    }
    let mut chars = label.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE if chars.next().is_none() => return Err(AuthError::InvalidLabel(label.to_string())),
            ESCAPE => {}
            PATH_SEPARATOR => return Err(AuthError::InvalidLabel(label.to_string())),
            _ => {}
        }
    }
    Ok(())
}

/// Split an identifier path on unescaped colons. Segments keep their escapes.
pub fn split_identifier(path: &str) -> AuthResult<Vec<String>> {
    let invalid = || AuthError::InvalidIdentifier(path.to_string());
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => {
                let next = chars.next().ok_or_else(invalid)?;
                current.push(ESCAPE);
                current.push(next);
            }
            PATH_SEPARATOR => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid());
    }
    Ok(segments)
}

/// Interning arena for entity nodes, keyed by identifier path. Creating a node
/// that already exists returns the existing handle, so child registrations made
/// through one handle are visible through every other.
#[derive(Debug)]
pub struct EntityTree {
    root: Entity,
    nodes: RwLock<HashMap<String, Entity>>,
}

impl Default for EntityTree {
    fn default() -> Self { Self::new() }
}

impl EntityTree {
    pub fn new() -> Self { Self { root: Entity::root(), nodes: RwLock::new(HashMap::new()) } }

    pub fn root(&self) -> &Entity { &self.root }

    pub fn len(&self) -> usize { self.nodes.read().len() }

    pub fn is_empty(&self) -> bool { self.nodes.read().is_empty() }

    pub fn lookup(&self, path: &str) -> Option<Entity> { self.nodes.read().get(path).cloned() }

    /// Create (or return the existing) node `label` under `parent`, the root when
    /// absent. A parent handle from another tree is re-anchored in this one.
    pub fn create(&self, label: &str, parent: Option<&Entity>) -> AuthResult<Entity> {
        validate_label(label)?;
        let parent = match parent {
            Some(p) if !p.is_root() => match self.lookup(p.identifier_path()) {
                Some(own) => own,
                None => self.create_path(p.identifier_path())?,
            },
            _ => self.root.clone(),
        };
        Ok(self.intern(label, &parent))
    }

    /// Materialize every node on `path`, returning the last one.
    pub fn create_path(&self, path: &str) -> AuthResult<Entity> {
        let segments = split_identifier(path)?;
        let mut parent = self.root.clone();
        for segment in &segments {
            parent = self.intern(segment, &parent);
        }
        Ok(parent)
    }

    /// Resolve without materializing anything.
    pub fn resolve_existing(&self, path: &str) -> AuthResult<Entity> {
        split_identifier(path)?;
        self.lookup(path).ok_or_else(|| AuthError::NotFound(path.to_string()))
    }

    /// The interned node for `path` when there is one. Otherwise a handle whose
    /// unknown tail is built on the side: nothing is registered in the tree and no
    /// interned node gains a child.
    pub fn resolve_transient(&self, path: &str) -> AuthResult<Entity> {
        let segments = split_identifier(path)?;
        if let Some(found) = self.lookup(path) {
            return Ok(found);
        }
        let mut node = self.root.clone();
        let mut interned = true;
        for segment in &segments {
            let next_path = child_path(&node, segment);
            let existing = if interned { self.lookup(&next_path) } else { None };
            node = match existing {
                Some(own) => own,
                None => {
                    interned = false;
                    Entity::detached(segment, next_path, &node)
                }
            };
        }
        Ok(node)
    }

    fn intern(&self, label: &str, parent: &Entity) -> Entity {
        let path = child_path(parent, label);
        if let Some(existing) = self.nodes.read().get(&path) {
            return existing.clone();
        }
        let mut nodes = self.nodes.write();
        let entity = nodes.entry(path.clone()).or_insert_with(|| Entity::detached(label, path, parent)).clone();
        drop(nodes);
        parent.add_child(label);
        entity
    }
}

fn child_path(parent: &Entity, label: &str) -> String {
    if parent.is_root() {
        label.to_string()
    } else {
        format!("{}{}{}", parent.identifier_path(), PATH_SEPARATOR, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_path_is_label_chain() {
        let tree = EntityTree::new();
        let boromir = tree.create_path("LotR:Fellowship:Boromir").unwrap();
        assert_eq!(boromir.identifier_path(), "LotR:Fellowship:Boromir");
        assert_eq!(boromir.label(), "Boromir");
        assert!(boromir.is_leaf());
        let fellowship = tree.create_path("LotR:Fellowship").unwrap();
        assert!(!fellowship.is_leaf());
        assert_eq!(boromir.parent(), Some(&fellowship));
        assert_eq!(fellowship.parent().map(|p| p.identifier_path()), Some("LotR"));
        assert!(tree.root().identifier_path().is_empty());
    }

    #[test]
    fn create_interns_nodes() {
        let tree = EntityTree::new();
        let lotr = tree.create("LotR", None).unwrap();
        let again = tree.create("LotR", None).unwrap();
        assert!(lotr.same_path(&again));
        tree.create("Two_Towers", Some(&lotr)).unwrap();
        assert!(!again.is_leaf());
        assert_eq!(lotr.child_labels(), vec!["Two_Towers"]);
        assert!(lotr.has_parent(None));
    }

    #[test]
    fn empty_segments_are_invalid() {
        let tree = EntityTree::new();
        for bad in ["", ":", "LotR:", ":LotR", "LotR::Boromir", "LotR\\"] {
            assert!(matches!(tree.create_path(bad), Err(AuthError::InvalidIdentifier(_))), "{bad}");
        }
    }

    #[test]
    fn labels_reject_unescaped_colons() {
        let tree = EntityTree::new();
        assert!(matches!(tree.create("a:b", None), Err(AuthError::InvalidLabel(_))));
        assert!(matches!(tree.create("", None), Err(AuthError::InvalidLabel(_))));
        let escaped = escape_label("Dol:Guldur");
        let e = tree.create(&escaped, None).unwrap();
        assert_eq!(e.identifier_path(), "Dol\\:Guldur");
        assert_eq!(unescape_label(e.label()), "Dol:Guldur");
        let child = tree.create_path("Dol\\:Guldur:Necromancer").unwrap();
        assert_eq!(child.parent().map(|p| p.label()), Some("Dol\\:Guldur"));
    }

    #[test]
    fn resolve_existing_does_not_materialize() {
        let tree = EntityTree::new();
        assert!(matches!(tree.resolve_existing("LotR"), Err(AuthError::NotFound(_))));
        assert!(tree.is_empty());
        tree.create_path("LotR:Fellowship").unwrap();
        assert_eq!(tree.len(), 2);
        assert!(tree.resolve_existing("LotR").is_ok());
    }

    #[test]
    fn equality_is_by_label() {
        let tree = EntityTree::new();
        let a = tree.create_path("LotR:Fellowship").unwrap();
        let b = tree.create_path("Hobbit:Fellowship").unwrap();
        assert_eq!(a, b);
        assert!(!a.same_path(&b));
    }

    #[test]
    fn foreign_parent_is_reanchored() {
        let theirs = EntityTree::new();
        let ours = EntityTree::new();
        let lotr = theirs.create_path("LotR").unwrap();
        let child = ours.create("Rohan", Some(&lotr)).unwrap();
        assert_eq!(child.identifier_path(), "LotR:Rohan");
        assert!(!ours.lookup("LotR").unwrap().is_leaf());
        assert!(lotr.is_leaf());
    }

    #[test]
    fn transient_resolution_leaves_tree_alone() {
        let tree = EntityTree::new();
        let lotr = tree.create_path("LotR").unwrap();
        for i in 0..100 {
            let e = tree.resolve_transient(&format!("junk{i}:a:b")).unwrap();
            assert_eq!(e.identifier_path(), format!("junk{i}:a:b"));
        }
        let eowin = tree.resolve_transient("LotR:Rohan:Eowin").unwrap();
        assert_eq!(eowin.parent().and_then(|p| p.parent()), Some(&lotr));
        assert_eq!(tree.len(), 1);
        assert!(lotr.is_leaf());
        assert!(tree.resolve_transient("LotR").unwrap().same_path(&lotr));
        assert!(matches!(tree.resolve_transient("LotR::x"), Err(AuthError::InvalidIdentifier(_))));
    }
}
