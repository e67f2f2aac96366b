//! Gallery node records.
//!
//! A [`GalleryNode`] carries its materialized path: the ordered ids from the
//! root down to and including itself. Ancestor, descendant and cycle checks
//! are prefix tests on that path and never walk parent pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gallery_types::{GalleryId, GalleryType, ImageId};

/// A gallery in the hierarchy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryNode {
    /// Stable identifier.
    pub id: GalleryId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Kind of gallery.
    pub gallery_type: GalleryType,
    /// Parent gallery, `None` for roots.
    pub parent_id: Option<GalleryId>,
    /// Depth below the root (`path.len() - 1`).
    pub level: u32,
    /// Ids from the root to this node, inclusive.
    pub path: Vec<GalleryId>,
    /// Position among siblings; ties break by id.
    pub sort_order: i32,
    /// Whether the gallery is publicly listed.
    pub is_public: bool,
    /// Cover image, always an image held somewhere in this subtree.
    pub cover_image_id: Option<ImageId>,
    /// Active memberships held directly by this gallery.
    pub direct_image_count: u64,
    /// Active direct children.
    pub direct_sub_gallery_count: u64,
    /// `direct_image_count` plus the totals of all active children.
    pub total_image_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when soft-deleted; deleted nodes are invisible to every query.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl GalleryNode {
    /// Returns `true` if the node has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns `true` if the node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Ancestor ids from the root down to the parent.
    pub fn ancestor_ids(&self) -> &[GalleryId] {
        &self.path[..self.path.len().saturating_sub(1)]
    }

    /// Returns `true` if `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &GalleryNode) -> bool {
        self.path.len() > ancestor.path.len() && self.path.starts_with(&ancestor.path)
    }

    /// Returns `true` if `self` is `other` or one of its ancestors.
    pub fn contains(&self, other: &GalleryNode) -> bool {
        other.path.starts_with(&self.path)
    }

    /// Returns `true` if the path and level agree with the given parent.
    pub fn path_consistent_with(&self, parent: Option<&GalleryNode>) -> bool {
        let prefix: &[GalleryId] = parent.map(|p| p.path.as_slice()).unwrap_or(&[]);
        self.path.len() == prefix.len() + 1
            && self.path.starts_with(prefix)
            && self.path.last() == Some(&self.id)
            && self.level as usize == self.path.len() - 1
    }
}

/// Input for creating a gallery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGallery {
    pub name: String,
    pub gallery_type: GalleryType,
    pub parent_id: Option<GalleryId>,
    pub description: Option<String>,
    pub is_public: bool,
    pub sort_order: i32,
}

impl NewGallery {
    /// A public gallery with default sort order.
    pub fn new(name: impl Into<String>, gallery_type: GalleryType) -> Self {
        Self {
            name: name.into(),
            gallery_type,
            parent_id: None,
            description: None,
            is_public: true,
            sort_order: 0,
        }
    }

    /// Place the new gallery under `parent`.
    pub fn under(mut self, parent: GalleryId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn private(mut self) -> Self {
        self.is_public = false;
        self
    }
}

/// Editable presentation fields. `None` leaves a field unchanged.
///
/// Hierarchy fields (parent, path, counts) change only through moves and
/// membership operations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub gallery_type: Option<GalleryType>,
    pub is_public: Option<bool>,
    pub sort_order: Option<i32>,
}

impl GalleryUpdate {
    /// Returns `true` if no field would change.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.gallery_type.is_none()
            && self.is_public.is_none()
            && self.sort_order.is_none()
    }

    pub(crate) fn apply_to(self, node: &mut GalleryNode) {
        if let Some(name) = self.name {
            node.name = name;
        }
        if let Some(description) = self.description {
            node.description = description;
        }
        if let Some(gallery_type) = self.gallery_type {
            node.gallery_type = gallery_type;
        }
        if let Some(is_public) = self.is_public {
            node.is_public = is_public;
        }
        if let Some(sort_order) = self.sort_order {
            node.sort_order = sort_order;
        }
    }
}

/// A gallery together with its active descendants, siblings ordered by
/// `(sort_order, id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GallerySubtree {
    pub node: GalleryNode,
    pub children: Vec<GallerySubtree>,
}

impl GallerySubtree {
    /// Number of galleries in this subtree, root included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(GallerySubtree::size).sum::<usize>()
    }

    /// Gallery ids in depth-first pre-order.
    pub fn ids(&self) -> Vec<GalleryId> {
        let mut out = Vec::with_capacity(self.size());
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            out.push(tree.node.id);
            stack.extend(tree.children.iter().rev());
        }
        out
    }

    /// Find a gallery anywhere in this subtree.
    pub fn find(&self, id: &GalleryId) -> Option<&GallerySubtree> {
        if &self.node.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// Counts and position of one gallery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryStatistics {
    pub gallery_id: GalleryId,
    pub name: String,
    pub direct_image_count: u64,
    pub direct_sub_gallery_count: u64,
    /// Active galleries anywhere below this one.
    pub descendant_count: u64,
    pub total_image_count: u64,
    pub level: u32,
    pub path: Vec<GalleryId>,
}

/// Sort key for siblings.
pub(crate) fn sibling_key(node: &GalleryNode) -> (i32, GalleryId) {
    (node.sort_order, node.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gid(n: u128) -> GalleryId {
        GalleryId::from_uuid(uuid::Uuid::from_u128(n))
    }

    fn node(id: u128, path: &[u128]) -> GalleryNode {
        let now = Utc::now();
        let path: Vec<GalleryId> = path.iter().map(|n| gid(*n)).collect();
        GalleryNode {
            id: gid(id),
            name: format!("g{id}"),
            description: None,
            gallery_type: GalleryType::Collection,
            parent_id: path.len().checked_sub(2).map(|i| path[i]),
            level: (path.len() - 1) as u32,
            path,
            sort_order: 0,
            is_public: true,
            cover_image_id: None,
            direct_image_count: 0,
            direct_sub_gallery_count: 0,
            total_image_count: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn descendant_is_strict_prefix() {
        let root = node(1, &[1]);
        let child = node(2, &[1, 2]);
        let other = node(3, &[3]);
        assert!(child.is_descendant_of(&root));
        assert!(!root.is_descendant_of(&child));
        assert!(!root.is_descendant_of(&root));
        assert!(!child.is_descendant_of(&other));
        assert!(root.contains(&root));
        assert!(root.contains(&child));
    }

    #[test]
    fn ancestor_ids_excludes_self() {
        let leaf = node(3, &[1, 2, 3]);
        assert_eq!(leaf.ancestor_ids(), &[gid(1), gid(2)]);
        assert!(node(1, &[1]).ancestor_ids().is_empty());
    }

    #[test]
    fn path_consistency() {
        let root = node(1, &[1]);
        let child = node(2, &[1, 2]);
        assert!(root.path_consistent_with(None));
        assert!(child.path_consistent_with(Some(&root)));
        assert!(!child.path_consistent_with(None));

        let mut bad = node(2, &[1, 2]);
        bad.level = 5;
        assert!(!bad.path_consistent_with(Some(&root)));
    }

    #[test]
    fn update_only_touches_given_fields() {
        let mut n = node(1, &[1]);
        n.description = Some("old".into());
        GalleryUpdate {
            name: Some("renamed".into()),
            description: Some(None),
            ..Default::default()
        }
        .apply_to(&mut n);
        assert_eq!(n.name, "renamed");
        assert_eq!(n.description, None);
        assert!(n.is_public);
        assert!(GalleryUpdate::default().is_empty());
    }

    #[test]
    fn private_builder_clears_public_flag() {
        let parent = GalleryId::new();
        let new = NewGallery::new("drafts", GalleryType::Album).under(parent).private();
        assert!(!new.is_public);
        assert_eq!(new.parent_id, Some(parent));
        assert!(NewGallery::new("open", GalleryType::Album).is_public);
    }

    #[test]
    fn subtree_ids_are_preorder() {
        let tree = GallerySubtree {
            node: node(1, &[1]),
            children: vec![
                GallerySubtree {
                    node: node(2, &[1, 2]),
                    children: vec![GallerySubtree {
                        node: node(4, &[1, 2, 4]),
                        children: vec![],
                    }],
                },
                GallerySubtree {
                    node: node(3, &[1, 3]),
                    children: vec![],
                },
            ],
        };
        assert_eq!(tree.size(), 4);
        assert_eq!(tree.ids(), vec![gid(1), gid(2), gid(4), gid(3)]);
        assert_eq!(tree.find(&gid(4)).map(|t| t.node.level), Some(2));
        assert!(tree.find(&gid(9)).is_none());
    }
}
