//! Organization outline trees, stored in an arena owned by [`Manifest`].
//!
//! Every [`Item`] records its owning parent, so detaching a node only touches
//! that node's subtree and one sibling list instead of re-searching the tree.

use serde::Serialize;

use super::{Manifest, NamespaceKind};
use crate::xml::{Attribute, Element};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ItemId(pub(crate) usize);

impl ItemId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parent {
    /// Index into [`Manifest::organizations`].
    Organization(usize),
    Item(ItemId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub identifier: Option<String>,
    pub identifierref: Option<String>,
    pub title: Option<String>,
    pub attributes: Vec<Attribute>,
    /// Child elements other than `title` and `item`, metadata first.
    pub extensions: Vec<Element>,
    pub namespace: NamespaceKind,
    pub(crate) parent: Parent,
    pub(crate) children: Vec<ItemId>,
    pub(crate) detached: bool,
}

impl Item {
    pub fn parent(&self) -> Parent {
        self.parent
    }

    pub fn children(&self) -> &[ItemId] {
        &self.children
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.identifier.clone())
            .unwrap_or_else(|| "(untitled)".to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Organization {
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub attributes: Vec<Attribute>,
    pub extensions: Vec<Element>,
    pub(crate) roots: Vec<ItemId>,
}

impl Organization {
    pub fn roots(&self) -> &[ItemId] {
        &self.roots
    }
}

impl Manifest {
    pub(crate) fn push_item(&mut self, item: Item) -> ItemId {
        let id = ItemId(self.items.len());
        match item.parent {
            Parent::Organization(org) => self.organizations[org].roots.push(id),
            Parent::Item(parent) => self.items[parent.0].children.push(id),
        }
        self.items.push(item);
        id
    }

    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id.0]
    }

    pub fn item_mut(&mut self, id: ItemId) -> &mut Item {
        &mut self.items[id.0]
    }

    /// Items still attached to an organization, in arena order.
    pub fn live_items(&self) -> impl Iterator<Item = (ItemId, &Item)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.detached)
            .map(|(index, item)| (ItemId(index), item))
    }

    pub fn items_referencing(&self, resource_id: &str) -> Vec<ItemId> {
        self.live_items()
            .filter(|(_, item)| item.identifierref.as_deref() == Some(resource_id))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn item_titles_for(&self, resource_id: &str) -> Vec<String> {
        self.items_referencing(resource_id)
            .into_iter()
            .map(|id| self.item(id).display_title())
            .collect()
    }

    /// An item with no reference and no attached children carries nothing.
    pub fn is_vacuous(&self, id: ItemId) -> bool {
        let item = self.item(id);
        item.identifierref.is_none() && item.children.is_empty()
    }

    /// Detaches `id` and its whole subtree. Returns how many items were
    /// detached; zero when `id` was already detached.
    pub fn detach_item(&mut self, id: ItemId) -> usize {
        if self.items[id.0].detached {
            return 0;
        }
        match self.items[id.0].parent {
            Parent::Organization(org) => self.organizations[org].roots.retain(|root| *root != id),
            Parent::Item(parent) => self.items[parent.0].children.retain(|child| *child != id),
        }

        let mut count = 0;
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let item = &mut self.items[next.0];
            if item.detached {
                continue;
            }
            item.detached = true;
            count += 1;
            pending.extend(item.children.iter().copied());
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use crate::manifest::Manifest;

    const OUTLINE: &str = r#"<manifest identifier="m" xmlns="http://www.imsglobal.org/xsd/imsccv1p1/imscp_v1p1">
  <organizations>
    <organization identifier="org" structure="rooted-hierarchy">
      <item identifier="root">
        <item identifier="week1">
          <title>Week 1</title>
          <item identifier="i1" identifierref="r1"><title>Intro</title></item>
          <item identifier="i2" identifierref="r2"><title>Tool</title></item>
        </item>
      </item>
    </organization>
  </organizations>
  <resources>
    <resource identifier="r1" type="webcontent" href="intro.html"><file href="intro.html"/></resource>
    <resource identifier="r2" type="imsbasiclti_xmlv1p0"><file href="tool.xml"/></resource>
  </resources>
</manifest>"#;

    #[test]
    fn detach_removes_subtree_and_unlinks_from_parent() {
        let mut manifest = Manifest::parse(OUTLINE.as_bytes()).unwrap();
        let week = manifest
            .live_items()
            .find(|(_, item)| item.identifier.as_deref() == Some("week1"))
            .map(|(id, _)| id)
            .unwrap();

        assert_eq!(manifest.detach_item(week), 3);
        assert_eq!(manifest.detach_item(week), 0);
        assert!(manifest.items_referencing("r1").is_empty());

        let root = manifest.organizations[0].roots()[0];
        assert!(manifest.item(root).children().is_empty());
        assert!(manifest.is_vacuous(root));
    }

    #[test]
    fn titles_are_collected_per_resource() {
        let manifest = Manifest::parse(OUTLINE.as_bytes()).unwrap();
        assert_eq!(manifest.item_titles_for("r2"), vec!["Tool".to_string()]);
        assert!(manifest.item_titles_for("missing").is_empty());
    }
}
