//! The resource tree: a path-addressed arena of entries, each optionally
//! carrying a resource.
//!
//! Entries are addressed by generational ids. A freed slot bumps its
//! generation, so ids held across deletions resolve to `None` instead of
//! aliasing a new entry. This is what makes `source` links and fan-out
//! lists safely weak.

use sample::DataType;

use crate::error::{Error, Result};
use crate::handler::HandlerRef;
use crate::path;
use crate::resource::Resource;

/// Stable, generation-checked address of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    index: u32,
    gen: u32,
}

/// What kind of node an entry currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Namespace,
    Input,
    Output,
    Observation,
    Placeholder,
}

impl EntryKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntryKind::Namespace => "namespace",
            EntryKind::Input => "input",
            EntryKind::Output => "output",
            EntryKind::Observation => "observation",
            EntryKind::Placeholder => "placeholder",
        }
    }
}

/// A node in the resource tree.
#[derive(Debug)]
pub struct Entry {
    name: String,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
    resource: Option<Resource>,
}

impl Entry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    pub fn kind(&self) -> EntryKind {
        match &self.resource {
            Some(res) => res.kind(),
            None => EntryKind::Namespace,
        }
    }

    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    pub fn resource_mut(&mut self) -> Option<&mut Resource> {
        self.resource.as_mut()
    }
}

#[derive(Debug)]
struct Slot {
    gen: u32,
    entry: Option<Entry>,
}

/// The tree arena. Owns every entry; the root lives in slot zero.
#[derive(Debug)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Tree {
    pub fn new() -> Tree {
        Tree {
            slots: vec![Slot {
                gen: 0,
                entry: Some(Entry {
                    name: String::new(),
                    parent: None,
                    children: Vec::new(),
                    resource: None,
                }),
            }],
            free: Vec::new(),
        }
    }

    pub fn root(&self) -> EntryId {
        EntryId { index: 0, gen: 0 }
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.gen != id.gen {
            return None;
        }
        slot.entry.as_mut()
    }

    fn alloc_child(&mut self, parent: EntryId, name: &str) -> EntryId {
        let entry = Entry {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            resource: None,
        };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                EntryId {
                    index,
                    gen: slot.gen,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    gen: 0,
                    entry: Some(entry),
                });
                EntryId { index, gen: 0 }
            }
        };
        self.entry_mut(parent)
            .expect("parent entry is live")
            .children
            .push(id);
        id
    }

    fn free_entry(&mut self, id: EntryId) {
        if let Some(parent) = self.entry(id).and_then(|e| e.parent) {
            if let Some(parent) = self.entry_mut(parent) {
                parent.children.retain(|c| *c != id);
            }
        }
        let slot = &mut self.slots[id.index as usize];
        slot.entry = None;
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(id.index);
    }

    /// Find a direct child by name.
    pub fn find_child(&self, parent: EntryId, name: &str) -> Option<EntryId> {
        let entry = self.entry(parent)?;
        entry
            .children
            .iter()
            .copied()
            .find(|c| self.entry(*c).map(|e| e.name == name).unwrap_or(false))
    }

    /// Walk a checked path from `base` without creating anything.
    pub fn find(&self, base: EntryId, rel_path: &str) -> Option<EntryId> {
        let mut current = base;
        for segment in path::segments(rel_path) {
            current = self.find_child(current, segment)?;
        }
        Some(current)
    }

    /// Walk a checked path from `base`, creating missing Namespaces.
    pub fn get(&mut self, base: EntryId, rel_path: &str) -> Result<EntryId> {
        let mut current = base;
        if self.entry(current).is_none() {
            return Err(Error::NotFound);
        }
        for segment in path::segments(rel_path) {
            current = match self.find_child(current, segment) {
                Some(child) => child,
                None => self.alloc_child(current, segment),
            };
        }
        Ok(current)
    }

    /// Like `get`, but guarantees the target carries a resource, creating a
    /// Placeholder over a bare Namespace.
    pub fn get_resource(&mut self, base: EntryId, rel_path: &str) -> Result<EntryId> {
        let id = self.get(base, rel_path)?;
        if self.entry(id).map(|e| e.kind()) == Some(EntryKind::Namespace) {
            self.replace_resource(id, Resource::new_placeholder());
        }
        Ok(id)
    }

    /// Get-or-create an Input. An existing Input with identical type and
    /// units is returned as-is; any other concrete kind is `Duplicate`.
    pub fn get_input(
        &mut self,
        base: EntryId,
        rel_path: &str,
        data_type: DataType,
        units: &str,
    ) -> Result<(EntryId, Vec<HandlerRef>)> {
        self.get_io(base, rel_path, Resource::new_input(data_type, units), EntryKind::Input)
    }

    /// Get-or-create an Output, with the same replacement policy as inputs.
    pub fn get_output(
        &mut self,
        base: EntryId,
        rel_path: &str,
        data_type: DataType,
        units: &str,
    ) -> Result<(EntryId, Vec<HandlerRef>)> {
        self.get_io(base, rel_path, Resource::new_output(data_type, units), EntryKind::Output)
    }

    fn get_io(
        &mut self,
        base: EntryId,
        rel_path: &str,
        replacement: Resource,
        want: EntryKind,
    ) -> Result<(EntryId, Vec<HandlerRef>)> {
        let id = self.get(base, rel_path)?;
        let entry = self.entry(id).ok_or(Error::NotFound)?;
        match entry.kind() {
            EntryKind::Namespace | EntryKind::Placeholder => {
                let released = self.replace_resource(id, replacement);
                Ok((id, released))
            }
            kind if kind == want => {
                let existing = entry.resource().expect("io entry has a resource");
                if existing.io_data_type() == replacement.io_data_type()
                    && existing.units() == replacement.units()
                {
                    Ok((id, Vec::new()))
                } else {
                    tracing::warn!(
                        path = rel_path,
                        "rejecting re-registration with conflicting type or units"
                    );
                    Err(Error::Duplicate)
                }
            }
            kind => {
                tracing::warn!(
                    path = rel_path,
                    existing = kind.name(),
                    requested = want.name(),
                    "rejecting resource creation over a conflicting entry"
                );
                Err(Error::Duplicate)
            }
        }
    }

    /// Get-or-create an Observation. The boolean reports whether the
    /// observation was created by this call.
    pub fn get_observation(
        &mut self,
        base: EntryId,
        rel_path: &str,
    ) -> Result<(EntryId, Vec<HandlerRef>, bool)> {
        let id = self.get(base, rel_path)?;
        match self.entry(id).ok_or(Error::NotFound)?.kind() {
            EntryKind::Namespace | EntryKind::Placeholder => {
                let released = self.replace_resource(id, Resource::new_observation());
                Ok((id, released, true))
            }
            EntryKind::Observation => Ok((id, Vec::new(), false)),
            kind => {
                tracing::warn!(
                    path = rel_path,
                    existing = kind.name(),
                    "rejecting observation creation over a conflicting entry"
                );
                Err(Error::Duplicate)
            }
        }
    }

    /// Swap the resource at an entry, migrating admin settings from the old
    /// resource. Returns the old resource's handler refs for release.
    pub fn replace_resource(&mut self, id: EntryId, new: Resource) -> Vec<HandlerRef> {
        let entry = self.entry_mut(id).expect("entry is live");
        let mut new = new;
        let released = match entry.resource.take() {
            Some(mut old) => {
                new.move_admin_settings(&mut old);
                old.take_handlers()
            }
            None => Vec::new(),
        };
        entry.resource = Some(new);
        released
    }

    /// Delete an Input or Output. Leaves a Placeholder behind when admin
    /// settings or incoming routes remain.
    pub fn delete_io(&mut self, id: EntryId) -> Result<Vec<HandlerRef>> {
        let entry = self.entry(id).ok_or(Error::NotFound)?;
        match entry.kind() {
            EntryKind::Input | EntryKind::Output => {}
            _ => return Err(Error::NotFound),
        }
        let res = entry.resource().expect("io entry has a resource");
        if res.has_admin_settings() || !res.dests().is_empty() {
            Ok(self.replace_resource(id, Resource::new_placeholder()))
        } else {
            self.remove_resource_entry(id)
        }
    }

    /// Delete an Observation entry outright.
    pub fn delete_observation(&mut self, id: EntryId) -> Result<Vec<HandlerRef>> {
        match self.entry(id).ok_or(Error::NotFound)?.kind() {
            EntryKind::Observation => self.remove_resource_entry(id),
            _ => Err(Error::NotFound),
        }
    }

    fn remove_resource_entry(&mut self, id: EntryId) -> Result<Vec<HandlerRef>> {
        let entry = self.entry_mut(id).ok_or(Error::NotFound)?;
        let mut res = entry.resource.take().ok_or(Error::NotFound)?;
        let released = res.take_handlers();

        // The entry is going away: clear the source links of everything
        // routed from it, and unlink it from its own upstream.
        for dest in res.dests().to_vec() {
            if let Some(r) = self.entry_mut(dest).and_then(|e| e.resource_mut()) {
                if r.source() == Some(id) {
                    r.set_source_link(None);
                }
            }
        }
        if let Some(src) = res.source() {
            if let Some(r) = self.entry_mut(src).and_then(|e| e.resource_mut()) {
                r.remove_dest(id);
            }
        }

        self.prune_upward(id);
        if let Some(src) = res.source() {
            self.collect_placeholder(src);
        }
        Ok(released)
    }

    /// Reap a Placeholder that no longer holds admin settings, incoming
    /// routes, or handlers. Anonymous placeholders only exist to carry
    /// those, so an empty one reverts to (possibly pruned) Namespace.
    pub fn collect_placeholder(&mut self, id: EntryId) {
        let Some(entry) = self.entry(id) else { return };
        if entry.kind() != EntryKind::Placeholder {
            return;
        }
        let res = entry.resource().expect("placeholder has a resource");
        if !res.has_admin_settings() && res.dests().is_empty() && res.handlers().is_empty() {
            let _ = self.remove_resource_entry(id);
        }
    }

    /// Remove `id` and its now-empty ancestor Namespaces.
    fn prune_upward(&mut self, id: EntryId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(entry) = self.entry(id) else { break };
            if entry.parent.is_none() || !entry.children.is_empty() || entry.resource.is_some() {
                break;
            }
            current = entry.parent;
            self.free_entry(id);
        }
    }

    /// Route data from `src` into `dest`. `None` clears the route.
    pub fn set_source(&mut self, dest: EntryId, src: Option<EntryId>) -> Result<()> {
        let dest_entry = self.entry(dest).ok_or(Error::NotFound)?;
        if dest_entry.resource().is_none() {
            return Err(Error::bad_parameter("route destination is a namespace"));
        }

        let old = dest_entry.resource().expect("checked above").source();

        if let Some(src_id) = src {
            let src_entry = self.entry(src_id).ok_or(Error::NotFound)?;
            if src_entry.resource().is_none() {
                return Err(Error::bad_parameter("route source is a namespace"));
            }
            if old == Some(src_id) {
                return Ok(());
            }
            if src_id == dest {
                return Err(Error::WouldCycle);
            }
            // Following src's own source chain must not reach dest.
            let mut cursor = src_id;
            let mut steps = 0usize;
            while let Some(up) = self
                .entry(cursor)
                .and_then(|e| e.resource())
                .and_then(|r| r.source())
            {
                if up == dest {
                    return Err(Error::WouldCycle);
                }
                cursor = up;
                steps += 1;
                if steps > self.slots.len() {
                    break;
                }
            }
            self.unlink_source(dest, old);
            self.entry_mut(dest)
                .expect("entry is live")
                .resource_mut()
                .expect("checked above")
                .set_source_link(Some(src_id));
            self.entry_mut(src_id)
                .expect("entry is live")
                .resource_mut()
                .expect("checked above")
                .add_dest(dest);
        } else {
            self.unlink_source(dest, old);
            if let Some(r) = self.entry_mut(dest).and_then(|e| e.resource_mut()) {
                r.set_source_link(None);
            }
            self.collect_placeholder(dest);
        }
        if let Some(old_src) = old {
            if self.entry(old_src).is_some() && old != src {
                self.collect_placeholder(old_src);
            }
        }
        Ok(())
    }

    fn unlink_source(&mut self, dest: EntryId, old: Option<EntryId>) {
        if let Some(old_src) = old {
            if let Some(r) = self.entry_mut(old_src).and_then(|e| e.resource_mut()) {
                r.remove_dest(dest);
            }
        }
    }

    pub fn first_child(&self, id: EntryId) -> Option<EntryId> {
        self.entry(id)?.children.first().copied()
    }

    pub fn next_sibling(&self, id: EntryId) -> Option<EntryId> {
        let parent = self.entry(id)?.parent?;
        let siblings = &self.entry(parent)?.children;
        let at = siblings.iter().position(|c| *c == id)?;
        siblings.get(at + 1).copied()
    }

    /// The absolute path of an entry.
    pub fn path_of(&self, id: EntryId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = id;
        loop {
            let entry = self.entry(current)?;
            match entry.parent {
                Some(parent) => {
                    names.push(entry.name.clone());
                    current = parent;
                }
                None => break,
            }
        }
        if names.is_empty() {
            return Some("/".to_string());
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    /// Snapshot all live entry ids in post order (children before parents).
    /// Ids are generation-checked, so callbacks may delete entries while
    /// iterating the snapshot.
    pub fn post_order_ids(&self) -> Vec<EntryId> {
        let mut out = Vec::new();
        self.post_order_visit(self.root(), &mut out);
        out
    }

    fn post_order_visit(&self, id: EntryId, out: &mut Vec<EntryId>) {
        if let Some(entry) = self.entry(id) {
            for child in entry.children.clone() {
                self.post_order_visit(child, out);
            }
            out.push(id);
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_creates_namespace_chain() {
        let mut tree = Tree::new();
        let root = tree.root();
        let id = tree.get(root, "app/p/t").unwrap();
        assert_eq!(tree.path_of(id).unwrap(), "/app/p/t");
        assert_eq!(tree.entry(id).unwrap().kind(), EntryKind::Namespace);

        // Lookup finds the same entry without creating more.
        assert_eq!(tree.find(root, "app/p/t"), Some(id));
        assert_eq!(tree.find(root, "app/p/x"), None);
    }

    #[test]
    fn get_resource_replaces_namespace_with_placeholder() {
        let mut tree = Tree::new();
        let root = tree.root();
        let id = tree.get_resource(root, "a/b").unwrap();
        assert_eq!(tree.entry(id).unwrap().kind(), EntryKind::Placeholder);
    }

    #[test]
    fn input_replacement_policy() {
        let mut tree = Tree::new();
        let root = tree.root();

        let (id, _) = tree
            .get_input(root, "app/p/t", DataType::Numeric, "degC")
            .unwrap();
        assert_eq!(tree.entry(id).unwrap().kind(), EntryKind::Input);

        // Same type and units: same entry back.
        let (again, _) = tree
            .get_input(root, "app/p/t", DataType::Numeric, "degC")
            .unwrap();
        assert_eq!(again, id);

        // Conflicting units, conflicting type, or wrong kind: refused.
        assert_eq!(
            tree.get_input(root, "app/p/t", DataType::Numeric, "K"),
            Err(Error::Duplicate)
        );
        assert_eq!(
            tree.get_input(root, "app/p/t", DataType::String, "degC"),
            Err(Error::Duplicate)
        );
        assert_eq!(
            tree.get_output(root, "app/p/t", DataType::Numeric, "degC"),
            Err(Error::Duplicate)
        );
    }

    #[test]
    fn replacement_migrates_admin_settings() {
        use sample::{Sample, Value};
        use std::rc::Rc;

        let mut tree = Tree::new();
        let root = tree.root();

        let holder = tree.get_resource(root, "a/b").unwrap();
        let upstream = tree.get_resource(root, "src").unwrap();
        tree.set_source(holder, Some(upstream)).unwrap();
        tree.entry_mut(holder)
            .unwrap()
            .resource_mut()
            .unwrap()
            .set_default(
                DataType::Numeric,
                Rc::new(Sample::new(1.0, Value::Numeric(7.0))),
            );

        let (id, _) = tree
            .get_input(root, "a/b", DataType::Numeric, "")
            .unwrap();
        assert_eq!(id, holder);
        let res = tree.entry(id).unwrap().resource().unwrap();
        assert_eq!(res.kind(), EntryKind::Input);
        assert_eq!(res.source(), Some(upstream));
        assert!(res.default_value().is_some());
        // The upstream's fan-out list still points at the same entry.
        let up = tree.entry(upstream).unwrap().resource().unwrap();
        assert_eq!(up.dests(), &[id]);
    }

    #[test]
    fn delete_io_downgrades_or_prunes() {
        let mut tree = Tree::new();
        let root = tree.root();

        // An input with a source keeps its entry as a Placeholder.
        let (a, _) = tree.get_input(root, "app/x/a", DataType::Numeric, "").unwrap();
        let upstream = tree.get_resource(root, "up").unwrap();
        tree.set_source(a, Some(upstream)).unwrap();
        let _ = tree.delete_io(a).unwrap();
        assert_eq!(tree.entry(a).unwrap().kind(), EntryKind::Placeholder);
        assert_eq!(
            tree.entry(a).unwrap().resource().unwrap().source(),
            Some(upstream)
        );

        // A bare input cascades empty namespaces away.
        let (b, _) = tree.get_input(root, "app/y/b", DataType::Numeric, "").unwrap();
        let _ = tree.delete_io(b).unwrap();
        assert!(tree.entry(b).is_none());
        assert_eq!(tree.find(root, "app/y"), None);
        // "/app" still holds the placeholder branch.
        assert!(tree.find(root, "app/x/a").is_some());
    }

    #[test]
    fn deleting_a_source_clears_downstream_links() {
        let mut tree = Tree::new();
        let root = tree.root();

        let (obs, _, _) = tree.get_observation(root, "obs/o").unwrap();
        let (input, _) = tree.get_input(root, "app/p/t", DataType::Numeric, "").unwrap();
        tree.set_source(obs, Some(input)).unwrap();

        // The input has an incoming route, so deletion leaves a
        // placeholder and the route survives.
        let _ = tree.delete_io(input).unwrap();
        assert_eq!(tree.entry(input).unwrap().kind(), EntryKind::Placeholder);
        assert_eq!(
            tree.entry(obs).unwrap().resource().unwrap().source(),
            Some(input)
        );

        // Deleting the observation unlinks it from its source, and the
        // placeholder, now carrying nothing, vanishes with its namespaces.
        let _ = tree.delete_observation(obs).unwrap();
        assert!(tree.entry(obs).is_none());
        assert!(tree.entry(input).is_none());
        assert_eq!(tree.find(root, "app"), None);
    }

    #[test]
    fn source_cycles_are_refused() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.get_resource(root, "a").unwrap();
        let b = tree.get_resource(root, "b").unwrap();
        let c = tree.get_resource(root, "c").unwrap();

        tree.set_source(b, Some(a)).unwrap();
        tree.set_source(c, Some(b)).unwrap();
        assert_eq!(tree.set_source(a, Some(c)), Err(Error::WouldCycle));
        assert_eq!(tree.set_source(a, Some(a)), Err(Error::WouldCycle));

        // The failed calls left the routes untouched.
        assert_eq!(tree.entry(a).unwrap().resource().unwrap().source(), None);

        // Replacing a route unlinks the old fan-out entry.
        tree.set_source(c, Some(a)).unwrap();
        assert!(tree.entry(b).unwrap().resource().unwrap().dests().is_empty());
    }

    #[test]
    fn stale_ids_do_not_alias_reused_slots() {
        let mut tree = Tree::new();
        let root = tree.root();
        let (a, _) = tree.get_input(root, "a", DataType::Numeric, "").unwrap();
        let _ = tree.delete_io(a).unwrap();
        // Allocate again; the slot may be reused but the old id must die.
        let _ = tree.get_input(root, "b", DataType::Numeric, "").unwrap();
        assert!(tree.entry(a).is_none());
    }

    #[test]
    fn post_order_lists_children_first() {
        let mut tree = Tree::new();
        let root = tree.root();
        let leaf = tree.get(root, "a/b/c").unwrap();
        let ids = tree.post_order_ids();
        let leaf_at = ids.iter().position(|id| *id == leaf).unwrap();
        let parent = tree.entry(leaf).unwrap().parent().unwrap();
        let parent_at = ids.iter().position(|id| *id == parent).unwrap();
        assert!(leaf_at < parent_at);
        assert_eq!(*ids.last().unwrap(), root);
    }

    #[test]
    fn traversal_snapshot_survives_deletion() {
        let mut tree = Tree::new();
        let root = tree.root();
        let (_, _, _) = tree.get_observation(root, "obs/a").unwrap();
        let (_, _, _) = tree.get_observation(root, "obs/b").unwrap();

        let mut seen = Vec::new();
        for id in tree.post_order_ids() {
            let Some(entry) = tree.entry(id) else { continue };
            if entry.kind() == EntryKind::Observation {
                seen.push(entry.name().to_string());
                let _ = tree.delete_observation(id).unwrap();
            }
        }
        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(tree.find(root, "obs"), None);
    }

    #[quickcheck_macros::quickcheck]
    fn source_graph_stays_acyclic(edges: Vec<(u8, u8)>) -> bool {
        let mut tree = Tree::new();
        let root = tree.root();
        let nodes: Vec<EntryId> = (0..8)
            .map(|i| tree.get_resource(root, &format!("n{}", i)).unwrap())
            .collect();

        for (dest, src) in edges {
            let dest = nodes[(dest % 8) as usize];
            let src = nodes[(src % 8) as usize];
            let _ = tree.set_source(dest, Some(src));
        }

        // Following source links from any node must terminate.
        for node in &nodes {
            let mut cursor = *node;
            for step in 0..=nodes.len() {
                match tree.entry(cursor).and_then(|e| e.resource()).and_then(|r| r.source()) {
                    Some(up) => cursor = up,
                    None => break,
                }
                if step == nodes.len() {
                    return false;
                }
            }
        }
        true
    }

    #[test]
    fn parent_links_are_consistent() {
        let mut tree = Tree::new();
        let root = tree.root();
        let _ = tree.get(root, "a/b/c").unwrap();
        let _ = tree.get(root, "a/d").unwrap();

        for id in tree.post_order_ids() {
            let entry = tree.entry(id).unwrap();
            if let Some(parent) = entry.parent() {
                assert!(tree.entry(parent).unwrap().children().contains(&id));
            } else {
                assert_eq!(id, tree.root());
            }
        }
    }
}
