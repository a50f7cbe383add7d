//! Child reconciliation: diffing a fiber's old children against new
//! descriptors.
//!
//! Two phases. A positional walk reuses fibers while keys line up, which
//! covers the overwhelmingly common no-reorder case without building a map.
//! On the first mismatch the remaining old children go into a key map and
//! the remaining descriptors pull from it; reused fibers whose old position
//! is left of the last placed one are flagged for placement, and whatever
//! the map still holds at the end is deleted.
//!
//! When reconciling against a freshly mounted subtree (`current` absent)
//! no effects are tracked; the subtree's root placement covers the lot.

use crate::element::Element;
use crate::fiber::{FiberFlags, FiberId, FiberMode};
use crate::host::HostConfig;
use crate::reconciler::Reconciler;
use rustc_hash::FxHashMap;
use std::rc::Rc;

#[derive(PartialEq, Eq, Hash)]
enum MapKey {
    Key(Rc<str>),
    Index(u32),
}

impl<H: HostConfig> Reconciler<H> {
    /// Diff `new_children` against the sibling chain starting at
    /// `current_first_child` and install the result as `wip`'s children.
    pub(crate) fn reconcile_child_fibers(
        &mut self,
        wip: FiberId,
        current_first_child: Option<FiberId>,
        new_children: &[Element],
        track_effects: bool,
    ) {
        let mode = self.fibers[wip].mode;
        let mut old_fiber = current_first_child;
        let mut first_new: Option<FiberId> = None;
        let mut previous_new: Option<FiberId> = None;
        let mut last_placed_index: u32 = 0;
        let mut new_index: usize = 0;

        // Phase 1: positions line up until proven otherwise.
        while let Some(old) = old_fiber {
            if new_index >= new_children.len() {
                break;
            }
            let next_old = self.fibers[old].sibling;
            let Some(new_fiber) =
                self.update_slot(old, &new_children[new_index], mode)
            else {
                break;
            };
            if track_effects && self.fibers[new_fiber].alternate.is_none() {
                // Same key, incompatible type: the old fiber dies here.
                self.delete_child(wip, old);
            }
            last_placed_index =
                self.place_child(new_fiber, last_placed_index, new_index as u32, track_effects);
            self.link_child(wip, &mut first_new, &mut previous_new, new_fiber);
            old_fiber = next_old;
            new_index += 1;
        }

        if new_index == new_children.len() {
            // Descriptors exhausted; everything left over is deleted.
            if track_effects {
                let mut cursor = old_fiber;
                while let Some(old) = cursor {
                    cursor = self.fibers[old].sibling;
                    self.delete_child(wip, old);
                }
            }
            self.fibers[wip].child = first_new;
            return;
        }

        if old_fiber.is_none() {
            // Old children exhausted; the rest are plain insertions.
            while new_index < new_children.len() {
                let new_fiber = self.create_fiber_for(&new_children[new_index], mode);
                last_placed_index =
                    self.place_child(new_fiber, last_placed_index, new_index as u32, track_effects);
                self.link_child(wip, &mut first_new, &mut previous_new, new_fiber);
                new_index += 1;
            }
            self.fibers[wip].child = first_new;
            return;
        }

        // Phase 2: order changed. Index the remaining old children.
        let mut existing: FxHashMap<MapKey, FiberId> = FxHashMap::default();
        {
            let mut cursor = old_fiber;
            while let Some(old) = cursor {
                let fiber = &self.fibers[old];
                let map_key = match &fiber.key {
                    Some(key) => MapKey::Key(key.clone()),
                    None => MapKey::Index(fiber.index),
                };
                existing.insert(map_key, old);
                cursor = fiber.sibling;
            }
        }

        while new_index < new_children.len() {
            let element = &new_children[new_index];
            let map_key = match &element.key {
                Some(key) => MapKey::Key(key.clone()),
                None => MapKey::Index(new_index as u32),
            };
            let new_fiber = match existing.get(&map_key).copied() {
                Some(old) if self.kind_matches_fiber(old, element) => {
                    existing.remove(&map_key);
                    self.reuse_fiber(old, element)
                }
                Some(old) => {
                    // Key match, type change: replace in place.
                    existing.remove(&map_key);
                    if track_effects {
                        self.delete_child(wip, old);
                    }
                    self.create_fiber_for(element, mode)
                }
                None => self.create_fiber_for(element, mode),
            };
            last_placed_index =
                self.place_child(new_fiber, last_placed_index, new_index as u32, track_effects);
            self.link_child(wip, &mut first_new, &mut previous_new, new_fiber);
            new_index += 1;
        }

        if track_effects {
            let leftovers: Vec<FiberId> = existing.into_values().collect();
            for old in leftovers {
                self.delete_child(wip, old);
            }
        }

        self.fibers[wip].child = first_new;
    }

    /// Positional match: reuse the old fiber if key and kind agree, replace
    /// if only the key agrees, bail to the map phase otherwise.
    fn update_slot(&mut self, old: FiberId, element: &Element, mode: FiberMode) -> Option<FiberId> {
        let keys_match = self.fibers[old].key == element.key;
        if !keys_match {
            return None;
        }
        if self.kind_matches_fiber(old, element) {
            Some(self.reuse_fiber(old, element))
        } else {
            Some(self.create_fiber_for(element, mode))
        }
    }

    fn kind_matches_fiber(&self, old: FiberId, element: &Element) -> bool {
        let fiber = &self.fibers[old];
        match &fiber.element_type {
            Some(kind) => kind.matches(&element.kind),
            // Fibers created internally (offscreen, fallback fragments)
            // match on tag alone.
            None => fiber.tag == crate::fiber::tag_for_kind(&element.kind),
        }
    }

    fn reuse_fiber(&mut self, old: FiberId, element: &Element) -> FiberId {
        let new_fiber = self
            .fibers
            .create_work_in_progress(old, element.props.clone());
        let fiber = &mut self.fibers[new_fiber];
        // Value-bearing kinds (provider values, offscreen visibility,
        // suspense fallbacks) refresh from the new descriptor.
        fiber.element_type = Some(element.kind.clone());
        fiber.ref_ = element.ref_.clone();
        fiber.sibling = None;
        new_fiber
    }

    fn create_fiber_for(&mut self, element: &Element, mode: FiberMode) -> FiberId {
        let id = self.fibers.create_fiber_from_element(element, mode);
        self.wip_created_fibers.push(id);
        id
    }

    fn place_child(
        &mut self,
        new_fiber: FiberId,
        last_placed_index: u32,
        new_index: u32,
        track_effects: bool,
    ) -> u32 {
        self.fibers[new_fiber].index = new_index;
        if !track_effects {
            return last_placed_index;
        }
        match self.fibers[new_fiber].alternate {
            Some(current) => {
                let old_index = self.fibers[current].index;
                if old_index < last_placed_index {
                    // Moved right relative to a kept sibling.
                    self.fibers[new_fiber].flags |= FiberFlags::PLACEMENT;
                    last_placed_index
                } else {
                    old_index
                }
            }
            None => {
                self.fibers[new_fiber].flags |= FiberFlags::PLACEMENT;
                last_placed_index
            }
        }
    }

    fn link_child(
        &mut self,
        wip: FiberId,
        first: &mut Option<FiberId>,
        previous: &mut Option<FiberId>,
        new_fiber: FiberId,
    ) {
        self.fibers[new_fiber].parent = Some(wip);
        match previous {
            None => *first = Some(new_fiber),
            Some(prev) => self.fibers[*prev].sibling = Some(new_fiber),
        }
        *previous = Some(new_fiber);
    }

    pub(crate) fn delete_child(&mut self, wip: FiberId, child: FiberId) {
        log::trace!("deleting child {:?} under {:?}", child, wip);
        let fiber = &mut self.fibers[wip];
        fiber.deletions.push(child);
        fiber.flags |= FiberFlags::CHILD_DELETION;
    }

    /// Bailout path: carry the current children over into the new pass
    /// without touching user code.
    pub(crate) fn clone_child_fibers(&mut self, wip: FiberId) {
        let Some(current_child) = self.fibers[wip].child else {
            return;
        };
        // After create_work_in_progress the wip's child link still points
        // into the current tree; clone each child into the other buffer.
        let mut new_child = {
            let props = self.fibers[current_child].pending_props.clone();
            self.fibers.create_work_in_progress(current_child, props)
        };
        self.fibers[wip].child = Some(new_child);
        self.fibers[new_child].parent = Some(wip);

        loop {
            let sibling = self.fibers[new_child].sibling;
            // create_work_in_progress copied the current-side sibling link;
            // rewrite it to the cloned twin.
            let Some(current_sibling) = sibling else { break };
            let cloned = {
                let props = self.fibers[current_sibling].pending_props.clone();
                self.fibers.create_work_in_progress(current_sibling, props)
            };
            self.fibers[new_child].sibling = Some(cloned);
            self.fibers[cloned].parent = Some(wip);
            new_child = cloned;
        }
    }
}

#[cfg(test)]
mod tests;
