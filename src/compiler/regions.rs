use std::collections::HashMap;

use cranelift::prelude::{Block, FunctionBuilder, InstBuilder};
use log::trace;

use super::emitter::is_filled;
use crate::model::NodeKey;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegionId(u32);

#[derive(Debug)]
struct RegionData {
    entry: Block,
    tail: Block,
    nodes: Vec<NodeKey>,
    merged_into: Option<RegionId>,
    /// Region whose tail jumped unconditionally into `entry`.
    entered_from: Option<RegionId>,
}

/// Tracks the block chain each compiled node lives in and fuses adjacent chains.
///
/// Merged regions form a union-find forest. A node always resolves to the root of its
/// region, so merging into a region that was itself merged targets the combined one.
#[derive(Debug, Default)]
pub struct RegionManager {
    regions: Vec<RegionData>,
    node_regions: HashMap<NodeKey, RegionId>,
    current: Option<RegionId>,
    created: usize,
    merged: usize,
}

impl RegionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follows merge links to the surviving region.
    pub fn resolve(&self, mut region: RegionId) -> RegionId {
        while let Some(parent) = self.regions[region.0 as usize].merged_into {
            region = parent;
        }
        region
    }

    pub fn region_of(&self, node: NodeKey) -> Option<RegionId> {
        self.node_regions.get(&node).map(|r| self.resolve(*r))
    }

    pub fn current_region(&self) -> Option<RegionId> {
        self.current.map(|r| self.resolve(r))
    }

    /// Nodes attributed to `region` and everything merged into it.
    pub fn nodes_in(&self, region: RegionId) -> &[NodeKey] {
        &self.regions[self.resolve(region).0 as usize].nodes
    }

    pub fn entry_block(&self, region: RegionId) -> Block {
        self.regions[self.resolve(region).0 as usize].entry
    }

    /// Starts a fresh block for `node`, falling through from the current block if it is
    /// still open.
    pub fn new_node_region(&mut self, node: NodeKey, builder: &mut FunctionBuilder) -> RegionId {
        let block = builder.create_block();
        let entered_from = if !is_filled(builder) {
            builder.ins().jump(block, &[]);
            self.current_region()
        } else {
            None
        };
        builder.switch_to_block(block);

        let id = RegionId(self.regions.len() as u32);
        self.regions.push(RegionData {
            entry: block,
            tail: block,
            nodes: vec![node],
            merged_into: None,
            entered_from,
        });
        self.node_regions.insert(node, id);
        self.current = Some(id);
        self.created += 1;
        trace!("region {id:?} created for {node:?}, entered from {entered_from:?}");
        id
    }

    /// Places `node` in its parent's region when the node reads from exactly one parent.
    pub fn try_merge_node_region(
        &mut self,
        node: NodeKey,
        parents: &[NodeKey],
        builder: &FunctionBuilder,
    ) -> bool {
        match parents {
            [parent] => self.try_merge_node_regions(*parent, node, builder),
            _ => false,
        }
    }

    /// Fuses `src`'s region into `dest`'s.
    ///
    /// An unplaced `src` joins `dest` only if code is currently being emitted at the
    /// open tail of `dest`'s region. A placed `src` joins only if its region was entered
    /// straight from `dest`'s tail, so the two chains are already adjacent.
    pub fn try_merge_node_regions(
        &mut self,
        dest: NodeKey,
        src: NodeKey,
        builder: &FunctionBuilder,
    ) -> bool {
        let Some(dest_root) = self.region_of(dest) else {
            return false;
        };

        match self.region_of(src) {
            Some(src_root) if src_root == dest_root => true,
            Some(src_root) => {
                let adjacent = self.regions[src_root.0 as usize]
                    .entered_from
                    .map(|r| self.resolve(r))
                    == Some(dest_root);
                if !adjacent {
                    return false;
                }

                let src_data = &mut self.regions[src_root.0 as usize];
                src_data.merged_into = Some(dest_root);
                let tail = src_data.tail;
                let nodes = std::mem::take(&mut src_data.nodes);

                let dest_data = &mut self.regions[dest_root.0 as usize];
                dest_data.tail = tail;
                dest_data.nodes.extend(nodes);
                self.merged += 1;
                trace!("region {src_root:?} merged into {dest_root:?}");
                true
            }
            None => {
                let tail = self.regions[dest_root.0 as usize].tail;
                let at_tail = self.current_region() == Some(dest_root)
                    && builder.current_block() == Some(tail)
                    && !is_filled(builder);
                if !at_tail {
                    return false;
                }

                self.regions[dest_root.0 as usize].nodes.push(src);
                self.node_regions.insert(src, dest_root);
                self.merged += 1;
                trace!("{src:?} merged into region {dest_root:?}");
                true
            }
        }
    }

    /// Records where `node`'s code ended, which becomes the tail of its region.
    pub fn close_node(&mut self, node: NodeKey, builder: &FunctionBuilder) {
        if let (Some(region), Some(block)) = (self.region_of(node), builder.current_block()) {
            self.regions[region.0 as usize].tail = block;
            self.current = Some(region);
        }
    }

    pub fn regions_created(&self) -> usize {
        self.created
    }

    pub fn regions_merged(&self) -> usize {
        self.merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift::codegen::ir::{Function, UserFuncName};
    use cranelift::prelude::{isa::CallConv, FunctionBuilderContext, Signature};
    use slotmap::SlotMap;

    fn nodes(n: usize) -> Vec<NodeKey> {
        let mut map = SlotMap::<NodeKey, ()>::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn with_builder(f: impl FnOnce(&mut FunctionBuilder)) {
        let mut func = Function::with_name_signature(
            UserFuncName::user(0, 0),
            Signature::new(CallConv::SystemV),
        );
        let mut ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut func, &mut ctx);
        let entry = builder.create_block();
        builder.switch_to_block(entry);
        f(&mut builder);
    }

    #[test]
    fn test_new_region_per_node() {
        let keys = nodes(2);
        with_builder(|builder| {
            let mut regions = RegionManager::new();
            let a = regions.new_node_region(keys[0], builder);
            let b = regions.new_node_region(keys[1], builder);
            assert_ne!(a, b);
            assert_eq!(regions.region_of(keys[1]), Some(b));
            assert_eq!(regions.current_region(), Some(b));
            assert_eq!(regions.regions_created(), 2);
        });
    }

    #[test]
    fn test_single_parent_merge() {
        let keys = nodes(3);
        with_builder(|builder| {
            let mut regions = RegionManager::new();
            let a = regions.new_node_region(keys[0], builder);
            regions.close_node(keys[0], builder);

            assert!(regions.try_merge_node_region(keys[1], &[keys[0]], builder));
            assert_eq!(regions.region_of(keys[1]), Some(a));

            // Two parents never merge.
            assert!(!regions.try_merge_node_region(keys[2], &[keys[0], keys[1]], builder));
            assert_eq!(regions.region_of(keys[2]), None);
        });
    }

    #[test]
    fn test_merge_requires_current_region() {
        let keys = nodes(3);
        with_builder(|builder| {
            let mut regions = RegionManager::new();
            regions.new_node_region(keys[0], builder);
            regions.close_node(keys[0], builder);
            regions.new_node_region(keys[1], builder);
            regions.close_node(keys[1], builder);

            // keys[0]'s region is no longer where code is emitted.
            assert!(!regions.try_merge_node_region(keys[2], &[keys[0]], builder));
        });
    }

    #[test]
    fn test_merge_is_transitive() {
        let keys = nodes(4);
        with_builder(|builder| {
            let mut regions = RegionManager::new();
            let a = regions.new_node_region(keys[0], builder);
            regions.close_node(keys[0], builder);
            assert!(regions.try_merge_node_region(keys[1], &[keys[0]], builder));
            regions.close_node(keys[1], builder);

            regions.new_node_region(keys[2], builder);
            regions.close_node(keys[2], builder);
            assert!(regions.try_merge_node_regions(keys[1], keys[2], builder));
            assert_eq!(regions.region_of(keys[2]), Some(a));

            // Targeting the merged node is the same as targeting the merged region.
            assert!(regions.try_merge_node_regions(keys[2], keys[3], builder));
            assert_eq!(regions.region_of(keys[3]), Some(a));
            assert_eq!(regions.nodes_in(a), &keys[..]);
            assert!(regions.try_merge_node_regions(keys[0], keys[3], builder));
            assert_eq!(regions.regions_merged(), 3);
        });
    }

    #[test]
    fn test_non_adjacent_regions_do_not_merge() {
        let keys = nodes(3);
        with_builder(|builder| {
            let mut regions = RegionManager::new();
            regions.new_node_region(keys[0], builder);
            regions.close_node(keys[0], builder);
            regions.new_node_region(keys[1], builder);
            regions.close_node(keys[1], builder);
            regions.new_node_region(keys[2], builder);
            regions.close_node(keys[2], builder);

            assert!(!regions.try_merge_node_regions(keys[0], keys[2], builder));
            assert_ne!(regions.region_of(keys[0]), regions.region_of(keys[2]));
        });
    }

    #[test]
    fn test_unknown_destination() {
        let keys = nodes(2);
        with_builder(|builder| {
            let mut regions = RegionManager::new();
            assert!(!regions.try_merge_node_regions(keys[0], keys[1], builder));
        });
    }

    #[test]
    fn test_region_after_terminator_is_not_entered() {
        let keys = nodes(2);
        with_builder(|builder| {
            let mut regions = RegionManager::new();
            regions.new_node_region(keys[0], builder);
            builder.ins().return_(&[]);
            regions.new_node_region(keys[1], builder);
            regions.close_node(keys[1], builder);

            assert!(!regions.try_merge_node_regions(keys[0], keys[1], builder));
        });
    }
}
