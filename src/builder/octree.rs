//! Adaptive octree construction. The tree is refined where the model's
//! density contrast criterion fires, down to the configured maximum level,
//! and every node is either a leaf or has exactly 8 children produced by
//! bisecting the bounding box through its center. The whole tree is
//! materialized before serialization so parent bounds stay available while
//! the children are laid out.

use crate::builder::{BuildContext, GridBuilder};
use crate::config::GridConfig;
use crate::error::Result;
use crate::grid::{
    write_cell, write_marker, CellValues, Extent, GridHeader, GridKind, BRANCH_MARKER, LEAF_MARKER,
    FORMAT_VERSION,
};
use crate::model::QuantityModel;
use crate::normalize::{MassAccumulator, RelativeDensityFactor};
use crate::util::RangeExt;
use crate::Vec3;
use std::io::Write;
use std::ops::Range;

/// A single octree node. Children are owned; a node has 0 or 8, never a
/// partial set. Leaf records are filled during the build pass.
pub struct Node {
    pub bounds: Range<Vec3>,
    pub depth: u32,
    pub values: CellValues,
    pub children: Option<Box<[Node; 8]>>,
}

impl Node {
    fn new(bounds: Range<Vec3>, depth: u32) -> Self {
        Node {
            bounds,
            depth,
            values: CellValues::new(),
            children: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn leaf_count(&self) -> usize {
        match &self.children {
            None => 1,
            Some(children) => children.iter().map(Node::leaf_count).sum(),
        }
    }
}

pub struct OctreeBuilder<'a> {
    ctx: BuildContext<'a>,
}

impl<'a> OctreeBuilder<'a> {
    pub fn new(
        model: &'a dyn QuantityModel,
        cfg: &'a GridConfig,
        factors: Option<RelativeDensityFactor>,
    ) -> Self {
        OctreeBuilder {
            ctx: BuildContext::new(model, cfg, factors),
        }
    }

    /// Build the subtree below `node`: subdivide while the model's refinement
    /// criterion fires and the maximum level is not reached, otherwise sample
    /// the cell at its center.
    fn grow(&self, node: &mut Node, acc: &mut MassAccumulator) {
        if node.depth < self.ctx.cfg.max_tree_level && self.ctx.model.refine(&node.bounds) {
            let octants = node.bounds.octants();
            let mut children = Box::new(octants.map(|b| Node::new(b, node.depth + 1)));
            for child in children.iter_mut() {
                self.grow(child, acc);
            }
            node.children = Some(children);
        } else {
            node.values = self
                .ctx
                .sample_cell(&node.bounds.center(), node.bounds.volume(), acc);
        }
    }

    fn write_node<W: Write>(w: &mut W, node: &Node) -> Result<()> {
        match &node.children {
            Some(children) => {
                write_marker(w, BRANCH_MARKER)?;
                for child in children.iter() {
                    Self::write_node(w, child)?;
                }
            }
            None => {
                write_marker(w, LEAF_MARKER)?;
                write_cell(w, &node.values)?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn grow_tree(&self, mut root: Node) -> (Node, MassAccumulator) {
        let mut acc = self.ctx.accumulator();
        self.grow(&mut root, &mut acc);
        (root, acc)
    }
}

impl GridBuilder for OctreeBuilder<'_> {
    type Root = Node;

    fn kind(&self) -> GridKind {
        GridKind::Octree
    }

    fn init_root(&self) -> Result<Node> {
        let cfg = self.ctx.cfg;
        let sidelength = cfg.require(cfg.sidelength, "sidelength")?;
        let half = Vec3::from_element(0.5 * sidelength);
        Ok(Node::new(-half..half, 0))
    }

    fn header(&self, root: &Node) -> GridHeader {
        GridHeader {
            version: FORMAT_VERSION,
            kind: GridKind::Octree,
            extent: Extent::Cube {
                sidelength: root.bounds.size().x,
                max_level: self.ctx.cfg.max_tree_level,
            },
            quantities: self.ctx.quantities.clone(),
        }
    }

    fn create_grid<W: Write>(&self, w: &mut W, mut root: Node) -> Result<MassAccumulator> {
        let mut acc = self.ctx.accumulator();
        self.grow(&mut root, &mut acc);
        Self::write_node(w, &root)?;
        Ok(acc)
    }
}
