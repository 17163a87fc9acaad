use crate::model::bounds::BoundingBox;
use crate::model::point::Point;

/// Stable handle of a node inside a `ChunkOctree`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
	pub fn index(&self) -> usize {
		self.0
	}
}

pub struct OctreeNode {
	/// Octant path from the global root, e.g. `"r0361"`.
	pub name: String,
	pub bounds: BoundingBox,

	/// Points buffered here and not yet sampled.
	pub store: Vec<Point>,
	/// Points accepted into this node by the acceptance pass.
	pub points: Vec<Point>,
	/// Points that arrived at this node or any of its descendants.
	pub num_points: u64,
	pub store_exceeded: bool,

	pub parent: Option<NodeId>,
	pub children: [Option<NodeId>; 8],
}

impl OctreeNode {
	fn new(name: String, bounds: BoundingBox, parent: Option<NodeId>) -> OctreeNode {
		OctreeNode {
			name,
			bounds,
			store: Vec::new(),
			points: Vec::new(),
			num_points: 0,
			store_exceeded: false,
			parent,
			children: [None; 8],
		}
	}

	pub fn level(&self) -> usize {
		self.name.len() - 1
	}

	pub fn is_leaf(&self) -> bool {
		self.children.iter().all(|child| child.is_none())
	}

	pub fn child_mask(&self) -> u8 {
		let mut mask = 0;
		for (i, child) in self.children.iter().enumerate() {
			if child.is_some() {
				mask |= 1 << i;
			}
		}
		mask
	}
}

/// The octree of one chunk, stored as an arena. Node 0 is the chunk root.
pub struct ChunkOctree {
	nodes: Vec<OctreeNode>,
	store_capacity: usize,
	max_depth: usize,
}

impl ChunkOctree {
	pub fn new(name: &str, bounds: BoundingBox, store_capacity: usize, max_depth: usize) -> ChunkOctree {
		ChunkOctree {
			nodes: vec![OctreeNode::new(name.to_string(), bounds, None)],
			store_capacity,
			max_depth,
		}
	}

	pub fn root(&self) -> NodeId {
		NodeId(0)
	}

	pub fn node(&self, id: NodeId) -> &OctreeNode {
		&self.nodes[id.0]
	}

	pub fn node_mut(&mut self, id: NodeId) -> &mut OctreeNode {
		&mut self.nodes[id.0]
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn add(&mut self, point: Point) {
		let root = self.root();
		self.insert_from(root, point);
	}

	fn insert_from(&mut self, start: NodeId, point: Point) {
		let mut current = start;

		loop {
			let store_capacity = self.store_capacity;
			let max_depth = self.max_depth;
			let node = &mut self.nodes[current.0];
			node.num_points += 1;

			if !node.store_exceeded {
				// beyond max_depth a node absorbs everything
				if node.store.len() < store_capacity || node.level() >= max_depth {
					node.store.push(point);
					return;
				}

				self.split(current);
			}

			let index = self.nodes[current.0].bounds.child_index_of(&point.position);
			current = self.child_or_create(current, index);
		}
	}

	/// Moves the buffered points of a full node into its children. Runs once per node.
	fn split(&mut self, id: NodeId) {
		let node = &mut self.nodes[id.0];
		node.store_exceeded = true;
		let store = std::mem::take(&mut node.store);

		for point in store {
			let index = self.nodes[id.0].bounds.child_index_of(&point.position);
			let child = self.child_or_create(id, index);
			self.insert_from(child, point);
		}
	}

	fn child_or_create(&mut self, id: NodeId, index: usize) -> NodeId {
		if let Some(child) = self.nodes[id.0].children[index] {
			return child;
		}

		let parent = &self.nodes[id.0];
		let name = format!("{}{}", parent.name, index);
		let bounds = parent.bounds.child_bounds(index);

		let child = NodeId(self.nodes.len());
		self.nodes.push(OctreeNode::new(name, bounds, Some(id)));
		self.nodes[id.0].children[index] = Some(child);

		child
	}

	/// Parents before children, children in octant order.
	pub fn preorder(&self) -> PreOrder<'_> {
		PreOrder {
			octree: self,
			stack: vec![self.root()],
		}
	}

	/// Children before parents, children in octant order.
	pub fn postorder(&self) -> PostOrder<'_> {
		PostOrder {
			octree: self,
			stack: vec![(self.root(), false)],
		}
	}

	pub fn find(&self, name: &str) -> Option<NodeId> {
		let root = self.node(self.root());
		let suffix = name.strip_prefix(root.name.as_str())?;

		let mut current = self.root();
		for c in suffix.chars() {
			let index = c.to_digit(8)? as usize;
			current = self.node(current).children[index]?;
		}

		Some(current)
	}

	/// Points held anywhere in the tree, buffered or accepted.
	pub fn total_points(&self) -> usize {
		self.nodes
			.iter()
			.map(|node| node.store.len() + node.points.len())
			.sum()
	}

	pub fn depth(&self) -> usize {
		self.nodes.iter().map(|node| node.level()).max().unwrap_or(0)
	}
}

pub struct PreOrder<'a> {
	octree: &'a ChunkOctree,
	stack: Vec<NodeId>,
}

impl<'a> Iterator for PreOrder<'a> {
	type Item = NodeId;

	fn next(&mut self) -> Option<NodeId> {
		let id = self.stack.pop()?;
		let node = self.octree.node(id);
		self.stack.extend(node.children.iter().rev().flatten());
		Some(id)
	}
}

pub struct PostOrder<'a> {
	octree: &'a ChunkOctree,
	// (node, children already pushed)
	stack: Vec<(NodeId, bool)>,
}

impl<'a> Iterator for PostOrder<'a> {
	type Item = NodeId;

	fn next(&mut self) -> Option<NodeId> {
		loop {
			let (id, expanded) = self.stack.pop()?;
			if expanded {
				return Some(id);
			}

			self.stack.push((id, true));
			let node = self.octree.node(id);
			self.stack
				.extend(node.children.iter().rev().flatten().map(|child| (*child, false)));
		}
	}
}
