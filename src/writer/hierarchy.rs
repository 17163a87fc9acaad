use std::collections::HashMap;

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{ConverterError, Result};
use crate::model::bounds::octant_path;

/// byteOffset u64, byteSize u64, childPosition u64, childMask u8, 7 bytes padding.
pub const RECORD_SIZE: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
	/// Known from the tree structure, payload not written yet.
	Pending,
	/// Offset and size are final.
	Written,
}

#[derive(Clone, Debug)]
pub struct GlobalNode {
	pub name: String,
	pub parent: Option<usize>,
	pub children: [Option<usize>; 8],

	pub num_points: u64,
	pub byte_offset: u64,
	pub byte_size: u64,
	pub state: NodeState,
}

impl GlobalNode {
	fn new(name: String, parent: Option<usize>) -> GlobalNode {
		GlobalNode {
			name,
			parent,
			children: [None; 8],
			num_points: 0,
			byte_offset: 0,
			byte_size: 0,
			state: NodeState::Pending,
		}
	}

	pub fn level(&self) -> usize {
		self.name.len() - 1
	}

	pub fn child_mask(&self) -> u8 {
		self.children
			.iter()
			.enumerate()
			.filter(|(_, child)| child.is_some())
			.fold(0, |mask, (i, _)| mask | (1 << i))
	}
}

/// Every node of the final octree, chunk subtrees and the levels above them.
pub struct GlobalHierarchy {
	nodes: Vec<GlobalNode>,
	by_name: HashMap<String, usize>,
}

impl Default for GlobalHierarchy {
	fn default() -> Self {
		GlobalHierarchy::new()
	}
}

impl GlobalHierarchy {
	pub fn new() -> GlobalHierarchy {
		let mut by_name = HashMap::new();
		by_name.insert("r".to_string(), 0);

		GlobalHierarchy {
			nodes: vec![GlobalNode::new("r".to_string(), None)],
			by_name,
		}
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn node(&self, index: usize) -> &GlobalNode {
		&self.nodes[index]
	}

	pub fn get(&self, name: &str) -> Option<&GlobalNode> {
		self.by_name.get(name).map(|index| &self.nodes[*index])
	}

	pub fn index_of(&self, name: &str) -> Option<usize> {
		self.by_name.get(name).copied()
	}

	pub fn depth(&self) -> usize {
		self.nodes.iter().map(|node| node.level()).max().unwrap_or(0)
	}

	/// Index of the node called `name`, creating it and any missing ancestor.
	pub fn find_or_create(&mut self, name: &str) -> Result<usize> {
		if let Some(index) = self.by_name.get(name) {
			return Ok(*index);
		}

		let path = octant_path(name)?;
		let mut current = 0;
		let mut current_name = "r".to_string();
		for octant in path {
			current_name.push_str(&octant.to_string());

			current = match self.nodes[current].children[octant] {
				Some(child) => child,
				None => {
					let child = self.nodes.len();
					self.nodes.push(GlobalNode::new(current_name.clone(), Some(current)));
					self.nodes[current].children[octant] = Some(child);
					self.by_name.insert(current_name.clone(), child);
					child
				}
			};
		}

		Ok(current)
	}

	/// Fixes the payload location of a node. A node is written exactly once.
	pub fn assign(&mut self, index: usize, byte_offset: u64, byte_size: u64, num_points: u64) -> Result<()> {
		let node = &mut self.nodes[index];
		if node.state == NodeState::Written {
			return Err(ConverterError::DuplicateNode(node.name.clone()));
		}

		node.byte_offset = byte_offset;
		node.byte_size = byte_size;
		node.num_points = num_points;
		node.state = NodeState::Written;

		Ok(())
	}

	pub fn pending(&self) -> Vec<&str> {
		self.nodes
			.iter()
			.filter(|node| node.state == NodeState::Pending)
			.map(|node| node.name.as_str())
			.collect()
	}

	pub fn total_points(&self) -> u64 {
		self.nodes.iter().map(|node| node.num_points).sum()
	}

	/// Children before parents, children in octant order.
	pub fn postorder(&self) -> Vec<usize> {
		let mut order = Vec::with_capacity(self.nodes.len());
		let mut stack = vec![(0, false)];

		while let Some((index, expanded)) = stack.pop() {
			if expanded {
				order.push(index);
				continue;
			}

			stack.push((index, true));
			for child in self.nodes[index].children.iter().rev().flatten() {
				stack.push((*child, false));
			}
		}

		order
	}

	/// Shallower levels first, octant order within a level.
	pub fn breadth_first(&self) -> Vec<usize> {
		let mut order: Vec<usize> = (0..self.nodes.len()).collect();
		order.sort_by(|a, b| {
			let a = &self.nodes[*a].name;
			let b = &self.nodes[*b].name;
			a.len().cmp(&b.len()).then_with(|| a.cmp(b))
		});
		order
	}

	/// `hierarchy.bin`: one record per node in breadth-first order. A node's
	/// children are contiguous, `childPosition` is the record of the first one.
	pub fn encode(&self) -> Result<Vec<u8>> {
		let order = self.breadth_first();

		let mut position = vec![0u64; self.nodes.len()];
		for (i, index) in order.iter().enumerate() {
			position[*index] = i as u64;
		}

		let mut buffer = Vec::with_capacity(order.len() * RECORD_SIZE);
		for index in &order {
			let node = &self.nodes[*index];
			let child_position = node
				.children
				.iter()
				.flatten()
				.next()
				.map_or(0, |child| position[*child]);

			buffer.write_u64::<LittleEndian>(node.byte_offset)?;
			buffer.write_u64::<LittleEndian>(node.byte_size)?;
			buffer.write_u64::<LittleEndian>(child_position)?;
			buffer.write_u8(node.child_mask())?;
			buffer.extend_from_slice(&[0u8; 7]);
		}

		Ok(buffer)
	}

	pub fn to_json(&self) -> JsonNode {
		let mut built: HashMap<usize, JsonNode> = HashMap::new();

		for index in self.postorder() {
			let node = &self.nodes[index];
			let children = node
				.children
				.iter()
				.flatten()
				.filter_map(|child| built.remove(child))
				.collect();

			built.insert(
				index,
				JsonNode {
					name: node.name.clone(),
					num_points: node.num_points,
					byte_offset: node.byte_offset,
					byte_size: node.byte_size,
					children,
				},
			);
		}

		built.remove(&0).unwrap_or_else(|| JsonNode {
			name: "r".to_string(),
			num_points: 0,
			byte_offset: 0,
			byte_size: 0,
			children: Vec::new(),
		})
	}
}

/// Node of the `hierarchy.json` mirror.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JsonNode {
	pub name: String,
	pub num_points: u64,
	pub byte_offset: u64,
	pub byte_size: u64,
	#[serde(default)]
	pub children: Vec<JsonNode>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use byteorder::ReadBytesExt;
	use std::io::Cursor;

	fn sample_hierarchy() -> GlobalHierarchy {
		let mut hierarchy = GlobalHierarchy::new();
		for name in ["r07", "r00", "r3", "r071"] {
			hierarchy.find_or_create(name).unwrap();
		}
		hierarchy
	}

	#[test]
	fn creates_missing_ancestors() {
		let hierarchy = sample_hierarchy();
		let names: Vec<&str> = hierarchy
			.breadth_first()
			.into_iter()
			.map(|i| hierarchy.node(i).name.as_str())
			.collect();

		assert_eq!(names, vec!["r", "r0", "r3", "r00", "r07", "r071"]);
		assert_eq!(hierarchy.depth(), 3);
		assert_eq!(hierarchy.get("r0").unwrap().child_mask(), 0b1000_0001);
		assert!(hierarchy.get("r1").is_none());
	}

	#[test]
	fn rejects_invalid_names() {
		let mut hierarchy = GlobalHierarchy::new();
		assert!(hierarchy.find_or_create("x0").is_err());
		assert!(hierarchy.find_or_create("r8").is_err());
	}

	#[test]
	fn nodes_are_written_once() {
		let mut hierarchy = sample_hierarchy();
		let index = hierarchy.index_of("r3").unwrap();

		hierarchy.assign(index, 0, 30, 2).unwrap();
		assert!(matches!(
			hierarchy.assign(index, 30, 30, 2),
			Err(ConverterError::DuplicateNode(name)) if name == "r3"
		));
		assert!(!hierarchy.pending().contains(&"r3"));
	}

	#[test]
	fn postorder_visits_children_first() {
		let hierarchy = sample_hierarchy();
		let names: Vec<&str> = hierarchy
			.postorder()
			.into_iter()
			.map(|i| hierarchy.node(i).name.as_str())
			.collect();

		assert_eq!(names, vec!["r00", "r071", "r07", "r0", "r3", "r"]);
	}

	#[test]
	fn encodes_fixed_size_records() {
		let mut hierarchy = sample_hierarchy();
		for (offset, name) in ["r", "r0", "r3", "r00", "r07", "r071"].iter().enumerate() {
			let index = hierarchy.index_of(name).unwrap();
			hierarchy.assign(index, offset as u64 * 100, 10, 1).unwrap();
		}

		let buffer = hierarchy.encode().unwrap();
		assert_eq!(buffer.len(), 6 * RECORD_SIZE);

		let mut records = Vec::new();
		let mut cursor = Cursor::new(&buffer);
		for _ in 0..6 {
			let offset = cursor.read_u64::<LittleEndian>().unwrap();
			let size = cursor.read_u64::<LittleEndian>().unwrap();
			let child_position = cursor.read_u64::<LittleEndian>().unwrap();
			let mask = cursor.read_u8().unwrap();
			cursor.set_position(cursor.position() + 7);
			records.push((offset, size, child_position, mask));
		}

		// r -> r0 at 1, r0 -> r00 at 3, r07 -> r071 at 5
		assert_eq!(records[0], (0, 10, 1, 0b0000_1001));
		assert_eq!(records[1], (100, 10, 3, 0b1000_0001));
		assert_eq!(records[2], (200, 10, 0, 0));
		assert_eq!(records[4], (400, 10, 5, 0b0000_0010));
		assert_eq!(records[5].2, 0);
	}

	#[test]
	fn json_mirror_nests_children() {
		let hierarchy = sample_hierarchy();
		let json = hierarchy.to_json();

		assert_eq!(json.name, "r");
		assert_eq!(json.children.len(), 2);
		assert_eq!(json.children[0].name, "r0");
		assert_eq!(json.children[0].children[1].children[0].name, "r071");

		let text = serde_json::to_string(&json).unwrap();
		assert!(text.contains("\"numPoints\""));

		let leaf = &json.children[0].children[1].children[0];
		let leaf_text = serde_json::to_value(leaf).unwrap();
		assert_eq!(leaf_text["children"], serde_json::json!([]));

		let parsed: JsonNode = serde_json::from_str(&text).unwrap();
		assert_eq!(parsed, json);
	}
}
