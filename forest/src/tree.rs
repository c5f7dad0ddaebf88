use std::collections::HashMap;

use nalgebra as na;

use crate::{
	ellipse::Ellipse,
	point::{height_key, manhattan_distance, Point},
	point_set::PointSet,
};

pub type NodeId = usize;

/// Cross-section of a trunk.
#[derive(Debug, Clone)]
pub struct Node {
	pub point_set: PointSet,
	/// Centroid of the points, replaced for synthesized or rounded nodes.
	pub center: na::Point3<f64>,
	pub ellipse: Option<Ellipse>,
	parent: Option<NodeId>,
	children: Vec<NodeId>,
}

impl Node {
	fn new(point_set: PointSet) -> Self {
		Self {
			center: point_set.center(),
			point_set,
			ellipse: None,
			parent: None,
			children: Vec::new(),
		}
	}

	pub fn parent(&self) -> Option<NodeId> {
		self.parent
	}

	pub fn children(&self) -> &[NodeId] {
		&self.children
	}

	pub fn is_leaf(&self) -> bool {
		self.children.is_empty()
	}
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ImportError {
	#[error("No root node")]
	MissingRoot,
	#[error("Multiple root nodes")]
	MultipleRoots,
	#[error("Duplicate node id {0}")]
	DuplicateId(i64),
	#[error("Node {id} references unknown parent {parent}")]
	UnknownParent { id: i64, parent: i64 },
	#[error("Nodes not connected to the root")]
	Disconnected,
}

/// Nodes stored in an arena, parents and children refer to each other by index.
///
/// Nodes are never removed, restructuring only moves edges.
#[derive(Debug, Clone)]
pub struct Tree {
	nodes: Vec<Node>,
	root: NodeId,
}

impl Tree {
	pub fn new(root: PointSet) -> Self {
		Self {
			nodes: vec![Node::new(root)],
			root: 0,
		}
	}

	pub fn root(&self) -> NodeId {
		self.root
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn node(&self, id: NodeId) -> &Node {
		&self.nodes[id]
	}

	pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
		&mut self.nodes[id]
	}

	pub fn center(&self, id: NodeId) -> na::Point3<f64> {
		self.nodes[id].center
	}

	pub fn nodes(&self) -> impl Iterator<Item = &Node> {
		self.nodes.iter()
	}

	pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
		self.nodes.iter_mut()
	}

	/// New node without any edges.
	pub fn insert(&mut self, point_set: PointSet) -> NodeId {
		self.nodes.push(Node::new(point_set));
		self.nodes.len() - 1
	}

	/// New node for a single regressed position.
	pub fn insert_point(&mut self, position: na::Point3<f64>) -> NodeId {
		let id = self.insert(PointSet::single(Point::from(position)));
		self.nodes[id].center = position;
		id
	}

	pub fn add_child(&mut self, parent: NodeId, point_set: PointSet) -> NodeId {
		let child = self.insert(point_set);
		self.attach(parent, child);
		child
	}

	pub fn attach(&mut self, parent: NodeId, child: NodeId) {
		assert!(self.nodes[child].parent.is_none(), "node {} already has a parent", child);
		self.nodes[child].parent = Some(parent);
		self.nodes[parent].children.push(child);
	}

	pub fn detach(&mut self, parent: NodeId, child: NodeId) {
		self.nodes[parent].children.retain(|&c| c != child);
		self.nodes[child].parent = None;
	}

	/// Move `child` below `parent`.
	pub fn reparent(&mut self, child: NodeId, parent: NodeId) {
		if let Some(old) = self.nodes[child].parent {
			self.detach(old, child);
		}
		self.attach(parent, child);
	}

	/// Make a detached node the root, the old root becomes its child.
	pub fn set_root(&mut self, id: NodeId) {
		let old = self.root;
		self.root = id;
		self.attach(id, old);
	}

	/// `id` followed by its parent chain up to the root.
	pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
		std::iter::successors(Some(id), |&id| self.nodes[id].parent)
	}

	/// Node ids in pre-order, children in insertion order.
	pub fn preorder(&self) -> Vec<NodeId> {
		let mut order = Vec::with_capacity(self.nodes.len());
		let mut stack = vec![self.root];
		while let Some(id) = stack.pop() {
			order.push(id);
			stack.extend(self.nodes[id].children.iter().rev());
		}
		order
	}

	pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
		self.preorder().into_iter().filter(|&id| self.nodes[id].is_leaf())
	}

	/// Highest leaf, the first one in pre-order on ties.
	pub fn highest_node(&self) -> NodeId {
		let mut highest = self.root;
		for id in self.leaves() {
			if highest == self.root || self.nodes[id].center.z > self.nodes[highest].center.z {
				highest = id;
			}
		}
		highest
	}

	/// Vertical extent between root and the highest node.
	pub fn height(&self) -> f64 {
		self.center(self.highest_node()).z - self.center(self.root).z
	}

	/// Nodes to compare with a group at `height`.
	///
	/// Descending from the root, a node whose first child is aligned with
	/// `height` contributes all its children and a leaf contributes itself.
	pub fn nodes_at_height(&self, height: f64) -> Vec<NodeId> {
		let key = height_key(height);
		let mut found = Vec::new();
		let mut stack = vec![self.root];
		while let Some(id) = stack.pop() {
			let node = &self.nodes[id];
			match node.children.first() {
				Some(&first) if height_key(self.nodes[first].center.z) == key => {
					found.extend_from_slice(&node.children)
				},
				Some(_) => stack.extend(node.children.iter().rev()),
				None => found.push(id),
			}
		}
		found
	}

	/// Closest node one slice below `point`, by planar Manhattan distance.
	///
	/// Candidates more than two units away vertically are ignored.
	pub fn nearest_node(&self, point: &na::Point3<f64>, slice_height: f64) -> Option<(NodeId, f64)> {
		let mut best = None;
		for id in self.nodes_at_height(point.z - slice_height) {
			let center = &self.nodes[id].center;
			if (center.z - point.z).abs() >= 2.0 {
				continue;
			}
			let distance = manhattan_distance(center, point);
			if best.map_or(true, |(_, best)| distance < best) {
				best = Some((id, distance));
			}
		}
		best
	}

	/// Panics when the structure is not a simple rooted tree.
	pub fn validate(&self) {
		assert!(self.nodes[self.root].parent.is_none(), "root has a parent");
		let mut visited = vec![false; self.nodes.len()];
		let mut stack = vec![self.root];
		while let Some(id) = stack.pop() {
			assert!(!visited[id], "node {} reached twice", id);
			visited[id] = true;
			for &child in &self.nodes[id].children {
				assert_eq!(self.nodes[child].parent, Some(id), "parent of {} is inconsistent", child);
				stack.push(child);
			}
		}
		assert!(visited.into_iter().all(|v| v), "tree has unreachable nodes");
	}

	/// Flat pre-order records `(id, parent id, node)`, the root has parent `-1`.
	pub fn to_records(&self) -> Vec<(i64, i64, &Node)> {
		let order = self.preorder();
		let mut ids = vec![0i64; self.nodes.len()];
		for (index, &id) in order.iter().enumerate() {
			ids[id] = index as i64;
		}
		order
			.into_iter()
			.map(|id| {
				let parent = self.nodes[id].parent.map_or(-1, |p| ids[p]);
				(ids[id], parent, &self.nodes[id])
			})
			.collect()
	}

	/// Rebuild a tree from `(id, parent id, points)` records.
	pub fn from_records(records: impl IntoIterator<Item = (i64, i64, PointSet)>) -> Result<Self, ImportError> {
		let mut tree = Self {
			nodes: Vec::new(),
			root: 0,
		};
		let mut lookup = HashMap::new();
		let mut edges = Vec::new();
		let mut root = None;
		for (id, parent, set) in records {
			let node = tree.insert(set);
			if lookup.insert(id, node).is_some() {
				return Err(ImportError::DuplicateId(id));
			}
			if parent < 0 {
				if root.replace(node).is_some() {
					return Err(ImportError::MultipleRoots);
				}
			} else {
				edges.push((id, parent, node));
			}
		}
		tree.root = root.ok_or(ImportError::MissingRoot)?;
		for (id, parent, node) in edges {
			let &parent_node = lookup
				.get(&parent)
				.ok_or(ImportError::UnknownParent { id, parent })?;
			tree.attach(parent_node, node);
		}
		if tree.preorder().len() != tree.len() {
			return Err(ImportError::Disconnected);
		}
		Ok(tree)
	}
}

/// Group annotation carrying the node hierarchy, `Id+3;Parent+1;`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAnnotation {
	pub id: i64,
	pub parent: i64,
}

impl NodeAnnotation {
	pub fn parse(text: &str) -> Option<Self> {
		let mut id = None;
		let mut parent = None;
		for token in text.split(';').map(str::trim).filter(|t| !t.is_empty()) {
			let (key, value) = token.split_once('+')?;
			match key {
				"Id" => id = Some(value.parse().ok()?),
				"Parent" => parent = Some(value.parse().ok()?),
				_ => {},
			}
		}
		Some(Self { id: id?, parent: parent? })
	}
}

impl std::fmt::Display for NodeAnnotation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Id+{};Parent+{};", self.id, self.parent)
	}
}
