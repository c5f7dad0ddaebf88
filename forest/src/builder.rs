use nalgebra as na;

use crate::{
	point::planar_distance_squared,
	point_set::PointSet,
	regression::Centerline,
	tree::{NodeId, Tree},
};

/// Tuning for assigning groups to trees.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MergingParameters {
	pub slice_height: f64,
	/// Ancestors required for a regression match.
	pub minimum_regression_nodes: usize,
	/// Vertical look-back window for a regression match.
	pub regression_distance: f64,
	/// Planar Manhattan distance below which the nearest node is accepted.
	pub minimum_grouping_distance: f64,
	/// Squared planar distance below which a regressed position is accepted.
	pub minimum_regression_grouping_distance: f64,
	/// Largest vertical gap bridged by any match.
	pub maximum_grouping_empty_height: f64,
	/// Unmatched groups with fewer points are noise.
	pub minimum_root_points: usize,
	/// Unmatched groups at or above this height are noise.
	pub maximum_root_height: f64,
}

impl Default for MergingParameters {
	fn default() -> Self {
		Self {
			slice_height: 0.1,
			minimum_regression_nodes: 5,
			regression_distance: 1.0,
			minimum_grouping_distance: 0.35,
			minimum_regression_grouping_distance: 0.09,
			maximum_grouping_empty_height: 20.0,
			minimum_root_points: 20,
			maximum_root_height: 12.0,
		}
	}
}

/// What happened to a group handed to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
	Discarded,
	NewTree { tree: usize },
	Child { tree: usize, node: NodeId },
	Spliced { tree: usize, node: NodeId },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BuildStatistics {
	pub discarded: usize,
	pub new_trees: usize,
	pub children: usize,
	pub spliced: usize,
}

impl BuildStatistics {
	pub fn total(&self) -> usize {
		self.discarded + self.new_trees + self.children + self.spliced
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Match {
	tree: usize,
	node: NodeId,
}

/// Whether the trunk below `node` extrapolates onto `target`.
///
/// The centers of `node` and its ancestors within the regression distance
/// are fit by a line over height and evaluated at the target height.
pub fn points_out_to(tree: &Tree, node: NodeId, target: &na::Point3<f64>, parameters: &MergingParameters) -> bool {
	let height = tree.center(node).z;
	if target.z - height >= parameters.maximum_grouping_empty_height {
		return false;
	}

	let samples = tree
		.ancestors(node)
		.map(|id| tree.center(id))
		.take_while(|center| height - center.z < parameters.regression_distance)
		.collect::<Vec<_>>();
	if samples.len() < parameters.minimum_regression_nodes {
		return false;
	}

	let predicted = Centerline::fit(&samples).at(target.z);
	planar_distance_squared(&predicted, target) < parameters.minimum_regression_grouping_distance
}

/// Incrementally grows a forest from groups ordered by ascending height.
pub struct TreeBuilder {
	trees: Vec<Tree>,
	parameters: MergingParameters,
	statistics: BuildStatistics,
}

impl TreeBuilder {
	pub fn new(parameters: MergingParameters) -> Self {
		Self {
			trees: Vec::new(),
			parameters,
			statistics: BuildStatistics::default(),
		}
	}

	pub fn trees(&self) -> &[Tree] {
		&self.trees
	}

	pub fn statistics(&self) -> BuildStatistics {
		self.statistics
	}

	/// A regression match in any tree ends the search immediately, otherwise
	/// the nearest acceptable node over all trees wins.
	fn find_best_node(&self, center: &na::Point3<f64>) -> Option<Match> {
		let parameters = &self.parameters;
		let mut best = None;
		let mut best_distance = f64::MAX;

		for (index, tree) in self.trees.iter().enumerate() {
			for node in tree.nodes_at_height(center.z) {
				if points_out_to(tree, node, center, parameters) {
					return Some(Match { tree: index, node });
				}
			}

			let Some((node, distance)) = tree.nearest_node(center, parameters.slice_height) else {
				continue;
			};
			let gap = center.z - tree.center(node).z;
			if distance >= parameters.minimum_grouping_distance
				|| distance >= best_distance
				|| gap >= parameters.maximum_grouping_empty_height
				|| gap <= 0.0
			{
				continue;
			}
			best_distance = distance;
			best = Some(Match { tree: index, node });
		}
		best
	}

	pub fn add_group(&mut self, group: PointSet) -> Placement {
		let center = group.center();
		let placement = match self.find_best_node(&center) {
			None => {
				if group.len() < self.parameters.minimum_root_points
					|| center.z >= self.parameters.maximum_root_height
				{
					log::trace!("discarded group of {} points at {:.2}", group.len(), center.z);
					Placement::Discarded
				} else {
					self.trees.push(Tree::new(group));
					Placement::NewTree { tree: self.trees.len() - 1 }
				}
			},
			Some(Match { tree: index, node }) => {
				let tree = &mut self.trees[index];
				if center.z > tree.center(node).z {
					let child = tree.add_child(node, group);
					Placement::Child { tree: index, node: child }
				} else {
					Placement::Spliced {
						tree: index,
						node: splice(tree, node, group),
					}
				}
			},
		};

		match placement {
			Placement::Discarded => self.statistics.discarded += 1,
			Placement::NewTree { .. } => self.statistics.new_trees += 1,
			Placement::Child { .. } => self.statistics.children += 1,
			Placement::Spliced { .. } => self.statistics.spliced += 1,
		}
		placement
	}

	pub fn finish(self) -> Vec<Tree> {
		log::debug!(
			"built {} trees, {} groups discarded, {} spliced",
			self.trees.len(),
			self.statistics.discarded,
			self.statistics.spliced
		);
		self.trees
	}
}

/// Insert a group that sits at or below its matched node.
///
/// The new node goes below the first ancestor not higher than the group and
/// takes over that ancestor's higher children. Without such an ancestor it
/// becomes the new root.
fn splice(tree: &mut Tree, matched: NodeId, group: PointSet) -> NodeId {
	let height = group.center().z;
	let stop = tree
		.ancestors(matched)
		.skip(1)
		.find(|&id| tree.center(id).z <= height);

	let inserted = tree.insert(group);
	match stop {
		None => tree.set_root(inserted),
		Some(ancestor) => {
			let higher = tree
				.node(ancestor)
				.children()
				.iter()
				.copied()
				.filter(|&child| tree.center(child).z > height)
				.collect::<Vec<_>>();
			for child in higher {
				tree.reparent(child, inserted);
			}
			tree.attach(ancestor, inserted);
		},
	}
	inserted
}

/// Build a forest from groups ordered bottom to top.
pub fn build_trees(groups: impl IntoIterator<Item = PointSet>, parameters: &MergingParameters) -> Vec<Tree> {
	let mut builder = TreeBuilder::new(parameters.clone());
	for group in groups {
		builder.add_group(group);
	}
	builder.finish()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::point::Point;

	fn make_ring(x: f64, y: f64, z: f64, count: usize) -> PointSet {
		(0..count)
			.map(|i| {
				let angle = i as f64 * std::f64::consts::TAU / count as f64;
				Point::new(x + 0.1 * angle.cos(), y + 0.1 * angle.sin(), z)
			})
			.collect()
	}

	fn make_columns(heights: impl Iterator<Item = usize> + Clone, xs: &[f64]) -> Vec<PointSet> {
		let mut groups = Vec::new();
		for k in heights {
			for &x in xs {
				groups.push(make_ring(x, 0.0, k as f64 / 10.0, 50));
			}
		}
		groups
	}

	#[test]
	fn test_two_columns_build_two_trees() {
		let groups = make_columns(0..=60, &[0.0, 4.0]);
		let trees = build_trees(groups, &MergingParameters::default());

		assert_eq!(trees.len(), 2);
		for tree in &trees {
			tree.validate();
			assert_eq!(tree.len(), 61);
			let x = tree.center(tree.root()).x;
			assert!(tree.nodes().all(|node| (node.center.x - x).abs() < 1e-9));
			assert!((tree.height() - 6.0).abs() < 1e-9);
		}
	}

	#[test]
	fn test_small_group_is_discarded() {
		let mut builder = TreeBuilder::new(MergingParameters::default());
		assert_eq!(builder.add_group(make_ring(0.0, 0.0, 1.0, 4)), Placement::Discarded);
		assert_eq!(builder.add_group(make_ring(0.0, 0.0, 13.0, 50)), Placement::Discarded);
		assert_eq!(builder.add_group(make_ring(0.0, 0.0, 1.0, 50)), Placement::NewTree { tree: 0 });
		assert_eq!(builder.statistics().discarded, 2);
	}

	#[test]
	fn test_small_group_discarded_regardless_of_position() {
		for (x, z) in [(0.0, 0.5), (10.0, 3.0), (-5.0, 11.9)] {
			let mut builder = TreeBuilder::new(MergingParameters::default());
			assert_eq!(builder.add_group(make_ring(x, 0.0, z, 4)), Placement::Discarded);
			assert!(builder.finish().is_empty());
		}
	}

	#[test]
	fn test_every_group_has_one_outcome() {
		let mut groups = make_columns(0..=30, &[0.0, 2.0]);
		groups.insert(20, make_ring(7.0, 7.0, 1.0, 3));
		groups.push(make_ring(2.0, 0.0, 2.5, 50));
		let count = groups.len();

		let mut builder = TreeBuilder::new(MergingParameters::default());
		let mut attached = 0;
		for group in groups {
			match builder.add_group(group) {
				Placement::Discarded => {},
				_ => attached += 1,
			}
		}
		let statistics = builder.statistics();
		assert_eq!(statistics.total(), count);
		let trees = builder.finish();
		assert_eq!(trees.iter().map(Tree::len).sum::<usize>(), attached);
		trees.iter().for_each(Tree::validate);
	}

	#[test]
	fn test_regression_match_spans_missing_slices() {
		// band 2.0 to 2.4 missing, the regression window bridges it
		let groups = make_columns((0..=19).chain(25..=40), &[1.0]);
		let trees = build_trees(groups, &MergingParameters::default());
		assert_eq!(trees.len(), 1);
		assert_eq!(trees[0].len(), 36);
		trees[0].validate();
	}

	#[test]
	fn test_lower_group_is_spliced() {
		let parameters = MergingParameters {
			minimum_regression_nodes: 3,
			..Default::default()
		};
		let mut builder = TreeBuilder::new(parameters);
		for k in [10, 11, 12, 13, 15] {
			builder.add_group(make_ring(0.0, 0.0, k as f64 / 10.0, 30));
		}
		assert_eq!(builder.trees().len(), 1);

		// arrives late, lies between 1.3 and 1.5
		let placement = builder.add_group(make_ring(0.0, 0.0, 1.4, 30));
		let Placement::Spliced { tree, node } = placement else {
			panic!("expected splice, got {:?}", placement);
		};
		let tree = &builder.trees()[tree];
		tree.validate();
		let parent = tree.node(node).parent().unwrap();
		assert!((tree.center(parent).z - 1.3).abs() < 1e-9);
		let children = tree.node(node).children();
		assert_eq!(children.len(), 1);
		assert!((tree.center(children[0]).z - 1.5).abs() < 1e-9);
	}

	#[test]
	fn test_lowest_group_becomes_root() {
		let parameters = MergingParameters {
			minimum_regression_nodes: 3,
			..Default::default()
		};
		let mut builder = TreeBuilder::new(parameters);
		for k in [10, 11, 12, 13] {
			builder.add_group(make_ring(0.0, 0.0, k as f64 / 10.0, 30));
		}
		let placement = builder.add_group(make_ring(0.0, 0.0, 0.9, 30));
		assert!(matches!(placement, Placement::Spliced { .. }));
		let tree = &builder.trees()[0];
		tree.validate();
		assert!((tree.center(tree.root()).z - 0.9).abs() < 1e-9);
		assert_eq!(tree.len(), 5);
	}

	#[test]
	fn test_points_out_to_needs_samples() {
		let parameters = MergingParameters::default();
		let mut tree = Tree::new(make_ring(0.0, 0.0, 1.0, 20));
		let mut last = tree.root();
		for k in 11..=13 {
			last = tree.add_child(last, make_ring(0.0, 0.0, k as f64 / 10.0, 20));
		}
		let target = na::Point3::new(0.0, 0.0, 1.4);
		assert!(!points_out_to(&tree, last, &target, &parameters));

		last = tree.add_child(last, make_ring(0.0, 0.0, 1.4, 20));
		let target = na::Point3::new(0.05, 0.0, 1.5);
		assert!(points_out_to(&tree, last, &target, &parameters));
		let far = na::Point3::new(0.5, 0.0, 1.5);
		assert!(!points_out_to(&tree, last, &far, &parameters));
	}
}
