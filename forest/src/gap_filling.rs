use crate::{
	ellipse::Ellipse,
	point::{align_to_slice, planar_distance},
	regression::{Centerline, RadiusLaw},
	tree::{NodeId, Tree},
};

/// Gaps up to this much above one slice height are not filled.
pub const GAP_TOLERANCE: f64 = 0.01;

const GROUND_SAMPLES: usize = 10;
const BETWEEN_SAMPLES: usize = 10;
const TOP_SAMPLES: usize = 15;

/// Counts of synthesized nodes and ellipses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FillReport {
	pub ground: usize,
	pub between: usize,
	pub above: usize,
	pub ellipses: usize,
}

/// Complete the vertical structure of a tree whose nodes already carry
/// their fitted ellipses.
///
/// `tree_height` defaults to the height of the highest node.
pub fn fill_gaps(tree: &mut Tree, terrain_height: f64, tree_height: Option<f64>, slice_height: f64) -> FillReport {
	let highest = tree.highest_node();
	let tree_height = tree_height.unwrap_or(tree.center(highest).z);
	let law = radius_law(tree, tree_height);

	let mut report = FillReport {
		ground: fill_from_ground(tree, terrain_height, slice_height),
		..Default::default()
	};
	report.between = fill_between_levels(tree, highest, slice_height);
	match &law {
		Some(law) => report.ellipses = fill_section_ellipses(tree, highest, tree_height, law),
		None => log::debug!("no ellipse to fit a radius law"),
	}
	if tree_height - tree.center(highest).z > slice_height + GAP_TOLERANCE {
		report.above = extend_to_top(tree, highest, tree_height, law.as_ref(), slice_height);
	}
	log::trace!("filled gaps {:?}", report);
	report
}

/// Radius law over every node with an ellipse below `tree_height`.
pub fn radius_law(tree: &Tree, tree_height: f64) -> Option<RadiusLaw> {
	RadiusLaw::fit(tree.nodes().filter_map(|node| {
		let ellipse = node.ellipse.as_ref()?;
		Some((tree_height - node.center.z, ellipse.major_radius()))
	}))
}

/// Centerline through up to `count` centers of `from` and its ancestors.
///
/// Nodes with an ellipse are preferred, all nodes are used when fewer than
/// two of them carry one.
fn regress_positions(tree: &Tree, from: NodeId, count: usize) -> Centerline {
	let fitted = tree
		.ancestors(from)
		.filter(|&id| tree.node(id).ellipse.is_some())
		.take(count)
		.map(|id| tree.center(id))
		.collect::<Vec<_>>();
	if fitted.len() >= 2 {
		return Centerline::fit(&fitted);
	}
	let all = tree
		.ancestors(from)
		.take(count)
		.map(|id| tree.center(id))
		.collect::<Vec<_>>();
	Centerline::fit(&all)
}

/// Extrapolate the trunk from the slice containing the terrain up to the root.
fn fill_from_ground(tree: &mut Tree, terrain_height: f64, slice_height: f64) -> usize {
	let mut top = tree.root();
	for _ in 0..GROUND_SAMPLES {
		let center = tree.center(top);
		let closest = tree
			.node(top)
			.children()
			.iter()
			.copied()
			.min_by(|&a, &b| {
				planar_distance(&tree.center(a), &center).total_cmp(&planar_distance(&tree.center(b), &center))
			});
		match closest {
			Some(child) => top = child,
			None => break,
		}
	}
	let line = regress_positions(tree, top, GROUND_SAMPLES);

	let ground = align_to_slice(terrain_height, slice_height);
	let root_height = tree.center(tree.root()).z;
	let heights = (0..)
		.map(|k| ground + k as f64 * slice_height)
		.take_while(|&z| root_height - z > GAP_TOLERANCE)
		.collect::<Vec<_>>();

	for &z in heights.iter().rev() {
		let id = tree.insert_point(line.at(z));
		tree.set_root(id);
	}
	heights.len()
}

/// Fill every parent and child pair further apart than one slice.
///
/// The chain below the highest node is handled first, then the chains of
/// the remaining leaves.
fn fill_between_levels(tree: &mut Tree, highest: NodeId, slice_height: f64) -> usize {
	let mut leaves = vec![highest];
	leaves.extend(tree.leaves().filter(|&id| id != highest));

	let mut created = 0;
	for leaf in leaves {
		let mut higher = leaf;
		while let Some(lower) = tree.node(higher).parent() {
			created += fill_between(tree, higher, lower, slice_height);
			higher = lower;
		}
	}
	created
}

fn fill_between(tree: &mut Tree, higher: NodeId, lower: NodeId, slice_height: f64) -> usize {
	let top = tree.center(higher).z;
	let bottom = tree.center(lower).z;
	if top - bottom <= slice_height + GAP_TOLERANCE {
		return 0;
	}

	let mut samples = tree.ancestors(higher).take(BETWEEN_SAMPLES).collect::<Vec<_>>();
	if !samples.contains(&lower) {
		samples.push(lower);
	}
	let centers = samples.into_iter().map(|id| tree.center(id)).collect::<Vec<_>>();
	let line = Centerline::fit(&centers);

	tree.detach(lower, higher);
	let mut last = lower;
	let mut created = 0;
	for k in 1.. {
		let z = bottom + k as f64 * slice_height;
		if top - z <= GAP_TOLERANCE {
			break;
		}
		let mut position = line.at(z);
		position.z = align_to_slice(z, slice_height);
		let id = tree.insert_point(position);
		tree.attach(last, id);
		last = id;
		created += 1;
	}
	tree.attach(last, higher);
	created
}

/// Ellipses from the radius law for ancestors of `highest` that have none.
fn fill_section_ellipses(tree: &mut Tree, highest: NodeId, tree_height: f64, law: &RadiusLaw) -> usize {
	let chain = tree.ancestors(highest).skip(1).collect::<Vec<_>>();
	let mut created = 0;
	for id in chain {
		let node = tree.node_mut(id);
		let distance = tree_height - node.center.z;
		if node.ellipse.is_some() || distance <= 0.0 {
			continue;
		}
		let mut ellipse = Ellipse::from_radius_law(node.center, law, distance);
		ellipse.update_error(&node.point_set);
		node.ellipse = Some(ellipse);
		created += 1;
	}
	created
}

/// Grow the trunk above the highest node until the tree height is reached.
///
/// Without a radius law the new nodes carry no ellipse.
fn extend_to_top(
	tree: &mut Tree,
	highest: NodeId,
	tree_height: f64,
	law: Option<&RadiusLaw>,
	slice_height: f64,
) -> usize {
	let line = regress_positions(tree, highest, TOP_SAMPLES);
	let start = tree.center(highest).z;

	let mut last = highest;
	let mut created = 0;
	for k in 1.. {
		let z = start + k as f64 * slice_height;
		if z >= tree_height {
			break;
		}
		let id = tree.insert_point(line.at(z));
		if let Some(law) = law {
			let node = tree.node_mut(id);
			let mut ellipse = Ellipse::from_radius_law(node.center, law, tree_height - z);
			ellipse.update_error(&node.point_set);
			node.ellipse = Some(ellipse);
		}
		tree.attach(last, id);
		last = id;
		created += 1;
	}
	created
}
