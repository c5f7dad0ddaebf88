use crate::{
	fitting::{EllipseFitness, EllipseOptimizer, EvolutionSettings, Evolutionary, FitContext},
	gap_filling::{fill_gaps, FillReport},
	point::round_height,
	tree::Tree,
};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ApproximationSettings {
	/// Fitted ellipses must stay below this eccentricity.
	pub eccentricity_threshold: f64,
	/// Fitted ellipses must score below this fitness.
	pub fitness_threshold: f64,
	/// Smallest share of nodes with an accepted ellipse for a usable tree.
	pub minimum_valid_share: f64,
	/// Cross-sections centered lower than this are not fitted.
	pub minimum_height: f64,
	pub slice_height: f64,
	pub fitness: EllipseFitness,
	pub evolution: EvolutionSettings,
}

impl Default for ApproximationSettings {
	fn default() -> Self {
		Self {
			eccentricity_threshold: 0.8,
			fitness_threshold: 0.01,
			minimum_valid_share: 0.25,
			minimum_height: 0.1,
			slice_height: 0.1,
			fitness: EllipseFitness::default(),
			evolution: EvolutionSettings::default(),
		}
	}
}

/// Fits cross-sections of detected trees and completes their structure.
pub struct Approximation<O = Evolutionary> {
	settings: ApproximationSettings,
	optimizer: O,
}

impl Approximation {
	pub fn new(settings: ApproximationSettings) -> Self {
		let optimizer = Evolutionary::new(settings.evolution.clone());
		Self { settings, optimizer }
	}
}

impl<O: EllipseOptimizer> Approximation<O> {
	pub fn with_optimizer(settings: ApproximationSettings, optimizer: O) -> Self {
		Self { settings, optimizer }
	}

	pub fn settings(&self) -> &ApproximationSettings {
		&self.settings
	}

	/// Fit every node top down, seeded with the parent's ellipse.
	///
	/// Returns the number of accepted ellipses.
	pub fn fit_ellipses(&self, tree: &mut Tree) -> usize {
		let mut accepted = 0;
		for id in tree.preorder() {
			let parent = tree
				.node(id)
				.parent()
				.and_then(|parent| tree.node(parent).ellipse.clone());
			let node = tree.node(id);
			let context = FitContext::new(&node.point_set, self.settings.fitness);
			if context.center().z < self.settings.minimum_height {
				continue;
			}
			let Some(fit) = self.optimizer.optimize(&context, parent.as_ref()) else {
				continue;
			};
			let ellipse = fit.to_ellipse(&context.center());
			if ellipse.eccentricity() < self.settings.eccentricity_threshold
				&& fit.fitness < self.settings.fitness_threshold
				&& !fit.fitness.is_nan()
			{
				tree.node_mut(id).ellipse = Some(ellipse);
				accepted += 1;
			}
		}
		accepted
	}

	/// Fitted and gap filled tree, `None` when too few cross-sections fit.
	///
	/// Heights are expected relative to the terrain, gap filling extends the
	/// trunk down to zero.
	pub fn approximate(&self, mut tree: Tree, tree_height: Option<f64>) -> Option<(Tree, FillReport)> {
		self.fit_ellipses(&mut tree);

		let valid = tree
			.nodes()
			.filter(|node| node.ellipse.as_ref().is_some_and(|e| !e.major_radius().is_nan()))
			.count();
		if valid == 0 || (valid as f64 / tree.len() as f64) < self.settings.minimum_valid_share {
			log::debug!("rejected tree with {} of {} fitted sections", valid, tree.len());
			return None;
		}

		let height = tree_height.unwrap_or_else(|| tree.center(tree.highest_node()).z);
		for node in tree.nodes_mut() {
			node.center.z = round_height(node.center.z);
			let z = node.center.z;
			if let Some(ellipse) = node.ellipse.as_mut() {
				ellipse.set_height(z);
			}
		}

		let report = fill_gaps(&mut tree, 0.0, Some(height), self.settings.slice_height);
		if cfg!(debug_assertions) {
			tree.validate();
		}
		Some((tree, report))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		ellipse::{Ellipse, EllipticParameters},
		fitting::Fit,
		point::Point,
		point_set::PointSet,
	};

	/// Circle through the centroid, accepted above `valid_from`.
	struct Circles {
		radius: f64,
		valid_from: f64,
	}

	impl EllipseOptimizer for Circles {
		fn optimize(&self, context: &FitContext, _parent: Option<&Ellipse>) -> Option<Fit> {
			let fitness = if context.center().z >= self.valid_from { 0.0 } else { f64::MAX };
			Some(Fit {
				parameters: EllipticParameters {
					major_radius: self.radius,
					..Default::default()
				},
				fitness,
			})
		}
	}

	fn make_ring(z: f64, radius: f64) -> PointSet {
		(0..24)
			.map(|i| {
				let angle = i as f64 * std::f64::consts::TAU / 24.0;
				Point::new(radius * angle.cos(), radius * angle.sin(), z)
			})
			.collect()
	}

	fn make_column(levels: std::ops::RangeInclusive<usize>) -> Tree {
		let mut levels = levels.map(|k| k as f64 / 10.0);
		let mut tree = Tree::new(make_ring(levels.next().unwrap(), 0.12));
		let mut last = tree.root();
		for z in levels {
			last = tree.add_child(last, make_ring(z, 0.12));
		}
		tree
	}

	#[test]
	fn test_rejects_tree_without_fits() {
		let approximation = Approximation::with_optimizer(
			ApproximationSettings::default(),
			Circles {
				radius: 0.1,
				valid_from: f64::INFINITY,
			},
		);
		assert!(approximation.approximate(make_column(1..=10), None).is_none());
	}

	#[test]
	fn test_quarter_of_sections_required() {
		let settings = ApproximationSettings::default();
		// ten nodes at 0.1 to 1.0, two of them fitted
		let approximation = Approximation::with_optimizer(
			settings.clone(),
			Circles {
				radius: 0.1,
				valid_from: 0.85,
			},
		);
		assert!(approximation.approximate(make_column(1..=10), None).is_none());

		let approximation = Approximation::with_optimizer(
			settings,
			Circles {
				radius: 0.1,
				valid_from: 0.75,
			},
		);
		assert!(approximation.approximate(make_column(1..=10), None).is_some());
	}

	#[test]
	fn test_eccentric_fit_is_never_attached() {
		struct Flat;
		impl EllipseOptimizer for Flat {
			fn optimize(&self, _context: &FitContext, _parent: Option<&Ellipse>) -> Option<Fit> {
				Some(Fit {
					parameters: EllipticParameters {
						x1: -0.09,
						x2: 0.09,
						major_radius: 0.1,
						..Default::default()
					},
					fitness: 0.0,
				})
			}
		}
		let approximation = Approximation::with_optimizer(ApproximationSettings::default(), Flat);
		let mut tree = make_column(1..=5);
		assert_eq!(approximation.fit_ellipses(&mut tree), 0);
		assert!(tree.nodes().all(|node| node.ellipse.is_none()));
	}

	#[test]
	fn test_approximated_tree_reaches_ground_and_top() {
		let approximation = Approximation::with_optimizer(
			ApproximationSettings::default(),
			Circles {
				radius: 0.1,
				valid_from: 0.0,
			},
		);
		let (tree, report) = approximation.approximate(make_column(3..=20), Some(2.5)).unwrap();
		tree.validate();

		assert_eq!(report.ground, 3);
		assert!(tree.center(tree.root()).z.abs() < 1e-9);
		let top = tree.highest_node();
		assert!((tree.center(top).z - 2.4).abs() < 1e-9);
		for node in tree.nodes() {
			assert!((node.center.z * 10.0 - (node.center.z * 10.0).round()).abs() < 1e-6);
			if let Some(ellipse) = &node.ellipse {
				assert_eq!(ellipse.first_focus().z, node.center.z);
			}
		}
	}

	#[test]
	fn test_evolutionary_fits_column() {
		let settings = ApproximationSettings {
			evolution: EvolutionSettings {
				seed: Some(11),
				..Default::default()
			},
			..Default::default()
		};
		let approximation = Approximation::new(settings);
		let mut tree = make_column(2..=8);
		let accepted = approximation.fit_ellipses(&mut tree);
		assert!(accepted >= 2, "accepted {}", accepted);
		for node in tree.nodes().filter_map(|node| node.ellipse.as_ref()) {
			assert!(node.eccentricity() < 0.8);
			assert!(node.error < 0.01);
		}
	}
}
