use rayon::prelude::*;

use crate::{
	fitting::{EllipseFitness, EllipseOptimizer, Evolutionary, FitContext},
	point_set::PointSet,
	raster::RasterGrid,
	tree::Tree,
};

/// Height dependent limit.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Threshold {
	Constant { value: f64 },
	Linear { slope: f64, intercept: f64 },
	ClampedLinear { slope: f64, intercept: f64, min: f64, max: f64 },
}

impl Threshold {
	pub fn at(&self, height: f64) -> f64 {
		match *self {
			Self::Constant { value } => value,
			Self::Linear { slope, intercept } => slope * height + intercept,
			Self::ClampedLinear {
				slope,
				intercept,
				min,
				max,
			} => (slope * height + intercept).clamp(min, max),
		}
	}
}

/// Step applied to the groups of a slice before they are assigned to trees.
pub trait PointSetFilter: Send + Sync {
	fn name(&self) -> &'static str;

	fn filter(&self, groups: Vec<PointSet>) -> Vec<PointSet>;
}

/// Run `filters` in order.
pub fn apply(filters: &[Box<dyn PointSetFilter>], groups: Vec<PointSet>) -> Vec<PointSet> {
	filters.iter().fold(groups, |groups, filter| {
		let before = groups.len();
		let groups = filter.filter(groups);
		log::trace!("{} kept {} of {} groups", filter.name(), groups.len(), before);
		groups
	})
}

/// Keeps groups whose larger horizontal side reaches the threshold.
pub struct SmallGroups {
	pub minimal_size: Threshold,
}

impl PointSetFilter for SmallGroups {
	fn name(&self) -> &'static str {
		"small groups"
	}

	fn filter(&self, groups: Vec<PointSet>) -> Vec<PointSet> {
		groups
			.into_iter()
			.filter(|group| {
				let bounds = group.bounds();
				!group.is_empty() && bounds.width().max(bounds.depth()) >= self.minimal_size.at(group.center().z)
			})
			.collect()
	}
}

/// Keeps groups whose larger horizontal side stays within the threshold.
pub struct LargeGroups {
	pub maximal_size: Threshold,
}

impl PointSetFilter for LargeGroups {
	fn name(&self) -> &'static str {
		"large groups"
	}

	fn filter(&self, groups: Vec<PointSet>) -> Vec<PointSet> {
		groups
			.into_iter()
			.filter(|group| {
				let bounds = group.bounds();
				!group.is_empty() && bounds.width().max(bounds.depth()) <= self.maximal_size.at(group.center().z)
			})
			.collect()
	}
}

/// Keeps groups with a width to depth ratio inside `[lower, upper]`.
pub struct AspectRatio {
	pub lower: f64,
	pub upper: f64,
}

impl Default for AspectRatio {
	fn default() -> Self {
		Self { lower: 0.8, upper: 1.2 }
	}
}

impl PointSetFilter for AspectRatio {
	fn name(&self) -> &'static str {
		"aspect ratio"
	}

	fn filter(&self, groups: Vec<PointSet>) -> Vec<PointSet> {
		groups
			.into_iter()
			.filter(|group| {
				if group.is_empty() {
					return false;
				}
				let bounds = group.bounds();
				let ratio = bounds.width() / bounds.depth();
				(self.lower..=self.upper).contains(&ratio)
			})
			.collect()
	}
}

/// Thins groups to at most `density` points per square unit.
pub struct Density {
	pub density: f64,
	pub mesh_width: f64,
}

impl Default for Density {
	fn default() -> Self {
		Self {
			density: 20000.0,
			mesh_width: 0.05,
		}
	}
}

impl PointSetFilter for Density {
	fn name(&self) -> &'static str {
		"density"
	}

	fn filter(&self, groups: Vec<PointSet>) -> Vec<PointSet> {
		let maximum = (self.density * self.mesh_width * self.mesh_width).ceil() as usize;
		groups
			.into_iter()
			.map(|group| {
				if group.is_empty() {
					return group;
				}
				let mut grid = RasterGrid::new(group, self.mesh_width);
				grid.limit_density(maximum);
				grid.merge()
			})
			.collect()
	}
}

/// Keeps groups that resemble a trunk cross-section.
///
/// Every point of a tested group gets the fitness as its intensity.
pub struct EllipseMatch<O = Evolutionary> {
	pub optimizer: O,
	pub fitness: EllipseFitness,
	pub eccentricity_threshold: f64,
	pub fitness_threshold: f64,
	/// Groups centered lower are dropped without fitting.
	pub minimum_height: f64,
}

impl<O: EllipseOptimizer> EllipseMatch<O> {
	fn matches(&self, group: &mut PointSet) -> bool {
		let context = FitContext::new(group, self.fitness);
		if context.center().z < self.minimum_height {
			return false;
		}
		let Some(fit) = self.optimizer.optimize(&context, None) else {
			return false;
		};
		let eccentricity = fit.parameters.eccentricity();
		group.set_intensity(fit.fitness);
		eccentricity < self.eccentricity_threshold && fit.fitness < self.fitness_threshold
	}
}

impl<O: EllipseOptimizer> PointSetFilter for EllipseMatch<O> {
	fn name(&self) -> &'static str {
		"ellipse match"
	}

	fn filter(&self, groups: Vec<PointSet>) -> Vec<PointSet> {
		groups
			.into_par_iter()
			.filter_map(|mut group| self.matches(&mut group).then_some(group))
			.collect()
	}
}

/// Step applied to detected trees.
pub trait TreeFilter: Send + Sync {
	fn filter(&self, trees: Vec<Tree>) -> Vec<Tree>;
}

/// Keeps trees reaching at least `minimal_height` above their root.
pub struct TreeHeight {
	pub minimal_height: f64,
}

impl Default for TreeHeight {
	fn default() -> Self {
		Self { minimal_height: 4.0 }
	}
}

impl TreeFilter for TreeHeight {
	fn filter(&self, trees: Vec<Tree>) -> Vec<Tree> {
		trees
			.into_iter()
			.filter(|tree| tree.height() >= self.minimal_height)
			.collect()
	}
}
