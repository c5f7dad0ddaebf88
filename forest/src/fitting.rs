use nalgebra as na;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
	ellipse::{Ellipse, EllipticParameters},
	point::planar_distance,
	point_set::PointSet,
};

/// Total width of the focal offset ladder used for seeding.
pub const OFFSET_DEVIATION: f64 = 0.05;
/// Range of the random radius added without a parent ellipse.
pub const RADIUS_DEVIATION: f64 = 0.25;
/// Relative radius change per seeding step around a parent ellipse.
pub const RADIUS_STEP: f64 = 0.1;
/// Largest derived radius relative to half the larger side of a cross-section.
pub const EXTENT_SLACK: f64 = 1.5;

/// Scoring of candidate ellipses against a cross-section.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EllipseFitness {
	/// Candidates at or above this eccentricity score `f64::MAX`.
	pub eccentricity_threshold: f64,
	/// Residuals up to this width count as a perfect match.
	pub buffer_width: f64,
}

impl Default for EllipseFitness {
	fn default() -> Self {
		Self {
			eccentricity_threshold: 0.85,
			buffer_width: 0.005,
		}
	}
}

/// Everything a fitness evaluation needs about one cross-section.
pub struct FitContext<'a> {
	points: &'a PointSet,
	center: na::Point3<f64>,
	fitness: EllipseFitness,
}

impl<'a> FitContext<'a> {
	pub fn new(points: &'a PointSet, fitness: EllipseFitness) -> Self {
		Self {
			points,
			center: points.center(),
			fitness,
		}
	}

	pub fn points(&self) -> &PointSet {
		self.points
	}

	pub fn center(&self) -> na::Point3<f64> {
		self.center
	}

	/// Circle around the centroid through the mean point distance.
	pub fn centroid_circle(&self) -> EllipticParameters {
		let radius = self
			.points
			.iter()
			.map(|p| planar_distance(&p.position, &self.center))
			.sum::<f64>()
			/ self.points.len().max(1) as f64;
		EllipticParameters {
			major_radius: radius,
			..Default::default()
		}
	}

	/// Mean absolute residual of the points outside the buffer.
	///
	/// Non negative, lower is better, `f64::MAX` marks an unusable candidate.
	pub fn evaluate(&self, parameters: &EllipticParameters) -> f64 {
		if !parameters.major_radius.is_finite()
			|| parameters.major_radius <= 0.0
			|| parameters.eccentricity() >= self.fitness.eccentricity_threshold
		{
			return f64::MAX;
		}

		let first = na::Point3::new(self.center.x + parameters.x1, self.center.y + parameters.y1, 0.0);
		let second = na::Point3::new(self.center.x + parameters.x2, self.center.y + parameters.y2, 0.0);
		let mut sum = 0.0;
		let mut count = 0;
		for point in self.points {
			let residual = (planar_distance(&point.position, &first) + planar_distance(&point.position, &second)
				- 2.0 * parameters.major_radius)
				.abs();
			if residual > self.fitness.buffer_width {
				sum += residual;
				count += 1;
			}
		}
		if count == 0 {
			return 0.0;
		}
		sum / count as f64
	}
}

/// Result of fitting an ellipse to a cross-section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fit {
	pub parameters: EllipticParameters,
	pub fitness: f64,
}

impl Fit {
	/// Absolute ellipse at the height of `center`, the fitness kept as error.
	pub fn to_ellipse(&self, center: &na::Point3<f64>) -> Ellipse {
		let mut ellipse = self.parameters.to_ellipse(center);
		ellipse.error = self.fitness;
		ellipse
	}
}

/// Starting candidates for fitting the points of `context`.
///
/// Around a parent the ladder shifts its foci (given relative to the
/// current centroid) and scales its radius. Without a parent every offset
/// step draws random foci inside the bounding box and a random radius above
/// half the smaller box side.
pub fn seed_population(
	context: &FitContext,
	parent: Option<&Ellipse>,
	offsets: usize,
	radii: usize,
	rng: &mut impl Rng,
) -> Vec<EllipticParameters> {
	let center = context.center();
	let bounds = context.points().bounds();
	let offsets = offsets.max(1);
	let radii = radii.max(1);
	let step = OFFSET_DEVIATION / offsets as f64;

	let mut population = Vec::with_capacity(offsets * radii);
	for i in 0..offsets {
		let shift = (i as f64 - (offsets - 1) as f64 / 2.0) * step;
		let (base, radius) = match parent {
			Some(parent) => (
				[
					parent.first_focus().x - center.x,
					parent.first_focus().y - center.y,
					parent.second_focus().x - center.x,
					parent.second_focus().y - center.y,
				],
				parent.major_radius(),
			),
			None => {
				let mut random_x = || bounds.min.x + rng.gen::<f64>() * bounds.width() - center.x;
				let (x1, x2) = (random_x(), random_x());
				let mut random_y = || bounds.min.y + rng.gen::<f64>() * bounds.depth() - center.y;
				let (y1, y2) = (random_y(), random_y());
				(
					[x1, y1, x2, y2],
					0.5 * bounds.width().min(bounds.depth()) + rng.gen::<f64>() * RADIUS_DEVIATION,
				)
			},
		};

		for j in 0..radii {
			let factor = 1.0 + (j as f64 - (radii - 1) as f64 / 2.0) * RADIUS_STEP;
			population.push(EllipticParameters {
				x1: base[0] + shift,
				y1: base[1] + shift,
				x2: base[2] + shift,
				y2: base[3] + shift,
				major_radius: radius * factor,
			});
		}
	}
	population
}

/// Search for the ellipse that best fits a cross-section.
pub trait EllipseOptimizer: Send + Sync {
	/// `None` when there is nothing to fit.
	fn optimize(&self, context: &FitContext, parent: Option<&Ellipse>) -> Option<Fit>;
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EvolutionSettings {
	pub population: usize,
	pub generations: usize,
	/// Survivors copied unchanged into the next generation.
	pub elite: usize,
	/// Initial mutation range for offsets and radius.
	pub mutation: f64,
	pub minimum_radius: f64,
	/// Fixed radius limit, derived from the extent of each cross-section when unset.
	pub maximum_radius: Option<f64>,
	/// Largest focal offset from the centroid, half the larger side of the cross-section when unset.
	pub maximum_offset: Option<f64>,
	pub seed: Option<u64>,
}

impl Default for EvolutionSettings {
	fn default() -> Self {
		Self {
			population: 60,
			generations: 100,
			elite: 10,
			mutation: 0.02,
			minimum_radius: 0.01,
			maximum_radius: None,
			maximum_offset: None,
			seed: None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Limits {
	offset: f64,
	minimum_radius: f64,
	maximum_radius: f64,
}

impl Limits {
	fn clamp(&self, mut parameters: EllipticParameters) -> EllipticParameters {
		for value in [
			&mut parameters.x1,
			&mut parameters.y1,
			&mut parameters.x2,
			&mut parameters.y2,
		] {
			*value = value.clamp(-self.offset, self.offset);
		}
		parameters.major_radius = parameters.major_radius.clamp(self.minimum_radius, self.maximum_radius);
		parameters
	}
}

/// Elitist evolutionary search with uniform crossover and shrinking mutation.
#[derive(Debug, Clone, Default)]
pub struct Evolutionary {
	pub settings: EvolutionSettings,
}

impl Evolutionary {
	pub fn new(settings: EvolutionSettings) -> Self {
		Self { settings }
	}

	/// Search range for the cross-section of `context`.
	fn limits(&self, context: &FitContext) -> Limits {
		let bounds = context.points().bounds();
		let half = 0.5 * bounds.width().max(bounds.depth());
		let minimum_radius = self.settings.minimum_radius;
		Limits {
			offset: self.settings.maximum_offset.unwrap_or(half),
			minimum_radius,
			maximum_radius: self
				.settings
				.maximum_radius
				.unwrap_or(EXTENT_SLACK * half)
				.max(minimum_radius),
		}
	}

	fn mutate(
		&self,
		parameters: &EllipticParameters,
		limits: &Limits,
		scale: f64,
		rng: &mut StdRng,
	) -> EllipticParameters {
		let mut jitter = || rng.gen_range(-scale..=scale);
		limits.clamp(EllipticParameters {
			x1: parameters.x1 + jitter(),
			y1: parameters.y1 + jitter(),
			x2: parameters.x2 + jitter(),
			y2: parameters.y2 + jitter(),
			major_radius: parameters.major_radius + jitter(),
		})
	}

	fn crossover(a: &EllipticParameters, b: &EllipticParameters, rng: &mut StdRng) -> EllipticParameters {
		let mut pick = |x: f64, y: f64| if rng.gen_bool(0.5) { x } else { y };
		EllipticParameters {
			x1: pick(a.x1, b.x1),
			y1: pick(a.y1, b.y1),
			x2: pick(a.x2, b.x2),
			y2: pick(a.y2, b.y2),
			major_radius: pick(a.major_radius, b.major_radius),
		}
	}
}

impl EllipseOptimizer for Evolutionary {
	fn optimize(&self, context: &FitContext, parent: Option<&Ellipse>) -> Option<Fit> {
		if context.points().is_empty() {
			return None;
		}
		let settings = &self.settings;
		let mut rng = match settings.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};
		let size = settings.population.max(2);
		let elite = settings.elite.clamp(1, size);
		let limits = self.limits(context);

		let mut seeds = seed_population(context, parent, 5, 3, &mut rng);
		seeds.push(context.centroid_circle());
		let mut population = seeds
			.iter()
			.map(|&seed| limits.clamp(seed))
			.chain(
				(seeds.len()..size)
					.map(|i| self.mutate(&seeds[i % seeds.len()], &limits, settings.mutation, &mut rng)),
			)
			.take(size)
			.map(|parameters| Fit {
				fitness: context.evaluate(&parameters),
				parameters,
			})
			.collect::<Vec<_>>();

		for generation in 0..settings.generations {
			population.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
			population.truncate(elite);

			let progress = generation as f64 / settings.generations as f64;
			let scale = settings.mutation * (1.0 - 0.9 * progress);
			while population.len() < size {
				let a = population[rng.gen_range(0..elite)].parameters;
				let b = population[rng.gen_range(0..elite)].parameters;
				let parameters = self.mutate(&Self::crossover(&a, &b, &mut rng), &limits, scale, &mut rng);
				population.push(Fit {
					fitness: context.evaluate(&parameters),
					parameters,
				});
			}
		}

		population.into_iter().min_by(|a, b| a.fitness.total_cmp(&b.fitness))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::point::Point;

	fn make_circle(x: f64, y: f64, radius: f64, count: usize) -> PointSet {
		(0..count)
			.map(|i| {
				let angle = i as f64 * std::f64::consts::TAU / count as f64;
				Point::new(x + radius * angle.cos(), y + radius * angle.sin(), 1.2)
			})
			.collect()
	}

	fn seeded(seed: u64) -> Evolutionary {
		Evolutionary::new(EvolutionSettings {
			seed: Some(seed),
			..Default::default()
		})
	}

	#[test]
	fn test_eccentric_candidate_scores_maximum() {
		let points = make_circle(0.0, 0.0, 0.15, 40);
		let context = FitContext::new(&points, EllipseFitness::default());
		let degenerate = EllipticParameters {
			x1: -0.15,
			y1: 0.0,
			x2: 0.15,
			y2: 0.0,
			major_radius: 0.15,
		};
		assert!(degenerate.eccentricity() >= 0.85);
		assert_eq!(context.evaluate(&degenerate), f64::MAX);

		let nan = EllipticParameters {
			major_radius: f64::NAN,
			..Default::default()
		};
		assert_eq!(context.evaluate(&nan), f64::MAX);
	}

	#[test]
	fn test_exact_circle_scores_zero() {
		let points = make_circle(2.0, -1.0, 0.15, 40);
		let context = FitContext::new(&points, EllipseFitness::default());
		let exact = EllipticParameters {
			major_radius: 0.15,
			..Default::default()
		};
		assert_eq!(context.evaluate(&exact), 0.0);

		let wide = EllipticParameters {
			major_radius: 0.2,
			..Default::default()
		};
		assert!((context.evaluate(&wide) - 0.1).abs() < 1e-9);
	}

	#[test]
	fn test_seeds_around_parent() {
		let points = make_circle(1.0, 1.0, 0.15, 40);
		let context = FitContext::new(&points, EllipseFitness::default());
		let parent = Ellipse::circle(na::Point3::new(1.0, 1.0, 1.1), 0.15);
		let mut rng = StdRng::seed_from_u64(1);
		let seeds = seed_population(&context, Some(&parent), 5, 3, &mut rng);

		assert_eq!(seeds.len(), 15);
		assert!(seeds.iter().any(|s| s.x1.abs() < 1e-9 && (s.major_radius - 0.15).abs() < 1e-9));
		for seed in &seeds {
			assert!(seed.x1.abs() <= OFFSET_DEVIATION / 2.0 + 1e-9);
			assert!((seed.x1 - seed.x2).abs() < 1e-9);
		}
	}

	#[test]
	fn test_seeds_without_parent_stay_in_bounds() {
		let points = make_circle(-3.0, 4.0, 0.2, 40);
		let context = FitContext::new(&points, EllipseFitness::default());
		let mut rng = StdRng::seed_from_u64(2);
		for seed in seed_population(&context, None, 5, 3, &mut rng) {
			for offset in [seed.x1, seed.x2, seed.y1, seed.y2] {
				assert!(offset.abs() <= 0.2 + OFFSET_DEVIATION);
			}
			assert!(seed.major_radius >= 0.2 * (1.0 - RADIUS_STEP) - 1e-9);
		}
	}

	#[test]
	fn test_parent_seed_keeps_perfect_fit() {
		let points = make_circle(5.0, 5.0, 0.15, 60);
		let context = FitContext::new(&points, EllipseFitness::default());
		let parent = Ellipse::circle(points.center(), 0.15);
		let fit = seeded(3).optimize(&context, Some(&parent)).unwrap();
		assert!(fit.fitness < 0.01);
		let ellipse = fit.to_ellipse(&context.center());
		assert!(ellipse.eccentricity() < 0.8);
	}

	#[test]
	fn test_finds_circle_without_parent() {
		let points = make_circle(5.0, 5.0, 0.15, 60);
		let context = FitContext::new(&points, EllipseFitness::default());
		let fit = seeded(4).optimize(&context, None).unwrap();
		assert!(fit.fitness < 0.05, "fitness {}", fit.fitness);
		let ellipse = fit.to_ellipse(&context.center());
		assert!(planar_distance(&ellipse.center(), &context.center()) < 0.05);
	}

	#[test]
	fn test_wide_trunks_fit() {
		let points = make_circle(-2.0, 3.0, 0.6, 120);
		let context = FitContext::new(&points, EllipseFitness::default());
		let fit = seeded(8).optimize(&context, None).unwrap();
		assert!(fit.fitness < 0.05, "fitness {}", fit.fitness);
		assert!((fit.parameters.major_radius - 0.6).abs() < 0.05);
	}

	#[test]
	fn test_limits_follow_extent() {
		let points = make_circle(0.0, 0.0, 0.5, 40);
		let context = FitContext::new(&points, EllipseFitness::default());
		let limits = seeded(1).limits(&context);
		assert!((limits.offset - 0.5).abs() < 1e-9);
		assert!((limits.maximum_radius - 0.75).abs() < 1e-9);

		let fixed = Evolutionary::new(EvolutionSettings {
			maximum_radius: Some(0.3),
			maximum_offset: Some(0.05),
			..Default::default()
		});
		let limits = fixed.limits(&context);
		assert_eq!(limits.offset, 0.05);
		assert_eq!(limits.maximum_radius, 0.3);
		let clamped = limits.clamp(EllipticParameters {
			x1: 1.0,
			y1: -1.0,
			x2: 0.0,
			y2: 0.0,
			major_radius: 0.5,
		});
		assert_eq!((clamped.x1, clamped.y1, clamped.major_radius), (0.05, -0.05, 0.3));
	}

	#[test]
	fn test_empty_set_has_no_fit() {
		let points = PointSet::new();
		let context = FitContext::new(&points, EllipseFitness::default());
		assert!(seeded(5).optimize(&context, None).is_none());
	}

	#[test]
	fn test_seeded_search_is_deterministic() {
		let points = make_circle(0.0, 0.0, 0.1, 30);
		let context = FitContext::new(&points, EllipseFitness::default());
		let a = seeded(6).optimize(&context, None).unwrap();
		let b = seeded(6).optimize(&context, None).unwrap();
		assert_eq!(a, b);
	}
}
