use std::sync::OnceLock;

use nalgebra as na;

use crate::{
	point::{planar_distance, Point},
	point_set::PointSet,
	regression::RadiusLaw,
};

/// Cross-section model given by two foci at the same height and the major radius.
#[derive(Debug, Clone)]
pub struct Ellipse {
	first_focus: na::Point3<f64>,
	second_focus: na::Point3<f64>,
	major_radius: f64,
	/// Mean signed residual of the points the ellipse was checked against.
	pub error: f64,
	shape: OnceLock<Shape>,
}

#[derive(Debug, Clone, Copy)]
struct Shape {
	focal_length: f64,
	eccentricity: f64,
	minor_radius: f64,
}

/// Foci relative to the centroid of the fitted point set.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EllipticParameters {
	pub x1: f64,
	pub y1: f64,
	pub x2: f64,
	pub y2: f64,
	pub major_radius: f64,
}

impl EllipticParameters {
	pub fn to_ellipse(&self, center: &na::Point3<f64>) -> Ellipse {
		Ellipse::new(
			na::Point3::new(center.x + self.x1, center.y + self.y1, center.z),
			na::Point3::new(center.x + self.x2, center.y + self.y2, center.z),
			self.major_radius,
		)
	}

	pub fn focal_length(&self) -> f64 {
		let dx = self.x1 - self.x2;
		let dy = self.y1 - self.y2;
		(dx * dx + dy * dy).sqrt()
	}

	pub fn eccentricity(&self) -> f64 {
		self.focal_length() / (2.0 * self.major_radius)
	}
}

impl Ellipse {
	/// Minimum point count for `update_error` to measure anything.
	pub const ERROR_SAMPLE_MINIMUM: usize = 10;

	pub fn new(first_focus: na::Point3<f64>, second_focus: na::Point3<f64>, major_radius: f64) -> Self {
		Self {
			first_focus,
			second_focus,
			major_radius,
			error: 0.0,
			shape: OnceLock::new(),
		}
	}

	/// Degenerate ellipse with both foci on `center`.
	pub fn circle(center: na::Point3<f64>, radius: f64) -> Self {
		Self::new(center, center, radius)
	}

	/// Circle with the radius predicted by `law` at `distance_from_top`.
	pub fn from_radius_law(center: na::Point3<f64>, law: &RadiusLaw, distance_from_top: f64) -> Self {
		Self::circle(center, law.radius_at(distance_from_top))
	}

	pub fn first_focus(&self) -> &na::Point3<f64> {
		&self.first_focus
	}

	pub fn second_focus(&self) -> &na::Point3<f64> {
		&self.second_focus
	}

	pub fn major_radius(&self) -> f64 {
		self.major_radius
	}

	pub fn center(&self) -> na::Point3<f64> {
		na::center(&self.first_focus, &self.second_focus)
	}

	pub fn set_first_focus(&mut self, focus: na::Point3<f64>) {
		self.first_focus = focus;
		self.shape.take();
	}

	pub fn set_second_focus(&mut self, focus: na::Point3<f64>) {
		self.second_focus = focus;
		self.shape.take();
	}

	pub fn set_major_radius(&mut self, radius: f64) {
		self.major_radius = radius;
		self.shape.take();
	}

	/// Move both foci to the height `z`.
	pub fn set_height(&mut self, z: f64) {
		self.first_focus.z = z;
		self.second_focus.z = z;
	}

	fn shape(&self) -> &Shape {
		self.shape.get_or_init(|| {
			let focal_length = planar_distance(&self.first_focus, &self.second_focus);
			let eccentricity = focal_length / (2.0 * self.major_radius);
			let minor_radius =
				((1.0 - eccentricity * eccentricity) * self.major_radius * self.major_radius).sqrt();
			Shape {
				focal_length,
				eccentricity,
				minor_radius,
			}
		})
	}

	pub fn focal_length(&self) -> f64 {
		self.shape().focal_length
	}

	pub fn eccentricity(&self) -> f64 {
		self.shape().eccentricity
	}

	pub fn minor_radius(&self) -> f64 {
		self.shape().minor_radius
	}

	/// Sum of the planar distances to both foci minus the major axis.
	pub fn residual(&self, point: &na::Point3<f64>) -> f64 {
		planar_distance(point, &self.first_focus) + planar_distance(point, &self.second_focus)
			- 2.0 * self.major_radius
	}

	pub fn contains(&self, point: &na::Point3<f64>) -> bool {
		self.residual(point) < 0.0
	}

	/// Store the mean signed residual over `points` as the error.
	///
	/// Sets with `ERROR_SAMPLE_MINIMUM` points or fewer leave the error at zero.
	pub fn update_error(&mut self, points: &PointSet) {
		self.error = 0.0;
		if points.len() <= Self::ERROR_SAMPLE_MINIMUM {
			return;
		}
		let sum = points.iter().map(|p| self.residual(&p.position)).sum::<f64>();
		self.error = sum / points.len() as f64;
	}

	/// Points of the interior on a square grid around the center.
	pub fn rasterize(&self, half_size: i32, resolution: f64) -> Vec<Point> {
		let center = self.center();
		let mut points = Vec::new();
		for x in -half_size..half_size {
			for y in -half_size..half_size {
				let position = na::Point3::new(
					center.x + x as f64 * resolution,
					center.y + y as f64 * resolution,
					center.z,
				);
				if self.contains(&position) {
					points.push(Point {
						position,
						intensity: self.error,
					});
				}
			}
		}
		points
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn make_ellipse() -> Ellipse {
		Ellipse::new(
			na::Point3::new(-0.3, 0.0, 1.0),
			na::Point3::new(0.3, 0.0, 1.0),
			0.5,
		)
	}

	#[test]
	fn test_derived_values() {
		let ellipse = make_ellipse();
		assert!((ellipse.focal_length() - 0.6).abs() < 1e-12);
		assert!((ellipse.eccentricity() - 0.6).abs() < 1e-12);
		assert!((ellipse.minor_radius() - 0.4).abs() < 1e-12);
	}

	#[test]
	fn test_setters_invalidate_shape() {
		let mut ellipse = make_ellipse();
		assert!((ellipse.eccentricity() - 0.6).abs() < 1e-12);
		ellipse.set_major_radius(0.6);
		assert!((ellipse.eccentricity() - 0.5).abs() < 1e-12);
		ellipse.set_second_focus(na::Point3::new(-0.3, 0.0, 1.0));
		assert_eq!(ellipse.focal_length(), 0.0);
		assert!((ellipse.minor_radius() - 0.6).abs() < 1e-12);
	}

	#[test]
	fn test_contains_is_strict() {
		let ellipse = make_ellipse();
		assert!(ellipse.contains(&na::Point3::new(0.0, 0.0, 7.0)));
		assert!(!ellipse.contains(&na::Point3::new(0.6, 0.0, 1.0)));
		assert!(!ellipse.contains(&na::Point3::new(0.0, 0.45, 1.0)));
	}

	#[test]
	fn test_error_needs_more_than_ten_points() {
		let mut circle = Ellipse::circle(na::Point3::origin(), 1.0);
		let ring = (0..10)
			.map(|i| {
				let angle = i as f64 * std::f64::consts::TAU / 10.0;
				Point::new(2.0 * angle.cos(), 2.0 * angle.sin(), 0.0)
			})
			.collect::<PointSet>();
		circle.update_error(&ring);
		assert_eq!(circle.error, 0.0);

		let ring = (0..20)
			.map(|i| {
				let angle = i as f64 * std::f64::consts::TAU / 20.0;
				Point::new(2.0 * angle.cos(), 2.0 * angle.sin(), 0.0)
			})
			.collect::<PointSet>();
		circle.update_error(&ring);
		assert!((circle.error - 2.0).abs() < 1e-9);
	}

	#[test]
	fn test_parameters_are_relative_to_center() {
		let parameters = EllipticParameters {
			x1: -0.1,
			y1: 0.0,
			x2: 0.1,
			y2: 0.0,
			major_radius: 0.2,
		};
		let ellipse = parameters.to_ellipse(&na::Point3::new(5.0, 5.0, 2.0));
		assert_eq!(ellipse.center(), na::Point3::new(5.0, 5.0, 2.0));
		assert!((ellipse.eccentricity() - parameters.eccentricity()).abs() < 1e-12);
	}

	#[test]
	fn test_rasterize_stays_inside() {
		let circle = Ellipse::circle(na::Point3::new(1.0, 1.0, 0.5), 0.1);
		let points = circle.rasterize(50, 0.01);
		assert!(!points.is_empty());
		assert!(points.iter().all(|p| circle.contains(&p.position)));
	}
}
