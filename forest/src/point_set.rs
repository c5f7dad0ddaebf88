use std::sync::OnceLock;

use nalgebra as na;

use crate::{bounds::BoundingBox, point::Point};

/// Owned collection of points with lazily cached extent and centroid.
///
/// Every mutation clears both caches, they are recomputed on the next read.
#[derive(Debug, Default, Clone)]
pub struct PointSet {
	points: Vec<Point>,
	bounds: OnceLock<BoundingBox>,
	center: OnceLock<na::Point3<f64>>,
}

impl PointSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn single(point: Point) -> Self {
		Self::from(vec![point])
	}

	pub fn len(&self) -> usize {
		self.points.len()
	}

	pub fn is_empty(&self) -> bool {
		self.points.is_empty()
	}

	pub fn points(&self) -> &[Point] {
		&self.points
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Point> {
		self.points.iter()
	}

	fn invalidate(&mut self) {
		self.bounds.take();
		self.center.take();
	}

	pub fn push(&mut self, point: Point) {
		self.invalidate();
		self.points.push(point);
	}

	pub fn remove(&mut self, index: usize) -> Point {
		self.invalidate();
		self.points.swap_remove(index)
	}

	pub fn clear(&mut self) {
		self.invalidate();
		self.points.clear();
	}

	pub fn truncate(&mut self, len: usize) {
		if len < self.points.len() {
			self.invalidate();
			self.points.truncate(len);
		}
	}

	/// Move every point into `other`, leaving this set empty.
	///
	/// Both caches are invalidated in the same call so no point is ever
	/// covered by the cached extent of two sets.
	pub fn drain_into(&mut self, other: &mut Self) {
		if self.points.is_empty() {
			return;
		}
		self.invalidate();
		other.invalidate();
		other.points.append(&mut self.points);
	}

	pub fn into_points(self) -> Vec<Point> {
		self.points
	}

	/// Axis aligned extent, a zero sized box at the origin for an empty set.
	pub fn bounds(&self) -> BoundingBox {
		*self.bounds.get_or_init(|| {
			let bounds = BoundingBox::from_points(self.points.iter().map(|p| &p.position))
				.unwrap_or_default();
			debug_assert!(self.points.iter().all(|p| bounds.contains(&p.position)));
			bounds
		})
	}

	/// Mean position, the origin for an empty set.
	pub fn center(&self) -> na::Point3<f64> {
		*self.center.get_or_init(|| {
			if self.points.is_empty() {
				return na::Point3::origin();
			}
			let sum = self
				.points
				.iter()
				.fold(na::Vector3::zeros(), |sum, p| sum + p.position.coords);
			na::Point3::from(sum / self.points.len() as f64)
		})
	}

	/// Copy shifted so the center of the bounding box lies at the origin.
	pub fn normalized(&self) -> Self {
		let offset = self.bounds().center().coords;
		self.points
			.iter()
			.map(|p| Point {
				position: p.position - offset,
				intensity: p.intensity,
			})
			.collect()
	}

	pub fn map_heights(&mut self, mut change: impl FnMut(&Point) -> f64) {
		self.invalidate();
		for point in self.points.iter_mut() {
			point.position.z = change(point);
		}
	}

	pub fn set_intensity(&mut self, intensity: f64) {
		for point in self.points.iter_mut() {
			point.intensity = intensity;
		}
	}
}

impl From<Vec<Point>> for PointSet {
	fn from(points: Vec<Point>) -> Self {
		Self {
			points,
			bounds: OnceLock::new(),
			center: OnceLock::new(),
		}
	}
}

impl FromIterator<Point> for PointSet {
	fn from_iter<T: IntoIterator<Item = Point>>(iter: T) -> Self {
		Self::from(iter.into_iter().collect::<Vec<_>>())
	}
}

impl Extend<Point> for PointSet {
	fn extend<T: IntoIterator<Item = Point>>(&mut self, iter: T) {
		self.invalidate();
		self.points.extend(iter);
	}
}

impl IntoIterator for PointSet {
	type Item = Point;
	type IntoIter = std::vec::IntoIter<Point>;

	fn into_iter(self) -> Self::IntoIter {
		self.points.into_iter()
	}
}

impl<'a> IntoIterator for &'a PointSet {
	type Item = &'a Point;
	type IntoIter = std::slice::Iter<'a, Point>;

	fn into_iter(self) -> Self::IntoIter {
		self.points.iter()
	}
}

#[cfg(test)]
mod tests {
	use rand::{rngs::StdRng, Rng, SeedableRng};

	use super::*;

	#[test]
	fn test_empty_set() {
		let set = PointSet::new();
		assert!(set.is_empty());
		assert_eq!(set.center(), na::Point3::origin());
		assert_eq!(set.bounds(), BoundingBox::default());
	}

	#[test]
	fn test_center_is_mean() {
		let set = PointSet::from(vec![
			Point::new(0.0, 0.0, 0.0),
			Point::new(1.0, 0.0, 0.0),
			Point::new(5.0, 3.0, 3.0),
		]);
		assert_eq!(set.center(), na::Point3::new(2.0, 1.0, 1.0));
		assert_eq!(set.bounds().center(), na::Point3::new(2.5, 1.5, 1.5));
	}

	#[test]
	fn test_mutation_invalidates_caches() {
		let mut set = PointSet::single(Point::new(1.0, 1.0, 1.0));
		assert_eq!(set.center(), na::Point3::new(1.0, 1.0, 1.0));
		set.push(Point::new(3.0, 1.0, 1.0));
		assert_eq!(set.center(), na::Point3::new(2.0, 1.0, 1.0));
		assert_eq!(set.bounds().width(), 2.0);

		let removed = set.remove(1);
		assert_eq!(removed.x(), 3.0);
		assert_eq!(set.bounds().width(), 0.0);
	}

	#[test]
	fn test_bounds_cover_points_after_random_edits() {
		let mut rng = StdRng::seed_from_u64(7);
		let mut set = PointSet::new();
		for round in 0..200 {
			if round % 3 == 2 && !set.is_empty() {
				let index = rng.gen_range(0..set.len());
				set.remove(index);
			} else {
				set.push(Point::new(
					rng.gen_range(-10.0..10.0),
					rng.gen_range(-10.0..10.0),
					rng.gen_range(0.0..30.0),
				));
			}
			let bounds = set.bounds();
			assert!(set.iter().all(|p| bounds.contains(&p.position)));
		}
	}

	#[test]
	fn test_drain_into_moves_points() {
		let mut a = PointSet::from(vec![Point::new(0.0, 0.0, 0.0), Point::new(1.0, 1.0, 1.0)]);
		let mut b = PointSet::single(Point::new(5.0, 5.0, 5.0));
		let _ = (a.bounds(), b.bounds());

		a.drain_into(&mut b);
		assert!(a.is_empty());
		assert_eq!(b.len(), 3);
		assert_eq!(a.bounds(), BoundingBox::default());
		assert_eq!(b.bounds().min, na::Point3::origin());
		assert_eq!(b.bounds().max, na::Point3::new(5.0, 5.0, 5.0));
	}

	#[test]
	fn test_normalized_centers_box() {
		let set = PointSet::from(vec![Point::new(10.0, 20.0, 0.0), Point::new(12.0, 24.0, 2.0)]);
		let normalized = set.normalized();
		assert_eq!(normalized.bounds().center(), na::Point3::origin());
		assert_eq!(normalized.bounds().width(), 2.0);
	}
}
