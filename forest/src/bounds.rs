use nalgebra as na;

/// Axis aligned box, `min` holds the minima and `max` the maxima.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
	pub min: na::Point3<f64>,
	pub max: na::Point3<f64>,
}

impl BoundingBox {
	pub fn new(a: na::Point3<f64>, b: na::Point3<f64>) -> Self {
		Self { min: a.inf(&b), max: a.sup(&b) }
	}

	pub fn from_point(point: na::Point3<f64>) -> Self {
		Self { min: point, max: point }
	}

	/// Smallest box around all positions, `None` without any.
	pub fn from_points<'a>(mut points: impl Iterator<Item = &'a na::Point3<f64>>) -> Option<Self> {
		let first = points.next()?;
		let mut bounds = Self::from_point(*first);
		for point in points {
			bounds.broaden_point(point);
		}
		Some(bounds)
	}

	pub fn width(&self) -> f64 {
		self.max.x - self.min.x
	}

	pub fn depth(&self) -> f64 {
		self.max.y - self.min.y
	}

	pub fn height(&self) -> f64 {
		self.max.z - self.min.z
	}

	pub fn center(&self) -> na::Point3<f64> {
		na::center(&self.min, &self.max)
	}

	pub fn broaden_point(&mut self, point: &na::Point3<f64>) {
		self.min = self.min.inf(point);
		self.max = self.max.sup(point);
	}

	pub fn broaden(&mut self, other: &Self) {
		self.min = self.min.inf(&other.min);
		self.max = self.max.sup(&other.max);
	}

	/// Grow the box by `amount` on every side.
	pub fn expand(&mut self, amount: f64) {
		let offset = na::Vector3::repeat(amount);
		self.min -= offset;
		self.max += offset;
	}

	pub fn intersect(&self, other: &Self) -> Option<Self> {
		let min = self.min.sup(&other.min);
		let max = self.max.inf(&other.max);
		(min.x <= max.x && min.y <= max.y && min.z <= max.z).then_some(Self { min, max })
	}

	/// Inclusive on every axis.
	pub fn contains(&self, point: &na::Point3<f64>) -> bool {
		self.contains_planar(point) && self.min.z <= point.z && point.z <= self.max.z
	}

	pub fn contains_planar(&self, point: &na::Point3<f64>) -> bool {
		self.min.x <= point.x && point.x <= self.max.x && self.min.y <= point.y && point.y <= self.max.y
	}

	/// `other` lies completely inside this box.
	pub fn includes(&self, other: &Self) -> bool {
		self.contains(&other.min) && self.contains(&other.max)
	}

	pub fn overlaps(&self, other: &Self) -> bool {
		self.overlaps_planar(other) && self.min.z <= other.max.z && other.min.z <= self.max.z
	}

	pub fn overlaps_planar(&self, other: &Self) -> bool {
		self.min.x <= other.max.x
			&& other.min.x <= self.max.x
			&& self.min.y <= other.max.y
			&& other.min.y <= self.max.y
	}
}

impl Default for BoundingBox {
	fn default() -> Self {
		Self::from_point(na::Point3::origin())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn make_box(min: [f64; 3], max: [f64; 3]) -> BoundingBox {
		BoundingBox::new(min.into(), max.into())
	}

	#[test]
	fn test_new_orders_corners() {
		let b = make_box([1.0, -1.0, 2.0], [0.0, 1.0, 0.0]);
		assert_eq!(b.min, na::Point3::new(0.0, -1.0, 0.0));
		assert_eq!(b.max, na::Point3::new(1.0, 1.0, 2.0));
		assert_eq!(b.width(), 1.0);
		assert_eq!(b.depth(), 2.0);
		assert_eq!(b.height(), 2.0);
	}

	#[test]
	fn test_broaden_and_contains() {
		let mut b = make_box([0.0; 3], [1.0; 3]);
		assert!(!b.contains(&na::Point3::new(2.0, 0.5, 0.5)));
		b.broaden_point(&na::Point3::new(2.0, 0.5, 0.5));
		assert!(b.contains(&na::Point3::new(2.0, 0.5, 0.5)));
		assert!(b.contains(&na::Point3::new(0.0, 0.0, 0.0)));

		b.broaden(&make_box([-1.0, 0.0, 0.0], [0.0, 0.0, 5.0]));
		assert!(b.includes(&make_box([-1.0, 0.0, 0.0], [2.0, 1.0, 5.0])));
	}

	#[test]
	fn test_planar_contains_ignores_height() {
		let b = make_box([0.0; 3], [1.0; 3]);
		let point = na::Point3::new(0.5, 0.5, 10.0);
		assert!(b.contains_planar(&point));
		assert!(!b.contains(&point));
	}

	#[test]
	fn test_intersect_and_overlap() {
		let a = make_box([0.0; 3], [2.0; 3]);
		let b = make_box([1.0, 1.0, 5.0], [3.0, 3.0, 6.0]);
		assert!(a.overlaps_planar(&b));
		assert!(!a.overlaps(&b));
		assert_eq!(a.intersect(&b), None);

		let c = make_box([1.0; 3], [3.0; 3]);
		assert_eq!(a.intersect(&c), Some(make_box([1.0; 3], [2.0; 3])));
	}
}
