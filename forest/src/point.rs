use nalgebra as na;

/// Scanned point with an optional scalar attribute.
///
/// The layout is fixed so that blocks of points can be cast to raw bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Point {
	pub position: na::Point3<f64>,
	/// Intensity from the scanner, or the ellipse fitness after filtering.
	pub intensity: f64,
}

static_assertions::assert_eq_size!(Point, [f64; 4]);

impl Point {
	pub fn new(x: f64, y: f64, z: f64) -> Self {
		Self::with_intensity(x, y, z, 0.0)
	}

	pub fn with_intensity(x: f64, y: f64, z: f64, intensity: f64) -> Self {
		Self {
			position: na::Point3::new(x, y, z),
			intensity,
		}
	}

	pub fn x(&self) -> f64 {
		self.position.x
	}

	pub fn y(&self) -> f64 {
		self.position.y
	}

	pub fn z(&self) -> f64 {
		self.position.z
	}
}

impl From<na::Point3<f64>> for Point {
	fn from(position: na::Point3<f64>) -> Self {
		Self { position, intensity: 0.0 }
	}
}

pub fn planar_distance(a: &na::Point3<f64>, b: &na::Point3<f64>) -> f64 {
	planar_distance_squared(a, b).sqrt()
}

pub fn planar_distance_squared(a: &na::Point3<f64>, b: &na::Point3<f64>) -> f64 {
	let dx = a.x - b.x;
	let dy = a.y - b.y;
	dx * dx + dy * dy
}

pub fn manhattan_distance(a: &na::Point3<f64>, b: &na::Point3<f64>) -> f64 {
	(a.x - b.x).abs() + (a.y - b.y).abs()
}

/// Slice alignment key, the height rounded to one decimal with ties to even.
pub fn height_key(z: f64) -> i64 {
	(z * 10.0).round_ties_even() as i64
}

pub fn round_height(z: f64) -> f64 {
	(z * 10.0).round_ties_even() / 10.0
}

/// Lower boundary of the slice containing `z`.
///
/// A small tolerance keeps heights like `0.3` from landing on `0.2`
/// because of representation error.
pub fn align_to_slice(z: f64, slice_height: f64) -> f64 {
	slice_height * (z / slice_height + 1e-6).floor()
}
