/// Least squares line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Linear {
	pub slope: f64,
	pub intercept: f64,
}

impl Linear {
	/// Ordinary least squares over paired samples.
	///
	/// Without variance in `x` the slope is zero and the intercept is the
	/// mean of `y`. No samples at all give the zero line.
	pub fn fit(samples: impl IntoIterator<Item = (f64, f64)>) -> Self {
		let samples = samples.into_iter().collect::<Vec<_>>();
		if samples.is_empty() {
			return Self::default();
		}
		let n = samples.len() as f64;
		let mean_x = samples.iter().map(|(x, _)| x).sum::<f64>() / n;
		let mean_y = samples.iter().map(|(_, y)| y).sum::<f64>() / n;

		let mut covariance = 0.0;
		let mut variance = 0.0;
		for &(x, y) in &samples {
			covariance += (x - mean_x) * (y - mean_y);
			variance += (x - mean_x) * (x - mean_x);
		}

		if variance <= f64::EPSILON * n {
			return Self { slope: 0.0, intercept: mean_y };
		}
		let slope = covariance / variance;
		Self {
			slope,
			intercept: mean_y - slope * mean_x,
		}
	}

	pub fn at(&self, x: f64) -> f64 {
		self.slope * x + self.intercept
	}
}

/// Trunk centerline as two lines over height.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Centerline {
	pub x: Linear,
	pub y: Linear,
}

impl Centerline {
	/// Fit from node centers given as `(x, y, z)`.
	pub fn fit(centers: &[nalgebra::Point3<f64>]) -> Self {
		Self {
			x: Linear::fit(centers.iter().map(|c| (c.z, c.x))),
			y: Linear::fit(centers.iter().map(|c| (c.z, c.y))),
		}
	}

	pub fn at(&self, z: f64) -> nalgebra::Point3<f64> {
		nalgebra::Point3::new(self.x.at(z), self.y.at(z), z)
	}
}

/// Power law between trunk radius and the distance from the crown top.
///
/// `radius² = scale * distance^exponent`, fit as a line through
/// `(ln(distance), 2 * ln(radius))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusLaw {
	pub exponent: f64,
	pub scale: f64,
}

impl RadiusLaw {
	/// Samples are `(distance_from_top, major_radius)`; non positive values are skipped.
	///
	/// `None` when no sample is left.
	pub fn fit(samples: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
		let samples = samples
			.into_iter()
			.filter(|&(distance, radius)| distance > 0.0 && radius > 0.0)
			.map(|(distance, radius)| (distance.ln(), 2.0 * radius.ln()))
			.collect::<Vec<_>>();
		if samples.is_empty() {
			return None;
		}
		let line = Linear::fit(samples);
		Some(Self {
			exponent: line.slope,
			scale: line.intercept.exp(),
		})
	}

	pub fn radius_at(&self, distance_from_top: f64) -> f64 {
		(self.scale * distance_from_top.powf(self.exponent)).sqrt()
	}
}
