use rayon::prelude::*;

use crate::{point_set::PointSet, raster};

/// One horizontal band `[height, height + slice_height)` of a cloud.
#[derive(Debug, Clone)]
pub struct PointSlice {
	pub index: usize,
	pub height: f64,
	/// Whole band before grouping, spatial groups afterwards.
	pub groups: Vec<PointSet>,
}

impl PointSlice {
	pub fn point_count(&self) -> usize {
		self.groups.iter().map(PointSet::len).sum()
	}
}

/// Partition `cloud` into bands of `slice_height`, lowest first.
///
/// Bands without points are skipped. The topmost point is put into the
/// last band instead of opening a new one.
pub fn slice(cloud: PointSet, slice_height: f64) -> Vec<PointSlice> {
	if cloud.is_empty() {
		return Vec::new();
	}
	let bounds = cloud.bounds();
	let count = ((bounds.height() / slice_height).ceil() as usize).max(1);

	let mut bands = vec![PointSet::new(); count];
	for point in cloud {
		let index = ((point.z() - bounds.min.z) / slice_height) as usize;
		bands[index.min(count - 1)].push(point);
	}

	let slices = bands
		.into_iter()
		.enumerate()
		.filter(|(_, band)| !band.is_empty())
		.map(|(index, band)| PointSlice {
			index,
			height: bounds.min.z + index as f64 * slice_height,
			groups: vec![band],
		})
		.collect::<Vec<_>>();
	log::debug!("sliced cloud into {} bands of {}", slices.len(), slice_height);
	slices
}

/// Cluster every slice into spatial groups, independent slices in parallel.
pub fn group(slices: &mut [PointSlice], mesh_width: f64, min_points: usize) {
	slices.par_iter_mut().for_each(|slice| {
		let mut band = PointSet::new();
		for mut set in slice.groups.drain(..) {
			set.drain_into(&mut band);
		}
		slice.groups = raster::cluster(band, mesh_width, min_points);
	});
}

/// All groups bottom to top.
pub fn ordered_groups(slices: Vec<PointSlice>) -> Vec<PointSet> {
	let mut slices = slices;
	slices.sort_by_key(|slice| slice.index);
	slices.into_iter().flat_map(|slice| slice.groups).collect()
}
