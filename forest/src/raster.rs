use nalgebra as na;

use crate::{point::Point, point_set::PointSet};

/// Square mesh of point buckets centered on the centroid of a point set.
///
/// The grid owns the bucketed points. Cells are stored x-major, an empty
/// set marks an unoccupied cell.
pub struct RasterGrid {
	center: na::Point3<f64>,
	mesh_width: f64,
	size: usize,
	cells: Vec<PointSet>,
}

impl RasterGrid {
	/// Takes every point out of `set`.
	pub fn new(set: PointSet, mesh_width: f64) -> Self {
		let center = set.center();
		let bounds = set.bounds();
		let half = [
			center.x - bounds.min.x,
			bounds.max.x - center.x,
			center.y - bounds.min.y,
			bounds.max.y - center.y,
		]
		.into_iter()
		.fold(0.0, f64::max);
		let size = (2.0 * half / mesh_width).ceil() as usize + 2;

		let mut grid = Self::with_layout(center, mesh_width, size);
		for point in set {
			grid.insert(point);
		}
		grid
	}

	/// Empty grid of `size` by `size` cells around `center`.
	pub fn with_layout(center: na::Point3<f64>, mesh_width: f64, size: usize) -> Self {
		Self {
			center,
			mesh_width,
			size,
			cells: vec![PointSet::new(); size * size],
		}
	}

	pub fn center(&self) -> na::Point3<f64> {
		self.center
	}

	pub fn size(&self) -> usize {
		self.size
	}

	fn cell_index(&self, position: &na::Point3<f64>) -> Option<(usize, usize)> {
		let half = self.size as f64 / 2.0;
		let x = ((position.x - self.center.x) / self.mesh_width + half).floor();
		let y = ((position.y - self.center.y) / self.mesh_width + half).floor();
		let range = 0.0..self.size as f64;
		(range.contains(&x) && range.contains(&y)).then_some((x as usize, y as usize))
	}

	/// Bucket a point, returns false when it falls outside the grid.
	pub fn insert(&mut self, point: Point) -> bool {
		let Some((x, y)) = self.cell_index(&point.position) else {
			return false;
		};
		self.cells[x * self.size + y].push(point);
		true
	}

	pub fn cell(&self, x: usize, y: usize) -> &PointSet {
		&self.cells[x * self.size + y]
	}

	pub fn occupied_cells(&self) -> usize {
		self.cells.iter().filter(|cell| !cell.is_empty()).count()
	}

	/// Clear every cell holding fewer than `minimum` points.
	pub fn filter_low_density(&mut self, minimum: usize) {
		for cell in self.cells.iter_mut() {
			if cell.len() < minimum {
				cell.clear();
			}
		}
	}

	/// Keep at most `maximum` points per cell.
	pub fn limit_density(&mut self, maximum: usize) {
		for cell in self.cells.iter_mut() {
			cell.truncate(maximum);
		}
	}

	/// Move the cell at `(x, y)` and everything 8-connected to it into `target`.
	pub fn merge_with_neighbours(&mut self, x: usize, y: usize, target: &mut PointSet) {
		let mut stack = vec![(x, y)];
		while let Some((x, y)) = stack.pop() {
			let index = x * self.size + y;
			if self.cells[index].is_empty() {
				continue;
			}
			self.cells[index].drain_into(target);

			for dx in -1isize..=1 {
				for dy in -1isize..=1 {
					if dx == 0 && dy == 0 {
						continue;
					}
					let (Some(nx), Some(ny)) = (x.checked_add_signed(dx), y.checked_add_signed(dy)) else {
						continue;
					};
					if nx < self.size && ny < self.size && !self.cells[nx * self.size + ny].is_empty() {
						stack.push((nx, ny));
					}
				}
			}
		}
	}

	/// Connected groups of occupied cells in scan order.
	pub fn extract_groups(&mut self) -> Vec<PointSet> {
		let mut groups = Vec::new();
		for x in 0..self.size {
			for y in 0..self.size {
				if self.cell(x, y).is_empty() {
					continue;
				}
				let mut group = PointSet::new();
				self.merge_with_neighbours(x, y, &mut group);
				groups.push(group);
			}
		}
		groups
	}

	/// Every remaining point in one set.
	pub fn merge(mut self) -> PointSet {
		let mut merged = PointSet::new();
		for cell in self.cells.iter_mut() {
			cell.drain_into(&mut merged);
		}
		merged
	}
}

/// Split `set` into spatially connected groups.
///
/// Cells with fewer than `min_points` points are dropped as noise.
pub fn cluster(set: PointSet, mesh_width: f64, min_points: usize) -> Vec<PointSet> {
	if set.is_empty() {
		return Vec::new();
	}
	let mut grid = RasterGrid::new(set, mesh_width);
	grid.filter_low_density(min_points);
	grid.extract_groups()
}

#[cfg(test)]
mod tests {
	use rand::{rngs::StdRng, Rng, SeedableRng};

	use super::*;

	fn make_blob(rng: &mut StdRng, x: f64, y: f64, radius: f64, count: usize) -> Vec<Point> {
		(0..count)
			.map(|_| {
				Point::new(
					x + rng.gen_range(-radius..radius),
					y + rng.gen_range(-radius..radius),
					rng.gen_range(1.0..1.1),
				)
			})
			.collect()
	}

	fn sorted_positions(groups: &[PointSet]) -> Vec<[u64; 3]> {
		let mut positions = groups
			.iter()
			.flat_map(|group| group.iter())
			.map(|p| [p.x().to_bits(), p.y().to_bits(), p.z().to_bits()])
			.collect::<Vec<_>>();
		positions.sort();
		positions
	}

	#[test]
	fn test_empty_input() {
		assert!(cluster(PointSet::new(), 0.1, 2).is_empty());
	}

	#[test]
	fn test_no_point_dropped_by_sizing() {
		let mut rng = StdRng::seed_from_u64(1);
		let mut points = make_blob(&mut rng, 0.0, 0.0, 0.2, 100);
		points.push(Point::new(7.3, -4.1, 1.0));
		points.push(Point::new(-3.9, 6.2, 1.0));
		let grid = RasterGrid::new(PointSet::from(points), 0.1);
		assert_eq!(grid.merge().len(), 102);
	}

	#[test]
	fn test_separate_blobs() {
		let mut rng = StdRng::seed_from_u64(2);
		let mut points = make_blob(&mut rng, 0.0, 0.0, 0.15, 300);
		points.extend(make_blob(&mut rng, 3.0, 1.0, 0.15, 300));
		let groups = cluster(PointSet::from(points), 0.1, 2);

		assert_eq!(groups.len(), 2);
		assert_eq!(groups.iter().map(PointSet::len).sum::<usize>(), 600);
		for group in &groups {
			let bounds = group.bounds();
			assert!(bounds.width() < 0.5 && bounds.depth() < 0.5);
		}
	}

	#[test]
	fn test_sparse_cell_is_cleared() {
		let mut points = (0..9).map(|_| Point::new(2.05, 0.05, 1.0)).collect::<Vec<_>>();
		points.extend((0..12).map(|i| Point::new(0.01 * i as f64, 0.05, 1.0)));
		let groups = cluster(PointSet::from(points), 1.0, 10);

		assert_eq!(groups.len(), 1);
		assert_eq!(groups[0].len(), 12);
		assert!(groups[0].iter().all(|p| p.x() < 1.0));
	}

	#[test]
	fn test_diagonal_cells_are_connected() {
		let points = vec![
			Point::new(0.05, 0.05, 0.0),
			Point::new(0.15, 0.15, 0.0),
			Point::new(0.25, 0.25, 0.0),
			Point::new(0.85, 0.05, 0.0),
		];
		let groups = cluster(PointSet::from(points), 0.1, 1);
		let mut sizes = groups.iter().map(PointSet::len).collect::<Vec<_>>();
		sizes.sort();
		assert_eq!(sizes, vec![1, 3]);
	}

	#[test]
	fn test_partition_and_idempotence() {
		let mut rng = StdRng::seed_from_u64(3);
		let mut points = Vec::new();
		for _ in 0..6 {
			let (x, y) = (rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0));
			points.extend(make_blob(&mut rng, x, y, 0.3, 150));
		}
		points.extend(make_blob(&mut rng, 0.0, 0.0, 6.0, 40));
		let total = points.len();

		let mut grid = RasterGrid::new(PointSet::from(points), 0.1);
		let (center, size) = (grid.center(), grid.size());
		grid.filter_low_density(3);
		let first = grid.extract_groups();
		assert_eq!(grid.occupied_cells(), 0);

		let positions = sorted_positions(&first);
		let mut unique = positions.clone();
		unique.dedup();
		assert_eq!(unique.len(), positions.len());
		assert!(positions.len() <= total);

		let mut regridded = RasterGrid::with_layout(center, 0.1, size);
		for group in first.iter().cloned() {
			for point in group {
				assert!(regridded.insert(point));
			}
		}
		regridded.filter_low_density(3);
		let second = regridded.extract_groups();

		assert_eq!(second.len(), first.len());
		for (a, b) in first.iter().zip(second.iter()) {
			assert_eq!(sorted_positions(std::slice::from_ref(a)), sorted_positions(std::slice::from_ref(b)));
		}

		let union = first.iter().flat_map(|group| group.iter().copied()).collect::<PointSet>();
		let rebuilt = RasterGrid::new(union, 0.1).merge();
		assert_eq!(sorted_positions(&[rebuilt]), positions);
	}

	fn make_lattice(x: f64, y: f64) -> Vec<Point> {
		(0..20)
			.flat_map(|i| (0..20).map(move |j| Point::new(x + 0.03 * i as f64, y + 0.03 * j as f64, 1.0)))
			.collect()
	}

	fn sorted_partition(groups: &[PointSet]) -> Vec<Vec<[u64; 3]>> {
		let mut partition = groups
			.iter()
			.map(|group| sorted_positions(std::slice::from_ref(group)))
			.collect::<Vec<_>>();
		partition.sort();
		partition
	}

	#[test]
	fn test_regrouping_union_is_stable() {
		let mut points = Vec::new();
		for (x, y) in [(0.0, 0.0), (2.0, 0.0), (4.0, 0.5), (0.5, 3.0), (3.0, 3.0)] {
			points.extend(make_lattice(x, y));
		}
		let first = cluster(PointSet::from(points), 0.1, 1);
		assert_eq!(first.len(), 5);

		// the union has another centroid, so the cell borders move
		let union = first.iter().flat_map(|group| group.iter().copied()).collect::<PointSet>();
		let mut grid = RasterGrid::new(union, 0.1);
		grid.filter_low_density(1);
		let second = grid.extract_groups();

		assert_eq!(sorted_partition(&second), sorted_partition(&first));
	}

	#[test]
	fn test_limit_density() {
		let points = (0..50).map(|i| Point::new(0.001 * i as f64, 0.0, 0.0)).collect::<PointSet>();
		let mut grid = RasterGrid::new(points, 0.05);
		grid.limit_density(10);
		assert_eq!(grid.merge().len(), 10);
	}
}
