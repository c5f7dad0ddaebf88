use std::{
	collections::HashMap,
	io::{BufReader, BufWriter},
	path::Path,
};

use crate::{point::Point, point_set::PointSet};

const MAGIC: [u8; 8] = *b"TERRAIN1";

#[derive(thiserror::Error, Debug)]
pub enum TerrainError {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Encoding(#[from] bincode::Error),

	#[error("not a height map")]
	WrongMagic,
}

/// Which extreme of a cell the map records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Surface {
	/// Lowest point, the terrain.
	Ground,
	/// Highest point, the tree tops.
	Canopy,
}

/// Lowest or highest point per square cell.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HeightMap {
	magic: [u8; 8],
	surface: Surface,
	mesh_size: f64,
	max_height: f64,
	cells: HashMap<(i64, i64), f64>,
}

impl HeightMap {
	pub const DEFAULT_MESH_SIZE: f64 = 2.5;
	pub const DEFAULT_MAX_TERRAIN_HEIGHT: f64 = 1.0;
	pub const DEFAULT_MAX_TREE_HEIGHT: f64 = 100.0;

	/// Empty terrain map.
	pub fn new(mesh_size: f64, max_terrain_height: f64) -> Self {
		Self::with_surface(Surface::Ground, mesh_size, max_terrain_height)
	}

	pub fn with_surface(surface: Surface, mesh_size: f64, max_height: f64) -> Self {
		Self {
			magic: MAGIC,
			surface,
			mesh_size,
			max_height,
			cells: HashMap::new(),
		}
	}

	/// Terrain of a cloud.
	pub fn build<'a>(points: impl IntoIterator<Item = &'a Point>, mesh_size: f64, max_terrain_height: f64) -> Self {
		Self::build_surface(Surface::Ground, points, mesh_size, max_terrain_height)
	}

	pub fn build_surface<'a>(
		surface: Surface,
		points: impl IntoIterator<Item = &'a Point>,
		mesh_size: f64,
		max_height: f64,
	) -> Self {
		let mut map = Self::with_surface(surface, mesh_size, max_height);
		for point in points {
			map.add(point);
		}
		log::debug!("{:?} height map with {} cells", surface, map.cells.len());
		map
	}

	/// Points above the height limit are ignored.
	pub fn add(&mut self, point: &Point) {
		if point.z() > self.max_height {
			return;
		}
		let z = point.z();
		let surface = self.surface;
		let key = self.key(point);
		self.cells
			.entry(key)
			.and_modify(|height| {
				*height = match surface {
					Surface::Ground => height.min(z),
					Surface::Canopy => height.max(z),
				}
			})
			.or_insert(z);
	}

	fn key(&self, point: &Point) -> (i64, i64) {
		(
			(point.x() / self.mesh_size).floor() as i64,
			(point.y() / self.mesh_size).floor() as i64,
		)
	}

	pub fn surface(&self) -> Surface {
		self.surface
	}

	pub fn mesh_size(&self) -> f64 {
		self.mesh_size
	}

	pub fn len(&self) -> usize {
		self.cells.len()
	}

	pub fn is_empty(&self) -> bool {
		self.cells.is_empty()
	}

	/// Recorded height of the cell of `point`, 0 for unknown cells.
	pub fn height_at(&self, point: &Point) -> f64 {
		self.cells.get(&self.key(point)).copied().unwrap_or(0.0)
	}

	/// Make heights relative to the ground.
	pub fn normalize(&self, set: &mut PointSet) {
		set.map_heights(|point| point.z() - self.height_at(point));
	}

	pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TerrainError> {
		let file = std::fs::File::create(path)?;
		bincode::serialize_into(BufWriter::new(file), self)?;
		Ok(())
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self, TerrainError> {
		let file = std::fs::File::open(path)?;
		let map: Self = bincode::deserialize_from(BufReader::new(file))?;
		if map.magic != MAGIC {
			return Err(TerrainError::WrongMagic);
		}
		Ok(map)
	}
}

impl Default for HeightMap {
	fn default() -> Self {
		Self::new(Self::DEFAULT_MESH_SIZE, Self::DEFAULT_MAX_TERRAIN_HEIGHT)
	}
}
