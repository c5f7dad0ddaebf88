use std::path::PathBuf;

use forest::{HeightMap, Surface};

use crate::{ensure_input, progress::Stage, Error};

#[derive(clap::Args)]
pub struct Command {
	/// Input cloud, GPD, PCD or XYZ
	input: PathBuf,

	/// Output height map
	#[arg(long, short)]
	output: PathBuf,

	/// Cell size of the height map in meters
	#[arg(long, short, default_value_t = HeightMap::DEFAULT_MESH_SIZE)]
	resolution: f64,

	/// Points above this height in meters are ignored
	#[arg(long, default_value_t = HeightMap::DEFAULT_MAX_TREE_HEIGHT)]
	max_height: f64,
}

pub fn run(command: Command) -> Result<(), Error> {
	ensure_input(&command.input)?;
	if command.resolution <= 0.0 {
		return Err(Error::InvalidConfiguration("resolution must be positive".into()));
	}

	let stage = Stage::new("Read Cloud");
	let cloud = cloud_file::read_cloud(&command.input)?;
	stage.finish();

	let stage = Stage::new("Tree Heights");
	let map = HeightMap::build_surface(Surface::Canopy, cloud.iter(), command.resolution, command.max_height);
	map.save(&command.output)?;
	stage.finish();

	log::info!("{} points, {} canopy cells", cloud.len(), map.len());
	Ok(())
}
