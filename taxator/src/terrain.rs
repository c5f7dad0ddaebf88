use std::path::PathBuf;

use forest::HeightMap;

use crate::{
	ensure_input,
	progress::Stage,
	Error,
};

#[derive(clap::Args)]
pub struct Command {
	/// Input cloud, GPD or XYZ
	input: PathBuf,

	/// Output height map
	#[arg(long, short)]
	output: PathBuf,

	/// Cell size of the height map in meters
	#[arg(long, default_value_t = HeightMap::DEFAULT_MESH_SIZE)]
	resolution: f64,

	/// Points above this height in meters are not ground
	#[arg(long, default_value_t = HeightMap::DEFAULT_MAX_TERRAIN_HEIGHT)]
	max_terrain_height: f64,
}

pub fn run(command: Command) -> Result<(), Error> {
	ensure_input(&command.input)?;
	if command.resolution <= 0.0 {
		return Err(Error::InvalidConfiguration("resolution must be positive".into()));
	}

	let stage = Stage::new("Read Cloud");
	let cloud = cloud_file::read_cloud(&command.input)?;
	stage.finish();

	let stage = Stage::new("Height Map");
	let map = HeightMap::build(cloud.iter(), command.resolution, command.max_terrain_height);
	map.save(&command.output)?;
	stage.finish();

	log::info!("{} points, {} terrain cells", cloud.len(), map.len());
	Ok(())
}
