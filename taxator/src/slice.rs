use std::path::PathBuf;

use cloud_file::GpdWriter;
use forest::{slicing, HeightMap, Surface};

use crate::{
	ensure_input,
	progress::{Progress, Stage},
	Error,
};

#[derive(clap::Args)]
pub struct Command {
	/// Input cloud, GPD or XYZ
	input: PathBuf,

	/// Output GPD file
	#[arg(long, short)]
	output: PathBuf,

	/// Height of a horizontal slice in meters
	#[arg(long, default_value_t = 0.1)]
	slice_height: f64,

	/// Height map from the terrain command, heights are used as given without it
	#[arg(long)]
	terrain: Option<PathBuf>,
}

pub fn run(command: Command) -> Result<(), Error> {
	ensure_input(&command.input)?;
	if command.slice_height <= 0.0 {
		return Err(Error::InvalidConfiguration("slice height must be positive".into()));
	}
	let terrain = match &command.terrain {
		Some(path) => {
			ensure_input(path)?;
			let map = HeightMap::load(path)?;
			if map.surface() != Surface::Ground {
				return Err(Error::InvalidConfiguration(format!("{:?} is not a terrain map", path)));
			}
			Some(map)
		},
		None => None,
	};

	let stage = Stage::new("Read Cloud");
	let mut cloud = cloud_file::read_cloud(&command.input)?;
	if let Some(terrain) = &terrain {
		terrain.normalize(&mut cloud);
	}
	stage.finish();

	let stage = Stage::new("Slice");
	let slices = slicing::slice(cloud, command.slice_height);
	stage.finish();

	let mut progress = Progress::new("Save", slices.len());
	let mut writer = GpdWriter::create(&command.output, command.slice_height)?;
	for slice in &slices {
		writer.write_slices(std::slice::from_ref(slice))?;
		progress.step();
	}
	writer.finish()?;
	progress.finish();

	log::info!("{} slices written to {:?}", slices.len(), command.output);
	Ok(())
}
