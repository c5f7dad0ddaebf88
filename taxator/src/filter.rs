use std::path::PathBuf;

use cloud_file::{GpdReader, GpdWriter};
use forest::{filters, slicing};
use rayon::prelude::*;

use crate::{
	config::{self, FiltersConfiguration},
	detect::{count_groups, read_sliced},
	ensure_input, prepare_output_folder,
	progress::{Progress, Stage},
	Error,
};

#[derive(clap::Args)]
pub struct Command {
	/// Sliced cloud from the slice command
	input: PathBuf,

	/// JSON file with the group filters
	#[arg(long, short = 'c')]
	filters: PathBuf,

	/// Output folder for the filtered groups
	#[arg(long, short)]
	output: PathBuf,

	/// Cell size for grouping the points of a slice in meters
	#[arg(long, default_value_t = 0.1)]
	mesh_width: f64,

	/// Cells with fewer points are dropped as noise
	#[arg(long, default_value_t = 2)]
	min_points_per_mesh: usize,

	/// One file per slice instead of a single `Filtered.gpd`
	#[arg(long)]
	split: bool,
}

pub fn run(command: Command) -> Result<(), Error> {
	ensure_input(&command.input)?;
	if command.mesh_width <= 0.0 {
		return Err(Error::InvalidConfiguration("mesh width must be positive".into()));
	}
	let configuration = config::read_json::<FiltersConfiguration>(&command.filters)?;
	configuration.validate()?;
	let group_filters = configuration.build();
	prepare_output_folder(&command.output)?;

	let slice_height = GpdReader::open(&command.input)?.header().slice_height;
	let mut slices = read_sliced(&command.input)?;

	let stage = Stage::new("Group");
	slicing::group(&mut slices, command.mesh_width, command.min_points_per_mesh);
	let groups = count_groups(&slices);
	stage.finish();

	let stage = Stage::new("Filter");
	slices.par_iter_mut().for_each(|slice| {
		slice.groups = filters::apply(&group_filters, std::mem::take(&mut slice.groups));
	});
	let kept = count_groups(&slices);
	stage.finish();

	let mut progress = Progress::new("Save", slices.len());
	if command.split {
		for slice in slices.iter().filter(|slice| !slice.groups.is_empty()) {
			let path = command.output.join(format!("Filtered.{}.gpd", slice.index));
			let mut writer = GpdWriter::create(path, slice_height)?;
			writer.write_slices(std::slice::from_ref(slice))?;
			writer.finish()?;
			progress.step();
		}
	} else {
		let mut writer = GpdWriter::create(command.output.join("Filtered.gpd"), slice_height)?;
		for slice in &slices {
			writer.write_slices(std::slice::from_ref(slice))?;
			progress.step();
		}
		writer.finish()?;
	}
	progress.finish();

	log::info!("{} of {} groups kept", kept, groups);
	Ok(())
}

#[cfg(test)]
mod tests {
	use forest::{Point, PointSet};

	use super::*;

	fn make_ring(x: f64, z: f64) -> PointSet {
		(0..60)
			.map(|i| {
				let angle = i as f64 * std::f64::consts::TAU / 60.0;
				Point::new(x + 0.05 * angle.cos(), 0.05 * angle.sin(), z)
			})
			.collect()
	}

	fn make_speck(z: f64) -> PointSet {
		[(0.0, 0.0), (0.004, 0.0), (0.0, 0.004), (0.004, 0.004)]
			.into_iter()
			.map(|(x, y)| Point::new(2.0 + x, 2.0 + y, z))
			.collect()
	}

	fn make_input(dir: &std::path::Path) -> (PathBuf, PathBuf) {
		let input = dir.join("slices.gpd");
		let mut writer = GpdWriter::create(&input, 0.1).unwrap();
		for k in 0..5 {
			let z = k as f64 * 0.1;
			let mut band = make_ring(0.0, z);
			band.extend(make_speck(z));
			writer.write_point_set(&band, k, "").unwrap();
		}
		writer.finish().unwrap();

		let filters = dir.join("filters.json");
		std::fs::write(
			&filters,
			r#"{ "small_groups": { "minimal_size": { "kind": "constant", "value": 0.05 } } }"#,
		)
		.unwrap();
		(input, filters)
	}

	#[test]
	fn test_drops_small_groups() {
		let dir = tempfile::tempdir().unwrap();
		let (input, filters) = make_input(dir.path());
		let output = dir.path().join("filtered");
		run(Command {
			input,
			filters,
			output: output.clone(),
			mesh_width: 0.1,
			min_points_per_mesh: 2,
			split: false,
		})
		.unwrap();

		let mut reader = GpdReader::open(output.join("Filtered.gpd")).unwrap();
		assert_eq!(reader.header().groups, 5);
		assert_eq!(reader.header().slice_height, 0.1);
		let slices = reader.read_slices().unwrap();
		assert_eq!(slices.len(), 5);
		assert!(slices.iter().all(|slice| slice.point_count() == 60));
	}

	#[test]
	fn test_split_output() {
		let dir = tempfile::tempdir().unwrap();
		let (input, filters) = make_input(dir.path());
		let output = dir.path().join("filtered");
		run(Command {
			input,
			filters,
			output: output.clone(),
			mesh_width: 0.1,
			min_points_per_mesh: 2,
			split: true,
		})
		.unwrap();

		for k in 0..5 {
			assert!(output.join(format!("Filtered.{}.gpd", k)).is_file());
		}
		assert!(!output.join("Filtered.gpd").exists());
	}

	#[test]
	fn test_requires_filter_file() {
		let dir = tempfile::tempdir().unwrap();
		let (input, _) = make_input(dir.path());
		let result = run(Command {
			input,
			filters: dir.path().join("none.json"),
			output: dir.path().join("filtered"),
			mesh_width: 0.1,
			min_points_per_mesh: 2,
			split: false,
		});
		assert!(matches!(result, Err(Error::MissingInput(_))));
	}
}
