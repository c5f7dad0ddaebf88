use std::{
	fs::File,
	io::BufWriter,
	path::{Path, PathBuf},
};

use cloud_file::{GpdReader, XyzWriter};
use forest::{
	builder::{BuildStatistics, MergingParameters, TreeBuilder},
	filters::{self, TreeFilter, TreeHeight},
	slicing::{self, PointSlice},
	HeightMap, Tree,
};
use rayon::prelude::*;

use crate::{
	config::{self, FiltersConfiguration},
	ensure_input, prepare_output_folder,
	progress::{Progress, Stage},
	Error,
};

/// Groups buffered between the file reader and slice assembly.
pub(crate) const READ_CHANNEL_CAPACITY: usize = 256;

#[derive(clap::Args)]
pub struct Settings {
	/// Height of a horizontal slice in meters, only used with --raw
	#[arg(long, default_value_t = 0.1)]
	slice_height: f64,

	/// Cell size of the terrain map in meters, only used with --raw
	#[arg(long, default_value_t = HeightMap::DEFAULT_MESH_SIZE)]
	resolution: f64,

	/// Cell size for grouping the points of a slice in meters
	#[arg(long, default_value_t = 0.1)]
	mesh_width: f64,

	/// Cells with fewer points are dropped as noise
	#[arg(long, default_value_t = 2)]
	min_points_per_mesh: usize,

	/// Trees lower than this in meters are dropped
	#[arg(long, default_value_t = 4.0)]
	minimal_tree_height: f64,
}

#[derive(clap::Args)]
pub struct Command {
	/// Sliced cloud from the slice command, any cloud with --raw
	input: PathBuf,

	/// Output folder for the detected trees
	#[arg(long, short)]
	output: PathBuf,

	/// Remove the terrain and slice the input before detection
	#[arg(long)]
	raw: bool,

	/// JSON file with the group filters
	#[arg(long)]
	filters: Option<PathBuf>,

	/// JSON file with the merging parameters
	#[arg(long)]
	merging: Option<PathBuf>,

	/// Export every tree as XYZ as well
	#[arg(long)]
	preview: bool,

	#[command(flatten)]
	settings: Settings,
}

#[derive(Default, serde::Serialize)]
pub struct Statistics {
	points: usize,
	slices: usize,
	groups: usize,
	filtered_groups: usize,
	build: BuildStatistics,
	trees: usize,
	kept_trees: usize,
	times: Times,
}

#[derive(Default, serde::Serialize)]
pub struct Times {
	read: f32,
	group: f32,
	build: f32,
	save: f32,
}

pub fn run(command: Command) -> Result<(), Error> {
	ensure_input(&command.input)?;
	let settings = command.settings;
	if settings.slice_height <= 0.0 || settings.resolution <= 0.0 || settings.mesh_width <= 0.0 {
		return Err(Error::InvalidConfiguration(
			"slice height, resolution and mesh width must be positive".into(),
		));
	}
	let configuration = config::read_or_default::<FiltersConfiguration>(command.filters.as_deref())?;
	configuration.validate()?;
	let group_filters = configuration.build();
	let merging = config::read_or_default::<MergingParameters>(command.merging.as_deref())?;
	config::validate_merging(&merging)?;
	prepare_output_folder(&command.output)?;

	let mut statistics = Statistics::default();

	let start = std::time::Instant::now();
	let mut slices = if command.raw {
		read_raw(&command.input, &settings)?
	} else {
		read_sliced(&command.input)?
	};
	statistics.times.read = start.elapsed().as_secs_f32();
	statistics.points = slices.iter().map(PointSlice::point_count).sum();
	statistics.slices = slices.len();

	let stage = Stage::new("Group");
	slicing::group(&mut slices, settings.mesh_width, settings.min_points_per_mesh);
	statistics.groups = count_groups(&slices);
	slices.par_iter_mut().for_each(|slice| {
		slice.groups = filters::apply(&group_filters, std::mem::take(&mut slice.groups));
	});
	statistics.filtered_groups = count_groups(&slices);
	statistics.times.group = stage.finish();

	let groups = slicing::ordered_groups(slices);
	let mut progress = Progress::new("Build Trees", groups.len());
	let mut builder = TreeBuilder::new(merging.clone());
	for group in groups {
		builder.add_group(group);
		progress.step();
	}
	statistics.build = builder.statistics();
	let trees = builder.finish();
	statistics.trees = trees.len();
	let trees = TreeHeight {
		minimal_height: settings.minimal_tree_height,
	}
	.filter(trees);
	statistics.kept_trees = trees.len();
	statistics.times.build = progress.finish();

	let stage = Stage::new("Save Trees");
	trees
		.par_iter()
		.enumerate()
		.try_for_each(|(index, tree)| save_tree(&command.output, index, tree, merging.slice_height, command.preview))?;
	let file = File::create(command.output.join("statistics.json"))?;
	statistics.times.save = stage.finish();
	serde_json::to_writer_pretty(BufWriter::new(file), &statistics)?;

	log::info!(
		"{} of {} trees kept from {} groups",
		statistics.kept_trees,
		statistics.trees,
		statistics.filtered_groups
	);
	Ok(())
}

pub(crate) fn count_groups(slices: &[PointSlice]) -> usize {
	slices.iter().map(|slice| slice.groups.len()).sum()
}

/// Stream groups from the file while they are sorted into slices.
pub(crate) fn read_sliced(path: &Path) -> Result<Vec<PointSlice>, Error> {
	let reader = GpdReader::open(path)?;
	let mut progress = Progress::new("Read Slices", reader.header().groups as usize);

	let (sender, receiver) = crossbeam::channel::bounded(READ_CHANNEL_CAPACITY);
	let (read, groups) = rayon::join(
		move || -> Result<(), cloud_file::Error> {
			for group in reader {
				let (meta, set) = group?;
				if sender.send((meta.slice, set)).is_err() {
					break;
				}
			}
			Ok(())
		},
		|| {
			let mut groups = Vec::new();
			for group in receiver {
				groups.push(group);
				progress.step();
			}
			groups
		},
	);
	read?;
	progress.finish();

	Ok(cloud_file::assemble_slices(groups))
}

/// Remove the terrain from an unprocessed cloud and slice it.
fn read_raw(path: &Path, settings: &Settings) -> Result<Vec<PointSlice>, Error> {
	let stage = Stage::new("Read Cloud");
	let mut cloud = cloud_file::read_cloud(path)?;
	let terrain = HeightMap::build(cloud.iter(), settings.resolution, HeightMap::DEFAULT_MAX_TERRAIN_HEIGHT);
	terrain.normalize(&mut cloud);
	let slices = slicing::slice(cloud, settings.slice_height);
	stage.finish();
	Ok(slices)
}

fn save_tree(folder: &Path, index: usize, tree: &Tree, slice_height: f64, preview: bool) -> Result<(), Error> {
	cloud_file::write_tree(folder.join(format!("T{}.gpd", index)), tree, slice_height)?;
	if preview {
		let mut writer = XyzWriter::create(folder.join(format!("T{}.xyz", index)))?;
		for node in tree.nodes() {
			writer.write_point_set(&node.point_set)?;
		}
		writer.finish()?;
	}
	Ok(())
}
