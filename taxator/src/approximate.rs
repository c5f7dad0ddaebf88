use std::{
	fs::File,
	io::BufWriter,
	path::{Path, PathBuf},
};

use cloud_file::XyzWriter;
use forest::{
	approximation::{Approximation, ApproximationSettings},
	gap_filling::FillReport,
	Tree,
};
use rayon::prelude::*;

use crate::{config, ensure_input, info::TreeInfo, prepare_output_folder, progress::Progress, Error};

const PREVIEW_HALF_SIZE: i32 = 50;
const PREVIEW_RESOLUTION: f64 = 0.01;
/// Results buffered between the workers and the tally.
const RESULT_CHANNEL_CAPACITY: usize = 64;

#[derive(clap::Args)]
pub struct Command {
	/// Folder with the trees of the detect command
	input: PathBuf,

	/// Output folder for the tree descriptions
	#[arg(long, short)]
	output: PathBuf,

	/// JSON file with the approximation settings
	#[arg(long)]
	config: Option<PathBuf>,

	/// Height of every tree in meters, the highest node is used otherwise
	#[arg(long)]
	tree_height: Option<f64>,

	/// Export the fitted cross-sections as XYZ as well
	#[arg(long)]
	preview: bool,
}

#[derive(Default, serde::Serialize)]
pub struct Statistics {
	trees: usize,
	approximated: usize,
	rejected: usize,
	failed: usize,
	synthesized: FillReport,
	time: f32,
}

impl Statistics {
	fn add(&mut self, report: &FillReport) {
		self.approximated += 1;
		self.synthesized.ground += report.ground;
		self.synthesized.between += report.between;
		self.synthesized.above += report.above;
		self.synthesized.ellipses += report.ellipses;
	}
}

pub fn run(command: Command) -> Result<(), Error> {
	ensure_input(&command.input)?;
	let settings = config::read_or_default::<ApproximationSettings>(command.config.as_deref())?;
	config::validate_approximation(&settings)?;
	prepare_output_folder(&command.output)?;

	let trees = tree_files(&command.input)?;
	if trees.is_empty() {
		log::warn!("no tree files in {:?}", command.input);
	}
	let approximation = Approximation::new(settings);
	let mut statistics = Statistics {
		trees: trees.len(),
		..Default::default()
	};
	let mut progress = Progress::new("Approximate", trees.len());

	let (sender, receiver) = crossbeam::channel::bounded(RESULT_CHANNEL_CAPACITY);
	let mut first_error = None;
	rayon::join(
		|| {
			trees.par_iter().for_each_with(sender, |sender, (index, path)| {
				let result = approximate_tree(&approximation, &command, *index, path);
				if let Err(err) = sender.send((*index, result)) {
					log::warn!("T{} result lost: {}", index, err);
				}
			});
		},
		|| {
			for (index, result) in receiver {
				match result {
					Ok(Some(report)) => statistics.add(&report),
					Ok(None) => statistics.rejected += 1,
					Err(err) => {
						log::error!("T{}: {}", index, err);
						statistics.failed += 1;
						first_error.get_or_insert(err);
					},
				}
				progress.step();
			}
		},
	);
	statistics.time = progress.finish();

	let file = File::create(command.output.join("statistics.json"))?;
	serde_json::to_writer_pretty(BufWriter::new(file), &statistics)?;
	log::info!(
		"{} of {} trees approximated, {} rejected",
		statistics.approximated,
		statistics.trees,
		statistics.rejected
	);

	match first_error {
		Some(err) => Err(err),
		None => Ok(()),
	}
}

/// `T{n}.gpd` files of a folder ordered by `n`.
fn tree_files(folder: &Path) -> Result<Vec<(usize, PathBuf)>, Error> {
	let mut files = Vec::new();
	for entry in std::fs::read_dir(folder)? {
		let path = entry?.path();
		let index = path
			.file_name()
			.and_then(|name| name.to_str())
			.and_then(|name| name.strip_prefix('T'))
			.and_then(|name| name.strip_suffix(".gpd"))
			.and_then(|number| number.parse::<usize>().ok());
		if let Some(index) = index {
			files.push((index, path));
		}
	}
	files.sort();
	Ok(files)
}

fn approximate_tree(
	approximation: &Approximation,
	command: &Command,
	index: usize,
	path: &Path,
) -> Result<Option<FillReport>, Error> {
	let tree = cloud_file::read_tree(path)?;
	let Some((tree, report)) = approximation.approximate(tree, command.tree_height) else {
		log::info!("T{} has too few fitting cross-sections", index);
		return Ok(None);
	};

	let file = File::create(command.output.join(format!("T{}.json", index)))?;
	serde_json::to_writer_pretty(BufWriter::new(file), &TreeInfo::new(&tree))?;
	if command.preview {
		write_preview(&command.output.join(format!("T{}.e.xyz", index)), &tree)?;
	}
	Ok(Some(report))
}

/// Rasterized interior of every ellipse.
fn write_preview(path: &Path, tree: &Tree) -> Result<(), Error> {
	let mut writer = XyzWriter::create(path)?;
	for ellipse in tree.nodes().filter_map(|node| node.ellipse.as_ref()) {
		writer.write_points(&ellipse.rasterize(PREVIEW_HALF_SIZE, PREVIEW_RESOLUTION))?;
	}
	writer.finish()?;
	Ok(())
}
