mod approximate;
mod config;
mod convert;
mod detect;
mod filter;
mod info;
mod progress;
mod slice;
mod terrain;
mod tree_height;

use std::path::{Path, PathBuf};

pub use info::{SliceInfo, TreeInfo};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("Input {0:?} does not exist")]
	MissingInput(PathBuf),

	#[error("Output folder {0:?} is a file")]
	OutputFolderIsFile(PathBuf),

	#[error("Invalid configuration: {0}")]
	InvalidConfiguration(String),

	#[error(transparent)]
	File(#[from] cloud_file::Error),

	#[error(transparent)]
	Terrain(#[from] forest::terrain::TerrainError),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	ThreadPool(#[from] rayon::ThreadPoolBuildError),

	#[error("At least two threads are required")]
	NotEnoughThreads,
}

/// Readers and writers run next to each other and need a thread each.
pub const MIN_THREADS: usize = 2;

#[derive(clap::Parser)]
#[command(version, about = "Tree skeletons from terrestrial forest scans")]
pub struct Cli {
	/// Maximal thread count for multithreading, at least 2. 0 for the amount of logical cores.
	#[arg(long, default_value_t = 0, global = true)]
	max_threads: usize,

	/// More log output, repeat for more detail
	#[arg(short, long, action = clap::ArgAction::Count, global = true)]
	verbose: u8,

	#[command(subcommand)]
	command: Command,
}

impl Cli {
	pub fn log_level(&self) -> log::LevelFilter {
		match self.verbose {
			0 => log::LevelFilter::Warn,
			1 => log::LevelFilter::Info,
			2 => log::LevelFilter::Debug,
			_ => log::LevelFilter::Trace,
		}
	}
}

#[derive(clap::Subcommand)]
pub enum Command {
	/// Build a terrain height map from a cloud
	Terrain(terrain::Command),
	/// Cut a cloud into horizontal slices
	Slice(slice::Command),
	/// Detect trees in a sliced cloud
	Detect(detect::Command),
	/// Fit cross-sections of detected trees and complete them
	Approximate(approximate::Command),
	/// Group a sliced cloud and apply the group filters
	Filter(filter::Command),
	/// Build a map of the highest point per cell
	TreeHeight(tree_height::Command),
	/// Convert a cloud between GPD, PCD and XYZ
	Convert(convert::Command),
}

pub fn run(cli: Cli) -> Result<(), Error> {
	let threads = thread_count(cli.max_threads)?;
	log::debug!("using {} threads", threads);
	rayon::ThreadPoolBuilder::new()
		.num_threads(threads)
		.build()?
		.install(|| match cli.command {
			Command::Terrain(command) => terrain::run(command),
			Command::Slice(command) => slice::run(command),
			Command::Detect(command) => detect::run(command),
			Command::Approximate(command) => approximate::run(command),
			Command::Filter(command) => filter::run(command),
			Command::TreeHeight(command) => tree_height::run(command),
			Command::Convert(command) => convert::run(command),
		})
}

fn thread_count(max_threads: usize) -> Result<usize, Error> {
	match max_threads {
		0 => Ok(std::thread::available_parallelism().map_or(MIN_THREADS, |count| count.get().max(MIN_THREADS))),
		count if count < MIN_THREADS => Err(Error::NotEnoughThreads),
		count => Ok(count),
	}
}

fn ensure_input(path: &Path) -> Result<(), Error> {
	if !path.exists() {
		return Err(Error::MissingInput(path.to_owned()));
	}
	Ok(())
}

fn prepare_output_folder(path: &Path) -> Result<(), Error> {
	if path.is_file() {
		return Err(Error::OutputFolderIsFile(path.to_owned()));
	}
	std::fs::create_dir_all(path)?;
	Ok(())
}
