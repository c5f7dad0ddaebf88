use std::path::{Path, PathBuf};

use cloud_file::{DataKind, Format, GpdReader, GpdWriter, PcdWriter, XyzWriter};
use forest::PointSet;

use crate::{ensure_input, progress::Stage, Error};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloudFormat {
	Gpd,
	Pcd,
	Xyz,
}

impl From<CloudFormat> for Format {
	fn from(format: CloudFormat) -> Self {
		match format {
			CloudFormat::Gpd => Self::Gpd,
			CloudFormat::Pcd => Self::Pcd,
			CloudFormat::Xyz => Self::Xyz,
		}
	}
}

#[derive(clap::Args)]
pub struct Command {
	/// Input cloud
	input: PathBuf,

	/// Output cloud, the input with the extension of the output format otherwise
	#[arg(long, short)]
	output: Option<PathBuf>,

	/// Format of the input, detected from the file otherwise
	#[arg(long, short, value_enum)]
	input_format: Option<CloudFormat>,

	/// Format of the output, taken from the output extension otherwise
	#[arg(long, short = 'f', value_enum)]
	output_format: Option<CloudFormat>,

	/// Slice height written to GPD files when the input has none
	#[arg(long, default_value_t = 0.1)]
	slice_height: f64,

	/// Write PCD data as ASCII instead of binary
	#[arg(long)]
	ascii: bool,
}

/// Group of a cloud with its slice id and comment.
struct Group {
	slice: i64,
	comment: String,
	points: PointSet,
}

pub fn run(command: Command) -> Result<(), Error> {
	ensure_input(&command.input)?;
	let input_format = match command.input_format {
		Some(format) => format.into(),
		None => cloud_file::detect_format(&command.input)?,
	};
	let output_format = match (command.output_format, &command.output) {
		(Some(format), _) => format.into(),
		(None, Some(path)) => Format::from_extension(path)
			.ok_or_else(|| Error::InvalidConfiguration(format!("unknown format of {:?}", path)))?,
		(None, None) => {
			return Err(Error::InvalidConfiguration(
				"output format or output file is required".into(),
			))
		},
	};
	let output = match &command.output {
		Some(path) => path.clone(),
		None => command.input.with_extension(extension(output_format)),
	};
	if output == command.input {
		return Err(Error::InvalidConfiguration("output would overwrite the input".into()));
	}

	let stage = Stage::new("Read Cloud");
	let (slice_height, groups) = read_groups(&command.input, input_format, command.slice_height)?;
	stage.finish();

	let stage = Stage::new("Write Cloud");
	write_groups(&output, output_format, slice_height, &groups, command.ascii)?;
	stage.finish();

	log::info!(
		"converted {} groups from {:?} to {:?}",
		groups.len(),
		input_format,
		output_format
	);
	Ok(())
}

fn extension(format: Format) -> &'static str {
	match format {
		Format::Gpd => "gpd",
		Format::Pcd => "pcd",
		Format::Xyz => "xyz",
	}
}

/// GPD keeps its groups, other formats are a single group.
fn read_groups(path: &Path, format: Format, slice_height: f64) -> Result<(f64, Vec<Group>), Error> {
	match format {
		Format::Gpd => {
			let reader = GpdReader::open(path)?;
			let slice_height = reader.header().slice_height;
			let groups = reader
				.map(|group| {
					group.map(|(meta, points)| Group {
						slice: meta.slice,
						comment: meta.comment,
						points,
					})
				})
				.collect::<Result<Vec<_>, _>>()?;
			Ok((slice_height, groups))
		},
		Format::Pcd | Format::Xyz => {
			let points = match format {
				Format::Pcd => cloud_file::PcdReader::open(path)?.read_cloud()?,
				_ => cloud_file::XyzReader::open(path)?.read_cloud()?,
			};
			let group = Group {
				slice: 0,
				comment: String::new(),
				points,
			};
			Ok((slice_height, vec![group]))
		},
	}
}

fn write_groups(path: &Path, format: Format, slice_height: f64, groups: &[Group], ascii: bool) -> Result<(), Error> {
	match format {
		Format::Gpd => {
			let mut writer = GpdWriter::create(path, slice_height)?;
			for group in groups {
				writer.write_point_set(&group.points, group.slice, &group.comment)?;
			}
			writer.finish()?;
		},
		Format::Pcd => {
			let data = if ascii { DataKind::Ascii } else { DataKind::Binary };
			let mut writer = PcdWriter::create(path, data)?;
			for group in groups {
				writer.write_point_set(&group.points);
			}
			writer.finish()?;
		},
		Format::Xyz => {
			let mut writer = XyzWriter::create(path)?;
			for group in groups {
				writer.write_point_set(&group.points)?;
			}
			writer.finish()?;
		},
	}
	Ok(())
}
