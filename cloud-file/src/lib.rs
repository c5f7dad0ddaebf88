//! Point cloud files.
//!
//! `gpd` holds grouped points in binary blocks behind an ASCII header, `pcd`
//! is the point cloud library format and `xyz` is one whitespace separated
//! point per line.

pub mod gpd;
pub mod pcd;
pub mod trees;
pub mod xyz;

use std::{io::Read, path::Path};

use forest::PointSet;

pub use gpd::{assemble_slices, GpdHeader, GpdReader, GpdWriter, GroupMeta};
pub use pcd::{DataKind, PcdHeader, PcdReader, PcdWriter};
pub use trees::{read_tree, write_tree};
pub use xyz::{XyzReader, XyzWriter};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("File is not a GPD file")]
	WrongMagic,

	#[error("Corrupt header: {0}")]
	CorruptHeader(String),

	#[error("Corrupt group metadata: {0:?}")]
	CorruptGroup(String),

	#[error("Unsupported field layout: {0}")]
	UnsupportedFields(String),

	#[error("Corrupt point in line {line}")]
	CorruptLine { line: usize },

	#[error("Group {0} has no node annotation")]
	MissingAnnotation(u64),

	#[error(transparent)]
	Tree(#[from] forest::tree::ImportError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
	Gpd,
	Pcd,
	Xyz,
}

impl Format {
	/// Format by file extension.
	pub fn from_extension(path: impl AsRef<Path>) -> Option<Self> {
		let extension = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
		match extension.as_str() {
			"gpd" => Some(Self::Gpd),
			"pcd" => Some(Self::Pcd),
			"xyz" | "txt" => Some(Self::Xyz),
			_ => None,
		}
	}
}

const PREFIX_SIZE: u64 = 16;

/// GPD and PCD by their first line, XYZ otherwise.
pub fn detect_format(path: impl AsRef<Path>) -> Result<Format> {
	let mut prefix = Vec::with_capacity(PREFIX_SIZE as usize);
	std::fs::File::open(path)?.take(PREFIX_SIZE).read_to_end(&mut prefix)?;
	Ok(if prefix.starts_with(gpd::MAGIC) {
		Format::Gpd
	} else if prefix.starts_with(pcd::MAGIC) || prefix.starts_with(pcd::VERSION_KEY) {
		Format::Pcd
	} else {
		Format::Xyz
	})
}

/// Every point of the file, group structure is discarded.
pub fn read_cloud(path: impl AsRef<Path>) -> Result<PointSet> {
	let path = path.as_ref();
	match detect_format(path)? {
		Format::Gpd => GpdReader::open(path)?.read_cloud(),
		Format::Pcd => PcdReader::open(path)?.read_cloud(),
		Format::Xyz => XyzReader::open(path)?.read_cloud(),
	}
}
