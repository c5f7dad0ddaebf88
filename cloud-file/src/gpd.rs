use std::{
	collections::BTreeMap,
	fs::File,
	io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write},
	path::Path,
	str::FromStr,
};

use forest::{slicing::PointSlice, Point, PointSet};

use crate::{Error, Result};

pub const MAGIC: &[u8] = b"FORMAT GPD";

/// Counts are zero padded so the header keeps its length when rewritten.
const COUNT_WIDTH: usize = 16;
const VERSION: u32 = 1;
/// Points decoded per read, counts from the file never size an allocation directly.
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
pub struct GpdHeader {
	pub version: u32,
	pub groups: u64,
	pub slice_height: f64,
	pub fields: Vec<String>,
	pub points: u64,
}

impl GpdHeader {
	pub fn new(slice_height: f64) -> Self {
		Self {
			version: VERSION,
			groups: 0,
			slice_height,
			fields: ["x", "y", "z", "intensity"].map(String::from).to_vec(),
			points: 0,
		}
	}

	fn encode(&self) -> String {
		let sizes = vec!["8"; self.fields.len()].join(" ");
		let types = vec!["F"; self.fields.len()].join(" ");
		format!(
			"FORMAT GPD\nVERSION {}\nGROUPS {:0width$}\nSLICE {}\nFIELDS {}\nSIZE {}\nTYPE {}\nPOINTS {:0width$}\nDATA BINARY\n",
			self.version,
			self.groups,
			self.slice_height,
			self.fields.join(" "),
			sizes,
			types,
			self.points,
			width = COUNT_WIDTH,
		)
	}

	fn decode(reader: &mut impl BufRead) -> Result<Self> {
		let mut line = String::new();
		reader.read_line(&mut line)?;
		if line.trim_end().as_bytes() != MAGIC {
			return Err(Error::WrongMagic);
		}

		let mut header = Self::new(0.0);
		header.version = 0;
		loop {
			line.clear();
			if reader.read_line(&mut line)? == 0 {
				return Err(Error::CorruptHeader("missing DATA line".into()));
			}
			let (key, value) = line.trim_end().split_once(' ').unwrap_or((line.trim_end(), ""));
			match key {
				"VERSION" => header.version = parse(key, value)?,
				"GROUPS" => header.groups = parse(key, value)?,
				"SLICE" => header.slice_height = parse(key, value)?,
				"POINTS" => header.points = parse(key, value)?,
				"FIELDS" => header.fields = value.split_whitespace().map(String::from).collect(),
				"SIZE" => {
					if value.split_whitespace().any(|size| size != "8") {
						return Err(Error::UnsupportedFields(format!("sizes {}", value)));
					}
				},
				"TYPE" => {
					if value.split_whitespace().any(|ty| ty != "F") {
						return Err(Error::UnsupportedFields(format!("types {}", value)));
					}
				},
				"DATA" => {
					if value != "BINARY" {
						return Err(Error::UnsupportedFields(format!("data {}", value)));
					}
					break;
				},
				_ => log::warn!("unknown GPD header line {:?}", line.trim_end()),
			}
		}

		if header.version != VERSION {
			return Err(Error::CorruptHeader(format!("unsupported version {}", header.version)));
		}
		let fields = header.fields.iter().map(String::as_str).collect::<Vec<_>>();
		if fields != ["x", "y", "z", "intensity"] && fields != ["x", "y", "z"] {
			return Err(Error::UnsupportedFields(header.fields.join(" ")));
		}
		Ok(header)
	}
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
	value
		.trim()
		.parse()
		.map_err(|_| Error::CorruptHeader(format!("{} {}", key, value)))
}

/// Metadata line in front of every group, `#id.slice.points.comment#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMeta {
	pub id: u64,
	pub slice: i64,
	pub points: u64,
	pub comment: String,
}

impl std::fmt::Display for GroupMeta {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}.{}.{}.{}#", self.id, self.slice, self.points, self.comment)
	}
}

impl FromStr for GroupMeta {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		let corrupt = || Error::CorruptGroup(s.into());
		let inner = s
			.strip_prefix('#')
			.and_then(|s| s.strip_suffix('#'))
			.ok_or_else(corrupt)?;
		let mut fields = inner.splitn(4, '.');
		let mut next = || fields.next().ok_or_else(corrupt);
		let id = next()?.parse().map_err(|_| corrupt())?;
		let slice = next()?.parse().map_err(|_| corrupt())?;
		let points = next()?.parse().map_err(|_| corrupt())?;
		let comment = next()?.into();
		Ok(Self { id, slice, points, comment })
	}
}

pub struct GpdWriter<W: Write + Seek> {
	writer: W,
	header: GpdHeader,
}

impl GpdWriter<BufWriter<File>> {
	pub fn create(path: impl AsRef<Path>, slice_height: f64) -> Result<Self> {
		let file = File::create(path)?;
		Self::new(BufWriter::new(file), slice_height)
	}
}

impl<W: Write + Seek> GpdWriter<W> {
	pub fn new(mut writer: W, slice_height: f64) -> Result<Self> {
		let header = GpdHeader::new(slice_height);
		writer.write_all(header.encode().as_bytes())?;
		Ok(Self { writer, header })
	}

	pub fn header(&self) -> &GpdHeader {
		&self.header
	}

	/// Append one group and return its id.
	pub fn write_point_set(&mut self, set: &PointSet, slice: i64, comment: &str) -> Result<u64> {
		debug_assert!(!comment.contains('\n'));
		let meta = GroupMeta {
			id: self.header.groups,
			slice,
			points: set.len() as u64,
			comment: comment.into(),
		};
		writeln!(self.writer, "{}", meta)?;
		self.writer.write_all(bytemuck::cast_slice(set.points()))?;
		self.header.groups += 1;
		self.header.points += meta.points;
		Ok(meta.id)
	}

	pub fn write_slices(&mut self, slices: &[PointSlice]) -> Result<()> {
		for slice in slices {
			for group in &slice.groups {
				self.write_point_set(group, slice.index as i64, "")?;
			}
		}
		Ok(())
	}

	/// Rewrite the header with the final counts.
	pub fn finish(mut self) -> Result<W> {
		self.writer.seek(SeekFrom::Start(0))?;
		self.writer.write_all(self.header.encode().as_bytes())?;
		self.writer.seek(SeekFrom::End(0))?;
		self.writer.flush()?;
		log::debug!("wrote {} groups with {} points", self.header.groups, self.header.points);
		Ok(self.writer)
	}
}

pub struct GpdReader<R: BufRead> {
	reader: R,
	header: GpdHeader,
	read: u64,
	line: String,
}

impl GpdReader<BufReader<File>> {
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let file = File::open(path)?;
		Self::new(BufReader::new(file))
	}
}

impl<R: BufRead> GpdReader<R> {
	pub fn new(mut reader: R) -> Result<Self> {
		let header = GpdHeader::decode(&mut reader)?;
		Ok(Self {
			reader,
			header,
			read: 0,
			line: String::new(),
		})
	}

	pub fn header(&self) -> &GpdHeader {
		&self.header
	}

	pub fn read_group(&mut self) -> Result<Option<(GroupMeta, PointSet)>> {
		if self.read >= self.header.groups {
			return Ok(None);
		}
		self.line.clear();
		if self.reader.read_line(&mut self.line)? == 0 {
			log::warn!("file ended after {} of {} groups", self.read, self.header.groups);
			return Ok(None);
		}
		let meta = self.line.trim_end_matches(['\r', '\n']).parse::<GroupMeta>()?;
		let points = self.read_points(meta.points as usize)?;
		self.read += 1;
		Ok(Some((meta, points)))
	}

	fn read_points(&mut self, count: usize) -> Result<PointSet> {
		let stride = self.header.fields.len();
		let mut points = Vec::with_capacity(count.min(READ_CHUNK));
		let mut buffer = vec![0.0f64; READ_CHUNK * stride];
		let mut remaining = count;
		while remaining > 0 {
			let chunk = remaining.min(READ_CHUNK);
			let values = &mut buffer[..chunk * stride];
			self.reader.read_exact(bytemuck::cast_slice_mut(values))?;
			points.extend(values.chunks_exact(stride).map(|value| {
				Point::with_intensity(value[0], value[1], value[2], value.get(3).copied().unwrap_or(0.0))
			}));
			remaining -= chunk;
		}
		Ok(points.into())
	}

	/// Remaining groups collected by slice, lowest slice first.
	pub fn read_slices(&mut self) -> Result<Vec<PointSlice>> {
		let mut groups = Vec::new();
		while let Some((meta, set)) = self.read_group()? {
			groups.push((meta.slice, set));
		}
		Ok(assemble_slices(groups))
	}

	pub fn read_cloud(&mut self) -> Result<PointSet> {
		let mut cloud = PointSet::new();
		while let Some((_, set)) = self.read_group()? {
			cloud.extend(set);
		}
		Ok(cloud)
	}
}

/// Collect `(slice, group)` pairs into slices ordered by slice id.
///
/// A slice starts at the lowest point of its groups.
pub fn assemble_slices(groups: impl IntoIterator<Item = (i64, PointSet)>) -> Vec<PointSlice> {
	let mut slices = BTreeMap::<i64, Vec<PointSet>>::new();
	for (slice, set) in groups {
		slices.entry(slice).or_default().push(set);
	}
	slices
		.into_iter()
		.map(|(slice, groups)| {
			let height = groups
				.iter()
				.filter(|group| !group.is_empty())
				.map(|group| group.bounds().min.z)
				.fold(f64::INFINITY, f64::min);
			PointSlice {
				index: usize::try_from(slice).unwrap_or(0),
				height: if height.is_finite() { height } else { 0.0 },
				groups,
			}
		})
		.collect()
}

impl<R: BufRead> Iterator for GpdReader<R> {
	type Item = Result<(GroupMeta, PointSet)>;

	fn next(&mut self) -> Option<Self::Item> {
		self.read_group().transpose()
	}
}
