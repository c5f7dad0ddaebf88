use std::{
	fs::File,
	io::{BufRead, BufReader, BufWriter, Read, Write},
	path::Path,
	str::FromStr,
};

use forest::{Point, PointSet};

use crate::{Error, Result};

pub const MAGIC: &[u8] = b"# .PCD";
pub const VERSION_KEY: &[u8] = b"VERSION";

const SIGNATURE: &str = "# .PCD v0.7 - Point Cloud Data file format";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
	Signed,
	Unsigned,
	Float,
}

impl FieldType {
	fn parse(value: &str) -> Result<Self> {
		match value {
			"I" => Ok(Self::Signed),
			"U" => Ok(Self::Unsigned),
			"F" => Ok(Self::Float),
			_ => Err(Error::UnsupportedFields(format!("type {}", value))),
		}
	}

	fn valid_size(self, size: usize) -> bool {
		match self {
			Self::Signed | Self::Unsigned => matches!(size, 1 | 2 | 4 | 8),
			Self::Float => matches!(size, 4 | 8),
		}
	}

	/// Little endian scalar as `f64`.
	fn decode(self, bytes: &[u8]) -> f64 {
		let mut raw = [0u8; 8];
		raw[..bytes.len()].copy_from_slice(bytes);
		match (self, bytes.len()) {
			(Self::Float, 4) => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
			(Self::Float, _) => f64::from_le_bytes(raw),
			(Self::Unsigned, _) => u64::from_le_bytes(raw) as f64,
			(Self::Signed, size) => {
				let shift = 64 - 8 * size as u32;
				((i64::from_le_bytes(raw) << shift) >> shift) as f64
			},
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
	Ascii,
	Binary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PcdHeader {
	pub version: String,
	pub fields: Vec<String>,
	pub sizes: Vec<usize>,
	pub types: Vec<FieldType>,
	pub counts: Vec<usize>,
	pub width: u64,
	pub height: u64,
	pub points: u64,
	pub data: DataKind,
}

impl PcdHeader {
	fn decode(reader: &mut impl BufRead) -> Result<Self> {
		let mut header = Self {
			version: String::new(),
			fields: Vec::new(),
			sizes: Vec::new(),
			types: Vec::new(),
			counts: Vec::new(),
			width: 0,
			height: 1,
			points: 0,
			data: DataKind::Ascii,
		};
		let mut points = None;
		let mut line = String::new();
		loop {
			line.clear();
			if reader.read_line(&mut line)? == 0 {
				return Err(Error::CorruptHeader("missing DATA line".into()));
			}
			let trimmed = line.trim();
			if trimmed.is_empty() || trimmed.starts_with('#') {
				continue;
			}
			let (key, value) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
			let value = value.trim();
			match key {
				"VERSION" => header.version = value.into(),
				"FIELDS" => header.fields = value.split_whitespace().map(String::from).collect(),
				"SIZE" => header.sizes = parse_list(key, value)?,
				"TYPE" => {
					header.types = value
						.split_whitespace()
						.map(FieldType::parse)
						.collect::<Result<_>>()?
				},
				"COUNT" => header.counts = parse_list(key, value)?,
				"WIDTH" => header.width = parse(key, value)?,
				"HEIGHT" => header.height = parse(key, value)?,
				"POINTS" => points = Some(parse(key, value)?),
				"VIEWPOINT" => {},
				"DATA" => {
					header.data = match value.to_ascii_lowercase().as_str() {
						"ascii" => DataKind::Ascii,
						"binary" => DataKind::Binary,
						_ => return Err(Error::UnsupportedFields(format!("data {}", value))),
					};
					break;
				},
				_ => log::warn!("unknown PCD header line {:?}", trimmed),
			}
		}
		header.points = points.unwrap_or(header.width.saturating_mul(header.height));
		if header.counts.is_empty() {
			header.counts = vec![1; header.fields.len()];
		}
		header.validate()?;
		Ok(header)
	}

	fn validate(&self) -> Result<()> {
		let fields = self.fields.len();
		if self.sizes.len() != fields || self.types.len() != fields || self.counts.len() != fields {
			return Err(Error::CorruptHeader(format!(
				"{} fields with {} sizes, {} types and {} counts",
				fields,
				self.sizes.len(),
				self.types.len(),
				self.counts.len()
			)));
		}
		if self.counts.contains(&0) {
			return Err(Error::CorruptHeader(format!("counts {}", join_numbers(&self.counts))));
		}
		for ((field, &size), ty) in self.fields.iter().zip(&self.sizes).zip(&self.types) {
			if !ty.valid_size(size) {
				return Err(Error::UnsupportedFields(format!("{} with {:?} of size {}", field, ty, size)));
			}
		}
		for axis in ["x", "y", "z"] {
			if self.field(axis).is_none() {
				return Err(Error::UnsupportedFields(format!("no {} field", axis)));
			}
		}
		Ok(())
	}

	/// Position of the first value of `name` within one point.
	fn field(&self, name: &str) -> Option<usize> {
		let index = self.fields.iter().position(|field| field == name)?;
		Some(self.counts[..index].iter().sum())
	}

	fn values_per_point(&self) -> usize {
		self.counts.iter().sum()
	}

	fn encode(&self) -> String {
		let types = self
			.types
			.iter()
			.map(|ty| match ty {
				FieldType::Signed => "I",
				FieldType::Unsigned => "U",
				FieldType::Float => "F",
			})
			.collect::<Vec<_>>()
			.join(" ");
		format!(
			"{}\nVERSION {}\nFIELDS {}\nSIZE {}\nTYPE {}\nCOUNT {}\nWIDTH {}\nHEIGHT {}\nVIEWPOINT 0 0 0 1 0 0 0\nPOINTS {}\nDATA {}\n",
			SIGNATURE,
			self.version,
			self.fields.join(" "),
			join_numbers(&self.sizes),
			types,
			join_numbers(&self.counts),
			self.width,
			self.height,
			self.points,
			match self.data {
				DataKind::Ascii => "ascii",
				DataKind::Binary => "binary",
			},
		)
	}
}

fn join_numbers(values: &[usize]) -> String {
	values.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
	value
		.parse()
		.map_err(|_| Error::CorruptHeader(format!("{} {}", key, value)))
}

fn parse_list<T: FromStr>(key: &str, value: &str) -> Result<Vec<T>> {
	value.split_whitespace().map(|value| parse(key, value)).collect()
}

/// Reads `x`, `y`, `z` and, when present, `intensity` of every point.
pub struct PcdReader<R: BufRead> {
	reader: R,
	header: PcdHeader,
}

impl PcdReader<BufReader<File>> {
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		Self::new(BufReader::new(File::open(path)?))
	}
}

impl<R: BufRead> PcdReader<R> {
	pub fn new(mut reader: R) -> Result<Self> {
		let header = PcdHeader::decode(&mut reader)?;
		Ok(Self { reader, header })
	}

	pub fn header(&self) -> &PcdHeader {
		&self.header
	}

	pub fn read_cloud(self) -> Result<PointSet> {
		let header = self.header;
		let Some(layout) = Layout::new(&header) else {
			return Err(Error::UnsupportedFields(header.fields.join(" ")));
		};
		let cloud = match header.data {
			DataKind::Ascii => read_ascii(self.reader, &header, &layout)?,
			DataKind::Binary => read_binary(self.reader, &header, &layout)?,
		};
		log::debug!("read {} of {} PCD points", cloud.len(), header.points);
		Ok(cloud)
	}
}

/// Value indices of the point attributes.
struct Layout {
	x: usize,
	y: usize,
	z: usize,
	intensity: Option<usize>,
}

impl Layout {
	fn new(header: &PcdHeader) -> Option<Self> {
		Some(Self {
			x: header.field("x")?,
			y: header.field("y")?,
			z: header.field("z")?,
			intensity: header.field("intensity"),
		})
	}

	fn point(&self, values: &[f64]) -> Point {
		let intensity = self.intensity.map_or(0.0, |index| values[index]);
		Point::with_intensity(values[self.x], values[self.y], values[self.z], intensity)
	}
}

fn read_ascii(reader: impl BufRead, header: &PcdHeader, layout: &Layout) -> Result<PointSet> {
	let expected = header.values_per_point();
	let mut cloud = PointSet::new();
	let mut values = Vec::with_capacity(expected);
	for (index, line) in reader.lines().enumerate() {
		if cloud.len() as u64 >= header.points {
			break;
		}
		let line = line?;
		if line.trim().is_empty() {
			continue;
		}
		values.clear();
		for token in line.split_whitespace() {
			let value = token.parse::<f64>().map_err(|_| Error::CorruptLine { line: index + 1 })?;
			values.push(value);
		}
		if values.len() != expected {
			return Err(Error::CorruptLine { line: index + 1 });
		}
		cloud.push(layout.point(&values));
	}
	Ok(cloud)
}

fn read_binary(mut reader: impl Read, header: &PcdHeader, layout: &Layout) -> Result<PointSet> {
	let columns = header
		.types
		.iter()
		.zip(&header.sizes)
		.zip(&header.counts)
		.flat_map(|((&ty, &size), &count)| std::iter::repeat((ty, size)).take(count))
		.collect::<Vec<_>>();
	let stride = columns.iter().map(|(_, size)| size).sum::<usize>();
	let mut record = vec![0u8; stride];
	let mut values = vec![0.0; columns.len()];
	let mut cloud = PointSet::new();
	for _ in 0..header.points {
		reader.read_exact(&mut record)?;
		let mut offset = 0;
		for (value, &(ty, size)) in values.iter_mut().zip(&columns) {
			*value = ty.decode(&record[offset..offset + size]);
			offset += size;
		}
		cloud.push(layout.point(&values));
	}
	Ok(cloud)
}

/// Collects points and writes them as `x y z intensity` doubles on `finish`.
pub struct PcdWriter<W: Write> {
	writer: W,
	data: DataKind,
	points: Vec<Point>,
}

impl PcdWriter<BufWriter<File>> {
	pub fn create(path: impl AsRef<Path>, data: DataKind) -> Result<Self> {
		Ok(Self::new(BufWriter::new(File::create(path)?), data))
	}
}

impl<W: Write> PcdWriter<W> {
	pub fn new(writer: W, data: DataKind) -> Self {
		Self {
			writer,
			data,
			points: Vec::new(),
		}
	}

	pub fn write_point_set(&mut self, set: &PointSet) {
		self.points.extend_from_slice(set.points());
	}

	pub fn finish(mut self) -> Result<W> {
		let count = self.points.len() as u64;
		let header = PcdHeader {
			version: "0.7".into(),
			fields: ["x", "y", "z", "intensity"].map(String::from).to_vec(),
			sizes: vec![8; 4],
			types: vec![FieldType::Float; 4],
			counts: vec![1; 4],
			width: count,
			height: 1,
			points: count,
			data: self.data,
		};
		self.writer.write_all(header.encode().as_bytes())?;
		match self.data {
			DataKind::Ascii => {
				for point in &self.points {
					writeln!(
						self.writer,
						"{} {} {} {}",
						point.x(),
						point.y(),
						point.z(),
						point.intensity
					)?;
				}
			},
			DataKind::Binary => {
				for point in &self.points {
					for value in [point.x(), point.y(), point.z(), point.intensity] {
						self.writer.write_all(&value.to_le_bytes())?;
					}
				}
			},
		}
		self.writer.flush()?;
		log::debug!("wrote {} PCD points", count);
		Ok(self.writer)
	}
}
