use std::{
	fs::File,
	io::{BufRead, BufReader, BufWriter, Write},
	path::Path,
};

use forest::{Point, PointSet};

use crate::{Error, Result};

/// Reads `x y z [intensity]` lines, empty and `#` lines are skipped.
pub struct XyzReader<R: BufRead> {
	reader: R,
}

impl XyzReader<BufReader<File>> {
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		Ok(Self::new(BufReader::new(File::open(path)?)))
	}
}

impl<R: BufRead> XyzReader<R> {
	pub fn new(reader: R) -> Self {
		Self { reader }
	}

	pub fn read_cloud(self) -> Result<PointSet> {
		let mut cloud = PointSet::new();
		for (index, line) in self.reader.lines().enumerate() {
			let line = line?;
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			cloud.push(parse_point(line).ok_or(Error::CorruptLine { line: index + 1 })?);
		}
		log::debug!("read {} points", cloud.len());
		Ok(cloud)
	}
}

fn parse_point(line: &str) -> Option<Point> {
	let mut values = line.split_whitespace().map(str::parse::<f64>);
	let x = values.next()?.ok()?;
	let y = values.next()?.ok()?;
	let z = values.next()?.ok()?;
	let intensity = match values.next() {
		Some(value) => value.ok()?,
		None => 0.0,
	};
	Some(Point::with_intensity(x, y, z, intensity))
}

pub struct XyzWriter<W: Write> {
	writer: W,
}

impl XyzWriter<BufWriter<File>> {
	pub fn create(path: impl AsRef<Path>) -> Result<Self> {
		Ok(Self::new(BufWriter::new(File::create(path)?)))
	}
}

impl<W: Write> XyzWriter<W> {
	pub fn new(writer: W) -> Self {
		Self { writer }
	}

	pub fn write_point(&mut self, point: &Point) -> Result<()> {
		writeln!(
			self.writer,
			"{} {} {} {}",
			point.x(),
			point.y(),
			point.z(),
			point.intensity
		)?;
		Ok(())
	}

	pub fn write_points<'a>(&mut self, points: impl IntoIterator<Item = &'a Point>) -> Result<()> {
		for point in points {
			self.write_point(point)?;
		}
		Ok(())
	}

	pub fn write_point_set(&mut self, set: &PointSet) -> Result<()> {
		self.write_points(set)
	}

	pub fn finish(mut self) -> Result<W> {
		self.writer.flush()?;
		Ok(self.writer)
	}
}
