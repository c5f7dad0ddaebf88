use std::path::Path;

use forest::{NodeAnnotation, Tree};

use crate::{Error, GpdReader, GpdWriter, Result};

/// Store every node as one group, the hierarchy goes into the group comment.
pub fn write_tree(path: impl AsRef<Path>, tree: &Tree, slice_height: f64) -> Result<()> {
	let mut writer = GpdWriter::create(path, slice_height)?;
	for (id, parent, node) in tree.to_records() {
		let slice = (node.center.z / slice_height).round() as i64;
		writer.write_point_set(&node.point_set, slice, &NodeAnnotation { id, parent }.to_string())?;
	}
	writer.finish()?;
	Ok(())
}

pub fn read_tree(path: impl AsRef<Path>) -> Result<Tree> {
	let mut records = Vec::new();
	for group in GpdReader::open(path)? {
		let (meta, set) = group?;
		let annotation = NodeAnnotation::parse(&meta.comment).ok_or(Error::MissingAnnotation(meta.id))?;
		records.push((annotation.id, annotation.parent, set));
	}
	Ok(Tree::from_records(records)?)
}

#[cfg(test)]
mod tests {
	use forest::{Point, PointSet};

	use super::*;

	#[test]
	fn test_tree_round_trip() {
		let mut tree = Tree::new(PointSet::single(Point::new(0.0, 0.0, 0.0)));
		let trunk = tree.add_child(tree.root(), PointSet::single(Point::new(0.0, 0.0, 0.1)));
		tree.add_child(trunk, PointSet::single(Point::new(0.1, 0.0, 0.2)));
		tree.add_child(trunk, PointSet::single(Point::new(-0.1, 0.0, 0.2)));

		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("T0.gpd");
		write_tree(&path, &tree, 0.1).unwrap();
		let read = read_tree(&path).unwrap();

		assert_eq!(read.len(), 4);
		assert_eq!(read.center(read.root()).z, 0.0);
		let trunk = read.node(read.root()).children()[0];
		assert_eq!(read.node(trunk).children().len(), 2);
		assert_eq!(read.height(), 0.2);
	}

	#[test]
	fn test_plain_groups_are_not_trees() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("slices.gpd");
		let mut writer = GpdWriter::create(&path, 0.1).unwrap();
		writer
			.write_point_set(&PointSet::single(Point::new(0.0, 0.0, 0.0)), 0, "")
			.unwrap();
		writer.finish().unwrap();
		assert!(matches!(read_tree(&path), Err(Error::MissingAnnotation(0))));
	}
}
