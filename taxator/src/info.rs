use forest::Tree;
use nalgebra as na;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Position {
	pub x: f64,
	pub y: f64,
	pub z: f64,
}

impl From<&na::Point3<f64>> for Position {
	fn from(point: &na::Point3<f64>) -> Self {
		Self {
			x: point.x,
			y: point.y,
			z: point.z,
		}
	}
}

/// One node of an approximated tree.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SliceInfo {
	pub center: Position,
	pub ellipse_focis: Option<[Position; 2]>,
	pub ellipse_major_semi_axis: Option<f64>,
	pub ellipse_eccentricity: Option<f64>,
	pub id: i64,
	pub parent_id: Option<i64>,
}

/// Summary written next to every approximated tree.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TreeInfo {
	pub slice_infos: Vec<SliceInfo>,
	pub height: f64,
}

impl TreeInfo {
	pub fn new(tree: &Tree) -> Self {
		let slice_infos = tree
			.to_records()
			.into_iter()
			.map(|(id, parent, node)| {
				let ellipse = node.ellipse.as_ref();
				SliceInfo {
					center: Position::from(&node.center),
					ellipse_focis: ellipse.map(|e| [e.first_focus().into(), e.second_focus().into()]),
					ellipse_major_semi_axis: ellipse.map(|e| e.major_radius()),
					ellipse_eccentricity: ellipse.map(|e| e.eccentricity()),
					id,
					parent_id: (parent >= 0).then_some(parent),
				}
			})
			.collect();
		Self {
			slice_infos,
			height: tree.height(),
		}
	}
}
