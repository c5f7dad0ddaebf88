//! Tree skeleton reconstruction from terrain-normalized forest point clouds.
//!
//! A cloud is cut into horizontal slices, every slice is clustered into
//! cross-section groups, groups are assembled bottom-up into trees and the
//! trees are completed by fitting ellipses and filling vertical gaps.

pub mod approximation;
pub mod bounds;
pub mod builder;
pub mod ellipse;
pub mod filters;
pub mod fitting;
pub mod gap_filling;
pub mod point;
pub mod point_set;
pub mod raster;
pub mod regression;
pub mod slicing;
pub mod terrain;
pub mod tree;

pub use approximation::{Approximation, ApproximationSettings};
pub use bounds::BoundingBox;
pub use builder::{build_trees, MergingParameters, TreeBuilder};
pub use ellipse::{Ellipse, EllipticParameters};
pub use gap_filling::{fill_gaps, FillReport};
pub use point::Point;
pub use point_set::PointSet;
pub use raster::{cluster, RasterGrid};
pub use slicing::PointSlice;
pub use terrain::{HeightMap, Surface};
pub use tree::{NodeAnnotation, NodeId, Tree};
