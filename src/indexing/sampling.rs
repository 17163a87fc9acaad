use log::debug;

use crate::indexing::model::ChunkOctree;
use crate::model::point::Point;
use crate::model::vector3::Vector3;

/// Outcome of the acceptance test for one node.
#[derive(Debug, Default)]
pub struct Selection {
	pub accepted: Vec<Point>,
	pub rejected: Vec<Point>,
}

/// Minimum-spacing ("blue noise") selection of the points kept at each level.
#[derive(Clone, Copy, Debug)]
pub struct Sampler {
	pub base_spacing: f64,
	/// Stop scanning accepted points once the distance to the node center alone
	/// proves the candidate is far enough away.
	pub pruning: bool,
}

impl Sampler {
	pub fn new(base_spacing: f64, pruning: bool) -> Sampler {
		Sampler { base_spacing, pruning }
	}

	pub fn spacing_at(&self, level: usize) -> f64 {
		self.base_spacing / 2f64.powi(level as i32)
	}

	/// Splits `candidates` into points at least `spacing` apart and the rest.
	///
	/// Candidates are visited closest to `center` first, ties keeping their input
	/// order. Each one is compared with the accepted points, most recent first.
	pub fn select(&self, candidates: Vec<Point>, center: &Vector3, spacing: f64) -> Selection {
		let mut sorted: Vec<(f64, Point)> = candidates
			.into_iter()
			.map(|point| (point.squared_distance_to(center), point))
			.collect();
		sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

		let squared_spacing = spacing * spacing;
		let mut accepted: Vec<(f64, Point)> = Vec::new();
		let mut rejected = Vec::new();

		for (squared_center_distance, candidate) in sorted {
			let center_distance = squared_center_distance.sqrt();

			let far_enough = self.is_far_enough(
				&candidate,
				center_distance,
				&accepted,
				spacing,
				squared_spacing,
			);

			if far_enough {
				accepted.push((center_distance, candidate));
			} else {
				rejected.push(candidate);
			}
		}

		Selection {
			accepted: accepted.into_iter().map(|(_, point)| point).collect(),
			rejected,
		}
	}

	fn is_far_enough(
		&self,
		candidate: &Point,
		center_distance: f64,
		accepted: &[(f64, Point)],
		spacing: f64,
		squared_spacing: f64,
	) -> bool {
		for (accepted_distance, point) in accepted.iter().rev() {
			if self.pruning && center_distance > accepted_distance + spacing {
				return true;
			}

			if candidate.squared_distance_to(&point.position) < squared_spacing {
				return false;
			}
		}

		true
	}

	/// Runs the acceptance pass over a chunk octree, children before parents.
	///
	/// Rejects of a node move into its parent's store. The chunk root's rejects
	/// stay in the root's store and are returned as its residual count.
	pub fn sample_chunk(&self, octree: &mut ChunkOctree) -> usize {
		let order: Vec<_> = octree.postorder().collect();

		let mut accepted = 0;
		for id in order {
			let node = octree.node_mut(id);
			let spacing = self.spacing_at(node.level());
			let center = node.bounds.center();
			let candidates = std::mem::take(&mut node.store);

			let selection = self.select(candidates, &center, spacing);
			accepted += selection.accepted.len();
			node.points = selection.accepted;
			let parent = node.parent;

			match parent {
				Some(parent) => octree.node_mut(parent).store.extend(selection.rejected),
				None => octree.node_mut(id).store = selection.rejected,
			}
		}

		let root = octree.root();
		let residual = octree.node(root).store.len();
		debug!(
			"sampled {}: {} nodes, {} accepted, {} residual",
			octree.node(root).name,
			octree.len(),
			accepted,
			residual
		);

		residual
	}
}
