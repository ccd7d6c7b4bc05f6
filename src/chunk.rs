//! Per-chunk record: grid coordinate, bounds, height data and cached LOD
//! meshes.

use std::sync::Arc;

use crate::height_grid::HeightGrid;
use crate::terrain_mesh::TerrainMesh;

/// Integer chunk coordinate on the ground plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned square bounds on the ground plane.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub centre: [f32; 2],
    pub half_extent: f32,
}

impl Bounds {
    pub fn new(centre: [f32; 2], size: f32) -> Self {
        Self {
            centre,
            half_extent: size / 2.0,
        }
    }

    /// Squared distance from `point` to the nearest edge, 0 inside.
    pub fn sqr_distance(&self, point: [f32; 2]) -> f32 {
        let dx = ((point[0] - self.centre[0]).abs() - self.half_extent).max(0.0);
        let dy = ((point[1] - self.centre[1]).abs() - self.half_extent).max(0.0);
        dx * dx + dy * dy
    }
}

/// Lifecycle position of a chunk's height data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Height generation submitted, grid not yet delivered.
    HeightPending,
    /// Height grid present; LOD meshes can be requested.
    HeightReady,
}

/// One LOD slot of a chunk. `requested` suppresses duplicate build
/// submissions; a mesh, once present, is never rebuilt.
#[derive(Debug, Default)]
pub struct LodMesh {
    pub mesh: Option<Arc<TerrainMesh>>,
    pub requested: bool,
}

/// A tracked terrain chunk. Its height grid is generated exactly once and
/// is read-only afterward; all LOD meshes derive from it.
#[derive(Debug)]
pub struct TerrainChunk {
    pub coord: ChunkCoord,
    /// Centre of this chunk in noise-sample space.
    pub sample_centre: [f32; 2],
    pub bounds: Bounds,
    pub height_grid: Option<Arc<HeightGrid>>,
    /// One slot per configured detail level.
    pub lod_meshes: Vec<LodMesh>,
    /// Index into the detail levels currently shown, `None` before the
    /// first mesh is installed.
    pub displayed_lod: Option<usize>,
    /// Set once; colliders are never rebuilt after first assignment.
    pub has_collider: bool,
    pub visible: bool,
}

impl TerrainChunk {
    pub fn new(coord: ChunkCoord, world_size: f32, mesh_scale: f32, lod_count: usize) -> Self {
        let position = [coord.x as f32 * world_size, coord.y as f32 * world_size];
        let sample_centre = [position[0] / mesh_scale, position[1] / mesh_scale];

        Self {
            coord,
            sample_centre,
            bounds: Bounds::new(position, world_size),
            height_grid: None,
            lod_meshes: (0..lod_count).map(|_| LodMesh::default()).collect(),
            displayed_lod: None,
            has_collider: false,
            visible: false,
        }
    }

    pub fn state(&self) -> ChunkState {
        if self.height_grid.is_some() {
            ChunkState::HeightReady
        } else {
            ChunkState::HeightPending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqr_distance_is_zero_inside_bounds() {
        let bounds = Bounds::new([0.0, 0.0], 50.0);
        assert_eq!(bounds.sqr_distance([0.0, 0.0]), 0.0);
        assert_eq!(bounds.sqr_distance([24.0, -24.0]), 0.0);
    }

    #[test]
    fn test_sqr_distance_measures_to_nearest_edge() {
        let bounds = Bounds::new([0.0, 0.0], 50.0);
        assert_eq!(bounds.sqr_distance([35.0, 0.0]), 100.0);
        assert_eq!(bounds.sqr_distance([28.0, -29.0]), 9.0 + 16.0);
    }

    #[test]
    fn test_new_chunk_starts_height_pending() {
        let chunk = TerrainChunk::new(ChunkCoord::new(2, -1), 50.0, 2.5, 3);

        assert_eq!(chunk.state(), ChunkState::HeightPending);
        assert_eq!(chunk.bounds.centre, [100.0, -50.0]);
        assert_eq!(chunk.sample_centre, [40.0, -20.0]);
        assert_eq!(chunk.lod_meshes.len(), 3);
        assert!(!chunk.visible);
        assert_eq!(chunk.displayed_lod, None);
    }
}
