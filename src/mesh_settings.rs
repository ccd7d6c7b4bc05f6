//! Mesh detail configuration: supported chunk sizes, LOD count, shading
//! mode and world scale.

/// Number of discrete LOD levels a chunk can be meshed at.
pub const SUPPORTED_LOD_COUNT: usize = 5;

/// Supported chunk edge lengths, in height samples per side.
/// Each is divisible by every even LOD stride from 2 to 8.
pub const SUPPORTED_CHUNK_SIZES: [usize; 9] = [48, 72, 96, 120, 144, 168, 192, 216, 240];

/// Flat shading explodes the mesh to three unique vertices per triangle,
/// so only the smallest sizes stay within the per-mesh vertex budget.
pub const FLAT_SHADED_CHUNK_SIZE_COUNT: usize = 3;

/// Mesh construction settings shared by every chunk.
#[derive(Debug, Clone)]
pub struct MeshSettings {
    /// World-space scale applied to the whole terrain.
    pub mesh_scale: f32,
    pub use_flat_shading: bool,
    /// Index into [`SUPPORTED_CHUNK_SIZES`].
    pub chunk_size_index: usize,
    /// Index used instead when flat shading is on.
    pub flat_shaded_chunk_size_index: usize,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            mesh_scale: 2.5,
            use_flat_shading: false,
            chunk_size_index: 0,
            flat_shaded_chunk_size_index: 0,
        }
    }
}

impl MeshSettings {
    /// Clamp indices and scale into their legal ranges.
    pub fn validated(mut self) -> Self {
        self.mesh_scale = self.mesh_scale.max(0.01);
        self.chunk_size_index = self.chunk_size_index.min(SUPPORTED_CHUNK_SIZES.len() - 1);
        self.flat_shaded_chunk_size_index = self
            .flat_shaded_chunk_size_index
            .min(FLAT_SHADED_CHUNK_SIZE_COUNT - 1);
        self
    }

    fn chunk_size(&self) -> usize {
        if self.use_flat_shading {
            SUPPORTED_CHUNK_SIZES[self.flat_shaded_chunk_size_index]
        } else {
            SUPPORTED_CHUNK_SIZES[self.chunk_size_index]
        }
    }

    /// Vertices per line of a chunk meshed at LOD 0, including 2 border
    /// vertices (excluded from the final mesh, used for normals) and 4 seam
    /// vertices (kept in the final mesh for cross-LOD stitching).
    pub fn vertices_per_line(&self) -> usize {
        self.chunk_size() - 1 + 2 + 4
    }

    /// World-space edge length of one chunk, excluding the border vertices.
    pub fn mesh_world_size(&self) -> f32 {
        (self.vertices_per_line() - 1 - 2) as f32 * self.mesh_scale
    }
}
