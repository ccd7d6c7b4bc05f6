//! Procedural fractal-noise terrain with crack-free LOD meshing and
//! viewer-driven chunk streaming.
//!
//! The pipeline runs in three stages: [`noise_field`] samples fractal
//! Perlin octaves into a grid, [`terrain_mesh`] turns a height grid into a
//! triangle mesh at a chosen level of detail with seam vertices that stitch
//! against coarser neighbours, and [`streamer`] keeps a window of chunks
//! loaded around a moving viewer, generating heights and meshes on worker
//! threads via [`work_queue`].

pub mod chunk;
pub mod height_grid;
pub mod mesh_settings;
pub mod noise_field;
pub mod streamer;
pub mod terrain_mesh;
pub mod work_queue;

pub use chunk::{ChunkCoord, ChunkState};
pub use height_grid::{generate_height_grid, HeightGrid, HeightGridConfig};
pub use mesh_settings::{MeshSettings, SUPPORTED_CHUNK_SIZES, SUPPORTED_LOD_COUNT};
pub use noise_field::{generate_noise_grid, FractalNoiseConfig, NormalizeMode};
pub use streamer::{ChunkStreamer, LodThreshold, StreamerConfig, TerrainSink};
pub use terrain_mesh::{build_terrain_mesh, TerrainMesh};
pub use work_queue::{WorkHandle, WorkQueue};
