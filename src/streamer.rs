//! Chunk streaming: tracks a moving viewer, decides visibility and detail
//! level per chunk, and drives height/mesh generation through the work
//! queue.
//!
//! All chunk state lives on the consumer thread. Worker results are applied
//! only inside [`ChunkStreamer::tick`], which drains the completion queue
//! before reacting to viewer movement.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info};

use crate::chunk::{ChunkCoord, ChunkState, TerrainChunk};
use crate::height_grid::{generate_height_grid, HeightGrid, HeightGridConfig};
use crate::mesh_settings::{MeshSettings, SUPPORTED_LOD_COUNT};
use crate::terrain_mesh::{build_terrain_mesh, TerrainMesh};
use crate::work_queue::{WorkHandle, WorkQueue};

/// Viewer movement that triggers a full chunk-set refresh, in world units.
const VIEWER_MOVE_THRESHOLD: f32 = 25.0;
const SQR_VIEWER_MOVE_THRESHOLD: f32 = VIEWER_MOVE_THRESHOLD * VIEWER_MOVE_THRESHOLD;

/// Absolute distance at which a chunk receives its permanent collider.
/// Independent of the LOD visibility thresholds.
const COLLIDER_DISTANCE_THRESHOLD: f32 = 5.0;

/// One detail level: the LOD to mesh at and the distance out to which it is
/// used. Thresholds must increase with the index.
#[derive(Debug, Clone, Copy)]
pub struct LodThreshold {
    pub lod: usize,
    pub visible_distance: f32,
}

impl LodThreshold {
    pub fn sqr_visible_distance(&self) -> f32 {
        self.visible_distance * self.visible_distance
    }
}

/// Streamer configuration, validated once on construction.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Detail levels ordered by ascending visible distance; the last one
    /// bounds the overall view distance.
    pub detail_levels: Vec<LodThreshold>,
    /// Index into `detail_levels` used for collision meshes.
    pub collider_lod_index: usize,
    pub height: HeightGridConfig,
    pub mesh: MeshSettings,
}

impl StreamerConfig {
    /// Clamp and order every parameter. Out-of-range values are corrected,
    /// never rejected; an empty detail-level list is a programming defect.
    pub fn validated(mut self) -> Self {
        assert!(
            !self.detail_levels.is_empty(),
            "at least one detail level is required"
        );
        for level in &mut self.detail_levels {
            level.lod = level.lod.min(SUPPORTED_LOD_COUNT - 1);
            level.visible_distance = level.visible_distance.max(0.0);
        }
        self.detail_levels
            .sort_by(|a, b| a.visible_distance.partial_cmp(&b.visible_distance).unwrap());
        self.collider_lod_index = self.collider_lod_index.min(self.detail_levels.len() - 1);
        self.height = self.height.validated();
        self.mesh = self.mesh.validated();
        self
    }
}

/// Where finished terrain goes. Implemented by the embedding application;
/// called only from the consumer thread, during `tick`.
pub trait TerrainSink {
    /// A chunk's displayed mesh changed (first install or LOD switch).
    fn install_mesh(&mut self, coord: ChunkCoord, lod_index: usize, mesh: &Arc<TerrainMesh>);
    /// A chunk received its permanent collision mesh. Fired at most once
    /// per chunk.
    fn install_collider(&mut self, coord: ChunkCoord, mesh: &Arc<TerrainMesh>);
    /// A chunk crossed the visibility boundary.
    fn set_visible(&mut self, coord: ChunkCoord, visible: bool);
    /// A chunk left the tracked window and its resources can be released.
    fn retire_chunk(&mut self, coord: ChunkCoord);
}

/// Streamer state owned by the consumer thread. Work-queue completions
/// receive `&mut` access to it inside the drain step.
pub struct StreamerState<S: TerrainSink> {
    config: StreamerConfig,
    sink: S,
    scheduler: WorkHandle<StreamerState<S>>,
    chunks: HashMap<ChunkCoord, TerrainChunk>,
    visible_chunks: Vec<ChunkCoord>,
    viewer_position: [f32; 2],
    viewer_position_old: [f32; 2],
    chunks_in_view_radius: i32,
    started: bool,
}

/// Owns the chunk set and the work queue; the embedding application calls
/// [`tick`](Self::tick) once per frame with the viewer's ground position.
pub struct ChunkStreamer<S: TerrainSink + 'static> {
    queue: WorkQueue<StreamerState<S>>,
    state: StreamerState<S>,
}

impl<S: TerrainSink + 'static> ChunkStreamer<S> {
    pub fn new(config: StreamerConfig, sink: S) -> Self {
        let config = config.validated();
        let queue = WorkQueue::new();

        let max_view_distance = config
            .detail_levels
            .last()
            .expect("validated config has detail levels")
            .visible_distance;
        let chunks_in_view_radius =
            (max_view_distance / config.mesh.mesh_world_size()).round() as i32;

        let state = StreamerState {
            config,
            sink,
            scheduler: queue.handle(),
            chunks: HashMap::new(),
            visible_chunks: Vec::new(),
            viewer_position: [0.0, 0.0],
            viewer_position_old: [0.0, 0.0],
            chunks_in_view_radius,
            started: false,
        };

        Self { queue, state }
    }

    /// Apply every pending worker completion, then react to the viewer
    /// position. Returns the number of completions applied.
    pub fn tick(&mut self, viewer_position: [f32; 2]) -> usize {
        let drained = self.queue.drain(&mut self.state);
        self.state.update_viewer(viewer_position);
        drained
    }

    /// Submit arbitrary background work whose completion runs against the
    /// streamer state during a later `tick`.
    pub fn work_handle(&self) -> WorkHandle<StreamerState<S>> {
        self.queue.handle()
    }

    /// The chunk's height grid, available once it is `HeightReady`. Export
    /// tooling must not call this earlier.
    pub fn height_grid(&self, coord: ChunkCoord) -> Option<&Arc<HeightGrid>> {
        self.state.chunks.get(&coord)?.height_grid.as_ref()
    }

    pub fn chunk_state(&self, coord: ChunkCoord) -> Option<ChunkState> {
        self.state.chunks.get(&coord).map(|c| c.state())
    }

    pub fn displayed_lod(&self, coord: ChunkCoord) -> Option<usize> {
        self.state.chunks.get(&coord)?.displayed_lod
    }

    pub fn is_tracked(&self, coord: ChunkCoord) -> bool {
        self.state.chunks.contains_key(&coord)
    }

    pub fn is_visible(&self, coord: ChunkCoord) -> bool {
        self.state
            .chunks
            .get(&coord)
            .map(|c| c.visible)
            .unwrap_or(false)
    }

    pub fn lod_mesh_ready(&self, coord: ChunkCoord, lod_index: usize) -> bool {
        self.state
            .chunks
            .get(&coord)
            .and_then(|c| c.lod_meshes.get(lod_index))
            .map(|m| m.mesh.is_some())
            .unwrap_or(false)
    }

    pub fn tracked_chunk_count(&self) -> usize {
        self.state.chunks.len()
    }

    pub fn visible_chunk_count(&self) -> usize {
        self.state.visible_chunks.len()
    }

    pub fn sink(&self) -> &S {
        &self.state.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.state.sink
    }
}

impl<S: TerrainSink + 'static> StreamerState<S> {
    fn update_viewer(&mut self, position: [f32; 2]) {
        self.viewer_position = position;

        if !self.started {
            self.started = true;
            self.viewer_position_old = position;
            self.refresh_visible_chunks();
            return;
        }

        // Any movement since the last full refresh keeps collider checks
        // running; the full refresh itself only happens past the threshold.
        if position != self.viewer_position_old {
            for coord in self.visible_chunks.clone() {
                self.update_collision_mesh(coord);
            }
        }

        let dx = position[0] - self.viewer_position_old[0];
        let dy = position[1] - self.viewer_position_old[1];
        if dx * dx + dy * dy > SQR_VIEWER_MOVE_THRESHOLD {
            self.viewer_position_old = position;
            self.refresh_visible_chunks();
        }
    }

    fn refresh_visible_chunks(&mut self) {
        let world_size = self.config.mesh.mesh_world_size();
        let mut already_updated = HashSet::new();

        // Reverse so chunks leaving the visible set mid-iteration are safe.
        for coord in self.visible_chunks.clone().into_iter().rev() {
            already_updated.insert(coord);
            self.update_chunk(coord);
        }

        let current_x = (self.viewer_position[0] / world_size).round() as i32;
        let current_y = (self.viewer_position[1] / world_size).round() as i32;
        let radius = self.chunks_in_view_radius;

        for y_offset in -radius..=radius {
            for x_offset in -radius..=radius {
                let coord = ChunkCoord::new(current_x + x_offset, current_y + y_offset);
                if already_updated.contains(&coord) {
                    continue;
                }
                if self.chunks.contains_key(&coord) {
                    self.update_chunk(coord);
                } else {
                    self.create_chunk(coord);
                }
            }
        }

        // Chunks that scrolled out of the tracked window are dropped;
        // re-entry creates a fresh chunk.
        let evicted: Vec<ChunkCoord> = self
            .chunks
            .keys()
            .copied()
            .filter(|c| (c.x - current_x).abs() > radius || (c.y - current_y).abs() > radius)
            .collect();
        for coord in evicted {
            self.chunks.remove(&coord);
            self.visible_chunks.retain(|c| *c != coord);
            self.sink.retire_chunk(coord);
            info!("chunk ({}, {}): evicted", coord.x, coord.y);
        }
    }

    fn create_chunk(&mut self, coord: ChunkCoord) {
        let chunk = TerrainChunk::new(
            coord,
            self.config.mesh.mesh_world_size(),
            self.config.mesh.mesh_scale,
            self.config.detail_levels.len(),
        );
        let sample_centre = chunk.sample_centre;
        let grid_size = self.config.mesh.vertices_per_line();
        let height_config = self.config.height.clone();

        info!(
            "chunk ({}, {}): created, requesting height grid",
            coord.x, coord.y
        );
        self.chunks.insert(coord, chunk);
        self.scheduler.submit(
            move || generate_height_grid(grid_size, grid_size, &height_config, sample_centre),
            move |state, grid| state.on_height_grid(coord, grid),
        );
    }

    fn on_height_grid(&mut self, coord: ChunkCoord, grid: HeightGrid) {
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            debug!(
                "chunk ({}, {}): height grid for evicted chunk discarded",
                coord.x, coord.y
            );
            return;
        };
        if chunk.height_grid.is_some() {
            // Duplicate delivery from a request that outlived an eviction
            // cycle; the data is identical, keep the first.
            return;
        }
        chunk.height_grid = Some(Arc::new(grid));
        self.update_chunk(coord);
    }

    fn on_mesh_built(&mut self, coord: ChunkCoord, lod_index: usize, mesh: TerrainMesh) {
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            debug!(
                "chunk ({}, {}): mesh for evicted chunk discarded",
                coord.x, coord.y
            );
            return;
        };
        chunk.lod_meshes[lod_index].mesh = Some(Arc::new(mesh));

        self.update_chunk(coord);
        if lod_index == self.config.collider_lod_index {
            self.update_collision_mesh(coord);
        }
    }

    /// Re-evaluate one chunk against the viewer: visibility, LOD choice,
    /// and mesh requests. No-op until the chunk is `HeightReady`.
    fn update_chunk(&mut self, coord: ChunkCoord) {
        let viewer = self.viewer_position;
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return;
        };
        let Some(grid) = chunk.height_grid.clone() else {
            return;
        };

        let distance = chunk.bounds.sqr_distance(viewer).sqrt();
        let was_visible = chunk.visible;
        let levels = &self.config.detail_levels;
        let visible = distance <= levels[levels.len() - 1].visible_distance;

        if visible {
            // Finest level whose predecessors are all exceeded; thresholds
            // are validated ascending.
            let mut lod_index = 0;
            for (i, level) in levels[..levels.len() - 1].iter().enumerate() {
                if distance > level.visible_distance {
                    lod_index = i + 1;
                } else {
                    break;
                }
            }

            if chunk.displayed_lod != Some(lod_index) {
                if let Some(mesh) = chunk.lod_meshes[lod_index].mesh.clone() {
                    chunk.displayed_lod = Some(lod_index);
                    self.sink.install_mesh(coord, lod_index, &mesh);
                } else if !chunk.lod_meshes[lod_index].requested {
                    chunk.lod_meshes[lod_index].requested = true;
                    let lod = levels[lod_index].lod;
                    let settings = self.config.mesh.clone();
                    debug!(
                        "chunk ({}, {}): requesting mesh at lod {}",
                        coord.x, coord.y, lod
                    );
                    self.scheduler.submit(
                        move || build_terrain_mesh(&grid, &settings, lod),
                        move |state, mesh| state.on_mesh_built(coord, lod_index, mesh),
                    );
                }
            }
        }

        if was_visible != visible {
            let chunk = self.chunks.get_mut(&coord).expect("chunk present above");
            chunk.visible = visible;
            if visible {
                self.visible_chunks.push(coord);
            } else {
                self.visible_chunks.retain(|c| *c != coord);
            }
            self.sink.set_visible(coord, visible);
        }
    }

    /// Collider maintenance for one chunk: request the collider-LOD mesh
    /// once in range, and attach it permanently once the viewer is close.
    fn update_collision_mesh(&mut self, coord: ChunkCoord) {
        let viewer = self.viewer_position;
        let collider_index = self.config.collider_lod_index;
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return;
        };
        if chunk.has_collider {
            return;
        }
        let Some(grid) = chunk.height_grid.clone() else {
            return;
        };

        let sqr_distance = chunk.bounds.sqr_distance(viewer);

        if sqr_distance < self.config.detail_levels[collider_index].sqr_visible_distance()
            && !chunk.lod_meshes[collider_index].requested
        {
            chunk.lod_meshes[collider_index].requested = true;
            let lod = self.config.detail_levels[collider_index].lod;
            let settings = self.config.mesh.clone();
            self.scheduler.submit(
                move || build_terrain_mesh(&grid, &settings, lod),
                move |state, mesh| state.on_mesh_built(coord, collider_index, mesh),
            );
        }

        if sqr_distance < COLLIDER_DISTANCE_THRESHOLD * COLLIDER_DISTANCE_THRESHOLD {
            let chunk = self.chunks.get_mut(&coord).expect("chunk present above");
            if let Some(mesh) = chunk.lod_meshes[collider_index].mesh.clone() {
                chunk.has_collider = true;
                self.sink.install_collider(coord, &mesh);
                info!("chunk ({}, {}): collider assigned", coord.x, coord.y);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise_field::FractalNoiseConfig;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct RecordingSink {
        installed: Vec<(ChunkCoord, usize)>,
        colliders: Vec<ChunkCoord>,
        visibility: Vec<(ChunkCoord, bool)>,
        retired: Vec<ChunkCoord>,
    }

    impl TerrainSink for RecordingSink {
        fn install_mesh(&mut self, coord: ChunkCoord, lod_index: usize, _mesh: &Arc<TerrainMesh>) {
            self.installed.push((coord, lod_index));
        }

        fn install_collider(&mut self, coord: ChunkCoord, _mesh: &Arc<TerrainMesh>) {
            self.colliders.push(coord);
        }

        fn set_visible(&mut self, coord: ChunkCoord, visible: bool) {
            self.visibility.push((coord, visible));
        }

        fn retire_chunk(&mut self, coord: ChunkCoord) {
            self.retired.push(coord);
        }
    }

    fn test_config() -> StreamerConfig {
        StreamerConfig {
            detail_levels: vec![
                LodThreshold {
                    lod: 0,
                    visible_distance: 60.0,
                },
                LodThreshold {
                    lod: 1,
                    visible_distance: 120.0,
                },
                LodThreshold {
                    lod: 2,
                    visible_distance: 240.0,
                },
            ],
            collider_lod_index: 0,
            height: HeightGridConfig {
                noise: FractalNoiseConfig {
                    seed: 42,
                    octaves: 2,
                    ..FractalNoiseConfig::default()
                },
                height_multiplier: 8.0,
            },
            // 53 vertices per line, 50 world units per chunk.
            mesh: MeshSettings {
                mesh_scale: 1.0,
                ..MeshSettings::default()
            },
        }
    }

    fn test_streamer() -> ChunkStreamer<RecordingSink> {
        let _ = env_logger::builder().is_test(true).try_init();
        ChunkStreamer::new(test_config(), RecordingSink::default())
    }

    fn pump_until<F>(
        streamer: &mut ChunkStreamer<RecordingSink>,
        position: [f32; 2],
        mut done: F,
        what: &str,
    ) where
        F: FnMut(&ChunkStreamer<RecordingSink>) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            streamer.tick(position);
            if done(streamer) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn origin() -> ChunkCoord {
        ChunkCoord::new(0, 0)
    }

    #[test]
    fn test_first_tick_tracks_the_whole_window() {
        let mut streamer = test_streamer();
        streamer.tick([0.0, 0.0]);

        // View distance 240 over 50-unit chunks: radius 5, 11x11 window.
        assert_eq!(streamer.tracked_chunk_count(), 121);
        assert_eq!(streamer.chunk_state(origin()), Some(ChunkState::HeightPending));
    }

    #[test]
    fn test_origin_chunk_becomes_visible_at_finest_lod() {
        let mut streamer = test_streamer();

        pump_until(
            &mut streamer,
            [0.0, 0.0],
            |s| s.displayed_lod(origin()) == Some(0),
            "origin chunk at LOD index 0",
        );

        assert!(streamer.is_visible(origin()));
        assert!(streamer
            .sink()
            .visibility
            .contains(&(origin(), true)));
        assert!(streamer.sink().installed.contains(&(origin(), 0)));
    }

    #[test]
    fn test_lod_index_increases_stepwise_with_distance() {
        let mut streamer = test_streamer();

        // Edge distances from the viewer at the origin: (2,0) is 75 units
        // away (between 60 and 120), (4,0) is 175 (between 120 and 240).
        let near = ChunkCoord::new(2, 0);
        let far = ChunkCoord::new(4, 0);

        pump_until(
            &mut streamer,
            [0.0, 0.0],
            |s| {
                s.displayed_lod(origin()) == Some(0)
                    && s.displayed_lod(near) == Some(1)
                    && s.displayed_lod(far) == Some(2)
            },
            "stepwise LOD selection",
        );
    }

    #[test]
    fn test_chunk_beyond_view_distance_stays_hidden() {
        let mut streamer = test_streamer();

        pump_until(
            &mut streamer,
            [0.0, 0.0],
            |s| s.displayed_lod(origin()) == Some(0),
            "initial load",
        );

        // Corner of the window: edge distance ~318 exceeds 240.
        let corner = ChunkCoord::new(5, 5);
        assert!(streamer.is_tracked(corner));
        assert!(!streamer.is_visible(corner));
        assert_eq!(streamer.displayed_lod(corner), None);
    }

    #[test]
    fn test_height_grid_accessor_follows_state() {
        let mut streamer = test_streamer();
        streamer.tick([0.0, 0.0]);
        assert!(streamer.height_grid(origin()).is_none(), "pending chunk");

        pump_until(
            &mut streamer,
            [0.0, 0.0],
            |s| s.chunk_state(origin()) == Some(ChunkState::HeightReady),
            "height grid delivery",
        );

        let grid = streamer.height_grid(origin()).expect("grid ready");
        assert!(grid.min_value <= grid.max_value);
    }

    #[test]
    fn test_collider_assigned_exactly_once() {
        let mut streamer = test_streamer();
        streamer.tick([0.0, 0.0]);

        // Keep the viewer moving slightly so collider refreshes fire.
        pump_until(
            &mut streamer,
            [0.5, 0.5],
            |s| !s.sink().colliders.is_empty(),
            "collider assignment",
        );
        assert_eq!(streamer.sink().colliders, vec![origin()]);

        for _ in 0..50 {
            streamer.tick([1.0, 1.0]);
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(
            streamer.sink().colliders.len(),
            1,
            "collider must never be rebuilt"
        );
    }

    #[test]
    fn test_cached_lod_mesh_is_reused_without_a_rebuild() {
        let mut streamer = test_streamer();

        pump_until(
            &mut streamer,
            [0.0, 0.0],
            |s| s.displayed_lod(origin()) == Some(0),
            "LOD 0 at origin",
        );
        pump_until(
            &mut streamer,
            [90.0, 0.0],
            |s| s.displayed_lod(origin()) == Some(1),
            "LOD 1 after moving away",
        );
        assert!(streamer.lod_mesh_ready(origin(), 0), "LOD 0 stays cached");

        // Moving back must switch instantly from the cache, in one tick.
        streamer.tick([0.0, 0.0]);
        assert_eq!(streamer.displayed_lod(origin()), Some(0));
    }

    #[test]
    fn test_chunks_outside_the_window_are_evicted() {
        let mut streamer = test_streamer();

        pump_until(
            &mut streamer,
            [0.0, 0.0],
            |s| s.displayed_lod(origin()) == Some(0),
            "initial load",
        );

        streamer.tick([1000.0, 0.0]);

        assert!(!streamer.is_tracked(origin()), "origin chunk evicted");
        assert!(streamer.sink().retired.contains(&origin()));

        // Late completions for evicted chunks are discarded quietly.
        for _ in 0..50 {
            streamer.tick([1000.0, 0.0]);
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!streamer.is_tracked(origin()));
    }

    #[test]
    fn test_config_validation_orders_thresholds() {
        let config = StreamerConfig {
            detail_levels: vec![
                LodThreshold {
                    lod: 9,
                    visible_distance: 300.0,
                },
                LodThreshold {
                    lod: 0,
                    visible_distance: 100.0,
                },
            ],
            collider_lod_index: 7,
            ..test_config()
        }
        .validated();

        assert_eq!(config.detail_levels[0].visible_distance, 100.0);
        assert_eq!(config.detail_levels[1].visible_distance, 300.0);
        assert_eq!(config.detail_levels[1].lod, SUPPORTED_LOD_COUNT - 1);
        assert_eq!(config.collider_lod_index, 1);
    }
}
