//! LOD terrain mesh construction with crack-free seam stitching.
//!
//! A chunk meshed at any LOD keeps its outermost emitted ring ("seam"
//! vertices) at full resolution so it lines up with a neighbour rendered at
//! a different LOD. One ring further in, vertices that do not land on the
//! LOD stride ("seam connection" vertices) are interpolated between the two
//! bounding main vertices: their position immediately, their normal only
//! after all face normals are known. An extra border ring outside the mesh
//! exists purely so edge vertices get correct normals; it is never emitted.

use crate::height_grid::HeightGrid;
use crate::mesh_settings::MeshSettings;

/// Address of a grid vertex in one of the two vertex spaces.
///
/// Border vertices live in their own array and never appear in the final
/// mesh, so they get a typed address instead of sharing the mesh index
/// space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VertexId {
    Mesh(usize),
    Border(usize),
}

/// Deferred normal blend for a seam-connection vertex: once normals are
/// baked, `vertex` receives the two main vertices' normals blended by
/// `fraction`.
#[derive(Debug, Clone, Copy)]
struct SeamConnection {
    vertex: usize,
    main_a: usize,
    main_b: usize,
    fraction: f32,
}

/// A finished terrain mesh. Immutable once built.
#[derive(Debug, Clone)]
pub struct TerrainMesh {
    pub positions: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    /// Baked per-vertex normals; `None` when flat-shaded (the consumer
    /// recomputes normals from per-triangle geometry).
    pub normals: Option<Vec<[f32; 3]>>,
    pub flat_shaded: bool,
}

impl TerrainMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Working buffers for one build. Mesh vertices are written by index (the
/// assignment order is fixed by the index map), triangles are appended.
struct MeshBuffers {
    positions: Vec<[f32; 3]>,
    uvs: Vec<[f32; 2]>,
    indices: Vec<u32>,
    border_positions: Vec<[f32; 3]>,
    border_triangles: Vec<VertexId>,
    seam_connections: Vec<SeamConnection>,
}

impl MeshBuffers {
    fn add_vertex(&mut self, id: VertexId, position: [f32; 3], uv: [f32; 2]) {
        match id {
            VertexId::Border(i) => self.border_positions[i] = position,
            VertexId::Mesh(i) => {
                self.positions[i] = position;
                self.uvs[i] = uv;
            }
        }
    }

    fn add_triangle(&mut self, a: VertexId, b: VertexId, c: VertexId) {
        let all_mesh = matches!(
            (a, b, c),
            (VertexId::Mesh(_), VertexId::Mesh(_), VertexId::Mesh(_))
        );
        if all_mesh {
            for id in [a, b, c] {
                if let VertexId::Mesh(i) = id {
                    self.indices.push(i as u32);
                }
            }
        } else {
            // Triangles touching the border ring only contribute normals.
            self.border_triangles.extend([a, b, c]);
        }
    }

    fn position_of(&self, id: VertexId) -> [f32; 3] {
        match id {
            VertexId::Mesh(i) => self.positions[i],
            VertexId::Border(i) => self.border_positions[i],
        }
    }
}

/// Build a renderable mesh for one chunk at the given LOD.
///
/// The height grid must cover at least `vertices_per_line()` samples per
/// side; it is generated once per chunk and shared read-only across every
/// LOD build.
pub fn build_terrain_mesh(
    height_grid: &HeightGrid,
    settings: &MeshSettings,
    lod: usize,
) -> TerrainMesh {
    let skip = if lod == 0 { 1 } else { 2 * lod };
    let mesh_size = settings.vertices_per_line();
    assert!(
        height_grid.width() >= mesh_size && height_grid.height() >= mesh_size,
        "height grid {}x{} smaller than mesh size {}",
        height_grid.width(),
        height_grid.height(),
        mesh_size
    );
    assert_eq!(
        (mesh_size - 5) % skip,
        0,
        "chunk size is not divisible by LOD stride {skip}"
    );

    let world_size = settings.mesh_world_size();
    let top_left = [-world_size / 2.0, world_size / 2.0];

    // Expected element counts, derived from the number of groups of
    // seam-connection vertices per line. Used for exact pre-allocation and
    // cross-checked after emission.
    let groups = (mesh_size - 5) / skip;
    let main_vertices = (groups + 1) * (groups + 1);
    let seam_vertices = (mesh_size - 3) * 4;
    let seam_connection_vertices = (skip - 1) * groups * 4;
    let mesh_vertices = main_vertices + seam_vertices + seam_connection_vertices;
    let triangle_indices = (8 * (mesh_size - 4) + 2 * groups * groups) * 3;
    let border_vertices = (mesh_size - 1) * 4;
    let border_triangle_indices = 24 * (mesh_size - 2);

    let is_border = |x: usize, y: usize| x == 0 || y == 0 || x == mesh_size - 1 || y == mesh_size - 1;
    let is_skipped = |x: usize, y: usize| {
        x > 2
            && x < mesh_size - 3
            && y > 2
            && y < mesh_size - 3
            && ((x - 2) % skip != 0 || (y - 2) % skip != 0)
    };

    // First pass: assign vertex addresses in row-major order. Border
    // vertices are numbered in encounter order within their own space;
    // skipped vertices get no address and must never be referenced.
    let mut vertex_ids: Vec<Option<VertexId>> = vec![None; mesh_size * mesh_size];
    let mut mesh_index = 0usize;
    let mut border_index = 0usize;
    for y in 0..mesh_size {
        for x in 0..mesh_size {
            if is_border(x, y) {
                vertex_ids[y * mesh_size + x] = Some(VertexId::Border(border_index));
                border_index += 1;
            } else if !is_skipped(x, y) {
                vertex_ids[y * mesh_size + x] = Some(VertexId::Mesh(mesh_index));
                mesh_index += 1;
            }
        }
    }
    assert_eq!(mesh_index, mesh_vertices, "mesh vertex count mismatch");
    assert_eq!(border_index, border_vertices, "border vertex count mismatch");

    let id_at = |ids: &[Option<VertexId>], x: usize, y: usize| -> VertexId {
        ids[y * mesh_size + x].expect("triangle references a skipped vertex")
    };

    let mut buffers = MeshBuffers {
        positions: vec![[0.0; 3]; mesh_vertices],
        uvs: vec![[0.0; 2]; mesh_vertices],
        indices: Vec::with_capacity(triangle_indices),
        border_positions: vec![[0.0; 3]; border_vertices],
        border_triangles: Vec::with_capacity(border_triangle_indices),
        seam_connections: Vec::with_capacity(seam_connection_vertices),
    };

    // Second pass: emit vertices and triangles.
    for y in 0..mesh_size {
        for x in 0..mesh_size {
            if is_skipped(x, y) {
                continue;
            }

            let border = is_border(x, y);
            let seam = !border && (y == 1 || y == mesh_size - 2 || x == 1 || x == mesh_size - 2);
            let main =
                !border && !seam && (x - 2) % skip == 0 && (y - 2) % skip == 0;
            let seam_connection = !border
                && !seam
                && !main
                && (y == 2 || y == mesh_size - 3 || x == 2 || x == mesh_size - 3);

            let id = id_at(&vertex_ids, x, y);

            // uv runs 0..1 over the emitted mesh, excluding the border ring.
            let percent = [
                (x as f32 - 1.0) / (mesh_size as f32 - 3.0),
                (y as f32 - 1.0) / (mesh_size as f32 - 3.0),
            ];
            let position_x = top_left[0] + percent[0] * world_size;
            let position_z = top_left[1] - percent[1] * world_size;

            let mut height = height_grid.get(x, y);

            if seam_connection {
                // Interpolate the position between the two bounding main
                // vertices now; the normal blend waits until baking.
                let vertical = x == 2 || x == mesh_size - 3;
                let distance_to_a = (if vertical { y - 2 } else { x - 2 }) % skip;
                let distance_to_b = skip - distance_to_a;
                let fraction = distance_to_a as f32 / skip as f32;

                let (ax, ay) = if vertical {
                    (x, y - distance_to_a)
                } else {
                    (x - distance_to_a, y)
                };
                let (bx, by) = if vertical {
                    (x, y + distance_to_b)
                } else {
                    (x + distance_to_b, y)
                };

                let height_a = height_grid.get(ax, ay);
                let height_b = height_grid.get(bx, by);
                height = height_a * (1.0 - fraction) + height_b * fraction;

                let current = match id {
                    VertexId::Mesh(i) => i,
                    VertexId::Border(_) => unreachable!("seam connection on border ring"),
                };
                let main_of = |vid: VertexId| -> usize {
                    match vid {
                        VertexId::Mesh(i) => i,
                        VertexId::Border(_) => {
                            panic!("seam connection bounded by a border vertex")
                        }
                    }
                };
                buffers.seam_connections.push(SeamConnection {
                    vertex: current,
                    main_a: main_of(id_at(&vertex_ids, ax, ay)),
                    main_b: main_of(id_at(&vertex_ids, bx, by)),
                    fraction,
                });
            }

            buffers.add_vertex(id, [position_x, height, position_z], percent);

            // Rightmost and downmost vertices own no cell; leftmost and
            // upmost seam-connection vertices would duplicate seam cells.
            let create_triangle = x < mesh_size - 1
                && y < mesh_size - 1
                && (!seam_connection || (x != 2 && y != 2));
            if create_triangle {
                // Cells next to the seam band are never simplified.
                let increment = if main && x != mesh_size - 3 && y != mesh_size - 3 {
                    skip
                } else {
                    1
                };

                let a = id_at(&vertex_ids, x, y);
                let b = id_at(&vertex_ids, x + increment, y);
                let c = id_at(&vertex_ids, x, y + increment);
                let d = id_at(&vertex_ids, x + increment, y + increment);

                buffers.add_triangle(a, d, c);
                buffers.add_triangle(d, a, b);
            }
        }
    }

    assert_eq!(
        buffers.indices.len(),
        triangle_indices,
        "triangle count mismatch"
    );
    assert_eq!(
        buffers.border_triangles.len(),
        border_triangle_indices,
        "border triangle count mismatch"
    );
    assert_eq!(
        buffers.seam_connections.len(),
        seam_connection_vertices,
        "seam connection count mismatch"
    );

    if settings.use_flat_shading {
        flat_shaded_mesh(buffers)
    } else {
        smooth_shaded_mesh(buffers)
    }
}

/// Bake per-vertex normals, then resolve the deferred seam-connection
/// blends.
fn smooth_shaded_mesh(buffers: MeshBuffers) -> TerrainMesh {
    let mut normals = vec![[0.0f32; 3]; buffers.positions.len()];

    for triangle in buffers.indices.chunks_exact(3) {
        let (a, b, c) = (
            triangle[0] as usize,
            triangle[1] as usize,
            triangle[2] as usize,
        );
        let normal = face_normal(
            buffers.positions[a],
            buffers.positions[b],
            buffers.positions[c],
        );
        for i in [a, b, c] {
            normals[i] = add(normals[i], normal);
        }
    }

    // Border triangles contribute to their mesh vertices only; the border
    // vertices themselves need no normals.
    for triangle in buffers.border_triangles.chunks_exact(3) {
        let normal = face_normal(
            buffers.position_of(triangle[0]),
            buffers.position_of(triangle[1]),
            buffers.position_of(triangle[2]),
        );
        for id in triangle {
            if let VertexId::Mesh(i) = id {
                normals[*i] = add(normals[*i], normal);
            }
        }
    }

    for normal in &mut normals {
        *normal = normalize(*normal);
    }

    for connection in &buffers.seam_connections {
        let a = normals[connection.main_a];
        let b = normals[connection.main_b];
        let t = connection.fraction;
        normals[connection.vertex] = [
            a[0] * (1.0 - t) + b[0] * t,
            a[1] * (1.0 - t) + b[1] * t,
            a[2] * (1.0 - t) + b[2] * t,
        ];
    }

    TerrainMesh {
        positions: buffers.positions,
        uvs: buffers.uvs,
        indices: buffers.indices,
        normals: Some(normals),
        flat_shaded: false,
    }
}

/// Explode the mesh so every triangle owns three unique vertices. Shading
/// becomes discontinuous at triangle boundaries by design.
fn flat_shaded_mesh(buffers: MeshBuffers) -> TerrainMesh {
    let mut positions = Vec::with_capacity(buffers.indices.len());
    let mut uvs = Vec::with_capacity(buffers.indices.len());
    let mut indices = Vec::with_capacity(buffers.indices.len());

    for (i, &index) in buffers.indices.iter().enumerate() {
        positions.push(buffers.positions[index as usize]);
        uvs.push(buffers.uvs[index as usize]);
        indices.push(i as u32);
    }

    TerrainMesh {
        positions,
        uvs,
        indices,
        normals: None,
        flat_shaded: true,
    }
}

fn face_normal(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> [f32; 3] {
    let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let ac = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    normalize([
        ab[1] * ac[2] - ab[2] * ac[1],
        ab[2] * ac[0] - ab[0] * ac[2],
        ab[0] * ac[1] - ab[1] * ac[0],
    ])
}

fn add(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len > 1e-12 {
        [v[0] / len, v[1] / len, v[2] / len]
    } else {
        [0.0, 0.0, 0.0]
    }
}
