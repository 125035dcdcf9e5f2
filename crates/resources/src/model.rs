//! Model and mesh loading from glTF files.
//!
//! Every triangle primitive becomes one [`Mesh`]. Node transforms are not
//! applied; meshes are returned in document order in their own space.

use std::path::Path;

use glam::Vec3;
use tracing::{debug, info, warn};

use crate::error::{ResourceError, ResourceResult};

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Smallest box containing all `points`, or `None` when there are none.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Aabb { min: p, max: p },
                Some(b) => b.union_point(p),
            })
        })
    }

    fn union_point(self, p: Vec3) -> Self {
        Aabb {
            min: self.min.min(p),
            max: self.max.max(p),
        }
    }

    pub fn union(self, other: Aabb) -> Self {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Radius of the bounding sphere around [`Aabb::center`].
    #[inline]
    pub fn radius(&self) -> f32 {
        self.size().length() * 0.5
    }
}

/// A mesh containing vertex and index data.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tex_coords: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl Mesh {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.positions.iter().copied())
    }

    /// Checks that every index refers to an existing vertex.
    ///
    /// # Errors
    ///
    /// [`ResourceError::IndexOutOfRange`] for the first bad index.
    pub fn validate(&self) -> ResourceResult<()> {
        let vertex_count = self.positions.len();
        match self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            Some(&index) => Err(ResourceError::IndexOutOfRange {
                mesh: self.name.clone(),
                index,
                vertex_count,
            }),
            None => Ok(()),
        }
    }

    /// A unit cube centered on the origin with per-face normals and UVs.
    pub fn cube() -> Self {
        // (normal, tangent u, tangent v) per face
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];
        const CORNERS: [(f32, f32); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

        let mut mesh = Mesh {
            name: "cube".to_string(),
            ..Default::default()
        };
        for (normal, u, v) in FACES {
            let (n, u, v) = (Vec3::from(normal), Vec3::from(u), Vec3::from(v));
            let base = mesh.positions.len() as u32;
            for (su, sv) in CORNERS {
                mesh.positions.push((n + u * su + v * sv) * 0.5);
                mesh.normals.push(n);
                mesh.tex_coords.push([(su + 1.0) * 0.5, (1.0 - sv) * 0.5]);
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }
}

/// Area-weighted vertex normals from triangle faces.
///
/// Vertices that belong to no (non-degenerate) triangle get +Y.
pub fn compute_vertex_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        let face = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    normals
        .into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
        .collect()
}

/// A model containing one or more meshes.
#[derive(Clone, Debug)]
pub struct Model {
    pub meshes: Vec<Mesh>,
    pub bounds: Aabb,
}

impl Model {
    /// Loads a `.gltf` or `.glb` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or invalid, contains no
    /// triangle primitives, or a primitive has no positions or bad indices.
    pub fn load(path: &Path) -> ResourceResult<Self> {
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let (document, buffers, _images) =
            gltf::import(path).map_err(|e| ResourceError::GltfLoad {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let model = Self::from_document(path, &document, &buffers)?;
        info!(
            "Loaded model {:?}: {} meshes, {} vertices, {} triangles",
            path,
            model.meshes.len(),
            model.total_vertex_count(),
            model.total_triangle_count()
        );
        Ok(model)
    }

    /// Loads a self-contained glTF document from memory.
    ///
    /// # Errors
    ///
    /// See [`Model::load`].
    pub fn from_slice(bytes: &[u8]) -> ResourceResult<Self> {
        let origin = Path::new("<memory>");
        let (document, buffers, _images) =
            gltf::import_slice(bytes).map_err(|e| ResourceError::GltfLoad {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::from_document(origin, &document, &buffers)
    }

    fn from_document(
        path: &Path,
        document: &gltf::Document,
        buffers: &[gltf::buffer::Data],
    ) -> ResourceResult<Self> {
        let mut meshes = Vec::new();

        for gltf_mesh in document.meshes() {
            let mesh_name = gltf_mesh
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("mesh {}", gltf_mesh.index()));

            for primitive in gltf_mesh.primitives() {
                if primitive.mode() != gltf::mesh::Mode::Triangles {
                    warn!(
                        "Skipping {:?} primitive {} of '{}'",
                        primitive.mode(),
                        primitive.index(),
                        mesh_name
                    );
                    continue;
                }

                let reader = primitive
                    .reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

                let positions: Vec<Vec3> = reader
                    .read_positions()
                    .ok_or_else(|| ResourceError::NoPositionData(mesh_name.clone()))?
                    .map(Vec3::from)
                    .collect();

                let indices: Vec<u32> = match reader.read_indices() {
                    Some(indices) => indices.into_u32().collect(),
                    None => (0..positions.len() as u32).collect(),
                };

                let normals: Vec<Vec3> = match reader.read_normals() {
                    Some(normals) => normals.map(Vec3::from).collect(),
                    None => {
                        debug!("'{}' has no normals; generating them", mesh_name);
                        compute_vertex_normals(&positions, &indices)
                    }
                };

                let tex_coords: Vec<[f32; 2]> = match reader.read_tex_coords(0) {
                    Some(uvs) => uvs.into_f32().collect(),
                    None => vec![[0.0, 0.0]; positions.len()],
                };

                let mesh = Mesh {
                    name: format!("{}#{}", mesh_name, primitive.index()),
                    positions,
                    normals,
                    tex_coords,
                    indices,
                };
                mesh.validate()?;
                meshes.push(mesh);
            }
        }

        Self::from_meshes(meshes).ok_or_else(|| ResourceError::NoMeshes(path.to_path_buf()))
    }

    /// Wraps meshes into a model. `None` if there are no vertices at all.
    pub fn from_meshes(meshes: Vec<Mesh>) -> Option<Self> {
        let bounds = meshes
            .iter()
            .filter_map(Mesh::bounds)
            .reduce(Aabb::union)?;
        Some(Self { meshes, bounds })
    }

    /// The built-in unit cube.
    pub fn cube() -> Self {
        let cube = Mesh::cube();
        let bounds = Aabb {
            min: Vec3::splat(-0.5),
            max: Vec3::splat(0.5),
        };
        Self {
            meshes: vec![cube],
            bounds,
        }
    }

    pub fn total_vertex_count(&self) -> usize {
        self.meshes.iter().map(Mesh::vertex_count).sum()
    }

    pub fn total_triangle_count(&self) -> usize {
        self.meshes.iter().map(Mesh::triangle_count).sum()
    }
}
