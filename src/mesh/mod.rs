//! Triangle meshes and the finalization artifact.
//!
//! A `MeshArtifact` starts as the mesh extracted from the volume. Hole filling
//! and colorization each add a derived variant; `current()` is what the
//! viewer shows.

pub mod colorize;
pub mod hole_filling;

use std::sync::Arc;

use nalgebra::Vector3;

pub use colorize::{ColorizationQuality, Colorizer, KeyframeColorizer};
pub use hole_filling::{BoundaryFanFiller, HoleFiller};

/// Indexed triangle mesh in world coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    pub vertices: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub triangles: Vec<[u32; 3]>,
    /// Per-vertex RGB, present once colorized.
    pub colors: Option<Vec<[u8; 3]>>,
}

impl TriangleMesh {
    pub fn new(vertices: Vec<Vector3<f32>>, triangles: Vec<[u32; 3]>) -> Self {
        let mut mesh = Self {
            vertices,
            normals: Vec::new(),
            triangles,
            colors: None,
        };
        mesh.compute_normals();
        mesh
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn is_colorized(&self) -> bool {
        self.colors.is_some()
    }

    /// Area-weighted vertex normals.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vector3::<f32>::zeros(); self.vertices.len()];
        for tri in &self.triangles {
            let [a, b, c] = (*tri).map(|i| self.vertices[i as usize]);
            let n = (b - a).cross(&(c - a));
            for &i in tri {
                normals[i as usize] += n;
            }
        }
        for n in &mut normals {
            *n = n.try_normalize(1e-12).unwrap_or_else(Vector3::zeros);
        }
        self.normals = normals;
    }

    /// Axis-aligned bounds, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Vector3<f32>, Vector3<f32>)> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(lo, hi), v| {
            (lo.inf(v), hi.sup(v))
        }))
    }
}

/// Mesh produced by finalization, with its derived variants.
#[derive(Debug, Clone)]
pub struct MeshArtifact {
    /// Extracted from the volume; always present.
    pub extracted: Arc<TriangleMesh>,
    pub hole_filled: Option<Arc<TriangleMesh>>,
    pub colorized: Option<Arc<TriangleMesh>>,
    /// Quality of `colorized`, if any.
    pub color_quality: Option<ColorizationQuality>,
    /// Stages that fell back to the previous variant.
    pub warnings: Vec<String>,
}

impl MeshArtifact {
    /// Artifact around the shared extracted mesh.
    pub fn shared(extracted: Arc<TriangleMesh>) -> Self {
        Self {
            extracted,
            hole_filled: None,
            colorized: None,
            color_quality: None,
            warnings: Vec::new(),
        }
    }

    /// Best geometry available: hole-filled if present, otherwise extracted.
    pub fn geometry(&self) -> &Arc<TriangleMesh> {
        self.hole_filled.as_ref().unwrap_or(&self.extracted)
    }

    /// The variant the viewer should display.
    pub fn current(&self) -> &Arc<TriangleMesh> {
        self.colorized.as_ref().unwrap_or_else(|| self.geometry())
    }

    pub fn is_hole_filled(&self) -> bool {
        self.hole_filled.is_some()
    }

    pub fn is_colorized(&self) -> bool {
        self.colorized.is_some()
    }
}
