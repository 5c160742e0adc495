//! Hole filling for extracted meshes.
//!
//! Boundary edges (used by exactly one triangle) are chained into closed
//! loops. Each loop short enough to be a hole, rather than the open rim of an
//! unscanned region, is closed with a fan around its centroid.

use std::collections::HashMap;

use nalgebra::Vector3;
use tracing::debug;

use crate::config::HoleFillingSettings;
use crate::error::FinalizeError;
use crate::finalization::CancelToken;
use crate::mesh::TriangleMesh;

/// Produces a hole-filled variant of a mesh.
pub trait HoleFiller: Send + Sync {
    fn fill(&self, mesh: &TriangleMesh, cancel: &CancelToken) -> Result<TriangleMesh, FinalizeError>;
}

/// Closed boundary loops of `mesh`, each listed in the winding order of the
/// adjacent triangles. Open chains (non-manifold rims) are dropped.
pub fn boundary_loops(mesh: &TriangleMesh) -> Vec<Vec<u32>> {
    let mut edge_uses: HashMap<(u32, u32), u32> = HashMap::new();
    for tri in &mesh.triangles {
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            *edge_uses.entry((a.min(b), a.max(b))).or_default() += 1;
        }
    }

    let mut outgoing: HashMap<u32, Vec<u32>> = HashMap::new();
    for tri in &mesh.triangles {
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            if edge_uses.get(&(a.min(b), a.max(b))) == Some(&1) {
                outgoing.entry(a).or_default().push(b);
            }
        }
    }

    let mut starts: Vec<u32> = outgoing.keys().copied().collect();
    starts.sort_unstable();

    let mut loops = Vec::new();
    for start in starts {
        while let Some(first) = outgoing.get_mut(&start).and_then(|next| next.pop()) {
            let mut chain = vec![start];
            let mut current = first;
            let mut closed = false;
            while chain.len() <= mesh.triangles.len() * 3 {
                if current == start {
                    closed = true;
                    break;
                }
                chain.push(current);
                match outgoing.get_mut(&current).and_then(|next| next.pop()) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            if closed && chain.len() >= 3 {
                loops.push(chain);
            }
        }
    }
    loops
}

/// Closes small boundary loops with a centroid fan.
pub struct BoundaryFanFiller {
    settings: HoleFillingSettings,
}

impl BoundaryFanFiller {
    pub fn new(settings: HoleFillingSettings) -> Self {
        Self { settings }
    }
}

impl Default for BoundaryFanFiller {
    fn default() -> Self {
        Self::new(HoleFillingSettings::default())
    }
}

impl HoleFiller for BoundaryFanFiller {
    fn fill(&self, mesh: &TriangleMesh, cancel: &CancelToken) -> Result<TriangleMesh, FinalizeError> {
        if mesh.is_empty() {
            return Err(FinalizeError::EmptyMesh);
        }

        let loops = boundary_loops(mesh);
        cancel.check()?;

        let mut vertices = mesh.vertices.clone();
        let mut triangles = mesh.triangles.clone();
        let mut colors = mesh.colors.clone();
        let mut filled = 0usize;

        for hole in loops.iter().filter(|l| l.len() <= self.settings.max_hole_edges) {
            cancel.check()?;
            let centroid = hole
                .iter()
                .fold(Vector3::<f32>::zeros(), |acc, &i| acc + mesh.vertices[i as usize])
                / hole.len() as f32;
            let c = vertices.len() as u32;
            vertices.push(centroid);

            if let Some(colors) = colors.as_mut() {
                let mut sum = [0u32; 3];
                for &i in hole {
                    let rgb = colors.get(i as usize).copied().unwrap_or([0, 0, 0]);
                    for ch in 0..3 {
                        sum[ch] += u32::from(rgb[ch]);
                    }
                }
                colors.push(sum.map(|s| (s / hole.len() as u32) as u8));
            }

            // Boundary edges run a -> b along their triangle; the patch uses b -> a.
            for k in 0..hole.len() {
                let (a, b) = (hole[k], hole[(k + 1) % hole.len()]);
                triangles.push([b, a, c]);
            }
            filled += 1;
        }

        debug!(
            loops = loops.len(),
            filled,
            added_triangles = triangles.len() - mesh.triangles.len(),
            "hole filling done"
        );

        let mut out = TriangleMesh::new(vertices, triangles);
        out.colors = colors;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tetrahedron with outward winding, missing its slanted face.
    fn open_tetrahedron() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2]],
        )
    }

    #[test]
    fn test_single_boundary_loop_found() {
        let loops = boundary_loops(&open_tetrahedron());
        assert_eq!(loops.len(), 1);
        let mut hole = loops[0].clone();
        hole.sort_unstable();
        assert_eq!(hole, vec![1, 2, 3]);
    }

    #[test]
    fn test_fill_closes_mesh() {
        let mesh = open_tetrahedron();
        let filled = BoundaryFanFiller::default().fill(&mesh, &CancelToken::new()).unwrap();
        assert_eq!(filled.num_vertices(), 5);
        assert_eq!(filled.num_triangles(), 6);
        assert!(boundary_loops(&filled).is_empty());

        // Patch faces outward like the missing face would.
        let centroid_normal = filled.normals[4];
        assert!(centroid_normal.dot(&Vector3::new(1.0, 1.0, 1.0)) > 0.0);
    }

    #[test]
    fn test_long_loops_left_open() {
        let mesh = open_tetrahedron();
        let filler = BoundaryFanFiller::new(HoleFillingSettings { max_hole_edges: 2 });
        let out = filler.fill(&mesh, &CancelToken::new()).unwrap();
        assert_eq!(out.num_triangles(), mesh.num_triangles());
    }

    #[test]
    fn test_colors_carried() {
        let mut mesh = open_tetrahedron();
        mesh.colors = Some(vec![[0, 0, 0], [30, 30, 30], [60, 60, 60], [90, 90, 90]]);
        let out = BoundaryFanFiller::default().fill(&mesh, &CancelToken::new()).unwrap();
        let colors = out.colors.unwrap();
        assert_eq!(colors.len(), 5);
        assert_eq!(colors[4], [60, 60, 60]);
    }

    #[test]
    fn test_empty_and_cancelled() {
        let filler = BoundaryFanFiller::default();
        assert_eq!(
            filler.fill(&TriangleMesh::default(), &CancelToken::new()),
            Err(FinalizeError::EmptyMesh)
        );
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(filler.fill(&open_tetrahedron(), &cancel), Err(FinalizeError::Cancelled));
    }
}
