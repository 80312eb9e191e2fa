use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::frustum::FrustumCorner;

/// Vertex of the full-screen quad.
///
/// `position.xy` is in normalized device coordinates; `position.z` carries the
/// row of the frustum corner the vertex sits on so the vertex stage can fetch
/// its ray from the packed frustum matrix.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl QuadVertex {
    pub fn uv(&self) -> Vec2 {
        Vec2::from_array(self.uv)
    }

    /// Frustum corner referenced by the vertex.
    pub fn corner(&self) -> Option<FrustumCorner> {
        FrustumCorner::from_row(self.position[2] as usize)
    }
}

/// The four vertices emitted once per frame: BL, BR, TR, TL.
pub const FULL_SCREEN_QUAD: [QuadVertex; 4] = [
    // BL, frustum row 3
    QuadVertex {
        position: [-1.0, -1.0, 3.0],
        uv: [0.0, 0.0],
    },
    // BR, frustum row 2
    QuadVertex {
        position: [1.0, -1.0, 2.0],
        uv: [1.0, 0.0],
    },
    // TR, frustum row 1
    QuadVertex {
        position: [1.0, 1.0, 1.0],
        uv: [1.0, 1.0],
    },
    // TL, frustum row 0
    QuadVertex {
        position: [-1.0, 1.0, 0.0],
        uv: [0.0, 1.0],
    },
];

/// Two counter-clockwise triangles covering the quad.
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Bilinear weights of each vertex of an axis-aligned quad at `uv`.
pub fn vertex_weights(quad: &[QuadVertex; 4], uv: Vec2) -> [f32; 4] {
    quad.map(|vertex| {
        let d = (uv - vertex.uv()).abs();
        (1.0 - d.x).max(0.0) * (1.0 - d.y).max(0.0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frustum::compute_frustum;

    #[test]
    fn quad_covers_unit_square_once() {
        let mut uvs: Vec<_> = FULL_SCREEN_QUAD.iter().map(|v| v.uv).collect();
        uvs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(uvs, vec![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]);
    }

    #[test]
    fn uv_and_ndc_agree() {
        for vertex in FULL_SCREEN_QUAD {
            let ndc = Vec2::new(vertex.position[0], vertex.position[1]);
            assert_eq!(ndc, vertex.uv() * 2.0 - Vec2::ONE);
        }
    }

    #[test]
    fn each_vertex_selects_the_corner_under_it() {
        let frustum = compute_frustum(60.0, 16.0 / 9.0);
        for vertex in FULL_SCREEN_QUAD {
            let corner = vertex.corner().unwrap();
            assert_eq!(corner.uv(), vertex.uv());
            let ray = frustum.corner(corner);
            let right = vertex.uv[0] > 0.5;
            let top = vertex.uv[1] > 0.5;
            assert_eq!(ray.x > 0.0, right, "{corner:?}");
            assert_eq!(ray.y > 0.0, top, "{corner:?}");
        }
    }

    #[test]
    fn weights_match_frustum_interpolation() {
        let frustum = compute_frustum(70.0, 1.25);
        for uv in [Vec2::new(0.25, 0.75), Vec2::new(0.9, 0.1), Vec2::splat(0.5)] {
            let weights = vertex_weights(&FULL_SCREEN_QUAD, uv);
            assert!((weights.iter().sum::<f32>() - 1.0).abs() < 1e-6);
            let ray = FULL_SCREEN_QUAD
                .iter()
                .zip(weights)
                .map(|(vertex, w)| frustum.corner(vertex.corner().unwrap()) * w)
                .sum::<glam::Vec3>();
            assert!(ray.abs_diff_eq(frustum.interpolate(uv), 1e-5));
        }
    }

    #[test]
    fn indices_form_two_triangles() {
        assert_eq!(QUAD_INDICES.len(), 6);
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < FULL_SCREEN_QUAD.len()));
    }
}
