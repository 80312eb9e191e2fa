use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// One of the four far-plane corners of the view frustum.
///
/// The discriminant is the row the corner occupies in the packed
/// [`Frustum::to_mat4`] matrix, which is also the index the full-screen quad
/// stores in each vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrustumCorner {
    TopLeft = 0,
    TopRight = 1,
    BottomRight = 2,
    BottomLeft = 3,
}

impl FrustumCorner {
    /// Corners in packing order.
    pub const ALL: [FrustumCorner; 4] = [
        FrustumCorner::TopLeft,
        FrustumCorner::TopRight,
        FrustumCorner::BottomRight,
        FrustumCorner::BottomLeft,
    ];

    /// Row index of the corner inside the packed frustum matrix.
    pub fn row(self) -> usize {
        self as usize
    }

    /// Looks up a corner by packed row index.
    pub fn from_row(row: usize) -> Option<Self> {
        Self::ALL.get(row).copied()
    }

    /// Texture coordinate of the corner on the unit square, origin bottom-left.
    pub fn uv(self) -> Vec2 {
        match self {
            FrustumCorner::TopLeft => Vec2::new(0.0, 1.0),
            FrustumCorner::TopRight => Vec2::new(1.0, 1.0),
            FrustumCorner::BottomRight => Vec2::new(1.0, 0.0),
            FrustumCorner::BottomLeft => Vec2::new(0.0, 0.0),
        }
    }
}

/// Camera-space corner rays of the view frustum at unit depth.
///
/// The rays are not normalized: each one ends on the plane `z = -1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frustum {
    corners: [Vec3; 4],
}

impl Frustum {
    /// Returns the ray for the requested corner.
    pub fn corner(&self, corner: FrustumCorner) -> Vec3 {
        self.corners[corner.row()]
    }

    /// Returns the corner rays in packing order (TL, TR, BR, BL).
    pub fn rows(&self) -> [Vec3; 4] {
        self.corners
    }

    /// Packs the corners as the rows of a matrix with `w = 0`.
    ///
    /// The matrix is only a transport container for the shader; inverting or
    /// multiplying it has no meaning.
    pub fn to_mat4(&self) -> Mat4 {
        let rows = self.corners.map(|corner| corner.extend(0.0).to_array());
        Mat4::from_cols_array_2d(&rows).transpose()
    }

    /// Bilinearly interpolates the corner rays at `uv`, origin bottom-left.
    pub fn interpolate(&self, uv: Vec2) -> Vec3 {
        let top = self
            .corner(FrustumCorner::TopLeft)
            .lerp(self.corner(FrustumCorner::TopRight), uv.x);
        let bottom = self
            .corner(FrustumCorner::BottomLeft)
            .lerp(self.corner(FrustumCorner::BottomRight), uv.x);
        bottom.lerp(top, uv.y)
    }
}

/// Builds the frustum corner rays for a vertical field of view and aspect ratio.
///
/// Inputs are trusted: a field of view of 180° or more, or a non-positive
/// aspect ratio, yields meaningless corners.
pub fn compute_frustum(fov_degrees: f32, aspect_ratio: f32) -> Frustum {
    let fov = (fov_degrees * 0.5).to_radians().tan();

    let go_up = Vec3::Y * fov;
    let go_right = Vec3::X * fov * aspect_ratio;
    let forward = Vec3::NEG_Z;

    Frustum {
        corners: [
            forward - go_right + go_up,
            forward + go_right + go_up,
            forward + go_right - go_up,
            forward - go_right - go_up,
        ],
    }
}
