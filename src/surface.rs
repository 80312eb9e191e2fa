use std::f32::consts::PI;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use glam::{Vec2, Vec3, Vec4};

/// CPU-side RGBA8 image used as a source or output surface.
///
/// Row 0 is the top of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 4]>,
}

impl Surface {
    /// Creates a transparent black surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0, 0])
    }

    /// Creates a surface where every pixel holds `color`.
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    /// Wraps tightly packed RGBA8 bytes.
    pub fn from_rgba8(width: u32, height: u32, bytes: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if bytes.len() != expected {
            return Err(anyhow!(
                "expected {expected} bytes for a {width}x{height} surface, got {}",
                bytes.len()
            ));
        }
        let pixels = bytes
            .chunks_exact(4)
            .map(|chunk| [chunk[0], chunk[1], chunk[2], chunk[3]])
            .collect();
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Builds a surface by evaluating `shade` at every pixel.
    pub fn from_fn(width: u32, height: u32, mut shade: impl FnMut(u32, u32) -> [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(shade(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[[u8; 4]] {
        &self.pixels
    }

    /// Raw bytes in row-major RGBA order.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.index(x, y).map(|index| self.pixels[index])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        if let Some(index) = self.index(x, y) {
            self.pixels[index] = color;
        }
    }

    pub fn fill(&mut self, color: [u8; 4]) {
        self.pixels.fill(color);
    }

    /// Replaces this surface's size and contents with `source`.
    pub fn copy_from(&mut self, source: &Surface) {
        self.width = source.width;
        self.height = source.height;
        self.pixels.clone_from(&source.pixels);
    }

    /// Bilinear sample with clamped edges, `uv` origin bottom-left, result in [0, 1].
    pub fn sample_bilinear(&self, uv: Vec2) -> Vec4 {
        if self.pixels.is_empty() {
            return Vec4::ZERO;
        }
        let x = uv.x * self.width as f32 - 0.5;
        let y = (1.0 - uv.y) * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let fetch = |px: f32, py: f32| -> Vec4 {
            let cx = (px as i64).clamp(0, self.width as i64 - 1) as u32;
            let cy = (py as i64).clamp(0, self.height as i64 - 1) as u32;
            let [r, g, b, a] = self.pixels[(cy * self.width + cx) as usize];
            Vec4::new(r as f32, g as f32, b as f32, a as f32) / 255.0
        };

        let top = fetch(x0, y0).lerp(fetch(x0 + 1.0, y0), fx);
        let bottom = fetch(x0, y0 + 1.0).lerp(fetch(x0 + 1.0, y0 + 1.0), fx);
        top.lerp(bottom, fy)
    }

    /// FNV-1a hash of the dimensions and pixel bytes.
    pub fn checksum(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash = OFFSET;
        let header = [self.width.to_le_bytes(), self.height.to_le_bytes()];
        for byte in header.iter().flatten().chain(self.as_bytes()) {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(PRIME);
        }
        hash
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| (y * self.width + x) as usize)
    }
}

/// Converts a linear color in [0, 1] to RGBA8.
pub fn to_rgba8(color: Vec4) -> [u8; 4] {
    let scaled = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    [
        scaled.x as u8,
        scaled.y as u8,
        scaled.z as u8,
        scaled.w as u8,
    ]
}

/// Equirectangular environment image shared between frames and materials.
#[derive(Debug, Clone)]
pub struct EnvironmentMap {
    image: Arc<Surface>,
}

impl EnvironmentMap {
    pub fn new(image: Surface) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn image(&self) -> &Surface {
        &self.image
    }

    /// Samples the map in a world-space direction.
    pub fn sample(&self, direction: Vec3) -> Vec4 {
        let dir = direction.normalize_or_zero();
        let u = dir.z.atan2(dir.x) / (2.0 * PI) + 0.5;
        let v = 1.0 - dir.y.clamp(-1.0, 1.0).acos() / PI;
        self.image.sample_bilinear(Vec2::new(u, v))
    }
}

impl PartialEq for EnvironmentMap {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}
