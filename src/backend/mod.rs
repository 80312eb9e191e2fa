//! Graphics backends the driver can render through.

pub mod gpu;
pub mod recording;
mod shader;
pub mod software;

use crate::contract::Material;
use crate::quad::QuadVertex;

/// Operations the driver needs from a graphics API for one frame.
pub trait RenderBackend {
    /// Image the frame reads from or writes to.
    type Surface;
    /// Program reference the material is built from.
    type Shader;
    type Material: Material;

    /// Builds a material for `shader`, or `None` when the program is unusable.
    fn create_material(&mut self, shader: &Self::Shader) -> Option<Self::Material>;

    /// Copies `source` into `target` unchanged.
    fn blit(&mut self, source: &Self::Surface, target: &mut Self::Surface);

    /// Binds `target` as the only color attachment, then draws `quad` once
    /// with `material`, exposing `source` to the program as `_MainTex`.
    fn draw_fullscreen(
        &mut self,
        source: &Self::Surface,
        target: &mut Self::Surface,
        material: &mut Self::Material,
        quad: &[QuadVertex; 4],
    );
}
