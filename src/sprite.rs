//! Sprite node kind: a textured quad.

use crate::types::Rect;

/// Handle to a texture owned by a backend texture store.
///
/// The scene graph never owns pixel data; it references textures through
/// this id and leaves decoding/upload to external collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Payload for a sprite node.
#[derive(Clone, Debug)]
pub struct Sprite {
    /// Backend texture handle.
    pub texture: TextureId,
    /// Sub-rectangle of the texture to sample, in texel coordinates.
    pub texture_rect: Rect,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl Sprite {
    pub fn new(texture: TextureId, texture_rect: Rect) -> Self {
        Self {
            texture,
            texture_rect,
            flip_x: false,
            flip_y: false,
        }
    }

    /// Texture coordinates for the four quad corners (tl, tr, bl, br),
    /// normalized against the full texture size, honoring flips.
    pub fn tex_coords(&self, texture_width: f32, texture_height: f32) -> [[f32; 2]; 4] {
        let r = self.texture_rect;
        let (mut u0, mut u1) = (r.x / texture_width, (r.x + r.width) / texture_width);
        let (mut v0, mut v1) = (r.y / texture_height, (r.y + r.height) / texture_height);
        if self.flip_x {
            std::mem::swap(&mut u0, &mut u1);
        }
        if self.flip_y {
            std::mem::swap(&mut v0, &mut v1);
        }
        [[u0, v0], [u1, v0], [u0, v1], [u1, v1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tex_coords_sub_rect() {
        let sprite = Sprite::new(TextureId(1), Rect::new(16.0, 0.0, 16.0, 32.0));
        let uv = sprite.tex_coords(64.0, 32.0);
        assert_eq!(uv[0], [0.25, 0.0]);
        assert_eq!(uv[3], [0.5, 1.0]);
    }

    #[test]
    fn test_tex_coords_flip_x() {
        let mut sprite = Sprite::new(TextureId(1), Rect::new(0.0, 0.0, 32.0, 32.0));
        sprite.flip_x = true;
        let uv = sprite.tex_coords(32.0, 32.0);
        assert_eq!(uv[0], [1.0, 0.0]);
        assert_eq!(uv[1], [0.0, 0.0]);
    }
}
