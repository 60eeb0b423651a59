//! 2D affine transform math.
//!
//! The transform `{a, b, c, d, tx, ty}` maps a point `p` to
//! `[[a, c], [b, d]] * p + (tx, ty)`. Pure value type with no dirty state;
//! render commands compose these during tree traversal and upload them to
//! the GPU backend as a 4x4 matrix.

use crate::types::{Point, Rect};

/// A 2D affine transformation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl AffineTransform {
    /// Identity transform (no transformation)
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Create a transform from its six components.
    pub fn new(a: f32, b: f32, c: f32, d: f32, tx: f32, ty: f32) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    /// Create an identity transform
    pub fn identity() -> Self {
        Self::IDENTITY
    }

    /// Create a translation transform
    pub fn translate(x: f32, y: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, x, y)
    }

    /// Create a non-uniform scale transform
    pub fn scale(sx: f32, sy: f32) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Create a rotation transform (counter-clockwise, radians)
    pub fn rotate(angle_radians: f32) -> Self {
        let cos = angle_radians.cos();
        let sin = angle_radians.sin();
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    /// Compose with another transform: apply `self` first, then `after`.
    ///
    /// This is the child-then-parent order used for world transform
    /// composition: `child.concat(&parent_world)` yields the transform that
    /// maps child-local coordinates into the parent's world space.
    pub fn concat(&self, after: &AffineTransform) -> AffineTransform {
        AffineTransform {
            a: self.a * after.a + self.b * after.c,
            b: self.a * after.b + self.b * after.d,
            c: self.c * after.a + self.d * after.c,
            d: self.c * after.b + self.d * after.d,
            tx: self.tx * after.a + self.ty * after.c + after.tx,
            ty: self.tx * after.b + self.ty * after.d + after.ty,
        }
    }

    /// Determinant of the linear part.
    pub fn determinant(&self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    /// Compute the inverse of this transform.
    ///
    /// Returns `None` when the determinant is zero (degenerate scale);
    /// callers must guard rather than rely on a fallback value.
    pub fn invert(&self) -> Option<AffineTransform> {
        let det = self.determinant();
        if det.abs() < 1e-10 {
            return None;
        }
        let inv_det = 1.0 / det;
        Some(AffineTransform {
            a: self.d * inv_det,
            b: -self.b * inv_det,
            c: -self.c * inv_det,
            d: self.a * inv_det,
            tx: (self.c * self.ty - self.d * self.tx) * inv_det,
            ty: (self.b * self.tx - self.a * self.ty) * inv_det,
        })
    }

    /// Transform a 2D point by this matrix
    pub fn apply_point(&self, p: Point) -> Point {
        Point {
            x: self.a * p.x + self.c * p.y + self.tx,
            y: self.b * p.x + self.d * p.y + self.ty,
        }
    }

    /// Transform a rectangle, returning the axis-aligned bounding box of
    /// its four transformed corners.
    pub fn apply_rect(&self, rect: Rect) -> Rect {
        let tl = self.apply_point(Point::new(rect.x, rect.y));
        let tr = self.apply_point(Point::new(rect.x + rect.width, rect.y));
        let bl = self.apply_point(Point::new(rect.x, rect.y + rect.height));
        let br = self.apply_point(Point::new(rect.x + rect.width, rect.y + rect.height));

        let min_x = tl.x.min(tr.x).min(bl.x).min(br.x);
        let min_y = tl.y.min(tr.y).min(bl.y).min(br.y);
        let max_x = tl.x.max(tr.x).max(bl.x).max(br.x);
        let max_y = tl.y.max(tr.y).max(bl.y).max(br.y);

        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Embed the affine transform into a row-major 4x4 matrix for the GPU
    /// backend's matrix-upload slot.
    ///
    /// The 2x2 linear part and translation land in the upper rows; the rest
    /// is identity so the matrix acts as a 2D transform inside a 3D
    /// projection.
    pub fn to_mat4(&self) -> [[f32; 4]; 4] {
        [
            [self.a, self.c, 0.0, self.tx],
            [self.b, self.d, 0.0, self.ty],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// Check if this is the identity transform
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_identity() {
        let t = AffineTransform::identity();
        assert!(t.is_identity());
        let p = t.apply_point(Point::new(3.0, 4.0));
        assert!(approx_eq(p.x, 3.0));
        assert!(approx_eq(p.y, 4.0));
    }

    #[test]
    fn test_translate() {
        let t = AffineTransform::translate(10.0, 20.0);
        let p = t.apply_point(Point::new(5.0, 5.0));
        assert!(approx_eq(p.x, 15.0));
        assert!(approx_eq(p.y, 25.0));
    }

    #[test]
    fn test_rotate() {
        let t = AffineTransform::rotate(std::f32::consts::FRAC_PI_2);
        let p = t.apply_point(Point::new(1.0, 0.0));
        assert!(approx_eq(p.x, 0.0));
        assert!(approx_eq(p.y, 1.0));
    }

    #[test]
    fn test_concat_order() {
        // Apply scale first, then translate.
        let scale = AffineTransform::scale(2.0, 2.0);
        let translate = AffineTransform::translate(10.0, 0.0);

        let composed = scale.concat(&translate);
        let p = composed.apply_point(Point::new(1.0, 0.0));
        assert!(approx_eq(p.x, 12.0));
        assert!(approx_eq(p.y, 0.0));
    }

    #[test]
    fn test_concat_associativity() {
        let a = AffineTransform::rotate(0.3);
        let b = AffineTransform::scale(2.0, 0.5).concat(&AffineTransform::translate(4.0, -1.0));
        let c = AffineTransform::translate(-2.0, 7.0);

        let left = a.concat(&b).concat(&c);
        let right = a.concat(&b.concat(&c));
        let p = Point::new(3.5, -1.25);
        let lp = left.apply_point(p);
        let rp = right.apply_point(p);
        assert!(approx_eq(lp.x, rp.x));
        assert!(approx_eq(lp.y, rp.y));
    }

    #[test]
    fn test_invert_round_trip() {
        let t = AffineTransform::rotate(0.7)
            .concat(&AffineTransform::scale(2.0, 3.0))
            .concat(&AffineTransform::translate(10.0, 20.0));
        let inv = t.invert().unwrap();
        let composed = t.concat(&inv);

        let p = composed.apply_point(Point::new(3.0, 4.0));
        assert!(approx_eq(p.x, 3.0));
        assert!(approx_eq(p.y, 4.0));
    }

    #[test]
    fn test_invert_degenerate() {
        let t = AffineTransform::scale(0.0, 1.0);
        assert!(t.invert().is_none());
    }

    #[test]
    fn test_apply_rect_rotated() {
        // A unit square rotated 90 degrees stays a unit AABB.
        let t = AffineTransform::rotate(std::f32::consts::FRAC_PI_2);
        let r = t.apply_rect(Rect::new(0.0, 0.0, 1.0, 1.0));
        assert!(approx_eq(r.width, 1.0));
        assert!(approx_eq(r.height, 1.0));
        assert!(approx_eq(r.x, -1.0));
        assert!(approx_eq(r.y, 0.0));
    }

    #[test]
    fn test_mat4_embedding() {
        let t = AffineTransform::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        let m = t.to_mat4();
        assert_eq!(m[0], [1.0, 3.0, 0.0, 5.0]);
        assert_eq!(m[1], [2.0, 4.0, 0.0, 6.0]);
        assert_eq!(m[2], [0.0, 0.0, 1.0, 0.0]);
        assert_eq!(m[3], [0.0, 0.0, 0.0, 1.0]);
    }
}
