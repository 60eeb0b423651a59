//! Software canvas backend.
//!
//! Draws the scene into a [`tiny_skia::Pixmap`] through a small 2D-context
//! wrapper that carries the current transform, global alpha, fill style and
//! composite operation, mirroring the drawing model the scene's commands
//! are written against. Per-node dirty regions and layer bake caches are
//! canvas-only concerns and live here.

mod bake;

pub use bake::BakeCache;

use std::collections::HashMap;

use tiny_skia::{
    BlendMode, FilterQuality, GradientStop, LinearGradient, Paint, Pattern, Pixmap, PixmapPaint,
    SpreadMode, Transform,
};

use crate::affine::AffineTransform;
use crate::region::DirtyRegion;
use crate::renderer::{DrawEntry, Renderer};
use crate::scene::{NodeId, NodeKind, Scene};
use crate::sprite::TextureId;
use crate::types::{BlendFactor, BlendFunc, Color, Point, Rect, Size};

/// Canvas-side per-node command state.
#[derive(Clone, Debug, Default)]
pub struct CanvasCmd {
    /// World-space footprint tracker used for partial redraws.
    pub(crate) region: DirtyRegion,
    /// Present only while the node is a baked layer.
    pub(crate) bake: Option<BakeCache>,
}

impl CanvasCmd {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn region(&self) -> &DirtyRegion {
        &self.region
    }

    pub fn bake(&self) -> Option<&BakeCache> {
        self.bake.as_ref()
    }
}

/// Map a blend function onto the 2D-context composite operations the canvas
/// model supports. Anything without a direct equivalent falls back to
/// normal source-over compositing.
pub fn blend_to_composite(blend: Option<&BlendFunc>) -> &'static str {
    let Some(blend) = blend else {
        return "source-over";
    };
    match (blend.src, blend.dst) {
        (BlendFactor::SrcAlpha, BlendFactor::One) | (BlendFactor::One, BlendFactor::One) => {
            "lighter"
        }
        (BlendFactor::Zero, BlendFactor::SrcAlpha) => "destination-in",
        (BlendFactor::Zero, BlendFactor::OneMinusSrcAlpha) => "destination-out",
        _ => "source-over",
    }
}

fn composite_to_blend_mode(composite: &str) -> BlendMode {
    match composite {
        "lighter" => BlendMode::Plus,
        "destination-in" => BlendMode::DestinationIn,
        "destination-out" => BlendMode::DestinationOut,
        _ => BlendMode::SourceOver,
    }
}

/// Decoded pixmaps addressed by the ids sprites carry.
#[derive(Default)]
pub struct TextureStore {
    textures: HashMap<TextureId, Pixmap>,
}

impl TextureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TextureId, pixmap: Pixmap) {
        self.textures.insert(id, pixmap);
    }

    pub fn get(&self, id: TextureId) -> Option<&Pixmap> {
        self.textures.get(&id)
    }

    pub fn texture_size(&self, id: TextureId) -> Option<Size> {
        self.textures
            .get(&id)
            .map(|p| Size::new(p.width() as f32, p.height() as f32))
    }
}

/// Stateful 2D drawing context over a pixmap.
///
/// Geometry is given in the caller's local space; the current transform
/// maps it to surface pixels with Y growing downwards.
pub struct CanvasContext {
    pixmap: Pixmap,
    transform: Transform,
    global_alpha: f32,
    fill_style: Color,
    blend_mode: BlendMode,
}

impl CanvasContext {
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            pixmap: Pixmap::new(width, height)?,
            transform: Transform::identity(),
            global_alpha: 1.0,
            fill_style: Color::WHITE,
            blend_mode: BlendMode::SourceOver,
        })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub(crate) fn take_pixmap(self) -> Pixmap {
        self.pixmap
    }

    pub fn clear(&mut self) {
        self.pixmap.fill(tiny_skia::Color::TRANSPARENT);
    }

    pub fn set_transform(&mut self, t: &AffineTransform) {
        self.transform = Transform::from_row(t.a, t.b, t.c, t.d, t.tx, t.ty);
    }

    pub fn reset_transform(&mut self) {
        self.transform = Transform::identity();
    }

    pub fn set_global_alpha(&mut self, alpha: f32) {
        self.global_alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn set_fill_style(&mut self, color: Color) {
        self.fill_style = color;
    }

    pub fn set_composite_operation(&mut self, composite: &str) {
        self.blend_mode = composite_to_blend_mode(composite);
    }

    /// Fill a local-space rectangle with the current fill style.
    pub fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        let Some(rect) = tiny_skia::Rect::from_xywh(x, y, width, height) else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color_rgba8(
            self.fill_style.r,
            self.fill_style.g,
            self.fill_style.b,
            (self.global_alpha * 255.0).round() as u8,
        );
        paint.blend_mode = self.blend_mode;
        paint.anti_alias = true;
        self.pixmap.fill_rect(rect, &paint, self.transform, None);
    }

    /// Fill a local-space rectangle with a linear gradient between two
    /// local-space points.
    pub fn fill_linear_gradient(
        &mut self,
        rect: Rect,
        start: Point,
        end: Point,
        stops: &[(f32, Color, f32)],
    ) {
        let Some(sk_rect) = tiny_skia::Rect::from_xywh(rect.x, rect.y, rect.width, rect.height)
        else {
            return;
        };
        let sk_stops: Vec<GradientStop> = stops
            .iter()
            .map(|&(pos, color, alpha)| {
                GradientStop::new(
                    pos,
                    tiny_skia::Color::from_rgba8(
                        color.r,
                        color.g,
                        color.b,
                        (alpha * self.global_alpha * 255.0).round() as u8,
                    ),
                )
            })
            .collect();
        let Some(shader) = LinearGradient::new(
            tiny_skia::Point::from_xy(start.x, start.y),
            tiny_skia::Point::from_xy(end.x, end.y),
            sk_stops,
            SpreadMode::Pad,
            Transform::identity(),
        ) else {
            return;
        };
        let paint = Paint {
            shader,
            blend_mode: self.blend_mode,
            anti_alias: true,
            ..Paint::default()
        };
        self.pixmap.fill_rect(sk_rect, &paint, self.transform, None);
    }

    /// Draw `src` from a texture into the local-space rectangle
    /// `(0,0)..dst_size`, optionally mirrored on either axis.
    pub fn draw_texture(
        &mut self,
        texture: &Pixmap,
        src: Rect,
        dst_size: Size,
        flip_x: bool,
        flip_y: bool,
    ) {
        if src.width <= 0.0 || src.height <= 0.0 || dst_size.width <= 0.0 || dst_size.height <= 0.0
        {
            return;
        }
        let Some(dst_rect) =
            tiny_skia::Rect::from_xywh(0.0, 0.0, dst_size.width, dst_size.height)
        else {
            return;
        };

        // Map texture pixels onto the destination rect: crop to the source
        // rect, scale to the destination size, then mirror in place.
        let mut pattern = Transform::from_translate(-src.x, -src.y);
        pattern = pattern.post_scale(dst_size.width / src.width, dst_size.height / src.height);
        if flip_x {
            pattern = pattern
                .post_scale(-1.0, 1.0)
                .post_translate(dst_size.width, 0.0);
        }
        if flip_y {
            pattern = pattern
                .post_scale(1.0, -1.0)
                .post_translate(0.0, dst_size.height);
        }

        let shader = Pattern::new(
            texture.as_ref(),
            SpreadMode::Pad,
            FilterQuality::Bilinear,
            self.global_alpha,
            pattern,
        );
        let paint = Paint {
            shader,
            blend_mode: self.blend_mode,
            anti_alias: true,
            ..Paint::default()
        };
        self.pixmap.fill_rect(dst_rect, &paint, self.transform, None);
    }

    /// Composite an offscreen surface with the current transform applied.
    fn draw_surface(&mut self, surface: &Pixmap, opacity: f32) {
        let paint = PixmapPaint {
            opacity: (opacity * self.global_alpha).clamp(0.0, 1.0),
            blend_mode: self.blend_mode,
            quality: FilterQuality::Bilinear,
        };
        self.pixmap
            .draw_pixmap(0, 0, surface.as_ref(), &paint, self.transform, None);
    }

    /// Straight-alpha RGBA of one surface pixel, for tests and tooling.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.pixmap.pixel(x, y).map(|p| {
            let c = p.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
    }
}

/// Union of the world-space damage accumulated since the last frame.
pub fn frame_damage(scene: &Scene, renderer: &mut Renderer) -> Rect {
    let mut damage = Rect::ZERO;
    for entry in renderer.sorted_commands() {
        if let Some(canvas) = scene.node(entry.node).and_then(|n| n.cmd.canvas()) {
            damage = damage.union(&canvas.region.damage());
        }
    }
    damage
}

/// Draw one frame: walk the sorted command list, rendering baked layers
/// through their cache and everything else directly. Consumes the per-node
/// dirty regions at the end.
pub fn render(
    scene: &mut Scene,
    renderer: &mut Renderer,
    ctx: &mut CanvasContext,
    textures: &TextureStore,
) {
    let entries: Vec<DrawEntry> = renderer.sorted_commands().to_vec();
    for entry in &entries {
        if scene.is_baked(entry.node) {
            bake::ensure_fresh(scene, entry.node, textures);
            draw_baked(scene, entry.node, ctx);
        } else {
            draw_node(scene, entry.node, ctx, textures);
        }
    }
    for entry in &entries {
        if let Some(canvas) = scene
            .node_mut(entry.node)
            .and_then(|n| n.cmd.canvas_mut())
        {
            canvas.region.reset();
        }
    }
}

fn draw_baked(scene: &Scene, id: NodeId, ctx: &mut CanvasContext) {
    let Some(node) = scene.node(id) else { return };
    let Some(bake) = node.cmd.canvas().and_then(|c| c.bake.as_ref()) else {
        return;
    };
    let Some(surface) = bake.surface() else {
        return;
    };
    // The surface is in the layer's local space, offset by the cache
    // origin; place it with the layer's world transform.
    let place = AffineTransform::translate(bake.origin().x, bake.origin().y)
        .concat(&node.cmd.world_transform);
    ctx.set_transform(&place);
    ctx.set_global_alpha(node.cmd.displayed_opacity / 255.0);
    ctx.set_composite_operation(blend_to_composite(node.blend.as_ref()));
    ctx.draw_surface(surface, 1.0);
}

/// Draw a single node's visual with the context configured from its
/// command state.
pub(crate) fn draw_node(scene: &Scene, id: NodeId, ctx: &mut CanvasContext, textures: &TextureStore) {
    let Some(node) = scene.node(id) else { return };
    if !node.cmd.need_draw {
        return;
    }
    ctx.set_transform(&node.cmd.world_transform);
    ctx.set_global_alpha(node.cmd.displayed_opacity / 255.0);
    ctx.set_composite_operation(blend_to_composite(node.blend.as_ref()));

    let size = node.content_size;
    match &node.kind {
        NodeKind::LayerColor => {
            ctx.set_fill_style(node.cmd.displayed_color);
            ctx.fill_rect(0.0, 0.0, size.width, size.height);
        }
        NodeKind::LayerGradient(gradient) => {
            // The gradient axis runs through the layer center; Y is down in
            // surface space, matching the stop orientation used here.
            let center = Point::new(size.width * 0.5, size.height * 0.5);
            let half = Point::new(
                gradient.along.x * size.width * 0.5,
                gradient.along.y * size.height * 0.5,
            );
            let start = Point::new(center.x - half.x, center.y - half.y);
            let end = Point::new(center.x + half.x, center.y + half.y);
            let displayed = node.cmd.displayed_color;
            let span = gradient.end_opacity as f32 - gradient.start_opacity as f32;
            let stops: Vec<(f32, Color, f32)> = gradient
                .stops()
                .iter()
                .map(|stop| {
                    let alpha = (gradient.start_opacity as f32 + span * stop.position) / 255.0;
                    (stop.position, stop.color.modulate(displayed), alpha)
                })
                .collect();
            ctx.fill_linear_gradient(
                Rect::new(0.0, 0.0, size.width, size.height),
                start,
                end,
                &stops,
            );
        }
        NodeKind::Sprite(sprite) => {
            let Some(texture) = textures.get(sprite.texture) else {
                log::warn!("sprite references a missing texture {:?}", sprite.texture);
                return;
            };
            ctx.draw_texture(texture, sprite.texture_rect, size, sprite.flip_x, sprite.flip_y);
        }
        NodeKind::Group | NodeKind::LayerMultiplex(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_table_maps_known_pairs() {
        assert_eq!(blend_to_composite(None), "source-over");
        assert_eq!(
            blend_to_composite(Some(&BlendFunc {
                src: BlendFactor::SrcAlpha,
                dst: BlendFactor::One,
            })),
            "lighter"
        );
        assert_eq!(
            blend_to_composite(Some(&BlendFunc {
                src: BlendFactor::One,
                dst: BlendFactor::One,
            })),
            "lighter"
        );
        assert_eq!(
            blend_to_composite(Some(&BlendFunc {
                src: BlendFactor::Zero,
                dst: BlendFactor::SrcAlpha,
            })),
            "destination-in"
        );
        assert_eq!(
            blend_to_composite(Some(&BlendFunc {
                src: BlendFactor::Zero,
                dst: BlendFactor::OneMinusSrcAlpha,
            })),
            "destination-out"
        );
        assert_eq!(
            blend_to_composite(Some(&BlendFunc::ALPHA_NON_PREMULTIPLIED)),
            "source-over"
        );
    }

    #[test]
    fn fill_rect_writes_solid_pixels() {
        let mut ctx = CanvasContext::new(8, 8).unwrap();
        ctx.set_fill_style(Color::new(255, 0, 0));
        ctx.fill_rect(0.0, 0.0, 8.0, 8.0);
        assert_eq!(ctx.pixel(4, 4), Some([255, 0, 0, 255]));
    }

    #[test]
    fn fill_rect_honors_transform() {
        let mut ctx = CanvasContext::new(8, 8).unwrap();
        ctx.set_fill_style(Color::new(0, 255, 0));
        ctx.set_transform(&AffineTransform::translate(4.0, 0.0));
        ctx.fill_rect(0.0, 0.0, 4.0, 8.0);
        assert_eq!(ctx.pixel(6, 4), Some([0, 255, 0, 255]));
        assert_eq!(ctx.pixel(1, 4).map(|p| p[3]), Some(0));
    }

    #[test]
    fn global_alpha_scales_coverage() {
        let mut ctx = CanvasContext::new(4, 4).unwrap();
        ctx.set_fill_style(Color::new(255, 255, 255));
        ctx.set_global_alpha(0.5);
        ctx.fill_rect(0.0, 0.0, 4.0, 4.0);
        let alpha = ctx.pixel(2, 2).map(|p| p[3]).unwrap_or(0);
        assert!((alpha as i32 - 128).abs() <= 1, "alpha was {alpha}");
    }

    use crate::scene::{Backend, NodeId, Scene};
    use crate::types::Size;

    fn frame(
        scene: &mut Scene,
        renderer: &mut Renderer,
        root: NodeId,
        ctx: &mut CanvasContext,
        textures: &TextureStore,
    ) {
        let _ = env_logger::builder().is_test(true).try_init();
        renderer.begin_frame();
        renderer.update_dirty_nodes(scene);
        scene.visit(renderer, root);
        ctx.clear();
        render(scene, renderer, ctx, textures);
    }

    #[test]
    fn render_fills_layer_color_pixels() {
        let mut scene = Scene::new(Backend::Canvas);
        let mut renderer = Renderer::new();
        let mut ctx = CanvasContext::new(8, 8).unwrap();
        let textures = TextureStore::new();

        let root = scene.create_group();
        let layer = scene.create_layer_color(Color::new(255, 0, 0), Size::new(4.0, 4.0));
        scene.add_child(&mut renderer, root, layer);

        frame(&mut scene, &mut renderer, root, &mut ctx, &textures);
        assert_eq!(ctx.pixel(1, 1), Some([255, 0, 0, 255]));
        assert_eq!(ctx.pixel(6, 6).map(|p| p[3]), Some(0));
    }

    #[test]
    fn render_places_layer_by_world_transform() {
        let mut scene = Scene::new(Backend::Canvas);
        let mut renderer = Renderer::new();
        let mut ctx = CanvasContext::new(8, 8).unwrap();
        let textures = TextureStore::new();

        let root = scene.create_group();
        let layer = scene.create_layer_color(Color::new(0, 0, 255), Size::new(2.0, 2.0));
        scene.add_child(&mut renderer, root, layer);
        scene.set_position(&mut renderer, layer, crate::types::Point::new(4.0, 4.0));

        frame(&mut scene, &mut renderer, root, &mut ctx, &textures);
        assert_eq!(ctx.pixel(5, 5), Some([0, 0, 255, 255]));
        assert_eq!(ctx.pixel(1, 1).map(|p| p[3]), Some(0));
    }

    #[test]
    fn bake_renders_twice_then_reuses_the_surface() {
        let mut scene = Scene::new(Backend::Canvas);
        let mut renderer = Renderer::new();
        let mut ctx = CanvasContext::new(8, 8).unwrap();
        let textures = TextureStore::new();

        let root = scene.create_group();
        let layer = scene.create_layer_color(Color::new(0, 255, 0), Size::new(4.0, 4.0));
        scene.add_child(&mut renderer, root, layer);
        scene.bake(&mut renderer, layer);

        let stats = |scene: &Scene| {
            let bake = scene
                .node(layer)
                .and_then(|n| n.cmd().canvas())
                .and_then(|c| c.bake())
                .unwrap();
            (bake.renders(), bake.counter())
        };

        frame(&mut scene, &mut renderer, root, &mut ctx, &textures);
        assert_eq!(stats(&scene), (1, 1));
        assert_eq!(ctx.pixel(1, 1), Some([0, 255, 0, 255]));

        frame(&mut scene, &mut renderer, root, &mut ctx, &textures);
        assert_eq!(stats(&scene), (2, 0));

        // Settled: further frames reuse the surface without re-rendering.
        frame(&mut scene, &mut renderer, root, &mut ctx, &textures);
        assert_eq!(stats(&scene), (2, 0));
        assert_eq!(ctx.pixel(1, 1), Some([0, 255, 0, 255]));

        // A mutation inside the subtree re-arms the cache.
        scene.set_color(&mut renderer, layer, Color::new(255, 0, 255));
        frame(&mut scene, &mut renderer, root, &mut ctx, &textures);
        assert_eq!(stats(&scene), (3, 1));
        assert_eq!(ctx.pixel(1, 1), Some([255, 0, 255, 255]));
    }

    #[test]
    fn frame_damage_covers_old_and_new_footprints() {
        let mut scene = Scene::new(Backend::Canvas);
        let mut renderer = Renderer::new();
        let mut ctx = CanvasContext::new(16, 16).unwrap();
        let textures = TextureStore::new();

        let root = scene.create_group();
        let layer = scene.create_layer_color(Color::WHITE, Size::new(2.0, 2.0));
        scene.add_child(&mut renderer, root, layer);
        frame(&mut scene, &mut renderer, root, &mut ctx, &textures);

        scene.set_position(&mut renderer, layer, crate::types::Point::new(4.0, 0.0));
        renderer.begin_frame();
        renderer.update_dirty_nodes(&mut scene);
        scene.visit(&mut renderer, root);

        let damage = frame_damage(&scene, &mut renderer);
        assert_eq!(damage, Rect::new(0.0, 0.0, 6.0, 2.0));
    }

    #[test]
    fn destination_out_erases() {
        let mut ctx = CanvasContext::new(4, 4).unwrap();
        ctx.set_fill_style(Color::new(255, 255, 255));
        ctx.fill_rect(0.0, 0.0, 4.0, 4.0);
        ctx.set_composite_operation("destination-out");
        ctx.fill_rect(0.0, 0.0, 2.0, 4.0);
        assert_eq!(ctx.pixel(1, 1).map(|p| p[3]), Some(0));
        assert_eq!(ctx.pixel(3, 1).map(|p| p[3]), Some(255));
    }
}
