//! Layer node kinds: flat color, gradient, multiplexer.

use crate::types::{Color, Point};

/// One entry of a gradient's ordered color-stop sequence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorStop {
    /// Position along the gradient line, in `[0, 1]`.
    pub position: f32,
    pub color: Color,
}

/// Payload for a gradient layer.
///
/// The stop list always starts with `{0, start_color}` and ends with
/// `{1, end_color}`. Mutating the start/end color also patches the pinned
/// first/last stop so the two representations stay consistent; this
/// duplication is deliberate, both are read by the backends.
#[derive(Clone, Debug)]
pub struct GradientLayer {
    start_color: Color,
    end_color: Color,
    pub start_opacity: u8,
    pub end_opacity: u8,
    /// Direction of the gradient line. Default points straight down.
    pub along: Point,
    /// Compress the interpolation span so both endpoint colors are fully
    /// reached even on diagonal gradients.
    pub compressed_interpolation: bool,
    stops: Vec<ColorStop>,
}

impl GradientLayer {
    pub fn new(start_color: Color, end_color: Color, along: Point) -> Self {
        Self {
            start_color,
            end_color,
            start_opacity: 255,
            end_opacity: 255,
            along,
            compressed_interpolation: true,
            stops: vec![
                ColorStop {
                    position: 0.0,
                    color: start_color,
                },
                ColorStop {
                    position: 1.0,
                    color: end_color,
                },
            ],
        }
    }

    pub fn start_color(&self) -> Color {
        self.start_color
    }

    pub fn end_color(&self) -> Color {
        self.end_color
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// Set the gradient's start color, keeping the pinned first stop in sync.
    pub fn set_start_color(&mut self, color: Color) {
        self.start_color = color;
        self.stops[0].color = color;
    }

    /// Set the gradient's end color, keeping the pinned last stop in sync.
    pub fn set_end_color(&mut self, color: Color) {
        self.end_color = color;
        let last = self.stops.len() - 1;
        self.stops[last].color = color;
    }

    /// Insert an interior color stop, keeping the list ordered.
    ///
    /// Positions at or outside the pinned endpoints are rejected with a log
    /// message; the endpoints can only move through the start/end color
    /// setters.
    pub fn insert_stop(&mut self, position: f32, color: Color) {
        if !(position > 0.0 && position < 1.0) {
            log::warn!(
                "gradient stop position {} outside (0, 1), ignoring",
                position
            );
            return;
        }
        let at = self
            .stops
            .iter()
            .position(|s| s.position > position)
            .unwrap_or(self.stops.len() - 1);
        self.stops.insert(at, ColorStop { position, color });
    }

    /// Per-corner colors (tl, tr, bl, br) for the GPU quad, already
    /// modulated by the node's displayed color and opacity.
    ///
    /// Each corner is weighted by its projection onto the normalized
    /// gradient direction; compressed interpolation rescales the direction
    /// so diagonal gradients still reach both endpoint colors at the
    /// corners.
    pub fn corner_colors(&self, displayed: Color, displayed_opacity: f32) -> [[f32; 4]; 4] {
        let h = (self.along.x * self.along.x + self.along.y * self.along.y).sqrt();
        if h == 0.0 {
            let c = displayed.to_rgba_f32(displayed_opacity);
            return [c, c, c, c];
        }
        let c = std::f32::consts::SQRT_2;
        let mut u = Point::new(self.along.x / h, self.along.y / h);
        if self.compressed_interpolation {
            let h2 = 1.0 / (u.x.abs() + u.y.abs());
            u = Point::new(u.x * h2 * c, u.y * h2 * c);
        }

        let opacity_f = (displayed_opacity / 255.0).clamp(0.0, 1.0);
        let start = [
            self.start_color.r as f32 / 255.0 * displayed.r as f32 / 255.0,
            self.start_color.g as f32 / 255.0 * displayed.g as f32 / 255.0,
            self.start_color.b as f32 / 255.0 * displayed.b as f32 / 255.0,
            self.start_opacity as f32 / 255.0 * opacity_f,
        ];
        let end = [
            self.end_color.r as f32 / 255.0 * displayed.r as f32 / 255.0,
            self.end_color.g as f32 / 255.0 * displayed.g as f32 / 255.0,
            self.end_color.b as f32 / 255.0 * displayed.b as f32 / 255.0,
            self.end_opacity as f32 / 255.0 * opacity_f,
        ];

        // Corner signs in quad order: tl, tr, bl, br (y grows downward).
        let corners = [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)];
        let mut out = [[0.0; 4]; 4];
        for (i, (sx, sy)) in corners.iter().enumerate() {
            let t = ((c + u.x * sx + u.y * sy) / (2.0 * c)).clamp(0.0, 1.0);
            for ch in 0..4 {
                out[i][ch] = start[ch] + (end[ch] - start[ch]) * t;
            }
        }
        out
    }
}

/// Payload for a layer multiplexer: shows exactly one of its child layers.
#[derive(Clone, Copy, Debug, Default)]
pub struct MultiplexState {
    pub selected: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_stops_pinned() {
        let mut gradient = GradientLayer::new(
            Color::new(255, 0, 0),
            Color::new(0, 0, 255),
            Point::new(0.0, 1.0),
        );
        assert_eq!(gradient.stops()[0].position, 0.0);
        assert_eq!(gradient.stops()[0].color, Color::new(255, 0, 0));

        gradient.set_start_color(Color::new(0, 255, 0));
        assert_eq!(gradient.stops()[0].color, Color::new(0, 255, 0));

        gradient.set_end_color(Color::new(10, 20, 30));
        let last = gradient.stops().len() - 1;
        assert_eq!(gradient.stops()[last].position, 1.0);
        assert_eq!(gradient.stops()[last].color, Color::new(10, 20, 30));
    }

    #[test]
    fn test_insert_stop_keeps_order_and_endpoints() {
        let mut gradient =
            GradientLayer::new(Color::WHITE, Color::BLACK, Point::new(0.0, 1.0));
        gradient.insert_stop(0.75, Color::new(1, 2, 3));
        gradient.insert_stop(0.25, Color::new(4, 5, 6));

        let positions: Vec<f32> = gradient.stops().iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0.0, 0.25, 0.75, 1.0]);

        // Out-of-range stops are ignored.
        gradient.insert_stop(1.5, Color::BLACK);
        gradient.insert_stop(0.0, Color::BLACK);
        assert_eq!(gradient.stops().len(), 4);
    }

    #[test]
    fn test_vertical_gradient_corner_colors() {
        let gradient = GradientLayer::new(
            Color::new(255, 255, 255),
            Color::new(0, 0, 0),
            Point::new(0.0, 1.0),
        );
        let corners = gradient.corner_colors(Color::WHITE, 255.0);
        // Top corners carry the start color, bottom corners the end color.
        assert!((corners[0][0] - 1.0).abs() < 1e-5);
        assert!((corners[1][0] - 1.0).abs() < 1e-5);
        assert!(corners[2][0].abs() < 1e-5);
        assert!(corners[3][0].abs() < 1e-5);
    }
}
