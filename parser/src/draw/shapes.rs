use glam::Vec3;
use kinded::Kinded;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color { r, g, b, a }
    }

    /// Components scaled to `[0, 1]`.
    pub fn to_f32(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a].map(|c| f32::from(c) / 255.0)
    }
}

/// A drawing primitive. Positions are in viewer coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Kinded)]
#[kinded(derive(Serialize))]
pub enum Shape {
    /// Flat circle on the field plane.
    Circle {
        center: Vec3,
        radius: f32,
        thickness: f32,
        color: Color,
    },
    Line {
        start: Vec3,
        end: Vec3,
        thickness: f32,
        color: Color,
    },
    Point {
        position: Vec3,
        size: f32,
        color: Color,
    },
    Sphere {
        center: Vec3,
        radius: f32,
        color: Color,
    },
    Polygon {
        vertices: Vec<Vec3>,
        color: Color,
    },
    /// Text anchored at a point.
    Annotation {
        position: Vec3,
        text: String,
        color: Color,
    },
}

impl Shape {
    pub fn color(&self) -> Color {
        match self {
            Shape::Circle { color, .. }
            | Shape::Line { color, .. }
            | Shape::Point { color, .. }
            | Shape::Sphere { color, .. }
            | Shape::Polygon { color, .. }
            | Shape::Annotation { color, .. } => *color,
        }
    }

    /// Points approximating a circle's outline; empty for other shapes.
    pub fn outline(&self, segments: usize) -> Vec<Vec3> {
        let Shape::Circle { center, radius, .. } = self else {
            return Vec::new();
        };
        let step = std::f32::consts::TAU / segments.max(3) as f32;
        (0..segments.max(3))
            .map(|i| {
                let angle = step * i as f32;
                *center + Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius)
            })
            .collect()
    }
}

/// How long a shape survives in its set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Expiration {
    /// Replaced when the set's buffers are next swapped.
    #[default]
    Cycle,
    /// Carried over every swap until the set is cleared.
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawnShape {
    pub shape: Shape,
    pub expiration: Expiration,
}

impl DrawnShape {
    pub fn kind(&self) -> ShapeKind {
        self.shape.kind()
    }
}
