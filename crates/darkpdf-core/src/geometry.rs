//! Page rectangles and affine transforms in PDF user space

use lopdf::Object;
use serde::{Deserialize, Serialize};

/// A normalized rectangle in PDF points (`x0 <= x1`, `y0 <= y1`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PageRect {
    /// Build from two corners in any order
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// Read a `[llx lly urx ury]` PDF array
    pub fn from_pdf_array(array: &[Object]) -> Option<Self> {
        if array.len() != 4 {
            return None;
        }
        let mut values = [0.0f32; 4];
        for (slot, object) in values.iter_mut().zip(array) {
            *slot = number(object)?;
        }
        Some(Self::new(values[0], values[1], values[2], values[3]))
    }

    /// Encode as a PDF array, keeping integers as integers
    pub fn to_pdf_array(&self) -> Object {
        Object::Array(
            [self.x0, self.y0, self.x1, self.y1]
                .iter()
                .map(|&v| pdf_number(v))
                .collect(),
        )
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// True when the rectangle encloses no area
    pub fn is_degenerate(&self) -> bool {
        let (w, h) = (self.width(), self.height());
        !(w > 0.0 && h > 0.0 && w.is_finite() && h.is_finite())
    }

    /// Bounding box of this rectangle after a transform
    pub fn transformed(&self, m: &Matrix) -> Self {
        let corners = [
            m.apply(self.x0, self.y0),
            m.apply(self.x1, self.y0),
            m.apply(self.x0, self.y1),
            m.apply(self.x1, self.y1),
        ];
        let (mut x0, mut y0) = corners[0];
        let (mut x1, mut y1) = corners[0];
        for &(x, y) in &corners[1..] {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        Self { x0, y0, x1, y1 }
    }
}

/// A PDF transformation matrix `[a b c d e f]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Read six numbers from a PDF array or operand list
    pub fn from_pdf_numbers(objects: &[Object]) -> Option<Self> {
        if objects.len() != 6 {
            return None;
        }
        let mut v = [0.0f32; 6];
        for (slot, object) in v.iter_mut().zip(objects) {
            *slot = number(object)?;
        }
        Some(Self::new(v[0], v[1], v[2], v[3], v[4], v[5]))
    }

    /// Operands for a `cm` operator
    pub fn to_operands(&self) -> Vec<Object> {
        [self.a, self.b, self.c, self.d, self.e, self.f]
            .iter()
            .map(|&v| pdf_number(v))
            .collect()
    }

    /// `self` applied first, then `other` (PDF `cm` concatenation order)
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Matrix that maps `from` onto `to` by scaling and translating
    pub fn rect_to_rect(from: &PageRect, to: &PageRect) -> Option<Matrix> {
        if from.is_degenerate() {
            return None;
        }
        let sx = to.width() / from.width();
        let sy = to.height() / from.height();
        Some(Matrix::new(
            sx,
            0.0,
            0.0,
            sy,
            to.x0 - sx * from.x0,
            to.y0 - sy * from.y0,
        ))
    }
}

/// Numeric value of an Integer or Real object
pub fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Encode a number, as an Integer when it has no fractional part
pub fn pdf_number(value: f32) -> Object {
    if value.fract() == 0.0 && value.abs() < i32::MAX as f32 {
        Object::Integer(value as i64)
    } else {
        Object::Real(value)
    }
}
