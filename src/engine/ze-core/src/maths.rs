use num_traits::Num;
use std::ops::{Add, Index, IndexMut, Mul, Sub};

/// A two-dimensional vector that can either represent a direction or a point in space
#[derive(PartialOrd, PartialEq, Debug, Default, Copy, Clone)]
pub struct Vec2<T: Num> {
    pub x: T,
    pub y: T,
}

impl<T: Num + Copy> Vec2<T> {
    pub fn new(x: T, y: T) -> Self {
        Self { x, y }
    }
}

impl<T: Num> Add for Vec2<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl<T: Num> Sub for Vec2<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl<T: Num + Copy> Mul<T> for Vec2<T> {
    type Output = Self;

    fn mul(self, rhs: T) -> Self::Output {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

#[derive(PartialOrd, PartialEq, Debug, Default, Copy, Clone)]
pub struct Vec3<T: Num> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Num + Copy> Vec3<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

impl<T: Num> Add for Vec3<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl<T: Num> Sub for Vec3<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

#[derive(PartialOrd, PartialEq, Debug, Default, Copy, Clone)]
pub struct Vec4<T: Num> {
    pub x: T,
    pub y: T,
    pub z: T,
    pub w: T,
}

impl<T: Num + Copy> Vec4<T> {
    pub fn new(x: T, y: T, z: T, w: T) -> Self {
        Self { x, y, z, w }
    }
}

#[derive(PartialOrd, PartialEq, Eq, Debug, Default, Copy, Clone, Hash)]
pub struct Rect<T> {
    pub x: T,
    pub y: T,
    pub width: T,
    pub height: T,
}

impl<T: Num + PartialOrd + Copy> Rect<T> {
    pub fn new(x: T, y: T, width: T, height: T) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> T {
        self.x + self.width
    }

    pub fn bottom(&self) -> T {
        self.y + self.height
    }

    /// Whether the two rectangles share at least one pixel. Touching edges do not overlap.
    pub fn intersects(&self, other: &Self) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contains(&self, other: &Self) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Column-major 4x4 matrix, laid out the way shaders consume constant buffers
#[derive(PartialEq, Debug, Copy, Clone)]
#[repr(C)]
pub struct Matrix4x4 {
    columns: [[f32; 4]; 4],
}

impl Matrix4x4 {
    pub const IDENTITY: Self = Self {
        columns: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn from_columns(columns: [[f32; 4]; 4]) -> Self {
        Self { columns }
    }

    pub fn translation(translation: Vec3f32) -> Self {
        let mut matrix = Self::IDENTITY;
        matrix.columns[3] = [translation.x, translation.y, translation.z, 1.0];
        matrix
    }

    pub fn scale(scale: Vec3f32) -> Self {
        let mut matrix = Self::IDENTITY;
        matrix.columns[0][0] = scale.x;
        matrix.columns[1][1] = scale.y;
        matrix.columns[2][2] = scale.z;
        matrix
    }

    pub fn transpose(&self) -> Self {
        let mut result = Self::IDENTITY;
        for column in 0..4 {
            for row in 0..4 {
                result.columns[row][column] = self.columns[column][row];
            }
        }
        result
    }

    pub fn columns(&self) -> &[[f32; 4]; 4] {
        &self.columns
    }

    pub fn as_floats(&self) -> [f32; 16] {
        let mut floats = [0.0; 16];
        for (column, values) in self.columns.iter().enumerate() {
            floats[column * 4..column * 4 + 4].copy_from_slice(values);
        }
        floats
    }
}

impl Default for Matrix4x4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Index<usize> for Matrix4x4 {
    type Output = [f32; 4];

    fn index(&self, index: usize) -> &Self::Output {
        &self.columns[index]
    }
}

impl IndexMut<usize> for Matrix4x4 {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.columns[index]
    }
}

impl Mul for Matrix4x4 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        let mut result = Self { columns: [[0.0; 4]; 4] };
        for column in 0..4 {
            for row in 0..4 {
                result.columns[column][row] = (0..4)
                    .map(|k| self.columns[k][row] * rhs.columns[column][k])
                    .sum();
            }
        }
        result
    }
}

pub type Vec2u32 = Vec2<u32>;
pub type Vec2i32 = Vec2<i32>;
pub type Vec2f32 = Vec2<f32>;

pub type Vec3f32 = Vec3<f32>;
pub type Vec3u32 = Vec3<u32>;
pub type Vec4f32 = Vec4<f32>;

pub type RectF32 = Rect<f32>;
pub type RectI32 = Rect<i32>;
pub type RectU32 = Rect<u32>;

pub type Matrix4f32 = Matrix4x4;

#[cfg(test)]
mod tests {
    use crate::maths::{Matrix4x4, RectU32, Vec3f32};

    #[test]
    fn touching_rects_do_not_intersect() {
        let a = RectU32::new(0, 0, 2048, 2048);
        let b = RectU32::new(2048, 0, 2048, 2048);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&RectU32::new(2047, 2047, 10, 10)));
    }

    #[test]
    fn translation_composes() {
        let a = Matrix4x4::translation(Vec3f32::new(1.0, 2.0, 3.0));
        let b = Matrix4x4::translation(Vec3f32::new(1.0, 0.0, -3.0));
        let c = a * b;
        assert_eq!(c[3], [2.0, 2.0, 0.0, 1.0]);
        assert_eq!(Matrix4x4::IDENTITY * a, a);
    }
}
