// src/geometry.rs

//! Rectangles in surface coordinates.
//!
//! Edges saturate at the `i32` range, so rectangles from callers never
//! overflow however far out they lie; clipping against a surface then
//! discards them.

/// An axis-aligned rectangle. The layout matches the kernel's rectangle
/// record so a `&[Rect]` can be handed to the operation-record ioctl as is.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Rect { x, y, w, h }
    }

    /// A rectangle anchored at the origin.
    pub const fn sized(w: i32, h: i32) -> Self {
        Rect { x: 0, y: 0, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.h)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Overlapping part of two rectangles, or `None` when they are disjoint.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        let result = Rect::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y));
        (!result.is_empty()).then_some(result)
    }

    /// The same rectangle moved by `(dx, dy)`.
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.w,
            self.h,
        )
    }
}
