//! Per-segment velocity evaluation for the head and tail S-curves.
//!
//! A head or tail is two halves of `n` segments each. The first half is
//! concave (`v0 + (vm - v0)·x²`), the second convex
//! (`vm + (vm - v0)·(2x - x²)`), where `vm` is the midpoint velocity and `x`
//! runs from 0 to 1 over each half. The end of the second half is therefore
//! `2·vm - v0`.

use core::fmt::Debug;

/// Source of segment velocities for one S-curve section.
pub trait VelocityProfile: Clone + Default + Debug {
    /// Start a section at `v0` with midpoint velocity `vm` and `segments`
    /// segments in each half.
    fn begin(&mut self, v0: f64, vm: f64, segments: u32);

    /// Advance one segment and return the velocity at its end.
    fn advance(&mut self) -> f64;

    /// The velocity the next [`advance`](Self::advance) will return.
    fn peek(&self) -> f64;
}

/// Quadratic forward differences: two additions per segment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForwardDifference {
    velocity: f64,
    diff_1: f64,
    diff_2: f64,
    first_half_remaining: u32,
}

impl VelocityProfile for ForwardDifference {
    fn begin(&mut self, v0: f64, vm: f64, segments: u32) {
        let n = f64::from(segments.max(1));
        self.diff_1 = (vm - v0) / (n * n);
        self.diff_2 = 2.0 * self.diff_1;
        self.velocity = v0;
        self.first_half_remaining = segments.max(1);
    }

    fn advance(&mut self) -> f64 {
        self.velocity += self.diff_1;
        if self.first_half_remaining > 0 {
            self.first_half_remaining -= 1;
            if self.first_half_remaining == 0 {
                // the convex half mirrors the concave one
                self.diff_2 = -self.diff_2;
                return self.velocity;
            }
        }
        self.diff_1 += self.diff_2;
        self.velocity
    }

    fn peek(&self) -> f64 {
        self.velocity + self.diff_1
    }
}

/// Closed-form evaluation of the same curve. Slower, used to cross-check
/// [`ForwardDifference`] and where exactness matters more than cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExactProfile {
    v0: f64,
    vm: f64,
    segments: u32,
    step: u32,
}

impl ExactProfile {
    fn velocity_at(&self, step: u32) -> f64 {
        let n = f64::from(self.segments);
        let dv = self.vm - self.v0;
        if step <= self.segments {
            let x = f64::from(step) / n;
            self.v0 + dv * x * x
        } else {
            let x = f64::from(step - self.segments) / n;
            self.vm + dv * (2.0 * x - x * x)
        }
    }
}

impl VelocityProfile for ExactProfile {
    fn begin(&mut self, v0: f64, vm: f64, segments: u32) {
        *self = Self {
            v0,
            vm,
            segments: segments.max(1),
            step: 0,
        };
    }

    fn advance(&mut self) -> f64 {
        self.step += 1;
        self.velocity_at(self.step)
    }

    fn peek(&self) -> f64 {
        self.velocity_at(self.step + 1)
    }
}
