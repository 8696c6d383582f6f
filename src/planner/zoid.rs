//! Trapezoid generation and the constant-jerk velocity relations.
//!
//! A jerk-limited change from `vi` to `vf` covers
//! `L = (vi + vf) * sqrt(|vf - vi| / J)`. The helpers below solve that
//! relation for whichever quantity is missing.

use libm::{cbrt, fabs, pow, sqrt};

use super::block::Block;
use super::{
    fp_not_zero, fp_zero, trapezoid_velocity_tolerance, SegmentTiming, TRAPEZOID_ITERATION_MAX,
    TRAPEZOID_LENGTH_FIT_TOLERANCE,
};

impl Block {
    /// Length needed to change velocity from `vi` to `vf` at this block's jerk.
    pub fn target_length(&self, vi: f64, vf: f64) -> f64 {
        (vi + vf) * sqrt(fabs(vf - vi) * self.recip_jerk)
    }

    /// Velocity reached after accelerating from `vi` over `length`.
    pub fn target_velocity(&self, vi: f64, length: f64) -> f64 {
        if length <= 0.0 {
            return vi;
        }
        let cbrt_jerk = if self.cbrt_jerk > 0.0 {
            self.cbrt_jerk
        } else {
            cbrt(self.jerk)
        };
        let length_sq = length * length;

        // exact for vi == 0, refined by Newton-Raphson otherwise
        let mut estimate = pow(length, 2.0 / 3.0) * cbrt_jerk + vi;
        for _ in 0..TRAPEZOID_ITERATION_MAX {
            let z = (estimate - vi) * (vi + estimate) * (vi + estimate) / length_sq - self.jerk;
            let dz = (2.0 * vi * estimate - vi * vi + 3.0 * estimate * estimate) / length_sq;
            if dz <= 0.0 {
                break;
            }
            let step = z / dz;
            estimate -= step;
            if fabs(step) < 1e-9 * estimate.max(1.0) {
                break;
            }
        }
        estimate
    }

    /// Peak velocity of a head+tail profile from `v0` up and back down to `v2`
    /// that covers exactly `length`.
    pub fn meet_velocity(&self, v0: f64, v2: f64, length: f64) -> f64 {
        let side = |vx: f64, v: f64| -> (f64, f64) {
            let dv = (v - vx).max(0.0);
            let root = sqrt(dv * self.recip_jerk);
            let len = (vx + v) * root;
            let slope = if dv > 0.0 {
                (3.0 * v - vx) / (2.0 * sqrt(self.jerk * dv))
            } else {
                f64::INFINITY
            };
            (len, slope)
        };
        let fit = |v: f64| -> (f64, f64) {
            let (l0, d0) = side(v0, v);
            let (l2, d2) = side(v2, v);
            (l0 + l2 - length, d0 + d2)
        };

        let mut lo = v0.max(v2);
        if fit(lo).0 >= 0.0 {
            return lo;
        }
        let mut hi = self.target_velocity(lo, length);
        let mut v = (lo + hi) / 2.0;

        // Newton steps that leave the bracket fall back to bisection
        for _ in 0..TRAPEZOID_ITERATION_MAX * 3 {
            let (err, slope) = fit(v);
            if fabs(err) < TRAPEZOID_LENGTH_FIT_TOLERANCE {
                break;
            }
            if err > 0.0 {
                hi = v;
            } else {
                lo = v;
            }
            let newton = v - err / slope;
            v = if slope.is_finite() && newton > lo && newton < hi {
                newton
            } else {
                (lo + hi) / 2.0
            };
        }
        v
    }

    /// Split the block into head, body and tail for its planned entry,
    /// cruise and exit velocities. The block length is never changed;
    /// velocities are degraded where the length can not support them.
    pub fn calculate_trapezoid(&mut self, timing: &SegmentTiming) {
        self.head_length = 0.0;
        self.body_length = 0.0;
        self.tail_length = 0.0;

        if !self.is_aline() || fp_zero(self.length) {
            self.entry_velocity = 0.0;
            self.cruise_velocity = 0.0;
            self.exit_velocity = 0.0;
            return;
        }

        if self.exit_velocity > self.cruise_velocity {
            self.exit_velocity = self.cruise_velocity;
        }

        let margin = timing.min_segment_time_plus_margin;
        let naive_move_time = self.length / (self.entry_velocity + self.exit_velocity);

        // too short for the minimum segment: one body segment at whatever speed fits
        if naive_move_time < margin / 2.0 {
            self.cruise_velocity = self.length / margin;
            self.exit_velocity = self.cruise_velocity;
            self.body_length = self.length;
            return;
        }

        // fits a single nominal segment
        if naive_move_time <= timing.nominal_segment_time / 2.0 {
            self.cruise_velocity = self.length / timing.nominal_segment_time;
            self.exit_velocity = self.cruise_velocity;
            self.body_length = self.length;
            return;
        }

        let tolerance = trapezoid_velocity_tolerance(self.entry_velocity);
        if self.cruise_velocity - self.entry_velocity < tolerance
            && self.cruise_velocity - self.exit_velocity < tolerance
        {
            self.body_length = self.length;
            return;
        }

        let min_head = margin * (self.cruise_velocity + self.entry_velocity);
        let min_tail = margin * (self.cruise_velocity + self.exit_velocity);
        let min_body = margin * self.cruise_velocity;

        self.head_length = self.target_length(self.entry_velocity, self.cruise_velocity);
        self.tail_length = self.target_length(self.exit_velocity, self.cruise_velocity);
        if self.head_length < min_head {
            self.head_length = 0.0;
        }
        if self.tail_length < min_tail {
            self.tail_length = 0.0;
        }

        // rate limited: cruise can not be reached
        if self.length < self.head_length + self.tail_length {
            if fabs(self.entry_velocity - self.exit_velocity) < tolerance {
                self.head_length = self.length / 2.0;
                self.tail_length = self.head_length;
                self.cruise_velocity = self.target_velocity(self.entry_velocity, self.head_length);

                let min_head = margin * (self.cruise_velocity + self.entry_velocity);
                if self.head_length < min_head {
                    self.body_length = self.length;
                    self.head_length = 0.0;
                    self.tail_length = 0.0;
                    self.cruise_velocity = (self.entry_velocity + self.cruise_velocity) / 2.0;
                    self.exit_velocity = self.cruise_velocity;
                }
                return;
            }

            self.cruise_velocity =
                self.meet_velocity(self.entry_velocity, self.exit_velocity, self.length);
            self.head_length = self.target_length(self.entry_velocity, self.cruise_velocity);
            self.tail_length = self.length - self.head_length;
            if self.head_length < margin * (self.cruise_velocity + self.entry_velocity) {
                self.tail_length = self.length;
                self.head_length = 0.0;
            }
            if self.tail_length < margin * (self.cruise_velocity + self.exit_velocity) {
                self.head_length = self.length;
                self.tail_length = 0.0;
            }
            return;
        }

        self.body_length = self.length - (self.head_length + self.tail_length);

        // fold a sliver of body into the neighbouring sections
        if self.body_length < min_body && fp_not_zero(self.body_length) {
            if fp_not_zero(self.head_length) {
                if fp_not_zero(self.tail_length) {
                    self.head_length += self.body_length / 2.0;
                    self.tail_length += self.body_length / 2.0;
                } else {
                    self.head_length += self.body_length;
                }
            } else {
                self.tail_length += self.body_length;
            }
            self.body_length = 0.0;
        } else if fp_zero(self.head_length) && fp_zero(self.tail_length) {
            self.cruise_velocity = self.entry_velocity;
        }
    }
}
