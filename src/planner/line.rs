//! Line, dwell and command admission plus the look-ahead replanner.

use libm::{cbrt, fabs, sqrt};

use crate::config::AXES;
use crate::error::Alarm;

use super::block::{BlockId, MoveKind};
use super::profile::VelocityProfile;
use super::{
    axis_vector_length, fp_eq, fp_zero, min3, min4, AxisLimits, Command, Feed, Line, MoveStatus,
    Planner, JERK_MATCH_PRECISION, JERK_MULTIPLIER, UNCONSTRAINED_VELOCITY,
};

/// Maximum cornering velocity between two unit vectors.
///
/// The corner is replaced by an arc tangent to both lines whose deviation from
/// the sharp corner is the axis-weighted junction deviation; the velocity is
/// the one that keeps centripetal acceleration on that arc at
/// `junction_acceleration`.
pub fn junction_vmax(
    a_unit: &[f64; AXES],
    b_unit: &[f64; AXES],
    axes: &[AxisLimits; AXES],
    junction_acceleration: f64,
) -> f64 {
    let costheta: f64 = -a_unit.iter().zip(b_unit.iter()).map(|(a, b)| a * b).sum::<f64>();

    if costheta < -0.99 {
        return UNCONSTRAINED_VELOCITY;
    }
    if costheta > 0.99 {
        return 0.0;
    }

    let weighted = |unit: &[f64; AXES]| -> f64 {
        sqrt(
            unit.iter()
                .zip(axes.iter())
                .map(|(u, axis)| {
                    let d = u * axis.junction_deviation;
                    d * d
                })
                .sum(),
        )
    };
    let delta = (weighted(a_unit) + weighted(b_unit)) / 2.0;
    let sintheta_over2 = sqrt((1.0 - costheta) / 2.0);
    let radius = delta * sintheta_over2 / (1.0 - sintheta_over2);
    sqrt(radius * junction_acceleration)
}

impl<P: VelocityProfile> Planner<P> {
    /// Plan and queue a straight line from the model position to `line.target`.
    ///
    /// Axes without configured limits keep their current position.
    ///
    /// # Errors
    ///
    /// Returns [`Alarm::BufferFull`] if no block is free. Callers must keep
    /// [`has_headroom`](Self::has_headroom) true before submitting.
    pub fn queue_line(&mut self, line: &Line) -> Result<MoveStatus, Alarm> {
        let mut target = line.target;
        for (i, axis) in self.axes.iter().enumerate() {
            if !axis.is_configured() {
                target[i] = self.position[i];
            }
        }

        if target.iter().zip(self.position.iter()).all(|(t, p)| fp_eq(*t, *p)) {
            return Ok(MoveStatus::ZeroLength);
        }

        let move_time = self.move_time(&target, line.feed);
        if move_time.is_nan() || move_time < self.timing.min_block_time {
            debug!("line rejected below minimum block time");
            return Ok(MoveStatus::MinimumTime);
        }

        let bf = self.pool.get_write_buffer().ok_or_else(|| {
            error!("planner pool exhausted");
            Alarm::BufferFull
        })?;

        let length = axis_vector_length(&target, &self.position);
        let mut unit = [0.0; AXES];
        let mut jerk_sq = 0.0;
        for axis in 0..AXES {
            let diff = target[axis] - self.position[axis];
            if diff != 0.0 {
                unit[axis] = diff / length;
                let j = unit[axis] * self.axes[axis].jerk_max;
                jerk_sq += j * j;
            }
        }
        let jerk = sqrt(jerk_sq) * JERK_MULTIPLIER;

        let (cbrt_jerk, recip_jerk) = if fabs(jerk - self.prev_jerk) < JERK_MATCH_PRECISION {
            (self.prev_cbrt_jerk, self.prev_recip_jerk)
        } else {
            self.prev_jerk = jerk;
            self.prev_cbrt_jerk = cbrt(jerk);
            self.prev_recip_jerk = 1.0 / jerk;
            (self.prev_cbrt_jerk, self.prev_recip_jerk)
        };

        let pv_unit = self.pool[self.pool.prev(bf)].unit;
        let junction = junction_vmax(&pv_unit, &unit, &self.axes, self.junction_acceleration);

        let block = &mut self.pool[bf];
        block.kind = MoveKind::Aline;
        block.target = target;
        block.unit = unit;
        block.length = length;
        block.jerk = jerk;
        block.cbrt_jerk = cbrt_jerk;
        block.recip_jerk = recip_jerk;

        let exact_stop = if line.exact_stop {
            0.0
        } else {
            block.replannable = true;
            UNCONSTRAINED_VELOCITY
        };
        block.cruise_vmax = length / move_time;
        block.entry_vmax = min3(block.cruise_vmax, junction, exact_stop);
        block.delta_vmax = block.target_velocity(0.0, length);
        block.exit_vmax = min3(
            block.cruise_vmax,
            block.entry_vmax + block.delta_vmax,
            exact_stop,
        );
        block.braking_velocity = block.delta_vmax;

        self.plan_block_list(bf, false);
        self.position = target;
        self.pool.commit_write_buffer(MoveKind::Aline);
        trace!("line queued");
        Ok(MoveStatus::Queued)
    }

    /// Queue a pause of `seconds`. The machine stops before the dwell.
    ///
    /// # Errors
    ///
    /// Returns [`Alarm::BufferFull`] if no block is free.
    pub fn dwell(&mut self, seconds: f64) -> Result<(), Alarm> {
        self.queue_marker(MoveKind::Dwell { seconds })
    }

    /// Queue a command to be delivered when the stepper reaches it.
    ///
    /// # Errors
    ///
    /// Returns [`Alarm::BufferFull`] if no block is free.
    pub fn queue_command(&mut self, command: Command) -> Result<(), Alarm> {
        self.queue_marker(MoveKind::Command(command))
    }

    fn queue_marker(&mut self, kind: MoveKind) -> Result<(), Alarm> {
        let bf = self.pool.get_write_buffer().ok_or(Alarm::BufferFull)?;
        self.pool[bf].target = self.position;
        self.pool.commit_write_buffer(kind);
        Ok(())
    }

    /// Time the move takes at the requested feed, bounded by the slowest axis.
    pub(crate) fn move_time(&self, target: &[f64; AXES], feed: Feed) -> f64 {
        let mut inv_time = 0.0;
        let mut xyz_time = 0.0;
        let mut abc_time = 0.0;

        match feed {
            Feed::InverseTime(minutes) if minutes > 0.0 => inv_time = minutes,
            Feed::UnitsPerMinute(rate) if rate > 0.0 => {
                let span = |range: core::ops::Range<usize>| {
                    sqrt(
                        range
                            .map(|i| {
                                let d = target[i] - self.position[i];
                                d * d
                            })
                            .sum(),
                    )
                };
                xyz_time = span(0..3) / rate;
                if fp_zero(xyz_time) {
                    abc_time = span(3..AXES) / rate;
                }
            }
            _ => {}
        }

        let max_time = (0..AXES)
            .filter(|&i| self.axes[i].is_configured())
            .map(|i| {
                let limit = match feed {
                    Feed::Traverse => self.axes[i].velocity_max,
                    _ => self.axes[i].feedrate_max,
                };
                fabs(target[i] - self.position[i]) / limit
            })
            .fold(0.0, f64::max);

        inv_time.max(max_time).max(xyz_time).max(abc_time)
    }

    /// Replan the queue ending at `bf`.
    ///
    /// The backward pass walks from `bf` toward the head while blocks are
    /// replannable, updating braking velocities. The forward pass then
    /// recomputes entry/exit velocities and trapezoids up to `bf`, which
    /// always plans to stop. `mr_flag` makes the first block enter at its
    /// `entry_vmax` (used by feedhold, where the runtime has just been
    /// rewritten).
    pub(crate) fn plan_block_list(&mut self, bf: BlockId, mut mr_flag: bool) {
        let mut bp = bf;
        loop {
            bp = self.pool.prev(bp);
            if bp == bf || !self.pool[bp].replannable {
                break;
            }
            let nx = self.pool.next(bp);
            let braking = self.pool[nx].entry_vmax.min(self.pool[nx].braking_velocity);
            self.pool[bp].braking_velocity = braking + self.pool[bp].delta_vmax;
        }

        loop {
            bp = self.pool.next(bp);
            if bp == bf {
                break;
            }
            let pv = self.pool.prev(bp);
            let nx = self.pool.next(bp);
            let pv_exit = self.pool[pv].exit_velocity;
            let pv_replannable = self.pool[pv].replannable;
            let (nx_entry_vmax, nx_braking) =
                (self.pool[nx].entry_vmax, self.pool[nx].braking_velocity);

            let block = &mut self.pool[bp];
            if pv == bf || mr_flag {
                block.entry_velocity = block.entry_vmax;
                mr_flag = false;
            } else {
                block.entry_velocity = pv_exit;
            }
            block.cruise_velocity = block.cruise_vmax;
            block.exit_velocity = min4(
                block.exit_vmax,
                nx_entry_vmax,
                nx_braking,
                block.entry_velocity + block.delta_vmax,
            );
            block.calculate_trapezoid(&self.timing);

            if fp_eq(block.exit_velocity, block.exit_vmax)
                || fp_eq(block.exit_velocity, nx_entry_vmax)
                || (!pv_replannable
                    && fp_eq(block.exit_velocity, block.entry_velocity + block.delta_vmax))
            {
                block.replannable = false;
            }
        }

        let pv_exit = self.pool[self.pool.prev(bf)].exit_velocity;
        let block = &mut self.pool[bf];
        block.entry_velocity = if mr_flag { block.entry_vmax } else { pv_exit };
        block.cruise_velocity = block.cruise_vmax;
        block.exit_velocity = 0.0;
        block.calculate_trapezoid(&self.timing);
    }
}
