//! Feedhold: bring the machine to a jerk-limited stop mid-queue and resume
//! from the same point.
//!
//! A hold request first waits for the segment generator to sync on a
//! running block ([`HoldState::Sync`] to [`HoldState::Plan`]). The replan
//! then rewrites the runtime to decelerate and splits the queue at the hold
//! point so the remaining distance stays queued:
//!
//! 1. The stop fits in what is left of the running block. The runtime
//!    becomes a tail to zero and the running block is re-queued as the
//!    remainder.
//! 2. It does not fit. The runtime sheds what velocity it can, and the
//!    deceleration continues through following blocks until it reaches
//!    zero. That block is split into a decel part ending at the hold point
//!    and an accel remainder starting from rest.

use core::array;

use super::block::{BlockId, MoveState};
use super::exec::{Section, SectionState};
use super::profile::VelocityProfile;
use super::{axis_vector_length, fp_zero, HoldState, MotionState, Planner, POOL_SIZE};

impl<P: VelocityProfile> Planner<P> {
    /// Replan the runtime and queue to stop. Runs once the hold has reached
    /// [`HoldState::Plan`]; otherwise does nothing.
    pub fn plan_hold(&mut self) {
        if self.hold_state != HoldState::Plan {
            return;
        }
        let Some(bp) = self.pool.get_first_buffer() else {
            return;
        };
        if self.mr.move_state != MoveState::Run {
            self.hold_state = HoldState::Sync;
            return;
        }

        let available = axis_vector_length(&self.mr.target, &self.mr.position);
        let braking_velocity = self.mr.next_segment_velocity();
        let mut braking_length = self.pool[bp].target_length(braking_velocity, 0.0);

        // a block that stops anyway always absorbs the stop
        if braking_length > available && fp_zero(self.pool[bp].exit_velocity) {
            braking_length = available;
        }

        // only a block that flows into a following line can overrun here
        if braking_length <= available {
            self.hold_in_running_block(bp, available, braking_velocity, braking_length);
        } else {
            self.hold_across_blocks(bp, available, braking_velocity);
        }

        self.reset_replannable_list();
        if let Some(last) = self.pool.get_last_buffer() {
            self.plan_block_list(last, true);
        }
        self.hold_state = HoldState::Decel;
        info!("feedhold decelerating from {}", braking_velocity);
    }

    /// Finish a hold after resume was requested. Returns whether there is
    /// queued work to restart.
    pub fn end_hold(&mut self) -> bool {
        if self.hold_state != HoldState::EndHold {
            return false;
        }
        self.hold_state = HoldState::Off;
        if self.pool.get_first_buffer().is_some() {
            self.motion_state = MotionState::Run;
            info!("resuming from feedhold");
            true
        } else {
            self.motion_state = MotionState::Stop;
            false
        }
    }

    fn hold_in_running_block(
        &mut self,
        bp: BlockId,
        available: f64,
        braking_velocity: f64,
        braking_length: f64,
    ) {
        let mr = &mut self.mr;
        mr.exit_velocity = 0.0;
        mr.tail_length = braking_length;
        mr.cruise_velocity = braking_velocity;
        mr.section = Section::Tail;
        mr.section_state = SectionState::New;
        let (position, unit) = (mr.position, mr.unit);
        mr.target = array::from_fn(|i| position[i] + unit[i] * braking_length);
        mr.waypoint[Section::Tail as usize] = mr.target;

        let block = &mut self.pool[bp];
        block.length = available - braking_length;
        block.delta_vmax = block.target_velocity(0.0, block.length);
        block.entry_vmax = 0.0;
        block.move_state = MoveState::New;
        debug!("hold point inside running block, {} left", block.length);
    }

    fn hold_across_blocks(&mut self, bp: BlockId, available: f64, braking_velocity: f64) {
        let shed = self.pool[bp].target_velocity(0.0, available);
        let mr = &mut self.mr;
        mr.section = Section::Tail;
        mr.section_state = SectionState::New;
        mr.tail_length = available;
        mr.cruise_velocity = braking_velocity;
        mr.exit_velocity = (braking_velocity - shed).max(0.0);
        mr.waypoint[Section::Tail as usize] = mr.target;

        let mut braking = mr.exit_velocity;
        let mut start = mr.target;
        let mut bp = bp;

        // shift the queue down one slot, spreading the decel over the copies
        let mut braking_length = 0.0;
        for _ in 0..POOL_SIZE {
            let nx = self.pool.next(bp);
            self.pool.copy_buffer(bp, nx);
            if !self.pool[bp].is_aline() {
                start = self.pool[bp].target;
                bp = nx;
                continue;
            }
            let after = self.pool.next(nx);
            let last_aline =
                !self.pool[after].is_aline() || self.pool[after].move_state == MoveState::Off;

            let block = &mut self.pool[bp];
            block.entry_vmax = braking;
            braking_length = block.target_length(braking, 0.0);
            if last_aline {
                braking_length = braking_length.min(block.length);
            }
            if braking_length > block.length {
                block.exit_vmax = (braking - block.target_velocity(0.0, block.length)).max(0.0);
                braking = block.exit_vmax;
                start = block.target;
                bp = nx;
                continue;
            }
            break;
        }

        let block = &mut self.pool[bp];
        block.length = braking_length;
        block.exit_vmax = 0.0;
        let unit = block.unit;
        block.target = array::from_fn(|i| start[i] + unit[i] * braking_length);

        let nx = self.pool.next(bp);
        let remainder = &mut self.pool[nx];
        remainder.entry_vmax = 0.0;
        remainder.length -= braking_length;
        remainder.delta_vmax = remainder.target_velocity(0.0, remainder.length);
        remainder.exit_vmax = remainder.delta_vmax;
        debug!("hold point {} into a following block", braking_length);
    }
}
