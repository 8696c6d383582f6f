//! Planner block: one queued move and its velocity plan.

use crate::config::AXES;

use super::{Command, POOL_SIZE};

/// Index of a block in the planner ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Ring slot number.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }

    #[inline]
    pub(crate) fn next(self) -> Self {
        Self((self.0 + 1) % POOL_SIZE)
    }

    #[inline]
    pub(crate) fn prev(self) -> Self {
        Self((self.0 + POOL_SIZE - 1) % POOL_SIZE)
    }
}

/// Ownership stage of a ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferState {
    /// Free.
    #[default]
    Empty,
    /// Claimed by the planner, not yet committed.
    Loading,
    /// Committed and waiting.
    Queued,
    /// Next in line behind the running block.
    Pending,
    /// Being executed.
    Running,
}

/// Execution stage of a block or of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MoveState {
    /// Not started (or slot unused).
    #[default]
    Off,
    /// Committed; the segment generator has not started it.
    New,
    /// Segments are being generated.
    Run,
}

/// What a block does when it reaches the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MoveKind {
    /// Placeholder for cleared slots.
    #[default]
    Null,
    /// Jerk-limited straight line.
    Aline,
    /// Timed pause.
    Dwell {
        /// Pause length in seconds.
        seconds: f64,
    },
    /// Host command delivered in queue order.
    Command(Command),
}

/// A queued move and its planned velocity profile.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Block {
    pub(crate) nx: BlockId,
    pub(crate) pv: BlockId,

    /// Ring ownership stage.
    pub buffer_state: BufferState,
    /// Move payload.
    pub kind: MoveKind,
    /// Execution stage.
    pub move_state: MoveState,
    /// Velocities may still improve with more look-ahead.
    pub replannable: bool,

    /// Absolute end position.
    pub target: [f64; AXES],
    /// Direction of travel.
    pub unit: [f64; AXES],

    /// Total length.
    pub length: f64,
    /// Acceleration section length.
    pub head_length: f64,
    /// Constant-velocity section length.
    pub body_length: f64,
    /// Deceleration section length.
    pub tail_length: f64,

    /// Planned entry velocity.
    pub entry_velocity: f64,
    /// Planned cruise velocity.
    pub cruise_velocity: f64,
    /// Planned exit velocity.
    pub exit_velocity: f64,

    /// Entry velocity bound (junction, cruise and exact-stop limits).
    pub entry_vmax: f64,
    /// Requested velocity.
    pub cruise_vmax: f64,
    /// Exit velocity bound.
    pub exit_vmax: f64,
    /// Largest velocity change reachable over the block length.
    pub delta_vmax: f64,
    /// Highest entry velocity from which the rest of the queue can still stop.
    pub braking_velocity: f64,

    /// Jerk along the move direction, multiplier applied.
    pub jerk: f64,
    /// Reciprocal of `jerk`.
    pub recip_jerk: f64,
    /// Cube root of `jerk`.
    pub cbrt_jerk: f64,
}

impl Block {
    pub(crate) fn linked(index: usize) -> Self {
        let id = BlockId(index);
        Self {
            nx: id.next(),
            pv: id.prev(),
            ..Self::default()
        }
    }

    /// Reset everything except the ring links.
    pub(crate) fn clear(&mut self) {
        let (nx, pv) = (self.nx, self.pv);
        *self = Self {
            nx,
            pv,
            ..Self::default()
        };
    }

    /// Whether the block is a line move.
    #[inline]
    pub fn is_aline(&self) -> bool {
        self.kind == MoveKind::Aline
    }

    /// Duration of the planned profile in minutes.
    pub fn planned_time(&self) -> f64 {
        let mut time = 0.0;
        if self.head_length > 0.0 {
            time += self.head_length / ((self.entry_velocity + self.cruise_velocity) / 2.0);
        }
        if self.body_length > 0.0 {
            time += self.body_length / self.cruise_velocity;
        }
        if self.tail_length > 0.0 {
            time += self.tail_length / ((self.cruise_velocity + self.exit_velocity) / 2.0);
        }
        time
    }
}
