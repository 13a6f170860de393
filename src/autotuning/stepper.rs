//! Time-bound bookkeeping for the kernel's time loop.
//!
//! Each run executes a short window of `squeezer` timesteps. In runtime
//! mode consecutive runs slide the window along the real time range, so
//! the tuning runs double as useful computation.

use super::config::Mode;
use super::kernel::{ArgValue, Arguments, Iteration};
use crate::ir::Direction;
use crate::symbolics::Dimension;
use log::warn;

/// The time loop and its direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stepper {
    /// Time dimension
    pub dim: Dimension,
    /// Traversal direction of the time loop
    pub direction: Direction,
}

fn bound(args: &Arguments, name: &str) -> Option<i64> {
    args.get(name).and_then(ArgValue::as_int)
}

impl Stepper {
    /// Stepper for the time loop `iteration`
    pub fn new(iteration: &Iteration) -> Self {
        Self { dim: iteration.dim.clone(), direction: iteration.direction }
    }

    fn backward(&self) -> bool {
        self.direction == Direction::Backward
    }

    /// Shrink the run bounds to a window of `squeezer` timesteps at the
    /// start of the time range. Returns the window size, or `None` if the
    /// range is too short.
    pub fn init(&self, at_args: &mut Arguments, squeezer: i64) -> Option<i64> {
        let (min_name, max_name) = (self.dim.min_name(), self.dim.max_name());
        let (Some(min), Some(max)) = (bound(at_args, &min_name), bound(at_args, &max_name)) else {
            warn!("AutoTuner: unbound time range; skipping");
            return None;
        };
        let (min, max) = if self.backward() { (max - squeezer, max) } else { (min, min + squeezer) };
        if min > max {
            warn!("AutoTuner: too few time iterations; skipping");
            return None;
        }
        at_args.insert(min_name, ArgValue::Int(min));
        at_args.insert(max_name, ArgValue::Int(max));
        Some(max - min + 1)
    }

    /// Whether the next window still lies inside the caller's time range.
    /// Always true outside runtime mode.
    pub fn check(&self, at_args: &Arguments, args: &Arguments, mode: Mode) -> bool {
        if mode != Mode::Runtime {
            return true;
        }
        let fits = if self.backward() {
            let name = self.dim.min_name();
            matches!((bound(at_args, &name), bound(args, &name)), (Some(at), Some(limit)) if at >= limit)
        } else {
            let name = self.dim.max_name();
            matches!((bound(at_args, &name), bound(args, &name)), (Some(at), Some(limit)) if at <= limit)
        };
        if !fits {
            warn!("AutoTuner: too few time iterations; stopping");
        }
        fits
    }

    /// Slide the window past the timesteps just executed (runtime mode).
    pub fn advance(&self, at_args: &mut Arguments, timesteps: i64, mode: Mode) {
        if mode != Mode::Runtime {
            return;
        }
        let shift = if self.backward() { -timesteps } else { timesteps };
        for name in [self.dim.min_name(), self.dim.max_name()] {
            if let Some(v) = bound(at_args, &name) {
                at_args.insert(name, ArgValue::Int(v + shift));
            }
        }
    }

    /// Start the caller's computation where the tuning runs stopped
    /// (runtime mode).
    pub fn finalize(&self, at_args: &Arguments, args: &mut Arguments, mode: Mode) {
        if mode != Mode::Runtime {
            return;
        }
        let name = if self.backward() { self.dim.max_name() } else { self.dim.min_name() };
        if let Some(v) = bound(at_args, &name) {
            args.insert(name, ArgValue::Int(v));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: i64, max: i64) -> Arguments {
        [("time_m", min), ("time_M", max)].iter().map(|(k, v)| (k.to_string(), ArgValue::Int(*v))).collect()
    }

    #[test]
    fn test_forward_window_slides() {
        let stepper = Stepper { dim: Dimension::time("time"), direction: Direction::Forward };
        let args = range(0, 20);
        let mut at_args = args.clone();
        assert_eq!(stepper.init(&mut at_args, 4), Some(5));
        assert_eq!(at_args["time_M"], ArgValue::Int(4));

        assert!(stepper.check(&at_args, &args, Mode::Runtime));
        stepper.advance(&mut at_args, 5, Mode::Runtime);
        assert_eq!((at_args["time_m"].as_int(), at_args["time_M"].as_int()), (Some(5), Some(9)));

        stepper.advance(&mut at_args, 5, Mode::Runtime);
        stepper.advance(&mut at_args, 5, Mode::Runtime);
        stepper.advance(&mut at_args, 5, Mode::Runtime);
        assert!(!stepper.check(&at_args, &args, Mode::Runtime));
        assert!(stepper.check(&at_args, &args, Mode::Preemptive));

        let mut out = args.clone();
        stepper.finalize(&at_args, &mut out, Mode::Runtime);
        assert_eq!(out["time_m"], ArgValue::Int(20));
    }

    #[test]
    fn test_backward_window() {
        let stepper = Stepper { dim: Dimension::time("time"), direction: Direction::Backward };
        let args = range(0, 10);
        let mut at_args = args.clone();
        assert_eq!(stepper.init(&mut at_args, 4), Some(5));
        assert_eq!(at_args["time_m"], ArgValue::Int(6));
        stepper.advance(&mut at_args, 5, Mode::Runtime);
        assert_eq!(at_args["time_M"], ArgValue::Int(5));
        assert!(stepper.check(&at_args, &args, Mode::Runtime));
    }

    #[test]
    fn test_negative_squeezer_is_degenerate() {
        let stepper = Stepper { dim: Dimension::time("time"), direction: Direction::Forward };
        let mut at_args = range(0, 10);
        assert_eq!(stepper.init(&mut at_args, -1), None);
    }
}
