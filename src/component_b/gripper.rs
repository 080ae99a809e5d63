//! gripper.rs
//! Palm sensor → gripper joint targets.
//!
//! Detected → CLOSED, otherwise OPEN, per arm from that arm's own palm sensor.
//! `decide_gripper` is pure. `PalmDebouncer` is an opt-in filter for noisy
//! sensors; with a zero threshold it passes readings straight through.

use crate::{component_a::proximity::ProximityState, config::GripperAngles};

/// Thumb and mitten targets for one arm, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripperPose {
    pub thumb: f64,
    pub mitten: f64,
}

impl GripperPose {
    pub fn open(angles: &GripperAngles) -> Self {
        Self {
            thumb: angles.open,
            mitten: angles.open,
        }
    }

    pub fn closed(angles: &GripperAngles) -> Self {
        Self {
            thumb: angles.closed,
            mitten: angles.closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripperTarget {
    pub left: GripperPose,
    pub right: GripperPose,
}

pub fn decide_gripper(palm_detected: bool, angles: &GripperAngles) -> GripperPose {
    if palm_detected {
        GripperPose::closed(angles)
    } else {
        GripperPose::open(angles)
    }
}

/// Both arms from one proximity reading. Body sensors are ignored.
pub fn decide_targets(proximity: &ProximityState, angles: &GripperAngles) -> GripperTarget {
    GripperTarget {
        left: decide_gripper(proximity.left_palm, angles),
        right: decide_gripper(proximity.right_palm, angles),
    }
}

/// Accepts a palm state change only after it held for `threshold`
/// consecutive readings.
#[derive(Debug, Clone)]
pub struct PalmDebouncer {
    threshold: u32,
    stable: bool,
    candidate: bool,
    count: u32,
}

impl PalmDebouncer {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            stable: false,
            candidate: false,
            count: 0,
        }
    }

    pub fn filter(&mut self, raw: bool) -> bool {
        if self.threshold == 0 {
            self.stable = raw;
            return raw;
        }
        if raw == self.stable {
            self.count = 0;
            return self.stable;
        }
        if raw == self.candidate {
            self.count += 1;
        } else {
            self.candidate = raw;
            self.count = 1;
        }
        if self.count >= self.threshold {
            self.stable = raw;
            self.count = 0;
        }
        self.stable
    }
}

/// One debouncer per palm.
#[derive(Debug, Clone)]
pub struct GripperFilter {
    left: PalmDebouncer,
    right: PalmDebouncer,
}

impl GripperFilter {
    pub fn new(threshold: u32) -> Self {
        Self {
            left: PalmDebouncer::new(threshold),
            right: PalmDebouncer::new(threshold),
        }
    }

    pub fn apply(&mut self, proximity: ProximityState) -> ProximityState {
        ProximityState {
            left_palm: self.left.filter(proximity.left_palm),
            right_palm: self.right.filter(proximity.right_palm),
            ..proximity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_closes_absence_opens() {
        let angles = GripperAngles::default();
        assert_eq!(decide_gripper(true, &angles), GripperPose { thumb: 70.0, mitten: 70.0 });
        assert_eq!(decide_gripper(false, &angles), GripperPose { thumb: 30.0, mitten: 30.0 });
        // no memory between calls
        assert_eq!(decide_gripper(false, &angles), decide_gripper(false, &angles));
        assert_eq!(decide_gripper(true, &angles), GripperPose::closed(&angles));
    }

    #[test]
    fn arms_decide_independently() {
        let angles = GripperAngles::default();
        let proximity = ProximityState {
            left_palm: true,
            right_palm: false,
            body: [true; 4],
        };
        let t = decide_targets(&proximity, &angles);
        assert_eq!(t.left, GripperPose { thumb: 70.0, mitten: 70.0 });
        assert_eq!(t.right, GripperPose { thumb: 30.0, mitten: 30.0 });
    }

    #[test]
    fn zero_threshold_passes_flicker_through() {
        let mut d = PalmDebouncer::new(0);
        let seq = [true, false, true, true, false];
        let out: Vec<bool> = seq.iter().map(|&r| d.filter(r)).collect();
        assert_eq!(out, seq);
    }

    #[test]
    fn debounce_ignores_short_glitches() {
        let mut d = PalmDebouncer::new(3);
        let out: Vec<bool> = [true, false, true, true, true, false, false, true, false, false, false]
            .iter()
            .map(|&r| d.filter(r))
            .collect();
        assert_eq!(
            out,
            [false, false, false, false, true, true, true, true, true, true, false]
        );
    }

    #[test]
    fn filter_keeps_body_readings() {
        let mut f = GripperFilter::new(2);
        let raw = ProximityState {
            left_palm: true,
            right_palm: false,
            body: [true, false, true, false],
        };
        let first = f.apply(raw);
        assert!(!first.left_palm);
        assert_eq!(first.body, raw.body);
        assert!(f.apply(raw).left_palm);
    }
}
