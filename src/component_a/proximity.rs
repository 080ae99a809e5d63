//! proximity.rs
//! Reads the six proximity inputs (two palm, four body) and translates the
//! active-low electrical level into "object detected" polarity.

use crate::{config::ChannelMap, error::PeripheralError};

/// Digital input collaborator. Returns the raw electrical level
/// (`true` = high).
pub trait DigitalInputs: Send {
    fn read_digital(&mut self, channel: u8) -> Result<bool, PeripheralError>;

    /// Releases every claimed input pin.
    fn release(&mut self) -> Result<(), PeripheralError> {
        Ok(())
    }
}

/// `true` means an object is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProximityState {
    pub left_palm: bool,
    pub right_palm: bool,
    /// Read every tick; not acted on by the gripper logic.
    pub body: [bool; 4],
}

#[inline]
fn detected(inputs: &mut dyn DigitalInputs, channel: u8) -> Result<bool, PeripheralError> {
    // Sensors pull the line low when something is in range.
    Ok(!inputs.read_digital(channel)?)
}

/// Reads all six channels, palms first.
pub fn read_proximity(
    inputs: &mut dyn DigitalInputs,
    channels: &ChannelMap,
) -> Result<ProximityState, PeripheralError> {
    let left_palm = detected(inputs, channels.left_palm)?;
    let right_palm = detected(inputs, channels.right_palm)?;
    let mut body = [false; 4];
    for (slot, &ch) in body.iter_mut().zip(channels.body.iter()) {
        *slot = detected(inputs, ch)?;
    }
    Ok(ProximityState {
        left_palm,
        right_palm,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Levels([bool; 6]);

    impl DigitalInputs for Levels {
        fn read_digital(&mut self, channel: u8) -> Result<bool, PeripheralError> {
            self.0
                .get(usize::from(channel))
                .copied()
                .ok_or_else(|| PeripheralError::bus("read_digital", channel, "no such pin"))
        }
    }

    #[test]
    fn low_level_means_detected() {
        // left palm low, right palm high, body channel 3 low
        let mut pins = Levels([false, true, true, false, true, true]);
        let s = read_proximity(&mut pins, &ChannelMap::default()).unwrap();
        assert!(s.left_palm);
        assert!(!s.right_palm);
        assert_eq!(s.body, [false, true, false, false]);
    }

    #[test]
    fn read_failure_carries_channel() {
        let mut pins = Levels([true; 6]);
        let mut map = ChannelMap::default();
        map.body[2] = 9;
        let err = read_proximity(&mut pins, &map).unwrap_err();
        assert!(matches!(err, PeripheralError::Bus { channel: 9, .. }));
    }
}
