//! Hardware adapter: the power-control and power-sense lines behind
//! [`PowerRailPort`].
//!
//! Generic over `embedded-hal` pins so the polarity logic is tested with
//! in-memory lines; production uses [`SysfsLine`](crate::drivers::gpio::SysfsLine).

use embedded_hal::digital::{InputPin, OutputPin};

use crate::app::ports::PowerRailPort;
use crate::error::GpioError;

pub struct PowerRail<O, I> {
    control: O,
    sense: I,
    /// Level 0 on the sense line means "powered".
    sense_active_low: bool,
}

impl<O, I> PowerRail<O, I>
where
    O: OutputPin<Error = GpioError> + Send,
    I: InputPin<Error = GpioError> + Send,
{
    pub fn new(control: O, sense: I, sense_active_low: bool) -> Self {
        Self {
            control,
            sense,
            sense_active_low,
        }
    }
}

impl<O, I> PowerRailPort for PowerRail<O, I>
where
    O: OutputPin<Error = GpioError> + Send,
    I: InputPin<Error = GpioError> + Send,
{
    fn set_power(&mut self, on: bool) -> Result<(), GpioError> {
        if on {
            self.control.set_high()
        } else {
            self.control.set_low()
        }
    }

    fn is_powered(&mut self) -> Result<bool, GpioError> {
        let high = self.sense.is_high()?;
        Ok(high != self.sense_active_low)
    }
}
