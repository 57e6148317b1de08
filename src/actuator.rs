use std::collections::HashSet;

use embedded_hal::delay::DelayNs;

/// 可用 GPIO 上限（不含）。
pub const GPIO_LIMIT: i32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("GPIO {0} out of range 0..{GPIO_LIMIT}")]
    InvalidPin(i32),
    #[error("GPIO {pin} driver error: {message}")]
    Driver { pin: i32, message: String },
}

/// 数字输出引脚集合（目标板由 PinDriver 实现）。
pub trait PinBank: Send {
    /// 配置为推挽输出并拉低。
    fn configure_output(&mut self, pin: i32) -> Result<(), ActuatorError>;
    fn write(&mut self, pin: i32, high: bool) -> Result<(), ActuatorError>;
}

/// 脉冲 / 电平两种执行原语，首次使用时配置引脚。
pub struct Actuators<P, D> {
    pins: P,
    delay: D,
    configured: HashSet<i32>,
}

impl<P: PinBank, D: DelayNs> Actuators<P, D> {
    pub fn new(pins: P, delay: D) -> Self {
        Self {
            pins,
            delay,
            configured: HashSet::new(),
        }
    }

    fn ensure_output(&mut self, pin: i32) -> Result<(), ActuatorError> {
        if !(0..GPIO_LIMIT).contains(&pin) {
            return Err(ActuatorError::InvalidPin(pin));
        }
        if !self.configured.contains(&pin) {
            self.pins.configure_output(pin)?;
            self.configured.insert(pin);
        }
        Ok(())
    }

    /// 输出有效电平，保持 `duration_ms`，再恢复无效电平（阻塞）。
    pub fn pulse(&mut self, pin: i32, duration_ms: u32, inverted: bool) -> Result<(), ActuatorError> {
        self.ensure_output(pin)?;
        self.pins.write(pin, !inverted)?;
        self.delay.delay_ms(duration_ms);
        self.pins.write(pin, inverted)
    }

    /// 持续电平：state 为 0 输出有效电平，其余输出无效电平。
    pub fn set_level(&mut self, pin: i32, state: i32, inverted: bool) -> Result<(), ActuatorError> {
        self.ensure_output(pin)?;
        let active = !inverted;
        let level = if state == 0 { active } else { !active };
        self.pins.write(pin, level)
    }

    pub fn pause_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}
