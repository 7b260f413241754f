//! Analog and digital I/O channel service.
//!
//! Channels are addressed by their index within one kind. Each channel runs
//! its own publisher.

use std::sync::Arc;

use tracing::debug;

use super::{check_index, Cadence, ServiceContext};
use crate::error::AppResult;
use crate::hardware::{AnalogOutChannel, DigitalOutChannel, IoChannel};
use crate::observable::{SampledObservable, Tolerance};

/// All I/O channels of a device.
pub struct IoService {
    device: String,
    ctx: ServiceContext,
    analog_in: Vec<SampledObservable<f64>>,
    analog_out: Vec<(Arc<dyn AnalogOutChannel>, SampledObservable<f64>)>,
    digital_in: Vec<SampledObservable<bool>>,
    digital_out: Vec<(Arc<dyn DigitalOutChannel>, SampledObservable<bool>)>,
}

impl IoService {
    /// Service for `channels`; order within each kind is kept.
    pub fn new(device: &str, channels: &[IoChannel], ctx: &ServiceContext) -> Self {
        let mut service = Self {
            device: device.to_string(),
            ctx: ctx.clone(),
            analog_in: Vec::new(),
            analog_out: Vec::new(),
            digital_in: Vec::new(),
            digital_out: Vec::new(),
        };
        for channel in channels {
            match channel {
                IoChannel::AnalogIn(c) => {
                    let c = Arc::clone(c);
                    service.analog_in.push(
                        ctx.float_property("Value", Cadence::Fast, move || c.read_input())
                            .with_tolerance(Tolerance::Relative(ctx.publisher.signal_tolerance)),
                    );
                }
                IoChannel::AnalogOut(c) => {
                    let reader = Arc::clone(c);
                    let value = ctx
                        .float_property("Value", Cadence::Fast, move || reader.output_value())
                        .with_tolerance(Tolerance::Relative(ctx.publisher.signal_tolerance));
                    service.analog_out.push((Arc::clone(c), value));
                }
                IoChannel::DigitalIn(c) => {
                    let c = Arc::clone(c);
                    service
                        .digital_in
                        .push(ctx.property("State", Cadence::Fast, move || c.is_on()));
                }
                IoChannel::DigitalOut(c) => {
                    let reader = Arc::clone(c);
                    let state = ctx.property("State", Cadence::Fast, move || reader.is_output_on());
                    service.digital_out.push((Arc::clone(c), state));
                }
            }
        }
        service
    }

    /// Channel counts `(analog in, analog out, digital in, digital out)`.
    pub fn channel_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.analog_in.len(),
            self.analog_out.len(),
            self.digital_in.len(),
            self.digital_out.len(),
        )
    }

    /// Value of analog input `index`.
    pub fn analog_in_value(&self, index: usize) -> AppResult<&SampledObservable<f64>> {
        check_index(index, self.analog_in.len())?;
        Ok(&self.analog_in[index])
    }

    /// Value of analog output `index`.
    pub fn analog_out_value(&self, index: usize) -> AppResult<&SampledObservable<f64>> {
        check_index(index, self.analog_out.len())?;
        Ok(&self.analog_out[index].1)
    }

    /// Write analog output `index`.
    pub fn set_analog_output(&self, index: usize, value: f64) -> AppResult<()> {
        self.ctx.ensure_operational("execute SetOutputValue")?;
        check_index(index, self.analog_out.len())?;
        self.analog_out[index].0.write_output(value)?;
        debug!(device = %self.device, index, value, "Analog output written");
        Ok(())
    }

    /// State of digital input `index`.
    pub fn digital_in_state(&self, index: usize) -> AppResult<&SampledObservable<bool>> {
        check_index(index, self.digital_in.len())?;
        Ok(&self.digital_in[index])
    }

    /// State of digital output `index`.
    pub fn digital_out_state(&self, index: usize) -> AppResult<&SampledObservable<bool>> {
        check_index(index, self.digital_out.len())?;
        Ok(&self.digital_out[index].1)
    }

    /// Switch digital output `index`.
    pub fn set_digital_output(&self, index: usize, on: bool) -> AppResult<()> {
        self.ctx.ensure_operational("execute SetOutput")?;
        check_index(index, self.digital_out.len())?;
        self.digital_out[index].0.write_on(on)?;
        debug!(device = %self.device, index, on, "Digital output written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::LabError;
    use crate::hardware::mock::SimChannel;
    use crate::health::SystemState;

    #[test]
    fn test_digital_out_index_validation() {
        let (state, _writer) = SystemState::new();
        let ctx = ServiceContext::new(state, &Settings::default());
        let channels = vec![
            IoChannel::DigitalOut(Arc::new(SimChannel::new("DO1", false))),
            IoChannel::DigitalOut(Arc::new(SimChannel::new("DO2", false))),
            IoChannel::AnalogIn(Arc::new(SimChannel::new("AI1", 2.5))),
        ];
        let service = IoService::new("Nemesys_IO", &channels, &ctx);
        assert_eq!(service.channel_counts(), (1, 0, 0, 2));

        service.set_digital_output(1, true).unwrap();
        assert!(service.digital_out_state(1).unwrap().read().unwrap());
        assert_eq!(service.analog_in_value(0).unwrap().read().unwrap(), 2.5);

        let err = service.set_digital_output(2, true).unwrap_err();
        assert!(matches!(err, LabError::InvalidChannelIndex { index: 2, max: 1 }));
    }
}
