use serde::{Deserialize, Serialize};

pub type Channel = u32;
pub type EventNumber = u32;

/// A digitized ADC sample.
pub type Sample = i16;
/// An unsigned ADC distance from baseline, e.g. a peak amplitude.
pub type Intensity = u16;

/// One channel's raw digitized waveform for one event, as handed over by the
/// fragment decoder, together with the pedestal the hardware reported (if any).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawDigits {
    pub channel: Channel,
    pub pedestal: Option<Sample>,
    pub samples: Vec<Sample>,
}

impl RawDigits {
    pub fn new(channel: Channel, samples: Vec<Sample>) -> Self {
        Self {
            channel,
            pedestal: None,
            samples,
        }
    }

    pub fn with_pedestal(mut self, pedestal: Sample) -> Self {
        self.pedestal = Some(pedestal);
        self
    }
}

/// All channels of one readout unit for one event.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: EventNumber,
    pub digits: Vec<RawDigits>,
}
