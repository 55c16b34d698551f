use ndarray::Zip;

use crate::consts::{DN_SCALE, EPSILON};
use crate::error::{LiveStackError, Result};
use crate::frame::{Frame, FrameData, Image};

/// Master calibration frames, each optional.
#[derive(Clone, Debug, Default)]
pub struct CalibrationMasters {
    pub bias: Option<Image>,
    pub dark: Option<Image>,
    pub flat: Option<Image>,
}

impl CalibrationMasters {
    pub fn is_empty(&self) -> bool {
        self.bias.is_none() && self.dark.is_none() && self.flat.is_none()
    }
}

/// Dark scale factor for a light frame of `exposure` seconds.
///
/// Only applied when dark optimisation is on and both exposures are known
/// and positive; otherwise the dark is subtracted as-is.
pub fn dark_scale(optimize_dark: bool, dark_exposure: f64, exposure: Option<f64>) -> f32 {
    match exposure {
        Some(t) if optimize_dark && dark_exposure > 0.0 && t > 0.0 => (t / dark_exposure) as f32,
        _ => 1.0,
    }
}

/// Master plane for light channel `channel`. A mono master applies to every
/// channel of a colour light.
fn master_plane<'a>(master: &'a Image, light: &FrameData, channel: usize) -> Result<&'a Frame> {
    light.check_geometry(&master.data)?;
    let planes = master.data.channels();
    match planes.len() {
        1 => Ok(planes[0]),
        n if n == light.channel_count() => Ok(planes[channel]),
        n => Err(LiveStackError::ChannelMismatch {
            expected: light.channel_count(),
            actual: n,
        }),
    }
}

/// `(light - bias - dark_scale * dark) / (flat / mean(flat)) + pedestal`,
/// per channel. Flat pixels at or below zero leave the pixel undivided.
pub fn calibrate(
    light: &Image,
    masters: &CalibrationMasters,
    dark_scale: f32,
    pedestal: u16,
) -> Result<Image> {
    let pedestal = pedestal as f32 / DN_SCALE;

    let data = light.data.try_map_channels(|ch, frame| {
        let mut out = frame.data.clone();

        if let Some(bias) = &masters.bias {
            out -= &master_plane(bias, &light.data, ch)?.data;
        }
        if let Some(dark) = &masters.dark {
            let dark = master_plane(dark, &light.data, ch)?;
            Zip::from(&mut out)
                .and(&dark.data)
                .for_each(|v, &d| *v -= dark_scale * d);
        }
        if let Some(flat) = &masters.flat {
            let flat = master_plane(flat, &light.data, ch)?;
            let mean = flat.mean();
            if mean > EPSILON {
                Zip::from(&mut out).and(&flat.data).for_each(|v, &f| {
                    let norm = f / mean;
                    if norm > EPSILON {
                        *v /= norm;
                    }
                });
            }
        }
        if pedestal != 0.0 {
            out.mapv_inplace(|v| v + pedestal);
        }

        Ok(Frame::new(out, frame.original_bit_depth))
    })?;

    Ok(light.with_data(data))
}
