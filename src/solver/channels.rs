//! Image channels and grey-level alignment

use tracing::{debug, warn};

use crate::error::Result;
use crate::field::ScalarField;
use crate::utils::threshold_mask;

/// Template and target of one channel, on the same lattice
#[derive(Debug, Clone)]
pub struct ChannelImages {
    pub template: ScalarField,
    pub target: ScalarField,
}

impl ChannelImages {
    pub fn new(template: ScalarField, target: ScalarField) -> Result<Self> {
        template.grid().check_same(target.grid())?;
        Ok(Self { template, target })
    }
}

/// Mean and standard deviation of the voxels strictly above `padding`
fn foreground_stats(field: &ScalarField, padding: f64) -> Option<(f64, f64)> {
    let foreground = threshold_mask(field, padding);
    let mut n = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for (&v, &fg) in field.data().iter().zip(foreground.iter()) {
        if fg != 0 {
            n += 1;
            sum += v;
            sum_sq += v * v;
        }
    }
    if n == 0 {
        return None;
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    Some((mean, var.sqrt()))
}

/// Linear rescaling of the template foreground onto the target's mean and spread
///
/// Voxels at or below `template_padding` are left untouched. Channels without
/// foreground, or with a flat template foreground, are skipped with a warning.
/// Returns the applied (scale, offset).
pub fn align_grey_levels(
    channel: &mut ChannelImages,
    template_padding: f64,
    target_padding: f64,
) -> Option<(f64, f64)> {
    let src = foreground_stats(&channel.template, template_padding);
    let trg = foreground_stats(&channel.target, target_padding);
    let ((ms, ss), (mt, st)) = match (src, trg) {
        (Some(s), Some(t)) => (s, t),
        _ => {
            warn!("grey-level alignment skipped: no foreground above the padding values");
            return None;
        }
    };
    if ss <= f64::EPSILON * ms.abs().max(1.0) {
        warn!("grey-level alignment skipped: template foreground is flat");
        return None;
    }

    let scale = st / ss;
    let offset = mt - scale * ms;
    for v in channel.template.data_mut() {
        if *v > template_padding {
            *v = scale * *v + offset;
        }
    }
    debug!("grey-level alignment: scale {:.4}, offset {:.4}", scale, offset);
    Some((scale, offset))
}
