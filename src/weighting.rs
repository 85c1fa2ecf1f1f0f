/// Per-pixel loss weighting policies
///
/// A dataset attaches a weight tensor to every sample it serves, so the
/// training loop never special-cases unweighted data. The weight for a pixel
/// comes from a localized error function evaluated once over the sample
/// extent at load time.

/// Maps pixel coordinates `(x, y)` to a loss weight.
pub type LocalizedErrorFn = fn(usize, usize) -> f32;

/// Uniform weighting: every pixel contributes equally to the loss.
pub fn default_localized_error(_x: usize, _y: usize) -> f32 {
    1.0
}

/// KITTI road-scene weighting.
///
/// Rows above the horizon band never contain road surface in this camera
/// setup, so their labels carry no usable signal; they are weighted to zero,
/// with a short ramp up to full weight below the band.
pub fn kitti_localized_error(_x: usize, y: usize) -> f32 {
    const HORIZON: usize = 160;
    const RAMP: usize = 32;
    if y < HORIZON {
        0.0
    } else if y < HORIZON + RAMP {
        (y - HORIZON) as f32 / RAMP as f32
    } else {
        1.0
    }
}

/// Resolve a weighting policy by its configuration name.
///
/// Unrecognized names fall back to uniform weighting rather than failing.
pub fn localized_error_by_name(name: &str) -> LocalizedErrorFn {
    match name {
        "kitti" => {
            log::debug!("using kitti localized error weighting");
            kitti_localized_error
        }
        "default" => default_localized_error,
        other => {
            log::warn!("unknown localized_error policy '{other}', using uniform weighting");
            default_localized_error
        }
    }
}
