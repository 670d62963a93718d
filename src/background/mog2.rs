use super::types::{BackgroundModel, ForegroundMask, MogSettings};
use anyhow::{anyhow, Result};
use image::{GrayImage, Rgb, RgbImage};
use ndarray::{Array2, Array3, ArrayView3, ArrayViewMut1, ArrayViewMut2, Axis, Zip};

const CHANNELS: usize = 3;
const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// Adaptive Gaussian-mixture background subtractor (Zivkovic's improved GMM)
///
/// Every pixel keeps up to `mixtures` Gaussian components, sorted by weight.
/// Components that explain a large share of the pixel's history are the
/// background; samples that none of them explain are foreground. The number
/// of live components adapts per pixel as weights decay and get pruned.
pub struct Mog2 {
    settings: MogSettings,
    frames_seen: u64,

    // Allocated on the first frame, sized to it
    state: Option<MixtureState>,
}

/// Per-pixel mixture parameters laid out as (row, col, component)
struct MixtureState {
    modes: Array2<u8>,
    weights: Array3<f32>,
    variances: Array3<f32>,
    // Component means, CHANNELS values per component
    means: Array3<f32>,
}

impl MixtureState {
    fn new(width: u32, height: u32, mixtures: usize) -> Self {
        let (rows, cols) = (height as usize, width as usize);
        tracing::debug!(
            "Allocating mixture state for {}x{} with {} components",
            width,
            height,
            mixtures
        );

        Self {
            modes: Array2::zeros((rows, cols)),
            weights: Array3::zeros((rows, cols, mixtures)),
            variances: Array3::zeros((rows, cols, mixtures)),
            means: Array3::zeros((rows, cols, mixtures * CHANNELS)),
        }
    }

    /// (width, height)
    fn dimensions(&self) -> (u32, u32) {
        let (rows, cols) = self.modes.dim();
        (cols as u32, rows as u32)
    }
}

impl Mog2 {
    pub fn new(settings: MogSettings) -> Self {
        Self {
            settings,
            frames_seen: 0,
            state: None,
        }
    }

    fn learning_rate(&self) -> f32 {
        match self.settings.learning_rate {
            Some(rate) if self.frames_seen > 1 => rate,
            _ => {
                let window = (2 * self.frames_seen).min(u64::from(self.settings.history.max(1)));
                1.0 / window.max(1) as f32
            }
        }
    }
}

impl BackgroundModel for Mog2 {
    fn apply(&mut self, frame: &RgbImage) -> Result<ForegroundMask> {
        let _span = tracing::debug_span!("mog2_apply").entered();

        let (width, height) = frame.dimensions();
        if let Some(state) = &self.state {
            if state.dimensions() != (width, height) {
                tracing::warn!(
                    "Frame size changed from {:?} to {:?}, relearning background",
                    state.dimensions(),
                    (width, height)
                );
                self.reset();
            }
        }

        self.frames_seen += 1;
        let alpha = self.learning_rate();
        let settings = self.settings;
        let mixtures = settings.mixtures.max(1);
        let state = self
            .state
            .get_or_insert_with(|| MixtureState::new(width, height, mixtures));

        let (rows, cols) = (height as usize, width as usize);
        let pixels = ArrayView3::from_shape((rows, cols, CHANNELS), frame.as_raw().as_slice())?;
        let mut mask = vec![BACKGROUND; rows * cols];
        let mask_view = ArrayViewMut2::from_shape((rows, cols), mask.as_mut_slice())?;

        Zip::from(&mut state.modes)
            .and(state.weights.lanes_mut(Axis(2)))
            .and(state.variances.lanes_mut(Axis(2)))
            .and(state.means.lanes_mut(Axis(2)))
            .and(pixels.lanes(Axis(2)))
            .and(mask_view)
            .for_each(|modes, weights, variances, means, pixel, out| {
                let sample = [pixel[0] as f32, pixel[1] as f32, pixel[2] as f32];
                let components = Components {
                    weights,
                    variances,
                    means,
                };
                *out = update_pixel(&settings, alpha, modes, components, sample);
            });

        GrayImage::from_raw(width, height, mask)
            .ok_or_else(|| anyhow!("Failed to create mask from {}x{} buffer", width, height))
    }

    fn background_image(&self) -> RgbImage {
        let Some(state) = &self.state else {
            return RgbImage::new(0, 0);
        };

        let (width, height) = state.dimensions();
        let mut image = RgbImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let (row, col) = (y as usize, x as usize);
            let mut sum = [0.0f32; CHANNELS];
            let mut total = 0.0f32;

            for mode in 0..state.modes[[row, col]] as usize {
                let weight = state.weights[[row, col, mode]];
                for (ch, acc) in sum.iter_mut().enumerate() {
                    *acc += weight * state.means[[row, col, mode * CHANNELS + ch]];
                }
                total += weight;
                if total > self.settings.background_ratio {
                    break;
                }
            }

            if total > 0.0 {
                *pixel = Rgb(sum.map(|v| (v / total).round().clamp(0.0, 255.0) as u8));
            }
        }
        image
    }

    fn reset(&mut self) {
        tracing::info!("Resetting background model");
        self.state = None;
        self.frames_seen = 0;
    }
}

/// The components of one pixel
struct Components<'a> {
    weights: ArrayViewMut1<'a, f32>,
    variances: ArrayViewMut1<'a, f32>,
    means: ArrayViewMut1<'a, f32>,
}

impl Components<'_> {
    fn capacity(&self) -> usize {
        self.weights.len()
    }

    fn mean(&self, mode: usize) -> [f32; CHANNELS] {
        let base = mode * CHANNELS;
        [self.means[base], self.means[base + 1], self.means[base + 2]]
    }

    fn set_mean(&mut self, mode: usize, value: [f32; CHANNELS]) {
        for (ch, v) in value.into_iter().enumerate() {
            self.means[mode * CHANNELS + ch] = v;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.weights.swap(a, b);
        self.variances.swap(a, b);
        for ch in 0..CHANNELS {
            self.means.swap(a * CHANNELS + ch, b * CHANNELS + ch);
        }
    }

    /// Move `mode` forward while it outweighs its predecessor; returns its new slot
    fn bubble_up(&mut self, mut mode: usize) -> usize {
        while mode > 0 && self.weights[mode] > self.weights[mode - 1] {
            self.swap(mode, mode - 1);
            mode -= 1;
        }
        mode
    }

    /// Drop zero-weight components, keeping the rest in order
    fn compact(&mut self, live: usize) -> usize {
        let mut kept = 0;
        for mode in 0..live {
            if self.weights[mode] > 0.0 {
                if mode != kept {
                    self.swap(mode, kept);
                }
                kept += 1;
            }
        }
        kept
    }
}

fn squared_distance(a: [f32; CHANNELS], b: [f32; CHANNELS]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Fold one sample into a pixel's mixture and classify it
fn update_pixel(
    settings: &MogSettings,
    alpha: f32,
    modes: &mut u8,
    mut c: Components<'_>,
    sample: [f32; CHANNELS],
) -> u8 {
    let prune = -alpha * settings.complexity_reduction;
    let alpha1 = 1.0 - alpha;
    let mut live = *modes as usize;
    let mut background = false;
    let mut fits = false;
    let mut total = 0.0f32;

    for mode in 0..live {
        let mut weight = alpha1 * c.weights[mode] + prune;
        let mut slot = mode;

        if !fits {
            let var = c.variances[mode];
            let mean = c.mean(mode);
            let dist2 = squared_distance(mean, sample);

            // Heavier components were visited first, so `total` is the weight ahead of this one
            if total < settings.background_ratio && dist2 < settings.var_threshold * var {
                background = true;
            }

            if dist2 < settings.var_threshold_gen * var {
                fits = true;
                weight += alpha;
                let k = alpha / weight;
                c.set_mean(mode, [
                    mean[0] - k * (mean[0] - sample[0]),
                    mean[1] - k * (mean[1] - sample[1]),
                    mean[2] - k * (mean[2] - sample[2]),
                ]);
                c.variances[mode] =
                    (var + k * (dist2 - var)).clamp(settings.var_min, settings.var_max);
                c.weights[mode] = weight;
                slot = c.bubble_up(mode);
            }
        }

        if weight < -prune {
            weight = 0.0;
        }
        c.weights[slot] = weight;
        total += weight;
    }

    live = c.compact(live);
    if total > 0.0 {
        let inv = 1.0 / total;
        for mode in 0..live {
            c.weights[mode] *= inv;
        }
    }

    if !fits {
        // Nothing explains the sample: start a new component, replacing the weakest if full
        let mode = if live == c.capacity() {
            live - 1
        } else {
            live += 1;
            live - 1
        };

        if live == 1 {
            c.weights[mode] = 1.0;
        } else {
            c.weights[mode] = alpha;
            for other in 0..live - 1 {
                c.weights[other] *= alpha1;
            }
        }
        c.set_mean(mode, sample);
        c.variances[mode] = settings.var_init;
        c.bubble_up(mode);
    }

    *modes = live as u8;

    if background {
        BACKGROUND
    } else if settings.shadow_detection && is_shadow(settings, &c, live, sample) {
        settings.shadow_value
    } else {
        FOREGROUND
    }
}

/// A sample is shadow if it is a darker, same-hue version of a background component
fn is_shadow(settings: &MogSettings, c: &Components<'_>, live: usize, sample: [f32; CHANNELS]) -> bool {
    let mut total = 0.0f32;
    for mode in 0..live {
        let mean = c.mean(mode);
        let numerator: f32 = sample.iter().zip(mean.iter()).map(|(s, m)| s * m).sum();
        let denominator: f32 = mean.iter().map(|m| m * m).sum();
        if denominator == 0.0 {
            return false;
        }

        if numerator <= denominator && numerator >= settings.shadow_threshold * denominator {
            let a = numerator / denominator;
            let scaled = mean.map(|m| a * m);
            if squared_distance(scaled, sample) < settings.var_threshold * c.variances[mode] * a * a {
                return true;
            }
        }

        total += c.weights[mode];
        if total > settings.background_ratio {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 200) as u8 + 20, (y * 11 % 200) as u8 + 20, 90])
        })
    }

    fn with_block(base: &RgbImage, x0: u32, y0: u32, size: u32, color: [u8; 3]) -> RgbImage {
        let mut frame = base.clone();
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                frame.put_pixel(x, y, Rgb(color));
            }
        }
        frame
    }

    fn is_empty(mask: &GrayImage) -> bool {
        mask.pixels().all(|p| p[0] == 0)
    }

    #[test]
    fn first_frame_is_all_foreground() {
        let mut model = Mog2::new(MogSettings::default());
        let mask = model.apply(&textured(16, 12)).unwrap();

        assert_eq!(mask.dimensions(), (16, 12));
        assert!(mask.pixels().all(|p| p[0] == FOREGROUND));
    }

    #[test]
    fn static_scene_converges() {
        let scene = textured(32, 24);
        let mut model = Mog2::new(MogSettings::configure(3, false));

        let mut last = None;
        for _ in 0..20 {
            last = Some(model.apply(&scene).unwrap());
        }

        assert!(is_empty(&last.unwrap()));
        assert_eq!(model.background_image(), scene);
    }

    #[test]
    fn changed_block_is_foreground() {
        let scene = textured(40, 30);
        let mut model = Mog2::new(MogSettings::configure(3, false));
        for _ in 0..30 {
            model.apply(&scene).unwrap();
        }

        let moved = with_block(&scene, 10, 8, 12, [250, 250, 250]);
        let mask = model.apply(&moved).unwrap();

        for (x, y, p) in mask.enumerate_pixels() {
            let inside = (10..22).contains(&x) && (8..20).contains(&y);
            assert_eq!(p[0], if inside { FOREGROUND } else { BACKGROUND }, "pixel ({x}, {y})");
        }
        // A single intrusion does not move the background estimate
        assert_eq!(model.background_image(), scene);
    }

    #[test]
    fn alternating_values_both_become_background() {
        let dark = RgbImage::from_pixel(8, 8, Rgb([40, 40, 40]));
        let light = RgbImage::from_pixel(8, 8, Rgb([210, 210, 210]));
        let mut model = Mog2::new(MogSettings::configure(3, false));

        for i in 0..60 {
            model.apply(if i % 2 == 0 { &dark } else { &light }).unwrap();
        }

        assert!(is_empty(&model.apply(&dark).unwrap()));
        assert!(is_empty(&model.apply(&light).unwrap()));
    }

    #[test]
    fn darker_block_is_shadow_when_enabled() {
        let scene = RgbImage::from_pixel(20, 20, Rgb([200, 200, 200]));
        let shaded = with_block(&scene, 5, 5, 6, [120, 120, 120]);

        let mut plain = Mog2::new(MogSettings::configure(3, false));
        let mut shadows = Mog2::new(MogSettings::configure(3, true));
        for _ in 0..30 {
            plain.apply(&scene).unwrap();
            shadows.apply(&scene).unwrap();
        }

        assert_eq!(plain.apply(&shaded).unwrap().get_pixel(7, 7)[0], FOREGROUND);
        let mask = shadows.apply(&shaded).unwrap();
        assert_eq!(mask.get_pixel(7, 7)[0], 127);
        assert_eq!(mask.get_pixel(0, 0)[0], BACKGROUND);
    }

    #[test]
    fn new_frame_size_relearns() {
        let mut model = Mog2::new(MogSettings::default());
        assert_eq!(model.background_image().dimensions(), (0, 0));

        model.apply(&textured(4, 4)).unwrap();
        model.apply(&textured(4, 4)).unwrap();
        let mask = model.apply(&textured(6, 5)).unwrap();

        assert_eq!(mask.dimensions(), (6, 5));
        assert!(mask.pixels().all(|p| p[0] == FOREGROUND));
        assert_eq!(model.background_image().dimensions(), (6, 5));
    }

    #[test]
    fn reset_forgets_the_scene() {
        let scene = textured(10, 10);
        let mut model = Mog2::new(MogSettings::default());
        for _ in 0..5 {
            model.apply(&scene).unwrap();
        }

        model.reset();
        assert_eq!(model.background_image().dimensions(), (0, 0));
        assert!(model.apply(&scene).unwrap().pixels().all(|p| p[0] == FOREGROUND));
    }

    #[test]
    fn fixed_learning_rate_applies_after_first_frame() {
        let settings = MogSettings {
            learning_rate: Some(0.01),
            ..MogSettings::default()
        };
        let mut model = Mog2::new(settings);
        model.frames_seen = 1;
        assert_eq!(model.learning_rate(), 0.5);
        model.frames_seen = 2;
        assert_eq!(model.learning_rate(), 0.01);

        let mut auto = Mog2::new(MogSettings::default());
        auto.frames_seen = 1000;
        assert_eq!(auto.learning_rate(), 1.0 / 500.0);
    }
}
