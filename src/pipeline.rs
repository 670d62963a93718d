use crate::background::BackgroundModel;
use crate::capture::CaptureSource;
use crate::detection::{
    clean_mask, draw_contours, extract_contours, Contour, OUTLINE_COLOR, OUTLINE_THICKNESS,
};
use crate::output::OutputSink;
use anyhow::{ensure, Context, Result};
use std::time::{Duration, Instant};

/// Frames between timing reports
const STATS_INTERVAL: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    KeyPressed,
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped(StopReason),
}

#[derive(Default)]
struct StageTimings {
    frames: u64,
    capture: Duration,
    model: Duration,
    detect: Duration,
    output: Duration,
}

impl StageTimings {
    fn log(&self, contours: usize) {
        let per_frame = |total: Duration| total.as_secs_f64() * 1000.0 / self.frames as f64;
        let capture_ms = per_frame(self.capture);
        let model_ms = per_frame(self.model);
        let detect_ms = per_frame(self.detect);
        let output_ms = per_frame(self.output);
        let total_ms = capture_ms + model_ms + detect_ms + output_ms;

        tracing::info!(
            "Frame {}: capture={:.1}ms, model={:.1}ms, detect={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}, contours={}",
            self.frames,
            capture_ms,
            model_ms,
            detect_ms,
            output_ms,
            total_ms,
            1000.0 / total_ms.max(f64::EPSILON),
            contours
        );
    }
}

/// Capture → model → clean → contours → draw → show, once per tick until stopped
pub struct MainLoop {
    source: Box<dyn CaptureSource>,
    model: Box<dyn BackgroundModel>,
    wait: Duration,
    state: LoopState,
    contours: Vec<Contour>,
    timings: StageTimings,
}

impl MainLoop {
    pub fn new(
        source: Box<dyn CaptureSource>,
        model: Box<dyn BackgroundModel>,
        wait: Duration,
    ) -> Self {
        Self {
            source,
            model,
            wait,
            state: LoopState::Running,
            contours: Vec::new(),
            timings: StageTimings::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Bounded wait between ticks
    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.source.resolution()
    }

    /// Contours found in the most recent frame
    pub fn contours(&self) -> &[Contour] {
        &self.contours
    }

    /// Run one iteration. Once stopped, ticking again does nothing.
    pub fn tick<O: OutputSink + ?Sized>(&mut self, output: &mut O) -> Result<LoopState> {
        if let LoopState::Stopped(_) = self.state {
            return Ok(self.state);
        }

        let capture_start = Instant::now();
        let frame = {
            let _span = tracing::debug_span!("capture").entered();
            self.source
                .capture_frame()
                .context("Failed to capture frame")?
        };
        let Some(mut frame) = frame else {
            tracing::info!("End of stream");
            self.state = LoopState::Stopped(StopReason::EndOfStream);
            return Ok(self.state);
        };
        self.timings.capture += capture_start.elapsed();

        let model_start = Instant::now();
        let mut mask = self
            .model
            .apply(&frame)
            .context("Failed to update background model")?;
        let background = self.model.background_image();
        ensure!(
            mask.dimensions() == frame.dimensions(),
            "Mask is {:?} but frame is {:?}",
            mask.dimensions(),
            frame.dimensions()
        );
        self.timings.model += model_start.elapsed();

        let detect_start = Instant::now();
        clean_mask(&mut mask);
        self.contours = extract_contours(&mask);
        tracing::debug!(
            "{} contours: {:?}",
            self.contours.len(),
            self.contours.iter().filter_map(Contour::bounds).collect::<Vec<_>>()
        );
        draw_contours(&mut frame, &self.contours, OUTLINE_COLOR, OUTLINE_THICKNESS);
        self.timings.detect += detect_start.elapsed();

        let output_start = Instant::now();
        output
            .write_frames(&frame, &background)
            .context("Failed to display frames")?;
        self.timings.output += output_start.elapsed();

        self.timings.frames += 1;
        if self.timings.frames % STATS_INTERVAL == 0 {
            self.timings.log(self.contours.len());
        }

        if output.poll_key(self.wait)? {
            tracing::info!("Key pressed, stopping");
            self.state = LoopState::Stopped(StopReason::KeyPressed);
        }
        Ok(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{ForegroundMask, Mog2, MogSettings};
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::collections::VecDeque;

    struct ScriptedSource {
        frames: VecDeque<RgbImage>,
    }

    impl ScriptedSource {
        fn new(frames: impl IntoIterator<Item = RgbImage>) -> Box<Self> {
            Box::new(Self {
                frames: frames.into_iter().collect(),
            })
        }
    }

    impl CaptureSource for ScriptedSource {
        fn capture_frame(&mut self) -> Result<Option<RgbImage>> {
            Ok(self.frames.pop_front())
        }

        fn resolution(&self) -> (u32, u32) {
            (40, 30)
        }
    }

    /// Returns the same mask for every frame
    struct FixedMask {
        mask: GrayImage,
    }

    impl BackgroundModel for FixedMask {
        fn apply(&mut self, _frame: &RgbImage) -> Result<ForegroundMask> {
            Ok(self.mask.clone())
        }

        fn background_image(&self) -> RgbImage {
            RgbImage::from_pixel(self.mask.width(), self.mask.height(), Rgb([9, 9, 9]))
        }

        fn reset(&mut self) {}
    }

    /// Records what was shown; reports a key press on the given poll
    #[derive(Default)]
    struct RecordingOutput {
        shown: Vec<(RgbImage, RgbImage)>,
        polls: usize,
        key_on_poll: Option<usize>,
    }

    impl OutputSink for RecordingOutput {
        fn write_frames(&mut self, annotated: &RgbImage, background: &RgbImage) -> Result<()> {
            self.shown.push((annotated.clone(), background.clone()));
            Ok(())
        }

        fn poll_key(&mut self, _timeout: Duration) -> Result<bool> {
            self.polls += 1;
            Ok(self.key_on_poll == Some(self.polls))
        }
    }

    fn gray(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([60, 60, 60]))
    }

    fn block_mask(width: u32, height: u32) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for y in 10..20 {
            for x in 10..20 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        // Speckle the cleaner should drop
        mask.put_pixel(33, 3, Luma([255]));
        mask
    }

    fn fixed_loop(frames: usize) -> MainLoop {
        MainLoop::new(
            ScriptedSource::new((0..frames).map(|_| gray(40, 30))),
            Box::new(FixedMask {
                mask: block_mask(40, 30),
            }),
            Duration::from_millis(30),
        )
    }

    #[test]
    fn stops_on_the_tick_a_key_arrives() {
        let mut main_loop = fixed_loop(100);
        let mut output = RecordingOutput {
            key_on_poll: Some(3),
            ..Default::default()
        };

        assert_eq!(main_loop.tick(&mut output).unwrap(), LoopState::Running);
        assert_eq!(main_loop.tick(&mut output).unwrap(), LoopState::Running);
        assert_eq!(
            main_loop.tick(&mut output).unwrap(),
            LoopState::Stopped(StopReason::KeyPressed)
        );

        // Stopped is terminal
        assert_eq!(
            main_loop.tick(&mut output).unwrap(),
            LoopState::Stopped(StopReason::KeyPressed)
        );
        assert_eq!(output.shown.len(), 3);
        assert_eq!(output.polls, 3);
    }

    #[test]
    fn end_of_stream_stops_normally() {
        let mut main_loop = fixed_loop(4);
        let mut output = RecordingOutput::default();

        let mut ticks = 0;
        while main_loop.tick(&mut output).unwrap() == LoopState::Running {
            ticks += 1;
        }

        assert_eq!(ticks, 4);
        assert_eq!(output.shown.len(), 4);
        assert_eq!(main_loop.state(), LoopState::Stopped(StopReason::EndOfStream));
    }

    #[test]
    fn outlines_cleaned_regions_and_shows_background() {
        let mut main_loop = fixed_loop(1);
        let mut output = RecordingOutput::default();

        main_loop.tick(&mut output).unwrap();

        assert_eq!(main_loop.contours().len(), 1);
        assert_eq!(main_loop.contours()[0].bounds(), Some((10, 10, 19, 19)));

        let (annotated, background) = &output.shown[0];
        assert_eq!(*annotated.get_pixel(10, 10), OUTLINE_COLOR);
        assert_eq!(*annotated.get_pixel(15, 15), Rgb([60, 60, 60]));
        assert_eq!(*annotated.get_pixel(33, 3), Rgb([60, 60, 60]));
        assert_eq!(*background, RgbImage::from_pixel(40, 30, Rgb([9, 9, 9])));
    }

    #[test]
    fn mismatched_mask_is_an_error() {
        let mut main_loop = MainLoop::new(
            ScriptedSource::new([gray(40, 30)]),
            Box::new(FixedMask {
                mask: GrayImage::new(8, 8),
            }),
            Duration::ZERO,
        );

        assert!(main_loop.tick(&mut RecordingOutput::default()).is_err());
    }

    #[test]
    fn detects_an_object_entering_a_static_scene() {
        let scene = RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 5) as u8, (y * 7) as u8, 100]));
        let mut entered = scene.clone();
        for y in 8..20 {
            for x in 10..22 {
                entered.put_pixel(x, y, Rgb([250, 250, 20]));
            }
        }

        let warmup = 30;
        let frames = std::iter::repeat(scene.clone())
            .take(warmup)
            .chain(std::iter::once(entered));
        let mut main_loop = MainLoop::new(
            ScriptedSource::new(frames),
            Box::new(Mog2::new(MogSettings::configure(3, false))),
            Duration::ZERO,
        );
        let mut output = RecordingOutput::default();

        for _ in 0..warmup {
            main_loop.tick(&mut output).unwrap();
        }
        assert!(main_loop.contours().is_empty());
        assert_eq!(output.shown.last().unwrap().1, scene);

        main_loop.tick(&mut output).unwrap();
        assert_eq!(main_loop.contours().len(), 1);
        assert_eq!(main_loop.contours()[0].bounds(), Some((10, 8, 21, 19)));

        assert_eq!(main_loop.tick(&mut output).unwrap(), LoopState::Stopped(StopReason::EndOfStream));
    }
}
