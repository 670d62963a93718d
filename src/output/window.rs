use super::OutputSink;
use crate::config::{BACKGROUND_WINDOW, DETECTED_WINDOW};
use crate::pipeline::{LoopState, MainLoop, StopReason};
use anyhow::{anyhow, Result};
use egui::{ColorImage, TextureHandle, TextureOptions, ViewportBuilder, ViewportCommand, ViewportId};
use image::RgbImage;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

type Outcome = Rc<RefCell<Option<Result<StopReason>>>>;

/// The two persistent display surfaces
#[derive(Default)]
struct Surfaces {
    detected: Option<TextureHandle>,
    background: Option<TextureHandle>,
    // Key seen by the background window since the last poll
    pending_key: bool,
}

/// Sink handed to the main loop for one egui update
struct WindowOutput<'a> {
    ctx: &'a egui::Context,
    surfaces: &'a mut Surfaces,
}

impl OutputSink for WindowOutput<'_> {
    fn write_frames(&mut self, annotated: &RgbImage, background: &RgbImage) -> Result<()> {
        upload(self.ctx, &mut self.surfaces.detected, "detected_frame", annotated);
        upload(self.ctx, &mut self.surfaces.background, "background_frame", background);
        Ok(())
    }

    fn poll_key(&mut self, timeout: Duration) -> Result<bool> {
        let pressed = self.ctx.input(|i| any_key_pressed(&i.events));
        let pressed = pressed || std::mem::take(&mut self.surfaces.pending_key);
        // egui owns the event loop: wait for input or the timeout before the next tick
        self.ctx.request_repaint_after(timeout);
        Ok(pressed)
    }
}

fn upload(ctx: &egui::Context, slot: &mut Option<TextureHandle>, name: &str, image: &RgbImage) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }

    let color_image = ColorImage::from_rgb(
        [image.width() as usize, image.height() as usize],
        image.as_raw().as_slice(),
    );

    match slot {
        Some(handle) => handle.set(color_image, TextureOptions::default()),
        None => *slot = Some(ctx.load_texture(name, color_image, TextureOptions::default())),
    }
}

/// Whether `wait` has passed on the egui clock since the last tick
fn tick_due(last_tick: Option<f64>, now: f64, wait: Duration) -> bool {
    last_tick.map_or(true, |last| now - last >= wait.as_secs_f64())
}

fn any_key_pressed(events: &[egui::Event]) -> bool {
    events.iter().any(|event| {
        matches!(
            event,
            egui::Event::Key {
                pressed: true,
                repeat: false,
                ..
            }
        )
    })
}

struct DetectorApp {
    main_loop: MainLoop,
    surfaces: Surfaces,
    outcome: Outcome,
    // A failed tick leaves the loop Running; never tick it again
    failed: bool,
    // egui time of the last tick; pointer input repaints in between
    last_tick: Option<f64>,
}

impl DetectorApp {
    fn finish(&mut self, ctx: &egui::Context, result: Result<StopReason>) {
        *self.outcome.borrow_mut() = Some(result);
        ctx.send_viewport_cmd(ViewportCommand::Close);
    }
}

impl eframe::App for DetectorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = ctx.input(|i| i.time);
        let wait = self.main_loop.wait();
        let running = !self.failed && self.main_loop.state() == LoopState::Running;

        if running && !tick_due(self.last_tick, now, wait) {
            // Early repaint: hold on to keys until the tick is due
            self.surfaces.pending_key |= ctx.input(|i| any_key_pressed(&i.events));
            let elapsed = self.last_tick.map_or(0.0, |last| (now - last).max(0.0));
            ctx.request_repaint_after(wait.saturating_sub(Duration::from_secs_f64(elapsed)));
        } else if running {
            self.last_tick = Some(now);
            let mut output = WindowOutput {
                ctx,
                surfaces: &mut self.surfaces,
            };
            match self.main_loop.tick(&mut output) {
                Ok(LoopState::Running) => {}
                Ok(LoopState::Stopped(reason)) => self.finish(ctx, Ok(reason)),
                Err(e) => {
                    tracing::error!("Pipeline failed: {:#}", e);
                    self.failed = true;
                    self.finish(ctx, Err(e));
                }
            }
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.label(format!("{} objects", self.main_loop.contours().len()));
            if let Some(texture) = &self.surfaces.detected {
                ui.image(texture);
            }
        });

        let background = self.surfaces.background.clone();
        let (width, height) = self.main_loop.resolution();
        let key_in_background = ctx.show_viewport_immediate(
            ViewportId::from_hash_of(BACKGROUND_WINDOW),
            ViewportBuilder::default()
                .with_title(BACKGROUND_WINDOW)
                .with_inner_size(egui::vec2(width as f32, height as f32)),
            |ctx, _class| {
                egui::CentralPanel::default().show(ctx, |ui| {
                    if let Some(texture) = &background {
                        ui.image(texture);
                    }
                });
                ctx.input(|i| any_key_pressed(&i.events))
            },
        );
        self.surfaces.pending_key |= key_in_background;
    }
}

/// Open both windows and drive `main_loop` from the display's event loop.
///
/// Returns why the loop stopped, or `None` if the window was closed first.
pub fn run_windows(main_loop: MainLoop) -> Result<Option<StopReason>> {
    let (width, height) = main_loop.resolution();
    let options = eframe::NativeOptions {
        viewport: ViewportBuilder::default()
            .with_inner_size(egui::vec2(width as f32, height as f32))
            .with_title(DETECTED_WINDOW),
        ..Default::default()
    };

    let outcome: Outcome = Rc::new(RefCell::new(None));
    let app_outcome = Rc::clone(&outcome);

    eframe::run_native(
        DETECTED_WINDOW,
        options,
        Box::new(move |_cc| {
            Ok(Box::new(DetectorApp {
                main_loop,
                surfaces: Surfaces::default(),
                outcome: app_outcome,
                failed: false,
                last_tick: None,
            }))
        }),
    )
    .map_err(|e| anyhow!("Display failed: {}", e))?;

    let result = outcome.borrow_mut().take();
    result.transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::{Event, Key, Modifiers};

    fn key(pressed: bool, repeat: bool) -> Event {
        Event::Key {
            key: Key::Q,
            physical_key: None,
            pressed,
            repeat,
            modifiers: Modifiers::NONE,
        }
    }

    /// Poll once inside a headless egui frame carrying `events`
    fn poll(ctx: &egui::Context, surfaces: &mut Surfaces, events: Vec<Event>) -> bool {
        let mut pressed = false;
        let input = egui::RawInput {
            events,
            ..Default::default()
        };
        let _ = ctx.run(input, |ctx| {
            let mut output = WindowOutput {
                ctx,
                surfaces: &mut *surfaces,
            };
            pressed = output.poll_key(Duration::from_millis(30)).unwrap();
        });
        pressed
    }

    #[test]
    fn key_in_the_detected_window_is_seen() {
        let ctx = egui::Context::default();
        let mut surfaces = Surfaces::default();

        assert!(!poll(&ctx, &mut surfaces, vec![]));
        assert!(poll(&ctx, &mut surfaces, vec![key(true, false)]));
        assert!(!poll(&ctx, &mut surfaces, vec![]));
    }

    #[test]
    fn key_in_the_background_window_stops_the_next_poll_once() {
        let ctx = egui::Context::default();
        let mut surfaces = Surfaces {
            pending_key: true,
            ..Default::default()
        };

        assert!(poll(&ctx, &mut surfaces, vec![]));
        assert!(!surfaces.pending_key);
        assert!(!poll(&ctx, &mut surfaces, vec![]));
    }

    #[test]
    fn ticks_wait_for_the_egui_clock() {
        let wait = Duration::from_millis(30);

        assert!(tick_due(None, 0.0, wait));
        assert!(!tick_due(Some(1.0), 1.01, wait));
        assert!(tick_due(Some(1.0), 1.05, wait));
        assert!(tick_due(Some(1.0), 2.0, wait));
    }

    #[test]
    fn only_fresh_presses_count() {
        assert!(!any_key_pressed(&[]));
        assert!(!any_key_pressed(&[key(false, false)]));
        assert!(!any_key_pressed(&[key(true, true)]));
        assert!(any_key_pressed(&[Event::PointerGone, key(true, false)]));
    }
}
