//! eframe front end: a small undecorated card with the spinning disc, track
//! text, progress and transport buttons.

use std::time::{Duration, Instant};

use eframe::egui::{
    self, epaint::Vertex, Color32, ColorImage, CornerRadius, Mesh, Pos2, Rect, RichText, Sense,
    TextureHandle, TextureOptions, Vec2, ViewportCommand, WindowLevel,
};
use tracing::{info, warn};

use crate::artwork::{default_art, render_disc, ArtworkLoader, DiscSpin};
use crate::config::{Config, ConfigWatcher};
use crate::controller::NowPlayingController;
use crate::session::QueryChannel;
use crate::theme::{Palette, ThemeVariant};

pub const WINDOW_SIZE: [f32; 2] = [360.0, 132.0];
const UNKNOWN_TIME: &str = "--:--";
const CARD_RADIUS: f32 = 18.0;
const DISC_SIZE: f32 = 104.0;
const ART_RATIO: f32 = 0.62;
const TEXTURE_SIZE: usize = 256;
const PROGRESS_HEIGHT: f32 = 4.0;

/// Formats seconds as `M:SS` or `H:MM:SS`.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds } else { 0.0 };
    let total_seconds = seconds.max(0.0).floor() as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub struct NowPlayingApp<Q> {
    controller: NowPlayingController<Q>,
    config: Config,
    config_watcher: Option<ConfigWatcher>,
    palette: Palette,
    disc_spin: DiscSpin,
    art_spin: DiscSpin,
    last_frame: Option<Instant>,
    artwork: ArtworkLoader,
    art_reference: Option<String>,
    art_texture: Option<TextureHandle>,
    default_art_texture: Option<TextureHandle>,
    disc_texture: Option<TextureHandle>,
    scrub_value: f64,
    last_window_level: Option<WindowLevel>,
}

impl<Q: QueryChannel> NowPlayingApp<Q> {
    pub fn new(
        controller: NowPlayingController<Q>,
        config: Config,
        theme: ThemeVariant,
        config_watcher: Option<ConfigWatcher>,
    ) -> Self {
        Self {
            controller,
            palette: theme.palette(),
            disc_spin: DiscSpin::new(config.ui.disc_deg_per_sec),
            art_spin: DiscSpin::new(config.ui.art_deg_per_sec),
            config,
            config_watcher,
            last_frame: None,
            artwork: ArtworkLoader::new(TEXTURE_SIZE),
            art_reference: None,
            art_texture: None,
            default_art_texture: None,
            disc_texture: None,
            scrub_value: 0.0,
            last_window_level: None,
        }
    }

    fn maintain_config_watcher(&mut self) {
        let Some(watcher) = self.config_watcher.as_ref() else {
            return;
        };
        if !watcher.poll_changed() {
            return;
        }
        match Config::load(Some(watcher.path())) {
            Ok(config) => {
                info!(path = %watcher.path().display(), "config reloaded");
                self.apply_config(config);
            }
            Err(err) => warn!(error = %format!("{err:#}"), "keeping previous config"),
        }
    }

    fn apply_config(&mut self, config: Config) {
        self.controller.apply_config(&config);
        self.disc_spin.set_speed(config.ui.disc_deg_per_sec);
        self.art_spin.set_speed(config.ui.art_deg_per_sec);
        if config.ui.theme != self.config.ui.theme {
            self.palette = ThemeVariant::resolve(config.ui.theme).palette();
            self.default_art_texture = None;
        }
        self.config = config;
    }

    fn update_window_level(&mut self, ctx: &egui::Context) {
        let desired = if self.config.ui.always_on_top {
            WindowLevel::AlwaysOnTop
        } else {
            WindowLevel::Normal
        };

        if self.last_window_level != Some(desired) {
            ctx.send_viewport_cmd(ViewportCommand::WindowLevel(desired));
            self.last_window_level = Some(desired);
        }
    }

    fn advance_spin(&mut self, now: Instant) {
        let dt = self
            .last_frame
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);
        let spinning = self.controller.is_playing();
        self.disc_spin.advance(dt, spinning);
        self.art_spin.advance(dt, spinning);
    }

    fn sync_artwork(&mut self, ctx: &egui::Context) {
        let wanted = self.controller.art_reference().map(str::to_owned);
        if wanted != self.art_reference {
            self.art_texture = None;
            self.art_spin.reset();
            if let Some(reference) = wanted.as_deref() {
                self.artwork.request(reference);
            }
            self.art_reference = wanted;
        }

        if let Some(update) = self.artwork.poll() {
            if self.art_reference.as_deref() == Some(update.reference.as_str()) {
                self.art_texture = update
                    .image
                    .map(|image| ctx.load_texture("now-playing.art", image, TextureOptions::LINEAR));
            }
        }
    }

    fn ensure_static_textures(&mut self, ctx: &egui::Context) {
        if self.disc_texture.is_none() {
            let disc = render_disc(TEXTURE_SIZE, ART_RATIO);
            self.disc_texture = Some(ctx.load_texture("now-playing.disc", disc, TextureOptions::LINEAR));
        }
        if self.default_art_texture.is_none() {
            let art: ColorImage = default_art(TEXTURE_SIZE, self.palette.default_art);
            self.default_art_texture =
                Some(ctx.load_texture("now-playing.default-art", art, TextureOptions::LINEAR));
        }
    }

    fn desired_repaint_interval(&self, now: Instant) -> Duration {
        let pulsing = self.controller.is_indeterminate() && self.controller.has_media();
        if self.controller.is_playing() || pulsing {
            Duration::from_millis(16)
        } else {
            self.controller
                .next_wakeup(now)
                .saturating_duration_since(now)
                .clamp(Duration::from_millis(16), Duration::from_millis(500))
        }
    }

    fn render_disc(&self, ui: &mut egui::Ui) {
        let (rect, _) = ui.allocate_exact_size(Vec2::splat(DISC_SIZE), Sense::hover());
        let painter = ui.painter_at(rect);
        if let Some(disc) = self.disc_texture.as_ref() {
            paint_rotated(&painter, rect, disc, self.disc_spin.radians());
        }
        let art_rect = Rect::from_center_size(rect.center(), Vec2::splat(DISC_SIZE * ART_RATIO));
        let art = self.art_texture.as_ref().or(self.default_art_texture.as_ref());
        if let Some(art) = art {
            paint_rotated(&painter, art_rect, art, self.art_spin.radians());
        }
        painter.circle_filled(rect.center(), 3.0, Color32::from_rgb(32, 32, 32));
    }

    fn render_text(&self, ui: &mut egui::Ui) {
        ui.add(
            egui::Label::new(
                RichText::new(self.controller.title())
                    .size(13.0)
                    .strong()
                    .color(self.palette.title),
            )
            .truncate(),
        );
        ui.add(
            egui::Label::new(
                RichText::new(self.controller.artist())
                    .size(11.0)
                    .color(self.palette.artist),
            )
            .truncate(),
        );
    }

    fn render_progress(&mut self, ui: &mut egui::Ui) {
        let width = ui.available_width();
        let duration = self.controller.duration();

        let total_label = if self.controller.is_indeterminate() {
            // The slider is gone, so its drag can never end.
            if self.controller.is_scrubbing() {
                self.controller.cancel_scrub();
            }
            let (rect, _) = ui.allocate_exact_size(Vec2::new(width, PROGRESS_HEIGHT * 2.0), Sense::hover());
            let bar = Rect::from_center_size(rect.center(), Vec2::new(width, PROGRESS_HEIGHT));
            let painter = ui.painter_at(rect);
            painter.rect_filled(bar, CornerRadius::same(2), self.palette.progress_track);
            if self.controller.has_media() {
                let time = ui.ctx().input(|i| i.time) as f32;
                let phase = (time * 0.8).rem_euclid(1.4) - 0.2;
                let segment_width = bar.width() * 0.25;
                let left = (bar.left() + phase * bar.width()).max(bar.left());
                let right = (left + segment_width).min(bar.right());
                if right > left {
                    let segment = Rect::from_min_max(Pos2::new(left, bar.top()), Pos2::new(right, bar.bottom()));
                    painter.rect_filled(segment, CornerRadius::same(2), self.palette.progress[0]);
                }
            }
            UNKNOWN_TIME.to_string()
        } else {
            let mut value = if self.controller.is_scrubbing() {
                self.scrub_value
            } else {
                self.controller.displayed_position()
            };
            ui.spacing_mut().slider_width = width;
            let response = ui.add(
                egui::Slider::new(&mut value, 0.0..=duration)
                    .show_value(false)
                    .trailing_fill(true),
            );

            if response.drag_started() {
                self.controller.begin_scrub();
            }
            if self.controller.is_scrubbing() {
                self.scrub_value = value;
            }
            if response.drag_stopped() {
                self.controller.end_scrub(value);
            } else if response.clicked() && !response.dragged() {
                self.controller.seek(value);
            }
            format_timestamp(duration)
        };

        let shown = if self.controller.is_scrubbing() {
            self.scrub_value
        } else {
            self.controller.displayed_position()
        };
        let elapsed_label = if self.controller.has_media() {
            format_timestamp(shown)
        } else {
            UNKNOWN_TIME.to_string()
        };
        ui.horizontal(|ui| {
            ui.label(RichText::new(elapsed_label).size(10.0).color(self.palette.time));
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(RichText::new(total_label).size(10.0).color(self.palette.time));
            });
        });
    }

    fn render_controls(&mut self, ui: &mut egui::Ui) {
        let icon = self.palette.icon;
        let button = |label: &str, size: f32, fill: Color32| {
            egui::Button::new(RichText::new(label).size(size * 0.42).color(icon))
                .fill(fill)
                .corner_radius(CornerRadius::same((size / 2.0) as u8))
                .min_size(Vec2::splat(size))
        };

        ui.horizontal(|ui| {
            ui.spacing_mut().item_spacing.x = 10.0;
            if ui.add(button("⏮", 30.0, self.palette.button)).clicked() {
                self.controller.previous();
            }
            let play_label = if self.controller.is_playing() { "⏸" } else { "▶" };
            if ui.add(button(play_label, 38.0, self.palette.play_button)).clicked() {
                self.controller.play_pause();
            }
            if ui.add(button("⏭", 30.0, self.palette.button)).clicked() {
                self.controller.next();
            }
        });
    }
}

impl<Q: QueryChannel> eframe::App for NowPlayingApp<Q> {
    fn clear_color(&self, _visuals: &egui::Visuals) -> [f32; 4] {
        [0.0, 0.0, 0.0, 0.0]
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        self.maintain_config_watcher();
        self.update_window_level(ctx);
        self.controller.pump_at(now);
        self.advance_spin(now);
        self.ensure_static_textures(ctx);
        self.sync_artwork(ctx);

        let mut panel_frame = egui::Frame::central_panel(&ctx.style());
        panel_frame.fill = Color32::TRANSPARENT;
        panel_frame.inner_margin = egui::Margin::same(14);

        egui::CentralPanel::default().frame(panel_frame).show(ctx, |ui| {
            let card = ui.max_rect().expand(14.0);
            paint_vertical_gradient(ui.painter(), card, CARD_RADIUS, self.palette.card);

            // Background drag moves the undecorated window.
            let drag = ui.interact(card, ui.id().with("window-drag"), Sense::click_and_drag());
            if drag.drag_started() {
                ctx.send_viewport_cmd(ViewportCommand::StartDrag);
            }

            ui.horizontal(|ui| {
                self.render_disc(ui);
                ui.add_space(10.0);
                ui.vertical(|ui| {
                    ui.spacing_mut().item_spacing.y = 4.0;
                    self.render_text(ui);
                    self.render_progress(ui);
                    self.render_controls(ui);
                });
            });
        });

        ctx.request_repaint_after(self.desired_repaint_interval(now));
    }
}

fn paint_rotated(painter: &egui::Painter, rect: Rect, texture: &TextureHandle, angle: f32) {
    let half = rect.size() * 0.5;
    let center = rect.center();
    let (sin_r, cos_r) = angle.sin_cos();

    let offsets = [
        Vec2::new(-half.x, -half.y),
        Vec2::new(half.x, -half.y),
        Vec2::new(half.x, half.y),
        Vec2::new(-half.x, half.y),
    ];
    let uvs = [
        Pos2::new(0.0, 0.0),
        Pos2::new(1.0, 0.0),
        Pos2::new(1.0, 1.0),
        Pos2::new(0.0, 1.0),
    ];

    let mut mesh = Mesh::with_texture(texture.id());
    for (offset, uv) in offsets.into_iter().zip(uvs) {
        let rotated = Vec2::new(
            offset.x * cos_r - offset.y * sin_r,
            offset.x * sin_r + offset.y * cos_r,
        );
        mesh.vertices.push(Vertex {
            pos: center + rotated,
            uv,
            color: Color32::WHITE,
        });
    }
    mesh.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
    painter.add(egui::Shape::mesh(mesh));
}

/// Top-to-bottom gradient with uniformly rounded corners.
fn paint_vertical_gradient(painter: &egui::Painter, rect: Rect, radius: f32, stops: [Color32; 2]) {
    let height = rect.height().max(1.0);
    let radius = radius.min(rect.width() / 2.0).min(height / 2.0);
    let steps = (height.ceil() as usize).clamp(1, 128);
    let step_height = height / steps as f32;

    let span = |y: f32| -> (f32, f32) {
        let inset = if y < rect.top() + radius {
            radius - (radius * radius - (rect.top() + radius - y).powi(2)).max(0.0).sqrt()
        } else if y > rect.bottom() - radius {
            radius - (radius * radius - (y - (rect.bottom() - radius)).powi(2)).max(0.0).sqrt()
        } else {
            0.0
        };
        (rect.left() + inset, rect.right() - inset)
    };
    let color_at = |y: f32| {
        let t = ((y - rect.top()) / height).clamp(0.0, 1.0);
        let a = egui::Rgba::from(stops[0]);
        let b = egui::Rgba::from(stops[1]);
        Color32::from(a * (1.0 - t) + b * t)
    };

    let mut mesh = Mesh::default();
    for i in 0..steps {
        let y0 = rect.top() + step_height * i as f32;
        let y1 = if i == steps - 1 { rect.bottom() } else { y0 + step_height };
        let (left0, right0) = span(y0);
        let (left1, right1) = span(y1);
        let base = mesh.vertices.len() as u32;
        mesh.colored_vertex(Pos2::new(left0, y0), color_at(y0));
        mesh.colored_vertex(Pos2::new(right0, y0), color_at(y0));
        mesh.colored_vertex(Pos2::new(left1, y1), color_at(y1));
        mesh.colored_vertex(Pos2::new(right1, y1), color_at(y1));
        mesh.add_triangle(base, base + 2, base + 1);
        mesh.add_triangle(base + 1, base + 2, base + 3);
    }
    painter.add(egui::Shape::mesh(mesh));
}
