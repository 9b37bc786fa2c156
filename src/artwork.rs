use std::{
    f32::consts::TAU,
    fs,
    path::Path,
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
};

use anyhow::Context;
use eframe::egui::{Color32, ColorImage, Vec2};
use tracing::debug;

/// Rotation of the disc or the art on it, in degrees per second.
#[derive(Debug, Clone)]
pub struct DiscSpin {
    angle: f32,
    deg_per_sec: f32,
}

impl DiscSpin {
    pub fn new(deg_per_sec: f32) -> Self {
        Self {
            angle: 0.0,
            deg_per_sec,
        }
    }

    pub fn set_speed(&mut self, deg_per_sec: f32) {
        self.deg_per_sec = deg_per_sec;
    }

    pub fn advance(&mut self, dt: f32, spinning: bool) {
        if spinning && dt > 0.0 {
            self.angle = (self.angle + self.deg_per_sec * dt).rem_euclid(360.0);
        }
    }

    pub fn reset(&mut self) {
        self.angle = 0.0;
    }

    pub fn degrees(&self) -> f32 {
        self.angle
    }

    pub fn radians(&self) -> f32 {
        self.angle / 360.0 * TAU
    }
}

pub fn decode_artwork(bytes: &[u8]) -> anyhow::Result<ColorImage> {
    let image = image::load_from_memory(bytes).context("Failed to decode artwork")?;
    let image = image.to_rgba8();
    let size = [image.width() as usize, image.height() as usize];
    let pixels = image.into_raw();
    Ok(ColorImage::from_rgba_unmultiplied(size, &pixels))
}

/// Crops the centre square of `image` into a `size`×`size` circle with a
/// one-pixel soft edge. Outside the circle is transparent.
pub fn circular_art(image: &ColorImage, size: usize) -> ColorImage {
    let mut output = ColorImage::new([size, size], vec![Color32::TRANSPARENT; size * size]);
    if size == 0 {
        return output;
    }

    let radius_px = size as f32 / 2.0;
    let src_width = image.size[0] as f32;
    let src_height = image.size[1] as f32;
    let src_side = src_width.min(src_height);
    let src_origin = Vec2::new((src_width - src_side) / 2.0, (src_height - src_side) / 2.0);
    let scale = src_side / size as f32;

    for y in 0..size {
        for x in 0..size {
            let fx = x as f32 + 0.5;
            let fy = y as f32 + 0.5;
            let dist = ((fx - radius_px).powi(2) + (fy - radius_px).powi(2)).sqrt();
            let coverage = (radius_px - dist + 0.5).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            let color = sample_bilinear(image, src_origin.x + fx * scale, src_origin.y + fy * scale);
            let alpha = (color.a() as f32 * coverage).round() as u8;
            output.pixels[y * size + x] =
                Color32::from_rgba_unmultiplied(color.r(), color.g(), color.b(), alpha);
        }
    }

    output
}

/// Diagonal two-stop gradient circle shown when a track has no artwork.
pub fn default_art(size: usize, stops: [Color32; 2]) -> ColorImage {
    let mut gradient = ColorImage::new([size.max(1), size.max(1)], vec![stops[0]; size.max(1).pow(2)]);
    let span = (2 * size.max(1)) as f32;
    for y in 0..gradient.size[1] {
        for x in 0..gradient.size[0] {
            let t = (x + y) as f32 / span;
            gradient.pixels[y * gradient.size[0] + x] = lerp_color(stops[0], stops[1], t);
        }
    }
    circular_art(&gradient, size)
}

/// Procedural record: dark grooved disc with a transparent centre of
/// `label_ratio` where the art goes.
pub fn render_disc(size: usize, label_ratio: f32) -> ColorImage {
    let mut output = ColorImage::new([size, size], vec![Color32::TRANSPARENT; size * size]);
    if size == 0 {
        return output;
    }

    let radius_px = size as f32 / 2.0;
    let inv_radius = 1.0 / radius_px;
    let label_ratio = label_ratio.clamp(0.1, 0.9);
    let base = Color32::from_rgb(24, 24, 28);
    let groove_count = 14;
    let groove_half_width = 0.012;
    let groove_intensity = 0.35;
    let sheen_angle = -0.35..=0.25;
    let sheen_strength = 0.12;

    for y in 0..size {
        for x in 0..size {
            let dx = (x as f32 + 0.5 - radius_px) * inv_radius;
            let dy = (y as f32 + 0.5 - radius_px) * inv_radius;
            let r = (dx * dx + dy * dy).sqrt();
            if r >= 1.0 || r < label_ratio {
                continue;
            }

            let mut color = base;
            let normalized = ((r - label_ratio) / (1.0 - label_ratio)).clamp(0.0, 1.0);
            let mut groove_shade = 0.0;
            for i in 1..=groove_count {
                let ring_pos = i as f32 / (groove_count as f32 + 1.0);
                let dist = (normalized - ring_pos).abs();
                if dist < groove_half_width {
                    let t = 1.0 - dist / groove_half_width;
                    groove_shade += t * t;
                }
            }
            if groove_shade > 0.0 {
                color = lighten(color, groove_shade * groove_intensity * 0.25);
            }

            let angle = dy.atan2(dx);
            if sheen_angle.contains(&angle) {
                let t = (angle - sheen_angle.start()) / (sheen_angle.end() - sheen_angle.start());
                color = lighten(color, (1.0 - t.clamp(0.0, 1.0)).powf(2.2) * sheen_strength);
            }
            if r > 0.9 {
                color = darken(color, (r - 0.9) / 0.1 * 0.4);
            }

            let alpha = if r > 0.99 {
                (((1.0 - r) / 0.01).clamp(0.0, 1.0) * 255.0) as u8
            } else {
                255
            };
            output.pixels[y * size + x] =
                Color32::from_rgba_unmultiplied(color.r(), color.g(), color.b(), alpha);
        }
    }

    output
}

fn sample_bilinear(image: &ColorImage, x: f32, y: f32) -> Color32 {
    let width = image.size[0] as i32;
    let height = image.size[1] as i32;
    if width == 0 || height == 0 {
        return Color32::TRANSPARENT;
    }

    let clamped_x = (x - 0.5).clamp(0.0, (width - 1) as f32);
    let clamped_y = (y - 0.5).clamp(0.0, (height - 1) as f32);

    let x0 = clamped_x.floor() as i32;
    let y0 = clamped_y.floor() as i32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let tx = clamped_x - x0 as f32;
    let ty = clamped_y - y0 as f32;

    let at = |px: i32, py: i32| image.pixels[py as usize * image.size[0] + px as usize];
    let top = lerp_color(at(x0, y0), at(x1, y0), tx);
    let bottom = lerp_color(at(x0, y1), at(x1, y1), tx);
    lerp_color(top, bottom, ty)
}

fn lerp_color(a: Color32, b: Color32, t: f32) -> Color32 {
    let t = t.clamp(0.0, 1.0);
    let mix = |from: u8, to: u8| (from as f32 * (1.0 - t) + to as f32 * t).round() as u8;
    Color32::from_rgba_unmultiplied(
        mix(a.r(), b.r()),
        mix(a.g(), b.g()),
        mix(a.b(), b.b()),
        mix(a.a(), b.a()),
    )
}

fn darken(color: Color32, amount: f32) -> Color32 {
    let amount = amount.clamp(0.0, 1.0);
    let scale = |c: u8| (c as f32 * (1.0 - amount)).round().clamp(0.0, 255.0) as u8;
    Color32::from_rgba_unmultiplied(scale(color.r()), scale(color.g()), scale(color.b()), color.a())
}

fn lighten(color: Color32, amount: f32) -> Color32 {
    let amount = amount.clamp(0.0, 1.0);
    let lift = |c: u8| (c as f32 + (255.0 - c as f32) * amount).round().clamp(0.0, 255.0) as u8;
    Color32::from_rgba_unmultiplied(lift(color.r()), lift(color.g()), lift(color.b()), color.a())
}

pub struct ArtworkUpdate {
    pub reference: String,
    /// `None` when the reference could not be turned into an image.
    pub image: Option<ColorImage>,
}

struct ArtworkMessage {
    request_id: u64,
    reference: String,
    result: anyhow::Result<Option<ColorImage>>,
}

/// Loads and crops cover art off the UI thread. Only the latest request is
/// honoured; answers to superseded requests are discarded.
pub struct ArtworkLoader {
    size: usize,
    rx: Option<Receiver<ArtworkMessage>>,
    inflight_request: Option<u64>,
    inflight_reference: Option<String>,
    next_request_id: u64,
}

impl ArtworkLoader {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            rx: None,
            inflight_request: None,
            inflight_reference: None,
            next_request_id: 1,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.inflight_request.is_some()
    }

    pub fn request(&mut self, reference: &str) {
        if self.inflight_reference.as_deref() == Some(reference) {
            return;
        }

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let size = self.size;
        let reference = reference.to_string();

        let (tx, rx) = mpsc::channel();
        self.rx = Some(rx);
        self.inflight_request = Some(request_id);
        self.inflight_reference = Some(reference.clone());

        thread::spawn(move || {
            let result = load_artwork(&reference, size);
            let _ = tx.send(ArtworkMessage {
                request_id,
                reference,
                result,
            });
        });
    }

    pub fn poll(&mut self) -> Option<ArtworkUpdate> {
        let rx = self.rx.as_ref()?;
        let message = match rx.try_recv() {
            Ok(message) => message,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => {
                self.rx = None;
                self.inflight_request = None;
                self.inflight_reference = None;
                return None;
            }
        };
        self.rx = None;
        if Some(message.request_id) != self.inflight_request {
            return None;
        }
        self.inflight_request = None;
        self.inflight_reference = None;

        let image = match message.result {
            Ok(image) => image,
            Err(err) => {
                debug!(reference = %message.reference, error = %format!("{err:#}"), "artwork unavailable");
                None
            }
        };
        Some(ArtworkUpdate {
            reference: message.reference,
            image,
        })
    }
}

/// Reads a local artwork file. Remote URLs are not fetched and yield
/// `Ok(None)`.
pub fn load_artwork(reference: &str, size: usize) -> anyhow::Result<Option<ColorImage>> {
    if reference.contains("://") {
        debug!(reference, "skipping remote artwork");
        return Ok(None);
    }
    let path = Path::new(reference);
    let bytes = fs::read(path).with_context(|| format!("Failed to read artwork: {}", path.display()))?;
    let image = decode_artwork(&bytes)?;
    Ok(Some(circular_art(&image, size)))
}
