//! Startup banner: a small image drawn with half-block characters.
//!
//! Each terminal cell shows two vertically stacked pixels, using `▀` with the
//! upper pixel as foreground and the lower one as background.

use std::fmt::Write as _;
use std::path::Path;

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};

use deepchat_core::Error;

/// Pixels with less alpha than this are drawn as terminal background.
const ALPHA_CUTOFF: u8 = 128;

/// Load `path` and render it at most `width` columns wide.
pub fn load_banner(path: &Path, width: u32) -> Result<String, Error> {
    if !path.exists() {
        return Err(Error::asset_missing(format!("{} does not exist", path.display())));
    }

    let img = image::open(path)
        .map_err(|e| Error::asset_missing(format!("{}: {}", path.display(), e)))?;

    // Two pixel rows per text row keeps square pixels roughly square.
    let width = width.max(1);
    let resized = img.resize(width, width, FilterType::Triangle).to_rgba8();
    Ok(render_half_blocks(&resized))
}

/// Banner text shown under the logo.
pub fn title(model: &str) -> String {
    format!("Mini ChatGPT, driven by {}", model)
}

fn visible(pixel: &Rgba<u8>) -> Option<(u8, u8, u8)> {
    let [r, g, b, a] = pixel.0;
    (a >= ALPHA_CUTOFF).then_some((r, g, b))
}

/// Render an image as ANSI half-blocks, one text row per two pixel rows.
pub fn render_half_blocks(img: &RgbaImage) -> String {
    let (width, height) = img.dimensions();
    let mut out = String::new();

    for y in (0..height).step_by(2) {
        for x in 0..width {
            let top = visible(img.get_pixel(x, y));
            let bottom = if y + 1 < height {
                visible(img.get_pixel(x, y + 1))
            } else {
                None
            };

            let _ = match (top, bottom) {
                (Some((r, g, b)), Some((br, bg, bb))) => write!(
                    out,
                    "\x1b[38;2;{};{};{}m\x1b[48;2;{};{};{}m▀",
                    r, g, b, br, bg, bb
                ),
                (Some((r, g, b)), None) => write!(out, "\x1b[38;2;{};{};{}m▀", r, g, b),
                (None, Some((r, g, b))) => write!(out, "\x1b[38;2;{};{};{}m▄", r, g, b),
                (None, None) => write!(out, " "),
            };
            out.push_str("\x1b[0m");
        }
        out.push('\n');
    }

    out
}
