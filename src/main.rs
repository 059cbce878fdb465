// src/main.rs

//! Demonstration of the blit engine round trip: fill a square in one
//! buffer, copy it into another, wait for the engine and read the result.

use anyhow::{bail, Context as _, Result};
use gfx2d::{Buffer, Config, Context, Deadline, PixelFormat, Rect, SourceRole};
use log::{info, warn};
use std::time::Duration;

const WIDTH: u32 = 100;
const HEIGHT: u32 = 100;
const SQUARE: Rect = Rect::new(10, 10, 50, 50);
const COLOR: u32 = 0x55ff_0000;
/// Where the source buffer sits on the destination.
const OFFSET: (i32, i32) = (20, 5);

fn pixel(buffer: &Buffer, x: i32, y: i32) -> Option<u32> {
    let data = buffer.data()?;
    let at = y as usize * buffer.stride() as usize + x as usize * 4;
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Counts pixels of `buffer` that differ from what the copy should leave.
fn mismatches(buffer: &Buffer, square: &Rect) -> usize {
    let mut bad = 0;
    for y in 0..buffer.height() as i32 {
        for x in 0..buffer.width() as i32 {
            let expected = if square.contains(x, y) { COLOR } else { 0 };
            if pixel(buffer, x, y) != Some(expected) {
                bad += 1;
            }
        }
    }
    bad
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let config = Config::load().context("Failed to load configuration")?;
    let mut ctx = Context::init(&config).context("Failed to open the 2D engine")?;
    info!("Capabilities: {:?}", ctx.capabilities());

    let format = PixelFormat::Argb8888;
    let src = ctx.alloc(WIDTH, HEIGHT, format, None)?;
    let mut dst = ctx.alloc(WIDTH, HEIGHT, format, None)?;
    if let Some(bytes) = dst.data_mut() {
        bytes.fill(0);
    }
    ctx.sync_for_gpu(&dst)?;

    ctx.set_target(Some(&src));
    let [alpha, red, green, blue] = COLOR.to_be_bytes();
    ctx.source_color(red, green, blue, alpha);
    ctx.draw_rectangles(&[SQUARE]);

    let copied = SQUARE.translate(OFFSET.0, OFFSET.1);
    ctx.set_target(Some(&dst));
    ctx.set_source(SourceRole::Primary, Some(&src), OFFSET.0, OFFSET.1);
    ctx.source_enable(SourceRole::Primary, true);
    ctx.draw_rectangles(&[copied]);
    ctx.flush()?;

    let deadline = Deadline::after(Duration::from_millis(config.sync.default_timeout_ms))?;
    ctx.wait(&dst, Some(deadline))?;
    ctx.sync_for_cpu(&dst, Some(deadline))?;

    let bad = mismatches(&dst, &copied);
    ctx.free(src);
    ctx.free(dst);
    if let Err(e) = ctx.cleanup() {
        warn!("{:#}", e);
    }

    if bad > 0 {
        bail!("{} pixel(s) differ from the expected image", bad);
    }
    info!(
        "Copied {}x{} square of {:#010x} to ({}, {})",
        copied.w, copied.h, COLOR, copied.x, copied.y
    );
    Ok(())
}
