//! Frame drawing.
//!
//! Lines are laid out the way the chat page expects: a separator bar and a
//! visitor gauge along the bottom, then messages stacked upwards, newest
//! lowest, each with its author tag in a left column and the body wrapped in
//! the remaining width. Glyphs are drawn as solid cells of a fixed grid; no
//! font is involved.

use std::io::Cursor;

use image::{ImageFormat, ImageResult, Rgb, RgbImage};

use super::job::RenderJob;

const BACKGROUND: Rgb<u8> = Rgb([28, 28, 28]);
const BODY: Rgb<u8> = Rgb([140, 240, 255]);
const AUTHOR: Rgb<u8> = Rgb([140, 255, 178]);

const LINE_HEIGHT: i64 = 15;
const CELL_WIDTH: i64 = 7;
const CELL_HEIGHT: i64 = 10;
const MARGIN: i64 = 10;

pub fn render_jpeg(job: &RenderJob) -> ImageResult<Vec<u8>> {
    let img = draw(job);
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}

fn draw(job: &RenderJob) -> RgbImage {
    let width = job.width.max(1);
    let height = job.height.max(1);
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
    let (w, h) = (i64::from(width), i64::from(height));

    fill(&mut img, 0, h - LINE_HEIGHT * 3, w, 2, BODY);
    let gauge = format!("visitors: {}", job.visitors);
    draw_cells(&mut img, MARGIN, h - LINE_HEIGHT * 2, &gauge, AUTHOR);

    let mut y = h - LINE_HEIGHT * 4;
    for instruction in &job.instructions {
        let tag = format!("[ {} ]", instruction.author);
        let x_margin = tag.chars().count() as i64 * CELL_WIDTH + 2 * MARGIN;
        let columns = ((w - x_margin - LINE_HEIGHT * 2) / CELL_WIDTH).max(1) as usize;
        let lines = wrap(&instruction.body, columns);

        y -= lines.len() as i64 * LINE_HEIGHT - LINE_HEIGHT;
        for (row, line) in lines.iter().enumerate() {
            draw_cells(&mut img, x_margin, y + row as i64 * LINE_HEIGHT, line, BODY);
        }
        draw_cells(&mut img, MARGIN, y, &tag, AUTHOR);

        y -= LINE_HEIGHT * 2;
        if y < 0 {
            break;
        }
    }
    img
}

/// Greedy word wrap on character columns. Words wider than a line are cut.
pub fn wrap(text: &str, columns: usize) -> Vec<String> {
    let columns = columns.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        let used = line.chars().count();
        if used > 0 && used + 1 + word.len() <= columns {
            line.push(' ');
            line.extend(&word);
            continue;
        }
        if used > 0 {
            lines.push(std::mem::take(&mut line));
        }
        while word.len() > columns {
            let rest = word.split_off(columns);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        line.extend(&word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn draw_cells(img: &mut RgbImage, x: i64, y: i64, text: &str, color: Rgb<u8>) {
    for (i, c) in text.chars().enumerate() {
        if !c.is_whitespace() {
            fill(img, x + i as i64 * CELL_WIDTH, y, CELL_WIDTH - 1, CELL_HEIGHT, color);
        }
    }
}

fn fill(img: &mut RgbImage, x: i64, y: i64, w: i64, h: i64, color: Rgb<u8>) {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w).min(i64::from(img.width()));
    let y1 = (y + h).min(i64::from(img.height()));
    for py in y0..y1 {
        for px in x0..x1 {
            img.put_pixel(px as u32, py as u32, color);
        }
    }
}
