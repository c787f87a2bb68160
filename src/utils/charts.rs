//! Chart rendering for training curves and confusion matrices
//!
//! Every chart is written twice: a PNG rasterised directly with the `image`
//! crate, and an SVG twin carrying titles, axis labels and the legend.

use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};

use crate::utils::error::{LesionError, Result};

/// Chart styling constants
const CHART_WIDTH: u32 = 800;
const CHART_HEIGHT: u32 = 500;
const MARGIN_TOP: u32 = 60;
const MARGIN_RIGHT: u32 = 180;
const MARGIN_BOTTOM: u32 = 80;
const MARGIN_LEFT: u32 = 80;

pub const COLOR_TRAIN_LOSS: [u8; 3] = [0x34, 0x98, 0xdb];
pub const COLOR_VAL_LOSS: [u8; 3] = [0xe6, 0x7e, 0x22];
pub const COLOR_TRAIN_ACC: [u8; 3] = [0x2e, 0xcc, 0x71];
pub const COLOR_VAL_ACC: [u8; 3] = [0xe7, 0x4c, 0x3c];
const COLOR_GRID: [u8; 3] = [0xec, 0xf0, 0xf1];
const COLOR_AXIS: [u8; 3] = [0x2c, 0x3e, 0x50];
const COLOR_WHITE: [u8; 3] = [0xff, 0xff, 0xff];
const HEAT_LOW: [u8; 3] = [0xf7, 0xfb, 0xff];
const HEAT_HIGH: [u8; 3] = [0x08, 0x30, 0x6b];

/// 3x5 bitmap glyphs for the digits 0-9, one row per byte, MSB-first in the low 3 bits
const DIGIT_GLYPHS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b001, 0b001, 0b001],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

/// One named curve on a line chart, one value per epoch
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub values: Vec<f64>,
    pub color: [u8; 3],
}

impl DataSeries {
    pub fn new(name: &str, values: &[f64], color: [u8; 3]) -> Self {
        Self {
            name: name.to_string(),
            values: values.to_vec(),
            color,
        }
    }
}

/// Plot area in pixel coordinates plus the data ranges mapped onto it
struct Frame {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

impl Frame {
    fn for_series(series: &[DataSeries]) -> Self {
        let (y_min, y_max) = find_y_range(series);
        let longest = series.iter().map(|s| s.values.len()).max().unwrap_or(0);

        Self {
            left: MARGIN_LEFT as f64,
            top: MARGIN_TOP as f64,
            width: (CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT) as f64,
            height: (CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM) as f64,
            x_max: (longest.saturating_sub(1)).max(1) as f64,
            y_min,
            y_max,
        }
    }

    fn project(&self, epoch: usize, value: f64) -> (f64, f64) {
        let x = self.left + (epoch as f64 / self.x_max) * self.width;
        let y = self.top + self.height - ((value - self.y_min) / (self.y_max - self.y_min)) * self.height;
        (x, y)
    }
}

/// Render the per-epoch metric curves to `<png_path>` and its `.svg` twin
pub fn render_metric_curves(
    title: &str,
    series: &[DataSeries],
    png_path: &Path,
) -> Result<()> {
    let frame = Frame::for_series(series);

    let mut img = RgbImage::from_pixel(CHART_WIDTH, CHART_HEIGHT, Rgb(COLOR_WHITE));

    for i in 0..=5 {
        let y = frame.top + frame.height * i as f64 / 5.0;
        draw_line(&mut img, (frame.left, y), (frame.left + frame.width, y), COLOR_GRID, 1);
    }
    let bottom = frame.top + frame.height;
    draw_line(&mut img, (frame.left, bottom), (frame.left + frame.width, bottom), COLOR_AXIS, 2);
    draw_line(&mut img, (frame.left, frame.top), (frame.left, bottom), COLOR_AXIS, 2);

    for s in series {
        let points: Vec<_> = s
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(epoch, v)| frame.project(epoch, *v))
            .collect();
        for pair in points.windows(2) {
            draw_line(&mut img, pair[0], pair[1], s.color, 3);
        }
        for &(x, y) in &points {
            fill_rect(&mut img, x as i64 - 3, y as i64 - 3, 7, 7, s.color);
        }
    }

    // Legend swatches, labels live in the SVG
    let legend_x = (CHART_WIDTH - MARGIN_RIGHT + 20) as i64;
    for (i, s) in series.iter().enumerate() {
        fill_rect(&mut img, legend_x, MARGIN_TOP as i64 + 10 + 25 * i as i64, 15, 15, s.color);
    }

    save_png(&img, png_path)?;
    fs::write(png_path.with_extension("svg"), metric_curves_svg(title, series, &frame))?;
    Ok(())
}

fn metric_curves_svg(title: &str, series: &[DataSeries], frame: &Frame) -> String {
    let mut svg = svg_header(title);

    for i in 0..=5 {
        let y = frame.top + frame.height - frame.height * i as f64 / 5.0;
        let value = frame.y_min + (frame.y_max - frame.y_min) * i as f64 / 5.0;
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            frame.left, y, frame.left + frame.width, y, hex(COLOR_GRID)
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{:.2}</text>"#,
            frame.left - 10.0, y + 4.0, hex(COLOR_AXIS), value
        ));
    }

    let bottom = frame.top + frame.height;
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        frame.left, bottom, frame.left + frame.width, bottom, hex(COLOR_AXIS)
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">Epoch</text>"#,
        frame.left + frame.width / 2.0, CHART_HEIGHT as f64 - 20.0, hex(COLOR_AXIS)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{0}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{1}" transform="rotate(-90 20 {0})">Metric</text>"#,
        CHART_HEIGHT as f64 / 2.0, hex(COLOR_AXIS)
    ));

    for s in series {
        let path: Vec<String> = s
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .enumerate()
            .map(|(i, (epoch, v))| {
                let (x, y) = frame.project(epoch, *v);
                format!("{} {:.1} {:.1}", if i == 0 { "M" } else { "L" }, x, y)
            })
            .collect();
        if path.is_empty() {
            continue;
        }
        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            path.join(" "),
            hex(s.color)
        ));
    }

    let legend_x = (CHART_WIDTH - MARGIN_RIGHT + 20) as f64;
    for (i, s) in series.iter().enumerate() {
        let y = MARGIN_TOP as f64 + 10.0 + 25.0 * i as f64;
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            legend_x, y, hex(s.color)
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            legend_x + 20.0, y + 12.0, hex(COLOR_AXIS), escape_xml(&s.name)
        ));
    }

    svg.push_str("</svg>");
    svg
}

/// Render an annotated 2x2 confusion-matrix heatmap (rows true, columns predicted)
pub fn render_confusion_matrix(title: &str, matrix: &[[u64; 2]; 2], png_path: &Path) -> Result<()> {
    const CELL: u32 = 160;
    let origin_x = (CHART_WIDTH - 2 * CELL) / 2;
    let origin_y = MARGIN_TOP + 20;
    let max = matrix.iter().flatten().copied().max().unwrap_or(0).max(1);

    let mut img = RgbImage::from_pixel(CHART_WIDTH, CHART_HEIGHT, Rgb(COLOR_WHITE));
    let mut svg = svg_header(title);

    for (row, counts) in matrix.iter().enumerate() {
        for (col, &count) in counts.iter().enumerate() {
            let t = count as f64 / max as f64;
            let fill = lerp_color(HEAT_LOW, HEAT_HIGH, t);
            let text_color = if t > 0.5 { COLOR_WHITE } else { COLOR_AXIS };
            let x = origin_x + col as u32 * CELL;
            let y = origin_y + row as u32 * CELL;

            fill_rect(&mut img, x as i64, y as i64, CELL, CELL, fill);
            let text = count.to_string();
            let scale = 8;
            let text_w = text.len() as u32 * 4 * scale;
            draw_digits(
                &mut img,
                &text,
                (x + CELL / 2).saturating_sub(text_w / 2) as i64,
                (y + CELL / 2).saturating_sub(5 * scale / 2) as i64,
                scale,
                text_color,
            );

            svg.push_str(&format!(
                r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="white"/>"#,
                x, y, CELL, CELL, hex(fill)
            ));
            svg.push_str(&format!(
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="28" fill="{}">{}</text>"#,
                x + CELL / 2, y + CELL / 2 + 10, hex(text_color), count
            ));
        }
    }

    for (i, label) in ["0", "1"].iter().enumerate() {
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
            origin_x + i as u32 * CELL + CELL / 2, origin_y + 2 * CELL + 20, hex(COLOR_AXIS), label
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
            origin_x - 10, origin_y + i as u32 * CELL + CELL / 2 + 5, hex(COLOR_AXIS), label
        ));
    }
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">Predicted label</text>"#,
        CHART_WIDTH / 2, origin_y + 2 * CELL + 50, hex(COLOR_AXIS)
    ));
    svg.push_str(&format!(
        r#"<text x="{0}" y="{1}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{2}" transform="rotate(-90 {0} {1})">True label</text>"#,
        origin_x - 40, origin_y + CELL, hex(COLOR_AXIS)
    ));
    svg.push_str("</svg>");

    save_png(&img, png_path)?;
    fs::write(png_path.with_extension("svg"), svg)?;
    Ok(())
}

fn save_png(img: &RgbImage, path: &Path) -> Result<()> {
    img.save(path)
        .map_err(|e| LesionError::Serialization(format!("Failed to write {}: {}", path.display(), e)))
}

fn svg_header(title: &str) -> String {
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {0} {1}" width="{0}" height="{1}">"#,
        CHART_WIDTH, CHART_HEIGHT
    );
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2, hex(COLOR_AXIS), escape_xml(title)
    ));
    svg
}

fn draw_line(img: &mut RgbImage, from: (f64, f64), to: (f64, f64), color: [u8; 3], thickness: u32) {
    let (mut x0, mut y0) = (from.0.round() as i64, from.1.round() as i64);
    let (x1, y1) = (to.0.round() as i64, to.1.round() as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let half = thickness as i64 / 2;

    loop {
        fill_rect(img, x0 - half, y0 - half, thickness, thickness, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn fill_rect(img: &mut RgbImage, x: i64, y: i64, w: u32, h: u32, color: [u8; 3]) {
    let (width, height) = (img.width() as i64, img.height() as i64);
    for py in y.max(0)..(y + h as i64).min(height) {
        for px in x.max(0)..(x + w as i64).min(width) {
            img.put_pixel(px as u32, py as u32, Rgb(color));
        }
    }
}

fn draw_digits(img: &mut RgbImage, text: &str, x: i64, y: i64, scale: u32, color: [u8; 3]) {
    for (i, digit) in text.chars().filter_map(|c| c.to_digit(10)).enumerate() {
        let glyph = DIGIT_GLYPHS[digit as usize];
        let gx = x + (i as i64) * 4 * scale as i64;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..3 {
                if bits & (0b100 >> col) != 0 {
                    fill_rect(
                        img,
                        gx + col * scale as i64,
                        y + row as i64 * scale as i64,
                        scale,
                        scale,
                        color,
                    );
                }
            }
        }
    }
}

fn lerp_color(low: [u8; 3], high: [u8; 3], t: f64) -> [u8; 3] {
    let t = t.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    [mix(low[0], high[0]), mix(low[1], high[1]), mix(low[2], high[2])]
}

fn find_y_range(series: &[DataSeries]) -> (f64, f64) {
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for v in series.iter().flat_map(|s| s.values.iter()).filter(|v| v.is_finite()) {
        y_min = y_min.min(*v);
        y_max = y_max.max(*v);
    }

    if !y_min.is_finite() {
        return (0.0, 1.0);
    }
    if (y_max - y_min).abs() < 1e-12 {
        return (y_min - 0.5, y_max + 0.5);
    }
    let pad = (y_max - y_min) * 0.05;
    (y_min - pad, y_max + pad)
}

fn hex(color: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
