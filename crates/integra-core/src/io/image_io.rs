use std::path::Path;

use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, Luma, Rgb};
use ndarray::Array2;

use crate::error::{IntegraError, Result};

/// Geometry of an image file read from its header, without decoding pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageGeometry {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

/// Read width, height and nominal channel count (alpha excluded).
pub fn read_geometry(path: &Path) -> Result<ImageGeometry> {
    let decoder = ImageReader::open(path)?.with_guessed_format()?.into_decoder()?;
    let (w, h) = decoder.dimensions();
    let channels = if decoder.color_type().has_color() { 3 } else { 1 };
    Ok(ImageGeometry {
        width: w as usize,
        height: h as usize,
        channels,
    })
}

/// Decode an image file into one f32 plane per nominal channel.
///
/// Integer formats are scaled to [0, 1]; float formats keep their values.
pub fn load_planes(path: &Path) -> Result<Vec<Array2<f32>>> {
    let img = image::open(path)?;
    Ok(planes_from_dynamic(&img))
}

fn planes_from_dynamic(img: &DynamicImage) -> Vec<Array2<f32>> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    if img.color().has_color() {
        let rgb = img.to_rgb32f();
        let mut planes = vec![Array2::<f32>::zeros((h, w)); 3];
        for (x, y, px) in rgb.enumerate_pixels() {
            for (c, plane) in planes.iter_mut().enumerate() {
                plane[[y as usize, x as usize]] = px.0[c];
            }
        }
        planes
    } else {
        let gray = img.to_luma32f();
        let mut plane = Array2::<f32>::zeros((h, w));
        for (x, y, px) in gray.enumerate_pixels() {
            plane[[y as usize, x as usize]] = px.0[0];
        }
        vec![plane]
    }
}

fn to_u16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn check_planes(planes: &[Array2<f32>]) -> Result<(usize, usize)> {
    let first = planes
        .first()
        .ok_or_else(|| IntegraError::Config("no image planes to save".into()))?;
    if planes.len() != 1 && planes.len() != 3 {
        return Err(IntegraError::Config(format!(
            "cannot save an image with {} channels",
            planes.len()
        )));
    }
    if planes.iter().any(|p| p.dim() != first.dim()) {
        return Err(IntegraError::Config("image planes differ in size".into()));
    }
    Ok(first.dim())
}

/// Save planes as 16-bit grayscale or RGB TIFF.
pub fn save_tiff(planes: &[Array2<f32>], path: &Path) -> Result<()> {
    let (h, w) = check_planes(planes)?;
    let mut pixels: Vec<u16> = Vec::with_capacity(h * w * planes.len());
    for row in 0..h {
        for col in 0..w {
            for plane in planes {
                pixels.push(to_u16(plane[[row, col]]));
            }
        }
    }

    let too_large = || IntegraError::ResourceExhausted(format!("{w}x{h} output image buffer"));
    if planes.len() == 1 {
        let img = image::ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
            .ok_or_else(too_large)?;
        img.save_with_format(path, ImageFormat::Tiff)?;
    } else {
        let img = image::ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
            .ok_or_else(too_large)?;
        img.save_with_format(path, ImageFormat::Tiff)?;
    }
    Ok(())
}

/// Save planes as 8-bit grayscale or RGB PNG.
pub fn save_png(planes: &[Array2<f32>], path: &Path) -> Result<()> {
    let (h, w) = check_planes(planes)?;
    if planes.len() == 1 {
        let mut img = image::GrayImage::new(w as u32, h as u32);
        for row in 0..h {
            for col in 0..w {
                img.put_pixel(col as u32, row as u32, Luma([to_u8(planes[0][[row, col]])]));
            }
        }
        img.save_with_format(path, ImageFormat::Png)?;
    } else {
        let mut img = image::RgbImage::new(w as u32, h as u32);
        for row in 0..h {
            for col in 0..w {
                let px = [
                    to_u8(planes[0][[row, col]]),
                    to_u8(planes[1][[row, col]]),
                    to_u8(planes[2][[row, col]]),
                ];
                img.put_pixel(col as u32, row as u32, Rgb(px));
            }
        }
        img.save_with_format(path, ImageFormat::Png)?;
    }
    Ok(())
}

/// Save planes, choosing format from file extension.
pub fn save_image(planes: &[Array2<f32>], path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => save_png(planes, path),
        _ => save_tiff(planes, path),
    }
}
