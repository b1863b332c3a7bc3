use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbaImage};
use image::codecs::webp::WebPEncoder;

use super::traits::ImageFormat;
use crate::error::SessionError;

/// 将 PNG 截图转码为目标格式。PNG 原样返回。
///
/// CPU 密集，调用方应放到 `spawn_blocking` 中执行。
pub fn transcode_png(png: Vec<u8>, format: ImageFormat, quality: u8) -> Result<Vec<u8>, SessionError> {
    let mut out = Vec::new();
    match format {
        ImageFormat::Png => return Ok(png),
        ImageFormat::Jpeg => {
            let rgba = decode_png(&png)?;
            let (w, h) = rgba.dimensions();
            // JPEG 无透明通道，合成到白色背景：c' = (c*a + 255*(255-a)) / 255
            let mut rgb: Vec<u8> = Vec::with_capacity((w as usize) * (h as usize) * 3);
            for px in rgba.pixels() {
                let [r, g, b, a] = px.0;
                let a = u16::from(a);
                for c in [r, g, b] {
                    rgb.push(((u16::from(c) * a + 255 * (255 - a)) / 255) as u8);
                }
            }
            let mut enc = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
            enc.encode(&rgb, w, h, ColorType::Rgb8.into())
                .map_err(|e| SessionError::Protocol(format!("JPEG 编码失败: {e}")))?;
        }
        ImageFormat::Webp => {
            let rgba = decode_png(&png)?;
            let (w, h) = rgba.dimensions();
            // image crate 仅支持无损 WebP，quality 不生效
            let enc = WebPEncoder::new_lossless(&mut out);
            enc.encode(rgba.as_raw(), w, h, ColorType::Rgba8.into())
                .map_err(|e| SessionError::Protocol(format!("WebP 编码失败: {e}")))?;
        }
    }
    Ok(out)
}

fn decode_png(png: &[u8]) -> Result<RgbaImage, SessionError> {
    image::load_from_memory_with_format(png, image::ImageFormat::Png)
        .map(|img| img.to_rgba8())
        .map_err(|e| SessionError::Protocol(format!("截图 PNG 解码失败: {e}")))
}
