// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/input.rs - 图像输入与解码
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Civic Triage Contributors

use std::path::Path;

use image::ImageReader;
use tracing::debug;

use crate::frame::BgrFrame;
use crate::model::DetectError;

mod read_image_file;

pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 解码 JPEG/PNG 等编码字节为 BGR 帧，空输入或无法解码均返回 [`DetectError::InvalidInput`]
pub fn decode_image_bytes(bytes: &[u8]) -> Result<BgrFrame, DetectError> {
  if bytes.is_empty() {
    return Err(DetectError::InvalidInput("图像数据为空".to_string()));
  }

  let image = image::load_from_memory(bytes).map_err(undecodable)?;
  debug!("解码图像: {}x{}", image.width(), image.height());
  Ok(BgrFrame::from_rgb_image(&image.into_rgb8())?)
}

/// 从文件读取并解码
pub fn decode_image_file(path: impl AsRef<Path>) -> Result<BgrFrame, DetectError> {
  let path = path.as_ref();
  let image = ImageReader::open(path)
    .map_err(|e| DetectError::InvalidInput(format!("无法打开 {}: {}", path.display(), e)))?
    .with_guessed_format()
    .map_err(|e| DetectError::InvalidInput(format!("无法读取 {}: {}", path.display(), e)))?
    .decode()
    .map_err(undecodable)?;
  debug!(
    "读取图像文件 {}: {}x{}",
    path.display(),
    image.width(),
    image.height()
  );
  Ok(BgrFrame::from_rgb_image(&image.into_rgb8())?)
}

fn undecodable(err: image::ImageError) -> DetectError {
  DetectError::InvalidInput(format!("无法解码图像: {}", err))
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb, RgbImage};
  use std::io::Cursor;

  fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 100, 50]));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
  }

  #[test]
  fn decodes_png_as_bgr() {
    let frame = decode_image_bytes(&png_bytes(8, 4)).unwrap();
    assert_eq!((frame.width(), frame.height()), (8, 4));
    assert_eq!(frame.pixel(0, 0), Some([50, 100, 200]));
  }

  #[test]
  fn empty_bytes_are_invalid_input() {
    assert!(matches!(
      decode_image_bytes(&[]),
      Err(DetectError::InvalidInput(_))
    ));
  }

  #[test]
  fn garbage_bytes_are_invalid_input() {
    assert!(matches!(
      decode_image_bytes(b"not an image"),
      Err(DetectError::InvalidInput(_))
    ));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.png");
    std::fs::write(&path, &png_bytes(8, 4)[..20]).unwrap();
    assert!(matches!(
      decode_image_file(&path),
      Err(DetectError::InvalidInput(_))
    ));
  }

  #[test]
  fn missing_file_is_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      decode_image_file(dir.path().join("nope.jpg")),
      Err(DetectError::InvalidInput(_))
    ));
  }
}
