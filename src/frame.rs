// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/frame.rs - BGR 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

pub const BGR_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("图像为空: {width}x{height}")]
  Empty { width: u32, height: u32 },
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 已解码的图像，H×W×3 字节布局，通道顺序为 B,G,R
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl BgrFrame {
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::Empty { width, height });
    }

    let expected = BGR_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 以单一颜色填充的帧，颜色为 [b, g, r]
  pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Result<Self, FrameError> {
    let data = bgr
      .iter()
      .copied()
      .cycle()
      .take(BGR_CHANNELS * width as usize * height as usize)
      .collect();
    Self::from_raw(width, height, data)
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    BGR_CHANNELS
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  /// 返回 (x, y) 处像素，顺序 [b, g, r]
  pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let idx = (y as usize * self.width as usize + x as usize) * BGR_CHANNELS;
    Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
  }

  /// 原样包装为三通道图像缓冲区（通道仍是 BGR），用于与通道顺序无关的几何操作
  pub(crate) fn as_bgr_buffer(&self) -> Option<ImageBuffer<Rgb<u8>, &[u8]>> {
    ImageBuffer::from_raw(self.width, self.height, &self.data[..])
  }

  pub(crate) fn from_bgr_buffer(buffer: ImageBuffer<Rgb<u8>, Vec<u8>>) -> Result<Self, FrameError> {
    let (width, height) = buffer.dimensions();
    Self::from_raw(width, height, buffer.into_raw())
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width as usize;
    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = (y as usize * width + x as usize) * BGR_CHANNELS;
      Rgb([self.data[idx + 2], self.data[idx + 1], self.data[idx]])
    })
  }

  pub fn from_rgb_image(image: &RgbImage) -> Result<Self, FrameError> {
    let mut data = Vec::with_capacity(image.as_raw().len());
    for pixel in image.pixels() {
      data.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
    }
    Self::from_raw(image.width(), image.height(), data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_empty_and_short_buffers() {
    assert_eq!(
      BgrFrame::from_raw(0, 0, vec![]),
      Err(FrameError::Empty {
        width: 0,
        height: 0
      })
    );
    assert_eq!(
      BgrFrame::from_raw(2, 2, vec![0; 11]),
      Err(FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      })
    );
  }

  #[test]
  fn rgb_conversion_swaps_channels() {
    let frame = BgrFrame::filled(3, 2, [10, 20, 30]).unwrap();
    let rgb = frame.to_rgb_image();
    assert_eq!(rgb.get_pixel(2, 1).0, [30, 20, 10]);

    let back = BgrFrame::from_rgb_image(&rgb).unwrap();
    assert_eq!(back, frame);
    assert_eq!(back.pixel(1, 1), Some([10, 20, 30]));
    assert_eq!(back.pixel(3, 0), None);
  }
}
