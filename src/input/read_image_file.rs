// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use thiserror::Error;
use tracing::error;
use url::Url;

use crate::frame::BgrFrame;
use crate::model::DetectError;
use crate::{FromUrl, FromUrlWithScheme, url_file_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error("读取图像失败: {0}")]
  Decode(#[from] DetectError),
}

const READ_IMAGE_FILE_SCHEME: &str = "image";

/// 单张图像文件，作为只产出一帧的迭代器
#[derive(Debug)]
pub struct ImageFileInput {
  frame: Option<BgrFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  /// `image:///path/to/report.jpg`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != READ_IMAGE_FILE_SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        READ_IMAGE_FILE_SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch {
        expected: READ_IMAGE_FILE_SCHEME,
        found: url.scheme().to_string(),
      });
    }

    let frame = super::decode_image_file(url_file_path(url))?;
    Ok(Self { frame: Some(frame) })
  }
}

impl From<BgrFrame> for ImageFileInput {
  fn from(frame: BgrFrame) -> Self {
    Self { frame: Some(frame) }
  }
}

impl Iterator for ImageFileInput {
  type Item = BgrFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}
