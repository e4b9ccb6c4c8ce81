// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/service.rs - 检测服务与进程级共享实例
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
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use tracing::{debug, info};

use crate::config::TriageConfig;
use crate::frame::BgrFrame;
use crate::input::{decode_image_bytes, decode_image_file};
use crate::model::{
  DetectError, DetectResult, LoadError, Model, ModelHandle, ModelLoader, Yolov5Detector,
};
use crate::output::Draw;

/// 加载器、预处理、检测器与标注器组成的完整管线，构造后只读
#[derive(Debug)]
pub struct TriageService {
  config: TriageConfig,
  detector: Yolov5Detector,
  draw: Draw,
}

impl TriageService {
  /// 校验配置、加载模型并预热；任何一步失败都不会留下实例
  pub fn new(config: &TriageConfig) -> Result<Self, LoadError> {
    config.validate()?;
    let now = Instant::now();
    let handle = ModelLoader::from_config(config).load()?;
    let service = Self::with_handle(handle, config)?;
    info!("检测服务就绪，耗时: {:.2?}", now.elapsed());
    Ok(service)
  }

  /// 使用已加载的模型构造服务
  pub fn with_handle(handle: ModelHandle, config: &TriageConfig) -> Result<Self, LoadError> {
    config.validate()?;
    let draw = Draw::from_font_path(config.font.as_deref())
      .map_err(|e| LoadError::InvalidConfig(e.to_string()))?;

    Ok(Self {
      config: config.clone(),
      detector: Yolov5Detector::new(handle, config),
      draw,
    })
  }

  pub fn config(&self) -> &TriageConfig {
    &self.config
  }

  pub fn handle(&self) -> &ModelHandle {
    self.detector.handle()
  }

  pub fn draw(&self) -> &Draw {
    &self.draw
  }

  /// 检测已解码的图像；`annotate` 为真时额外返回标注副本，`frame` 不被修改
  pub fn detect_image(
    &self,
    frame: &BgrFrame,
    annotate: bool,
  ) -> Result<(DetectResult, Option<BgrFrame>), DetectError> {
    let result = self.detector.infer(frame)?;
    let annotated = annotate.then(|| {
      let now = Instant::now();
      let image = self.draw.annotate(frame, &result);
      debug!("标注完成，耗时: {:.2?}", now.elapsed());
      image
    });
    Ok((result, annotated))
  }

  /// 按配置中的 `annotate` 决定是否生成标注副本
  pub fn detect(
    &self,
    frame: &BgrFrame,
  ) -> Result<(DetectResult, Option<BgrFrame>), DetectError> {
    self.detect_image(frame, self.config.annotate)
  }

  /// 先解码 JPEG/PNG 等编码字节再检测
  pub fn detect_from_bytes(
    &self,
    bytes: &[u8],
    annotate: bool,
  ) -> Result<(DetectResult, Option<BgrFrame>), DetectError> {
    let frame = decode_image_bytes(bytes)?;
    self.detect_image(&frame, annotate)
  }

  pub fn detect_file(
    &self,
    path: impl AsRef<Path>,
    annotate: bool,
  ) -> Result<(DetectResult, Option<BgrFrame>), DetectError> {
    let frame = decode_image_file(path)?;
    self.detect_image(&frame, annotate)
  }
}

impl Model for TriageService {
  type Input = BgrFrame;
  type Output = DetectResult;
  type Error = DetectError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detector.infer(input)
  }
}

/// 只初始化一次的服务槽位，并发的首次调用只会构造一个实例
pub struct ServiceCell {
  inner: OnceLock<Arc<TriageService>>,
  init: Mutex<()>,
}

impl Default for ServiceCell {
  fn default() -> Self {
    Self::new()
  }
}

impl ServiceCell {
  pub const fn new() -> Self {
    Self {
      inner: OnceLock::new(),
      init: Mutex::new(()),
    }
  }

  pub fn get(&self) -> Option<Arc<TriageService>> {
    self.inner.get().cloned()
  }

  /// 构造失败时槽位保持为空，下次调用会重新尝试
  pub fn get_or_try_init<F>(&self, init: F) -> Result<Arc<TriageService>, LoadError>
  where
    F: FnOnce() -> Result<TriageService, LoadError>,
  {
    if let Some(service) = self.inner.get() {
      return Ok(service.clone());
    }

    let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(service) = self.inner.get() {
      return Ok(service.clone());
    }

    let service = Arc::new(init()?);
    Ok(self.inner.get_or_init(|| service).clone())
  }
}

static SHARED: ServiceCell = ServiceCell::new();

/// 进程级共享实例，首次调用时按 `config` 构造，之后忽略参数
pub fn shared_with(config: &TriageConfig) -> Result<Arc<TriageService>, LoadError> {
  shared_in(&SHARED, config, TriageService::new)
}

fn shared_in<F>(
  cell: &ServiceCell,
  config: &TriageConfig,
  build: F,
) -> Result<Arc<TriageService>, LoadError>
where
  F: FnOnce(&TriageConfig) -> Result<TriageService, LoadError>,
{
  let service = cell.get_or_try_init(|| build(config))?;
  if service.config() != config {
    debug!("共享实例已存在，忽略新的配置");
  }
  Ok(service)
}

/// 以默认配置获取进程级共享实例
pub fn shared() -> Result<Arc<TriageService>, LoadError> {
  shared_with(&TriageConfig::default())
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use ndarray::{Array3, ArrayView4};

  use super::*;
  use crate::model::{ClassTable, Device, Engine, Precision};

  struct Empty;

  impl Engine for Empty {
    fn forward(&mut self, _input: ArrayView4<'_, f32>) -> Result<Array3<f32>, DetectError> {
      Ok(Array3::zeros((1, 1, 7)))
    }
  }

  fn build(config: &TriageConfig) -> Result<TriageService, LoadError> {
    let handle = ModelHandle::new(
      PathBuf::from("empty.onnx"),
      Device::Cpu,
      32,
      ClassTable::new(["garbage", "pothole"])?,
      Precision::Full,
      config.img_size,
      Box::new(Empty),
    )?;
    TriageService::with_handle(handle, config)
  }

  #[test]
  fn later_configuration_is_ignored() {
    let cell = ServiceCell::new();
    let first = TriageConfig {
      conf_threshold: 0.25,
      ..Default::default()
    };
    let second = TriageConfig {
      conf_threshold: 0.75,
      img_size: 320,
      ..Default::default()
    };

    let a = shared_in(&cell, &first, build).unwrap();
    let b = shared_in(&cell, &second, |_| panic!("共享实例不应重建")).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(b.config(), &first);
    assert_eq!(b.handle().input_size(), 640);
  }

  #[test]
  fn failed_build_is_retried_with_new_configuration() {
    let cell = ServiceCell::new();
    let invalid = TriageConfig {
      max_det: 0,
      ..Default::default()
    };
    assert!(matches!(
      shared_in(&cell, &invalid, build),
      Err(LoadError::InvalidConfig(_))
    ));
    assert!(cell.get().is_none());

    let service = shared_in(&cell, &TriageConfig::default(), build).unwrap();
    assert_eq!(service.config().max_det, 1000);
  }
}
