// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的脚本化推理后端
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

#![allow(dead_code)]

use std::io::Cursor;
use std::path::PathBuf;

use civic_triage::model::{ClassTable, Device, Engine, ModelHandle, Precision};
use civic_triage::{DetectError, TriageConfig, TriageService};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::{Array2, Array3, ArrayView4};

pub const CLASSES: [&str; 2] = ["garbage", "pothole"];

/// 每次前向推理返回同一组预测行，可选地在预热后改变行为
pub struct ScriptedEngine {
  rows: Array2<f32>,
  calls: usize,
  after_warmup: AfterWarmup,
}

pub enum AfterWarmup {
  Same,
  Fail,
  DropColumn,
}

impl ScriptedEngine {
  pub fn new(rows: Array2<f32>) -> Self {
    Self {
      rows,
      calls: 0,
      after_warmup: AfterWarmup::Same,
    }
  }

  pub fn after_warmup(mut self, behaviour: AfterWarmup) -> Self {
    self.after_warmup = behaviour;
    self
  }
}

impl Engine for ScriptedEngine {
  fn forward(&mut self, input: ArrayView4<'_, f32>) -> Result<Array3<f32>, DetectError> {
    assert_eq!(input.dim().0, 1);
    assert_eq!(input.dim().1, 3);
    self.calls += 1;

    let mut rows = self.rows.clone();
    if self.calls > 1 {
      match self.after_warmup {
        AfterWarmup::Same => {}
        AfterWarmup::Fail => {
          return Err(DetectError::InferenceFailure("设备内存不足".into()));
        }
        AfterWarmup::DropColumn => {
          let width = rows.ncols() - 1;
          rows = rows.slice(ndarray::s![.., ..width]).to_owned();
        }
      }
    }

    let (n, f) = rows.dim();
    Ok(rows.into_shape_with_order((1, n, f)).unwrap())
  }
}

/// 一个中心在 (150, 230)、边长 100 的 pothole，置信度 0.9；
/// 640×480 图像 letterbox 到 640×640 后还原为 (100, 100, 200, 200)
pub fn pothole_rows() -> Array2<f32> {
  ndarray::array![
    [150.0, 230.0, 100.0, 100.0, 0.9, 0.0, 1.0],
    [400.0, 300.0, 50.0, 50.0, 0.2, 1.0, 0.0],
  ]
}

pub fn handle(engine: ScriptedEngine) -> ModelHandle {
  ModelHandle::new(
    PathBuf::from("scripted.onnx"),
    Device::Cpu,
    32,
    ClassTable::new(CLASSES).unwrap(),
    Precision::Full,
    640,
    Box::new(engine),
  )
  .unwrap()
}

pub fn service(rows: Array2<f32>) -> TriageService {
  TriageService::with_handle(handle(ScriptedEngine::new(rows)), &TriageConfig::default()).unwrap()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
  let image = RgbImage::from_fn(width, height, |x, y| {
    if (100..200).contains(&x) && (100..200).contains(&y) {
      Rgb([40, 40, 40])
    } else {
      Rgb([120, 160, 110])
    }
  });
  let mut buf = Cursor::new(Vec::new());
  image.write_to(&mut buf, ImageFormat::Png).unwrap();
  buf.into_inner()
}
