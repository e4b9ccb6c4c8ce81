// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/model/engine.rs - 推理后端
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

use half::f16;
use ndarray::{Array3, ArrayView4};
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use super::{DetectError, Precision};

/// 前向推理后端。输入为 (1, 3, H, W) 的 f32 张量，
/// 输出为 YOLOv5 形式的 (1, 锚点数, 5 + 类别数) 预测
pub trait Engine: Send {
  fn forward(&mut self, input: ArrayView4<'_, f32>) -> Result<Array3<f32>, DetectError>;
}

/// ONNX Runtime 会话
pub struct OrtEngine {
  session: Session,
  output_name: String,
  precision: Precision,
}

impl OrtEngine {
  pub fn new(session: Session, precision: Precision) -> Result<Self, DetectError> {
    let output_name = session
      .outputs
      .first()
      .map(|o| o.name.clone())
      .ok_or_else(|| DetectError::OutputShape {
        expected: "至少一个输出".to_string(),
        actual: vec![],
      })?;

    Ok(Self {
      session,
      output_name,
      precision,
    })
  }
}

impl Engine for OrtEngine {
  fn forward(&mut self, input: ArrayView4<'_, f32>) -> Result<Array3<f32>, DetectError> {
    debug!("执行模型推理 ({})", self.precision);
    let outputs = match self.precision {
      Precision::Full => {
        let tensor = Tensor::from_array(input.to_owned())?;
        self.session.run(ort::inputs![tensor])?
      }
      Precision::Half => {
        let tensor = Tensor::from_array(input.mapv(f16::from_f32))?;
        self.session.run(ort::inputs![tensor])?
      }
    };

    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| DetectError::OutputShape {
        expected: format!("输出 '{}'", self.output_name),
        actual: vec![],
      })?;

    let (shape, data) = match self.precision {
      Precision::Full => {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        (shape.to_vec(), data.to_vec())
      }
      Precision::Half => {
        let (shape, data) = output.try_extract_tensor::<f16>()?;
        (shape.to_vec(), data.iter().map(|v| v.to_f32()).collect())
      }
    };

    let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    if dims.len() != 3 {
      return Err(DetectError::OutputShape {
        expected: "(1, 锚点数, 5 + 类别数)".to_string(),
        actual: dims,
      });
    }

    Array3::from_shape_vec((dims[0], dims[1], dims[2]), data)
      .map_err(|e| DetectError::InferenceFailure(Box::new(e)))
  }
}
