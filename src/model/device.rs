// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/model/device.rs - 计算设备选择
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

use std::fmt;

use tracing::{info, warn};

use super::loader::LoadError;

/// CUDA 执行提供程序不可用时给出的安装步骤
pub(crate) const CUDA_INSTALL_STEPS: &str = "CUDA 推理依赖缺失，请按以下步骤安装:\n\
  1. 安装 NVIDIA 驱动与 CUDA 12.x、cuDNN 9.x\n\
  2. 确认 libcudart / libcudnn 位于动态库搜索路径 (LD_LIBRARY_PATH)\n\
  3. 使用 `cargo build --features cuda` 重新构建\n\
  或将设备设置为 \"cpu\"";

/// 调用方给出的设备提示，空字符串表示自动选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHint {
  Auto,
  Cpu,
  Cuda(i32),
}

impl DeviceHint {
  /// 接受 `""`、`"cpu"`、`"cuda"`、`"cuda:1"`、`"0"`、`"0,1"` 等写法
  pub fn parse(hint: &str) -> Result<Self, LoadError> {
    let normalized: String = hint
      .trim()
      .to_lowercase()
      .replace("cuda:", "")
      .chars()
      .filter(|c| !c.is_whitespace())
      .collect();

    match normalized.as_str() {
      "" => Ok(DeviceHint::Auto),
      "cpu" => Ok(DeviceHint::Cpu),
      "cuda" | "gpu" => Ok(DeviceHint::Cuda(0)),
      ids => {
        let mut parsed = ids.split(',').map(str::parse::<i32>);
        let first = match parsed.next() {
          Some(Ok(id)) if id >= 0 => id,
          _ => {
            return Err(LoadError::InvalidConfig(format!(
              "无法识别的设备: '{}'",
              hint
            )));
          }
        };
        if parsed.any(|id| id.is_err()) {
          return Err(LoadError::InvalidConfig(format!(
            "无法识别的设备: '{}'",
            hint
          )));
        }
        if ids.contains(',') {
          warn!("不支持多卡推理，仅使用 cuda:{}", first);
        }
        Ok(DeviceHint::Cuda(first))
      }
    }
  }

  /// 根据加速器可用性确定实际设备
  pub fn resolve(self, cuda_available: impl FnOnce() -> bool) -> Result<Device, LoadError> {
    match self {
      DeviceHint::Cpu => Ok(Device::Cpu),
      DeviceHint::Auto => {
        if cuda_available() {
          info!("自动选择设备: cuda:0");
          Ok(Device::Cuda(0))
        } else {
          info!("未检测到 CUDA，自动选择设备: cpu");
          Ok(Device::Cpu)
        }
      }
      DeviceHint::Cuda(id) => {
        if cuda_available() {
          Ok(Device::Cuda(id))
        } else {
          Err(LoadError::MissingDependency(CUDA_INSTALL_STEPS.to_string()))
        }
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cpu,
  Cuda(i32),
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda(id) => write!(f, "cuda:{}", id),
    }
  }
}

/// 推理精度，即送入模型的张量元素类型，须与模型声明的输入类型一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
  Full,
  Half,
}

impl Precision {
  /// f16 输入的模型只能在 GPU 上运行
  pub fn select(device: Device, model_input_is_f16: bool) -> Result<Self, LoadError> {
    match (model_input_is_f16, device) {
      (false, _) => Ok(Precision::Full),
      (true, Device::Cuda(_)) => Ok(Precision::Half),
      (true, Device::Cpu) => Err(LoadError::ModelInvalid(
        "半精度模型需要 GPU，请选择 CUDA 设备或导出 fp32 模型".to_string(),
      )),
    }
  }
}

impl fmt::Display for Precision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Precision::Full => write!(f, "fp32"),
      Precision::Half => write!(f, "fp16"),
    }
  }
}
