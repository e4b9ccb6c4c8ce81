// 该文件是 Civic Triage （市民巡检） 项目的一部分。
// src/model/loader.rs - 模型加载
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

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use ndarray::{Array3, Array4, ArrayView4};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::tensor::TensorElementType;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{ClassTable, ClassTableError, DetectError, Device, DeviceHint, Engine, OrtEngine, Precision};
use crate::config::{ConfigError, TriageConfig};
use crate::{FromUrl, FromUrlWithScheme, url_file_path};

/// 首选权重格式
pub const PRIMARY_WEIGHTS: &str = "best.onnx";
/// 备选权重格式（ONNX Runtime 优化格式）
pub const FALLBACK_WEIGHTS: &str = "best.ort";
/// PyTorch 权重需先导出为 ONNX
const TORCH_WEIGHTS: &str = "best.pt";

const DEFAULT_STRIDE: u32 = 32;
const ORT_INSTALL_STEPS: &str = "ONNX Runtime 不可用，请按以下步骤安装:\n\
  1. 下载 onnxruntime 1.22 发行包: https://github.com/microsoft/onnxruntime/releases\n\
  2. 将 libonnxruntime 放入动态库搜索路径，或设置 ORT_DYLIB_PATH 指向该文件\n\
  3. 重新启动服务";

/// 运行环境未就绪，构造失败，不可在本实例上恢复
#[derive(Error, Debug)]
pub enum LoadError {
  #[error("缺少运行依赖: {0}")]
  MissingDependency(String),
  #[error("未找到模型权重，已检查: {}{}", join_paths(.searched), format_hint(.hint))]
  MissingWeights {
    searched: Vec<PathBuf>,
    hint: Option<String>,
  },
  #[error("配置无效: {0}")]
  InvalidConfig(String),
  #[error("配置文件错误: {0}")]
  Config(#[from] ConfigError),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("类别表无效: {0}")]
  ClassTable(#[from] ClassTableError),
  #[error("读取类别文件失败: {0}")]
  ClassFile(#[source] std::io::Error),
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(#[from] ort::Error),
  #[error("预热推理失败: {0}")]
  Warmup(#[source] DetectError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

fn join_paths(paths: &[PathBuf]) -> String {
  paths
    .iter()
    .map(|p| p.display().to_string())
    .collect::<Vec<_>>()
    .join(", ")
}

fn format_hint(hint: &Option<String>) -> String {
  hint.as_deref().map(|h| format!(" ({h})")).unwrap_or_default()
}

/// 按优先级解析权重文件：显式路径 → 目录下的 best.onnx → best.ort
pub fn resolve_weights(explicit: Option<&Path>, dir: &Path) -> Result<PathBuf, LoadError> {
  if let Some(path) = explicit {
    if path.is_file() {
      return Ok(path.to_path_buf());
    }
    return Err(LoadError::MissingWeights {
      searched: vec![path.to_path_buf()],
      hint: None,
    });
  }

  let primary = dir.join(PRIMARY_WEIGHTS);
  let fallback = dir.join(FALLBACK_WEIGHTS);

  if primary.is_file() {
    return Ok(primary);
  }
  if fallback.is_file() {
    warn!("未找到 {}, 使用备选权重 {}", primary.display(), fallback.display());
    return Ok(fallback);
  }

  let torch = dir.join(TORCH_WEIGHTS);
  let hint = torch.is_file().then(|| {
    format!(
      "发现 {}，请先用 yolov5 export.py --include onnx 导出",
      torch.display()
    )
  });

  Err(LoadError::MissingWeights {
    searched: vec![primary, fallback],
    hint,
  })
}

/// 输入尺寸向上取整到步长的整数倍，且不小于步长；溢出时返回 `None`
pub fn round_to_stride(size: u32, stride: u32) -> Option<u32> {
  let rounded = size.div_ceil(stride).checked_mul(stride)?;
  Some(rounded.max(stride))
}

/// 已加载的模型，构造后只读；推理会话由互斥锁串行化
pub struct ModelHandle {
  weights: PathBuf,
  device: Device,
  stride: u32,
  classes: ClassTable,
  precision: Precision,
  input_size: u32,
  engine: Mutex<Box<dyn Engine>>,
}

impl std::fmt::Debug for ModelHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelHandle")
      .field("weights", &self.weights)
      .field("device", &self.device)
      .field("stride", &self.stride)
      .field("classes", &self.classes.names())
      .field("precision", &self.precision)
      .field("input_size", &self.input_size)
      .finish_non_exhaustive()
  }
}

impl ModelHandle {
  /// 绑定推理后端，对齐输入尺寸并执行一次预热推理
  pub fn new(
    weights: PathBuf,
    device: Device,
    stride: u32,
    classes: ClassTable,
    precision: Precision,
    img_size: u32,
    engine: Box<dyn Engine>,
  ) -> Result<Self, LoadError> {
    if stride == 0 {
      return Err(LoadError::ModelInvalid("步长必须为正整数".to_string()));
    }

    let input_size = round_to_stride(img_size, stride).ok_or_else(|| {
      LoadError::InvalidConfig(format!(
        "输入尺寸 {} 按步长 {} 对齐后溢出",
        img_size, stride
      ))
    })?;
    if input_size != img_size {
      warn!(
        "输入尺寸 {} 不是步长 {} 的整数倍，已调整为 {}",
        img_size, stride, input_size
      );
    }

    let handle = Self {
      weights,
      device,
      stride,
      classes,
      precision,
      input_size,
      engine: Mutex::new(engine),
    };
    handle.warmup()?;
    Ok(handle)
  }

  fn warmup(&self) -> Result<(), LoadError> {
    let size = self.input_size as usize;
    let dummy = Array4::<f32>::zeros((1, 3, size, size));

    let now = Instant::now();
    let output = self.forward(dummy.view()).map_err(LoadError::Warmup)?;
    info!("预热完成，耗时: {:.2?}", now.elapsed());

    self.check_output(&output)
  }

  fn check_output(&self, output: &Array3<f32>) -> Result<(), LoadError> {
    let (batch, _, features) = output.dim();
    let expected = 5 + self.classes.len();
    if batch != 1 || features != expected {
      error!(
        "模型输出形状 {:?} 与类别表 ({} 类) 不符",
        output.shape(),
        self.classes.len()
      );
      return Err(LoadError::ModelInvalid(format!(
        "期望输出 (1, N, {}), 实际 {:?}",
        expected,
        output.shape()
      )));
    }
    Ok(())
  }

  pub(crate) fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Array3<f32>, DetectError> {
    let mut engine = self
      .engine
      .lock()
      .map_err(|_| DetectError::InferenceFailure("推理会话锁已中毒".into()))?;
    engine.forward(input)
  }

  pub fn weights(&self) -> &Path {
    &self.weights
  }

  pub fn device(&self) -> Device {
    self.device
  }

  pub fn stride(&self) -> u32 {
    self.stride
  }

  pub fn classes(&self) -> &ClassTable {
    &self.classes
  }

  pub fn precision(&self) -> Precision {
    self.precision
  }

  pub fn input_size(&self) -> u32 {
    self.input_size
  }
}

/// 解析权重、选择设备、创建 ONNX Runtime 会话并预热
#[derive(Debug, Clone)]
pub struct ModelLoader {
  weights: Option<PathBuf>,
  weights_dir: PathBuf,
  device: String,
  img_size: u32,
  class_names: Option<PathBuf>,
}

const YOLOV5_SCHEME: &str = "yolov5";

impl FromUrlWithScheme for ModelLoader {
  const SCHEME: &'static str = YOLOV5_SCHEME;
}

impl FromUrl for ModelLoader {
  type Error = LoadError;

  /// `yolov5:///weights/best.onnx?device=cuda:0&imgsz=640`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LoadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        YOLOV5_SCHEME
      )));
    }

    let mut loader = Self::from_config(&TriageConfig::default()).weights(url_file_path(url));
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "device" => loader = loader.device(value.as_ref()),
        "imgsz" => {
          let size = value
            .parse()
            .map_err(|_| LoadError::InvalidConfig(format!("imgsz 无效: {}", value)))?;
          loader = loader.img_size(size);
        }
        "names" => loader = loader.class_names(PathBuf::from(value.as_ref())),
        _ => warn!("忽略未知的模型参数: {}={}", key, value),
      }
    }
    Ok(loader)
  }
}

impl ModelLoader {
  pub fn from_config(config: &TriageConfig) -> Self {
    Self {
      weights: config.weights.clone(),
      weights_dir: config.weights_dir.clone(),
      device: config.device.clone(),
      img_size: config.img_size,
      class_names: config.class_names.clone(),
    }
  }

  pub fn weights(mut self, path: impl Into<PathBuf>) -> Self {
    self.weights = Some(path.into());
    self
  }

  pub fn device(mut self, device: &str) -> Self {
    self.device = device.to_string();
    self
  }

  pub fn img_size(mut self, size: u32) -> Self {
    self.img_size = size;
    self
  }

  pub fn class_names(mut self, path: PathBuf) -> Self {
    self.class_names = Some(path);
    self
  }

  /// 与 [`TriageConfig`] 合并：URL 中给出的字段优先
  pub fn merge_into(&self, config: &mut TriageConfig) {
    config.weights = self.weights.clone();
    config.device = self.device.clone();
    config.img_size = self.img_size;
    if self.class_names.is_some() {
      config.class_names = self.class_names.clone();
    }
  }

  pub fn load(&self) -> Result<ModelHandle, LoadError> {
    if self.img_size == 0 {
      return Err(LoadError::InvalidConfig("输入尺寸必须大于 0".to_string()));
    }

    let weights = resolve_weights(self.weights.as_deref(), &self.weights_dir)?;
    info!("加载模型文件: {}", weights.display());

    let device = DeviceHint::parse(&self.device)?.resolve(cuda_available)?;
    info!("推理设备: {}", device);

    let session = Session::builder()
      .map_err(|e| {
        error!("创建 ONNX Runtime 会话失败: {}", e);
        LoadError::MissingDependency(format!("{}\n\n错误: {}", ORT_INSTALL_STEPS, e))
      })?
      .with_execution_providers(execution_providers(device)?)?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .commit_from_file(&weights)?;
    info!("模型加载完成");

    let input_is_f16 = session
      .inputs
      .first()
      .and_then(|i| i.input_type.tensor_type())
      .map(|ty| ty == TensorElementType::Float16)
      .ok_or_else(|| LoadError::ModelInvalid("模型没有张量输入".to_string()))?;
    let precision = Precision::select(device, input_is_f16)?;

    let (stride, classes) = self.read_metadata(&session)?;
    info!("步长: {}, 精度: {}", stride, precision);
    info!("类别: {:?}", classes.names());

    let engine =
      OrtEngine::new(session, precision).map_err(|e| LoadError::ModelInvalid(e.to_string()))?;
    ModelHandle::new(
      weights,
      device,
      stride,
      classes,
      precision,
      self.img_size,
      Box::new(engine),
    )
  }

  fn read_metadata(&self, session: &Session) -> Result<(u32, ClassTable), LoadError> {
    let metadata = session.metadata()?;

    let stride = match metadata.custom("stride")? {
      Some(raw) => {
        let value: f32 = raw
          .trim()
          .parse()
          .map_err(|_| LoadError::ModelInvalid(format!("步长元数据无效: {}", raw)))?;
        if value < 1.0 {
          return Err(LoadError::ModelInvalid(format!("步长元数据无效: {}", raw)));
        }
        value as u32
      }
      None => {
        warn!("模型缺少 stride 元数据，使用默认值 {}", DEFAULT_STRIDE);
        DEFAULT_STRIDE
      }
    };

    let classes = match &self.class_names {
      Some(path) => {
        debug!("从文件读取类别: {}", path.display());
        let text = std::fs::read_to_string(path).map_err(LoadError::ClassFile)?;
        ClassTable::from_lines(&text)?
      }
      None => {
        let raw = metadata
          .custom("names")?
          .ok_or_else(|| LoadError::ModelInvalid("模型缺少 names 元数据，请提供类别文件".to_string()))?;
        ClassTable::from_metadata(&raw)?
      }
    };

    Ok((stride, classes))
  }
}

fn execution_providers(device: Device) -> Result<Vec<ExecutionProviderDispatch>, LoadError> {
  match device {
    Device::Cpu => Ok(vec![CPUExecutionProvider::default().build()]),
    #[cfg(feature = "cuda")]
    Device::Cuda(id) => Ok(vec![
      ort::execution_providers::CUDAExecutionProvider::default()
        .with_device_id(id)
        .build()
        .error_on_failure(),
    ]),
    #[cfg(not(feature = "cuda"))]
    Device::Cuda(_) => Err(LoadError::MissingDependency(
      super::device::CUDA_INSTALL_STEPS.to_string(),
    )),
  }
}

#[cfg(feature = "cuda")]
fn cuda_available() -> bool {
  use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

  match CUDAExecutionProvider::default().is_available() {
    Ok(available) => available,
    Err(e) => {
      debug!("查询 CUDA 可用性失败: {}", e);
      false
    }
  }
}

#[cfg(not(feature = "cuda"))]
fn cuda_available() -> bool {
  false
}
