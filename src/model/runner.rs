// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/runner.rs - 推理执行器
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use ndarray::{ArrayD, ArrayView4};
use thiserror::Error;

use crate::config::{Backend, ModelConfig, Target};

/// 同步前向推理
///
/// `outputs` 由调用方清空后传入，按模型输出顺序追加。
pub trait InferenceRunner {
  type Error: std::error::Error + Send + Sync + 'static;

  fn forward(
    &mut self,
    blob: ArrayView4<'_, f32>,
    outputs: &mut Vec<ArrayD<f32>>,
  ) -> Result<(), Self::Error>;
}

/// 可以直接由模型配置加载的执行器
pub trait LoadRunner: InferenceRunner + Sized {
  fn load(config: &ModelConfig) -> Result<Self, Self::Error>;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeviceError {
  #[error("不支持的推理后端: {0:?}")]
  UnsupportedBackend(Backend),
  #[error("不支持的推理目标: {0:?}")]
  UnsupportedTarget(Target),
}

/// 执行器实际使用的设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionDevice {
  Cpu,
  /// CUDA，失败时回退到 CPU
  Cuda,
}

/// 由后端与目标选择器确定执行设备
///
/// `Default` 与 `OpenCv` 后端按目标选择 CPU 或 CUDA；`Cuda` 后端只接受 CUDA 目标。
pub fn select_device(backend: Backend, target: Target) -> Result<ExecutionDevice, DeviceError> {
  match backend {
    Backend::Default | Backend::OpenCv => match target {
      Target::Cpu | Target::CpuFp16 => Ok(ExecutionDevice::Cpu),
      Target::Cuda | Target::CudaFp16 => Ok(ExecutionDevice::Cuda),
      other => Err(DeviceError::UnsupportedTarget(other)),
    },
    Backend::Cuda => match target {
      Target::Cuda | Target::CudaFp16 => Ok(ExecutionDevice::Cuda),
      other => Err(DeviceError::UnsupportedTarget(other)),
    },
    other => Err(DeviceError::UnsupportedBackend(other)),
  }
}

#[cfg(feature = "onnxruntime")]
pub use self::onnx::{OnnxRunner, OnnxRunnerError};

#[cfg(feature = "onnxruntime")]
mod onnx {
  use ndarray::{ArrayD, ArrayView4, IxDyn};
  use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
  };
  use thiserror::Error;
  use tracing::{debug, error, info};

  use super::{DeviceError, ExecutionDevice, InferenceRunner, LoadRunner, select_device};
  use crate::config::ModelConfig;

  #[derive(Error, Debug)]
  pub enum OnnxRunnerError {
    #[error("模型加载错误: {0}")]
    ModelLoadError(#[from] std::io::Error),
    #[error("推理设备选择错误: {0}")]
    Device(#[from] DeviceError),
    #[error("ONNX Runtime 错误: {0}")]
    Runtime(String),
    #[error("输出张量形状无效: {0}")]
    InvalidOutput(String),
  }

  fn runtime<E: std::fmt::Display>(err: E) -> OnnxRunnerError {
    OnnxRunnerError::Runtime(err.to_string())
  }

  pub struct OnnxRunner {
    session: Session,
    output_names: Vec<String>,
  }

  impl LoadRunner for OnnxRunner {
    fn load(config: &ModelConfig) -> Result<Self, Self::Error> {
      let path = &config.model_path;
      info!("加载模型文件: {}", path.display());
      let metadata = std::fs::metadata(path)?;
      debug!(
        "模型文件大小: {:.2} MB",
        metadata.len() as f64 / (1024.0 * 1024.0)
      );

      let builder = Session::builder()
        .map_err(runtime)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(runtime)?;

      let device = select_device(config.backend, config.target).inspect_err(|e| {
        error!("ONNX Runtime 无法使用 {:?}/{:?}: {}", config.backend, config.target, e);
      })?;
      info!("执行设备: {:?}", device);

      let builder = match device {
        ExecutionDevice::Cpu => builder
          .with_execution_providers([CPUExecutionProvider::default().build()])
          .map_err(runtime)?,
        ExecutionDevice::Cuda => builder
          .with_execution_providers([
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
          ])
          .map_err(runtime)?,
      };

      let session = builder.commit_from_file(path).map_err(runtime)?;
      let output_names: Vec<String> = session
        .outputs
        .iter()
        .map(|output| output.name.clone())
        .collect();
      info!("模型加载完成，输出: {:?}", output_names);

      Ok(OnnxRunner {
        session,
        output_names,
      })
    }
  }

  impl InferenceRunner for OnnxRunner {
    type Error = OnnxRunnerError;

    fn forward(
      &mut self,
      blob: ArrayView4<'_, f32>,
      outputs: &mut Vec<ArrayD<f32>>,
    ) -> Result<(), Self::Error> {
      let dims: Vec<i64> = blob.shape().iter().map(|&d| d as i64).collect();
      let data = blob
        .as_slice()
        .ok_or_else(|| OnnxRunnerError::InvalidOutput("输入张量内存不连续".to_string()))?;
      let input = TensorRef::from_array_view((dims, data)).map_err(runtime)?;

      debug!("执行模型推理");
      let results = self.session.run(ort::inputs![input]).map_err(runtime)?;

      for name in &self.output_names {
        let (shape, data) = results[name.as_str()]
          .try_extract_tensor::<f32>()
          .map_err(runtime)?;
        let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let array = ArrayD::from_shape_vec(IxDyn(&shape), data.to_vec())
          .map_err(|e| OnnxRunnerError::InvalidOutput(format!("{}: {}", name, e)))?;
        debug!("输出 {} 形状 {:?}", name, array.shape());
        outputs.push(array);
      }

      Ok(())
    }
  }
}
