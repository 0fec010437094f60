// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/detector.rs - 检测器通用流程
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

use image::RgbImage;
use ndarray::ArrayD;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::{
  DetectItem, DetectResult, Model, craft, east,
  geometry::SpaceMapping,
  nms,
  runner::{InferenceRunner, LoadRunner},
  scratch::{Candidate, Scratch},
  sequence::{self, DEFAULT_PARSEQ_CHARSET},
  yolov8,
};
use crate::{
  FromUrl,
  blob::Blobifier,
  config::{ConfigError, CraftThresholds, Labels, ModelConfig, ModelKind},
};

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("模型加载错误: {0}")]
  ModelLoad(Box<dyn std::error::Error + Send + Sync>),
  #[error("推理错误: {0}")]
  Inference(Box<dyn std::error::Error + Send + Sync>),
  #[error("输入图像为空")]
  EmptyImage,
}

/// 最近一次 extract 的结果
///
/// 用于区分“模型没有检测到目标”与“输出张量无法解析”。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStatus {
  /// 解码成功，得到的候选数量
  Decoded(usize),
  /// 输出张量的秩或形状不符合该模型族，候选为空
  ShapeMismatch,
}

/// 各模型族特有的解码参数，构造时确定一次
#[derive(Debug, Clone)]
pub enum Variant {
  East {
    confidence_threshold: f32,
    nms_threshold: f32,
  },
  Craft {
    thresholds: CraftThresholds,
  },
  YoloV8 {
    confidence_threshold: f32,
    nms_threshold: f32,
    labels: Labels,
  },
  Sequence {
    charset: Labels,
  },
}

impl Variant {
  pub fn from_config(config: &ModelConfig) -> Self {
    match config.kind {
      ModelKind::East => Variant::East {
        confidence_threshold: config.confidence_threshold,
        nms_threshold: config.nms_threshold,
      },
      ModelKind::Craft => Variant::Craft {
        thresholds: config.craft,
      },
      ModelKind::YoloV8 => Variant::YoloV8 {
        confidence_threshold: config.confidence_threshold,
        nms_threshold: config.nms_threshold,
        labels: config.labels.clone(),
      },
      ModelKind::Sequence => Variant::Sequence {
        charset: if config.labels.is_empty() {
          Labels::from_chars(DEFAULT_PARSEQ_CHARSET)
        } else {
          config.labels.clone()
        },
      },
    }
  }

  pub fn kind(&self) -> ModelKind {
    match self {
      Variant::East { .. } => ModelKind::East,
      Variant::Craft { .. } => ModelKind::Craft,
      Variant::YoloV8 { .. } => ModelKind::YoloV8,
      Variant::Sequence { .. } => ModelKind::Sequence,
    }
  }

  /// 将原始输出解码为网络输入空间的候选
  pub fn extract(
    &self,
    outputs: &[ArrayD<f32>],
    input_size: (u32, u32),
    candidates: &mut Vec<Candidate>,
  ) -> ExtractStatus {
    match self {
      Variant::East {
        confidence_threshold,
        ..
      } => east::extract(outputs, *confidence_threshold, candidates),
      Variant::Craft { thresholds } => craft::extract(outputs, thresholds, candidates),
      Variant::YoloV8 {
        confidence_threshold,
        labels,
        ..
      } => yolov8::extract(outputs, *confidence_threshold, labels.len(), candidates),
      Variant::Sequence { charset } => {
        sequence::extract(outputs, charset, input_size, candidates)
      }
    }
  }

  /// 由几何校正后的候选生成最终结果
  pub fn store(&self, scratch: &mut Scratch, results: &mut Vec<DetectItem>) {
    let Scratch {
      candidates,
      order,
      keep,
      ..
    } = scratch;

    match self {
      Variant::East { nms_threshold, .. } | Variant::YoloV8 { nms_threshold, .. } => {
        let bounds: Vec<_> = candidates.iter().map(|c| c.bounds).collect();
        nms::suppress(&bounds, |i| candidates[i].score, *nms_threshold, order, keep);
        for &i in keep.iter() {
          let mut item = to_item(&candidates[i]);
          if let (Variant::YoloV8 { labels, .. }, Some(class_id)) = (self, item.class_id) {
            item.text = Some(labels.label(class_id));
          }
          results.push(item);
        }
      }
      Variant::Craft { .. } => {
        results.extend(candidates.iter().map(to_item));
      }
      Variant::Sequence { .. } => {
        results.extend(
          candidates
            .iter()
            .filter(|c| c.text.as_deref().is_some_and(|t| !t.is_empty()))
            .map(to_item)
            .take(1),
        );
      }
    }
  }
}

fn to_item(candidate: &Candidate) -> DetectItem {
  let score = if candidate.score.is_nan() {
    0.0
  } else {
    candidate.score.clamp(0.0, 1.0)
  };
  DetectItem {
    left: candidate.bounds.left,
    top: candidate.bounds.top,
    right: candidate.bounds.right,
    bottom: candidate.bounds.bottom,
    angle: candidate.rect.angle,
    score,
    class_id: candidate.class_id,
    text: candidate.text.clone(),
    rotated: candidate.rect,
  }
}

/// 将候选映射回原图空间，裁剪到图像范围并丢弃退化框
fn correct_geometry(candidates: &mut Vec<Candidate>, mapping: &SpaceMapping, width: u32, height: u32) {
  let before = candidates.len();
  candidates.retain_mut(|candidate| {
    let rect = mapping.map_rect(&candidate.rect);
    match rect.bounding_box().clamp_to(width as f32, height as f32) {
      Some(bounds) => {
        candidate.rect = rect;
        candidate.bounds = bounds;
        true
      }
      None => false,
    }
  });
  if candidates.len() != before {
    debug!("几何校正丢弃 {} 个退化候选", before - candidates.len());
  }
}

pub struct Detector<R> {
  config: ModelConfig,
  variant: Variant,
  blobifier: Blobifier,
  runner: R,
  scratch: Scratch,
  results: Vec<DetectItem>,
  status: ExtractStatus,
}

impl<R: LoadRunner> Detector<R> {
  /// 加载模型并构造检测器，失败时不产生检测器
  pub fn init(config: ModelConfig) -> Result<Self, DetectorError> {
    config.validate()?;
    let runner = R::load(&config).map_err(|e| DetectorError::ModelLoad(Box::new(e)))?;
    Self::with_runner(config, runner)
  }
}

impl<R: InferenceRunner> Detector<R> {
  pub fn with_runner(config: ModelConfig, runner: R) -> Result<Self, DetectorError> {
    config.validate()?;
    let variant = Variant::from_config(&config);
    let blobifier = Blobifier::new(&config);
    info!(
      "检测器就绪: {:?} 输入 {}x{}",
      variant.kind(),
      config.input_width,
      config.input_height
    );

    Ok(Detector {
      config,
      variant,
      blobifier,
      runner,
      scratch: Scratch::default(),
      results: Vec::new(),
      status: ExtractStatus::Decoded(0),
    })
  }

  pub fn config(&self) -> &ModelConfig {
    &self.config
  }

  pub fn variant(&self) -> &Variant {
    &self.variant
  }

  pub fn runner(&self) -> &R {
    &self.runner
  }

  pub fn results(&self) -> &[DetectItem] {
    &self.results
  }

  pub fn extract_status(&self) -> ExtractStatus {
    self.status
  }

  /// 清空缓冲区与结果，保留已分配的容量
  pub fn clear(&mut self) {
    self.scratch.reset();
    self.results.clear();
    self.status = ExtractStatus::Decoded(0);
  }

  /// 执行完整流程，返回是否有结果
  pub fn detect(&mut self, image: &RgbImage) -> Result<bool, DetectorError> {
    self.clear();

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(DetectorError::EmptyImage);
    }

    let transform = self.blobifier.blobify(image, &mut self.scratch.blob);

    self
      .runner
      .forward(self.scratch.blob.view(), &mut self.scratch.outputs)
      .map_err(|e| DetectorError::Inference(Box::new(e)))?;
    debug!("模型输出 {} 个张量", self.scratch.outputs.len());

    self.status = self.variant.extract(
      &self.scratch.outputs,
      self.blobifier.input_size(),
      &mut self.scratch.candidates,
    );
    if self.status == ExtractStatus::ShapeMismatch {
      let shapes: Vec<&[usize]> = self.scratch.outputs.iter().map(|o| o.shape()).collect();
      warn!(
        "{:?} 无法解析模型输出，形状: {:?}",
        self.variant.kind(),
        shapes
      );
    }

    correct_geometry(
      &mut self.scratch.candidates,
      &transform.mapping(),
      width,
      height,
    );
    self.variant.store(&mut self.scratch, &mut self.results);

    debug!("检测到 {} 个结果", self.results.len());
    Ok(!self.results.is_empty())
  }
}

impl<R: InferenceRunner> Model for Detector<R> {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = DetectorError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input)?;
    Ok(DetectResult::from(self.results.clone()))
  }
}

pub struct DetectorBuilder {
  config: ModelConfig,
}

impl FromUrl for DetectorBuilder {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let config = ModelConfig::from_url(url)?;
    Ok(DetectorBuilder { config })
  }
}

impl DetectorBuilder {
  pub fn new(config: ModelConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &ModelConfig {
    &self.config
  }

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.config.confidence_threshold = threshold;
    self
  }

  pub fn labels(mut self, labels: Labels) -> Self {
    self.config.labels = labels;
    self
  }

  pub fn build<R: LoadRunner>(self) -> Result<Detector<R>, DetectorError> {
    Detector::init(self.config)
  }

  pub fn build_with_runner<R: InferenceRunner>(
    self,
    runner: R,
  ) -> Result<Detector<R>, DetectorError> {
    Detector::with_runner(self.config, runner)
  }
}
