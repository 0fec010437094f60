// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/reader.rs - 检测 + 识别两阶段文本读取
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
use thiserror::Error;
use tracing::{debug, info};

use super::{
  DetectResult, Detector, DetectorError, Model, crop_rotated, runner::InferenceRunner,
};
use crate::config::ModelKind;

#[derive(Error, Debug)]
pub enum TextReaderError {
  #[error("文本检测失败: {0}")]
  Detection(DetectorError),
  #[error("文本识别失败: {0}")]
  Recognition(DetectorError),
  #[error("识别模型必须为序列模型，实际为 {0:?}")]
  NotRecognizer(ModelKind),
}

/// 先检测文本区域，再逐个裁剪送入序列识别模型
pub struct TextReader<D, R> {
  detector: Detector<D>,
  recognizer: Detector<R>,
}

impl<D: InferenceRunner, R: InferenceRunner> TextReader<D, R> {
  pub fn new(detector: Detector<D>, recognizer: Detector<R>) -> Result<Self, TextReaderError> {
    let kind = recognizer.config().kind;
    if kind != ModelKind::Sequence {
      return Err(TextReaderError::NotRecognizer(kind));
    }
    info!(
      "文本读取器: {:?} 检测 + {:?} 识别",
      detector.config().kind,
      kind
    );
    Ok(Self {
      detector,
      recognizer,
    })
  }

  pub fn detector(&self) -> &Detector<D> {
    &self.detector
  }

  pub fn read(&mut self, image: &RgbImage) -> Result<DetectResult, TextReaderError> {
    self
      .detector
      .detect(image)
      .map_err(TextReaderError::Detection)?;

    let mut items = self.detector.results().to_vec();
    for item in items.iter_mut() {
      let Some(crop) = crop_rotated(image, item) else {
        continue;
      };
      let found = self
        .recognizer
        .detect(&crop)
        .map_err(TextReaderError::Recognition)?;
      if found {
        item.text = self.recognizer.results().first().and_then(|r| r.text.clone());
      }
    }

    debug!(
      "识别出 {} / {} 个文本区域",
      items.iter().filter(|i| i.text.is_some()).count(),
      items.len()
    );
    Ok(DetectResult::from(items))
  }
}

impl<D: InferenceRunner, R: InferenceRunner> Model for TextReader<D, R> {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = TextReaderError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.read(input)
  }
}
