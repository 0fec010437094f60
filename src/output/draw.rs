// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 检测结果可视化与记录
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_polygon_mut, draw_text_mut},
  point::Point,
  rect::Rect,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{DetectItem, DetectResult};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取失败: {0}")]
  FontIo(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  /// 未提供字体时只绘制边框
  font: Option<FontVec>,
  label_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      label_color: LABEL_COLOR,
      font: None,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("加载标签字体: {}", path.display());
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  /// 按可选的字体路径构造
  pub fn from_font_option(path: Option<&Path>) -> Result<Self, DrawError> {
    match path {
      Some(path) => Self::with_font_file(path),
      None => Ok(Self::default()),
    }
  }

  fn label_of(item: &DetectItem) -> String {
    match (&item.text, item.class_id) {
      (Some(text), _) => format!("{} {:.2}", text, item.score),
      (None, Some(class_id)) => format!("{} {:.2}", class_id, item.score),
      (None, None) => format!("{:.2}", item.score),
    }
  }

  // 绘制旋转框，标签放在外接框上方
  fn draw_item_with_label(&self, image: &mut RgbImage, item: &DetectItem, color: [u8; 3]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let corners = item.rotated.points();
    // 外扩 1 像素再画一圈，线宽为 2
    for grow in [0.0f32, 1.0] {
      let center = item.rotated.center;
      let polygon: Vec<Point<f32>> = corners
        .iter()
        .map(|p| {
          let (dx, dy) = (p.x - center.x, p.y - center.y);
          let norm = dx.hypot(dy).max(f32::EPSILON);
          Point::new(p.x + dx / norm * grow, p.y + dy / norm * grow)
        })
        .collect();
      draw_hollow_polygon_mut(image, &polygon, Rgb(color));
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = Self::label_of(item);
    let scale = PxScale::from(self.font_size);
    let text_color = Rgb([255u8, 255u8, 255u8]); // 白色文本

    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    let label_x = (item.left.floor() as i32).clamp(0, w - 1);
    let label_y = (item.top.floor() as i32 - text_height).max(0);

    let max_width = (w - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = text_height as u32;

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, Rgb(color));
      draw_text_mut(
        image,
        text_color,
        label_x,
        label_y + self.label_text_vertical_padding,
        scale,
        font,
        &label,
      );
    }
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    for item in result.iter() {
      self.draw_item_with_label(image, item, self.label_color);
    }
    debug!("绘制 {} 个检测结果", result.len());
  }

  pub fn draw_detection(&self, frame: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut image = frame.clone();
    self.draw_detections_on_image(&mut image, result);
    image
  }
}

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 将检测结果写为与图像同名的 JSON 文件
pub struct Record;

impl Record {
  pub fn to_json(result: &DetectResult) -> serde_json::Value {
    let items: Vec<serde_json::Value> = result
      .iter()
      .map(|item| {
        let points: Vec<[f32; 2]> = item.rotated.points().iter().map(|p| [p.x, p.y]).collect();
        json!({
          "bbox": item.bbox(),
          "angle": item.angle,
          "score": item.score,
          "class_id": item.class_id,
          "text": item.text,
          "points": points,
        })
      })
      .collect();
    json!({ "count": items.len(), "items": items })
  }

  pub fn record(&self, result: &DetectResult, path: &Path) -> Result<(), RecordError> {
    let content = serde_json::to_string_pretty(&Self::to_json(result))?;
    std::fs::write(path.with_extension("json"), content)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::geometry::RotatedRect;

  fn sample_item() -> DetectItem {
    let rect = RotatedRect::from_ltwh(4.0, 6.0, 10.0, 5.0);
    DetectItem {
      left: 4.0,
      top: 6.0,
      right: 14.0,
      bottom: 11.0,
      angle: 0.0,
      score: 0.75,
      class_id: Some(2),
      text: Some("car".to_string()),
      rotated: rect,
    }
  }

  #[test]
  fn draws_box_outline_without_font() {
    let image = RgbImage::new(32, 32);
    let result = DetectResult::from(vec![sample_item()]);
    let drawn = Draw::default().draw_detection(&image, &result);
    assert_eq!(drawn.get_pixel(4, 6), &Rgb(LABEL_COLOR));
    assert_eq!(drawn.get_pixel(9, 8), &Rgb([0, 0, 0]));
  }

  #[test]
  fn record_writes_json_next_to_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    let result = DetectResult::from(vec![sample_item()]);
    Record.record(&result, &path).unwrap();

    let content = std::fs::read_to_string(dir.path().join("frame.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(value["count"], 1);
    assert_eq!(value["items"][0]["text"], "car");
    assert_eq!(value["items"][0]["bbox"][2], 14.0);
  }

  #[test]
  fn label_prefers_text_over_class() {
    let mut item = sample_item();
    assert_eq!(Draw::label_of(&item), "car 0.75");
    item.text = None;
    assert_eq!(Draw::label_of(&item), "2 0.75");
  }
}
