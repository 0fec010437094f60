// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/detector_pipeline.rs - 检测流程集成测试
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
use ndarray::{Array2, Array3, Array4, ArrayD, ArrayView4, IxDyn};
use thiserror::Error;

use shanan_detect::{
  config::{Labels, ModelConfig, ModelKind, ResizeMode},
  model::{
    CRAFT_OUTPUT_SCALE, Detector, DetectorBuilder, DetectorError, ExtractStatus, Model,
    TextReader, TextReaderError, runner::InferenceRunner,
  },
  output::LogOutput,
  task::{OneShotTask, Task},
};

#[derive(Error, Debug)]
#[error("fake runner failure")]
struct FakeError;

/// 每次返回预设的输出张量
struct FakeRunner {
  outputs: Vec<ArrayD<f32>>,
  fail: bool,
  calls: usize,
  last_blob_shape: Vec<usize>,
}

impl FakeRunner {
  fn new(outputs: Vec<ArrayD<f32>>) -> Self {
    Self {
      outputs,
      fail: false,
      calls: 0,
      last_blob_shape: Vec::new(),
    }
  }

  fn failing() -> Self {
    Self {
      fail: true,
      ..Self::new(Vec::new())
    }
  }
}

impl InferenceRunner for FakeRunner {
  type Error = FakeError;

  fn forward(
    &mut self,
    blob: ArrayView4<'_, f32>,
    outputs: &mut Vec<ArrayD<f32>>,
  ) -> Result<(), Self::Error> {
    self.calls += 1;
    self.last_blob_shape = blob.shape().to_vec();
    if self.fail {
      return Err(FakeError);
    }
    outputs.extend(self.outputs.iter().cloned());
    Ok(())
  }
}

fn config(kind: ModelKind, width: u32, height: u32) -> ModelConfig {
  let mut config = ModelConfig::new(kind, "fake.onnx");
  config.input_width = width;
  config.input_height = height;
  config.resize = ResizeMode::Raw;
  config
}

fn approx(a: f32, b: f32) -> bool {
  (a - b).abs() < 1e-3
}

/// 2x2 EAST 输出，网格 (1,1) 编码 20x10 的轴对齐框
fn east_outputs(score: f32) -> Vec<ArrayD<f32>> {
  let mut scores = Array4::<f32>::zeros((1, 1, 2, 2));
  scores[[0, 0, 1, 1]] = score;
  let mut geometry = Array4::<f32>::zeros((1, 5, 2, 2));
  for (c, d) in [2.0, 18.0, 8.0, 2.0].into_iter().enumerate() {
    geometry[[0, c, 1, 1]] = d;
  }
  vec![scores.into_dyn(), geometry.into_dyn()]
}

fn yolo_outputs(rows: &[[f32; 5]]) -> Vec<ArrayD<f32>> {
  let mut data = Array3::<f32>::zeros((1, rows.len(), 5));
  for (i, row) in rows.iter().enumerate() {
    for (j, &v) in row.iter().enumerate() {
      data[[0, i, j]] = v;
    }
  }
  vec![data.into_dyn()]
}

fn one_hot_logits(indices: &[usize], classes: usize) -> ArrayD<f32> {
  let mut logits = Array2::<f32>::zeros((indices.len(), classes));
  for (t, &i) in indices.iter().enumerate() {
    logits[[t, i]] = 12.0;
  }
  logits.insert_axis(ndarray::Axis(0)).into_dyn()
}

#[test]
fn east_two_by_two_end_to_end() {
  let mut detector =
    Detector::with_runner(config(ModelKind::East, 64, 64), FakeRunner::new(east_outputs(0.9)))
      .unwrap();

  let found = detector.detect(&RgbImage::new(64, 64)).unwrap();
  assert!(found);
  assert_eq!(detector.extract_status(), ExtractStatus::Decoded(1));

  let results = detector.results();
  assert_eq!(results.len(), 1);
  let item = &results[0];
  assert!(approx(item.score, 0.9));
  assert!(approx(item.width(), 20.0));
  assert!(approx(item.height(), 10.0));
  assert!(approx(item.left, 2.0));
  assert!(approx(item.top, 2.0));
  assert_eq!(item.angle, 0.0);
}

#[test]
fn blob_matches_configured_input_size() {
  let mut detector =
    Detector::with_runner(config(ModelKind::East, 96, 64), FakeRunner::new(east_outputs(0.9)))
      .unwrap();
  detector.detect(&RgbImage::new(300, 200)).unwrap();
  assert_eq!(detector.runner().last_blob_shape, vec![1, 3, 64, 96]);

  // 通过 Model 接口再跑一次，按 96/300 的比例映射回原图
  let result = detector.infer(&RgbImage::new(300, 200)).unwrap();
  assert_eq!(detector.runner().calls, 2);
  assert_eq!(result.len(), 1);
  assert!(approx(result.items[0].left, 2.0 * 300.0 / 96.0));
  assert!(approx(result.items[0].width(), 20.0 * 300.0 / 96.0));
}

#[test]
fn results_respect_confidence_threshold() {
  let mut scores = Array4::<f32>::zeros((1, 1, 8, 8));
  for y in 0..8 {
    for x in 0..8 {
      scores[[0, 0, y, x]] = ((y * 8 + x) * 13 % 100) as f32 / 100.0;
    }
  }
  let mut geometry = Array4::<f32>::zeros((1, 5, 8, 8));
  geometry
    .slice_mut(ndarray::s![0, 0..4, .., ..])
    .fill(1.0);
  let outputs = vec![scores.clone().into_dyn(), geometry.into_dyn()];

  for threshold in [0.0, 0.3, 0.5, 0.9] {
    let mut cfg = config(ModelKind::East, 32, 32);
    cfg.confidence_threshold = threshold;
    let mut detector = Detector::with_runner(cfg, FakeRunner::new(outputs.clone())).unwrap();
    detector.detect(&RgbImage::new(32, 32)).unwrap();

    let expected = scores.iter().filter(|&&s| s >= threshold).count();
    assert_eq!(detector.results().len(), expected, "threshold {}", threshold);
    assert!(detector.results().iter().all(|r| r.score >= threshold));
  }
}

#[test]
fn all_zero_outputs_yield_no_results() {
  let cases = vec![
    (
      config(ModelKind::East, 64, 64),
      vec![
        ArrayD::zeros(IxDyn(&[1, 1, 16, 16])),
        ArrayD::zeros(IxDyn(&[1, 5, 16, 16])),
      ],
    ),
    (
      config(ModelKind::Craft, 64, 64),
      vec![ArrayD::zeros(IxDyn(&[1, 32, 32, 2]))],
    ),
    (
      config(ModelKind::YoloV8, 64, 64),
      vec![ArrayD::zeros(IxDyn(&[1, 84, 336]))],
    ),
  ];

  for (cfg, outputs) in cases {
    let kind = cfg.kind;
    let mut detector = Detector::with_runner(cfg, FakeRunner::new(outputs)).unwrap();
    assert!(!detector.detect(&RgbImage::new(64, 64)).unwrap(), "{:?}", kind);
    assert!(detector.results().is_empty());
    assert_eq!(detector.extract_status(), ExtractStatus::Decoded(0));
  }
}

#[test]
fn shape_mismatch_is_distinguishable_from_empty() {
  let outputs = vec![ArrayD::zeros(IxDyn(&[1, 3, 16, 16]))];
  let mut detector =
    Detector::with_runner(config(ModelKind::East, 64, 64), FakeRunner::new(outputs)).unwrap();
  assert!(!detector.detect(&RgbImage::new(64, 64)).unwrap());
  assert_eq!(detector.extract_status(), ExtractStatus::ShapeMismatch);
}

#[test]
fn yolo_nms_keeps_best_and_labels() {
  let mut cfg = config(ModelKind::YoloV8, 100, 100);
  cfg.labels = Labels::new(vec!["plate".to_string()]);
  let outputs = yolo_outputs(&[
    [30.0, 30.0, 20.0, 20.0, 0.6],
    [31.0, 31.0, 20.0, 20.0, 0.9],
    [70.0, 70.0, 10.0, 10.0, 0.4],
    [70.0, 30.0, 10.0, 10.0, 0.1],
  ]);
  let mut detector = Detector::with_runner(cfg, FakeRunner::new(outputs)).unwrap();
  assert!(detector.detect(&RgbImage::new(100, 100)).unwrap());

  let results = detector.results();
  assert_eq!(results.len(), 2);
  assert!(approx(results[0].score, 0.9));
  assert!(approx(results[0].left, 21.0));
  assert_eq!(results[0].text.as_deref(), Some("plate"));
  assert_eq!(results[1].class_id, Some(0));
}

#[test]
fn letterbox_round_trip() {
  let mut cfg = config(ModelKind::YoloV8, 100, 100);
  cfg.resize = ResizeMode::Letterbox;
  // 网络空间 (x, y, w, h) = (10, 30, 20, 10)
  let outputs = yolo_outputs(&[[20.0, 35.0, 20.0, 10.0, 0.9]]);
  let mut detector = Detector::with_runner(cfg, FakeRunner::new(outputs)).unwrap();
  detector.detect(&RgbImage::new(200, 100)).unwrap();

  // 缩放 s = 2，偏移 (0, -50)
  let item = &detector.results()[0];
  assert!(approx(item.left, 20.0));
  assert!(approx(item.top, 10.0));
  assert!(approx(item.width(), 40.0));
  assert!(approx(item.height(), 20.0));
}

#[test]
fn craft_single_square_through_detector() {
  let side = 10;
  let mut maps = Array4::<f32>::zeros((1, 64, 64, 2));
  maps
    .slice_mut(ndarray::s![0, 20..20 + side, 20..20 + side, 0])
    .fill(0.9);
  let mut detector = Detector::with_runner(
    config(ModelKind::Craft, 128, 128),
    FakeRunner::new(vec![maps.into_dyn()]),
  )
  .unwrap();

  assert!(detector.detect(&RgbImage::new(128, 128)).unwrap());
  let results = detector.results();
  assert_eq!(results.len(), 1);
  // 膨胀 niter = 6，外轮廓跨度 side + 5
  let expected = CRAFT_OUTPUT_SCALE * (side as f32 + 5.0);
  assert!(approx(results[0].rotated.width, expected));
  assert!(results[0].rotated.width >= CRAFT_OUTPUT_SCALE * side as f32);
  assert_eq!(results[0].score, 0.0);
}

#[test]
fn sequence_decoding_is_deterministic() {
  let mut cfg = config(ModelKind::Sequence, 128, 32);
  cfg.labels = Labels::from_chars("abc");
  let outputs = vec![one_hot_logits(&[1, 3, 2, 0, 2], 4)];
  let mut detector = Detector::with_runner(cfg, FakeRunner::new(outputs)).unwrap();

  let image = RgbImage::new(100, 32);
  detector.detect(&image).unwrap();
  let first = detector.results().to_vec();
  detector.detect(&image).unwrap();
  let second = detector.results().to_vec();

  assert_eq!(first.len(), 1);
  assert_eq!(first[0].text.as_deref(), Some("acb"));
  assert_eq!(first, second);
  assert!(first[0].score > 0.99);
}

#[test]
fn detect_clears_previous_results() {
  let mut detector =
    Detector::with_runner(config(ModelKind::East, 64, 64), FakeRunner::new(east_outputs(0.9)))
      .unwrap();
  assert!(detector.detect(&RgbImage::new(64, 64)).unwrap());
  assert_eq!(detector.results().len(), 1);

  detector.clear();
  assert!(detector.results().is_empty());
}

#[test]
fn runner_failure_and_empty_image_are_errors() {
  let mut detector =
    Detector::with_runner(config(ModelKind::East, 64, 64), FakeRunner::failing()).unwrap();
  assert!(matches!(
    detector.detect(&RgbImage::new(64, 64)),
    Err(DetectorError::Inference(_))
  ));
  assert!(matches!(
    detector.detect(&RgbImage::new(0, 0)),
    Err(DetectorError::EmptyImage)
  ));
}

#[test]
fn invalid_config_is_rejected() {
  let mut cfg = config(ModelKind::East, 64, 64);
  cfg.nms_threshold = 2.0;
  assert!(matches!(
    Detector::with_runner(cfg, FakeRunner::new(Vec::new())),
    Err(DetectorError::Config(_))
  ));
}

#[test]
fn text_reader_fills_recognized_text() {
  let mut det_cfg = config(ModelKind::YoloV8, 100, 100);
  det_cfg.labels = Labels::new(vec!["line".to_string()]);
  let detector = Detector::with_runner(
    det_cfg,
    FakeRunner::new(yolo_outputs(&[[50.0, 50.0, 40.0, 12.0, 0.8]])),
  )
  .unwrap();

  let mut rec_cfg = config(ModelKind::Sequence, 128, 32);
  rec_cfg.labels = Labels::from_chars("0123456789");
  let recognizer = Detector::with_runner(
    rec_cfg,
    FakeRunner::new(vec![one_hot_logits(&[5, 3, 0], 11)]),
  )
  .unwrap();

  let mut reader = TextReader::new(detector, recognizer).unwrap();
  let result = reader.read(&RgbImage::new(100, 100)).unwrap();
  assert_eq!(result.len(), 1);
  assert_eq!(result.items[0].text.as_deref(), Some("42"));
}

#[test]
fn text_reader_crops_oversized_boxes_to_the_image() {
  let builder = DetectorBuilder::new(config(ModelKind::YoloV8, 100, 100))
    .labels(Labels::new(vec!["line".to_string()]))
    .confidence_threshold(0.5);
  assert_eq!(builder.config().confidence_threshold, 0.5);
  let detector = builder
    .build_with_runner(FakeRunner::new(yolo_outputs(&[
      [50.0, 50.0, 5e9, 5e9, 0.8],
      [50.0, 50.0, 10.0, 10.0, 0.3],
    ])))
    .unwrap();

  let mut rec_cfg = config(ModelKind::Sequence, 128, 32);
  rec_cfg.labels = Labels::from_chars("0123456789");
  let recognizer = Detector::with_runner(
    rec_cfg,
    FakeRunner::new(vec![one_hot_logits(&[8, 0], 11)]),
  )
  .unwrap();

  let mut reader = TextReader::new(detector, recognizer).unwrap();
  let result = reader.read(&RgbImage::new(100, 100)).unwrap();
  assert_eq!(result.len(), 1);
  let item = &result.items[0];
  assert_eq!(item.bbox(), [0.0, 0.0, 100.0, 100.0]);
  assert_eq!(item.text.as_deref(), Some("7"));
}

#[test]
fn text_reader_requires_sequence_recognizer() {
  let detector =
    Detector::with_runner(config(ModelKind::East, 64, 64), FakeRunner::new(Vec::new())).unwrap();
  let not_recognizer =
    Detector::with_runner(config(ModelKind::Craft, 64, 64), FakeRunner::new(Vec::new())).unwrap();
  assert!(matches!(
    TextReader::new(detector, not_recognizer),
    Err(TextReaderError::NotRecognizer(ModelKind::Craft))
  ));
}

#[test]
fn one_shot_task_runs_detector() {
  let detector =
    Detector::with_runner(config(ModelKind::East, 64, 64), FakeRunner::new(east_outputs(0.9)))
      .unwrap();
  let input = vec![RgbImage::new(64, 64)].into_iter();
  OneShotTask.run_task(input, detector, LogOutput).unwrap();

  let empty = Vec::<RgbImage>::new().into_iter();
  let detector =
    Detector::with_runner(config(ModelKind::East, 64, 64), FakeRunner::new(east_outputs(0.9)))
      .unwrap();
  assert!(OneShotTask.run_task(empty, detector, LogOutput).is_err());
}
