// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 模型配置
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

use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::FromUrl;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
  #[error("参数 {key} 的取值无效: {value}")]
  InvalidValue { key: String, value: String },
  #[error("标签文件读取失败: {0}")]
  LabelFile(#[from] std::io::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

impl ConfigError {
  fn invalid_value(key: &str, value: &str) -> Self {
    ConfigError::InvalidValue {
      key: key.to_string(),
      value: value.to_string(),
    }
  }
}

/// 检测模型族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
  /// EAST 逐网格几何回归
  East,
  /// CRAFT 连通域分割
  Craft,
  /// YOLOv8 无锚框检测
  YoloV8,
  /// PARSeq 类序列识别
  Sequence,
}

impl ModelKind {
  pub const fn scheme(self) -> &'static str {
    match self {
      ModelKind::East => "east",
      ModelKind::Craft => "craft",
      ModelKind::YoloV8 => "yolov8",
      ModelKind::Sequence => "parseq",
    }
  }

  pub fn from_scheme(scheme: &str) -> Option<Self> {
    match scheme {
      "east" => Some(ModelKind::East),
      "craft" => Some(ModelKind::Craft),
      "yolov8" | "yolo" => Some(ModelKind::YoloV8),
      "parseq" | "sequence" => Some(ModelKind::Sequence),
      _ => None,
    }
  }
}

/// 生成网络输入时的缩放策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
  /// 直接拉伸到输入尺寸
  #[default]
  Raw,
  /// 等比放大后居中裁剪
  CenterCrop,
  /// 等比缩小后居中填充
  Letterbox,
}

impl FromStr for ResizeMode {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "raw" | "resize" => Ok(ResizeMode::Raw),
      "crop" | "center-crop" => Ok(ResizeMode::CenterCrop),
      "letterbox" | "pad" => Ok(ResizeMode::Letterbox),
      other => Err(ConfigError::invalid_value("resize", other)),
    }
  }
}

/// 推理后端选择器，数值与原生 DNN 后端枚举一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
  #[default]
  Default,
  Halide,
  InferenceEngine,
  OpenCv,
  VkCom,
  Cuda,
  WebNn,
  TimVx,
  Cann,
}

/// 推理目标设备选择器，数值与原生 DNN 目标枚举一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Target {
  #[default]
  Cpu,
  OpenCl,
  OpenClFp16,
  Myriad,
  Vulkan,
  Fpga,
  Cuda,
  CudaFp16,
  Hddl,
  Npu,
  CpuFp16,
}

/// Backend 与原生数值的对照表
pub const BACKEND_NATIVE_TABLE: [(Backend, i32); 9] = [
  (Backend::Default, 0),
  (Backend::Halide, 1),
  (Backend::InferenceEngine, 2),
  (Backend::OpenCv, 3),
  (Backend::VkCom, 4),
  (Backend::Cuda, 5),
  (Backend::WebNn, 6),
  (Backend::TimVx, 7),
  (Backend::Cann, 8),
];

/// Target 与原生数值的对照表
pub const TARGET_NATIVE_TABLE: [(Target, i32); 11] = [
  (Target::Cpu, 0),
  (Target::OpenCl, 1),
  (Target::OpenClFp16, 2),
  (Target::Myriad, 3),
  (Target::Vulkan, 4),
  (Target::Fpga, 5),
  (Target::Cuda, 6),
  (Target::CudaFp16, 7),
  (Target::Hddl, 8),
  (Target::Npu, 9),
  (Target::CpuFp16, 10),
];

impl Backend {
  pub const fn to_native(self) -> i32 {
    match self {
      Backend::Default => 0,
      Backend::Halide => 1,
      Backend::InferenceEngine => 2,
      Backend::OpenCv => 3,
      Backend::VkCom => 4,
      Backend::Cuda => 5,
      Backend::WebNn => 6,
      Backend::TimVx => 7,
      Backend::Cann => 8,
    }
  }

  pub fn from_native(value: i32) -> Option<Self> {
    BACKEND_NATIVE_TABLE
      .iter()
      .find(|(_, native)| *native == value)
      .map(|(backend, _)| *backend)
  }
}

impl Target {
  pub const fn to_native(self) -> i32 {
    match self {
      Target::Cpu => 0,
      Target::OpenCl => 1,
      Target::OpenClFp16 => 2,
      Target::Myriad => 3,
      Target::Vulkan => 4,
      Target::Fpga => 5,
      Target::Cuda => 6,
      Target::CudaFp16 => 7,
      Target::Hddl => 8,
      Target::Npu => 9,
      Target::CpuFp16 => 10,
    }
  }

  pub fn from_native(value: i32) -> Option<Self> {
    TARGET_NATIVE_TABLE
      .iter()
      .find(|(_, native)| *native == value)
      .map(|(target, _)| *target)
  }
}

/// 有序标签表（类别名或字符集）
///
/// 越界索引回退为十进制编号字符串。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
  names: Vec<String>,
}

impl Labels {
  pub fn new(names: Vec<String>) -> Self {
    Self { names }
  }

  /// 每个字符一个标签
  pub fn from_chars(chars: &str) -> Self {
    Self {
      names: chars.chars().map(String::from).collect(),
    }
  }

  /// 每行一个标签，忽略空行
  pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let names: Vec<String> = content
      .split('\n')
      .map(|line| line.strip_suffix('\r').unwrap_or(line))
      .filter(|line| !line.is_empty())
      .map(String::from)
      .collect();
    debug!("从 {} 读取到 {} 个标签", path.display(), names.len());
    Ok(Self { names })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }

  pub fn label(&self, index: usize) -> String {
    match self.get(index) {
      Some(name) => name.to_string(),
      None => index.to_string(),
    }
  }
}

/// CRAFT 的三个阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CraftThresholds {
  /// 连通域内最大文本分数需达到的阈值
  pub text_threshold: f32,
  /// 文本热力图二值化阈值
  pub low_text: f32,
  /// 连接热力图二值化阈值
  pub link_threshold: f32,
}

impl Default for CraftThresholds {
  fn default() -> Self {
    Self {
      text_threshold: 0.7,
      low_text: 0.4,
      link_threshold: 0.4,
    }
  }
}

/// 单个检测器的静态配置，构建检测器后不再改变
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
  pub kind: ModelKind,
  pub model_path: PathBuf,
  pub backend: Backend,
  pub target: Target,
  pub input_width: u32,
  pub input_height: u32,
  /// 按网络通道顺序的缩放系数
  pub scale: [f32; 3],
  /// 按网络通道顺序的均值
  pub mean: [f32; 3],
  /// 填充像素值（像素空间，网络通道顺序）
  pub pad: [f32; 3],
  /// 交换 R/B 通道，源图像按 RGB 排列
  pub swap_rb: bool,
  pub resize: ResizeMode,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  pub craft: CraftThresholds,
  pub labels: Labels,
}

impl ModelConfig {
  /// 按模型族给出默认参数
  pub fn new(kind: ModelKind, model_path: impl Into<PathBuf>) -> Self {
    let base = Self {
      kind,
      model_path: model_path.into(),
      backend: Backend::Default,
      target: Target::Cpu,
      input_width: 320,
      input_height: 320,
      scale: [1.0; 3],
      mean: [0.0; 3],
      pad: [0.0; 3],
      swap_rb: false,
      resize: ResizeMode::Raw,
      confidence_threshold: 0.5,
      nms_threshold: 0.4,
      craft: CraftThresholds::default(),
      labels: Labels::default(),
    };

    match kind {
      ModelKind::East => Self {
        mean: [123.68, 116.78, 103.94],
        ..base
      },
      ModelKind::Craft => Self {
        input_width: 640,
        input_height: 640,
        mean: [123.675, 116.28, 103.53],
        scale: [1.0 / 58.395, 1.0 / 57.12, 1.0 / 57.375],
        resize: ResizeMode::Letterbox,
        ..base
      },
      ModelKind::YoloV8 => Self {
        input_width: 640,
        input_height: 640,
        scale: [1.0 / 255.0; 3],
        pad: [114.0; 3],
        resize: ResizeMode::Letterbox,
        confidence_threshold: 0.25,
        nms_threshold: 0.45,
        ..base
      },
      ModelKind::Sequence => Self {
        input_width: 128,
        input_height: 32,
        mean: [127.5; 3],
        scale: [1.0 / 127.5; 3],
        ..base
      },
    }
  }

  pub fn input_size(&self) -> (u32, u32) {
    (self.input_width, self.input_height)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_width == 0 || self.input_height == 0 {
      return Err(ConfigError::Invalid(format!(
        "输入尺寸不能为 0: {}x{}",
        self.input_width, self.input_height
      )));
    }

    let thresholds = [
      ("conf", self.confidence_threshold),
      ("nms", self.nms_threshold),
      ("text_threshold", self.craft.text_threshold),
      ("low_text", self.craft.low_text),
      ("link_threshold", self.craft.link_threshold),
    ];
    for (name, value) in thresholds {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
          "阈值 {} 必须位于 [0, 1]，实际为 {}",
          name, value
        )));
      }
    }

    if self.scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
      return Err(ConfigError::Invalid(format!(
        "缩放系数无效: {:?}",
        self.scale
      )));
    }

    if self
      .mean
      .iter()
      .chain(self.pad.iter())
      .any(|v| !v.is_finite())
    {
      return Err(ConfigError::Invalid("均值或填充值不是有限数".to_string()));
    }

    Ok(())
  }
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
  value
    .trim()
    .parse::<f32>()
    .map_err(|_| ConfigError::invalid_value(key, value))
}

/// 解析 `a,b,c` 或单个值（广播到三个通道）
fn parse_triple(key: &str, value: &str) -> Result<[f32; 3], ConfigError> {
  let parts: Vec<&str> = value.split(',').collect();
  match parts.as_slice() {
    [single] => {
      let v = parse_f32(key, single)?;
      Ok([v; 3])
    }
    [a, b, c] => Ok([parse_f32(key, a)?, parse_f32(key, b)?, parse_f32(key, c)?]),
    _ => Err(ConfigError::invalid_value(key, value)),
  }
}

/// 解析 `WxH` 或单个边长
fn parse_size(value: &str) -> Result<(u32, u32), ConfigError> {
  let parse = |s: &str| {
    s.trim()
      .parse::<u32>()
      .map_err(|_| ConfigError::invalid_value("size", value))
  };
  match value.split_once(['x', 'X']) {
    Some((w, h)) => Ok((parse(w)?, parse(h)?)),
    None => {
      let side = parse(value)?;
      Ok((side, side))
    }
  }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
  match value {
    "" | "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    other => Err(ConfigError::invalid_value(key, other)),
  }
}

fn parse_native<T>(key: &str, value: &str, convert: fn(i32) -> Option<T>) -> Result<T, ConfigError> {
  value
    .trim()
    .parse::<i32>()
    .ok()
    .and_then(convert)
    .ok_or_else(|| ConfigError::invalid_value(key, value))
}

impl FromUrl for ModelConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let kind = ModelKind::from_scheme(url.scheme())
      .ok_or_else(|| ConfigError::SchemeMismatch(url.scheme().to_string()))?;

    let mut config = ModelConfig::new(kind, crate::decode_url_path(url));

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "size" => {
          let (w, h) = parse_size(&value)?;
          config.input_width = w;
          config.input_height = h;
        }
        "conf" | "confidence" => config.confidence_threshold = parse_f32(&key, &value)?,
        "nms" => config.nms_threshold = parse_f32(&key, &value)?,
        "resize" => config.resize = value.parse()?,
        "mean" => config.mean = parse_triple(&key, &value)?,
        "scale" => config.scale = parse_triple(&key, &value)?,
        "pad" => config.pad = parse_triple(&key, &value)?,
        "swap_rb" => config.swap_rb = parse_bool(&key, &value)?,
        "backend" => config.backend = parse_native(&key, &value, Backend::from_native)?,
        "target" => config.target = parse_native(&key, &value, Target::from_native)?,
        "labels" => {
          let path = PathBuf::from(value.into_owned());
          config.labels = Labels::from_file(&path)?;
        }
        "charset" => config.labels = Labels::from_chars(&value),
        "text_threshold" => config.craft.text_threshold = parse_f32(&key, &value)?,
        "low_text" => config.craft.low_text = parse_f32(&key, &value)?,
        "link_threshold" => config.craft.link_threshold = parse_f32(&key, &value)?,
        other => warn!("忽略未知的模型参数: {}={}", other, value),
      }
    }

    config.validate()?;
    info!(
      "模型配置: {:?} {} 输入 {}x{} 缩放策略 {:?}",
      config.kind,
      config.model_path.display(),
      config.input_width,
      config.input_height,
      config.resize
    );

    Ok(config)
  }
}
