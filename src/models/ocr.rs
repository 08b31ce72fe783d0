//! OCR 识别结果
//!
//! 后端从检测报告照片中提取的结构化字段：联系电话、检测日期、温湿度，
//! 以及每个检测点位的测量值。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use phf::phf_map;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// 表单字段 → 中文标签
static FIELD_LABELS: phf::Map<&'static str, &'static str> = phf_map! {
    "phone" => "联系电话",
    "date" => "检测日期",
    "temperature" => "温度",
    "humidity" => "湿度",
    "location" => "检测点位",
    "value" => "检测值",
};

/// 单个点位的测量值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointValue {
    pub location: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<String>,
    #[serde(default)]
    pub points: Vec<PointValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

/// 字段校验提示（不阻断流程，只提醒操作员复核）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWarning {
    pub field: String,
    pub message: String,
}

impl FieldWarning {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn mobile_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^1[3-9]\d{9}$").expect("valid regex"))
}

fn landline_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0\d{2,3}-?\d{7,8}$").expect("valid regex"))
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y年%m月%d日"];

/// 解析报告上常见的几种日期写法
pub fn parse_report_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// 去掉单位后解析数值，如 "23.5℃"、"45%"、"0.03mg/m³"
pub fn parse_measurement(s: &str) -> Option<f64> {
    let numeric: String = s
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    numeric.parse().ok()
}

/// 字段的中文标签，点位字段形如 `point_2_value`
pub fn label_for(key: &str) -> String {
    if let Some(label) = FIELD_LABELS.get(key) {
        return label.to_string();
    }
    if let Some(rest) = key.strip_prefix("point_") {
        if let Some((index, field)) = rest.split_once('_') {
            if let Some(label) = FIELD_LABELS.get(field) {
                return format!("{}{}", label, index);
            }
        }
    }
    key.to_string()
}

impl OcrResult {
    pub fn validate(&self) -> Vec<FieldWarning> {
        let mut warnings = Vec::new();

        match self.phone.as_deref().map(str::trim) {
            None | Some("") => warnings.push(FieldWarning::new("phone", "未识别到联系电话")),
            Some(phone) => {
                let digits = phone.replace(' ', "");
                if !mobile_regex().is_match(&digits) && !landline_regex().is_match(&digits) {
                    warnings.push(FieldWarning::new("phone", format!("电话格式异常: {}", phone)));
                }
            }
        }

        match self.date.as_deref() {
            None => warnings.push(FieldWarning::new("date", "未识别到检测日期")),
            Some(date) if parse_report_date(date).is_none() => {
                warnings.push(FieldWarning::new("date", format!("无法解析日期: {}", date)));
            }
            Some(_) => {}
        }

        for (field, value) in [("temperature", &self.temperature), ("humidity", &self.humidity)] {
            if let Some(v) = value {
                if parse_measurement(v).is_none() {
                    warnings.push(FieldWarning::new(field, format!("数值异常: {}", v)));
                }
            }
        }

        if self.points.is_empty() {
            warnings.push(FieldWarning::new("points", "未识别到任何检测点位"));
        }
        for (i, point) in self.points.iter().enumerate() {
            if parse_measurement(&point.value).is_none() {
                warnings.push(FieldWarning::new(
                    format!("point_{}_value", i + 1),
                    format!("{} 的检测值异常: {}", point.location, point.value),
                ));
            }
        }

        warnings
    }

    /// 展开为报告表单字段
    pub fn to_form_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let scalars = [
            ("phone", &self.phone),
            ("date", &self.date),
            ("temperature", &self.temperature),
            ("humidity", &self.humidity),
        ];
        for (key, value) in scalars {
            if let Some(v) = value {
                fields.insert(key.to_string(), v.trim().to_string());
            }
        }
        for (i, point) in self.points.iter().enumerate() {
            fields.insert(format!("point_{}_location", i + 1), point.location.clone());
            fields.insert(format!("point_{}_value", i + 1), point.value.clone());
        }
        fields
    }
}
