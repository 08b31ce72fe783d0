use serde::{Deserialize, Serialize};

/// 操作员当前所在的界面标签页
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActiveTab {
    Upload,
    #[default]
    Ocr,
    Report,
    Progress,
}

impl ActiveTab {
    pub fn as_str(self) -> &'static str {
        match self {
            ActiveTab::Upload => "upload",
            ActiveTab::Ocr => "ocr",
            ActiveTab::Report => "report",
            ActiveTab::Progress => "progress",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "upload" => Some(ActiveTab::Upload),
            "ocr" => Some(ActiveTab::Ocr),
            "report" => Some(ActiveTab::Report),
            "progress" => Some(ActiveTab::Progress),
            _ => None,
        }
    }
}

/// 处理模式：手动逐张确认，或自动确认并生成报告
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Manual,
    Auto,
}

impl ProcessingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingMode::Manual => "manual",
            ProcessingMode::Auto => "auto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Some(ProcessingMode::Manual),
            "auto" => Some(ProcessingMode::Auto),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
