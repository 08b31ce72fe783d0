//! 订单与月度财务报表

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_no: String,
    pub customer_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    /// 金额（元）
    pub amount: f64,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// 订单列表查询条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuery {
    pub keyword: Option<String>,
    pub status: Option<OrderStatus>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            keyword: None,
            status: None,
            page: 1,
            page_size: 20,
        }
    }
}

impl OrderQuery {
    /// 转换为 URL 查询参数
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.max(1).to_string()),
            ("page_size", self.page_size.clamp(1, 200).to_string()),
        ];
        if let Some(keyword) = self.keyword.as_deref().map(str::trim) {
            if !keyword.is_empty() {
                params.push(("keyword", keyword.to_string()));
            }
        }
        if let Some(status) = self.status {
            params.push(("status", status.as_str().to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPage {
    pub items: Vec<Order>,
    pub total: u64,
}

/// 月度财务报表（由后端汇总）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReport {
    pub year: i32,
    pub month: u32,
    pub order_count: u64,
    pub total_amount: f64,
    pub paid_amount: f64,
    pub unpaid_amount: f64,
}

impl MonthlyReport {
    /// 回款率（百分比）
    pub fn collection_rate(&self) -> f64 {
        if self.total_amount <= 0.0 {
            return 0.0;
        }
        self.paid_amount / self.total_amount * 100.0
    }
}
