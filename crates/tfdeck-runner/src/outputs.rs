//! `terraform output -json` のデコード

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ルートモジュールの出力1件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: serde_json::Value,
    #[serde(default)]
    pub sensitive: bool,
    /// terraform's type expression, e.g. `"string"` or `["list", "string"]`
    #[serde(rename = "type", default)]
    pub value_type: serde_json::Value,
}

impl OutputValue {
    /// 表示用の値(sensitive はマスク済み)
    pub fn display_value(&self) -> String {
        if self.sensitive {
            return "(sensitive)".to_string();
        }
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// `terraform output -json` が出力するJSONをデコード
///
/// 出力のない state は `{}` を出すので空のマップになる。
pub fn parse_output_values(json: &str) -> Result<BTreeMap<String, OutputValue>> {
    Ok(serde_json::from_str(json.trim())?)
}
