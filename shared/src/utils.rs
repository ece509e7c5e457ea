use chrono::{DateTime, Utc};
use uuid::Uuid;

// 时间工具函数
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

// MQTT 客户端 ID，带随机后缀
pub fn generate_client_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// 凭据脱敏，只保留前 4 个字符
pub fn redact_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}
