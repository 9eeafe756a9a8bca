//! 错误类型
//! Error kinds shared by every stage of the core

use thiserror::Error;

/// 核心错误 (每个阶段同步返回给调用方,内部不重试)
#[derive(Debug, Error)]
pub enum CoreError {
    /// 字段缺失或格式错误 (只中止当前这一帧)
    #[error("format error: {0}")]
    Format(String),

    /// 协作组件不存在或类型不符
    #[error("lookup error: {0}")]
    Lookup(String),

    /// 检测/匹配/跟踪计算失败,原样上抛
    #[error("native call failed in {stage}: {message}")]
    NativeCall { stage: &'static str, message: String },

    /// 配置文件读取或校验失败
    #[error("config error: {0}")]
    Config(String),

    /// 同步屏障不再接收早于过期窗口的 key
    #[error("stale item: key {key} is older than sync horizon {horizon}")]
    Stale { key: u64, horizon: u64 },

    /// 组件已被 terminate
    #[error("{0} has been terminated")]
    Terminated(&'static str),
}

impl CoreError {
    pub fn format(msg: impl Into<String>) -> Self {
        CoreError::Format(msg.into())
    }

    pub fn lookup(msg: impl Into<String>) -> Self {
        CoreError::Lookup(msg.into())
    }

    pub fn native(stage: &'static str, msg: impl Into<String>) -> Self {
        CoreError::NativeCall {
            stage,
            message: msg.into(),
        }
    }

    pub fn is_format(&self) -> bool {
        matches!(self, CoreError::Format(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Format(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
