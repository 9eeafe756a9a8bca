//! 多摄像头同步 + 跨摄像头匹配 + 多目标跟踪 + 实例注册表
//!
//! 各摄像头的检测结果异步到达, 按检测时间汇合后匹配成跨摄像头候选,
//! 交给跟踪器,跟踪结果合并进实例注册表,供导出和可视化读取快照。
pub mod config; // 配置参数
pub mod datum; // 流引擎元组
pub mod detection; // 检测/匹配/跟踪接口
pub mod error; // 错误类型
pub mod export; // JSON 导出
pub mod handle; // 作用域句柄
pub mod instance; // 实例管理
pub mod pipeline; // 处理流水线
pub mod shared_states; // 命名组件表
pub mod visualizer; // 可视化

pub use crate::config::{PipelineConfig, SyncPolicy};
pub use crate::datum::{type_checked_aggregate, Datum};
pub use crate::error::{CoreError, Result};
pub use crate::handle::{Handle, HandleLedger};
pub use crate::instance::{InstanceRegistry, InstanceState, Snapshot};
pub use crate::pipeline::{FeedOutcome, Pipeline, SyncBarrier, Tick, TrackerFeed};
