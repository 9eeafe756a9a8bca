/// 实例管理 (Instance management)
///
/// - state:    实例快照 InstanceState
/// - manager:  实例管理器接口与保留型参考实现
/// - registry: 读写锁保护的注册表,对外提供一致快照
pub mod manager;
pub mod registry;
pub mod state;

pub use manager::{InstanceManager, RetainingInstanceManager};
pub use registry::{InstanceRegistry, Snapshot, Tracked};
pub use state::InstanceState;
