/// 检测/匹配/跟踪接口 (Detection, matching and tracking collaborators)
///
/// 计算本身由外部原生库完成,这里只定义窄接口:
/// - Detector:  单摄像头检测
/// - Matcher:   跨摄像头区域关联
/// - Tracker:   多目标跟踪 (push / ready / track)
pub mod detector;
pub mod matcher;
pub mod tracker;
pub mod types;

pub use detector::{detect_regions, Detector};
pub use matcher::{run_matcher, CrossCameraMatcher, GreedyMatcher};
pub use tracker::{id_to_color, Tracker, WindowTracker};
pub use types::*;
