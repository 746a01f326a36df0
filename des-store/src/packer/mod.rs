//! Packing: group files into shard plans, write containers, upload.

pub mod local;
pub mod planner;
pub mod upload;

pub use local::pack_files_to_directory;
pub use planner::{build_pack_plan, estimate_shard_counts, FileToPack, PackPlan, PlannedShard, PlannerConfig, ShardKey};
pub use upload::{PackOutcome, PackedFile, ShardPacker, UploadedShard};
