//! Batch engine: task tree, event and file iterators, filters, pools and
//! result persistence.
//!
//! A pipeline is a tree of [`Task`]s. The root is usually an
//! [`EventIterator`] driving an event source and a set of analyzers once per
//! event, or a [`FileIterator`] driving them once per input file. The
//! [`BatchExecutor`] runs the tree through configure, validate, initialize,
//! execute, finalize and clear against a per-run [`RunContext`].

pub mod analyzers;
pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod event;
pub mod executor;
pub mod file_iterator;
pub mod filter;
pub mod iterator;
pub mod listing;
pub mod pool;
pub mod results;
pub mod selection;
pub mod task;
pub mod validation;

pub use analyzers::{SpectrumAnalyzer, SyntheticSource};
pub use checkpoint::{clear_manifest, load_manifest, save_manifest, CheckpointManifest};
pub use condition::{Condition, FeatureCategory, FeatureSource, Interval, Test};
pub use context::{FileBinding, LoopCursor, RunContext};
pub use event::{Event, Particle};
pub use executor::{BatchExecutor, RunSummary};
pub use file_iterator::{FileIterator, FileMode, FileSelection};
pub use filter::{EventFilter, Filter, ParticleFilter};
pub use iterator::{BunchPlan, EventIterator};
pub use listing::{DirectoryListing, LocalListing};
pub use pool::{Pool, PoolHandle};
pub use results::{
    GroupCodec, Histogram, JsonCodec, JsonResultStore, MemoryResultStore, ResultDocument,
    ResultGroup, ResultStore, Statistic,
};
pub use selection::EventSelection;
pub use task::{Children, LifecycleState, Sequence, Task, TaskHandler};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
