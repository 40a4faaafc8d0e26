//! Result groups and the stores they are persisted to.
//!
//! A [`ResultGroup`] is a named collection of statistics (counters and 1-D
//! histograms) owned by one task. Groups are written into a
//! [`ResultDocument`] addressed by a logical path; every task of a pipeline
//! that exports to the same path lands in the same document.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use cascade_types::{CascadeError, Result};

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// Fixed-width 1-D histogram with under/overflow and sum of squared weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    lower: f64,
    upper: f64,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
    /// Σ w·x over in-range fills, for the mean.
    sum_wx: f64,
}

impl Histogram {
    pub fn new(bins: usize, lower: f64, upper: f64) -> Result<Self> {
        if bins == 0 || !(lower < upper) {
            return Err(CascadeError::Validation(format!(
                "histogram needs bins > 0 and lower < upper, got {bins} bins over [{lower}, {upper})"
            )));
        }
        Ok(Self {
            lower,
            upper,
            contents: vec![0.0; bins],
            sumw2: vec![0.0; bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
            sum_wx: 0.0,
        })
    }

    /// An empty histogram with the same binning.
    pub fn empty_like(&self) -> Self {
        let mut h = self.clone();
        h.reset();
        h
    }

    pub fn bins(&self) -> usize {
        self.contents.len()
    }

    pub fn bin_width(&self) -> f64 {
        (self.upper - self.lower) / self.contents.len() as f64
    }

    pub fn bin_center(&self, bin: usize) -> f64 {
        self.lower + (bin as f64 + 0.5) * self.bin_width()
    }

    /// Bin index of `x`, or `None` when outside `[lower, upper)`.
    pub fn bin_of(&self, x: f64) -> Option<usize> {
        if !(self.lower <= x && x < self.upper) {
            return None;
        }
        let bin = ((x - self.lower) / self.bin_width()) as usize;
        Some(bin.min(self.contents.len() - 1))
    }

    pub fn fill(&mut self, x: f64) {
        self.fill_weighted(x, 1.0);
    }

    pub fn fill_weighted(&mut self, x: f64, w: f64) {
        self.entries += 1;
        match self.bin_of(x) {
            Some(bin) => {
                self.contents[bin] += w;
                self.sumw2[bin] += w * w;
                self.sum_wx += w * x;
            }
            None if x < self.lower => self.underflow += w,
            None => self.overflow += w,
        }
    }

    pub fn content(&self, bin: usize) -> f64 {
        self.contents.get(bin).copied().unwrap_or(0.0)
    }

    pub fn error(&self, bin: usize) -> f64 {
        self.sumw2.get(bin).copied().unwrap_or(0.0).sqrt()
    }

    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    /// Weighted mean of in-range fills, `None` for an empty histogram.
    pub fn mean(&self) -> Option<f64> {
        let total = self.integral();
        (total != 0.0).then(|| self.sum_wx / total)
    }

    pub fn scale(&mut self, factor: f64) {
        for c in &mut self.contents {
            *c *= factor;
        }
        for e in &mut self.sumw2 {
            *e *= factor * factor;
        }
        self.underflow *= factor;
        self.overflow *= factor;
        self.sum_wx *= factor;
    }

    /// Turn counts into a per-event density: divide by `events` and by the bin width.
    pub fn normalize_per_event(&mut self, events: f64) -> bool {
        if events <= 0.0 {
            return false;
        }
        let width = self.bin_width();
        self.scale(1.0 / (events * width));
        true
    }

    pub fn reset(&mut self) {
        self.contents.iter_mut().for_each(|c| *c = 0.0);
        self.sumw2.iter_mut().for_each(|c| *c = 0.0);
        self.underflow = 0.0;
        self.overflow = 0.0;
        self.entries = 0;
        self.sum_wx = 0.0;
    }
}

// ---------------------------------------------------------------------------
// ResultGroup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statistic {
    Counter { value: f64 },
    Histogram(Histogram),
}

/// Named statistics owned by a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultGroup {
    name: String,
    #[serde(default)]
    entries: BTreeMap<String, Statistic>,
}

impl ResultGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace a histogram.
    pub fn add_histogram(&mut self, key: impl Into<String>, histogram: Histogram) {
        self.entries.insert(key.into(), Statistic::Histogram(histogram));
    }

    /// Insert a zeroed counter, replacing anything stored under `key`.
    pub fn add_counter(&mut self, key: impl Into<String>) {
        self.entries.insert(key.into(), Statistic::Counter { value: 0.0 });
    }

    pub fn histogram(&self, key: &str) -> Option<&Histogram> {
        match self.entries.get(key) {
            Some(Statistic::Histogram(h)) => Some(h),
            _ => None,
        }
    }

    pub fn histogram_mut(&mut self, key: &str) -> Option<&mut Histogram> {
        match self.entries.get_mut(key) {
            Some(Statistic::Histogram(h)) => Some(h),
            _ => None,
        }
    }

    pub fn counter(&self, key: &str) -> Option<f64> {
        match self.entries.get(key) {
            Some(Statistic::Counter { value }) => Some(*value),
            _ => None,
        }
    }

    /// Set a counter, creating it when missing.
    pub fn set_counter(&mut self, key: &str, value: f64) {
        self.entries
            .insert(key.to_string(), Statistic::Counter { value });
    }

    /// Scale every histogram; counters are left as raw counts.
    pub fn scale(&mut self, factor: f64) {
        for stat in self.entries.values_mut() {
            if let Statistic::Histogram(h) = stat {
                h.scale(factor);
            }
        }
    }

    /// Zero every statistic but keep the layout.
    pub fn reset(&mut self) {
        for stat in self.entries.values_mut() {
            match stat {
                Statistic::Counter { value } => *value = 0.0,
                Statistic::Histogram(h) => h.reset(),
            }
        }
    }

    /// Drop every statistic.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ---------------------------------------------------------------------------
// Documents and codecs
// ---------------------------------------------------------------------------

/// Everything exported to one logical path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    #[serde(default)]
    pub groups: BTreeMap<String, ResultGroup>,
}

impl ResultDocument {
    pub fn group(&self, name: &str) -> Result<&ResultGroup> {
        self.groups
            .get(name)
            .ok_or_else(|| CascadeError::GroupNotFound(name.to_string()))
    }

    /// Insert or overwrite `group`; exporting twice leaves one copy.
    pub fn put(&mut self, group: &ResultGroup) {
        self.groups.insert(group.name().to_string(), group.clone());
    }
}

/// Byte encoding of a [`ResultDocument`].
pub trait GroupCodec {
    fn extension(&self) -> &str;
    fn encode(&self, document: &ResultDocument) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<ResultDocument>;
}

/// Pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl GroupCodec for JsonCodec {
    fn extension(&self) -> &str {
        "json"
    }

    fn encode(&self, document: &ResultDocument) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(document)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<ResultDocument> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ---------------------------------------------------------------------------
// ResultStore
// ---------------------------------------------------------------------------

/// Persistence sink for result groups. Exporting the same group to the same
/// path twice is idempotent.
pub trait ResultStore {
    fn export(&mut self, group: &ResultGroup, path: &str) -> Result<()>;
    fn import(&self, path: &str, group: &str) -> Result<ResultGroup>;
}

/// Filesystem store: one encoded document per path under `root`.
///
/// Relative paths resolve under `root`; absolute paths are used as given.
/// The codec extension is appended unless already present.
pub struct JsonResultStore<C: GroupCodec = JsonCodec> {
    root: PathBuf,
    codec: C,
}

impl JsonResultStore<JsonCodec> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            codec: JsonCodec,
        }
    }
}

impl<C: GroupCodec> JsonResultStore<C> {
    pub fn with_codec(root: impl Into<PathBuf>, codec: C) -> Self {
        Self {
            root: root.into(),
            codec,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of the document for `path`.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let given = Path::new(path);
        let full = if given.is_absolute() {
            given.to_path_buf()
        } else {
            self.root.join(given)
        };
        let ext = self.codec.extension();
        if full.extension().is_some_and(|e| e == ext) {
            full
        } else {
            PathBuf::from(format!("{}.{ext}", full.display()))
        }
    }

    fn read(&self, file: &Path) -> Result<ResultDocument> {
        let bytes = std::fs::read(file)?;
        self.codec.decode(&bytes)
    }
}

impl<C: GroupCodec> ResultStore for JsonResultStore<C> {
    fn export(&mut self, group: &ResultGroup, path: &str) -> Result<()> {
        let file = self.resolve(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut document = if file.exists() {
            self.read(&file)?
        } else {
            ResultDocument::default()
        };
        document.put(group);
        std::fs::write(&file, self.codec.encode(&document)?)?;
        tracing::debug!(group = %group.name(), path = %file.display(), "Result group exported");
        Ok(())
    }

    fn import(&self, path: &str, group: &str) -> Result<ResultGroup> {
        let file = self.resolve(path);
        let document = self.read(&file)?;
        let found = document.group(group)?.clone();
        tracing::debug!(group = %group, path = %file.display(), "Result group imported");
        Ok(found)
    }
}

/// In-memory store. Clones share the same documents, so a test can keep one
/// handle while the run context owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultStore {
    documents: Rc<RefCell<BTreeMap<String, ResultDocument>>>,
    exports: Rc<RefCell<Vec<String>>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths that hold at least one group, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.documents.borrow().keys().cloned().collect()
    }

    pub fn document(&self, path: &str) -> Option<ResultDocument> {
        self.documents.borrow().get(path).cloned()
    }

    /// Every export call as `path/group`, in call order.
    pub fn export_log(&self) -> Vec<String> {
        self.exports.borrow().clone()
    }

    /// Seed a document, e.g. the input of a derived pass.
    pub fn insert(&self, path: impl Into<String>, group: &ResultGroup) {
        self.documents
            .borrow_mut()
            .entry(path.into())
            .or_default()
            .put(group);
    }
}

impl ResultStore for MemoryResultStore {
    fn export(&mut self, group: &ResultGroup, path: &str) -> Result<()> {
        self.insert(path, group);
        self.exports
            .borrow_mut()
            .push(format!("{path}/{}", group.name()));
        Ok(())
    }

    fn import(&self, path: &str, group: &str) -> Result<ResultGroup> {
        let documents = self.documents.borrow();
        let document = documents
            .get(path)
            .ok_or_else(|| CascadeError::Other(format!("no result document at '{path}'")))?;
        Ok(document.group(group)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum() -> Histogram {
        let mut h = Histogram::new(4, 0.0, 4.0).unwrap();
        h.fill(0.5);
        h.fill(1.5);
        h.fill(1.7);
        h.fill(-1.0);
        h.fill(9.0);
        h
    }

    #[test]
    fn histogram_bins_half_open() {
        let h = Histogram::new(4, 0.0, 4.0).unwrap();
        assert_eq!(h.bin_of(0.0), Some(0));
        assert_eq!(h.bin_of(3.999), Some(3));
        assert_eq!(h.bin_of(4.0), None);
        assert_eq!(h.bin_of(-0.1), None);
    }

    #[test]
    fn histogram_fill_tracks_flows_and_mean() {
        let h = spectrum();
        assert_eq!(h.entries(), 5);
        assert_eq!(h.content(1), 2.0);
        assert_eq!(h.underflow(), 1.0);
        assert_eq!(h.overflow(), 1.0);
        assert_eq!(h.integral(), 3.0);
        assert!((h.mean().unwrap() - (0.5 + 1.5 + 1.7) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_binning_rejected() {
        assert!(Histogram::new(0, 0.0, 1.0).is_err());
        assert!(Histogram::new(10, 1.0, 1.0).is_err());
        assert!(Histogram::new(10, f64::NAN, 1.0).is_err());
    }

    #[test]
    fn normalize_per_event_divides_by_events_and_width() {
        let mut h = Histogram::new(2, 0.0, 1.0).unwrap();
        h.fill(0.1);
        h.fill(0.2);
        assert!(h.normalize_per_event(4.0));
        assert!((h.content(0) - 2.0 / (4.0 * 0.5)).abs() < 1e-12);
        assert!(!h.normalize_per_event(0.0));
    }

    #[test]
    fn group_reset_keeps_layout() {
        let mut g = ResultGroup::new("Spectra");
        g.add_histogram("pt", spectrum());
        g.set_counter("events", 12.0);
        g.reset();
        assert_eq!(g.len(), 2);
        assert_eq!(g.counter("events"), Some(0.0));
        assert_eq!(g.histogram("pt").unwrap().entries(), 0);
        assert!(g.histogram("events").is_none());
    }

    #[test]
    fn statistic_serializes_with_kind_tag() {
        let mut g = ResultGroup::new("G");
        g.set_counter("n", 3.0);
        let json = serde_json::to_value(&g).unwrap();
        assert_eq!(json["entries"]["n"]["kind"], "counter");
        assert_eq!(json["entries"]["n"]["value"], 3.0);
    }

    #[test]
    fn json_store_export_then_import() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonResultStore::new(dir.path());
        let mut g = ResultGroup::new("Spectra");
        g.add_histogram("pt", spectrum());
        store.export(&g, "run_B0_S0").unwrap();
        assert!(dir.path().join("run_B0_S0.json").exists());

        let back = store.import("run_B0_S0", "Spectra").unwrap();
        assert_eq!(back, g);
    }

    #[test]
    fn json_store_export_is_idempotent_and_merges_groups() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonResultStore::new(dir.path());
        let a = ResultGroup::new("A");
        let b = ResultGroup::new("B");
        store.export(&a, "run").unwrap();
        store.export(&a, "run").unwrap();
        store.export(&b, "run").unwrap();

        let bytes = std::fs::read(dir.path().join("run.json")).unwrap();
        let doc = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(doc.groups.len(), 2);
    }

    #[test]
    fn json_store_resolves_absolute_paths_with_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonResultStore::new("/unused");
        let abs = dir.path().join("input.json");
        assert_eq!(store.resolve(abs.to_str().unwrap()), abs);
        assert_eq!(store.resolve("out/run"), PathBuf::from("/unused/out/run.json"));
    }

    #[test]
    fn json_store_missing_group_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonResultStore::new(dir.path());
        store.export(&ResultGroup::new("A"), "run").unwrap();
        assert!(matches!(
            store.import("run", "B"),
            Err(CascadeError::GroupNotFound(name)) if name == "B"
        ));
        assert!(matches!(store.import("absent", "A"), Err(CascadeError::Io(_))));
    }

    #[test]
    fn memory_store_clones_share_documents() {
        let handle = MemoryResultStore::new();
        let mut owned = handle.clone();
        owned.export(&ResultGroup::new("A"), "run").unwrap();
        owned.export(&ResultGroup::new("A"), "run").unwrap();
        assert_eq!(handle.paths(), vec!["run".to_string()]);
        assert_eq!(handle.export_log(), vec!["run/A", "run/A"]);
        assert!(handle.import("run", "A").is_ok());
    }
}
