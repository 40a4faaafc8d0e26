//! Per-file loops: run the whole child lifecycle once per input file, or
//! run the derived-results pass (import, derive, export) over stored outputs.

use std::path::PathBuf;

use cascade_types::{CascadeError, ConfigSchema, Result, Status, TaskConfig};

use crate::context::{FileBinding, RunContext};
use crate::listing::{DirectoryListing, LocalListing};
use crate::task::{Children, TaskHandler};

/// Which files a loop visits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSelection {
    /// Exactly these paths, in this order.
    Explicit(Vec<String>),
    /// Files under `root` matched by substring patterns.
    Pattern {
        root: PathBuf,
        include: Vec<String>,
        exclude: Vec<String>,
        max_depth: usize,
    },
}

impl FileSelection {
    /// Result documents under `root`, skipping earlier derived outputs and
    /// checkpoint manifests.
    pub fn result_documents(root: impl Into<PathBuf>, derived_suffix: &str) -> Self {
        FileSelection::Pattern {
            root: root.into(),
            include: vec![".json".into()],
            exclude: vec![derived_suffix.to_string(), "checkpoint".into()],
            max_depth: 1,
        }
    }

    fn describe(&self) -> String {
        match self {
            FileSelection::Explicit(files) => format!("explicit list of {} files", files.len()),
            FileSelection::Pattern { root, include, exclude, .. } => format!(
                "{} (include {:?}, exclude {:?})",
                root.display(),
                include,
                exclude
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// initialize → execute → finalize → clear every child per file.
    Process,
    /// import → create_derived → calculate_derived → export per child per file.
    Derive,
}

pub struct FileIterator {
    mode: FileMode,
    selection: FileSelection,
    listing: Box<dyn DirectoryListing>,
    output_suffix: String,
    processed: Vec<String>,
}

impl FileIterator {
    pub fn new(selection: FileSelection) -> Self {
        Self {
            mode: FileMode::Process,
            selection,
            listing: Box::new(LocalListing),
            output_suffix: "_derived".into(),
            processed: Vec::new(),
        }
    }

    /// The derived-results variant.
    pub fn derived(selection: FileSelection) -> Self {
        Self {
            mode: FileMode::Derive,
            ..Self::new(selection)
        }
    }

    pub fn with_listing(mut self, listing: impl DirectoryListing + 'static) -> Self {
        self.listing = Box::new(listing);
        self
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// Files visited in the current run, including the one that failed.
    pub fn processed(&self) -> &[String] {
        &self.processed
    }

    fn select(&self) -> Result<Vec<String>> {
        match &self.selection {
            FileSelection::Explicit(files) => Ok(files.clone()),
            FileSelection::Pattern {
                root,
                include,
                exclude,
                max_depth,
            } => Ok(self
                .listing
                .list(root, include, exclude, *max_depth)?
                .into_iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect()),
        }
    }

    fn process_file(&self, ctx: &mut RunContext, children: &mut Children<'_>) -> Result<bool> {
        children.initialize(ctx)?;
        if ctx.is_ok() {
            children.execute(ctx)?;
        }
        children.finalize(ctx)?;
        children.clear(ctx)?;
        Ok(ctx.is_ok())
    }

    fn derive_file(&self, ctx: &mut RunContext, children: &mut Children<'_>, binding: &FileBinding) -> Result<bool> {
        for child in children.iter_mut() {
            child.import(ctx, &binding.input)?;
            if !ctx.is_ok() {
                return Ok(false);
            }
            child.create_derived(ctx)?;
            if !ctx.is_ok() {
                return Ok(false);
            }
            child.calculate_derived(ctx)?;
            if !ctx.is_ok() {
                return Ok(false);
            }
            child.export(ctx, &binding.output)?;
            if !ctx.is_ok() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl TaskHandler for FileIterator {
    fn handler_type(&self) -> &str {
        match self.mode {
            FileMode::Process => "file_iterator",
            FileMode::Derive => "derived_iterator",
        }
    }

    fn declare(&self, schema: &mut ConfigSchema) {
        schema.declare("output_suffix", "_derived");
    }

    fn configure(&mut self, config: &TaskConfig) -> Result<()> {
        self.output_suffix = config.text("output_suffix")?.to_string();
        Ok(())
    }

    fn initialize(&mut self, _ctx: &mut RunContext) -> Result<()> {
        self.processed.clear();
        Ok(())
    }

    fn manages_children(&self) -> bool {
        true
    }

    fn execute(&mut self, ctx: &mut RunContext, children: &mut Children<'_>) -> Result<Status> {
        let files = self.select()?;
        if files.is_empty() {
            return Err(CascadeError::NoInputFiles {
                selection: self.selection.describe(),
            });
        }
        let total = files.len();
        tracing::info!(files = total, mode = ?self.mode, "File loop started");

        for (index, file) in files.into_iter().enumerate() {
            let binding = FileBinding::for_input(file.as_str(), &self.output_suffix);
            tracing::info!(file = %binding.input, index = index + 1, total, "Processing file");
            ctx.bind_file(binding.clone());
            let outcome = match self.mode {
                FileMode::Process => self.process_file(ctx, children),
                FileMode::Derive => self.derive_file(ctx, children, &binding),
            };
            ctx.unbind_file();
            self.processed.push(file);
            if !outcome? {
                tracing::warn!(
                    file = %binding.input,
                    status = %ctx.status(),
                    "File loop aborted"
                );
                break;
            }
        }
        Ok(ctx.status())
    }
}
