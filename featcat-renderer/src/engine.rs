//! Tera rendering engine: [`TemplateEngine`] and [`ProposalRenderer`].
//!
//! # Template layout
//!
//! | Operation | Templates                                                   |
//! |-----------|-------------------------------------------------------------|
//! | create    | `create/title.tera`, `create/description.tera`, `create/commit.tera` |
//! | update    | `update/title.tera`, `update/description.tera`, `update/commit.tera` |
//! | delete    | `delete/title.tera`, `delete/description.tera`, `delete/commit.tera` |
//!
//! Shared fragments live under `_partials/`. A user template directory with
//! the same relative layout overrides individual files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use featcat_core::Operation;

use crate::context::ProposalContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("_partials/feature.tera", include_str!("templates/_partials/feature.tera")),
    ("_partials/footer.tera", include_str!("templates/_partials/footer.tera")),
    ("create/title.tera", include_str!("templates/create/title.tera")),
    ("create/description.tera", include_str!("templates/create/description.tera")),
    ("create/commit.tera", include_str!("templates/create/commit.tera")),
    ("update/title.tera", include_str!("templates/update/title.tera")),
    ("update/description.tera", include_str!("templates/update/description.tera")),
    ("update/commit.tera", include_str!("templates/update/commit.tera")),
    ("delete/title.tera", include_str!("templates/delete/title.tera")),
    ("delete/description.tera", include_str!("templates/delete/description.tera")),
    ("delete/commit.tera", include_str!("templates/delete/commit.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn template_name(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn walk_tera_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if path.is_dir() {
            walk_tera_files(&path, out)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("tera") {
            out.push(path);
        }
    }
    Ok(())
}

/// `(name, source)` pairs for every `.tera` file under `dir`. A missing
/// directory contributes nothing.
fn load_overrides(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    walk_tera_files(dir, &mut files)?;
    files
        .into_iter()
        .map(|path| {
            let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
            let source = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            Ok((template_name(rel), source))
        })
        .collect()
}

fn build_tera(override_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = TPLS
        .iter()
        .map(|(name, src)| (template_name(Path::new(name)), (*src).to_string()))
        .collect();
    if let Some(dir) = override_dir {
        templates.extend(load_overrides(dir)?);
    }

    let mut tera = Tera::default();
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())?;
    Ok(tera)
}

fn template_for(operation: Operation, part: &str) -> String {
    format!("{operation}/{part}.tera")
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Embedded templates plus optional user overrides.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    pub fn new(override_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(TemplateEngine { tera: build_tera(override_dir)? })
    }

    /// Render a single named template against `ctx`.
    pub fn render(&self, name: &str, ctx: &ProposalContext) -> Result<String, RenderError> {
        Ok(self.tera.render(name, &ctx.to_tera_context()?)?)
    }
}

// ---------------------------------------------------------------------------
// ProposalRenderer
// ---------------------------------------------------------------------------

/// The three pieces of text attached to one proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalTexts {
    /// Single line.
    pub title: String,
    pub description: String,
    /// Single line.
    pub commit_message: String,
}

/// Renders [`ProposalTexts`] for any operation. Create once and reuse.
pub struct ProposalRenderer {
    engine: TemplateEngine,
}

impl ProposalRenderer {
    pub fn new(override_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(ProposalRenderer { engine: TemplateEngine::new(override_dir)? })
    }

    pub fn render(&self, ctx: &ProposalContext) -> Result<ProposalTexts, RenderError> {
        Ok(ProposalTexts {
            title: self.one_line(ctx, "title")?,
            description: self.block(ctx, "description")?,
            commit_message: self.one_line(ctx, "commit")?,
        })
    }

    fn block(&self, ctx: &ProposalContext, part: &str) -> Result<String, RenderError> {
        let name = template_for(ctx.operation, part);
        let text = self.engine.render(&name, ctx)?.replace("\r\n", "\n");
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(RenderError::Empty(name));
        }
        Ok(text)
    }

    /// Titles and commit subjects collapse to their first non-blank line.
    fn one_line(&self, ctx: &ProposalContext, part: &str) -> Result<String, RenderError> {
        let text = self.block(ctx, part)?;
        Ok(text.lines().next().unwrap_or_default().trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
