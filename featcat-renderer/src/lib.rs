//! # featcat-renderer
//!
//! Tera templates for the text attached to a catalog proposal: the commit
//! message, the merge request title and its review checklist.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use featcat_core::Feature;
//! use featcat_renderer::{ProposalContext, ProposalRenderer};
//!
//! fn describe(feature: &Feature) {
//!     let renderer = ProposalRenderer::new(None).expect("embedded templates");
//!     let ctx = ProposalContext::for_create(feature, "catalog/create-x-1a2b", "features/x.yaml");
//!     if let Ok(texts) = renderer.render(&ctx) {
//!         println!("{}\n\n{}", texts.title, texts.description);
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{ChangeCtx, FeatureCtx, ProposalContext};
pub use engine::{ProposalRenderer, ProposalTexts, TemplateEngine};
pub use error::RenderError;
