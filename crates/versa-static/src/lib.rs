//! Static site generation for versioned documentation.
//!
//! Renders a tree of minijinja templates against a per-pass variable context,
//! alongside release archives synchronized by `versa-releases`, and injects
//! production values into the finished output.

pub mod assets;
pub mod builder;
pub mod config;
pub mod context;
pub mod inject;
pub mod renderer;
pub mod templates;

pub use builder::{BuildError, BuildResult, StaticBuilder};
pub use config::{BuildConfig, ConfigError};
pub use context::{TemplateContext, VARIABLES_FILE};
pub use inject::{
    InjectError, InjectReport, ProductionVariableInjector, ANALYTICS_KEY_PLACEHOLDER,
    SITE_URL_PLACEHOLDER,
};
pub use renderer::{RenderError, RenderPass, SiteRenderer};
pub use templates::{TemplateEngine, TEMPLATE_SUFFIX};
