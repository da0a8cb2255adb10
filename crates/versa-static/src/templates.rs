//! Template engine for rendering source pages.

use std::path::Path;

use minijinja::{path_loader, AutoEscape, Environment};

use crate::context::TemplateContext;

/// Suffix marking a file as a template. Stripped from the output path.
pub const TEMPLATE_SUFFIX: &str = ".jinja";

/// Template engine using minijinja.
///
/// Templates are loaded lazily from the source directory, so they can include
/// or extend each other by their path relative to it. Build a new engine for
/// each render pass to pick up edited templates.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create an engine loading templates from `source_dir`.
    pub fn new(source_dir: &Path) -> Self {
        let mut env = Environment::new();
        env.set_loader(path_loader(source_dir.to_path_buf()));
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_keep_trailing_newline(true);

        Self { env }
    }

    /// Render the template at `name` (a `/`-separated path relative to the
    /// source directory).
    pub fn render(&self, name: &str, context: &TemplateContext) -> Result<String, minijinja::Error> {
        let tmpl = self.env.get_template(name)?;
        tmpl.render(context.to_template_value())
    }
}
