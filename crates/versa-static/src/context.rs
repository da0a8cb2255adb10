//! Variable context shared by every template of a render pass.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use versa_releases::VersionPlan;

use crate::config::BuildConfig;

/// File in the source root holding static variable declarations.
pub const VARIABLES_FILE: &str = "variables.toml";

/// Immutable snapshot of template variables for one render pass.
///
/// Cloning is cheap and never copies the variables. A new pass builds a new
/// snapshot instead of mutating this one.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateContext {
    vars: Arc<BTreeMap<String, Value>>,
}

impl TemplateContext {
    /// Read the declarations file and assemble a snapshot stamped with the
    /// current time.
    ///
    /// A missing declarations file is fine; an unreadable or malformed one is
    /// logged and treated as empty.
    pub async fn load(config: &BuildConfig, plan: &VersionPlan) -> Self {
        let declared = read_declarations(&config.source_dir.join(VARIABLES_FILE)).await;
        Self::assemble(config, plan, declared, Utc::now())
    }

    /// Merge declared variables with the runtime values. Runtime keys win.
    pub fn assemble(
        config: &BuildConfig,
        plan: &VersionPlan,
        declared: Map<String, Value>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        let mut vars: BTreeMap<String, Value> = declared.into_iter().collect();

        let runtime = [
            ("siteUrl", json!(config.site_url)),
            ("latest", json!(plan.latest())),
            ("watch", json!(config.watch)),
            ("port", json!(config.port)),
            ("liveReloadPort", json!(config.live_reload_port)),
            (
                "lastModified",
                json!(last_modified.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ),
            ("releases", json!(plan.versions())),
            ("compatibility", json!(config.compatibility)),
        ];

        for (key, value) in runtime {
            if vars.insert(key.to_string(), value).is_some() {
                tracing::debug!("Runtime variable '{}' overrides declared value", key);
            }
        }

        Self {
            vars: Arc::new(vars),
        }
    }

    /// Look up a variable.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// The site URL this snapshot was built with.
    pub fn site_url(&self) -> &str {
        self.get("siteUrl").and_then(Value::as_str).unwrap_or_default()
    }

    /// Convert to a value the template engine can render against.
    pub fn to_template_value(&self) -> minijinja::Value {
        minijinja::Value::from_serialize(&*self.vars)
    }
}

async fn read_declarations(path: &Path) -> Map<String, Value> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(e) => {
            tracing::error!("Failed to read {}: {}", path.display(), e);
            return Map::new();
        }
    };

    match parse_declarations(&content) {
        Ok(vars) => vars,
        Err(e) => {
            tracing::error!("Failed to parse {}: {}", path.display(), e);
            Map::new()
        }
    }
}

fn parse_declarations(content: &str) -> Result<Map<String, Value>, String> {
    let table: toml::Table = toml::from_str(content).map_err(|e| e.to_string())?;

    match serde_json::to_value(table).map_err(|e| e.to_string())? {
        Value::Object(vars) => Ok(vars),
        _ => Ok(Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;
    use versa_releases::CompatibilityEntry;

    fn fixture() -> (BuildConfig, VersionPlan) {
        let config = BuildConfig {
            site_url: "https://docs.example.com".to_string(),
            compatibility: vec![CompatibilityEntry {
                product_version: "5.0".to_string(),
                api_versions: vec!["1.0".to_string(), "2.1".to_string()],
            }],
            latest: Some("2.1".to_string()),
            ..Default::default()
        };
        let plan = VersionPlan::new(&config.compatibility, config.latest.as_deref()).unwrap();
        (config, plan)
    }

    #[test]
    fn runtime_keys_override_declarations() {
        let (config, plan) = fixture();
        let declared = parse_declarations(
            r#"
            title = "Product Docs"
            siteUrl = "http://wrong.example.com"
            "#,
        )
        .unwrap();

        let ctx = TemplateContext::assemble(&config, &plan, declared, Utc::now());

        assert_eq!(ctx.get("title"), Some(&json!("Product Docs")));
        assert_eq!(ctx.site_url(), "https://docs.example.com");
        assert_eq!(ctx.get("latest"), Some(&json!("2.1")));
        assert_eq!(ctx.get("releases"), Some(&json!(["2.1", "1.0"])));
        assert_eq!(ctx.get("watch"), Some(&json!(false)));
        assert_eq!(ctx.get("liveReloadPort"), Some(&json!(35729)));
    }

    #[test]
    fn compatibility_uses_camel_case_keys() {
        let (config, plan) = fixture();
        let ctx = TemplateContext::assemble(&config, &plan, Map::new(), Utc::now());

        assert_eq!(
            ctx.get("compatibility"),
            Some(&json!([{ "productVersion": "5.0", "apiVersions": ["1.0", "2.1"] }]))
        );
    }

    #[test]
    fn stamps_last_modified_in_rfc3339() {
        let (config, plan) = fixture();
        let at = DateTime::parse_from_rfc3339("2024-03-01T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let ctx = TemplateContext::assemble(&config, &plan, Map::new(), at);

        assert_eq!(ctx.get("lastModified"), Some(&json!("2024-03-01T12:30:00Z")));
    }

    #[tokio::test]
    async fn malformed_declarations_are_ignored() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join(VARIABLES_FILE), "title = ").unwrap();
        let (mut config, plan) = fixture();
        config.source_dir = temp.path().to_path_buf();

        let ctx = TemplateContext::load(&config, &plan).await;

        assert!(ctx.get("title").is_none());
        assert_eq!(ctx.get("latest"), Some(&json!("2.1")));
    }

    #[tokio::test]
    async fn loads_nested_declarations() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join(VARIABLES_FILE),
            "[links]\ngithub = \"https://github.com/example\"\n",
        )
        .unwrap();
        let (mut config, plan) = fixture();
        config.source_dir = temp.path().to_path_buf();

        let ctx = TemplateContext::load(&config, &plan).await;

        assert_eq!(
            ctx.get("links"),
            Some(&json!({ "github": "https://github.com/example" }))
        );
    }
}
