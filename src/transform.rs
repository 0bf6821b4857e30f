use anyhow::{bail, Context, Result};
use std::path::Path;

/// Builds the statements that turn a brand's staged rows into catalog rows.
///
/// Statement contents are opaque to the pipeline; they are executed in order.
pub trait TransformationService: Send + Sync {
    fn transform_statement(&self, brand_id: i64) -> Result<String>;
    fn validation_statement(&self, brand_id: i64) -> Result<String>;
}

/// Runs an opaque statement as its own committed unit.
#[async_trait::async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(&self, statement: &str) -> Result<u64>;
}

pub const BRAND_PLACEHOLDER: &str = "{brand_id}";

/// Statements rendered from SQL templates with a `{brand_id}` placeholder.
#[derive(Debug, Clone)]
pub struct SqlTemplateTransformer {
    transform: String,
    validate: String,
}

impl SqlTemplateTransformer {
    pub fn new(transform: impl Into<String>, validate: impl Into<String>) -> Result<Self> {
        let transform = transform.into();
        let validate = validate.into();
        for (name, sql) in [("transform", &transform), ("validate", &validate)] {
            if sql.trim().is_empty() {
                bail!("{name} template is empty");
            }
            if !sql.contains(BRAND_PLACEHOLDER) {
                bail!("{name} template has no {BRAND_PLACEHOLDER} placeholder");
            }
        }
        Ok(Self {
            transform,
            validate,
        })
    }

    pub fn from_files(transform: &Path, validate: &Path) -> Result<Self> {
        let t = std::fs::read_to_string(transform)
            .with_context(|| format!("reading transform template {}", transform.display()))?;
        let v = std::fs::read_to_string(validate)
            .with_context(|| format!("reading validation template {}", validate.display()))?;
        Self::new(t, v)
    }

    fn render(template: &str, brand_id: i64) -> String {
        // brand ids are integers, so substitution cannot inject SQL
        template.replace(BRAND_PLACEHOLDER, &brand_id.to_string())
    }
}

impl TransformationService for SqlTemplateTransformer {
    fn transform_statement(&self, brand_id: i64) -> Result<String> {
        Ok(Self::render(&self.transform, brand_id))
    }

    fn validation_statement(&self, brand_id: i64) -> Result<String> {
        Ok(Self::render(&self.validate, brand_id))
    }
}
