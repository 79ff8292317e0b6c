use handlebars::Handlebars;
use serde_json::json;

use crate::error::CartridgeError;

const PLACEHOLDER_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Resource {{resource}}</title></head>
<body>
<h1>Resource {{resource}}</h1>
<p>Placeholder created during conversion for a missing or invalid target: <code>{{reference}}</code>.</p>
</body>
</html>
"#;

/// Produces the bytes written for a reference that has no backing file.
pub trait PlaceholderRenderer {
    fn render(&self, resource: &str, reference: &str) -> Result<Vec<u8>, CartridgeError>;
}

/// Small HTML page naming the resource and the reference it could not resolve.
pub struct HtmlPlaceholder {
    registry: Handlebars<'static>,
}

impl HtmlPlaceholder {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        Self { registry }
    }
}

impl Default for HtmlPlaceholder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaceholderRenderer for HtmlPlaceholder {
    fn render(&self, resource: &str, reference: &str) -> Result<Vec<u8>, CartridgeError> {
        let tokens = json!({ "resource": resource, "reference": reference });
        let body = self
            .registry
            .render_template(PLACEHOLDER_TEMPLATE, &tokens)
            .map_err(|e| CartridgeError::Template(e.to_string()))?;
        Ok(body.into_bytes())
    }
}
