use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub code: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Subject and body after `{{var}}` substitution, ready for a delivery sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedContent {
    pub subject: String,
    pub body: String,
}
