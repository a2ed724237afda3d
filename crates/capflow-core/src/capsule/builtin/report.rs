use capflow_types::artifact::SlotDataType;
use capflow_types::capsule::{CapsuleCategory, CapsuleTypeMeta, ConfigFieldType};
use serde_json::{Value, json};

use super::{field, required, slot, with_default, with_options};
use crate::capsule::behavior::{Capsule, CapsuleContext, CapsuleOutput, CapsuleRunError, value_to_text};
use crate::capsule::template::TemplateScope;

/// Terminal node that renders upstream content as a shareable document.
pub struct ReportRendererCapsule {
    meta: CapsuleTypeMeta,
}

impl ReportRendererCapsule {
    pub const TYPE_KEY: &'static str = "report-renderer";

    pub fn new() -> Self {
        Self {
            meta: CapsuleTypeMeta {
                type_key: Self::TYPE_KEY.to_string(),
                name: "Report Renderer".to_string(),
                description: "Renders content as a Markdown, HTML or plain text report".to_string(),
                icon: "file-text".to_string(),
                category: CapsuleCategory::Output,
                config_schema: vec![
                    required(field("title", "Title", ConfigFieldType::Text)),
                    with_options(
                        with_default(field("format", "Format", ConfigFieldType::Select), json!("markdown")),
                        &["markdown", "html", "text"],
                    ),
                ],
                default_inputs: vec![slot("content", "Content", SlotDataType::Any, true)],
                default_outputs: vec![slot("report", "Report", SlotDataType::File, false)],
                testable: true,
            },
        }
    }
}

impl Default for ReportRendererCapsule {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Structured content is pretty-printed, text is passed through.
fn body_text(content: &Value) -> (String, bool) {
    match content {
        Value::Object(_) | Value::Array(_) => (
            serde_json::to_string_pretty(content).unwrap_or_else(|_| content.to_string()),
            true,
        ),
        other => (value_to_text(other), false),
    }
}

impl Capsule for ReportRendererCapsule {
    fn meta(&self) -> &CapsuleTypeMeta {
        &self.meta
    }

    async fn execute(&self, ctx: CapsuleContext<'_>) -> Result<CapsuleOutput, CapsuleRunError> {
        let scope = TemplateScope {
            inputs: ctx.inputs,
            variables: ctx.variables,
        };
        let title = scope.render(ctx.require_str("title")?);
        let content = ctx
            .input_json("content")
            .ok_or_else(|| CapsuleRunError::MissingInput("content".to_string()))?;
        let (body, structured) = body_text(&content);

        let (document, mime_type) = match ctx.config_str("format").unwrap_or("markdown") {
            "markdown" => {
                let body = if structured {
                    format!("```json\n{body}\n```")
                } else {
                    body
                };
                (format!("# {title}\n\n{body}\n"), "text/markdown")
            }
            "html" => {
                let body = if structured {
                    format!("<pre>{}</pre>", escape_html(&body))
                } else {
                    body.split("\n\n")
                        .map(|p| format!("<p>{}</p>", escape_html(p.trim())))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                let title = escape_html(&title);
                (
                    format!(
                        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n{body}\n</body></html>\n"
                    ),
                    "text/html",
                )
            }
            "text" => {
                let underline = "=".repeat(title.chars().count());
                (format!("{title}\n{underline}\n\n{body}\n"), "text/plain")
            }
            other => {
                return Err(CapsuleRunError::Config(format!("unknown format '{other}'")));
            }
        };

        let size = document.len();
        Ok(CapsuleOutput::new()
            .with_text("report", document, mime_type)
            .log(format!("rendered {mime_type} report '{title}' ({size} bytes)")))
    }
}
