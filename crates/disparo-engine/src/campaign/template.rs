//! Template rendering - personalizes variant text per contact
//!
//! Variant text is compiled once into a flat list of literal and
//! placeholder segments; rendering a contact is then a single pass over
//! the segments into one output buffer. Unknown or valueless
//! placeholders render as the empty string, never as an error.

use std::collections::HashMap;
use std::sync::Mutex;

use disparo_storage::models::Contact;
use serde_json::Value;

/// Time-of-day greeting for the campaign's local hour
pub fn greeting_for_hour(hour: u32) -> &'static str {
    if hour < 12 {
        "Bom dia"
    } else if hour < 18 {
        "Boa tarde"
    } else {
        "Boa noite"
    }
}

/// One piece of a compiled template
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Name,
    FirstName,
    Greeting,
    /// `{{custom.key}}` - looked up in the contact's custom fields
    Custom(String),
    /// A placeholder with no known source; renders empty
    Unknown,
}

/// A variant text parsed into renderable segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    segments: Vec<Segment>,
}

impl CompiledTemplate {
    /// Parse `{{placeholder}}` markers out of a template. An unclosed
    /// `{{` is kept as literal text.
    pub fn compile(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            let Some(close) = rest[open + 2..].find("}}") else {
                break;
            };

            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }

            let key = rest[open + 2..open + 2 + close].trim();
            segments.push(match key {
                "name" => Segment::Name,
                "first_name" => Segment::FirstName,
                "greeting" => Segment::Greeting,
                _ => match key.strip_prefix("custom.") {
                    Some(field) if !field.is_empty() => Segment::Custom(field.to_string()),
                    _ => Segment::Unknown,
                },
            });

            rest = &rest[open + 2 + close + 2..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Self { segments }
    }

    /// Render for one contact. `local_hour` is the hour of day (0..24)
    /// in the campaign's timezone and drives the greeting.
    pub fn render(&self, contact: &Contact, local_hour: u32) -> String {
        let name = contact.name.as_deref().unwrap_or("");

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Name => out.push_str(name),
                Segment::FirstName => {
                    out.push_str(name.split_whitespace().next().unwrap_or(""));
                }
                Segment::Greeting => out.push_str(greeting_for_hour(local_hour)),
                Segment::Custom(field) => match contact.custom_fields.get(field) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Number(n)) => out.push_str(&n.to_string()),
                    Some(Value::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
                    Some(Value::Null) | None => {}
                    Some(other) => out.push_str(&other.to_string()),
                },
                Segment::Unknown => {}
            }
        }
        out
    }
}

/// Renderer with a per-text compilation cache. A campaign carries at
/// most five variant texts, so the cache stays tiny for the lifetime of
/// a dispatcher.
pub struct TemplateRenderer {
    compiled: Mutex<HashMap<String, CompiledTemplate>>,
}

impl TemplateRenderer {
    /// Create a new template renderer
    pub fn new() -> Self {
        Self {
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// Render a variant text for one contact, compiling it on first use
    pub fn render(&self, template: &str, contact: &Contact, local_hour: u32) -> String {
        let mut cache = self.compiled.lock().unwrap_or_else(|e| e.into_inner());
        let compiled = cache
            .entry(template.to_string())
            .or_insert_with(|| CompiledTemplate::compile(template));
        compiled.render(contact, local_hour)
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_contact(name: Option<&str>, custom: serde_json::Value) -> Contact {
        Contact {
            id: uuid::Uuid::new_v4(),
            tenant_id: uuid::Uuid::new_v4(),
            phone: "+5511999990001".to_string(),
            name: name.map(String::from),
            custom_fields: custom,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn renders_first_name() {
        let renderer = TemplateRenderer::new();
        let contact = test_contact(Some("Ana Souza"), serde_json::json!({}));

        let result = renderer.render("Hi {{first_name}}", &contact, 10);

        assert_eq!(result, "Hi Ana");
    }

    #[test]
    fn renders_full_name_and_greeting() {
        let renderer = TemplateRenderer::new();
        let contact = test_contact(Some("Ana Souza"), serde_json::json!({}));

        let result = renderer.render("{{greeting}}, {{name}}!", &contact, 14);

        assert_eq!(result, "Boa tarde, Ana Souza!");
    }

    #[test]
    fn renders_custom_fields() {
        let renderer = TemplateRenderer::new();
        let contact = test_contact(
            Some("Bob"),
            serde_json::json!({ "city": "Recife", "plan": "pro", "seats": 4 }),
        );

        let result = renderer.render(
            "{{first_name}} from {{custom.city}} on {{custom.plan}} ({{custom.seats}})",
            &contact,
            9,
        );

        assert_eq!(result, "Bob from Recife on pro (4)");
    }

    #[test]
    fn missing_values_render_empty() {
        let renderer = TemplateRenderer::new();
        let contact = test_contact(None, serde_json::json!({}));

        let result = renderer.render("Hello {{name}}{{first_name}}{{custom.city}}!", &contact, 9);

        assert_eq!(result, "Hello !");
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        let renderer = TemplateRenderer::new();
        let contact = test_contact(Some("Ana"), serde_json::json!({}));

        let result = renderer.render("A{{mystery}}B{{custom.}}C", &contact, 9);

        assert_eq!(result, "ABC");
    }

    #[test]
    fn unclosed_marker_stays_literal() {
        let contact = test_contact(Some("Ana"), serde_json::json!({}));
        let compiled = CompiledTemplate::compile("Hi {{first_name}} {{oops");

        assert_eq!(compiled.render(&contact, 9), "Hi Ana {{oops");
    }

    #[test]
    fn compilation_splits_literals_and_placeholders() {
        let compiled = CompiledTemplate::compile("{{greeting}}, {{ name }}!");

        assert_eq!(
            compiled.segments,
            vec![
                Segment::Greeting,
                Segment::Literal(", ".to_string()),
                Segment::Name,
                Segment::Literal("!".to_string()),
            ]
        );
    }

    #[test]
    fn plain_text_passes_through() {
        let contact = test_contact(None, serde_json::json!({}));
        let compiled = CompiledTemplate::compile("No placeholders here");

        assert_eq!(compiled.render(&contact, 9), "No placeholders here");
    }

    #[test]
    fn greeting_boundaries() {
        assert_eq!(greeting_for_hour(0), "Bom dia");
        assert_eq!(greeting_for_hour(11), "Bom dia");
        assert_eq!(greeting_for_hour(12), "Boa tarde");
        assert_eq!(greeting_for_hour(17), "Boa tarde");
        assert_eq!(greeting_for_hour(18), "Boa noite");
        assert_eq!(greeting_for_hour(23), "Boa noite");
    }
}
