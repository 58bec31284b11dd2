//! A deliberately small subset of JSON Schema: object-with-properties,
//! `string`/`boolean`/`array<string>`/`object<string,string>` leaves. Enough
//! to cover `launch.json`; anything this doesn't recognize falls back to
//! `serde_json::Value` rather than failing the generator, mirroring
//! `genschema`'s `interface{}` fallback for unsupported shapes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Result;
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct SchemaDoc {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
}

#[derive(Deserialize, Debug)]
pub struct Property {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub items: Option<Box<Property>>,
    #[serde(default, rename = "additionalProperties")]
    pub additional_properties: Option<Box<Property>>,
}

pub fn render(doc: &SchemaDoc) -> Result<String> {
    anyhow::ensure!(doc.ty == "object", "top-level schema must be an object");

    let mut out = String::new();
    writeln!(out, "//! Generated by `cargo run -p xtask -- generate-schema`.")?;
    writeln!(out, "//! Do not hand-edit; edit `xtask/schema/launch.json` and regenerate.")?;
    out.push('\n');
    writeln!(out, "use std::collections::HashMap;")?;
    out.push('\n');
    if let Some(desc) = &doc.description {
        writeln!(out, "/// {desc}")?;
    }
    writeln!(out, "#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]")?;
    writeln!(out, "pub struct {} {{", doc.title)?;

    for (name, prop) in &doc.properties {
        let field = snake_case(name);
        let required = doc.required.contains(name);
        let rust_ty = rust_type(prop);

        if let Some(desc) = &prop.description {
            writeln!(out, "    /// {desc}")?;
        }
        if field != *name {
            writeln!(out, "    #[serde(rename = \"{name}\")]")?;
        }
        if required {
            writeln!(out, "    pub {field}: {rust_ty},")?;
        } else {
            writeln!(
                out,
                "    #[serde(default, skip_serializing_if = \"Option::is_none\")]"
            )?;
            writeln!(out, "    pub {field}: Option<{rust_ty}>,")?;
        }
    }

    writeln!(out, "}}")?;
    Ok(out)
}

fn rust_type(prop: &Property) -> String {
    match prop.ty.as_str() {
        "string" => "String".to_string(),
        "boolean" => "bool".to_string(),
        "integer" => "i64".to_string(),
        "array" => {
            let item = prop
                .items
                .as_deref()
                .map(rust_type)
                .unwrap_or_else(|| "serde_json::Value".to_string());
            format!("Vec<{item}>")
        }
        "object" => {
            let value = prop
                .additional_properties
                .as_deref()
                .map(rust_type)
                .unwrap_or_else(|| "serde_json::Value".to_string());
            format!("HashMap<String, {value}>")
        }
        _ => "serde_json::Value".to_string(),
    }
}

/// `stopOnEntry` -> `stop_on_entry`; `unsafe` -> `r#unsafe` (Rust keyword).
fn snake_case(name: &str) -> String {
    let mut out = String::new();
    for c in name.chars() {
        if c.is_uppercase() {
            out.push('_');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    if matches!(out.as_str(), "unsafe" | "type" | "fn" | "mod" | "ref" | "move") {
        out = format!("r#{out}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_property_becomes_snake_case_field() {
        assert_eq!(snake_case("stopOnEntry"), "stop_on_entry");
        assert_eq!(snake_case("program"), "program");
    }

    #[test]
    fn rust_keyword_property_is_raw_identifier() {
        assert_eq!(snake_case("unsafe"), "r#unsafe");
    }

    #[test]
    fn render_emits_required_and_optional_fields() {
        let doc: SchemaDoc = serde_json::from_str(
            r#"{
                "title": "Example",
                "type": "object",
                "required": ["program"],
                "properties": {
                    "program": { "type": "string" },
                    "stopOnEntry": { "type": "boolean" }
                }
            }"#,
        )
        .unwrap();
        let rendered = render(&doc).unwrap();
        assert!(rendered.contains("pub program: String,"));
        assert!(rendered.contains("pub stop_on_entry: Option<bool>,"));
    }
}
