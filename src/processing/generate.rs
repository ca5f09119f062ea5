//! Handlebars code generation from built-in or inline templates

use handlebars::{handlebars_helper, no_escape, Handlebars};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::modules::error::EngineError;

struct BuiltinTemplate {
    language: &'static str,
    name: &'static str,
    source: &'static str,
    defaults: fn() -> Value,
}

const BUILTIN_TEMPLATES: &[BuiltinTemplate] = &[
    BuiltinTemplate {
        language: "rhai",
        name: "script",
        source: include_str!("../templates/generate/rhai/script.hbs"),
        defaults: || json!({"description": "Generated script", "message": "Hello, world!"}),
    },
    BuiltinTemplate {
        language: "rhai",
        name: "function",
        source: include_str!("../templates/generate/rhai/function.hbs"),
        defaults: || {
            json!({"description": "Generated function", "name": "run", "params": [], "body": "()"})
        },
    },
    BuiltinTemplate {
        language: "go",
        name: "main",
        source: include_str!("../templates/generate/go/main.hbs"),
        defaults: || json!({"description": "Generated program", "message": "Hello, world!"}),
    },
    BuiltinTemplate {
        language: "go",
        name: "function",
        source: include_str!("../templates/generate/go/function.hbs"),
        defaults: || {
            json!({
                "description": "is generated",
                "name": "run",
                "params": [],
                "returns": "",
                "body": "return"
            })
        },
    },
    BuiltinTemplate {
        language: "go",
        name: "struct",
        source: include_str!("../templates/generate/go/struct.hbs"),
        defaults: || json!({"description": "is generated", "name": "Record", "fields": []}),
    },
    BuiltinTemplate {
        language: "wat",
        name: "module",
        source: include_str!("../templates/generate/wat/module.hbs"),
        defaults: || json!({"description": "Generated module", "message": "Hello, world!"}),
    },
    BuiltinTemplate {
        language: "wat",
        name: "function",
        source: include_str!("../templates/generate/wat/function.hbs"),
        defaults: || json!({"description": "Generated function", "name": "add", "op": "add"}),
    },
    BuiltinTemplate {
        language: "json",
        name: "object",
        source: include_str!("../templates/generate/json/object.hbs"),
        defaults: || json!({"fields": {}}),
    },
    BuiltinTemplate {
        language: "yaml",
        name: "document",
        source: include_str!("../templates/generate/yaml/document.hbs"),
        defaults: || {
            json!({"description": "Generated document", "name": "example", "version": "1.0.0", "fields": {}})
        },
    },
];

handlebars_helper!(json_helper: |value: Json| {
    serde_json::to_string_pretty(value).unwrap_or_default()
});

handlebars_helper!(yaml_helper: |value: Json| {
    match value {
        Value::Object(map) if map.is_empty() => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
});

/// Names of the built-in templates for `language`
pub fn template_names(language: &str) -> Vec<&'static str> {
    BUILTIN_TEMPLATES
        .iter()
        .filter(|t| t.language.eq_ignore_ascii_case(language))
        .map(|t| t.name)
        .collect()
}

pub struct CodeGenerator {
    handlebars: Handlebars<'static>,
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(no_escape);
        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("yaml", Box::new(yaml_helper));
        Self { handlebars }
    }

    /// Render a built-in template, or `inline` when given. Caller values
    /// override the template defaults.
    pub fn generate(
        &self,
        language: &str,
        template: Option<&str>,
        inline: Option<&str>,
        values: &HashMap<String, Value>,
    ) -> Result<(String, String), EngineError> {
        let (name, source, mut context) = match inline {
            Some(source) => ("inline".to_string(), source, Map::new()),
            None => {
                let builtin = self.resolve(language, template)?;
                let defaults = match (builtin.defaults)() {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                (builtin.name.to_string(), builtin.source, defaults)
            }
        };

        for (key, value) in values {
            context.insert(key.clone(), value.clone());
        }

        let rendered = self
            .handlebars
            .render_template(source, &Value::Object(context))
            .map_err(|e| EngineError::Generation {
                message: format!("template '{name}': {e}"),
            })?;
        Ok((rendered, name))
    }

    fn resolve(
        &self,
        language: &str,
        template: Option<&str>,
    ) -> Result<&'static BuiltinTemplate, EngineError> {
        let mut candidates = BUILTIN_TEMPLATES
            .iter()
            .filter(|t| t.language.eq_ignore_ascii_case(language));

        let found = match template {
            Some(name) => candidates.find(|t| t.name == name),
            None => candidates.next(),
        };

        found.ok_or_else(|| EngineError::Generation {
            message: format!(
                "no template '{}' for {} (available: {})",
                template.unwrap_or("<default>"),
                language,
                template_names(language).join(", ")
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: Value) -> HashMap<String, Value> {
        serde_json::from_value(pairs).unwrap()
    }

    #[test]
    fn test_go_function_template() {
        let generator = CodeGenerator::new();
        let (code, name) = generator
            .generate(
                "go",
                Some("function"),
                None,
                &values(json!({
                    "name": "Sum",
                    "params": [{"name": "a", "type": "int"}, {"name": "b", "type": "int"}],
                    "returns": "int",
                    "body": "return a + b"
                })),
            )
            .unwrap();
        assert_eq!(name, "function");
        assert!(code.contains("func Sum(a int, b int) int {"));
        assert!(code.contains("\treturn a + b"));
    }

    #[test]
    fn test_default_template_and_no_html_escaping() {
        let generator = CodeGenerator::new();
        let (code, name) = generator
            .generate("rhai", None, None, &values(json!({"message": "a < b & \"c\""})))
            .unwrap();
        assert_eq!(name, "script");
        assert!(code.contains("a < b &"));
    }

    #[test]
    fn test_json_object_template() {
        let generator = CodeGenerator::new();
        let (code, _) = generator
            .generate("json", None, None, &values(json!({"fields": {"a": 1}})))
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(&code).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_unknown_template_and_missing_values_fail() {
        let generator = CodeGenerator::new();
        assert!(matches!(
            generator.generate("go", Some("nope"), None, &HashMap::new()),
            Err(EngineError::Generation { .. })
        ));
        assert!(matches!(
            generator.generate("go", None, Some("{{missing}}"), &HashMap::new()),
            Err(EngineError::Generation { .. })
        ));
    }

    #[test]
    fn test_wat_module_template_sets_length() {
        let generator = CodeGenerator::new();
        let (code, _) = generator
            .generate("wat", Some("module"), None, &values(json!({"message": "hey"})))
            .unwrap();
        assert!(code.contains("(i32.const 3)"));
    }
}
