//! JSON and YAML document operations

use serde::Serialize;
use serde_json::Value;

use crate::modules::error::EngineError;
use crate::types::{AnalysisReport, Diagnostic, LineStats};

pub const DEFAULT_JSON_INDENT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Json,
    Yaml,
}

impl DataFormat {
    pub fn from_language(language: &str) -> Option<Self> {
        match language.to_ascii_lowercase().as_str() {
            "json" => Some(DataFormat::Json),
            "yaml" | "yml" => Some(DataFormat::Yaml),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Json => "json",
            DataFormat::Yaml => "yaml",
        }
    }
}

/// Parse failure with an optional 1-based position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ParseFailure {
    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.message.clone())
            .at(self.line, self.column)
            .with_rule("syntax")
    }
}

pub fn parse(source: &str, format: DataFormat) -> Result<Value, ParseFailure> {
    match format {
        DataFormat::Json => serde_json::from_str(source).map_err(|e| ParseFailure {
            message: e.to_string(),
            line: Some(e.line()),
            column: Some(e.column()),
        }),
        DataFormat::Yaml => serde_yaml::from_str(source).map_err(|e| {
            let location = e.location();
            ParseFailure {
                message: e.to_string(),
                line: location.as_ref().map(|l| l.line()),
                column: location.as_ref().map(|l| l.column()),
            }
        }),
    }
}

pub fn to_json_pretty(value: &Value, indent: usize) -> Result<String, serde_json::Error> {
    let indent = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn to_yaml(value: &Value) -> Result<String, EngineError> {
    serde_yaml::to_string(value).map_err(|e| EngineError::Transpile {
        message: format!("YAML serialization error: {e}"),
    })
}

/// Pretty-print a document. Invalid input is always a `FormatError`.
pub fn format(source: &str, format: DataFormat, indent: Option<usize>) -> Result<String, EngineError> {
    let value = parse(source, format).map_err(|f| EngineError::Format {
        message: f.message,
        line: f.line,
        column: f.column,
    })?;

    match format {
        DataFormat::Json => {
            let mut pretty = to_json_pretty(&value, indent.unwrap_or(DEFAULT_JSON_INDENT))
                .map_err(|e| EngineError::Format {
                    message: e.to_string(),
                    line: None,
                    column: None,
                })?;
            pretty.push('\n');
            Ok(pretty)
        }
        DataFormat::Yaml => serde_yaml::to_string(&value).map_err(|e| EngineError::Format {
            message: e.to_string(),
            line: None,
            column: None,
        }),
    }
}

/// Compact single-line JSON; YAML minifies to its JSON flow form
pub fn minify(source: &str, format: DataFormat) -> Result<String, EngineError> {
    let value = parse(source, format).map_err(|f| EngineError::Minify {
        message: f.message,
    })?;
    serde_json::to_string(&value).map_err(|e| EngineError::Minify {
        message: e.to_string(),
    })
}

pub fn transpile(source: &str, from: DataFormat, to: DataFormat) -> Result<String, EngineError> {
    let value = parse(source, from).map_err(|f| EngineError::Transpile {
        message: format!("invalid {} input: {}", from.as_str(), f.message),
    })?;
    match to {
        DataFormat::Json => {
            let mut out = to_json_pretty(&value, DEFAULT_JSON_INDENT)?;
            out.push('\n');
            Ok(out)
        }
        DataFormat::Yaml => to_yaml(&value),
    }
}

pub fn validate(source: &str, format: DataFormat) -> Vec<Diagnostic> {
    match parse(source, format) {
        Ok(_) => Vec::new(),
        Err(failure) => vec![failure.diagnostic()],
    }
}

#[derive(Debug, Default)]
struct Shape {
    objects: usize,
    arrays: usize,
    keys: usize,
    strings: usize,
    numbers: usize,
    booleans: usize,
    nulls: usize,
    max_depth: usize,
}

impl Shape {
    fn visit(&mut self, value: &Value, depth: usize, keys: &mut Vec<String>) {
        self.max_depth = self.max_depth.max(depth);
        match value {
            Value::Object(map) => {
                self.objects += 1;
                self.keys += map.len();
                for (k, v) in map {
                    keys.push(k.clone());
                    self.visit(v, depth + 1, keys);
                }
            }
            Value::Array(items) => {
                self.arrays += 1;
                for item in items {
                    self.visit(item, depth + 1, keys);
                }
            }
            Value::String(_) => self.strings += 1,
            Value::Number(_) => self.numbers += 1,
            Value::Bool(_) => self.booleans += 1,
            Value::Null => self.nulls += 1,
        }
    }
}

pub fn analyze(source: &str, format: DataFormat) -> Result<AnalysisReport, EngineError> {
    let value = parse(source, format).map_err(|f| EngineError::Analysis {
        message: f.message,
    })?;

    let mut shape = Shape::default();
    let mut keys = Vec::new();
    shape.visit(&value, 0, &mut keys);

    let mut unique = keys.clone();
    unique.sort();
    unique.dedup();

    let total = source.lines().count();
    let blank = source.lines().filter(|l| l.trim().is_empty()).count();
    let comment = match format {
        DataFormat::Yaml => source
            .lines()
            .filter(|l| l.trim_start().starts_with('#'))
            .count(),
        DataFormat::Json => 0,
    };

    let mut extra = serde_json::Map::new();
    extra.insert("objects".to_string(), shape.objects.into());
    extra.insert("arrays".to_string(), shape.arrays.into());
    extra.insert("keys".to_string(), shape.keys.into());
    extra.insert("strings".to_string(), shape.strings.into());
    extra.insert("numbers".to_string(), shape.numbers.into());
    extra.insert("booleans".to_string(), shape.booleans.into());
    extra.insert("nulls".to_string(), shape.nulls.into());
    extra.insert(
        "rootType".to_string(),
        match &value {
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
        }
        .into(),
    );

    Ok(AnalysisReport {
        language: format.as_str().to_string(),
        lines: LineStats {
            total,
            code: total - blank - comment,
            comment,
            blank,
        },
        characters: source.chars().count(),
        functions: Vec::new(),
        max_nesting_depth: shape.max_depth,
        cyclomatic_complexity: 1,
        identifiers: keys.len(),
        unique_identifiers: unique.len(),
        string_literals: shape.strings,
        imports: Vec::new(),
        exports: Vec::new(),
        extra,
    })
}

/// Rename every object key equal to `from`; returns the number of keys renamed
pub fn rename_key(value: &mut Value, from: &str, to: &str) -> usize {
    match value {
        Value::Object(map) => {
            let mut renamed = 0;
            if map.contains_key(from) {
                // Rebuild so the renamed key keeps its position
                for (key, inner) in std::mem::take(map) {
                    if key == from {
                        map.insert(to.to_string(), inner);
                        renamed += 1;
                    } else {
                        map.insert(key, inner);
                    }
                }
            }
            for v in map.values_mut() {
                renamed += rename_key(v, from, to);
            }
            renamed
        }
        Value::Array(items) => items.iter_mut().map(|v| rename_key(v, from, to)).sum(),
        _ => 0,
    }
}
