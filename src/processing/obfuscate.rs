//! Identifier-renaming obfuscator and its best-effort inverse

use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::modules::error::EngineError;
use crate::processing::format::{format_source, FormatStyle};
use crate::processing::lexer::{self, Layout, Syntax, Token, TokenKind};
use crate::processing::minify::minify_source;
use crate::processing::refactor::apply_renames;

const OBFUSCATED_PREFIX: &str = "_0x";

/// Rename declared identifiers to opaque names, then strip comments and
/// collapse whitespace. Returns the code and the number of names replaced.
pub fn obfuscate_source(source: &str, syntax: &Syntax) -> Result<(String, usize), EngineError> {
    if syntax.layout == Layout::Data {
        return Err(EngineError::Obfuscate {
            message: format!("{} documents have no identifiers to rename", syntax.language),
        });
    }

    let tokens = lexer::tokenize(source, syntax);
    if let Some(first) = lexer::structural_errors(&tokens).into_iter().next() {
        return Err(EngineError::Obfuscate {
            message: format!("{} at line {}", first.message, first.line.unwrap_or_default()),
        });
    }

    let declared = declared_identifiers(&tokens, syntax);
    let renames: HashMap<&str, String> = declared
        .iter()
        .enumerate()
        .map(|(index, name)| (*name, opaque_name(name, index, syntax)))
        .collect();

    let (renamed, _) = apply_renames(&tokens, &renames);
    let code = minify_source(&renamed, syntax).map_err(|e| EngineError::Obfuscate {
        message: e.to_string(),
    })?;
    Ok((code, renames.len()))
}

/// Replace `_0x…` names with `var_N` and re-format the result
pub fn deobfuscate_source(source: &str, syntax: &Syntax) -> Result<(String, usize), EngineError> {
    if syntax.layout == Layout::Data {
        return Err(EngineError::Deobfuscate {
            message: format!("{} documents cannot be deobfuscated", syntax.language),
        });
    }

    let tokens = lexer::tokenize(source, syntax);
    let existing: BTreeSet<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Identifier)
        .map(|t| t.text)
        .collect();

    let sigil = if syntax.language == "wat" { "$" } else { "" };
    let mut renames: HashMap<&str, String> = HashMap::new();
    let mut counter = 0usize;

    for token in &tokens {
        if token.kind != TokenKind::Identifier
            || !is_obfuscated(token.text, sigil)
            || renames.contains_key(token.text)
        {
            continue;
        }
        let readable = loop {
            counter += 1;
            let candidate = format!("{sigil}var_{counter}");
            if !existing.contains(candidate.as_str()) {
                break candidate;
            }
        };
        renames.insert(token.text, readable);
    }

    let (renamed, _) = apply_renames(&tokens, &renames);
    let reflow = matches!(syntax.layout, Layout::Braces | Layout::SExpression);
    let style = FormatStyle::for_syntax(syntax, None).with_reflow(reflow);
    let mut code = format_source(&renamed, syntax, &style).map_err(|e| {
        EngineError::Deobfuscate {
            message: e.to_string(),
        }
    })?;
    if !code.ends_with('\n') {
        code.push('\n');
    }
    Ok((code, renames.len()))
}

fn is_obfuscated(text: &str, sigil: &str) -> bool {
    text.strip_prefix(sigil)
        .and_then(|rest| rest.strip_prefix(OBFUSCATED_PREFIX))
        .is_some_and(|hex| !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

fn opaque_name(name: &str, index: usize, syntax: &Syntax) -> String {
    let digest = Sha256::digest(format!("{index}:{name}").as_bytes());
    let hex: String = digest[..3].iter().map(|b| format!("{b:02x}")).collect();
    // The index suffix keeps names unique even if digests collide
    let sigil = if syntax.language == "wat" { "$" } else { "" };
    format!("{sigil}{OBFUSCATED_PREFIX}{hex}{index:x}")
}

/// Names introduced by declarations, in first-seen order. Go keeps `main`,
/// `init` and exported names so the program still links.
fn declared_identifiers<'a>(tokens: &[Token<'a>], syntax: &Syntax) -> Vec<&'a str> {
    let significant: Vec<&Token<'a>> = tokens.iter().filter(|t| !t.is_trivia()).collect();
    let mut names: Vec<&'a str> = Vec::new();
    let mut seen: HashSet<&'a str> = HashSet::new();
    let mut push = |name: &'a str| {
        if seen.insert(name) {
            names.push(name);
        }
    };

    for (i, token) in significant.iter().enumerate() {
        if token.kind != TokenKind::Identifier {
            continue;
        }

        if syntax.layout == Layout::SExpression {
            let declares = i > 0 && syntax.declaration_keywords.contains(&significant[i - 1].text);
            if declares && token.text.starts_with('$') {
                push(token.text);
            }
            continue;
        }

        if syntax.declaration_keywords.contains(&token.text) {
            if let Some(name) = significant.get(i + 1).filter(|t| t.kind == TokenKind::Identifier) {
                if keeps_name(name.text, syntax) {
                    continue;
                }
                push(name.text);
                // Untyped parameter lists: fn name(a, b)
                if syntax.function_keywords.contains(&token.text)
                    && syntax.layout == Layout::Braces
                    && significant.get(i + 2).is_some_and(|t| t.is_punct('('))
                {
                    for param in significant[i + 3..]
                        .iter()
                        .take_while(|t| !t.is_punct(')'))
                        .filter(|t| t.kind == TokenKind::Identifier)
                    {
                        push(param.text);
                    }
                }
            }
            continue;
        }

        // Go short declarations: a, b := ...
        if syntax.layout == Layout::NewlineSignificant
            && significant
                .get(i + 1)
                .is_some_and(|t| t.is_punct(':'))
            && significant.get(i + 2).is_some_and(|t| t.is_punct('='))
            && !keeps_name(token.text, syntax)
        {
            let mut j = i;
            loop {
                push(significant[j].text);
                if j >= 2
                    && significant[j - 1].is_punct(',')
                    && significant[j - 2].kind == TokenKind::Identifier
                {
                    j -= 2;
                } else {
                    break;
                }
            }
        }
    }

    names.retain(|name| !syntax.is_keyword(name) && *name != "_");
    names
}

fn keeps_name(name: &str, syntax: &Syntax) -> bool {
    if syntax.is_keyword(name) {
        return true;
    }
    syntax.layout == Layout::NewlineSignificant
        && (name == "main" || name == "init" || name.starts_with(|c: char| c.is_uppercase()))
}
