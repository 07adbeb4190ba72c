// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Compiler collaborator, client manifests, and the lexical directive scanner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, DirectiveError};

/// How the runtime imports one client export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub chunks: Vec<String>,
    pub name: String,
}

pub type ClientManifest = BTreeMap<String, ManifestEntry>;

/// One wildcard entry for the module plus one `<module>#<export>` entry per export.
pub fn build_manifest(module_id: &str, export_names: &[String]) -> ClientManifest {
    let entry = |name: &str| ManifestEntry {
        id: module_id.to_string(),
        chunks: Vec::new(),
        name: name.to_string(),
    };
    let mut manifest = ClientManifest::new();
    manifest.insert(module_id.to_string(), entry("*"));
    for name in export_names {
        manifest.insert(format!("{}#{}", module_id, name), entry(name));
    }
    manifest
}

/// Turns user source into something the sandbox can execute.
pub trait Compiler: Send + Sync {
    /// Export names of a client module.
    fn parse_client_module(&self, code: &str) -> Result<Vec<String>, CompileError>;

    /// Names of the server actions a server module defines.
    fn parse_server_actions(&self, code: &str) -> Result<Vec<String>, CompileError>;

    fn compile_to_executable(&self, code: &str) -> Result<String, CompileError>;

    fn build_manifest(&self, module_id: &str, export_names: &[String]) -> ClientManifest {
        build_manifest(module_id, export_names)
    }
}

const USE_CLIENT: &str = "use client";
const USE_SERVER: &str = "use server";

/// Compiler that validates directives with a lexical scan of JS-like source
/// and leaves evaluation to the sandbox runtime.
#[derive(Debug, Clone, Default)]
pub struct DirectiveScanner;

impl DirectiveScanner {
    pub fn new() -> Self {
        Self
    }
}

fn found_in(name: &str) -> String {
    format!(" (found in \"{}\")", name)
}

impl Compiler for DirectiveScanner {
    fn parse_client_module(&self, code: &str) -> Result<Vec<String>, CompileError> {
        let module = ModuleShape::scan(code)?;
        if !module.has_directive(USE_CLIENT) {
            return Err(
                DirectiveError::new("Client code must start with \"use client\" directive.").into(),
            );
        }
        if module.has_directive(USE_SERVER) {
            return Err(
                DirectiveError::new("\"use server\" is not supported in client code.").into(),
            );
        }

        let check = |body: &Body, name: &str| -> Result<(), DirectiveError> {
            if body.has(USE_CLIENT) {
                return Err(DirectiveError::new(format!(
                    "\"use client\" must be at module level, not inside functions{}.",
                    found_in(name)
                )));
            }
            if body.has(USE_SERVER) {
                return Err(DirectiveError::new(format!(
                    "\"use server\" is not supported in client code{}.",
                    found_in(name)
                )));
            }
            Ok(())
        };

        let mut exports = Vec::new();
        for item in &module.items {
            match &item.kind {
                ItemKind::Function(body) => {
                    check(body, &item.name)?;
                    if item.exported {
                        exports.push(item.name.clone());
                    }
                }
                ItemKind::Variable(init) => {
                    if let Some(body) = init {
                        check(body, &item.name)?;
                    }
                    if item.exported {
                        exports.push(item.name.clone());
                    }
                }
                ItemKind::DefaultExport => exports.push("default".to_string()),
            }
        }
        Ok(exports)
    }

    fn parse_server_actions(&self, code: &str) -> Result<Vec<String>, CompileError> {
        let module = ModuleShape::scan(code)?;
        if module.has_directive(USE_CLIENT) {
            return Err(DirectiveError::new(
                "\"use client\" is not supported. This environment only handles server code.",
            )
            .into());
        }
        let module_server = module.has_directive(USE_SERVER);

        let no_use_client = |body: &Body, name: &str| -> Result<(), DirectiveError> {
            if body.has(USE_CLIENT) {
                return Err(DirectiveError::new(format!(
                    "\"use client\" is not supported{}. This environment only handles server code.",
                    found_in(name)
                )));
            }
            Ok(())
        };

        let mut actions = Vec::new();
        for item in &module.items {
            let body = match &item.kind {
                ItemKind::Function(body) => body,
                ItemKind::Variable(Some(body)) if item.exported || body.is_block() => body,
                _ => continue,
            };
            no_use_client(body, &item.name)?;
            let is_action = if item.exported {
                module_server || body.has(USE_SERVER)
            } else {
                !module_server && body.has(USE_SERVER)
            };
            if is_action {
                actions.push(item.name.clone());
            }
        }
        Ok(actions)
    }

    fn compile_to_executable(&self, code: &str) -> Result<String, CompileError> {
        tokenize(code)?;
        Ok(code.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Punct(char),
    Arrow,
    /// Numbers and template literals; never significant to the scan.
    Other,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    newline_before: bool,
}

fn syntax(message: &str, line: usize) -> CompileError {
    CompileError::Syntax {
        message: message.to_string(),
        line,
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut newline_before = false;

    let push = |tokens: &mut Vec<Token>, kind: TokenKind, newline: &mut bool| {
        tokens.push(Token {
            kind,
            newline_before: *newline,
        });
        *newline = false;
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => {
                line += 1;
                newline_before = true;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                let start = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax("Unterminated comment", start)),
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some('\n') => {
                            line += 1;
                            newline_before = true;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            '"' | '\'' => {
                // Strings end at their quote or, leniently, at the end of the line.
                let mut value = String::new();
                i += 1;
                while let Some(&ch) = chars.get(i) {
                    if ch == c || ch == '\n' {
                        break;
                    }
                    if ch == '\\' {
                        if let Some(&escaped) = chars.get(i + 1) {
                            value.push(escaped);
                            i += 2;
                            continue;
                        }
                    }
                    value.push(ch);
                    i += 1;
                }
                if chars.get(i) == Some(&c) {
                    i += 1;
                }
                push(&mut tokens, TokenKind::Str(value), &mut newline_before);
            }
            '`' => {
                let start = line;
                let mut depth = 0usize;
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax("Unterminated template literal", start)),
                        Some('\\') => i += 2,
                        Some('`') if depth == 0 => {
                            i += 1;
                            break;
                        }
                        Some('$') if chars.get(i + 1) == Some(&'{') => {
                            depth += 1;
                            i += 2;
                        }
                        Some('}') if depth > 0 => {
                            depth -= 1;
                            i += 1;
                        }
                        Some('\n') => {
                            line += 1;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
                push(&mut tokens, TokenKind::Other, &mut newline_before);
            }
            '=' if next == Some('>') => {
                i += 2;
                push(&mut tokens, TokenKind::Arrow, &mut newline_before);
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                push(&mut tokens, TokenKind::Ident(ident), &mut newline_before);
            }
            c if c.is_ascii_digit() => {
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '.' || chars[i] == '_')
                {
                    i += 1;
                }
                push(&mut tokens, TokenKind::Other, &mut newline_before);
            }
            c => {
                i += 1;
                push(&mut tokens, TokenKind::Punct(c), &mut newline_before);
            }
        }
    }
    Ok(tokens)
}

/// Function body as far as directives are concerned.
#[derive(Debug, Clone, PartialEq)]
enum Body {
    Block(Vec<String>),
    Expression,
}

impl Body {
    fn has(&self, directive: &str) -> bool {
        matches!(self, Body::Block(directives) if directives.iter().any(|d| d == directive))
    }

    fn is_block(&self) -> bool {
        matches!(self, Body::Block(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ItemKind {
    Function(Body),
    /// A variable, with its function initializer if it has one.
    Variable(Option<Body>),
    DefaultExport,
}

#[derive(Debug, Clone, PartialEq)]
struct Item {
    name: String,
    exported: bool,
    kind: ItemKind,
}

#[derive(Debug)]
struct ModuleShape {
    directives: Vec<String>,
    items: Vec<Item>,
}

/// Keywords that start a new statement when they follow a line break.
const STATEMENT_STARTS: [&str; 15] = [
    "export", "import", "const", "let", "var", "function", "class", "async", "if", "for",
    "while", "return", "try", "throw", "switch",
];

impl ModuleShape {
    fn scan(code: &str) -> Result<Self, CompileError> {
        let tokens = tokenize(code)?;
        let mut parser = Parser { tokens, pos: 0 };
        let mut module = ModuleShape {
            directives: parser.prologue(),
            items: Vec::new(),
        };
        while !parser.at_end() {
            parser.top_level(&mut module.items);
        }
        Ok(module)
    }

    fn has_directive(&self, directive: &str) -> bool {
        self.directives.iter().any(|d| d == directive)
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn is_ident(&self, offset: usize, word: &str) -> bool {
        matches!(self.peek_at(offset), Some(TokenKind::Ident(w)) if w == word)
    }

    fn is_punct(&self, offset: usize, c: char) -> bool {
        self.peek_at(offset) == Some(&TokenKind::Punct(c))
    }

    fn ident(&mut self) -> Option<String> {
        match self.peek() {
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Some(name)
            }
            _ => None,
        }
    }

    /// Leading string statements of a program or block.
    fn prologue(&mut self) -> Vec<String> {
        let mut directives = Vec::new();
        while let Some(TokenKind::Str(value)) = self.peek() {
            directives.push(value.clone());
            self.pos += 1;
            if self.is_punct(0, ';') {
                self.pos += 1;
            }
        }
        directives
    }

    /// Skip a balanced `(..)`, `[..]` or `{..}` group starting at the cursor.
    fn skip_group(&mut self) {
        let mut depth = 0usize;
        while let Some(kind) = self.peek() {
            match kind {
                TokenKind::Punct('(' | '[' | '{') => depth += 1,
                TokenKind::Punct(')' | ']' | '}') => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.pos += 1;
            if depth == 0 {
                break;
            }
        }
    }

    /// At `{`: read the block's directive prologue and skip the block.
    fn block_body(&mut self) -> Body {
        let open = self.pos;
        self.pos += 1;
        let directives = self.prologue();
        self.pos = open;
        self.skip_group();
        Body::Block(directives)
    }

    fn top_level(&mut self, items: &mut Vec<Item>) {
        if self.is_ident(0, "export") {
            self.pos += 1;
            if self.is_ident(0, "default") {
                self.pos += 1;
                items.push(Item {
                    name: "default".into(),
                    exported: true,
                    kind: ItemKind::DefaultExport,
                });
                // The default declaration itself is not a named item.
                if self.is_ident(0, "async") && self.is_ident(1, "function") {
                    self.pos += 1;
                }
                if self.is_ident(0, "function") {
                    let _ = self.function_declaration();
                }
                return;
            }
            self.declaration(items, true);
            return;
        }
        if self.declaration(items, false) {
            return;
        }
        match self.peek() {
            Some(TokenKind::Punct('(' | '[' | '{')) => self.skip_group(),
            _ => self.pos += 1,
        }
    }

    /// Parse a function or variable declaration at the cursor, if any.
    fn declaration(&mut self, items: &mut Vec<Item>, exported: bool) -> bool {
        if self.is_ident(0, "async") && self.is_ident(1, "function") {
            self.pos += 1;
        }
        if self.is_ident(0, "function") {
            if let Some((name, body)) = self.function_declaration() {
                items.push(Item {
                    name,
                    exported,
                    kind: ItemKind::Function(body),
                });
            }
            return true;
        }
        if self.is_ident(0, "const") || self.is_ident(0, "let") || self.is_ident(0, "var") {
            self.pos += 1;
            self.variables(items, exported);
            return true;
        }
        false
    }

    /// At `function`: consume the whole declaration.
    fn function_declaration(&mut self) -> Option<(String, Body)> {
        self.pos += 1;
        if self.is_punct(0, '*') {
            self.pos += 1;
        }
        let name = self.ident();
        if !self.is_punct(0, '(') {
            return None;
        }
        self.skip_group();
        if !self.is_punct(0, '{') {
            return None;
        }
        let body = self.block_body();
        name.map(|name| (name, body))
    }

    fn variables(&mut self, items: &mut Vec<Item>, exported: bool) {
        loop {
            let name = match self.peek() {
                Some(TokenKind::Ident(_)) => self.ident(),
                Some(TokenKind::Punct('{' | '[')) => {
                    self.skip_group();
                    None
                }
                _ => return,
            };
            let mut init = None;
            if self.is_punct(0, '=') {
                self.pos += 1;
                init = self.function_initializer();
                self.skip_initializer();
            }
            if let Some(name) = name {
                items.push(Item {
                    name,
                    exported,
                    kind: ItemKind::Variable(init),
                });
            }
            if self.is_punct(0, ',') {
                self.pos += 1;
                continue;
            }
            if self.is_punct(0, ';') {
                self.pos += 1;
            }
            return;
        }
    }

    /// Recognize `function (..) {..}` and arrow initializers, consuming them.
    fn function_initializer(&mut self) -> Option<Body> {
        let start = self.pos;
        if self.is_ident(0, "async") && !self.is_punct(1, '=') {
            self.pos += 1;
        }
        if self.is_ident(0, "function") {
            self.pos += 1;
            if self.is_punct(0, '*') {
                self.pos += 1;
            }
            let _ = self.ident();
            if self.is_punct(0, '(') {
                self.skip_group();
                if self.is_punct(0, '{') {
                    return Some(self.block_body());
                }
            }
            self.pos = start;
            return None;
        }
        match self.peek() {
            Some(TokenKind::Punct('(')) => self.skip_group(),
            Some(TokenKind::Ident(_)) => self.pos += 1,
            _ => {
                self.pos = start;
                return None;
            }
        }
        if self.peek() != Some(&TokenKind::Arrow) {
            self.pos = start;
            return None;
        }
        self.pos += 1;
        if self.is_punct(0, '{') {
            Some(self.block_body())
        } else {
            Some(Body::Expression)
        }
    }

    /// Skip to the end of the current initializer expression.
    fn skip_initializer(&mut self) {
        enum Step {
            Stop,
            Group,
            Next,
        }
        while let Some(token) = self.tokens.get(self.pos) {
            let step = match &token.kind {
                TokenKind::Punct(',' | ';' | ')' | ']' | '}') => Step::Stop,
                TokenKind::Punct('(' | '[' | '{') => Step::Group,
                TokenKind::Ident(word)
                    if token.newline_before && STATEMENT_STARTS.contains(&word.as_str()) =>
                {
                    Step::Stop
                }
                _ => Step::Next,
            };
            match step {
                Step::Stop => return,
                Step::Group => self.skip_group(),
                Step::Next => self.pos += 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_has_wildcard_and_exports() {
        let manifest = build_manifest("client", &["Button".to_string()]);
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest["client"].name, "*");
        assert_eq!(manifest["client#Button"].id, "client");
        assert!(manifest["client#Button"].chunks.is_empty());
    }

    #[test]
    fn tokenizer_skips_comments_and_templates() {
        let tokens =
            tokenize("// \"use client\"\n/* 'x' */ `a ${b} \"c\"` \"use server\"").unwrap();
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Other, TokenKind::Str("use server".into())]
        );
    }

    #[test]
    fn tokenizer_reports_unterminated_comment() {
        let err = tokenize("const a = 1;\n/* open").unwrap_err();
        assert_eq!(
            err,
            CompileError::Syntax {
                message: "Unterminated comment".into(),
                line: 2
            }
        );
    }

    #[test]
    fn apostrophes_in_markup_stay_on_their_line() {
        let code = concat!(
            "export default function App() {\n  return <p>Don't panic</p>;\n}\n",
            "export async function save() {\n  \"use server\";\n}\n",
        );
        let module = ModuleShape::scan(code).unwrap();
        assert_eq!(module.items.len(), 2);
        assert_eq!(module.items[1].name, "save");
        assert!(matches!(
            &module.items[1].kind,
            ItemKind::Function(body) if body.has("use server")
        ));
    }

    #[test]
    fn variables_without_semicolons() {
        let code = concat!(
            "export const a = 1\n",
            "export const b = () => {\n 'use server'\n}\n",
            "const c = async (x) => x\n",
        );
        let module = ModuleShape::scan(code).unwrap();
        let names: Vec<_> = module.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(module.items[0].kind, ItemKind::Variable(None));
        assert_eq!(
            module.items[1].kind,
            ItemKind::Variable(Some(Body::Block(vec!["use server".into()])))
        );
        assert_eq!(module.items[2].kind, ItemKind::Variable(Some(Body::Expression)));
    }
}
