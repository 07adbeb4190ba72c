// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use fd_core::{CompileError, Compiler, DirectiveError, DirectiveScanner};

fn directive(message: &str) -> CompileError {
    CompileError::Directive(DirectiveError::new(message))
}

#[test]
fn client_module_exports() {
    let code = r#"'use client';

export function Button() {}
export const Counter = ({ start }) => {
  return start;
};
function helper() {}
export default function App() {}
"#;
    let exports = DirectiveScanner::new().parse_client_module(code).unwrap();
    assert_eq!(exports, vec!["Button", "Counter", "default"]);
}

#[test]
fn client_module_directive_errors() {
    let scanner = DirectiveScanner::new();
    assert_eq!(
        scanner.parse_client_module("export function A() {}").unwrap_err(),
        directive("Client code must start with \"use client\" directive.")
    );
    assert_eq!(
        scanner
            .parse_client_module("\"use client\";\n\"use server\";\nexport function A() {}")
            .unwrap_err(),
        directive("\"use server\" is not supported in client code.")
    );
    assert_eq!(
        scanner
            .parse_client_module(concat!(
                "\"use client\";\n",
                "export async function save() {\n  \"use server\";\n}",
            ))
            .unwrap_err(),
        directive("\"use server\" is not supported in client code (found in \"save\").")
    );
    assert_eq!(
        scanner
            .parse_client_module("\"use client\";\nfunction Inner() {\n  \"use client\";\n}")
            .unwrap_err(),
        directive(
            "\"use client\" must be at module level, not inside functions (found in \"Inner\")."
        )
    );
}

#[test]
fn directive_inside_a_comment_does_not_count() {
    let err = DirectiveScanner::new()
        .parse_client_module("// \"use client\"\nexport function A() {}")
        .unwrap_err();
    assert_eq!(
        err,
        directive("Client code must start with \"use client\" directive.")
    );
}

#[test]
fn server_actions_from_inline_directives() {
    let code = r#"export default function App() {
  return <form action={save} />;
}

async function save(data) {
  "use server";
}

export const remove = async (id) => {
  'use server';
};

function plain() {}
"#;
    let actions = DirectiveScanner::new().parse_server_actions(code).unwrap();
    assert_eq!(actions, vec!["save", "remove"]);
}

#[test]
fn module_level_use_server_exports_every_function() {
    let code = concat!(
        "\"use server\";\n",
        "export async function a() {}\n",
        "export const b = async () => {};\n",
        "function local() {}\n",
    );
    let actions = DirectiveScanner::new().parse_server_actions(code).unwrap();
    assert_eq!(actions, vec!["a", "b"]);
}

#[test]
fn server_code_rejects_use_client() {
    let scanner = DirectiveScanner::new();
    assert_eq!(
        scanner
            .parse_server_actions("\"use client\";\nexport function A() {}")
            .unwrap_err(),
        directive("\"use client\" is not supported. This environment only handles server code.")
    );
    assert_eq!(
        scanner
            .parse_server_actions("export function A() {\n  \"use client\";\n}")
            .unwrap_err(),
        directive(
            "\"use client\" is not supported (found in \"A\"). \
             This environment only handles server code."
        )
    );
}

#[test]
fn unterminated_template_is_a_syntax_error() {
    let err = DirectiveScanner::new()
        .compile_to_executable("const a = 1;\nconst b = `open")
        .unwrap_err();
    assert_eq!(err.to_string(), "Unterminated template literal (line 2)");
}

#[test]
fn manifest_lists_every_export() {
    let scanner = DirectiveScanner::new();
    let manifest = scanner.build_manifest("client", &["Button".into(), "default".into()]);
    let keys: Vec<_> = manifest.keys().cloned().collect();
    assert_eq!(keys, vec!["client", "client#Button", "client#default"]);
    assert_eq!(manifest["client#default"].name, "default");
}
