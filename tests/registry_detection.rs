// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Exercises language detection against fixture project trees.

use std::path::Path;

use claude_lsp::registry;

#[test]
fn detects_rust_project_by_cargo_toml() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/assets/rust");
    let languages = registry::detect_languages(&root);
    assert!(languages.contains("rust"));
}

#[test]
fn detects_nothing_language_specific_for_bare_toml_fixture() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/assets/toml");
    let languages = registry::detect_languages(&root);
    assert!(!languages.contains("rust"));
}

#[test]
fn project_identity_is_stable_for_a_real_directory() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/assets/rust");
    let a = claude_lsp::identity::ProjectRoot::new(&root).expect("fixture exists");
    let b = claude_lsp::identity::ProjectRoot::new(&root).expect("fixture exists");
    assert_eq!(a.id(), b.id());
}
