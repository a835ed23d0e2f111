//! Every predefined script under `scripts/` must load cleanly and survive a
//! render/parse round trip.
//!
//! Run with: cargo test --test predefined_scripts

use std::fs;
use std::path::PathBuf;

use ogmented::codec::{RenderOptions, ScriptCodec};
use ogmented::config::SessionConfig;
use ogmented::vocabulary::CommandVocabulary;

fn scripts_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scripts")
}

fn script_files() -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(scripts_dir())
        .expect("Failed to read scripts directory")
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |ext| ext == "txt"))
        .collect();
    files.sort();
    files
}

#[test]
fn test_predefined_scripts_have_no_skipped_lines() {
    let codec = ScriptCodec::new(CommandVocabulary::default()).unwrap();
    let files = script_files();
    assert!(!files.is_empty(), "no predefined scripts found");

    let mut failures = Vec::new();
    for path in &files {
        let text = fs::read_to_string(path).unwrap();
        let outcome = codec.parse_text(&text);
        if outcome.script.is_empty() {
            failures.push(format!("{:?}: empty script", path));
        }
        for line in &outcome.skipped {
            failures.push(format!("{:?}: {}", path, line));
        }
    }

    if !failures.is_empty() {
        panic!("Predefined script problems:\n{}", failures.join("\n"));
    }
}

#[test]
fn test_predefined_scripts_round_trip() {
    let codec = ScriptCodec::new(CommandVocabulary::default()).unwrap();
    for path in script_files() {
        let original = codec.parse_text(&fs::read_to_string(&path).unwrap()).script;
        for options in [RenderOptions::plain(), RenderOptions::default()] {
            let rendered = codec.render(&original, options);
            let reparsed = codec.parse_text(&rendered);
            assert!(reparsed.skipped.is_empty(), "{:?} re-parse skipped {:?}", path, reparsed.skipped);
            assert!(
                reparsed.script.same_code(&original),
                "{:?} did not round-trip:\n{}",
                path,
                rendered
            );
        }
    }
}

#[test]
fn test_stage_config_references_existing_scripts() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/stages.json");
    let config = SessionConfig::from_file(&path).unwrap();
    config.validate().unwrap();

    for stage in &config.stages {
        for script in [stage.master_script.as_ref(), stage.slave_script.as_ref()].into_iter().flatten() {
            let resolved = config.resolve(script);
            assert!(resolved.exists(), "stage {} references missing {:?}", stage.name, resolved);
        }
    }
    assert!(config.stage("Sandbox").map_or(false, |s| s.arrow_keys));
}
