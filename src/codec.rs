//! Text codec for scripts.
//!
//! Format: one command per line terminated by `;`. Loop blocks open with
//! `LOOP REPEAT {` and close with `} <N> Times;`; body lines may omit the
//! trailing `;`. Rendered scripts carry an `L<n>: ` label per top-level
//! command, which the parser accepts and ignores.
//!
//! Parsing is single-pass and permissive: lines that match no pattern are
//! dropped and reported in [`ParseOutcome::skipped`].

use std::path::Path;

use regex::Regex;

use crate::command::{Command, CommandBase};
use crate::script::Script;
use crate::script_diagnostics::{SkipReason, SkippedLine};
use crate::vocabulary::CommandVocabulary;

const LABEL_COLOR: &str = "#24A0FF";

/// Result of parsing a script text.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub script: Script,
    pub skipped: Vec<SkippedLine>,
}

/// Rendering switches.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Rich-text markup (faded disabled commands, coloured labels).
    pub rich: bool,
    /// Prefix every top-level command with its 1-based line label.
    pub line_labels: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            rich: false,
            line_labels: true,
        }
    }
}

impl RenderOptions {
    /// Plain text without labels; the exact inverse of [`ScriptCodec::parse`].
    pub fn plain() -> Self {
        Self {
            rich: false,
            line_labels: false,
        }
    }

    pub fn rich() -> Self {
        Self {
            rich: true,
            line_labels: true,
        }
    }
}

enum Line<'a> {
    Blank,
    LoopOpen,
    LoopClose(u32),
    Command { name: &'a str, args: Vec<String> },
    Unknown,
}

pub struct ScriptCodec {
    vocabulary: CommandVocabulary,
    label: Regex,
    loop_open: Regex,
    loop_close: Regex,
    command: Regex,
}

impl ScriptCodec {
    pub fn new(vocabulary: CommandVocabulary) -> Result<Self, String> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| format!("Invalid codec pattern {:?}: {}", pattern, e))
        };
        Ok(Self {
            vocabulary,
            label: compile(r"^(?:<color=#[0-9A-Fa-f]{6}>)?L\d+(?:</color>)?:\s*")?,
            loop_open: compile(r"^LOOP\s+REPEAT\s*\{$")?,
            loop_close: compile(r"^\}\s*(\d+)\s*Times\s*;?$")?,
            command: compile(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^()]*)\))?\s*;?$")?,
        })
    }

    pub fn vocabulary(&self) -> &CommandVocabulary {
        &self.vocabulary
    }

    pub fn parse_text(&self, text: &str) -> ParseOutcome {
        let lines: Vec<&str> = text.lines().collect();
        self.parse(&lines)
    }

    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> ParseOutcome {
        let lines: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();
        let mut outcome = ParseOutcome::default();
        let mut pos = 0;
        let mut commands = Vec::new();
        self.parse_block(&lines, &mut pos, 0, &mut commands, &mut outcome.skipped);
        outcome.script = Script::new(commands);
        if !outcome.skipped.is_empty() {
            log::debug!("Script parse dropped {} line(s)", outcome.skipped.len());
        }
        outcome
    }

    /// Consume lines into `out` until end of input or, when `depth > 0`, a
    /// loop-close line, whose repeat count is returned.
    fn parse_block(
        &self,
        lines: &[&str],
        pos: &mut usize,
        depth: usize,
        out: &mut Vec<Command>,
        skipped: &mut Vec<SkippedLine>,
    ) -> Option<u32> {
        while *pos < lines.len() {
            let index = *pos;
            let raw = lines[index];
            *pos += 1;
            match self.classify(raw) {
                Line::Blank => {}
                Line::LoopOpen => {
                    let mut children = Vec::new();
                    match self.parse_block(lines, pos, depth + 1, &mut children, skipped) {
                        Some(count) => out.push(Command::repeat(count, children)),
                        None => skipped.push(SkippedLine::new(index, SkipReason::UnterminatedLoop, raw)),
                    }
                }
                Line::LoopClose(count) if depth > 0 => return Some(count),
                Line::LoopClose(_) => {
                    skipped.push(SkippedLine::new(index, SkipReason::UnmatchedLoopClose, raw))
                }
                Line::Command { name, args } => match self.vocabulary.get(name) {
                    Some(spec) if spec.arg.accepts(&args) => {
                        out.push(Command::Leaf(CommandBase::new(name, args)))
                    }
                    Some(_) => skipped.push(SkippedLine::new(index, SkipReason::BadArguments, raw)),
                    None => skipped.push(SkippedLine::new(index, SkipReason::UnknownCommand, raw)),
                },
                Line::Unknown => skipped.push(SkippedLine::new(index, SkipReason::UnknownCommand, raw)),
            }
        }
        None
    }

    fn classify<'a>(&self, raw: &'a str) -> Line<'a> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Line::Blank;
        }
        let line = match self.label.find(trimmed) {
            Some(m) => trimmed[m.end()..].trim_start(),
            None => trimmed,
        };
        if self.loop_open.is_match(line) {
            return Line::LoopOpen;
        }
        if let Some(caps) = self.loop_close.captures(line) {
            return match caps[1].parse::<u32>() {
                Ok(count) => Line::LoopClose(count),
                Err(_) => Line::Unknown,
            };
        }
        match self.command.captures(line) {
            Some(caps) => {
                let name = caps.get(1).map_or("", |m| m.as_str());
                let args = caps
                    .get(2)
                    .map(|m| m.as_str().trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.split(',').map(|a| a.trim().to_string()).collect())
                    .unwrap_or_default();
                Line::Command { name, args }
            }
            None => Line::Unknown,
        }
    }

    /// Render a script for display (or, with [`RenderOptions::plain`], for
    /// saving).
    pub fn render(&self, script: &Script, options: RenderOptions) -> String {
        render_script(script, options)
    }
}

pub fn render_script(script: &Script, options: RenderOptions) -> String {
    let mut rt = String::new();
    for (i, command) in script.commands().iter().enumerate() {
        if options.line_labels {
            if options.rich {
                rt.push_str(&format!("<color={}>L{}</color>: ", LABEL_COLOR, i + 1));
            } else {
                rt.push_str(&format!("L{}: ", i + 1));
            }
        }
        rt.push_str(&command.render_line(options.rich));
        rt.push('\n');
    }
    rt
}

/// Load a predefined script file. A missing or unreadable file yields
/// `None`; the caller treats that as "no script".
pub fn load_script_file(codec: &ScriptCodec, path: &Path) -> Option<ParseOutcome> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let outcome = codec.parse_text(&text);
            log::info!(
                "Loaded script {:?}: {} commands, {} skipped line(s)",
                path,
                outcome.script.len(),
                outcome.skipped.len()
            );
            Some(outcome)
        }
        Err(e) => {
            log::warn!("Predefined script {:?} not available: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> ScriptCodec {
        ScriptCodec::new(CommandVocabulary::default()).unwrap()
    }

    fn names_and_args(script: &Script) -> Vec<(String, Vec<String>)> {
        let mut copy = script.clone();
        let mut out = Vec::new();
        copy.for_each_mut(|c| out.push((c.name().to_string(), c.args().to_vec())));
        out
    }

    #[test]
    fn test_parse_flat_commands() {
        let outcome = codec().parse(&["MOVE (NORTH);", "Start_Engine ();", "Climb_Up;", "Continue_Sec (2);"]);
        assert!(outcome.skipped.is_empty());
        let script = outcome.script;
        assert_eq!(script.len(), 4);
        assert_eq!(script.get(&[0]).unwrap().args(), &["NORTH".to_string()]);
        assert!(script.get(&[1]).unwrap().args().is_empty());
        assert_eq!(script.get(&[2]).unwrap().name(), "Climb_Up");
    }

    #[test]
    fn test_parse_loop_block() {
        let text = "MOVE (SOUTH);\nLOOP REPEAT {\n    MOVE (EAST)\n    MOVE (NORTH);\n} 3 Times;\nMOVE (WEST);\n";
        let outcome = codec().parse_text(text);
        assert!(outcome.skipped.is_empty());
        let script = outcome.script;
        assert_eq!(script.len(), 3);
        let lp = script.get(&[1]).unwrap().as_loop().unwrap();
        assert_eq!(lp.repeat_count(), 3);
        assert_eq!(lp.children().len(), 2);
        assert_eq!(lp.children()[1].args()[0], "NORTH");
        assert_eq!(script.get(&[2]).unwrap().args()[0], "WEST");
    }

    #[test]
    fn test_parse_nested_loops() {
        let text = "LOOP REPEAT {\n  MOVE (EAST)\n  LOOP REPEAT {\n    Climb_Up ()\n  } 2 Times\n} 4 Times;";
        let outcome = codec().parse_text(text);
        assert!(outcome.skipped.is_empty());
        let outer = outcome.script.get(&[0]).unwrap().as_loop().unwrap();
        assert_eq!(outer.repeat_count(), 4);
        let inner = outer.children()[1].as_loop().unwrap();
        assert_eq!(inner.repeat_count(), 2);
        assert_eq!(inner.children()[0].name(), "Climb_Up");
    }

    #[test]
    fn test_bad_lines_are_dropped_and_reported() {
        let text = "MOVE (NORTH);\nJUMP (UP);\nMOVE (UP);\nStart_Engine (1);\n\n} 2 Times;\ngarbage line\nMOVE (EAST);";
        let outcome = codec().parse_text(text);
        assert_eq!(outcome.script.len(), 2);
        let reasons: Vec<(u32, SkipReason)> = outcome.skipped.iter().map(|s| (s.line, s.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                (2, SkipReason::UnknownCommand),
                (3, SkipReason::BadArguments),
                (4, SkipReason::BadArguments),
                (6, SkipReason::UnmatchedLoopClose),
                (7, SkipReason::UnknownCommand),
            ]
        );
    }

    #[test]
    fn test_unterminated_loop_is_dropped() {
        let outcome = codec().parse_text("MOVE (NORTH);\nLOOP REPEAT {\n  MOVE (EAST)\n");
        assert_eq!(outcome.script.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].reason, SkipReason::UnterminatedLoop);
        assert_eq!(outcome.skipped[0].line, 2);
    }

    #[test]
    fn test_render_with_labels() {
        let script = Script::new(vec![
            Command::leaf("MOVE", &["NORTH"]),
            Command::repeat(2, vec![Command::leaf("MOVE", &["EAST"])]),
        ]);
        let text = render_script(&script, RenderOptions::default());
        assert_eq!(text, "L1: MOVE (NORTH);\nL2: LOOP REPEAT {\n    MOVE (EAST)\n} 2 Times;\n");

        let rich = render_script(&script, RenderOptions::rich());
        assert!(rich.starts_with("<color=#24A0FF>L1</color>: MOVE (NORTH);"));
    }

    #[test]
    fn test_round_trip_plain_and_labelled() {
        let c = codec();
        let mut script = Script::new(vec![
            Command::leaf("RESET", &[]),
            Command::leaf("MOVE", &["NORTH"]),
            Command::repeat(
                2,
                vec![
                    Command::leaf("MOVE", &["EAST"]),
                    Command::repeat(3, vec![Command::leaf("Turn_Left", &[])]),
                ],
            ),
            Command::leaf("Continue_Sec", &["1.5"]),
        ]);
        script.get_mut(&[1]).unwrap().set_disabled(true);

        for options in [RenderOptions::plain(), RenderOptions::default()] {
            let back = c.parse_text(&c.render(&script, options));
            assert!(back.skipped.is_empty());
            assert!(back.script.same_code(&script));
            assert_eq!(names_and_args(&back.script), names_and_args(&script));
            assert!(!back.script.get(&[1]).unwrap().is_disabled());
        }
    }

    #[test]
    fn test_missing_file_is_no_script() {
        let path = std::env::temp_dir().join("ogmented-no-such-script.txt");
        assert!(load_script_file(&codec(), &path).is_none());
    }
}
