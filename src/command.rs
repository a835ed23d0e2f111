//! Command tree model.
//!
//! A script is a sequence of [`Command`]s. A command is either a leaf (a
//! name with zero or more arguments) or a loop wrapping a repeat count and an
//! owned list of children. Both variants share [`CommandBase`], which carries
//! the name, the argument list and the run-time/edit-time flags.
//!
//! No arity or type validation happens here; the codec and the avatar decide
//! what a valid command looks like.

use crate::vocabulary::LOOP_NAME;

const RICH_FADED_OPEN: &str = "<alpha=#44><s>";
const RICH_FADED_CLOSE: &str = "</s><alpha=#FF>";

/// Indentation of loop children in the rendered form.
pub const CHILD_INDENT: &str = "    ";

/// Run-time and edit-time state of a command. Never part of the text form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFlags {
    pub disabled: bool,
    pub running: bool,
    pub being_edited: bool,
    pub locked_for_editing: bool,
}

/// Fields shared by every command variant.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandBase {
    pub name: String,
    pub args: Vec<String>,
    pub flags: CommandFlags,
}

impl CommandBase {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            flags: CommandFlags::default(),
        }
    }
}

/// A loop block: `REPEAT { children } N Times`.
///
/// `args[0]` of the base always equals the cached repeat count; every setter
/// keeps the two in step.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCommand {
    base: CommandBase,
    repeat_count: u32,
    children: Vec<Command>,
}

impl LoopCommand {
    pub fn new(repeat_count: u32, children: Vec<Command>) -> Self {
        Self {
            base: CommandBase::new(LOOP_NAME, vec![repeat_count.to_string()]),
            repeat_count,
            children,
        }
    }

    pub fn repeat_count(&self) -> u32 {
        self.repeat_count
    }

    pub fn set_repeat_count(&mut self, count: u32) {
        self.repeat_count = count;
        let text = count.to_string();
        match self.base.args.first_mut() {
            Some(first) => *first = text,
            None => self.base.args.push(text),
        }
    }

    /// Replace the argument list. The first argument is the repeat count; an
    /// unparsable or missing count is normalized to 0.
    pub fn set_args(&mut self, mut args: Vec<String>) {
        let count = args.first().and_then(|a| a.trim().parse::<u32>().ok()).unwrap_or(0);
        if args.is_empty() {
            args.push(String::new());
        }
        self.base.args = args;
        self.set_repeat_count(count);
    }

    pub fn children(&self) -> &[Command] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Command> {
        &mut self.children
    }

    /// Children that take part in execution.
    pub fn active_children(&self) -> impl Iterator<Item = &Command> {
        self.children.iter().filter(|c| !c.is_disabled())
    }
}

/// A node of the command tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Leaf(CommandBase),
    Loop(LoopCommand),
}

impl Command {
    pub fn leaf(name: impl Into<String>, args: &[&str]) -> Self {
        Command::Leaf(CommandBase::new(
            name,
            args.iter().map(|a| a.to_string()).collect(),
        ))
    }

    pub fn repeat(count: u32, children: Vec<Command>) -> Self {
        Command::Loop(LoopCommand::new(count, children))
    }

    pub fn base(&self) -> &CommandBase {
        match self {
            Command::Leaf(base) => base,
            Command::Loop(lp) => &lp.base,
        }
    }

    fn base_mut(&mut self) -> &mut CommandBase {
        match self {
            Command::Leaf(base) => base,
            Command::Loop(lp) => &mut lp.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn args(&self) -> &[String] {
        &self.base().args
    }

    pub fn flags(&self) -> CommandFlags {
        self.base().flags
    }

    pub fn set_command_name(&mut self, name: impl Into<String>) {
        self.base_mut().name = name.into();
    }

    pub fn set_args(&mut self, args: Vec<String>) {
        match self {
            Command::Leaf(base) => base.args = args,
            Command::Loop(lp) => lp.set_args(args),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.base().flags.disabled
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.base_mut().flags.disabled = disabled;
    }

    pub fn is_running(&self) -> bool {
        self.base().flags.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.base_mut().flags.running = running;
    }

    pub fn is_being_edited(&self) -> bool {
        self.base().flags.being_edited
    }

    pub fn set_being_edited(&mut self, editing: bool) {
        self.base_mut().flags.being_edited = editing;
    }

    pub fn is_locked_for_editing(&self) -> bool {
        self.base().flags.locked_for_editing
    }

    pub fn set_locked_for_editing(&mut self, locked: bool) {
        self.base_mut().flags.locked_for_editing = locked;
    }

    pub fn as_loop(&self) -> Option<&LoopCommand> {
        match self {
            Command::Loop(lp) => Some(lp),
            Command::Leaf(_) => None,
        }
    }

    pub fn as_loop_mut(&mut self) -> Option<&mut LoopCommand> {
        match self {
            Command::Loop(lp) => Some(lp),
            Command::Leaf(_) => None,
        }
    }

    /// Fully independent copy, children included.
    ///
    /// `Clone` already copies recursively; this is the named entry point the
    /// script store uses for its reference copy.
    pub fn clone_deep(&self) -> Command {
        self.clone()
    }

    /// True when name and arguments match recursively, flags ignored.
    pub fn same_code(&self, other: &Command) -> bool {
        match (self, other) {
            (Command::Leaf(a), Command::Leaf(b)) => a.name == b.name && a.args == b.args,
            (Command::Loop(a), Command::Loop(b)) => {
                a.repeat_count == b.repeat_count
                    && a.children.len() == b.children.len()
                    && a.children.iter().zip(&b.children).all(|(x, y)| x.same_code(y))
            }
            _ => false,
        }
    }

    /// Visit every command in the subtree, this one first.
    pub fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut Command)) {
        f(self);
        if let Command::Loop(lp) = self {
            for child in &mut lp.children {
                child.for_each_mut(f);
            }
        }
    }

    /// The command's text without trailing `;`.
    ///
    /// Leaf: `NAME (a,b)`. Loop: `REPEAT {\n    <child>\n...} N Times`.
    /// With `rich`, disabled commands are wrapped in a faded/struck-through
    /// marker; the marker never changes the underlying code.
    pub fn render_as_text(&self, rich: bool) -> String {
        self.render_at_depth(rich, 0)
    }

    fn render_at_depth(&self, rich: bool, depth: usize) -> String {
        let text = match self {
            Command::Leaf(base) => format!("{} ({})", base.name, base.args.join(",")),
            Command::Loop(lp) => {
                let indent = CHILD_INDENT.repeat(depth + 1);
                let closing = CHILD_INDENT.repeat(depth);
                let mut rt = String::from("REPEAT {\n");
                for child in &lp.children {
                    let child_text = child.render_at_depth(rich, depth + 1);
                    let child_text = match child {
                        Command::Loop(_) => format!("{} {}", LOOP_NAME, child_text),
                        Command::Leaf(_) => child_text,
                    };
                    rt.push_str(&indent);
                    rt.push_str(&child_text);
                    rt.push('\n');
                }
                rt.push_str(&format!("{}}} {} Times", closing, lp.repeat_count));
                rt
            }
        };
        if rich && self.is_disabled() {
            format!("{RICH_FADED_OPEN}{text}{RICH_FADED_CLOSE}")
        } else {
            text
        }
    }

    /// One script line (or block) including the `LOOP` keyword and `;`.
    pub fn render_line(&self, rich: bool) -> String {
        match self {
            Command::Leaf(_) => format!("{};", self.render_as_text(rich)),
            Command::Loop(_) => format!("{} {};", LOOP_NAME, self.render_as_text(rich)),
        }
    }

    /// Number of elementary ticks this command contributes to a run, given
    /// the wait command name and the ticks per waited second. Saturates at
    /// `u64::MAX`.
    pub fn tick_count(&self, wait_command: &str, ticks_per_second: u32) -> u64 {
        if self.is_disabled() {
            return 0;
        }
        match self {
            Command::Leaf(base) if base.name == wait_command => {
                wait_ticks(&base.args, ticks_per_second) as u64
            }
            Command::Leaf(_) => 1,
            Command::Loop(lp) => lp
                .children
                .iter()
                .map(|c| c.tick_count(wait_command, ticks_per_second))
                .fold(0u64, u64::saturating_add)
                .saturating_mul(lp.repeat_count as u64),
        }
    }

    /// Whether running this command executes at least one tick.
    pub fn has_ticks(&self, wait_command: &str, ticks_per_second: u32) -> bool {
        if self.is_disabled() {
            return false;
        }
        match self {
            Command::Leaf(base) if base.name == wait_command => {
                wait_ticks(&base.args, ticks_per_second) > 0
            }
            Command::Leaf(_) => true,
            Command::Loop(lp) => {
                lp.repeat_count > 0
                    && lp
                        .children
                        .iter()
                        .any(|c| c.has_ticks(wait_command, ticks_per_second))
            }
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render_line(false))
    }
}

/// Number of synthetic ticks a wait command with these arguments expands to.
/// Fractional seconds round up to the next whole quantum.
pub fn wait_ticks(args: &[String], ticks_per_second: u32) -> u32 {
    let seconds = args
        .first()
        .and_then(|a| a.trim().parse::<f32>().ok())
        .filter(|s| s.is_finite() && *s > 0.0)
        .unwrap_or(0.0);
    (seconds * ticks_per_second as f32).ceil() as u32
}
