//! Command vocabulary declared by the avatar.
//!
//! The vocabulary is the single source of truth for which command names
//! exist, what argument each one takes, and how each behaves with respect to
//! peer synchronization. The text codec derives its line patterns from it and
//! the executor asks it (through the avatar) which commands are lock or
//! static commands.

use serde::{Deserialize, Serialize};

/// Name of the loop block in the textual and rendered forms.
pub const LOOP_NAME: &str = "LOOP";

/// A grid direction used as the argument of `MOVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    /// Look up a direction by its script name (case-sensitive).
    pub fn from_name(name: &str) -> Option<Direction> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Direction::North => "NORTH",
            Direction::South => "SOUTH",
            Direction::East => "EAST",
            Direction::West => "WEST",
        }
    }

    /// The direction as seen from the opposite side of the board.
    pub fn mirrored(&self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    /// Grid offset `(dx, dz)` of one step in this direction.
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::South => (0, 1),
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of the single argument a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    /// No argument: `NAME ();`
    None,
    /// A non-negative decimal number: `NAME (2);`
    Number,
    /// One of the [`Direction`] names: `NAME (EAST);`
    Direction,
}

impl ArgKind {
    /// Check a parsed argument list against this kind.
    pub fn accepts(&self, args: &[String]) -> bool {
        match self {
            ArgKind::None => args.is_empty(),
            ArgKind::Number => args.len() == 1 && is_number(&args[0]),
            ArgKind::Direction => args.len() == 1 && Direction::from_name(&args[0]).is_some(),
        }
    }
}

fn is_number(s: &str) -> bool {
    let mut parts = s.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let frac = parts.next();
    !whole.is_empty()
        && whole.bytes().all(|b| b.is_ascii_digit())
        && frac.map_or(true, |f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
}

/// Declaration of a single command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub name: String,
    pub arg: ArgKind,
    /// Participates in peer synchronization.
    #[serde(default)]
    pub lock: bool,
    /// Applies to both avatars regardless of which side issued it.
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

impl CommandSpec {
    pub fn new(name: &str, arg: ArgKind) -> Self {
        Self {
            name: name.to_string(),
            arg,
            lock: false,
            is_static: false,
        }
    }

    pub fn lock(mut self) -> Self {
        self.lock = true;
        self
    }

    pub fn global(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// The full set of commands understood by an avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandVocabulary {
    pub commands: Vec<CommandSpec>,
    /// The "wait N seconds" primitive, expanded by the executor.
    pub wait_command: String,
}

impl Default for CommandVocabulary {
    fn default() -> Self {
        let mut commands = vec![
            CommandSpec::new("MOVE", ArgKind::Direction).lock(),
            CommandSpec::new("Continue_Sec", ArgKind::Number).lock(),
            CommandSpec::new("RESET", ArgKind::None).global(),
        ];
        for name in [
            "Start_Engine",
            "Stop_Engine",
            "Climb_Up",
            "Fall_Down",
            "Turn_Left",
            "Turn_Right",
            "Move_Forward",
            "Move_Backward",
        ] {
            commands.push(CommandSpec::new(name, ArgKind::None).lock());
        }
        Self {
            commands,
            wait_command: "Continue_Sec".to_string(),
        }
    }
}

impl CommandVocabulary {
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn is_lock_command(&self, name: &str) -> bool {
        self.get(name).map_or(false, |c| c.lock)
    }

    pub fn is_static_command(&self, name: &str) -> bool {
        self.get(name).map_or(false, |c| c.is_static)
    }

    pub fn is_wait_command(&self, name: &str) -> bool {
        name == self.wait_command
    }

    /// Names that carry a [`ArgKind::Direction`] argument.
    pub fn direction_commands(&self) -> impl Iterator<Item = &str> {
        self.commands
            .iter()
            .filter(|c| c.arg == ArgKind::Direction)
            .map(|c| c.name.as_str())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.commands.is_empty() {
            return Err("Vocabulary must declare at least one command".to_string());
        }
        for (i, c) in self.commands.iter().enumerate() {
            if c.name.is_empty() || c.name.contains(['|', ',', '(', ')', ';', ' ']) {
                return Err(format!("Invalid command name {:?}", c.name));
            }
            if c.name == LOOP_NAME || crate::transport::is_reserved_name(&c.name) {
                return Err(format!("Command name {:?} is reserved", c.name));
            }
            if self.commands[..i].iter().any(|o| o.name == c.name) {
                return Err(format!("Duplicate command {:?}", c.name));
            }
        }
        match self.get(&self.wait_command) {
            Some(spec) if spec.arg == ArgKind::Number => Ok(()),
            Some(_) => Err(format!(
                "Wait command {:?} must take a number",
                self.wait_command
            )),
            None => Err(format!(
                "Wait command {:?} is not declared",
                self.wait_command
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_name_table_is_bidirectional() {
        for d in Direction::ALL {
            assert_eq!(Direction::from_name(d.name()), Some(d));
            assert_eq!(serde_json::to_string(&d).unwrap(), format!("\"{}\"", d.name()));
        }
        assert_eq!(Direction::West.name(), "WEST");
        assert_eq!(Direction::from_name("north"), None);
        assert_eq!(Direction::from_name("UP"), None);
    }

    #[test]
    fn test_mirrored_is_an_involution() {
        for d in Direction::ALL {
            assert_ne!(d.mirrored(), d);
            assert_eq!(d.mirrored().mirrored(), d);
        }
        assert_eq!(Direction::East.mirrored(), Direction::West);
    }

    #[test]
    fn test_arg_kind_accepts() {
        let one = |s: &str| vec![s.to_string()];
        assert!(ArgKind::None.accepts(&[]));
        assert!(!ArgKind::None.accepts(&one("1")));
        assert!(ArgKind::Number.accepts(&one("3")));
        assert!(ArgKind::Number.accepts(&one("1.5")));
        assert!(!ArgKind::Number.accepts(&one("-1")));
        assert!(!ArgKind::Number.accepts(&one("1.")));
        assert!(!ArgKind::Number.accepts(&one("EAST")));
        assert!(ArgKind::Direction.accepts(&one("EAST")));
        assert!(!ArgKind::Direction.accepts(&[]));
    }

    #[test]
    fn test_default_vocabulary() {
        let vocab = CommandVocabulary::default();
        assert!(vocab.validate().is_ok());
        assert!(vocab.is_lock_command("MOVE"));
        assert!(vocab.is_lock_command("Climb_Up"));
        assert!(!vocab.is_lock_command("RESET"));
        assert!(vocab.is_static_command("RESET"));
        assert!(!vocab.is_static_command("MOVE"));
        assert!(vocab.is_wait_command("Continue_Sec"));
        assert_eq!(vocab.direction_commands().collect::<Vec<_>>(), vec!["MOVE"]);
    }

    #[test]
    fn test_validate_rejects_reserved_and_duplicates() {
        let mut vocab = CommandVocabulary::default();
        vocab.commands.push(CommandSpec::new("FINISH", ArgKind::None));
        assert!(vocab.validate().is_err());

        let mut vocab = CommandVocabulary::default();
        vocab.commands.push(CommandSpec::new("MOVE", ArgKind::None));
        assert!(vocab.validate().is_err());

        let mut vocab = CommandVocabulary::default();
        vocab.wait_command = "Sleep".to_string();
        assert!(vocab.validate().is_err());
    }
}
