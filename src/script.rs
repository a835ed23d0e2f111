//! Scripts and the script store.
//!
//! A [`Script`] is an ordered list of top-level commands. The
//! [`ScriptStore`] keeps the working script (shown, edited and run) next to a
//! reference copy taken at load time, before any randomization.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::command::Command;
use crate::vocabulary::{CommandVocabulary, Direction};

/// Address of a command in the tree: top-level index, then child indices.
pub type CommandPath = [usize];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    commands: Vec<Command>,
}

impl Script {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut Vec<Command> {
        &mut self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn get(&self, path: &CommandPath) -> Option<&Command> {
        let (first, rest) = path.split_first()?;
        let mut node = self.commands.get(*first)?;
        for index in rest {
            node = node.as_loop()?.children().get(*index)?;
        }
        Some(node)
    }

    pub fn get_mut(&mut self, path: &CommandPath) -> Option<&mut Command> {
        let (first, rest) = path.split_first()?;
        let mut node = self.commands.get_mut(*first)?;
        for index in rest {
            node = node.as_loop_mut()?.children_mut().get_mut(*index)?;
        }
        Some(node)
    }

    pub fn deep_copy(&self) -> Script {
        Script {
            commands: self.commands.iter().map(Command::clone_deep).collect(),
        }
    }

    /// Same names, arguments and loop structure; flags ignored.
    pub fn same_code(&self, other: &Script) -> bool {
        self.commands.len() == other.commands.len()
            && self
                .commands
                .iter()
                .zip(&other.commands)
                .all(|(a, b)| a.same_code(b))
    }

    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut Command)) {
        for command in &mut self.commands {
            command.for_each_mut(&mut f);
        }
    }

    pub fn clear_running_flags(&mut self) {
        self.for_each_mut(|c| c.set_running(false));
    }

    /// Elementary ticks a full run of this script takes.
    pub fn tick_count(&self, wait_command: &str, ticks_per_second: u32) -> u64 {
        self.commands
            .iter()
            .map(|c| c.tick_count(wait_command, ticks_per_second))
            .fold(0u64, u64::saturating_add)
    }
}

/// Working script plus the reference copy it was loaded from.
#[derive(Debug, Default)]
pub struct ScriptStore {
    working: Option<Script>,
    reference: Option<Script>,
    editing: Option<Vec<usize>>,
}

impl ScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the loaded script. The reference copy is taken here, before
    /// any randomization can touch the working script.
    pub fn load(&mut self, script: Script) {
        log::info!("Loaded script with {} top-level commands", script.len());
        self.reference = Some(script.deep_copy());
        self.working = Some(script);
        self.editing = None;
    }

    pub fn unload(&mut self) {
        self.working = None;
        self.reference = None;
        self.editing = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.working.is_some()
    }

    pub fn working(&self) -> Option<&Script> {
        self.working.as_ref()
    }

    pub fn working_mut(&mut self) -> Option<&mut Script> {
        self.working.as_mut()
    }

    pub fn reference(&self) -> Option<&Script> {
        self.reference.as_ref()
    }

    /// Throw away edits and go back to the code as loaded.
    pub fn restore_reference(&mut self) {
        if let Some(reference) = &self.reference {
            self.working = Some(reference.deep_copy());
            self.editing = None;
        }
    }

    pub fn matches_reference(&self) -> bool {
        match (&self.working, &self.reference) {
            (Some(w), Some(r)) => w.same_code(r),
            (None, None) => true,
            _ => false,
        }
    }

    /// Re-roll every direction argument in the working script.
    /// Returns the number of arguments rewritten.
    pub fn randomize<R: Rng + ?Sized>(&mut self, vocabulary: &CommandVocabulary, rng: &mut R) -> usize {
        let Some(working) = self.working.as_mut() else {
            return 0;
        };
        let targets: Vec<String> = vocabulary.direction_commands().map(str::to_string).collect();
        let mut rewritten = 0;
        working.for_each_mut(|c| {
            if c.as_loop().is_some() || !targets.iter().any(|t| t == c.name()) {
                return;
            }
            if let Some(dir) = Direction::ALL.choose(rng) {
                c.set_args(vec![dir.name().to_string()]);
                rewritten += 1;
            }
        });
        rewritten
    }

    /// Mark one command as being edited, clearing any previous one.
    /// Commands locked for editing are refused.
    pub fn begin_editing(&mut self, path: &CommandPath) -> bool {
        let Some(working) = self.working.as_mut() else {
            return false;
        };
        match working.get(path) {
            Some(c) if !c.is_locked_for_editing() => {}
            Some(_) => {
                log::warn!("Command at {:?} is locked for editing", path);
                return false;
            }
            None => return false,
        }
        if let Some(previous) = self.editing.take() {
            if let Some(c) = working.get_mut(&previous) {
                c.set_being_edited(false);
            }
        }
        if let Some(c) = working.get_mut(path) {
            c.set_being_edited(true);
        }
        self.editing = Some(path.to_vec());
        true
    }

    pub fn end_editing(&mut self) {
        if let (Some(previous), Some(working)) = (self.editing.take(), self.working.as_mut()) {
            if let Some(c) = working.get_mut(&previous) {
                c.set_being_edited(false);
            }
        }
    }

    pub fn set_disabled(&mut self, path: &CommandPath, disabled: bool) -> bool {
        match self.working.as_mut().and_then(|w| w.get_mut(path)) {
            Some(c) => {
                c.set_disabled(disabled);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample() -> Script {
        Script::new(vec![
            Command::leaf("MOVE", &["NORTH"]),
            Command::repeat(
                2,
                vec![Command::leaf("MOVE", &["EAST"]), Command::leaf("Climb_Up", &[])],
            ),
            Command::leaf("Continue_Sec", &["1"]),
        ])
    }

    fn count_being_edited(script: &Script) -> usize {
        let mut copy = script.clone();
        let mut n = 0;
        copy.for_each_mut(|c| {
            if c.is_being_edited() {
                n += 1;
            }
        });
        n
    }

    #[test]
    fn test_path_lookup() {
        let script = sample();
        assert_eq!(script.get(&[0]).unwrap().name(), "MOVE");
        assert_eq!(script.get(&[1, 1]).unwrap().name(), "Climb_Up");
        assert!(script.get(&[0, 0]).is_none());
        assert!(script.get(&[5]).is_none());
        assert!(script.get(&[]).is_none());
    }

    #[test]
    fn test_reference_taken_at_load() {
        let mut store = ScriptStore::new();
        store.load(sample());
        store.working_mut().unwrap().get_mut(&[0]).unwrap().set_args(vec!["SOUTH".into()]);
        assert!(!store.matches_reference());
        assert_eq!(store.reference().unwrap().get(&[0]).unwrap().args()[0], "NORTH");

        store.restore_reference();
        assert!(store.matches_reference());
    }

    #[test]
    fn test_randomize_leaves_reference_untouched() {
        let mut store = ScriptStore::new();
        store.load(sample());
        let vocab = CommandVocabulary::default();
        let mut rng = StdRng::seed_from_u64(7);

        let rewritten = store.randomize(&vocab, &mut rng);
        assert_eq!(rewritten, 2);
        assert!(store.reference().unwrap().same_code(&sample()));

        let working = store.working().unwrap();
        assert_eq!(working.get(&[2]).unwrap().args()[0], "1");
        assert_eq!(working.get(&[1, 1]).unwrap().name(), "Climb_Up");
        let paths: [&[usize]; 2] = [&[0], &[1, 0]];
        for path in paths {
            let arg = &working.get(path).unwrap().args()[0];
            assert!(Direction::from_name(arg).is_some());
        }
    }

    #[test]
    fn test_randomize_is_reproducible_with_seed() {
        let vocab = CommandVocabulary::default();
        let mut a = ScriptStore::new();
        let mut b = ScriptStore::new();
        a.load(sample());
        b.load(sample());
        a.randomize(&vocab, &mut StdRng::seed_from_u64(42));
        b.randomize(&vocab, &mut StdRng::seed_from_u64(42));
        assert!(a.working().unwrap().same_code(b.working().unwrap()));
    }

    #[test]
    fn test_at_most_one_being_edited() {
        let mut store = ScriptStore::new();
        store.load(sample());
        assert!(store.begin_editing(&[0]));
        assert!(store.begin_editing(&[1, 0]));
        let working = store.working().unwrap();
        assert_eq!(count_being_edited(working), 1);
        assert!(working.get(&[1, 0]).unwrap().is_being_edited());

        store.end_editing();
        assert_eq!(count_being_edited(store.working().unwrap()), 0);
    }

    #[test]
    fn test_locked_command_cannot_be_edited() {
        let mut store = ScriptStore::new();
        store.load(sample());
        store.working_mut().unwrap().get_mut(&[2]).unwrap().set_locked_for_editing(true);
        assert!(!store.begin_editing(&[2]));
        assert!(!store.begin_editing(&[9]));
    }

    #[test]
    fn test_tick_count() {
        assert_eq!(sample().tick_count("Continue_Sec", 2), 1 + 4 + 2);
    }
}
