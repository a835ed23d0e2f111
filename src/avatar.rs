//! Avatar capability and a grid-based reference avatar.
//!
//! The executor never inspects the game world directly: it asks the avatar
//! which commands are lock/static commands, whether it is still alive, and
//! hands it one primitive command at a time.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::executor::RunFlag;
use crate::vocabulary::{CommandVocabulary, Direction};

pub trait Avatar {
    /// Global commands applied to both avatars regardless of the issuer.
    fn is_static_command(&self, name: &str) -> bool;
    /// Commands that take part in peer synchronization.
    fn is_lock_command(&self, name: &str) -> bool;
    fn is_dead(&self) -> bool;
    /// Execute one primitive. Returns false when the command was not
    /// understood.
    fn parse_command(&mut self, name: &str, args: &[String]) -> bool;
    fn reset_position(&mut self);
}

impl<A: Avatar + ?Sized> Avatar for Rc<RefCell<A>> {
    fn is_static_command(&self, name: &str) -> bool {
        self.borrow().is_static_command(name)
    }

    fn is_lock_command(&self, name: &str) -> bool {
        self.borrow().is_lock_command(name)
    }

    fn is_dead(&self) -> bool {
        self.borrow().is_dead()
    }

    fn parse_command(&mut self, name: &str, args: &[String]) -> bool {
        self.borrow_mut().parse_command(name, args)
    }

    fn reset_position(&mut self) {
        self.borrow_mut().reset_position()
    }
}

pub type GridCell = (i32, i32);

/// Avatar on a square grid.
///
/// The rival avatar replays the peer's commands in mirrored orientation,
/// since the peer looks at the board from the opposite side.
#[derive(Debug, Clone)]
pub struct GridAvatar {
    vocabulary: CommandVocabulary,
    size: i32,
    start: GridCell,
    position: GridCell,
    heading: Direction,
    mirror: bool,
    traps: HashSet<GridCell>,
    dead: bool,
    engine_on: bool,
    altitude: u32,
    run_flag: Option<RunFlag>,
}

impl GridAvatar {
    /// The local avatar, starting in the first cell.
    pub fn local(vocabulary: CommandVocabulary, size: i32) -> Self {
        Self::new(vocabulary, size, (0, 0), false)
    }

    /// The rival avatar, starting in the last cell and mirrored.
    pub fn rival(vocabulary: CommandVocabulary, size: i32) -> Self {
        let last = (size - 1).max(0);
        Self::new(vocabulary, size, (last, last), true)
    }

    fn new(vocabulary: CommandVocabulary, size: i32, start: GridCell, mirror: bool) -> Self {
        Self {
            vocabulary,
            size: size.max(1),
            start,
            position: start,
            heading: if mirror { Direction::South } else { Direction::North },
            mirror,
            traps: HashSet::new(),
            dead: false,
            engine_on: false,
            altitude: 0,
            run_flag: None,
        }
    }

    pub fn with_traps(mut self, traps: impl IntoIterator<Item = GridCell>) -> Self {
        self.traps = traps.into_iter().collect();
        self
    }

    /// Stepping on a trap clears this flag, stopping the local run.
    pub fn with_run_flag(mut self, flag: RunFlag) -> Self {
        self.run_flag = Some(flag);
        self
    }

    pub fn position(&self) -> GridCell {
        self.position
    }

    pub fn altitude(&self) -> u32 {
        self.altitude
    }

    pub fn engine_on(&self) -> bool {
        self.engine_on
    }

    fn step(&mut self, dir: Direction) {
        let dir = if self.mirror { dir.mirrored() } else { dir };
        let (dx, dz) = dir.offset();
        let next = (self.position.0 + dx, self.position.1 + dz);
        if next.0 < 0 || next.1 < 0 || next.0 >= self.size || next.1 >= self.size {
            log::debug!("Move {} from {:?} leaves the grid, ignored", dir, self.position);
            return;
        }
        self.position = next;
        if self.traps.contains(&next) {
            log::info!("Avatar hit a trap at {:?}", next);
            self.dead = true;
            if let Some(flag) = &self.run_flag {
                flag.clear();
            }
        }
    }

    fn turn(&mut self, clockwise: bool) {
        self.heading = match (self.heading, clockwise) {
            (Direction::North, true) | (Direction::South, false) => Direction::East,
            (Direction::East, true) | (Direction::West, false) => Direction::South,
            (Direction::South, true) | (Direction::North, false) => Direction::West,
            (Direction::West, true) | (Direction::East, false) => Direction::North,
        };
    }
}

impl Avatar for GridAvatar {
    fn is_static_command(&self, name: &str) -> bool {
        self.vocabulary.is_static_command(name)
    }

    fn is_lock_command(&self, name: &str) -> bool {
        self.vocabulary.is_lock_command(name)
    }

    fn is_dead(&self) -> bool {
        self.dead
    }

    fn parse_command(&mut self, name: &str, args: &[String]) -> bool {
        match self.vocabulary.get(name) {
            Some(spec) if spec.arg.accepts(args) => {}
            _ => return false,
        }
        match name {
            "MOVE" => match args.first().and_then(|a| Direction::from_name(a)) {
                Some(dir) => self.step(dir),
                None => return false,
            },
            "RESET" => self.reset_position(),
            "Start_Engine" => self.engine_on = true,
            "Stop_Engine" => {
                self.engine_on = false;
                self.altitude = 0;
            }
            "Climb_Up" if self.engine_on => self.altitude += 1,
            "Fall_Down" if self.engine_on => self.altitude = self.altitude.saturating_sub(1),
            "Turn_Left" if self.engine_on => self.turn(false),
            "Turn_Right" if self.engine_on => self.turn(true),
            "Move_Forward" if self.engine_on => {
                let heading = if self.mirror { self.heading.mirrored() } else { self.heading };
                self.step(heading)
            }
            "Move_Backward" if self.engine_on => {
                let heading = if self.mirror { self.heading } else { self.heading.mirrored() };
                self.step(heading)
            }
            _ => {}
        }
        true
    }

    fn reset_position(&mut self) {
        self.position = self.start;
        self.heading = if self.mirror { Direction::South } else { Direction::North };
        self.dead = false;
        self.altitude = 0;
    }
}
