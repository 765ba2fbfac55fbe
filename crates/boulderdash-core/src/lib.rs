//! Deterministic Boulder Dash / Emerald Mine style simulation core.
//!
//! The crate models a tile-based puzzle world as a plain value type:
//! [`GameState`] is created from a pipe-delimited level string, advanced one
//! tick per [`GameState::apply_action`], and freely cloned by callers (search
//! drivers fan out by cloning). Each tick yields a bit-field of reward events,
//! an incrementally maintained 64-bit board hash, and projections to a
//! one-hot observation tensor or an RGB sprite image.
//!
//! There is no I/O, no logging, and no global mutable state in here; the
//! element catalog and sprite tiles are immutable tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Sprite tile width in pixels.
pub const SPRITE_WIDTH: usize = 32;
/// Sprite tile height in pixels.
pub const SPRITE_HEIGHT: usize = 32;
/// RGB channel count per pixel.
pub const SPRITE_CHANNELS: usize = 3;
const SPRITE_DATA_LEN_PER_ROW: usize = SPRITE_WIDTH * SPRITE_CHANNELS;
const SPRITE_DATA_LEN: usize = SPRITE_WIDTH * SPRITE_HEIGHT * SPRITE_CHANNELS;

/// Number of distinct hidden cell kinds.
pub const NUM_HIDDEN_CELL_TYPES: usize = 50;
/// Number of distinct observable cell kinds (directional variants collapsed).
pub const NUM_VISIBLE_CELL_TYPES: usize = 34;
/// Number of directions used by cell interactions (cardinals, noop, diagonals).
pub const NUM_DIRECTIONS: usize = 9;

/// Property bit letting other objects roll off this cell to the side.
pub const PROP_ROUNDED: u8 = 1 << 0;
/// Property bit letting the agent push this cell horizontally.
pub const PROP_PUSHABLE: u8 = 1 << 1;
/// Property bit marking cells that detonate when hit or caught in a blast.
pub const PROP_CAN_EXPLODE: u8 = 1 << 2;
/// Property bit letting an explosion overwrite this cell with its product.
pub const PROP_CONSUMABLE: u8 = 1 << 3;
/// Property bit letting the agent walk onto this cell in one step.
pub const PROP_TRAVERSABLE: u8 = 1 << 4;

/// Reward signal bits reported by [`GameState::reward_signal`].
///
/// The core only ever ORs these together; interpretation is up to the caller.
pub mod reward {
    /// Reserved bit for agent death; the core reports death via
    /// [`GameState::agent_alive`](crate::GameState::agent_alive) instead.
    pub const AGENT_DIES: u64 = 1 << 0;
    pub const COLLECT_DIAMOND: u64 = 1 << 1;
    pub const WALK_THROUGH_EXIT: u64 = 1 << 2;
    pub const NUT_TO_DIAMOND: u64 = 1 << 3;
    pub const BUTTERFLY_TO_DIAMOND: u64 = 1 << 4;
    pub const COLLECT_KEY: u64 = 1 << 5;
    pub const COLLECT_KEY_RED: u64 = 1 << 6;
    pub const COLLECT_KEY_BLUE: u64 = 1 << 7;
    pub const COLLECT_KEY_GREEN: u64 = 1 << 8;
    pub const COLLECT_KEY_YELLOW: u64 = 1 << 9;
    pub const WALK_THROUGH_GATE: u64 = 1 << 10;
    pub const WALK_THROUGH_GATE_RED: u64 = 1 << 11;
    pub const WALK_THROUGH_GATE_BLUE: u64 = 1 << 12;
    pub const WALK_THROUGH_GATE_GREEN: u64 = 1 << 13;
    pub const WALK_THROUGH_GATE_YELLOW: u64 = 1 << 14;
}

const SPLIT64_S1: u64 = 30;
const SPLIT64_S2: u64 = 27;
const SPLIT64_S3: u64 = 31;
const SPLIT64_C1: u64 = 0x9E37_79B9_7F4A_7C15;
const SPLIT64_C2: u64 = 0xBF58_476D_1CE4_E5B9;
const SPLIT64_C3: u64 = 0x94D0_49BB_1331_11EB;

/// Reference SplitMix64 mixer, used to seed the world RNG and to derive the
/// per-(cell, index) values of the incremental board hash.
#[must_use]
pub fn splitmix64(seed: u64) -> u64 {
    let mut result = seed.wrapping_add(SPLIT64_C1);
    result = (result ^ (result >> SPLIT64_S1)).wrapping_mul(SPLIT64_C2);
    result = (result ^ (result >> SPLIT64_S2)).wrapping_mul(SPLIT64_C3);
    result ^ (result >> SPLIT64_S3)
}

/// Xorshift64 with shifts (13, 7, 17). Advances `state` and returns the new
/// value. The tick driver calls this only for blob growth and orange
/// re-routing, so worlds without random elements never touch the stream.
pub fn xorshift64(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

/// Hash contribution of `kind` sitting at flat position `index` on a board of
/// `flat_size` cells. The board hash is the XOR of this over every cell.
#[must_use]
pub fn cell_hash(flat_size: usize, kind: HiddenCellType, index: usize) -> u64 {
    splitmix64((flat_size * kind as usize + index) as u64)
}

/// Agent actions, a strict subset of [`Direction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    Up = 0,
    Right = 1,
    Down = 2,
    Left = 3,
}

impl Action {
    /// All actions in code order.
    pub const ALL: [Action; 4] = [Action::Up, Action::Right, Action::Down, Action::Left];

    /// Size of the action space.
    #[must_use]
    pub const fn space_size() -> usize {
        4
    }

    /// The grid direction this action moves the agent in.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Action::Up => Direction::Up,
            Action::Right => Direction::Right,
            Action::Down => Direction::Down,
            Action::Left => Direction::Left,
        }
    }
}

impl TryFrom<u8> for Action {
    type Error = ArgumentError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Action::Up),
            1 => Ok(Action::Right),
            2 => Ok(Action::Down),
            3 => Ok(Action::Left),
            _ => Err(ArgumentError::Action(code)),
        }
    }
}

/// Directions cell interactions take place in.
///
/// The first four discriminants coincide with [`Action`] codes; `Noop` refers
/// to the cell itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    Up = 0,
    Right = 1,
    Down = 2,
    Left = 3,
    Noop = 4,
    UpRight = 5,
    DownRight = 6,
    DownLeft = 7,
    UpLeft = 8,
}

impl Direction {
    /// All directions in code order; explosions visit them in this order.
    pub const ALL: [Direction; NUM_DIRECTIONS] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
        Direction::Noop,
        Direction::UpRight,
        Direction::DownRight,
        Direction::DownLeft,
        Direction::UpLeft,
    ];

    /// The four cardinal directions in code order.
    pub const CARDINALS: [Direction; 4] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];

    /// Column/row offset of one step in this direction.
    #[must_use]
    pub const fn offset(self) -> (i64, i64) {
        match self {
            Direction::Up => (0, -1),
            Direction::Right => (1, 0),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Noop => (0, 0),
            Direction::UpRight => (1, -1),
            Direction::DownRight => (1, 1),
            Direction::DownLeft => (-1, 1),
            Direction::UpLeft => (-1, -1),
        }
    }

    /// Counter-clockwise quarter turn. Defined for cardinals only.
    #[must_use]
    pub const fn rotate_left(self) -> Direction {
        match self {
            Direction::Up => Direction::Left,
            Direction::Left => Direction::Down,
            Direction::Down => Direction::Right,
            Direction::Right => Direction::Up,
            other => other,
        }
    }

    /// Clockwise quarter turn. Defined for cardinals only.
    #[must_use]
    pub const fn rotate_right(self) -> Direction {
        match self {
            Direction::Up => Direction::Right,
            Direction::Right => Direction::Down,
            Direction::Down => Direction::Left,
            Direction::Left => Direction::Up,
            other => other,
        }
    }

    #[must_use]
    const fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }
}

/// The full hidden cell taxonomy. Discriminants are the level-string codes
/// and the stable integer identity fed into the board hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum HiddenCellType {
    Agent = 0,
    Empty = 1,
    Dirt = 2,
    Stone = 3,
    StoneFalling = 4,
    Diamond = 5,
    DiamondFalling = 6,
    ExitClosed = 7,
    ExitOpen = 8,
    AgentInExit = 9,
    FireflyUp = 10,
    FireflyLeft = 11,
    FireflyDown = 12,
    FireflyRight = 13,
    ButterflyUp = 14,
    ButterflyLeft = 15,
    ButterflyDown = 16,
    ButterflyRight = 17,
    WallBrick = 18,
    WallSteel = 19,
    WallMagicDormant = 20,
    WallMagicOn = 21,
    WallMagicExpired = 22,
    Blob = 23,
    ExplosionDiamond = 24,
    ExplosionBoulder = 25,
    ExplosionEmpty = 26,
    GateRedClosed = 27,
    GateRedOpen = 28,
    KeyRed = 29,
    GateBlueClosed = 30,
    GateBlueOpen = 31,
    KeyBlue = 32,
    GateGreenClosed = 33,
    GateGreenOpen = 34,
    KeyGreen = 35,
    GateYellowClosed = 36,
    GateYellowOpen = 37,
    KeyYellow = 38,
    Nut = 39,
    NutFalling = 40,
    Bomb = 41,
    BombFalling = 42,
    OrangeUp = 43,
    OrangeLeft = 44,
    OrangeDown = 45,
    OrangeRight = 46,
    PebbleInDirt = 47,
    StoneInDirt = 48,
    VoidInDirt = 49,
}

/// Observable cell kinds: the hidden taxonomy with directional and falling
/// variants collapsed. Discriminants are observation channel indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum VisibleCellType {
    Agent = 0,
    Empty = 1,
    Dirt = 2,
    Stone = 3,
    Diamond = 4,
    ExitClosed = 5,
    ExitOpen = 6,
    AgentInExit = 7,
    Firefly = 8,
    Butterfly = 9,
    WallBrick = 10,
    WallSteel = 11,
    WallMagicOff = 12,
    WallMagicOn = 13,
    Blob = 14,
    Explosion = 15,
    GateRedClosed = 16,
    GateRedOpen = 17,
    KeyRed = 18,
    GateBlueClosed = 19,
    GateBlueOpen = 20,
    KeyBlue = 21,
    GateGreenClosed = 22,
    GateGreenOpen = 23,
    KeyGreen = 24,
    GateYellowClosed = 25,
    GateYellowOpen = 26,
    KeyYellow = 27,
    Nut = 28,
    Bomb = 29,
    Orange = 30,
    PebbleInDirt = 31,
    StoneInDirt = 32,
    VoidInDirt = 33,
}

impl HiddenCellType {
    /// All hidden kinds in code order; `ALL[code]` is the kind with that code.
    pub const ALL: [HiddenCellType; NUM_HIDDEN_CELL_TYPES] = [
        HiddenCellType::Agent,
        HiddenCellType::Empty,
        HiddenCellType::Dirt,
        HiddenCellType::Stone,
        HiddenCellType::StoneFalling,
        HiddenCellType::Diamond,
        HiddenCellType::DiamondFalling,
        HiddenCellType::ExitClosed,
        HiddenCellType::ExitOpen,
        HiddenCellType::AgentInExit,
        HiddenCellType::FireflyUp,
        HiddenCellType::FireflyLeft,
        HiddenCellType::FireflyDown,
        HiddenCellType::FireflyRight,
        HiddenCellType::ButterflyUp,
        HiddenCellType::ButterflyLeft,
        HiddenCellType::ButterflyDown,
        HiddenCellType::ButterflyRight,
        HiddenCellType::WallBrick,
        HiddenCellType::WallSteel,
        HiddenCellType::WallMagicDormant,
        HiddenCellType::WallMagicOn,
        HiddenCellType::WallMagicExpired,
        HiddenCellType::Blob,
        HiddenCellType::ExplosionDiamond,
        HiddenCellType::ExplosionBoulder,
        HiddenCellType::ExplosionEmpty,
        HiddenCellType::GateRedClosed,
        HiddenCellType::GateRedOpen,
        HiddenCellType::KeyRed,
        HiddenCellType::GateBlueClosed,
        HiddenCellType::GateBlueOpen,
        HiddenCellType::KeyBlue,
        HiddenCellType::GateGreenClosed,
        HiddenCellType::GateGreenOpen,
        HiddenCellType::KeyGreen,
        HiddenCellType::GateYellowClosed,
        HiddenCellType::GateYellowOpen,
        HiddenCellType::KeyYellow,
        HiddenCellType::Nut,
        HiddenCellType::NutFalling,
        HiddenCellType::Bomb,
        HiddenCellType::BombFalling,
        HiddenCellType::OrangeUp,
        HiddenCellType::OrangeLeft,
        HiddenCellType::OrangeDown,
        HiddenCellType::OrangeRight,
        HiddenCellType::PebbleInDirt,
        HiddenCellType::StoneInDirt,
        HiddenCellType::VoidInDirt,
    ];

    /// Look up the kind for a level-string code.
    #[must_use]
    pub fn from_code(code: i64) -> Option<HiddenCellType> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| HiddenCellType::ALL.get(idx).copied())
    }

    /// The observation channel this kind projects to.
    #[must_use]
    pub const fn visible(self) -> VisibleCellType {
        match self {
            HiddenCellType::Agent => VisibleCellType::Agent,
            HiddenCellType::Empty => VisibleCellType::Empty,
            HiddenCellType::Dirt => VisibleCellType::Dirt,
            HiddenCellType::Stone | HiddenCellType::StoneFalling => VisibleCellType::Stone,
            HiddenCellType::Diamond | HiddenCellType::DiamondFalling => VisibleCellType::Diamond,
            HiddenCellType::ExitClosed => VisibleCellType::ExitClosed,
            HiddenCellType::ExitOpen => VisibleCellType::ExitOpen,
            HiddenCellType::AgentInExit => VisibleCellType::AgentInExit,
            HiddenCellType::FireflyUp
            | HiddenCellType::FireflyLeft
            | HiddenCellType::FireflyDown
            | HiddenCellType::FireflyRight => VisibleCellType::Firefly,
            HiddenCellType::ButterflyUp
            | HiddenCellType::ButterflyLeft
            | HiddenCellType::ButterflyDown
            | HiddenCellType::ButterflyRight => VisibleCellType::Butterfly,
            HiddenCellType::WallBrick => VisibleCellType::WallBrick,
            HiddenCellType::WallSteel => VisibleCellType::WallSteel,
            HiddenCellType::WallMagicDormant | HiddenCellType::WallMagicExpired => {
                VisibleCellType::WallMagicOff
            }
            HiddenCellType::WallMagicOn => VisibleCellType::WallMagicOn,
            HiddenCellType::Blob => VisibleCellType::Blob,
            HiddenCellType::ExplosionDiamond
            | HiddenCellType::ExplosionBoulder
            | HiddenCellType::ExplosionEmpty => VisibleCellType::Explosion,
            HiddenCellType::GateRedClosed => VisibleCellType::GateRedClosed,
            HiddenCellType::GateRedOpen => VisibleCellType::GateRedOpen,
            HiddenCellType::KeyRed => VisibleCellType::KeyRed,
            HiddenCellType::GateBlueClosed => VisibleCellType::GateBlueClosed,
            HiddenCellType::GateBlueOpen => VisibleCellType::GateBlueOpen,
            HiddenCellType::KeyBlue => VisibleCellType::KeyBlue,
            HiddenCellType::GateGreenClosed => VisibleCellType::GateGreenClosed,
            HiddenCellType::GateGreenOpen => VisibleCellType::GateGreenOpen,
            HiddenCellType::KeyGreen => VisibleCellType::KeyGreen,
            HiddenCellType::GateYellowClosed => VisibleCellType::GateYellowClosed,
            HiddenCellType::GateYellowOpen => VisibleCellType::GateYellowOpen,
            HiddenCellType::KeyYellow => VisibleCellType::KeyYellow,
            HiddenCellType::Nut | HiddenCellType::NutFalling => VisibleCellType::Nut,
            HiddenCellType::Bomb | HiddenCellType::BombFalling => VisibleCellType::Bomb,
            HiddenCellType::OrangeUp
            | HiddenCellType::OrangeLeft
            | HiddenCellType::OrangeDown
            | HiddenCellType::OrangeRight => VisibleCellType::Orange,
            HiddenCellType::PebbleInDirt => VisibleCellType::PebbleInDirt,
            HiddenCellType::StoneInDirt => VisibleCellType::StoneInDirt,
            HiddenCellType::VoidInDirt => VisibleCellType::VoidInDirt,
        }
    }

    /// Property bitmask of this kind.
    #[must_use]
    pub const fn properties(self) -> u8 {
        match self {
            HiddenCellType::Agent => PROP_CONSUMABLE | PROP_CAN_EXPLODE,
            HiddenCellType::Empty | HiddenCellType::Dirt => PROP_CONSUMABLE | PROP_TRAVERSABLE,
            HiddenCellType::Stone => PROP_CONSUMABLE | PROP_ROUNDED | PROP_PUSHABLE,
            HiddenCellType::StoneFalling => PROP_CONSUMABLE,
            HiddenCellType::Diamond => PROP_CONSUMABLE | PROP_ROUNDED | PROP_TRAVERSABLE,
            HiddenCellType::DiamondFalling => PROP_CONSUMABLE | PROP_TRAVERSABLE,
            HiddenCellType::ExitOpen => PROP_TRAVERSABLE,
            HiddenCellType::ExitClosed | HiddenCellType::AgentInExit => 0,
            HiddenCellType::FireflyUp
            | HiddenCellType::FireflyLeft
            | HiddenCellType::FireflyDown
            | HiddenCellType::FireflyRight
            | HiddenCellType::ButterflyUp
            | HiddenCellType::ButterflyLeft
            | HiddenCellType::ButterflyDown
            | HiddenCellType::ButterflyRight => PROP_CONSUMABLE | PROP_CAN_EXPLODE,
            HiddenCellType::WallBrick => PROP_CONSUMABLE | PROP_ROUNDED,
            HiddenCellType::WallSteel => 0,
            HiddenCellType::WallMagicDormant
            | HiddenCellType::WallMagicOn
            | HiddenCellType::WallMagicExpired => PROP_CONSUMABLE,
            HiddenCellType::Blob => PROP_CONSUMABLE,
            HiddenCellType::ExplosionDiamond
            | HiddenCellType::ExplosionBoulder
            | HiddenCellType::ExplosionEmpty => 0,
            HiddenCellType::GateRedClosed
            | HiddenCellType::GateRedOpen
            | HiddenCellType::GateBlueClosed
            | HiddenCellType::GateBlueOpen
            | HiddenCellType::GateGreenClosed
            | HiddenCellType::GateGreenOpen
            | HiddenCellType::GateYellowClosed
            | HiddenCellType::GateYellowOpen => 0,
            HiddenCellType::KeyRed
            | HiddenCellType::KeyBlue
            | HiddenCellType::KeyGreen
            | HiddenCellType::KeyYellow => PROP_CONSUMABLE | PROP_TRAVERSABLE,
            HiddenCellType::Nut => PROP_CONSUMABLE | PROP_ROUNDED | PROP_PUSHABLE,
            HiddenCellType::NutFalling => PROP_CONSUMABLE,
            HiddenCellType::Bomb => {
                PROP_CONSUMABLE | PROP_CAN_EXPLODE | PROP_ROUNDED | PROP_PUSHABLE
            }
            HiddenCellType::BombFalling => PROP_CONSUMABLE | PROP_CAN_EXPLODE,
            HiddenCellType::OrangeUp
            | HiddenCellType::OrangeLeft
            | HiddenCellType::OrangeDown
            | HiddenCellType::OrangeRight => PROP_CONSUMABLE | PROP_CAN_EXPLODE,
            HiddenCellType::PebbleInDirt
            | HiddenCellType::StoneInDirt
            | HiddenCellType::VoidInDirt => PROP_CONSUMABLE,
        }
    }

    /// Single-character glyph used by [`GameState`]'s `Display` rendering.
    #[must_use]
    pub const fn glyph(self) -> char {
        match self {
            HiddenCellType::Agent => '@',
            HiddenCellType::Empty => ' ',
            HiddenCellType::Dirt => '.',
            HiddenCellType::Stone | HiddenCellType::StoneFalling => 'o',
            HiddenCellType::Diamond | HiddenCellType::DiamondFalling => '*',
            HiddenCellType::ExitClosed => 'C',
            HiddenCellType::ExitOpen => 'E',
            HiddenCellType::AgentInExit => '!',
            HiddenCellType::FireflyUp
            | HiddenCellType::FireflyLeft
            | HiddenCellType::FireflyDown
            | HiddenCellType::FireflyRight => 'f',
            HiddenCellType::ButterflyUp
            | HiddenCellType::ButterflyLeft
            | HiddenCellType::ButterflyDown
            | HiddenCellType::ButterflyRight => 'w',
            HiddenCellType::WallBrick => '#',
            HiddenCellType::WallSteel => '=',
            HiddenCellType::WallMagicDormant => 'm',
            HiddenCellType::WallMagicOn => 'M',
            HiddenCellType::WallMagicExpired => 'x',
            HiddenCellType::Blob => 'a',
            HiddenCellType::ExplosionDiamond => '%',
            HiddenCellType::ExplosionBoulder => '$',
            HiddenCellType::ExplosionEmpty => '~',
            HiddenCellType::GateRedClosed => 'R',
            HiddenCellType::GateRedOpen => 'r',
            HiddenCellType::KeyRed => '1',
            HiddenCellType::GateBlueClosed => 'B',
            HiddenCellType::GateBlueOpen => 'b',
            HiddenCellType::KeyBlue => '2',
            HiddenCellType::GateGreenClosed => 'G',
            HiddenCellType::GateGreenOpen => 'g',
            HiddenCellType::KeyGreen => '3',
            HiddenCellType::GateYellowClosed => 'Y',
            HiddenCellType::GateYellowOpen => 'y',
            HiddenCellType::KeyYellow => '4',
            HiddenCellType::Nut | HiddenCellType::NutFalling => 'n',
            HiddenCellType::Bomb | HiddenCellType::BombFalling => '8',
            HiddenCellType::OrangeUp
            | HiddenCellType::OrangeLeft
            | HiddenCellType::OrangeDown
            | HiddenCellType::OrangeRight => 'q',
            HiddenCellType::PebbleInDirt => ',',
            HiddenCellType::StoneInDirt => ';',
            HiddenCellType::VoidInDirt => '_',
        }
    }

    #[must_use]
    const fn is_butterfly(self) -> bool {
        matches!(
            self,
            HiddenCellType::ButterflyUp
                | HiddenCellType::ButterflyLeft
                | HiddenCellType::ButterflyDown
                | HiddenCellType::ButterflyRight
        )
    }

    #[must_use]
    const fn is_key(self) -> bool {
        matches!(
            self,
            HiddenCellType::KeyRed
                | HiddenCellType::KeyBlue
                | HiddenCellType::KeyGreen
                | HiddenCellType::KeyYellow
        )
    }

    #[must_use]
    const fn is_open_gate(self) -> bool {
        matches!(
            self,
            HiddenCellType::GateRedOpen
                | HiddenCellType::GateBlueOpen
                | HiddenCellType::GateGreenOpen
                | HiddenCellType::GateYellowOpen
        )
    }

    /// The falling variant of a gravity-affected kind; identity otherwise.
    #[must_use]
    pub const fn to_falling(self) -> HiddenCellType {
        match self {
            HiddenCellType::Stone => HiddenCellType::StoneFalling,
            HiddenCellType::Diamond => HiddenCellType::DiamondFalling,
            HiddenCellType::Nut => HiddenCellType::NutFalling,
            HiddenCellType::Bomb => HiddenCellType::BombFalling,
            other => other,
        }
    }

    /// Explosion product this kind leaves behind when it blows up. Diamond
    /// bearing entities (butterflies) leave diamond explosions; everything
    /// else defaults to the plain empty explosion.
    #[must_use]
    pub const fn explosion_product(self) -> HiddenCellType {
        match self {
            HiddenCellType::ButterflyUp
            | HiddenCellType::ButterflyLeft
            | HiddenCellType::ButterflyDown
            | HiddenCellType::ButterflyRight => HiddenCellType::ExplosionDiamond,
            _ => HiddenCellType::ExplosionEmpty,
        }
    }

    /// Final resolution of an explosion cell on the tick it updates.
    #[must_use]
    pub const fn explosion_resolution(self) -> HiddenCellType {
        match self {
            HiddenCellType::ExplosionDiamond => HiddenCellType::Diamond,
            HiddenCellType::ExplosionBoulder => HiddenCellType::Stone,
            HiddenCellType::ExplosionEmpty => HiddenCellType::Empty,
            other => other,
        }
    }

    /// Reward bit set when an explosion cell resolves.
    #[must_use]
    pub const fn explosion_reward(self) -> u64 {
        match self {
            HiddenCellType::ExplosionDiamond => reward::BUTTERFLY_TO_DIAMOND,
            _ => 0,
        }
    }

    /// What a falling object turns into while descending through an active
    /// magic wall. Keyed on the falling kinds that can reach a wall.
    #[must_use]
    pub const fn magic_conversion(self) -> HiddenCellType {
        match self {
            HiddenCellType::StoneFalling => HiddenCellType::DiamondFalling,
            HiddenCellType::DiamondFalling => HiddenCellType::StoneFalling,
            other => other,
        }
    }

    /// The closed gate a key unlocks; identity for non-keys.
    #[must_use]
    pub const fn key_gate(self) -> HiddenCellType {
        match self {
            HiddenCellType::KeyRed => HiddenCellType::GateRedClosed,
            HiddenCellType::KeyBlue => HiddenCellType::GateBlueClosed,
            HiddenCellType::KeyGreen => HiddenCellType::GateGreenClosed,
            HiddenCellType::KeyYellow => HiddenCellType::GateYellowClosed,
            other => other,
        }
    }

    /// Open variant of a closed gate; identity for everything else.
    #[must_use]
    pub const fn gate_opened(self) -> HiddenCellType {
        match self {
            HiddenCellType::GateRedClosed => HiddenCellType::GateRedOpen,
            HiddenCellType::GateBlueClosed => HiddenCellType::GateBlueOpen,
            HiddenCellType::GateGreenClosed => HiddenCellType::GateGreenOpen,
            HiddenCellType::GateYellowClosed => HiddenCellType::GateYellowOpen,
            other => other,
        }
    }

    /// Color-specific reward bit for collecting a key.
    #[must_use]
    pub const fn key_signal(self) -> u64 {
        match self {
            HiddenCellType::KeyRed => reward::COLLECT_KEY_RED,
            HiddenCellType::KeyBlue => reward::COLLECT_KEY_BLUE,
            HiddenCellType::KeyGreen => reward::COLLECT_KEY_GREEN,
            HiddenCellType::KeyYellow => reward::COLLECT_KEY_YELLOW,
            _ => 0,
        }
    }

    /// Color-specific reward bit for walking through an open gate.
    #[must_use]
    pub const fn gate_signal(self) -> u64 {
        match self {
            HiddenCellType::GateRedOpen => reward::WALK_THROUGH_GATE_RED,
            HiddenCellType::GateBlueOpen => reward::WALK_THROUGH_GATE_BLUE,
            HiddenCellType::GateGreenOpen => reward::WALK_THROUGH_GATE_GREEN,
            HiddenCellType::GateYellowOpen => reward::WALK_THROUGH_GATE_YELLOW,
            _ => 0,
        }
    }

    const fn firefly_facing(dir: Direction) -> HiddenCellType {
        match dir {
            Direction::Up => HiddenCellType::FireflyUp,
            Direction::Left => HiddenCellType::FireflyLeft,
            Direction::Down => HiddenCellType::FireflyDown,
            _ => HiddenCellType::FireflyRight,
        }
    }

    const fn butterfly_facing(dir: Direction) -> HiddenCellType {
        match dir {
            Direction::Up => HiddenCellType::ButterflyUp,
            Direction::Left => HiddenCellType::ButterflyLeft,
            Direction::Down => HiddenCellType::ButterflyDown,
            _ => HiddenCellType::ButterflyRight,
        }
    }

    const fn orange_facing(dir: Direction) -> HiddenCellType {
        match dir {
            Direction::Up => HiddenCellType::OrangeUp,
            Direction::Left => HiddenCellType::OrangeLeft,
            Direction::Down => HiddenCellType::OrangeDown,
            _ => HiddenCellType::OrangeRight,
        }
    }
}

/// Which rule set governs a falling stone landing on a butterfly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ButterflyExplosionVersion {
    /// The butterfly explodes like any other explodable element.
    #[default]
    Explode,
    /// The butterfly is crushed directly into a diamond.
    Convert,
}

/// Whether a blocked butterfly moves on the same tick it turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ButterflyMoveVersion {
    /// Turn this tick, move on a later tick.
    #[default]
    Delay,
    /// Turn and immediately step in the new direction.
    Instant,
}

/// Immutable game configuration supplied at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameParameters {
    /// Whether stones, diamonds, nuts, and bombs fall.
    pub gravity: bool,
    /// Tick budget a magic wall stays active for once triggered.
    pub magic_wall_steps: u32,
    /// Chance out of 256 for a blob cell to grow each tick.
    pub blob_chance: u8,
    /// Fraction of the board the blob may cover before turning to stone.
    pub blob_max_percentage: f32,
    /// Disable bomb detonation on landing.
    pub disable_explosions: bool,
    pub butterfly_explosion_ver: ButterflyExplosionVersion,
    pub butterfly_move_ver: ButterflyMoveVersion,
}

impl Default for GameParameters {
    fn default() -> Self {
        Self {
            gravity: false,
            magic_wall_steps: 140,
            blob_chance: 20,
            blob_max_percentage: 0.16,
            disable_explosions: false,
            butterfly_explosion_ver: ButterflyExplosionVersion::Explode,
            butterfly_move_ver: ButterflyMoveVersion::Delay,
        }
    }
}

impl GameParameters {
    fn validate(&self) -> Result<(), GameStateError> {
        if !self.blob_max_percentage.is_finite()
            || !(0.0..=1.0).contains(&self.blob_max_percentage)
        {
            return Err(GameStateError::InvalidParameters(
                "blob_max_percentage must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for GameParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "  gravity: {}", self.gravity)?;
        writeln!(f, "  magic_wall_steps: {}", self.magic_wall_steps)?;
        writeln!(f, "  blob_chance: {}", self.blob_chance)?;
        writeln!(f, "  blob_max_percentage: {}", self.blob_max_percentage)?;
        writeln!(f, "  disable_explosions: {}", self.disable_explosions)?;
        writeln!(f, "  butterfly_explosion_ver: {:?}", self.butterfly_explosion_ver)?;
        writeln!(f, "  butterfly_move_ver: {:?}", self.butterfly_move_ver)?;
        write!(f, "}}")
    }
}

/// Errors raised while constructing a [`GameState`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameStateError {
    /// A level token failed to parse as an integer.
    #[error("level token `{0}` is not an integer")]
    NonInteger(String),
    /// A cell code outside the hidden taxonomy.
    #[error("unknown cell code {0}")]
    UnknownCellCode(i64),
    /// The level string is missing its rows/cols/gems header.
    #[error("level header must contain rows, cols, and gems required")]
    MissingHeader,
    /// The cell list does not match the declared dimensions.
    #[error("expected {expected} tokens for a {rows}x{cols} board, found {found}")]
    TokenCount {
        rows: usize,
        cols: usize,
        expected: usize,
        found: usize,
    },
    /// A board must contain exactly one agent.
    #[error("board must contain exactly one agent, found {0}")]
    AgentCount(usize),
    /// A game parameter is outside its valid range.
    #[error("invalid parameters: {0}")]
    InvalidParameters(&'static str),
}

/// Errors raised by query operations fed out-of-range arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("position ({row}, {col}) is out of bounds for a {rows}x{cols} board")]
    Position {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("index {index} is out of bounds for a {rows}x{cols} board")]
    Index {
        index: usize,
        rows: usize,
        cols: usize,
    },
    #[error("action code {0} is outside the action space")]
    Action(u8),
}

/// The simulation state: a value type advanced one tick per
/// [`apply_action`](GameState::apply_action).
///
/// Cloning is an O(rows x cols) copy and clones evolve independently, so
/// search drivers may fan out clones across threads without synchronization.
/// Equality is structural over every field, and the serde representation is
/// the full round-trip form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    rows: usize,
    cols: usize,
    gems_required: u32,
    gems_collected: u32,
    magic_wall_steps: u32,
    magic_active: bool,
    blob_max_size: usize,
    blob_size: usize,
    blob_chance: u8,
    blob_enclosed: bool,
    blob_swap: Option<HiddenCellType>,
    gravity: bool,
    disable_explosions: bool,
    butterfly_explosion_ver: ButterflyExplosionVersion,
    butterfly_move_ver: ButterflyMoveVersion,
    random_state: u64,
    reward_signal: u64,
    hash: u64,
    agent_idx: usize,
    is_agent_alive: bool,
    is_agent_in_exit: bool,
    grid: Vec<HiddenCellType>,
    has_updated: Vec<bool>,
}

impl fmt::Debug for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameState")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("gems_collected", &self.gems_collected)
            .field("gems_required", &self.gems_required)
            .field("agent_idx", &self.agent_idx)
            .field("is_agent_alive", &self.is_agent_alive)
            .field("is_agent_in_exit", &self.is_agent_in_exit)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let border = "-".repeat(self.cols + 2);
        writeln!(f, "{border}")?;
        for row in 0..self.rows {
            write!(f, "|")?;
            for col in 0..self.cols {
                write!(f, "{}", self.grid[row * self.cols + col].glyph())?;
            }
            writeln!(f, "|")?;
        }
        write!(f, "{border}")
    }
}

impl std::hash::Hash for GameState {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl GameState {
    /// Build a state from a pipe-delimited level string and parameters.
    ///
    /// The grammar is `rows|cols|gems_required|c0|c1|...` with each cell code
    /// a hidden-kind ordinal; surrounding whitespace and leading zeros are
    /// tolerated. Exactly one agent cell must be present.
    pub fn new(level: &str, params: &GameParameters) -> Result<Self, GameStateError> {
        params.validate()?;

        let mut tokens: Vec<&str> = level.split('|').map(str::trim).collect();
        if tokens.last() == Some(&"") {
            tokens.pop();
        }
        if tokens.len() < 3 {
            return Err(GameStateError::MissingHeader);
        }
        let parse_usize = |token: &str| {
            token
                .parse::<usize>()
                .map_err(|_| GameStateError::NonInteger(token.to_string()))
        };
        let rows = parse_usize(tokens[0])?;
        let cols = parse_usize(tokens[1])?;
        let gems_required = u32::try_from(parse_usize(tokens[2])?)
            .map_err(|_| GameStateError::NonInteger(tokens[2].to_string()))?;

        let flat_size = rows * cols;
        if tokens.len() != flat_size + 3 {
            return Err(GameStateError::TokenCount {
                rows,
                cols,
                expected: flat_size + 3,
                found: tokens.len(),
            });
        }

        let mut grid = Vec::with_capacity(flat_size);
        let mut agent_idx = 0;
        let mut agent_count = 0usize;
        let mut is_agent_in_exit = false;
        for (i, token) in tokens[3..].iter().enumerate() {
            let code = token
                .parse::<i64>()
                .map_err(|_| GameStateError::NonInteger((*token).to_string()))?;
            let kind = HiddenCellType::from_code(code)
                .ok_or(GameStateError::UnknownCellCode(code))?;
            if matches!(kind, HiddenCellType::Agent | HiddenCellType::AgentInExit) {
                agent_idx = i;
                agent_count += 1;
                is_agent_in_exit = kind == HiddenCellType::AgentInExit;
            }
            grid.push(kind);
        }
        if agent_count != 1 {
            return Err(GameStateError::AgentCount(agent_count));
        }

        let mut hash = 0u64;
        for (i, &kind) in grid.iter().enumerate() {
            hash ^= cell_hash(flat_size, kind, i);
        }

        Ok(Self {
            rows,
            cols,
            gems_required,
            gems_collected: 0,
            magic_wall_steps: params.magic_wall_steps,
            magic_active: false,
            blob_max_size: (flat_size as f32 * params.blob_max_percentage) as usize,
            blob_size: 0,
            blob_chance: params.blob_chance,
            blob_enclosed: true,
            blob_swap: None,
            gravity: params.gravity,
            disable_explosions: params.disable_explosions,
            butterfly_explosion_ver: params.butterfly_explosion_ver,
            butterfly_move_ver: params.butterfly_move_ver,
            random_state: splitmix64(0),
            reward_signal: 0,
            hash,
            agent_idx,
            is_agent_alive: true,
            is_agent_in_exit,
            grid,
            has_updated: vec![false; flat_size],
        })
    }

    /// Build a state from a level string with default parameters.
    pub fn from_level(level: &str) -> Result<Self, GameStateError> {
        Self::new(level, &GameParameters::default())
    }

    /// Advance the world by one tick: the agent acts first, then every
    /// not-yet-updated active cell is stepped in row-major order.
    pub fn apply_action(&mut self, action: Action) {
        self.start_scan();

        self.update_agent(self.agent_idx, action.direction());

        for index in 0..self.flat_size() {
            if self.has_updated[index] {
                continue;
            }
            match self.grid[index] {
                HiddenCellType::Stone => self.update_stone(index),
                HiddenCellType::StoneFalling => self.update_stone_falling(index),
                HiddenCellType::Diamond => self.update_diamond(index),
                HiddenCellType::DiamondFalling => self.update_diamond_falling(index),
                HiddenCellType::Nut => self.update_nut(index),
                HiddenCellType::NutFalling => self.update_nut_falling(index),
                HiddenCellType::Bomb => self.update_bomb(index),
                HiddenCellType::BombFalling => self.update_bomb_falling(index),
                HiddenCellType::ExitClosed => self.update_exit(index),
                HiddenCellType::Blob => self.update_blob(index),
                HiddenCellType::FireflyUp => self.update_firefly(index, Direction::Up),
                HiddenCellType::FireflyLeft => self.update_firefly(index, Direction::Left),
                HiddenCellType::FireflyDown => self.update_firefly(index, Direction::Down),
                HiddenCellType::FireflyRight => self.update_firefly(index, Direction::Right),
                HiddenCellType::ButterflyUp => self.update_butterfly(index, Direction::Up),
                HiddenCellType::ButterflyLeft => self.update_butterfly(index, Direction::Left),
                HiddenCellType::ButterflyDown => self.update_butterfly(index, Direction::Down),
                HiddenCellType::ButterflyRight => self.update_butterfly(index, Direction::Right),
                HiddenCellType::OrangeUp => self.update_orange(index, Direction::Up),
                HiddenCellType::OrangeLeft => self.update_orange(index, Direction::Left),
                HiddenCellType::OrangeDown => self.update_orange(index, Direction::Down),
                HiddenCellType::OrangeRight => self.update_orange(index, Direction::Right),
                HiddenCellType::WallMagicDormant | HiddenCellType::WallMagicOn => {
                    self.update_magic_wall(index);
                }
                HiddenCellType::ExplosionDiamond
                | HiddenCellType::ExplosionBoulder
                | HiddenCellType::ExplosionEmpty => self.update_explosion(index),
                _ => {}
            }
        }

        self.end_scan();
    }

    /// True once the agent has died or reached the exit. Latches.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_agent_alive || self.is_agent_in_exit
    }

    /// True once the agent stands in the exit.
    #[must_use]
    pub fn is_solution(&self) -> bool {
        self.is_agent_in_exit
    }

    /// Bit-field of events from the most recent tick; cleared at tick start.
    #[must_use]
    pub fn reward_signal(&self) -> u64 {
        self.reward_signal
    }

    /// The incrementally maintained board hash. Equal grids share hashes
    /// regardless of mutation history.
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn gems_required(&self) -> u32 {
        self.gems_required
    }

    /// Diamonds collected so far; monotonically non-decreasing.
    #[must_use]
    pub fn gems_collected(&self) -> u32 {
        self.gems_collected
    }

    /// Flat index of the agent cell, or of the cell where the agent last
    /// stood before dying or exiting.
    #[must_use]
    pub fn agent_index(&self) -> usize {
        self.agent_idx
    }

    #[must_use]
    pub fn agent_alive(&self) -> bool {
        self.is_agent_alive
    }

    #[must_use]
    pub fn agent_in_exit(&self) -> bool {
        self.is_agent_in_exit
    }

    /// Observation tensor shape, channel-major.
    #[must_use]
    pub fn observation_shape(&self) -> (usize, usize, usize) {
        (NUM_VISIBLE_CELL_TYPES, self.rows, self.cols)
    }

    /// One-hot observation: channel `visible(grid[i])` is 1 at position `i`.
    #[must_use]
    pub fn observation(&self) -> Vec<f32> {
        let channel_len = self.flat_size();
        let mut obs = vec![0.0; NUM_VISIBLE_CELL_TYPES * channel_len];
        for (i, kind) in self.grid.iter().enumerate() {
            obs[kind.visible() as usize * channel_len + i] = 1.0;
        }
        obs
    }

    /// RGB image shape (height, width, channels).
    #[must_use]
    pub fn image_shape(&self) -> (usize, usize, usize) {
        (
            self.rows * SPRITE_HEIGHT,
            self.cols * SPRITE_WIDTH,
            SPRITE_CHANNELS,
        )
    }

    /// Flat HWC image built by blitting one sprite tile per cell.
    #[must_use]
    pub fn to_image(&self) -> Vec<u8> {
        let mut img = vec![0u8; self.flat_size() * SPRITE_DATA_LEN];
        for row in 0..self.rows {
            for col in 0..self.cols {
                let kind = self.grid[row * self.cols + col];
                let tile = &SPRITES[kind.visible() as usize];
                let top_left = row * SPRITE_DATA_LEN * self.cols + col * SPRITE_DATA_LEN_PER_ROW;
                for tile_row in 0..SPRITE_HEIGHT {
                    let src = tile_row * SPRITE_DATA_LEN_PER_ROW;
                    let dst = top_left + tile_row * SPRITE_DATA_LEN_PER_ROW * self.cols;
                    img[dst..dst + SPRITE_DATA_LEN_PER_ROW]
                        .copy_from_slice(&tile[src..src + SPRITE_DATA_LEN_PER_ROW]);
                }
            }
        }
        img
    }

    /// All `(row, col)` positions currently holding `kind`.
    #[must_use]
    pub fn positions(&self, kind: HiddenCellType) -> Vec<(usize, usize)> {
        self.grid
            .iter()
            .enumerate()
            .filter(|(_, &cell)| cell == kind)
            .map(|(i, _)| (i / self.cols, i % self.cols))
            .collect()
    }

    /// All flat indices currently holding `kind`.
    #[must_use]
    pub fn indices(&self, kind: HiddenCellType) -> Vec<usize> {
        self.grid
            .iter()
            .enumerate()
            .filter(|(_, &cell)| cell == kind)
            .map(|(i, _)| i)
            .collect()
    }

    /// The hidden kind at `index`.
    pub fn hidden_item(&self, index: usize) -> Result<HiddenCellType, ArgumentError> {
        self.grid.get(index).copied().ok_or(ArgumentError::Index {
            index,
            rows: self.rows,
            cols: self.cols,
        })
    }

    /// Convert `(row, col)` to a flat index.
    pub fn position_to_index(&self, position: (usize, usize)) -> Result<usize, ArgumentError> {
        let (row, col) = position;
        if row >= self.rows || col >= self.cols {
            return Err(ArgumentError::Position {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(row * self.cols + col)
    }

    /// Convert a flat index to `(row, col)`.
    pub fn index_to_position(&self, index: usize) -> Result<(usize, usize), ArgumentError> {
        if index >= self.flat_size() {
            return Err(ArgumentError::Index {
                index,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok((index / self.cols, index % self.cols))
    }

    // ----- grid primitives -----

    fn flat_size(&self) -> usize {
        self.grid.len()
    }

    // Unchecked neighbor arithmetic; pair with `in_bounds` before indexing.
    fn index_from(&self, index: usize, dir: Direction) -> usize {
        let (dc, dr) = dir.offset();
        (index as i64 + dr * self.cols as i64 + dc) as usize
    }

    fn in_bounds(&self, index: usize, dir: Direction) -> bool {
        let (dc, dr) = dir.offset();
        let col = (index % self.cols) as i64 + dc;
        let row = (index / self.cols) as i64 + dr;
        col >= 0 && col < self.cols as i64 && row >= 0 && row < self.rows as i64
    }

    fn is_type(&self, index: usize, kind: HiddenCellType, dir: Direction) -> bool {
        self.in_bounds(index, dir) && self.grid[self.index_from(index, dir)] == kind
    }

    fn has_property(&self, index: usize, mask: u8, dir: Direction) -> bool {
        self.in_bounds(index, dir)
            && self.grid[self.index_from(index, dir)].properties() & mask != 0
    }

    fn is_adjacent(&self, index: usize, kind: HiddenCellType) -> bool {
        self.is_type(index, kind, Direction::Up)
            || self.is_type(index, kind, Direction::Left)
            || self.is_type(index, kind, Direction::Down)
            || self.is_type(index, kind, Direction::Right)
    }

    // All grid mutations funnel through `write_cell` so the incremental hash
    // stays equal to the XOR of per-cell hashes.
    fn write_cell(&mut self, index: usize, kind: HiddenCellType) {
        let flat_size = self.grid.len();
        self.hash ^= cell_hash(flat_size, self.grid[index], index);
        self.grid[index] = kind;
        self.hash ^= cell_hash(flat_size, kind, index);
    }

    fn move_item(&mut self, index: usize, dir: Direction) {
        let target = self.index_from(index, dir);
        self.write_cell(target, self.grid[index]);
        self.write_cell(index, HiddenCellType::Empty);
        self.has_updated[target] = true;
    }

    fn set_item(&mut self, index: usize, kind: HiddenCellType, dir: Direction) {
        let target = self.index_from(index, dir);
        self.write_cell(target, kind);
        self.has_updated[target] = true;
    }

    fn item(&self, index: usize, dir: Direction) -> HiddenCellType {
        self.grid[self.index_from(index, dir)]
    }

    // ----- shared element mechanics -----

    fn can_roll_left(&self, index: usize) -> bool {
        self.has_property(index, PROP_ROUNDED, Direction::Down)
            && self.is_type(index, HiddenCellType::Empty, Direction::Left)
            && self.is_type(index, HiddenCellType::Empty, Direction::DownLeft)
    }

    fn can_roll_right(&self, index: usize) -> bool {
        self.has_property(index, PROP_ROUNDED, Direction::Down)
            && self.is_type(index, HiddenCellType::Empty, Direction::Right)
            && self.is_type(index, HiddenCellType::Empty, Direction::DownRight)
    }

    fn roll_left(&mut self, index: usize, kind: HiddenCellType) {
        self.set_item(index, kind, Direction::Noop);
        self.move_item(index, Direction::Left);
    }

    fn roll_right(&mut self, index: usize, kind: HiddenCellType) {
        self.set_item(index, kind, Direction::Noop);
        self.move_item(index, Direction::Right);
    }

    fn push(
        &mut self,
        index: usize,
        stationary: HiddenCellType,
        falling: HiddenCellType,
        dir: Direction,
    ) {
        let target = self.index_from(index, dir);
        // Room to push only when the far side of the pushed item is empty.
        if self.is_type(target, HiddenCellType::Empty, dir) {
            let beyond = self.index_from(target, dir);
            let lands_on_air = self.is_type(beyond, HiddenCellType::Empty, Direction::Down);
            self.move_item(target, dir);
            self.set_item(
                beyond,
                if lands_on_air { falling } else { stationary },
                Direction::Noop,
            );
            self.move_item(index, dir);
            self.agent_idx = self.index_from(index, dir);
        }
    }

    fn move_through_magic(&mut self, index: usize, converted: HiddenCellType) {
        if self.magic_wall_steps == 0 {
            return;
        }
        self.magic_active = true;
        let wall = self.index_from(index, Direction::Down);
        let under = self.index_from(wall, Direction::Down);
        // The item only passes when the cell under the wall is free;
        // otherwise it stays put above the wall.
        if self.is_type(under, HiddenCellType::Empty, Direction::Noop) {
            self.set_item(index, HiddenCellType::Empty, Direction::Noop);
            self.set_item(under, converted, Direction::Noop);
        }
    }

    /// Detonate the cell one step from `index` in `dir`, writing `product`
    /// there and cascading through explodable and consumable neighbors.
    ///
    /// The cascade is an explicit depth-first frame stack: every written cell
    /// loses its explodable/consumable properties, so each cell is written at
    /// most once and the work is bounded by the cell count.
    fn explode(&mut self, index: usize, product: HiddenCellType, dir: Direction) {
        let target = self.index_from(index, dir);
        let mut stack: Vec<(usize, HiddenCellType, usize)> = Vec::new();
        self.ignite(target, product, &mut stack);
        while let Some((center, ex, cursor)) = stack.pop() {
            if cursor >= NUM_DIRECTIONS {
                continue;
            }
            stack.push((center, ex, cursor + 1));
            let d = Direction::ALL[cursor];
            if d == Direction::Noop || !self.in_bounds(center, d) {
                continue;
            }
            if self.has_property(center, PROP_CAN_EXPLODE, d) {
                let next = self.index_from(center, d);
                self.ignite(next, ex, &mut stack);
            } else if self.has_property(center, PROP_CONSUMABLE, d) {
                if self.item(center, d) == HiddenCellType::Agent {
                    self.is_agent_alive = false;
                }
                self.set_item(center, ex, d);
            }
        }
    }

    fn ignite(
        &mut self,
        target: usize,
        product: HiddenCellType,
        stack: &mut Vec<(usize, HiddenCellType, usize)>,
    ) {
        let ex = self.grid[target].explosion_product();
        if self.grid[target] == HiddenCellType::Agent {
            self.is_agent_alive = false;
        }
        self.set_item(target, product, Direction::Noop);
        stack.push((target, ex, 0));
    }

    fn open_gate(&mut self, gate: HiddenCellType) {
        for index in 0..self.flat_size() {
            if self.grid[index] == gate {
                self.set_item(index, gate.gate_opened(), Direction::Noop);
            }
        }
    }

    // ----- element update rules -----

    fn update_stone(&mut self, index: usize) {
        if !self.gravity {
            return;
        }
        if self.is_type(index, HiddenCellType::Empty, Direction::Down) {
            self.set_item(index, HiddenCellType::StoneFalling, Direction::Noop);
            self.update_stone_falling(index);
        } else if self.can_roll_left(index) {
            self.roll_left(index, HiddenCellType::StoneFalling);
        } else if self.can_roll_right(index) {
            self.roll_right(index, HiddenCellType::StoneFalling);
        }
    }

    fn update_stone_falling(&mut self, index: usize) {
        if self.is_type(index, HiddenCellType::Empty, Direction::Down) {
            self.move_item(index, Direction::Down);
        } else if self.butterfly_explosion_ver == ButterflyExplosionVersion::Convert
            && self.in_bounds(index, Direction::Down)
            && self.item(index, Direction::Down).is_butterfly()
        {
            // Crush the butterfly straight into a diamond.
            self.set_item(index, HiddenCellType::Empty, Direction::Noop);
            self.set_item(index, HiddenCellType::Diamond, Direction::Down);
            self.reward_signal |= reward::BUTTERFLY_TO_DIAMOND;
        } else if self.has_property(index, PROP_CAN_EXPLODE, Direction::Down) {
            let below = self.item(index, Direction::Down);
            self.explode(index, below.explosion_product(), Direction::Down);
        } else if self.is_type(index, HiddenCellType::WallMagicOn, Direction::Down)
            || self.is_type(index, HiddenCellType::WallMagicDormant, Direction::Down)
        {
            self.move_through_magic(index, self.grid[index].magic_conversion());
        } else if self.is_type(index, HiddenCellType::Nut, Direction::Down) {
            // Crack the nut open to reveal a diamond.
            self.set_item(index, HiddenCellType::Empty, Direction::Noop);
            self.set_item(index, HiddenCellType::Diamond, Direction::Down);
            self.reward_signal |= reward::NUT_TO_DIAMOND;
        } else if self.is_type(index, HiddenCellType::Bomb, Direction::Down) {
            self.explode(index, self.grid[index].explosion_product(), Direction::Noop);
        } else if self.can_roll_left(index) {
            self.roll_left(index, HiddenCellType::StoneFalling);
        } else if self.can_roll_right(index) {
            self.roll_right(index, HiddenCellType::StoneFalling);
        } else {
            self.set_item(index, HiddenCellType::Stone, Direction::Noop);
        }
    }

    fn update_diamond(&mut self, index: usize) {
        if !self.gravity {
            return;
        }
        if self.is_type(index, HiddenCellType::Empty, Direction::Down) {
            self.set_item(index, HiddenCellType::DiamondFalling, Direction::Noop);
            self.update_diamond_falling(index);
        } else if self.can_roll_left(index) {
            self.roll_left(index, HiddenCellType::DiamondFalling);
        } else if self.can_roll_right(index) {
            self.roll_right(index, HiddenCellType::DiamondFalling);
        }
    }

    fn update_diamond_falling(&mut self, index: usize) {
        if self.is_type(index, HiddenCellType::Empty, Direction::Down) {
            self.move_item(index, Direction::Down);
        } else if self.has_property(index, PROP_CAN_EXPLODE, Direction::Down)
            && !self.is_type(index, HiddenCellType::Bomb, Direction::Down)
            && !self.is_type(index, HiddenCellType::BombFalling, Direction::Down)
        {
            // Diamonds detonate what they land on, except bombs.
            let below = self.item(index, Direction::Down);
            self.explode(index, below.explosion_product(), Direction::Down);
        } else if self.is_type(index, HiddenCellType::WallMagicOn, Direction::Down)
            || self.is_type(index, HiddenCellType::WallMagicDormant, Direction::Down)
        {
            self.move_through_magic(index, self.grid[index].magic_conversion());
        } else if self.can_roll_left(index) {
            self.roll_left(index, HiddenCellType::DiamondFalling);
        } else if self.can_roll_right(index) {
            self.roll_right(index, HiddenCellType::DiamondFalling);
        } else {
            self.set_item(index, HiddenCellType::Diamond, Direction::Noop);
        }
    }

    fn update_nut(&mut self, index: usize) {
        if !self.gravity {
            return;
        }
        if self.is_type(index, HiddenCellType::Empty, Direction::Down) {
            self.set_item(index, HiddenCellType::NutFalling, Direction::Noop);
            self.update_nut_falling(index);
        } else if self.can_roll_left(index) {
            self.roll_left(index, HiddenCellType::NutFalling);
        } else if self.can_roll_right(index) {
            self.roll_right(index, HiddenCellType::NutFalling);
        }
    }

    fn update_nut_falling(&mut self, index: usize) {
        if self.is_type(index, HiddenCellType::Empty, Direction::Down) {
            self.move_item(index, Direction::Down);
        } else if self.can_roll_left(index) {
            self.roll_left(index, HiddenCellType::NutFalling);
        } else if self.can_roll_right(index) {
            self.roll_right(index, HiddenCellType::NutFalling);
        } else {
            self.set_item(index, HiddenCellType::Nut, Direction::Noop);
        }
    }

    fn update_bomb(&mut self, index: usize) {
        if !self.gravity {
            return;
        }
        if self.is_type(index, HiddenCellType::Empty, Direction::Down) {
            self.set_item(index, HiddenCellType::BombFalling, Direction::Noop);
            self.update_bomb_falling(index);
        } else if self.can_roll_left(index) {
            // Rolling keeps the bomb disarmed; only a fall arms it.
            self.roll_left(index, HiddenCellType::Bomb);
        } else if self.can_roll_right(index) {
            self.roll_right(index, HiddenCellType::Bomb);
        }
    }

    fn update_bomb_falling(&mut self, index: usize) {
        if self.is_type(index, HiddenCellType::Empty, Direction::Down) {
            self.move_item(index, Direction::Down);
        } else if self.can_roll_left(index) {
            self.roll_left(index, HiddenCellType::BombFalling);
        } else if self.can_roll_right(index) {
            self.roll_right(index, HiddenCellType::BombFalling);
        } else if !self.disable_explosions {
            self.explode(index, self.grid[index].explosion_product(), Direction::Noop);
        }
    }

    fn update_exit(&mut self, index: usize) {
        if self.gems_collected >= self.gems_required {
            self.set_item(index, HiddenCellType::ExitOpen, Direction::Noop);
        }
    }

    fn update_agent(&mut self, index: usize, dir: Direction) {
        if !self.in_bounds(index, dir) {
            return;
        }
        let target = self.index_from(index, dir);
        let kind = self.grid[target];
        if matches!(kind, HiddenCellType::Empty | HiddenCellType::Dirt) {
            self.move_item(index, dir);
            self.agent_idx = target;
        } else if matches!(
            kind,
            HiddenCellType::Diamond | HiddenCellType::DiamondFalling
        ) {
            self.gems_collected += 1;
            self.reward_signal |= reward::COLLECT_DIAMOND;
            self.move_item(index, dir);
            self.agent_idx = target;
        } else if dir.is_horizontal() && kind.properties() & PROP_PUSHABLE != 0 {
            self.push(index, kind, kind.to_falling(), dir);
        } else if kind.is_key() {
            self.open_gate(kind.key_gate());
            self.move_item(index, dir);
            self.agent_idx = target;
            self.reward_signal |= reward::COLLECT_KEY | kind.key_signal();
        } else if kind.is_open_gate() {
            // Passing through a gate is a two-cell hop onto whatever sits on
            // the far side, which must itself be walkable.
            if self.has_property(target, PROP_TRAVERSABLE, dir) {
                let beyond = self.index_from(target, dir);
                let far = self.grid[beyond];
                if matches!(
                    far,
                    HiddenCellType::Diamond | HiddenCellType::DiamondFalling
                ) {
                    self.gems_collected += 1;
                    self.reward_signal |= reward::COLLECT_DIAMOND;
                } else if far.is_key() {
                    self.open_gate(far.key_gate());
                    self.reward_signal |= reward::COLLECT_KEY | far.key_signal();
                }
                self.set_item(target, HiddenCellType::Agent, dir);
                self.set_item(index, HiddenCellType::Empty, Direction::Noop);
                self.agent_idx = beyond;
                self.reward_signal |= reward::WALK_THROUGH_GATE | kind.gate_signal();
            }
        } else if kind == HiddenCellType::ExitOpen {
            self.move_item(index, dir);
            self.set_item(index, HiddenCellType::AgentInExit, dir);
            self.agent_idx = target;
            self.is_agent_in_exit = true;
            self.reward_signal |= reward::WALK_THROUGH_EXIT;
        }
    }

    fn update_firefly(&mut self, index: usize, dir: Direction) {
        let new_dir = dir.rotate_left();
        if self.is_adjacent(index, HiddenCellType::Agent)
            || self.is_adjacent(index, HiddenCellType::Blob)
        {
            self.explode(index, self.grid[index].explosion_product(), Direction::Noop);
        } else if self.is_type(index, HiddenCellType::Empty, new_dir) {
            // Fireflies hug the left wall, falling back to straight ahead.
            self.set_item(index, HiddenCellType::firefly_facing(new_dir), Direction::Noop);
            self.move_item(index, new_dir);
        } else if self.is_type(index, HiddenCellType::Empty, dir) {
            self.set_item(index, HiddenCellType::firefly_facing(dir), Direction::Noop);
            self.move_item(index, dir);
        } else {
            self.set_item(
                index,
                HiddenCellType::firefly_facing(dir.rotate_right()),
                Direction::Noop,
            );
        }
    }

    fn update_butterfly(&mut self, index: usize, dir: Direction) {
        let new_dir = dir.rotate_right();
        if self.is_adjacent(index, HiddenCellType::Agent)
            || self.is_adjacent(index, HiddenCellType::Blob)
        {
            self.explode(index, self.grid[index].explosion_product(), Direction::Noop);
        } else if self.is_type(index, HiddenCellType::Empty, new_dir) {
            // Butterflies mirror fireflies and hug the right wall.
            self.set_item(index, HiddenCellType::butterfly_facing(new_dir), Direction::Noop);
            self.move_item(index, new_dir);
        } else if self.is_type(index, HiddenCellType::Empty, dir) {
            self.set_item(index, HiddenCellType::butterfly_facing(dir), Direction::Noop);
            self.move_item(index, dir);
        } else {
            let turned = dir.rotate_left();
            self.set_item(index, HiddenCellType::butterfly_facing(turned), Direction::Noop);
            if self.butterfly_move_ver == ButterflyMoveVersion::Instant
                && self.in_bounds(index, turned)
            {
                self.move_item(index, turned);
            }
        }
    }

    fn update_orange(&mut self, index: usize, dir: Direction) {
        if self.is_type(index, HiddenCellType::Empty, dir) {
            self.move_item(index, dir);
        } else if self.is_adjacent(index, HiddenCellType::Agent) {
            self.explode(index, self.grid[index].explosion_product(), Direction::Noop);
        } else {
            let open_dirs: Vec<Direction> = Direction::CARDINALS
                .into_iter()
                .filter(|&d| self.is_type(index, HiddenCellType::Empty, d))
                .collect();
            // Only reroute (and only advance the RNG) when a way out exists.
            if !open_dirs.is_empty() {
                let roll = xorshift64(&mut self.random_state) % open_dirs.len() as u64;
                let new_dir = open_dirs[roll as usize];
                self.set_item(index, HiddenCellType::orange_facing(new_dir), Direction::Noop);
            }
        }
    }

    fn update_magic_wall(&mut self, index: usize) {
        if self.magic_active {
            self.set_item(index, HiddenCellType::WallMagicOn, Direction::Noop);
        } else if self.magic_wall_steps > 0 {
            self.set_item(index, HiddenCellType::WallMagicDormant, Direction::Noop);
        } else {
            self.set_item(index, HiddenCellType::WallMagicExpired, Direction::Noop);
        }
    }

    fn update_blob(&mut self, index: usize) {
        if let Some(swap) = self.blob_swap {
            self.set_item(index, swap, Direction::Noop);
            return;
        }
        self.blob_size += 1;
        if self.is_adjacent(index, HiddenCellType::Empty)
            || self.is_adjacent(index, HiddenCellType::Dirt)
        {
            self.blob_enclosed = false;
        }
        let will_grow = xorshift64(&mut self.random_state) % 256 < u64::from(self.blob_chance);
        let grow_dir = Direction::CARDINALS[(xorshift64(&mut self.random_state) % 4) as usize];
        if will_grow
            && (self.is_type(index, HiddenCellType::Empty, grow_dir)
                || self.is_type(index, HiddenCellType::Dirt, grow_dir))
        {
            self.set_item(index, HiddenCellType::Blob, grow_dir);
        }
    }

    fn update_explosion(&mut self, index: usize) {
        let kind = self.grid[index];
        self.reward_signal |= kind.explosion_reward();
        self.set_item(index, kind.explosion_resolution(), Direction::Noop);
    }

    // ----- tick bookkeeping -----

    fn start_scan(&mut self) {
        self.blob_size = 0;
        self.blob_enclosed = true;
        self.reward_signal = 0;
        self.has_updated.fill(false);
    }

    fn end_scan(&mut self) {
        if self.blob_swap.is_none() {
            if self.blob_enclosed {
                self.blob_swap = Some(HiddenCellType::Diamond);
            }
            if self.blob_size > self.blob_max_size {
                self.blob_swap = Some(HiddenCellType::Stone);
            }
        }
        if self.magic_active {
            self.magic_wall_steps = self.magic_wall_steps.saturating_sub(1);
        }
        self.magic_active = self.magic_active && self.magic_wall_steps > 0;
    }
}

// ----- sprite tiles -----

const fn sprite_tile(rgb: [u8; 3]) -> [u8; SPRITE_DATA_LEN] {
    let mut data = [0u8; SPRITE_DATA_LEN];
    let mut i = 0;
    while i < SPRITE_WIDTH * SPRITE_HEIGHT {
        let row = i / SPRITE_WIDTH;
        let col = i % SPRITE_WIDTH;
        let edge = row == 0 || col == 0 || row == SPRITE_HEIGHT - 1 || col == SPRITE_WIDTH - 1;
        let px = i * SPRITE_CHANNELS;
        let mut c = 0;
        while c < SPRITE_CHANNELS {
            data[px + c] = if edge { rgb[c] >> 1 } else { rgb[c] };
            c += 1;
        }
        i += 1;
    }
    data
}

/// One 32x32 RGB tile per visible kind, indexed by channel ordinal.
static SPRITES: [[u8; SPRITE_DATA_LEN]; NUM_VISIBLE_CELL_TYPES] = [
    sprite_tile([224, 80, 64]),   // Agent
    sprite_tile([0, 0, 0]),       // Empty
    sprite_tile([120, 84, 48]),   // Dirt
    sprite_tile([142, 142, 142]), // Stone
    sprite_tile([96, 208, 248]),  // Diamond
    sprite_tile([64, 48, 24]),    // ExitClosed
    sprite_tile([224, 192, 64]),  // ExitOpen
    sprite_tile([255, 255, 255]), // AgentInExit
    sprite_tile([248, 120, 32]),  // Firefly
    sprite_tile([200, 72, 216]),  // Butterfly
    sprite_tile([160, 64, 48]),   // WallBrick
    sprite_tile([96, 112, 128]),  // WallSteel
    sprite_tile([88, 72, 136]),   // WallMagicOff
    sprite_tile([144, 120, 240]), // WallMagicOn
    sprite_tile([72, 168, 72]),   // Blob
    sprite_tile([248, 216, 120]), // Explosion
    sprite_tile([136, 24, 24]),   // GateRedClosed
    sprite_tile([216, 88, 88]),   // GateRedOpen
    sprite_tile([248, 56, 56]),   // KeyRed
    sprite_tile([24, 40, 136]),   // GateBlueClosed
    sprite_tile([88, 112, 216]),  // GateBlueOpen
    sprite_tile([56, 96, 248]),   // KeyBlue
    sprite_tile([24, 112, 40]),   // GateGreenClosed
    sprite_tile([88, 192, 112]),  // GateGreenOpen
    sprite_tile([56, 224, 96]),   // KeyGreen
    sprite_tile([136, 120, 24]),  // GateYellowClosed
    sprite_tile([216, 192, 88]),  // GateYellowOpen
    sprite_tile([248, 216, 56]),  // KeyYellow
    sprite_tile([168, 124, 56]),  // Nut
    sprite_tile([40, 40, 48]),    // Bomb
    sprite_tile([240, 144, 32]),  // Orange
    sprite_tile([136, 104, 72]),  // PebbleInDirt
    sprite_tile([104, 96, 88]),   // StoneInDirt
    sprite_tile([56, 40, 32]),    // VoidInDirt
];
