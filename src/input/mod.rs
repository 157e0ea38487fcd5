//! Keymap + input event engine: binding table plus the running-
//! event executor that walks program events, expands typematic/autofire
//! macros, and resolves keycombo remaps.

pub mod engine;
pub mod keymap;

pub use engine::{DispatchFn, GuestEvent, InputEngine};
pub use keymap::{
    parse_keymap_str, Axis, AxisMode, BindingMode, Cmd, InputEvent, InputPrimary, JoyPad,
    KeyBinding, Keymap, KeymapParseError, ModMask, ProgramEvent, ReleaseTarget, WaitDuration,
};
