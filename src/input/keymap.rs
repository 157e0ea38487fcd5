//! Keymap: the binding table and the line-oriented keymap file grammar.

use std::collections::HashMap;
use std::fmt;

/// Host modifier bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModMask(pub u16);

impl ModMask {
    pub const NONE: ModMask = ModMask(0);
    pub const SHIFT: ModMask = ModMask(1 << 0);
    pub const CTRL: ModMask = ModMask(1 << 1);
    pub const ALT: ModMask = ModMask(1 << 2);
    pub const GUI: ModMask = ModMask(1 << 3);

    pub fn union(self, other: ModMask) -> ModMask {
        ModMask(self.0 | other.0)
    }

    pub fn contains(self, other: ModMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Component modifiers set in this mask, each as its own single-bit mask.
    pub fn bits(self) -> Vec<ModMask> {
        [ModMask::SHIFT, ModMask::CTRL, ModMask::ALT, ModMask::GUI]
            .into_iter()
            .filter(|b| self.contains(*b))
            .collect()
    }

    fn from_token(name: &str) -> Option<ModMask> {
        match name {
            "KMOD_SHIFT" | "KMOD_LSHIFT" | "KMOD_RSHIFT" => Some(ModMask::SHIFT),
            "KMOD_CTRL" | "KMOD_LCTRL" | "KMOD_RCTRL" => Some(ModMask::CTRL),
            "KMOD_ALT" | "KMOD_LALT" | "KMOD_RALT" => Some(ModMask::ALT),
            "KMOD_GUI" | "KMOD_LGUI" | "KMOD_RGUI" => Some(ModMask::GUI),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

/// The "primary" (non-modifier) half of a host input event. Keyboard
/// bindings carry two parallel forms — `Scancode` and `Keycode` — so the
/// engine can look a press up by either.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputPrimary {
    Scancode(String),
    Keycode(String),
    MouseButton(u8),
    MouseAxis(Axis),
    JoyButton(u8, u8),
    JoyAxis(u8, u8),
}

/// One host input event: a primary plus whatever modifiers were held.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputEvent {
    pub primary: InputPrimary,
    pub mods: ModMask,
}

impl InputEvent {
    pub fn new(primary: InputPrimary, mods: ModMask) -> Self {
        InputEvent { primary, mods }
    }

    pub fn without_mods(&self) -> InputEvent {
        InputEvent { primary: self.primary.clone(), mods: ModMask::NONE }
    }

    /// A binding is a bare modifier-only binding when its own primary is
    /// itself the name of a modifier (e.g. `KMOD_LCTRL` bound alone) rather
    /// than a modifier layered atop some other key.
    pub fn is_modifier_only(&self) -> bool {
        self.modifier_bit().is_some()
    }

    /// The single modifier bit this binding's own primary names, if its
    /// primary is itself a `KMOD_*` token (see `is_modifier_only`).
    pub fn modifier_bit(&self) -> Option<ModMask> {
        match &self.primary {
            InputPrimary::Scancode(n) | InputPrimary::Keycode(n) => ModMask::from_token(n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    Default,
    OneShot,
    Latched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoyPad {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisMode {
    Absolute,
    Relative,
}

/// `Cmd(name, params)` variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    Wait(WaitDuration),
    Release(ReleaseTarget),
    SkipTo(usize),
    /// Parsed but always expanded away into the Wait/Release/SkipTo macro
    /// before a binding is installed; kept as a variant
    /// only so the parser has somewhere to put it before expansion runs.
    Autofire(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitDuration {
    Ms(u32),
    TypematicDelay,
    TypematicRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseTarget {
    Index(usize),
    All,
}

/// Program event variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramEvent {
    Key(String),
    MouseAxis { axis: Axis, px_per_10ms: i32, mode: AxisMode, accel: f32 },
    MouseButton(u8),
    JoyAxis { pad: JoyPad, axis: Axis, max: i32, mode: AxisMode, speed: f32 },
    JoyButton { pad: JoyPad, button: u8 },
    Func { name: String, params: Vec<String> },
    Cmd(Cmd),
}

impl ProgramEvent {
    /// Press-type events have a meaningful "release" on the guest side;
    /// `Func`/`Cmd` never suspend and are never released.
    pub fn is_releasable(&self) -> bool {
        matches!(
            self,
            ProgramEvent::Key(_)
                | ProgramEvent::MouseButton(_)
                | ProgramEvent::JoyButton { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub input: InputEvent,
    pub program: Vec<ProgramEvent>,
    pub mode: BindingMode,
    pub group: Option<String>,
    /// Typematic expansion has already been folded into `program` when
    /// this is set — the field is kept for diagnostics.
    pub typematic: bool,
}

impl KeyBinding {
    /// A binding "is a single modified-key" when its un-expanded payload is
    /// exactly one `Key` program event under `Default` mode — the shape the typematic macro applies to.
    fn is_single_key_default(input: &InputEvent, program: &[ProgramEvent], mode: BindingMode) -> Option<String> {
        if mode != BindingMode::Default || input.is_modifier_only() {
            return None;
        }
        if let [ProgramEvent::Key(k)] = program {
            Some(k.clone())
        } else {
            None
        }
    }

    /// Builds a binding, applying the typematic and autofire macro
    /// expansions at parse time.
    pub fn new(input: InputEvent, program: Vec<ProgramEvent>, mode: BindingMode, group: Option<String>) -> Self {
        if let Some(key) = Self::is_single_key_default(&input, &program, mode) {
            // Wait(tm_delay); <key>; Wait(tm_rate); SkipTo(key) — "key" here
            // is the second press, at index 2 of the expanded list.
            let expanded = vec![
                ProgramEvent::Key(key.clone()),
                ProgramEvent::Cmd(Cmd::Wait(WaitDuration::TypematicDelay)),
                ProgramEvent::Key(key),
                ProgramEvent::Cmd(Cmd::Wait(WaitDuration::TypematicRate)),
                ProgramEvent::Cmd(Cmd::SkipTo(2)),
            ];
            return KeyBinding { input, program: expanded, mode, group, typematic: true };
        }

        let program = expand_autofire(program);
        KeyBinding { input, program, mode, group, typematic: false }
    }
}

/// `AUTOFIRE(ms)` → `Wait(t/2); Release; Wait(t/2); SkipTo(start)`, applied
/// at parse time. The press event immediately preceding
/// the `Autofire` command is what gets released and re-fired.
fn expand_autofire(program: Vec<ProgramEvent>) -> Vec<ProgramEvent> {
    let Some(autofire_idx) = program.iter().position(|e| matches!(e, ProgramEvent::Cmd(Cmd::Autofire(_)))) else {
        return program;
    };
    let ProgramEvent::Cmd(Cmd::Autofire(ms)) = program[autofire_idx] else { unreachable!() };
    let half = ms / 2;

    let press_idx = program[..autofire_idx]
        .iter()
        .rposition(|e| e.is_releasable())
        .unwrap_or(0);

    let mut out: Vec<ProgramEvent> = program[..autofire_idx].to_vec();
    out.push(ProgramEvent::Cmd(Cmd::Wait(WaitDuration::Ms(half))));
    out.push(ProgramEvent::Cmd(Cmd::Release(ReleaseTarget::Index(press_idx))));
    out.push(ProgramEvent::Cmd(Cmd::Wait(WaitDuration::Ms(half))));
    out.push(ProgramEvent::Cmd(Cmd::SkipTo(press_idx)));
    out
}

#[derive(Debug, Default)]
pub struct Keymap {
    scancode: HashMap<(String, ModMask), KeyBinding>,
    keycode: HashMap<(String, ModMask), KeyBinding>,
    other: HashMap<InputPrimary, KeyBinding>,
}

impl Keymap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, binding: KeyBinding) {
        match &binding.input.primary {
            InputPrimary::Scancode(name) => {
                self.scancode.insert((name.clone(), binding.input.mods), binding);
            }
            InputPrimary::Keycode(name) => {
                self.keycode.insert((name.clone(), binding.input.mods), binding);
            }
            other => {
                self.other.insert(other.clone(), binding);
            }
        }
    }

    /// All bindings whose `input.is_modifier_only()` is true and whose
    /// modifiers form a subset of `mods` — used by the keycombo remap to
    /// find modifier-only bindings a combo might need to link.
    pub fn modifier_only_bindings(&self) -> impl Iterator<Item = &KeyBinding> {
        self.scancode
            .values()
            .chain(self.keycode.values())
            .filter(|b| b.input.is_modifier_only())
    }

    /// Scancode first, keycode fallback, each tried with the full modifier
    /// mask and then with no modifiers.
    pub fn lookup(&self, scancode_ev: Option<&InputEvent>, keycode_ev: Option<&InputEvent>) -> Option<&KeyBinding> {
        if let Some(ev) = scancode_ev {
            if let InputPrimary::Scancode(name) = &ev.primary {
                if let Some(b) = self.scancode.get(&(name.clone(), ev.mods)) {
                    return Some(b);
                }
                if !ev.mods.is_empty() {
                    if let Some(b) = self.scancode.get(&(name.clone(), ModMask::NONE)) {
                        return Some(b);
                    }
                }
            } else if let Some(b) = self.other.get(&ev.primary) {
                return Some(b);
            }
        }
        if let Some(ev) = keycode_ev {
            if let InputPrimary::Keycode(name) = &ev.primary {
                if let Some(b) = self.keycode.get(&(name.clone(), ev.mods)) {
                    return Some(b);
                }
                if !ev.mods.is_empty() {
                    if let Some(b) = self.keycode.get(&(name.clone(), ModMask::NONE)) {
                        return Some(b);
                    }
                }
            }
        }
        None
    }
}

#[derive(Debug)]
pub struct KeymapParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for KeymapParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keymap line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for KeymapParseError {}

/// Parses the line-oriented `INPUT = OUTPUT [; opts]` grammar. Blank lines and lines starting with `#` are comments.
pub fn parse_keymap_str(text: &str) -> Result<Keymap, KeymapParseError> {
    let mut keymap = Keymap::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let binding = parse_binding_line(line).map_err(|message| KeymapParseError { line: line_no, message })?;
        keymap.bind(binding);
    }
    Ok(keymap)
}

fn parse_binding_line(line: &str) -> Result<KeyBinding, String> {
    let mut parts = line.splitn(2, '=');
    let lhs = parts.next().ok_or("missing '='")?.trim();
    let rhs = parts.next().ok_or("missing '=' right-hand side")?.trim();

    let (input, _) = parse_input(lhs)?;

    let mut segments = rhs.split(';');
    let output_str = segments.next().ok_or("missing OUTPUT")?.trim();
    let mut mode = BindingMode::Default;
    let mut group = None;
    for opt in segments {
        let opt = opt.trim();
        if let Some(rest) = opt.strip_prefix("MODE:") {
            mode = match rest.trim() {
                "DEFAULT" => BindingMode::Default,
                "1SHOT" => BindingMode::OneShot,
                "LATCHED" => BindingMode::Latched,
                other => return Err(format!("unknown MODE '{other}'")),
            };
        } else if let Some(rest) = opt.strip_prefix("GROUP:") {
            group = Some(rest.trim().to_string());
        } else if !opt.is_empty() {
            return Err(format!("unknown option '{opt}'"));
        }
    }

    let program = output_str
        .split('+')
        .map(|tok| parse_output_token(tok.trim()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(KeyBinding::new(input, program, mode, group))
}

fn parse_input(lhs: &str) -> Result<(InputEvent, ModMask), String> {
    let mut mods = ModMask::NONE;
    let mut primary: Option<InputPrimary> = None;
    for tok in lhs.split('+') {
        let tok = tok.trim();
        if let Some(m) = ModMask::from_token(tok) {
            mods = mods.union(m);
            continue;
        }
        if primary.is_some() {
            return Err(format!("multiple non-modifier INPUT tokens in '{lhs}'"));
        }
        primary = Some(parse_input_primary(tok)?);
    }
    let primary = match primary {
        Some(p) => p,
        // A bare modifier binding (e.g. `KMOD_LCTRL = ...`): the modifier
        // itself is the primary, with no modifiers layered on top of it.
        None if !mods.is_empty() => {
            let name = lhs.split('+').next().unwrap_or(lhs).trim().to_string();
            mods = ModMask::NONE;
            InputPrimary::Keycode(name)
        }
        None => return Err(format!("no INPUT tokens in '{lhs}'")),
    };
    let ev = InputEvent::new(primary, mods);
    Ok((ev, mods))
}

fn parse_input_primary(tok: &str) -> Result<InputPrimary, String> {
    if let Some(rest) = tok.strip_prefix("SC_") {
        return Ok(InputPrimary::Scancode(rest.to_string()));
    }
    if let Some(n) = tok.strip_prefix("MOUSE_BUTTON_") {
        return Ok(InputPrimary::MouseButton(n.parse().map_err(|_| format!("bad mouse button '{tok}'"))?));
    }
    if tok == "MOUSE_AXIS_X" {
        return Ok(InputPrimary::MouseAxis(Axis::X));
    }
    if tok == "MOUSE_AXIS_Y" {
        return Ok(InputPrimary::MouseAxis(Axis::Y));
    }
    if let Some(rest) = tok.strip_prefix("JOY_") {
        let (joy_str, rest) = rest.split_once('_').ok_or_else(|| format!("bad joystick token '{tok}'"))?;
        let joy: u8 = joy_str.parse().map_err(|_| format!("bad joystick index in '{tok}'"))?;
        if let Some(n) = rest.strip_prefix("BUTTON_") {
            return Ok(InputPrimary::JoyButton(joy, n.parse().map_err(|_| format!("bad joy button '{tok}'"))?));
        }
        if let Some(n) = rest.strip_prefix("AXIS_") {
            return Ok(InputPrimary::JoyAxis(joy, n.parse().map_err(|_| format!("bad joy axis '{tok}'"))?));
        }
        return Err(format!("bad joystick token '{tok}'"));
    }
    // Anything else is a keycode name as-is (e.g. "A", "SPACE", "RETURN").
    Ok(InputPrimary::Keycode(tok.to_string()))
}

fn call_parts(tok: &str) -> (&str, Vec<&str>) {
    match tok.find('(') {
        Some(open) if tok.ends_with(')') => {
            let name = &tok[..open];
            let inner = &tok[open + 1..tok.len() - 1];
            let args = if inner.trim().is_empty() {
                Vec::new()
            } else {
                inner.split(',').map(|a| a.trim()).collect()
            };
            (name, args)
        }
        _ => (tok, Vec::new()),
    }
}

fn parse_output_token(tok: &str) -> Result<ProgramEvent, String> {
    let (name, args) = call_parts(tok);

    if name.starts_with("KEY_") {
        return Ok(ProgramEvent::Key(name.to_string()));
    }
    if name.starts_with("FUNC_") {
        return Ok(ProgramEvent::Func { name: name.to_string(), params: args.into_iter().map(String::from).collect() });
    }
    if name == "WAIT" {
        let arg = args.first().ok_or("WAIT() needs one argument")?;
        let dur = match *arg {
            "TMD" => WaitDuration::TypematicDelay,
            "TMR" => WaitDuration::TypematicRate,
            ms => WaitDuration::Ms(ms.parse().map_err(|_| format!("bad WAIT() argument '{ms}'"))?),
        };
        return Ok(ProgramEvent::Cmd(Cmd::Wait(dur)));
    }
    if name == "RELEASE" {
        let arg = args.first().ok_or("RELEASE() needs one argument")?;
        let target = if *arg == "ALL" { ReleaseTarget::All } else { ReleaseTarget::Index(arg.parse().map_err(|_| format!("bad RELEASE() argument '{arg}'"))?) };
        return Ok(ProgramEvent::Cmd(Cmd::Release(target)));
    }
    if name == "SKIP_TO" {
        let arg = args.first().ok_or("SKIP_TO() needs one argument")?;
        return Ok(ProgramEvent::Cmd(Cmd::SkipTo(arg.parse().map_err(|_| format!("bad SKIP_TO() argument '{arg}'"))?)));
    }
    if name == "AUTOFIRE" {
        let arg = args.first().ok_or("AUTOFIRE() needs one argument")?;
        return Ok(ProgramEvent::Cmd(Cmd::Autofire(arg.parse().map_err(|_| format!("bad AUTOFIRE() argument '{arg}'"))?)));
    }
    if name.starts_with("JOY_A_") || name.starts_with("JOY_B_") {
        let pad = if name.starts_with("JOY_A_") { JoyPad::A } else { JoyPad::B };
        let rest = &name[6..];
        if let Some(n) = rest.strip_prefix("BUTTON_") {
            let _ = n;
            return Ok(ProgramEvent::JoyButton { pad, button: rest[7..].parse().map_err(|_| format!("bad joy button '{tok}'"))? });
        }
        if rest.starts_with("AXIS_X") || rest.starts_with("AXIS_Y") {
            let axis = if rest.starts_with("AXIS_X") { Axis::X } else { Axis::Y };
            let (max, mode, speed) = parse_axis_args(&args)?;
            return Ok(ProgramEvent::JoyAxis { pad, axis, max, mode, speed });
        }
        return Err(format!("bad joy output token '{tok}'"));
    }
    if name.starts_with("MOUSE_BUTTON_") {
        let n: u8 = name[13..].parse().map_err(|_| format!("bad mouse button output '{tok}'"))?;
        return Ok(ProgramEvent::MouseButton(n));
    }
    if name == "MOUSE_AXIS_X" || name == "MOUSE_AXIS_Y" {
        let axis = if name == "MOUSE_AXIS_X" { Axis::X } else { Axis::Y };
        let (px, mode, accel) = parse_axis_args(&args)?;
        return Ok(ProgramEvent::MouseAxis { axis, px_per_10ms: px, mode, accel: accel as f32 });
    }
    Err(format!("unrecognized OUTPUT token '{tok}'"))
}

fn parse_axis_args(args: &[&str]) -> Result<(i32, AxisMode, f32), String> {
    let get = |i: usize, default: &str| -> &str { args.get(i).copied().unwrap_or(default) };
    let magnitude: i32 = get(0, "0").parse().map_err(|_| "bad axis magnitude".to_string())?;
    let mode = match get(1, "ABSOLUTE") {
        "ABSOLUTE" => AxisMode::Absolute,
        "RELATIVE" => AxisMode::Relative,
        other => return Err(format!("unknown axis mode '{other}'")),
    };
    let rate: f32 = get(2, "1.0").parse().map_err(|_| "bad axis rate/speed".to_string())?;
    Ok((magnitude, mode, rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_key_binding() {
        let keymap = parse_keymap_str("A = KEY_A; MODE:DEFAULT").unwrap();
        let ev = InputEvent::new(InputPrimary::Keycode("A".into()), ModMask::NONE);
        let b = keymap.lookup(None, Some(&ev)).unwrap();
        // Typematic expansion kicks in for a bare Default single-key binding.
        assert_eq!(b.program.len(), 5);
        assert_eq!(b.program[0], ProgramEvent::Key("KEY_A".into()));
    }

    #[test]
    fn scancode_is_tried_before_keycode_fallback() {
        let mut keymap = Keymap::new();
        keymap.bind(KeyBinding::new(
            InputEvent::new(InputPrimary::Scancode("30".into()), ModMask::NONE),
            vec![ProgramEvent::Func { name: "FUNC_SC".into(), params: vec![] }],
            BindingMode::Default,
            None,
        ));
        keymap.bind(KeyBinding::new(
            InputEvent::new(InputPrimary::Keycode("A".into()), ModMask::NONE),
            vec![ProgramEvent::Func { name: "FUNC_KC".into(), params: vec![] }],
            BindingMode::Default,
            None,
        ));
        let sc = InputEvent::new(InputPrimary::Scancode("30".into()), ModMask::NONE);
        let kc = InputEvent::new(InputPrimary::Keycode("A".into()), ModMask::NONE);
        let b = keymap.lookup(Some(&sc), Some(&kc)).unwrap();
        assert_eq!(b.program[0], ProgramEvent::Func { name: "FUNC_SC".into(), params: vec![] });
    }

    #[test]
    fn modifier_masked_fallback_strips_mods_on_miss() {
        let mut keymap = Keymap::new();
        keymap.bind(KeyBinding::new(
            InputEvent::new(InputPrimary::Keycode("A".into()), ModMask::NONE),
            vec![ProgramEvent::Func { name: "FUNC_PLAIN".into(), params: vec![] }],
            BindingMode::Default,
            None,
        ));
        let kc = InputEvent::new(InputPrimary::Keycode("A".into()), ModMask::SHIFT);
        let b = keymap.lookup(None, Some(&kc)).unwrap();
        assert_eq!(b.program[0], ProgramEvent::Func { name: "FUNC_PLAIN".into(), params: vec![] });
    }

    #[test]
    fn autofire_expands_to_wait_release_wait_skip_to() {
        let binding = KeyBinding::new(
            InputEvent::new(InputPrimary::MouseButton(1), ModMask::NONE),
            vec![ProgramEvent::MouseButton(1), ProgramEvent::Cmd(Cmd::Autofire(100))],
            BindingMode::Default,
            None,
        );
        assert_eq!(binding.program.len(), 5);
        assert_eq!(binding.program[0], ProgramEvent::MouseButton(1));
        assert_eq!(binding.program[1], ProgramEvent::Cmd(Cmd::Wait(WaitDuration::Ms(50))));
        assert_eq!(binding.program[2], ProgramEvent::Cmd(Cmd::Release(ReleaseTarget::Index(0))));
        assert_eq!(binding.program[4], ProgramEvent::Cmd(Cmd::SkipTo(0)));
    }

    #[test]
    fn bare_modifier_binding_is_modifier_only() {
        let keymap = parse_keymap_str("KMOD_LCTRL = FUNC_GRAB").unwrap();
        let ev = InputEvent::new(InputPrimary::Keycode("KMOD_LCTRL".into()), ModMask::NONE);
        let b = keymap.lookup(None, Some(&ev)).unwrap();
        assert!(b.input.is_modifier_only());
    }

    #[test]
    fn parses_func_with_params_and_group_opt() {
        let keymap = parse_keymap_str("F5 = FUNC_SAVE_STATE(quick); GROUP:hotkeys").unwrap();
        let ev = InputEvent::new(InputPrimary::Keycode("F5".into()), ModMask::NONE);
        let b = keymap.lookup(None, Some(&ev)).unwrap();
        assert_eq!(b.group.as_deref(), Some("hotkeys"));
        assert_eq!(b.program[0], ProgramEvent::Func { name: "FUNC_SAVE_STATE".into(), params: vec!["quick".into()] });
    }
}
