//! The running-event executor: walks a bound program from a host press,
//! suspending on `Wait` and resuming from a host timer, and implements the
//! keycombo remap.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::keymap::{BindingMode, Cmd, InputEvent, KeyBinding, Keymap, ProgramEvent, ReleaseTarget, WaitDuration};

/// A press or release delivered to the guest. `Func`/`Cmd` program events
/// only ever appear wrapped in `Press` — they have no release.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestEvent {
    Press(ProgramEvent),
    Release(ProgramEvent),
}

pub type DispatchFn = Box<dyn FnMut(GuestEvent) + Send>;

struct RunningEvent {
    input: InputEvent,
    program: Vec<ProgramEvent>,
    pc: usize,
    waiting_until: Option<Instant>,
    /// Program indices currently pressed on the guest side and not yet
    /// released.
    emitted: Vec<usize>,
    /// Set while a keycombo link has taken over this (modifier-only)
    /// event's guest output.
    masked: bool,
    /// Modifier-only running events this combo event linked and masked.
    linked: Vec<u64>,
}

/// Owns the keymap and every in-flight running event; the caller feeds it
/// host press/release notifications and periodic `tick`s.
pub struct InputEngine {
    keymap: Keymap,
    running: HashMap<u64, RunningEvent>,
    held: HashMap<InputEvent, u64>,
    latched: HashMap<InputEvent, u64>,
    next_id: u64,
    tm_delay_ms: u32,
    tm_rate_cps: u32,
    dispatch: DispatchFn,
}

impl InputEngine {
    pub fn new(keymap: Keymap, tm_delay_ms: u32, tm_rate_cps: u32, dispatch: DispatchFn) -> Self {
        InputEngine {
            keymap,
            running: HashMap::new(),
            held: HashMap::new(),
            latched: HashMap::new(),
            next_id: 1,
            tm_delay_ms,
            tm_rate_cps,
            dispatch,
        }
    }

    pub fn set_typematic(&mut self, delay_ms: u32, rate_cps: u32) {
        self.tm_delay_ms = delay_ms;
        self.tm_rate_cps = rate_cps;
    }

    fn wait_ms(&self, dur: WaitDuration) -> u32 {
        match dur {
            WaitDuration::Ms(ms) => ms,
            WaitDuration::TypematicDelay => self.tm_delay_ms,
            WaitDuration::TypematicRate => {
                if self.tm_rate_cps == 0 {
                    self.tm_delay_ms
                } else {
                    1000 / self.tm_rate_cps
                }
            }
        }
    }

    /// A host key (or button/axis) went down. `scancode_ev`/`keycode_ev` are
    /// the two parallel forms of the same physical press.
    pub fn press(&mut self, now: Instant, scancode_ev: Option<InputEvent>, keycode_ev: Option<InputEvent>) {
        let binding = match self.keymap.lookup(scancode_ev.as_ref(), keycode_ev.as_ref()) {
            Some(b) => b.clone(),
            None => return,
        };
        let host_ev = match scancode_ev.or(keycode_ev) {
            Some(ev) => ev,
            None => return,
        };

        match binding.mode {
            BindingMode::Latched => {
                if let Some(id) = self.latched.remove(&host_ev) {
                    self.stop_event(id);
                } else {
                    let id = self.start_event(now, host_ev.clone(), &binding, Vec::new());
                    self.latched.insert(host_ev, id);
                }
            }
            BindingMode::OneShot => {
                let id = self.start_event(now, host_ev, &binding, Vec::new());
                // Fires once: whatever it pressed is released immediately,
                // there is no sustained host key to track.
                self.stop_event(id);
            }
            BindingMode::Default => {
                if self.held.contains_key(&host_ev) {
                    return; // host-level key-repeat; typematic handles repeat.
                }
                let linked = self.link_modifiers_for_combo(&host_ev);
                let id = self.start_event(now, host_ev.clone(), &binding, linked);
                self.held.insert(host_ev, id);
            }
        }
    }

    /// A host key went up. No-op for Latched bindings (those toggle on
    /// press instead).
    pub fn release(&mut self, scancode_ev: Option<&InputEvent>, keycode_ev: Option<&InputEvent>) {
        for ev in [scancode_ev, keycode_ev].into_iter().flatten() {
            if let Some(id) = self.held.remove(ev) {
                self.stop_event(id);
            }
        }
    }

    /// Resumes any running events whose `Wait` has elapsed. Must be polled
    /// more often than the shortest `Wait` duration in use.
    pub fn tick(&mut self, now: Instant) {
        let due: Vec<u64> = self
            .running
            .iter()
            .filter(|(_, r)| r.waiting_until.map(|d| d <= now).unwrap_or(false))
            .map(|(&id, _)| id)
            .collect();
        for id in due {
            if let Some(r) = self.running.get_mut(&id) {
                r.waiting_until = None;
            }
            self.execute_from(id, now);
        }
    }

    /// Marks every modifier-only binding among the currently held host keys
    /// that this combo's modifiers cover, masks its output, and releases
    /// whatever it had already pressed on the guest — so the guest never
    /// sees both the source modifier and the combo's target key at once.
    fn link_modifiers_for_combo(&mut self, host_ev: &InputEvent) -> Vec<u64> {
        if host_ev.mods.is_empty() {
            return Vec::new();
        }
        let bits = host_ev.mods.bits();
        let candidate_ids: Vec<u64> = self.held.values().copied().collect();
        let mut linked = Vec::new();
        for id in candidate_ids {
            let is_match = self
                .running
                .get(&id)
                .map(|r| r.input.modifier_bit().map(|b| bits.contains(&b)).unwrap_or(false))
                .unwrap_or(false);
            if !is_match {
                continue;
            }
            self.apply_release(id, ReleaseTarget::All);
            if let Some(r) = self.running.get_mut(&id) {
                r.masked = true;
            }
            linked.push(id);
        }
        linked
    }

    fn start_event(&mut self, now: Instant, input: InputEvent, binding: &KeyBinding, linked: Vec<u64>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.running.insert(
            id,
            RunningEvent {
                input,
                program: binding.program.clone(),
                pc: 0,
                waiting_until: None,
                emitted: Vec::new(),
                masked: false,
                linked,
            },
        );
        self.execute_from(id, now);
        id
    }

    /// Walks `program` from the current `pc`, dispatching presses and
    /// acting on `Cmd`s, until it hits a `Wait` (parks and returns) or runs
    /// off the end (the running event is dropped).
    fn execute_from(&mut self, id: u64, now: Instant) {
        loop {
            let Some(running) = self.running.get(&id) else { return };
            if running.pc >= running.program.len() {
                self.running.remove(&id);
                return;
            }
            let event = running.program[running.pc].clone();
            match event {
                ProgramEvent::Cmd(Cmd::Wait(dur)) => {
                    let ms = self.wait_ms(dur);
                    if let Some(r) = self.running.get_mut(&id) {
                        r.pc += 1;
                        r.waiting_until = Some(now + Duration::from_millis(ms as u64));
                    }
                    return;
                }
                ProgramEvent::Cmd(Cmd::SkipTo(target)) => {
                    if let Some(r) = self.running.get_mut(&id) {
                        r.pc = target;
                    }
                }
                ProgramEvent::Cmd(Cmd::Release(target)) => {
                    self.apply_release(id, target);
                    if let Some(r) = self.running.get_mut(&id) {
                        r.pc += 1;
                    }
                }
                ProgramEvent::Cmd(Cmd::Autofire(_)) => {
                    // Always expanded away by `KeyBinding::new`; reaching
                    // this is a no-op guard against a hand-built program.
                    if let Some(r) = self.running.get_mut(&id) {
                        r.pc += 1;
                    }
                }
                other => {
                    let masked = self.running.get(&id).map(|r| r.masked).unwrap_or(false);
                    if !masked {
                        (self.dispatch)(GuestEvent::Press(other.clone()));
                    }
                    if let Some(r) = self.running.get_mut(&id) {
                        if other.is_releasable() {
                            r.emitted.push(r.pc);
                        }
                        r.pc += 1;
                    }
                }
            }
        }
    }

    fn apply_release(&mut self, id: u64, target: ReleaseTarget) {
        let to_release: Vec<ProgramEvent> = {
            let Some(running) = self.running.get_mut(&id) else { return };
            match target {
                ReleaseTarget::Index(i) => {
                    if let Some(pos) = running.emitted.iter().position(|&e| e == i) {
                        running.emitted.remove(pos);
                        vec![running.program[i].clone()]
                    } else {
                        Vec::new()
                    }
                }
                ReleaseTarget::All => {
                    let idxs: Vec<usize> = running.emitted.drain(..).collect();
                    idxs.into_iter().map(|i| running.program[i].clone()).collect()
                }
            }
        };
        for ev in to_release {
            (self.dispatch)(GuestEvent::Release(ev));
        }
    }

    /// Releases everything this running event still holds on the guest,
    /// unmasks any modifier-only events it had linked, and drops it.
    fn stop_event(&mut self, id: u64) {
        self.apply_release(id, ReleaseTarget::All);
        let linked = self.running.get(&id).map(|r| r.linked.clone()).unwrap_or_default();
        for lid in linked {
            if let Some(r) = self.running.get_mut(&lid) {
                r.masked = false;
            }
        }
        self.running.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::super::keymap::{parse_keymap_str, InputPrimary, ModMask};
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_dispatch() -> (DispatchFn, Arc<Mutex<Vec<GuestEvent>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let dispatch: DispatchFn = Box::new(move |ev| log2.lock().unwrap().push(ev));
        (dispatch, log)
    }

    fn kc(name: &str) -> InputEvent {
        InputEvent::new(InputPrimary::Keycode(name.into()), ModMask::NONE)
    }

    fn kc_mod(name: &str, mods: ModMask) -> InputEvent {
        InputEvent::new(InputPrimary::Keycode(name.into()), mods)
    }

    #[test]
    fn default_binding_presses_once_then_releases_on_host_key_up() {
        let keymap = parse_keymap_str("A = KEY_A").unwrap();
        let (dispatch, log) = recording_dispatch();
        let mut engine = InputEngine::new(keymap, 300, 20, dispatch);
        let now = Instant::now();
        engine.press(now, None, Some(kc("A")));
        engine.release(None, Some(&kc("A")));
        let log = log.lock().unwrap();
        assert_eq!(log[0], GuestEvent::Press(ProgramEvent::Key("KEY_A".into())));
        assert_eq!(log.last().unwrap(), &GuestEvent::Release(ProgramEvent::Key("KEY_A".into())));
    }

    #[test]
    fn typematic_repeats_the_key_after_the_delay_elapses() {
        let keymap = parse_keymap_str("A = KEY_A").unwrap();
        let (dispatch, log) = recording_dispatch();
        let mut engine = InputEngine::new(keymap, 10, 1000, dispatch);
        let now = Instant::now();
        engine.press(now, None, Some(kc("A")));
        engine.tick(now + Duration::from_millis(20));
        let presses = log.lock().unwrap().iter().filter(|e| matches!(e, GuestEvent::Press(ProgramEvent::Key(_)))).count();
        assert!(presses >= 2, "expected at least an initial press and one typematic repeat, got {presses}");
    }

    #[test]
    fn releasing_mid_wait_stops_the_typematic_loop() {
        let keymap = parse_keymap_str("A = KEY_A").unwrap();
        let (dispatch, log) = recording_dispatch();
        let mut engine = InputEngine::new(keymap, 1000, 10, dispatch);
        let now = Instant::now();
        engine.press(now, None, Some(kc("A")));
        engine.release(None, Some(&kc("A")));
        engine.tick(now + Duration::from_secs(5));
        let presses = log.lock().unwrap().iter().filter(|e| matches!(e, GuestEvent::Press(_))).count();
        assert_eq!(presses, 1, "no further presses should fire once the host key is up");
    }

    #[test]
    fn latched_binding_toggles_on_alternating_presses_and_ignores_release() {
        let keymap = parse_keymap_str("F1 = FUNC_TOGGLE; MODE:LATCHED").unwrap();
        let (dispatch, log) = recording_dispatch();
        let mut engine = InputEngine::new(keymap, 300, 20, dispatch);
        let now = Instant::now();
        engine.press(now, None, Some(kc("F1")));
        engine.release(None, Some(&kc("F1")));
        assert_eq!(log.lock().unwrap().len(), 1, "release must not affect a latched binding");
        engine.press(now, None, Some(kc("F1")));
        assert_eq!(log.lock().unwrap().len(), 1, "toggling off produces no guest event for a Func-only payload");
    }

    #[test]
    fn oneshot_binding_fires_a_single_pulse_with_no_lingering_press() {
        let keymap = parse_keymap_str("F2 = MOUSE_BUTTON_1; MODE:1SHOT").unwrap();
        let (dispatch, log) = recording_dispatch();
        let mut engine = InputEngine::new(keymap, 300, 20, dispatch);
        let now = Instant::now();
        engine.press(now, None, Some(kc("F2")));
        let log = log.lock().unwrap();
        assert_eq!(log.as_slice(), &[GuestEvent::Press(ProgramEvent::MouseButton(1)), GuestEvent::Release(ProgramEvent::MouseButton(1))]);
    }

    #[test]
    fn keycombo_remap_releases_the_source_modifier_before_the_target_key() {
        let keymap = parse_keymap_str("KMOD_LCTRL = KEY_LCTRL\nA+KMOD_CTRL = KEY_SPECIAL").unwrap();
        let (dispatch, log) = recording_dispatch();
        let mut engine = InputEngine::new(keymap, 300, 20, dispatch);
        let now = Instant::now();
        engine.press(now, None, Some(kc("KMOD_LCTRL")));
        engine.press(now, None, Some(kc_mod("A", ModMask::CTRL)));

        let log = log.lock().unwrap();
        let modifier_release_idx = log.iter().position(|e| *e == GuestEvent::Release(ProgramEvent::Key("KEY_LCTRL".into())));
        let combo_press_idx = log.iter().position(|e| matches!(e, GuestEvent::Press(ProgramEvent::Key(k)) if k == "KEY_SPECIAL"));
        assert!(modifier_release_idx.is_some(), "the linked modifier must be released: {log:?}");
        assert!(combo_press_idx.is_some(), "the combo's target key must fire: {log:?}");
        assert!(modifier_release_idx.unwrap() < combo_press_idx.unwrap(), "modifier release must precede the combo press");
        // Never simultaneously active: no KEY_LCTRL press remains unreleased once the combo runs.
        let lctrl_presses = log.iter().filter(|e| **e == GuestEvent::Press(ProgramEvent::Key("KEY_LCTRL".into()))).count();
        let lctrl_releases = log.iter().filter(|e| **e == GuestEvent::Release(ProgramEvent::Key("KEY_LCTRL".into()))).count();
        assert_eq!(lctrl_presses, lctrl_releases);
    }
}
