//! Audio prebuffer scenario: host rate 48000 Hz, heartbeat 10ms,
//! prebuffer 50ms, a 1kHz sine at -6dBFS fed for 500ms. The host ring
//! should settle and stay within [40, 80]ms once prebuffering completes.

use ps1_core::audio::{AudioSpec, Category};

const HEARTBEAT_NS: u64 = 10_000_000;
const PREBUFFER_US: u64 = 50_000;

fn ring_us(mixer: &ps1_core::audio::Mixer, spec: AudioSpec) -> u64 {
    let bytes_per_frame = spec.channels as usize * 2;
    let frames = (mixer.ring().get_read_avail() / bytes_per_frame) as u64;
    spec.frames_to_us(frames)
}

#[test]
fn prebuffer_settles_and_stays_within_latency_band() {
    let spec = AudioSpec::new(2, 48_000);
    let mut mixer = ps1_core::audio::Mixer::new(spec, HEARTBEAT_NS, PREBUFFER_US, 48_000);
    let id = mixer.install_channel("sine", Category::AudioCard, spec);

    // -6dBFS amplitude.
    let amplitude = 10f32.powf(-6.0 / 20.0);
    let mut phase = 0.0f64;
    let phase_step = 2.0 * std::f64::consts::PI * 1000.0 / 48_000.0;

    let bytes_per_frame = spec.channels as usize * 2;
    let heartbeat_frames = spec.ns_to_frames(HEARTBEAT_NS) as usize;

    let steps = 500 / 10; // 500ms at a 10ms heartbeat
    for step in 0..steps {
        let ch = mixer.channel_mut(id).unwrap();
        // Generous push: enough samples for this heartbeat's worth of frames.
        let mut frames = Vec::with_capacity(heartbeat_frames * 2 * 2);
        for _ in 0..(heartbeat_frames * 2) {
            let s = (phase.sin() as f32) * amplitude;
            frames.push(s);
            frames.push(s);
            phase += phase_step;
        }
        ch.push_input(&frames);
        ch.set_generator(Box::new(|_span, _pre, _first| true));

        mixer.step((step as u64) * HEARTBEAT_NS, false);

        // Once playing, drain roughly one heartbeat's worth each tick,
        // emulating the host audio callback pulling from the ring in
        // real time.
        if mixer.is_playing() {
            let mut drain = vec![0u8; heartbeat_frames * bytes_per_frame];
            mixer.ring().read(&mut drain);
            let us = ring_us(&mixer, spec);
            assert!(us <= 80_000, "ring grew past the high-water mark: {us}us at step {step}");
        }
    }

    assert!(mixer.is_playing(), "mixer should have reached Playing after 500ms of continuous input");
    let us = ring_us(&mixer, spec);
    assert!(us <= 80_000 && us <= PREBUFFER_US + 30_000, "ring settled outside [~40,80]ms band: {us}us");
}
