//! Mixer core: per-category mix, master volume/mute, sinks,
//! prebuffering against the fixed-rate host audio ring.

use std::sync::{Arc, Mutex};

use super::channel::MixerChannel;
use super::{resample_point, AudioSpec, Category, Volume, ALL_CATEGORIES};
use crate::queue::AudioRing;

/// `(tag, fn)` — receives each category's int16 mix plus the final master
/// mix, called under a dedicated mutex separate from the channels' lock.
pub type Sink = Box<dyn FnMut(&str, &[i16]) + Send>;

pub struct CategoryMix {
    pub volume: Volume,
    pub mute: bool,
}

impl Default for CategoryMix {
    fn default() -> Self {
        CategoryMix { volume: Volume::unity(), mute: false }
    }
}

/// Host device playback state driven by the prebuffer logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Paused,
    Prebuffering,
    Playing,
}

pub struct Mixer {
    output_spec: AudioSpec,
    heartbeat_ns: u64,
    prebuffer_us: u64,
    channels: Vec<MixerChannel>,
    next_channel_id: u64,
    categories: [CategoryMix; 3],
    pub master_volume: Volume,
    pub master_mute: bool,
    /// Shared with the host audio device's callback thread.
    ring: Arc<AudioRing>,
    sinks: Mutex<Vec<(String, Sink)>>,
    device_state: DeviceState,
    /// Set when `cycles_factor < 1.0` — audio-card category channels are
    /// resampled to real time before being added to the master.
    pub cycles_factor: f64,
}

impl Mixer {
    /// `ring_capacity_frames` sizes the host ring in output-spec frames.
    pub fn new(output_spec: AudioSpec, heartbeat_ns: u64, prebuffer_us: u64, ring_capacity_frames: usize) -> Self {
        let bytes_per_frame = output_spec.channels as usize * std::mem::size_of::<i16>();
        let prebuffer_us = Self::clamp_prebuffer(prebuffer_us, heartbeat_ns);
        Mixer {
            output_spec,
            heartbeat_ns,
            prebuffer_us,
            channels: Vec::new(),
            next_channel_id: 1,
            categories: [CategoryMix::default(), CategoryMix::default(), CategoryMix::default()],
            master_volume: Volume::unity(),
            master_mute: false,
            ring: Arc::new(AudioRing::new(ring_capacity_frames * bytes_per_frame)),
            sinks: Mutex::new(Vec::new()),
            device_state: DeviceState::Paused,
            cycles_factor: 1.0,
        }
    }

    /// Latency floor: prebuffer clamped to `[heartbeat, 10 * heartbeat]`.
    fn clamp_prebuffer(prebuffer_us: u64, heartbeat_ns: u64) -> u64 {
        let heartbeat_us = heartbeat_ns / 1_000;
        prebuffer_us.clamp(heartbeat_us, 10 * heartbeat_us)
    }

    pub fn prebuffer_us(&self) -> u64 {
        self.prebuffer_us
    }

    pub fn ring(&self) -> &AudioRing {
        &self.ring
    }

    /// Clones the ring handle for the host audio device's callback thread
    ///; the ring outlives the mixer step loop's lock.
    pub fn ring_handle(&self) -> Arc<AudioRing> {
        Arc::clone(&self.ring)
    }

    pub fn is_playing(&self) -> bool {
        self.device_state == DeviceState::Playing
    }

    fn category_index(cat: Category) -> usize {
        ALL_CATEGORIES.iter().position(|&c| c == cat).unwrap()
    }

    pub fn category_mut(&mut self, cat: Category) -> &mut CategoryMix {
        &mut self.categories[Self::category_index(cat)]
    }

    pub fn install_channel(
        &mut self,
        name: impl Into<String>,
        category: Category,
        input_spec: AudioSpec,
    ) -> u64 {
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        self.channels.push(MixerChannel::new(id, name, category, input_spec, self.output_spec));
        id
    }

    pub fn remove_channel(&mut self, id: u64) {
        self.channels.retain(|c| c.id != id);
    }

    pub fn channel_mut(&mut self, id: u64) -> Option<&mut MixerChannel> {
        self.channels.iter_mut().find(|c| c.id == id)
    }

    pub fn add_sink(&self, tag: impl Into<String>, sink: Sink) {
        self.sinks.lock().unwrap().push((tag.into(), sink));
    }

    /// `required_frames = max(ns_to_frames(heartbeat), ns_to_frames(prebuffer - ring))`
    /// clamped to the ring's capacity in frames.
    fn required_frames(&self) -> u64 {
        let heartbeat_frames = self.output_spec.ns_to_frames(self.heartbeat_ns);
        let ring_us = self.ring_us();
        let deficit_us = self.prebuffer_us.saturating_sub(ring_us);
        let deficit_frames = self.output_spec.us_to_frames(deficit_us);
        let capacity_frames = (self.ring.capacity() / self.bytes_per_frame()) as u64;
        heartbeat_frames.max(deficit_frames).min(capacity_frames)
    }

    fn bytes_per_frame(&self) -> usize {
        self.output_spec.channels as usize * std::mem::size_of::<i16>()
    }

    fn ring_us(&self) -> u64 {
        let frames = (self.ring.get_read_avail() / self.bytes_per_frame()) as u64;
        self.output_spec.frames_to_us(frames)
    }

    /// Runs one mixer step: updates every channel, mixes active ones by
    /// category, applies master volume/mute, converts to int16, writes to
    /// the host ring, and drives prebuffer/underrun state transitions.
    pub fn step(&mut self, now_ns: u64, prebuffering_hint: bool) {
        let required = self.required_frames() as usize;
        let channels = self.output_spec.channels as usize;
        let time_span_ns = self.output_spec.frames_to_ns(required as u64).max(self.heartbeat_ns);

        let mut category_accum: [Vec<f32>; 3] =
            [vec![0.0; required * channels], vec![0.0; required * channels], vec![0.0; required * channels]];
        let mut any_active = false;
        let card_idx = Self::category_index(Category::AudioCard);
        let mut card_valid_frames: usize = 0;

        for ch in self.channels.iter_mut() {
            let status = ch.update(now_ns, time_span_ns, prebuffering_hint);
            if status.active {
                any_active = true;
            }
            if !status.active || ch.is_muted() {
                continue;
            }
            let frames_out = ch.take_output(required);
            let idx = Self::category_index(ch.category);
            if idx == card_idx {
                card_valid_frames = card_valid_frames.max(frames_out.len() / channels.max(1));
            }
            let accum = &mut category_accum[idx];
            for (i, s) in frames_out.iter().enumerate().take(accum.len()) {
                accum[i] += s;
            }
        }

        // The audio-card device clocks its output at `cycles_factor` of real
        // speed, so a real step only yields `card_valid_frames` frames of
        // actual content ahead of the zero-padded tail. Resample that prefix
        // from the device's effective (slowed) rate up to the output rate so
        // the content spans the full real-time step instead of being left
        // front-loaded with silence or just turned down in volume.
        if self.cycles_factor < 1.0 && card_valid_frames > 0 {
            let prefix = &category_accum[card_idx][..card_valid_frames * channels];
            let device_rate = ((self.output_spec.rate_hz as f64) * self.cycles_factor).max(1.0) as u32;
            let device_spec = AudioSpec::new(self.output_spec.channels, device_rate);
            let mut stretched = resample_point(prefix, device_spec, self.output_spec);
            stretched.resize(required * channels, 0.0);
            category_accum[card_idx] = stretched;
        }

        let mut master = vec![0.0f32; required * channels];
        for (cat_idx, cat) in ALL_CATEGORIES.iter().enumerate() {
            let mix = &self.categories[cat_idx];
            if mix.mute {
                continue;
            }
            let accum = &category_accum[cat_idx];
            for (m, &s) in master.iter_mut().zip(accum.iter()) {
                *m += s * mix.volume.effective_left();
            }
            let cat_pcm = Self::to_i16(accum, mix.volume);
            self.publish_sink(&format!("{:?}", cat), &cat_pcm);
        }

        if self.master_mute {
            master.iter_mut().for_each(|s| *s = 0.0);
        }
        let master_pcm = Self::to_i16(&master, self.master_volume);
        self.publish_sink("master", &master_pcm);

        let bytes: Vec<u8> = master_pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.ring.write(&bytes);

        self.update_device_state(any_active);
    }

    fn to_i16(samples: &[f32], volume: Volume) -> Vec<i16> {
        samples
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let gain = if i % 2 == 0 { volume.effective_left() } else { volume.effective_right() };
                ((s * gain).clamp(-1.0, 1.0) * i16::MAX as f32) as i16
            })
            .collect()
    }

    fn publish_sink(&self, tag: &str, pcm: &[i16]) {
        let mut sinks = self.sinks.lock().unwrap();
        for (sink_tag, f) in sinks.iter_mut() {
            if sink_tag == tag || sink_tag == "master" && tag == "master" {
                f(tag, pcm);
            }
        }
    }

    /// Prebuffer/underrun state machine:
    /// - Paused until `ring >= prebuffer_us`, then Playing.
    /// - Ring above `prebuffer + 3*heartbeat` drops old data via `shrink_data`.
    /// - Ring below `prebuffer - 3*heartbeat` while playing re-pauses and
    ///   restarts prebuffering.
    /// - No active channel and an empty ring pauses silently.
    fn update_device_state(&mut self, any_active: bool) {
        let heartbeat_us = self.heartbeat_ns / 1_000;
        let ring_us = self.ring_us();
        let high_water = self.prebuffer_us + 3 * heartbeat_us;
        let low_water = self.prebuffer_us.saturating_sub(3 * heartbeat_us);

        if !any_active && self.ring.get_read_avail() == 0 {
            self.device_state = DeviceState::Paused;
            return;
        }

        match self.device_state {
            DeviceState::Paused => {
                self.device_state = DeviceState::Prebuffering;
            }
            DeviceState::Prebuffering => {
                if ring_us >= self.prebuffer_us {
                    self.device_state = DeviceState::Playing;
                }
            }
            DeviceState::Playing => {
                if ring_us < low_water {
                    self.device_state = DeviceState::Prebuffering;
                }
            }
        }

        if ring_us > high_water {
            let keep_frames = self.output_spec.us_to_frames(self.prebuffer_us);
            self.ring.shrink_data(keep_frames as usize * self.bytes_per_frame());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> AudioSpec {
        AudioSpec::new(2, 48_000)
    }

    #[test]
    fn prebuffer_is_clamped_to_latency_floor() {
        let heartbeat_ns = 10_000_000; // 10ms
        let mixer = Mixer::new(spec(), heartbeat_ns, 1, 4096);
        assert_eq!(mixer.prebuffer_us(), 10_000);
        let mixer2 = Mixer::new(spec(), heartbeat_ns, 1_000_000, 4096);
        assert_eq!(mixer2.prebuffer_us(), 100_000);
    }

    #[test]
    fn silent_category_produces_zero_accumulator() {
        let mut mixer = Mixer::new(spec(), 10_000_000, 50_000, 65536);
        mixer.step(0, true);
        assert_eq!(mixer.ring().get_read_avail() > 0, true);
        // No channels installed: all PCM should be digital silence.
        let mut buf = vec![0u8; mixer.ring().get_read_avail()];
        mixer.ring().read(&mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn device_pauses_when_nothing_active_and_ring_empty() {
        let mut mixer = Mixer::new(spec(), 10_000_000, 50_000, 65536);
        mixer.step(0, false);
        assert!(!mixer.is_playing());
    }

    #[test]
    fn single_unity_channel_mixes_losslessly() {
        let mut mixer = Mixer::new(spec(), 10_000_000, 50_000, 65536);
        let id = mixer.install_channel("sine", Category::AudioCard, spec());
        let ch = mixer.channel_mut(id).unwrap();
        ch.push_input(&[0.5, 0.5]);
        ch.set_generator(Box::new(|_s, _p, _f| true));
        mixer.step(0, false);
        assert!(mixer.ring().get_read_avail() >= 4);
    }

    /// With `cycles_factor` below 1, the audio-card device only manages to
    /// produce a short prefix of frames before a step's real-time span
    /// elapses. The fix stretches that prefix across the whole step instead
    /// of scaling every sample (including the silent tail) down in volume.
    #[test]
    fn slow_cycles_factor_stretches_audio_card_instead_of_attenuating() {
        let mut mixer = Mixer::new(spec(), 10_000_000, 10_000, 65536);
        mixer.cycles_factor = 0.25;
        let id = mixer.install_channel("chip", Category::AudioCard, spec());
        let ch = mixer.channel_mut(id).unwrap();
        // A handful of full-scale frames, far short of the ~480 frames a
        // 10ms/48kHz step would need at real speed.
        ch.push_input(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        ch.set_generator(Box::new(|_s, _p, _f| true));
        mixer.step(0, false);

        let avail = mixer.ring().get_read_avail();
        let mut buf = vec![0u8; avail];
        mixer.ring().read(&mut buf);
        let peak = buf
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]).unsigned_abs())
            .max()
            .unwrap_or(0);
        // Full-scale input should still hit close to full scale somewhere in
        // the stretched output, not be scaled down by cycles_factor.
        assert!(peak as f32 > i16::MAX as f32 * 0.9, "peak {peak} looks attenuated, not stretched");
    }
}
